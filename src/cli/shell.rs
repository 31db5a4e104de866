//! Interactive command loop over the stage table.

use std::io::{self, BufRead, Write};
use std::str::FromStr;

use crate::pipeline::Stage;

const PROMPT: &str = "(hgmirror) ";

/// A parsed shell line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellCommand {
    Stage(Stage),
    Run,
    List,
    Doctor,
    Help,
    Quit,
}

impl FromStr for ShellCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "run" | "all" => Ok(Self::Run),
            "list" | "ls" => Ok(Self::List),
            "doctor" => Ok(Self::Doctor),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" | "EOF" => Ok(Self::Quit),
            other => other
                .parse::<Stage>()
                .map(Self::Stage)
                .map_err(|_| format!("unknown command: {}", other)),
        }
    }
}

fn print_help<W: Write>(out: &mut W) -> io::Result<()> {
    writeln!(out, "Stages:")?;
    for stage in Stage::ALL {
        writeln!(out, "  {:<22} {}", stage.name(), stage.description())?;
    }
    writeln!(out, "Other commands:")?;
    writeln!(out, "  {:<22} {}", "run", "every stage in order")?;
    writeln!(out, "  {:<22} {}", "list", "print the module inventory")?;
    writeln!(out, "  {:<22} {}", "doctor", "check the required tools")?;
    writeln!(out, "  {:<22} {}", "help", "show this message")?;
    writeln!(out, "  {:<22} {}", "quit", "leave the shell")?;
    Ok(())
}

/// Read commands from `input` until `quit` or end of input.
///
/// `help`, `quit` and unknown commands are handled here; everything else is
/// handed to `dispatch`. An error from `dispatch` is printed and the loop
/// goes on.
pub fn run_shell<R, W, F>(input: R, out: &mut W, mut dispatch: F) -> io::Result<()>
where
    R: BufRead,
    W: Write,
    F: FnMut(ShellCommand, &mut W) -> Result<(), Box<dyn std::error::Error>>,
{
    let mut lines = input.lines();

    loop {
        write!(out, "{}", PROMPT)?;
        out.flush()?;

        let Some(line) = lines.next() else {
            writeln!(out)?;
            return Ok(());
        };
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<ShellCommand>() {
            Ok(ShellCommand::Quit) => return Ok(()),
            Ok(ShellCommand::Help) => print_help(out)?,
            Ok(command) => {
                if let Err(e) = dispatch(command, out) {
                    writeln!(out, "Error: {}", e)?;
                }
            }
            Err(e) => {
                writeln!(out, "{}", e)?;
                writeln!(out, "Type 'help' for the list of commands.")?;
            }
        }
    }
}
