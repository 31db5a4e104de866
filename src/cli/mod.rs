mod doctor;
mod shell;

use std::io::{self, Write};

use crate::cache::LocalCache;
use crate::types::ModuleRecord;

pub use doctor::{Check, CheckStatus, print_checks, run_checks};
pub use shell::{ShellCommand, run_shell};

/// Print the inventory with the local state of each module.
pub fn print_modules<W: Write>(
    out: &mut W,
    modules: &[ModuleRecord],
    cache: &LocalCache,
) -> io::Result<()> {
    if modules.is_empty() {
        writeln!(out, "No modules found")?;
        return Ok(());
    }

    writeln!(out, "{:<40} {:>7} {:>7}  {}", "MODULE", "CLONED", "TARGET", "SOURCE")?;
    writeln!(out, "{}", "-".repeat(100))?;

    for record in modules {
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        writeln!(
            out,
            "{:<40} {:>7} {:>7}  {}",
            record.name,
            yes_no(cache.has_source(&record.name)),
            yes_no(cache.has_target(&record.name)),
            record.source_url
        )?;
    }

    writeln!(out, "\n{} modules", modules.len())?;
    Ok(())
}
