pub mod cache;
pub mod cli;
pub mod config;
pub mod forge;
pub mod http;
pub mod inventory;
pub mod pipeline;
pub mod push;
pub mod translate;
pub mod types;
pub mod vcs;

use std::error::Error;
use std::io::{self, Write};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, Subcommand};

use crate::cache::{CachePaths, LocalCache};
use crate::cli::ShellCommand;
use crate::config::Config;
use crate::forge::{Provisioner, forge_from_config};
use crate::inventory::{BitbucketClient, Inventory, InventoryPolicy};
use crate::pipeline::{Pipeline, Stage, StageReport};
use crate::vcs::{CommandRunner, GitCli, HgCli, SystemRunner};

#[derive(Parser)]
#[command(
    name = "hgmirror",
    about = "Mirror Mercurial module repositories from Bitbucket to git forges"
)]
struct Cli {
    /// Defaults to the interactive shell
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create cache directories and empty bare git repositories
    Setup,

    /// Clone every module missing from the hg cache
    #[command(name = "clone_all", alias = "clone-all")]
    CloneAll,

    /// Pull and update every cloned module
    #[command(name = "pull_all", alias = "pull-all")]
    PullAll,

    /// Bookmark branches and push them into the git cache
    #[command(name = "hg_to_git", alias = "hg-to-git")]
    HgToGit,

    /// Create or fix the mirror repositories on the forge
    #[command(name = "create_missing_repos", alias = "create-missing-repos")]
    CreateMissingRepos,

    /// Mirror-push every translated module to its remotes
    #[command(name = "push_to_remotes", alias = "push-to-remotes")]
    PushToRemotes,

    /// Run every stage in order
    Run,

    /// List the module inventory
    List,

    /// Check dependencies
    Doctor,

    /// Interactive shell
    Shell,
}

impl Commands {
    fn shell_command(&self) -> Option<ShellCommand> {
        let command = match self {
            Commands::Setup => ShellCommand::Stage(Stage::Setup),
            Commands::CloneAll => ShellCommand::Stage(Stage::CloneAll),
            Commands::PullAll => ShellCommand::Stage(Stage::PullAll),
            Commands::HgToGit => ShellCommand::Stage(Stage::HgToGit),
            Commands::CreateMissingRepos => ShellCommand::Stage(Stage::CreateMissingRepos),
            Commands::PushToRemotes => ShellCommand::Stage(Stage::PushToRemotes),
            Commands::Run => ShellCommand::Run,
            Commands::List => ShellCommand::List,
            Commands::Doctor => ShellCommand::Doctor,
            Commands::Shell => return None,
        };
        Some(command)
    }
}

/// Everything a command needs, built once per process.
struct App {
    inventory: Inventory<BitbucketClient>,
    pipeline: Pipeline,
    shutdown: Arc<AtomicBool>,
}

impl App {
    fn from_config(config: Config, shutdown: Arc<AtomicBool>) -> Result<Self, Box<dyn Error>> {
        let agent = http::agent(config.http_timeout);

        let runner: Rc<dyn CommandRunner> = Rc::new(SystemRunner);
        let cache = LocalCache::new(
            CachePaths::from_config(&config),
            HgCli::new(runner.clone()).with_binary(&config.hg_binary),
            GitCli::new(runner).with_binary(&config.git_binary),
        )
        .with_lock_timeout(config.lock_timeout);

        let provisioner = match config.forge.token {
            Some(_) => Some(Provisioner::new(forge_from_config(
                &config.forge,
                agent.clone(),
            )?)),
            None => None,
        };

        let inventory = Inventory::new(
            BitbucketClient::new(&config.inventory, agent),
            InventoryPolicy::from_config(&config.inventory),
        );

        Ok(Self {
            inventory,
            pipeline: Pipeline::new(config, cache, provisioner).with_shutdown(shutdown.clone()),
            shutdown,
        })
    }

    fn execute<W: Write>(&mut self, command: ShellCommand, out: &mut W) -> Result<(), Box<dyn Error>> {
        // An interrupt only cancels the command it arrived during.
        self.shutdown.store(false, Ordering::SeqCst);
        match command {
            ShellCommand::Stage(stage) => self.stage(stage, out),
            ShellCommand::Run => self.run(out),
            ShellCommand::List => self.list(out),
            ShellCommand::Doctor => self.doctor(out),
            ShellCommand::Help | ShellCommand::Quit => Ok(()),
        }
    }

    fn stage<W: Write>(&mut self, stage: Stage, out: &mut W) -> Result<(), Box<dyn Error>> {
        if stage == Stage::CreateMissingRepos && !self.pipeline.can_provision() {
            return Err("no forge token configured (set FORGE_TOKEN)".into());
        }

        let modules = self.inventory.collect()?;
        let report = self.pipeline.run_stage(stage, &modules)?;
        print_report(out, &report)?;
        Ok(())
    }

    fn run<W: Write>(&mut self, out: &mut W) -> Result<(), Box<dyn Error>> {
        let modules = self.inventory.collect()?;
        writeln!(out, "{} modules in inventory", modules.len())?;

        for report in self.pipeline.run_all(&modules)? {
            print_report(out, &report)?;
        }
        Ok(())
    }

    fn list<W: Write>(&mut self, out: &mut W) -> Result<(), Box<dyn Error>> {
        let modules = self.inventory.collect()?;
        cli::print_modules(out, &modules, self.pipeline.cache())?;
        Ok(())
    }

    fn doctor<W: Write>(&mut self, out: &mut W) -> Result<(), Box<dyn Error>> {
        let cache = self.pipeline.cache();
        let checks = cli::run_checks(self.pipeline.config(), cache.hg(), cache.git());
        if !cli::print_checks(out, &checks)? {
            return Err("required tools are missing".into());
        }
        Ok(())
    }
}

fn print_report<W: Write>(out: &mut W, report: &StageReport) -> io::Result<()> {
    writeln!(out, "{}", report)?;
    if report.is_success() {
        return Ok(());
    }
    for failure in &report.failures {
        writeln!(out, "  {}: {}", failure.module, failure.error)?;
    }
    Ok(())
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("interrupt received, stopping after the current module");
        flag.store(true, Ordering::SeqCst);
    }) {
        log::warn!("cannot install interrupt handler: {}", e);
    }

    let result = Config::from_env()
        .map_err(Box::<dyn Error>::from)
        .and_then(|config| App::from_config(config, shutdown))
        .and_then(|mut app| {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            match cli.command.as_ref().and_then(Commands::shell_command) {
                Some(command) => app.execute(command, &mut out),
                None => cmd_shell(&mut app, &mut out),
            }
        });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn cmd_shell<W: Write>(app: &mut App, out: &mut W) -> Result<(), Box<dyn Error>> {
    writeln!(out, "hgmirror shell. Type 'help' for the list of commands.")?;
    let stdin = io::stdin();
    cli::run_shell(stdin.lock(), out, |command, out| app.execute(command, out))?;
    Ok(())
}
