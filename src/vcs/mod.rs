//! Mercurial + git command wrappers.
//!
//! Write operations shell out to the `hg` and `git` CLIs (the hg-git bridge
//! only exists as a Mercurial extension). Local reads of the bare target
//! repositories use libgit2.

mod git;
mod hg;
mod runner;

use thiserror::Error;

pub use git::{GitCli, RefEntry, list_refs, repository_exists};
pub use hg::HgCli;
pub use runner::{CommandOutput, CommandRunner, Invocation, SystemRunner};

#[cfg(test)]
pub(crate) use git::test_support;
#[cfg(test)]
pub(crate) use runner::fake;

/// Errors returned by VCS operations.
#[derive(Error, Debug)]
pub enum VcsError {
    /// libgit2 reported an error.
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
    /// Repository path does not contain a repository.
    #[error("repository not found at {0}")]
    NotFound(String),
    /// The command ran and exited unsuccessfully.
    #[error("command failed: {command} (exit code: {code:?}){stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    /// Underlying IO error (including failure to spawn the binary).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Invalid inputs were provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl VcsError {
    pub(crate) fn failed(invocation: &Invocation, output: &CommandOutput) -> Self {
        let stderr = output.stderr.trim();
        Self::Failed {
            command: invocation.to_string(),
            code: output.code,
            stderr: if stderr.is_empty() {
                String::new()
            } else {
                format!(": {}", stderr)
            },
        }
    }
}

/// Validate that a value handed to a VCS command is not mistaken for a flag.
///
/// Rejects:
/// - Empty strings
/// - Strings starting with `-` (could be interpreted as flags)
/// - Strings containing null bytes or control characters
pub(crate) fn validate_arg(value: &str, name: &str) -> Result<(), VcsError> {
    if value.is_empty() {
        return Err(VcsError::InvalidInput(format!("{} cannot be empty", name)));
    }
    if value.starts_with('-') {
        return Err(VcsError::InvalidInput(format!(
            "{} cannot start with '-'",
            name
        )));
    }
    if value.bytes().any(|b| b == 0 || b < 0x20 || b == 0x7f) {
        return Err(VcsError::InvalidInput(format!(
            "{} cannot contain null or control characters",
            name
        )));
    }
    Ok(())
}
