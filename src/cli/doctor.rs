//! `doctor`: check the tools and directories the pipeline relies on.

use std::fmt;
use std::io::{self, Write};
use std::path::Path;

use crate::config::Config;
use crate::vcs::{GitCli, HgCli};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Ok,
    Fail,
    Info,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Fail => write!(f, "FAIL"),
            Self::Info => write!(f, "INFO"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: &'static str,
    pub status: CheckStatus,
    pub detail: String,
}

impl Check {
    fn new(name: &'static str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name,
            status,
            detail: detail.into(),
        }
    }
}

fn dir_check(name: &'static str, path: &Path) -> Check {
    if path.is_dir() {
        Check::new(name, CheckStatus::Ok, path.display().to_string())
    } else {
        Check::new(
            name,
            CheckStatus::Info,
            format!("{} (created by setup)", path.display()),
        )
    }
}

/// Run every check. `Fail` entries make the pipeline unusable.
pub fn run_checks(config: &Config, hg: &HgCli, git: &GitCli) -> Vec<Check> {
    let mut checks = Vec::new();

    checks.push(match git.version() {
        Ok(version) => Check::new("git", CheckStatus::Ok, version),
        Err(e) => Check::new(
            "git",
            CheckStatus::Fail,
            format!("{} not usable: {}", git.binary(), e),
        ),
    });

    let hg_ok = match hg.version() {
        Ok(version) => {
            checks.push(Check::new("hg", CheckStatus::Ok, version));
            true
        }
        Err(e) => {
            checks.push(Check::new(
                "hg",
                CheckStatus::Fail,
                format!("{} not usable: {}", hg.binary(), e),
            ));
            false
        }
    };

    if hg_ok {
        checks.push(if hg.has_hggit() {
            Check::new("hg-git", CheckStatus::Ok, "extension available")
        } else {
            Check::new("hg-git", CheckStatus::Fail, "extension not installed")
        });
    }

    checks.push(dir_check("hg cache", &config.hg_cache));
    checks.push(dir_check("git cache", &config.git_cache));
    checks.push(dir_check("lock dir", &config.lock_dir));

    checks.push(match &config.forge.token {
        Some(_) => Check::new(
            "forge token",
            CheckStatus::Ok,
            format!("{} / {}", config.forge.kind, config.forge.org),
        ),
        None => Check::new(
            "forge token",
            CheckStatus::Info,
            "not set, repositories will not be provisioned",
        ),
    });

    checks
}

/// Print `checks`; returns whether none failed.
pub fn print_checks<W: Write>(out: &mut W, checks: &[Check]) -> io::Result<bool> {
    writeln!(out, "hgmirror system check\n")?;
    for check in checks {
        writeln!(out, "[{}] {}: {}", check.status, check.name, check.detail)?;
    }
    Ok(checks.iter().all(|c| c.status != CheckStatus::Fail))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::fake::{FakeRunner, has_arg};
    use crate::vcs::CommandOutput;
    use std::collections::HashMap;
    use std::rc::Rc;

    fn config(dir: &Path) -> Config {
        let env: HashMap<&str, String> = [
            ("HG_CACHE", dir.join("hg").display().to_string()),
            ("GIT_CACHE", dir.display().to_string()),
        ]
        .into_iter()
        .collect();
        Config::from_lookup(|key| env.get(key).cloned()).unwrap()
    }

    #[test]
    fn all_tools_present() {
        let runner = Rc::new(FakeRunner::new(|inv| {
            let mut out = CommandOutput::with_code(0);
            if has_arg(inv, "--version") {
                out.stdout = "git version 2.43.0\n".into();
            } else if has_arg(inv, "version") {
                out.stdout = "Mercurial Distributed SCM (version 6.7)\n".into();
            }
            Ok(out)
        }));
        let temp = tempfile::tempdir().unwrap();
        let config = config(temp.path());

        let checks = run_checks(&config, &HgCli::new(runner.clone()), &GitCli::new(runner));
        let mut out = Vec::new();
        assert!(print_checks(&mut out, &checks).unwrap());

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("[OK] git: git version 2.43.0"));
        assert!(text.contains("[OK] hg-git: extension available"));
        assert!(text.contains("[INFO] hg cache"));
        assert!(text.contains("[OK] git cache"));
        assert!(text.contains("[INFO] forge token"));
    }

    #[test]
    fn missing_hggit_fails() {
        let runner = Rc::new(FakeRunner::new(|inv| {
            let missing = has_arg(inv, "extensions.hggit=");
            Ok(CommandOutput::with_code(if missing { 255 } else { 0 }))
        }));
        let temp = tempfile::tempdir().unwrap();

        let checks = run_checks(
            &config(temp.path()),
            &HgCli::new(runner.clone()),
            &GitCli::new(runner),
        );
        let hggit = checks.iter().find(|c| c.name == "hg-git").unwrap();
        assert_eq!(hggit.status, CheckStatus::Fail);
        assert!(!print_checks(&mut std::io::sink(), &checks).unwrap());
    }

    #[test]
    fn missing_hg_skips_extension_check() {
        let runner = Rc::new(FakeRunner::new(|inv| {
            if inv.program == "hg" {
                Err(std::io::Error::new(std::io::ErrorKind::NotFound, "hg"))
            } else {
                Ok(CommandOutput::with_code(0))
            }
        }));
        let temp = tempfile::tempdir().unwrap();

        let checks = run_checks(
            &config(temp.path()),
            &HgCli::new(runner.clone()),
            &GitCli::new(runner),
        );
        assert_eq!(checks.iter().find(|c| c.name == "hg").unwrap().status, CheckStatus::Fail);
        assert!(checks.iter().all(|c| c.name != "hg-git"));
    }
}
