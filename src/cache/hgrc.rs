//! Editing of a working copy's `.hg/hgrc`.
//!
//! Only the keys the bridge needs are touched; comments, `%include` lines
//! and unrelated sections are written back as they were read.

use std::fmt;
use std::io;
use std::path::Path;

/// Suffix hg-git strips from bookmark names when creating git branches.
pub const BOOKMARK_SUFFIX: &str = "_bookmark";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Section(String),
    Entry { key: String, value: String },
    Other(String),
}

/// A parsed hgrc file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hgrc {
    lines: Vec<Line>,
}

impl Hgrc {
    pub fn parse(text: &str) -> Self {
        let lines = text
            .lines()
            .map(|raw| {
                let trimmed = raw.trim();
                if trimmed.starts_with('[') && trimmed.ends_with(']') && trimmed.len() > 2 {
                    return Line::Section(trimmed[1..trimmed.len() - 1].trim().to_string());
                }
                let is_entry = !raw.starts_with(char::is_whitespace)
                    && !trimmed.starts_with('#')
                    && !trimmed.starts_with(';')
                    && !trimmed.starts_with('%');
                match raw.split_once('=') {
                    Some((key, value)) if is_entry && !key.trim().is_empty() => Line::Entry {
                        key: key.trim().to_string(),
                        value: value.trim().to_string(),
                    },
                    _ => Line::Other(raw.to_string()),
                }
            })
            .collect();

        Self { lines }
    }

    /// Value of `key` in `section`; the last definition wins, as in Mercurial.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        let mut current: Option<&str> = None;
        let mut found = None;
        for line in &self.lines {
            match line {
                Line::Section(name) => current = Some(name.as_str()),
                Line::Entry { key: k, value } if current == Some(section) && k == key => {
                    found = Some(value.as_str());
                }
                _ => {}
            }
        }
        found
    }

    /// Set `key` in `section`, creating the section at the end if needed.
    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        let mut in_section = false;
        let mut existing = None;
        let mut insert_at = None;

        for (idx, line) in self.lines.iter().enumerate() {
            match line {
                Line::Section(name) => {
                    in_section = name == section;
                    if in_section {
                        insert_at = Some(idx + 1);
                    }
                }
                Line::Entry { key: k, .. } if in_section => {
                    insert_at = Some(idx + 1);
                    if k == key {
                        existing = Some(idx);
                    }
                }
                _ => {}
            }
        }

        let entry = Line::Entry {
            key: key.to_string(),
            value: value.to_string(),
        };

        match (existing, insert_at) {
            (Some(idx), _) => self.lines[idx] = entry,
            (None, Some(idx)) => self.lines.insert(idx, entry),
            (None, None) => {
                if !self.lines.is_empty() {
                    self.lines.push(Line::Other(String::new()));
                }
                self.lines.push(Line::Section(section.to_string()));
                self.lines.push(entry);
            }
        }
    }

    /// Enable bookmarks and hg-git, and set the branch bookmark suffix.
    pub fn enable_git_bridge(&mut self) {
        self.set("extensions", "hgext.bookmarks", "");
        self.set("extensions", "hggit", "");
        self.set("git", "branch_bookmark_suffix", BOOKMARK_SUFFIX);
    }
}

impl fmt::Display for Hgrc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            match line {
                Line::Section(name) => writeln!(f, "[{}]", name)?,
                Line::Entry { key, value } if value.is_empty() => writeln!(f, "{} =", key)?,
                Line::Entry { key, value } => writeln!(f, "{} = {}", key, value)?,
                Line::Other(raw) => writeln!(f, "{}", raw)?,
            }
        }
        Ok(())
    }
}

/// Whether the hgrc at `path` names a default pull source.
///
/// `hg clone` writes it once the clone is complete, so a working copy
/// without it cannot be pulled and is not treated as cloned.
pub fn has_default_path(path: &Path) -> bool {
    match std::fs::read_to_string(path) {
        Ok(text) => Hgrc::parse(&text)
            .get("paths", "default")
            .is_some_and(|source| !source.is_empty()),
        Err(_) => false,
    }
}

/// Rewrite the hgrc at `path` so the working copy can push through hg-git.
///
/// A missing file is treated as empty. Re-applying is a no-op.
pub fn configure_git_bridge(path: &Path) -> io::Result<()> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    let mut hgrc = Hgrc::parse(&text);
    hgrc.enable_git_bridge();
    let rendered = hgrc.to_string();

    if rendered != text {
        std::fs::write(path, rendered)?;
    }
    Ok(())
}
