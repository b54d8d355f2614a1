//! Autorun files
//!
//! Top-level files with the autorun suffix are read once all mounts are registered. Each
//! non-blank, non-comment line must be an import directive:
//!
//! ```text
//! # comment
//! import helper
//! import a.b, c as d
//! ```
//!
//! A line that is malformed or fails to import is logged and the rest of that file is
//! skipped. Other files are unaffected.

use std::fmt;
use std::path::PathBuf;
use tracing::{debug, error};

use crate::context::ImportContext;
use crate::mount::Mount;

/// A failed autorun line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutorunError {
    /// Archive the file came from
    pub archive: PathBuf,
    /// Entry name of the autorun file
    pub file: String,
    /// 1-based line number
    pub line_no: usize,
    pub message: String,
}

impl fmt::Display for AutorunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error processing line {} of {}/{}: {}",
            self.line_no,
            self.archive.display(),
            self.file,
            self.message
        )
    }
}

impl std::error::Error for AutorunError {}

/// Run every autorun file of `mount`, in catalogue order.
pub fn run_autorun(ctx: &ImportContext, mount: &Mount) -> Vec<AutorunError> {
    let archive = mount.archive();
    let mut errors = Vec::new();

    for file in archive.autorun_files() {
        debug!(archive = %archive.path().display(), file = %file, "running autorun file");
        let text = match archive.read_path(file) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                errors.push(report(mount, file, 0, e.to_string()));
                continue;
            }
        };

        for (i, line) in text.lines().enumerate() {
            let failure = match parse_directive(line) {
                Ok(names) => names
                    .iter()
                    .find_map(|name| ctx.import_module(name).err())
                    .map(|e| e.to_string()),
                Err(message) => Some(message),
            };
            if let Some(message) = failure {
                errors.push(report(mount, file, i + 1, message));
                break;
            }
        }
    }
    errors
}

fn report(mount: &Mount, file: &str, line_no: usize, message: String) -> AutorunError {
    let err = AutorunError {
        archive: mount.archive().path().to_path_buf(),
        file: file.to_string(),
        line_no,
        message,
    };
    error!("{}", err);
    error!("Remainder of file ignored");
    err
}

/// Module names imported by one autorun line; empty for blank and comment lines.
pub fn parse_directive(line: &str) -> Result<Vec<String>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(Vec::new());
    }

    let rest = line
        .strip_prefix("import")
        .filter(|r| r.starts_with([' ', '\t']))
        .ok_or_else(|| format!("not an import directive: {:?}", line))?;

    let mut names = Vec::new();
    for item in rest.split(',') {
        let mut words = item.split_whitespace();
        let name = words
            .next()
            .ok_or_else(|| format!("empty import item in {:?}", line))?;
        match (words.next(), words.next(), words.next()) {
            (None, _, _) => {}
            (Some("as"), Some(alias), None) if is_identifier(alias) => {}
            _ => return Err(format!("invalid import item {:?}", item.trim())),
        }
        if !name.split('.').all(is_identifier) {
            return Err(format!("invalid module name {:?}", name));
        }
        names.push(name.to_string());
    }
    Ok(names)
}

fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_alphabetic())
        && chars.all(|c| c == '_' || c.is_alphanumeric())
}
