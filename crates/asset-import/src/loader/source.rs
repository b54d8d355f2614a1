//! Source module loader

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use super::{LoaderCore, LoaderKind, ModuleLoader};
use crate::context::ImportContext;
use crate::error::{ImportError, Result};
use crate::module::Module;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Executes source entries straight from their archive bytes
#[derive(Debug, Clone)]
pub struct SourceLoader {
    core: LoaderCore,
}

impl SourceLoader {
    pub fn new(core: LoaderCore) -> Self {
        Self { core }
    }

    /// Decoded text of the module, with newlines normalized.
    pub fn get_source(&self, name: &str) -> Result<String> {
        let filename = self.canonical_filename(name)?;
        let bytes = self.core.mount.archive().read(&self.core.entry)?;
        decode_source(&bytes, &filename)
    }
}

impl ModuleLoader for SourceLoader {
    fn core(&self) -> &LoaderCore {
        &self.core
    }

    fn kind(&self) -> LoaderKind {
        LoaderKind::Source
    }

    fn exec_load(&self, ctx: &ImportContext, mod_name: &str) -> Result<()> {
        let registry = ctx.registry();
        // Reserve the name before running the body so re-entrant imports see it.
        let module = match registry.get(mod_name) {
            Some(existing) => existing,
            None => {
                let module = Module::new(mod_name);
                self.set_attrs(&module, mod_name);
                registry.insert(mod_name, module.clone());
                module
            }
        };

        let filename = self.artifact_path();
        let bytes = self.core.mount.archive().read(&self.core.entry)?;
        let source = decode_source(&bytes, &filename)?;
        ctx.interpreter().exec_source(ctx, &module, &source, &filename)
    }
}

fn coding_cookie() -> &'static Regex {
    static COOKIE: OnceLock<Regex> = OnceLock::new();
    COOKIE.get_or_init(|| {
        Regex::new(r"^[ \t\f]*#.*?coding[:=][ \t]*([-\w.]+)").expect("valid coding cookie regex")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Utf8,
    Latin1,
    Ascii,
}

fn lookup_encoding(name: &str) -> Option<Encoding> {
    let normalized = name.to_ascii_lowercase().replace('_', "-");
    match normalized.as_str() {
        "utf-8" | "utf8" => Some(Encoding::Utf8),
        n if n.starts_with("utf-8-") => Some(Encoding::Utf8),
        "latin-1" | "latin1" | "iso-8859-1" | "iso8859-1" | "l1" => Some(Encoding::Latin1),
        n if n.starts_with("latin-1-") || n.starts_with("iso-8859-1-") => Some(Encoding::Latin1),
        "ascii" | "us-ascii" => Some(Encoding::Ascii),
        _ => None,
    }
}

/// Encoding declared on line 1, or on line 2 if line 1 is blank or a comment.
fn declared_encoding(bytes: &[u8]) -> Option<String> {
    let mut lines = bytes.split(|&b| b == b'\n');
    let cookie = |line: &[u8]| {
        let line = String::from_utf8_lossy(line);
        coding_cookie()
            .captures(&line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    };

    let first = lines.next()?;
    if let Some(name) = cookie(first) {
        return Some(name);
    }
    let trimmed = String::from_utf8_lossy(first);
    let trimmed = trimmed.trim();
    if !trimmed.is_empty() && !trimmed.starts_with('#') {
        return None;
    }
    lines.next().and_then(cookie)
}

/// Decode source bytes to text and normalize `\r\n` and `\r` to `\n`.
pub fn decode_source(bytes: &[u8], path: &Path) -> Result<String> {
    let decode_error = |reason: String| ImportError::SourceDecode {
        path: path.to_path_buf(),
        reason,
    };

    let (body, has_bom) = match bytes.strip_prefix(UTF8_BOM) {
        Some(rest) => (rest, true),
        None => (bytes, false),
    };

    let encoding = match declared_encoding(body) {
        Some(name) => {
            let encoding = lookup_encoding(&name)
                .ok_or_else(|| decode_error(format!("unknown encoding: {}", name)))?;
            if has_bom && encoding != Encoding::Utf8 {
                return Err(decode_error(format!("encoding problem: {} with BOM", name)));
            }
            encoding
        }
        None => Encoding::Utf8,
    };

    let text = match encoding {
        Encoding::Utf8 => std::str::from_utf8(body)
            .map_err(|e| decode_error(e.to_string()))?
            .to_string(),
        Encoding::Latin1 => body.iter().map(|&b| char::from(b)).collect(),
        Encoding::Ascii => {
            if let Some(pos) = body.iter().position(|b| !b.is_ascii()) {
                return Err(decode_error(format!(
                    "byte 0x{:02x} at offset {} is not ASCII",
                    body[pos], pos
                )));
            }
            String::from_utf8_lossy(body).into_owned()
        }
    };

    Ok(text.replace("\r\n", "\n").replace('\r', "\n"))
}
