//! Shared fixtures for integration tests

#![allow(dead_code)]

use asset_import::{
    DynamicLinker, ImportConfig, ImportContext, ImportError, Interpreter, Library, LoadError,
    Module, Visibility,
};
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// 2020-01-02 03:04:06 UTC, the timestamp of every fixture entry
pub const ENTRY_MTIME: i64 = 1_577_934_246;

/// Write a ZIP archive. Names ending with `/` become directory entries.
pub fn write_zip(path: &Path, files: &[(&str, &[u8])]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut zip = ZipWriter::new(File::create(path).unwrap());
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(DateTime::from_date_and_time(2020, 1, 2, 3, 4, 6).unwrap());

    for (name, data) in files {
        if name.ends_with('/') {
            zip.add_directory(name.trim_end_matches('/'), options).unwrap();
        } else {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
    }
    zip.finish().unwrap();
}

/// Minimal 64-bit little-endian ELF image declaring `needed` as DT_NEEDED.
pub fn elf_with_needed(needed: &[&str]) -> Vec<u8> {
    build_elf(needed, true)
}

/// ELF image without a `.dynamic` section
pub fn elf_without_dynamic() -> Vec<u8> {
    build_elf(&[], false)
}

fn build_elf(needed: &[&str], with_dynamic: bool) -> Vec<u8> {
    const EHSIZE: usize = 64;
    const SHENTSIZE: usize = 64;

    let mut dynstr = vec![0u8];
    let mut dynamic = Vec::new();
    for name in needed {
        dynamic.extend_from_slice(&1u64.to_le_bytes()); // DT_NEEDED
        dynamic.extend_from_slice(&(dynstr.len() as u64).to_le_bytes());
        dynstr.extend_from_slice(name.as_bytes());
        dynstr.push(0);
    }
    dynamic.extend_from_slice(&[0u8; 16]); // DT_NULL

    let shstrtab = b"\0.dynstr\0.dynamic\0.shstrtab\0";
    let dynstr_off = EHSIZE as u64;
    let dynamic_off = dynstr_off + dynstr.len() as u64;
    let shstrtab_off = dynamic_off + dynamic.len() as u64;
    let shoff = shstrtab_off + shstrtab.len() as u64;

    // (name, type, offset, size, link)
    let mut sections = vec![(0u32, 0u32, 0u64, 0u64, 0u32), (1, 3, dynstr_off, dynstr.len() as u64, 0)];
    if with_dynamic {
        sections.push((9, 6, dynamic_off, dynamic.len() as u64, 1));
    }
    sections.push((18, 3, shstrtab_off, shstrtab.len() as u64, 0));

    let mut out = Vec::new();
    out.extend_from_slice(b"\x7fELF");
    out.extend_from_slice(&[2, 1, 1]);
    out.resize(16, 0);
    out.extend_from_slice(&3u16.to_le_bytes()); // ET_DYN
    out.extend_from_slice(&62u16.to_le_bytes()); // EM_X86_64
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes()); // e_entry
    out.extend_from_slice(&0u64.to_le_bytes()); // e_phoff
    out.extend_from_slice(&shoff.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    out.extend_from_slice(&(EHSIZE as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // e_phentsize
    out.extend_from_slice(&0u16.to_le_bytes()); // e_phnum
    out.extend_from_slice(&(SHENTSIZE as u16).to_le_bytes());
    out.extend_from_slice(&(sections.len() as u16).to_le_bytes());
    out.extend_from_slice(&((sections.len() - 1) as u16).to_le_bytes());
    assert_eq!(out.len(), EHSIZE);

    out.extend_from_slice(&dynstr);
    out.extend_from_slice(&dynamic);
    out.extend_from_slice(shstrtab);

    for (name, kind, offset, size, link) in sections {
        out.extend_from_slice(&name.to_le_bytes());
        out.extend_from_slice(&kind.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes()); // sh_flags
        out.extend_from_slice(&0u64.to_le_bytes()); // sh_addr
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&link.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // sh_info
        out.extend_from_slice(&0u64.to_le_bytes()); // sh_addralign
        out.extend_from_slice(&0u64.to_le_bytes()); // sh_entsize
    }
    out
}

/// Interpreter for a tiny line language:
///
/// ```text
/// import NAME     import a module
/// set KEY VALUE   bind a name in the module
/// replace         install a fresh module under the same name
/// raise MESSAGE   fail
/// ```
#[derive(Debug, Default)]
pub struct RecordingInterpreter {
    pub executed: Mutex<Vec<String>>,
    pub natives: Mutex<Vec<String>>,
}

impl Interpreter for RecordingInterpreter {
    fn exec_source(
        &self,
        ctx: &ImportContext,
        module: &Arc<Module>,
        source: &str,
        _filename: &Path,
    ) -> asset_import::Result<()> {
        let name = module.name();
        self.executed.lock().push(name.clone());

        for line in source.lines() {
            let mut words = line.split_whitespace();
            match words.next() {
                Some("import") => {
                    let target = words.next().unwrap_or_default();
                    ctx.import_module(target)?;
                }
                Some("set") => {
                    let key = words.next().unwrap_or_default();
                    let value: Vec<&str> = words.collect();
                    module.set(key, value.join(" "));
                }
                Some("replace") => {
                    let replacement = Module::new(&name);
                    replacement.set("replaced", "yes");
                    ctx.registry().insert(&name, replacement);
                }
                Some("raise") => {
                    let message: Vec<&str> = words.collect();
                    return Err(ImportError::Execution {
                        module: name,
                        message: message.join(" "),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn init_native(
        &self,
        _ctx: &ImportContext,
        module: &Arc<Module>,
        _library: &Arc<Library>,
    ) -> asset_import::Result<()> {
        self.natives.lock().push(module.name());
        Ok(())
    }
}

impl RecordingInterpreter {
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

/// Linker that records load order instead of loading anything
#[derive(Debug, Default)]
pub struct RecordingLinker {
    pub opened: Mutex<Vec<(String, Visibility)>>,
}

impl DynamicLinker for RecordingLinker {
    fn open(&self, path: &Path, visibility: Visibility) -> Result<Library, LoadError> {
        if !path.exists() {
            return Err(LoadError::Open {
                path: path.to_path_buf(),
                reason: "no such file".to_string(),
            });
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.opened.lock().push((name, visibility));
        Ok(Library::detached(path))
    }
}

impl RecordingLinker {
    /// File names opened, in order
    pub fn opened_names(&self) -> Vec<String> {
        self.opened.lock().iter().map(|(n, _)| n.clone()).collect()
    }
}

/// Asset and cache roots in a temporary directory
pub struct Fixture {
    pub temp: TempDir,
    pub asset_root: PathBuf,
    pub cache_root: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let asset_root = temp.path().join("assets");
        let cache_root = temp.path().join("cache");
        fs::create_dir_all(&asset_root).unwrap();
        Self {
            temp,
            asset_root,
            cache_root,
        }
    }

    /// Write an archive under the asset root and return its physical path.
    pub fn archive(&self, name: &str, files: &[(&str, &[u8])]) -> PathBuf {
        let path = self.asset_root.join(name);
        write_zip(&path, files);
        path
    }

    /// Search-path entry for an archive (or a path inside it).
    pub fn entry(&self, rel: &str) -> PathBuf {
        self.cache_root.join(rel)
    }

    pub fn config(&self) -> ImportConfig {
        let mut config = ImportConfig::new(&self.asset_root, &self.cache_root);
        config.abis = vec!["common".to_string(), "x86_64".to_string()];
        config
    }

    pub fn context(&self, config: ImportConfig) -> TestContext {
        let interpreter = Arc::new(RecordingInterpreter::default());
        let linker = Arc::new(RecordingLinker::default());
        let ctx = ImportContext::builder(config, interpreter.clone())
            .linker(linker.clone())
            .build();
        TestContext {
            ctx,
            interpreter,
            linker,
        }
    }
}

pub struct TestContext {
    pub ctx: ImportContext,
    pub interpreter: Arc<RecordingInterpreter>,
    pub linker: Arc<RecordingLinker>,
}
