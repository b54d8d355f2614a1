//! Asset archive inspection tool (asset-import)

use anyhow::Context;
use asset_import::{needed_libraries, ArchiveHandle, Layout};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "asset-import")]
#[command(about = "Inspect and extract application asset archives", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a directory inside an archive
    List {
        /// Archive file
        archive: PathBuf,
        /// Directory inside the archive (default: root)
        #[arg(default_value = "")]
        dir: String,
    },
    /// Extract entries, skipping files that are already up to date
    Extract {
        /// Archive file
        archive: PathBuf,
        /// Destination directory
        dest: PathBuf,
        /// Entries to extract (default: all)
        entries: Vec<String>,
    },
    /// Print the libraries an ELF file declares as needed
    Needed {
        /// Shared library or executable
        file: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let layout = Layout::default();

    match cli.command {
        Commands::List { archive, dir } => {
            let handle = ArchiveHandle::open(&archive, &layout)
                .with_context(|| format!("Failed to open {}", archive.display()))?;
            let children = handle
                .list_dir(&dir)
                .with_context(|| format!("'{}' is not a directory in {}", dir, archive.display()))?;

            let base = dir.trim_end_matches('/');
            for child in children {
                let path = if base.is_empty() {
                    child.clone()
                } else {
                    format!("{}/{}", base, child)
                };
                if handle.is_dir(&path) {
                    println!("{}/", child);
                } else {
                    println!("{}", child);
                }
            }
        }
        Commands::Extract {
            archive,
            dest,
            entries,
        } => {
            let handle = ArchiveHandle::open(&archive, &layout)
                .with_context(|| format!("Failed to open {}", archive.display()))?;

            let mut names: Vec<String> = if entries.is_empty() {
                handle
                    .entries()
                    .filter(|e| !e.is_dir())
                    .map(|e| e.name.clone())
                    .collect()
            } else {
                entries
            };
            names.sort();

            let before = handle.extraction_count();
            for name in &names {
                let entry = handle
                    .entry(name)
                    .with_context(|| format!("No entry named '{}' in {}", name, archive.display()))?;
                handle
                    .extract_if_changed(entry, &dest)
                    .with_context(|| format!("Failed to extract '{}'", name))?;
            }
            let extracted = handle.extraction_count() - before;
            println!(
                "{} extracted, {} up to date",
                extracted,
                names.len() as u64 - extracted
            );
        }
        Commands::Needed { file } => {
            let data = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let needed = needed_libraries(&data)
                .with_context(|| format!("Failed to parse {}", file.display()))?;
            for name in needed {
                println!("{}", name);
            }
        }
    }

    Ok(())
}
