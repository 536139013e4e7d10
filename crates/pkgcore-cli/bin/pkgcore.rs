//! `pkgcore` CLI: a thin wrapper exercising `PackageArchive`,
//! `PackageDownloader` and `SaveLoadService` from the command line.
//!
//! This binary is not itself part of the content-distribution core; it is
//! ambient surface (spec §1 lists CLI orchestration as out of scope for the
//! core, but every other crate in this workspace still needs something to
//! drive it end-to-end), following `cascette-ribbit`'s bin/ wrapper pattern:
//! parse args, init tracing, build config, run.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pkgcore_archive::{EntryCheckResult, PackageArchive};
use pkgcore_downloader::{DownloaderConfig, PackageDownloader};
use pkgcore_save::{DataNode, DiskSaveApi, MigrationChain, SaveLoadService, SaveLoadServiceConfig};
use pkgcore_types::{FilePath, FileType, GameDirectory};
use url::Url;

#[derive(Debug, Parser)]
#[command(name = "pkgcore", about = "Inspect and patch pkgcore archives", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Inspect a local archive file.
    Archive {
        /// Path to the `.sar` file.
        path: PathBuf,
        #[command(subcommand)]
        action: ArchiveAction,
    },
    /// Materialise a remote archive onto disk, fetching everything.
    Download {
        /// Where to write the materialised archive.
        target: PathBuf,
        /// URL of the canonical remote archive.
        url: Url,
        /// Local archives that may donate bytes (spec §4.5.2 step f).
        #[arg(long = "populate")]
        populate: Vec<PathBuf>,
    },
    /// Exercise a save/load round trip against a local save root.
    Save {
        /// Root directory for on-disk save blobs.
        root: PathBuf,
        /// Slot name (stored under the Save game directory).
        slot: String,
        #[command(subcommand)]
        action: SaveAction,
    },
}

#[derive(Debug, Subcommand)]
enum ArchiveAction {
    /// List every `FilePath` in the archive's file table.
    List,
    /// Run `perform_crc32_check` over the whole archive.
    Check,
    /// Print the logical contents of one entry to stdout.
    Read {
        /// Archive-relative path, e.g. `data/textures/hero.dds`.
        file: String,
    },
}

#[derive(Debug, Subcommand)]
enum SaveAction {
    /// Write a throwaway JSON-shaped value (just an integer) as the slot's save data.
    Put { value: i64 },
    /// Load the slot and print its data.
    Get,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Archive { path, action } => run_archive(&path, action),
        Command::Download { target, url, populate } => run_download(target, url, populate).await,
        Command::Save { root, slot, action } => run_save(root, slot, action).await,
    }
}

fn run_archive(path: &PathBuf, action: ArchiveAction) -> Result<()> {
    let archive = PackageArchive::open(path).with_context(|| format!("opening archive {}", path.display()))?;

    match action {
        ArchiveAction::List => {
            let table = archive.file_table()?;
            for (file_path, row) in table.iter() {
                println!("{file_path}\t{}\t{}", row.entry.uncompressed_size, row.entry.crc32_post);
            }
        }
        ArchiveAction::Check => {
            let (ok, report) = archive.perform_crc32_check(None)?;
            let failing = report.values().filter(|r| !matches!(r, EntryCheckResult::Ok)).count();
            println!("ok={ok} entries={} failing={failing}", report.len());
        }
        ArchiveAction::Read { file } => {
            let file_path = FilePath::from_relative_path(GameDirectory::Content, &file);
            let bytes = archive.read_all(&file_path)?;
            println!("{} bytes", bytes.len());
        }
    }
    Ok(())
}

async fn run_download(target: PathBuf, url: Url, populate: Vec<PathBuf>) -> Result<()> {
    let mut config = DownloaderConfig::new(target, url);
    config.populate_packages = populate;
    let downloader = PackageDownloader::new(config)?;

    while !downloader.is_initialization_complete() {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    if !downloader.is_ok() {
        anyhow::bail!("downloader failed to initialise (write failure: {})", downloader.has_experienced_write_failure());
    }

    downloader.fetch(None).join().await?;

    let stats = downloader.get_stats();
    for (event, count) in stats {
        println!("{event}={count}");
    }
    Ok(())
}

async fn run_save(root: PathBuf, slot: String, action: SaveAction) -> Result<()> {
    let slot_path = FilePath::new(GameDirectory::Save, slot, FileType::SaveGame);
    let config = SaveLoadServiceConfig::new(root.clone(), derive_demo_key(&root));
    let service = SaveLoadService::new(config, Arc::new(DiskSaveApi::new(root)))?;

    match action {
        SaveAction::Put { value } => {
            let outcome = service.queue_save(slot_path, None, DataNode::Int(value), 1, false).await?;
            outcome.final_result.context("save failed")?;
            println!("saved {value}");
        }
        SaveAction::Get => {
            let outcome = service
                .queue_load(slot_path, None, 1, Arc::new(MigrationChain::new()), false)
                .await?;
            outcome.final_result.context("load failed")?;
            println!("{:?}", outcome.data);
        }
    }
    Ok(())
}

/// Demo-only key derivation: a real deployment supplies a build-embedded
/// 32-byte AES key (spec §4.1: "externally supplied, no ambient state").
/// Stable per save root so repeated CLI invocations can decrypt their own
/// prior writes.
fn derive_demo_key(root: &PathBuf) -> [u8; 32] {
    let digest = pkgcore_codec::sha512(root.to_string_lossy().as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest[..32]);
    key
}
