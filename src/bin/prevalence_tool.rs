use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use rustprevalent::storage::numbered_file::{self, FileKind, NumberedFile};
use rustprevalent::storage::{CommandLog, FileService, LogReader, Marshaller};
use rustprevalent::{Json, MessagePack, OsFileService};
use serde::de::IgnoredAny;
use std::collections::BTreeMap;
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "prevalence-tool")]
#[command(about = "Operator tooling for rustprevalent store directories")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List snapshots and command logs with their sizes
    Ls { directory: PathBuf },
    /// Check that the newest snapshot and every command log record decode
    Verify {
        directory: PathBuf,
        #[arg(long, value_enum, default_value_t = Format::Msgpack)]
        format: Format,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Msgpack,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Ls { directory } => list(&directory),
        Command::Verify { directory, format } => match format {
            Format::Msgpack => verify(&directory, &MessagePack),
            Format::Json => verify(&directory, &Json),
        },
    }
}

fn ensure_directory(directory: &Path) -> Result<()> {
    if !directory.is_dir() {
        return Err(anyhow!("'{}' is not a directory", directory.display()));
    }
    Ok(())
}

fn list(directory: &Path) -> Result<()> {
    ensure_directory(directory)?;

    for kind in [FileKind::Snapshot, FileKind::CommandLog] {
        let names = numbered_file::matching_names(&OsFileService, directory, kind)?;
        println!("{} ({}):", kind.extension(), names.len());
        for name in names {
            let path = directory.join(&name);
            let size = fs::metadata(&path)
                .with_context(|| format!("Failed to stat '{}'", path.display()))?
                .len();
            println!("  {:>12} bytes  {}", size, name);
        }
    }
    Ok(())
}

fn verify<M: Marshaller>(directory: &Path, marshaller: &M) -> Result<()> {
    ensure_directory(directory)?;
    let file_service = OsFileService;

    let snapshot_id = numbered_file::highest_id(&file_service, directory, FileKind::Snapshot)?;
    if snapshot_id > 0 {
        let path = NumberedFile::new(directory, FileKind::Snapshot, snapshot_id).path();
        let mut reader = BufReader::new(file_service.open_for_read(&path)?);
        let _: IgnoredAny = marshaller
            .load(&mut reader)
            .with_context(|| format!("Snapshot '{}' does not decode", path.display()))?;
        println!("snapshot {}: ok", snapshot_id);
    } else {
        println!("no snapshot");
    }

    let mut total = 0usize;
    for name in CommandLog::<M>::log_file_names(&file_service, directory)? {
        let path = directory.join(&name);
        let mut kinds: BTreeMap<String, usize> = BTreeMap::new();
        for record in LogReader::open(&file_service, &path, marshaller)? {
            let record = record.with_context(|| format!("Log '{}' is corrupt", path.display()))?;
            *kinds.entry(record.kind).or_default() += 1;
        }
        let count: usize = kinds.values().sum();
        total += count;
        println!("{}: {} records", name, count);
        for (kind, n) in kinds {
            println!("  {:>8}  {}", n, kind);
        }
    }
    println!("{} records in total, {} marshaller", total, marshaller.name());
    Ok(())
}
