//! Command-line interface for mounting and inspecting Tonk bundles on disk.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tonk_core::crdt::MemoryStorage;
use tonk_core::repository::SharePolicy;
use tonk_core::{Bundle, Tonk};

#[derive(Parser)]
#[command(name = "tonk", about = "Inspect and mutate Tonk bundles from the command line")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new, empty bundle at the given path.
    Init { bundle: PathBuf },
    /// List the direct children of a directory.
    Ls {
        bundle: PathBuf,
        #[arg(default_value = "/")]
        path: String,
    },
    /// Print a file's JSON content.
    Cat { bundle: PathBuf, path: String },
    /// Write JSON content to a file, creating it if absent.
    Write {
        bundle: PathBuf,
        path: String,
        content: String,
    },
    /// Create a directory.
    Mkdir { bundle: PathBuf, path: String },
    /// Remove a file.
    Rm { bundle: PathBuf, path: String },
    /// Rename a file or directory.
    Mv {
        bundle: PathBuf,
        old: String,
        new: String,
    },
    /// Fork a bundle to a new file with a fresh root identity.
    Fork { bundle: PathBuf, out: PathBuf },
}

fn load(path: &PathBuf) -> tonk_core::Result<Tonk> {
    let bytes = std::fs::read(path)?;
    Tonk::from_bytes(&bytes, Arc::new(MemoryStorage::new()), SharePolicy::Generous)
}

fn save(tonk: &Tonk, path: &PathBuf) -> tonk_core::Result<()> {
    let bytes = tonk.to_bytes()?;
    std::fs::write(path, bytes)?;
    Ok(())
}

fn run(command: Command) -> tonk_core::Result<()> {
    match command {
        Command::Init { bundle } => {
            let tonk = Tonk::new(Arc::new(MemoryStorage::new()), SharePolicy::Generous)?;
            save(&tonk, &bundle)?;
            println!("created {}", bundle.display());
        }
        Command::Ls { bundle, path } => {
            let tonk = load(&bundle)?;
            for entry in tonk.vfs().list_directory(&path)? {
                println!("{}\t{}", entry.node_type, entry.name);
            }
        }
        Command::Cat { bundle, path } => {
            let tonk = load(&bundle)?;
            let snapshot = tonk.vfs().read_file(&path)?;
            println!("{}", serde_json::to_string_pretty(&snapshot.content).unwrap());
        }
        Command::Write { bundle, path, content } => {
            let tonk = load(&bundle)?;
            let value: serde_json::Value = serde_json::from_str(&content)
                .map_err(|e| tonk_core::TonkError::Internal(format!("invalid JSON: {e}")))?;
            if !tonk.vfs().update_file(&path, value.clone())? {
                tonk.vfs().create_file(&path, value)?;
            }
            save(&tonk, &bundle)?;
        }
        Command::Mkdir { bundle, path } => {
            let tonk = load(&bundle)?;
            tonk.vfs().create_directory(&path)?;
            save(&tonk, &bundle)?;
        }
        Command::Rm { bundle, path } => {
            let tonk = load(&bundle)?;
            tonk.vfs().delete_file(&path)?;
            save(&tonk, &bundle)?;
        }
        Command::Mv { bundle, old, new } => {
            let tonk = load(&bundle)?;
            tonk.vfs().rename(&old, &new)?;
            save(&tonk, &bundle)?;
        }
        Command::Fork { bundle, out } => {
            let tonk = load(&bundle)?;
            let forked = tonk.fork_to_bytes()?;
            std::fs::write(&out, forked)?;
            let root = Bundle::from_bytes(&std::fs::read(&out)?)?.root_id();
            println!("forked {} -> {} (root {})", bundle.display(), out.display(), root);
        }
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(err) = run(cli.command) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
