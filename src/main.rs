//! Media Scanner CLI
//!
//! Incremental media library scanner backed by SQLite.

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use media_scanner::{scan_library, ScanConfig, ScanConfigBuilder, ScanDatabase, ScanResult};

const ABOUT: &str = r#"
Media Scanner - incremental media library scanner

Examples:
  media_scanner scan -r /path/to/media              Scan one library root
  media_scanner scan -r /music -r /videos           Scan several roots
  media_scanner scan -r /media --blacklist /media/tmp
                                                    Skip a sub-tree
  media_scanner scan -r /media --json               Print the result as JSON
  media_scanner dirs -d library.db                  List stored directories
  media_scanner clear-deleted -d library.db         Empty the deleted-file history
"#;

const DEFAULT_DB: &str = "media_scanner.db";

/// Incremental media library scanner
#[derive(Parser)]
#[command(name = "media_scanner")]
#[command(author, version, about = ABOUT, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan library roots and update the database
    Scan {
        /// Library root directory (repeatable)
        #[arg(short = 'r', long = "root", required_unless_present = "config")]
        roots: Vec<PathBuf>,

        /// Worker threads (0 = auto)
        #[arg(short = 't', long)]
        threads: Option<usize>,

        /// SQLite database file
        #[arg(short = 'd', long)]
        db: Option<PathBuf>,

        /// JSON config file; command line flags override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory prefix to skip (repeatable)
        #[arg(long)]
        blacklist: Vec<PathBuf>,

        /// Skip per-file content hashes
        #[arg(long)]
        no_hash: bool,

        /// Print the scan result as JSON
        #[arg(long)]
        json: bool,

        /// Write JSON progress lines to stderr
        #[arg(long)]
        progress: bool,
    },
    /// List stored directory fingerprints
    Dirs {
        /// SQLite database file
        #[arg(short = 'd', long, default_value = DEFAULT_DB)]
        db: PathBuf,
    },
    /// Empty the deleted-file history
    ClearDeleted {
        /// SQLite database file
        #[arg(short = 'd', long, default_value = DEFAULT_DB)]
        db: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Some(Commands::Scan {
            roots,
            threads,
            db,
            config,
            blacklist,
            no_hash,
            json,
            progress,
        }) => run_scan(roots, threads, db, config, blacklist, no_hash, json, progress),
        Some(Commands::Dirs { db }) => list_directories(&db),
        Some(Commands::ClearDeleted { db }) => clear_deleted(&db),
        None => {
            println!("{}", ABOUT);
            println!("Run 'media_scanner --help' for all options");
            Ok(true)
        }
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(message) => {
            error!("{}", message);
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_scan(
    roots: Vec<PathBuf>,
    threads: Option<usize>,
    db: Option<PathBuf>,
    config_file: Option<PathBuf>,
    blacklist: Vec<PathBuf>,
    no_hash: bool,
    json: bool,
    progress: bool,
) -> Result<bool, String> {
    let mut builder = match &config_file {
        Some(path) => {
            info!("Loading config from {:?}", path);
            ScanConfigBuilder::from_config(ScanConfig::load(path).map_err(|e| e.to_string())?)
        }
        None => ScanConfig::builder().compute_hash(true),
    };
    for root in roots {
        builder = builder.add_root(root);
    }
    for prefix in blacklist {
        builder = builder.add_blacklist(prefix);
    }
    if let Some(threads) = threads {
        builder = builder.num_threads(threads);
    }
    if let Some(db) = db {
        builder = builder.db_path(db);
    }
    if no_hash {
        builder = builder.compute_hash(false);
    }
    if progress {
        builder = builder.show_progress(true);
    }
    let config = builder.build();

    info!("Starting media scan...");
    info!("Roots: {:?}", config.roots);
    info!("Threads: {}", config.effective_threads());
    if !config.blacklist.is_empty() {
        info!("Blacklist: {:?}", config.blacklist);
    }

    let db_path = config
        .db_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB));
    let mut db = ScanDatabase::open(&db_path).map_err(|e| format!("Cannot open {:?}: {}", db_path, e))?;

    let result = scan_library(&config, &mut db).map_err(|e| e.to_string())?;

    if json {
        let text = serde_json::to_string_pretty(&result).map_err(|e| e.to_string())?;
        println!("{}", text);
    } else {
        print_summary(&result);
    }
    Ok(result.is_success())
}

fn print_summary(result: &ScanResult) {
    println!("Scan {}:", if result.cancelled { "cancelled" } else { "completed" });
    println!("  Directories: {}", result.total_dirs);
    println!("    unchanged: {}", result.unchanged_dirs);
    println!("    imported:  {}", result.imported_dirs);
    println!("    hashed:    {}", result.hashed_dirs);
    println!("    failed:    {}", result.failed_dirs);
    println!("    purged:    {}", result.purged_dirs);
    println!("  Files imported: {}", result.total_files);
    println!("    new:       {}", result.new_files);
    println!("    modified:  {}", result.modified_files);
    println!("    unchanged: {}", result.unchanged_files);
    println!("  Deleted files: {}", result.deleted_files);
    println!("  Errors: {}", result.error_count());
    for error in &result.errors {
        println!("    {}", error);
    }
    println!("  Duration: {}ms", result.duration_ms);
}

fn list_directories(db_path: &Path) -> Result<bool, String> {
    let db = ScanDatabase::open(db_path).map_err(|e| format!("Cannot open {:?}: {}", db_path, e))?;
    let directories = db.list_directories().map_err(|e| e.to_string())?;
    for dir in &directories {
        println!(
            "{}  {}{}",
            dir.fingerprint,
            dir.path,
            if dir.needs_verification { "  (unverified)" } else { "" }
        );
    }
    info!("{} directories", directories.len());
    Ok(true)
}

fn clear_deleted(db_path: &Path) -> Result<bool, String> {
    let mut db = ScanDatabase::open(db_path).map_err(|e| format!("Cannot open {:?}: {}", db_path, e))?;
    let cleared = db.clear_deleted_files().map_err(|e| e.to_string())?;
    println!("Cleared {} deleted file records", cleared);
    Ok(true)
}
