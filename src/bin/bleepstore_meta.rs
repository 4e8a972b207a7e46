//! bleepstore-meta: metadata export/import CLI.

use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;

use bleepstore::serialization::{
    export_metadata, import_metadata, ExportOptions, ImportOptions, ALL_TABLES,
};

#[derive(Parser)]
#[command(name = "bleepstore-meta", about = "BleepStore metadata export/import tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Export metadata to JSON.
    Export {
        /// Server config file used to locate the database.
        #[arg(long, default_value = "bleepstore.yaml")]
        config: PathBuf,
        /// Database path override.
        #[arg(long)]
        db: Option<String>,
        /// Output path, `-` for stdout.
        #[arg(long, default_value = "-")]
        output: String,
        /// Comma-separated table subset.
        #[arg(long)]
        tables: Option<String>,
        /// Include plaintext secret keys instead of redacting them.
        #[arg(long, default_value_t = false)]
        include_credentials: bool,
    },
    /// Import metadata from JSON.
    Import {
        #[arg(long, default_value = "bleepstore.yaml")]
        config: PathBuf,
        #[arg(long)]
        db: Option<String>,
        /// Input path, `-` for stdin.
        #[arg(long, default_value = "-")]
        input: String,
        /// Clear target tables first instead of merging.
        #[arg(long, default_value_t = false)]
        replace: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let code = match cli.command {
        Command::Export {
            config,
            db,
            output,
            tables,
            include_credentials,
        } => run_export(config, db, output, tables, include_credentials),
        Command::Import {
            config,
            db,
            input,
            replace,
        } => run_import(config, db, input, replace),
    };
    std::process::exit(code);
}

fn resolve_db_path(config: &PathBuf, db: Option<String>) -> Result<String, String> {
    if let Some(db) = db {
        return Ok(db);
    }
    let cfg = bleepstore::config::load_config(config)
        .map_err(|e| format!("error reading config: {e}"))?;
    Ok(cfg.metadata.sqlite.path)
}

fn run_export(
    config: PathBuf,
    db: Option<String>,
    output: String,
    tables: Option<String>,
    include_credentials: bool,
) -> i32 {
    let db_path = match resolve_db_path(&config, db) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("{e}");
            return 1;
        }
    };

    let tables = match tables {
        Some(spec) => {
            let list: Vec<String> = spec.split(',').map(|t| t.trim().to_string()).collect();
            for name in &list {
                if !ALL_TABLES.contains(&name.as_str()) {
                    eprintln!("error: unknown table: {name}");
                    return 1;
                }
            }
            list
        }
        None => ALL_TABLES.iter().map(|t| t.to_string()).collect(),
    };

    let opts = ExportOptions {
        tables,
        include_credentials,
    };
    match export_metadata(&db_path, &opts) {
        Ok(document) => {
            if output == "-" {
                println!("{document}");
            } else if let Err(e) = std::fs::write(&output, format!("{document}\n")) {
                eprintln!("error writing {output}: {e}");
                return 1;
            } else {
                eprintln!("exported to {output}");
            }
            0
        }
        Err(e) => {
            eprintln!("export failed: {e}");
            1
        }
    }
}

fn run_import(config: PathBuf, db: Option<String>, input: String, replace: bool) -> i32 {
    let db_path = match resolve_db_path(&config, db) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("{e}");
            return 1;
        }
    };

    let json_text = if input == "-" {
        let mut buf = String::new();
        if let Err(e) = std::io::stdin().read_to_string(&mut buf) {
            eprintln!("error reading stdin: {e}");
            return 1;
        }
        buf
    } else {
        match std::fs::read_to_string(&input) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("error reading {input}: {e}");
                return 1;
            }
        }
    };

    match import_metadata(&db_path, &json_text, &ImportOptions { replace }) {
        Ok(report) => {
            for table in ALL_TABLES {
                if let Some(count) = report.inserted.get(*table) {
                    let skipped = report.skipped.get(*table).copied().unwrap_or(0);
                    let mut line = format!("  {table}: {count} imported");
                    if skipped > 0 {
                        line.push_str(&format!(", {skipped} skipped"));
                    }
                    eprintln!("{line}");
                }
            }
            for warning in &report.warnings {
                eprintln!("  WARNING: {warning}");
            }
            0
        }
        Err(e) => {
            eprintln!("import failed: {e}");
            1
        }
    }
}
