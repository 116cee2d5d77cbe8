// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of covenant.

//! Command-line interface for the covenant compiler.
//!
//! Compiles a contract source file and prints, per contract, the name, the
//! program address and the hex-encoded body.

#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use thiserror::Error;

use covenant::{compile, DirResolver};

// Max input file size
const MAX_BYTES_DEFAULT: usize = 1_048_576; // 1 MiB

#[derive(Parser, Debug)]
#[command(
    name = "covenant",
    about = "Compiler for a value-locking contract language",
    version
)]
struct Cli {
    /// JSON output
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
    /// Log level (trace|debug|info|warn|error)
    #[arg(
        long,
        global = true,
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"],
    )]
    log_level: String,
    /// Max input file size in bytes
    #[arg(long, global = true, default_value_t = MAX_BYTES_DEFAULT)]
    max_bytes: usize,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a source file and print the contract programs
    Compile {
        /// Contract source file
        path: PathBuf,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{path}: file too large ({size} > {max} bytes)")]
    TooLarge {
        path: String,
        size: usize,
        max: usize,
    },
    #[error("{0}")]
    Compile(#[from] covenant::Error),
}

fn main() {
    let cli = Cli::parse();
    covenant::logging::init_with_level(Some(&cli.log_level));

    let result = match &cli.command {
        Command::Compile { path } => cmd_compile(path, cli.json, cli.max_bytes),
    };
    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn read_source(path: &Path, max_bytes: usize) -> Result<Vec<u8>, CliError> {
    let src = fs::read(path)?;
    if src.len() > max_bytes {
        return Err(CliError::TooLarge {
            path: path.display().to_string(),
            size: src.len(),
            max: max_bytes,
        });
    }
    Ok(src)
}

fn cmd_compile(path: &Path, json: bool, max_bytes: usize) -> Result<(), CliError> {
    let src = read_source(path, max_bytes)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let mut resolver = DirResolver::new(base);
    let contracts = compile(&src, &mut resolver)?;

    if json {
        let items: Vec<_> = contracts
            .iter()
            .map(|c| {
                serde_json::json!({
                    "name": c.name,
                    "address": format!("0x{}", hex::encode(c.address())),
                    "program": hex::encode(&c.body),
                    "clauses": c.clauses.iter().map(|cl| cl.name.clone()).collect::<Vec<_>>(),
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::json!({ "ok": true, "contracts": items })
        );
    } else {
        for c in &contracts {
            println!("{}", c.name);
            println!("  address: 0x{}", hex::encode(c.address()));
            println!("  program: {}", hex::encode(&c.body));
        }
    }
    Ok(())
}
