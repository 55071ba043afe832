/*
 * Created on Thu Jul 02 2020
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2020, Sayan Nandan <ohsayan@outlook.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! `loadit`: the query client. `query` runs one or
//! more query files either locally against a database directory, or against a
//! running node's worker socket; `start-node` is a thin wrapper that execs the
//! node daemon so operators have one binary to reach for.

mod client;
mod queryfile;

use clap::{Parser, Subcommand};
use libsky::error::{LoaditError, LoaditResult};
use libsky::hash::HashAlgorithm;
use loadit_node::database::Database;
use loadit_node::net::frame::Frame;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "loadit", about = "loadit FEA result database query client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one or more query files
    Query {
        /// Paths to query JSON files
        query_files: Vec<PathBuf>,
        /// Worker address to run against over the network; omit to run locally
        #[arg(long)]
        server: Option<String>,
        /// Database name (network mode) or directory (local mode)
        #[arg(long)]
        database: PathBuf,
    },
    /// Start a node daemon (forwards to loadit-node with the same arguments)
    StartNode {
        /// Address of the central coordinator
        central: String,
        #[arg(long, default_value = "./databases")]
        path: PathBuf,
        #[arg(long)]
        backup: bool,
        #[arg(long)]
        debug: bool,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Query { query_files, server, database } => run_queries(&query_files, server.as_deref(), &database),
        Command::StartNode { central, path, backup, debug } => start_node(&central, &path, backup, debug),
    };
    if let Err(e) = result {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run_queries(query_files: &[PathBuf], server: Option<&str>, database: &PathBuf) -> LoaditResult<()> {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|e| LoaditError::Other(e.to_string()))?;
    for query_file in query_files {
        let resolved = queryfile::load(query_file)?;
        let csv_bytes = match server {
            Some(addr) => runtime.block_on(run_remote(addr, database, &resolved))?,
            None => run_local(database, &resolved)?,
        };
        match &resolved.output_file {
            Some(path) => std::fs::write(path, &csv_bytes)?,
            None => {
                use std::io::Write;
                std::io::stdout().write_all(&csv_bytes)?;
            }
        }
    }
    Ok(())
}

fn run_local(database_dir: &PathBuf, resolved: &queryfile::ResolvedQuery) -> LoaditResult<Vec<u8>> {
    let db = Database::open(database_dir, false, HashAlgorithm::Sha256)?;
    let result = db.query(&resolved.table, &resolved.request)?;
    let mut csv = Vec::new();
    result.write_csv(&mut csv)?;
    Ok(csv)
}

async fn run_remote(addr: &str, database_name: &PathBuf, resolved: &queryfile::ResolvedQuery) -> LoaditResult<Vec<u8>> {
    let database = database_name.to_string_lossy().into_owned();
    let request = serde_json::json!({
        "request_type": "query",
        "database": database,
        "table": resolved.table,
        "query": resolved.request,
    });
    match client::send_request(addr, request).await? {
        Frame::Buffer(bytes) => Ok(bytes),
        Frame::Json(value) => Err(LoaditError::Protocol(format!("expected a CSV result, got {value}"))),
        other => Err(LoaditError::Protocol(format!("unexpected response frame {other:?}"))),
    }
}

fn start_node(central: &str, path: &PathBuf, backup: bool, debug: bool) -> LoaditResult<()> {
    let mut cmd = process::Command::new("loadit-node");
    cmd.arg("--central").arg(central).arg("--path").arg(path);
    if backup {
        cmd.arg("--backup");
    }
    if debug {
        cmd.arg("--debug");
    }
    let status = cmd.status().map_err(|e| LoaditError::Other(format!("failed to launch loadit-node: {e}")))?;
    if !status.success() {
        process::exit(status.code().unwrap_or(1));
    }
    Ok(())
}
