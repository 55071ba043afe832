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

//! One worker's request loop: `Idle -> Serving(req) -> Reporting
//! -> Idle`. A worker serves exactly one request per connection at a time; a node
//! runs a pool of these (one per core) so it serves many requests concurrently.
//! Each request acquires the target database's lock (shared for queries,
//! exclusive for ingestion/restore) for the duration of the call.

use crate::cluster::lock::LockRegistry;
use crate::database::Database;
use crate::net::frame::{read_frame, write_frame, Frame};
use crate::query::QueryRequest;
use libsky::error::{LoaditError, LoaditResult};
use libsky::hash::HashAlgorithm;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite};

/// One JSON request frame, tagged by `request_type`.
#[derive(Debug, Deserialize)]
#[serde(tag = "request_type", rename_all = "snake_case")]
pub enum Request {
    Query { database: String, table: String, query: QueryRequest },
    NewBatch { database: String, name: String, source_files: Vec<PathBuf>, comment: String },
    Restore { database: String, name: String },
    Check { database: String },
    Info { database: String, detailed: bool },
}

impl Request {
    fn database(&self) -> &str {
        match self {
            Request::Query { database, .. }
            | Request::NewBatch { database, .. }
            | Request::Restore { database, .. }
            | Request::Check { database, .. }
            | Request::Info { database, .. } => database,
        }
    }

    fn is_mutating(&self) -> bool {
        matches!(self, Request::NewBatch { .. } | Request::Restore { .. })
    }
}

/// Sent back to central when a request finishes (`release_worker`).
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseReport {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub database: String,
    pub is_error: bool,
    /// Present only when this request modified a database, so central can
    /// refresh that node's advertised hash for it.
    pub databases: Option<HashMap<String, String>>,
}

/// Process-shared worker state: where databases live on disk, and the lock
/// registry every request against this process contends on.
pub struct WorkerState {
    pub databases_root: PathBuf,
    pub locks: LockRegistry,
}

impl WorkerState {
    pub fn new(databases_root: PathBuf) -> Self {
        Self { databases_root, locks: LockRegistry::new() }
    }
}

/// Serve exactly one request read from `stream`: read the request frame,
/// acquire the database lock, execute, write the response frame (`Buffer` for a
/// CSV query result, `Json` otherwise, `Exception` on error), and report what
/// happened for `release_worker`.
pub async fn serve_one<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S, state: &WorkerState) -> LoaditResult<ReleaseReport> {
    if !crate::registry::state_okay() {
        let msg = "worker registry is poisoned; refusing new requests".to_string();
        write_frame(stream, &Frame::Exception(msg.clone())).await?;
        return Err(LoaditError::Other(msg));
    }

    let request_frame = read_frame(stream).await?;
    let Frame::Json(value) = request_frame else {
        let msg = "expected a JSON request frame".to_string();
        write_frame(stream, &Frame::Exception(msg.clone())).await?;
        return Err(LoaditError::Protocol(msg));
    };
    let bytes_in = serde_json::to_vec(&value).map(|v| v.len() as u64).unwrap_or(0);
    let request: Request = serde_json::from_value(value)?;
    let database = request.database().to_owned();

    let _guard = state.locks.acquire(&database, request.is_mutating()).await;

    match execute(&request, state).await {
        Ok((response, databases)) => {
            let bytes_out = match &response {
                Frame::Buffer(b) => b.len() as u64,
                Frame::Json(v) => serde_json::to_vec(v).map(|x| x.len() as u64).unwrap_or(0),
                _ => 0,
            };
            write_frame(stream, &response).await?;
            Ok(ReleaseReport { bytes_in, bytes_out, database, is_error: false, databases })
        }
        Err(e) => {
            write_frame(stream, &Frame::Exception(e.to_string())).await?;
            Ok(ReleaseReport { bytes_in, bytes_out: 0, database, is_error: true, databases: None })
        }
    }
}

async fn execute(request: &Request, state: &WorkerState) -> LoaditResult<(Frame, Option<HashMap<String, String>>)> {
    let db_dir = state.databases_root.join(sanitize(request.database()));

    match request {
        Request::Query { table, query, .. } => {
            let db = Database::open(&db_dir, false, HashAlgorithm::Sha256)?;
            let result = db.query(table, query)?;
            let mut csv = Vec::new();
            result.write_csv(&mut csv)?;
            Ok((Frame::Buffer(csv), None))
        }
        Request::NewBatch { name, source_files, comment, .. } => {
            let mut db = Database::open(&db_dir, true, HashAlgorithm::Sha256)?;
            let report = db.new_batch(name, source_files, comment)?;
            let databases = Some([(db.name().to_owned(), report.content_hash.clone())].into_iter().collect());
            Ok((Frame::Json(serde_json::to_value(serde_json::json!({
                "batch_name": report.batch_name,
                "tables_touched": report.tables_touched,
                "content_hash": report.content_hash,
            }))?), databases))
        }
        Request::Restore { name, .. } => {
            let mut db = Database::open(&db_dir, false, HashAlgorithm::Sha256)?;
            db.restore(name)?;
            let hash = db.manifest.batches.last().and_then(|b| b.content_hash.clone()).unwrap_or_default();
            let databases = Some([(db.name().to_owned(), hash)].into_iter().collect());
            Ok((Frame::Json(serde_json::json!({"restored_to": name})), databases))
        }
        Request::Check { .. } => {
            let db = Database::open(&db_dir, false, HashAlgorithm::Sha256)?;
            let corrupted = db.check()?;
            Ok((Frame::Json(serde_json::json!({"corrupted": corrupted})), None))
        }
        Request::Info { detailed, .. } => {
            let db = Database::open(&db_dir, false, HashAlgorithm::Sha256)?;
            Ok((Frame::Json(serde_json::json!({"info": db.info(*detailed)?})), None))
        }
    }
}

fn sanitize(name: &str) -> String {
    name.chars().map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::frame::write_frame;
    use std::io::Write as _;

    fn write_deck(dir: &std::path::Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn serves_a_check_request_against_a_fresh_database() {
        let tmp = tempfile::tempdir().unwrap();
        let db_dir = tmp.path().join("demo");
        {
            let mut db = Database::open(&db_dir, true, HashAlgorithm::Sha256).unwrap();
            let deck = write_deck(tmp.path(), "b1.pch", "ELEMENT FORCES - QUAD4 (33), 100\n1 10.0 0 0 0 0 0 0\n");
            db.new_batch("b1", &[deck], "first").unwrap();
        }

        let state = WorkerState::new(tmp.path().to_path_buf());
        let (mut server_side, mut client_side) = tokio::io::duplex(8192);

        let client = async move {
            let req = serde_json::json!({"request_type": "check", "database": "demo"});
            write_frame(&mut client_side, &Frame::Json(req)).await.unwrap();
            read_frame(&mut client_side).await.unwrap()
        };

        let (report, response) = tokio::join!(serve_one(&mut server_side, &state), client);
        let report = report.unwrap();
        assert!(!report.is_error);
        assert_eq!(report.database, "demo");
        match response {
            Frame::Json(v) => assert!(v.get("corrupted").is_some()),
            other => panic!("unexpected response {other:?}"),
        }
    }
}
