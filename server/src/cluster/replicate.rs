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

//! `sync_databases`: an authoritative worker exchanges database-hash maps
//! with each peer node, then for every database whose hash differs (or is absent
//! on a peer running as a `backup` replica) streams the manifest and every
//! `*.bin` file across, one file at a time as a path frame followed by a bulk
//! payload, terminated by an `END` sentinel. The receiver writes into a sibling
//! `<name>_TEMP` directory and only renames it over the original once every file
//! has landed, so a reader never observes a half-written database.

use crate::net::frame::{read_bulk, read_frame, write_bulk, write_frame, Frame};
use libsky::error::{LoaditError, LoaditResult};
use std::collections::HashMap;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite};

const END_SENTINEL: &[u8] = b"END";

/// Decide which databases need to move from `local` (the authoritative side) to
/// a peer advertising `peer`. A database transfers if the peer's hash differs
/// from ours, or the peer doesn't have it yet and is a `backup` replica (which
/// pulls everything, not just what it already partially has).
pub fn plan_sync(local: &HashMap<String, String>, peer: &HashMap<String, String>, peer_is_backup: bool) -> Vec<String> {
    let mut out: Vec<String> = local
        .iter()
        .filter(|(name, hash)| match peer.get(*name) {
            Some(peer_hash) => peer_hash != *hash,
            None => peer_is_backup,
        })
        .map(|(name, _)| name.clone())
        .collect();
    out.sort();
    out
}

fn collect_files(db_dir: &Path) -> LoaditResult<Vec<(String, std::path::PathBuf)>> {
    let mut out = Vec::new();
    let mut stack = vec![db_dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                stack.push(path);
            } else {
                let rel = path.strip_prefix(db_dir).expect("walked from db_dir").to_string_lossy().replace('\\', "/");
                out.push((rel, path));
            }
        }
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

/// Send every file under `db_dir` (relative path, then its bytes) followed by
/// `END`. The receiver decides where to land them.
pub async fn send_database<W: AsyncWrite + Unpin>(w: &mut W, db_dir: &Path) -> LoaditResult<()> {
    for (rel_path, abs_path) in collect_files(db_dir)? {
        let bytes = std::fs::read(&abs_path)?;
        write_frame(w, &Frame::Bytes(rel_path.into_bytes())).await?;
        write_bulk(w, &bytes).await?;
    }
    write_frame(w, &Frame::Bytes(END_SENTINEL.to_vec())).await?;
    Ok(())
}

/// Receive a file stream into `<dest_dir's parent>/<dest_dir's name>_TEMP`, then
/// atomically replace `dest_dir` with it. `dest_dir` is removed first (renames
/// can't overwrite a non-empty directory); on any failure the temp directory is
/// deleted and `dest_dir` is left untouched.
pub async fn recv_database<R: AsyncRead + Unpin>(r: &mut R, dest_dir: &Path) -> LoaditResult<()> {
    let temp_dir = sibling_temp_dir(dest_dir);
    if temp_dir.exists() {
        std::fs::remove_dir_all(&temp_dir)?;
    }
    std::fs::create_dir_all(&temp_dir)?;

    match recv_into(r, &temp_dir).await {
        Ok(()) => {
            if dest_dir.exists() {
                std::fs::remove_dir_all(dest_dir)?;
            }
            std::fs::rename(&temp_dir, dest_dir)?;
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::remove_dir_all(&temp_dir);
            Err(e)
        }
    }
}

async fn recv_into<R: AsyncRead + Unpin>(r: &mut R, temp_dir: &Path) -> LoaditResult<()> {
    loop {
        match read_frame(r).await? {
            Frame::Bytes(b) if b == END_SENTINEL => return Ok(()),
            Frame::Bytes(rel_path_bytes) => {
                let rel_path = String::from_utf8(rel_path_bytes)
                    .map_err(|e| LoaditError::Protocol(format!("non-utf8 path in replication stream: {e}")))?;
                let bytes = read_bulk(r).await?;
                let target = temp_dir.join(&rel_path);
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&target, bytes)?;
            }
            other => return Err(LoaditError::Protocol(format!("unexpected frame in replication stream: {other:?}"))),
        }
    }
}

fn sibling_temp_dir(dest_dir: &Path) -> std::path::PathBuf {
    let name = dest_dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    dest_dir.with_file_name(format!("{name}_TEMP"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_sync_transfers_differing_and_missing_backup_databases() {
        let local: HashMap<String, String> =
            [("QUAD4".to_string(), "h1".to_string()), ("TRIA3".to_string(), "h2".to_string())].into_iter().collect();
        let peer_stale: HashMap<String, String> = [("QUAD4".to_string(), "old".to_string())].into_iter().collect();

        assert_eq!(plan_sync(&local, &peer_stale, false), vec!["QUAD4".to_string(), "TRIA3".to_string()]);
        assert_eq!(plan_sync(&local, &peer_stale, true), vec!["QUAD4".to_string(), "TRIA3".to_string()]);
    }

    #[test]
    fn plan_sync_skips_up_to_date_non_backup_peer() {
        let local: HashMap<String, String> = [("QUAD4".to_string(), "h1".to_string())].into_iter().collect();
        let peer_fresh: HashMap<String, String> = [("QUAD4".to_string(), "h1".to_string())].into_iter().collect();
        assert!(plan_sync(&local, &peer_fresh, false).is_empty());
    }

    #[tokio::test]
    async fn send_then_recv_round_trips_a_directory_tree() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("##header.json"), b"{}").unwrap();
        std::fs::create_dir_all(src.path().join("QUAD4")).unwrap();
        std::fs::write(src.path().join("QUAD4").join("NX.bin"), b"\x00\x01\x02\x03").unwrap();

        let mut buf: Vec<u8> = Vec::new();
        send_database(&mut buf, src.path()).await.unwrap();

        let dest_parent = tempfile::tempdir().unwrap();
        let dest = dest_parent.path().join("mydb");
        let mut cursor = std::io::Cursor::new(buf);
        recv_database(&mut cursor, &dest).await.unwrap();

        assert_eq!(std::fs::read(dest.join("##header.json")).unwrap(), b"{}".to_vec());
        assert_eq!(std::fs::read(dest.join("QUAD4").join("NX.bin")).unwrap(), vec![0, 1, 2, 3]);
        assert!(!sibling_temp_dir(&dest).exists());
    }
}
