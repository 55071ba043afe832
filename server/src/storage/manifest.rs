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

//! The top-level `##header.json` and per-table `#header.json` manifests,
//! and the hash-chain that binds a batch's content hash to its tables' hashes.

use libsky::error::{LoaditError, LoaditResult};
use libsky::hash::HashAlgorithm;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::dtype::Dtype;

pub const MANIFEST_VERSION: u32 = 1;
pub const DB_MANIFEST_NAME: &str = "##header.json";
pub const TABLE_MANIFEST_NAME: &str = "#header.json";

/// One entry of a database's batch history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    pub name: String,
    pub content_hash: Option<String>,
    pub timestamp: Option<String>,
    pub source_files: Vec<String>,
    pub comment: String,
}

/// `<db>/##header.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseManifest {
    pub version: u32,
    pub hash_function: HashAlgorithm,
    /// per-table manifest hash, keyed by table name, as of the latest batch
    pub table_hashes: BTreeMap<String, String>,
    pub batches: Vec<BatchRecord>,
    /// name -> (hex hash, size in bytes)
    pub attachments: BTreeMap<String, (String, u64)>,
}

impl DatabaseManifest {
    pub fn new(hash_function: HashAlgorithm) -> Self {
        Self {
            version: MANIFEST_VERSION,
            hash_function,
            table_hashes: BTreeMap::new(),
            batches: Vec::new(),
            attachments: BTreeMap::new(),
        }
    }

    pub fn load(dir: &Path) -> LoaditResult<Self> {
        let path = dir.join(DB_MANIFEST_NAME);
        let data = std::fs::read(&path)
            .map_err(|e| LoaditError::io_extra(e, format!("reading {}", path.display())))?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn save(&self, dir: &Path) -> LoaditResult<()> {
        let path = dir.join(DB_MANIFEST_NAME);
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(&path, data).map_err(|e| LoaditError::io_extra(e, format!("writing {}", path.display())))
    }

    /// Batch `b`'s content hash: `H(concat(table_hashes[name]
    /// for name in sorted(tables)))`. Table names are iterated in sorted order
    /// because `table_hashes` is a `BTreeMap`, matching `sorted(tables)` in the
    /// original. See DESIGN.md for the hash-chain Open Question decision.
    pub fn seal_batch(&mut self, name: &str, source_files: Vec<String>, comment: String) {
        let content_hash = libsky::hash::combine_hashes(self.table_hashes.values().map(|s| s.as_str()), self.hash_function);
        self.batches.push(BatchRecord {
            name: name.to_owned(),
            content_hash: Some(content_hash),
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
            source_files,
            comment,
        });
    }

    pub fn has_batch(&self, name: &str) -> bool {
        self.batches.iter().any(|b| b.name == name)
    }

    /// Truncate the batch list so that `name` is the last surviving batch, for
    /// `restore(b)`.
    pub fn truncate_after(&mut self, name: &str) -> LoaditResult<()> {
        let idx = self
            .batches
            .iter()
            .position(|b| b.name == name)
            .ok_or_else(|| LoaditError::NotFound(format!("batch '{name}'")))?;
        self.batches.truncate(idx + 1);
        Ok(())
    }
}

/// One entry of a table's batch history: the cumulative LID count after the batch,
/// and the content hash of every field file as of that batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableBatchRecord {
    pub name: String,
    pub n_lids_cumulative: u64,
    pub hashes: BTreeMap<String, String>,
}

/// `<db>/<table>/#header.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableManifest {
    pub name: String,
    pub columns: Vec<(String, Dtype)>,
    pub batches: Vec<TableBatchRecord>,
}

impl TableManifest {
    pub fn new(name: String, columns: Vec<(String, Dtype)>) -> Self {
        Self { name, columns, batches: Vec::new() }
    }

    pub fn load(table_dir: &Path) -> LoaditResult<Self> {
        let path = table_dir.join(TABLE_MANIFEST_NAME);
        let data = std::fs::read(&path)
            .map_err(|e| LoaditError::io_extra(e, format!("reading {}", path.display())))?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn save(&self, table_dir: &Path) -> LoaditResult<()> {
        let path = table_dir.join(TABLE_MANIFEST_NAME);
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(&path, data).map_err(|e| LoaditError::io_extra(e, format!("writing {}", path.display())))
    }

    /// Field names, excluding the two index columns `LID`/`ID`.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().skip(2).map(|(n, _)| n.as_str())
    }

    pub fn field_dtype(&self, field: &str) -> Option<Dtype> {
        self.columns.iter().find(|(n, _)| n == field).map(|(_, d)| *d)
    }

    pub fn n_lids(&self) -> u64 {
        self.batches.last().map(|b| b.n_lids_cumulative).unwrap_or(0)
    }

    /// This table's manifest hash as recorded in the owning database's manifest:
    /// the combined hash of every field file's latest per-batch hash.
    pub fn manifest_hash(&self, algorithm: HashAlgorithm) -> Option<String> {
        let last = self.batches.last()?;
        Some(libsky::hash::combine_hashes(last.hashes.values().map(|s| s.as_str()), algorithm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsky::hash::HashAlgorithm;

    #[test]
    fn seal_batch_chains_table_hashes() {
        let mut m = DatabaseManifest::new(HashAlgorithm::Sha256);
        m.table_hashes.insert("a".into(), "aa".into());
        m.table_hashes.insert("b".into(), "bb".into());
        m.seal_batch("b1", vec!["f.pch".into()], "first".into());
        assert_eq!(m.batches.len(), 1);
        assert!(m.batches[0].content_hash.is_some());
        assert!(m.has_batch("b1"));
    }

    #[test]
    fn truncate_after_drops_later_batches() {
        let mut m = DatabaseManifest::new(HashAlgorithm::Sha256);
        m.seal_batch("b1", vec![], String::new());
        m.seal_batch("b2", vec![], String::new());
        m.truncate_after("b1").unwrap();
        assert_eq!(m.batches.len(), 1);
        assert_eq!(m.batches[0].name, "b1");
    }

    #[test]
    fn truncate_after_unknown_batch_errors() {
        let mut m = DatabaseManifest::new(HashAlgorithm::Sha256);
        m.seal_batch("b1", vec![], String::new());
        assert!(m.truncate_after("nope").is_err());
    }
}
