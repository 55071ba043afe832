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

//! Ties the on-disk manifest, the per-table stores and the query engine together
//! behind one handle per database directory. A `Database` is what a
//! worker holds open for the lifetime of a request; `cluster::worker` is the only
//! caller that constructs one outside of tests.

use crate::ingest::batch;
use crate::query::{QueryEngine, QueryRequest, QueryResult};
use crate::storage::manifest::{DatabaseManifest, TableManifest, DB_MANIFEST_NAME, TABLE_MANIFEST_NAME};
use crate::storage::table::TableStore;
use libsky::error::{LoaditError, LoaditResult};
use libsky::hash::{hash_file, HashAlgorithm};
use std::path::{Path, PathBuf};

pub struct Database {
    dir: PathBuf,
    pub manifest: DatabaseManifest,
}

impl Database {
    /// Open an existing database directory, or create a fresh empty one if
    /// `create_if_missing` is set and no manifest is present yet.
    pub fn open(dir: impl AsRef<Path>, create_if_missing: bool, hash_function: HashAlgorithm) -> LoaditResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let manifest_path = dir.join(DB_MANIFEST_NAME);
        if manifest_path.exists() {
            let manifest = DatabaseManifest::load(&dir)?;
            Ok(Self { dir, manifest })
        } else if create_if_missing {
            std::fs::create_dir_all(&dir)?;
            let manifest = DatabaseManifest::new(hash_function);
            manifest.save(&dir)?;
            Ok(Self { dir, manifest })
        } else {
            Err(LoaditError::NotFound(format!("database at {}", dir.display())))
        }
    }

    pub fn name(&self) -> &str {
        self.dir.file_name().and_then(|n| n.to_str()).unwrap_or("")
    }

    /// Table names this database currently owns, in sorted order.
    pub fn table_names(&self) -> Vec<String> {
        self.manifest.table_hashes.keys().cloned().collect()
    }

    /// Ingest `source_files` as a new batch named `name`. Rolls the
    /// database back to its last sealed batch on any failure.
    pub fn new_batch(&mut self, name: &str, source_files: &[PathBuf], comment: &str) -> LoaditResult<batch::BatchReport> {
        batch::new_batch(&self.dir, &mut self.manifest, name, source_files, comment)
    }

    /// Roll the database back to batch `name`.
    pub fn restore(&mut self, name: &str) -> LoaditResult<()> {
        batch::restore(&self.dir, &mut self.manifest, name)
    }

    /// Run a query against `table_name`.
    pub fn query(&self, table_name: &str, req: &QueryRequest) -> LoaditResult<QueryResult> {
        let table = TableStore::open(&self.dir, table_name, None)?;
        let engine = QueryEngine::new(table_name, &table);
        engine.run(req)
    }

    /// Non-throwing integrity check: recompute every
    /// field file's hash and compare it against the value recorded in its table's
    /// last sealed batch. Returns the relative paths of every file whose on-disk
    /// hash no longer matches, or an empty vec if the database is sound.
    pub fn check(&self) -> LoaditResult<Vec<String>> {
        let mut corrupted = Vec::new();
        for table_name in self.table_names() {
            let table_dir = self.dir.join(sanitize(&table_name));
            if !table_dir.join(TABLE_MANIFEST_NAME).exists() {
                corrupted.push(format!("{table_name}/{TABLE_MANIFEST_NAME} (missing)"));
                continue;
            }
            let table_manifest = TableManifest::load(&table_dir)?;
            let Some(last) = table_manifest.batches.last() else { continue };
            for (field, expected_hash) in &last.hashes {
                let path = table_dir.join(format!("{field}.bin"));
                let actual = hash_file(&path, self.manifest.hash_function)
                    .unwrap_or_else(|_| String::new());
                if &actual != expected_hash {
                    corrupted.push(format!("{table_name}/{field}.bin"));
                }
            }
        }
        Ok(corrupted)
    }

    /// A human-readable summary for the `query` CLI's `--info` flag: table names, row/column
    /// counts, and at `detailed`, every batch name and on-disk size.
    pub fn info(&self, detailed: bool) -> LoaditResult<String> {
        let mut out = format!("database: {}\n", self.name());
        for table_name in self.table_names() {
            let table = TableStore::open(&self.dir, &table_name, None)?;
            out.push_str(&format!(
                "  {table_name}: {} LIDs x {} IDs, {} fields\n",
                table.lids().len(),
                table.ids().len(),
                table.manifest.fields().count(),
            ));
            if detailed {
                for b in &table.manifest.batches {
                    out.push_str(&format!("    batch {} -> {} LIDs cumulative\n", b.name, b.n_lids_cumulative));
                }
                out.push_str(&format!("    size on disk: {} bytes\n", table.size_bytes()?));
            }
        }
        Ok(out)
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_deck(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn open_create_ingest_and_query_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let mut db = Database::open(tmp.path(), true, HashAlgorithm::Sha256).unwrap();
        let deck = write_deck(
            tmp.path(),
            "b1.pch",
            "ELEMENT FORCES - QUAD4 (33), 100\n1 10.0 0 0 0 0 0 0\n2 20.0 0 0 0 0 0 0\n",
        );
        db.new_batch("b1", &[deck], "first").unwrap();
        assert!(db.check().unwrap().is_empty());

        let req = QueryRequest {
            fields: vec!["NX".into()],
            lids: vec![crate::query::LidCombination::pure(100)],
            ids: None,
            groups: None,
            geometry: Default::default(),
            sort_by_lid: true,
            double_precision: false,
            max_memory_bytes: 1 << 30,
        };
        let result = db.query("ELEMENT FORCES - QUAD4 (33)", &req).unwrap();
        assert_eq!(result.rows.len(), 2);
    }

    #[test]
    fn check_detects_tampered_field_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut db = Database::open(tmp.path(), true, HashAlgorithm::Sha256).unwrap();
        let deck = write_deck(
            tmp.path(),
            "b1.pch",
            "ELEMENT FORCES - QUAD4 (33), 100\n1 10.0 0 0 0 0 0 0\n",
        );
        db.new_batch("b1", &[deck], "first").unwrap();

        let field_path = tmp.path().join("ELEMENT FORCES - QUAD4 (33)").join("NX.bin");
        let mut bytes = std::fs::read(&field_path).unwrap();
        bytes[0] ^= 0xFF;
        std::fs::write(&field_path, bytes).unwrap();

        let corrupted = db.check().unwrap();
        assert!(!corrupted.is_empty());
    }
}
