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

//! `new_batch`: reads every source `.pch` file, feeds its records into the
//! table store, seals the affected tables and writes the chained batch hash. Any
//! failure rolls the whole database back to the last sealed batch — no partial
//! batch is ever left on disk.

use crate::ingest::pch::PchReader;
use crate::storage::manifest::DatabaseManifest;
use crate::storage::table::{TableStore, DEFAULT_TRANSPOSE_CHUNK_BYTES};
use libsky::error::{LoaditError, LoaditResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct BatchReport {
    pub batch_name: String,
    pub tables_touched: Vec<String>,
    pub content_hash: String,
}

/// Ingest `files` into `db_dir` under batch `name`. `db_dir` must already contain a
/// valid `##header.json`. On any error the database is restored to the manifest's
/// last sealed batch before the error is returned.
pub fn new_batch(
    db_dir: &Path,
    manifest: &mut DatabaseManifest,
    name: &str,
    source_files: &[PathBuf],
    comment: &str,
) -> LoaditResult<BatchReport> {
    if manifest.has_batch(name) {
        return Err(LoaditError::AlreadyExists(format!("batch '{name}'")));
    }
    let last_batch = manifest.batches.last().map(|b| b.name.clone());

    match run_batch(db_dir, manifest, name, source_files, comment) {
        Ok(report) => Ok(report),
        Err(e) => {
            log::error!("batch '{name}' failed ({e}); rolling back to last sealed batch");
            if let Some(last) = last_batch {
                if let Err(rollback_err) = restore(db_dir, manifest, &last) {
                    log::error!("rollback itself failed: {rollback_err}");
                    crate::registry::poison();
                }
            }
            Err(e)
        }
    }
}

fn run_batch(
    db_dir: &Path,
    manifest: &mut DatabaseManifest,
    name: &str,
    source_files: &[PathBuf],
    _comment: &str,
) -> LoaditResult<BatchReport> {
    let mut tables: HashMap<String, TableStore> = HashMap::new();

    for file in source_files {
        let mut reader = PchReader::open(file)?;
        while let Some(record) = reader.next_record()? {
            let table = match tables.get_mut(record.table) {
                Some(t) => t,
                None => {
                    let store = open_or_create(db_dir, record.table)?;
                    tables.entry(record.table.to_owned()).or_insert(store)
                }
            };
            table.append_row(record.lid, &record.ids, &record.fields)?;
        }
    }

    if tables.is_empty() {
        return Err(LoaditError::InvalidSchema(format!(
            "no recognized tables found across {} source file(s)",
            source_files.len()
        )));
    }

    let mut touched = Vec::new();
    for (table_name, mut store) in tables {
        let hash = store.seal(name, manifest.hash_function, DEFAULT_TRANSPOSE_CHUNK_BYTES)?;
        manifest.table_hashes.insert(table_name.clone(), hash);
        touched.push(table_name);
    }
    touched.sort();

    manifest.seal_batch(
        name,
        source_files.iter().map(|p| p.display().to_string()).collect(),
        _comment.to_owned(),
    );
    manifest.save(db_dir)?;

    let content_hash = manifest
        .batches
        .last()
        .and_then(|b| b.content_hash.clone())
        .expect("seal_batch always sets content_hash");

    Ok(BatchReport { batch_name: name.to_owned(), tables_touched: touched, content_hash })
}

fn open_or_create(db_dir: &Path, table_name: &str) -> LoaditResult<TableStore> {
    let columns = crate::ingest::schema::tables_specs()
        .get(table_name)
        .map(|s| s.columns.clone());
    TableStore::open(db_dir, table_name, columns)
}

/// `restore(b)`: truncate every table to
/// batch `b`'s row count, drop tables introduced after `b`, rewrite the top manifest.
pub fn restore(db_dir: &Path, manifest: &mut DatabaseManifest, batch_name: &str) -> LoaditResult<()> {
    if !manifest.has_batch(batch_name) {
        return Err(LoaditError::NotFound(format!("batch '{batch_name}'")));
    }

    for entry in std::fs::read_dir(db_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let table_dir = entry.path();
        let table_manifest_path = table_dir.join(crate::storage::manifest::TABLE_MANIFEST_NAME);
        if !table_manifest_path.exists() {
            continue;
        }
        let table_manifest = crate::storage::manifest::TableManifest::load(&table_dir)?;
        let introduced_after_target = !table_manifest.batches.iter().any(|b| b.name == batch_name);
        if introduced_after_target {
            std::fs::remove_dir_all(&table_dir)?;
            manifest.table_hashes.remove(&table_manifest.name);
            continue;
        }

        let mut store = TableStore::open(db_dir, &table_manifest.name, None)?;
        store.truncate_to_batch(batch_name)?;
        if let Some(hash) = store.manifest.manifest_hash(manifest.hash_function) {
            manifest.table_hashes.insert(table_manifest.name.clone(), hash);
        }
    }

    manifest.truncate_after(batch_name)?;
    manifest.save(db_dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsky::hash::HashAlgorithm;
    use std::io::Write;

    fn write_deck(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn new_batch_then_restore_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let mut manifest = DatabaseManifest::new(HashAlgorithm::Sha256);
        manifest.save(tmp.path()).unwrap();

        let deck1 = write_deck(
            tmp.path(),
            "b1.pch",
            "ELEMENT FORCES - QUAD4 (33), 100\n1 10.0 0 0 0 0 0 0\n2 20.0 0 0 0 0 0 0\n",
        );
        let report1 = new_batch(tmp.path(), &mut manifest, "b1", &[deck1], "first").unwrap();
        assert_eq!(report1.tables_touched, vec!["ELEMENT FORCES - QUAD4 (33)".to_string()]);

        let deck2 = write_deck(
            tmp.path(),
            "b2.pch",
            "ELEMENT FORCES - QUAD4 (33), 200\n1 1.0 0 0 0 0 0 0\n2 2.0 0 0 0 0 0 0\n",
        );
        new_batch(tmp.path(), &mut manifest, "b2", &[deck2], "second").unwrap();
        assert_eq!(manifest.batches.len(), 2);

        restore(tmp.path(), &mut manifest, "b1").unwrap();
        assert_eq!(manifest.batches.len(), 1);
        assert_eq!(manifest.batches[0].name, "b1");
    }

    #[test]
    fn duplicate_batch_name_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut manifest = DatabaseManifest::new(HashAlgorithm::Sha256);
        manifest.save(tmp.path()).unwrap();
        let deck = write_deck(
            tmp.path(),
            "b1.pch",
            "ELEMENT FORCES - QUAD4 (33), 100\n1 10.0 0 0 0 0 0 0\n",
        );
        new_batch(tmp.path(), &mut manifest, "b1", &[deck.clone()], "first").unwrap();
        assert!(new_batch(tmp.path(), &mut manifest, "b1", &[deck], "dup").is_err());
    }
}
