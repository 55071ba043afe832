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

//! On-disk table store: open/append/seal/truncate of `LID.bin`, `ID.bin` and
//! one `<field>.bin` per field. A field file is `concat(row-major, column-major)`;
//! the column-major block is dropped and rebuilt on every seal rather than patched
//! in place, because appending rows changes the length of every column (see
//! DESIGN.md for why this differs from a literal "append-only" transpose).

use libsky::error::{LoaditError, LoaditResult};
use libsky::hash::{hash_file, HashAlgorithm};
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::dtype::Dtype;
use super::field::FieldReader;
use super::manifest::{TableBatchRecord, TableManifest};

/// Bytes transposed into the column-major block per slab, bounding peak memory
/// during `seal` regardless of table width.
pub const DEFAULT_TRANSPOSE_CHUNK_BYTES: usize = 8 * 1024 * 1024;

pub struct TableStore {
    dir: PathBuf,
    pub manifest: TableManifest,
    lids: Vec<i64>,
    ids: Vec<i64>,
    i_lids: HashMap<i64, usize>,
    i_ids: HashMap<i64, usize>,
}

impl TableStore {
    /// `open_table(header, new)`: create the table directory and index vectors for
    /// a brand new table, or load an existing one's `LID.bin`/`ID.bin` + manifest.
    pub fn open(db_dir: &Path, name: &str, columns: Option<Vec<(String, Dtype)>>) -> LoaditResult<Self> {
        let dir = db_dir.join(sanitize(name));
        if dir.join(super::manifest::TABLE_MANIFEST_NAME).exists() {
            let manifest = TableManifest::load(&dir)?;
            let lids = read_i64_vec(&dir.join("LID.bin"))?;
            let ids = read_i64_vec(&dir.join("ID.bin"))?;
            let i_lids = index_of(&lids);
            let i_ids = index_of(&ids);
            Ok(Self { dir, manifest, lids, ids, i_lids, i_ids })
        } else {
            let columns = columns
                .ok_or_else(|| LoaditError::NotFound(format!("table '{name}' (and no schema given to create it)")))?;
            std::fs::create_dir_all(&dir)?;
            let manifest = TableManifest::new(name.to_owned(), columns);
            Ok(Self { dir, manifest, lids: Vec::new(), ids: Vec::new(), i_lids: HashMap::new(), i_ids: HashMap::new() })
        }
    }

    pub fn is_new(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn lids(&self) -> &[i64] {
        &self.lids
    }

    /// `append_row`: validate LID uniqueness (duplicate → skip + warn, per the
    /// lenient Open Question decision recorded in DESIGN.md), fix the table's ID
    /// vector on first use, and reindex this row's values against it (missing IDs
    /// become NaN, with a one-shot warning).
    pub fn append_row(&mut self, lid: i64, row_ids: &[i64], fields: &BTreeMap<String, Vec<f32>>) -> LoaditResult<bool> {
        if self.i_lids.contains_key(&lid) {
            log::warn!("duplicate LID {lid} in table '{}': skipping row", self.manifest.name);
            return Ok(false);
        }

        if self.is_new() {
            self.ids = row_ids.to_vec();
            self.i_ids = index_of(&self.ids);
            for (name, _) in self.manifest.columns.iter().skip(2) {
                File::create(self.dir.join(format!("{name}.bin")))?;
            }
        }

        let reindexed: HashMap<&str, Vec<f32>> = fields
            .iter()
            .map(|(name, values)| {
                let mut out = vec![f32::NAN; self.ids.len()];
                let mut missing = false;
                for (i, id) in row_ids.iter().enumerate() {
                    if let Some(&pos) = self.i_ids.get(id) {
                        out[pos] = values[i];
                    }
                }
                for id in &self.ids {
                    if !row_ids.contains(id) {
                        missing = true;
                    }
                }
                if missing {
                    log::warn!(
                        "table '{}' batch row for LID {lid}: ID set mismatch against fixed table IDs, missing cells set to NaN",
                        self.manifest.name
                    );
                }
                (name.as_str(), out)
            })
            .collect();

        for (name, _) in self.manifest.columns.iter().skip(2) {
            let values = reindexed
                .get(name.as_str())
                .ok_or_else(|| LoaditError::InvalidSchema(format!("row for table '{}' missing field '{name}'", self.manifest.name)))?;
            let mut file = OpenOptions::new().append(true).open(self.dir.join(format!("{name}.bin")))?;
            for v in values {
                file.write_all(&v.to_le_bytes())?;
            }
        }

        self.i_lids.insert(lid, self.lids.len());
        self.lids.push(lid);
        Ok(true)
    }

    /// Persist `LID.bin`/`ID.bin` in full (small relative to field data; rewritten
    /// wholesale rather than incrementally appended, matching the original which
    /// regenerates both index arrays at seal time).
    fn write_index_vectors(&self) -> LoaditResult<()> {
        write_i64_vec(&self.dir.join("LID.bin"), &self.lids)?;
        write_i64_vec(&self.dir.join("ID.bin"), &self.ids)?;
        Ok(())
    }

    /// `seal_transposes`: drop any stale column-major block left by a previous
    /// seal, then rebuild it in ≤ `max_chunk_bytes` column slabs.
    fn seal_transposes(&self, max_chunk_bytes: usize) -> LoaditResult<()> {
        let n_lids = self.lids.len();
        let n_ids = self.ids.len();
        let row_major_bytes = (n_lids * n_ids * 4) as u64;

        for (name, _) in self.manifest.columns.iter().skip(2) {
            let path = self.dir.join(format!("{name}.bin"));
            let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
            file.set_len(row_major_bytes)?;

            let slab_cols = (max_chunk_bytes / (n_lids.max(1) * 4)).max(1);
            let mut col = 0usize;
            let mut row_buf = vec![0u8; n_lids * 4];
            while col < n_ids {
                let cols_here = slab_cols.min(n_ids - col);
                let mut out = Vec::with_capacity(cols_here * n_lids * 4);
                for c in col..col + cols_here {
                    for r in 0..n_lids {
                        file.seek(SeekFrom::Start(((r * n_ids + c) * 4) as u64))?;
                        file.read_exact(&mut row_buf[0..4])?;
                        out.extend_from_slice(&row_buf[0..4]);
                    }
                }
                file.seek(SeekFrom::End(0))?;
                file.write_all(&out)?;
                col += cols_here;
            }
        }
        Ok(())
    }

    /// `new_batch`'s per-table tail: write index vectors, rebuild transposes,
    /// recompute field hashes and save the table manifest. Returns this table's
    /// combined manifest hash to be folded into the database's batch hash.
    pub fn seal(
        &mut self,
        batch_name: &str,
        algorithm: HashAlgorithm,
        max_chunk_bytes: usize,
    ) -> LoaditResult<String> {
        self.write_index_vectors()?;
        self.seal_transposes(max_chunk_bytes)?;

        let mut hashes = BTreeMap::new();
        for (name, _) in self.manifest.columns.iter().skip(2) {
            let path = self.dir.join(format!("{name}.bin"));
            hashes.insert(name.clone(), hash_file(&path, algorithm)?);
        }

        self.manifest.batches.push(TableBatchRecord {
            name: batch_name.to_owned(),
            n_lids_cumulative: self.lids.len() as u64,
            hashes,
        });
        self.manifest.save(&self.dir)?;

        Ok(self
            .manifest
            .manifest_hash(algorithm)
            .expect("seal always appends at least one batch record"))
    }

    /// `truncate(table, offset_bytes)`: used by `restore(b)` to shrink every field
    /// file and the LID vector back to the row count recorded for batch `b`.
    pub fn truncate_to_batch(&mut self, batch_name: &str) -> LoaditResult<()> {
        let record = self
            .manifest
            .batches
            .iter()
            .find(|b| b.name == batch_name)
            .ok_or_else(|| LoaditError::NotFound(format!("batch '{batch_name}' in table '{}'", self.manifest.name)))?
            .clone();

        let n_lids = record.n_lids_cumulative as usize;
        self.lids.truncate(n_lids);
        self.i_lids = index_of(&self.lids);

        let row_major_bytes = (n_lids * self.ids.len() * 4) as u64;
        for (name, _) in self.manifest.columns.iter().skip(2) {
            let path = self.dir.join(format!("{name}.bin"));
            OpenOptions::new().write(true).open(&path)?.set_len(row_major_bytes)?;
        }
        write_i64_vec(&self.dir.join("LID.bin"), &self.lids)?;

        if let Some(idx) = self.manifest.batches.iter().position(|b| b.name == batch_name) {
            self.manifest.batches.truncate(idx + 1);
        }
        self.manifest.save(&self.dir)?;
        Ok(())
    }

    pub fn field_reader(&self, field: &str) -> LoaditResult<FieldReader> {
        if self.manifest.field_dtype(field).is_none() {
            return Err(LoaditError::NotFound(format!("field '{field}' in table '{}'", self.manifest.name)));
        }
        Ok(FieldReader::new(
            self.dir.join(format!("{field}.bin")),
            &self.lids,
            &self.ids,
            self.i_lids.clone(),
            self.i_ids.clone(),
        ))
    }

    pub fn size_bytes(&self) -> LoaditResult<u64> {
        let mut total = 0u64;
        for entry in std::fs::read_dir(&self.dir)? {
            total += entry?.metadata()?.len();
        }
        Ok(total)
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn index_of(values: &[i64]) -> HashMap<i64, usize> {
    values.iter().enumerate().map(|(i, v)| (*v, i)).collect()
}

fn read_i64_vec(path: &Path) -> LoaditResult<Vec<i64>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = std::fs::read(path)?;
    Ok(bytes.chunks_exact(8).map(|c| i64::from_le_bytes(c.try_into().unwrap())).collect())
}

fn write_i64_vec(path: &Path, values: &[i64]) -> LoaditResult<()> {
    let mut buf = Vec::with_capacity(values.len() * 8);
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    std::fs::write(path, buf)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn fields(pairs: &[(&str, &[f32])]) -> BTreeMap<String, Vec<f32>> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_vec())).collect()
    }

    #[test]
    fn append_and_seal_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let columns = vec![
            ("LID".to_string(), Dtype::I8),
            ("ID".to_string(), Dtype::I8),
            ("NX".to_string(), Dtype::F4),
        ];
        let mut table = TableStore::open(tmp.path(), "QUAD4", Some(columns)).unwrap();
        table.append_row(100, &[1, 2], &fields(&[("NX", &[10.0, 20.0])])).unwrap();
        let hash = table.seal("b1", HashAlgorithm::Sha256, 1024).unwrap();
        assert!(!hash.is_empty());

        let reader = table.field_reader("NX").unwrap();
        let mut out = [0f32; 2];
        reader.read(Some(&[100]), Some(&[1, 2]), &mut out).unwrap();
        assert_eq!(out, [10.0, 20.0]);
    }

    #[test]
    fn duplicate_lid_is_skipped_not_errored() {
        let tmp = tempfile::tempdir().unwrap();
        let columns = vec![
            ("LID".to_string(), Dtype::I8),
            ("ID".to_string(), Dtype::I8),
            ("NX".to_string(), Dtype::F4),
        ];
        let mut table = TableStore::open(tmp.path(), "QUAD4", Some(columns)).unwrap();
        assert!(table.append_row(100, &[1], &fields(&[("NX", &[1.0])])).unwrap());
        assert!(!table.append_row(100, &[1], &fields(&[("NX", &[2.0])])).unwrap());
        assert_eq!(table.lids().len(), 1);
    }

    #[test]
    fn missing_id_in_later_row_becomes_nan() {
        let tmp = tempfile::tempdir().unwrap();
        let columns = vec![
            ("LID".to_string(), Dtype::I8),
            ("ID".to_string(), Dtype::I8),
            ("NX".to_string(), Dtype::F4),
        ];
        let mut table = TableStore::open(tmp.path(), "QUAD4", Some(columns)).unwrap();
        table.append_row(100, &[1, 2], &fields(&[("NX", &[10.0, 20.0])])).unwrap();
        table.append_row(200, &[1], &fields(&[("NX", &[30.0])])).unwrap();
        table.seal("b1", HashAlgorithm::Sha256, 1024).unwrap();

        let reader = table.field_reader("NX").unwrap();
        let mut out = [0f32; 2];
        reader.read(Some(&[200]), Some(&[1, 2]), &mut out).unwrap();
        assert_eq!(out[0], 30.0);
        assert!(out[1].is_nan());
    }
}
