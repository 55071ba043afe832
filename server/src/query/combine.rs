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

//! LID linear-combination resolution: a requested LID can either be a stored
//! load case, or a derived load case defined as `Σ coeff * LID` where the referenced
//! LIDs may themselves be stored or other derived LIDs defined earlier in the same
//! request. Referenced derived LIDs must appear before whatever references them —
//! that's the caller's contract, mirroring the original's dict-ordering convention.

use crate::storage::field::FieldReader;
use libsky::error::{LoaditError, LoaditResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One requested output LID: either a pure passthrough of a stored LID (`terms`
/// empty, `output_lid` itself is the stored LID to read) or a weighted sum of
/// `(coefficient, referenced_lid)` terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LidCombination {
    pub output_lid: i64,
    pub terms: Vec<(f64, i64)>,
}

impl LidCombination {
    pub fn pure(lid: i64) -> Self {
        Self { output_lid: lid, terms: Vec::new() }
    }
}

/// Resolve every combination in `combinations` against `reader` and return
/// `(output_lids, values)` where `values` is `combinations.len() x ids.len()`
/// row-major, in request order.
pub fn combine(
    reader: &FieldReader,
    combinations: &[LidCombination],
    ids: Option<&[i64]>,
) -> LoaditResult<(Vec<i64>, Vec<f32>)> {
    let ids_queried: Vec<i64> = match ids {
        Some(v) => v.to_vec(),
        None => reader.ids_ordered(),
    };
    let n_ids = ids_queried.len();

    // LIDs2read: pure requests, plus any stored LID referenced by a combination.
    let mut lids_queried: Vec<i64> = Vec::new();
    let mut seen_queried: HashSet<i64> = HashSet::new();
    for c in combinations {
        if c.terms.is_empty() && seen_queried.insert(c.output_lid) {
            lids_queried.push(c.output_lid);
        }
    }
    for c in combinations {
        for (_, lid) in &c.terms {
            if reader.has_lid(*lid) && seen_queried.insert(*lid) {
                lids_queried.push(*lid);
            }
        }
    }

    // LIDs_combined_used: referenced LIDs that aren't stored, i.e. other
    // combinations' outputs, computed earlier in `combinations` order.
    let mut lids_combined_used: Vec<i64> = Vec::new();
    let mut seen_combined: HashSet<i64> = HashSet::new();
    for c in combinations {
        for (_, lid) in &c.terms {
            if !reader.has_lid(*lid) && seen_combined.insert(*lid) {
                lids_combined_used.push(*lid);
            }
        }
    }

    let mut index: HashMap<i64, usize> = HashMap::new();
    for (i, lid) in lids_queried.iter().chain(lids_combined_used.iter()).enumerate() {
        index.entry(*lid).or_insert(i);
    }

    let total_rows = lids_queried.len() + lids_combined_used.len();
    let mut scratch = vec![f32::NAN; total_rows * n_ids];
    if !lids_queried.is_empty() {
        reader.read(Some(&lids_queried), Some(&ids_queried), &mut scratch[..lids_queried.len() * n_ids])?;
    }

    let mut out = vec![0f32; combinations.len() * n_ids];
    let mut output_lids = Vec::with_capacity(combinations.len());

    for (i, c) in combinations.iter().enumerate() {
        output_lids.push(c.output_lid);
        let out_row = &mut out[i * n_ids..(i + 1) * n_ids];

        if c.terms.is_empty() {
            let row = *index
                .get(&c.output_lid)
                .ok_or_else(|| LoaditError::InvalidQuery(format!("LID {} not found", c.output_lid)))?;
            out_row.copy_from_slice(&scratch[row * n_ids..(row + 1) * n_ids]);
        } else {
            out_row.fill(0.0);
            for (coeff, lid) in &c.terms {
                let row = *index
                    .get(lid)
                    .ok_or_else(|| LoaditError::InvalidQuery(format!("LID {lid} referenced in combination but never resolved")))?;
                let src = &scratch[row * n_ids..(row + 1) * n_ids];
                for j in 0..n_ids {
                    out_row[j] += src[j] * (*coeff as f32);
                }
            }
        }

        // If this combination's own output LID is referenced by a later one (i.e.
        // it landed in the `lids_combined_used` segment), store the freshly
        // computed row back so that later reference can read it.
        if let Some(&row) = index.get(&c.output_lid) {
            if row >= lids_queried.len() {
                scratch[row * n_ids..(row + 1) * n_ids].copy_from_slice(out_row);
            }
        }
    }

    Ok((output_lids, out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn reader_with(lids: &[i64], ids: &[i64], values: &[f32]) -> (tempfile::TempDir, FieldReader) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("F.bin");
        let mut bytes = Vec::with_capacity(values.len() * 4);
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        // append a (unused by these tests) column-major block of equal size
        bytes.extend(bytes.clone());
        std::fs::write(&path, bytes).unwrap();
        let i_lids: Map<i64, usize> = lids.iter().enumerate().map(|(i, l)| (*l, i)).collect();
        let i_ids: Map<i64, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let reader = FieldReader::new(path, lids, ids, i_lids, i_ids);
        (dir, reader)
    }

    #[test]
    fn pure_passthrough_returns_stored_row() {
        let (_dir, reader) = reader_with(&[10, 20], &[1, 2], &[1.0, 2.0, 3.0, 4.0]);
        let combos = vec![LidCombination::pure(20)];
        let (lids, values) = combine(&reader, &combos, None).unwrap();
        assert_eq!(lids, vec![20]);
        assert_eq!(values, vec![3.0, 4.0]);
    }

    #[test]
    fn linear_combination_of_stored_lids() {
        let (_dir, reader) = reader_with(&[10, 20], &[1, 2], &[1.0, 2.0, 3.0, 4.0]);
        let combos = vec![LidCombination { output_lid: 900, terms: vec![(2.0, 10), (1.0, 20)] }];
        let (_lids, values) = combine(&reader, &combos, None).unwrap();
        assert_eq!(values, vec![2.0 * 1.0 + 3.0, 2.0 * 2.0 + 4.0]);
    }

    #[test]
    fn combination_chains_through_a_derived_lid() {
        let (_dir, reader) = reader_with(&[10, 20], &[1], &[1.0, 2.0]);
        let combos = vec![
            LidCombination { output_lid: 900, terms: vec![(1.0, 10), (1.0, 20)] },
            LidCombination { output_lid: 901, terms: vec![(2.0, 900)] },
        ];
        let (_lids, values) = combine(&reader, &combos, None).unwrap();
        assert_eq!(values[0], 3.0);
        assert_eq!(values[1], 6.0);
    }
}
