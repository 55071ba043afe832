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

//! Punch (`.pch`) reader. The deck's own lexical grammar — `$TITLE` banners,
//! continuation markers, column widths — is the external tokenizer's contract, not
//! this module's concern; what matters here is the contract it honors: a restartable,
//! per-file lazy sequence of `PchRecord { table, lid, ids, fields }`, one record per
//! subcase per table type, expanded against the static schema catalog.

use crate::ingest::schema::{tables_specs, TableSchema};
use libsky::error::{LoaditError, LoaditResult};
use std::collections::{BTreeMap, HashSet};
use std::io::{BufRead, BufReader};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct PchRecord {
    pub table: &'static str,
    pub lid: i64,
    pub ids: Vec<i64>,
    pub fields: BTreeMap<String, Vec<f32>>,
}

/// A single, un-restarted pass over one `.pch` file. Not `Send`-shareable across
/// files: each file gets its own reader, restartable per file but not mid-file.
pub struct PchReader<R> {
    lines: std::io::Lines<BufReader<R>>,
    warned_unknown: HashSet<String>,
}

impl PchReader<std::fs::File> {
    pub fn open(path: &Path) -> LoaditResult<Self> {
        let file = std::fs::File::open(path)?;
        Ok(Self { lines: BufReader::new(file).lines(), warned_unknown: HashSet::new() })
    }
}

impl<R: std::io::Read> PchReader<R> {
    pub fn new(reader: R) -> Self {
        Self { lines: BufReader::new(reader).lines(), warned_unknown: HashSet::new() }
    }

    /// Pulls the next table-header line and, if the table is known, its following
    /// record block; unknown table names are skipped with a one-shot warning.
    pub fn next_record(&mut self) -> LoaditResult<Option<PchRecord>> {
        loop {
            let header = match self.next_nonblank()? {
                Some(h) => h,
                None => return Ok(None),
            };
            let Some((name, lid)) = parse_header(&header) else { continue };

            let schema = match tables_specs().get(name.as_str()) {
                Some(s) => s,
                None => {
                    if self.warned_unknown.insert(name.clone()) {
                        log::warn!("'{name}' is not supported!");
                    }
                    continue;
                }
            };
            return Ok(Some(self.read_record(schema, lid)?));
        }
    }

    fn next_nonblank(&mut self) -> LoaditResult<Option<String>> {
        for line in &mut self.lines {
            let line = line?;
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_owned()));
            }
        }
        Ok(None)
    }

    fn read_record(&mut self, schema: &'static TableSchema, lid: i64) -> LoaditResult<PchRecord> {
        let mut ids: Vec<i64> = Vec::new();
        let mut fields: BTreeMap<String, Vec<f32>> = schema
            .columns
            .iter()
            .skip(2)
            .map(|(n, _)| (n.clone(), Vec::new()))
            .collect();

        loop {
            let Some(first_line) = self.next_nonblank()? else { break };
            if parse_header(&first_line).is_some() || first_line.starts_with('$') {
                break;
            }
            let mut row: BTreeMap<&str, f32> = BTreeMap::new();
            let mut element_id = None;
            for (line_idx, slots) in schema.pch_format.iter().enumerate() {
                let line = if line_idx == 0 { first_line.clone() } else {
                    self.next_nonblank()?.ok_or_else(|| {
                        LoaditError::InvalidSchema(format!("truncated record for table '{}'", schema.name))
                    })?
                };
                let tokens: Vec<&str> = line.split_whitespace().collect();
                for (slot, token) in slots.iter().zip(tokens.iter()) {
                    if slot.name.is_empty() {
                        continue;
                    }
                    if slot.name == "EID" {
                        element_id = token.parse::<i64>().ok();
                        continue;
                    }
                    if slot.name == "LID" {
                        continue;
                    }
                    let value: f32 = token
                        .parse()
                        .map_err(|_| LoaditError::InvalidSchema(format!("bad numeric token '{token}' in table '{}'", schema.name)))?;
                    row.insert(slot.name, value);
                }
            }
            let id = element_id.ok_or_else(|| LoaditError::InvalidSchema(format!("record missing element id in table '{}'", schema.name)))?;
            ids.push(id);
            for (name, values) in fields.iter_mut() {
                values.push(*row.get(name.as_str()).unwrap_or(&f32::NAN));
            }
        }

        Ok(PchRecord { table: schema.name, lid, ids, fields })
    }
}

/// Table-header lines look like `TABLE NAME, LID`, matching the contract that the
/// punch tokenizer hands us a table name plus the subcase LID per yielded block.
fn parse_header(line: &str) -> Option<(String, i64)> {
    let (name, lid) = line.rsplit_once(',')?;
    let lid: i64 = lid.trim().parse().ok()?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_owned(), lid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_a_single_quad4_record() {
        let deck = "ELEMENT FORCES - QUAD4 (33), 100\n1 10.0 0 0 0 0 0 0\n2 20.0 0 0 0 0 0 0\n";
        let mut reader = PchReader::new(std::io::Cursor::new(deck.as_bytes()));
        let rec = reader.next_record().unwrap().unwrap();
        assert_eq!(rec.table, "ELEMENT FORCES - QUAD4 (33)");
        assert_eq!(rec.lid, 100);
        assert_eq!(rec.ids, vec![1, 2]);
        assert_eq!(rec.fields["NX"], vec![10.0, 20.0]);
    }

    #[test]
    fn unknown_table_is_skipped_once_per_name() {
        let deck = "MADE UP TABLE (999), 1\n1 1.0\n\nMADE UP TABLE (999), 2\n1 1.0\n";
        let mut reader = PchReader::new(std::io::Cursor::new(deck.as_bytes()));
        assert!(reader.next_record().unwrap().is_none());
        assert_eq!(reader.warned_unknown.len(), 1);
    }
}
