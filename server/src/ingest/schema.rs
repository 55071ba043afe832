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

//! Static punch-table schema catalog (`tables_specs`). Each entry maps a
//! table name, as it appears on a `$TITLE =` / table-header line of a `.pch` deck,
//! to its column list and the fixed-width per-line record layout used to parse
//! multi-line records (e.g. BEAM elements, which wrap across 11 lines).

use crate::storage::Dtype;
use std::collections::HashMap;
use std::sync::OnceLock;

/// One field slot within a physical line of a multi-line record. An empty `name`
/// marks a column that exists in the punch deck's fixed layout but isn't one of
/// this table's named fields (padding/continuation markers).
#[derive(Debug, Clone)]
pub struct FieldSlot {
    pub name: &'static str,
    pub dtype: Option<Dtype>,
}

fn slot(name: &'static str, dtype: Dtype) -> FieldSlot {
    FieldSlot { name, dtype: Some(dtype) }
}
fn pad() -> FieldSlot {
    FieldSlot { name: "", dtype: None }
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: Vec<(String, Dtype)>,
    /// One `Vec<FieldSlot>` per physical line; a record spans `pch_format.len()` lines.
    pub pch_format: Vec<Vec<FieldSlot>>,
}

impl TableSchema {
    pub fn lines_per_record(&self) -> usize {
        self.pch_format.len()
    }
}

fn rod() -> TableSchema {
    TableSchema {
        name: "ELEMENT FORCES - ROD (1)",
        columns: vec![
            ("LID".into(), Dtype::I8),
            ("ID".into(), Dtype::I8),
            ("FX".into(), Dtype::F4),
            ("T".into(), Dtype::F4),
        ],
        pch_format: vec![vec![slot("LID", Dtype::I8), slot("EID", Dtype::I8), slot("FX", Dtype::F4), slot("T", Dtype::F4)]],
    }
}

fn beam() -> TableSchema {
    TableSchema {
        name: "ELEMENT FORCES - BEAM (2)",
        columns: vec![
            ("LID".into(), Dtype::I8),
            ("ID".into(), Dtype::I8),
            ("M1A".into(), Dtype::F4),
            ("M2A".into(), Dtype::F4),
            ("M1B".into(), Dtype::F4),
            ("M2B".into(), Dtype::F4),
            ("V1".into(), Dtype::F4),
            ("V2".into(), Dtype::F4),
            ("FX".into(), Dtype::F4),
            ("T".into(), Dtype::F4),
            ("WT".into(), Dtype::F4),
        ],
        pch_format: {
            let mut lines = vec![vec![
                slot("LID", Dtype::I8),
                slot("EID", Dtype::I8),
                pad(),
                pad(),
                slot("M1A", Dtype::F4),
                slot("M2A", Dtype::F4),
                slot("V1", Dtype::F4),
                slot("V2", Dtype::F4),
                slot("FX", Dtype::F4),
                slot("T", Dtype::F4),
                slot("WT", Dtype::F4),
            ]];
            for _ in 0..9 {
                lines.push(vec![pad(); 9]);
            }
            lines.push(vec![pad(), pad(), slot("M1B", Dtype::F4), slot("M2B", Dtype::F4), pad(), pad(), pad(), pad(), pad()]);
            lines
        },
    }
}

fn elas(id: u8) -> TableSchema {
    TableSchema {
        name: match id {
            1 => "ELEMENT FORCES - ELAS1 (11)",
            2 => "ELEMENT FORCES - ELAS2 (12)",
            3 => "ELEMENT FORCES - ELAS3 (13)",
            _ => "ELEMENT FORCES - ELAS4 (14)",
        },
        columns: vec![("LID".into(), Dtype::I8), ("ID".into(), Dtype::I8), ("F".into(), Dtype::F4)],
        pch_format: vec![vec![slot("LID", Dtype::I8), slot("EID", Dtype::I8), slot("F", Dtype::F4)]],
    }
}

fn shell(name: &'static str) -> TableSchema {
    TableSchema {
        name,
        columns: vec![
            ("LID".into(), Dtype::I8),
            ("ID".into(), Dtype::I8),
            ("NX".into(), Dtype::F4),
            ("NY".into(), Dtype::F4),
            ("NXY".into(), Dtype::F4),
            ("MX".into(), Dtype::F4),
            ("MY".into(), Dtype::F4),
            ("MXY".into(), Dtype::F4),
            ("QX".into(), Dtype::F4),
            ("QY".into(), Dtype::F4),
        ],
        pch_format: vec![vec![
            slot("LID", Dtype::I8),
            slot("EID", Dtype::I8),
            slot("NX", Dtype::F4),
            slot("NY", Dtype::F4),
            slot("NXY", Dtype::F4),
            slot("MX", Dtype::F4),
            slot("MY", Dtype::F4),
            slot("MXY", Dtype::F4),
            slot("QX", Dtype::F4),
            slot("QY", Dtype::F4),
            pad(),
        ]],
    }
}

fn bar() -> TableSchema {
    TableSchema {
        name: "ELEMENT FORCES - BAR (34)",
        columns: vec![
            ("LID".into(), Dtype::I8),
            ("ID".into(), Dtype::I8),
            ("M1A".into(), Dtype::F4),
            ("M2A".into(), Dtype::F4),
            ("M1B".into(), Dtype::F4),
            ("M2B".into(), Dtype::F4),
            ("V1".into(), Dtype::F4),
            ("V2".into(), Dtype::F4),
            ("FX".into(), Dtype::F4),
            ("T".into(), Dtype::F4),
        ],
        pch_format: vec![vec![
            slot("LID", Dtype::I8),
            slot("EID", Dtype::I8),
            slot("M1A", Dtype::F4),
            slot("M2A", Dtype::F4),
            slot("M1B", Dtype::F4),
            slot("M2B", Dtype::F4),
            slot("V1", Dtype::F4),
            slot("V2", Dtype::F4),
            slot("FX", Dtype::F4),
            slot("T", Dtype::F4),
            pad(),
        ]],
    }
}

fn bars() -> TableSchema {
    TableSchema {
        name: "ELEMENT FORCES - BARS (100)",
        columns: vec![
            ("LID".into(), Dtype::I8),
            ("ID".into(), Dtype::I8),
            ("M1A".into(), Dtype::F4),
            ("M2A".into(), Dtype::F4),
            ("M1B".into(), Dtype::F4),
            ("M2B".into(), Dtype::F4),
            ("V1".into(), Dtype::F4),
            ("V2".into(), Dtype::F4),
            ("FX".into(), Dtype::F4),
            ("T".into(), Dtype::F4),
        ],
        pch_format: vec![
            vec![
                slot("LID", Dtype::I8),
                slot("EID", Dtype::I8),
                pad(),
                slot("M1A", Dtype::F4),
                slot("M2A", Dtype::F4),
                slot("V1", Dtype::F4),
                slot("V2", Dtype::F4),
                slot("FX", Dtype::F4),
                slot("T", Dtype::F4),
                pad(),
                pad(),
            ],
            vec![pad(), slot("M1B", Dtype::F4), slot("M2B", Dtype::F4), pad(), pad(), pad(), pad(), pad(), pad()],
        ],
    }
}

fn bush() -> TableSchema {
    TableSchema {
        name: "ELEMENT FORCES - BUSH (102)",
        columns: vec![
            ("LID".into(), Dtype::I8),
            ("ID".into(), Dtype::I8),
            ("FX".into(), Dtype::F4),
            ("FY".into(), Dtype::F4),
            ("FZ".into(), Dtype::F4),
            ("MX".into(), Dtype::F4),
            ("MY".into(), Dtype::F4),
            ("MZ".into(), Dtype::F4),
        ],
        pch_format: vec![vec![
            slot("LID", Dtype::I8),
            slot("EID", Dtype::I8),
            slot("FX", Dtype::F4),
            slot("FY", Dtype::F4),
            slot("FZ", Dtype::F4),
            slot("MX", Dtype::F4),
            slot("MY", Dtype::F4),
            slot("MZ", Dtype::F4),
        ]],
    }
}

static CATALOG: OnceLock<HashMap<&'static str, TableSchema>> = OnceLock::new();

pub fn tables_specs() -> &'static HashMap<&'static str, TableSchema> {
    CATALOG.get_or_init(|| {
        let mut m = HashMap::new();
        for t in [
            rod(),
            beam(),
            elas(1),
            elas(2),
            elas(3),
            elas(4),
            shell("ELEMENT FORCES - QUAD4 (33)"),
            shell("ELEMENT FORCES - TRIA3 (74)"),
            bar(),
            bars(),
            bush(),
        ] {
            m.insert(t.name, t);
        }
        m
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_quad4_and_beam() {
        let cat = tables_specs();
        assert!(cat.contains_key("ELEMENT FORCES - QUAD4 (33)"));
        let beam = &cat["ELEMENT FORCES - BEAM (2)"];
        assert_eq!(beam.lines_per_record(), 11);
        assert_eq!(beam.columns.len(), 11);
    }
}
