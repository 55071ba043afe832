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

//! Ties the field-expression grammar, LID combination and aggregation kernels
//! together into one query. Execution order per field: resolve the base
//! (stored or derived, recursively), apply outer `ABS(·)`, reduce across IDs within
//! a group (level 1), then reduce across LIDs with a tracked critical LID (level 2,
//! batched against the memory budget).

use super::aggregate::{lid_aggregate, reduce_group};
use super::combine::{combine, LidCombination};
use super::derived::{derived_field, DerivedKernel};
use super::fieldexpr::{Aggregation, FieldExpr};
use super::memory::{plan, size_per_lid, BatchPlan};
use crate::storage::table::TableStore;
use libsky::error::{LoaditError, LoaditResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub fields: Vec<String>,
    pub lids: Vec<LidCombination>,
    pub ids: Option<Vec<i64>>,
    /// Named groups of IDs for level >= 1 aggregation. Defaults to one group
    /// ("all") containing every requested ID.
    pub groups: Option<Vec<(String, Vec<i64>)>>,
    /// Geometry vectors (e.g. shell `thickness`), keyed by name then by ID.
    pub geometry: BTreeMap<String, BTreeMap<i64, f32>>,
    pub sort_by_lid: bool,
    pub double_precision: bool,
    pub max_memory_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub index_names: Vec<String>,
    pub index: Vec<Vec<String>>,
    pub sorted_by: Option<String>,
    pub header: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    /// One critical-LID column per field, present only at level 2.
    pub critical_lids: Option<Vec<Vec<i64>>>,
}

impl QueryResult {
    /// CSV is the only supported output format — no Parquet/Excel/SQLite writers.
    pub fn write_csv<W: Write>(&self, mut w: W) -> LoaditResult<()> {
        let mut wtr = csv::Writer::from_writer(&mut w);
        let mut header_row: Vec<String> = self.index_names.clone();
        for h in &self.header {
            header_row.push(h.clone());
            if self.critical_lids.is_some() {
                header_row.push(format!("{h}_criticalLID"));
            }
        }
        wtr.write_record(&header_row)
            .map_err(|e| LoaditError::Other(format!("csv write error: {e}")))?;

        for (r, idx) in self.index.iter().enumerate() {
            let mut record = idx.clone();
            for (c, col) in self.rows[r].iter().enumerate() {
                record.push(format_value(*col));
                if let Some(crit) = &self.critical_lids {
                    record.push(crit[c][r].to_string());
                }
            }
            wtr.write_record(&record).map_err(|e| LoaditError::Other(format!("csv write error: {e}")))?;
        }
        wtr.flush().map_err(|e| LoaditError::io_extra(e, "flushing csv writer"))?;
        Ok(())
    }
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        String::new()
    } else {
        v.to_string()
    }
}

pub struct QueryEngine<'a> {
    table: &'a TableStore,
    table_name: &'a str,
}

impl<'a> QueryEngine<'a> {
    pub fn new(table_name: &'a str, table: &'a TableStore) -> Self {
        Self { table, table_name }
    }

    pub fn run(&self, req: &QueryRequest) -> LoaditResult<QueryResult> {
        if req.fields.is_empty() {
            return Err(LoaditError::InvalidQuery("no fields requested".into()));
        }
        let exprs: Vec<FieldExpr> = req.fields.iter().map(|f| FieldExpr::parse(f)).collect::<LoaditResult<_>>()?;
        let syntactic_level = exprs[0].level();
        if exprs.iter().any(|e| e.level() != syntactic_level) {
            return Err(LoaditError::InvalidQuery(
                "all fields in one query must share the same aggregation level".into(),
            ));
        }

        let ids_queried: Vec<i64> = match &req.ids {
            Some(v) => v.clone(),
            None => self.table.ids().to_vec(),
        };

        // A single aggregation (`BASE-AGG`) with no `groups` isn't "average/max/min
        // across all IDs at once" — it's reinterpreted as running across LIDs, one
        // result per ID, tracking the critical LID. AVG doesn't survive that
        // reinterpretation since averaging across LIDs is meaningless.
        let reinterpret_per_id = syntactic_level == 1 && req.groups.is_none();
        if reinterpret_per_id && exprs.iter().any(|e| e.agg1.is_some_and(|a| a.is_avg())) {
            return Err(LoaditError::InvalidQuery(
                "AVG is not meaningful across LIDs; pass `groups` to average across IDs instead".into(),
            ));
        }
        let level = if reinterpret_per_id { 2 } else { syntactic_level };

        let groups: Vec<(String, Vec<i64>)> = if reinterpret_per_id {
            ids_queried.iter().map(|id| (id.to_string(), vec![*id])).collect()
        } else {
            match &req.groups {
                Some(g) => g.clone(),
                None => vec![("all".to_string(), ids_queried.clone())],
            }
        };

        let elem_size = if req.double_precision { 8 } else { 4 };
        let per_lid = size_per_lid(exprs.len(), ids_queried.len(), elem_size);
        let batch_plan = plan(per_lid, req.lids.len(), req.max_memory_bytes, level)?;

        let mut header = Vec::with_capacity(exprs.len());
        let mut columns: Vec<Vec<f64>> = Vec::with_capacity(exprs.len());
        let mut critical: Vec<Vec<i64>> = Vec::with_capacity(exprs.len());
        let mut index_rows: Vec<Vec<String>> = Vec::new();

        for expr in &exprs {
            header.push(expr.raw.clone());
            let (values, crit_lids, rows) = self.run_one_field(expr, req, &ids_queried, &groups, level, batch_plan)?;
            if index_rows.is_empty() {
                index_rows = rows;
            }
            columns.push(values);
            if let Some(c) = crit_lids {
                critical.push(c);
            }
        }

        let n_rows = columns.first().map(|c| c.len()).unwrap_or(0);
        let mut rows: Vec<Vec<f64>> = (0..n_rows).map(|_| Vec::with_capacity(columns.len())).collect();
        for col in &columns {
            for (r, v) in col.iter().enumerate() {
                rows[r].push(*v);
            }
        }

        let index_names = match (level, reinterpret_per_id) {
            (0, _) => vec!["LID".to_string(), "ID".to_string()],
            (1, _) => vec!["LID".to_string(), "group".to_string()],
            (_, true) => vec!["ID".to_string()],
            _ => vec!["group".to_string()],
        };

        let mut result = QueryResult {
            index_names,
            index: index_rows,
            sorted_by: None,
            header,
            rows,
            critical_lids: if critical.is_empty() { None } else { Some(critical) },
        };

        if req.sort_by_lid && level < 2 {
            sort_by_lid(&mut result);
        }

        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_one_field(
        &self,
        expr: &FieldExpr,
        req: &QueryRequest,
        ids_queried: &[i64],
        groups: &[(String, Vec<i64>)],
        level: u8,
        batch_plan: BatchPlan,
    ) -> LoaditResult<(Vec<f64>, Option<Vec<i64>>, Vec<Vec<String>>)> {
        match level {
            0 => {
                let (lids, raw) = self.resolve_base(&expr.base, &req.lids, ids_queried, &req.geometry)?;
                let raw = apply_abs(raw, expr.outer_abs);
                let mut rows = Vec::with_capacity(lids.len() * ids_queried.len());
                let mut values = Vec::with_capacity(raw.len());
                for (li, lid) in lids.iter().enumerate() {
                    for (ii, id) in ids_queried.iter().enumerate() {
                        rows.push(vec![lid.to_string(), id.to_string()]);
                        values.push(raw[li * ids_queried.len() + ii] as f64);
                    }
                }
                Ok((values, None, rows))
            }
            1 => {
                let (lids, raw) = self.resolve_base(&expr.base, &req.lids, ids_queried, &req.geometry)?;
                let raw = apply_abs(raw, expr.outer_abs);
                let agg1 = expr.agg1.expect("level 1 implies agg1 is set");
                let weights = req.geometry.get("weights");
                let mut rows = Vec::with_capacity(lids.len() * groups.len());
                let mut values = Vec::with_capacity(lids.len() * groups.len());
                for (li, lid) in lids.iter().enumerate() {
                    for (name, gids) in groups {
                        let gvalues: Vec<f32> = gids
                            .iter()
                            .map(|id| {
                                let pos = ids_queried.iter().position(|x| x == id).unwrap_or(0);
                                raw[li * ids_queried.len() + pos]
                            })
                            .collect();
                        let gweights = group_weights(agg1, weights, gids);
                        rows.push(vec![lid.to_string(), name.clone()]);
                        values.push(reduce_group(&gvalues, gweights.as_deref(), agg1) as f64);
                    }
                }
                Ok((values, None, rows))
            }
            _ => {
                let agg1 = expr.agg1.expect("level 2 implies agg1 is set");
                // `agg2` is absent exactly when this field was reinterpreted from a
                // bare `BASE-AGG` (no `groups`) into per-ID level 2; in that case the
                // one aggregation given plays both roles.
                let agg2 = expr.agg2.unwrap_or(agg1);
                let weights = req.geometry.get("weights");
                let chunks: Vec<&[LidCombination]> = match batch_plan {
                    BatchPlan::Whole => vec![&req.lids[..]],
                    BatchPlan::Batched { chunk_lids } => req.lids.chunks(chunk_lids.max(1)).collect(),
                };

                let mut out = vec![f32::NAN; groups.len()];
                let mut lids_out = vec![0i64; groups.len()];

                for (batch_idx, chunk) in chunks.iter().enumerate() {
                    if chunk.is_empty() {
                        continue;
                    }
                    let (lids_batch, raw) = self.resolve_base(&expr.base, chunk, ids_queried, &req.geometry)?;
                    let raw = apply_abs(raw, expr.outer_abs);

                    let mut reduced = vec![0f32; lids_batch.len() * groups.len()];
                    for li in 0..lids_batch.len() {
                        for (gi, (_name, gids)) in groups.iter().enumerate() {
                            let gvalues: Vec<f32> = gids
                                .iter()
                                .map(|id| {
                                    let pos = ids_queried.iter().position(|x| x == id).unwrap_or(0);
                                    raw[li * ids_queried.len() + pos]
                                })
                                .collect();
                            let gweights = group_weights(agg1, weights, gids);
                            reduced[li * groups.len() + gi] = reduce_group(&gvalues, gweights.as_deref(), agg1);
                        }
                    }

                    lid_aggregate(&reduced, &lids_batch, groups.len(), agg2, batch_idx > 0, &mut out, &mut lids_out);
                }

                let rows = groups.iter().map(|(name, _)| vec![name.clone()]).collect();
                let values = out.into_iter().map(|v| v as f64).collect();
                Ok((values, Some(lids_out), rows))
            }
        }
    }

    /// Recursively resolve `base` against stored fields, geometry vectors, or the
    /// derived-field registry, returning `(output_lids, n_lids x n_ids row-major)`.
    fn resolve_base(
        &self,
        base: &str,
        lids: &[LidCombination],
        ids: &[i64],
        geometry: &BTreeMap<String, BTreeMap<i64, f32>>,
    ) -> LoaditResult<(Vec<i64>, Vec<f32>)> {
        if self.table.manifest.field_dtype(base).is_some() {
            let reader = self.table.field_reader(base)?;
            return combine(&reader, lids, Some(ids));
        }

        let Some(df) = derived_field(self.table_name, base) else {
            return Err(LoaditError::NotFound(format!("field '{base}' in table '{}'", self.table_name)));
        };
        let lid_ids: Vec<i64> = lids.iter().map(|c| c.output_lid).collect();

        match df.kernel {
            DerivedKernel::ThreeArg(f) => {
                let (_, a) = self.resolve_base(df.inputs[0], lids, ids, geometry)?;
                let (_, b) = self.resolve_base(df.inputs[1], lids, ids, geometry)?;
                let (_, c) = self.resolve_base(df.inputs[2], lids, ids, geometry)?;
                let mut out = vec![0f32; lid_ids.len() * ids.len()];
                f(&a, &b, &c, &mut out);
                Ok((lid_ids, out))
            }
            DerivedKernel::Geometry(f) => {
                let (_, value) = self.resolve_base(df.inputs[0], lids, ids, geometry)?;
                let geom_name = df.inputs[1];
                let geom = geometry
                    .get(geom_name)
                    .ok_or_else(|| LoaditError::InvalidQuery(format!("missing geometry '{geom_name}'")))?;
                let thickness: Vec<f32> = ids
                    .iter()
                    .map(|id| {
                        geom.get(id)
                            .copied()
                            .ok_or_else(|| LoaditError::InvalidQuery(format!("geometry '{geom_name}' missing ID {id}")))
                    })
                    .collect::<LoaditResult<_>>()?;
                let mut out = vec![0f32; lid_ids.len() * ids.len()];
                f(&value, &thickness, ids.len(), &mut out);
                Ok((lid_ids, out))
            }
        }
    }
}

/// Per-ID weights for a group's AVG reduction, taken from `geometry["weights"]`
/// and defaulting to `1.0` for an ID the map doesn't cover. `None` for any
/// non-AVG aggregation, since MAX/MIN never weight their inputs.
fn group_weights(agg: Aggregation, weights: Option<&BTreeMap<i64, f32>>, gids: &[i64]) -> Option<Vec<f32>> {
    if !agg.is_avg() {
        return None;
    }
    weights.map(|w| gids.iter().map(|id| w.get(id).copied().unwrap_or(1.0)).collect())
}

fn apply_abs(mut values: Vec<f32>, outer_abs: bool) -> Vec<f32> {
    if outer_abs {
        for v in &mut values {
            *v = v.abs();
        }
    }
    values
}

fn sort_by_lid(result: &mut QueryResult) {
    let lid_col = 0;
    let mut order: Vec<usize> = (0..result.index.len()).collect();
    order.sort_by_key(|&i| result.index[i][lid_col].parse::<i64>().unwrap_or(i64::MAX));
    result.index = order.iter().map(|&i| result.index[i].clone()).collect();
    result.rows = order.iter().map(|&i| result.rows[i].clone()).collect();
    result.sorted_by = Some("LID".to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::dtype::Dtype;
    use std::collections::BTreeMap as Map;

    fn table_with_nx(dir: &std::path::Path) -> TableStore {
        let columns = vec![
            ("LID".to_string(), Dtype::I8),
            ("ID".to_string(), Dtype::I8),
            ("NX".to_string(), Dtype::F4),
        ];
        let mut t = TableStore::open(dir, "ELEMENT FORCES - QUAD4 (33)", Some(columns)).unwrap();
        let mut fields = Map::new();
        fields.insert("NX".to_string(), vec![10.0, 20.0]);
        t.append_row(100, &[1, 2], &fields).unwrap();
        let mut fields2 = Map::new();
        fields2.insert("NX".to_string(), vec![1.0, 2.0]);
        t.append_row(200, &[1, 2], &fields2).unwrap();
        t.seal("b1", libsky::hash::HashAlgorithm::Sha256, 4096).unwrap();
        t
    }

    #[test]
    fn level0_raw_query_returns_every_lid_id_pair() {
        let tmp = tempfile::tempdir().unwrap();
        let table = table_with_nx(tmp.path());
        let engine = QueryEngine::new("ELEMENT FORCES - QUAD4 (33)", &table);
        let req = QueryRequest {
            fields: vec!["NX".to_string()],
            lids: vec![LidCombination::pure(100), LidCombination::pure(200)],
            ids: None,
            groups: None,
            geometry: Map::new(),
            sort_by_lid: false,
            double_precision: false,
            max_memory_bytes: 1 << 20,
        };
        let result = engine.run(&req).unwrap();
        assert_eq!(result.rows.len(), 4);
    }

    #[test]
    fn level2_max_tracks_critical_lid() {
        let tmp = tempfile::tempdir().unwrap();
        let table = table_with_nx(tmp.path());
        let engine = QueryEngine::new("ELEMENT FORCES - QUAD4 (33)", &table);
        let req = QueryRequest {
            fields: vec!["NX-AVG-MAX".to_string()],
            lids: vec![LidCombination::pure(100), LidCombination::pure(200)],
            ids: None,
            groups: None,
            geometry: Map::new(),
            sort_by_lid: false,
            double_precision: false,
            max_memory_bytes: 1 << 20,
        };
        let result = engine.run(&req).unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.critical_lids.unwrap()[0][0], 100);
    }

    #[test]
    fn rejects_mixed_levels() {
        let tmp = tempfile::tempdir().unwrap();
        let table = table_with_nx(tmp.path());
        let engine = QueryEngine::new("ELEMENT FORCES - QUAD4 (33)", &table);
        let req = QueryRequest {
            fields: vec!["NX".to_string(), "NX-AVG".to_string()],
            lids: vec![LidCombination::pure(100)],
            ids: None,
            groups: None,
            geometry: Map::new(),
            sort_by_lid: false,
            double_precision: false,
            max_memory_bytes: 1 << 20,
        };
        assert!(engine.run(&req).is_err());
    }

    #[test]
    fn single_agg_with_no_groups_reinterprets_as_per_id_across_lids() {
        let tmp = tempfile::tempdir().unwrap();
        let columns = vec![
            ("LID".to_string(), Dtype::I8),
            ("ID".to_string(), Dtype::I8),
            ("NX".to_string(), Dtype::F4),
        ];
        let mut t = TableStore::open(tmp.path(), "ELEMENT FORCES - QUAD4 (33)", Some(columns)).unwrap();
        let mut fields = Map::new();
        fields.insert("NX".to_string(), vec![10.0, 20.0]);
        t.append_row(100, &[1, 2], &fields).unwrap();
        let mut fields2 = Map::new();
        fields2.insert("NX".to_string(), vec![1.0, 30.0]);
        t.append_row(200, &[1, 2], &fields2).unwrap();
        t.seal("b1", libsky::hash::HashAlgorithm::Sha256, 4096).unwrap();

        let engine = QueryEngine::new("ELEMENT FORCES - QUAD4 (33)", &t);
        let req = QueryRequest {
            fields: vec!["NX-MAX".to_string()],
            lids: vec![LidCombination::pure(100), LidCombination::pure(200)],
            ids: None,
            groups: None,
            geometry: Map::new(),
            sort_by_lid: false,
            double_precision: false,
            max_memory_bytes: 1 << 20,
        };
        let result = engine.run(&req).unwrap();
        assert_eq!(result.index_names, vec!["ID".to_string()]);
        assert_eq!(result.rows, vec![vec![10.0], vec![30.0]]);
        assert_eq!(result.critical_lids.unwrap()[0], vec![100, 200]);
    }

    #[test]
    fn single_avg_with_no_groups_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let table = table_with_nx(tmp.path());
        let engine = QueryEngine::new("ELEMENT FORCES - QUAD4 (33)", &table);
        let req = QueryRequest {
            fields: vec!["NX-AVG".to_string()],
            lids: vec![LidCombination::pure(100)],
            ids: None,
            groups: None,
            geometry: Map::new(),
            sort_by_lid: false,
            double_precision: false,
            max_memory_bytes: 1 << 20,
        };
        assert!(engine.run(&req).is_err());
    }

    #[test]
    fn grouped_avg_applies_weights() {
        let tmp = tempfile::tempdir().unwrap();
        let table = table_with_nx(tmp.path());
        let engine = QueryEngine::new("ELEMENT FORCES - QUAD4 (33)", &table);
        let mut weights = Map::new();
        weights.insert(1, 1.0);
        weights.insert(2, 3.0);
        let mut geometry = Map::new();
        geometry.insert("weights".to_string(), weights);
        let req = QueryRequest {
            fields: vec!["NX-AVG".to_string()],
            lids: vec![LidCombination::pure(100)],
            ids: None,
            groups: Some(vec![("A".to_string(), vec![1, 2])]),
            geometry,
            sort_by_lid: false,
            double_precision: false,
            max_memory_bytes: 1 << 20,
        };
        let result = engine.run(&req).unwrap();
        assert_eq!(result.rows, vec![vec![(10.0 + 3.0 * 20.0) / 4.0]]);
    }
}
