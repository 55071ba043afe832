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

//! Query files: JSON with keys `{table, fields, LIDs, IDs, groups, geometry,
//! sort_by_LID, double_precision, output_file}`. `LIDs`, `IDs`, `groups` and
//! `geometry` may each be given inline or as a path to a CSV sidecar file.

use libsky::error::{LoaditError, LoaditResult};
use loadit_node::query::{LidCombination, QueryRequest};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct QueryFile {
    table: String,
    fields: Vec<String>,
    #[serde(rename = "LIDs")]
    lids: serde_json::Value,
    #[serde(rename = "IDs", default)]
    ids: Option<serde_json::Value>,
    #[serde(default)]
    groups: Option<serde_json::Value>,
    #[serde(default)]
    geometry: Option<serde_json::Value>,
    #[serde(rename = "sort_by_LID", default)]
    sort_by_lid: bool,
    #[serde(default)]
    double_precision: bool,
    #[serde(default)]
    output_file: Option<PathBuf>,
}

/// A query file resolved into the table to run it against, the request itself,
/// and (if given) where the caller wants the CSV result written.
pub struct ResolvedQuery {
    pub table: String,
    pub request: QueryRequest,
    pub output_file: Option<PathBuf>,
}

pub fn load(path: impl AsRef<Path>) -> LoaditResult<ResolvedQuery> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)?;
    let file: QueryFile = serde_json::from_str(&raw)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let lids = resolve_lids(&file.lids, base_dir)?;
    let ids = match &file.ids {
        Some(v) => Some(resolve_ids(v, base_dir)?),
        None => None,
    };
    let groups = match &file.groups {
        Some(v) => Some(resolve_groups(v, base_dir)?),
        None => None,
    };
    let geometry = match &file.geometry {
        Some(v) => resolve_geometry(v, base_dir)?,
        None => BTreeMap::new(),
    };

    Ok(ResolvedQuery {
        table: file.table,
        request: QueryRequest {
            fields: file.fields,
            lids,
            ids,
            groups,
            geometry,
            sort_by_lid: file.sort_by_lid,
            double_precision: file.double_precision,
            max_memory_bytes: 512 * 1024 * 1024,
        },
        output_file: file.output_file,
    })
}

fn as_path_ref(value: &serde_json::Value, base_dir: &Path) -> Option<PathBuf> {
    value.as_str().map(|s| {
        let p = Path::new(s);
        if p.is_absolute() { p.to_path_buf() } else { base_dir.join(p) }
    })
}

/// `LIDs`: a plain array of stored LIDs, an object `{output_lid: [c0, l0, c1,
/// l1, ...]}` of combinations, or a path to `LIDs.csv` (one column of plain
/// LIDs, or rows `lid,c0,l0,c1,l1,...` for combinations).
fn resolve_lids(value: &serde_json::Value, base_dir: &Path) -> LoaditResult<Vec<LidCombination>> {
    if let Some(path) = as_path_ref(value, base_dir) {
        return lids_from_csv(&path);
    }
    match value {
        serde_json::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let lid = item.as_i64().ok_or_else(|| LoaditError::InvalidQuery("LIDs array must contain integers".into()))?;
                out.push(LidCombination::pure(lid));
            }
            Ok(out)
        }
        serde_json::Value::Object(map) => {
            let mut out = Vec::with_capacity(map.len());
            for (key, terms) in map {
                let output_lid: i64 = key.parse().map_err(|_| LoaditError::InvalidQuery(format!("bad LID key '{key}'")))?;
                let flat = terms.as_array().ok_or_else(|| LoaditError::InvalidQuery("combination terms must be an array".into()))?;
                out.push(LidCombination { output_lid, terms: parse_term_pairs(flat)? });
            }
            Ok(out)
        }
        other => Err(LoaditError::InvalidQuery(format!("unsupported LIDs shape: {other}"))),
    }
}

fn parse_term_pairs(flat: &[serde_json::Value]) -> LoaditResult<Vec<(f64, i64)>> {
    if flat.len() % 2 != 0 {
        return Err(LoaditError::InvalidQuery("combination terms must alternate coefficient, LID".into()));
    }
    let mut terms = Vec::with_capacity(flat.len() / 2);
    for pair in flat.chunks(2) {
        let coeff = pair[0].as_f64().ok_or_else(|| LoaditError::InvalidQuery("combination coefficient must be numeric".into()))?;
        let lid = pair[1].as_i64().ok_or_else(|| LoaditError::InvalidQuery("combination LID must be an integer".into()))?;
        terms.push((coeff, lid));
    }
    Ok(terms)
}

fn lids_from_csv(path: &Path) -> LoaditResult<Vec<LidCombination>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(false).flexible(true).from_path(path)?;
    let mut out = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.is_empty() {
            continue;
        }
        let output_lid: i64 = record[0].trim().parse().map_err(|_| LoaditError::InvalidQuery(format!("bad LID in {}", path.display())))?;
        if record.len() == 1 {
            out.push(LidCombination::pure(output_lid));
            continue;
        }
        let fields: Vec<&str> = record.iter().skip(1).collect();
        if fields.len() % 2 != 0 {
            return Err(LoaditError::InvalidQuery(format!("combination row in {} must alternate coefficient, LID", path.display())));
        }
        let mut terms = Vec::with_capacity(fields.len() / 2);
        for pair in fields.chunks(2) {
            let coeff: f64 = pair[0].trim().parse().map_err(|_| LoaditError::InvalidQuery(format!("bad coefficient in {}", path.display())))?;
            let lid: i64 = pair[1].trim().parse().map_err(|_| LoaditError::InvalidQuery(format!("bad LID in {}", path.display())))?;
            terms.push((coeff, lid));
        }
        out.push(LidCombination { output_lid, terms });
    }
    Ok(out)
}

/// `IDs`: a plain array, or a path to a one-column `IDs.csv`.
fn resolve_ids(value: &serde_json::Value, base_dir: &Path) -> LoaditResult<Vec<i64>> {
    if let Some(path) = as_path_ref(value, base_dir) {
        let mut reader = csv::ReaderBuilder::new().has_headers(false).from_path(&path)?;
        let mut out = Vec::new();
        for record in reader.records() {
            let record = record?;
            if let Some(field) = record.get(0) {
                out.push(field.trim().parse().map_err(|_| LoaditError::InvalidQuery(format!("bad ID in {}", path.display())))?);
            }
        }
        return Ok(out);
    }
    value
        .as_array()
        .ok_or_else(|| LoaditError::InvalidQuery("IDs must be an array or a CSV path".into()))?
        .iter()
        .map(|v| v.as_i64().ok_or_else(|| LoaditError::InvalidQuery("IDs array must contain integers".into())))
        .collect()
}

/// `groups`: an object `{name: [ids...]}`, or a path to `groups.csv` (rows
/// `group_name,id,id,...`).
fn resolve_groups(value: &serde_json::Value, base_dir: &Path) -> LoaditResult<Vec<(String, Vec<i64>)>> {
    if let Some(path) = as_path_ref(value, base_dir) {
        let mut reader = csv::ReaderBuilder::new().has_headers(false).flexible(true).from_path(&path)?;
        let mut out = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.is_empty() {
                continue;
            }
            let name = record[0].trim().to_owned();
            let ids = record
                .iter()
                .skip(1)
                .map(|s| s.trim().parse().map_err(|_| LoaditError::InvalidQuery(format!("bad ID in {}", path.display()))))
                .collect::<LoaditResult<Vec<i64>>>()?;
            out.push((name, ids));
        }
        return Ok(out);
    }
    let map = value.as_object().ok_or_else(|| LoaditError::InvalidQuery("groups must be an object or a CSV path".into()))?;
    map.iter()
        .map(|(name, ids)| {
            let ids = ids
                .as_array()
                .ok_or_else(|| LoaditError::InvalidQuery(format!("group '{name}' must list IDs")))?
                .iter()
                .map(|v| v.as_i64().ok_or_else(|| LoaditError::InvalidQuery("group IDs must be integers".into())))
                .collect::<LoaditResult<Vec<i64>>>()?;
            Ok((name.clone(), ids))
        })
        .collect()
}

/// `geometry`: an object `{param: {id: value}}`, or a path to `geometry.csv`
/// (header row `id, param1, param2, ...`).
fn resolve_geometry(value: &serde_json::Value, base_dir: &Path) -> LoaditResult<BTreeMap<String, BTreeMap<i64, f32>>> {
    if let Some(path) = as_path_ref(value, base_dir) {
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(&path)?;
        let headers: Vec<String> = reader.headers()?.iter().skip(1).map(str::to_owned).collect();
        let mut out: BTreeMap<String, BTreeMap<i64, f32>> = headers.iter().map(|h| (h.clone(), BTreeMap::new())).collect();
        for record in reader.records() {
            let record = record?;
            let id: i64 = record[0].trim().parse().map_err(|_| LoaditError::InvalidQuery(format!("bad ID in {}", path.display())))?;
            for (i, header) in headers.iter().enumerate() {
                if let Some(field) = record.get(i + 1) {
                    let v: f32 = field.trim().parse().map_err(|_| LoaditError::InvalidQuery(format!("bad value in {}", path.display())))?;
                    out.get_mut(header).unwrap().insert(id, v);
                }
            }
        }
        return Ok(out);
    }
    let map = value.as_object().ok_or_else(|| LoaditError::InvalidQuery("geometry must be an object or a CSV path".into()))?;
    map.iter()
        .map(|(param, values)| {
            let values = values.as_object().ok_or_else(|| LoaditError::InvalidQuery(format!("geometry '{param}' must map ID to value")))?;
            let per_id = values
                .iter()
                .map(|(id, v)| {
                    let id: i64 = id.parse().map_err(|_| LoaditError::InvalidQuery(format!("bad geometry ID '{id}'")))?;
                    let v = v.as_f64().ok_or_else(|| LoaditError::InvalidQuery("geometry values must be numeric".into()))? as f32;
                    Ok((id, v))
                })
                .collect::<LoaditResult<BTreeMap<i64, f32>>>()?;
            Ok((param.clone(), per_id))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_an_inline_query_file() {
        let tmp = tempfile::tempdir().unwrap();
        let query = write_file(
            tmp.path(),
            "q.json",
            r#"{"table":"QUAD4","fields":["NX"],"LIDs":[100],"IDs":[1,2],"sort_by_LID":true}"#,
        );
        let resolved = load(&query).unwrap();
        assert_eq!(resolved.table, "QUAD4");
        assert_eq!(resolved.request.lids.len(), 1);
        assert_eq!(resolved.request.ids, Some(vec![1, 2]));
    }

    #[test]
    fn loads_lids_from_a_combination_csv_sidecar() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), "LIDs.csv", "300,1.0,100,2.0,200\n");
        let query = write_file(
            tmp.path(),
            "q.json",
            r#"{"table":"QUAD4","fields":["NX"],"LIDs":"LIDs.csv"}"#,
        );
        let resolved = load(&query).unwrap();
        assert_eq!(resolved.request.lids[0].output_lid, 300);
        assert_eq!(resolved.request.lids[0].terms, vec![(1.0, 100), (2.0, 200)]);
    }

    #[test]
    fn loads_groups_from_csv_sidecar() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), "groups.csv", "top,1,2,3\nbottom,4,5\n");
        let query = write_file(
            tmp.path(),
            "q.json",
            r#"{"table":"QUAD4","fields":["NX"],"LIDs":[100],"groups":"groups.csv"}"#,
        );
        let resolved = load(&query).unwrap();
        let groups = resolved.request.groups.unwrap();
        assert_eq!(groups[0], ("top".to_owned(), vec![1, 2, 3]));
        assert_eq!(groups[1], ("bottom".to_owned(), vec![4, 5]));
    }
}
