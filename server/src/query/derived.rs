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

//! Per-table derived-field kernel registry, for quantities the deck never carries
//! directly (Von Mises stress, principal stresses, shear) and the `geometry`
//! vectors they need (e.g. shell `thickness`). `sVonMises`/`sMaxPpal`/`sMinPpal`/
//! `sMaxShear` are themselves derived from `sx`/`sy`/`sxy`, which are derived from
//! the raw force fields divided by thickness — resolution in `engine.rs` recurses
//! through this registry rather than flattening it.

use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Clone, Copy)]
pub enum DerivedKernel {
    /// `(a, b, c) -> out`, elementwise over a flat `n_lids * n_ids` block.
    ThreeArg(fn(&[f32], &[f32], &[f32], &mut [f32])),
    /// `(value, per_id_geometry, n_ids) -> out`; the geometry vector is broadcast
    /// across every LID row.
    Geometry(fn(&[f32], &[f32], usize, &mut [f32])),
}

#[derive(Clone)]
pub struct DerivedField {
    pub name: &'static str,
    pub inputs: &'static [&'static str],
    pub kernel: DerivedKernel,
}

pub fn von_mises_2d(sxx: &[f32], syy: &[f32], sxy: &[f32], out: &mut [f32]) {
    for i in 0..out.len() {
        out[i] = (sxx[i].powi(2) + syy[i].powi(2) - sxx[i] * syy[i] + 3.0 * sxy[i].powi(2)).sqrt();
    }
}

pub fn max_ppal_2d(sxx: &[f32], syy: &[f32], sxy: &[f32], out: &mut [f32]) {
    for i in 0..out.len() {
        out[i] = (sxx[i] + syy[i]) / 2.0 + (((sxx[i] - syy[i]) / 2.0).powi(2) + sxy[i].powi(2)).sqrt();
    }
}

pub fn min_ppal_2d(sxx: &[f32], syy: &[f32], sxy: &[f32], out: &mut [f32]) {
    for i in 0..out.len() {
        out[i] = (sxx[i] + syy[i]) / 2.0 - (((sxx[i] - syy[i]) / 2.0).powi(2) + sxy[i].powi(2)).sqrt();
    }
}

pub fn max_shear_2d(sxx: &[f32], syy: &[f32], sxy: &[f32], out: &mut [f32]) {
    for i in 0..out.len() {
        out[i] = (((sxx[i] - syy[i]) / 2.0).powi(2) + sxy[i].powi(2)).sqrt();
    }
}

/// `value` is `n_lids x n_ids` row-major; `thickness` is one entry per ID, broadcast
/// across every LID row.
pub fn stress_2d(value: &[f32], thickness: &[f32], n_ids: usize, out: &mut [f32]) {
    for (row, chunk) in value.chunks(n_ids).enumerate() {
        let out_row = &mut out[row * n_ids..(row + 1) * n_ids];
        for j in 0..n_ids {
            out_row[j] = chunk[j] / thickness[j];
        }
    }
}

/// Geometry vectors a table's derived fields may reference.
pub fn geometry_fields(table: &str) -> &'static [&'static str] {
    match table {
        "ELEMENT FORCES - QUAD4 (33)" | "ELEMENT FORCES - TRIA3 (74)" => &["thickness"],
        _ => &[],
    }
}

static REGISTRY: OnceLock<HashMap<&'static str, Vec<DerivedField>>> = OnceLock::new();

pub fn derived_fields(table: &str) -> Option<&'static [DerivedField]> {
    REGISTRY.get_or_init(build_registry).get(table).map(|v| v.as_slice())
}

pub fn derived_field(table: &str, name: &str) -> Option<&'static DerivedField> {
    derived_fields(table)?.iter().find(|f| f.name == name)
}

fn build_registry() -> HashMap<&'static str, Vec<DerivedField>> {
    let shell_fields = vec![
        DerivedField { name: "VonMises", inputs: &["NX", "NY", "NXY"], kernel: DerivedKernel::ThreeArg(von_mises_2d) },
        DerivedField { name: "MaxPpal", inputs: &["NX", "NY", "NXY"], kernel: DerivedKernel::ThreeArg(max_ppal_2d) },
        DerivedField { name: "MinPpal", inputs: &["NX", "NY", "NXY"], kernel: DerivedKernel::ThreeArg(min_ppal_2d) },
        DerivedField { name: "MaxShear", inputs: &["NX", "NY", "NXY"], kernel: DerivedKernel::ThreeArg(max_shear_2d) },
        DerivedField { name: "sx", inputs: &["NX", "thickness"], kernel: DerivedKernel::Geometry(stress_2d) },
        DerivedField { name: "sy", inputs: &["NY", "thickness"], kernel: DerivedKernel::Geometry(stress_2d) },
        DerivedField { name: "sxy", inputs: &["NXY", "thickness"], kernel: DerivedKernel::Geometry(stress_2d) },
        DerivedField { name: "sVonMises", inputs: &["sx", "sy", "sxy"], kernel: DerivedKernel::ThreeArg(von_mises_2d) },
        DerivedField { name: "sMaxPpal", inputs: &["sx", "sy", "sxy"], kernel: DerivedKernel::ThreeArg(max_ppal_2d) },
        DerivedField { name: "sMinPpal", inputs: &["sx", "sy", "sxy"], kernel: DerivedKernel::ThreeArg(min_ppal_2d) },
        DerivedField { name: "sMaxShear", inputs: &["sx", "sy", "sxy"], kernel: DerivedKernel::ThreeArg(max_shear_2d) },
    ];
    let mut m = HashMap::new();
    m.insert("ELEMENT FORCES - QUAD4 (33)", shell_fields.clone());
    m.insert("ELEMENT FORCES - TRIA3 (74)", shell_fields);
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn von_mises_matches_uniaxial_case() {
        let mut out = [0f32; 1];
        von_mises_2d(&[10.0], &[0.0], &[0.0], &mut out);
        assert!((out[0] - 10.0).abs() < 1e-5);
    }

    #[test]
    fn svonmises_depends_on_sx_sy_sxy() {
        let field = derived_field("ELEMENT FORCES - QUAD4 (33)", "sVonMises").unwrap();
        assert_eq!(field.inputs, &["sx", "sy", "sxy"]);
    }

    #[test]
    fn stress_broadcasts_thickness_per_id() {
        let mut out = [0f32; 4];
        stress_2d(&[10.0, 20.0, 30.0, 40.0], &[1.0, 2.0], 2, &mut out);
        assert_eq!(out, [10.0, 10.0, 30.0, 20.0]);
    }
}
