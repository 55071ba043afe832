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

//! Level-1 (across IDs within a group) and level-2 (across LIDs) aggregation
//! kernels. NaN never wins a MAX/MIN comparison; AVG has no meaning once values
//! have already been reduced to one row per ID (level 2), so callers must reject
//! it before reaching here.

use super::fieldexpr::Aggregation;

/// Reduce one group's worth of values (one LID, a subset of IDs) to a scalar.
/// `weights`, when given, pairs element-for-element with `values` and only
/// affects AVG/ABS(AVG): the result is `Σ(w·v) / Σw` over the non-NaN entries,
/// falling back to an unweighted mean when absent. MAX/MIN ignore weights.
pub fn reduce_group(values: &[f32], weights: Option<&[f32]>, agg: Aggregation) -> f32 {
    match agg {
        Aggregation::Avg | Aggregation::AbsAvg => match weights {
            Some(weights) => {
                debug_assert_eq!(values.len(), weights.len());
                let (wsum, sum) = values.iter().zip(weights).filter(|(v, _)| !v.is_nan()).fold(
                    (0f64, 0f64),
                    |(ws, s), (v, w)| (ws + *w as f64, s + *v as f64 * *w as f64),
                );
                if wsum == 0.0 {
                    f32::NAN
                } else {
                    (sum / wsum) as f32
                }
            }
            None => {
                let (sum, count) = values
                    .iter()
                    .filter(|v| !v.is_nan())
                    .fold((0f64, 0u32), |(s, c), v| (s + *v as f64, c + 1));
                if count == 0 {
                    f32::NAN
                } else {
                    (sum / count as f64) as f32
                }
            }
        },
        Aggregation::Max | Aggregation::AbsMax => values
            .iter()
            .copied()
            .fold(f32::NAN, |acc, v| if acc.is_nan() || v > acc { v } else { acc }),
        Aggregation::Min | Aggregation::AbsMin => values
            .iter()
            .copied()
            .fold(f32::NAN, |acc, v| if acc.is_nan() || v < acc { v } else { acc }),
    }
}

/// `max_load`/`min_load`: reduce a `lids.len() x n_ids` row-major block across its
/// rows, tracking both the extreme value and the "critical LID" that produced it
/// per ID column. When `use_previous_agg`, `out`/`lids_out` already hold a prior
/// batch's running aggregate (memory-capped batched execution) and are folded into
/// rather than reset.
pub fn lid_aggregate(
    array: &[f32],
    lids: &[i64],
    n_ids: usize,
    agg: Aggregation,
    use_previous_agg: bool,
    out: &mut [f32],
    lids_out: &mut [i64],
) {
    debug_assert_eq!(array.len(), lids.len() * n_ids);
    if lids.is_empty() {
        return;
    }

    let wins = |new: f32, cur: f32| match agg {
        Aggregation::Max | Aggregation::AbsMax => new > cur,
        Aggregation::Min | Aggregation::AbsMin => new < cur,
        _ => panic!("AVG has no meaning at level 2 (across LIDs)"),
    };

    for j in 0..n_ids {
        let v0 = array[j];
        if !use_previous_agg || wins(v0, out[j]) || out[j].is_nan() {
            out[j] = v0;
            lids_out[j] = lids[0];
        }
    }
    for i in 1..lids.len() {
        for j in 0..n_ids {
            let v = array[i * n_ids + j];
            if wins(v, out[j]) || out[j].is_nan() {
                out[j] = v;
                lids_out[j] = lids[i];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_never_wins_max() {
        let mut out = [f32::NAN; 1];
        let mut lids_out = [0i64; 1];
        lid_aggregate(&[1.0, f32::NAN, 5.0], &[10, 20, 30], 1, Aggregation::Max, false, &mut out, &mut lids_out);
        assert_eq!(out[0], 5.0);
        assert_eq!(lids_out[0], 30);
    }

    #[test]
    fn earliest_lid_wins_tie() {
        let mut out = [f32::NAN; 1];
        let mut lids_out = [0i64; 1];
        lid_aggregate(&[5.0, 5.0], &[10, 20], 1, Aggregation::Max, false, &mut out, &mut lids_out);
        assert_eq!(lids_out[0], 10);
    }

    #[test]
    fn batched_aggregation_folds_into_previous() {
        let mut out = [3.0f32];
        let mut lids_out = [1i64];
        lid_aggregate(&[5.0], &[2], 1, Aggregation::Max, true, &mut out, &mut lids_out);
        assert_eq!(out[0], 5.0);
        assert_eq!(lids_out[0], 2);
    }

    #[test]
    fn group_avg_skips_nan() {
        assert_eq!(reduce_group(&[1.0, f32::NAN, 3.0], None, Aggregation::Avg), 2.0);
    }

    #[test]
    fn group_avg_applies_weights() {
        let v = reduce_group(&[1.0, 3.0], Some(&[1.0, 3.0]), Aggregation::Avg);
        assert_eq!(v, (1.0 + 3.0 * 3.0) / 4.0);
    }
}
