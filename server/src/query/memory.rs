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

//! Memory-capped batching: a query that would need to materialize more than
//! `max_memory` bytes at once is either rejected (level 0/1, where there is no
//! incremental reduction to fall back on) or split into LID batches that are
//! reduced into a running level-2 aggregate one batch at a time.

use libsky::error::{LoaditError, LoaditResult};

/// Bytes needed to hold one level-0 "load case" (one LID, every requested ID, every
/// requested level-0 field) at the given element size.
pub fn size_per_lid(n_fields: usize, n_ids: usize, elem_size: usize) -> usize {
    n_fields * n_ids * elem_size
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPlan {
    /// The whole query fits in the memory budget: read every LID at once.
    Whole,
    /// Split the LID axis into chunks of at most `chunk_lids` LIDs, reducing a
    /// running level-2 aggregate across chunks.
    Batched { chunk_lids: usize },
}

/// Decide how to execute a query whose working set is `size_per_lid * n_lids_queried`
/// bytes against a `max_memory` byte budget. `query_level` is the minimum aggregation
/// level across every field in the request — all fields in a query share a level.
pub fn plan(size_per_lid: usize, n_lids_queried: usize, max_memory: usize, query_level: u8) -> LoaditResult<BatchPlan> {
    let total = size_per_lid.saturating_mul(n_lids_queried);
    if total <= max_memory {
        return Ok(BatchPlan::Whole);
    }
    if query_level < 2 {
        return Err(LoaditError::OutOfMemory(format!(
            "query would need {total} bytes (budget {max_memory}); only level-2 (LID-aggregated) queries can be batched"
        )));
    }
    let chunk_lids = (max_memory / size_per_lid.max(1)).max(1);
    Ok(BatchPlan::Batched { chunk_lids })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_within_budget_runs_whole() {
        assert_eq!(plan(100, 10, 10_000, 0).unwrap(), BatchPlan::Whole);
    }

    #[test]
    fn level_below_two_over_budget_is_rejected() {
        assert!(plan(100, 1000, 1000, 1).is_err());
    }

    #[test]
    fn level_two_over_budget_splits_into_chunks() {
        let p = plan(100, 1000, 1000, 2).unwrap();
        assert_eq!(p, BatchPlan::Batched { chunk_lids: 10 });
    }
}
