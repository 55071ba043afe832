/*
 * Created on Mon Jul 20 2020
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

//! Human-readable byte sizes, used by `Database::info()` and the cluster's
//! per-batch/per-table size accounting.

const SUFFIXES: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

pub fn humansize(nbytes: u64) -> String {
    if nbytes == 0 {
        return "0 B".to_owned();
    }

    let mut value = nbytes as f64;
    let mut i = 0;
    while value >= 1024.0 && i < SUFFIXES.len() - 1 {
        value /= 1024.0;
        i += 1;
    }

    let formatted = format!("{value:.2}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", SUFFIXES[i])
}

#[cfg(test)]
mod tests {
    use super::humansize;

    #[test]
    fn zero_bytes() {
        assert_eq!(humansize(0), "0 B");
    }

    #[test]
    fn rounds_and_trims() {
        assert_eq!(humansize(1024), "1 KB");
        assert_eq!(humansize(1536), "1.5 KB");
        assert_eq!(humansize(1024 * 1024 * 3), "3 MB");
    }
}
