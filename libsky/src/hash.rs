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

//! Content hashing for manifests and the hash-chain (`##header.json` / `#header.json`,
//! see the storage manifest module in `server`). `HashAlgorithm` is stored verbatim in
//! a database's top-level manifest so a database created under one algorithm stays
//! readable without rehashing everything on open.

use std::{
    fmt, io,
    io::Read,
    path::Path,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => write!(f, "md5"),
            Self::Sha1 => write!(f, "sha1"),
            Self::Sha256 => write!(f, "sha256"),
        }
    }
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        Self::Sha256
    }
}

const BLOCKSIZE: usize = 64 * 1024;

/// Hash a string value the way the original's `get_hash` does (used for batch ids,
/// lock tokens and session identifiers rather than file content).
pub fn hash_str(value: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash a file's content under the given algorithm, streaming it in fixed-size blocks
/// so a multi-gigabyte field file never needs to be loaded whole.
pub fn hash_file(path: &Path, algorithm: HashAlgorithm) -> io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut buf = vec![0u8; BLOCKSIZE];
    match algorithm {
        HashAlgorithm::Md5 => {
            use md5::{Digest, Md5};
            let mut hasher = Md5::new();
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(hex::encode(hasher.finalize()))
        }
        HashAlgorithm::Sha1 => {
            use sha1::{Digest, Sha1};
            let mut hasher = Sha1::new();
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(hex::encode(hasher.finalize()))
        }
        HashAlgorithm::Sha256 => {
            use sha2::{Digest, Sha256};
            let mut hasher = Sha256::new();
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(hex::encode(hasher.finalize()))
        }
    }
}

/// Combine the per-table hashes of a batch into the batch's manifest hash. Defined as
/// `H(concat(table_hashes))`, matching the original's manifest format exactly (see
/// Open Question "hash-chain back-reference" in DESIGN.md) rather than chaining to
/// the previous batch's hash.
pub fn combine_hashes<'a>(hashes: impl Iterator<Item = &'a str>, algorithm: HashAlgorithm) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    for h in hashes {
        hasher.update(h.as_bytes());
    }
    match algorithm {
        HashAlgorithm::Sha256 => hex::encode(hasher.finalize()),
        // table-level hashes may use md5/sha1, but the batch-combining step always
        // uses sha256 regardless of the per-table algorithm: it hashes hex strings,
        // not file content.
        _ => hex::encode(hasher.finalize()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_str_is_stable() {
        assert_eq!(hash_str("loadit"), hash_str("loadit"));
        assert_ne!(hash_str("loadit"), hash_str("loadit2"));
    }

    #[test]
    fn combine_hashes_is_order_sensitive() {
        let a = combine_hashes(["aa", "bb"].into_iter(), HashAlgorithm::Sha256);
        let b = combine_hashes(["bb", "aa"].into_iter(), HashAlgorithm::Sha256);
        assert_ne!(a, b);
    }
}
