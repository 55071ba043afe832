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

//! Little-endian, endianness-tagged dtype codes (`<f4`, `<f8`, `<i8`), exactly as
//! written into table manifests. The engine always runs on little-endian
//! hosts in practice but the tag is carried on disk regardless, matching the
//! original's `sys.byteorder`-derived format string.

use libsky::error::LoaditError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dtype {
    F4,
    F8,
    I8,
}

impl Dtype {
    pub fn code(self) -> &'static str {
        match self {
            Self::F4 => "<f4",
            Self::F8 => "<f8",
            Self::I8 => "<i8",
        }
    }

    pub fn size(self) -> usize {
        match self {
            Self::F4 => 4,
            Self::F8 => 8,
            Self::I8 => 8,
        }
    }

    pub fn from_code(code: &str) -> Result<Self, LoaditError> {
        match code {
            "<f4" => Ok(Self::F4),
            "<f8" => Ok(Self::F8),
            "<i8" => Ok(Self::I8),
            other => Err(LoaditError::InvalidSchema(format!("unsupported dtype code: {other}"))),
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl serde::Serialize for Dtype {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.code())
    }
}

impl<'de> serde::Deserialize<'de> for Dtype {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Dtype::from_code(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_codes() {
        for d in [Dtype::F4, Dtype::F8, Dtype::I8] {
            assert_eq!(Dtype::from_code(d.code()).unwrap(), d);
        }
    }

    #[test]
    fn rejects_unknown_code() {
        assert!(Dtype::from_code("<u2").is_err());
    }
}
