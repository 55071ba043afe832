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

//! The field expression grammar: `[ABS(]BASE[-AGG1[-AGG2]][)]`.

use libsky::error::{LoaditError, LoaditResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Avg,
    Max,
    Min,
    AbsAvg,
    AbsMax,
    AbsMin,
}

impl Aggregation {
    fn parse(token: &str) -> LoaditResult<Self> {
        match token {
            "AVG" => Ok(Self::Avg),
            "MAX" => Ok(Self::Max),
            "MIN" => Ok(Self::Min),
            "ABS(AVG)" => Ok(Self::AbsAvg),
            "ABS(MAX)" => Ok(Self::AbsMax),
            "ABS(MIN)" => Ok(Self::AbsMin),
            other => Err(LoaditError::InvalidQuery(format!("unknown aggregation '{other}'"))),
        }
    }

    pub fn is_avg(self) -> bool {
        matches!(self, Self::Avg | Self::AbsAvg)
    }

    pub fn takes_abs(self) -> bool {
        matches!(self, Self::AbsAvg | Self::AbsMax | Self::AbsMin)
    }

    pub fn is_max(self) -> bool {
        matches!(self, Self::Max | Self::AbsMax)
    }
}

#[derive(Debug, Clone)]
pub struct FieldExpr {
    pub raw: String,
    pub outer_abs: bool,
    pub base: String,
    pub agg1: Option<Aggregation>,
    pub agg2: Option<Aggregation>,
}

impl FieldExpr {
    /// Aggregation level: 0 (raw), 1 (across IDs within a group), 2 (across IDs
    /// then across LIDs).
    pub fn level(&self) -> u8 {
        match (self.agg1, self.agg2) {
            (None, None) => 0,
            (Some(_), None) => 1,
            (Some(_), Some(_)) => 2,
        }
    }

    pub fn parse(token: &str) -> LoaditResult<Self> {
        let raw = token.to_owned();
        let (outer_abs, inner) = if let Some(stripped) = token.strip_prefix("ABS(").and_then(|s| s.strip_suffix(')')) {
            (true, stripped)
        } else {
            (false, token)
        };

        let parts: Vec<&str> = inner.split('-').collect();
        if parts.is_empty() || parts[0].is_empty() {
            return Err(LoaditError::InvalidQuery(format!("empty field expression '{token}'")));
        }

        let base = parts[0].to_owned();
        let agg1 = parts.get(1).map(|s| Aggregation::parse(s)).transpose()?;
        let agg2 = parts.get(2).map(|s| Aggregation::parse(s)).transpose()?;
        if parts.len() > 3 {
            return Err(LoaditError::InvalidQuery(format!("too many aggregation levels in '{token}'")));
        }
        if agg2 == Some(Aggregation::Avg) || agg2 == Some(Aggregation::AbsAvg) {
            return Err(LoaditError::InvalidQuery(format!(
                "AVG is not meaningful at level 2 (across LIDs) in '{token}'"
            )));
        }

        Ok(Self { raw, outer_abs, base, agg1, agg2 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_raw_field() {
        let e = FieldExpr::parse("NX").unwrap();
        assert_eq!(e.level(), 0);
        assert_eq!(e.base, "NX");
    }

    #[test]
    fn parses_level1_group_avg() {
        let e = FieldExpr::parse("NX-AVG").unwrap();
        assert_eq!(e.level(), 1);
        assert!(e.agg1.unwrap().is_avg());
    }

    #[test]
    fn parses_level2_max_with_outer_abs() {
        let e = FieldExpr::parse("ABS(NX-AVG-MAX)").unwrap();
        assert!(e.outer_abs);
        assert_eq!(e.level(), 2);
        assert!(e.agg2.unwrap().is_max());
    }

    #[test]
    fn rejects_avg_at_level_two() {
        assert!(FieldExpr::parse("NX-MAX-AVG").is_err());
    }
}
