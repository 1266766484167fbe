//! Identifier ranges and the absolute bounds of each identifier namespace.
//!
//! Ranges are written as `"min:max"` in configuration and are closed
//! intervals. Both endpoints must fall inside the namespace bounds.

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Absolute bounds of an identifier namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdBounds {
    pub kind: &'static str,
    pub min: u32,
    pub max: u32,
}

/// ISIDs are 24-bit service identifiers.
pub const ISID_BOUNDS: IdBounds = IdBounds {
    kind: "isid",
    min: 0,
    max: 16_777_215,
};

/// Usable 802.1Q VLAN tags.
pub const VLAN_BOUNDS: IdBounds = IdBounds {
    kind: "vlan",
    min: 1,
    max: 4094,
};

impl IdBounds {
    pub fn contains(&self, id: u32) -> bool {
        self.min <= id && id <= self.max
    }
}

/// A closed interval `[min, max]` of identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    pub min: u32,
    pub max: u32,
}

impl IdRange {
    /// Build a range, checking ordering and namespace bounds.
    pub fn new(min: u32, max: u32, bounds: IdBounds) -> ConfigResult<Self> {
        let invalid = |reason: String| ConfigError::InvalidRange {
            kind: bounds.kind.to_string(),
            range: format!("{min}:{max}"),
            reason,
        };
        for id in [min, max] {
            if !bounds.contains(id) {
                return Err(invalid(format!(
                    "{id} is not a valid {} identifier",
                    bounds.kind
                )));
            }
        }
        if max < min {
            return Err(invalid(format!(
                "end of {} range is less than start",
                bounds.kind
            )));
        }
        Ok(Self { min, max })
    }

    /// Parse a `"min:max"` entry.
    pub fn parse(entry: &str, bounds: IdBounds) -> ConfigResult<Self> {
        let entry = entry.trim();
        let invalid = |reason: &str| ConfigError::InvalidRange {
            kind: bounds.kind.to_string(),
            range: entry.to_string(),
            reason: reason.to_string(),
        };
        let (min, max) = entry
            .split_once(':')
            .ok_or_else(|| invalid("expected <min>:<max>"))?;
        let min = min
            .trim()
            .parse::<u32>()
            .map_err(|e| invalid(&e.to_string()))?;
        let max = max
            .trim()
            .parse::<u32>()
            .map_err(|e| invalid(&e.to_string()))?;
        Self::new(min, max, bounds)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.min <= id && id <= self.max
    }

    /// Number of identifiers in the range.
    pub fn count(&self) -> u64 {
        u64::from(self.max - self.min) + 1
    }

    pub fn ids(&self) -> RangeInclusive<u32> {
        self.min..=self.max
    }
}

impl fmt::Display for IdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.min, self.max)
    }
}

/// Parse a list of `"min:max"` entries. Any invalid entry fails the whole list.
pub fn parse_ranges<S: AsRef<str>>(entries: &[S], bounds: IdBounds) -> ConfigResult<Vec<IdRange>> {
    entries
        .iter()
        .map(|entry| IdRange::parse(entry.as_ref(), bounds))
        .collect()
}

/// Whether `id` falls inside any of `ranges`.
pub fn in_ranges(ranges: &[IdRange], id: u32) -> bool {
    ranges.iter().any(|r| r.contains(id))
}

/// Sorted, non-overlapping cover of `ranges`. Adjacent ranges are joined.
pub fn merge_ranges(ranges: &[IdRange]) -> Vec<IdRange> {
    let mut sorted = ranges.to_vec();
    sorted.sort_by_key(|r| r.min);
    let mut merged: Vec<IdRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match merged.last_mut() {
            Some(last) if u64::from(range.min) <= u64::from(last.max) + 1 => {
                last.max = last.max.max(range.max);
            }
            _ => merged.push(range),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_range() {
        let range = IdRange::parse(" 100 : 109 ", ISID_BOUNDS).unwrap();
        assert_eq!(range, IdRange { min: 100, max: 109 });
        assert_eq!(range.count(), 10);
        assert_eq!(range.to_string(), "100:109");
    }

    #[test]
    fn single_id_range() {
        let range = IdRange::parse("5:5", VLAN_BOUNDS).unwrap();
        assert_eq!(range.count(), 1);
        assert!(range.contains(5));
        assert!(!range.contains(6));
    }

    #[test]
    fn reversed_range_rejected() {
        let err = IdRange::parse("20:10", ISID_BOUNDS).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRange { .. }));
        assert!(err.to_string().contains("less than start"));
    }

    #[test]
    fn out_of_bounds_rejected() {
        assert!(IdRange::parse("0:16777216", ISID_BOUNDS).is_err());
        assert!(IdRange::parse("0:10", VLAN_BOUNDS).is_err());
        assert!(IdRange::parse("4000:4095", VLAN_BOUNDS).is_err());
        assert!(IdRange::parse("0:16777215", ISID_BOUNDS).is_ok());
    }

    #[test]
    fn malformed_entries_rejected() {
        assert!(IdRange::parse("100", ISID_BOUNDS).is_err());
        assert!(IdRange::parse("a:b", ISID_BOUNDS).is_err());
        assert!(IdRange::parse("1:2:3", ISID_BOUNDS).is_err());
    }

    #[test]
    fn parse_list_fails_on_any_bad_entry() {
        let ok = parse_ranges(&["1:10", "20:30"], ISID_BOUNDS).unwrap();
        assert_eq!(ok.len(), 2);
        assert!(in_ranges(&ok, 25));
        assert!(!in_ranges(&ok, 15));

        assert!(parse_ranges(&["1:10", "30:20"], ISID_BOUNDS).is_err());
    }

    #[test]
    fn merge_overlapping_and_adjacent() {
        let r = |min, max| IdRange { min, max };
        assert_eq!(
            merge_ranges(&[r(30, 40), r(1, 10), r(5, 12), r(13, 20), r(50, 50)]),
            vec![r(1, 20), r(30, 40), r(50, 50)]
        );
        assert!(merge_ranges(&[]).is_empty());
    }
}
