//! Compact sets of request sequence numbers.
//!
//! Group outcomes are reported as runs of sequence numbers rather than full
//! lists: a group of ten thousand successful requests is reported as
//! `1~10000`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Error returned when parsing the text form of a [`RangeSet`].
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid range '{0}'")]
pub struct RangeSetParseError(pub String);

/// An ordered set of `u64` values stored as disjoint, non-adjacent inclusive runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSet {
    ranges: Vec<(u64, u64)>,
}

impl RangeSet {
    /// Create an empty set.
    pub const fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Add a value, merging it into adjacent runs.
    ///
    /// Returns `false` if the value was already present.
    pub fn add(&mut self, value: u64) -> bool {
        // index of the first run whose end is >= value - 1
        let idx = self
            .ranges
            .partition_point(|&(_, to)| to.saturating_add(1) < value);

        if let Some(&(from, to)) = self.ranges.get(idx) {
            if from <= value && value <= to {
                return false;
            }
            if to.saturating_add(1) == value {
                self.ranges[idx].1 = value;
                // join with the following run if the gap closed
                if let Some(&(next_from, next_to)) = self.ranges.get(idx + 1) {
                    if value.checked_add(1) == Some(next_from) {
                        self.ranges[idx].1 = next_to;
                        self.ranges.remove(idx + 1);
                    }
                }
                return true;
            }
            if value.saturating_add(1) == from {
                self.ranges[idx].0 = value;
                return true;
            }
        }

        self.ranges.insert(idx, (value, value));
        true
    }

    /// Whether the value is a member of the set.
    pub fn contains(&self, value: u64) -> bool {
        let idx = self.ranges.partition_point(|&(_, to)| to < value);
        self.ranges
            .get(idx)
            .is_some_and(|&(from, _)| from <= value)
    }

    /// Number of values in the set.
    pub fn len(&self) -> u64 {
        self.ranges.iter().map(|&(from, to)| (to - from).saturating_add(1)).sum()
    }

    /// Whether the set has no values.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// The inclusive runs making up the set, in ascending order.
    pub fn ranges(&self) -> &[(u64, u64)] {
        &self.ranges
    }

    /// Whether no value is in both sets.
    pub fn is_disjoint(&self, other: &Self) -> bool {
        let (mut a, mut b) = (self.ranges.iter().peekable(), other.ranges.iter().peekable());
        while let (Some(&&(a_from, a_to)), Some(&&(b_from, b_to))) = (a.peek(), b.peek()) {
            if a_to < b_from {
                a.next();
            } else if b_to < a_from {
                b.next();
            } else {
                return false;
            }
        }
        true
    }

    /// Iterate over every value in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.ranges.iter().flat_map(|&(from, to)| from..=to)
    }
}

impl FromIterator<u64> for RangeSet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        let mut set = Self::new();
        for value in iter {
            set.add(value);
        }
        set
    }
}

impl fmt::Display for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, &(from, to)) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if from == to {
                write!(f, "{from}")?;
            } else {
                write!(f, "{from}~{to}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for RangeSet {
    type Err = RangeSetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = Self::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let parse = |v: &str| {
                v.trim()
                    .parse::<u64>()
                    .map_err(|_| RangeSetParseError(part.to_string()))
            };
            let (from, to) = match part.split_once('~') {
                Some((from, to)) => (parse(from)?, parse(to)?),
                None => {
                    let v = parse(part)?;
                    (v, v)
                }
            };
            if from > to {
                return Err(RangeSetParseError(part.to_string()));
            }
            for value in from..=to {
                set.add(value);
            }
        }
        Ok(set)
    }
}

impl Serialize for RangeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RangeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_set_renders_empty() {
        let set = RangeSet::new();
        assert!(set.is_empty());
        assert_eq!(set.to_string(), "");
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_consecutive_values_merge() {
        let set: RangeSet = [1, 2, 3].into_iter().collect();
        assert_eq!(set.ranges(), &[(1, 3)]);
        assert_eq!(set.to_string(), "1~3");
    }

    #[test]
    fn test_gap_is_preserved() {
        let set: RangeSet = [1, 3].into_iter().collect();
        assert_eq!(set.to_string(), "1,3");
        assert!(!set.contains(2));
    }

    #[test]
    fn test_filling_gap_joins_runs() {
        let mut set: RangeSet = [1, 2, 4, 5].into_iter().collect();
        assert_eq!(set.ranges().len(), 2);
        assert!(set.add(3));
        assert_eq!(set.ranges(), &[(1, 5)]);
    }

    #[test]
    fn test_duplicate_add_returns_false() {
        let mut set = RangeSet::new();
        assert!(set.add(7));
        assert!(!set.add(7));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_out_of_order_inserts() {
        let set: RangeSet = [10, 2, 11, 1, 5].into_iter().collect();
        assert_eq!(set.to_string(), "1~2,5,10~11");
    }

    #[test]
    fn test_values_at_the_top_of_the_range() {
        let mut set: RangeSet = [u64::MAX - 3, u64::MAX - 1].into_iter().collect();
        assert!(set.add(u64::MAX));
        assert!(set.add(u64::MAX - 2));
        assert!(!set.add(u64::MAX));
        assert_eq!(set.to_string(), format!("{}~{}", u64::MAX - 3, u64::MAX));
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_parse_text_form() {
        let set: RangeSet = "1~3, 5".parse().unwrap();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![1, 2, 3, 5]);
        assert!("3~1".parse::<RangeSet>().is_err());
        assert!("x".parse::<RangeSet>().is_err());
    }

    proptest! {
        #[test]
        fn prop_runs_are_sorted_and_non_adjacent(values in proptest::collection::vec(0u64..200, 0..100)) {
            let set: RangeSet = values.iter().copied().collect();
            for window in set.ranges().windows(2) {
                prop_assert!(window[0].1 + 1 < window[1].0);
            }
            for &(from, to) in set.ranges() {
                prop_assert!(from <= to);
            }
        }

        #[test]
        fn prop_membership_matches_inputs(values in proptest::collection::vec(0u64..200, 0..100)) {
            let set: RangeSet = values.iter().copied().collect();
            let mut unique = values.clone();
            unique.sort_unstable();
            unique.dedup();
            prop_assert_eq!(set.len(), unique.len() as u64);
            for v in 0u64..200 {
                prop_assert_eq!(set.contains(v), unique.binary_search(&v).is_ok());
            }
        }
    }
}
