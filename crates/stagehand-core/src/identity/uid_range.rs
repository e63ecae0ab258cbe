//! User-namespace UID/GID shift ranges.

use std::fmt;
use std::str::FromStr;

use stagehand_common::error::{Result, StagehandError};

/// Contiguous block of host ids that container ids `0..count` are shifted onto.
///
/// The blank range (`shift == 0` or `count == 0`) means ids are not shifted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UidRange {
    /// First host id of the block.
    pub shift: u32,
    /// Number of ids in the block.
    pub count: u32,
}

impl UidRange {
    /// Creates a range.
    #[must_use]
    pub const fn new(shift: u32, count: u32) -> Self {
        Self { shift, count }
    }

    /// Returns `true` if ids are shifted.
    #[must_use]
    pub const fn is_defined(&self) -> bool {
        self.shift != 0 && self.count != 0
    }

    /// Maps a host-visible id back to the id seen inside the namespace.
    ///
    /// # Errors
    ///
    /// Returns [`StagehandError::IdOutOfRange`] if the id is outside the range.
    pub fn unshift(&self, id: u32) -> Result<u32> {
        if !self.is_defined() {
            return Ok(id);
        }
        let end = u64::from(self.shift) + u64::from(self.count);
        if id < self.shift || u64::from(id) >= end {
            return Err(StagehandError::IdOutOfRange {
                id,
                range: self.to_string(),
            });
        }
        Ok(id - self.shift)
    }
}

impl fmt::Display for UidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.shift, self.count)
    }
}

impl FromStr for UidRange {
    type Err = StagehandError;

    /// Parses `shift:count`; an empty string is the blank range.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::default());
        }
        let invalid = || StagehandError::config(format!("invalid uid range {s:?}, expected SHIFT:COUNT"));
        let (shift, count) = s.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            shift: shift.parse().map_err(|_| invalid())?,
            count: count.parse().map_err(|_| invalid())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_range_passes_ids_through() {
        let range: UidRange = "".parse().unwrap();
        assert!(!range.is_defined());
        assert_eq!(range.unshift(1234).unwrap(), 1234);
    }

    #[test]
    fn unshift_inside_range() {
        let range: UidRange = "100000:65536".parse().unwrap();
        assert_eq!(range.unshift(100_000).unwrap(), 0);
        assert_eq!(range.unshift(101_000).unwrap(), 1000);
    }

    #[test]
    fn unshift_outside_range_fails() {
        let range = UidRange::new(100_000, 65536);
        assert!(range.unshift(0).is_err());
        assert!(range.unshift(165_536).is_err());
    }

    #[test]
    fn rejects_malformed_spec() {
        assert!("100000".parse::<UidRange>().is_err());
        assert!("a:b".parse::<UidRange>().is_err());
    }
}
