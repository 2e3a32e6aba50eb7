use crate::IdValue;
use serde::{Deserialize, Serialize};

/// A contiguous block of assignable ids `[start, end]` with a cursor.
///
/// `cursor` holds the last assigned value, so a fresh range starts at
/// `start - 1` (which is why it is signed). The range is exhausted once
/// `cursor == end`, and the cursor never moves backwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableIds {
    pub start: IdValue,
    pub end: IdValue,
    pub cursor: i64,
}

impl AvailableIds {
    /// Creates an untouched range covering `start..=end`.
    pub fn new(start: IdValue, end: IdValue) -> Self {
        debug_assert!(start <= end);
        Self {
            start,
            end,
            cursor: i64::from(start) - 1,
        }
    }

    /// An already-exhausted range, used by local pools before their first
    /// replenishment.
    pub const fn empty() -> Self {
        Self {
            start: 0,
            end: 0,
            cursor: 0,
        }
    }

    pub fn has_room(&self) -> bool {
        self.cursor < i64::from(self.end)
    }

    /// Number of values not yet handed out.
    pub fn remaining(&self) -> u64 {
        if self.has_room() {
            (i64::from(self.end) - self.cursor) as u64
        } else {
            0
        }
    }

    /// Advances the cursor and returns the new value.
    pub fn take_next(&mut self) -> Option<IdValue> {
        if !self.has_room() {
            return None;
        }
        let next = IdValue::try_from(self.cursor + 1).ok()?;
        self.cursor += 1;
        Some(next)
    }

    /// Carves up to `count` values off the front of the range and returns
    /// them as a new, untouched range. A short remainder is handed out whole.
    pub fn carve(&mut self, count: u32) -> Option<Self> {
        if count == 0 || !self.has_room() {
            return None;
        }
        let first = self.cursor + 1;
        let last = (self.cursor + i64::from(count)).min(i64::from(self.end));
        let block = Self::new(
            IdValue::try_from(first).ok()?,
            IdValue::try_from(last).ok()?,
        );
        self.cursor = last;
        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_range_starts_before_first_value() {
        let range = AvailableIds::new(100, 101);
        assert_eq!(range.cursor, 99);
        assert_eq!(range.remaining(), 2);
    }

    #[test]
    fn range_starting_at_zero_is_representable() {
        let mut range = AvailableIds::new(0, 1);
        assert_eq!(range.cursor, -1);
        assert_eq!(range.take_next(), Some(0));
        assert_eq!(range.take_next(), Some(1));
        assert_eq!(range.take_next(), None);
        assert_eq!(range.cursor, 1);
    }

    #[test]
    fn empty_range_has_no_room() {
        let mut range = AvailableIds::empty();
        assert!(!range.has_room());
        assert_eq!(range.take_next(), None);
        assert_eq!(range.carve(4), None);
    }

    #[test]
    fn carve_takes_full_blocks_then_the_remainder() {
        let mut global = AvailableIds::new(100, 104);

        let first = global.carve(2).unwrap();
        assert_eq!(first, AvailableIds::new(100, 101));
        let second = global.carve(2).unwrap();
        assert_eq!(second, AvailableIds::new(102, 103));
        let tail = global.carve(2).unwrap();
        assert_eq!(tail, AvailableIds::new(104, 104));

        assert_eq!(global.carve(2), None);
        assert_eq!(global.cursor, 104);
    }

    #[test]
    fn single_value_block_yields_once() {
        let mut range = AvailableIds::new(7, 7);
        assert_eq!(range.take_next(), Some(7));
        assert!(!range.has_room());
    }
}
