//! User-facing offset descriptors

/// A requested position in a partition.
///
/// An `Offset` describes where consumption should begin; the consumer core
/// resolves it into a concrete position through list-offsets or
/// offset-for-leader-epoch requests as needed. All builder methods return a
/// modified copy.
///
/// ```
/// use windlass::Offset;
///
/// // 100 records before the end of the partition:
/// let offset = Offset::new().at_end().relative(-100);
///
/// // Exactly offset 5000, with truncation detection against epoch 7:
/// let offset = Offset::new().at(5000).with_epoch(7);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offset {
    pub(crate) at: i64,
    pub(crate) relative: i64,
    pub(crate) epoch: i32,
    // Stamped from metadata while mapping loads to brokers; never
    // user-visible.
    pub(crate) current_epoch: i32,
}

impl Offset {
    /// An offset that begins at the end of a partition, with truncation
    /// detection disabled.
    pub fn new() -> Offset {
        Offset {
            at: -1,
            relative: 0,
            epoch: -1,
            current_epoch: -1,
        }
    }

    /// A copy beginning at the start of the partition
    pub fn at_start(mut self) -> Offset {
        self.at = -2;
        self
    }

    /// A copy beginning at the end of the partition
    pub fn at_end(mut self) -> Offset {
        self.at = -1;
        self
    }

    /// A copy beginning exactly at `at`.
    ///
    /// `-2` and `-1` are accepted as the start and end sentinels, equivalent
    /// to [`Offset::at_start`] and [`Offset::at_end`]. Anything below `-2`
    /// is bounded to `-2`.
    pub fn at(mut self, at: i64) -> Offset {
        self.at = at.max(-2);
        self
    }

    /// A copy shifted `n` relative to what it currently is. Beginning at the
    /// end with `relative(-100)` begins 100 before the end.
    pub fn relative(mut self, n: i64) -> Offset {
        self.relative = n;
        self
    }

    /// A copy using epoch `e` for truncation detection; negative epochs
    /// normalize to `-1`, which disables the detection.
    pub fn with_epoch(mut self, e: i32) -> Offset {
        self.epoch = e.max(-1);
        self
    }
}

impl Default for Offset {
    fn default() -> Self {
        Offset::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_end_without_epoch() {
        let o = Offset::new();
        assert_eq!(o.at, -1);
        assert_eq!(o.relative, 0);
        assert_eq!(o.epoch, -1);
    }

    #[test]
    fn test_at_bounds_below_start() {
        assert_eq!(Offset::new().at(-3).at, -2);
        assert_eq!(Offset::new().at(-100).at, -2);
        assert_eq!(Offset::new().at(-2).at, -2);
        assert_eq!(Offset::new().at(0).at, 0);
        assert_eq!(Offset::new().at(12345).at, 12345);
    }

    #[test]
    fn test_with_epoch_normalizes_negative() {
        assert_eq!(Offset::new().with_epoch(-5).epoch, -1);
        assert_eq!(Offset::new().with_epoch(-1).epoch, -1);
        assert_eq!(Offset::new().with_epoch(0).epoch, 0);
        assert_eq!(Offset::new().with_epoch(9).epoch, 9);
    }

    #[test]
    fn test_builders_do_not_mutate_original() {
        let base = Offset::new().at(10);
        let shifted = base.relative(5);
        assert_eq!(base.relative, 0);
        assert_eq!(shifted.relative, 5);
        assert_eq!(shifted.at, 10);
    }
}
