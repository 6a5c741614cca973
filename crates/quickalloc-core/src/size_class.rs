//! Size classes derived from a stepping policy.
//!
//! A class is a total block size (header included). The table is built once
//! from `(min_block_size, max_block_size, stepping)` and the allocator's
//! granule, then never changes. Every class is a multiple of the granule, so
//! consecutive blocks carved from an aligned start keep their payloads aligned.

use serde::{Deserialize, Serialize};

use crate::block::{FREE_LINK_SIZE, HEADER_SIZE};
use crate::error::{AllocError, AllocResult};

/// Upper bound on the number of classes a table holds.
pub const MAX_SIZE_CLASSES: usize = 4096;

/// How class sizes grow between the minimum and the maximum.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SteppingMethod {
    /// Constant additive step: `floor, 2*floor, 3*floor, ...`.
    ///
    /// The step widens to a coarser granule multiple when `floor` would
    /// produce more than [`MAX_SIZE_CLASSES`] classes.
    #[default]
    Linear,
    /// Doubling: `floor, 2*floor, 4*floor, ...`.
    Geometric,
}

impl SteppingMethod {
    /// Numeric code used by the C interface.
    #[must_use]
    pub const fn from_raw(raw: usize) -> Option<Self> {
        match raw {
            0 => Some(Self::Linear),
            1 => Some(Self::Geometric),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_raw(self) -> usize {
        match self {
            Self::Linear => 0,
            Self::Geometric => 1,
        }
    }

    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" | "lin" | "additive" | "0" => Some(Self::Linear),
            "geometric" | "geo" | "doubling" | "pow2" | "1" => Some(Self::Geometric),
            _ => None,
        }
    }

    fn next(self, size: usize, step: usize) -> Option<usize> {
        match self {
            Self::Linear => size.checked_add(step),
            Self::Geometric => size.checked_mul(2),
        }
    }
}

/// Describes a single size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SizeClass {
    /// Position in the table.
    pub index: usize,
    /// Total block size, header included.
    pub block_size: usize,
    /// Bytes usable by the caller.
    pub payload_capacity: usize,
}

/// Immutable, strictly increasing table of block sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeClassTable {
    sizes: Vec<usize>,
    granule: usize,
}

/// Round `value` up to a multiple of `align` (power of two).
#[inline]
pub(crate) const fn round_up(value: usize, align: usize) -> Option<usize> {
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

impl SizeClassTable {
    /// Builds the table.
    ///
    /// The smallest class is `min_block_size` rounded up to the granule (and
    /// never smaller than a header plus a free-list link). The largest class
    /// is the first granule multiple that holds `max_block_size` payload bytes.
    pub fn build(
        min_block_size: usize,
        max_block_size: usize,
        stepping: SteppingMethod,
        granule: usize,
    ) -> AllocResult<Self> {
        if min_block_size == 0 || max_block_size == 0 {
            return Err(AllocError::invalid_config(
                "min_block_size and max_block_size must be non-zero",
            ));
        }
        if min_block_size > max_block_size {
            return Err(AllocError::invalid_config(format!(
                "min_block_size ({min_block_size}) exceeds max_block_size ({max_block_size})"
            )));
        }
        if !granule.is_power_of_two() {
            return Err(AllocError::invalid_config(format!(
                "granule {granule} is not a power of two"
            )));
        }

        let overflow = || AllocError::invalid_config("size class computation overflows usize");
        let floor = round_up(min_block_size.max(HEADER_SIZE + FREE_LINK_SIZE), granule)
            .ok_or_else(overflow)?;
        let top = max_block_size
            .checked_add(HEADER_SIZE)
            .and_then(|v| round_up(v, granule))
            .ok_or_else(overflow)?
            .max(floor);

        // At most MAX_SIZE_CLASSES - 1 steps fit below `top`.
        let span = (top - floor).div_ceil(MAX_SIZE_CLASSES - 1);
        let step = round_up(span, granule).ok_or_else(overflow)?.max(floor);

        let mut sizes = Vec::new();
        let mut size = floor;
        while size < top {
            sizes.push(size);
            match stepping.next(size, step) {
                Some(next) => size = next,
                None => break,
            }
        }
        sizes.push(top);

        Ok(Self { sizes, granule })
    }

    /// Index of the smallest class able to hold `payload` bytes.
    ///
    /// Returns `None` when the request (plus header) exceeds the largest class.
    #[must_use]
    pub fn class_for(&self, payload: usize) -> Option<usize> {
        let total = payload.checked_add(HEADER_SIZE)?;
        let idx = self.sizes.partition_point(|&size| size < total);
        (idx < self.sizes.len()).then_some(idx)
    }

    /// Total block size of class `index`. Returns 0 for out-of-range indices.
    #[must_use]
    pub fn block_size(&self, index: usize) -> usize {
        self.sizes.get(index).copied().unwrap_or(0)
    }

    /// Payload bytes of class `index`. Returns 0 for out-of-range indices.
    #[must_use]
    pub fn payload_capacity(&self, index: usize) -> usize {
        self.block_size(index).saturating_sub(HEADER_SIZE)
    }

    /// Largest payload any class can serve.
    #[must_use]
    pub fn max_payload(&self) -> usize {
        self.payload_capacity(self.sizes.len() - 1)
    }

    /// Largest total block size.
    #[must_use]
    pub fn largest_block(&self) -> usize {
        self.sizes[self.sizes.len() - 1]
    }

    #[must_use]
    pub fn granule(&self) -> usize {
        self.granule
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    /// Iterates the classes in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = SizeClass> + '_ {
        self.sizes.iter().enumerate().map(|(index, &block_size)| SizeClass {
            index,
            block_size,
            payload_capacity: block_size - HEADER_SIZE,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_full_align_defaults() {
        let table = SizeClassTable::build(256, 64 * 1024, SteppingMethod::Linear, 256).unwrap();
        assert_eq!(table.block_size(0), 256);
        assert_eq!(table.block_size(1), 512);
        // 64 KiB payload + header rounds to 64 KiB + 256.
        assert_eq!(table.largest_block(), 64 * 1024 + 256);
        assert_eq!(table.len(), 257);
        assert!(table.max_payload() >= 64 * 1024);
    }

    #[test]
    fn test_geometric_doubles() {
        let table = SizeClassTable::build(32, 4096, SteppingMethod::Geometric, 16).unwrap();
        let sizes: Vec<usize> = table.iter().map(|c| c.block_size).collect();
        assert_eq!(sizes, vec![32, 64, 128, 256, 512, 1024, 2048, 4096, 4112]);
    }

    #[test]
    fn test_classes_strictly_increasing_and_granular() {
        for stepping in [SteppingMethod::Linear, SteppingMethod::Geometric] {
            for granule in [16, 64, 256] {
                let table = SizeClassTable::build(40, 10_000, stepping, granule).unwrap();
                let sizes: Vec<usize> = table.iter().map(|c| c.block_size).collect();
                for pair in sizes.windows(2) {
                    assert!(pair[1] > pair[0], "{stepping:?}/{granule}: {pair:?}");
                }
                assert!(sizes.iter().all(|s| s % granule == 0));
                assert!(table.max_payload() >= 10_000);
            }
        }
    }

    #[test]
    fn test_floor_never_below_header_and_link() {
        let table = SizeClassTable::build(1, 100, SteppingMethod::Linear, 16).unwrap();
        assert!(table.block_size(0) >= HEADER_SIZE + FREE_LINK_SIZE);
        assert!(table.payload_capacity(0) >= FREE_LINK_SIZE);
    }

    #[test]
    fn test_class_for_rounds_up() {
        let table = SizeClassTable::build(256, 4096, SteppingMethod::Linear, 256).unwrap();
        assert_eq!(table.class_for(1), Some(0));
        assert_eq!(table.class_for(256 - HEADER_SIZE), Some(0));
        assert_eq!(table.class_for(256 - HEADER_SIZE + 1), Some(1));
        assert_eq!(table.class_for(100), Some(0));
        assert_eq!(table.class_for(200), Some(0));
        assert_eq!(table.class_for(300), Some(1));
    }

    #[test]
    fn test_class_for_out_of_range() {
        let table = SizeClassTable::build(256, 4096, SteppingMethod::Linear, 256).unwrap();
        assert_eq!(table.class_for(table.max_payload()), Some(table.len() - 1));
        assert_eq!(table.class_for(table.max_payload() + 1), None);
        assert_eq!(table.class_for(usize::MAX), None);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(SizeClassTable::build(0, 10, SteppingMethod::Linear, 16).is_err());
        assert!(SizeClassTable::build(10, 0, SteppingMethod::Linear, 16).is_err());
        assert!(SizeClassTable::build(100, 10, SteppingMethod::Linear, 16).is_err());
        assert!(SizeClassTable::build(16, 100, SteppingMethod::Linear, 24).is_err());
    }

    #[test]
    fn test_fine_granule_linear_widens_step() {
        let table = SizeClassTable::build(16, 131_072, SteppingMethod::Linear, 16).unwrap();
        assert!(table.len() <= MAX_SIZE_CLASSES);
        assert_eq!(table.block_size(0), 32);
        assert_eq!(table.block_size(1) - table.block_size(0), 48);
        assert_eq!(table.largest_block(), 131_088);
        let sizes: Vec<usize> = table.iter().map(|c| c.block_size).collect();
        assert!(sizes.windows(2).all(|pair| pair[1] > pair[0]));
        assert!(sizes.iter().all(|s| s % 16 == 0));
        assert!(table.class_for(131_072).is_some());
    }

    #[test]
    fn test_huge_range_stays_bounded() {
        for stepping in [SteppingMethod::Linear, SteppingMethod::Geometric] {
            let table = SizeClassTable::build(16, 1 << 30, stepping, 16).unwrap();
            assert!(table.len() <= MAX_SIZE_CLASSES, "{stepping:?}");
            assert!(table.max_payload() >= 1 << 30);
        }
    }

    #[test]
    fn test_min_equals_max() {
        let table = SizeClassTable::build(512, 512, SteppingMethod::Linear, 256).unwrap();
        assert_eq!(table.block_size(0), 512);
        assert_eq!(table.largest_block(), 768);
        assert_eq!(table.class_for(512), Some(1));
    }

    #[test]
    fn test_out_of_range_index() {
        let table = SizeClassTable::build(256, 1024, SteppingMethod::Linear, 256).unwrap();
        assert_eq!(table.block_size(table.len()), 0);
        assert_eq!(table.payload_capacity(999), 0);
    }

    #[test]
    fn test_stepping_codes() {
        assert_eq!(SteppingMethod::from_raw(0), Some(SteppingMethod::Linear));
        assert_eq!(SteppingMethod::from_raw(1), Some(SteppingMethod::Geometric));
        assert_eq!(SteppingMethod::from_raw(2), None);
        assert_eq!(
            SteppingMethod::from_str_loose("Geometric"),
            Some(SteppingMethod::Geometric)
        );
        assert_eq!(SteppingMethod::from_str_loose("bogus"), None);
        for m in [SteppingMethod::Linear, SteppingMethod::Geometric] {
            assert_eq!(SteppingMethod::from_raw(m.as_raw()), Some(m));
        }
    }
}
