//! Fixed 32x32 cell bitmask.

use serde::{Deserialize, Serialize};

use crate::address::{SUB_GRID_TREE_DIMENSION, cell_position};

const DIM: usize = SUB_GRID_TREE_DIMENSION as usize;

/// One bit per cell of a leaf tile. Row `x` holds bit `y`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SubGridBitmask {
    rows: [u32; DIM],
}

impl std::fmt::Debug for SubGridBitmask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubGridBitmask")
            .field("count", &self.count())
            .finish()
    }
}

impl SubGridBitmask {
    /// A mask with no bits set.
    #[must_use]
    pub const fn empty() -> Self {
        Self { rows: [0; DIM] }
    }

    /// A mask with every bit set.
    #[must_use]
    pub const fn full() -> Self {
        Self {
            rows: [u32::MAX; DIM],
        }
    }

    /// Builds a mask from raw rows.
    #[must_use]
    pub const fn from_rows(rows: [u32; DIM]) -> Self {
        Self { rows }
    }

    /// Returns the raw rows.
    #[must_use]
    pub const fn rows(&self) -> &[u32; DIM] {
        &self.rows
    }

    /// Returns bit `(x, y)`.
    #[must_use]
    pub const fn get(&self, x: u32, y: u32) -> bool {
        self.rows[x as usize] & (1 << y) != 0
    }

    /// Sets bit `(x, y)`.
    pub fn set(&mut self, x: u32, y: u32) {
        self.rows[x as usize] |= 1 << y;
    }

    /// Clears bit `(x, y)`.
    pub fn clear(&mut self, x: u32, y: u32) {
        self.rows[x as usize] &= !(1 << y);
    }

    /// Sets or clears bit `(x, y)`.
    pub fn set_value(&mut self, x: u32, y: u32, value: bool) {
        if value {
            self.set(x, y);
        } else {
            self.clear(x, y);
        }
    }

    /// Sets the bit for flattened cell index `index`.
    pub fn set_index(&mut self, index: usize) {
        let (x, y) = cell_position(index);
        self.set(x, y);
    }

    /// Returns the intersection of two masks.
    #[must_use]
    pub fn and(&self, other: &Self) -> Self {
        let mut rows = self.rows;
        for (row, o) in rows.iter_mut().zip(other.rows.iter()) {
            *row &= *o;
        }
        Self { rows }
    }

    /// Returns the union of two masks.
    #[must_use]
    pub fn or(&self, other: &Self) -> Self {
        let mut rows = self.rows;
        for (row, o) in rows.iter_mut().zip(other.rows.iter()) {
            *row |= *o;
        }
        Self { rows }
    }

    /// Returns the bits of `self` not set in `other`.
    #[must_use]
    pub fn and_not(&self, other: &Self) -> Self {
        let mut rows = self.rows;
        for (row, o) in rows.iter_mut().zip(other.rows.iter()) {
            *row &= !*o;
        }
        Self { rows }
    }

    /// Number of set bits.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.rows.iter().map(|r| r.count_ones()).sum()
    }

    /// True if no bit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|r| *r == 0)
    }

    /// True if every bit is set.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.rows.iter().all(|r| *r == u32::MAX)
    }

    /// Iterates the set bits as `(x, y)` in row-major order.
    pub fn iter_set(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.rows.iter().enumerate().flat_map(|(x, row)| {
            let row = *row;
            (0..SUB_GRID_TREE_DIMENSION)
                .filter(move |y| row & (1 << y) != 0)
                .map(move |y| (u32::try_from(x).unwrap_or(0), y))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_clear() {
        let mut mask = SubGridBitmask::empty();
        mask.set(2, 2);
        mask.set(31, 31);
        assert!(mask.get(2, 2));
        assert!(!mask.get(2, 3));
        assert_eq!(mask.count(), 2);

        mask.clear(2, 2);
        assert_eq!(mask.iter_set().collect::<Vec<_>>(), vec![(31, 31)]);
    }

    #[test]
    fn test_set_algebra() {
        let mut a = SubGridBitmask::empty();
        a.set(0, 0);
        a.set(1, 1);
        let mut b = SubGridBitmask::empty();
        b.set(1, 1);

        assert_eq!(a.and(&b).count(), 1);
        assert_eq!(a.and_not(&b).iter_set().collect::<Vec<_>>(), vec![(0, 0)]);
        assert_eq!(a.or(&b).count(), 2);
        assert!(SubGridBitmask::full().is_full());
        assert_eq!(SubGridBitmask::full().count(), 1024);
    }
}
