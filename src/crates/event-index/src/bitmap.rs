//! Compressed bitmap for efficient set operations on event ids.

use roaring::RoaringTreemap;
use serde::{Deserialize, Serialize};

/// A compressed bitmap representing a set of 64-bit event ids.
///
/// Wraps [`RoaringTreemap`] and supports bitwise AND/OR/difference operations
/// for combining predicate hits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bitmap(pub RoaringTreemap);

impl Bitmap {
    /// Create an empty bitmap.
    pub fn new() -> Self {
        Self(RoaringTreemap::new())
    }

    /// Create a bitmap from a sorted iterator of event ids.
    pub fn from_sorted_iter<I: IntoIterator<Item = u64>>(
        iterator: I,
    ) -> Result<Bitmap, roaring::NonSortedIntegers> {
        RoaringTreemap::from_sorted_iter(iterator).map(Bitmap)
    }

    /// Create a bitmap containing all ids in the given range.
    pub fn insert_range<R>(range: R) -> Self
    where
        R: std::ops::RangeBounds<u64>,
    {
        let mut bitmap = Self::new();
        RoaringTreemap::insert_range(&mut bitmap, range);
        bitmap
    }

    /// Number of set bits.
    pub fn rank(&self) -> u64 {
        self.0.len()
    }

    /// Complement over the id domain `[0, len)`.
    pub fn flip_up_to(&self, len: u64) -> Bitmap {
        let mut all = RoaringTreemap::new();
        all.insert_range(0..len);
        Bitmap(all - &self.0)
    }
}

impl std::ops::Deref for Bitmap {
    type Target = RoaringTreemap;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for Bitmap {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<RoaringTreemap> for Bitmap {
    fn from(bitmap: RoaringTreemap) -> Self {
        Self(bitmap)
    }
}

impl From<Bitmap> for RoaringTreemap {
    fn from(wrapper: Bitmap) -> Self {
        wrapper.0
    }
}

impl FromIterator<u64> for Bitmap {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        Self(RoaringTreemap::from_iter(iter))
    }
}

impl std::ops::BitAndAssign<&Bitmap> for Bitmap {
    fn bitand_assign(&mut self, rhs: &Bitmap) {
        self.0 &= &rhs.0;
    }
}

impl std::ops::BitAndAssign<Bitmap> for Bitmap {
    fn bitand_assign(&mut self, rhs: Bitmap) {
        self.0 &= rhs.0;
    }
}

impl std::ops::BitOrAssign<&Bitmap> for Bitmap {
    fn bitor_assign(&mut self, rhs: &Bitmap) {
        self.0 |= &rhs.0;
    }
}

impl std::ops::BitOrAssign<Bitmap> for Bitmap {
    fn bitor_assign(&mut self, rhs: Bitmap) {
        self.0 |= rhs.0;
    }
}

impl std::ops::SubAssign<&Bitmap> for Bitmap {
    fn sub_assign(&mut self, rhs: &Bitmap) {
        self.0 -= &rhs.0;
    }
}

impl std::ops::BitAnd for &Bitmap {
    type Output = Bitmap;

    fn bitand(self, rhs: &Bitmap) -> Bitmap {
        Bitmap(&self.0 & &rhs.0)
    }
}

impl std::ops::BitAnd for Bitmap {
    type Output = Bitmap;

    fn bitand(self, rhs: Bitmap) -> Bitmap {
        Bitmap(self.0 & rhs.0)
    }
}

impl std::ops::BitOr for &Bitmap {
    type Output = Bitmap;

    fn bitor(self, rhs: &Bitmap) -> Bitmap {
        Bitmap(&self.0 | &rhs.0)
    }
}

impl std::ops::BitOr for Bitmap {
    type Output = Bitmap;

    fn bitor(self, rhs: Bitmap) -> Bitmap {
        Bitmap(self.0 | rhs.0)
    }
}

impl std::ops::Sub for &Bitmap {
    type Output = Bitmap;

    fn sub(self, rhs: &Bitmap) -> Bitmap {
        Bitmap(&self.0 - &rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_sorted_iter() {
        let bitmap = Bitmap::from_sorted_iter([0, 5, 10, 15]).expect("sorted iterator");

        assert_eq!(bitmap.rank(), 4);
        assert!(bitmap.contains(5));
        assert!(!bitmap.contains(6));
    }

    #[test]
    fn test_from_sorted_iter_rejects_unsorted() {
        let result = Bitmap::from_sorted_iter([10, 5, 15]);
        assert!(result.is_err());
    }

    #[test]
    fn test_insert_range() {
        let bitmap = Bitmap::insert_range(10..15);

        assert_eq!(bitmap.rank(), 5);
        assert!(bitmap.contains(10));
        assert!(bitmap.contains(14));
        assert!(!bitmap.contains(15));
    }

    #[test]
    fn test_bitwise_operations() {
        let bitmap1 = Bitmap::from_sorted_iter([1, 2, 3]).expect("sorted");
        let bitmap2 = Bitmap::from_sorted_iter([2, 3, 4]).expect("sorted");

        let intersection = &bitmap1 & &bitmap2;
        assert_eq!(intersection.rank(), 2);

        let mut union = bitmap1.clone();
        union |= bitmap2;
        assert_eq!(union.rank(), 4);
    }

    #[test]
    fn test_flip_up_to() {
        let bitmap = Bitmap::from_sorted_iter([1, 3]).expect("sorted");
        let flipped = bitmap.flip_up_to(5);
        assert_eq!(flipped.iter().collect::<Vec<_>>(), vec![0, 2, 4]);
    }
}
