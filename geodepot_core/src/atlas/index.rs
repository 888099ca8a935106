//! Range seek over sorted tile origins.
//!
//! Grid atlases keep tile origins in sorted order, which lets a bounding-box
//! query start from a binary search instead of scanning the whole catalog.
//! The seek is padded by [`SEEK_PADDING`] so tiles whose origin lies below
//! the query edge but whose extent still reaches into the query are not
//! skipped. The padding must be at least as large as the largest tile
//! dimension in the atlas.

/// Padding applied to seek lower bounds, in CRS units.
pub const SEEK_PADDING: i64 = 20_000;

/// Index of the smallest key `k` in `keys` with `low <= k <= high`.
///
/// `keys` must be sorted ascending. Returns `None` when no key falls in the
/// range; in particular, when `low` is below the minimum key and `high`
/// covers it, index 0 is returned.
pub fn range_seek(keys: &[i64], low: i64, high: i64) -> Option<usize> {
	let idx = keys.partition_point(|&k| k < low);
	if idx < keys.len() && keys[idx] <= high { Some(idx) } else { None }
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	// smallest key in range wins
	#[case(&[0, 10, 20, 30], 5, 25, Some(1))]
	#[case(&[0, 10, 20, 30], 10, 10, Some(1))]
	// low below minimum, high covers it -> index 0
	#[case(&[0, 10, 20, 30], -100, 0, Some(0))]
	#[case(&[0, 10, 20, 30], -100, 500, Some(0))]
	// nothing in range
	#[case(&[0, 10, 20, 30], 31, 500, None)]
	#[case(&[0, 10, 20, 30], 11, 19, None)]
	#[case(&[0, 10, 20, 30], -10, -1, None)]
	#[case(&[], 0, 100, None)]
	fn seek_cases(#[case] keys: &[i64], #[case] low: i64, #[case] high: i64, #[case] expected: Option<usize>) {
		assert_eq!(range_seek(keys, low, high), expected);
	}

	#[test]
	fn returned_key_is_smallest_in_range() {
		let keys: Vec<i64> = (0..200).map(|i| i * 7).collect();
		for low in -20..1420 {
			for high in [low, low + 3, low + 50] {
				let expected = keys.iter().position(|&k| k >= low && k <= high);
				assert_eq!(range_seek(&keys, low, high), expected, "low={low} high={high}");
			}
		}
	}
}
