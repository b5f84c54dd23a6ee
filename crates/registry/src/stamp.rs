//! Content stamps validating the binary cache.
//!
//! The stamp is the XOR-fold of `last_modified + bundle_id` across every
//! bundle contributing a manifest. A zero stamp disables checking and
//! matches any cache.

use std::path::Path;
use std::time::UNIX_EPOCH;

use tracing::debug;

use crate::object::BundleId;

/// Folds `(bundle id, last-modified)` pairs into a content stamp.
pub fn fold(manifests: impl IntoIterator<Item = (BundleId, i64)>) -> i64 {
	manifests
		.into_iter()
		.fold(0, |stamp, (bundle_id, modified)| {
			stamp ^ modified.wrapping_add(bundle_id as i64)
		})
}

/// Computes the stamp from manifest files on disk.
///
/// An unreadable manifest yields the zero stamp, forcing a rebuild rather
/// than trusting a cache that can no longer be validated.
pub fn of_manifests<'a>(manifests: impl IntoIterator<Item = (BundleId, &'a Path)>) -> i64 {
	let mut stamp = 0i64;
	for (bundle_id, path) in manifests {
		let modified = match std::fs::metadata(path).and_then(|meta| meta.modified()) {
			Ok(modified) => modified
				.duration_since(UNIX_EPOCH)
				.map(|elapsed| elapsed.as_millis() as i64)
				.unwrap_or(0),
			Err(err) => {
				debug!(path = %path.display(), error = %err, "stamp.unreadable_manifest");
				return 0;
			}
		};
		stamp ^= modified.wrapping_add(bundle_id as i64);
	}
	stamp
}

#[cfg(test)]
mod tests {
	use super::fold;

	#[test]
	fn fold_is_order_independent() {
		let forward = fold([(1, 100), (2, 200), (3, 300)]);
		let backward = fold([(3, 300), (2, 200), (1, 100)]);
		assert_eq!(forward, backward);
		assert_ne!(forward, 0);
	}

	#[test]
	fn fold_of_nothing_is_the_wildcard_stamp() {
		assert_eq!(fold([]), 0);
	}

	#[test]
	fn fold_reflects_modified_times() {
		let before = fold([(7, 1_000), (9, 2_000)]);
		let after = fold([(7, 1_000), (9, 2_001)]);
		assert_ne!(before, after);
	}
}
