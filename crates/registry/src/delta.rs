//! Per-namespace change deltas accumulated under the write lock.

use rustc_hash::FxHashMap;

use crate::object::{BundleId, ObjectId};

/// Direction of one extension link change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
	Added,
	Removed,
}

/// One extension linked into or out of an extension point.
#[derive(Debug, Clone, Copy)]
pub struct ExtensionDelta {
	pub kind: DeltaKind,
	pub extension: ObjectId,
	pub extension_point: ObjectId,
}

/// An extension point removed together with its namespace.
#[derive(Debug, Clone)]
pub(crate) struct RemovedExtensionPoint {
	pub unique_id: String,
	/// Object id the physical cleanup reclaims after broadcast.
	pub id: ObjectId,
}

/// All changes one mutation produced for a single bundle.
#[derive(Debug, Clone)]
pub struct RegistryDelta {
	bundle_id: BundleId,
	extension_deltas: Vec<ExtensionDelta>,
	removed_points: Vec<RemovedExtensionPoint>,
}

impl RegistryDelta {
	fn new(bundle_id: BundleId) -> Self {
		Self {
			bundle_id,
			extension_deltas: Vec::new(),
			removed_points: Vec::new(),
		}
	}

	/// Bundle this delta belongs to.
	pub fn bundle_id(&self) -> BundleId {
		self.bundle_id
	}

	/// Link changes in the order they were recorded.
	pub fn extension_deltas(&self) -> &[ExtensionDelta] {
		&self.extension_deltas
	}

	/// Unique identifiers of extension points removed by this mutation.
	pub fn removed_extension_points(&self) -> impl Iterator<Item = &str> {
		self.removed_points.iter().map(|point| point.unique_id.as_str())
	}

	pub(crate) fn removed_points(&self) -> &[RemovedExtensionPoint] {
		&self.removed_points
	}
}

/// Builds the per-bundle delta map during a mutation.
#[derive(Debug, Default)]
pub(crate) struct DeltaAccumulator {
	deltas: FxHashMap<BundleId, RegistryDelta>,
}

impl DeltaAccumulator {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_empty(&self) -> bool {
		self.deltas.is_empty()
	}

	fn delta_mut(&mut self, bundle_id: BundleId) -> &mut RegistryDelta {
		self.deltas
			.entry(bundle_id)
			.or_insert_with(|| RegistryDelta::new(bundle_id))
	}

	/// Records one extension link change under the point's bundle.
	pub fn record_extension(
		&mut self,
		bundle_id: BundleId,
		extension_point: ObjectId,
		extension: ObjectId,
		kind: DeltaKind,
	) {
		self.delta_mut(bundle_id).extension_deltas.push(ExtensionDelta {
			kind,
			extension,
			extension_point,
		});
	}

	/// Records an extension point removal under its bundle.
	pub fn record_point_removal(&mut self, bundle_id: BundleId, unique_id: String, id: ObjectId) {
		self.delta_mut(bundle_id)
			.removed_points
			.push(RemovedExtensionPoint { unique_id, id });
	}

	/// Takes the accumulated map, leaving the accumulator empty.
	pub fn take(&mut self) -> FxHashMap<BundleId, RegistryDelta> {
		std::mem::take(&mut self.deltas)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn deltas_group_by_bundle() {
		let mut acc = DeltaAccumulator::new();
		acc.record_extension(1, 10, 11, DeltaKind::Added);
		acc.record_extension(1, 10, 12, DeltaKind::Added);
		acc.record_extension(2, 20, 21, DeltaKind::Removed);

		let map = acc.take();
		assert!(acc.is_empty());
		assert_eq!(map.len(), 2);
		assert_eq!(map[&1].extension_deltas().len(), 2);
		assert_eq!(map[&2].extension_deltas().len(), 1);
		assert_eq!(map[&2].extension_deltas()[0].kind, DeltaKind::Removed);
	}

	#[test]
	fn point_removals_keep_identifier_and_id() {
		let mut acc = DeltaAccumulator::new();
		acc.record_point_removal(3, "x.p".into(), 42);

		let map = acc.take();
		let delta = &map[&3];
		assert_eq!(
			delta.removed_extension_points().collect::<Vec<_>>(),
			vec!["x.p"]
		);
		assert_eq!(delta.removed_points()[0].id, 42);
	}
}
