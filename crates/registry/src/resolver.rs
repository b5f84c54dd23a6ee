//! Link resolution between extensions and extension points.
//!
//! Runs under the write lock after namespace ingestion. Extensions whose
//! target point is not yet resident wait in the orphan table; a point
//! adoption drains its orphan list, and a point removal pushes its linked
//! extensions back into it.

use tracing::trace;

use crate::delta::{DeltaAccumulator, DeltaKind};
use crate::error::RegistryError;
use crate::object::{BundleId, ObjectId, ObjectManager, RegistryObject};

/// Wires one freshly ingested namespace into the link graph.
pub(crate) fn link_namespace(
	objects: &mut ObjectManager,
	deltas: &mut DeltaAccumulator,
	listeners_active: bool,
	points: &[ObjectId],
	extensions: &[ObjectId],
) -> Result<(), RegistryError> {
	for &point in points {
		add_extension_point(objects, deltas, listeners_active, point)?;
	}
	for &extension in extensions {
		add_extension(objects, deltas, listeners_active, extension)?;
	}
	Ok(())
}

/// Unwires a departing namespace and removes its record.
///
/// Returns `false` when `bundle_id` has no resident namespace. The records
/// named in the accumulated deltas stay resolvable until the dispatch
/// job's physical cleanup.
pub(crate) fn unlink_namespace(
	objects: &mut ObjectManager,
	deltas: &mut DeltaAccumulator,
	listeners_active: bool,
	bundle_id: BundleId,
) -> Result<bool, RegistryError> {
	let Some(ns) = objects.namespace(bundle_id) else {
		return Ok(false);
	};
	// Anonymous contributions were never linked, so only the namespace
	// record itself goes away; the rows become unreachable.
	if ns.name.is_some() {
		let extensions = ns.extensions.clone();
		let points = ns.extension_points.clone();
		for extension in extensions {
			// An extension that lost its point in an earlier removal cycle
			// has already been reclaimed; there is nothing left to unlink.
			match remove_extension(objects, deltas, listeners_active, extension) {
				Err(RegistryError::StaleHandle { .. }) => continue,
				other => other?,
			}
		}
		for point in points {
			remove_extension_point(objects, deltas, listeners_active, point)?;
		}
	}
	objects.remove_namespace(bundle_id);
	Ok(true)
}

/// Drains any orphans waiting for a freshly added extension point.
fn add_extension_point(
	objects: &mut ObjectManager,
	deltas: &mut DeltaAccumulator,
	listeners_active: bool,
	point: ObjectId,
) -> Result<(), RegistryError> {
	let record = objects.extension_point_record(point)?;
	let Some(orphans) = objects.take_orphans(&record.unique_id) else {
		return Ok(());
	};
	// Ids whose extension was reclaimed after its previous point left are
	// garbage by now and must not be linked back in.
	let orphans: Vec<ObjectId> = orphans
		.into_iter()
		.filter(|&orphan| objects.kind_of(orphan).is_some())
		.collect();
	if orphans.is_empty() {
		return Ok(());
	}
	// A point can only reach this code on the add of a new namespace, so
	// it cannot already carry children.
	if record.raw_children.as_ref().is_some_and(|children| !children.is_empty()) {
		return Err(RegistryError::OrphanConsistency(format!(
			"freshly added extension point {:?} already has linked extensions",
			record.unique_id
		)));
	}
	trace!(
		point = %record.unique_id,
		adopted = orphans.len(),
		"resolver.adopt_orphans"
	);
	let mut updated = (*record).clone();
	updated.set_raw_children(Some(orphans.clone()));
	objects.update_extension_point(updated);
	if listeners_active {
		for orphan in orphans {
			deltas.record_extension(record.bundle_id, point, orphan, DeltaKind::Added);
		}
	}
	Ok(())
}

/// Links one extension to its target point, or parks it as an orphan.
fn add_extension(
	objects: &mut ObjectManager,
	deltas: &mut DeltaAccumulator,
	listeners_active: bool,
	extension: ObjectId,
) -> Result<(), RegistryError> {
	let record = objects.extension_record(extension)?;
	let Some(point) = objects.extension_point_id(&record.target) else {
		objects.add_orphan(record.target.clone(), extension);
		return Ok(());
	};
	let point_record = objects.extension_point_record(point)?;
	let mut children = point_record.raw_children.clone().unwrap_or_default();
	children.push(extension);
	let mut updated = (*point_record).clone();
	updated.set_raw_children(Some(children));
	objects.update_extension_point(updated);
	if listeners_active {
		deltas.record_extension(point_record.bundle_id, point, extension, DeltaKind::Added);
	}
	Ok(())
}

/// Unlinks one extension from its target point or from the orphan table.
fn remove_extension(
	objects: &mut ObjectManager,
	deltas: &mut DeltaAccumulator,
	listeners_active: bool,
	extension: ObjectId,
) -> Result<(), RegistryError> {
	let record = objects.extension_record(extension)?;
	let Some(point) = objects.extension_point_id(&record.target) else {
		objects.remove_orphan(&record.target, extension);
		return Ok(());
	};
	let point_record = objects.extension_point_record(point)?;
	let remaining: Vec<ObjectId> = point_record
		.raw_children()
		.iter()
		.copied()
		.filter(|&child| child != extension)
		.collect();
	let mut updated = (*point_record).clone();
	updated.set_raw_children((!remaining.is_empty()).then_some(remaining));
	objects.update_extension_point(updated);
	if listeners_active {
		deltas.record_extension(point_record.bundle_id, point, extension, DeltaKind::Removed);
	}
	Ok(())
}

/// Detaches a departing extension point.
///
/// Its linked extensions may belong to still-resident namespaces, so they
/// become orphans again rather than being deleted. The removal is always
/// recorded, even with no listeners and no children, because physical
/// reclamation of the point hangs off the delta.
fn remove_extension_point(
	objects: &mut ObjectManager,
	deltas: &mut DeltaAccumulator,
	listeners_active: bool,
	point: ObjectId,
) -> Result<(), RegistryError> {
	let record = objects.extension_point_record(point)?;
	let linked = record.raw_children.clone().unwrap_or_default();

	deltas.record_point_removal(record.bundle_id, record.unique_id.clone(), point);
	if !linked.is_empty() {
		objects.set_orphans(record.unique_id.clone(), linked.clone());
	}
	let mut updated = (*record).clone();
	updated.set_raw_children(None);
	objects.update_extension_point(updated);
	objects.remove_extension_point(&record.unique_id);

	if listeners_active {
		for extension in linked {
			deltas.record_extension(record.bundle_id, point, extension, DeltaKind::Removed);
		}
	}
	Ok(())
}
