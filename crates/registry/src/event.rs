//! Change listeners and the event object delivered to them.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::delta::{ExtensionDelta, RegistryDelta};
use crate::object::BundleId;

/// Receiver of registry change events.
///
/// Listeners run on the dispatch thread, outside every registry lock; a
/// panicking listener is caught and reported without disturbing the
/// broadcast.
pub trait RegistryChangeListener: Send + Sync {
	/// Called once per dispatch with the deltas visible to this listener.
	fn registry_changed(&self, event: &RegistryChangeEvent);
}

/// A snapshot of per-bundle deltas, narrowed by the listener's filter.
#[derive(Clone)]
pub struct RegistryChangeEvent {
	deltas: Arc<FxHashMap<BundleId, RegistryDelta>>,
	filter: Option<BundleId>,
}

impl RegistryChangeEvent {
	pub(crate) fn new(
		deltas: Arc<FxHashMap<BundleId, RegistryDelta>>,
		filter: Option<BundleId>,
	) -> Self {
		Self { deltas, filter }
	}

	/// Bundles with visible deltas, in ascending order.
	pub fn affected_bundles(&self) -> Vec<BundleId> {
		let mut bundles: Vec<BundleId> = self
			.deltas
			.keys()
			.copied()
			.filter(|&bundle| self.filter.is_none_or(|filter| filter == bundle))
			.collect();
		bundles.sort_unstable();
		bundles
	}

	/// The delta for one bundle, if visible through the filter.
	pub fn delta_for(&self, bundle_id: BundleId) -> Option<&RegistryDelta> {
		if self.filter.is_some_and(|filter| filter != bundle_id) {
			return None;
		}
		self.deltas.get(&bundle_id)
	}

	/// Every visible extension link change.
	pub fn extension_deltas(&self) -> Vec<&ExtensionDelta> {
		self.affected_bundles()
			.into_iter()
			.filter_map(|bundle| self.deltas.get(&bundle))
			.flat_map(|delta| delta.extension_deltas().iter())
			.collect()
	}

	/// Unique identifiers of every visible removed extension point.
	pub fn removed_extension_points(&self) -> Vec<&str> {
		self.affected_bundles()
			.into_iter()
			.filter_map(|bundle| self.deltas.get(&bundle))
			.flat_map(|delta| delta.removed_extension_points())
			.collect()
	}
}

/// One registered listener and its optional bundle filter.
#[derive(Clone)]
pub(crate) struct ListenerEntry {
	pub listener: Arc<dyn RegistryChangeListener>,
	pub filter: Option<BundleId>,
}

/// The listener list.
///
/// (De)registration takes its own mutex, never the registry monitor, and
/// publishes a fresh snapshot; event firing and dispatch only ever load
/// snapshots.
pub(crate) struct ListenerList {
	entries: Mutex<Vec<ListenerEntry>>,
	snapshot: ArcSwap<Vec<ListenerEntry>>,
}

impl ListenerList {
	pub fn new() -> Self {
		Self {
			entries: Mutex::new(Vec::new()),
			snapshot: ArcSwap::from_pointee(Vec::new()),
		}
	}

	/// Registers `listener`; a listener already present keeps its first
	/// registration.
	pub fn add(&self, listener: Arc<dyn RegistryChangeListener>, filter: Option<BundleId>) {
		let mut entries = self.entries.lock();
		if entries
			.iter()
			.any(|entry| Arc::ptr_eq(&entry.listener, &listener))
		{
			return;
		}
		entries.push(ListenerEntry { listener, filter });
		self.snapshot.store(Arc::new(entries.clone()));
	}

	/// Deregisters `listener`, identified by allocation.
	pub fn remove(&self, listener: &Arc<dyn RegistryChangeListener>) {
		let mut entries = self.entries.lock();
		entries.retain(|entry| !Arc::ptr_eq(&entry.listener, listener));
		self.snapshot.store(Arc::new(entries.clone()));
	}

	pub fn is_empty(&self) -> bool {
		self.snapshot.load().is_empty()
	}

	/// The current listener set; dispatch jobs capture this at scheduling.
	pub fn snapshot(&self) -> Arc<Vec<ListenerEntry>> {
		self.snapshot.load_full()
	}
}
