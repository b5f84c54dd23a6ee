//! The public registry facade.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::cache::CacheWriter;
use crate::config::RegistryConfig;
use crate::delta::DeltaAccumulator;
use crate::dispatch::{DispatchStatus, Dispatcher};
use crate::error::RegistryError;
use crate::event::{ListenerList, RegistryChangeEvent, RegistryChangeListener};
use crate::handle::{ConfigurationElementHandle, ExtensionHandle, ExtensionPointHandle};
use crate::model::NamespaceDescription;
use crate::object::{BundleId, ObjectManager};
use crate::resolver;

#[cfg(test)]
mod tests;

/// Everything guarded by the read/write monitor.
pub(crate) struct RegistryData {
	pub objects: ObjectManager,
	pub deltas: DeltaAccumulator,
}

/// State shared between the facade, its handles, and dispatch jobs.
pub(crate) struct RegistryInner {
	/// The monitor: queries share it, mutations hold it exclusively.
	pub data: RwLock<RegistryData>,
	/// Listener list on its own lock, outside the monitor.
	pub listeners: ListenerList,
	pub dispatcher: Dispatcher,
}

/// The extension registry.
///
/// Mutations fire a change event before releasing the write lock, so every
/// query issued after `add`/`remove` returns observes the new state even
/// while the asynchronous broadcast is still pending.
pub struct ExtensionRegistry {
	inner: Arc<RegistryInner>,
	config: RegistryConfig,
	from_cache: bool,
}

impl ExtensionRegistry {
	/// Creates a registry, adopting the binary cache when configured and
	/// valid.
	pub fn new(config: RegistryConfig) -> Self {
		let mut objects = ObjectManager::new();
		let mut from_cache = false;
		if !config.no_registry_cache {
			if let Some(dir) = &config.cache_dir {
				from_cache = objects.init(dir, config.effective_stamp(), !config.no_lazy_cache_loading);
			}
		}
		if from_cache {
			debug!("registry.cache_adopted");
		} else {
			debug!("registry.rebuild_from_source");
		}

		let inner = Arc::new(RegistryInner {
			data: RwLock::new(RegistryData {
				objects,
				deltas: DeltaAccumulator::new(),
			}),
			listeners: ListenerList::new(),
			dispatcher: Dispatcher::new(),
		});
		if config.debug_events {
			inner.listeners.add(Arc::new(DebugListener), None);
		}
		Self {
			inner,
			config,
			from_cache,
		}
	}

	/// True when the constructor restored state from a valid cache; the
	/// host skips re-ingesting manifests in that case.
	pub fn initialized_from_cache(&self) -> bool {
		self.from_cache
	}

	/// Adds and resolves one namespace, then broadcasts the changes.
	pub fn add(&self, description: NamespaceDescription) -> Result<(), RegistryError> {
		let mut data = self.inner.data.write();
		let result = self.basic_add(&mut data, description);
		self.fire(&mut data);
		result
	}

	/// Adds several namespaces under one write lock and a single broadcast.
	pub fn add_all(&self, descriptions: Vec<NamespaceDescription>) -> Result<(), RegistryError> {
		let mut data = self.inner.data.write();
		let mut result = Ok(());
		for description in descriptions {
			if let Err(err) = self.basic_add(&mut data, description) {
				result = Err(err);
				break;
			}
		}
		self.fire(&mut data);
		result
	}

	fn basic_add(
		&self,
		data: &mut RegistryData,
		description: NamespaceDescription,
	) -> Result<(), RegistryError> {
		let bundle_id = description.bundle_id;
		let RegistryData { objects, deltas } = data;
		let added = objects.add_namespace(description)?;
		debug!(
			bundle_id,
			points = added.points.len(),
			extensions = added.extensions.len(),
			"registry.add"
		);
		// Anonymous contributions are stored but never linked.
		if !added.named {
			return Ok(());
		}
		let listeners_active = !self.inner.listeners.is_empty();
		resolver::link_namespace(objects, deltas, listeners_active, &added.points, &added.extensions)
	}

	/// Unresolves and removes the namespace contributed by `bundle_id`.
	///
	/// Returns `false` when the bundle has no resident namespace. Physical
	/// reclamation of the removed records happens after the broadcast.
	pub fn remove(&self, bundle_id: BundleId) -> Result<bool, RegistryError> {
		let mut data = self.inner.data.write();
		// The cleanup phase rides on the dispatch job, so one must be
		// scheduled even with nobody listening.
		let dummy: Option<Arc<dyn RegistryChangeListener>> = if self.inner.listeners.is_empty() {
			let listener: Arc<dyn RegistryChangeListener> = Arc::new(NoopListener);
			self.inner.listeners.add(listener.clone(), None);
			Some(listener)
		} else {
			None
		};

		let listeners_active = !self.inner.listeners.is_empty();
		let result = {
			let RegistryData { objects, deltas } = &mut *data;
			resolver::unlink_namespace(objects, deltas, listeners_active, bundle_id)
		};
		match &result {
			Ok(true) => {
				debug!(bundle_id, "registry.remove");
				self.fire(&mut data);
			}
			Ok(false) => debug!(bundle_id, "registry.remove_unknown"),
			Err(_) => {}
		}

		if let Some(listener) = dummy {
			self.inner.listeners.remove(&listener);
		}
		result
	}

	/// Schedules the asynchronous broadcast of the accumulated deltas.
	///
	/// Bails without clearing when nothing changed or nobody listens; in
	/// the latter case the deltas stay queued for the next broadcast.
	fn fire(&self, data: &mut RegistryData) {
		if data.deltas.is_empty() || self.inner.listeners.is_empty() {
			return;
		}
		let listeners = self.inner.listeners.snapshot();
		let deltas = Arc::new(data.deltas.take());
		debug!(
			listeners = listeners.len(),
			bundles = deltas.len(),
			"registry.fire"
		);
		self.inner
			.dispatcher
			.schedule(listeners, deltas, Arc::downgrade(&self.inner));
	}

	/// The extension point with the given unique identifier.
	pub fn extension_point(&self, unique_id: &str) -> Option<ExtensionPointHandle> {
		let data = self.inner.data.read();
		data.objects
			.extension_point_id(unique_id)
			.map(|id| ExtensionPointHandle::new(self.inner.clone(), id))
	}

	/// The extension point `simple_id` declared in `namespace`.
	pub fn extension_point_in(
		&self,
		namespace: &str,
		simple_id: &str,
	) -> Option<ExtensionPointHandle> {
		self.extension_point(&format!("{namespace}.{simple_id}"))
	}

	/// Every declared extension point, in id order.
	pub fn extension_points(&self) -> Vec<ExtensionPointHandle> {
		let data = self.inner.data.read();
		data.objects
			.extension_point_ids()
			.into_iter()
			.map(|id| ExtensionPointHandle::new(self.inner.clone(), id))
			.collect()
	}

	/// Extension points declared by the bundles carrying `namespace`.
	pub fn extension_points_in(&self, namespace: &str) -> Vec<ExtensionPointHandle> {
		let data = self.inner.data.read();
		let mut handles = Vec::new();
		for bundle in data.objects.bundles_named(namespace) {
			handles.extend(
				data.objects
					.extension_points_from(bundle)
					.into_iter()
					.map(|id| ExtensionPointHandle::new(self.inner.clone(), id)),
			);
		}
		handles
	}

	/// Extensions declared by the bundles carrying `namespace`.
	pub fn extensions_in(&self, namespace: &str) -> Vec<ExtensionHandle> {
		let data = self.inner.data.read();
		let mut handles = Vec::new();
		for bundle in data.objects.bundles_named(namespace) {
			handles.extend(
				data.objects
					.extensions_from(bundle)
					.into_iter()
					.map(|id| ExtensionHandle::new(self.inner.clone(), id)),
			);
		}
		handles
	}

	/// The extension with the given fully qualified identifier.
	pub fn extension(&self, extension_id: &str) -> Option<ExtensionHandle> {
		let (namespace, _) = extension_id.rsplit_once('.')?;
		let data = self.inner.data.read();
		for bundle in data.objects.bundles_named(namespace) {
			for id in data.objects.extensions_from(bundle) {
				let Ok(record) = data.objects.extension_record(id) else {
					continue;
				};
				if record.unique_id().as_deref() == Some(extension_id) {
					return Some(ExtensionHandle::new(self.inner.clone(), id));
				}
			}
		}
		None
	}

	/// The extension `extension_id` linked into the point `point_id`.
	pub fn extension_at(&self, point_id: &str, extension_id: &str) -> Option<ExtensionHandle> {
		self.extension_point(point_id)?
			.extension(extension_id)
			.ok()
			.flatten()
	}

	/// The extension `extension_id` linked into `namespace.simple_id`.
	pub fn extension_in(
		&self,
		namespace: &str,
		simple_id: &str,
		extension_id: &str,
	) -> Option<ExtensionHandle> {
		self.extension_point_in(namespace, simple_id)?
			.extension(extension_id)
			.ok()
			.flatten()
	}

	/// Configuration elements of every extension linked into `point_id`.
	///
	/// An identifier without a dot names nothing and yields no elements.
	pub fn configuration_elements_for(&self, point_id: &str) -> Vec<ConfigurationElementHandle> {
		match point_id.rsplit_once('.') {
			Some((namespace, simple_id)) => {
				self.configuration_elements_for_point(namespace, simple_id)
			}
			None => Vec::new(),
		}
	}

	/// Configuration elements of every extension linked into the point
	/// `simple_id` of `namespace`.
	pub fn configuration_elements_for_point(
		&self,
		namespace: &str,
		simple_id: &str,
	) -> Vec<ConfigurationElementHandle> {
		self.extension_point_in(namespace, simple_id)
			.and_then(|point| point.configuration_elements().ok())
			.unwrap_or_default()
	}

	/// Configuration elements of one linked extension.
	pub fn configuration_elements_for_extension(
		&self,
		namespace: &str,
		simple_id: &str,
		extension_id: &str,
	) -> Vec<ConfigurationElementHandle> {
		self.extension_in(namespace, simple_id, extension_id)
			.and_then(|extension| extension.configuration_elements().ok())
			.unwrap_or_default()
	}

	/// Unique identifiers of all resident named namespaces, sorted.
	pub fn namespaces(&self) -> Vec<String> {
		self.inner.data.read().objects.namespace_names()
	}

	/// True when `bundle_id` currently contributes a namespace.
	pub fn has_namespace(&self, bundle_id: BundleId) -> bool {
		self.inner.data.read().objects.has_namespace(bundle_id)
	}

	/// Registers a change listener, optionally filtered to one bundle.
	pub fn add_listener(
		&self,
		listener: Arc<dyn RegistryChangeListener>,
		filter: Option<BundleId>,
	) {
		self.inner.listeners.add(listener, filter);
	}

	/// Deregisters a change listener.
	pub fn remove_listener(&self, listener: &Arc<dyn RegistryChangeListener>) {
		self.inner.listeners.remove(listener);
	}

	/// Blocks until every scheduled dispatch job has completed.
	pub fn synchronize(&self) {
		self.inner.dispatcher.synchronize();
	}

	/// Aggregate status of the most recently completed dispatch.
	pub fn last_dispatch_status(&self) -> Option<DispatchStatus> {
		self.inner.dispatcher.last_status()
	}

	/// Drains pending dispatches, saves the cache when dirty, and stops
	/// the dispatch worker.
	pub fn stop(&self) {
		self.inner.dispatcher.synchronize();
		self.save_cache();
		self.inner.dispatcher.shutdown();
	}

	fn save_cache(&self) {
		if self.config.no_registry_cache {
			return;
		}
		let Some(dir) = &self.config.cache_dir else {
			return;
		};
		let data = self.inner.data.read();
		if !data.objects.is_dirty() {
			debug!("registry.cache_unchanged");
			return;
		}
		// A failed save is not an error: the next start rebuilds from
		// source manifests.
		match CacheWriter::save(&data.objects, self.config.effective_stamp(), dir) {
			Ok(()) => info!(dir = %dir.display(), "registry.cache_saved"),
			Err(err) => warn!(error = %err, "registry.cache_save_failed"),
		}
	}
}

impl Drop for ExtensionRegistry {
	fn drop(&mut self) {
		self.inner.dispatcher.shutdown();
	}
}

struct NoopListener;

impl RegistryChangeListener for NoopListener {
	fn registry_changed(&self, _event: &RegistryChangeEvent) {}
}

/// Listener tracing every event, subscribed by the debug toggle.
struct DebugListener;

impl RegistryChangeListener for DebugListener {
	fn registry_changed(&self, event: &RegistryChangeEvent) {
		debug!(
			bundles = ?event.affected_bundles(),
			removed_points = ?event.removed_extension_points(),
			"registry.event"
		);
	}
}
