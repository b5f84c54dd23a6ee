//! The object manager: four per-kind tables, the namespace index, the
//! orphan table, and the hot/cold cache plumbing.

use std::path::Path;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use super::{
	BundleId, ConfigurationElementRecord, ExtensionPointRecord, ExtensionRecord, NamespaceRecord,
	ObjectId, ObjectKind, RegistryRecord,
};
use crate::cache::{AdoptedCache, CacheReader, ColdStore};
use crate::error::RegistryError;
use crate::model::{ElementDescription, NamespaceDescription};

/// Ids allocated while ingesting one namespace.
#[derive(Debug)]
pub struct AddedNamespace {
	pub points: Vec<ObjectId>,
	pub extensions: Vec<ObjectId>,
	/// Anonymous contributions are stored but never linked.
	pub named: bool,
}

/// Owns every resident record and all lookup indices.
///
/// Records adopted from the cache stay cold until first access; mutated
/// rows are re-inserted into the hot tables, which shadow their cold
/// counterparts.
pub struct ObjectManager {
	next_id: ObjectId,
	dirty: bool,
	extension_points: FxHashMap<ObjectId, Arc<ExtensionPointRecord>>,
	extensions: FxHashMap<ObjectId, Arc<ExtensionRecord>>,
	elements: FxHashMap<ObjectId, Arc<ConfigurationElementRecord>>,
	third_level: FxHashMap<ObjectId, Arc<ConfigurationElementRecord>>,
	namespaces: FxHashMap<BundleId, NamespaceRecord>,
	/// Namespace name to carrying bundles; fragments may share a name.
	names: FxHashMap<String, Vec<BundleId>>,
	/// Extension-point unique identifier to object id.
	point_index: FxHashMap<String, ObjectId>,
	/// Target identifier to extensions waiting for that point.
	orphans: FxHashMap<String, Vec<ObjectId>>,
	cold: Option<ColdStore>,
}

impl Default for ObjectManager {
	fn default() -> Self {
		Self::new()
	}
}

impl ObjectManager {
	/// Creates an empty manager.
	pub fn new() -> Self {
		Self {
			next_id: 1,
			dirty: false,
			extension_points: FxHashMap::default(),
			extensions: FxHashMap::default(),
			elements: FxHashMap::default(),
			third_level: FxHashMap::default(),
			namespaces: FxHashMap::default(),
			names: FxHashMap::default(),
			point_index: FxHashMap::default(),
			orphans: FxHashMap::default(),
			cold: None,
		}
	}

	/// True once any mutation has touched the resident state.
	pub fn is_dirty(&self) -> bool {
		self.dirty
	}

	/// Attempts to adopt a previously saved cache from `dir`.
	///
	/// Returns `false` on any i/o, format, or stamp failure, leaving the
	/// manager empty; the caller falls back to a full rebuild from source.
	pub fn init(&mut self, dir: &Path, expected_stamp: i64, lazy: bool) -> bool {
		let adopted = match CacheReader::open(dir, expected_stamp) {
			Ok(adopted) => adopted,
			Err(err) => {
				debug!(error = %err, dir = %dir.display(), "cache.rejected");
				return false;
			}
		};
		let AdoptedCache {
			cold,
			namespaces,
			point_index,
			orphans,
			next_id,
		} = adopted;

		if lazy {
			self.cold = Some(cold);
		} else {
			let records = match cold.load_all() {
				Ok(records) => records,
				Err(err) => {
					debug!(error = %err, "cache.rejected");
					return false;
				}
			};
			for record in records {
				self.insert_hot(record);
			}
		}

		self.namespaces = namespaces;
		self.names = Self::build_name_index(&self.namespaces);
		self.point_index = point_index;
		self.orphans = orphans;
		self.next_id = next_id;
		self.dirty = false;
		true
	}

	fn build_name_index(
		namespaces: &FxHashMap<BundleId, NamespaceRecord>,
	) -> FxHashMap<String, Vec<BundleId>> {
		let mut names: FxHashMap<String, Vec<BundleId>> = FxHashMap::default();
		for (bundle, ns) in namespaces {
			if let Some(name) = &ns.name {
				names.entry(name.clone()).or_default().push(*bundle);
			}
		}
		for bundles in names.values_mut() {
			bundles.sort_unstable();
		}
		names
	}

	fn insert_hot(&mut self, record: RegistryRecord) {
		match record {
			RegistryRecord::ExtensionPoint(r) => {
				self.extension_points.insert(r.id, r);
			}
			RegistryRecord::Extension(r) => {
				self.extensions.insert(r.id, r);
			}
			RegistryRecord::ConfigurationElement(r) => {
				self.elements.insert(r.id, r);
			}
			RegistryRecord::ThirdLevelConfigurationElement(r) => {
				self.third_level.insert(r.id, r);
			}
		}
	}

	fn alloc(&mut self) -> ObjectId {
		let id = self.next_id;
		self.next_id += 1;
		id
	}

	/// Ingests one namespace description: allocates ids and inserts the
	/// records into their tables. Does not resolve links.
	///
	/// The description is validated up front and rejected whole, so a
	/// failed add leaves no partial state behind.
	pub fn add_namespace(
		&mut self,
		desc: NamespaceDescription,
	) -> Result<AddedNamespace, RegistryError> {
		if self.namespaces.contains_key(&desc.bundle_id) {
			return Err(RegistryError::NamespaceResident {
				bundle_id: desc.bundle_id,
			});
		}
		for extension in &desc.extensions {
			if extension.target.is_empty() {
				return Err(RegistryError::MissingTarget {
					label: extension.label.clone(),
				});
			}
		}
		if let Some(name) = &desc.name {
			let mut fresh = FxHashSet::default();
			for point in &desc.extension_points {
				let unique_id = format!("{name}.{}", point.simple_id);
				if self.point_index.contains_key(&unique_id) || !fresh.insert(unique_id.clone()) {
					return Err(RegistryError::DuplicateExtensionPoint { unique_id });
				}
			}
		}

		let NamespaceDescription {
			name,
			bundle_id,
			extension_points,
			extensions,
		} = desc;
		let named = name.is_some();
		let ns_id = self.alloc();

		let mut point_ids = Vec::with_capacity(extension_points.len());
		for point in extension_points {
			let id = self.alloc();
			let unique_id = match &name {
				Some(ns) => format!("{ns}.{}", point.simple_id),
				None => point.simple_id.clone(),
			};
			if named {
				self.point_index.insert(unique_id.clone(), id);
			}
			self.extension_points.insert(
				id,
				Arc::new(ExtensionPointRecord {
					id,
					bundle_id,
					unique_id,
					simple_id: point.simple_id,
					label: point.label,
					schema: point.schema,
					raw_children: None,
				}),
			);
			point_ids.push(id);
		}

		let mut extension_ids = Vec::with_capacity(extensions.len());
		for extension in extensions {
			let id = self.alloc();
			let children =
				self.insert_elements(bundle_id, id, ObjectKind::Extension, extension.elements);
			self.extensions.insert(
				id,
				Arc::new(ExtensionRecord {
					id,
					bundle_id,
					simple_id: extension.simple_id,
					namespace: name.clone(),
					label: extension.label,
					target: extension.target,
					raw_children: children,
				}),
			);
			extension_ids.push(id);
		}

		if let Some(name) = &name {
			let bundles = self.names.entry(name.clone()).or_default();
			bundles.push(bundle_id);
			bundles.sort_unstable();
		}
		self.namespaces.insert(
			bundle_id,
			NamespaceRecord {
				id: ns_id,
				bundle_id,
				name,
				extension_points: point_ids.clone(),
				extensions: extension_ids.clone(),
			},
		);
		self.dirty = true;

		Ok(AddedNamespace {
			points: point_ids,
			extensions: extension_ids,
			named,
		})
	}

	fn insert_elements(
		&mut self,
		bundle_id: BundleId,
		parent_id: ObjectId,
		parent_kind: ObjectKind,
		elements: Vec<ElementDescription>,
	) -> Vec<ObjectId> {
		let mut ids = Vec::with_capacity(elements.len());
		for element in elements {
			let ElementDescription {
				name,
				value,
				attributes,
				children,
			} = element;
			let id = self.alloc();
			let child_ids =
				self.insert_elements(bundle_id, id, ObjectKind::ConfigurationElement, children);
			let mut interleaved = Vec::with_capacity(attributes.len() * 2);
			for (attr_name, attr_value) in attributes {
				interleaved.push(attr_name);
				interleaved.push(attr_value);
			}
			self.elements.insert(
				id,
				Arc::new(ConfigurationElementRecord {
					id,
					bundle_id,
					name,
					value,
					attributes: interleaved,
					parent_id,
					parent_kind,
					raw_children: child_ids,
					extra_offset: None,
				}),
			);
			ids.push(id);
		}
		ids
	}

	/// Kind of the record currently resident under `id`, if any.
	pub fn kind_of(&self, id: ObjectId) -> Option<ObjectKind> {
		if self.extension_points.contains_key(&id) {
			Some(ObjectKind::ExtensionPoint)
		} else if self.extensions.contains_key(&id) {
			Some(ObjectKind::Extension)
		} else if self.elements.contains_key(&id) {
			Some(ObjectKind::ConfigurationElement)
		} else if self.third_level.contains_key(&id) {
			Some(ObjectKind::ThirdLevelConfigurationElement)
		} else {
			self.cold.as_ref().and_then(|cold| cold.kind_of(id))
		}
	}

	/// Strict kind-checked record lookup.
	pub fn get_object(
		&self,
		id: ObjectId,
		kind: ObjectKind,
	) -> Result<RegistryRecord, RegistryError> {
		match self.kind_of(id) {
			None => Err(RegistryError::StaleHandle { id }),
			Some(found) if found != kind => Err(RegistryError::KindMismatch {
				id,
				expected: kind,
				found,
			}),
			Some(_) => self
				.fetch(id, kind)
				.ok_or(RegistryError::StaleHandle { id }),
		}
	}

	/// Bulk kind-checked lookup preserving `ids` order.
	pub fn get_objects(
		&self,
		ids: &[ObjectId],
		kind: ObjectKind,
	) -> Result<Vec<RegistryRecord>, RegistryError> {
		ids.iter().map(|&id| self.get_object(id, kind)).collect()
	}

	fn fetch(&self, id: ObjectId, kind: ObjectKind) -> Option<RegistryRecord> {
		let hot = match kind {
			ObjectKind::ExtensionPoint => self
				.extension_points
				.get(&id)
				.map(|r| RegistryRecord::ExtensionPoint(r.clone())),
			ObjectKind::Extension => self
				.extensions
				.get(&id)
				.map(|r| RegistryRecord::Extension(r.clone())),
			ObjectKind::ConfigurationElement => self
				.elements
				.get(&id)
				.map(|r| RegistryRecord::ConfigurationElement(r.clone())),
			ObjectKind::ThirdLevelConfigurationElement => self
				.third_level
				.get(&id)
				.map(|r| RegistryRecord::ThirdLevelConfigurationElement(r.clone())),
		};
		hot.or_else(|| self.cold.as_ref().and_then(|cold| cold.get(id)))
	}

	/// Kind-agnostic lookup, used by the cleanup walk and the cache writer.
	pub fn record(&self, id: ObjectId) -> Option<RegistryRecord> {
		self.kind_of(id).and_then(|kind| self.fetch(id, kind))
	}

	/// Typed extension-point lookup.
	pub fn extension_point_record(
		&self,
		id: ObjectId,
	) -> Result<Arc<ExtensionPointRecord>, RegistryError> {
		match self.get_object(id, ObjectKind::ExtensionPoint)? {
			RegistryRecord::ExtensionPoint(record) => Ok(record),
			other => Err(RegistryError::KindMismatch {
				id,
				expected: ObjectKind::ExtensionPoint,
				found: other.kind(),
			}),
		}
	}

	/// Typed extension lookup.
	pub fn extension_record(&self, id: ObjectId) -> Result<Arc<ExtensionRecord>, RegistryError> {
		match self.get_object(id, ObjectKind::Extension)? {
			RegistryRecord::Extension(record) => Ok(record),
			other => Err(RegistryError::KindMismatch {
				id,
				expected: ObjectKind::Extension,
				found: other.kind(),
			}),
		}
	}

	/// Typed configuration-element lookup; `kind` comes from the parent's
	/// `extra_offset` as described on [`ConfigurationElementRecord`].
	pub fn element_record(
		&self,
		id: ObjectId,
		kind: ObjectKind,
	) -> Result<Arc<ConfigurationElementRecord>, RegistryError> {
		match self.get_object(id, kind)? {
			RegistryRecord::ConfigurationElement(record)
			| RegistryRecord::ThirdLevelConfigurationElement(record) => Ok(record),
			other => Err(RegistryError::KindMismatch {
				id,
				expected: kind,
				found: other.kind(),
			}),
		}
	}

	/// Looks up an extension point id by unique identifier.
	pub fn extension_point_id(&self, unique_id: &str) -> Option<ObjectId> {
		self.point_index.get(unique_id).copied()
	}

	/// Ids of every indexed extension point, in id order.
	pub fn extension_point_ids(&self) -> Vec<ObjectId> {
		let mut ids: Vec<ObjectId> = self.point_index.values().copied().collect();
		ids.sort_unstable();
		ids
	}

	/// Extension ids contributed by `bundle_id`.
	pub fn extensions_from(&self, bundle_id: BundleId) -> Vec<ObjectId> {
		self.namespaces
			.get(&bundle_id)
			.map(|ns| ns.extensions.clone())
			.unwrap_or_default()
	}

	/// Extension-point ids contributed by `bundle_id`.
	pub fn extension_points_from(&self, bundle_id: BundleId) -> Vec<ObjectId> {
		self.namespaces
			.get(&bundle_id)
			.map(|ns| ns.extension_points.clone())
			.unwrap_or_default()
	}

	/// The namespace record for `bundle_id`, if resident.
	pub fn namespace(&self, bundle_id: BundleId) -> Option<&NamespaceRecord> {
		self.namespaces.get(&bundle_id)
	}

	/// True when `bundle_id` currently contributes a namespace.
	pub fn has_namespace(&self, bundle_id: BundleId) -> bool {
		self.namespaces.contains_key(&bundle_id)
	}

	/// Unique identifiers of all resident named namespaces, sorted.
	pub fn namespace_names(&self) -> Vec<String> {
		let mut names: Vec<String> = self.names.keys().cloned().collect();
		names.sort_unstable();
		names
	}

	/// Bundles carrying the namespace `name`.
	pub fn bundles_named(&self, name: &str) -> Vec<BundleId> {
		self.names.get(name).cloned().unwrap_or_default()
	}

	/// All resident namespace records, used by the cache writer.
	pub fn namespace_records(&self) -> impl Iterator<Item = &NamespaceRecord> {
		self.namespaces.values()
	}

	/// The extension-point index, used by the cache writer.
	pub fn point_index(&self) -> &FxHashMap<String, ObjectId> {
		&self.point_index
	}

	/// The orphan table.
	pub fn orphan_table(&self) -> &FxHashMap<String, Vec<ObjectId>> {
		&self.orphans
	}

	/// Re-inserts a mutated extension-point record into the hot table.
	pub fn update_extension_point(&mut self, record: ExtensionPointRecord) {
		self.extension_points.insert(record.id, Arc::new(record));
		self.dirty = true;
	}

	/// Drops the unique-identifier index entry for an outgoing point.
	///
	/// The record itself stays resolvable by id until physical cleanup.
	pub fn remove_extension_point(&mut self, unique_id: &str) -> Option<ObjectId> {
		self.dirty = true;
		self.point_index.remove(unique_id)
	}

	/// Removes the namespace record for `bundle_id`.
	pub fn remove_namespace(&mut self, bundle_id: BundleId) -> Option<NamespaceRecord> {
		let removed = self.namespaces.remove(&bundle_id)?;
		if let Some(name) = &removed.name {
			if let Some(bundles) = self.names.get_mut(name) {
				bundles.retain(|&b| b != bundle_id);
				if bundles.is_empty() {
					self.names.remove(name);
				}
			}
		}
		self.dirty = true;
		Some(removed)
	}

	/// Removes one record from every layer.
	///
	/// With `dispose_deep` the caller has already collected dependent rows
	/// and removes them one by one; otherwise the manager cascades into the
	/// configuration-element children itself.
	pub fn remove(&mut self, id: ObjectId, dispose_deep: bool) {
		if !dispose_deep {
			if let Some(record) = self.record(id) {
				let children = match &record {
					RegistryRecord::ExtensionPoint(_) => Vec::new(),
					other => other.raw_children().to_vec(),
				};
				for child in children {
					self.remove(child, false);
				}
			}
		}
		self.extension_points.remove(&id);
		self.extensions.remove(&id);
		self.elements.remove(&id);
		self.third_level.remove(&id);
		if let Some(cold) = &mut self.cold {
			cold.remove(id);
		}
		self.dirty = true;
	}

	/// Takes the whole orphan list waiting for `target`.
	pub fn take_orphans(&mut self, target: &str) -> Option<Vec<ObjectId>> {
		let taken = self.orphans.remove(target);
		if taken.is_some() {
			self.dirty = true;
		}
		taken
	}

	/// Replaces the orphan list for `target`.
	pub fn set_orphans(&mut self, target: String, ids: Vec<ObjectId>) {
		self.orphans.insert(target, ids);
		self.dirty = true;
	}

	/// Appends one extension to the orphan list for `target`.
	pub fn add_orphan(&mut self, target: String, id: ObjectId) {
		self.orphans.entry(target).or_default().push(id);
		self.dirty = true;
	}

	/// Drops one extension from the orphan list for `target`, removing an
	/// emptied list.
	pub fn remove_orphan(&mut self, target: &str, id: ObjectId) {
		if let Some(ids) = self.orphans.get_mut(target) {
			ids.retain(|&orphan| orphan != id);
			if ids.is_empty() {
				self.orphans.remove(target);
			}
			self.dirty = true;
		}
	}
}
