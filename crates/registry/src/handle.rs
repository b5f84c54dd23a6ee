//! Lightweight typed references into the registry.
//!
//! A handle is `(id, kind)` plus a binding to the registry it came from;
//! equality and hashing ignore the binding. Accessors resolve the live
//! record snapshot on every call, faulting cold rows in from the cache as
//! needed. A handle outliving its target fails with
//! [`RegistryError::StaleHandle`].

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::RegistryError;
use crate::object::{BundleId, ObjectId, ObjectKind, RegistryObject, RegistryRecord};
use crate::registry::RegistryInner;

/// Hop bound for parent-chain walks over corrupted graphs.
const MAX_PARENT_WALK: usize = 64;

/// Reference to a declared extension point.
#[derive(Clone)]
pub struct ExtensionPointHandle {
	inner: Arc<RegistryInner>,
	id: ObjectId,
}

impl ExtensionPointHandle {
	pub(crate) fn new(inner: Arc<RegistryInner>, id: ObjectId) -> Self {
		Self { inner, id }
	}

	/// Stable object id.
	pub fn id(&self) -> ObjectId {
		self.id
	}

	fn record(&self) -> Result<Arc<crate::object::ExtensionPointRecord>, RegistryError> {
		self.inner.data.read().objects.extension_point_record(self.id)
	}

	/// Globally unique dotted identifier.
	pub fn unique_identifier(&self) -> Result<String, RegistryError> {
		Ok(self.record()?.unique_id.clone())
	}

	/// Identifier relative to the declaring namespace.
	pub fn simple_identifier(&self) -> Result<String, RegistryError> {
		Ok(self.record()?.simple_id.clone())
	}

	/// Name of the declaring namespace.
	pub fn namespace(&self) -> Result<String, RegistryError> {
		let record = self.record()?;
		let namespace = record
			.unique_id
			.rsplit_once('.')
			.map(|(prefix, _)| prefix)
			.unwrap_or(&record.unique_id);
		Ok(namespace.to_string())
	}

	/// Human-readable label.
	pub fn label(&self) -> Result<String, RegistryError> {
		Ok(self.record()?.label.clone())
	}

	/// Schema reference, if declared.
	pub fn schema(&self) -> Result<Option<String>, RegistryError> {
		Ok(self.record()?.schema.clone())
	}

	/// Owning bundle.
	pub fn bundle_id(&self) -> Result<BundleId, RegistryError> {
		Ok(self.record()?.bundle_id)
	}

	/// Currently linked extensions, in link order.
	pub fn extensions(&self) -> Result<Vec<ExtensionHandle>, RegistryError> {
		let record = self.record()?;
		Ok(record
			.raw_children()
			.iter()
			.map(|&id| ExtensionHandle::new(self.inner.clone(), id))
			.collect())
	}

	/// The linked extension with the given fully qualified identifier.
	pub fn extension(&self, extension_id: &str) -> Result<Option<ExtensionHandle>, RegistryError> {
		let data = self.inner.data.read();
		let record = data.objects.extension_point_record(self.id)?;
		for &id in record.raw_children() {
			let extension = data.objects.extension_record(id)?;
			if extension.unique_id().as_deref() == Some(extension_id) {
				return Ok(Some(ExtensionHandle::new(self.inner.clone(), id)));
			}
		}
		Ok(None)
	}

	/// Configuration elements of every linked extension, flattened.
	pub fn configuration_elements(&self) -> Result<Vec<ConfigurationElementHandle>, RegistryError> {
		let data = self.inner.data.read();
		let record = data.objects.extension_point_record(self.id)?;
		let extensions = data
			.objects
			.get_objects(record.raw_children(), ObjectKind::Extension)?;
		let mut elements = Vec::new();
		for extension in extensions {
			let RegistryRecord::Extension(extension) = extension else {
				continue;
			};
			elements.extend(extension.raw_children.iter().map(|&element| {
				ConfigurationElementHandle::new(
					self.inner.clone(),
					element,
					ObjectKind::ConfigurationElement,
				)
			}));
		}
		Ok(elements)
	}
}

impl PartialEq for ExtensionPointHandle {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl Eq for ExtensionPointHandle {}

impl Hash for ExtensionPointHandle {
	fn hash<H: Hasher>(&self, state: &mut H) {
		ObjectKind::ExtensionPoint.tag().hash(state);
		self.id.hash(state);
	}
}

impl fmt::Debug for ExtensionPointHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("ExtensionPointHandle").field(&self.id).finish()
	}
}

/// Reference to a contributed extension.
#[derive(Clone)]
pub struct ExtensionHandle {
	inner: Arc<RegistryInner>,
	id: ObjectId,
}

impl ExtensionHandle {
	pub(crate) fn new(inner: Arc<RegistryInner>, id: ObjectId) -> Self {
		Self { inner, id }
	}

	/// Stable object id.
	pub fn id(&self) -> ObjectId {
		self.id
	}

	fn record(&self) -> Result<Arc<crate::object::ExtensionRecord>, RegistryError> {
		self.inner.data.read().objects.extension_record(self.id)
	}

	/// Fully qualified identifier, when a simple id was declared.
	pub fn unique_identifier(&self) -> Result<Option<String>, RegistryError> {
		Ok(self.record()?.unique_id())
	}

	/// Identifier relative to the declaring namespace.
	pub fn simple_identifier(&self) -> Result<Option<String>, RegistryError> {
		Ok(self.record()?.simple_id.clone())
	}

	/// Name of the declaring namespace.
	pub fn namespace(&self) -> Result<Option<String>, RegistryError> {
		Ok(self.record()?.namespace.clone())
	}

	/// Human-readable label.
	pub fn label(&self) -> Result<String, RegistryError> {
		Ok(self.record()?.label.clone())
	}

	/// Owning bundle.
	pub fn bundle_id(&self) -> Result<BundleId, RegistryError> {
		Ok(self.record()?.bundle_id)
	}

	/// Dotted identifier of the targeted extension point.
	pub fn extension_point_unique_identifier(&self) -> Result<String, RegistryError> {
		Ok(self.record()?.target.clone())
	}

	/// The targeted extension point, when resident.
	pub fn extension_point(&self) -> Result<Option<ExtensionPointHandle>, RegistryError> {
		let data = self.inner.data.read();
		let record = data.objects.extension_record(self.id)?;
		Ok(data
			.objects
			.extension_point_id(&record.target)
			.map(|point| ExtensionPointHandle::new(self.inner.clone(), point)))
	}

	/// Top-level configuration elements, in declaration order.
	pub fn configuration_elements(&self) -> Result<Vec<ConfigurationElementHandle>, RegistryError> {
		let record = self.record()?;
		Ok(record
			.raw_children
			.iter()
			.map(|&element| {
				ConfigurationElementHandle::new(
					self.inner.clone(),
					element,
					ObjectKind::ConfigurationElement,
				)
			})
			.collect())
	}
}

impl PartialEq for ExtensionHandle {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl Eq for ExtensionHandle {}

impl Hash for ExtensionHandle {
	fn hash<H: Hasher>(&self, state: &mut H) {
		ObjectKind::Extension.tag().hash(state);
		self.id.hash(state);
	}
}

impl fmt::Debug for ExtensionHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("ExtensionHandle").field(&self.id).finish()
	}
}

/// Parent of a configuration element.
#[derive(Debug, Clone)]
pub enum ConfigurationElementParent {
	Extension(ExtensionHandle),
	Element(ConfigurationElementHandle),
}

/// Reference to one node of an extension's declarative tree.
#[derive(Clone)]
pub struct ConfigurationElementHandle {
	inner: Arc<RegistryInner>,
	id: ObjectId,
	kind: ObjectKind,
}

impl ConfigurationElementHandle {
	pub(crate) fn new(inner: Arc<RegistryInner>, id: ObjectId, kind: ObjectKind) -> Self {
		Self { inner, id, kind }
	}

	/// Stable object id.
	pub fn id(&self) -> ObjectId {
		self.id
	}

	fn record(&self) -> Result<Arc<crate::object::ConfigurationElementRecord>, RegistryError> {
		self.inner.data.read().objects.element_record(self.id, self.kind)
	}

	/// Element name.
	pub fn name(&self) -> Result<String, RegistryError> {
		Ok(self.record()?.name.clone())
	}

	/// Text content, if any.
	pub fn value(&self) -> Result<Option<String>, RegistryError> {
		Ok(self.record()?.value.clone())
	}

	/// Attribute value by name.
	pub fn attribute(&self, name: &str) -> Result<Option<String>, RegistryError> {
		Ok(self.record()?.attribute(name).map(str::to_string))
	}

	/// Attribute names in declaration order.
	pub fn attribute_names(&self) -> Result<Vec<String>, RegistryError> {
		Ok(self
			.record()?
			.attribute_names()
			.map(str::to_string)
			.collect())
	}

	/// Child elements; the record's extras offset dictates their kind.
	pub fn children(&self) -> Result<Vec<ConfigurationElementHandle>, RegistryError> {
		let record = self.record()?;
		let child_kind = record.children_kind();
		Ok(record
			.raw_children
			.iter()
			.map(|&child| ConfigurationElementHandle::new(self.inner.clone(), child, child_kind))
			.collect())
	}

	/// Child elements with the given name.
	pub fn children_named(&self, name: &str) -> Result<Vec<ConfigurationElementHandle>, RegistryError> {
		let data = self.inner.data.read();
		let record = data.objects.element_record(self.id, self.kind)?;
		let child_kind = record.children_kind();
		let mut children = Vec::new();
		for child in data.objects.get_objects(&record.raw_children, child_kind)? {
			let (RegistryRecord::ConfigurationElement(child)
			| RegistryRecord::ThirdLevelConfigurationElement(child)) = child
			else {
				continue;
			};
			if child.name == name {
				children.push(ConfigurationElementHandle::new(
					self.inner.clone(),
					child.id,
					child_kind,
				));
			}
		}
		Ok(children)
	}

	/// The element's parent: another element, or the declaring extension.
	pub fn parent(&self) -> Result<ConfigurationElementParent, RegistryError> {
		let record = self.record()?;
		match record.parent_kind {
			ObjectKind::Extension => Ok(ConfigurationElementParent::Extension(
				ExtensionHandle::new(self.inner.clone(), record.parent_id),
			)),
			ObjectKind::ConfigurationElement | ObjectKind::ThirdLevelConfigurationElement => {
				Ok(ConfigurationElementParent::Element(
					ConfigurationElementHandle::new(
						self.inner.clone(),
						record.parent_id,
						record.parent_kind,
					),
				))
			}
			ObjectKind::ExtensionPoint => Err(RegistryError::OrphanConsistency(format!(
				"element {} claims an extension point as parent",
				self.id
			))),
		}
	}

	/// Walks parent links up to the declaring extension.
	///
	/// The walk is bounded; a cyclic or corrupted parent chain fails with
	/// [`RegistryError::OrphanConsistency`] instead of looping.
	pub fn declaring_extension(&self) -> Result<ExtensionHandle, RegistryError> {
		let mut current = self.clone();
		for _ in 0..MAX_PARENT_WALK {
			match current.parent()? {
				ConfigurationElementParent::Extension(extension) => return Ok(extension),
				ConfigurationElementParent::Element(parent) => current = parent,
			}
		}
		Err(RegistryError::OrphanConsistency(format!(
			"parent chain of element {} exceeds {MAX_PARENT_WALK} hops",
			self.id
		)))
	}

	/// Name of the namespace declaring the containing extension.
	pub fn namespace(&self) -> Result<Option<String>, RegistryError> {
		self.declaring_extension()?.namespace()
	}
}

impl PartialEq for ConfigurationElementHandle {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id && self.kind == other.kind
	}
}

impl Eq for ConfigurationElementHandle {}

impl Hash for ConfigurationElementHandle {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.kind.tag().hash(state);
		self.id.hash(state);
	}
}

impl fmt::Debug for ConfigurationElementHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("ConfigurationElementHandle")
			.field(&self.id)
			.field(&self.kind)
			.finish()
	}
}
