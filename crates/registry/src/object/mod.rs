//! Registry object model: kind-tagged records keyed by integer id.
//!
//! All cross-record edges are id-valued and resolved through the
//! [`ObjectManager`], so the parent/child graph carries no owning pointer
//! cycles.

mod manager;

#[cfg(test)]
mod tests;

use std::sync::Arc;

pub use manager::{AddedNamespace, ObjectManager};

/// Stable integer identifier of a registry object.
///
/// Allocation is strictly monotonic within a registry lifetime; ids freed
/// by removal are never reused.
pub type ObjectId = i32;

/// Identifier of the bundle owning a contribution.
pub type BundleId = u64;

/// Kind tag discriminating the per-kind object tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectKind {
	ExtensionPoint = 1,
	Extension = 2,
	ConfigurationElement = 3,
	ThirdLevelConfigurationElement = 4,
}

impl ObjectKind {
	/// Decodes a cache tag byte.
	pub fn from_tag(tag: u8) -> Option<Self> {
		match tag {
			1 => Some(Self::ExtensionPoint),
			2 => Some(Self::Extension),
			3 => Some(Self::ConfigurationElement),
			4 => Some(Self::ThirdLevelConfigurationElement),
			_ => None,
		}
	}

	/// Returns the cache tag byte.
	pub fn tag(self) -> u8 {
		self as u8
	}
}

/// Shared contract of all kind-tagged records.
pub trait RegistryObject {
	/// Stable object id.
	fn id(&self) -> ObjectId;
	/// Owning bundle.
	fn bundle_id(&self) -> BundleId;
	/// Ids of directly dependent records, in insertion order.
	fn raw_children(&self) -> &[ObjectId];
	/// Replaces the dependent-record list; `None` detaches.
	fn set_raw_children(&mut self, children: Option<Vec<ObjectId>>);
}

/// A [`RegistryObject`] that carries an element name.
pub trait NestedObject: RegistryObject {
	/// Element name.
	fn name(&self) -> &str;
}

/// A declared extension point.
#[derive(Debug, Clone)]
pub struct ExtensionPointRecord {
	pub id: ObjectId,
	pub bundle_id: BundleId,
	/// Globally unique dotted identifier (`<namespace>.<simple>`).
	pub unique_id: String,
	pub simple_id: String,
	pub label: String,
	pub schema: Option<String>,
	/// Ids of the extensions currently linked in; `None` when detached.
	pub raw_children: Option<Vec<ObjectId>>,
}

impl RegistryObject for ExtensionPointRecord {
	fn id(&self) -> ObjectId {
		self.id
	}

	fn bundle_id(&self) -> BundleId {
		self.bundle_id
	}

	fn raw_children(&self) -> &[ObjectId] {
		self.raw_children.as_deref().unwrap_or(&[])
	}

	fn set_raw_children(&mut self, children: Option<Vec<ObjectId>>) {
		self.raw_children = children;
	}
}

/// A contribution targeting an extension point.
#[derive(Debug, Clone)]
pub struct ExtensionRecord {
	pub id: ObjectId,
	pub bundle_id: BundleId,
	pub simple_id: Option<String>,
	/// Name of the declaring namespace; `None` for anonymous contributors.
	pub namespace: Option<String>,
	pub label: String,
	/// Dotted identifier of the extension point this extension claims.
	pub target: String,
	/// Top-level configuration-element ids.
	pub raw_children: Vec<ObjectId>,
}

impl ExtensionRecord {
	/// Fully qualified identifier, when a simple id was declared.
	pub fn unique_id(&self) -> Option<String> {
		match (&self.namespace, &self.simple_id) {
			(Some(ns), Some(simple)) => Some(format!("{ns}.{simple}")),
			_ => None,
		}
	}
}

impl RegistryObject for ExtensionRecord {
	fn id(&self) -> ObjectId {
		self.id
	}

	fn bundle_id(&self) -> BundleId {
		self.bundle_id
	}

	fn raw_children(&self) -> &[ObjectId] {
		&self.raw_children
	}

	fn set_raw_children(&mut self, children: Option<Vec<ObjectId>>) {
		self.raw_children = children.unwrap_or_default();
	}
}

/// One node of the declarative tree carried by an extension.
///
/// The same record backs both configuration-element kinds: a populated
/// `extra_offset` on a cache-adopted record marks third-level storage, and
/// a parent's `extra_offset` decides which kind its children resolve as.
#[derive(Debug, Clone)]
pub struct ConfigurationElementRecord {
	pub id: ObjectId,
	pub bundle_id: BundleId,
	pub name: String,
	pub value: Option<String>,
	/// Interleaved attribute names and values.
	pub attributes: Vec<String>,
	pub parent_id: ObjectId,
	pub parent_kind: ObjectKind,
	pub raw_children: Vec<ObjectId>,
	/// Offset into the cache extras segment, for third-level storage.
	pub extra_offset: Option<i64>,
}

impl ConfigurationElementRecord {
	/// Looks up an attribute value by name.
	pub fn attribute(&self, name: &str) -> Option<&str> {
		self.attributes
			.chunks_exact(2)
			.find(|pair| pair[0] == name)
			.map(|pair| pair[1].as_str())
	}

	/// Attribute names in declaration order.
	pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
		self.attributes.chunks_exact(2).map(|pair| pair[0].as_str())
	}

	/// Kind the children of this element resolve as.
	pub fn children_kind(&self) -> ObjectKind {
		if self.extra_offset.is_some() {
			ObjectKind::ThirdLevelConfigurationElement
		} else {
			ObjectKind::ConfigurationElement
		}
	}
}

impl RegistryObject for ConfigurationElementRecord {
	fn id(&self) -> ObjectId {
		self.id
	}

	fn bundle_id(&self) -> BundleId {
		self.bundle_id
	}

	fn raw_children(&self) -> &[ObjectId] {
		&self.raw_children
	}

	fn set_raw_children(&mut self, children: Option<Vec<ObjectId>>) {
		self.raw_children = children.unwrap_or_default();
	}
}

impl NestedObject for ConfigurationElementRecord {
	fn name(&self) -> &str {
		&self.name
	}
}

/// The contribution record of one resident bundle.
#[derive(Debug, Clone)]
pub struct NamespaceRecord {
	pub id: ObjectId,
	pub bundle_id: BundleId,
	/// Dotted unique identifier; `None` for anonymous contributors.
	pub name: Option<String>,
	pub extension_points: Vec<ObjectId>,
	pub extensions: Vec<ObjectId>,
}

/// A kind-tagged record snapshot handed out by the object manager.
#[derive(Debug, Clone)]
pub enum RegistryRecord {
	ExtensionPoint(Arc<ExtensionPointRecord>),
	Extension(Arc<ExtensionRecord>),
	ConfigurationElement(Arc<ConfigurationElementRecord>),
	ThirdLevelConfigurationElement(Arc<ConfigurationElementRecord>),
}

impl RegistryRecord {
	/// Kind tag of the wrapped record.
	pub fn kind(&self) -> ObjectKind {
		match self {
			Self::ExtensionPoint(_) => ObjectKind::ExtensionPoint,
			Self::Extension(_) => ObjectKind::Extension,
			Self::ConfigurationElement(_) => ObjectKind::ConfigurationElement,
			Self::ThirdLevelConfigurationElement(_) => ObjectKind::ThirdLevelConfigurationElement,
		}
	}

	/// Ids of directly dependent records.
	pub fn raw_children(&self) -> &[ObjectId] {
		match self {
			Self::ExtensionPoint(r) => r.raw_children(),
			Self::Extension(r) => &r.raw_children,
			Self::ConfigurationElement(r) | Self::ThirdLevelConfigurationElement(r) => {
				&r.raw_children
			}
		}
	}
}
