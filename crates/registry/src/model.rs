//! Ingester-facing contribution descriptions.
//!
//! The manifest parser lives outside this crate and delivers fully
//! populated descriptions; the registry trusts them, allocates ids, and
//! owns the records built from them.

use crate::object::BundleId;

/// The contribution of one dynamically installed unit.
#[derive(Debug, Clone)]
pub struct NamespaceDescription {
	/// Dotted unique identifier. `None` marks an anonymous contributor
	/// whose content is stored but never linked.
	pub name: Option<String>,
	/// Owning bundle.
	pub bundle_id: BundleId,
	/// Extension points declared by this contributor.
	pub extension_points: Vec<ExtensionPointDescription>,
	/// Extensions declared by this contributor.
	pub extensions: Vec<ExtensionDescription>,
}

impl NamespaceDescription {
	/// Creates an empty named contribution.
	pub fn new(name: impl Into<String>, bundle_id: BundleId) -> Self {
		Self {
			name: Some(name.into()),
			bundle_id,
			extension_points: Vec::new(),
			extensions: Vec::new(),
		}
	}

	/// Creates an empty anonymous contribution.
	pub fn anonymous(bundle_id: BundleId) -> Self {
		Self {
			name: None,
			bundle_id,
			extension_points: Vec::new(),
			extensions: Vec::new(),
		}
	}

	/// Adds an extension point declaration.
	pub fn with_extension_point(mut self, point: ExtensionPointDescription) -> Self {
		self.extension_points.push(point);
		self
	}

	/// Adds an extension declaration.
	pub fn with_extension(mut self, extension: ExtensionDescription) -> Self {
		self.extensions.push(extension);
		self
	}
}

/// A declared socket other contributors may plug into.
#[derive(Debug, Clone)]
pub struct ExtensionPointDescription {
	/// Identifier relative to the declaring namespace.
	pub simple_id: String,
	/// Human-readable label.
	pub label: String,
	/// Reference to the schema describing valid contributions.
	pub schema: Option<String>,
}

impl ExtensionPointDescription {
	/// Creates a point declaration with no schema reference.
	pub fn new(simple_id: impl Into<String>, label: impl Into<String>) -> Self {
		Self {
			simple_id: simple_id.into(),
			label: label.into(),
			schema: None,
		}
	}
}

/// A contribution targeting an extension point by dotted identifier.
#[derive(Debug, Clone)]
pub struct ExtensionDescription {
	/// Identifier relative to the declaring namespace, if any.
	pub simple_id: Option<String>,
	/// Human-readable label.
	pub label: String,
	/// Dotted identifier of the extension point this contribution targets.
	pub target: String,
	/// Declarative payload carried by the extension.
	pub elements: Vec<ElementDescription>,
}

impl ExtensionDescription {
	/// Creates an extension targeting `target`.
	pub fn new(target: impl Into<String>, label: impl Into<String>) -> Self {
		Self {
			simple_id: None,
			label: label.into(),
			target: target.into(),
			elements: Vec::new(),
		}
	}

	/// Sets the extension's simple identifier.
	pub fn with_id(mut self, simple_id: impl Into<String>) -> Self {
		self.simple_id = Some(simple_id.into());
		self
	}

	/// Adds a top-level configuration element.
	pub fn with_element(mut self, element: ElementDescription) -> Self {
		self.elements.push(element);
		self
	}
}

/// One node of the declarative tree carried by an extension.
#[derive(Debug, Clone)]
pub struct ElementDescription {
	/// Element name.
	pub name: String,
	/// Text content, if any.
	pub value: Option<String>,
	/// Attribute name/value pairs in declaration order.
	pub attributes: Vec<(String, String)>,
	/// Nested elements.
	pub children: Vec<ElementDescription>,
}

impl ElementDescription {
	/// Creates an element with no value, attributes, or children.
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			value: None,
			attributes: Vec::new(),
			children: Vec::new(),
		}
	}

	/// Sets the element's text content.
	pub fn with_value(mut self, value: impl Into<String>) -> Self {
		self.value = Some(value.into());
		self
	}

	/// Appends an attribute pair.
	pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.attributes.push((name.into(), value.into()));
		self
	}

	/// Appends a nested element.
	pub fn with_child(mut self, child: ElementDescription) -> Self {
		self.children.push(child);
		self
	}
}
