//! Dynamic extension registry.
//!
//! An in-memory, lazily-loaded database of declarative *extension points*
//! and *extensions* contributed by dynamically installed *namespaces*.
//! Clients discover which contributors plugged into which points, walk the
//! configuration-element trees carried by each contribution, and subscribe
//! to change events fired as namespaces come and go. A compact binary cache
//! lets a restart adopt the previous state without re-ingesting manifests
//! when the content stamp still matches.
//!
//! # Concurrency model
//!
//! A single read/write monitor guards the object graph: queries share it,
//! mutations hold it exclusively. Change events are broadcast from one
//! dedicated dispatch thread, one job at a time in submission order, on
//! snapshots captured at scheduling time; physical removal of outgoing
//! records happens only after every listener has seen the deltas, so
//! handles stay valid for the whole callback.

mod config;
mod delta;
mod dispatch;
mod error;
mod event;
mod handle;
mod model;
mod object;
mod registry;
mod resolver;

pub mod cache;
pub mod stamp;

pub use config::RegistryConfig;
pub use delta::{DeltaKind, ExtensionDelta, RegistryDelta};
pub use dispatch::{DispatchStatus, ListenerFailure};
pub use error::{CacheError, RegistryError};
pub use event::{RegistryChangeEvent, RegistryChangeListener};
pub use handle::{
	ConfigurationElementHandle, ConfigurationElementParent, ExtensionHandle, ExtensionPointHandle,
};
pub use model::{
	ElementDescription, ExtensionDescription, ExtensionPointDescription, NamespaceDescription,
};
pub use object::{BundleId, NestedObject, ObjectId, ObjectKind, RegistryObject};
pub use registry::ExtensionRegistry;
