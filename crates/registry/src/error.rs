use crate::object::{BundleId, ObjectId, ObjectKind};

/// Faults surfaced to registry callers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
	/// A live object exists under this id, but with a different kind.
	#[error("kind mismatch for object {id}: expected {expected:?}, found {found:?}")]
	KindMismatch {
		id: ObjectId,
		expected: ObjectKind,
		found: ObjectKind,
	},

	/// The referenced object is no longer resident.
	#[error("stale handle: object {id} has been removed")]
	StaleHandle { id: ObjectId },

	/// The link graph or orphan table is internally inconsistent.
	#[error("orphan consistency: {0}")]
	OrphanConsistency(String),

	/// An extension point with this unique identifier is already declared.
	#[error("duplicate extension point {unique_id:?}")]
	DuplicateExtensionPoint { unique_id: String },

	/// An extension arrived without a target extension point identifier.
	#[error("extension {label:?} names no target extension point")]
	MissingTarget { label: String },

	/// The bundle already contributes a resident namespace.
	#[error("bundle {bundle_id} already has a resident namespace")]
	NamespaceResident { bundle_id: BundleId },
}

/// Failures while reading or writing the binary cache.
///
/// These never escape the registry: initialization falls back to an empty
/// manager and `stop` simply leaves the cache un-refreshed.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
	#[error("cache i/o: {0}")]
	Io(#[from] std::io::Error),

	#[error("cache format: {0}")]
	Format(String),

	#[error("cache stamp mismatch: expected {expected}, found {found}")]
	StampMismatch { expected: i64, found: i64 },
}
