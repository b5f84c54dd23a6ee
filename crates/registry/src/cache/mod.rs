//! Binary registry cache.
//!
//! Four files under a host-provided runtime directory: a fixed-size table
//! of contents keyed by object id (carrying the content stamp), the main
//! record bodies, the extras segment holding third-level
//! configuration-element bodies, and the bundle-keyed namespace table. All
//! integers are little-endian; strings are `u16`-length-prefixed UTF-8 and
//! id arrays are `i32`-count-prefixed.

mod codec;
mod reader;
mod writer;


pub(crate) use reader::{AdoptedCache, CacheReader, ColdStore};
pub(crate) use writer::CacheWriter;

/// Table-of-contents file name.
pub const TABLE_FILE: &str = "registry.table";
/// Main record-body file name.
pub const MAIN_FILE: &str = "registry.main";
/// Extras-segment file name.
pub const EXTRA_FILE: &str = "registry.extra";
/// Namespace-table file name.
pub const NAMESPACE_FILE: &str = "registry.namespaces";

/// Size in bytes of one table-of-contents entry.
pub(crate) const TOC_ENTRY_SIZE: usize = 4 + 1 + 8 + 8;
/// Size in bytes of the table header (the registry stamp).
pub(crate) const TOC_HEADER_SIZE: usize = 8;
/// Sentinel offset marking an absent segment position.
pub(crate) const NO_OFFSET: i64 = -1;
