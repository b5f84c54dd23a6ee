//! Cache adoption and lazy fault-in of cold records.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::warn;

use super::codec::Decoder;
use super::{EXTRA_FILE, MAIN_FILE, NAMESPACE_FILE, NO_OFFSET, TABLE_FILE, TOC_ENTRY_SIZE, TOC_HEADER_SIZE};
use crate::error::CacheError;
use crate::object::{
	BundleId, ConfigurationElementRecord, ExtensionPointRecord, ExtensionRecord, NamespaceRecord,
	ObjectId, ObjectKind, RegistryRecord,
};

/// One table-of-contents entry: where a record body lives.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TocEntry {
	pub kind: ObjectKind,
	pub main_offset: i64,
	pub extra_offset: i64,
}

/// Cold half of the object manager: record bodies still in cache form.
///
/// Faulted rows are memoized behind their own mutex so concurrent readers
/// can fault in while holding only the registry's read lock.
pub(crate) struct ColdStore {
	toc: FxHashMap<ObjectId, TocEntry>,
	main: Vec<u8>,
	extra: Vec<u8>,
	faulted: Mutex<FxHashMap<ObjectId, RegistryRecord>>,
}

impl ColdStore {
	/// Kind recorded in the table of contents for `id`.
	pub fn kind_of(&self, id: ObjectId) -> Option<ObjectKind> {
		self.toc.get(&id).map(|entry| entry.kind)
	}

	/// Faults in the record body for `id`, memoizing the decoded row.
	///
	/// A record that fails to decode is reported and treated as absent;
	/// the id then resolves as stale.
	pub fn get(&self, id: ObjectId) -> Option<RegistryRecord> {
		let entry = *self.toc.get(&id)?;
		let mut faulted = self.faulted.lock();
		if let Some(record) = faulted.get(&id) {
			return Some(record.clone());
		}
		match self.decode(id, entry) {
			Ok(record) => {
				faulted.insert(id, record.clone());
				Some(record)
			}
			Err(err) => {
				warn!(id, error = %err, "cache.fault_failed");
				None
			}
		}
	}

	/// Drops every trace of `id` from the cold layers.
	pub fn remove(&mut self, id: ObjectId) {
		self.toc.remove(&id);
		self.faulted.get_mut().remove(&id);
	}

	/// Decodes every record body, for the eager-loading path.
	pub fn load_all(&self) -> Result<Vec<RegistryRecord>, CacheError> {
		let mut records = Vec::with_capacity(self.toc.len());
		for (&id, &entry) in &self.toc {
			records.push(self.decode(id, entry)?);
		}
		Ok(records)
	}

	fn decode(&self, id: ObjectId, entry: TocEntry) -> Result<RegistryRecord, CacheError> {
		let (segment, offset) = match entry.kind {
			ObjectKind::ThirdLevelConfigurationElement => (&self.extra, entry.extra_offset),
			_ => (&self.main, entry.main_offset),
		};
		let offset = usize::try_from(offset)
			.map_err(|_| CacheError::Format(format!("negative body offset for object {id}")))?;
		let mut body = Decoder::at(segment, offset)?;

		let tag = body.u8()?;
		if tag != entry.kind.tag() {
			return Err(CacheError::Format(format!(
				"object {id}: body tag {tag} does not match table kind {:?}",
				entry.kind
			)));
		}

		let record = match entry.kind {
			ObjectKind::ExtensionPoint => RegistryRecord::ExtensionPoint(Arc::new(ExtensionPointRecord {
				id,
				unique_id: body.str()?,
				simple_id: body.str()?,
				label: body.str()?,
				schema: body.opt_str()?,
				bundle_id: body.u64()?,
				raw_children: body.opt_ids()?,
			})),
			ObjectKind::Extension => RegistryRecord::Extension(Arc::new(ExtensionRecord {
				id,
				simple_id: body.opt_str()?,
				namespace: body.opt_str()?,
				label: body.str()?,
				target: body.str()?,
				bundle_id: body.u64()?,
				raw_children: body.ids()?,
			})),
			ObjectKind::ConfigurationElement | ObjectKind::ThirdLevelConfigurationElement => {
				let name = body.str()?;
				let value = body.opt_str()?;
				let attributes = body.strs()?;
				let parent_id = body.i32()?;
				let parent_tag = body.u8()?;
				let parent_kind = ObjectKind::from_tag(parent_tag).ok_or_else(|| {
					CacheError::Format(format!("object {id}: invalid parent kind {parent_tag}"))
				})?;
				let bundle_id = body.u64()?;
				let raw_children = body.ids()?;
				let record = Arc::new(ConfigurationElementRecord {
					id,
					bundle_id,
					name,
					value,
					attributes,
					parent_id,
					parent_kind,
					raw_children,
					extra_offset: (entry.extra_offset != NO_OFFSET).then_some(entry.extra_offset),
				});
				match entry.kind {
					ObjectKind::ConfigurationElement => RegistryRecord::ConfigurationElement(record),
					_ => RegistryRecord::ThirdLevelConfigurationElement(record),
				}
			}
		};
		Ok(record)
	}
}

/// Everything adopted from a valid cache directory.
pub(crate) struct AdoptedCache {
	pub cold: ColdStore,
	pub namespaces: FxHashMap<BundleId, NamespaceRecord>,
	pub point_index: FxHashMap<String, ObjectId>,
	pub orphans: FxHashMap<String, Vec<ObjectId>>,
	/// Id allocation resumes above every id found in the table segment.
	pub next_id: ObjectId,
}

/// Opens and validates the four cache files.
pub(crate) struct CacheReader;

impl CacheReader {
	/// Reads the cache under `dir`, validating the content stamp.
	///
	/// A zero stamp on either side matches anything; two differing nonzero
	/// stamps fail with [`CacheError::StampMismatch`].
	pub fn open(dir: &Path, expected_stamp: i64) -> Result<AdoptedCache, CacheError> {
		let table = fs::read(dir.join(TABLE_FILE))?;
		let main = fs::read(dir.join(MAIN_FILE))?;
		let extra = fs::read(dir.join(EXTRA_FILE))?;
		let namespace = fs::read(dir.join(NAMESPACE_FILE))?;

		let mut header = Decoder::new(&table);
		let stamp = header.i64()?;
		if stamp != 0 && expected_stamp != 0 && stamp != expected_stamp {
			return Err(CacheError::StampMismatch {
				expected: expected_stamp,
				found: stamp,
			});
		}

		let body_len = table.len() - TOC_HEADER_SIZE;
		if body_len % TOC_ENTRY_SIZE != 0 {
			return Err(CacheError::Format(format!(
				"table body of {body_len} bytes is not a whole number of entries"
			)));
		}
		let mut toc = FxHashMap::default();
		let mut next_id: ObjectId = 1;
		for _ in 0..body_len / TOC_ENTRY_SIZE {
			let id = header.i32()?;
			let tag = header.u8()?;
			let kind = ObjectKind::from_tag(tag)
				.ok_or_else(|| CacheError::Format(format!("object {id}: invalid kind tag {tag}")))?;
			let main_offset = header.i64()?;
			let extra_offset = header.i64()?;
			toc.insert(
				id,
				TocEntry {
					kind,
					main_offset,
					extra_offset,
				},
			);
			next_id = next_id.max(id + 1);
		}

		let mut ns = Decoder::new(&namespace);
		let ns_count = ns.i32()?;
		let mut namespaces = FxHashMap::default();
		for _ in 0..ns_count {
			let id = ns.i32()?;
			let bundle_id = ns.u64()?;
			let name = ns.opt_str()?;
			let extension_points = ns.ids()?;
			let extensions = ns.ids()?;
			next_id = next_id.max(id + 1);
			namespaces.insert(
				bundle_id,
				NamespaceRecord {
					id,
					bundle_id,
					name,
					extension_points,
					extensions,
				},
			);
		}

		let point_count = ns.i32()?;
		let mut point_index = FxHashMap::default();
		for _ in 0..point_count {
			let unique_id = ns.str()?;
			let id = ns.i32()?;
			if !toc.contains_key(&id) {
				return Err(CacheError::Format(format!(
					"extension point {unique_id:?} references missing object {id}"
				)));
			}
			point_index.insert(unique_id, id);
		}

		let orphan_count = ns.i32()?;
		let mut orphans = FxHashMap::default();
		for _ in 0..orphan_count {
			let target = ns.str()?;
			let ids = ns.ids()?;
			orphans.insert(target, ids);
		}
		if !ns.is_empty() {
			return Err(CacheError::Format("trailing bytes in namespace table".into()));
		}

		Ok(AdoptedCache {
			cold: ColdStore {
				toc,
				main,
				extra,
				faulted: Mutex::new(FxHashMap::default()),
			},
			namespaces,
			point_index,
			orphans,
			next_id,
		})
	}
}
