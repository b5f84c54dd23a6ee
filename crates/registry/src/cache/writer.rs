//! Cache emission: four temp files swapped atomically into place.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::trace;

use super::codec::Encoder;
use super::{EXTRA_FILE, MAIN_FILE, NAMESPACE_FILE, NO_OFFSET, TABLE_FILE};
use crate::error::CacheError;
use crate::object::{NamespaceRecord, ObjectId, ObjectKind, ObjectManager, RegistryRecord};

/// Serializes an object manager into the four-file cache layout.
pub(crate) struct CacheWriter {
	main: Encoder,
	extra: Encoder,
	entries: Vec<TocLine>,
}

struct TocLine {
	id: ObjectId,
	kind: ObjectKind,
	main_offset: i64,
	extra_offset: i64,
}

impl CacheWriter {
	/// Writes the full cache for `objects` under `dir` with `stamp`.
	///
	/// Emission happens into temp files first; the live names are replaced
	/// only once every write has completed.
	pub fn save(objects: &ObjectManager, stamp: i64, dir: &Path) -> Result<(), CacheError> {
		let mut writer = Self {
			main: Encoder::new(),
			extra: Encoder::new(),
			entries: Vec::new(),
		};

		let mut namespaces: Vec<&NamespaceRecord> = objects.namespace_records().collect();
		namespaces.sort_by_key(|ns| ns.bundle_id);

		for ns in &namespaces {
			for &point in &ns.extension_points {
				writer.emit_extension_point(objects, point)?;
			}
			for &extension in &ns.extensions {
				writer.emit_extension(objects, extension)?;
			}
		}

		let namespace_buf = writer.encode_namespaces(objects, &namespaces)?;
		let table_buf = writer.encode_table(stamp);

		let main_buf = writer.main.into_bytes();
		let extra_buf = writer.extra.into_bytes();

		let table = write_temp(dir, &table_buf)?;
		let main = write_temp(dir, &main_buf)?;
		let extra = write_temp(dir, &extra_buf)?;
		let namespace = write_temp(dir, &namespace_buf)?;

		persist(table, dir.join(TABLE_FILE))?;
		persist(main, dir.join(MAIN_FILE))?;
		persist(extra, dir.join(EXTRA_FILE))?;
		persist(namespace, dir.join(NAMESPACE_FILE))?;

		trace!(
			objects = writer.entries.len(),
			namespaces = namespaces.len(),
			stamp,
			dir = %dir.display(),
			"cache.saved"
		);
		Ok(())
	}

	fn emit_extension_point(
		&mut self,
		objects: &ObjectManager,
		id: ObjectId,
	) -> Result<(), CacheError> {
		let Some(RegistryRecord::ExtensionPoint(record)) = objects.record(id) else {
			return Ok(());
		};
		// Linked children may reference records already reclaimed by a
		// dispatch cleanup; the file must not carry dangling ids.
		let children = record
			.raw_children
			.as_ref()
			.map(|ids| resident(objects, ids));

		let offset = self.main.offset() as i64;
		self.main.put_u8(ObjectKind::ExtensionPoint.tag());
		self.main.put_str(&record.unique_id)?;
		self.main.put_str(&record.simple_id)?;
		self.main.put_str(&record.label)?;
		self.main.put_opt_str(record.schema.as_deref())?;
		self.main.put_u64(record.bundle_id);
		self.main.put_opt_ids(children.as_deref());
		self.entries.push(TocLine {
			id,
			kind: ObjectKind::ExtensionPoint,
			main_offset: offset,
			extra_offset: NO_OFFSET,
		});
		Ok(())
	}

	fn emit_extension(&mut self, objects: &ObjectManager, id: ObjectId) -> Result<(), CacheError> {
		let Some(RegistryRecord::Extension(record)) = objects.record(id) else {
			return Ok(());
		};
		let offset = self.main.offset() as i64;
		self.main.put_u8(ObjectKind::Extension.tag());
		self.main.put_opt_str(record.simple_id.as_deref())?;
		self.main.put_opt_str(record.namespace.as_deref())?;
		self.main.put_str(&record.label)?;
		self.main.put_str(&record.target)?;
		self.main.put_u64(record.bundle_id);
		self.main.put_ids(&record.raw_children);
		self.entries.push(TocLine {
			id,
			kind: ObjectKind::Extension,
			main_offset: offset,
			extra_offset: NO_OFFSET,
		});
		for &element in record.raw_children.iter() {
			self.emit_element(objects, element, 1)?;
		}
		Ok(())
	}

	/// Emits one configuration element and its subtree.
	///
	/// Depth 1 and 2 bodies go to the main segment; depth 3 and beyond are
	/// third-level records in the extras segment. A depth-2 element's
	/// table entry points at the start of its children's extras region so
	/// readers know which kind the children resolve as.
	fn emit_element(
		&mut self,
		objects: &ObjectManager,
		id: ObjectId,
		depth: u32,
	) -> Result<(), CacheError> {
		let record = match objects.record(id) {
			Some(
				RegistryRecord::ConfigurationElement(record)
				| RegistryRecord::ThirdLevelConfigurationElement(record),
			) => record,
			_ => return Ok(()),
		};

		if depth >= 3 {
			let offset = self.extra.offset() as i64;
			encode_element_body(&mut self.extra, ObjectKind::ThirdLevelConfigurationElement, &record)?;
			self.entries.push(TocLine {
				id,
				kind: ObjectKind::ThirdLevelConfigurationElement,
				main_offset: NO_OFFSET,
				extra_offset: offset,
			});
		} else {
			let extra_offset = if depth == 2 && !record.raw_children.is_empty() {
				self.extra.offset() as i64
			} else {
				NO_OFFSET
			};
			let offset = self.main.offset() as i64;
			encode_element_body(&mut self.main, ObjectKind::ConfigurationElement, &record)?;
			self.entries.push(TocLine {
				id,
				kind: ObjectKind::ConfigurationElement,
				main_offset: offset,
				extra_offset,
			});
		}

		for &child in record.raw_children.iter() {
			self.emit_element(objects, child, depth + 1)?;
		}
		Ok(())
	}

	fn encode_namespaces(
		&self,
		objects: &ObjectManager,
		namespaces: &[&NamespaceRecord],
	) -> Result<Vec<u8>, CacheError> {
		let mut enc = Encoder::new();
		enc.put_i32(namespaces.len() as i32);
		for ns in namespaces {
			enc.put_i32(ns.id);
			enc.put_u64(ns.bundle_id);
			enc.put_opt_str(ns.name.as_deref())?;
			enc.put_ids(&resident(objects, &ns.extension_points));
			enc.put_ids(&resident(objects, &ns.extensions));
		}

		let mut points: Vec<(&String, ObjectId)> = objects
			.point_index()
			.iter()
			.map(|(unique_id, &id)| (unique_id, id))
			.collect();
		points.sort_unstable();
		enc.put_i32(points.len() as i32);
		for (unique_id, id) in points {
			enc.put_str(unique_id)?;
			enc.put_i32(id);
		}

		let mut orphans: Vec<(&String, Vec<ObjectId>)> = objects
			.orphan_table()
			.iter()
			.map(|(target, ids)| (target, resident(objects, ids)))
			.collect();
		orphans.retain(|(_, ids)| !ids.is_empty());
		orphans.sort_unstable();
		enc.put_i32(orphans.len() as i32);
		for (target, ids) in orphans {
			enc.put_str(target)?;
			enc.put_ids(&ids);
		}
		Ok(enc.into_bytes())
	}

	fn encode_table(&self, stamp: i64) -> Vec<u8> {
		let mut enc = Encoder::new();
		enc.put_i64(stamp);
		for line in &self.entries {
			enc.put_i32(line.id);
			enc.put_u8(line.kind.tag());
			enc.put_i64(line.main_offset);
			enc.put_i64(line.extra_offset);
		}
		enc.into_bytes()
	}
}

fn encode_element_body(
	enc: &mut Encoder,
	kind: ObjectKind,
	record: &crate::object::ConfigurationElementRecord,
) -> Result<(), CacheError> {
	enc.put_u8(kind.tag());
	enc.put_str(&record.name)?;
	enc.put_opt_str(record.value.as_deref())?;
	enc.put_strs(&record.attributes)?;
	enc.put_i32(record.parent_id);
	enc.put_u8(record.parent_kind.tag());
	enc.put_u64(record.bundle_id);
	enc.put_ids(&record.raw_children);
	Ok(())
}

/// Filters an id list down to ids with a resident record.
fn resident(objects: &ObjectManager, ids: &[ObjectId]) -> Vec<ObjectId> {
	ids.iter()
		.copied()
		.filter(|&id| objects.kind_of(id).is_some())
		.collect()
}

fn write_temp(dir: &Path, bytes: &[u8]) -> Result<NamedTempFile, CacheError> {
	let mut file = NamedTempFile::new_in(dir)?;
	file.write_all(bytes)?;
	file.flush()?;
	Ok(file)
}

fn persist(file: NamedTempFile, target: std::path::PathBuf) -> Result<(), CacheError> {
	file.persist(target).map_err(|err| CacheError::Io(err.error))?;
	Ok(())
}
