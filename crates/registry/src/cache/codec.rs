//! Little-endian encoding primitives for the cache files.

use crate::error::CacheError;
use crate::object::ObjectId;

/// Count sentinel encoding a detached (`None`) id list.
const NONE_LEN: i32 = -1;

/// Append-only little-endian buffer.
pub(crate) struct Encoder {
	buf: Vec<u8>,
}

impl Encoder {
	pub fn new() -> Self {
		Self { buf: Vec::new() }
	}

	/// Current length, used as the offset of the next body.
	pub fn offset(&self) -> usize {
		self.buf.len()
	}

	pub fn into_bytes(self) -> Vec<u8> {
		self.buf
	}

	pub fn put_u8(&mut self, value: u8) {
		self.buf.push(value);
	}

	pub fn put_i32(&mut self, value: i32) {
		self.buf.extend_from_slice(&value.to_le_bytes());
	}

	pub fn put_i64(&mut self, value: i64) {
		self.buf.extend_from_slice(&value.to_le_bytes());
	}

	pub fn put_u64(&mut self, value: u64) {
		self.buf.extend_from_slice(&value.to_le_bytes());
	}

	pub fn put_str(&mut self, value: &str) -> Result<(), CacheError> {
		let len = u16::try_from(value.len())
			.map_err(|_| CacheError::Format(format!("string of {} bytes overflows u16", value.len())))?;
		self.buf.extend_from_slice(&len.to_le_bytes());
		self.buf.extend_from_slice(value.as_bytes());
		Ok(())
	}

	pub fn put_opt_str(&mut self, value: Option<&str>) -> Result<(), CacheError> {
		match value {
			Some(value) => {
				self.put_u8(1);
				self.put_str(value)
			}
			None => {
				self.put_u8(0);
				Ok(())
			}
		}
	}

	pub fn put_ids(&mut self, ids: &[ObjectId]) {
		self.put_i32(ids.len() as i32);
		for &id in ids {
			self.put_i32(id);
		}
	}

	pub fn put_opt_ids(&mut self, ids: Option<&[ObjectId]>) {
		match ids {
			Some(ids) => self.put_ids(ids),
			None => self.put_i32(NONE_LEN),
		}
	}

	pub fn put_strs(&mut self, values: &[String]) -> Result<(), CacheError> {
		self.put_i32(values.len() as i32);
		for value in values {
			self.put_str(value)?;
		}
		Ok(())
	}
}

/// Forward-only little-endian reader over a byte slice.
pub(crate) struct Decoder<'a> {
	buf: &'a [u8],
	pos: usize,
}

impl<'a> Decoder<'a> {
	pub fn new(buf: &'a [u8]) -> Self {
		Self { buf, pos: 0 }
	}

	/// Starts decoding at `offset` into the buffer.
	pub fn at(buf: &'a [u8], offset: usize) -> Result<Self, CacheError> {
		if offset > buf.len() {
			return Err(CacheError::Format(format!(
				"offset {offset} past end of {}-byte segment",
				buf.len()
			)));
		}
		Ok(Self { buf, pos: offset })
	}

	pub fn is_empty(&self) -> bool {
		self.pos >= self.buf.len()
	}

	fn take(&mut self, len: usize) -> Result<&'a [u8], CacheError> {
		let end = self
			.pos
			.checked_add(len)
			.filter(|&end| end <= self.buf.len())
			.ok_or_else(|| CacheError::Format("truncated record".into()))?;
		let slice = &self.buf[self.pos..end];
		self.pos = end;
		Ok(slice)
	}

	pub fn u8(&mut self) -> Result<u8, CacheError> {
		Ok(self.take(1)?[0])
	}

	pub fn i32(&mut self) -> Result<i32, CacheError> {
		let bytes = self.take(4)?;
		Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
	}

	pub fn i64(&mut self) -> Result<i64, CacheError> {
		let mut bytes = [0u8; 8];
		bytes.copy_from_slice(self.take(8)?);
		Ok(i64::from_le_bytes(bytes))
	}

	pub fn u64(&mut self) -> Result<u64, CacheError> {
		let mut bytes = [0u8; 8];
		bytes.copy_from_slice(self.take(8)?);
		Ok(u64::from_le_bytes(bytes))
	}

	pub fn str(&mut self) -> Result<String, CacheError> {
		let len_bytes = self.take(2)?;
		let len = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;
		let bytes = self.take(len)?;
		String::from_utf8(bytes.to_vec())
			.map_err(|_| CacheError::Format("invalid utf-8 in string".into()))
	}

	pub fn opt_str(&mut self) -> Result<Option<String>, CacheError> {
		match self.u8()? {
			0 => Ok(None),
			1 => Ok(Some(self.str()?)),
			flag => Err(CacheError::Format(format!("invalid option flag {flag}"))),
		}
	}

	fn id_list(&mut self, count: i32) -> Result<Vec<ObjectId>, CacheError> {
		let count = usize::try_from(count)
			.map_err(|_| CacheError::Format(format!("invalid id-array count {count}")))?;
		let mut ids = Vec::with_capacity(count.min(1024));
		for _ in 0..count {
			ids.push(self.i32()?);
		}
		Ok(ids)
	}

	pub fn ids(&mut self) -> Result<Vec<ObjectId>, CacheError> {
		let count = self.i32()?;
		self.id_list(count)
	}

	pub fn opt_ids(&mut self) -> Result<Option<Vec<ObjectId>>, CacheError> {
		let count = self.i32()?;
		if count == NONE_LEN {
			return Ok(None);
		}
		Ok(Some(self.id_list(count)?))
	}

	pub fn strs(&mut self) -> Result<Vec<String>, CacheError> {
		let count = self.i32()?;
		let count = usize::try_from(count)
			.map_err(|_| CacheError::Format(format!("invalid string-array count {count}")))?;
		let mut values = Vec::with_capacity(count.min(1024));
		for _ in 0..count {
			values.push(self.str()?);
		}
		Ok(values)
	}
}
