//! Avro binary decoding primitives.

use crate::{Error, IcebergResult};

/// Reads Avro-encoded primitives from a byte slice, tracking position.
/// Every read checks for truncation and surfaces [`Error::CodecFormat`]
/// rather than panicking on malformed input.
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos == self.buf.len()
    }

    fn take(&mut self, n: usize) -> IcebergResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::codec(format!(
                "truncated buffer: needed {n} bytes at offset {}, {} remain",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_boolean(&mut self) -> IcebergResult<bool> {
        match self.take(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::codec(format!("invalid boolean byte {other:#04x}"))),
        }
    }

    pub fn read_int(&mut self) -> IcebergResult<i32> {
        let v = self.read_long()?;
        i32::try_from(v).map_err(|_| Error::codec(format!("int value {v} out of range")))
    }

    pub fn read_long(&mut self) -> IcebergResult<i64> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.take(1)?[0];
            if shift >= 64 {
                return Err(Error::codec("variable-length long exceeds 10 bytes"));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        // undo zig-zag
        Ok(((value >> 1) as i64) ^ -((value & 1) as i64))
    }

    pub fn read_float(&mut self) -> IcebergResult<f32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(f32::from_le_bytes(bytes))
    }

    pub fn read_double(&mut self) -> IcebergResult<f64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(f64::from_le_bytes(bytes))
    }

    pub fn read_bytes(&mut self) -> IcebergResult<Vec<u8>> {
        let len = self.read_long()?;
        let len = usize::try_from(len)
            .map_err(|_| Error::codec(format!("negative byte length {len}")))?;
        Ok(self.take(len)?.to_vec())
    }

    pub fn read_string(&mut self) -> IcebergResult<String> {
        String::from_utf8(self.read_bytes()?)
            .map_err(|_| Error::codec("string value is not valid UTF-8"))
    }

    pub fn read_fixed(&mut self, len: usize) -> IcebergResult<Vec<u8>> {
        Ok(self.take(len)?.to_vec())
    }

    pub fn read_enum(&mut self) -> IcebergResult<i32> {
        self.read_int()
    }

    /// Reads a union branch index, validating it against the number of
    /// branches in the schema.
    pub fn read_union_branch(&mut self, branches: i64) -> IcebergResult<i64> {
        let branch = self.read_long()?;
        if !(0..branches).contains(&branch) {
            return Err(Error::codec(format!(
                "invalid union branch {branch} (schema has {branches})"
            )));
        }
        Ok(branch)
    }

    /// Reads a `["null", T]` union: `None` for branch 0, the decoded value
    /// for branch 1.
    pub fn read_optional<T>(
        &mut self,
        mut read: impl FnMut(&mut Self) -> IcebergResult<T>,
    ) -> IcebergResult<Option<T>> {
        match self.read_union_branch(2)? {
            0 => Ok(None),
            _ => Ok(Some(read(self)?)),
        }
    }

    /// Reads one array/map block header, returning the item count. Per the
    /// Avro spec a negative count is followed by the block's byte length
    /// (there to let readers skip blocks wholesale); we consume the length
    /// and return the absolute count.
    pub fn read_block_count(&mut self) -> IcebergResult<i64> {
        let count = self.read_long()?;
        if count < 0 {
            let _byte_length = self.read_long()?;
            Ok(-count)
        } else {
            Ok(count)
        }
    }

    /// Reads a complete array written as any number of blocks.
    pub fn read_array<T>(
        &mut self,
        mut read: impl FnMut(&mut Self) -> IcebergResult<T>,
    ) -> IcebergResult<Vec<T>> {
        let mut items = Vec::new();
        loop {
            let count = self.read_block_count()?;
            if count == 0 {
                return Ok(items);
            }
            for _ in 0..count {
                items.push(read(self)?);
            }
        }
    }

    /// Reads a complete string-keyed map written as any number of blocks.
    pub fn read_map<T>(
        &mut self,
        mut read: impl FnMut(&mut Self) -> IcebergResult<T>,
    ) -> IcebergResult<Vec<(String, T)>> {
        let mut entries = Vec::new();
        loop {
            let count = self.read_block_count()?;
            if count == 0 {
                return Ok(entries);
            }
            for _ in 0..count {
                let key = self.read_string()?;
                entries.push((key, read(self)?));
            }
        }
    }
}
