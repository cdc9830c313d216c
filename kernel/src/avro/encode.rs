//! Avro binary encoding primitives.

/// Appends Avro-encoded primitives to an in-memory buffer.
///
/// Integers use zig-zag variable-length encoding; floats are little-endian
/// IEEE-754; byte sequences are length-prefixed; `null` encodes to zero
/// bytes. Unions encode the branch index as a long before the branch value,
/// and arrays/maps encode one or more `(count, items...)` blocks terminated
/// by a zero-count block.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// `null` occupies zero bytes on the wire.
    pub fn write_null(&mut self) {}

    pub fn write_boolean(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    pub fn write_int(&mut self, v: i32) {
        self.write_varint(zigzag32(v) as u64);
    }

    pub fn write_long(&mut self, v: i64) {
        self.write_varint(zigzag64(v));
    }

    pub fn write_float(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_double(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_bytes(&mut self, v: &[u8]) {
        self.write_long(v.len() as i64);
        self.buf.extend_from_slice(v);
    }

    pub fn write_string(&mut self, v: &str) {
        self.write_bytes(v.as_bytes());
    }

    /// `fixed` writes exactly the value's bytes, no length prefix.
    pub fn write_fixed(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    /// Enums encode as the int ordinal of the symbol.
    pub fn write_enum(&mut self, ordinal: i32) {
        self.write_int(ordinal);
    }

    /// Writes the zig-zag branch index that precedes a union value.
    pub fn write_union_branch(&mut self, branch: i64) {
        self.write_long(branch);
    }

    /// Convenience for the ubiquitous `["null", T]` union: branch 0 for
    /// `None`, branch 1 followed by the value for `Some`.
    pub fn write_optional<T>(&mut self, value: Option<T>, mut write: impl FnMut(&mut Self, T)) {
        match value {
            None => self.write_union_branch(0),
            Some(v) => {
                self.write_union_branch(1);
                write(self, v);
            }
        }
    }

    /// Writes a complete array: one block when non-empty, then the zero-count
    /// terminator.
    pub fn write_array<T>(
        &mut self,
        items: impl ExactSizeIterator<Item = T>,
        mut write: impl FnMut(&mut Self, T),
    ) {
        if items.len() > 0 {
            self.write_long(items.len() as i64);
            for item in items {
                write(self, item);
            }
        }
        self.write_long(0);
    }

    /// Writes a complete map with string keys, same block structure as
    /// arrays.
    pub fn write_map<'k, T>(
        &mut self,
        entries: impl ExactSizeIterator<Item = (&'k str, T)>,
        mut write: impl FnMut(&mut Self, T),
    ) {
        if entries.len() > 0 {
            self.write_long(entries.len() as i64);
            for (key, value) in entries {
                self.write_string(key);
                write(self, value);
            }
        }
        self.write_long(0);
    }

    fn write_varint(&mut self, mut v: u64) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                self.buf.push(byte);
                break;
            }
            self.buf.push(byte | 0x80);
        }
    }
}

fn zigzag32(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}

fn zigzag64(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(f: impl FnOnce(&mut Encoder)) -> Vec<u8> {
        let mut enc = Encoder::new();
        f(&mut enc);
        enc.into_bytes()
    }

    #[test]
    fn null_is_zero_bytes_and_boolean_is_one() {
        assert!(encoded(|e| e.write_null()).is_empty());
        assert_eq!(encoded(|e| e.write_boolean(true)), vec![1]);
        assert_eq!(encoded(|e| e.write_boolean(false)), vec![0]);
    }

    #[test]
    fn zigzag_examples_from_the_avro_spec() {
        assert_eq!(encoded(|e| e.write_long(0)), vec![0x00]);
        assert_eq!(encoded(|e| e.write_long(-1)), vec![0x01]);
        assert_eq!(encoded(|e| e.write_long(1)), vec![0x02]);
        assert_eq!(encoded(|e| e.write_long(-2)), vec![0x03]);
        assert_eq!(encoded(|e| e.write_long(2)), vec![0x04]);
        assert_eq!(encoded(|e| e.write_long(-64)), vec![0x7f]);
        assert_eq!(encoded(|e| e.write_long(64)), vec![0x80, 0x01]);
        assert_eq!(encoded(|e| e.write_int(i32::MIN)), vec![0xff, 0xff, 0xff, 0xff, 0x0f]);
    }

    #[test]
    fn floats_are_little_endian_ieee754() {
        assert_eq!(encoded(|e| e.write_float(1.0)), vec![0, 0, 0x80, 0x3f]);
        assert_eq!(
            encoded(|e| e.write_double(1.0)),
            vec![0, 0, 0, 0, 0, 0, 0xf0, 0x3f]
        );
    }

    #[test]
    fn strings_are_length_prefixed() {
        assert_eq!(
            encoded(|e| e.write_string("foo")),
            vec![0x06, b'f', b'o', b'o']
        );
    }

    #[test]
    fn empty_array_is_a_bare_terminator() {
        assert_eq!(
            encoded(|e| e.write_array(std::iter::empty::<i64>(), |e, v| e.write_long(v))),
            vec![0x00]
        );
    }

    #[test]
    fn arrays_emit_one_block_plus_terminator() {
        let bytes = encoded(|e| e.write_array([10i64, 20].into_iter(), |e, v| e.write_long(v)));
        // count=2, items 10, 20, terminator
        assert_eq!(bytes, vec![0x04, 0x14, 0x28, 0x00]);
    }

    #[test]
    fn optional_union_branches() {
        assert_eq!(
            encoded(|e| e.write_optional(None::<i64>, |e, v| e.write_long(v))),
            vec![0x00]
        );
        assert_eq!(
            encoded(|e| e.write_optional(Some(3i64), |e, v| e.write_long(v))),
            vec![0x02, 0x06]
        );
    }
}
