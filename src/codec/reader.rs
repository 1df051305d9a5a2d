//! Streaming snapshot decoder.
//!
//! Sections are decoded record-by-record straight into a `SnapshotSink`
//! (the heap model's builder); no raw-byte copy of a section is ever
//! retained. Truncation anywhere maps to `MalformedSnapshot`, real I/O
//! failures stay `Io`.

use super::{section, tag, Value, MAGIC, MAX_VERSION};
use crate::cancel::CancelToken;
use crate::error::{HeapError, Result};
use crate::heap::model::{
    Address, FrameRecord, ObjectRecord, ObjectShape, ThreadRecord,
};
use flate2::read::GzDecoder;
use std::io::{BufReader, Read};

/// Receiver for decoded records. Implemented by the heap model's builder.
pub trait SnapshotSink {
    fn begin(&mut self, version: u8);
    fn header(&mut self, entries: Vec<(String, Value)>);
    fn type_record(&mut self, addr: Address, name: String);
    /// `conflicting_shape` is set when the record carried both attributes
    /// and elements; the attributes won.
    fn object_record(&mut self, addr: Address, record: ObjectRecord, conflicting_shape: bool);
    fn thread_record(&mut self, thread: ThreadRecord);
    fn unknown_section(&mut self, tag: u8);
    /// Periodic progress inside the objects section, in records.
    fn progress(&mut self, _done: u64, _total: u64) {}
}

/// Decode one snapshot file (gzip-compressed container) into `sink`.
///
/// Cancellation is polled once per top-level section.
pub fn decode_snapshot<R: Read, S: SnapshotSink>(
    input: R,
    sink: &mut S,
    cancel: &CancelToken,
) -> Result<()> {
    let mut r = ValueReader::new(BufReader::new(GzDecoder::new(input)));

    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(HeapError::malformed("bad magic"));
    }
    let version = r.read_u8()?;
    if version > MAX_VERSION {
        return Err(HeapError::UnsupportedVersion { found: version, max: MAX_VERSION });
    }
    sink.begin(version);

    while let Some(section_tag) = r.try_read_u8()? {
        cancel.check()?;
        match section_tag {
            section::HEADER => sink.header(r.read_str_map_values()?),
            section::TYPES => decode_types(&mut r, sink)?,
            section::OBJECTS => decode_objects(&mut r, sink)?,
            section::THREADS => decode_threads(&mut r, sink)?,
            other => {
                r.skip_value()?;
                sink.unknown_section(other);
            }
        }
    }
    Ok(())
}

fn decode_types<R: Read, S: SnapshotSink>(r: &mut ValueReader<R>, sink: &mut S) -> Result<()> {
    r.expect_tag(tag::ADDR_MAP, "types section")?;
    let count = r.read_u32()?;
    for _ in 0..count {
        let addr = r.read_raw_addr()?;
        let name = match r.read_value()? {
            Value::ShortStr(s) | Value::LongStr(s) => s,
            other => {
                return Err(HeapError::malformed(format!(
                    "type name must be a string, got {other:?}"
                )))
            }
        };
        sink.type_record(addr, name);
    }
    Ok(())
}

fn decode_objects<R: Read, S: SnapshotSink>(r: &mut ValueReader<R>, sink: &mut S) -> Result<()> {
    r.expect_tag(tag::ADDR_MAP, "objects section")?;
    let count = r.read_u32()?;
    for i in 0..u64::from(count) {
        let addr = r.read_raw_addr()?;
        let (record, conflicting) = decode_object_record(r)?;
        sink.object_record(addr, record, conflicting);
        if i % 4096 == 0 {
            sink.progress(i, u64::from(count));
        }
    }
    sink.progress(u64::from(count), u64::from(count));
    Ok(())
}

fn decode_object_record<R: Read>(r: &mut ValueReader<R>) -> Result<(ObjectRecord, bool)> {
    r.expect_tag(tag::STR_MAP, "object record")?;
    let fields = r.read_u32()?;

    let mut type_addr = None;
    let mut size = None;
    let mut str_repr = None;
    let mut referents = Vec::new();
    let mut attributes: Option<Vec<(String, Address)>> = None;
    let mut elements: Option<Vec<Address>> = None;

    for _ in 0..fields {
        let key = r.read_raw_short_string()?;
        match key.as_str() {
            "type" => type_addr = Some(r.expect_addr("object type")?),
            "size" => size = Some(r.expect_uint("object size")?),
            "str" => {
                str_repr = match r.read_value()? {
                    Value::Null => None,
                    Value::ShortStr(s) | Value::LongStr(s) => Some(s),
                    other => {
                        return Err(HeapError::malformed(format!(
                            "object str must be a string or null, got {other:?}"
                        )))
                    }
                }
            }
            "referents" => referents = r.read_addr_list()?,
            "attributes" => {
                attributes = match r.read_u8()? {
                    tag::NULL => None,
                    tag::STR_MAP => Some(r.read_attr_map_body()?),
                    t => {
                        return Err(HeapError::malformed(format!(
                            "object attributes must be a string map or null, got tag 0x{t:02x}"
                        )))
                    }
                }
            }
            "elements" => {
                elements = match r.read_u8()? {
                    tag::NULL => None,
                    tag::LIST => Some(r.read_addr_list_body()?),
                    t => {
                        return Err(HeapError::malformed(format!(
                            "object elements must be a list or null, got tag 0x{t:02x}"
                        )))
                    }
                }
            }
            // Unknown record fields from newer producers are skipped.
            _ => r.skip_value()?,
        }
    }

    let type_addr =
        type_addr.ok_or_else(|| HeapError::malformed("object record missing type"))?;
    let size = size.ok_or_else(|| HeapError::malformed("object record missing size"))?;

    let conflicting = attributes.is_some() && elements.is_some();
    let shape = match (attributes, elements) {
        (Some(attributes), _) => ObjectShape::Instance { attributes },
        (None, Some(elements)) => ObjectShape::Container { elements },
        (None, None) => ObjectShape::Plain,
    };

    Ok((
        ObjectRecord { type_addr, size, str_repr, referents, shape },
        conflicting,
    ))
}

fn decode_threads<R: Read, S: SnapshotSink>(r: &mut ValueReader<R>, sink: &mut S) -> Result<()> {
    r.expect_tag(tag::LIST, "threads section")?;
    let count = r.read_u32()?;
    for _ in 0..count {
        let thread = decode_thread(r)?;
        sink.thread_record(thread);
    }
    Ok(())
}

fn decode_thread<R: Read>(r: &mut ValueReader<R>) -> Result<ThreadRecord> {
    r.expect_tag(tag::STR_MAP, "thread record")?;
    let fields = r.read_u32()?;

    let mut name = None;
    let mut is_alive = false;
    let mut is_daemon = false;
    let mut frames = Vec::new();

    for _ in 0..fields {
        let key = r.read_raw_short_string()?;
        match key.as_str() {
            "name" => name = Some(r.expect_string("thread name")?),
            "alive" => is_alive = r.expect_bool("thread alive flag")?,
            "daemon" => is_daemon = r.expect_bool("thread daemon flag")?,
            "frames" => {
                r.expect_tag(tag::LIST, "thread frames")?;
                let n = r.read_u32()?;
                frames.reserve(n as usize);
                for _ in 0..n {
                    frames.push(decode_frame(r)?);
                }
            }
            _ => r.skip_value()?,
        }
    }

    let name = name.ok_or_else(|| HeapError::malformed("thread record missing name"))?;
    Ok(ThreadRecord { name, is_alive, is_daemon, frames })
}

fn decode_frame<R: Read>(r: &mut ValueReader<R>) -> Result<FrameRecord> {
    r.expect_tag(tag::STR_MAP, "stack frame")?;
    let fields = r.read_u32()?;

    let mut filename = String::new();
    let mut line = 0u32;
    let mut function = String::new();
    let mut locals = Vec::new();

    for _ in 0..fields {
        let key = r.read_raw_short_string()?;
        match key.as_str() {
            "file" => filename = r.expect_string("frame file")?,
            "line" => {
                let v = r.expect_uint("frame line")?;
                line = u32::try_from(v)
                    .map_err(|_| HeapError::malformed("frame line exceeds 32 bits"))?;
            }
            "function" => function = r.expect_string("frame function")?,
            "locals" => {
                locals = r.read_attr_map()?;
            }
            _ => r.skip_value()?,
        }
    }

    Ok(FrameRecord { filename, line, function, locals })
}

/// Primitive reader over a decompressed byte stream.
pub struct ValueReader<R> {
    inner: R,
}

impl<R: Read> ValueReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Truncation and decompressor corruption are grammar violations, not
    /// I/O failures; only real device/file errors stay `Io`.
    fn map_read_err(e: std::io::Error) -> HeapError {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::UnexpectedEof => HeapError::malformed("truncated stream"),
            ErrorKind::InvalidInput | ErrorKind::InvalidData => {
                HeapError::malformed(format!("corrupt stream: {e}"))
            }
            _ => HeapError::Io(e),
        }
    }

    pub(crate) fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact(buf).map_err(Self::map_read_err)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }

    /// One byte, or `None` at a clean end of stream. Used only at section
    /// boundaries, where EOF is legal.
    fn try_read_u8(&mut self) -> Result<Option<u8>> {
        let mut b = [0u8; 1];
        match self.inner.read(&mut b) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(b[0])),
            Err(e) => Err(Self::map_read_err(e)),
        }
    }

    fn read_u16(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_exact(&mut b)?;
        Ok(u16::from_be_bytes(b))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(u32::from_be_bytes(b))
    }

    /// Raw 8-byte big-endian address (map key position, no tag).
    pub(crate) fn read_raw_addr(&mut self) -> Result<Address> {
        let mut b = [0u8; 8];
        self.read_exact(&mut b)?;
        Ok(u64::from_be_bytes(b))
    }

    /// Raw short string (map key position, no tag).
    pub(crate) fn read_raw_short_string(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        self.read_string_bytes(len)
    }

    fn read_string_bytes(&mut self, len: usize) -> Result<String> {
        let mut buf = Vec::new();
        let n = (&mut self.inner)
            .take(len as u64)
            .read_to_end(&mut buf)
            .map_err(Self::map_read_err)?;
        if n != len {
            return Err(HeapError::malformed("truncated string"));
        }
        String::from_utf8(buf).map_err(|_| HeapError::malformed("invalid UTF-8 in string"))
    }

    /// Variable-length unsigned integer: 1-byte length then big-endian
    /// magnitude. Lengths over 16 bytes violate the grammar; magnitudes over
    /// 64 bits exceed this implementation's range.
    pub(crate) fn read_uint_body(&mut self) -> Result<u64> {
        let len = self.read_u8()? as usize;
        if len > 16 {
            return Err(HeapError::malformed(format!(
                "integer length {len} exceeds 16 bytes"
            )));
        }
        let mut buf = [0u8; 16];
        self.read_exact(&mut buf[..len])?;
        let mut value: u64 = 0;
        for &b in &buf[..len] {
            if value > (u64::MAX >> 8) {
                return Err(HeapError::malformed("unsigned integer overflows 64 bits"));
            }
            value = (value << 8) | u64::from(b);
        }
        Ok(value)
    }

    /// Variable-length signed integer, two's-complement big-endian.
    fn read_int_body(&mut self) -> Result<i64> {
        let len = self.read_u8()? as usize;
        if len > 16 {
            return Err(HeapError::malformed(format!(
                "integer length {len} exceeds 16 bytes"
            )));
        }
        let mut buf = [0u8; 16];
        self.read_exact(&mut buf[..len])?;
        if len == 0 {
            return Ok(0);
        }
        // Leading sign-fill bytes carry no information; dropping them first
        // keeps the accumulator within i128 even for 16-byte encodings.
        let negative = buf[0] & 0x80 != 0;
        let fill = if negative { 0xff } else { 0x00 };
        let mut start = 0;
        while start < len - 1 && buf[start] == fill {
            start += 1;
        }
        if len - start > 8 {
            return Err(HeapError::malformed("signed integer overflows 64 bits"));
        }
        let mut value: i128 = if negative { -1 } else { 0 };
        for &b in &buf[start..len] {
            value = (value << 8) | i128::from(b);
        }
        i64::try_from(value)
            .map_err(|_| HeapError::malformed("signed integer overflows 64 bits"))
    }

    fn expect_tag(&mut self, expected: u8, what: &str) -> Result<()> {
        let t = self.read_u8()?;
        if t != expected {
            return Err(HeapError::malformed(format!(
                "{what}: expected tag 0x{expected:02x}, got 0x{t:02x}"
            )));
        }
        Ok(())
    }

    fn expect_addr(&mut self, what: &str) -> Result<Address> {
        self.expect_tag(tag::ADDR, what)?;
        self.read_raw_addr()
    }

    fn expect_uint(&mut self, what: &str) -> Result<u64> {
        self.expect_tag(tag::UINT, what)?;
        self.read_uint_body()
    }

    fn expect_bool(&mut self, what: &str) -> Result<bool> {
        self.expect_tag(tag::BOOL, what)?;
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(HeapError::malformed(format!(
                "{what}: boolean byte must be 0 or 1, got {other}"
            ))),
        }
    }

    fn expect_string(&mut self, what: &str) -> Result<String> {
        match self.read_value()? {
            Value::ShortStr(s) | Value::LongStr(s) => Ok(s),
            other => Err(HeapError::malformed(format!(
                "{what}: expected string, got {other:?}"
            ))),
        }
    }

    /// Tagged list whose items must all be addresses.
    fn read_addr_list(&mut self) -> Result<Vec<Address>> {
        self.expect_tag(tag::LIST, "address list")?;
        self.read_addr_list_body()
    }

    fn read_addr_list_body(&mut self) -> Result<Vec<Address>> {
        let count = self.read_u32()?;
        let mut out = Vec::with_capacity(count.min(1 << 20) as usize);
        for _ in 0..count {
            out.push(self.expect_addr("address list item")?);
        }
        Ok(out)
    }

    /// Tagged string-keyed map whose values must all be addresses.
    fn read_attr_map(&mut self) -> Result<Vec<(String, Address)>> {
        self.expect_tag(tag::STR_MAP, "attribute map")?;
        self.read_attr_map_body()
    }

    fn read_attr_map_body(&mut self) -> Result<Vec<(String, Address)>> {
        let count = self.read_u32()?;
        let mut out = Vec::with_capacity(count.min(1 << 20) as usize);
        for _ in 0..count {
            let key = self.read_raw_short_string()?;
            let addr = self.expect_addr("attribute value")?;
            out.push((key, addr));
        }
        Ok(out)
    }

    /// Tagged string-keyed map with arbitrary values, as `Value` pairs.
    fn read_str_map_values(&mut self) -> Result<Vec<(String, Value)>> {
        self.expect_tag(tag::STR_MAP, "metadata map")?;
        let count = self.read_u32()?;
        let mut out = Vec::with_capacity(count.min(1 << 20) as usize);
        for _ in 0..count {
            let key = self.read_raw_short_string()?;
            let value = self.read_value()?;
            out.push((key, value));
        }
        Ok(out)
    }

    /// One tagged value, fully materialized. Used for the header section,
    /// unknown-field payloads, and tests.
    pub fn read_value(&mut self) -> Result<Value> {
        let t = self.read_u8()?;
        self.read_value_body(t)
    }

    fn read_value_body(&mut self, t: u8) -> Result<Value> {
        match t {
            tag::NULL => Ok(Value::Null),
            tag::BOOL => match self.read_u8()? {
                0 => Ok(Value::Bool(false)),
                1 => Ok(Value::Bool(true)),
                other => Err(HeapError::malformed(format!(
                    "boolean byte must be 0 or 1, got {other}"
                ))),
            },
            tag::UINT => Ok(Value::Uint(self.read_uint_body()?)),
            tag::INT => Ok(Value::Int(self.read_int_body()?)),
            tag::SHORT_STR => {
                let len = self.read_u16()? as usize;
                Ok(Value::ShortStr(self.read_string_bytes(len)?))
            }
            tag::LONG_STR => {
                let len = self.read_u32()? as usize;
                Ok(Value::LongStr(self.read_string_bytes(len)?))
            }
            tag::ADDR => Ok(Value::Addr(self.read_raw_addr()?)),
            tag::LIST => {
                let count = self.read_u32()?;
                let mut items = Vec::with_capacity(count.min(1 << 20) as usize);
                for _ in 0..count {
                    items.push(self.read_value()?);
                }
                Ok(Value::List(items))
            }
            tag::STR_MAP => {
                let count = self.read_u32()?;
                let mut entries = Vec::with_capacity(count.min(1 << 20) as usize);
                for _ in 0..count {
                    let key = self.read_raw_short_string()?;
                    entries.push((key, self.read_value()?));
                }
                Ok(Value::StrMap(entries))
            }
            tag::ADDR_MAP => {
                let count = self.read_u32()?;
                let mut entries = Vec::with_capacity(count.min(1 << 20) as usize);
                for _ in 0..count {
                    let key = self.read_raw_addr()?;
                    entries.push((key, self.read_value()?));
                }
                Ok(Value::AddrMap(entries))
            }
            other => Err(HeapError::malformed(format!("unknown value tag 0x{other:02x}"))),
        }
    }

    /// Discard one tagged value without materializing it.
    pub fn skip_value(&mut self) -> Result<()> {
        let t = self.read_u8()?;
        self.skip_value_body(t)
    }

    fn skip_value_body(&mut self, t: u8) -> Result<()> {
        match t {
            tag::NULL => Ok(()),
            tag::BOOL => self.skip_bytes(1),
            tag::UINT | tag::INT => {
                let len = self.read_u8()? as u64;
                if len > 16 {
                    return Err(HeapError::malformed(format!(
                        "integer length {len} exceeds 16 bytes"
                    )));
                }
                self.skip_bytes(len)
            }
            tag::SHORT_STR => {
                let len = self.read_u16()? as u64;
                self.skip_bytes(len)
            }
            tag::LONG_STR => {
                let len = u64::from(self.read_u32()?);
                self.skip_bytes(len)
            }
            tag::ADDR => self.skip_bytes(8),
            tag::LIST => {
                let count = self.read_u32()?;
                for _ in 0..count {
                    self.skip_value()?;
                }
                Ok(())
            }
            tag::STR_MAP => {
                let count = self.read_u32()?;
                for _ in 0..count {
                    let key_len = self.read_u16()? as u64;
                    self.skip_bytes(key_len)?;
                    self.skip_value()?;
                }
                Ok(())
            }
            tag::ADDR_MAP => {
                let count = self.read_u32()?;
                for _ in 0..count {
                    self.skip_bytes(8)?;
                    self.skip_value()?;
                }
                Ok(())
            }
            other => Err(HeapError::malformed(format!("unknown value tag 0x{other:02x}"))),
        }
    }

    fn skip_bytes(&mut self, len: u64) -> Result<()> {
        let n = std::io::copy(&mut (&mut self.inner).take(len), &mut std::io::sink())
            .map_err(Self::map_read_err)?;
        if n != len {
            return Err(HeapError::malformed("truncated stream"));
        }
        Ok(())
    }
}
