//! Snapshot encoder, the round-trip partner of the streaming reader.
//!
//! The analyzer never writes snapshots in production — the capture pipeline
//! does — but the encoder keeps the wire format honest: tests build real
//! files with it, and it documents the byte layout a producer must emit.
//! Table sections are sorted by key so that the same snapshot always
//! encodes to the same bytes.

use super::{section, tag, Value, MAGIC};
use crate::error::{HeapError, Result};
use crate::heap::model::{ObjectRecord, ObjectShape, Snapshot, ThreadRecord};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

/// Encode a whole snapshot as a gzip-compressed container stream.
pub fn encode_snapshot<W: Write>(snapshot: &Snapshot, out: W) -> Result<()> {
    let mut w = ValueWriter::new(GzEncoder::new(out, Compression::default()));

    w.write_bytes(&MAGIC)?;
    w.write_u8(snapshot.version())?;

    w.write_u8(section::HEADER)?;
    w.write_str_map_header(snapshot.header().entries.len())?;
    for (key, value) in &snapshot.header().entries {
        w.write_raw_short_string(key)?;
        w.write_value(value)?;
    }

    let mut type_addrs: Vec<_> = snapshot.types().collect();
    type_addrs.sort_by_key(|(addr, _)| *addr);
    w.write_u8(section::TYPES)?;
    w.write_u8(tag::ADDR_MAP)?;
    w.write_u32(type_addrs.len() as u32)?;
    for (addr, ty) in type_addrs {
        w.write_raw_addr(addr)?;
        w.write_value(&Value::ShortStr(ty.name.clone()))?;
    }

    let mut objects: Vec<_> = snapshot.objects().collect();
    objects.sort_by_key(|(addr, _)| *addr);
    w.write_u8(section::OBJECTS)?;
    w.write_u8(tag::ADDR_MAP)?;
    w.write_u32(objects.len() as u32)?;
    for (addr, obj) in objects {
        w.write_raw_addr(addr)?;
        w.write_object_record(obj)?;
    }

    w.write_u8(section::THREADS)?;
    w.write_u8(tag::LIST)?;
    w.write_u32(snapshot.threads().len() as u32)?;
    for thread in snapshot.threads() {
        w.write_thread_record(thread)?;
    }

    w.into_inner().finish().map_err(HeapError::Io)?;
    Ok(())
}

/// Primitive writer emitting the typed wire format.
pub struct ValueWriter<W> {
    inner: W,
}

impl<W: Write> ValueWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes).map_err(HeapError::Io)
    }

    pub(crate) fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write_bytes(&[v])
    }

    fn write_u16(&mut self, v: u16) -> Result<()> {
        self.write_bytes(&v.to_be_bytes())
    }

    fn write_u32(&mut self, v: u32) -> Result<()> {
        self.write_bytes(&v.to_be_bytes())
    }

    pub(crate) fn write_raw_addr(&mut self, v: u64) -> Result<()> {
        self.write_bytes(&v.to_be_bytes())
    }

    pub(crate) fn write_raw_short_string(&mut self, s: &str) -> Result<()> {
        let len = u16::try_from(s.len())
            .map_err(|_| HeapError::malformed(format!("string too long for 2-byte length: {} bytes", s.len())))?;
        self.write_u16(len)?;
        self.write_bytes(s.as_bytes())
    }

    fn write_str_map_header(&mut self, entries: usize) -> Result<()> {
        self.write_u8(tag::STR_MAP)?;
        self.write_u32(entries as u32)
    }

    /// Minimal big-endian magnitude: zero encodes as zero bytes.
    pub(crate) fn write_uint_body(&mut self, v: u64) -> Result<()> {
        let be = v.to_be_bytes();
        let skip = (v.leading_zeros() / 8) as usize;
        let len = 8 - skip.min(8);
        self.write_u8(len as u8)?;
        self.write_bytes(&be[8 - len..])
    }

    /// Minimal two's-complement: drop leading bytes that are pure sign
    /// extension. Zero encodes as zero bytes.
    fn write_int_body(&mut self, v: i64) -> Result<()> {
        if v == 0 {
            return self.write_u8(0);
        }
        let be = v.to_be_bytes();
        let mut start = 0;
        while start < 7 {
            let redundant = (be[start] == 0x00 && be[start + 1] & 0x80 == 0)
                || (be[start] == 0xff && be[start + 1] & 0x80 != 0);
            if !redundant {
                break;
            }
            start += 1;
        }
        self.write_u8((8 - start) as u8)?;
        self.write_bytes(&be[start..])
    }

    pub fn write_value(&mut self, v: &Value) -> Result<()> {
        match v {
            Value::Null => self.write_u8(tag::NULL),
            Value::Bool(b) => {
                self.write_u8(tag::BOOL)?;
                self.write_u8(u8::from(*b))
            }
            Value::Uint(v) => {
                self.write_u8(tag::UINT)?;
                self.write_uint_body(*v)
            }
            Value::Int(v) => {
                self.write_u8(tag::INT)?;
                self.write_int_body(*v)
            }
            Value::ShortStr(s) => {
                self.write_u8(tag::SHORT_STR)?;
                self.write_raw_short_string(s)
            }
            Value::LongStr(s) => {
                self.write_u8(tag::LONG_STR)?;
                let len = u32::try_from(s.len()).map_err(|_| {
                    HeapError::malformed("string too long for 4-byte length")
                })?;
                self.write_u32(len)?;
                self.write_bytes(s.as_bytes())
            }
            Value::Addr(a) => {
                self.write_u8(tag::ADDR)?;
                self.write_raw_addr(*a)
            }
            Value::List(items) => {
                self.write_u8(tag::LIST)?;
                self.write_u32(items.len() as u32)?;
                for item in items {
                    self.write_value(item)?;
                }
                Ok(())
            }
            Value::StrMap(entries) => {
                self.write_str_map_header(entries.len())?;
                for (key, value) in entries {
                    self.write_raw_short_string(key)?;
                    self.write_value(value)?;
                }
                Ok(())
            }
            Value::AddrMap(entries) => {
                self.write_u8(tag::ADDR_MAP)?;
                self.write_u32(entries.len() as u32)?;
                for (key, value) in entries {
                    self.write_raw_addr(*key)?;
                    self.write_value(value)?;
                }
                Ok(())
            }
        }
    }

    fn write_addr_list(&mut self, addrs: &[u64]) -> Result<()> {
        self.write_u8(tag::LIST)?;
        self.write_u32(addrs.len() as u32)?;
        for &a in addrs {
            self.write_u8(tag::ADDR)?;
            self.write_raw_addr(a)?;
        }
        Ok(())
    }

    fn write_attr_map(&mut self, entries: &[(String, u64)]) -> Result<()> {
        self.write_str_map_header(entries.len())?;
        for (key, addr) in entries {
            self.write_raw_short_string(key)?;
            self.write_u8(tag::ADDR)?;
            self.write_raw_addr(*addr)?;
        }
        Ok(())
    }

    fn write_object_record(&mut self, obj: &ObjectRecord) -> Result<()> {
        self.write_str_map_header(6)?;

        self.write_raw_short_string("type")?;
        self.write_u8(tag::ADDR)?;
        self.write_raw_addr(obj.type_addr)?;

        self.write_raw_short_string("size")?;
        self.write_u8(tag::UINT)?;
        self.write_uint_body(obj.size)?;

        self.write_raw_short_string("str")?;
        match &obj.str_repr {
            Some(s) => self.write_value(&Value::ShortStr(s.clone()))?,
            None => self.write_u8(tag::NULL)?,
        }

        self.write_raw_short_string("referents")?;
        self.write_addr_list(&obj.referents)?;

        self.write_raw_short_string("attributes")?;
        match &obj.shape {
            ObjectShape::Instance { attributes } => self.write_attr_map(attributes)?,
            _ => self.write_u8(tag::NULL)?,
        }

        self.write_raw_short_string("elements")?;
        match &obj.shape {
            ObjectShape::Container { elements } => self.write_addr_list(elements)?,
            _ => self.write_u8(tag::NULL)?,
        }

        Ok(())
    }

    fn write_thread_record(&mut self, thread: &ThreadRecord) -> Result<()> {
        self.write_str_map_header(4)?;

        self.write_raw_short_string("name")?;
        self.write_value(&Value::ShortStr(thread.name.clone()))?;

        self.write_raw_short_string("alive")?;
        self.write_value(&Value::Bool(thread.is_alive))?;

        self.write_raw_short_string("daemon")?;
        self.write_value(&Value::Bool(thread.is_daemon))?;

        self.write_raw_short_string("frames")?;
        self.write_u8(tag::LIST)?;
        self.write_u32(thread.frames.len() as u32)?;
        for frame in &thread.frames {
            self.write_str_map_header(4)?;

            self.write_raw_short_string("file")?;
            self.write_value(&Value::ShortStr(frame.filename.clone()))?;

            self.write_raw_short_string("line")?;
            self.write_u8(tag::UINT)?;
            self.write_uint_body(u64::from(frame.line))?;

            self.write_raw_short_string("function")?;
            self.write_value(&Value::ShortStr(frame.function.clone()))?;

            self.write_raw_short_string("locals")?;
            self.write_attr_map(&frame.locals)?;
        }

        Ok(())
    }
}
