//! On-disk snapshot container: framing, compression, and the compact typed
//! value format shared between the dumper and the loader.
//!
//! A snapshot file is a gzip stream. Decompressed, it starts with a 4-byte
//! magic and a 1-byte version, followed by top-level sections, each a tag
//! byte and one self-delimiting wire value. Unknown section tags are skipped
//! and counted so newer producers stay readable.

mod reader;
mod value;
mod writer;

pub use reader::{decode_snapshot, SnapshotSink, ValueReader};
pub use value::Value;
pub use writer::{encode_snapshot, ValueWriter};

/// First bytes of every decompressed snapshot stream.
pub const MAGIC: [u8; 4] = *b"HPSN";

/// Highest container version this reader understands.
pub const MAX_VERSION: u8 = 1;

/// Wire tags of the typed value format.
pub mod tag {
    pub const NULL: u8 = 0x00;
    pub const BOOL: u8 = 0x01;
    pub const UINT: u8 = 0x02;
    pub const INT: u8 = 0x03;
    pub const SHORT_STR: u8 = 0x04;
    pub const LONG_STR: u8 = 0x05;
    pub const ADDR: u8 = 0x06;
    pub const LIST: u8 = 0x07;
    pub const STR_MAP: u8 = 0x08;
    pub const ADDR_MAP: u8 = 0x09;
}

/// Tags of the top-level sections.
pub mod section {
    pub const HEADER: u8 = 0x10;
    pub const TYPES: u8 = 0x11;
    pub const OBJECTS: u8 = 0x12;
    pub const THREADS: u8 = 0x13;
}
