//! Tagged wire values.
//!
//! The streaming decoder places object and thread records straight into the
//! heap model; `Value` is used where the data is small and schema-free (the
//! header section) and by the codec tests.

use crate::heap::model::Address;

/// One value of the container's typed format. Map entries preserve wire
/// order; the snapshot writer sorts its own tables before emitting, which is
/// what makes encoding deterministic.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Uint(u64),
    Int(i64),
    /// String with a 2-byte length prefix on the wire.
    ShortStr(String),
    /// String with a 4-byte length prefix on the wire.
    LongStr(String),
    Addr(Address),
    List(Vec<Value>),
    StrMap(Vec<(String, Value)>),
    AddrMap(Vec<(Address, Value)>),
}

impl Value {
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Value::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::ShortStr(s) | Value::LongStr(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_addr(&self) -> Option<Address> {
        match self {
            Value::Addr(a) => Some(*a),
            _ => None,
        }
    }

    /// Render for the `info` command: scalars inline, composites summarized.
    pub fn display(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Uint(v) => v.to_string(),
            Value::Int(v) => v.to_string(),
            Value::ShortStr(s) | Value::LongStr(s) => s.clone(),
            Value::Addr(a) => format!("0x{a:x}"),
            Value::List(items) => format!("[{} items]", items.len()),
            Value::StrMap(entries) => format!("{{{} entries}}", entries.len()),
            Value::AddrMap(entries) => format!("{{{} entries}}", entries.len()),
        }
    }
}
