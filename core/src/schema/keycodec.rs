//! Order-preserving encoding of primary keys.
//!
//! Encoded keys compare bytewise in the same order as the typed key tuples:
//! - integers and timestamps: big-endian with the sign bit flipped
//! - strings and binary in the last key column: raw bytes
//! - strings and binary elsewhere: `0x00` escaped as `0x00 0x01`, then a
//!   `0x00 0x00` terminator
//!
//! Encoding only the first n key columns yields a byte prefix of every key
//! that starts with those values, which is what scan bounds and range split
//! points rely on.

use crate::error::{Error, Result};
use crate::table::Key;

use super::{Schema, Value};

/// Encode the leading key columns in `values` (one per key column, in order).
pub(crate) fn encode_key_prefix(schema: &Schema, values: &[&Value]) -> Result<Key> {
    if values.len() > schema.key_count() {
        return Err(Error::schema(format!(
            "{} key values supplied but schema has {} key columns",
            values.len(),
            schema.key_count()
        )));
    }

    let mut out = Vec::with_capacity(values.len() * 8);
    for (idx, value) in values.iter().enumerate() {
        let column = schema.column(idx);
        if value.is_null() || !value.fits(column.column_type) {
            return Err(Error::schema(format!(
                "key column '{}' expects {}, got {}",
                column.name, column.column_type, value
            )));
        }
        let is_last = idx + 1 == schema.key_count();
        encode_column(value, is_last, &mut out);
    }
    Ok(Key::from(out))
}

fn encode_column(value: &Value, is_last: bool, out: &mut Vec<u8>) {
    match value {
        Value::Int8(v) => out.push((*v as u8) ^ 0x80),
        Value::Int16(v) => out.extend_from_slice(&((*v as u16) ^ (1 << 15)).to_be_bytes()),
        Value::Int32(v) => out.extend_from_slice(&((*v as u32) ^ (1 << 31)).to_be_bytes()),
        Value::Int64(v) | Value::Timestamp(v) => {
            out.extend_from_slice(&((*v as u64) ^ (1 << 63)).to_be_bytes())
        }
        Value::String(s) => encode_bytes(s.as_bytes(), is_last, out),
        Value::Binary(b) => encode_bytes(b, is_last, out),
        // Rejected by the schema as key types.
        Value::Null | Value::Bool(_) | Value::Float32(_) | Value::Float64(_) => {}
    }
}

fn encode_bytes(bytes: &[u8], is_last: bool, out: &mut Vec<u8>) {
    if is_last {
        out.extend_from_slice(bytes);
        return;
    }
    for &b in bytes {
        if b == 0 {
            out.extend_from_slice(&[0x00, 0x01]);
        } else {
            out.push(b);
        }
    }
    out.extend_from_slice(&[0x00, 0x00]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;

    fn int_string_schema() -> Schema {
        Schema::builder()
            .add_key_column("a", ColumnType::Int32)
            .add_key_column("b", ColumnType::String)
            .add_column("v", ColumnType::String)
            .build()
            .unwrap()
    }

    fn composite_schema() -> Schema {
        Schema::builder()
            .add_key_column("a", ColumnType::String)
            .add_key_column("b", ColumnType::Int64)
            .build()
            .unwrap()
    }

    #[test]
    fn test_signed_integers_keep_order() {
        let schema = int_string_schema();
        let encode = |a: i32| {
            encode_key_prefix(&schema, &[&Value::from(a), &Value::from("")]).unwrap()
        };
        assert!(encode(-5) < encode(-1));
        assert!(encode(-1) < encode(0));
        assert!(encode(0) < encode(7));
        assert!(encode(i32::MIN) < encode(i32::MAX));
    }

    #[test]
    fn test_composite_string_keys_keep_order() {
        let schema = composite_schema();
        let encode = |a: &str, b: i64| {
            encode_key_prefix(&schema, &[&Value::from(a), &Value::from(b)]).unwrap()
        };
        // A shorter string sorts before any extension of it.
        assert!(encode("a", 100) < encode("a\0", 0));
        assert!(encode("a\0", 0) < encode("ab", 0));
        assert!(encode("a", 1) < encode("a", 2));
    }

    #[test]
    fn test_prefix_is_byte_prefix() {
        let schema = composite_schema();
        let prefix = encode_key_prefix(&schema, &[&Value::from("x")]).unwrap();
        let full = encode_key_prefix(&schema, &[&Value::from("x"), &Value::from(9i64)]).unwrap();
        assert!(full.as_bytes().starts_with(prefix.as_bytes()));
        assert!(prefix < full);
    }

    #[test]
    fn test_type_mismatch() {
        let schema = composite_schema();
        let err = encode_key_prefix(&schema, &[&Value::from(1i32)]).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }
}
