//! Borsh field codec.
//!
//! Decodes (and encodes) the body of an event, i.e. everything after the
//! discriminator, against a schema's ordered field list.

use crate::{
    events::{FieldMap, FieldValue},
    schema::{FieldDef, FieldType},
};
use borsh::{BorshDeserialize, BorshSerialize};
use solana_sdk::pubkey::Pubkey;
use std::io;

/// Decodes every field in `fields` from `data`, in order.
///
/// Trailing bytes after the last field are rejected so that a schema which is
/// too short for its payload does not silently produce a partial event.
pub fn decode_fields(fields: &[FieldDef], data: &[u8]) -> io::Result<FieldMap> {
    let mut buf = data;
    let map = decode_struct(fields, &mut buf)?;
    if !buf.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} trailing bytes after last field", buf.len()),
        ));
    }
    Ok(map)
}

/// Encodes `values` according to `fields`. Missing fields are an error.
pub fn encode_fields(fields: &[FieldDef], values: &FieldMap) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    encode_struct(fields, values, &mut out)?;
    Ok(out)
}

fn decode_struct(fields: &[FieldDef], buf: &mut &[u8]) -> io::Result<FieldMap> {
    let mut map = FieldMap::with_capacity(fields.len());
    for field in fields {
        let value = decode_value(&field.ty, buf).map_err(|e| {
            io::Error::new(e.kind(), format!("field '{}': {}", field.name, e))
        })?;
        map.insert(field.name.clone(), value);
    }
    Ok(map)
}

/// Upper bound on a vec whose elements encode to no bytes at all, where the
/// remaining input cannot bound the length.
const MAX_ZERO_WIDTH_ELEMENTS: usize = u16::MAX as usize;

/// Smallest number of bytes a value of `ty` can encode to.
fn min_width(ty: &FieldType) -> usize {
    match ty {
        FieldType::Bool | FieldType::U8 | FieldType::I8 | FieldType::Option(_) => 1,
        FieldType::U16 | FieldType::I16 => 2,
        FieldType::U32 | FieldType::I32 => 4,
        FieldType::String | FieldType::Bytes | FieldType::Vec(_) => 4,
        FieldType::U64 | FieldType::I64 => 8,
        FieldType::U128 | FieldType::I128 => 16,
        FieldType::Pubkey => 32,
        FieldType::Array(inner, len) => min_width(inner).saturating_mul(*len),
        FieldType::Struct(fields) => fields
            .iter()
            .fold(0usize, |acc, f| acc.saturating_add(min_width(&f.ty))),
    }
}

fn decode_value(ty: &FieldType, buf: &mut &[u8]) -> io::Result<FieldValue> {
    let value = match ty {
        FieldType::Bool => FieldValue::Bool(bool::deserialize(buf)?),
        FieldType::U8 => FieldValue::Uint(u8::deserialize(buf)?.into()),
        FieldType::U16 => FieldValue::Uint(u16::deserialize(buf)?.into()),
        FieldType::U32 => FieldValue::Uint(u32::deserialize(buf)?.into()),
        FieldType::U64 => FieldValue::Uint(u64::deserialize(buf)?.into()),
        FieldType::U128 => FieldValue::Uint(u128::deserialize(buf)?),
        FieldType::I8 => FieldValue::Int(i8::deserialize(buf)?.into()),
        FieldType::I16 => FieldValue::Int(i16::deserialize(buf)?.into()),
        FieldType::I32 => FieldValue::Int(i32::deserialize(buf)?.into()),
        FieldType::I64 => FieldValue::Int(i64::deserialize(buf)?.into()),
        FieldType::I128 => FieldValue::Int(i128::deserialize(buf)?),
        FieldType::String => FieldValue::Str(String::deserialize(buf)?),
        FieldType::Bytes => FieldValue::Bytes(Vec::<u8>::deserialize(buf)?),
        FieldType::Pubkey => FieldValue::Pubkey(Pubkey::new_from_array(<[u8; 32]>::deserialize(buf)?)),
        FieldType::Option(inner) => {
            if bool::deserialize(buf)? {
                decode_value(inner, buf)?
            } else {
                FieldValue::Null
            }
        }
        FieldType::Vec(inner) => {
            let len = u32::deserialize(buf)? as usize;
            let width = min_width(inner);
            if width == 0 && len > MAX_ZERO_WIDTH_ELEMENTS {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("vec of {len} zero-width elements"),
                ));
            }
            if len.saturating_mul(width) > buf.len() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("vec length {len} exceeds remaining {} bytes", buf.len()),
                ));
            }
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(decode_value(inner, buf)?);
            }
            FieldValue::Array(items)
        }
        FieldType::Array(inner, len) => {
            let mut items = Vec::with_capacity(*len);
            for _ in 0..*len {
                items.push(decode_value(inner, buf)?);
            }
            FieldValue::Array(items)
        }
        FieldType::Struct(fields) => FieldValue::Struct(decode_struct(fields, buf)?),
    };
    Ok(value)
}

fn encode_struct(fields: &[FieldDef], values: &FieldMap, out: &mut Vec<u8>) -> io::Result<()> {
    for field in fields {
        let value = values.get(&field.name).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("missing field '{}'", field.name))
        })?;
        encode_value(&field.ty, value, out)?;
    }
    Ok(())
}

fn mismatch(ty: &FieldType, value: &FieldValue) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("value {value} does not fit type {ty:?}"),
    )
}

fn narrow<T: TryFrom<u128>>(ty: &FieldType, value: &FieldValue, v: u128) -> io::Result<T> {
    T::try_from(v).map_err(|_| mismatch(ty, value))
}

fn narrow_signed<T: TryFrom<i128>>(ty: &FieldType, value: &FieldValue, v: i128) -> io::Result<T> {
    T::try_from(v).map_err(|_| mismatch(ty, value))
}

fn encode_value(ty: &FieldType, value: &FieldValue, out: &mut Vec<u8>) -> io::Result<()> {
    match (ty, value) {
        (FieldType::Bool, FieldValue::Bool(v)) => v.serialize(out),
        (FieldType::U8, FieldValue::Uint(v)) => narrow::<u8>(ty, value, *v)?.serialize(out),
        (FieldType::U16, FieldValue::Uint(v)) => narrow::<u16>(ty, value, *v)?.serialize(out),
        (FieldType::U32, FieldValue::Uint(v)) => narrow::<u32>(ty, value, *v)?.serialize(out),
        (FieldType::U64, FieldValue::Uint(v)) => narrow::<u64>(ty, value, *v)?.serialize(out),
        (FieldType::U128, FieldValue::Uint(v)) => v.serialize(out),
        (FieldType::I8, FieldValue::Int(v)) => narrow_signed::<i8>(ty, value, *v)?.serialize(out),
        (FieldType::I16, FieldValue::Int(v)) => narrow_signed::<i16>(ty, value, *v)?.serialize(out),
        (FieldType::I32, FieldValue::Int(v)) => narrow_signed::<i32>(ty, value, *v)?.serialize(out),
        (FieldType::I64, FieldValue::Int(v)) => narrow_signed::<i64>(ty, value, *v)?.serialize(out),
        (FieldType::I128, FieldValue::Int(v)) => v.serialize(out),
        (FieldType::String, FieldValue::Str(s)) => s.serialize(out),
        (FieldType::Bytes, FieldValue::Bytes(b)) => b.serialize(out),
        (FieldType::Pubkey, FieldValue::Pubkey(p)) => p.to_bytes().serialize(out),
        (FieldType::Option(_), FieldValue::Null) => false.serialize(out),
        (FieldType::Option(inner), v) => {
            true.serialize(out)?;
            encode_value(inner, v, out)
        }
        (FieldType::Vec(inner), FieldValue::Array(items)) => {
            let len = u32::try_from(items.len()).map_err(|_| mismatch(ty, value))?;
            len.serialize(out)?;
            items.iter().try_for_each(|item| encode_value(inner, item, out))
        }
        (FieldType::Array(inner, len), FieldValue::Array(items)) if items.len() == *len => {
            items.iter().try_for_each(|item| encode_value(inner, item, out))
        }
        (FieldType::Struct(fields), FieldValue::Struct(values)) => encode_struct(fields, values, out),
        _ => Err(mismatch(ty, value)),
    }
}
