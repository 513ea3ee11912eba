use crate::address::Address;
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, Read, ReadExt, Write};
use num_bigint::BigInt;
use num_traits::{One, Zero};
use std::{collections::BTreeMap, fmt, sync::OnceLock};

/// Named arguments of a call or deployment.
pub type Params = BTreeMap<String, TypedValue>;

/// Maximum nesting of lists and dicts accepted by the decoder.
pub const MAX_VALUE_DEPTH: usize = 16;

/// Maximum number of entries in a list or dict.
pub const MAX_CONTAINER_LENGTH: usize = 1024;

/// Maximum length of a string or byte value.
pub const MAX_BYTES_LENGTH: usize = 64 * 1024;

/// Maximum length of an encoded integer. Wider than the representable range so
/// out-of-range arguments still reach the range check.
pub const MAX_INT_LENGTH: usize = 64;

const TAG_NIL: u8 = 0;
const TAG_DICT: u8 = 1;
const TAG_LIST: u8 = 2;
const TAG_BYTES: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_BOOL: u8 = 5;
const TAG_ADDRESS: u8 = 10;
const TAG_INT: u8 = 11;

/// A value exchanged with contract code: arguments, return values and
/// instance fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypedValue {
    Null,
    Bool(bool),
    Int(BigInt),
    Str(String),
    Bytes(Vec<u8>),
    Address(Address),
    List(Vec<TypedValue>),
    Dict(BTreeMap<String, TypedValue>),
}

impl TypedValue {
    pub fn int(value: impl Into<BigInt>) -> Self {
        Self::Int(value.into())
    }

    pub fn str(value: impl Into<String>) -> Self {
        Self::Str(value.into())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::Address(_) => "Address",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
        }
    }

    pub fn as_int(&self) -> Option<&BigInt> {
        match self {
            Self::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<&Address> {
        match self {
            Self::Address(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v:?}"),
            Self::Bytes(v) => write!(f, "0x{}", commonware_utils::hex(v)),
            Self::Address(v) => write!(f, "{v}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k:?}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for TypedValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for TypedValue {
    fn from(value: i64) -> Self {
        Self::Int(value.into())
    }
}

impl From<BigInt> for TypedValue {
    fn from(value: BigInt) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for TypedValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for TypedValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Vec<u8>> for TypedValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<Address> for TypedValue {
    fn from(value: Address) -> Self {
        Self::Address(value)
    }
}

/// Build [Params] from `(name, value)` pairs.
pub fn params<I, K, V>(entries: I) -> Params
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<TypedValue>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Smallest integer a contract can hold (`-2^255`).
pub fn int_min() -> &'static BigInt {
    static MIN: OnceLock<BigInt> = OnceLock::new();
    MIN.get_or_init(|| -(BigInt::one() << 255usize))
}

/// Largest integer a contract can hold (`2^256 - 1`).
pub fn int_max() -> &'static BigInt {
    static MAX: OnceLock<BigInt> = OnceLock::new();
    MAX.get_or_init(|| (BigInt::one() << 256usize) - 1)
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("integer {0} is outside the representable range")]
pub struct IntRangeError(pub BigInt);

/// Accept `value` only if it lies within `[int_min(), int_max()]`.
pub fn checked_int(value: BigInt) -> Result<BigInt, IntRangeError> {
    if &value < int_min() || &value > int_max() {
        return Err(IntRangeError(value));
    }
    Ok(value)
}

fn int_to_bytes(value: &BigInt) -> Vec<u8> {
    if value.is_zero() {
        return Vec::new();
    }
    value.to_signed_bytes_be()
}

pub(crate) fn write_bytes(bytes: &[u8], writer: &mut impl BufMut) {
    (bytes.len() as u32).write(writer);
    writer.put_slice(bytes);
}

pub(crate) fn read_bytes(reader: &mut impl Buf, max_len: usize) -> Result<Vec<u8>, Error> {
    let len = u32::read(reader)? as usize;
    if len > max_len {
        return Err(Error::Invalid("Bytes", "too long"));
    }
    if reader.remaining() < len {
        return Err(Error::EndOfBuffer);
    }
    let mut bytes = vec![0u8; len];
    reader.copy_to_slice(&mut bytes);
    Ok(bytes)
}

pub(crate) fn write_string(s: &str, writer: &mut impl BufMut) {
    write_bytes(s.as_bytes(), writer);
}

pub(crate) fn read_string(reader: &mut impl Buf, max_len: usize) -> Result<String, Error> {
    let bytes = read_bytes(reader, max_len)?;
    String::from_utf8(bytes).map_err(|_| Error::Invalid("String", "invalid UTF-8"))
}

pub(crate) fn bytes_encode_size(len: usize) -> usize {
    4 + len
}

fn read_len(reader: &mut impl Buf) -> Result<usize, Error> {
    let len = u32::read(reader)? as usize;
    if len > MAX_CONTAINER_LENGTH {
        return Err(Error::Invalid("TypedValue", "container too long"));
    }
    Ok(len)
}

pub(crate) fn write_dict(entries: &BTreeMap<String, TypedValue>, writer: &mut impl BufMut) {
    (entries.len() as u32).write(writer);
    for (k, v) in entries {
        write_string(k, writer);
        v.write(writer);
    }
}

pub(crate) fn read_dict(
    reader: &mut impl Buf,
    depth: usize,
) -> Result<BTreeMap<String, TypedValue>, Error> {
    let len = read_len(reader)?;
    let mut entries = BTreeMap::new();
    for _ in 0..len {
        let key = read_string(reader, MAX_BYTES_LENGTH)?;
        let value = TypedValue::read_at(reader, depth)?;
        if entries.insert(key, value).is_some() {
            return Err(Error::Invalid("TypedValue", "duplicate dict key"));
        }
    }
    Ok(entries)
}

/// Encoded size of a dict body (as used for named params and fields).
pub fn dict_encode_size(entries: &BTreeMap<String, TypedValue>) -> usize {
    4 + entries
        .iter()
        .map(|(k, v)| bytes_encode_size(k.len()) + v.encode_size())
        .sum::<usize>()
}

impl TypedValue {
    fn read_at(reader: &mut impl Buf, depth: usize) -> Result<Self, Error> {
        if depth > MAX_VALUE_DEPTH {
            return Err(Error::Invalid("TypedValue", "nested too deeply"));
        }
        let tag = u8::read(reader)?;
        Ok(match tag {
            TAG_NIL => Self::Null,
            TAG_DICT => Self::Dict(read_dict(reader, depth + 1)?),
            TAG_LIST => {
                let len = read_len(reader)?;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(Self::read_at(reader, depth + 1)?);
                }
                Self::List(items)
            }
            TAG_BYTES => Self::Bytes(read_bytes(reader, MAX_BYTES_LENGTH)?),
            TAG_STRING => Self::Str(read_string(reader, MAX_BYTES_LENGTH)?),
            TAG_BOOL => Self::Bool(bool::read(reader)?),
            TAG_ADDRESS => Self::Address(Address::read(reader)?),
            TAG_INT => {
                let bytes = read_bytes(reader, MAX_INT_LENGTH)?;
                if bytes.is_empty() {
                    Self::Int(BigInt::zero())
                } else {
                    Self::Int(BigInt::from_signed_bytes_be(&bytes))
                }
            }
            i => return Err(Error::InvalidEnum(i)),
        })
    }
}

impl Write for TypedValue {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Null => TAG_NIL.write(writer),
            Self::Dict(entries) => {
                TAG_DICT.write(writer);
                write_dict(entries, writer);
            }
            Self::List(items) => {
                TAG_LIST.write(writer);
                (items.len() as u32).write(writer);
                for item in items {
                    item.write(writer);
                }
            }
            Self::Bytes(bytes) => {
                TAG_BYTES.write(writer);
                write_bytes(bytes, writer);
            }
            Self::Str(s) => {
                TAG_STRING.write(writer);
                write_string(s, writer);
            }
            Self::Bool(v) => {
                TAG_BOOL.write(writer);
                v.write(writer);
            }
            Self::Address(address) => {
                TAG_ADDRESS.write(writer);
                address.write(writer);
            }
            Self::Int(v) => {
                TAG_INT.write(writer);
                write_bytes(&int_to_bytes(v), writer);
            }
        }
    }
}

impl Read for TypedValue {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Self::read_at(reader, 0)
    }
}

impl EncodeSize for TypedValue {
    fn encode_size(&self) -> usize {
        1 + match self {
            Self::Null => 0,
            Self::Dict(entries) => dict_encode_size(entries),
            Self::List(items) => 4 + items.iter().map(|i| i.encode_size()).sum::<usize>(),
            Self::Bytes(bytes) => bytes_encode_size(bytes.len()),
            Self::Str(s) => bytes_encode_size(s.len()),
            Self::Bool(v) => v.encode_size(),
            Self::Address(address) => address.encode_size(),
            Self::Int(v) => bytes_encode_size(int_to_bytes(v).len()),
        }
    }
}
