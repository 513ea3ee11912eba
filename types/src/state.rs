use crate::{
    address::Address,
    value::{
        bytes_encode_size, dict_encode_size, read_bytes, read_dict, read_string, write_bytes,
        write_dict, write_string, TypedValue,
    },
};
use bytes::{Buf, BufMut};
use commonware_codec::{Encode, EncodeSize, Error, Read, ReadExt, Write};
use commonware_cryptography::{
    sha256::{Digest, Sha256},
    Hasher,
};
use std::collections::BTreeMap;

/// Maximum length of a contract code blob.
pub const MAX_CODE_LENGTH: usize = 256 * 1024;

/// Maximum length of a runtime name.
pub const MAX_RUNTIME_NAME_LENGTH: usize = 64;

/// Maximum length of a raw storage key.
pub const MAX_STORAGE_KEY_LENGTH: usize = 256;

/// Maximum length of a raw storage value.
pub const MAX_STORAGE_VALUE_LENGTH: usize = 64 * 1024;

/// Persisted instance fields of a contract.
pub type Fields = BTreeMap<String, TypedValue>;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Account {
    pub balance: u64,
    pub nonce: u64,
}

impl Write for Account {
    fn write(&self, writer: &mut impl BufMut) {
        self.balance.write(writer);
        self.nonce.write(writer);
    }
}

impl Read for Account {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            balance: u64::read(reader)?,
            nonce: u64::read(reader)?,
        })
    }
}

impl EncodeSize for Account {
    fn encode_size(&self) -> usize {
        self.balance.encode_size() + self.nonce.encode_size()
    }
}

/// Stored code of a contract.
///
/// `runtime` names the implementation that verifies and instantiates the
/// opaque `bytes`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractCode {
    pub runtime: String,
    pub bytes: Vec<u8>,
}

impl ContractCode {
    pub fn new(runtime: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            runtime: runtime.into(),
            bytes: bytes.into(),
        }
    }

    pub fn hash(&self) -> Digest {
        Sha256::hash(&self.encode())
    }
}

impl Write for ContractCode {
    fn write(&self, writer: &mut impl BufMut) {
        write_string(&self.runtime, writer);
        write_bytes(&self.bytes, writer);
    }
}

impl Read for ContractCode {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            runtime: read_string(reader, MAX_RUNTIME_NAME_LENGTH)?,
            bytes: read_bytes(reader, MAX_CODE_LENGTH)?,
        })
    }
}

impl EncodeSize for ContractCode {
    fn encode_size(&self) -> usize {
        bytes_encode_size(self.runtime.len()) + bytes_encode_size(self.bytes.len())
    }
}

#[derive(Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Debug)]
pub enum Key {
    Account(Address),
    Code(Address),
    Fields(Address),
    Storage(Address, Vec<u8>),
}

impl Key {
    pub fn address(&self) -> &Address {
        match self {
            Self::Account(a) | Self::Code(a) | Self::Fields(a) | Self::Storage(a, _) => a,
        }
    }
}

impl Write for Key {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Account(address) => {
                0u8.write(writer);
                address.write(writer);
            }
            Self::Code(address) => {
                1u8.write(writer);
                address.write(writer);
            }
            Self::Fields(address) => {
                2u8.write(writer);
                address.write(writer);
            }
            Self::Storage(address, key) => {
                3u8.write(writer);
                address.write(writer);
                write_bytes(key, writer);
            }
        }
    }
}

impl Read for Key {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let key = match u8::read(reader)? {
            0 => Self::Account(Address::read(reader)?),
            1 => Self::Code(Address::read(reader)?),
            2 => Self::Fields(Address::read(reader)?),
            3 => Self::Storage(
                Address::read(reader)?,
                read_bytes(reader, MAX_STORAGE_KEY_LENGTH)?,
            ),
            i => return Err(Error::InvalidEnum(i)),
        };

        Ok(key)
    }
}

impl EncodeSize for Key {
    fn encode_size(&self) -> usize {
        1 + match self {
            Self::Account(address) | Self::Code(address) | Self::Fields(address) => {
                address.encode_size()
            }
            Self::Storage(address, key) => address.encode_size() + bytes_encode_size(key.len()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Account(Account),
    Code(ContractCode),
    Fields(Fields),
    Storage(Vec<u8>),
}

impl Write for Value {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Account(account) => {
                0u8.write(writer);
                account.write(writer);
            }
            Self::Code(code) => {
                1u8.write(writer);
                code.write(writer);
            }
            Self::Fields(fields) => {
                2u8.write(writer);
                write_dict(fields, writer);
            }
            Self::Storage(bytes) => {
                3u8.write(writer);
                write_bytes(bytes, writer);
            }
        }
    }
}

impl Read for Value {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let value = match u8::read(reader)? {
            0 => Self::Account(Account::read(reader)?),
            1 => Self::Code(ContractCode::read(reader)?),
            2 => Self::Fields(read_dict(reader, 0)?),
            3 => Self::Storage(read_bytes(reader, MAX_STORAGE_VALUE_LENGTH)?),
            i => return Err(Error::InvalidEnum(i)),
        };

        Ok(value)
    }
}

impl EncodeSize for Value {
    fn encode_size(&self) -> usize {
        1 + match self {
            Self::Account(account) => account.encode_size(),
            Self::Code(code) => code.encode_size(),
            Self::Fields(fields) => dict_encode_size(fields),
            Self::Storage(bytes) => bytes_encode_size(bytes.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::DecodeExt;

    #[test]
    fn code_hash_tracks_contents() {
        let a = ContractCode::new("native", b"counter".to_vec());
        let b = ContractCode::new("native", b"counter".to_vec());
        let c = ContractCode::new("native", b"hello".to_vec());
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn storage_keys_are_scoped_by_address() {
        let a = Address::from_public_key(b"a");
        let b = Address::from_public_key(b"b");
        let ka = Key::Storage(a, b"k".to_vec());
        let kb = Key::Storage(b, b"k".to_vec());
        assert_ne!(ka.encode(), kb.encode());
        assert_eq!(Key::decode(ka.encode().as_ref()).unwrap(), ka);
    }

    #[test]
    fn fields_value_decodes() {
        let mut fields = Fields::new();
        fields.insert("count".to_string(), TypedValue::int(3));
        fields.insert("owner".to_string(), Address::from_public_key(b"o").into());
        let value = Value::Fields(fields);
        let encoded = value.encode();
        assert_eq!(encoded.len(), value.encode_size());
        assert_eq!(Value::decode(encoded.as_ref()).unwrap(), value);
    }

    #[test]
    fn rejects_oversized_storage_key() {
        let mut buf = Vec::new();
        3u8.write(&mut buf);
        Address::from_public_key(b"a").write(&mut buf);
        write_bytes(&vec![0u8; MAX_STORAGE_KEY_LENGTH + 1], &mut buf);
        assert!(matches!(
            Key::decode(buf.as_slice()),
            Err(Error::Invalid("Bytes", "too long"))
        ));
    }
}
