use crate::{
    address::Address,
    state::ContractCode,
    value::{
        bytes_encode_size, dict_encode_size, read_dict, read_string, write_dict, write_string,
        Params,
    },
};
use bytes::{Buf, BufMut};
use commonware_codec::{Encode, EncodeSize, Error, Read, ReadExt, Write};
use commonware_cryptography::{
    sha256::{Digest, Sha256},
    Digestible, Hasher,
};

/// Maximum length of a method name.
pub const MAX_METHOD_LENGTH: usize = 128;

/// Default step limit for transactions built without an explicit limit.
pub const DEFAULT_STEP_LIMIT: u64 = 1_000_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// Create a new contract from `code`, running its constructor with `params`.
    Deploy { code: ContractCode, params: Params },
    /// Invoke `method` on the destination contract.
    Call { method: String, params: Params },
    /// Move value to the destination without running code.
    Transfer,
}

impl Write for Payload {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Deploy { code, params } => {
                0u8.write(writer);
                code.write(writer);
                write_dict(params, writer);
            }
            Self::Call { method, params } => {
                1u8.write(writer);
                write_string(method, writer);
                write_dict(params, writer);
            }
            Self::Transfer => 2u8.write(writer),
        }
    }
}

impl Read for Payload {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let payload = match u8::read(reader)? {
            0 => Self::Deploy {
                code: ContractCode::read(reader)?,
                params: read_dict(reader, 0)?,
            },
            1 => Self::Call {
                method: read_string(reader, MAX_METHOD_LENGTH)?,
                params: read_dict(reader, 0)?,
            },
            2 => Self::Transfer,
            i => return Err(Error::InvalidEnum(i)),
        };
        Ok(payload)
    }
}

impl EncodeSize for Payload {
    fn encode_size(&self) -> usize {
        1 + match self {
            Self::Deploy { code, params } => code.encode_size() + dict_encode_size(params),
            Self::Call { method, params } => {
                bytes_encode_size(method.len()) + dict_encode_size(params)
            }
            Self::Transfer => 0,
        }
    }
}

/// A request to run code: either a top-level transaction submitted by an
/// account or a nested call issued by a running contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub sender: Address,
    /// Target of a call or transfer. For a deployment, `None` derives the
    /// contract address from `(sender, nonce)`.
    pub destination: Option<Address>,
    pub nonce: u64,
    pub value: u64,
    /// Maximum steps this transaction may consume.
    pub limit: u64,
    /// Run without write access.
    pub query: bool,
    pub payload: Payload,
}

impl Transaction {
    pub fn deploy(sender: Address, nonce: u64, code: ContractCode, params: Params) -> Self {
        Self {
            sender,
            destination: None,
            nonce,
            value: 0,
            limit: DEFAULT_STEP_LIMIT,
            query: false,
            payload: Payload::Deploy { code, params },
        }
    }

    pub fn call(
        sender: Address,
        destination: Address,
        method: impl Into<String>,
        params: Params,
    ) -> Self {
        Self {
            sender,
            destination: Some(destination),
            nonce: 0,
            value: 0,
            limit: DEFAULT_STEP_LIMIT,
            query: false,
            payload: Payload::Call {
                method: method.into(),
                params,
            },
        }
    }

    pub fn transfer(sender: Address, destination: Address, value: u64) -> Self {
        Self {
            sender,
            destination: Some(destination),
            nonce: 0,
            value,
            limit: DEFAULT_STEP_LIMIT,
            query: false,
            payload: Payload::Transfer,
        }
    }

    pub fn with_value(mut self, value: u64) -> Self {
        self.value = value;
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn as_query(mut self) -> Self {
        self.query = true;
        self
    }

    /// Returns true if this transaction deploys a new contract.
    pub fn is_create(&self) -> bool {
        matches!(self.payload, Payload::Deploy { .. })
    }

    /// Address a deployment will create.
    pub fn created_address(&self) -> Option<Address> {
        self.is_create().then(|| {
            self.destination
                .unwrap_or_else(|| Address::for_contract(&self.sender, self.nonce))
        })
    }
}

impl Write for Transaction {
    fn write(&self, writer: &mut impl BufMut) {
        self.sender.write(writer);
        match &self.destination {
            Some(destination) => {
                true.write(writer);
                destination.write(writer);
            }
            None => false.write(writer),
        }
        self.nonce.write(writer);
        self.value.write(writer);
        self.limit.write(writer);
        self.query.write(writer);
        self.payload.write(writer);
    }
}

impl Read for Transaction {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let sender = Address::read(reader)?;
        let destination = if bool::read(reader)? {
            Some(Address::read(reader)?)
        } else {
            None
        };
        Ok(Self {
            sender,
            destination,
            nonce: u64::read(reader)?,
            value: u64::read(reader)?,
            limit: u64::read(reader)?,
            query: bool::read(reader)?,
            payload: Payload::read(reader)?,
        })
    }
}

impl EncodeSize for Transaction {
    fn encode_size(&self) -> usize {
        self.sender.encode_size()
            + 1
            + self.destination.map_or(0, |d| d.encode_size())
            + self.nonce.encode_size()
            + self.value.encode_size()
            + self.limit.encode_size()
            + self.query.encode_size()
            + self.payload.encode_size()
    }
}

impl Digestible for Transaction {
    type Digest = Digest;

    fn digest(&self) -> Digest {
        Sha256::hash(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{params, TypedValue};
    use commonware_codec::DecodeExt;

    fn sender() -> Address {
        Address::from_public_key(b"sender")
    }

    #[test]
    fn deployment_address_follows_sender_and_nonce() {
        let code = ContractCode::new("native", b"counter".to_vec());
        let tx = Transaction::deploy(sender(), 4, code.clone(), Params::new());
        assert!(tx.is_create());
        assert_eq!(
            tx.created_address(),
            Some(Address::for_contract(&sender(), 4))
        );

        let explicit = Address::contract([7; 20]);
        let mut tx = Transaction::deploy(sender(), 4, code, Params::new());
        tx.destination = Some(explicit);
        assert_eq!(tx.created_address(), Some(explicit));
    }

    #[test]
    fn calls_do_not_create() {
        let tx = Transaction::call(sender(), Address::contract([1; 20]), "get", Params::new());
        assert!(!tx.is_create());
        assert_eq!(tx.created_address(), None);
    }

    #[test]
    fn digest_covers_payload() {
        let to = Address::contract([1; 20]);
        let a = Transaction::call(sender(), to, "hello", params([("name", "alice")]));
        let b = Transaction::call(sender(), to, "hello", params([("name", "bob")]));
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest(), a.clone().digest());
    }

    #[test]
    fn decodes_query_call() {
        let tx = Transaction::call(
            sender(),
            Address::contract([2; 20]),
            "get",
            params([("value", TypedValue::int(-5))]),
        )
        .with_value(10)
        .with_limit(500)
        .as_query();
        let encoded = tx.encode();
        assert_eq!(encoded.len(), tx.encode_size());
        assert_eq!(Transaction::decode(encoded.as_ref()).unwrap(), tx);
    }
}
