use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, Read, ReadExt, Write};
use commonware_cryptography::{sha256::Sha256, Hasher};
use commonware_utils::{from_hex, hex};
use std::{fmt, str::FromStr};

/// Length of the hashed body of an address.
pub const ADDRESS_BODY_LENGTH: usize = 20;

/// Domain separator mixed into contract address derivation.
const CONTRACT_ADDRESS_PREFIX: &[u8] = b"_STRATUM_CONTRACT";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum AddressKind {
    /// Externally owned account.
    Account = 0,
    /// Deployed contract.
    Contract = 1,
}

impl AddressKind {
    fn prefix(&self) -> &'static str {
        match self {
            Self::Account => "hx",
            Self::Contract => "cx",
        }
    }
}

/// An account or contract address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    kind: AddressKind,
    body: [u8; ADDRESS_BODY_LENGTH],
}

impl Address {
    pub const fn account(body: [u8; ADDRESS_BODY_LENGTH]) -> Self {
        Self {
            kind: AddressKind::Account,
            body,
        }
    }

    pub const fn contract(body: [u8; ADDRESS_BODY_LENGTH]) -> Self {
        Self {
            kind: AddressKind::Contract,
            body,
        }
    }

    /// Derive the account address controlled by a public key.
    pub fn from_public_key(public: &[u8]) -> Self {
        Self::account(truncate(Sha256::hash(public).as_ref()))
    }

    /// Derive the address of the contract created by `creator` at `nonce`.
    ///
    /// The same `(creator, nonce)` pair always yields the same address.
    pub fn for_contract(creator: &Address, nonce: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(CONTRACT_ADDRESS_PREFIX);
        hasher.update(&[creator.kind as u8]);
        hasher.update(&creator.body);
        hasher.update(&nonce.to_be_bytes());
        Self::contract(truncate(hasher.finalize().as_ref()))
    }

    pub fn kind(&self) -> AddressKind {
        self.kind
    }

    pub fn body(&self) -> &[u8; ADDRESS_BODY_LENGTH] {
        &self.body
    }

    pub fn is_contract(&self) -> bool {
        self.kind == AddressKind::Contract
    }
}

fn truncate(digest: &[u8]) -> [u8; ADDRESS_BODY_LENGTH] {
    let mut body = [0u8; ADDRESS_BODY_LENGTH];
    body.copy_from_slice(&digest[..ADDRESS_BODY_LENGTH]);
    body
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), hex(&self.body))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseAddressError {
    #[error("unknown address prefix")]
    Prefix,
    #[error("address body is not {ADDRESS_BODY_LENGTH} hex bytes")]
    Body,
}

impl FromStr for Address {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = if let Some(rest) = s.strip_prefix("hx") {
            (AddressKind::Account, rest)
        } else if let Some(rest) = s.strip_prefix("cx") {
            (AddressKind::Contract, rest)
        } else {
            return Err(ParseAddressError::Prefix);
        };
        let bytes = from_hex(rest).ok_or(ParseAddressError::Body)?;
        let body: [u8; ADDRESS_BODY_LENGTH] =
            bytes.try_into().map_err(|_| ParseAddressError::Body)?;
        Ok(Self { kind, body })
    }
}

impl Write for Address {
    fn write(&self, writer: &mut impl BufMut) {
        (self.kind as u8).write(writer);
        writer.put_slice(&self.body);
    }
}

impl Read for Address {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let kind = match u8::read(reader)? {
            0 => AddressKind::Account,
            1 => AddressKind::Contract,
            i => return Err(Error::InvalidEnum(i)),
        };
        if reader.remaining() < ADDRESS_BODY_LENGTH {
            return Err(Error::EndOfBuffer);
        }
        let mut body = [0u8; ADDRESS_BODY_LENGTH];
        reader.copy_to_slice(&mut body);
        Ok(Self { kind, body })
    }
}

impl EncodeSize for Address {
    fn encode_size(&self) -> usize {
        1 + ADDRESS_BODY_LENGTH
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::{DecodeExt, Encode};
    use proptest::prelude::*;

    #[test]
    fn display_round_trips_through_from_str() {
        let account = Address::from_public_key(b"alice");
        let contract = Address::for_contract(&account, 7);

        assert!(account.to_string().starts_with("hx"));
        assert!(contract.to_string().starts_with("cx"));
        assert_eq!(account.to_string().parse::<Address>().unwrap(), account);
        assert_eq!(contract.to_string().parse::<Address>().unwrap(), contract);
    }

    #[test]
    fn rejects_malformed_strings() {
        assert_eq!("zz00".parse::<Address>(), Err(ParseAddressError::Prefix));
        assert_eq!("hx0011".parse::<Address>(), Err(ParseAddressError::Body));
        assert_eq!("hxnothex".parse::<Address>(), Err(ParseAddressError::Body));
    }

    #[test]
    fn decode_rejects_unknown_kind() {
        let mut encoded = Address::from_public_key(b"bob").encode().to_vec();
        encoded[0] = 9;
        assert!(matches!(
            Address::decode(encoded.as_slice()),
            Err(Error::InvalidEnum(9))
        ));
    }

    #[test]
    fn decode_rejects_short_body() {
        let encoded = Address::from_public_key(b"bob").encode();
        assert!(matches!(
            Address::decode(&encoded[..10]),
            Err(Error::EndOfBuffer)
        ));
    }

    proptest! {
        #[test]
        fn contract_address_is_deterministic(
            body in proptest::array::uniform20(any::<u8>()),
            nonce in any::<u64>(),
        ) {
            let sender = Address::account(body);
            let first = Address::for_contract(&sender, nonce);
            let second = Address::for_contract(&sender, nonce);
            prop_assert_eq!(first, second);
            prop_assert!(first.is_contract());
        }

        #[test]
        fn contract_address_depends_on_nonce(
            body in proptest::array::uniform20(any::<u8>()),
            nonce in 0u64..u64::MAX,
        ) {
            let sender = Address::account(body);
            prop_assert_ne!(
                Address::for_contract(&sender, nonce),
                Address::for_contract(&sender, nonce + 1)
            );
        }
    }
}
