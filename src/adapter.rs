use bitcoin::consensus::{deserialize, serialize, Decodable, Encodable};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::ops::{Deref, DerefMut};

use crate::error::Result;

/// Wraps a Bitcoin consensus type so records holding it can be serialized
/// with serde. The wire form is the hex of the consensus encoding, which keeps
/// the bytes a host persists identical to the bytes that were verified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Adapter<T> {
    inner: T,
}

impl<T> Adapter<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Decodable> Adapter<T> {
    /// Decodes from raw consensus bytes, rejecting trailing data.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::new(deserialize(bytes)?))
    }
}

impl<T: Encodable> Adapter<T> {
    pub fn to_bytes(&self) -> Vec<u8> {
        serialize(&self.inner)
    }
}

impl<T: Default> Default for Adapter<T> {
    fn default() -> Self {
        Self {
            inner: Default::default(),
        }
    }
}

impl<T> Deref for Adapter<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> DerefMut for Adapter<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl<T> From<T> for Adapter<T> {
    fn from(inner: T) -> Self {
        Self::new(inner)
    }
}

impl<T: Copy> Copy for Adapter<T> {}

impl<T: Encodable> Serialize for Adapter<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.to_bytes()))
    }
}

impl<'de, T: Decodable> Deserialize<'de> for Adapter<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let hex_str = String::deserialize(deserializer)?;
        let bytes = hex::decode(hex_str).map_err(de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::{OutPoint, Transaction};

    #[test]
    fn tx_serde() {
        let tx_hex = "0200000001237aade8b8a56a47e30ed80a6102e5fdc1acd46373dcf640efd8d36940d2f6560000000000ffffffff01384a00000000000022512019d293a8610a102e8d62c1ed6c054b759e4361d5352e268ad0c39582734ea50b00000000";
        let tx: Adapter<Transaction> = Adapter::from_bytes(&hex::decode(tx_hex).unwrap()).unwrap();
        assert_eq!(tx.input.len(), 1);

        let json = serde_json::to_string(&tx).unwrap();
        assert_eq!(json, format!("\"{}\"", tx_hex));

        let decoded: Adapter<Transaction> = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut bytes = Adapter::new(OutPoint::null()).to_bytes();
        bytes.push(0);
        assert!(Adapter::<OutPoint>::from_bytes(&bytes).is_err());
    }
}
