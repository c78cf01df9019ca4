//! Signature verification over Bitcoin staking transactions.
//!
//! Every signature checked here is a BIP340 Schnorr signature (plain or
//! adaptor) over the taproot script-path sighash of input 0 of a
//! single-input transaction, committing to the spent output and the leaf
//! script of the spend path being authorized.

use bech32::FromBase32;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{self, schnorr, All, KeyPair, Message, Secp256k1, SecretKey};
use bitcoin::util::sighash::{Prevouts, SchnorrSighashType, SighashCache};
use bitcoin::util::taproot::{LeafVersion, TapLeafHash};
use bitcoin::{Script, Transaction, TxOut, XOnlyPublicKey};
use lazy_static::lazy_static;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

pub mod adaptor;

lazy_static! {
    pub(crate) static ref SECP: Secp256k1<All> = Secp256k1::new();
}

/// A BIP340 signature as stored in delegation records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bip340Signature(schnorr::Signature);

impl Bip340Signature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        schnorr::Signature::from_slice(bytes)
            .map(Bip340Signature)
            .map_err(|e| Error::SignatureInvalid(format!("malformed BIP340 signature: {e}")))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.as_ref().to_vec()
    }

    pub fn inner(&self) -> &schnorr::Signature {
        &self.0
    }
}

impl From<schnorr::Signature> for Bip340Signature {
    fn from(sig: schnorr::Signature) -> Self {
        Bip340Signature(sig)
    }
}

impl Serialize for Bip340Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.to_bytes()))
    }
}

impl<'de> Deserialize<'de> for Bip340Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bytes = hex::decode(String::deserialize(deserializer)?).map_err(de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(de::Error::custom)
    }
}

/// BIP340 tagged hash: `sha256(sha256(tag) || sha256(tag) || parts...)`.
pub(crate) fn tagged_hash(tag: &str, parts: &[&[u8]]) -> [u8; 32] {
    let tag_hash = Sha256::digest(tag.as_bytes());
    let mut hasher = Sha256::new();
    hasher.update(tag_hash);
    hasher.update(tag_hash);
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Derives the BIP340 public key of a secret key.
pub fn x_only_public_key(sk: &SecretKey) -> XOnlyPublicKey {
    sk.x_only_public_key(&*SECP).0
}

/// Computes the taproot script-path sighash for input 0 of `tx`, spending
/// `funding_output` through the leaf `path_script`.
pub fn script_path_sighash(
    tx: &Transaction,
    funding_output: &TxOut,
    path_script: &Script,
) -> Result<[u8; 32]> {
    if tx.input.len() != 1 {
        return Err(Error::InvalidStakingTx(format!(
            "transaction to sign must have exactly one input, got {}",
            tx.input.len()
        )));
    }

    let leaf_hash = TapLeafHash::from_script(path_script, LeafVersion::TapScript);
    let prevouts = [funding_output.clone()];
    let sighash = SighashCache::new(tx).taproot_script_spend_signature_hash(
        0,
        &Prevouts::All(&prevouts),
        leaf_hash,
        SchnorrSighashType::Default,
    )?;

    Ok(sighash.into_inner())
}

/// Verifies `sig` by `pk` over `tx` spending `funding_output` through
/// `path_script`.
pub fn verify_transaction_sig_with_output(
    tx: &Transaction,
    funding_output: &TxOut,
    path_script: &Script,
    pk: &XOnlyPublicKey,
    sig: &Bip340Signature,
) -> Result<()> {
    let sighash = script_path_sighash(tx, funding_output, path_script)?;
    let msg = Message::from_slice(&sighash)?;

    SECP.verify_schnorr(sig.inner(), &msg, pk)
        .map_err(|e| Error::SignatureInvalid(format!("{e} (signer {pk})")))
}

/// Signs `tx` spending `funding_output` through `path_script`. Used by
/// stakers and covenant members, never by the state machine itself.
pub fn sign_transaction(
    tx: &Transaction,
    funding_output: &TxOut,
    path_script: &Script,
    sk: &SecretKey,
) -> Result<Bip340Signature> {
    let sighash = script_path_sighash(tx, funding_output, path_script)?;
    let msg = Message::from_slice(&sighash)?;
    let keypair = KeyPair::from_secret_key(&*SECP, sk);

    Ok(SECP.sign_schnorr_no_aux_rand(&msg, &keypair).into())
}

fn pop_message(address: &str) -> Result<Message> {
    let (_hrp, data, _variant) = bech32::decode(address)?;
    let addr_bytes = Vec::<u8>::from_base32(&data)?;
    let hash: [u8; 32] = Sha256::digest(&addr_bytes).into();
    Ok(Message::from_slice(&hash)?)
}

/// Verifies a proof that the holder of `btc_pk` controls the chain account
/// `address`: a BIP340 signature over `sha256(address bytes)`.
pub fn verify_pop(address: &str, btc_pk: &XOnlyPublicKey, sig: &Bip340Signature) -> Result<()> {
    let msg = pop_message(address)
        .map_err(|e| Error::InvalidProofOfPossession(format!("invalid address: {e}")))?;

    SECP.verify_schnorr(sig.inner(), &msg, btc_pk)
        .map_err(|e| Error::InvalidProofOfPossession(e.to_string()))
}

pub fn sign_pop(address: &str, sk: &SecretKey) -> Result<Bip340Signature> {
    let msg = pop_message(address)?;
    let keypair = KeyPair::from_secret_key(&*SECP, sk);
    Ok(SECP.sign_schnorr_no_aux_rand(&msg, &keypair).into())
}

/// Parses a 32-byte secret key, as submitted in selective slashing evidence.
pub fn parse_secret_key(bytes: &[u8]) -> Result<SecretKey> {
    SecretKey::from_slice(bytes)
        .map_err(|e: secp256k1::Error| Error::InvalidMessage(format!("invalid secret key: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{secret_key, test_address};
    use bitcoin::secp256k1::{Parity, PublicKey};
    use bitcoin::{OutPoint, PackedLockTime, Sequence, TxIn, Witness};

    fn spend(prev: OutPoint, value: u64) -> Transaction {
        Transaction {
            version: 2,
            lock_time: PackedLockTime(0),
            input: vec![TxIn {
                previous_output: prev,
                script_sig: Script::new(),
                sequence: Sequence(u32::MAX),
                witness: Witness::default(),
            }],
            output: vec![TxOut {
                value,
                script_pubkey: Script::new(),
            }],
        }
    }

    #[test]
    fn tagged_hash_matches_bip340_challenge_tag() {
        let expected = {
            let tag = Sha256::digest(b"BIP0340/challenge");
            let mut hasher = Sha256::new();
            hasher.update(tag);
            hasher.update(tag);
            hasher.update([1u8; 32]);
            let out: [u8; 32] = hasher.finalize().into();
            out
        };
        assert_eq!(tagged_hash("BIP0340/challenge", &[&[1u8; 32]]), expected);
    }

    #[test]
    fn keys_are_even_lifted() {
        for i in 1..40u8 {
            let sk = secret_key(i);
            let pk = x_only_public_key(&sk);
            let full = PublicKey::from_secret_key(&*SECP, &sk);
            assert_eq!(full.x_only_public_key().0, pk);

            let even = pk.public_key(Parity::Even);
            assert_eq!(even.x_only_public_key(), (pk, Parity::Even));
            assert_eq!(even == full, sk.x_only_public_key(&*SECP).1 == Parity::Even);

            let keypair = KeyPair::from_secret_key(&*SECP, &sk);
            assert_eq!(keypair.x_only_public_key().0, pk);
        }
    }

    #[test]
    fn transaction_sig() {
        let sk = secret_key(7);
        let pk = x_only_public_key(&sk);
        let funding = TxOut {
            value: 50_000,
            script_pubkey: Script::new(),
        };
        let path = crate::scripts::single_key_script(pk, false);
        let tx = spend(OutPoint::null(), 49_000);

        let sig = sign_transaction(&tx, &funding, &path, &sk).unwrap();
        verify_transaction_sig_with_output(&tx, &funding, &path, &pk, &sig).unwrap();

        let other_pk = x_only_public_key(&secret_key(8));
        let err = verify_transaction_sig_with_output(&tx, &funding, &path, &other_pk, &sig)
            .unwrap_err();
        assert!(matches!(err, Error::SignatureInvalid(_)));

        // the sighash commits to the spent output's value
        let other_funding = TxOut {
            value: 50_001,
            ..funding.clone()
        };
        assert!(
            verify_transaction_sig_with_output(&tx, &other_funding, &path, &pk, &sig).is_err()
        );

        // and to the leaf script of the spend path
        let other_path = crate::scripts::single_key_script(pk, true);
        assert!(verify_transaction_sig_with_output(&tx, &funding, &other_path, &pk, &sig).is_err());
    }

    #[test]
    fn multi_input_rejected() {
        let mut tx = spend(OutPoint::null(), 1);
        tx.input.push(tx.input[0].clone());
        let funding = TxOut::default();
        assert!(sign_transaction(&tx, &funding, &Script::new(), &secret_key(1)).is_err());
    }

    #[test]
    fn pop() {
        let sk = secret_key(3);
        let pk = x_only_public_key(&sk);
        let addr = test_address(3);

        let sig = sign_pop(&addr, &sk).unwrap();
        verify_pop(&addr, &pk, &sig).unwrap();

        let err = verify_pop(&test_address(4), &pk, &sig).unwrap_err();
        assert!(matches!(err, Error::InvalidProofOfPossession(_)));

        let err = verify_pop("not-an-address", &pk, &sig).unwrap_err();
        assert!(matches!(err, Error::InvalidProofOfPossession(_)));
    }

    #[test]
    fn signature_serde() {
        let sig = sign_pop(&test_address(1), &secret_key(1)).unwrap();
        let json = serde_json::to_string(&sig).unwrap();
        assert_eq!(json.len(), 2 + 128);
        assert_eq!(serde_json::from_str::<Bip340Signature>(&json).unwrap(), sig);
    }
}
