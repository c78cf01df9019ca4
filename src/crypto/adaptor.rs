//! Schnorr adaptor signatures over secp256k1.
//!
//! An adaptor signature by `P` encrypted to `T` verifies against `P` and `T`
//! but is not a valid BIP340 signature. Whoever knows the discrete log `t` of
//! `T` can decrypt it into a valid BIP340 signature, and anyone holding both
//! the adaptor signature and the decrypted signature learns `t`.
//!
//! Covenant members encrypt their slashing signatures to the finality
//! providers' keys, so a slashing transaction can only be completed once a
//! provider's secret key is exposed.
//!
//! Encoding: `R (33 bytes, compressed) || s' (32 bytes) || need_negation (1 byte)`
//! where `R = k*G + T`. When `R` has odd y the signer negates `k`, and the
//! final signature uses `-R`, so the decrypted `s = s' - t` instead of
//! `s' + t`.

use bitcoin::secp256k1::scalar::Scalar;
use bitcoin::secp256k1::{schnorr, Parity, PublicKey, SecretKey};
use bitcoin::{Script, Transaction, TxOut, XOnlyPublicKey};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use super::{script_path_sighash, tagged_hash, SECP};
use crate::error::{Error, Result};

pub const ADAPTOR_SIGNATURE_SIZE: usize = 33 + 32 + 1;

const NONCE_TAG: &str = "btcstaking/adaptor/nonce";
const CHALLENGE_TAG: &str = "BIP0340/challenge";

fn invalid(msg: impl Into<String>) -> Error {
    Error::AdaptorSignatureInvalid(msg.into())
}

fn to_scalar(sk: &SecretKey) -> Result<Scalar> {
    Scalar::from_be_bytes(sk.secret_bytes()).map_err(|_| invalid("scalar out of range"))
}

fn has_odd_y(point: &PublicKey) -> bool {
    point.x_only_public_key().1 == Parity::Odd
}

fn challenge(r: &PublicKey, pk: &XOnlyPublicKey, msg: &[u8; 32]) -> Result<Scalar> {
    let e = tagged_hash(
        CHALLENGE_TAG,
        &[&r.x_only_public_key().0.serialize(), &pk.serialize(), msg],
    );
    Scalar::from_be_bytes(e).map_err(|_| invalid("challenge out of range"))
}

/// The point an adaptor signature is encrypted to: a finality provider's
/// BIP340 public key lifted to its even-y point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncryptionKey(PublicKey);

impl EncryptionKey {
    pub fn from_x_only(pk: &XOnlyPublicKey) -> Self {
        EncryptionKey(pk.public_key(Parity::Even))
    }

    pub fn to_x_only(&self) -> XOnlyPublicKey {
        self.0.x_only_public_key().0
    }
}

/// The discrete log of an [`EncryptionKey`], normalized so that `t*G` has
/// even y.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecryptionKey(SecretKey);

impl DecryptionKey {
    pub fn from_secret_key(sk: SecretKey) -> Self {
        if sk.x_only_public_key(&*SECP).1 == Parity::Odd {
            DecryptionKey(sk.negate())
        } else {
            DecryptionKey(sk)
        }
    }

    pub fn encryption_key(&self) -> EncryptionKey {
        EncryptionKey(PublicKey::from_secret_key(&*SECP, &self.0))
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdaptorSignature {
    r: PublicKey,
    s_hat: SecretKey,
    need_negation: bool,
}

impl AdaptorSignature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ADAPTOR_SIGNATURE_SIZE {
            return Err(invalid(format!(
                "expected {} bytes, got {}",
                ADAPTOR_SIGNATURE_SIZE,
                bytes.len()
            )));
        }

        let r = PublicKey::from_slice(&bytes[..33]).map_err(|e| invalid(e.to_string()))?;
        let s_hat = SecretKey::from_slice(&bytes[33..65]).map_err(|e| invalid(e.to_string()))?;
        let need_negation = match bytes[65] {
            0 => false,
            1 => true,
            b => return Err(invalid(format!("invalid negation flag {b}"))),
        };

        Ok(AdaptorSignature {
            r,
            s_hat,
            need_negation,
        })
    }

    pub fn to_bytes(&self) -> [u8; ADAPTOR_SIGNATURE_SIZE] {
        let mut bytes = [0; ADAPTOR_SIGNATURE_SIZE];
        bytes[..33].copy_from_slice(&self.r.serialize());
        bytes[33..65].copy_from_slice(&self.s_hat.secret_bytes());
        bytes[65] = self.need_negation as u8;
        bytes
    }

    /// Signs the 32-byte digest `msg` with `sk`, encrypted to `enc_key`. The
    /// nonce is derived deterministically from the key, the encryption key
    /// and the message.
    pub fn enc_sign(sk: &SecretKey, enc_key: &EncryptionKey, msg: &[u8; 32]) -> Result<Self> {
        let (pk, parity) = sk.x_only_public_key(&*SECP);
        let x = match parity {
            Parity::Odd => sk.negate(),
            Parity::Even => *sk,
        };

        let nonce = tagged_hash(
            NONCE_TAG,
            &[&x.secret_bytes(), &enc_key.0.serialize(), msg],
        );
        let k = SecretKey::from_slice(&nonce)?;

        let r = PublicKey::from_secret_key(&*SECP, &k).combine(&enc_key.0)?;
        let need_negation = has_odd_y(&r);
        let k = if need_negation { k.negate() } else { k };

        let e = challenge(&r, &pk, msg)?;
        let ex = x.mul_tweak(&e)?;
        let s_hat = k.add_tweak(&to_scalar(&ex)?)?;

        Ok(AdaptorSignature {
            r,
            s_hat,
            need_negation,
        })
    }

    /// Checks that decrypting this signature with the discrete log of
    /// `enc_key` yields a valid BIP340 signature by `pk` over `msg`.
    pub fn enc_verify(
        &self,
        pk: &XOnlyPublicKey,
        enc_key: &EncryptionKey,
        msg: &[u8; 32],
    ) -> Result<()> {
        if has_odd_y(&self.r) != self.need_negation {
            return Err(invalid("negation flag does not match R"));
        }

        // R' = R - T, or T - R when the final nonce is negated
        let r_hat = if self.need_negation {
            enc_key.0.combine(&self.r.negate(&*SECP))
        } else {
            self.r.combine(&enc_key.0.negate(&*SECP))
        }
        .map_err(|_| invalid("R equals the encryption key"))?;

        let p = pk.public_key(Parity::Even);
        let e = challenge(&self.r, pk, msg)?;
        let e_p = p.mul_tweak(&*SECP, &e)?;

        // s'*G == R' + e*P
        let expected = r_hat
            .combine(&e_p)
            .map_err(|_| invalid("R' + e*P is the point at infinity"))?;
        let actual = PublicKey::from_secret_key(&*SECP, &self.s_hat);
        if actual != expected {
            return Err(invalid(format!("verification failed for signer {pk}")));
        }

        Ok(())
    }

    /// Decrypts into a BIP340 signature.
    pub fn decrypt(&self, dec_key: &DecryptionKey) -> Result<schnorr::Signature> {
        let t = if self.need_negation {
            dec_key.0.negate()
        } else {
            dec_key.0
        };
        let s = self.s_hat.add_tweak(&to_scalar(&t)?)?;

        let mut bytes = [0; 64];
        bytes[..32].copy_from_slice(&self.r.x_only_public_key().0.serialize());
        bytes[32..].copy_from_slice(&s.secret_bytes());
        Ok(schnorr::Signature::from_slice(&bytes)?)
    }

    /// Recovers the decryption key from this adaptor signature and the
    /// BIP340 signature it was decrypted into.
    pub fn extract(
        &self,
        sig: &schnorr::Signature,
        enc_key: &EncryptionKey,
    ) -> Result<DecryptionKey> {
        let sig_bytes = sig.as_ref();
        if sig_bytes[..32] != self.r.x_only_public_key().0.serialize() {
            return Err(invalid("signature nonce does not match adaptor signature"));
        }
        let s = SecretKey::from_slice(&sig_bytes[32..])?;

        // t = s - s', or s' - s when the final nonce is negated
        let t = if self.need_negation {
            self.s_hat.add_tweak(&to_scalar(&s.negate())?)?
        } else {
            s.add_tweak(&to_scalar(&self.s_hat.negate())?)?
        };

        let dec_key = DecryptionKey(t);
        if dec_key.encryption_key() != *enc_key {
            return Err(invalid("extracted key does not match encryption key"));
        }

        Ok(dec_key)
    }
}

/// Verifies a covenant member's adaptor signatures over `slashing_tx`, one per
/// finality provider and each encrypted to that provider's key. The count is
/// checked before any signature is.
pub fn enc_verify_slashing_sigs(
    slashing_tx: &Transaction,
    funding_output: &TxOut,
    slashing_path: &Script,
    cov_pk: &XOnlyPublicKey,
    fp_pks: &[XOnlyPublicKey],
    sigs: &[AdaptorSignature],
) -> Result<()> {
    if sigs.len() != fp_pks.len() {
        return Err(Error::CountMismatch {
            expected: fp_pks.len(),
            actual: sigs.len(),
        });
    }

    let sighash = script_path_sighash(slashing_tx, funding_output, slashing_path)?;
    for (sig, fp_pk) in sigs.iter().zip(fp_pks) {
        let enc_key = EncryptionKey::from_x_only(fp_pk);
        sig.enc_verify(cov_pk, &enc_key, &sighash)?;
    }

    Ok(())
}

/// Covenant-side counterpart of [`enc_verify_slashing_sigs`].
pub fn enc_sign_slashing_tx(
    slashing_tx: &Transaction,
    funding_output: &TxOut,
    slashing_path: &Script,
    cov_sk: &SecretKey,
    fp_pks: &[XOnlyPublicKey],
) -> Result<Vec<AdaptorSignature>> {
    let sighash = script_path_sighash(slashing_tx, funding_output, slashing_path)?;
    fp_pks
        .iter()
        .map(|fp_pk| {
            let enc_key = EncryptionKey::from_x_only(fp_pk);
            AdaptorSignature::enc_sign(cov_sk, &enc_key, &sighash)
        })
        .collect()
}

impl Serialize for AdaptorSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.to_bytes()))
    }
}

impl<'de> Deserialize<'de> for AdaptorSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bytes = hex::decode(String::deserialize(deserializer)?).map_err(de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(de::Error::custom)
    }
}
