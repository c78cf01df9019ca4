//! Requests accepted by the state machine. Creation requests carry raw
//! transaction and signature bytes and are parsed into
//! [`ParsedCreateDelegation`] before any state is read.

use bitcoin::{Transaction, Txid, XOnlyPublicKey};
use serde::{Deserialize, Serialize};

use crate::adapter::Adapter;
use crate::crypto::adaptor::AdaptorSignature;
use crate::crypto::Bip340Signature;
use crate::error::{Error, Result};
use crate::finality_provider::Description;
use crate::params::Rate;
use crate::proof::InclusionProof;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCreateFinalityProvider {
    pub addr: String,
    pub description: Description,
    pub commission: Rate,
    pub btc_pk: XOnlyPublicKey,
    pub pop: Bip340Signature,
}

impl MsgCreateFinalityProvider {
    pub fn validate_basic(&self) -> Result<()> {
        validate_address(&self.addr)?;
        self.description.validate()?;
        if self.commission > Rate::ONE {
            return Err(Error::CommissionOutOfRange(self.commission.to_string()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgEditFinalityProvider {
    /// Signer of the request.
    pub addr: String,
    pub btc_pk: XOnlyPublicKey,
    pub description: Description,
    pub commission: Rate,
}

impl MsgEditFinalityProvider {
    pub fn validate_basic(&self) -> Result<()> {
        validate_address(&self.addr)?;
        self.description.validate()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCreateBtcDelegation {
    pub staker_addr: String,
    #[serde(with = "hex::serde")]
    pub pop: Vec<u8>,
    pub btc_pk: XOnlyPublicKey,
    pub fp_btc_pk_list: Vec<XOnlyPublicKey>,
    pub staking_time: u32,
    pub staking_value: u64,
    #[serde(with = "hex::serde")]
    pub staking_tx: Vec<u8>,
    pub staking_tx_inclusion_proof: Option<InclusionProof>,
    #[serde(with = "hex::serde")]
    pub slashing_tx: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub delegator_slashing_sig: Vec<u8>,
    pub unbonding_time: u32,
    #[serde(with = "hex::serde")]
    pub unbonding_tx: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub unbonding_slashing_tx: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub delegator_unbonding_slashing_sig: Vec<u8>,
}

/// A creation request with every field decoded and range-checked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedCreateDelegation {
    pub staker_addr: String,
    pub pop: Bip340Signature,
    pub btc_pk: XOnlyPublicKey,
    pub fp_btc_pk_list: Vec<XOnlyPublicKey>,
    pub staking_time: u16,
    pub staking_value: u64,
    pub staking_tx: Adapter<Transaction>,
    pub staking_tx_inclusion_proof: Option<InclusionProof>,
    pub slashing_tx: Adapter<Transaction>,
    pub delegator_slashing_sig: Bip340Signature,
    pub unbonding_time: u16,
    pub unbonding_tx: Adapter<Transaction>,
    pub unbonding_slashing_tx: Adapter<Transaction>,
    pub delegator_unbonding_slashing_sig: Bip340Signature,
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidMessage(msg.into())
}

fn validate_address(addr: &str) -> Result<()> {
    bech32::decode(addr).map_err(|e| invalid(format!("invalid address {addr}: {e}")))?;
    Ok(())
}

fn parse_tx(name: &str, bytes: &[u8]) -> Result<Adapter<Transaction>> {
    Adapter::from_bytes(bytes).map_err(|e| invalid(format!("invalid {name}: {e}")))
}

fn parse_sig(name: &str, bytes: &[u8]) -> Result<Bip340Signature> {
    Bip340Signature::from_bytes(bytes).map_err(|e| invalid(format!("invalid {name}: {e}")))
}

fn parse_blocks(name: &str, blocks: u32) -> Result<u16> {
    match u16::try_from(blocks) {
        Ok(blocks) if blocks > 0 => Ok(blocks),
        _ => Err(invalid(format!(
            "{name} must be between 1 and {} blocks, got {blocks}",
            u16::MAX
        ))),
    }
}

impl MsgCreateBtcDelegation {
    pub fn parse(&self) -> Result<ParsedCreateDelegation> {
        validate_address(&self.staker_addr)?;

        if self.fp_btc_pk_list.is_empty() {
            return Err(invalid("no finality providers to delegate to"));
        }
        let mut fps: Vec<_> = self.fp_btc_pk_list.iter().map(|pk| pk.serialize()).collect();
        fps.sort_unstable();
        fps.dedup();
        if fps.len() != self.fp_btc_pk_list.len() {
            return Err(invalid("duplicate finality provider"));
        }

        if self.staking_value == 0 {
            return Err(invalid("staking value must be positive"));
        }

        Ok(ParsedCreateDelegation {
            staker_addr: self.staker_addr.clone(),
            pop: parse_sig("proof of possession", &self.pop)?,
            btc_pk: self.btc_pk,
            fp_btc_pk_list: self.fp_btc_pk_list.clone(),
            staking_time: parse_blocks("staking time", self.staking_time)?,
            staking_value: self.staking_value,
            staking_tx: parse_tx("staking tx", &self.staking_tx)?,
            staking_tx_inclusion_proof: self.staking_tx_inclusion_proof.clone(),
            slashing_tx: parse_tx("slashing tx", &self.slashing_tx)?,
            delegator_slashing_sig: parse_sig("delegator slashing sig", &self.delegator_slashing_sig)?,
            unbonding_time: parse_blocks("unbonding time", self.unbonding_time)?,
            unbonding_tx: parse_tx("unbonding tx", &self.unbonding_tx)?,
            unbonding_slashing_tx: parse_tx("unbonding slashing tx", &self.unbonding_slashing_tx)?,
            delegator_unbonding_slashing_sig: parse_sig(
                "delegator unbonding slashing sig",
                &self.delegator_unbonding_slashing_sig,
            )?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgAddBtcDelegationInclusionProof {
    pub staking_tx_hash: Txid,
    pub staking_tx_inclusion_proof: InclusionProof,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgAddCovenantSigs {
    pub pk: XOnlyPublicKey,
    pub staking_tx_hash: Txid,
    /// Adaptor signatures over the staking slashing tx, one per provider.
    pub slashing_tx_sigs: Vec<AdaptorSignature>,
    pub unbonding_tx_sig: Bip340Signature,
    /// Adaptor signatures over the unbonding slashing tx, one per provider.
    pub slashing_unbonding_tx_sigs: Vec<AdaptorSignature>,
}

impl MsgAddCovenantSigs {
    pub fn validate_basic(&self) -> Result<()> {
        if self.slashing_tx_sigs.is_empty() || self.slashing_unbonding_tx_sigs.is_empty() {
            return Err(invalid("empty covenant adaptor signatures"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgBtcUndelegate {
    pub staking_tx_hash: Txid,
    pub unbonding_tx_sig: Bip340Signature,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgSelectiveSlashingEvidence {
    pub staking_tx_hash: Txid,
    /// Secret key of the finality provider, recovered from a slashing tx it
    /// signed with its adaptor signatures decrypted.
    #[serde(with = "hex::serde")]
    pub recovered_fp_btc_sk: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::DelegationFixture;

    #[test]
    fn parse_valid() {
        let fixture = DelegationFixture::new(100);
        let msg = fixture.create_msg(None);
        let parsed = msg.parse().unwrap();
        assert_eq!(parsed.staking_time, 100);
        assert_eq!(parsed.staking_tx.txid(), fixture.staking_tx().txid());
    }

    #[test]
    fn parse_rejects_malformed() {
        let fixture = DelegationFixture::new(100);
        let valid = fixture.create_msg(None);

        let mut msg = valid.clone();
        msg.fp_btc_pk_list.clear();
        assert!(msg.parse().is_err());

        let mut msg = valid.clone();
        msg.fp_btc_pk_list.push(msg.fp_btc_pk_list[0]);
        assert!(msg.parse().is_err());

        let mut msg = valid.clone();
        msg.staking_time = u16::MAX as u32 + 1;
        assert!(msg.parse().is_err());

        let mut msg = valid.clone();
        msg.unbonding_time = 0;
        assert!(msg.parse().is_err());

        let mut msg = valid.clone();
        msg.staking_tx.push(0);
        let err = msg.parse().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);

        let mut msg = valid.clone();
        msg.delegator_slashing_sig.truncate(63);
        assert!(msg.parse().is_err());

        let mut msg = valid;
        msg.staker_addr = "not an address".to_string();
        assert!(msg.parse().is_err());
    }

    #[test]
    fn msg_serde() {
        let fixture = DelegationFixture::new(100);
        let msg = fixture.create_msg(None);
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(serde_json::from_str::<MsgCreateBtcDelegation>(&json).unwrap(), msg);

        let msg = fixture.covenant_sigs_msg(0);
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(serde_json::from_str::<MsgAddCovenantSigs>(&json).unwrap(), msg);
    }
}
