use bitcoin::{OutPoint, Transaction, TxOut, Txid, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::adapter::Adapter;
use crate::crypto::adaptor::AdaptorSignature;
use crate::crypto::Bip340Signature;
use crate::error::{Error, Result};
use crate::params::Params;
use crate::scripts::{StakingInfo, UnbondingInfo};

/// Status of a delegation. Never stored; always derived from the delegation
/// record and the chain position with [`BtcDelegation::status`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BtcDelegationStatus {
    Pending,
    Active,
    Unbonded,
}

impl fmt::Display for BtcDelegationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BtcDelegationStatus::Pending => "PENDING",
            BtcDelegationStatus::Active => "ACTIVE",
            BtcDelegationStatus::Unbonded => "UNBONDED",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureInfo {
    pub pk: XOnlyPublicKey,
    pub sig: Bip340Signature,
}

/// One covenant member's adaptor signatures over a slashing transaction, one
/// per finality provider in delegation order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CovenantAdaptorSignatures {
    pub cov_pk: XOnlyPublicKey,
    pub adaptor_sigs: Vec<AdaptorSignature>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtcUndelegation {
    pub unbonding_tx: Adapter<Transaction>,
    /// Slashing transaction spending the unbonding output.
    pub slashing_tx: Adapter<Transaction>,
    pub delegator_slashing_sig: Bip340Signature,
    /// Set once the staker unbonds early.
    pub delegator_unbonding_sig: Option<Bip340Signature>,
    pub covenant_slashing_sigs: Vec<CovenantAdaptorSignatures>,
    pub covenant_unbonding_sig_list: Vec<SignatureInfo>,
}

impl BtcUndelegation {
    pub fn is_signed_by_cov_member(&self, cov_pk: &XOnlyPublicKey) -> bool {
        self.covenant_slashing_sigs
            .iter()
            .any(|sigs| sigs.cov_pk == *cov_pk)
            && self
                .covenant_unbonding_sig_list
                .iter()
                .any(|info| info.pk == *cov_pk)
    }

    pub fn has_covenant_quorums(&self, quorum: u32) -> bool {
        self.covenant_slashing_sigs.len() >= quorum as usize
            && self.covenant_unbonding_sig_list.len() >= quorum as usize
    }

    pub fn unbonding_output(&self) -> Result<&TxOut> {
        self.unbonding_tx
            .output
            .first()
            .ok_or_else(|| Error::Fault("stored unbonding tx has no output".to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtcDelegation {
    pub staker_addr: String,
    pub btc_pk: XOnlyPublicKey,
    pub pop: Bip340Signature,
    pub fp_btc_pk_list: Vec<XOnlyPublicKey>,
    pub staking_time: u16,
    /// Height of the block including the staking tx, 0 until proven.
    pub start_height: u64,
    /// `start_height + staking_time`, 0 until proven.
    pub end_height: u64,
    pub total_sat: u64,
    pub staking_tx: Adapter<Transaction>,
    pub staking_output_idx: u32,
    pub slashing_tx: Adapter<Transaction>,
    pub delegator_sig: Bip340Signature,
    pub covenant_sigs: Vec<CovenantAdaptorSignatures>,
    pub unbonding_time: u16,
    pub btc_undelegation: BtcUndelegation,
    /// Version of the parameters this delegation was validated against.
    pub params_version: u32,
}

impl BtcDelegation {
    pub fn staking_tx_hash(&self) -> Txid {
        self.staking_tx.txid()
    }

    pub fn staking_outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.staking_tx_hash(),
            vout: self.staking_output_idx,
        }
    }

    pub fn has_inclusion_proof(&self) -> bool {
        self.start_height != 0 && self.end_height != 0
    }

    /// Records the height of the block including the staking tx.
    pub fn set_inclusion_height(&mut self, height: u64) {
        self.start_height = height;
        self.end_height = height + self.staking_time as u64;
    }

    pub fn is_signed_by_cov_member(&self, cov_pk: &XOnlyPublicKey) -> bool {
        self.covenant_sigs.iter().any(|sigs| sigs.cov_pk == *cov_pk)
    }

    /// Whether this member has signed both the staking and unbonding paths.
    pub fn is_fully_signed_by_cov_member(&self, cov_pk: &XOnlyPublicKey) -> bool {
        self.is_signed_by_cov_member(cov_pk) && self.btc_undelegation.is_signed_by_cov_member(cov_pk)
    }

    pub fn has_covenant_quorums(&self, quorum: u32) -> bool {
        self.covenant_sigs.len() >= quorum as usize
            && self.btc_undelegation.has_covenant_quorums(quorum)
    }

    pub fn is_unbonded_early(&self) -> bool {
        self.btc_undelegation.delegator_unbonding_sig.is_some()
    }

    pub fn fp_index(&self, fp_pk: &XOnlyPublicKey) -> Option<usize> {
        self.fp_btc_pk_list.iter().position(|pk| pk == fp_pk)
    }

    /// Derives the status at BTC tip `btc_tip` with finalization timeout `w`.
    /// An early unbonding signature takes precedence over everything else,
    /// then expiry at `end_height - w`, then the proof and quorum
    /// requirements.
    pub fn status(&self, btc_tip: u64, w: u64, covenant_quorum: u32) -> BtcDelegationStatus {
        if self.is_unbonded_early() {
            return BtcDelegationStatus::Unbonded;
        }

        if self.has_inclusion_proof() && btc_tip.saturating_add(w) >= self.end_height {
            return BtcDelegationStatus::Unbonded;
        }

        if !self.has_inclusion_proof() || !self.has_covenant_quorums(covenant_quorum) {
            return BtcDelegationStatus::Pending;
        }

        BtcDelegationStatus::Active
    }

    pub fn voting_power(&self, btc_tip: u64, w: u64, covenant_quorum: u32) -> u64 {
        match self.status(btc_tip, w, covenant_quorum) {
            BtcDelegationStatus::Active => self.total_sat,
            _ => 0,
        }
    }

    /// Rebuilds the staking output and spend paths under `params`. A stored
    /// delegation was validated against these, so failure is a fault.
    pub fn staking_info(&self, params: &Params) -> Result<StakingInfo> {
        StakingInfo::new(
            self.btc_pk,
            &self.fp_btc_pk_list,
            params,
            self.staking_time,
            self.total_sat,
        )
        .map_err(|e| Error::Fault(format!("staking info of stored delegation: {e}")))
    }

    pub fn unbonding_info(&self, params: &Params) -> Result<UnbondingInfo> {
        let value = self.btc_undelegation.unbonding_output()?.value;
        UnbondingInfo::new(
            self.btc_pk,
            &self.fp_btc_pk_list,
            params,
            self.unbonding_time,
            value,
        )
        .map_err(|e| Error::Fault(format!("unbonding info of stored delegation: {e}")))
    }

    /// Records a covenant member's signatures. Parts this member already
    /// signed are left untouched.
    pub fn add_covenant_sigs(
        &mut self,
        cov_pk: XOnlyPublicKey,
        slashing_sigs: Vec<AdaptorSignature>,
        unbonding_sig: Bip340Signature,
        unbonding_slashing_sigs: Vec<AdaptorSignature>,
    ) {
        if !self.is_signed_by_cov_member(&cov_pk) {
            self.covenant_sigs.push(CovenantAdaptorSignatures {
                cov_pk,
                adaptor_sigs: slashing_sigs,
            });
        }

        let undel = &mut self.btc_undelegation;
        if !undel.covenant_slashing_sigs.iter().any(|s| s.cov_pk == cov_pk) {
            undel.covenant_slashing_sigs.push(CovenantAdaptorSignatures {
                cov_pk,
                adaptor_sigs: unbonding_slashing_sigs,
            });
        }
        if !undel.covenant_unbonding_sig_list.iter().any(|s| s.pk == cov_pk) {
            undel.covenant_unbonding_sig_list.push(SignatureInfo {
                pk: cov_pk,
                sig: unbonding_sig,
            });
        }
    }
}
