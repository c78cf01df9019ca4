use bitcoin::{Txid, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use std::ops::RangeBounds;

use crate::context::{ChainSnapshot, Ctx};
use crate::delegation::{BtcDelegation, BtcDelegationStatus};
use crate::error::{Error, Result};
use crate::events::{EventLog, PowerDistUpdateEvent};
use crate::finality_provider::{FinalityProvider, FinalityProviderRegistry};
use crate::handlers;
use crate::msg::{
    MsgAddBtcDelegationInclusionProof, MsgAddCovenantSigs, MsgBtcUndelegate,
    MsgCreateBtcDelegation, MsgCreateFinalityProvider, MsgEditFinalityProvider,
    MsgSelectiveSlashingEvidence,
};
use crate::params::{Params, ParamsStore, VersionedParams};
use crate::scripts::{StakingInfo, UnbondingInfo};
use crate::store::DelegationStore;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    CreateFinalityProvider(MsgCreateFinalityProvider),
    EditFinalityProvider(MsgEditFinalityProvider),
    CreateBtcDelegation(MsgCreateBtcDelegation),
    AddBtcDelegationInclusionProof(MsgAddBtcDelegationInclusionProof),
    AddCovenantSigs(MsgAddCovenantSigs),
    BtcUndelegate(MsgBtcUndelegate),
    SelectiveSlashingEvidence(MsgSelectiveSlashingEvidence),
}

/// Everything the staking module owns. The host persists it between
/// transitions and applies one [`Action`] at a time.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct State {
    pub params: VersionedParams,
    pub finality_providers: FinalityProviderRegistry,
    pub delegations: DelegationStore,
    pub events: EventLog,
}

impl State {
    pub fn new(genesis_params: Params) -> Result<Self> {
        Ok(Self {
            params: VersionedParams::new(genesis_params)?,
            ..Default::default()
        })
    }

    fn delegation_params(&self, del: &BtcDelegation) -> Result<&Params> {
        self.params.params(del.params_version).ok_or_else(|| {
            Error::Fault(format!(
                "params version {} of delegation {} not found",
                del.params_version,
                del.staking_tx_hash()
            ))
        })
    }

    pub fn delegation(&self, staking_tx_hash: &Txid) -> Result<&BtcDelegation> {
        self.delegations.get(staking_tx_hash)
    }

    pub fn delegation_status(
        &self,
        snapshot: &ChainSnapshot,
        staking_tx_hash: &Txid,
    ) -> Result<BtcDelegationStatus> {
        let del = self.delegations.get(staking_tx_hash)?;
        let params = self.delegation_params(del)?;
        Ok(del.status(snapshot.tip_height, snapshot.w, params.covenant_quorum))
    }

    /// Delegations staked to `fp_pk`, with their derived status.
    pub fn delegations_by_finality_provider(
        &self,
        snapshot: &ChainSnapshot,
        fp_pk: &XOnlyPublicKey,
    ) -> Result<Vec<(&BtcDelegation, BtcDelegationStatus)>> {
        self.delegations
            .by_finality_provider(fp_pk)
            .map(|del| {
                let params = self.delegation_params(del)?;
                let status = del.status(snapshot.tip_height, snapshot.w, params.covenant_quorum);
                Ok((del, status))
            })
            .collect()
    }

    pub fn finality_provider(&self, btc_pk: &XOnlyPublicKey) -> Result<&FinalityProvider> {
        self.finality_providers.get(btc_pk)
    }

    /// Total active stake delegated to `fp_pk`, zero once it is slashed.
    pub fn finality_provider_power(
        &self,
        snapshot: &ChainSnapshot,
        fp_pk: &XOnlyPublicKey,
    ) -> Result<u64> {
        if self.finality_providers.get(fp_pk)?.is_slashed() {
            return Ok(0);
        }

        let mut power = 0u64;
        for del in self.delegations.by_finality_provider(fp_pk) {
            let params = self.delegation_params(del)?;
            power = power.saturating_add(del.voting_power(
                snapshot.tip_height,
                snapshot.w,
                params.covenant_quorum,
            ));
        }
        Ok(power)
    }

    pub fn events_at(&self, btc_height: u64) -> &[PowerDistUpdateEvent] {
        self.events.at(btc_height)
    }

    pub fn events_in<R: RangeBounds<u64>>(
        &self,
        heights: R,
    ) -> impl Iterator<Item = (u64, &PowerDistUpdateEvent)> {
        self.events.range(heights)
    }

    pub fn staking_info(&self, staking_tx_hash: &Txid) -> Result<StakingInfo> {
        let del = self.delegations.get(staking_tx_hash)?;
        del.staking_info(self.delegation_params(del)?)
    }

    pub fn unbonding_info(&self, staking_tx_hash: &Txid) -> Result<UnbondingInfo> {
        let del = self.delegations.get(staking_tx_hash)?;
        del.unbonding_info(self.delegation_params(del)?)
    }
}

/// Main entrypoint of the staking state machine. Applies `action` to `state`
/// in full or, on error, not at all.
pub fn run(ctx: &mut Ctx, state: &mut State, action: Action) -> Result<()> {
    let State {
        params,
        finality_providers,
        delegations,
        events,
    } = state;

    match action {
        Action::CreateFinalityProvider(msg) => {
            handlers::create_finality_provider(ctx, params, finality_providers, events, msg)
        }
        Action::EditFinalityProvider(msg) => {
            handlers::edit_finality_provider(params, finality_providers, msg)
        }
        Action::CreateBtcDelegation(msg) => handlers::create_btc_delegation(
            ctx,
            params,
            finality_providers,
            delegations,
            events,
            msg,
        ),
        Action::AddBtcDelegationInclusionProof(msg) => {
            handlers::add_btc_delegation_inclusion_proof(ctx, params, delegations, events, msg)
        }
        Action::AddCovenantSigs(msg) => {
            handlers::add_covenant_sigs(ctx, params, delegations, events, msg)
        }
        Action::BtcUndelegate(msg) => {
            handlers::btc_undelegate(ctx, params, delegations, events, msg)
        }
        Action::SelectiveSlashingEvidence(msg) => handlers::selective_slashing_evidence(
            ctx,
            params,
            finality_providers,
            delegations,
            events,
            msg,
        ),
    }
}
