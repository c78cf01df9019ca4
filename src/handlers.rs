//! State transitions. Each handler reads the chain snapshot once, performs
//! every check, and only then writes to the stores it was handed, so a
//! failed request leaves no trace.

use bitcoin::Txid;
use log::{debug, info};

use crate::context::{Ctx, RefundableMsg};
use crate::crypto::adaptor::enc_verify_slashing_sigs;
use crate::crypto::{parse_secret_key, verify_pop, verify_transaction_sig_with_output, x_only_public_key};
use crate::delegation::{BtcDelegation, BtcDelegationStatus, BtcUndelegation};
use crate::error::{Error, Result};
use crate::events::{EventLog, PowerDistUpdateEvent};
use crate::finality_provider::{FinalityProvider, FinalityProviderRegistry};
use crate::msg::{
    MsgAddBtcDelegationInclusionProof, MsgAddCovenantSigs, MsgBtcUndelegate,
    MsgCreateBtcDelegation, MsgCreateFinalityProvider, MsgEditFinalityProvider,
    MsgSelectiveSlashingEvidence,
};
use crate::params::{Params, ParamsStore, Rate};
use crate::proof::verify_inclusion_proof_and_get_height;
use crate::store::DelegationStore;
use crate::validation::validate_parsed_message_against_params;

fn latest_params(params: &dyn ParamsStore) -> Result<(u32, &Params)> {
    params
        .latest()
        .ok_or_else(|| Error::Fault("no staking parameters".to_string()))
}

/// Loads a delegation with the parameter version it was created under.
fn get_delegation_with_params<'a>(
    delegations: &DelegationStore,
    params: &'a dyn ParamsStore,
    staking_tx_hash: &Txid,
) -> Result<(BtcDelegation, &'a Params)> {
    let del = delegations.get(staking_tx_hash)?.clone();
    let del_params = params.params(del.params_version).ok_or_else(|| {
        Error::Fault(format!(
            "params version {} of delegation {} not found",
            del.params_version, staking_tx_hash
        ))
    })?;
    Ok((del, del_params))
}

fn check_commission(commission: Rate, params: &Params) -> Result<()> {
    if commission < params.min_commission_rate || commission > Rate::ONE {
        return Err(Error::CommissionOutOfRange(format!(
            "{} not in [{}, {}]",
            commission,
            params.min_commission_rate,
            Rate::ONE
        )));
    }
    Ok(())
}

pub fn create_finality_provider(
    ctx: &mut Ctx,
    params: &dyn ParamsStore,
    fps: &mut FinalityProviderRegistry,
    events: &mut EventLog,
    msg: MsgCreateFinalityProvider,
) -> Result<()> {
    let snapshot = ctx.snapshot();

    msg.validate_basic()?;
    let (_, params) = latest_params(params)?;
    check_commission(msg.commission, params)?;

    if fps.contains(&msg.btc_pk) {
        return Err(Error::DuplicateFinalityProvider(msg.btc_pk.to_string()));
    }
    verify_pop(&msg.addr, &msg.btc_pk, &msg.pop)?;

    let btc_pk = msg.btc_pk;
    fps.register(FinalityProvider {
        description: msg.description,
        commission: msg.commission,
        addr: msg.addr,
        btc_pk,
        pop: msg.pop,
        slashed_btc_height: None,
    })?;
    events.add(
        snapshot.tip_height,
        PowerDistUpdateEvent::NewFinalityProvider { btc_pk },
    );

    info!("Registered finality provider {}", btc_pk);
    Ok(())
}

pub fn edit_finality_provider(
    params: &dyn ParamsStore,
    fps: &mut FinalityProviderRegistry,
    msg: MsgEditFinalityProvider,
) -> Result<()> {
    msg.validate_basic()?;
    let (_, params) = latest_params(params)?;
    check_commission(msg.commission, params)?;

    fps.edit(&msg.btc_pk, &msg.addr, msg.description, msg.commission)?;

    info!("Edited finality provider {}", msg.btc_pk);
    Ok(())
}

pub fn create_btc_delegation(
    ctx: &mut Ctx,
    params: &dyn ParamsStore,
    fps: &FinalityProviderRegistry,
    delegations: &mut DelegationStore,
    events: &mut EventLog,
    msg: MsgCreateBtcDelegation,
) -> Result<()> {
    let snapshot = ctx.snapshot();

    let parsed = msg.parse()?;
    verify_pop(&parsed.staker_addr, &parsed.btc_pk, &parsed.pop)?;

    let staking_tx_hash = parsed.staking_tx.txid();
    if delegations.contains(&staking_tx_hash) {
        return Err(Error::DuplicateStakingTx(staking_tx_hash.to_string()));
    }

    for fp_pk in parsed.fp_btc_pk_list.iter() {
        if fps.get(fp_pk)?.is_slashed() {
            return Err(Error::FinalityProviderSlashed(fp_pk.to_string()));
        }
    }

    let (params_version, params) = latest_params(params)?;
    let validation = validate_parsed_message_against_params(&parsed, params, snapshot.w)?;

    let inclusion_height = match &parsed.staking_tx_inclusion_proof {
        Some(proof) => Some(verify_inclusion_proof_and_get_height(
            &snapshot,
            ctx.light_client,
            &parsed.staking_tx,
            parsed.staking_time as u64,
            proof,
        )?),
        None => {
            // charged only for delegations created without a proof
            ctx.gas.consume_gas(
                params.delegation_creation_base_gas_fee,
                "delegation creation fee",
            )?;
            None
        }
    };

    let mut del = BtcDelegation {
        staker_addr: parsed.staker_addr,
        btc_pk: parsed.btc_pk,
        pop: parsed.pop,
        fp_btc_pk_list: parsed.fp_btc_pk_list,
        staking_time: parsed.staking_time,
        start_height: 0,
        end_height: 0,
        total_sat: parsed.staking_value,
        staking_tx: parsed.staking_tx,
        staking_output_idx: validation.staking_output_idx,
        slashing_tx: parsed.slashing_tx,
        delegator_sig: parsed.delegator_slashing_sig,
        covenant_sigs: vec![],
        unbonding_time: parsed.unbonding_time,
        btc_undelegation: BtcUndelegation {
            unbonding_tx: parsed.unbonding_tx,
            slashing_tx: parsed.unbonding_slashing_tx,
            delegator_slashing_sig: parsed.delegator_unbonding_slashing_sig,
            delegator_unbonding_sig: None,
            covenant_slashing_sigs: vec![],
            covenant_unbonding_sig_list: vec![],
        },
        params_version,
    };
    if let Some(height) = inclusion_height {
        del.set_inclusion_height(height);
    }

    let end_height = del.end_height;
    delegations.insert(del)?;

    if inclusion_height.is_some() {
        events.add(
            end_height.saturating_sub(snapshot.w),
            PowerDistUpdateEvent::state_update(staking_tx_hash, BtcDelegationStatus::Unbonded),
        );
    }

    info!(
        "Created BTC delegation {} (inclusion height {:?})",
        staking_tx_hash, inclusion_height
    );
    Ok(())
}

pub fn add_btc_delegation_inclusion_proof(
    ctx: &mut Ctx,
    params: &dyn ParamsStore,
    delegations: &mut DelegationStore,
    events: &mut EventLog,
    msg: MsgAddBtcDelegationInclusionProof,
) -> Result<()> {
    let snapshot = ctx.snapshot();
    let (mut del, params) = get_delegation_with_params(delegations, params, &msg.staking_tx_hash)?;

    if del.has_inclusion_proof() {
        return Err(Error::InclusionProofExists(msg.staking_tx_hash.to_string()));
    }
    if !del.has_covenant_quorums(params.covenant_quorum) {
        return Err(Error::StatusConflict(format!(
            "the delegation {} has not received a quorum of covenant signatures",
            msg.staking_tx_hash
        )));
    }
    if del.is_unbonded_early() {
        return Err(Error::StatusConflict(format!(
            "the delegation {} is already unbonded",
            msg.staking_tx_hash
        )));
    }

    let height = verify_inclusion_proof_and_get_height(
        &snapshot,
        ctx.light_client,
        &del.staking_tx,
        del.staking_time as u64,
        &msg.staking_tx_inclusion_proof,
    )?;
    del.set_inclusion_height(height);
    let end_height = del.end_height;
    delegations.update(del)?;

    events.add(
        snapshot.tip_height,
        PowerDistUpdateEvent::state_update(msg.staking_tx_hash, BtcDelegationStatus::Active),
    );
    events.add(
        end_height.saturating_sub(snapshot.w),
        PowerDistUpdateEvent::state_update(msg.staking_tx_hash, BtcDelegationStatus::Unbonded),
    );
    ctx.refunds
        .index_refundable_msg(RefundableMsg::AddInclusionProof {
            staking_tx_hash: msg.staking_tx_hash,
        });

    info!(
        "Added inclusion proof for BTC delegation {} at height {}",
        msg.staking_tx_hash, height
    );
    Ok(())
}

pub fn add_covenant_sigs(
    ctx: &mut Ctx,
    params: &dyn ParamsStore,
    delegations: &mut DelegationStore,
    events: &mut EventLog,
    msg: MsgAddCovenantSigs,
) -> Result<()> {
    let snapshot = ctx.snapshot();

    msg.validate_basic()?;
    let (mut del, params) = get_delegation_with_params(delegations, params, &msg.staking_tx_hash)?;

    if !params.has_covenant_pk(&msg.pk) {
        return Err(Error::InvalidCovenantPk(msg.pk.to_string()));
    }

    if del.is_fully_signed_by_cov_member(&msg.pk) {
        debug!(
            "Received duplicated covenant signature from {} for {}",
            msg.pk, msg.staking_tx_hash
        );
        return Err(Error::DuplicateCovenantSig(msg.pk.to_string()));
    }

    let quorum = params.covenant_quorum;
    if del.status(snapshot.tip_height, snapshot.w, quorum) == BtcDelegationStatus::Unbonded {
        debug!(
            "Received covenant signature from {} after {} was unbonded",
            msg.pk, msg.staking_tx_hash
        );
        return Err(Error::StatusConflict(format!(
            "the delegation {} is already unbonded",
            msg.staking_tx_hash
        )));
    }

    for sigs in [&msg.slashing_tx_sigs, &msg.slashing_unbonding_tx_sigs] {
        if sigs.len() != del.fp_btc_pk_list.len() {
            return Err(Error::CountMismatch {
                expected: del.fp_btc_pk_list.len(),
                actual: sigs.len(),
            });
        }
    }

    let staking_info = del.staking_info(params)?;
    enc_verify_slashing_sigs(
        &del.slashing_tx,
        &staking_info.staking_output,
        &staking_info.slashing_path,
        &msg.pk,
        &del.fp_btc_pk_list,
        &msg.slashing_tx_sigs,
    )?;

    verify_transaction_sig_with_output(
        &del.btc_undelegation.unbonding_tx,
        &staking_info.staking_output,
        &staking_info.unbonding_path,
        &msg.pk,
        &msg.unbonding_tx_sig,
    )?;

    let unbonding_info = del.unbonding_info(params)?;
    enc_verify_slashing_sigs(
        &del.btc_undelegation.slashing_tx,
        &unbonding_info.unbonding_output,
        &unbonding_info.slashing_path,
        &msg.pk,
        &del.fp_btc_pk_list,
        &msg.slashing_unbonding_tx_sigs,
    )?;

    let had_quorum = del.has_covenant_quorums(quorum);
    del.add_covenant_sigs(
        msg.pk,
        msg.slashing_tx_sigs,
        msg.unbonding_tx_sig,
        msg.slashing_unbonding_tx_sigs,
    );
    let activated = !had_quorum && del.has_covenant_quorums(quorum) && del.has_inclusion_proof();
    delegations.update(del)?;

    if activated {
        events.add(
            snapshot.tip_height,
            PowerDistUpdateEvent::state_update(msg.staking_tx_hash, BtcDelegationStatus::Active),
        );
    }
    // refunded even when the quorum was already reached
    ctx.refunds
        .index_refundable_msg(RefundableMsg::AddCovenantSigs {
            staking_tx_hash: msg.staking_tx_hash,
            covenant_pk: msg.pk,
        });

    info!(
        "Added covenant signatures from {} to BTC delegation {}",
        msg.pk, msg.staking_tx_hash
    );
    Ok(())
}

pub fn btc_undelegate(
    ctx: &mut Ctx,
    params: &dyn ParamsStore,
    delegations: &mut DelegationStore,
    events: &mut EventLog,
    msg: MsgBtcUndelegate,
) -> Result<()> {
    let snapshot = ctx.snapshot();
    let (mut del, params) = get_delegation_with_params(delegations, params, &msg.staking_tx_hash)?;

    match del.status(snapshot.tip_height, snapshot.w, params.covenant_quorum) {
        BtcDelegationStatus::Pending => {
            return Err(Error::StatusConflict(
                "cannot unbond a pending BTC delegation".to_string(),
            ))
        }
        BtcDelegationStatus::Unbonded => {
            return Err(Error::StatusConflict(
                "cannot unbond an unbonded BTC delegation".to_string(),
            ))
        }
        BtcDelegationStatus::Active => {}
    }

    let staking_info = del.staking_info(params)?;
    verify_transaction_sig_with_output(
        &del.btc_undelegation.unbonding_tx,
        &staking_info.staking_output,
        &staking_info.unbonding_path,
        &del.btc_pk,
        &msg.unbonding_tx_sig,
    )?;

    del.btc_undelegation.delegator_unbonding_sig = Some(msg.unbonding_tx_sig);
    delegations.update(del)?;

    events.add(
        snapshot.tip_height,
        PowerDistUpdateEvent::state_update(msg.staking_tx_hash, BtcDelegationStatus::Unbonded),
    );
    ctx.refunds.index_refundable_msg(RefundableMsg::Undelegate {
        staking_tx_hash: msg.staking_tx_hash,
    });

    info!("BTC delegation {} unbonded early", msg.staking_tx_hash);
    Ok(())
}

pub fn selective_slashing_evidence(
    ctx: &mut Ctx,
    params: &dyn ParamsStore,
    fps: &mut FinalityProviderRegistry,
    delegations: &DelegationStore,
    events: &mut EventLog,
    msg: MsgSelectiveSlashingEvidence,
) -> Result<()> {
    let snapshot = ctx.snapshot();
    let (del, params) = get_delegation_with_params(delegations, params, &msg.staking_tx_hash)?;

    let status = del.status(snapshot.tip_height, snapshot.w, params.covenant_quorum);
    if status != BtcDelegationStatus::Active && !del.is_unbonded_early() {
        return Err(Error::StatusConflict(format!(
            "a {} BTC delegation that did not unbond early cannot be slashed",
            status
        )));
    }

    let fp_sk = parse_secret_key(&msg.recovered_fp_btc_sk)?;
    let fp_pk = x_only_public_key(&fp_sk);

    if del.fp_index(&fp_pk).is_none() {
        return Err(Error::FinalityProviderNotFound(format!(
            "{} is not staked to by delegation {}",
            fp_pk, msg.staking_tx_hash
        )));
    }

    let fp = fps.get(&fp_pk).map_err(|_| {
        Error::Fault(format!(
            "finality provider {} of delegation {} is not registered",
            fp_pk, msg.staking_tx_hash
        ))
    })?;
    if fp.is_slashed() {
        return Err(Error::FinalityProviderSlashed(fp_pk.to_string()));
    }

    fps.slash(&fp_pk, snapshot.tip_height)?;

    events.add(
        snapshot.tip_height,
        PowerDistUpdateEvent::SlashedFinalityProvider { btc_pk: fp_pk },
    );
    ctx.refunds
        .index_refundable_msg(RefundableMsg::SelectiveSlashingEvidence {
            staking_tx_hash: msg.staking_tx_hash,
            fp_btc_pk: fp_pk,
        });

    info!(
        "Slashed finality provider {} with evidence from BTC delegation {}",
        fp_pk, msg.staking_tx_hash
    );
    Ok(())
}
