use bitcoin::util::schnorr::TweakedPublicKey;
use bitcoin::util::taproot::{TaprootBuilder, TaprootSpendInfo};
use bitcoin::{Address, Network, Script, TxOut, XOnlyPublicKey};
use bitcoin_script::bitcoin_script as script;

use crate::crypto::SECP;
use crate::error::{Error, Result};
use crate::params::Params;

/// NUMS point used as the taproot internal key, disabling the key path.
pub const UNSPENDABLE_KEY: &str =
    "50929b74c1a04954b78b4b6035e97a5e078a5a0f28ec96d547bfee9ace803ac0";

pub fn unspendable_key() -> Result<XOnlyPublicKey> {
    Ok(UNSPENDABLE_KEY.parse()?)
}

pub fn multisig_script(pks: &[XOnlyPublicKey], threshold: u32, verify: bool) -> Result<Script> {
    if pks.is_empty() {
        return Err(Error::InvalidMessage("No keys provided".to_string()));
    }

    if threshold > pks.len() as u32 {
        return Err(Error::InvalidMessage(
            "Required number of valid signers is greater than number of provided keys".to_string(),
        ));
    }

    if pks.len() == 1 {
        return Ok(single_key_script(pks[0], verify));
    }

    let pks = sort_keys(pks)?;

    let mut bytes = vec![];
    for (i, pk) in pks.iter().enumerate() {
        let pk = pk.serialize().to_vec();
        bytes.extend(
            if i == 0 {
                script! { <pk> OP_CHECKSIG }
            } else {
                script! { <pk> OP_CHECKSIGADD }
            }
            .into_bytes(),
        );
    }
    bytes.extend(script! { <threshold as i64> OP_GREATERTHANOREQUAL }.into_bytes());
    if verify {
        bytes.extend(script! { OP_VERIFY }.into_bytes());
    }

    Ok(bytes.into())
}

/// Sorts keys by their serialization, rejecting duplicates.
pub fn sort_keys(pks: &[XOnlyPublicKey]) -> Result<Vec<XOnlyPublicKey>> {
    if pks.len() < 2 {
        return Err(Error::InvalidMessage(
            "Cannot sort less than two keys".to_string(),
        ));
    }

    let mut pks = pks.to_vec();
    pks.sort_by(|a, b| a.serialize().cmp(&b.serialize()));

    if pks.windows(2).any(|w| w[0] == w[1]) {
        return Err(Error::InvalidMessage(
            "Duplicate key in list of keys".to_string(),
        ));
    }

    Ok(pks)
}

pub fn single_key_script(pk: XOnlyPublicKey, verify: bool) -> Script {
    let pk = pk.serialize().to_vec();
    if verify {
        script! { <pk> OP_CHECKSIGVERIFY }
    } else {
        script! { <pk> OP_CHECKSIG }
    }
}

pub fn timelock_script(pk: XOnlyPublicKey, timelock: u64) -> Script {
    let mut bytes = single_key_script(pk, true).into_bytes();
    bytes.extend(script! { <timelock as i64> OP_CSV }.into_bytes());
    bytes.into()
}

pub fn aggregate_scripts(scripts: &[Script]) -> Script {
    let mut bytes = vec![];
    for script in scripts.iter() {
        bytes.extend(script.clone().into_bytes());
    }
    bytes.into()
}

/// Staker and covenant committee together.
pub fn unbonding_script(staker_key: XOnlyPublicKey, params: &Params) -> Result<Script> {
    Ok(aggregate_scripts(&[
        single_key_script(staker_key, true),
        multisig_script(&params.covenant_pks, params.covenant_quorum, false)?,
    ]))
}

/// Staker, any one of the finality providers, and the covenant committee.
pub fn slashing_script(
    staker_key: XOnlyPublicKey,
    fp_keys: &[XOnlyPublicKey],
    params: &Params,
) -> Result<Script> {
    Ok(aggregate_scripts(&[
        single_key_script(staker_key, true),
        multisig_script(fp_keys, 1, true)?,
        multisig_script(&params.covenant_pks, params.covenant_quorum, false)?,
    ]))
}

fn finalize(builder: TaprootBuilder) -> Result<TaprootSpendInfo> {
    builder
        .finalize(&*SECP, unspendable_key()?)
        .map_err(|_| Error::Fault("Failed to finalize taproot".to_string()))
}

fn taproot_output(spend_info: &TaprootSpendInfo, value: u64) -> TxOut {
    TxOut {
        value,
        script_pubkey: Script::new_v1_p2tr_tweaked(spend_info.output_key()),
    }
}

/// Address of a taproot output built by this module.
pub fn taproot_address(output: &TxOut, network: Network) -> Result<Address> {
    if !output.script_pubkey.is_v1_p2tr() {
        return Err(Error::InvalidMessage("Output is not a taproot output".to_string()));
    }
    let output_key = XOnlyPublicKey::from_slice(&output.script_pubkey.as_bytes()[2..])?;
    Ok(Address::p2tr_tweaked(
        TweakedPublicKey::dangerous_assume_tweaked(output_key),
        network,
    ))
}

/// Output paying to `staker_key` after a relative timelock, used as the
/// change output of slashing transactions.
pub fn relative_timelock_output(
    staker_key: XOnlyPublicKey,
    lock_time: u16,
    value: u64,
) -> Result<TxOut> {
    let spend_info = finalize(
        TaprootBuilder::new().add_leaf(0, timelock_script(staker_key, lock_time as u64))?,
    )?;
    Ok(taproot_output(&spend_info, value))
}

/// The staking output and the leaf scripts of its three spend paths.
#[derive(Clone, Debug)]
pub struct StakingInfo {
    pub staking_output: TxOut,
    pub timelock_path: Script,
    pub unbonding_path: Script,
    pub slashing_path: Script,
}

impl StakingInfo {
    pub fn new(
        staker_key: XOnlyPublicKey,
        fp_keys: &[XOnlyPublicKey],
        params: &Params,
        staking_time: u16,
        staking_value: u64,
    ) -> Result<Self> {
        let timelock_path = timelock_script(staker_key, staking_time as u64);
        let unbonding_path = unbonding_script(staker_key, params)?;
        let slashing_path = slashing_script(staker_key, fp_keys, params)?;

        let spend_info = finalize(
            TaprootBuilder::new()
                .add_leaf(2, timelock_path.clone())?
                .add_leaf(2, unbonding_path.clone())?
                .add_leaf(1, slashing_path.clone())?,
        )?;

        Ok(Self {
            staking_output: taproot_output(&spend_info, staking_value),
            timelock_path,
            unbonding_path,
            slashing_path,
        })
    }
}

/// The unbonding output and the leaf scripts of its two spend paths.
#[derive(Clone, Debug)]
pub struct UnbondingInfo {
    pub unbonding_output: TxOut,
    pub timelock_path: Script,
    pub slashing_path: Script,
}

impl UnbondingInfo {
    pub fn new(
        staker_key: XOnlyPublicKey,
        fp_keys: &[XOnlyPublicKey],
        params: &Params,
        unbonding_time: u16,
        unbonding_value: u64,
    ) -> Result<Self> {
        let timelock_path = timelock_script(staker_key, unbonding_time as u64);
        let slashing_path = slashing_script(staker_key, fp_keys, params)?;

        let spend_info = finalize(
            TaprootBuilder::new()
                .add_leaf(1, timelock_path.clone())?
                .add_leaf(1, slashing_path.clone())?,
        )?;

        Ok(Self {
            unbonding_output: taproot_output(&spend_info, unbonding_value),
            timelock_path,
            slashing_path,
        })
    }
}
