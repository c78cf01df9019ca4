//! Pre-signed transactions spending a staking or unbonding output, and the
//! structural checks applied to the versions submitted by stakers.

use bitcoin::{
    OutPoint, PackedLockTime, Script, Sequence, Transaction, TxIn, TxOut, Witness, XOnlyPublicKey,
};

use crate::error::{Error, Result};
use crate::params::Params;
use crate::scripts::relative_timelock_output;

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidStakingTx(msg.into())
}

fn spend_input(previous_output: OutPoint) -> TxIn {
    TxIn {
        previous_output,
        script_sig: Script::new(),
        sequence: Sequence(u32::MAX),
        witness: Witness::default(),
    }
}

/// Builds the transaction that burns `slashing_rate` of the funds locked at
/// `stake_out` to the slashing address, returning the rest (minus the minimum
/// fee) to the staker after `unbonding_time` blocks.
pub fn slashing_tx(
    staker_key: XOnlyPublicKey,
    stake_out: OutPoint,
    stake_value: u64,
    unbonding_time: u16,
    params: &Params,
) -> Result<Transaction> {
    let slashing_value = params.slashing_rate.mul_floor(stake_value);
    let slashing_out = TxOut {
        value: slashing_value,
        script_pubkey: params.slashing_address.script_pubkey(),
    };

    let change_value = stake_value
        .checked_sub(slashing_value)
        .and_then(|v| v.checked_sub(params.min_slashing_tx_fee_sat))
        .ok_or_else(|| invalid("Stake value does not cover slashing and fee"))?;
    let change_out = relative_timelock_output(staker_key, unbonding_time, change_value)?;

    Ok(Transaction {
        version: 2,
        lock_time: PackedLockTime(0),
        input: vec![spend_input(stake_out)],
        output: vec![slashing_out, change_out],
    })
}

pub fn unbonding_tx(staking_outpoint: OutPoint, unbonding_output: TxOut) -> Transaction {
    Transaction {
        version: 2,
        lock_time: PackedLockTime(0),
        input: vec![spend_input(staking_outpoint)],
        output: vec![unbonding_output],
    }
}

/// Finds the index of the single output of `tx` matching `expected` in both
/// script and value.
pub fn find_output(tx: &Transaction, expected: &TxOut) -> Result<u32> {
    let mut matches = tx
        .output
        .iter()
        .enumerate()
        .filter(|(_, out)| out.script_pubkey == expected.script_pubkey);

    let (index, out) = matches
        .next()
        .ok_or_else(|| invalid("Transaction does not contain the expected output"))?;
    if matches.next().is_some() {
        return Err(invalid("Transaction has multiple outputs with the same script"));
    }
    if out.value != expected.value {
        return Err(invalid(format!(
            "Output value {} does not match expected value {}",
            out.value, expected.value
        )));
    }

    Ok(index as u32)
}

/// Checks that `slashing_tx` spends exactly `funding_outpoint`, pays at least
/// the slashing rate of `funding_value` to the slashing address, returns the
/// remainder to the staker behind a relative timelock of `unbonding_time`
/// blocks, and leaves at least the minimum fee.
pub fn check_slashing_tx(
    slashing_tx: &Transaction,
    funding_outpoint: OutPoint,
    funding_value: u64,
    staker_key: XOnlyPublicKey,
    unbonding_time: u16,
    params: &Params,
) -> Result<()> {
    if slashing_tx.lock_time != PackedLockTime(0) {
        return Err(invalid("Slashing transaction must not have a lock time"));
    }
    if slashing_tx.input.len() != 1 {
        return Err(invalid("Slashing transaction must have exactly one input"));
    }
    if slashing_tx.input[0].previous_output != funding_outpoint {
        return Err(invalid("Slashing transaction must spend the funding output"));
    }
    if slashing_tx.output.len() != 2 {
        return Err(invalid("Slashing transaction must have exactly two outputs"));
    }

    let slashing_out = &slashing_tx.output[0];
    if slashing_out.script_pubkey != params.slashing_address.script_pubkey() {
        return Err(invalid("Slashing output must pay the slashing address"));
    }
    let min_slashing_value = params.slashing_rate.mul_floor(funding_value);
    if slashing_out.value < min_slashing_value {
        return Err(invalid(format!(
            "Slashing output value {} is below {}",
            slashing_out.value, min_slashing_value
        )));
    }

    let change_out = &slashing_tx.output[1];
    let expected_change = relative_timelock_output(staker_key, unbonding_time, change_out.value)?;
    if change_out.script_pubkey != expected_change.script_pubkey {
        return Err(invalid(
            "Change output must pay the staker after the unbonding time",
        ));
    }

    let total_out = slashing_out
        .value
        .checked_add(change_out.value)
        .ok_or_else(|| invalid("Output value overflow"))?;
    let fee = funding_value
        .checked_sub(total_out)
        .ok_or_else(|| invalid("Slashing transaction spends more than its input"))?;
    if fee < params.min_slashing_tx_fee_sat {
        return Err(invalid(format!(
            "Slashing transaction fee {} is below the minimum {}",
            fee, params.min_slashing_tx_fee_sat
        )));
    }

    Ok(())
}

/// Checks that `unbonding_tx` spends exactly `staking_outpoint` into the single
/// `expected` output.
pub fn check_unbonding_tx(
    unbonding_tx: &Transaction,
    staking_outpoint: OutPoint,
    expected: &TxOut,
) -> Result<()> {
    if unbonding_tx.lock_time != PackedLockTime(0) {
        return Err(invalid("Unbonding transaction must not have a lock time"));
    }
    if unbonding_tx.input.len() != 1 {
        return Err(invalid("Unbonding transaction must have exactly one input"));
    }
    if unbonding_tx.input[0].previous_output != staking_outpoint {
        return Err(invalid("Unbonding transaction must spend the staking output"));
    }
    if unbonding_tx.output.len() != 1 {
        return Err(invalid("Unbonding transaction must have exactly one output"));
    }
    if unbonding_tx.output[0] != *expected {
        return Err(invalid(
            "Unbonding output does not match the expected script and value",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use bitcoin::consensus::deserialize;

    use super::*;
    use crate::crypto::x_only_public_key;
    use crate::params::Rate;
    use crate::test_utils::{secret_key, test_params};

    const STAKER_PK: &str = "b3193611fc3fad7c35847dc98fb3bbc22f7c86fa87a5b5d3c64e06bf4e2ff54b";

    fn fixture_params() -> Params {
        let mut params = test_params();
        params.slashing_address = "tb1qv03wm7hxhag6awldvwacy0z42edtt6kwljrhd9".parse().unwrap();
        params.slashing_rate = Rate::from_bps(1_000);
        params.min_slashing_tx_fee_sat = 1_000;
        params
    }

    fn staking_outpoint() -> OutPoint {
        OutPoint {
            txid: "56f6d24069d3d8ef40f6dc7363d4acc1fde502610ad80ee3476aa5b8e8ad7a23"
                .parse()
                .unwrap(),
            vout: 0,
        }
    }

    #[test]
    fn slashing_tx_fixture() {
        let expected_slashing_tx: Transaction = deserialize(&hex::decode("0200000001237aade8b8a56a47e30ed80a6102e5fdc1acd46373dcf640efd8d36940d2f6560000000000ffffffff02d00700000000000016001463e2edfae6bf51aebbed63bb823c55565ab5eace6842000000000000225120e9f60075bdb745bb352fee26ee981fd55573652a928c8e6b19db29e00f32646000000000").unwrap()).unwrap();

        let slashing_tx = slashing_tx(
            STAKER_PK.parse().unwrap(),
            staking_outpoint(),
            20_000,
            101,
            &fixture_params(),
        )
        .unwrap();
        assert_eq!(slashing_tx, expected_slashing_tx);
    }

    #[test]
    fn unbonding_slashing_tx_fixture() {
        let expected: Transaction = deserialize(&hex::decode("02000000017285541c7b224b952f32eb16a815db378fc338502edcd64e09cf0eb9417f5deb0000000000ffffffff026c0700000000000016001463e2edfae6bf51aebbed63bb823c55565ab5eacee43e000000000000225120e9f60075bdb745bb352fee26ee981fd55573652a928c8e6b19db29e00f32646000000000").unwrap()).unwrap();

        let unbonding_slashing_tx = slashing_tx(
            STAKER_PK.parse().unwrap(),
            expected.input[0].previous_output,
            19_000,
            101,
            &fixture_params(),
        )
        .unwrap();
        assert_eq!(unbonding_slashing_tx, expected);
    }

    #[test]
    fn check_built_slashing_tx() {
        let params = fixture_params();
        let staker = x_only_public_key(&secret_key(1));
        let tx = slashing_tx(staker, staking_outpoint(), 20_000, 101, &params).unwrap();
        check_slashing_tx(&tx, staking_outpoint(), 20_000, staker, 101, &params).unwrap();

        // wrong funding outpoint
        let other_outpoint = OutPoint {
            vout: 1,
            ..staking_outpoint()
        };
        assert!(check_slashing_tx(&tx, other_outpoint, 20_000, staker, 101, &params).is_err());

        // change locked for the wrong duration
        assert!(check_slashing_tx(&tx, staking_outpoint(), 20_000, staker, 102, &params).is_err());

        // underpaying the slashing address
        let mut cheap = tx.clone();
        cheap.output[0].value -= 1;
        cheap.output[1].value += 1;
        let err = check_slashing_tx(&cheap, staking_outpoint(), 20_000, staker, 101, &params)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStakingTx(_)));

        // fee below the minimum
        let mut greedy = tx.clone();
        greedy.output[1].value += 1;
        assert!(check_slashing_tx(&greedy, staking_outpoint(), 20_000, staker, 101, &params).is_err());

        // spending more than the input
        assert!(check_slashing_tx(&tx, staking_outpoint(), 18_000, staker, 101, &params).is_err());
    }

    #[test]
    fn slashing_tx_requires_enough_value() {
        let params = fixture_params();
        let staker = x_only_public_key(&secret_key(1));
        assert!(slashing_tx(staker, staking_outpoint(), 1_000, 101, &params).is_err());
    }

    #[test]
    fn find_and_check_outputs() {
        let expected = TxOut {
            value: 19_000,
            script_pubkey: Script::new_v1_p2tr_tweaked(
                bitcoin::util::schnorr::TweakedPublicKey::dangerous_assume_tweaked(
                    x_only_public_key(&secret_key(2)),
                ),
            ),
        };
        let tx = unbonding_tx(staking_outpoint(), expected.clone());
        assert_eq!(find_output(&tx, &expected).unwrap(), 0);
        check_unbonding_tx(&tx, staking_outpoint(), &expected).unwrap();

        let wrong_value = TxOut {
            value: 19_001,
            ..expected.clone()
        };
        assert!(find_output(&tx, &wrong_value).is_err());
        assert!(check_unbonding_tx(&tx, staking_outpoint(), &wrong_value).is_err());

        let mut doubled = tx.clone();
        doubled.output.push(expected.clone());
        assert!(find_output(&doubled, &expected).is_err());
        assert!(check_unbonding_tx(&doubled, staking_outpoint(), &expected).is_err());
    }
}
