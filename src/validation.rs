use bitcoin::OutPoint;

use crate::crypto::verify_transaction_sig_with_output;
use crate::error::{Error, Result};
use crate::msg::ParsedCreateDelegation;
use crate::params::Params;
use crate::scripts::{StakingInfo, UnbondingInfo};
use crate::staking_tx::{check_slashing_tx, check_unbonding_tx, find_output};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamsValidationResult {
    pub staking_output_idx: u32,
    pub unbonding_value: u64,
}

/// Checks a parsed creation request against `params` and the finalization
/// timeout `w`: value and time bounds, the staking output, both slashing
/// transactions, the unbonding transaction, and the staker's signatures on
/// both slashing paths.
pub fn validate_parsed_message_against_params(
    parsed: &ParsedCreateDelegation,
    params: &Params,
    w: u64,
) -> Result<ParamsValidationResult> {
    if parsed.staking_value < params.min_staking_value_sat
        || parsed.staking_value > params.max_staking_value_sat
    {
        return Err(Error::InvalidStakingTx(format!(
            "staking value {} is out of bounds [{}, {}]",
            parsed.staking_value, params.min_staking_value_sat, params.max_staking_value_sat
        )));
    }

    if parsed.staking_time < params.min_staking_time_blocks
        || parsed.staking_time > params.max_staking_time_blocks
    {
        return Err(Error::InvalidStakingTx(format!(
            "staking time {} is out of bounds [{}, {}]",
            parsed.staking_time, params.min_staking_time_blocks, params.max_staking_time_blocks
        )));
    }

    let min_unbonding_time = (params.min_unbonding_time_blocks as u64).max(w + 1);
    if (parsed.unbonding_time as u64) < min_unbonding_time {
        return Err(Error::InvalidStakingTx(format!(
            "unbonding time {} must be at least {}",
            parsed.unbonding_time, min_unbonding_time
        )));
    }

    let staking_info = StakingInfo::new(
        parsed.btc_pk,
        &parsed.fp_btc_pk_list,
        params,
        parsed.staking_time,
        parsed.staking_value,
    )?;
    let staking_output_idx = find_output(&parsed.staking_tx, &staking_info.staking_output)?;
    let staking_outpoint = OutPoint {
        txid: parsed.staking_tx.txid(),
        vout: staking_output_idx,
    };

    check_slashing_tx(
        &parsed.slashing_tx,
        staking_outpoint,
        parsed.staking_value,
        parsed.btc_pk,
        parsed.unbonding_time,
        params,
    )?;
    verify_transaction_sig_with_output(
        &parsed.slashing_tx,
        &staking_info.staking_output,
        &staking_info.slashing_path,
        &parsed.btc_pk,
        &parsed.delegator_slashing_sig,
    )?;

    let unbonding_value = parsed
        .staking_value
        .checked_sub(params.unbonding_fee_sat)
        .filter(|v| *v > 0)
        .ok_or_else(|| {
            Error::InvalidStakingTx("staking value does not cover the unbonding fee".to_string())
        })?;
    let unbonding_info = UnbondingInfo::new(
        parsed.btc_pk,
        &parsed.fp_btc_pk_list,
        params,
        parsed.unbonding_time,
        unbonding_value,
    )?;
    check_unbonding_tx(
        &parsed.unbonding_tx,
        staking_outpoint,
        &unbonding_info.unbonding_output,
    )?;

    let unbonding_outpoint = OutPoint {
        txid: parsed.unbonding_tx.txid(),
        vout: 0,
    };
    check_slashing_tx(
        &parsed.unbonding_slashing_tx,
        unbonding_outpoint,
        unbonding_value,
        parsed.btc_pk,
        parsed.unbonding_time,
        params,
    )?;
    verify_transaction_sig_with_output(
        &parsed.unbonding_slashing_tx,
        &unbonding_info.unbonding_output,
        &unbonding_info.slashing_path,
        &parsed.btc_pk,
        &parsed.delegator_unbonding_slashing_sig,
    )?;

    Ok(ParamsValidationResult {
        staking_output_idx,
        unbonding_value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_utils::DelegationFixture;

    const W: u64 = 10;

    fn parsed(fixture: &DelegationFixture) -> ParsedCreateDelegation {
        fixture.create_msg(None).parse().unwrap()
    }

    #[test]
    fn valid_request() {
        let fixture = DelegationFixture::new(1_000);
        let result =
            validate_parsed_message_against_params(&parsed(&fixture), &fixture.params, W)
                .unwrap();
        assert_eq!(result.staking_output_idx, fixture.staking_output_idx());
        assert_eq!(
            result.unbonding_value,
            fixture.staking_value - fixture.params.unbonding_fee_sat
        );
    }

    #[test]
    fn bounds() {
        let fixture = DelegationFixture::new(1_000);

        let mut params = fixture.params.clone();
        params.max_staking_value_sat = fixture.staking_value - 1;
        let err = validate_parsed_message_against_params(&parsed(&fixture), &params, W)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut params = fixture.params.clone();
        params.min_staking_time_blocks = 1_001;
        params.max_staking_time_blocks = 2_000;
        assert!(validate_parsed_message_against_params(&parsed(&fixture), &params, W).is_err());

        // unbonding time must exceed the finalization timeout
        let w = fixture.unbonding_time as u64;
        let err = validate_parsed_message_against_params(&parsed(&fixture), &fixture.params, w)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStakingTx(_)));
    }

    #[test]
    fn covenant_set_is_part_of_the_staking_output() {
        let fixture = DelegationFixture::new(1_000);
        let mut params = fixture.params.clone();
        params.covenant_quorum = 1;
        let err = validate_parsed_message_against_params(&parsed(&fixture), &params, W)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStakingTx(_)));
    }

    #[test]
    fn staker_signatures_checked() {
        let fixture = DelegationFixture::new(1_000);

        let mut bad = parsed(&fixture);
        bad.delegator_slashing_sig = bad.delegator_unbonding_slashing_sig;
        let err = validate_parsed_message_against_params(&bad, &fixture.params, W).unwrap_err();
        assert!(matches!(err, Error::SignatureInvalid(_)));

        let mut bad = parsed(&fixture);
        bad.delegator_unbonding_slashing_sig = bad.delegator_slashing_sig;
        let err = validate_parsed_message_against_params(&bad, &fixture.params, W).unwrap_err();
        assert!(matches!(err, Error::SignatureInvalid(_)));
    }

    #[test]
    fn unbonding_tx_must_pay_unbonding_output() {
        let fixture = DelegationFixture::new(1_000);
        let mut bad = parsed(&fixture);
        bad.unbonding_tx.output[0].value += 1;
        let err = validate_parsed_message_against_params(&bad, &fixture.params, W).unwrap_err();
        assert!(matches!(err, Error::InvalidStakingTx(_)));
    }
}
