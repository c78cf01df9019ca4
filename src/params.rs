use bitcoin::{Address, XOnlyPublicKey};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Fixed-point rate with four decimal places, e.g. `"0.1"` is 1,000 basis
/// points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rate(u32);

impl Rate {
    pub const DENOMINATOR: u32 = 10_000;
    pub const ZERO: Rate = Rate(0);
    pub const ONE: Rate = Rate(Self::DENOMINATOR);

    pub const fn from_bps(bps: u32) -> Self {
        Rate(bps)
    }

    pub fn bps(&self) -> u32 {
        self.0
    }

    /// `floor(amount * rate)`.
    pub fn mul_floor(&self, amount: u64) -> u64 {
        (amount as u128 * self.0 as u128 / Self::DENOMINATOR as u128) as u64
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:04}",
            self.0 / Self::DENOMINATOR,
            self.0 % Self::DENOMINATOR
        )
    }
}

impl FromStr for Rate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidMessage(format!("Invalid rate: {s}"));

        let (int, frac) = match s.trim().split_once('.') {
            Some((int, frac)) => (int, frac),
            None => (s.trim(), ""),
        };
        if frac.len() > 4 || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let int: u32 = int.parse().map_err(|_| invalid())?;
        let frac: u32 = if frac.is_empty() {
            0
        } else {
            format!("{frac:0<4}").parse().map_err(|_| invalid())?
        };

        int.checked_mul(Self::DENOMINATOR)
            .and_then(|v| v.checked_add(frac))
            .map(Rate)
            .ok_or_else(invalid)
    }
}

impl Serialize for Rate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Rate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

/// Protocol parameters for BTC staking. Every version ever activated stays
/// resolvable, since delegations are validated and signed against the
/// version active when they were created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Params {
    pub covenant_pks: Vec<XOnlyPublicKey>,
    pub covenant_quorum: u32,
    pub min_staking_value_sat: u64,
    pub max_staking_value_sat: u64,
    pub min_staking_time_blocks: u16,
    pub max_staking_time_blocks: u16,
    pub slashing_address: Address,
    pub min_slashing_tx_fee_sat: u64,
    pub slashing_rate: Rate,
    pub min_commission_rate: Rate,
    pub min_unbonding_time_blocks: u16,
    pub unbonding_fee_sat: u64,
    pub delegation_creation_base_gas_fee: u64,
}

impl Params {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidParams(msg.to_string()));

        if self.covenant_pks.is_empty() {
            return invalid("covenant public keys cannot be empty");
        }
        let mut sorted: Vec<_> = self.covenant_pks.iter().map(|pk| pk.serialize()).collect();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != self.covenant_pks.len() {
            return invalid("duplicate covenant public key");
        }
        if self.covenant_quorum == 0 || self.covenant_quorum as usize > self.covenant_pks.len() {
            return invalid("covenant quorum must be between 1 and the number of covenant keys");
        }
        if self.min_staking_value_sat == 0
            || self.min_staking_value_sat > self.max_staking_value_sat
        {
            return invalid("invalid staking value bounds");
        }
        if self.min_staking_time_blocks == 0
            || self.min_staking_time_blocks > self.max_staking_time_blocks
        {
            return invalid("invalid staking time bounds");
        }
        if self.slashing_rate == Rate::ZERO || self.slashing_rate >= Rate::ONE {
            return invalid("slashing rate must be in range (0, 1)");
        }
        if self.min_commission_rate > Rate::ONE {
            return invalid("minimum commission rate cannot be greater than 1");
        }
        if self.min_slashing_tx_fee_sat == 0 {
            return invalid("minimum slashing tx fee must be positive");
        }
        if self.unbonding_fee_sat == 0 {
            return invalid("unbonding fee must be positive");
        }
        if self.unbonding_fee_sat >= self.min_staking_value_sat {
            return invalid("unbonding fee must be smaller than the minimum staking value");
        }

        Ok(())
    }

    pub fn has_covenant_pk(&self, pk: &XOnlyPublicKey) -> bool {
        self.covenant_pks.iter().any(|k| k == pk)
    }
}

/// Read access to versioned staking parameters.
pub trait ParamsStore {
    /// Returns the parameters activated as `version`, if any.
    fn params(&self, version: u32) -> Option<&Params>;

    /// Returns the most recent version and its parameters.
    fn latest(&self) -> Option<(u32, &Params)>;
}

/// Append-only list of parameter versions, version `n` at index `n`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VersionedParams {
    versions: Vec<Params>,
}

impl VersionedParams {
    pub fn new(genesis: Params) -> Result<Self> {
        let mut params = Self::default();
        params.push(genesis)?;
        Ok(params)
    }

    /// Activates a new parameter version and returns its number.
    pub fn push(&mut self, params: Params) -> Result<u32> {
        params.validate()?;
        self.versions.push(params);
        Ok(self.versions.len() as u32 - 1)
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

impl ParamsStore for VersionedParams {
    fn params(&self, version: u32) -> Option<&Params> {
        self.versions.get(version as usize)
    }

    fn latest(&self) -> Option<(u32, &Params)> {
        let version = self.versions.len().checked_sub(1)?;
        Some((version as u32, &self.versions[version]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_params;

    #[test]
    fn rate_parse() {
        assert_eq!("0.1".parse::<Rate>().unwrap(), Rate::from_bps(1_000));
        assert_eq!("1".parse::<Rate>().unwrap(), Rate::ONE);
        assert_eq!("0.0325".parse::<Rate>().unwrap(), Rate::from_bps(325));
        assert!("0.00001".parse::<Rate>().is_err());
        assert!("-0.1".parse::<Rate>().is_err());
        assert!("abc".parse::<Rate>().is_err());
        assert_eq!(Rate::from_bps(325).to_string(), "0.0325");
    }

    #[test]
    fn rate_mul_floor() {
        let rate = Rate::from_bps(1_000);
        assert_eq!(rate.mul_floor(20_000), 2_000);
        assert_eq!(rate.mul_floor(19_999), 1_999);
        assert_eq!(Rate::ONE.mul_floor(u64::MAX), u64::MAX);
    }

    #[test]
    fn validate() {
        let params = test_params();
        params.validate().unwrap();

        let mut bad = params.clone();
        bad.covenant_quorum = bad.covenant_pks.len() as u32 + 1;
        assert!(bad.validate().is_err());

        let mut bad = params.clone();
        bad.covenant_pks.push(bad.covenant_pks[0]);
        assert!(bad.validate().is_err());

        let mut bad = params.clone();
        bad.min_staking_time_blocks = bad.max_staking_time_blocks + 1;
        assert!(bad.validate().is_err());

        let mut bad = params;
        bad.slashing_rate = Rate::ONE;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn versions_are_append_only() {
        let mut versions = VersionedParams::new(test_params()).unwrap();
        let mut next = test_params();
        next.covenant_quorum = 1;
        assert_eq!(versions.push(next).unwrap(), 1);

        assert_eq!(versions.params(0).unwrap().covenant_quorum, 2);
        assert_eq!(versions.latest().unwrap().0, 1);
        assert!(versions.params(2).is_none());

        let mut invalid = test_params();
        invalid.covenant_quorum = 0;
        assert!(versions.push(invalid).is_err());
        assert_eq!(versions.len(), 2);
    }
}
