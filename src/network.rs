use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::params::Params;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Testnet,
    Local,
}

impl Network {
    pub fn config(&self) -> Result<NetworkConfig> {
        let toml_src = match self {
            Self::Testnet => include_str!("../networks/testnet.toml"),
            Self::Local => include_str!("../networks/local.toml"),
        };

        NetworkConfig::from_toml(toml_src)
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "testnet" => Ok(Self::Testnet),
            "local" => Ok(Self::Local),
            _ => Err(Error::InvalidMessage(format!("Invalid network: {s}"))),
        }
    }
}

/// Chain parameters the staking module runs with: the Bitcoin network, the
/// checkpointing depths and the genesis staking parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub btc_network: bitcoin::Network,
    /// `k`
    pub btc_confirmation_depth: u64,
    /// `w`
    pub checkpoint_finalization_timeout: u64,
    pub params: Params,
}

impl NetworkConfig {
    pub fn from_toml(src: &str) -> Result<Self> {
        let config: Self = toml::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.params.validate()?;

        if self.checkpoint_finalization_timeout == 0 {
            return Err(Error::InvalidParams(
                "finalization timeout must be positive".to_string(),
            ));
        }
        if self.btc_confirmation_depth >= self.checkpoint_finalization_timeout {
            return Err(Error::InvalidParams(
                "confirmation depth must be below the finalization timeout".to_string(),
            ));
        }
        // test networks share address prefixes
        let is_mainnet = |network| network == bitcoin::Network::Bitcoin;
        if is_mainnet(self.params.slashing_address.network) != is_mainnet(self.btc_network) {
            return Err(Error::InvalidParams(format!(
                "slashing address is not a {} address",
                self.btc_network
            )));
        }

        Ok(())
    }
}

#[derive(Parser, Debug, Clone)]
pub struct ConfigArgs {
    #[clap(long, global = true, default_value = "testnet")]
    pub network: Network,
    /// Path to a network config TOML, replacing the built-in one.
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,
    #[clap(long, global = true)]
    pub finalization_timeout: Option<u64>,
    #[clap(long, global = true)]
    pub confirmation_depth: Option<u64>,
}

impl ConfigArgs {
    pub fn config(&self) -> Result<NetworkConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let src = std::fs::read_to_string(path).map_err(|e| {
                    Error::InvalidParams(format!("cannot read {}: {e}", path.display()))
                })?;
                NetworkConfig::from_toml(&src)?
            }
            None => self.network.config()?,
        };

        if let Some(w) = self.finalization_timeout {
            config.checkpoint_finalization_timeout = w;
        }
        if let Some(k) = self.confirmation_depth {
            config.btc_confirmation_depth = k;
        }
        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn testnet_config() {
        let config = Network::Testnet.config().unwrap();
        assert_eq!(config.btc_network, bitcoin::Network::Signet);
        assert_eq!(config.params.covenant_pks.len(), 5);
        assert_eq!(config.params.covenant_quorum, 3);
        assert_eq!(config.params.slashing_rate.bps(), 1_000);
        assert_eq!(config.checkpoint_finalization_timeout, 100);
    }

    #[test]
    fn local_config() {
        let config = Network::Local.config().unwrap();
        assert_eq!(config.btc_network, bitcoin::Network::Regtest);
        assert_eq!(config.checkpoint_finalization_timeout, 10);
        // local covenant committee is the one the fixtures sign with
        assert_eq!(config.params, crate::test_utils::test_params());
    }

    #[test]
    fn parse_network() {
        assert_eq!("TESTNET".parse::<Network>().unwrap(), Network::Testnet);
        assert!("stakenet".parse::<Network>().is_err());
    }

    #[test]
    fn overrides() {
        let args = ConfigArgs::parse_from(["staking-info", "--finalization-timeout", "200"]);
        assert_eq!(args.config().unwrap().checkpoint_finalization_timeout, 200);

        let args = ConfigArgs::parse_from(["staking-info", "--confirmation-depth", "100"]);
        assert!(args.config().is_err());
    }

    #[test]
    fn rejects_invalid_toml() {
        let src = include_str!("../networks/testnet.toml").replace(
            "covenant_quorum = 3",
            "covenant_quorum = 6",
        );
        assert!(NetworkConfig::from_toml(&src).is_err());
        assert!(NetworkConfig::from_toml("btc_network = 1").is_err());
    }
}
