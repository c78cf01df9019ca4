//! Prints the outputs a staker has to fund and pre-sign for a BTC delegation
//! under the parameters of a network.

use bitcoin::XOnlyPublicKey;
use btcstaking::error::Result;
use btcstaking::network::{ConfigArgs, NetworkConfig};
use btcstaking::scripts::{taproot_address, StakingInfo, UnbondingInfo};
use clap::Parser;
use log::{debug, error};

#[derive(Parser, Debug)]
#[clap(version = env!("CARGO_PKG_VERSION"))]
pub struct Opts {
    #[clap(subcommand)]
    cmd: Command,

    #[clap(flatten)]
    config: ConfigArgs,
}

#[derive(Parser, Debug)]
pub enum Command {
    /// Print the staking output and its spend paths.
    Staking(StakingCmd),
    /// Print the unbonding output and its spend paths.
    Unbonding(UnbondingCmd),
    /// Print the network configuration.
    Params,
}

#[derive(Parser, Debug)]
pub struct DelegationArgs {
    /// Staker BTC public key, x-only hex.
    #[clap(long)]
    staker: XOnlyPublicKey,
    /// Finality provider BTC public keys, x-only hex.
    #[clap(long = "fp", required = true)]
    fps: Vec<XOnlyPublicKey>,
    /// Staked amount in satoshis.
    #[clap(long)]
    value: u64,
}

#[derive(Parser, Debug)]
pub struct StakingCmd {
    #[clap(flatten)]
    delegation: DelegationArgs,
    #[clap(long)]
    staking_time: u16,
}

impl StakingCmd {
    fn run(&self, config: &NetworkConfig) -> Result<()> {
        let args = &self.delegation;
        let info = StakingInfo::new(
            args.staker,
            &args.fps,
            &config.params,
            self.staking_time,
            args.value,
        )?;
        let address = taproot_address(&info.staking_output, config.btc_network)?;

        println!("address: {}", address);
        println!("value: {}", info.staking_output.value);
        println!("script_pubkey: {:x}", info.staking_output.script_pubkey);
        println!("timelock_path: {:x}", info.timelock_path);
        println!("unbonding_path: {:x}", info.unbonding_path);
        println!("slashing_path: {:x}", info.slashing_path);
        Ok(())
    }
}

#[derive(Parser, Debug)]
pub struct UnbondingCmd {
    #[clap(flatten)]
    delegation: DelegationArgs,
    /// Defaults to the minimum unbonding time allowed on the network.
    #[clap(long)]
    unbonding_time: Option<u16>,
}

impl UnbondingCmd {
    fn run(&self, config: &NetworkConfig) -> Result<()> {
        let args = &self.delegation;
        let params = &config.params;
        let unbonding_time = self.unbonding_time.unwrap_or_else(|| {
            let min = config.checkpoint_finalization_timeout + 1;
            (params.min_unbonding_time_blocks as u64)
                .max(min)
                .min(u16::MAX as u64) as u16
        });
        let unbonding_value = args.value.checked_sub(params.unbonding_fee_sat).ok_or_else(|| {
            btcstaking::Error::InvalidStakingTx(
                "staking value does not cover the unbonding fee".to_string(),
            )
        })?;
        debug!(
            "Unbonding {} sat after {} blocks",
            unbonding_value, unbonding_time
        );

        let info = UnbondingInfo::new(
            args.staker,
            &args.fps,
            params,
            unbonding_time,
            unbonding_value,
        )?;
        let address = taproot_address(&info.unbonding_output, config.btc_network)?;

        println!("address: {}", address);
        println!("value: {}", info.unbonding_output.value);
        println!("unbonding_time: {}", unbonding_time);
        println!("script_pubkey: {:x}", info.unbonding_output.script_pubkey);
        println!("timelock_path: {:x}", info.timelock_path);
        println!("slashing_path: {:x}", info.slashing_path);
        Ok(())
    }
}

fn print_config(config: &NetworkConfig) -> Result<()> {
    let toml = toml::to_string(config)
        .map_err(|e| btcstaking::Error::InvalidParams(e.to_string()))?;
    print!("{}", toml);
    Ok(())
}

impl Command {
    fn run(&self, config: &NetworkConfig) -> Result<()> {
        use Command::*;
        match self {
            Staking(cmd) => cmd.run(config),
            Unbonding(cmd) => cmd.run(config),
            Params => print_config(config),
        }
    }
}

pub fn main() {
    pretty_env_logger::init_custom_env("BTCSTAKING_LOG");

    let opts = Opts::parse();
    let result = opts
        .config
        .config()
        .and_then(|config| opts.cmd.run(&config));

    if let Err(err) = result {
        error!("{}", err);
        std::process::exit(1);
    }
}
