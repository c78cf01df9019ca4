//! Lifecycle of Bitcoin staking delegations: registration of finality
//! providers, validation of staking requests, covenant quorum collection,
//! inclusion proofs, early unbonding and selective slashing.

pub use bitcoin;
pub use thiserror;

pub mod adapter;
pub mod context;
pub mod crypto;
pub mod delegation;
pub mod error;
pub mod events;
pub mod finality_provider;
pub mod handlers;
pub mod light_client;
pub mod msg;
pub mod network;
pub mod params;
pub mod proof;
pub mod scripts;
pub mod staking_tx;
pub mod state_machine;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod validation;

pub use error::{Error, ErrorKind, Result};
pub use state_machine::{run, Action, State};
