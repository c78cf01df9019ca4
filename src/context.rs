use bitcoin::{Txid, XOnlyPublicKey};

use crate::error::{Error, Result};
use crate::light_client::{BtcLightClient, Checkpointing};

/// Chain position read once at the start of a transition. Every status
/// derivation and event height within the transition uses these values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainSnapshot {
    pub tip_height: u64,
    /// Finalization timeout `w`.
    pub w: u64,
    /// Confirmation depth `k`.
    pub k: u64,
}

impl ChainSnapshot {
    pub fn read(light_client: &dyn BtcLightClient, checkpointing: &dyn Checkpointing) -> Self {
        Self {
            tip_height: light_client.tip_height(),
            w: checkpointing.finalization_timeout(),
            k: checkpointing.btc_confirmation_depth(),
        }
    }
}

/// A message whose fees the host refunds once its core verification passed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefundableMsg {
    AddInclusionProof {
        staking_tx_hash: Txid,
    },
    AddCovenantSigs {
        staking_tx_hash: Txid,
        covenant_pk: XOnlyPublicKey,
    },
    Undelegate {
        staking_tx_hash: Txid,
    },
    SelectiveSlashingEvidence {
        staking_tx_hash: Txid,
        fp_btc_pk: XOnlyPublicKey,
    },
}

pub trait RefundIndexer {
    fn index_refundable_msg(&mut self, msg: RefundableMsg);
}

pub trait GasMeter {
    /// Charges `amount` gas, failing with [`Error::OutOfGas`] if the limit is
    /// exceeded.
    fn consume_gas(&mut self, amount: u64, descriptor: &str) -> Result<()>;
}

/// Gas meter with a fixed limit.
#[derive(Clone, Debug, Default)]
pub struct LimitedGasMeter {
    pub limit: u64,
    pub consumed: u64,
}

impl LimitedGasMeter {
    pub fn new(limit: u64) -> Self {
        Self { limit, consumed: 0 }
    }
}

impl GasMeter for LimitedGasMeter {
    fn consume_gas(&mut self, amount: u64, descriptor: &str) -> Result<()> {
        let consumed = self
            .consumed
            .checked_add(amount)
            .filter(|c| *c <= self.limit)
            .ok_or_else(|| {
                Error::OutOfGas(format!(
                    "{descriptor}: limit {}, consumed {}, wanted {amount}",
                    self.limit, self.consumed
                ))
            })?;
        self.consumed = consumed;
        Ok(())
    }
}

/// Handles to the collaborators a transition consults, passed explicitly to
/// each handler.
pub struct Ctx<'a> {
    pub light_client: &'a dyn BtcLightClient,
    pub checkpointing: &'a dyn Checkpointing,
    pub refunds: &'a mut dyn RefundIndexer,
    pub gas: &'a mut dyn GasMeter,
}

impl<'a> Ctx<'a> {
    pub fn snapshot(&self) -> ChainSnapshot {
        ChainSnapshot::read(self.light_client, self.checkpointing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gas_limit() {
        let mut gas = LimitedGasMeter::new(100);
        gas.consume_gas(60, "first").unwrap();
        let err = gas.consume_gas(41, "second").unwrap_err();
        assert!(matches!(err, Error::OutOfGas(_)));
        assert_eq!(gas.consumed, 60);
        gas.consume_gas(40, "third").unwrap();
        assert!(gas.consume_gas(u64::MAX, "overflow").is_err());
    }
}
