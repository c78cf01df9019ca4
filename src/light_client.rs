//! Read-only views of the modules this crate consults but does not own: the
//! Bitcoin light client and the checkpointing module.

use bitcoin::{BlockHash, BlockHeader};

/// A header known to the light client together with its height.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderInfo {
    pub height: u64,
    pub header: BlockHeader,
}

pub trait BtcLightClient {
    /// Height of the tip of the best chain.
    fn tip_height(&self) -> u64;

    /// Looks up a header by hash, on or off the best chain.
    fn header(&self, hash: &BlockHash) -> Option<HeaderInfo>;

    fn is_on_best_chain(&self, hash: &BlockHash) -> bool;
}

pub trait Checkpointing {
    /// `k`: blocks a transaction must be buried under before it counts.
    fn btc_confirmation_depth(&self) -> u64;

    /// `w`: blocks after which a checkpoint is irreversible.
    fn finalization_timeout(&self) -> u64;
}
