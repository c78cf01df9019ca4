use bitcoin::{Txid, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeBounds;

use crate::delegation::BtcDelegationStatus;

/// An update to the voting power distribution, consumed by the power
/// aggregator at the BTC height it was recorded under.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerDistUpdateEvent {
    BtcDelStateUpdate {
        staking_tx_hash: Txid,
        new_state: BtcDelegationStatus,
    },
    NewFinalityProvider {
        btc_pk: XOnlyPublicKey,
    },
    SlashedFinalityProvider {
        btc_pk: XOnlyPublicKey,
    },
}

impl PowerDistUpdateEvent {
    pub fn state_update(staking_tx_hash: Txid, new_state: BtcDelegationStatus) -> Self {
        PowerDistUpdateEvent::BtcDelStateUpdate {
            staking_tx_hash,
            new_state,
        }
    }
}

/// Append-only, height-indexed log. Events at the same height keep the order
/// they were added in.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EventLog {
    events: BTreeMap<u64, Vec<PowerDistUpdateEvent>>,
}

impl EventLog {
    pub fn add(&mut self, btc_height: u64, event: PowerDistUpdateEvent) {
        self.events.entry(btc_height).or_default().push(event);
    }

    pub fn at(&self, btc_height: u64) -> &[PowerDistUpdateEvent] {
        self.events
            .get(&btc_height)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn range<R: RangeBounds<u64>>(
        &self,
        heights: R,
    ) -> impl Iterator<Item = (u64, &PowerDistUpdateEvent)> {
        self.events
            .range(heights)
            .flat_map(|(height, events)| events.iter().map(move |e| (*height, e)))
    }

    pub fn len(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    fn update(i: u8, state: BtcDelegationStatus) -> PowerDistUpdateEvent {
        PowerDistUpdateEvent::state_update(Txid::from_inner([i; 32]), state)
    }

    #[test]
    fn insertion_order_within_height() {
        let mut log = EventLog::default();
        log.add(10, update(3, BtcDelegationStatus::Active));
        log.add(5, update(1, BtcDelegationStatus::Active));
        log.add(10, update(2, BtcDelegationStatus::Unbonded));
        log.add(10, update(1, BtcDelegationStatus::Unbonded));

        assert_eq!(
            log.at(10),
            &[
                update(3, BtcDelegationStatus::Active),
                update(2, BtcDelegationStatus::Unbonded),
                update(1, BtcDelegationStatus::Unbonded),
            ]
        );
        assert!(log.at(7).is_empty());
        assert_eq!(log.len(), 4);

        let heights: Vec<_> = log.range(..).map(|(h, _)| h).collect();
        assert_eq!(heights, vec![5, 10, 10, 10]);
        assert_eq!(log.range(6..=10).count(), 3);
        assert_eq!(log.range(..10).count(), 1);
    }
}
