use bitcoin::{Txid, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::delegation::BtcDelegation;
use crate::error::{Error, Result};

/// Delegations keyed by staking tx hash, with an index from finality provider
/// to the delegations staked to it. Records are never removed.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DelegationStore {
    delegations: BTreeMap<Txid, BtcDelegation>,
    by_fp: BTreeMap<XOnlyPublicKey, BTreeSet<Txid>>,
}

impl DelegationStore {
    pub fn contains(&self, staking_tx_hash: &Txid) -> bool {
        self.delegations.contains_key(staking_tx_hash)
    }

    pub fn insert(&mut self, delegation: BtcDelegation) -> Result<()> {
        let hash = delegation.staking_tx_hash();
        if self.contains(&hash) {
            return Err(Error::DuplicateStakingTx(hash.to_string()));
        }

        for fp_pk in delegation.fp_btc_pk_list.iter() {
            self.by_fp.entry(*fp_pk).or_default().insert(hash);
        }
        self.delegations.insert(hash, delegation);

        Ok(())
    }

    pub fn get(&self, staking_tx_hash: &Txid) -> Result<&BtcDelegation> {
        self.delegations
            .get(staking_tx_hash)
            .ok_or_else(|| Error::DelegationNotFound(staking_tx_hash.to_string()))
    }

    /// Replaces an existing record. The staking tx and provider list are
    /// immutable, so the provider index needs no update.
    pub fn update(&mut self, delegation: BtcDelegation) -> Result<()> {
        let hash = delegation.staking_tx_hash();
        let existing = self
            .delegations
            .get_mut(&hash)
            .ok_or_else(|| Error::DelegationNotFound(hash.to_string()))?;
        if existing.fp_btc_pk_list != delegation.fp_btc_pk_list {
            return Err(Error::Fault(format!(
                "finality providers of delegation {hash} changed"
            )));
        }
        *existing = delegation;

        Ok(())
    }

    pub fn by_finality_provider<'a>(
        &'a self,
        fp_pk: &XOnlyPublicKey,
    ) -> impl Iterator<Item = &'a BtcDelegation> + 'a {
        self.by_fp
            .get(fp_pk)
            .into_iter()
            .flatten()
            .filter_map(|hash| self.delegations.get(hash))
    }

    pub fn iter(&self) -> impl Iterator<Item = &BtcDelegation> {
        self.delegations.values()
    }

    pub fn len(&self) -> usize {
        self.delegations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delegations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::DelegationFixture;

    #[test]
    fn insert_get_update() {
        let fixture = DelegationFixture::new(100);
        let mut store = DelegationStore::default();
        let del = fixture.delegation();
        let hash = del.staking_tx_hash();

        assert!(matches!(store.get(&hash), Err(Error::DelegationNotFound(_))));
        store.insert(del.clone()).unwrap();
        assert_eq!(store.get(&hash).unwrap(), &del);

        let mut updated = del.clone();
        updated.set_inclusion_height(500);
        store.update(updated).unwrap();
        assert_eq!(store.get(&hash).unwrap().start_height, 500);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn duplicate_staking_tx() {
        let fixture = DelegationFixture::new(100);
        let mut store = DelegationStore::default();
        store.insert(fixture.delegation()).unwrap();

        // any other field differences do not matter
        let mut other = fixture.delegation();
        other.staker_addr = "someone else".to_string();
        other.total_sat += 1;
        let err = store.insert(other).unwrap_err();
        assert!(matches!(err, Error::DuplicateStakingTx(_)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn update_requires_existing() {
        let fixture = DelegationFixture::new(100);
        let mut store = DelegationStore::default();
        let err = store.update(fixture.delegation()).unwrap_err();
        assert!(matches!(err, Error::DelegationNotFound(_)));
    }

    #[test]
    fn provider_index() {
        let a = DelegationFixture::new(100);
        let b = DelegationFixture::with_seed(2, 200);
        let mut store = DelegationStore::default();
        store.insert(a.delegation()).unwrap();
        store.insert(b.delegation()).unwrap();

        let fp = a.fp_pks()[0];
        let hashes: Vec<_> = store
            .by_finality_provider(&fp)
            .map(|d| d.staking_tx_hash())
            .collect();
        assert!(hashes.contains(&a.delegation().staking_tx_hash()));

        let unknown = crate::crypto::x_only_public_key(&crate::test_utils::secret_key(250));
        assert_eq!(store.by_finality_provider(&unknown).count(), 0);
    }
}
