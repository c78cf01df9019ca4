use bitcoin::XOnlyPublicKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crypto::Bip340Signature;
use crate::error::{Error, Result};
use crate::params::Rate;

pub const MAX_MONIKER_LENGTH: usize = 70;
pub const MAX_IDENTITY_LENGTH: usize = 3000;
pub const MAX_WEBSITE_LENGTH: usize = 140;
pub const MAX_SECURITY_CONTACT_LENGTH: usize = 140;
pub const MAX_DETAILS_LENGTH: usize = 280;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    pub moniker: String,
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub security_contact: String,
    #[serde(default)]
    pub details: String,
}

impl Description {
    pub fn validate(&self) -> Result<()> {
        if self.moniker.is_empty() {
            return Err(Error::InvalidMessage(
                "Description moniker cannot be empty".to_string(),
            ));
        }

        let fields = [
            ("moniker", &self.moniker, MAX_MONIKER_LENGTH),
            ("identity", &self.identity, MAX_IDENTITY_LENGTH),
            ("website", &self.website, MAX_WEBSITE_LENGTH),
            ("security contact", &self.security_contact, MAX_SECURITY_CONTACT_LENGTH),
            ("details", &self.details, MAX_DETAILS_LENGTH),
        ];
        for (name, value, max) in fields {
            if value.len() > max {
                return Err(Error::InvalidMessage(format!(
                    "Description {name} is longer than {max} bytes"
                )));
            }
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalityProvider {
    pub description: Description,
    pub commission: Rate,
    /// Chain account allowed to edit this provider.
    pub addr: String,
    pub btc_pk: XOnlyPublicKey,
    pub pop: Bip340Signature,
    /// BTC tip height at which the provider was slashed.
    pub slashed_btc_height: Option<u64>,
}

impl FinalityProvider {
    pub fn is_slashed(&self) -> bool {
        self.slashed_btc_height.is_some()
    }
}

/// Finality providers keyed by BTC public key. Providers are never removed,
/// and slashing cannot be undone.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FinalityProviderRegistry {
    providers: BTreeMap<XOnlyPublicKey, FinalityProvider>,
}

impl FinalityProviderRegistry {
    pub fn contains(&self, btc_pk: &XOnlyPublicKey) -> bool {
        self.providers.contains_key(btc_pk)
    }

    pub fn get(&self, btc_pk: &XOnlyPublicKey) -> Result<&FinalityProvider> {
        self.providers
            .get(btc_pk)
            .ok_or_else(|| Error::FinalityProviderNotFound(btc_pk.to_string()))
    }

    pub fn register(&mut self, fp: FinalityProvider) -> Result<()> {
        if self.contains(&fp.btc_pk) {
            return Err(Error::DuplicateFinalityProvider(fp.btc_pk.to_string()));
        }
        self.providers.insert(fp.btc_pk, fp);
        Ok(())
    }

    /// Rewrites description and commission. Only the registered address may
    /// edit, compared case-insensitively.
    pub fn edit(
        &mut self,
        btc_pk: &XOnlyPublicKey,
        signer: &str,
        description: Description,
        commission: Rate,
    ) -> Result<()> {
        let fp = self
            .providers
            .get_mut(btc_pk)
            .ok_or_else(|| Error::FinalityProviderNotFound(btc_pk.to_string()))?;

        if !fp.addr.eq_ignore_ascii_case(signer) {
            return Err(Error::Unauthorized(
                "the signer does not correspond to the finality provider's address".to_string(),
            ));
        }

        fp.description = description;
        fp.commission = commission;
        Ok(())
    }

    pub fn slash(&mut self, btc_pk: &XOnlyPublicKey, btc_height: u64) -> Result<()> {
        let fp = self
            .providers
            .get_mut(btc_pk)
            .ok_or_else(|| Error::FinalityProviderNotFound(btc_pk.to_string()))?;

        if fp.is_slashed() {
            return Err(Error::FinalityProviderSlashed(btc_pk.to_string()));
        }
        fp.slashed_btc_height = Some(btc_height);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &FinalityProvider> {
        self.providers.values()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{sign_pop, x_only_public_key};
    use crate::test_utils::{secret_key, test_address};

    fn provider(seed: u8) -> FinalityProvider {
        let sk = secret_key(seed);
        let addr = test_address(seed);
        FinalityProvider {
            description: Description {
                moniker: format!("fp-{seed}"),
                ..Default::default()
            },
            commission: Rate::from_bps(500),
            pop: sign_pop(&addr, &sk).unwrap(),
            addr,
            btc_pk: x_only_public_key(&sk),
            slashed_btc_height: None,
        }
    }

    #[test]
    fn register_duplicate() {
        let mut registry = FinalityProviderRegistry::default();
        registry.register(provider(1)).unwrap();
        let err = registry.register(provider(1)).unwrap_err();
        assert!(matches!(err, Error::DuplicateFinalityProvider(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn edit_requires_owner() {
        let mut registry = FinalityProviderRegistry::default();
        let fp = provider(1);
        let pk = fp.btc_pk;
        let owner = fp.addr.clone();
        registry.register(fp).unwrap();

        let description = Description {
            moniker: "renamed".to_string(),
            ..Default::default()
        };
        let err = registry
            .edit(&pk, &test_address(2), description.clone(), Rate::from_bps(100))
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        assert_eq!(registry.get(&pk).unwrap().description.moniker, "fp-1");

        registry
            .edit(&pk, &owner.to_uppercase(), description, Rate::from_bps(100))
            .unwrap();
        let fp = registry.get(&pk).unwrap();
        assert_eq!(fp.description.moniker, "renamed");
        assert_eq!(fp.commission, Rate::from_bps(100));
    }

    #[test]
    fn slashing_is_one_way() {
        let mut registry = FinalityProviderRegistry::default();
        let fp = provider(1);
        let pk = fp.btc_pk;
        registry.register(fp).unwrap();

        registry.slash(&pk, 120).unwrap();
        assert_eq!(registry.get(&pk).unwrap().slashed_btc_height, Some(120));

        let err = registry.slash(&pk, 130).unwrap_err();
        assert!(matches!(err, Error::FinalityProviderSlashed(_)));
        assert_eq!(registry.get(&pk).unwrap().slashed_btc_height, Some(120));

        let unknown = x_only_public_key(&secret_key(9));
        assert!(matches!(
            registry.slash(&unknown, 1),
            Err(Error::FinalityProviderNotFound(_))
        ));
    }

    #[test]
    fn description_bounds() {
        let mut description = Description::default();
        assert!(description.validate().is_err());
        description.moniker = "x".repeat(MAX_MONIKER_LENGTH);
        description.validate().unwrap();
        description.details = "x".repeat(MAX_DETAILS_LENGTH + 1);
        assert!(description.validate().is_err());
    }
}
