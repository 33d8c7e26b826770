use std::sync::Arc;

use ed25519_dalek::SigningKey;
use ledger_bft::{
    identity::Ed25519Identity,
    types::{Validator, ValidatorRoster},
};
use rand_core::OsRng;

pub(crate) fn signing_keys(n: usize) -> Vec<SigningKey> {
    let mut csprng = OsRng {};
    (0..n).map(|_| SigningKey::generate(&mut csprng)).collect()
}

pub(crate) fn identities(keys: &[SigningKey]) -> Vec<Arc<Ed25519Identity>> {
    keys.iter()
        .map(|key| Arc::new(Ed25519Identity::new(key.clone())))
        .collect()
}

/// A roster of `keys` in the given order, with each validator's agreement endpoint at the matching
/// entry of `addresses`.
pub(crate) fn roster(keys: &[SigningKey], addresses: &[String]) -> ValidatorRoster {
    ValidatorRoster::new(
        keys.iter()
            .zip(addresses)
            .map(|(key, address)| Validator::new(key.verifying_key(), address.clone()))
            .collect(),
    )
}

/// A roster whose addresses are never dialed.
pub(crate) fn offline_roster(keys: &[SigningKey]) -> ValidatorRoster {
    let addresses: Vec<String> = (0..keys.len()).map(|i| format!("validator-{}", i)).collect();
    roster(keys, &addresses)
}
