//! Static API credential registry.
//!
//! Credentials are never deleted: revocation flips the `active` tombstone so
//! historic ids stay resolvable for audit. Authentication is O(1) through a
//! secret-keyed index kept consistent with the id-keyed map.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A long-lived static credential.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub id: String,
    pub secret: String,
    pub name: String,
    pub tier: String,
    pub created_at: DateTime<Utc>,
    pub active: bool,
}

#[derive(Default)]
struct CredentialState {
    by_id: HashMap<String, Credential>,
    // secret -> id; entries survive revocation, the lookup checks `active`.
    by_secret: HashMap<String, String>,
    issued: u64,
}

/// Thread-safe credential store shared across workers.
#[derive(Clone, Default)]
pub struct CredentialStore {
    state: Arc<RwLock<CredentialState>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a new credential: `key_NNN` id and a `gw_live_`-prefixed
    /// 32-hex secret.
    pub fn create(&self, name: &str, tier: &str) -> Credential {
        let mut state = lock_write(&self.state);
        state.issued += 1;
        let credential = Credential {
            id: format!("key_{:03}", state.issued),
            secret: format!("gw_live_{}", random_hex(16)),
            name: name.to_string(),
            tier: tier.to_string(),
            created_at: Utc::now(),
            active: true,
        };
        state
            .by_secret
            .insert(credential.secret.clone(), credential.id.clone());
        state.by_id.insert(credential.id.clone(), credential.clone());
        credential
    }

    /// Resolves a presented secret to its credential, if active.
    pub fn authenticate(&self, secret: &str) -> Option<Credential> {
        let state = lock_read(&self.state);
        let id = state.by_secret.get(secret)?;
        state.by_id.get(id).filter(|c| c.active).cloned()
    }

    /// Revokes by id. Returns false when the id is unknown. The entry is
    /// retained so audit lookups keep resolving.
    pub fn revoke(&self, id: &str) -> bool {
        let mut state = lock_write(&self.state);
        match state.by_id.get_mut(id) {
            Some(credential) => {
                credential.active = false;
                true
            }
            None => false,
        }
    }

    /// Looks up a credential by id, active or not.
    pub fn get(&self, id: &str) -> Option<Credential> {
        lock_read(&self.state).by_id.get(id).cloned()
    }

    /// Number of credentials that can still authenticate.
    pub fn active_count(&self) -> u64 {
        lock_read(&self.state)
            .by_id
            .values()
            .filter(|c| c.active)
            .count() as u64
    }
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

fn lock_read(
    state: &Arc<RwLock<CredentialState>>,
) -> std::sync::RwLockReadGuard<'_, CredentialState> {
    match state.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn lock_write(
    state: &Arc<RwLock<CredentialState>>,
) -> std::sync::RwLockWriteGuard<'_, CredentialState> {
    match state.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_credentials_follow_the_format() {
        let store = CredentialStore::new();
        let first = store.create("ci", "free");
        let second = store.create("staging", "pro");

        assert_eq!(first.id, "key_001");
        assert_eq!(second.id, "key_002");
        for credential in [&first, &second] {
            assert!(credential.secret.starts_with("gw_live_"));
            let hex_part = &credential.secret["gw_live_".len()..];
            assert_eq!(hex_part.len(), 32);
            assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
        assert_ne!(first.secret, second.secret);
    }

    #[test]
    fn authenticate_resolves_active_secrets_only() {
        let store = CredentialStore::new();
        let credential = store.create("ci", "pro");

        let found = store.authenticate(&credential.secret).unwrap();
        assert_eq!(found.id, credential.id);
        assert_eq!(found.tier, "pro");

        assert!(store.authenticate("gw_live_00000000000000000000000000000000").is_none());
    }

    #[test]
    fn revocation_tombstones_but_keeps_the_entry() {
        let store = CredentialStore::new();
        let credential = store.create("ci", "free");

        assert!(store.revoke(&credential.id));
        assert!(store.authenticate(&credential.secret).is_none());

        // Still resolvable by id for audit.
        let kept = store.get(&credential.id).unwrap();
        assert!(!kept.active);
        assert_eq!(store.active_count(), 0);
    }

    #[test]
    fn revoking_unknown_id_reports_false() {
        let store = CredentialStore::new();
        assert!(!store.revoke("key_404"));
    }
}
