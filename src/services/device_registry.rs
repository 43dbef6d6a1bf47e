//! Device registry backing the TOTP authentication branch.
//!
//! The in-memory map is authoritative; a single JSON document mirrors it on
//! disk. Mutations schedule a debounced write (2 s trailing edge) so bursts
//! of registrations coalesce into one file write, and the file is replaced
//! atomically via a temp-file rename. Persistence failures are logged and
//! swallowed; they never fail a user request.

use crate::models::error::GatewayError;
use crate::services::totp;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

/// Device lifetime from (re-)registration.
const DEVICE_TTL_DAYS: i64 = 7;

/// Registration attempts allowed per IP per minute.
const MAX_ATTEMPTS_PER_MINUTE: usize = 10;

/// Active, unexpired devices allowed per IP.
const MAX_ACTIVE_DEVICES_PER_IP: usize = 30;

/// Trailing-edge debounce for persistence.
const PERSIST_DEBOUNCE_MS: u64 = 2_000;

/// Cadence of the expiry sweep.
pub const SWEEP_INTERVAL_MS: u64 = 3_600_000;

/// A registered browser instance paired with its shared secret.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEntry {
    pub browser_id: String,
    pub shared_secret: String,
    pub ip: String,
    pub user_agent: String,
    pub registered_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_ip: String,
    pub active: bool,
}

impl DeviceEntry {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// On-disk document shape: `{"devices":[...]}`, pretty-printed.
#[derive(Serialize, Deserialize, Default)]
struct DeviceDocument {
    devices: Vec<DeviceEntry>,
}

/// Thread-safe device registry with debounced on-disk persistence.
#[derive(Clone)]
pub struct DeviceRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    devices: RwLock<HashMap<String, DeviceEntry>>,
    attempts: RwLock<HashMap<String, Vec<Instant>>>,
    path: PathBuf,
    persist_task: StdMutex<Option<JoinHandle<()>>>,
}

impl DeviceRegistry {
    /// Opens the registry at `path`, creating the parent directory if
    /// missing and loading any persisted entries.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut devices = HashMap::new();
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => match serde_json::from_str::<DeviceDocument>(&contents) {
                Ok(document) => {
                    for entry in document.devices {
                        devices.insert(entry.browser_id.clone(), entry);
                    }
                }
                Err(e) => warn!("device store at {} is unreadable, starting empty: {}", path.display(), e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!("device registry loaded {} entries from {}", devices.len(), path.display());

        Ok(Self {
            inner: Arc::new(RegistryInner {
                devices: RwLock::new(devices),
                attempts: RwLock::new(HashMap::new()),
                path,
                persist_task: StdMutex::new(None),
            }),
        })
    }

    /// Registers (or refreshes) a device for `browser_id`.
    ///
    /// Enforces the per-IP registration velocity and active-device caps, in
    /// that order; the current attempt is recorded before the velocity check
    /// so it counts against the next caller. Re-registration of an active,
    /// unexpired id is idempotent: the expiry is extended and the same
    /// shared secret returned.
    pub async fn register(
        &self,
        browser_id: &str,
        ip: &str,
        user_agent: &str,
    ) -> Result<DeviceEntry, GatewayError> {
        let canonical = Uuid::parse_str(browser_id)
            .map_err(|_| GatewayError::Validation("browserId must be a valid UUID".to_string()))?
            .to_string();
        if canonical != browser_id {
            return Err(GatewayError::Validation(
                "browserId must be a canonical lowercase UUID".to_string(),
            ));
        }

        {
            let now = Instant::now();
            let mut attempts = self.inner.attempts.write().await;
            let entry = attempts.entry(ip.to_string()).or_default();
            entry.retain(|t| now.saturating_duration_since(*t).as_secs() < 60);
            entry.push(now);
            if entry.len() > MAX_ATTEMPTS_PER_MINUTE {
                return Err(GatewayError::RegistrationVelocity);
            }
        }

        let entry = {
            let mut devices = self.inner.devices.write().await;

            let active_for_ip = devices
                .values()
                .filter(|d| d.ip == ip && d.active && !d.is_expired())
                .count();
            if active_for_ip >= MAX_ACTIVE_DEVICES_PER_IP {
                return Err(GatewayError::Authorization(
                    "Device limit reached for this IP".to_string(),
                ));
            }

            let now = Utc::now();
            let expires_at = now + ChronoDuration::days(DEVICE_TTL_DAYS);
            match devices.get_mut(browser_id) {
                Some(existing) if existing.active && !existing.is_expired() => {
                    existing.expires_at = expires_at;
                    existing.last_seen = now;
                    existing.last_ip = ip.to_string();
                    existing.clone()
                }
                _ => {
                    let entry = DeviceEntry {
                        browser_id: browser_id.to_string(),
                        shared_secret: totp::generate_secret(),
                        ip: ip.to_string(),
                        user_agent: user_agent.to_string(),
                        registered_at: now,
                        expires_at,
                        last_seen: now,
                        last_ip: ip.to_string(),
                        active: true,
                    };
                    devices.insert(browser_id.to_string(), entry.clone());
                    entry
                }
            }
        };

        self.schedule_persist();
        Ok(entry)
    }

    /// Resolves a browser id to its device entry.
    ///
    /// Inactive entries and unknown ids return `None`. Expired entries are
    /// removed eagerly and trigger persistence, so for authentication they
    /// are indistinguishable from absent.
    pub async fn get(&self, browser_id: &str) -> Option<DeviceEntry> {
        {
            let devices = self.inner.devices.read().await;
            match devices.get(browser_id) {
                None => return None,
                Some(entry) if !entry.active => return None,
                Some(entry) if !entry.is_expired() => return Some(entry.clone()),
                Some(_) => {}
            }
        }

        // Expired: upgrade to a write lock and evict.
        let mut devices = self.inner.devices.write().await;
        if devices.get(browser_id).map(|e| e.is_expired()).unwrap_or(false) {
            devices.remove(browser_id);
            drop(devices);
            self.schedule_persist();
        }
        None
    }

    /// Updates `last_seen`/`last_ip` after a successful code validation.
    pub async fn touch(&self, browser_id: &str, ip: &str) {
        let mut devices = self.inner.devices.write().await;
        if let Some(entry) = devices.get_mut(browser_id) {
            entry.last_seen = Utc::now();
            if entry.last_ip != ip {
                entry.last_ip = ip.to_string();
            }
        }
        drop(devices);
        self.schedule_persist();
    }

    /// Tombstones a device. The entry is retained for audit until the
    /// hourly sweep removes it past expiry.
    pub async fn revoke(&self, browser_id: &str) -> bool {
        let mut devices = self.inner.devices.write().await;
        let revoked = match devices.get_mut(browser_id) {
            Some(entry) => {
                entry.active = false;
                true
            }
            None => false,
        };
        drop(devices);
        if revoked {
            self.schedule_persist();
        }
        revoked
    }

    /// Snapshot of every retained entry, newest registration first.
    pub async fn list(&self) -> Vec<DeviceEntry> {
        let devices = self.inner.devices.read().await;
        let mut entries: Vec<DeviceEntry> = devices.values().cloned().collect();
        entries.sort_by(|a, b| b.registered_at.cmp(&a.registered_at));
        entries
    }

    /// Removes entries whose expiry has passed. Returns how many were
    /// dropped; persistence is scheduled only when something changed.
    pub async fn sweep_expired(&self) -> usize {
        let mut devices = self.inner.devices.write().await;
        let before = devices.len();
        devices.retain(|_, entry| !entry.is_expired());
        let removed = before - devices.len();
        drop(devices);
        if removed > 0 {
            info!("device sweep removed {} expired entries", removed);
            self.schedule_persist();
        }
        removed
    }

    /// Cancels any pending debounce and writes the current map out now.
    /// Called on shutdown.
    pub async fn flush(&self) {
        if let Some(handle) = take_pending(&self.inner.persist_task) {
            handle.abort();
        }
        RegistryInner::persist(&self.inner).await;
    }

    /// Resets the single debounce timer; the write happens once the
    /// registry has been quiet for the debounce interval.
    fn schedule_persist(&self) {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            sleep(Duration::from_millis(PERSIST_DEBOUNCE_MS)).await;
            RegistryInner::persist(&inner).await;
        });
        if let Some(previous) = replace_pending(&self.inner.persist_task, task) {
            previous.abort();
        }
    }
}

impl RegistryInner {
    /// Copies the map under the lock, then serializes and writes with the
    /// lock released. The document is written to a sibling temp file and
    /// renamed over the target so readers never observe a torn write.
    async fn persist(inner: &Arc<RegistryInner>) {
        let document = {
            let devices = inner.devices.read().await;
            let mut entries: Vec<DeviceEntry> = devices.values().cloned().collect();
            entries.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
            DeviceDocument { devices: entries }
        };

        let json = match serde_json::to_string_pretty(&document) {
            Ok(json) => json,
            Err(e) => {
                error!("failed to serialize device store: {}", e);
                return;
            }
        };

        let tmp_path = inner.path.with_extension("json.tmp");
        if let Err(e) = tokio::fs::write(&tmp_path, json).await {
            error!("failed to write device store {}: {}", tmp_path.display(), e);
            return;
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &inner.path).await {
            error!("failed to replace device store {}: {}", inner.path.display(), e);
        }
    }
}

fn take_pending(slot: &StdMutex<Option<JoinHandle<()>>>) -> Option<JoinHandle<()>> {
    match slot.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    }
}

fn replace_pending(
    slot: &StdMutex<Option<JoinHandle<()>>>,
    task: JoinHandle<()>,
) -> Option<JoinHandle<()>> {
    match slot.lock() {
        Ok(mut guard) => guard.replace(task),
        Err(poisoned) => poisoned.into_inner().replace(task),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BROWSER_ID: &str = "550e8400-e29b-41d4-a716-446655440000";
    const OTHER_ID: &str = "6ba7b810-9dad-11d1-80b4-00c04fd430c8";

    async fn temp_registry() -> (DeviceRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let registry = DeviceRegistry::load(dir.path().join("devices.json"))
            .await
            .unwrap();
        (registry, dir)
    }

    #[tokio::test]
    async fn registration_issues_a_256_bit_secret() {
        let (registry, _dir) = temp_registry().await;
        let entry = registry
            .register(BROWSER_ID, "10.0.0.1", "test-agent")
            .await
            .unwrap();
        assert_eq!(entry.browser_id, BROWSER_ID);
        assert_eq!(entry.shared_secret.len(), 64);
        assert!(entry.active);
        assert!(!entry.is_expired());
    }

    #[tokio::test]
    async fn re_registration_is_idempotent_and_extends_expiry() {
        let (registry, _dir) = temp_registry().await;
        let first = registry
            .register(BROWSER_ID, "10.0.0.1", "test-agent")
            .await
            .unwrap();
        let second = registry
            .register(BROWSER_ID, "10.0.0.2", "test-agent")
            .await
            .unwrap();

        assert_eq!(first.shared_secret, second.shared_secret);
        assert!(second.expires_at >= first.expires_at);
        assert_eq!(second.last_ip, "10.0.0.2");
    }

    #[tokio::test]
    async fn non_uuid_browser_id_is_rejected() {
        let (registry, _dir) = temp_registry().await;
        let err = registry
            .register("not-a-uuid", "10.0.0.1", "test-agent")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[tokio::test]
    async fn registration_velocity_is_capped_per_ip() {
        let (registry, _dir) = temp_registry().await;
        for _ in 0..10 {
            registry
                .register(BROWSER_ID, "10.0.0.1", "test-agent")
                .await
                .unwrap();
        }
        let err = registry
            .register(BROWSER_ID, "10.0.0.1", "test-agent")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::RegistrationVelocity));

        // Another IP is unaffected.
        assert!(registry
            .register(OTHER_ID, "10.0.0.2", "test-agent")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn revoked_devices_vanish_from_lookup_but_stay_listed() {
        let (registry, _dir) = temp_registry().await;
        registry
            .register(BROWSER_ID, "10.0.0.1", "test-agent")
            .await
            .unwrap();

        assert!(registry.get(BROWSER_ID).await.is_some());
        assert!(registry.revoke(BROWSER_ID).await);
        assert!(registry.get(BROWSER_ID).await.is_none());

        let listed = registry.list().await;
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].active);
    }

    #[tokio::test]
    async fn unknown_device_lookup_is_none() {
        let (registry, _dir) = temp_registry().await;
        assert!(registry.get(BROWSER_ID).await.is_none());
        assert!(!registry.revoke(BROWSER_ID).await);
    }

    #[tokio::test]
    async fn flush_persists_and_reload_restores() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");

        let registry = DeviceRegistry::load(&path).await.unwrap();
        let entry = registry
            .register(BROWSER_ID, "10.0.0.1", "test-agent")
            .await
            .unwrap();
        registry.flush().await;

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\"devices\""));
        assert!(contents.contains(BROWSER_ID));

        let reloaded = DeviceRegistry::load(&path).await.unwrap();
        let restored = reloaded.get(BROWSER_ID).await.unwrap();
        assert_eq!(restored.shared_secret, entry.shared_secret);
    }

    #[tokio::test]
    async fn sweep_removes_expired_entries() {
        let (registry, _dir) = temp_registry().await;
        registry
            .register(BROWSER_ID, "10.0.0.1", "test-agent")
            .await
            .unwrap();

        // Backdate the expiry directly; the sweep should evict it.
        {
            let mut devices = registry.inner.devices.write().await;
            devices.get_mut(BROWSER_ID).unwrap().expires_at =
                Utc::now() - ChronoDuration::hours(1);
        }
        assert_eq!(registry.sweep_expired().await, 1);
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn expired_entries_are_evicted_on_lookup() {
        let (registry, _dir) = temp_registry().await;
        registry
            .register(BROWSER_ID, "10.0.0.1", "test-agent")
            .await
            .unwrap();
        {
            let mut devices = registry.inner.devices.write().await;
            devices.get_mut(BROWSER_ID).unwrap().expires_at =
                Utc::now() - ChronoDuration::hours(1);
        }

        assert!(registry.get(BROWSER_ID).await.is_none());
        assert!(registry.list().await.is_empty());
    }
}
