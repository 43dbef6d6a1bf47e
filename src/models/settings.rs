use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Rate-limiting algorithm selector for a tier.
///
/// `None` disables per-tier limiting entirely; the global ceiling still
/// applies to such requests.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Algorithm {
    TokenBucket,
    SlidingWindow,
    FixedWindow,
    None,
}

/// A named rate-limit policy.
///
/// Parameter requirements depend on the algorithm: `tokenBucket` needs
/// `maxRequests` and `refillRate`; the windowed algorithms need
/// `maxRequests` and `windowMs`. A tier missing its required parameters is
/// treated as unlimited at admission time rather than rejecting traffic.
///
/// # Examples
///
/// ```json
/// {
///   "algorithm": "tokenBucket",
///   "maxRequests": 100,
///   "refillRate": 10.0
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Tier {
    pub algorithm: Algorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_requests: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refill_rate: Option<f64>,
}

impl Tier {
    /// Whether the tier carries every parameter its algorithm needs.
    pub fn is_well_formed(&self) -> bool {
        match self.algorithm {
            Algorithm::TokenBucket => {
                self.max_requests.is_some()
                    && self.refill_rate.map(|r| r > 0.0).unwrap_or(false)
            }
            Algorithm::SlidingWindow | Algorithm::FixedWindow => {
                self.max_requests.is_some()
                    && self.window_ms.map(|w| w > 0).unwrap_or(false)
            }
            Algorithm::None => true,
        }
    }
}

/// Process-wide fixed-window ceiling applied before any tier check.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GlobalLimit {
    pub max_requests: u64,
    pub window_ms: u64,
}

/// Rate-limiting configuration: the tier table, the fallback tier, and the
/// global ceiling.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSettings {
    pub tiers: HashMap<String, Tier>,
    pub default_tier: String,
    pub global_limit: GlobalLimit,
}

/// IP filter mode. In `allowlist` mode with a non-empty list only listed
/// addresses pass; in `blocklist` mode listed addresses are rejected.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum IpRuleMode {
    Allowlist,
    Blocklist,
}

/// IP allow/block rules. Empty lists are no-ops in either mode.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct IpRules {
    #[serde(default)]
    pub allowlist: HashSet<String>,
    #[serde(default)]
    pub blocklist: HashSet<String>,
    #[serde(default = "default_ip_mode")]
    pub mode: IpRuleMode,
}

fn default_ip_mode() -> IpRuleMode {
    IpRuleMode::Blocklist
}

impl Default for IpRules {
    fn default() -> Self {
        Self {
            allowlist: HashSet::new(),
            blocklist: HashSet::new(),
            mode: IpRuleMode::Blocklist,
        }
    }
}

/// JSONL access-log collaborator settings.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AccessLogSettings {
    /// Directory the rotated log files are written into.
    pub directory: String,
    /// Service name embedded in filenames and records.
    #[serde(default = "default_service_name")]
    pub service: String,
    /// Rotation threshold; a new file is opened past this many lines.
    #[serde(default = "default_max_lines")]
    pub max_lines_per_file: u64,
}

fn default_service_name() -> String {
    "tollgate".to_string()
}

fn default_max_lines() -> u64 {
    10_000
}

fn default_devices_path() -> String {
    "./data/devices.json".to_string()
}

/// Application configuration for the tollgate gateway.
///
/// Loaded from a JSON file at startup and validated before the server
/// binds. All admission state derived from it is in-memory and resets on
/// restart.
///
/// # Configuration File Format
///
/// ```json
/// {
///   "version": 1,
///   "rateLimits": {
///     "tiers": {
///       "free": { "algorithm": "tokenBucket", "maxRequests": 60, "refillRate": 1.0 },
///       "pro": { "algorithm": "slidingWindow", "maxRequests": 600, "windowMs": 60000 }
///     },
///     "defaultTier": "free",
///     "globalLimit": { "maxRequests": 5000, "windowMs": 60000 }
///   },
///   "ipRules": { "allowlist": [], "blocklist": [], "mode": "blocklist" },
///   "devicesPath": "./data/devices.json"
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Configuration schema version for compatibility checking.
    pub version: u8,

    /// Tier table, default tier, and global ceiling.
    pub rate_limits: RateLimitSettings,

    /// IP allow/block rules applied after authentication.
    #[serde(default)]
    pub ip_rules: IpRules,

    /// Path of the persisted device registry document.
    #[serde(default = "default_devices_path")]
    pub devices_path: String,

    /// Optional JSONL access-log collaborator; absent means no file logging.
    #[serde(default)]
    pub access_log: Option<AccessLogSettings>,
}

impl Settings {
    /// Validates the configuration, returning the first error encountered.
    ///
    /// The default tier must exist in the tier table and the global ceiling
    /// must be non-degenerate. Tiers with missing algorithm parameters are
    /// accepted here (the admission engine treats them as unlimited), but
    /// a warning is logged for each at engine construction.
    pub fn validate(&self) -> Result<(), String> {
        if !self
            .rate_limits
            .tiers
            .contains_key(&self.rate_limits.default_tier)
        {
            return Err(format!(
                "defaultTier '{}' is not present in the tier table",
                self.rate_limits.default_tier
            ));
        }

        if self.rate_limits.global_limit.max_requests == 0 {
            return Err("globalLimit.maxRequests must be greater than 0".to_string());
        }
        if self.rate_limits.global_limit.window_ms == 0 {
            return Err("globalLimit.windowMs must be greater than 0".to_string());
        }

        if self.devices_path.is_empty() {
            return Err("devicesPath cannot be empty".to_string());
        }

        Ok(())
    }
}
