//! Process-wide tunables, following the `OnceLock` global-config pattern.

use std::sync::OnceLock;

static GLOBAL_CONFIG: OnceLock<Config> = OnceLock::new();

/// All of the "default N" values named throughout the identity, prekey, and
/// session modules, collected in one place instead of scattered literals.
#[derive(Debug, Clone)]
pub struct Config {
    /// Size of the one-time prekey pool a client tries to keep published.
    pub one_time_prekey_pool_size: usize,
    /// Republish one-time prekeys once the published count drops below this.
    pub one_time_prekey_replenish_threshold: usize,
    /// How often the signed prekey is rotated.
    pub signed_prekey_rotation_period_secs: u64,
    /// How long a just-rotated signed prekey is still accepted for incoming handshakes.
    pub signed_prekey_grace_period_secs: u64,
    /// Global cap on outstanding skipped message keys across all chains in a session.
    pub max_skip_total: usize,
    /// Per-DH-epoch cap on outstanding skipped message keys.
    pub max_skip_per_chain: usize,
    /// Broker outbound queue depth per authenticated user.
    pub relay_queue_capacity: usize,
    /// Idle time before the broker sends a ping.
    pub relay_ping_interval_secs: u64,
    /// Time since the last received frame before the broker closes a connection.
    pub relay_idle_timeout_secs: u64,
    /// Token bucket refill rate, messages per minute.
    pub relay_rate_limit_per_minute: u32,
    /// Token bucket burst capacity.
    pub relay_rate_limit_burst: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            one_time_prekey_pool_size: 100,
            one_time_prekey_replenish_threshold: 20,
            signed_prekey_rotation_period_secs: 7 * 24 * 60 * 60,
            signed_prekey_grace_period_secs: 7 * 24 * 60 * 60,
            max_skip_total: 1000,
            max_skip_per_chain: 200,
            relay_queue_capacity: 256,
            relay_ping_interval_secs: 54,
            relay_idle_timeout_secs: 60,
            relay_rate_limit_per_minute: 100,
            relay_rate_limit_burst: 20,
        }
    }
}

impl Config {
    /// Build a config from `Default`, then apply any recognized environment
    /// variable overrides.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_usize("SIGNET_ONE_TIME_PREKEY_POOL_SIZE") {
            cfg.one_time_prekey_pool_size = v;
        }
        if let Some(v) = env_usize("SIGNET_ONE_TIME_PREKEY_REPLENISH_THRESHOLD") {
            cfg.one_time_prekey_replenish_threshold = v;
        }
        if let Some(v) = env_u64("SIGNET_SIGNED_PREKEY_ROTATION_PERIOD_SECS") {
            cfg.signed_prekey_rotation_period_secs = v;
        }
        if let Some(v) = env_u64("SIGNET_SIGNED_PREKEY_GRACE_PERIOD_SECS") {
            cfg.signed_prekey_grace_period_secs = v;
        }
        if let Some(v) = env_usize("SIGNET_MAX_SKIP_TOTAL") {
            cfg.max_skip_total = v;
        }
        if let Some(v) = env_usize("SIGNET_MAX_SKIP_PER_CHAIN") {
            cfg.max_skip_per_chain = v;
        }
        if let Some(v) = env_usize("SIGNET_RELAY_QUEUE_CAPACITY") {
            cfg.relay_queue_capacity = v;
        }
        cfg
    }

    /// Initialize the process-global config. Idempotent: a second call is a no-op.
    pub fn init(cfg: Config) {
        let _ = GLOBAL_CONFIG.set(cfg);
    }

    /// Initialize the process-global config from the environment.
    pub fn init_from_env() {
        Self::init(Self::from_env());
    }

    /// Access the process-global config, initializing it from defaults on first use.
    pub fn global() -> &'static Config {
        GLOBAL_CONFIG.get_or_init(Config::default)
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok()?.parse().ok()
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.parse().ok()
}
