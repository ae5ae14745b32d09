//! Cache configuration.
//!
//! Controls expiration defaults, the metadata mirror and the sweep cadence
//! via the `[cache]` table.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_ABSOLUTE_MINUTES: u32 = 60;
const DEFAULT_SLIDING_MINUTES: u32 = 20;
const DEFAULT_SWEEP_INTERVAL_MINUTES: u64 = 30;
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
const DEFAULT_MEMORY_MAX_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Absolute lifetime applied when a policy sets none. Zero disables it.
    pub default_absolute_minutes: u32,
    /// Sliding lifetime applied when a policy sets none. Zero disables it.
    pub default_sliding_minutes: u32,
    /// Minutes between metadata sweeps.
    pub sweep_interval_minutes: u64,
    /// Responses with larger bodies are passed through uncached.
    pub max_body_bytes: usize,
    /// Entry limit of the in-process store. Least recently used entries go first.
    pub memory_max_entries: usize,
    /// Mirror cache writes and hits into the metadata table.
    pub track_metadata: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_absolute_minutes: DEFAULT_ABSOLUTE_MINUTES,
            default_sliding_minutes: DEFAULT_SLIDING_MINUTES,
            sweep_interval_minutes: DEFAULT_SWEEP_INTERVAL_MINUTES,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            memory_max_entries: DEFAULT_MEMORY_MAX_ENTRIES,
            track_metadata: true,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            default_absolute_minutes: settings.default_absolute_minutes,
            default_sliding_minutes: settings.default_sliding_minutes,
            sweep_interval_minutes: settings.sweep_interval_minutes.get(),
            max_body_bytes: settings.max_body_bytes.get(),
            memory_max_entries: settings.memory_max_entries.get(),
            track_metadata: settings.track_metadata,
        }
    }
}

impl CacheConfig {
    /// Sweep interval, clamped to at least one minute.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_minutes.max(1).saturating_mul(60))
    }

    /// Returns the in-process entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_max_entries).unwrap_or(NonZeroUsize::MIN)
    }
}
