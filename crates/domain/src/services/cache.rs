//! Short-lived read cache for the admin settings row.
//!
//! Every payment and provisioning call reads the settings; admin writes are
//! rare. A small TTL keeps reads off the database while guaranteeing an
//! update is visible within seconds even across processes. The saving path
//! invalidates explicitly so the writer always observes its own write.

use std::time::Duration;

use moka::sync::Cache;

use crate::model::AppSettings;

#[derive(Debug)]
pub struct SettingsCache {
    entry: Cache<(), AppSettings>,
}

impl SettingsCache {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

    pub fn new(ttl: Duration) -> Self {
        Self {
            entry: Cache::builder().time_to_live(ttl).max_capacity(1).build(),
        }
    }

    pub fn get(&self) -> Option<AppSettings> {
        self.entry.get(&())
    }

    pub fn store(&self, settings: AppSettings) {
        self.entry.insert((), settings);
    }

    pub fn invalidate(&self) {
        self.entry.invalidate(&());
    }
}

impl Default for SettingsCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}
