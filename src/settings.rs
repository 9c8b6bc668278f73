//! Settings cache - in-memory copy of the persisted business settings
//!
//! Reports read the low-stock threshold on every request; the cache avoids
//! a round trip and is refreshed whenever settings are written.

use crate::db::Settings;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::info;

pub struct SettingsCache {
    settings: RwLock<Settings>,
}

impl SettingsCache {
    pub fn new(settings: Settings) -> Self {
        info!(
            "SettingsCache initialized: business={}, currency={}, low_stock_threshold={}",
            settings.business_name, settings.currency, settings.low_stock_threshold
        );

        Self {
            settings: RwLock::new(settings),
        }
    }

    /// Replace the cached copy after a successful write
    pub fn replace(&self, settings: Settings) {
        let mut current = self.settings.write();
        if current.low_stock_threshold != settings.low_stock_threshold {
            info!(
                "Low stock threshold changed {} -> {}",
                current.low_stock_threshold, settings.low_stock_threshold
            );
        }
        *current = settings;
    }

    pub fn get(&self) -> Settings {
        self.settings.read().clone()
    }

    pub fn low_stock_threshold(&self) -> Decimal {
        self.settings.read().low_stock_threshold
    }
}
