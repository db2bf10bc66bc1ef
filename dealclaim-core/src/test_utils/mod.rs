// File: dealclaim-core/src/test_utils/mod.rs
//
// Shared fixtures for the integration tests and for `--store memory` runs.

pub mod helpers;

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;

use dealclaim_common::models::{Customer, Deal, Vendor};
use dealclaim_common::traits::Clock;

use crate::config::EngineConfig;
use crate::repositories::MemoryStore;
use crate::services::{ClaimEngine, Stores};
use crate::Error;

/// 32+ bytes, the minimum the rotating PIN deriver accepts.
pub const TEST_PIN_SECRET: &[u8] = b"dealclaim-test-secret-0123456789abcdef";

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    /// 2026-01-01T09:00:00Z, the start of a 30-minute PIN window.
    pub fn at_default_start() -> Self {
        Self::new(Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).single().unwrap_or_else(Utc::now))
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Engine defaults with a cheap PBKDF2 cost so tests stay fast.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        pbkdf2_iterations: 1_000,
        ..EngineConfig::default()
    }
}

pub fn test_deal(deal_id: i64, vendor_id: i64, discount_percent: i32) -> Deal {
    Deal {
        deal_id,
        vendor_id,
        title: format!("deal {deal_id}"),
        discount_percent,
        is_active: true,
        requires_activation: false,
        valid_until: None,
        max_redemptions: None,
        current_redemptions: 0,
        total_redemptions: 0,
    }
}

/// Vendor 1 with deals 7 (10%) and 42 (20%), and customers 100..=104.
pub fn seed_marketplace(store: &MemoryStore) {
    store.insert_vendor(Vendor {
        vendor_id: 1,
        name: "Corner Bakery".into(),
        total_redemptions: 0,
    });
    store.insert_deal(test_deal(7, 1, 10));
    store.insert_deal(test_deal(42, 1, 20));
    for user_id in 100..=104 {
        store.insert_customer(Customer {
            user_id,
            display_name: format!("customer {user_id}"),
            deals_claimed: 0,
        });
    }
}

/// An engine over a fresh, seeded [`MemoryStore`].
pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub engine: ClaimEngine,
}

impl TestHarness {
    pub fn new() -> Result<Self, Error> {
        Self::with_config(test_config())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self, Error> {
        let store = Arc::new(MemoryStore::new());
        seed_marketplace(&store);
        let clock = Arc::new(ManualClock::at_default_start());
        let engine = ClaimEngine::new(Stores::memory(store.clone()), &config, TEST_PIN_SECRET, clock.clone())?;
        Ok(Self { store, clock, engine })
    }
}
