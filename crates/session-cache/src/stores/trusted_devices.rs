//! Devices allowed to skip the second factor.

use std::sync::Arc;

use chrono::Utc;

use super::collection::{CollectionConfig, KeyedCollectionRepository};
use super::kv::KeyValueStore;
use crate::error::Result;
use crate::keys;
use crate::models::TrustedDevice;

fn device_id(device: &TrustedDevice) -> &str {
    &device.device_id
}

fn last_active(device: &TrustedDevice) -> i64 {
    device.last_active().timestamp_millis()
}

#[derive(Clone)]
pub struct TrustedDeviceRepository {
    devices: KeyedCollectionRepository<TrustedDevice>,
}

impl TrustedDeviceRepository {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl_secs: u64, max_per_user: usize) -> Self {
        let config = CollectionConfig {
            base_prefix: keys::TRUSTED_DEVICE_PREFIX.to_string(),
            max_items_per_user: max_per_user,
            ttl_secs,
        };
        Self {
            devices: KeyedCollectionRepository::new(store, config, device_id, last_active),
        }
    }

    /// Trust (or re-trust) a device, restarting its TTL.
    pub async fn trust(&self, device: &TrustedDevice) -> Result<()> {
        self.devices.save(&device.user_id, device).await
    }

    pub async fn is_trusted(&self, user_id: &str, device_id: &str) -> Result<bool> {
        self.devices.validate(user_id, device_id).await
    }

    pub async fn find(&self, user_id: &str, device_id: &str) -> Result<Option<TrustedDevice>> {
        self.devices.find_one(user_id, device_id).await
    }

    /// Record a login from a trusted device.
    pub async fn touch(&self, user_id: &str, device_id: &str) -> Result<bool> {
        let Some(mut device) = self.devices.find_one(user_id, device_id).await? else {
            return Ok(false);
        };
        device.last_active_at = Some(Utc::now());
        self.devices.save(user_id, &device).await?;
        Ok(true)
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<TrustedDevice>> {
        self.devices.find_all_by_user(user_id).await
    }

    pub async fn forget(&self, user_id: &str, device_id: &str) -> Result<bool> {
        self.devices.delete(user_id, device_id).await
    }

    /// Used on password change.
    pub async fn forget_all(&self, user_id: &str) -> Result<usize> {
        self.devices.delete_all_for_user(user_id).await
    }
}
