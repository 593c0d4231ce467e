use diesel::{Insertable, Queryable};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

use crate::schema::saved_devices;

#[derive(Clone, Debug, Serialize, Deserialize, Identifiable, Queryable)]
#[diesel(table_name = saved_devices)]
pub struct SavedDevice {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_fingerprint: String,
    pub ip_address: String,
    pub device_name: Option<String>,
    pub last_used_at: SystemTime,
    pub trust_expires_at: SystemTime,
    pub revoked_at: Option<SystemTime>,
    pub created_at: SystemTime,
}

impl SavedDevice {
    pub fn is_trust_valid(&self, now: SystemTime) -> bool {
        self.revoked_at.is_none() && self.trust_expires_at > now
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = saved_devices)]
pub struct NewSavedDevice<'a> {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_fingerprint: &'a str,
    pub ip_address: &'a str,
    pub device_name: Option<&'a str>,
    pub last_used_at: SystemTime,
    pub trust_expires_at: SystemTime,
    pub created_at: SystemTime,
}
