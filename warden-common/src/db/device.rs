use diesel::{dsl, ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::db::{DaoError, DbThreadPool};
use crate::models::saved_device::{NewSavedDevice, SavedDevice};
use crate::schema::saved_devices as saved_device_fields;
use crate::schema::saved_devices::dsl::saved_devices;

pub struct DeviceStats {
    pub total: i64,
    pub trusted: i64,
    pub revoked: i64,
    pub expired: i64,
}

pub struct Dao {
    db_thread_pool: DbThreadPool,
}

impl Dao {
    pub fn new(db_thread_pool: &DbThreadPool) -> Self {
        Self {
            db_thread_pool: db_thread_pool.clone(),
        }
    }

    pub fn get_device(
        &self,
        user_id: Uuid,
        device_fingerprint: &str,
    ) -> Result<Option<SavedDevice>, DaoError> {
        Ok(saved_devices
            .filter(saved_device_fields::user_id.eq(user_id))
            .filter(saved_device_fields::device_fingerprint.eq(device_fingerprint))
            .first::<SavedDevice>(&mut self.db_thread_pool.get()?)
            .optional()?)
    }

    /// Creates the trust record for a device's first trusted login, or
    /// re-trusts an existing record (clearing any revocation) when the same
    /// device returns after completing the OTP challenge.
    pub fn save_trusted_device(
        &self,
        user_id: Uuid,
        device_fingerprint: &str,
        ip_address: &str,
        device_name: Option<&str>,
        trust_lifetime: Duration,
    ) -> Result<SavedDevice, DaoError> {
        let now = SystemTime::now();

        let new_device = NewSavedDevice {
            id: Uuid::now_v7(),
            user_id,
            device_fingerprint,
            ip_address,
            device_name,
            last_used_at: now,
            trust_expires_at: now + trust_lifetime,
            created_at: now,
        };

        Ok(dsl::insert_into(saved_devices)
            .values(&new_device)
            .on_conflict((
                saved_device_fields::user_id,
                saved_device_fields::device_fingerprint,
            ))
            .do_update()
            .set((
                saved_device_fields::ip_address.eq(ip_address),
                saved_device_fields::last_used_at.eq(now),
                saved_device_fields::trust_expires_at.eq(now + trust_lifetime),
                saved_device_fields::revoked_at.eq(None::<SystemTime>),
            ))
            .get_result::<SavedDevice>(&mut self.db_thread_pool.get()?)?)
    }

    /// Sliding-window extension on every trusted use.
    pub fn refresh_trust(
        &self,
        device_id: Uuid,
        ip_address: &str,
        trust_lifetime: Duration,
    ) -> Result<(), DaoError> {
        let now = SystemTime::now();

        dsl::update(saved_devices.find(device_id))
            .set((
                saved_device_fields::ip_address.eq(ip_address),
                saved_device_fields::last_used_at.eq(now),
                saved_device_fields::trust_expires_at.eq(now + trust_lifetime),
            ))
            .execute(&mut self.db_thread_pool.get()?)?;

        Ok(())
    }

    pub fn list_devices(&self, user_id: Uuid) -> Result<Vec<SavedDevice>, DaoError> {
        Ok(saved_devices
            .filter(saved_device_fields::user_id.eq(user_id))
            .order(saved_device_fields::last_used_at.desc())
            .load::<SavedDevice>(&mut self.db_thread_pool.get()?)?)
    }

    pub fn revoke_device(&self, user_id: Uuid, device_id: Uuid) -> Result<(), DaoError> {
        let affected_row_count = dsl::update(
            saved_devices
                .find(device_id)
                .filter(saved_device_fields::user_id.eq(user_id))
                .filter(saved_device_fields::revoked_at.is_null()),
        )
        .set(saved_device_fields::revoked_at.eq(SystemTime::now()))
        .execute(&mut self.db_thread_pool.get()?)?;

        if affected_row_count == 0 {
            return Err(DaoError::QueryFailure(diesel::result::Error::NotFound));
        }

        Ok(())
    }

    pub fn get_device_stats(&self, user_id: Uuid) -> Result<DeviceStats, DaoError> {
        let now = SystemTime::now();
        let mut db_connection = self.db_thread_pool.get()?;

        let total = saved_devices
            .filter(saved_device_fields::user_id.eq(user_id))
            .count()
            .get_result::<i64>(&mut db_connection)?;

        let trusted = saved_devices
            .filter(saved_device_fields::user_id.eq(user_id))
            .filter(saved_device_fields::revoked_at.is_null())
            .filter(saved_device_fields::trust_expires_at.gt(now))
            .count()
            .get_result::<i64>(&mut db_connection)?;

        let revoked = saved_devices
            .filter(saved_device_fields::user_id.eq(user_id))
            .filter(saved_device_fields::revoked_at.is_not_null())
            .count()
            .get_result::<i64>(&mut db_connection)?;

        let expired = saved_devices
            .filter(saved_device_fields::user_id.eq(user_id))
            .filter(saved_device_fields::revoked_at.is_null())
            .filter(saved_device_fields::trust_expires_at.le(now))
            .count()
            .get_result::<i64>(&mut db_connection)?;

        Ok(DeviceStats {
            total,
            trusted,
            revoked,
            expired,
        })
    }

    /// Maintenance sweep. `evaluate` already refuses expired trust on read,
    /// so this can run on any schedule (or not at all) and concurrently
    /// with itself.
    pub fn revoke_expired_devices(&self) -> Result<usize, DaoError> {
        Ok(dsl::update(
            saved_devices
                .filter(saved_device_fields::revoked_at.is_null())
                .filter(saved_device_fields::trust_expires_at.lt(SystemTime::now())),
        )
        .set(saved_device_fields::revoked_at.eq(SystemTime::now()))
        .execute(&mut self.db_thread_pool.get()?)?)
    }
}
