use warden_common::db::device::Dao as DeviceDao;
use warden_common::db::DbThreadPool;

use async_trait::async_trait;

use crate::jobs::{Job, JobError};

/// Marks devices whose trust window has lapsed as revoked. The trust
/// evaluator already refuses expired trust on read, so skipping or
/// repeating a run is harmless.
pub struct RevokeExpiredDevicesJob {
    db_thread_pool: DbThreadPool,
    is_running: bool,
}

impl RevokeExpiredDevicesJob {
    pub fn new(db_thread_pool: DbThreadPool) -> Self {
        Self {
            db_thread_pool,
            is_running: false,
        }
    }
}

#[async_trait]
impl Job for RevokeExpiredDevicesJob {
    fn name(&self) -> &'static str {
        "Revoke Expired Devices"
    }

    fn is_ready(&self) -> bool {
        !self.is_running
    }

    async fn execute(&mut self) -> Result<(), JobError> {
        self.is_running = true;

        let dao = DeviceDao::new(&self.db_thread_pool);
        let revoked_count = tokio::task::spawn_blocking(move || dao.revoke_expired_devices())
            .await??;

        if revoked_count > 0 {
            log::info!("Revoked {revoked_count} expired device(s)");
        }

        self.is_running = false;
        Ok(())
    }
}
