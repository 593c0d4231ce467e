use warden_common::db::throttle::Dao as ThrottleDao;
use warden_common::db::DbThreadPool;

use async_trait::async_trait;

use crate::jobs::{Job, JobError};

pub struct ClearThrottleTableJob {
    db_thread_pool: DbThreadPool,
    is_running: bool,
}

impl ClearThrottleTableJob {
    pub fn new(db_thread_pool: DbThreadPool) -> Self {
        Self {
            db_thread_pool,
            is_running: false,
        }
    }
}

#[async_trait]
impl Job for ClearThrottleTableJob {
    fn name(&self) -> &'static str {
        "Clear Throttle Table"
    }

    fn is_ready(&self) -> bool {
        !self.is_running
    }

    async fn execute(&mut self) -> Result<(), JobError> {
        self.is_running = true;

        let dao = ThrottleDao::new(&self.db_thread_pool);
        tokio::task::spawn_blocking(move || dao.clear_expired_attempts()).await??;

        self.is_running = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::{Duration, SystemTime};
    use warden_common::schema::throttleable_attempts;

    use diesel::{QueryDsl, RunQueryDsl};
    use rand::Rng;

    use crate::env;

    #[tokio::test]
    async fn test_execute() {
        let dao = ThrottleDao::new(&env::testing::DB_THREAD_POOL);

        let expired_key = rand::thread_rng().gen::<i64>();
        let live_key = rand::thread_rng().gen::<i64>();

        dao.mark_attempt_and_get_attempt_count(
            expired_key,
            SystemTime::now() - Duration::from_nanos(1),
        )
        .unwrap();
        dao.mark_attempt_and_get_attempt_count(
            live_key,
            SystemTime::now() + Duration::from_secs(600),
        )
        .unwrap();

        let mut job = ClearThrottleTableJob::new(env::testing::DB_THREAD_POOL.clone());
        job.execute().await.unwrap();

        let expired_count = throttleable_attempts::table
            .find(expired_key)
            .execute(&mut env::testing::DB_THREAD_POOL.get().unwrap())
            .unwrap();
        assert_eq!(expired_count, 0);

        let live_count = throttleable_attempts::table
            .find(live_key)
            .execute(&mut env::testing::DB_THREAD_POOL.get().unwrap())
            .unwrap();
        assert_eq!(live_count, 1);
    }
}
