use diesel::{dsl, ExpressionMethods, QueryDsl, RunQueryDsl};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::db::{DaoError, DbThreadPool};
use crate::models::session::NewSession;
use crate::schema::sessions as session_fields;
use crate::schema::sessions::dsl::sessions;

pub struct Dao {
    db_thread_pool: DbThreadPool,
}

impl Dao {
    pub fn new(db_thread_pool: &DbThreadPool) -> Self {
        Self {
            db_thread_pool: db_thread_pool.clone(),
        }
    }

    pub fn create_session(&self, user_id: Uuid, lifetime: Duration) -> Result<Uuid, DaoError> {
        let now = SystemTime::now();

        let new_session = NewSession {
            id: Uuid::now_v7(),
            user_id,
            created_at: now,
            expires_at: now + lifetime,
        };

        dsl::insert_into(sessions)
            .values(&new_session)
            .execute(&mut self.db_thread_pool.get()?)?;

        Ok(new_session.id)
    }

    pub fn session_is_live(&self, session_id: Uuid) -> Result<bool, DaoError> {
        Ok(dsl::select(dsl::exists(
            sessions
                .find(session_id)
                .filter(session_fields::expires_at.gt(SystemTime::now())),
        ))
        .get_result(&mut self.db_thread_pool.get()?)?)
    }

    /// Forces re-authentication everywhere after a credential rotation.
    pub fn delete_all_sessions_for_user(&self, user_id: Uuid) -> Result<usize, DaoError> {
        Ok(
            diesel::delete(sessions.filter(session_fields::user_id.eq(user_id)))
                .execute(&mut self.db_thread_pool.get()?)?,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::db::test_utils;

    #[test]
    fn test_delete_all_sessions_for_user() {
        let dao = Dao::new(&test_utils::DB_THREAD_POOL);
        let user_id = test_utils::insert_user(&test_utils::unique_email(), "hash");
        let other_user_id = test_utils::insert_user(&test_utils::unique_email(), "hash");

        let session1 = dao
            .create_session(user_id, Duration::from_secs(3600))
            .unwrap();
        let session2 = dao
            .create_session(user_id, Duration::from_secs(3600))
            .unwrap();
        let other_session = dao
            .create_session(other_user_id, Duration::from_secs(3600))
            .unwrap();

        assert!(dao.session_is_live(session1).unwrap());
        assert!(dao.session_is_live(session2).unwrap());

        let deleted_count = dao.delete_all_sessions_for_user(user_id).unwrap();
        assert_eq!(deleted_count, 2);

        assert!(!dao.session_is_live(session1).unwrap());
        assert!(!dao.session_is_live(session2).unwrap());
        assert!(dao.session_is_live(other_session).unwrap());
    }

    #[test]
    fn test_expired_session_is_not_live() {
        let dao = Dao::new(&test_utils::DB_THREAD_POOL);
        let user_id = test_utils::insert_user(&test_utils::unique_email(), "hash");

        let session_id = dao.create_session(user_id, Duration::ZERO).unwrap();
        assert!(!dao.session_is_live(session_id).unwrap());
    }
}
