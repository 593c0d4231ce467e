use diesel::{dsl, ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl};
use std::time::{Duration, SystemTime};

use crate::db::{DaoError, DbThreadPool};
use crate::models::throttleable_attempt::NewThrottleableAttempt;
use crate::schema::throttleable_attempts as throttleable_attempt_fields;
use crate::schema::throttleable_attempts::dsl::throttleable_attempts;

/// The Counter Store: an atomically incrementable keyed counter with
/// per-key expiry. The increment and the window reset happen inside one
/// transaction so concurrent callers observe consistent counts.
pub struct Dao {
    db_thread_pool: DbThreadPool,
}

impl Dao {
    pub fn new(db_thread_pool: &DbThreadPool) -> Self {
        Self {
            db_thread_pool: db_thread_pool.clone(),
        }
    }

    pub fn mark_attempt_and_get_attempt_count(
        &self,
        identifier_hash: i64,
        expiration: SystemTime,
    ) -> Result<i32, DaoError> {
        let new_attempt = NewThrottleableAttempt {
            identifier_hash,
            attempt_count: 1,
            expiration_timestamp: expiration,
        };

        let mut db_connection = self.db_thread_pool.get()?;

        let attempt_count = db_connection
            .build_transaction()
            .run::<_, diesel::result::Error, _>(|conn| {
                let (attempt_count, curr_expiration) = dsl::insert_into(throttleable_attempts)
                    .values(&new_attempt)
                    .on_conflict(throttleable_attempt_fields::identifier_hash)
                    .do_update()
                    .set(
                        throttleable_attempt_fields::attempt_count
                            .eq(throttleable_attempt_fields::attempt_count + 1),
                    )
                    .returning((
                        throttleable_attempt_fields::attempt_count,
                        throttleable_attempt_fields::expiration_timestamp,
                    ))
                    .get_result::<(i32, SystemTime)>(conn)?;

                if curr_expiration < SystemTime::now() {
                    dsl::update(throttleable_attempts.find(identifier_hash))
                        .set((
                            throttleable_attempt_fields::attempt_count.eq(1),
                            throttleable_attempt_fields::expiration_timestamp.eq(expiration),
                        ))
                        .execute(conn)?;

                    return Ok(1);
                }

                Ok(attempt_count)
            })?;

        Ok(attempt_count)
    }

    /// Time until the window for this key lapses; used to tell callers how
    /// long to wait before retrying.
    pub fn time_remaining(&self, identifier_hash: i64) -> Result<Duration, DaoError> {
        let expiration = throttleable_attempts
            .find(identifier_hash)
            .select(throttleable_attempt_fields::expiration_timestamp)
            .get_result::<SystemTime>(&mut self.db_thread_pool.get()?)
            .optional()?;

        Ok(expiration
            .and_then(|e| e.duration_since(SystemTime::now()).ok())
            .unwrap_or(Duration::ZERO))
    }

    pub fn clear_expired_attempts(&self) -> Result<usize, DaoError> {
        Ok(diesel::delete(
            throttleable_attempts
                .filter(throttleable_attempt_fields::expiration_timestamp.lt(SystemTime::now())),
        )
        .execute(&mut self.db_thread_pool.get()?)?)
    }
}
