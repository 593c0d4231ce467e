use warden_common::db::{self, DbThreadPool};

use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpRequest};
use futures::future;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::Wrapping;
use std::time::{Duration, SystemTime};

use crate::handlers::error::HttpErrorResponse;

/// Hashes an `(identifier, window name)` pair into the Counter Store's key
/// space. Reinterpreting the u64 hash as an i64 is safe and does not affect
/// the uniqueness of the hash value (Postgres supports i64s but not u64s).
pub fn window_key<T: Hash>(identifier: &T, window_name: &'static str) -> i64 {
    let mut hasher = DefaultHasher::new();
    identifier.hash(&mut hasher);
    let identifier_hash = Wrapping(hasher.finish());

    let mut hasher = DefaultHasher::new();
    window_name.hash(&mut hasher);
    let name_hash = Wrapping(hasher.finish());

    let combined_hash = (identifier_hash << 1) + identifier_hash + name_hash;

    unsafe { std::mem::transmute::<_, i64>(combined_hash.0) }
}

/// A named rate-limit window over the Counter Store. The counter is
/// incremented whether or not the guarded operation subsequently succeeds;
/// exceeding TRIES within SECS rejects with the remaining window duration.
pub struct Throttle<const TRIES: i32, const SECS: u64> {}

impl<const TRIES: i32, const SECS: u64> Throttle<TRIES, SECS> {
    pub async fn enforce<T: Hash>(
        &self,
        identifier: &T,
        window_name: &'static str,
        db_thread_pool: &DbThreadPool,
    ) -> Result<(), HttpErrorResponse> {
        let key = window_key(identifier, window_name);
        let dao = db::throttle::Dao::new(db_thread_pool);

        let attempt_count = match web::block(move || {
            let expiration_time = SystemTime::now() + Duration::from_secs(SECS);
            dao.mark_attempt_and_get_attempt_count(key, expiration_time)
        })
        .await?
        {
            Ok(a) => a,
            Err(e) => {
                log::error!("{e}");
                return Err(HttpErrorResponse::InternalError(String::from(
                    "Failed to check attempt count",
                )));
            }
        };

        if attempt_count > TRIES {
            let dao = db::throttle::Dao::new(db_thread_pool);
            let time_remaining = match web::block(move || dao.time_remaining(key)).await? {
                Ok(t) => t,
                Err(e) => {
                    log::error!("{e}");
                    Duration::from_secs(SECS)
                }
            };

            return Err(HttpErrorResponse::TooManyAttempts(
                String::from("Too many recent attempts"),
                time_remaining.as_secs().max(1),
            ));
        }

        Ok(())
    }
}

impl<const TRIES: i32, const SECS: u64> FromRequest for Throttle<TRIES, SECS> {
    type Error = actix_web::error::Error;
    type Future = future::Ready<Result<Self, Self::Error>>;

    fn from_request(_req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        future::ok(Self {})
    }
}

#[cfg(test)]
mod tests {
    use crate::env;

    use super::*;

    use actix_web::dev::Payload;
    use actix_web::test::TestRequest;
    use diesel::{dsl, ExpressionMethods, QueryDsl, RunQueryDsl};
    use uuid::Uuid;
    use warden_common::schema::throttleable_attempts;

    #[actix_web::test]
    async fn test_throttle_works() {
        const TEST_WINDOW: &str = "test";
        const EXP_SECS: u64 = 60;

        let req = TestRequest::default().to_http_request();
        let throttle = Throttle::<3, EXP_SECS>::from_request(&req, &mut Payload::None)
            .await
            .unwrap();

        let db = &env::testing::DB_THREAD_POOL;
        let ident = Uuid::now_v7();

        assert!(throttle.enforce(&ident, TEST_WINDOW, db).await.is_ok());
        assert!(throttle.enforce(&ident, TEST_WINDOW, db).await.is_ok());
        assert!(throttle.enforce(&ident, TEST_WINDOW, db).await.is_ok());

        let rejection = throttle.enforce(&ident, TEST_WINDOW, db).await.unwrap_err();
        assert!(matches!(
            rejection,
            HttpErrorResponse::TooManyAttempts(_, secs) if secs > 0 && secs <= EXP_SECS
        ));

        // Lapse the window manually; the counter must reset
        dsl::update(throttleable_attempts::table.find(window_key(&ident, TEST_WINDOW)))
            .set(throttleable_attempts::expiration_timestamp.eq(SystemTime::now()))
            .execute(&mut db.get().unwrap())
            .unwrap();

        assert!(throttle.enforce(&ident, TEST_WINDOW, db).await.is_ok());
        assert!(throttle.enforce(&ident, TEST_WINDOW, db).await.is_ok());
        assert!(throttle.enforce(&ident, TEST_WINDOW, db).await.is_ok());
        assert!(throttle.enforce(&ident, TEST_WINDOW, db).await.is_err());
    }
}
