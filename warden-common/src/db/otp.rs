use diesel::{dsl, ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::db::{DaoError, DbThreadPool};
use crate::models::otp_record::{NewOtpRecord, OtpRecord};
use crate::otp::{Otp, MAX_OTP_ATTEMPTS};
use crate::schema::otp_records as otp_record_fields;
use crate::schema::otp_records::dsl::otp_records;

/// Outcome of a single check-and-consume pass over the live passcode
/// record for an email.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OtpVerification {
    Success,
    Mismatch { attempts_left: i32 },
    Expired,
    AttemptsExhausted,
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

    /// Replaces every passcode record for `user_email` with a single fresh
    /// one. Deleting first guarantees that at most one live record per
    /// email exists at any time. The prior generation's resend count is
    /// carried forward so resends remain visible across reissues.
    pub fn save_otp(
        &self,
        user_email: &str,
        code_hash: &[u8],
        expiration: SystemTime,
    ) -> Result<OtpRecord, DaoError> {
        let mut db_connection = self.db_thread_pool.get()?;

        let record = db_connection
            .build_transaction()
            .run::<_, diesel::result::Error, _>(|conn| {
                let prior_resend_count = otp_records
                    .filter(otp_record_fields::user_email.eq(user_email))
                    .select(dsl::max(otp_record_fields::resend_count))
                    .first::<Option<i32>>(conn)?;

                diesel::delete(otp_records.filter(otp_record_fields::user_email.eq(user_email)))
                    .execute(conn)?;

                let new_record = NewOtpRecord {
                    id: Uuid::now_v7(),
                    user_email,
                    code_hash,
                    expires_at: expiration,
                    attempts: 0,
                    resend_count: prior_resend_count.map_or(0, |c| c + 1),
                    created_at: SystemTime::now(),
                };

                dsl::insert_into(otp_records)
                    .values(&new_record)
                    .get_result::<OtpRecord>(conn)
            })?;

        Ok(record)
    }

    /// The atomic verification transaction. The live record is selected
    /// `FOR UPDATE` so concurrent submissions for the same email are
    /// serialized; at most one of them can ever observe `Success`. This is
    /// the only place `attempts`, `used_at`, and `used_ip` are written.
    pub fn verify_and_consume(
        &self,
        user_email: &str,
        submitted_digest: &[u8],
        ip: &str,
    ) -> Result<OtpVerification, DaoError> {
        let now = SystemTime::now();
        let mut db_connection = self.db_thread_pool.get()?;

        let verification = db_connection
            .build_transaction()
            .run::<_, diesel::result::Error, _>(|conn| {
                let record = otp_records
                    .filter(otp_record_fields::user_email.eq(user_email))
                    .filter(otp_record_fields::used_at.is_null())
                    .filter(otp_record_fields::expires_at.gt(now))
                    .order(otp_record_fields::created_at.desc())
                    .for_update()
                    .first::<OtpRecord>(conn)
                    .optional()?;

                let Some(record) = record else {
                    return Ok(OtpVerification::Expired);
                };

                if record.attempts >= MAX_OTP_ATTEMPTS {
                    return Ok(OtpVerification::AttemptsExhausted);
                }

                if !Otp::digests_are_equal(submitted_digest, &record.code_hash) {
                    let attempts = record.attempts + 1;

                    dsl::update(otp_records.find(record.id))
                        .set(otp_record_fields::attempts.eq(attempts))
                        .execute(conn)?;

                    return Ok(OtpVerification::Mismatch {
                        attempts_left: (MAX_OTP_ATTEMPTS - attempts).max(0),
                    });
                }

                dsl::update(otp_records.find(record.id))
                    .set((
                        otp_record_fields::used_at.eq(now),
                        otp_record_fields::used_ip.eq(ip),
                    ))
                    .execute(conn)?;

                Ok(OtpVerification::Success)
            })?;

        Ok(verification)
    }

    /// Consumes the record a successful verification left behind and clears
    /// any other remnants for the email. Returns whether a recently
    /// verified record was actually found; a repeated call finds nothing.
    pub fn consume_verified_otp(
        &self,
        user_email: &str,
        verified_within: Duration,
    ) -> Result<bool, DaoError> {
        let cutoff = SystemTime::now() - verified_within;
        let mut db_connection = self.db_thread_pool.get()?;

        let consumed = db_connection
            .build_transaction()
            .run::<_, diesel::result::Error, _>(|conn| {
                let consumed = diesel::delete(
                    otp_records
                        .filter(otp_record_fields::user_email.eq(user_email))
                        .filter(otp_record_fields::used_at.gt(cutoff)),
                )
                .execute(conn)?;

                diesel::delete(otp_records.filter(otp_record_fields::user_email.eq(user_email)))
                    .execute(conn)?;

                Ok(consumed > 0)
            })?;

        Ok(consumed)
    }

    pub fn get_live_otp_record(&self, user_email: &str) -> Result<Option<OtpRecord>, DaoError> {
        Ok(otp_records
            .filter(otp_record_fields::user_email.eq(user_email))
            .filter(otp_record_fields::used_at.is_null())
            .filter(otp_record_fields::expires_at.gt(SystemTime::now()))
            .order(otp_record_fields::created_at.desc())
            .first::<OtpRecord>(&mut self.db_thread_pool.get()?)
            .optional()?)
    }

    /// Rollback primitive for failed delivery. A record must never outlive
    /// a send that did not happen.
    pub fn delete_otp_for_email(&self, user_email: &str) -> Result<(), DaoError> {
        diesel::delete(otp_records.filter(otp_record_fields::user_email.eq(user_email)))
            .execute(&mut self.db_thread_pool.get()?)?;

        Ok(())
    }

    pub fn delete_all_expired_otps(&self) -> Result<usize, DaoError> {
        Ok(diesel::delete(
            otp_records.filter(otp_record_fields::expires_at.lt(SystemTime::now())),
        )
        .execute(&mut self.db_thread_pool.get()?)?)
    }
}
