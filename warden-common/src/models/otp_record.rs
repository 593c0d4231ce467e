use diesel::{Insertable, Queryable};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

use crate::schema::otp_records;

#[derive(Clone, Debug, Serialize, Deserialize, Identifiable, Queryable)]
#[diesel(table_name = otp_records)]
pub struct OtpRecord {
    pub id: Uuid,
    pub user_email: String,
    pub code_hash: Vec<u8>,
    pub expires_at: SystemTime,
    pub attempts: i32,
    pub used_at: Option<SystemTime>,
    pub used_ip: Option<String>,
    pub resend_count: i32,
    pub created_at: SystemTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = otp_records)]
pub struct NewOtpRecord<'a> {
    pub id: Uuid,
    pub user_email: &'a str,
    pub code_hash: &'a [u8],
    pub expires_at: SystemTime,
    pub attempts: i32,
    pub resend_count: i32,
    pub created_at: SystemTime,
}
