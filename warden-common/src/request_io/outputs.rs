use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ServerErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts_left: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OutputGenericMessage {
    pub message: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OutputOtpChallenge {
    pub message: String,
    pub masked_email: String,
    pub expires_at: SystemTime,
    pub attempts_left: i32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OutputOtpStatus {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<SystemTime>,
    pub attempts_used: i32,
    pub attempts_left: i32,
    pub max_attempts: i32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OutputVerifySuccess {
    pub success: bool,
    pub redirect: String,
    pub reset_token: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OutputResetSuccess {
    pub success: bool,
    pub redirect: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OutputDevice {
    pub id: Uuid,
    pub device_name: Option<String>,
    pub ip_address: String,
    pub last_used_at: SystemTime,
    pub trust_expires_at: SystemTime,
    pub is_trusted: bool,
    pub is_revoked: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OutputDeviceList {
    pub devices: Vec<OutputDevice>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OutputDeviceStats {
    pub total: i64,
    pub trusted: i64,
    pub revoked: i64,
    pub expired: i64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OutputTrustDecision {
    pub trusted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub require_otp: bool,
}
