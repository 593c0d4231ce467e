use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct InputLogin {
    /// Email address or username of the account to reset.
    pub login: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct InputEmail {
    pub email: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct InputOtp {
    pub email: String,
    pub otp: String,
}

#[derive(Clone, Debug, Deserialize, ZeroizeOnDrop)]
pub struct InputNewPassword {
    pub password: String,
    pub password_confirmation: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct InputDeviceName {
    pub device_name: Option<String>,
}
