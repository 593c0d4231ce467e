use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::token::{sign_claims_json, Expiring, HmacSha256Verifier, Token};

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum AuthTokenType {
    Access,
    PasswordReset,
    OtpVerified,
}

/// Claims carried by every Warden token. For the password-reset flow these
/// are the entire reset "session": the pending account, its email, and
/// (via the token type) whether the OTP step has been passed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthTokenClaims {
    pub user_id: Uuid,
    pub user_email: String,
    pub expiration: u64,
    pub token_type: AuthTokenType,
}

impl Expiring for AuthTokenClaims {
    fn expiration(&self) -> u64 {
        self.expiration
    }
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct NewAuthTokenClaims<'a> {
    pub user_id: Uuid,
    pub user_email: &'a str,
    pub expiration: u64,
    pub token_type: AuthTokenType,
}

pub struct AuthToken {}

impl AuthToken {
    pub fn sign_new(claims: NewAuthTokenClaims, signing_key: &[u8; 64]) -> String {
        let json_of_claims =
            serde_json::to_vec(&claims).expect("Failed to transform claims into JSON");
        sign_claims_json(json_of_claims, signing_key)
    }
}

impl Token for AuthToken {
    type Claims = AuthTokenClaims;
    type Verifier = HmacSha256Verifier;

    fn token_name() -> &'static str {
        "AuthToken"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    #[test]
    fn test_sign_and_verify() {
        let user_id = Uuid::now_v7();
        let user_email = "test1234@example.com";
        let exp = (SystemTime::now() + Duration::from_secs(10))
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let signing_key = [9; 64];

        let claims = NewAuthTokenClaims {
            user_id,
            user_email,
            expiration: exp,
            token_type: AuthTokenType::PasswordReset,
        };

        let token = AuthToken::sign_new(claims, &signing_key);
        let decoded = AuthToken::decode(&token).unwrap();
        let verified = decoded.verify(&signing_key).unwrap();

        assert_eq!(verified.user_id, user_id);
        assert_eq!(verified.user_email, user_email);
        assert_eq!(verified.token_type, AuthTokenType::PasswordReset);
    }

    #[test]
    fn test_expired_token_fails() {
        let exp = (SystemTime::now() - Duration::from_secs(10))
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let signing_key = [9; 64];

        let claims = NewAuthTokenClaims {
            user_id: Uuid::now_v7(),
            user_email: "test1234@example.com",
            expiration: exp,
            token_type: AuthTokenType::OtpVerified,
        };

        let token = AuthToken::sign_new(claims, &signing_key);
        assert!(AuthToken::decode(&token)
            .unwrap()
            .verify(&signing_key)
            .is_err());
    }
}
