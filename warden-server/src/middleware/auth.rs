use warden_common::token::auth_token::{AuthToken, AuthTokenClaims, AuthTokenType};
use warden_common::token::{DecodedToken, Token, TokenError};

use actix_web::dev::Payload;
use actix_web::{FromRequest, HttpRequest};
use futures::future;
use std::marker::PhantomData;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::env;
use crate::handlers::error::HttpErrorResponse;
use crate::middleware::{into_actix_error_res, TokenLocation};

pub trait RequestAuthTokenType {
    fn token_name() -> &'static str;
    fn token_type() -> AuthTokenType;
}

/// Issued by the login collaborator for an authenticated user; accepted on
/// the device-management endpoints.
pub struct Access {}

/// The post-OTP-verification reset context. Possession of a valid token of
/// this type is what authorizes the final password change.
pub struct OtpVerified {}

impl RequestAuthTokenType for Access {
    fn token_name() -> &'static str {
        "AccessToken"
    }
    fn token_type() -> AuthTokenType {
        AuthTokenType::Access
    }
}

impl RequestAuthTokenType for OtpVerified {
    fn token_name() -> &'static str {
        "ResetToken"
    }
    fn token_type() -> AuthTokenType {
        AuthTokenType::OtpVerified
    }
}

type AuthDecodedToken = DecodedToken<<AuthToken as Token>::Claims, <AuthToken as Token>::Verifier>;

pub struct UnverifiedToken<T: RequestAuthTokenType, L: TokenLocation>(
    pub AuthDecodedToken,
    PhantomData<(T, L)>,
);

impl<T, L> UnverifiedToken<T, L>
where
    T: RequestAuthTokenType,
    L: TokenLocation,
{
    pub fn verify(&self) -> Result<AuthTokenClaims, TokenError> {
        verify_token(&self.0, T::token_type())
    }
}

impl<T, L> FromRequest for UnverifiedToken<T, L>
where
    T: RequestAuthTokenType,
    L: TokenLocation,
{
    type Error = HttpErrorResponse;
    type Future = future::Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        match into_actix_error_res(get_and_decode_token::<T, L>(req)) {
            Ok(t) => future::ok(UnverifiedToken(t, PhantomData)),
            Err(e) => future::err(e),
        }
    }
}

pub struct VerifiedToken<T: RequestAuthTokenType, L: TokenLocation>(
    pub AuthTokenClaims,
    PhantomData<(T, L)>,
);

impl<T, L> FromRequest for VerifiedToken<T, L>
where
    T: RequestAuthTokenType,
    L: TokenLocation,
{
    type Error = HttpErrorResponse;
    type Future = future::Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let decoded_token = match into_actix_error_res(get_and_decode_token::<T, L>(req)) {
            Ok(t) => t,
            Err(e) => return future::err(e),
        };

        let claims = match into_actix_error_res(verify_token(&decoded_token, T::token_type())) {
            Ok(c) => c,
            Err(e) => return future::err(e),
        };

        future::ok(VerifiedToken(claims, PhantomData))
    }
}

#[inline]
fn get_and_decode_token<T, L>(req: &HttpRequest) -> Result<AuthDecodedToken, TokenError>
where
    T: RequestAuthTokenType,
    L: TokenLocation,
{
    let token = match L::get_from_request(req, T::token_name()) {
        Some(t) => t,
        None => return Err(TokenError::TokenMissing),
    };

    AuthToken::decode(token)
}

#[inline]
fn verify_token(
    decoded_token: &AuthDecodedToken,
    expected_type: AuthTokenType,
) -> Result<AuthTokenClaims, TokenError> {
    let claims = decoded_token.verify(&env::CONF.token_signing_key)?;

    if claims.token_type != expected_type {
        return Err(TokenError::WrongTokenType);
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Failed to fetch system time")
        .as_secs();

    if claims.expiration <= now {
        return Err(TokenError::TokenExpired);
    }

    Ok(claims.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    use actix_web::dev::Payload;
    use actix_web::test::TestRequest;
    use std::time::Duration;
    use uuid::Uuid;

    use warden_common::token::auth_token::NewAuthTokenClaims;

    use crate::middleware::{FromHeader, FromQuery};

    fn sign_token(token_type: AuthTokenType, expiration_offset_secs: i64) -> String {
        let expiration = if expiration_offset_secs >= 0 {
            SystemTime::now() + Duration::from_secs(expiration_offset_secs as u64)
        } else {
            SystemTime::now() - Duration::from_secs((-expiration_offset_secs) as u64)
        };

        let claims = NewAuthTokenClaims {
            user_id: Uuid::now_v7(),
            user_email: "test1234@example.com",
            expiration: expiration
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_secs(),
            token_type,
        };

        AuthToken::sign_new(claims, &env::CONF.token_signing_key)
    }

    #[actix_web::test]
    async fn test_verified_from_header() {
        let token = sign_token(AuthTokenType::Access, 10);

        let req = TestRequest::default()
            .insert_header(("AccessToken", token.as_str()))
            .to_http_request();

        assert!(
            VerifiedToken::<Access, FromHeader>::from_request(&req, &mut Payload::None)
                .await
                .is_ok()
        );
        assert!(
            VerifiedToken::<OtpVerified, FromHeader>::from_request(&req, &mut Payload::None)
                .await
                .is_err()
        );

        // Wrong token type under the right header name
        let token = sign_token(AuthTokenType::OtpVerified, 10);
        let req = TestRequest::default()
            .insert_header(("AccessToken", token.as_str()))
            .to_http_request();

        assert!(
            VerifiedToken::<Access, FromHeader>::from_request(&req, &mut Payload::None)
                .await
                .is_err()
        );

        // Expired
        let token = sign_token(AuthTokenType::Access, -10);
        let req = TestRequest::default()
            .insert_header(("AccessToken", token.as_str()))
            .to_http_request();

        assert!(
            VerifiedToken::<Access, FromHeader>::from_request(&req, &mut Payload::None)
                .await
                .is_err()
        );

        // Missing
        let req = TestRequest::default().to_http_request();

        assert!(
            VerifiedToken::<Access, FromHeader>::from_request(&req, &mut Payload::None)
                .await
                .is_err()
        );
    }

    #[actix_web::test]
    async fn test_unverified_from_query() {
        let token = sign_token(AuthTokenType::OtpVerified, 10);

        let req = TestRequest::default()
            .uri(&format!("/test?ResetToken={}", &token))
            .to_http_request();

        let unverified =
            UnverifiedToken::<OtpVerified, FromQuery>::from_request(&req, &mut Payload::None)
                .await
                .unwrap();
        assert!(unverified.verify().is_ok());

        assert!(
            UnverifiedToken::<OtpVerified, FromHeader>::from_request(&req, &mut Payload::None)
                .await
                .is_err()
        );
    }
}
