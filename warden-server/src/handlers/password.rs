use actix_web::{web, HttpResponse};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;
use zeroize::Zeroizing;

use warden_common::db::otp::OtpVerification;
use warden_common::db::{self, DaoError, DbThreadPool};
use warden_common::email::templates::PasswordChangedMessage;
use warden_common::email::{EmailMessage, EmailSender};
use warden_common::otp::{Otp, MAX_OTP_ATTEMPTS, OTP_LENGTH};
use warden_common::request_io::{
    InputEmail, InputLogin, InputNewPassword, InputOtp, OutputGenericMessage, OutputOtpChallenge,
    OutputOtpStatus, OutputResetSuccess, OutputVerifySuccess,
};
use warden_common::token::auth_token::{AuthToken, AuthTokenType, NewAuthTokenClaims};
use warden_common::validators::{self, Validity};

use crate::env;
use crate::handlers::{self, error::HttpErrorResponse};
use crate::middleware::auth::{OtpVerified, VerifiedToken};
use crate::middleware::identity::ClientIp;
use crate::middleware::throttle::Throttle;
use crate::middleware::FromHeader;

const GENERIC_REQUEST_MSG: &str =
    "If an account matches, a one-time passcode has been sent to its email address.";
const WRONG_OR_EXPIRED_OTP_MSG: &str = "The code has expired. Please request a new one.";

pub async fn request_reset(
    db_thread_pool: web::Data<DbThreadPool>,
    smtp_thread_pool: web::Data<EmailSender>,
    client_ip: ClientIp,
    login: web::Json<InputLogin>,
    throttle: Throttle<3, 60>,
) -> Result<HttpResponse, HttpErrorResponse> {
    if login.login.len() > 320 {
        return Err(HttpErrorResponse::IncorrectlyFormed(String::from(
            "Login is too long",
        )));
    }

    throttle
        .enforce(&client_ip.0, "request_password_reset", &db_thread_pool)
        .await?;

    let login_copy = login.login.clone();
    let user_dao = db::user::Dao::new(&db_thread_pool);

    let user = match web::block(move || user_dao.get_user_by_login(&login_copy)).await? {
        Ok(u) => u,
        Err(DaoError::QueryFailure(diesel::result::Error::NotFound)) => {
            // The response must not betray whether the account exists
            log::warn!(
                "Password reset requested for unknown login '{}' from {}",
                login.login,
                client_ip,
            );
            return Ok(HttpResponse::Ok().json(OutputGenericMessage {
                message: String::from(GENERIC_REQUEST_MSG),
            }));
        }
        Err(e) => {
            log::error!("{e}");
            return Err(HttpErrorResponse::InternalError(String::from(
                "Failed to process reset request",
            )));
        }
    };

    if !user.is_active {
        log::warn!(
            "Password reset requested for inactive account '{}' from {}",
            user.email,
            client_ip,
        );
        return Ok(HttpResponse::Ok().json(OutputGenericMessage {
            message: String::from(GENERIC_REQUEST_MSG),
        }));
    }

    match handlers::verification::generate_and_email_otp(
        &user.email,
        &db_thread_pool,
        &smtp_thread_pool,
    )
    .await
    {
        Ok(()) => (),
        // A retried request inside the send cooldown gets the same generic
        // answer; the code already in the user's inbox remains live
        Err(HttpErrorResponse::TooManyAttempts(_, _)) => (),
        Err(e) => return Err(e),
    }

    Ok(HttpResponse::Ok().json(OutputGenericMessage {
        message: String::from(GENERIC_REQUEST_MSG),
    }))
}

pub async fn get_verify_page(
    db_thread_pool: web::Data<DbThreadPool>,
    email: web::Query<InputEmail>,
) -> Result<HttpResponse, HttpErrorResponse> {
    let email_copy = email.email.clone();
    let otp_dao = db::otp::Dao::new(&db_thread_pool);

    let record = match web::block(move || otp_dao.get_live_otp_record(&email_copy)).await? {
        Ok(r) => r,
        Err(e) => {
            log::error!("{e}");
            return Err(HttpErrorResponse::InternalError(String::from(
                "Failed to look up passcode status",
            )));
        }
    };

    let Some(record) = record else {
        return Err(HttpErrorResponse::OtpExpired(String::from(
            WRONG_OR_EXPIRED_OTP_MSG,
        )));
    };

    Ok(HttpResponse::Ok().json(OutputOtpChallenge {
        message: String::from("Enter the code that was sent to your email address."),
        masked_email: validators::mask_email(&email.email),
        expires_at: record.expires_at,
        attempts_left: (MAX_OTP_ATTEMPTS - record.attempts).max(0),
    }))
}

pub async fn get_otp_status(
    db_thread_pool: web::Data<DbThreadPool>,
    email: web::Query<InputEmail>,
) -> Result<HttpResponse, HttpErrorResponse> {
    let email_copy = email.email.clone();
    let otp_dao = db::otp::Dao::new(&db_thread_pool);

    let record = match web::block(move || otp_dao.get_live_otp_record(&email_copy)).await? {
        Ok(r) => r,
        Err(e) => {
            log::error!("{e}");
            return Err(HttpErrorResponse::InternalError(String::from(
                "Failed to look up passcode status",
            )));
        }
    };

    let status = match record {
        Some(record) => OutputOtpStatus {
            valid: true,
            expires_at: Some(record.expires_at),
            attempts_used: record.attempts,
            attempts_left: (MAX_OTP_ATTEMPTS - record.attempts).max(0),
            max_attempts: MAX_OTP_ATTEMPTS,
        },
        None => OutputOtpStatus {
            valid: false,
            expires_at: None,
            attempts_used: 0,
            attempts_left: 0,
            max_attempts: MAX_OTP_ATTEMPTS,
        },
    };

    Ok(HttpResponse::Ok().json(status))
}

pub async fn verify_otp(
    db_thread_pool: web::Data<DbThreadPool>,
    client_ip: ClientIp,
    otp_input: web::Json<InputOtp>,
    ip_throttle: Throttle<15, 30>,
    user_throttle: Throttle<5, 30>,
) -> Result<HttpResponse, HttpErrorResponse> {
    if otp_input.email.len() > 320 {
        return Err(HttpErrorResponse::IncorrectlyFormed(String::from(
            "Email address is too long",
        )));
    }

    if otp_input.otp.len() != OTP_LENGTH || !otp_input.otp.chars().all(|c| c.is_ascii_digit()) {
        return Err(HttpErrorResponse::IncorrectlyFormed(format!(
            "Passcode must be {OTP_LENGTH} digits"
        )));
    }

    // Both windows are checked before the verification transaction is
    // touched; either rejection leaves the record untouched
    ip_throttle
        .enforce(&client_ip.0, "verify_otp_by_ip", &db_thread_pool)
        .await?;

    let email_copy = otp_input.email.clone();
    let user_dao = db::user::Dao::new(&db_thread_pool);

    let user = match web::block(move || user_dao.get_user_by_email(&email_copy)).await? {
        Ok(u) => u,
        Err(DaoError::QueryFailure(diesel::result::Error::NotFound)) => {
            log::warn!(
                "Passcode verification attempted for unknown email '{}' from {}",
                otp_input.email,
                client_ip,
            );
            return Err(HttpErrorResponse::OtpExpired(String::from(
                WRONG_OR_EXPIRED_OTP_MSG,
            )));
        }
        Err(e) => {
            log::error!("{e}");
            return Err(HttpErrorResponse::InternalError(String::from(
                "Failed to verify passcode",
            )));
        }
    };

    user_throttle
        .enforce(&user.id, "verify_otp_by_user", &db_thread_pool)
        .await?;

    let submitted_digest = Otp::hash(&otp_input.otp, &env::CONF.otp_hmac_key);
    let ip_string = client_ip.to_string();

    let user = Arc::new(user);
    let user_ref = Arc::clone(&user);

    let otp_dao = db::otp::Dao::new(&db_thread_pool);
    let verification = match web::block(move || {
        otp_dao.verify_and_consume(&user_ref.email, &submitted_digest, &ip_string)
    })
    .await?
    {
        Ok(v) => v,
        Err(e) => {
            // The transaction rolled back; the attempt budget is untouched
            log::error!("{e}");
            return Err(HttpErrorResponse::InternalError(String::from(
                "Failed to verify passcode",
            )));
        }
    };

    match verification {
        OtpVerification::Success => (),
        OtpVerification::Mismatch { attempts_left } => {
            log::warn!(
                "Incorrect passcode for '{}' from {} ({} attempts left)",
                user.email,
                client_ip,
                attempts_left,
            );
            return Err(HttpErrorResponse::OtpMismatch(
                String::from("The code was incorrect"),
                attempts_left,
            ));
        }
        OtpVerification::Expired => {
            return Err(HttpErrorResponse::OtpExpired(String::from(
                WRONG_OR_EXPIRED_OTP_MSG,
            )));
        }
        OtpVerification::AttemptsExhausted => {
            log::warn!(
                "Passcode attempts exhausted for '{}' from {}",
                user.email,
                client_ip,
            );
            return Err(HttpErrorResponse::AttemptsExhausted(String::from(
                "Too many incorrect attempts. Please request a new code.",
            )));
        }
    }

    let reset_token_claims = NewAuthTokenClaims {
        user_id: user.id,
        user_email: &user.email,
        expiration: (SystemTime::now() + env::CONF.reset_token_lifetime)
            .duration_since(UNIX_EPOCH)
            .expect("Failed to fetch system time")
            .as_secs(),
        token_type: AuthTokenType::OtpVerified,
    };

    let reset_token = AuthToken::sign_new(reset_token_claims, &env::CONF.token_signing_key);

    Ok(HttpResponse::Ok().json(OutputVerifySuccess {
        success: true,
        redirect: String::from("/password/reset"),
        reset_token,
    }))
}

pub async fn reset_password(
    db_thread_pool: web::Data<DbThreadPool>,
    smtp_thread_pool: web::Data<EmailSender>,
    reset_token: VerifiedToken<OtpVerified, FromHeader>,
    new_password: web::Json<InputNewPassword>,
) -> Result<HttpResponse, HttpErrorResponse> {
    let claims = reset_token.0;

    if new_password.password != new_password.password_confirmation {
        return Err(HttpErrorResponse::IncorrectlyFormed(String::from(
            "Password confirmation does not match",
        )));
    }

    if let Validity::Invalid(msg) = validators::validate_new_password(&new_password.password) {
        return Err(HttpErrorResponse::IncorrectlyFormed(msg));
    }

    let user_dao = db::user::Dao::new(&db_thread_pool);
    let user_id = claims.user_id;

    let user = match web::block(move || user_dao.get_user_by_id(user_id)).await? {
        Ok(u) => u,
        Err(DaoError::QueryFailure(diesel::result::Error::NotFound)) => {
            return Err(HttpErrorResponse::SessionExpired(String::from(
                "Reset session is no longer valid",
            )));
        }
        Err(e) => {
            log::error!("{e}");
            return Err(HttpErrorResponse::InternalError(String::from(
                "Failed to reset password",
            )));
        }
    };

    let password = Zeroizing::new(new_password.password.clone());
    let current_hash = user.auth_string_hash.clone();

    let (sender, receiver) = oneshot::channel();

    rayon::spawn(move || {
        let matches_current = match argon2_kdf::Hash::from_str(&current_hash) {
            Ok(h) => h.verify_with_secret(
                password.as_bytes(),
                argon2_kdf::Secret::using(&env::CONF.hashing_key),
            ),
            Err(_) => false,
        };

        if matches_current {
            sender.send(Ok(None)).expect("Sending to channel failed");
            return;
        }

        let hash_result = argon2_kdf::Hasher::default()
            .algorithm(argon2_kdf::Algorithm::Argon2id)
            .salt_length(env::CONF.hash_salt_length)
            .hash_length(env::CONF.hash_length)
            .iterations(env::CONF.hash_iterations)
            .memory_cost_kib(env::CONF.hash_mem_cost_kib)
            .threads(env::CONF.hash_threads)
            .secret(argon2_kdf::Secret::using(&env::CONF.hashing_key))
            .hash(password.as_bytes());

        match hash_result {
            Ok(h) => sender
                .send(Ok(Some(h.to_string())))
                .expect("Sending to channel failed"),
            Err(e) => sender.send(Err(e)).expect("Sending to channel failed"),
        }
    });

    let new_hash = match receiver.await? {
        Ok(Some(h)) => h,
        Ok(None) => {
            return Err(HttpErrorResponse::SamePassword(String::from(
                "New password must differ from the current password",
            )));
        }
        Err(e) => {
            log::error!("{e}");
            return Err(HttpErrorResponse::InternalError(String::from(
                "Failed to hash password",
            )));
        }
    };

    // The verified record is consumed exactly once; a double submission
    // finds nothing here and fails closed
    let email_copy = user.email.clone();
    let otp_dao = db::otp::Dao::new(&db_thread_pool);

    let consumed = match web::block(move || {
        otp_dao.consume_verified_otp(&email_copy, env::CONF.reset_token_lifetime)
    })
    .await?
    {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return Err(HttpErrorResponse::InternalError(String::from(
                "Failed to reset password",
            )));
        }
    };

    if !consumed {
        log::warn!(
            "Password reset for '{}' rejected: no verified passcode to consume",
            user.email,
        );
        return Err(HttpErrorResponse::SessionExpired(String::from(
            "Reset session is no longer valid",
        )));
    }

    let user_dao = db::user::Dao::new(&db_thread_pool);
    match web::block(move || user_dao.rotate_auth_string_hash(user_id, &new_hash)).await? {
        Ok(()) => (),
        Err(e) => {
            log::error!("{e}");
            return Err(HttpErrorResponse::InternalError(String::from(
                "Failed to reset password",
            )));
        }
    };

    let session_dao = db::session::Dao::new(&db_thread_pool);
    match web::block(move || session_dao.delete_all_sessions_for_user(user_id)).await? {
        Ok(count) => {
            log::info!(
                "Password reset for '{}' invalidated {} session(s)",
                user.email,
                count,
            );
        }
        Err(e) => {
            log::error!("{e}");
            return Err(HttpErrorResponse::InternalError(String::from(
                "Failed to invalidate sessions",
            )));
        }
    };

    let notification = EmailMessage {
        body: PasswordChangedMessage::generate(),
        subject: "Your password was changed",
        from: env::CONF.email_from_address.clone(),
        reply_to: env::CONF.email_reply_to_address.clone(),
        destination: &user.email,
        is_html: true,
    };

    if let Err(e) = smtp_thread_pool.send(notification).await {
        log::error!("Failed to send password-changed notification: {e}");
    }

    Ok(HttpResponse::Ok().json(OutputResetSuccess {
        success: true,
        redirect: String::from("/login"),
    }))
}

pub async fn resend_otp(
    db_thread_pool: web::Data<DbThreadPool>,
    smtp_thread_pool: web::Data<EmailSender>,
    client_ip: ClientIp,
    email: web::Json<InputEmail>,
    throttle: Throttle<5, 30>,
) -> Result<HttpResponse, HttpErrorResponse> {
    if let Validity::Invalid(msg) = validators::validate_email_address(&email.email) {
        return Err(HttpErrorResponse::IncorrectlyFormed(msg));
    }

    throttle
        .enforce(&client_ip.0, "resend_otp", &db_thread_pool)
        .await?;

    let email_copy = email.email.clone();
    let user_dao = db::user::Dao::new(&db_thread_pool);

    match web::block(move || user_dao.get_user_by_email(&email_copy)).await? {
        Ok(user) => {
            handlers::verification::generate_and_email_otp(
                &user.email,
                &db_thread_pool,
                &smtp_thread_pool,
            )
            .await?;
        }
        Err(DaoError::QueryFailure(diesel::result::Error::NotFound)) => {
            log::warn!(
                "Passcode resend requested for unknown email '{}' from {}",
                email.email,
                client_ip,
            );
        }
        Err(e) => {
            log::error!("{e}");
            return Err(HttpErrorResponse::InternalError(String::from(
                "Failed to resend passcode",
            )));
        }
    };

    Ok(HttpResponse::Ok().json(OutputGenericMessage {
        message: String::from(GENERIC_REQUEST_MSG),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    use actix_web::http::StatusCode;
    use actix_web::test::{self, TestRequest};
    use actix_web::App;
    use std::time::Duration;
    use uuid::Uuid;

    use warden_common::request_io::ServerErrorResponse;
    use warden_common::threadrand::SecureRng;

    use crate::handlers::test_utils::{self, create_user};

    fn seed_otp(email: &str, code: &str, lifetime_offset: i64) {
        let expiration = if lifetime_offset >= 0 {
            SystemTime::now() + Duration::from_secs(lifetime_offset as u64)
        } else {
            SystemTime::now() - Duration::from_secs((-lifetime_offset) as u64)
        };

        let otp_dao = db::otp::Dao::new(&crate::env::testing::DB_THREAD_POOL);
        otp_dao
            .save_otp(email, &Otp::hash(code, &env::CONF.otp_hmac_key), expiration)
            .unwrap();
    }

    fn unique_ip() -> std::net::SocketAddr {
        format!(
            "10.{}.{}.{}:40000",
            SecureRng::next_u8(),
            SecureRng::next_u8(),
            SecureRng::next_u8().max(1),
        )
        .parse()
        .unwrap()
    }

    fn gen_reset_token(user_id: Uuid, user_email: &str) -> String {
        let claims = NewAuthTokenClaims {
            user_id,
            user_email,
            expiration: (SystemTime::now() + env::CONF.reset_token_lifetime)
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_secs(),
            token_type: AuthTokenType::OtpVerified,
        };

        AuthToken::sign_new(claims, &env::CONF.token_signing_key)
    }

    macro_rules! test_app {
        () => {
            test::init_service(
                App::new()
                    .app_data(test_utils::db_data())
                    .app_data(crate::env::testing::SMTP_THREAD_POOL.clone())
                    .configure(crate::services::api::configure),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_request_reset_is_generic_for_unknown_login() {
        let app = test_app!();
        let unknown_login = format!("nobody{}@test.com", SecureRng::next_u128());

        let req = TestRequest::post()
            .uri("/api/password/request")
            .peer_addr(unique_ip())
            .set_json(InputLogin {
                login: unknown_login.clone(),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);

        let otp_dao = db::otp::Dao::new(&crate::env::testing::DB_THREAD_POOL);
        assert!(otp_dao.get_live_otp_record(&unknown_login).unwrap().is_none());
    }

    #[actix_web::test]
    async fn test_request_reset_issues_otp_by_email_or_username() {
        let app = test_app!();
        let user = create_user();

        let req = TestRequest::post()
            .uri("/api/password/request")
            .peer_addr(unique_ip())
            .set_json(InputLogin {
                login: user.username.clone(),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);

        let otp_dao = db::otp::Dao::new(&crate::env::testing::DB_THREAD_POOL);
        let record = otp_dao.get_live_otp_record(&user.email).unwrap().unwrap();
        assert_eq!(record.attempts, 0);
        assert!(record.expires_at > SystemTime::now());
    }

    #[actix_web::test]
    async fn test_request_reset_throttles_by_ip() {
        let app = test_app!();
        let ip = unique_ip();

        for _ in 0..3 {
            let req = TestRequest::post()
                .uri("/api/password/request")
                .peer_addr(ip)
                .set_json(InputLogin {
                    login: format!("nobody{}@test.com", SecureRng::next_u128()),
                })
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let req = TestRequest::post()
            .uri("/api/password/request")
            .peer_addr(ip)
            .set_json(InputLogin {
                login: format!("nobody{}@test.com", SecureRng::next_u128()),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

        let error: ServerErrorResponse = test::read_body_json(resp).await;
        assert!(error.retry_after_secs.unwrap() > 0);
    }

    #[actix_web::test]
    async fn test_resend_is_suppressed_inside_cooldown() {
        let app = test_app!();
        let user = create_user();

        let req = TestRequest::post()
            .uri("/api/password/request")
            .peer_addr(unique_ip())
            .set_json(InputLogin {
                login: user.email.clone(),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = TestRequest::post()
            .uri("/api/password/resend")
            .peer_addr(unique_ip())
            .set_json(InputEmail {
                email: user.email.clone(),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[actix_web::test]
    async fn test_status_reports_live_challenge() {
        let app = test_app!();
        let user = create_user();

        let req = TestRequest::get()
            .uri(&format!("/api/password/status?email={}", user.email))
            .to_request();
        let status: OutputOtpStatus = test::call_and_read_body_json(&app, req).await;

        assert!(!status.valid);
        assert_eq!(status.max_attempts, MAX_OTP_ATTEMPTS);

        seed_otp(&user.email, "13572468", 300);

        let req = TestRequest::get()
            .uri(&format!("/api/password/status?email={}", user.email))
            .to_request();
        let status: OutputOtpStatus = test::call_and_read_body_json(&app, req).await;

        assert!(status.valid);
        assert!(status.expires_at.is_some());
        assert_eq!(status.attempts_used, 0);
        assert_eq!(status.attempts_left, MAX_OTP_ATTEMPTS);

        let req = TestRequest::get()
            .uri(&format!("/api/password/verify?email={}", user.email))
            .to_request();
        let challenge: OutputOtpChallenge = test::call_and_read_body_json(&app, req).await;

        assert!(challenge.masked_email.contains("***"));
        assert!(!challenge.masked_email.contains(&user.username));
    }

    #[actix_web::test]
    async fn test_wrong_code_three_times_exhausts_budget() {
        let app = test_app!();
        let user = create_user();
        let ip = unique_ip();

        seed_otp(&user.email, "13572468", 300);

        for expected_left in [2, 1, 0] {
            let req = TestRequest::post()
                .uri("/api/password/verify")
                .peer_addr(ip)
                .set_json(InputOtp {
                    email: user.email.clone(),
                    otp: String::from("00000000"),
                })
                .to_request();
            let resp = test::call_service(&app, req).await;

            assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

            let error: ServerErrorResponse = test::read_body_json(resp).await;
            assert_eq!(error.error, "otp_mismatch");
            assert_eq!(error.attempts_left.unwrap(), expected_left);
        }

        // Even the correct code is refused once the budget is exhausted
        let req = TestRequest::post()
            .uri("/api/password/verify")
            .peer_addr(ip)
            .set_json(InputOtp {
                email: user.email.clone(),
                otp: String::from("13572468"),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let error: ServerErrorResponse = test::read_body_json(resp).await;
        assert_eq!(error.error, "attempts_exhausted");
    }

    #[actix_web::test]
    async fn test_expired_code_is_rejected() {
        let app = test_app!();
        let user = create_user();

        seed_otp(&user.email, "13572468", -1);

        let req = TestRequest::post()
            .uri("/api/password/verify")
            .peer_addr(unique_ip())
            .set_json(InputOtp {
                email: user.email.clone(),
                otp: String::from("13572468"),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let error: ServerErrorResponse = test::read_body_json(resp).await;
        assert_eq!(error.error, "otp_expired");
    }

    #[actix_web::test]
    async fn test_unknown_email_reads_like_expired_code() {
        let app = test_app!();

        let req = TestRequest::post()
            .uri("/api/password/verify")
            .peer_addr(unique_ip())
            .set_json(InputOtp {
                email: format!("nobody{}@test.com", SecureRng::next_u128()),
                otp: String::from("13572468"),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let error: ServerErrorResponse = test::read_body_json(resp).await;
        assert_eq!(error.error, "otp_expired");
    }

    #[actix_web::test]
    async fn test_verify_and_reset_invalidates_sessions() {
        let app = test_app!();
        let user = create_user();

        let session_dao = db::session::Dao::new(&crate::env::testing::DB_THREAD_POOL);
        let session1 = session_dao
            .create_session(user.id, Duration::from_secs(3600))
            .unwrap();
        let session2 = session_dao
            .create_session(user.id, Duration::from_secs(3600))
            .unwrap();

        seed_otp(&user.email, "13572468", 300);

        let req = TestRequest::post()
            .uri("/api/password/verify")
            .peer_addr(unique_ip())
            .set_json(InputOtp {
                email: user.email.clone(),
                otp: String::from("13572468"),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);

        let verify_output: OutputVerifySuccess = test::read_body_json(resp).await;
        assert!(verify_output.success);
        assert!(!verify_output.reset_token.is_empty());

        let req = TestRequest::post()
            .uri("/api/password/reset")
            .insert_header(("ResetToken", verify_output.reset_token.as_str()))
            .set_json(serde_json::json!({
                "password": "Br4nd!NewSecret",
                "password_confirmation": "Br4nd!NewSecret",
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);

        let reset_output: OutputResetSuccess = test::read_body_json(resp).await;
        assert!(reset_output.success);
        assert_eq!(reset_output.redirect, "/login");

        // Every pre-existing session is dead
        assert!(!session_dao.session_is_live(session1).unwrap());
        assert!(!session_dao.session_is_live(session2).unwrap());

        // The stored credential was rotated
        let user_dao = db::user::Dao::new(&crate::env::testing::DB_THREAD_POOL);
        let stored = user_dao.get_user_by_id(user.id).unwrap();
        assert_ne!(stored.auth_string_hash, "unset");

        // A double submission finds no verified state and fails closed
        let req = TestRequest::post()
            .uri("/api/password/reset")
            .insert_header(("ResetToken", verify_output.reset_token.as_str()))
            .set_json(serde_json::json!({
                "password": "An0ther!Password",
                "password_confirmation": "An0ther!Password",
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_reset_rejects_weak_passwords() {
        let app = test_app!();
        let user = create_user();
        let token = gen_reset_token(user.id, &user.email);

        for weak_password in ["short1!A", "nouppercase1!aaaa", "NoSymbol1AAAAaaaa"] {
            let req = TestRequest::post()
                .uri("/api/password/reset")
                .insert_header(("ResetToken", token.as_str()))
                .set_json(serde_json::json!({
                    "password": weak_password,
                    "password_confirmation": weak_password,
                }))
                .to_request();
            let resp = test::call_service(&app, req).await;

            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        }

        let req = TestRequest::post()
            .uri("/api/password/reset")
            .insert_header(("ResetToken", token.as_str()))
            .set_json(serde_json::json!({
                "password": "Mismatched!Pass1",
                "password_confirmation": "Different!Pass1",
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_reset_rejects_same_password() {
        let app = test_app!();

        let current_password = "Current!Passw0rd";
        let current_hash = argon2_kdf::Hasher::default()
            .algorithm(argon2_kdf::Algorithm::Argon2id)
            .salt_length(16)
            .hash_length(32)
            .iterations(1)
            .memory_cost_kib(1024)
            .threads(1)
            .secret(argon2_kdf::Secret::using(&env::CONF.hashing_key))
            .hash(current_password.as_bytes())
            .unwrap();

        let user_number = SecureRng::next_u128();
        let email = format!("test_user{}@test.com", user_number);
        let user_dao = db::user::Dao::new(&crate::env::testing::DB_THREAD_POOL);
        let user_id = user_dao
            .create_user(
                &format!("test_user{}", user_number),
                &email,
                &current_hash.to_string(),
            )
            .unwrap();

        seed_otp(&email, "13572468", 300);
        let otp_dao = db::otp::Dao::new(&crate::env::testing::DB_THREAD_POOL);
        otp_dao
            .verify_and_consume(
                &email,
                &Otp::hash("13572468", &env::CONF.otp_hmac_key),
                "10.0.0.1",
            )
            .unwrap();

        let token = gen_reset_token(user_id, &email);

        let req = TestRequest::post()
            .uri("/api/password/reset")
            .insert_header(("ResetToken", token.as_str()))
            .set_json(serde_json::json!({
                "password": current_password,
                "password_confirmation": current_password,
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let error: ServerErrorResponse = test::read_body_json(resp).await;
        assert_eq!(error.error, "same_password");
    }

    #[actix_web::test]
    async fn test_reset_without_verified_otp_fails_closed() {
        let app = test_app!();
        let user = create_user();
        let token = gen_reset_token(user.id, &user.email);

        let req = TestRequest::post()
            .uri("/api/password/reset")
            .insert_header(("ResetToken", token.as_str()))
            .set_json(serde_json::json!({
                "password": "Br4nd!NewSecret",
                "password_confirmation": "Br4nd!NewSecret",
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let error: ServerErrorResponse = test::read_body_json(resp).await;
        assert_eq!(error.error, "session_expired");
    }

    #[actix_web::test]
    async fn test_reset_requires_token() {
        let app = test_app!();

        let req = TestRequest::post()
            .uri("/api/password/reset")
            .set_json(serde_json::json!({
                "password": "Br4nd!NewSecret",
                "password_confirmation": "Br4nd!NewSecret",
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
