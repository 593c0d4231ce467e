pub mod device;
pub mod health;
pub mod password;

pub mod verification {
    use actix_web::web;
    use std::time::{Duration, SystemTime};

    use warden_common::db::{self, DbThreadPool};
    use warden_common::email::{templates::OtpMessage, EmailMessage, EmailSender};
    use warden_common::otp::{Otp, OTP_LENGTH};

    use super::error::HttpErrorResponse;
    use crate::env;
    use crate::middleware::throttle::window_key;

    /// Duplicate sends (an impatient retry, a double-submitted form) are
    /// suppressed per email for this long, independently of the resend
    /// route's own rate-limit window.
    const SEND_COOLDOWN_SECS: u64 = 30;

    pub async fn generate_and_email_otp(
        user_email: &str,
        db_thread_pool: &DbThreadPool,
        smtp_thread_pool: &EmailSender,
    ) -> Result<(), HttpErrorResponse> {
        let cooldown_key = window_key(&user_email, "otp_send_cooldown");
        let throttle_dao = db::throttle::Dao::new(db_thread_pool);

        let send_count = match web::block(move || {
            let expiration = SystemTime::now() + Duration::from_secs(SEND_COOLDOWN_SECS);
            throttle_dao.mark_attempt_and_get_attempt_count(cooldown_key, expiration)
        })
        .await?
        {
            Ok(c) => c,
            Err(e) => {
                log::error!("{e}");
                return Err(HttpErrorResponse::InternalError(String::from(
                    "Failed to send passcode",
                )));
            }
        };

        if send_count > 1 {
            let throttle_dao = db::throttle::Dao::new(db_thread_pool);
            let time_remaining = match web::block(move || throttle_dao.time_remaining(cooldown_key))
                .await?
            {
                Ok(t) => t,
                Err(e) => {
                    log::error!("{e}");
                    Duration::from_secs(SEND_COOLDOWN_SECS)
                }
            };

            log::warn!("Suppressed duplicate passcode send for email '{user_email}'");

            return Err(HttpErrorResponse::TooManyAttempts(
                String::from("A code was sent recently. Wait before requesting another."),
                time_remaining.as_secs().max(1),
            ));
        }

        let otp = Otp::generate(OTP_LENGTH);
        let code_hash = Otp::hash(&otp, &env::CONF.otp_hmac_key);
        let otp_expiration = SystemTime::now() + env::CONF.otp_lifetime;

        let user_email_copy = String::from(user_email);
        let otp_dao = db::otp::Dao::new(db_thread_pool);

        match web::block(move || otp_dao.save_otp(&user_email_copy, &code_hash, otp_expiration))
            .await?
        {
            Ok(_) => (),
            Err(e) => {
                log::error!("{e}");
                return Err(HttpErrorResponse::InternalError(String::from(
                    "Failed to save passcode",
                )));
            }
        };

        let message = EmailMessage {
            body: OtpMessage::generate(&otp[..4], &otp[4..], env::CONF.otp_lifetime),
            subject: "Your one-time passcode",
            from: env::CONF.email_from_address.clone(),
            reply_to: env::CONF.email_reply_to_address.clone(),
            destination: user_email,
            is_html: true,
        };

        if let Err(e) = smtp_thread_pool.send(message).await {
            log::error!("Failed to deliver passcode to '{user_email}': {e}");

            // A record must never outlive a delivery that did not happen
            let user_email_copy = String::from(user_email);
            let otp_dao = db::otp::Dao::new(db_thread_pool);
            match web::block(move || otp_dao.delete_otp_for_email(&user_email_copy)).await? {
                Ok(_) => (),
                Err(e) => log::error!("Failed to roll back undelivered passcode: {e}"),
            }

            return Err(HttpErrorResponse::InternalError(String::from(
                "Failed to send passcode to the given email address",
            )));
        }

        Ok(())
    }
}

pub mod error {
    use warden_common::request_io::ServerErrorResponse;
    use warden_common::token::TokenError;

    use actix_web::http::StatusCode;
    use actix_web::{HttpResponse, HttpResponseBuilder};
    use std::fmt;
    use tokio::sync::oneshot;

    #[derive(Debug)]
    pub enum HttpErrorResponse {
        // 400
        IncorrectlyFormed(String),
        MissingHeader(String),

        // 401
        BadToken(String),
        TokenExpired(String),
        TokenMissing(String),
        WrongTokenType(String),
        SessionExpired(String),

        // 404
        DoesNotExist(String),

        // 422
        OtpExpired(String),
        OtpMismatch(String, i32),
        AttemptsExhausted(String),
        SamePassword(String),

        // 429
        TooManyAttempts(String, u64),

        // 500
        InternalError(String),
    }

    impl std::error::Error for HttpErrorResponse {}

    impl fmt::Display for HttpErrorResponse {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let server_error: ServerErrorResponse = self.into();
            write!(f, "{:?}", server_error)
        }
    }

    impl From<&HttpErrorResponse> for ServerErrorResponse {
        fn from(resp: &HttpErrorResponse) -> Self {
            let (error, message, attempts_left, retry_after_secs) = match resp {
                HttpErrorResponse::IncorrectlyFormed(msg) => {
                    ("incorrectly_formed", msg.clone(), None, None)
                }
                HttpErrorResponse::MissingHeader(msg) => {
                    ("missing_header", msg.clone(), None, None)
                }
                HttpErrorResponse::BadToken(msg) => ("bad_token", msg.clone(), None, None),
                HttpErrorResponse::TokenExpired(msg) => {
                    ("token_expired", msg.clone(), None, None)
                }
                HttpErrorResponse::TokenMissing(msg) => {
                    ("token_missing", msg.clone(), None, None)
                }
                HttpErrorResponse::WrongTokenType(msg) => {
                    ("wrong_token_type", msg.clone(), None, None)
                }
                HttpErrorResponse::SessionExpired(msg) => {
                    ("session_expired", msg.clone(), None, None)
                }
                HttpErrorResponse::DoesNotExist(msg) => {
                    ("does_not_exist", msg.clone(), None, None)
                }
                HttpErrorResponse::OtpExpired(msg) => ("otp_expired", msg.clone(), None, None),
                HttpErrorResponse::OtpMismatch(msg, attempts_left) => {
                    ("otp_mismatch", msg.clone(), Some(*attempts_left), None)
                }
                HttpErrorResponse::AttemptsExhausted(msg) => {
                    ("attempts_exhausted", msg.clone(), None, None)
                }
                HttpErrorResponse::SamePassword(msg) => {
                    ("same_password", msg.clone(), None, None)
                }
                HttpErrorResponse::TooManyAttempts(msg, retry_after) => {
                    ("too_many_attempts", msg.clone(), None, Some(*retry_after))
                }
                HttpErrorResponse::InternalError(msg) => {
                    ("internal_error", msg.clone(), None, None)
                }
            };

            ServerErrorResponse {
                error: String::from(error),
                message,
                attempts_left,
                retry_after_secs,
            }
        }
    }

    impl actix_web::error::ResponseError for HttpErrorResponse {
        fn error_response(&self) -> HttpResponse {
            HttpResponseBuilder::new(self.status_code()).json(ServerErrorResponse::from(self))
        }

        fn status_code(&self) -> StatusCode {
            match *self {
                HttpErrorResponse::IncorrectlyFormed(_) | HttpErrorResponse::MissingHeader(_) => {
                    StatusCode::BAD_REQUEST
                }
                HttpErrorResponse::BadToken(_)
                | HttpErrorResponse::TokenExpired(_)
                | HttpErrorResponse::TokenMissing(_)
                | HttpErrorResponse::WrongTokenType(_)
                | HttpErrorResponse::SessionExpired(_) => StatusCode::UNAUTHORIZED,
                HttpErrorResponse::DoesNotExist(_) => StatusCode::NOT_FOUND,
                HttpErrorResponse::OtpExpired(_)
                | HttpErrorResponse::OtpMismatch(_, _)
                | HttpErrorResponse::AttemptsExhausted(_)
                | HttpErrorResponse::SamePassword(_) => StatusCode::UNPROCESSABLE_ENTITY,
                HttpErrorResponse::TooManyAttempts(_, _) => StatusCode::TOO_MANY_REQUESTS,
                HttpErrorResponse::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            }
        }
    }

    impl From<actix_web::error::BlockingError> for HttpErrorResponse {
        fn from(_err: actix_web::error::BlockingError) -> Self {
            HttpErrorResponse::InternalError(String::from("Actix thread pool failure"))
        }
    }

    impl From<oneshot::error::RecvError> for HttpErrorResponse {
        fn from(_err: oneshot::error::RecvError) -> Self {
            HttpErrorResponse::InternalError(String::from("Rayon thread pool failure"))
        }
    }

    impl From<TokenError> for HttpErrorResponse {
        fn from(err: TokenError) -> Self {
            match err {
                TokenError::TokenInvalid => {
                    HttpErrorResponse::BadToken(String::from("Invalid token"))
                }
                TokenError::TokenExpired => {
                    HttpErrorResponse::TokenExpired(String::from("Token expired"))
                }
                TokenError::TokenMissing => {
                    HttpErrorResponse::TokenMissing(String::from("Missing token"))
                }
                TokenError::WrongTokenType => {
                    HttpErrorResponse::WrongTokenType(String::from("Wrong token type"))
                }
            }
        }
    }
}
