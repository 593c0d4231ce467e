use actix_web::{web, HttpResponse};
use std::time::SystemTime;
use uuid::Uuid;

use warden_common::db::{self, DaoError, DbThreadPool};
use warden_common::request_io::{
    InputDeviceName, InputEmail, OutputDevice, OutputDeviceList, OutputDeviceStats,
    OutputTrustDecision,
};
use warden_common::trust::{self, TrustDecision};

use crate::env;
use crate::handlers::error::HttpErrorResponse;
use crate::middleware::auth::{Access, VerifiedToken};
use crate::middleware::identity::{ClientIp, DeviceFingerprint};
use crate::middleware::FromHeader;

pub async fn list_devices(
    db_thread_pool: web::Data<DbThreadPool>,
    access_token: VerifiedToken<Access, FromHeader>,
) -> Result<HttpResponse, HttpErrorResponse> {
    let user_id = access_token.0.user_id;
    let device_dao = db::device::Dao::new(&db_thread_pool);

    let devices = match web::block(move || device_dao.list_devices(user_id)).await? {
        Ok(d) => d,
        Err(e) => {
            log::error!("{e}");
            return Err(HttpErrorResponse::InternalError(String::from(
                "Failed to list devices",
            )));
        }
    };

    let now = SystemTime::now();
    let devices = devices
        .into_iter()
        .map(|d| OutputDevice {
            id: d.id,
            device_name: d.device_name.clone(),
            ip_address: d.ip_address.clone(),
            last_used_at: d.last_used_at,
            trust_expires_at: d.trust_expires_at,
            is_trusted: d.is_trust_valid(now),
            is_revoked: d.revoked_at.is_some(),
        })
        .collect();

    Ok(HttpResponse::Ok().json(OutputDeviceList { devices }))
}

pub async fn revoke_device(
    db_thread_pool: web::Data<DbThreadPool>,
    access_token: VerifiedToken<Access, FromHeader>,
    device_id: web::Path<Uuid>,
) -> Result<HttpResponse, HttpErrorResponse> {
    let user_id = access_token.0.user_id;
    let device_id = device_id.into_inner();
    let device_dao = db::device::Dao::new(&db_thread_pool);

    match web::block(move || device_dao.revoke_device(user_id, device_id)).await? {
        Ok(()) => (),
        Err(DaoError::QueryFailure(diesel::result::Error::NotFound)) => {
            return Err(HttpErrorResponse::DoesNotExist(String::from(
                "Device not found",
            )));
        }
        Err(e) => {
            log::error!("{e}");
            return Err(HttpErrorResponse::InternalError(String::from(
                "Failed to revoke device",
            )));
        }
    };

    log::info!(
        "Device {} revoked for user {}",
        device_id,
        access_token.0.user_id,
    );

    Ok(HttpResponse::Ok().finish())
}

pub async fn get_device_stats(
    db_thread_pool: web::Data<DbThreadPool>,
    access_token: VerifiedToken<Access, FromHeader>,
) -> Result<HttpResponse, HttpErrorResponse> {
    let user_id = access_token.0.user_id;
    let device_dao = db::device::Dao::new(&db_thread_pool);

    let stats = match web::block(move || device_dao.get_device_stats(user_id)).await? {
        Ok(s) => s,
        Err(e) => {
            log::error!("{e}");
            return Err(HttpErrorResponse::InternalError(String::from(
                "Failed to compute device stats",
            )));
        }
    };

    Ok(HttpResponse::Ok().json(OutputDeviceStats {
        total: stats.total,
        trusted: stats.trusted,
        revoked: stats.revoked,
        expired: stats.expired,
    }))
}

/// Entry point for the login collaborator, called after its own primary
/// credential check has passed. Decides whether the OTP challenge may be
/// skipped for this device; it never vouches for the credential itself.
pub async fn evaluate_trust(
    db_thread_pool: web::Data<DbThreadPool>,
    email: web::Json<InputEmail>,
    fingerprint: DeviceFingerprint,
    client_ip: ClientIp,
) -> Result<HttpResponse, HttpErrorResponse> {
    let email_copy = email.email.clone();
    let user_dao = db::user::Dao::new(&db_thread_pool);

    let user = match web::block(move || user_dao.get_user_by_email(&email_copy)).await? {
        Ok(u) => u,
        Err(DaoError::QueryFailure(diesel::result::Error::NotFound)) => {
            // Unknown account reads the same as an unknown device
            return Ok(HttpResponse::Ok().json(OutputTrustDecision {
                trusted: false,
                reason: Some(String::from("new device")),
                require_otp: false,
            }));
        }
        Err(e) => {
            log::error!("{e}");
            return Err(HttpErrorResponse::InternalError(String::from(
                "Failed to evaluate device trust",
            )));
        }
    };

    let fingerprint_copy = fingerprint.0.clone();
    let user_id = user.id;
    let device_dao = db::device::Dao::new(&db_thread_pool);

    let device = match web::block(move || device_dao.get_device(user_id, &fingerprint_copy)).await?
    {
        Ok(d) => d,
        Err(e) => {
            log::error!("{e}");
            return Err(HttpErrorResponse::InternalError(String::from(
                "Failed to evaluate device trust",
            )));
        }
    };

    let decision = trust::evaluate(
        device.as_ref(),
        client_ip.0,
        SystemTime::now(),
        env::CONF.trusted_subnet_v4_prefix,
    );

    let output = match decision {
        TrustDecision::Trusted => {
            // Sliding window: every trusted use extends the trust period
            let device = device.expect("Trusted decision requires a device record");
            let ip_string = client_ip.to_string();
            let device_dao = db::device::Dao::new(&db_thread_pool);

            match web::block(move || {
                device_dao.refresh_trust(device.id, &ip_string, env::CONF.device_trust_lifetime)
            })
            .await?
            {
                Ok(()) => (),
                Err(e) => log::error!("Failed to refresh device trust: {e}"),
            };

            OutputTrustDecision {
                trusted: true,
                reason: None,
                require_otp: false,
            }
        }
        TrustDecision::Untrusted {
            reason,
            require_otp,
        } => {
            log::warn!(
                "Device untrusted for '{}' from {}: {}",
                user.email,
                client_ip,
                reason,
            );

            OutputTrustDecision {
                trusted: false,
                reason: Some(String::from(reason)),
                require_otp,
            }
        }
    };

    Ok(HttpResponse::Ok().json(output))
}

/// Registers (or re-trusts) the requesting device after a completed OTP
/// login.
pub async fn register_device(
    db_thread_pool: web::Data<DbThreadPool>,
    access_token: VerifiedToken<Access, FromHeader>,
    fingerprint: DeviceFingerprint,
    client_ip: ClientIp,
    device_name: web::Json<InputDeviceName>,
) -> Result<HttpResponse, HttpErrorResponse> {
    let user_id = access_token.0.user_id;
    let ip_string = client_ip.to_string();
    let device_dao = db::device::Dao::new(&db_thread_pool);

    let device = match web::block(move || {
        device_dao.save_trusted_device(
            user_id,
            &fingerprint.0,
            &ip_string,
            device_name.device_name.as_deref(),
            env::CONF.device_trust_lifetime,
        )
    })
    .await?
    {
        Ok(d) => d,
        Err(e) => {
            log::error!("{e}");
            return Err(HttpErrorResponse::InternalError(String::from(
                "Failed to save device",
            )));
        }
    };

    let now = SystemTime::now();

    Ok(HttpResponse::Created().json(OutputDevice {
        id: device.id,
        device_name: device.device_name.clone(),
        ip_address: device.ip_address.clone(),
        last_used_at: device.last_used_at,
        trust_expires_at: device.trust_expires_at,
        is_trusted: device.is_trust_valid(now),
        is_revoked: device.revoked_at.is_some(),
    }))
}
