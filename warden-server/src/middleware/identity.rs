use actix_web::dev::Payload;
use actix_web::http::header;
use actix_web::{FromRequest, HttpRequest};
use futures::future;
use std::fmt;
use std::net::IpAddr;

use warden_common::trust;

use crate::handlers::error::HttpErrorResponse;

/// The requester's address as seen through any reverse proxy. Rate-limit
/// windows and device-trust checks key off this.
#[derive(Clone, Copy, Debug, Hash)]
pub struct ClientIp(pub IpAddr);

impl fmt::Display for ClientIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromRequest for ClientIp {
    type Error = HttpErrorResponse;
    type Future = future::Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let connection_info = req.connection_info();

        let Some(addr) = connection_info.realip_remote_addr() else {
            return future::err(HttpErrorResponse::IncorrectlyFormed(String::from(
                "Could not determine client address",
            )));
        };

        // realip_remote_addr may yield a bare address or an addr:port pair
        let parsed = addr
            .parse::<IpAddr>()
            .or_else(|_| addr.parse::<std::net::SocketAddr>().map(|s| s.ip()));

        match parsed {
            Ok(ip) => future::ok(ClientIp(ip)),
            Err(_) => future::err(HttpErrorResponse::IncorrectlyFormed(String::from(
                "Could not determine client address",
            ))),
        }
    }
}

/// Opaque, stable identifier for the requesting device, derived from the
/// client-supplied `DeviceId` header and the user agent. The raw values are
/// hashed immediately and never stored.
#[derive(Clone, Debug)]
pub struct DeviceFingerprint(pub String);

impl FromRequest for DeviceFingerprint {
    type Error = HttpErrorResponse;
    type Future = future::Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let Some(device_id) = req
            .headers()
            .get("DeviceId")
            .and_then(|h| h.to_str().ok())
        else {
            return future::err(HttpErrorResponse::MissingHeader(String::from(
                "DeviceId header is missing or malformed",
            )));
        };

        let user_agent = req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("");

        future::ok(DeviceFingerprint(trust::fingerprint(device_id, user_agent)))
    }
}
