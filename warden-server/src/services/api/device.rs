use actix_web::web::*;

use crate::handlers::device;

pub fn configure(cfg: &mut ServiceConfig) {
    cfg.service(
        scope("/devices")
            .service(resource("").route(get().to(device::list_devices)))
            .service(resource("/stats").route(get().to(device::get_device_stats)))
            .service(resource("/evaluate").route(post().to(device::evaluate_trust)))
            .service(resource("/register").route(post().to(device::register_device)))
            .service(resource("/{device_id}/revoke").route(post().to(device::revoke_device))),
    );
}
