mod device;
mod health;
mod password;

use actix_web::web::*;

pub fn configure(cfg: &mut ServiceConfig) {
    cfg.service(
        scope("/api")
            .configure(password::configure)
            .configure(device::configure)
            .configure(health::configure),
    );
}
