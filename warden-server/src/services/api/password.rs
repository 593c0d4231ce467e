use actix_web::web::*;

use crate::handlers::password;

pub fn configure(cfg: &mut ServiceConfig) {
    cfg.service(
        scope("/password")
            .service(resource("/request").route(post().to(password::request_reset)))
            .service(
                resource("/verify")
                    .route(get().to(password::get_verify_page))
                    .route(post().to(password::verify_otp)),
            )
            .service(resource("/status").route(get().to(password::get_otp_status)))
            .service(resource("/reset").route(post().to(password::reset_password)))
            .service(resource("/resend").route(post().to(password::resend_otp))),
    );
}
