use actix_web::{web, HttpResponse};

use warden_common::db::DbThreadPool;

use crate::handlers::error::HttpErrorResponse;

pub async fn heartbeat(
    db_thread_pool: web::Data<DbThreadPool>,
) -> Result<HttpResponse, HttpErrorResponse> {
    match web::block(move || db_thread_pool.get()).await? {
        Ok(_) => Ok(HttpResponse::Ok().finish()),
        Err(e) => {
            log::error!("{e}");
            Err(HttpErrorResponse::InternalError(String::from(
                "Database is unreachable",
            )))
        }
    }
}
