use warden_common::db::create_db_thread_pool;
use warden_common::email::senders::{MockSender, SmtpRelay};
use warden_common::email::EmailSender;

use actix_web::web::Data;
use actix_web::{App, HttpServer};
use flexi_logger::{
    Age, Cleanup, Criterion, Duplicate, FileSpec, LogSpecification, Logger, Naming, WriteMode,
};

mod env;
mod handlers;
mod middleware;
mod services;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let mut port = 9000u16;

    let mut args = std::env::args();

    // Eat the first argument, which is the relative path to the executable
    args.next();

    while let Some(arg) = args.next() {
        match arg.to_lowercase().as_str() {
            "--port" => {
                let port_str = match args.next() {
                    Some(s) => s,
                    None => {
                        eprintln!("ERROR: --port option specified but no port was given");
                        std::process::exit(1);
                    }
                };

                port = match port_str.parse::<u16>() {
                    Ok(p) => p,
                    Err(_) => {
                        eprintln!("ERROR: Incorrect format for port. Integer expected");
                        std::process::exit(1);
                    }
                };
            }
            a => {
                eprintln!("ERROR: Invalid argument: {}", &a);
                std::process::exit(1);
            }
        }
    }

    let base_addr = format!("0.0.0.0:{}", &port);

    let log_spec = LogSpecification::env_or_parse(&env::CONF.log_level)
        .unwrap_or_else(|_| LogSpecification::info());

    let _logger = Logger::with(log_spec)
        .log_to_file(FileSpec::default().directory("./logs"))
        .rotate(
            Criterion::Age(Age::Day),
            Naming::Timestamps,
            Cleanup::KeepLogAndCompressedFiles(60, 365),
        )
        .cleanup_in_background_thread(true)
        .duplicate_to_stdout(Duplicate::All)
        .write_mode(WriteMode::Async)
        .format(|writer, now, record| {
            write!(
                writer,
                "{:5} | {} | {}:{} | {}",
                record.level(),
                now.format("%Y-%m-%dT%H:%M:%S%.6fZ"),
                record.module_path().unwrap_or("<unknown>"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .use_utc()
        .start()
        .expect("Failed to start logger");

    log::info!("Connecting to database...");

    let db_uri = format!(
        "postgres://{}:{}@{}:{}/{}",
        env::CONF.db_username,
        env::CONF.db_password,
        env::CONF.db_hostname,
        env::CONF.db_port,
        env::CONF.db_name,
    );

    // To prevent resource starvation, max connections must be at least as
    // large as the number of actix workers
    let db_max_connections = std::cmp::max(
        env::CONF.db_max_connections,
        env::CONF.actix_worker_count as u32,
    );

    let db_thread_pool = create_db_thread_pool(&db_uri, Some(db_max_connections));

    log::info!("Successfully connected to database");

    let smtp_thread_pool: EmailSender = if env::CONF.email_enabled {
        log::info!("Connecting to SMTP relay...");

        let relay = SmtpRelay::with_credentials(
            &env::CONF.smtp_username,
            &env::CONF.smtp_key,
            &env::CONF.smtp_address,
            env::CONF.max_smtp_connections,
            env::CONF.smtp_idle_timeout,
        )
        .expect("Failed to connect to SMTP relay");

        match relay.test_connection().await {
            Ok(true) => (),
            Ok(false) => panic!("Failed to connect to SMTP relay"),
            Err(e) => panic!("Failed to connect to SMTP relay: {e}"),
        }

        log::info!("Successfully connected to SMTP relay");

        Box::new(relay)
    } else {
        log::info!("Emails are disabled. Using mock SMTP thread pool.");
        Box::new(MockSender::new())
    };

    let smtp_thread_pool = Data::new(smtp_thread_pool);
    let db_thread_pool_data = Data::new(db_thread_pool);

    HttpServer::new(move || {
        App::new()
            .app_data(db_thread_pool_data.clone())
            .app_data(smtp_thread_pool.clone())
            .configure(services::api::configure)
            .wrap(actix_web::middleware::Logger::default())
    })
    .workers(env::CONF.actix_worker_count)
    .bind(base_addr)?
    .run()
    .await?;

    // All worker threads have been joined; the config is no longer shared
    unsafe { env::CONF.zeroize() };

    Ok(())
}
