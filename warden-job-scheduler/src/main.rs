use warden_common::db::create_db_thread_pool;

use flexi_logger::{
    Age, Cleanup, Criterion, Duplicate, FileSpec, LogSpecification, Logger, Naming, WriteMode,
};
use runner::JobRunner;
use zeroize::Zeroizing;

mod env;
mod jobs;
mod runner;

use jobs::{ClearExpiredOtpsJob, ClearThrottleTableJob, RevokeExpiredDevicesJob};

fn main() {
    let db_uri = Zeroizing::new(format!(
        "postgres://{}:{}@{}:{}/{}",
        env::CONF.db_username,
        env::CONF.db_password,
        env::CONF.db_hostname,
        env::CONF.db_port,
        env::CONF.db_name,
    ));

    let db_thread_pool = create_db_thread_pool(&db_uri, Some(env::CONF.db_max_connections));

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(env::CONF.worker_threads)
        .enable_all()
        .build()
        .expect("Failed to launch asynchronous runtime")
        .block_on(async move {
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

            let mut job_runner = JobRunner::new(env::CONF.update_frequency, db_thread_pool.clone());

            job_runner
                .register(
                    Box::new(ClearExpiredOtpsJob::new(db_thread_pool.clone())),
                    env::CONF.clear_expired_otps_job_frequency,
                )
                .await;

            job_runner
                .register(
                    Box::new(RevokeExpiredDevicesJob::new(db_thread_pool.clone())),
                    env::CONF.revoke_expired_devices_job_frequency,
                )
                .await;

            job_runner
                .register(
                    Box::new(ClearThrottleTableJob::new(db_thread_pool.clone())),
                    env::CONF.clear_throttle_table_job_frequency,
                )
                .await;

            job_runner.start().await;
        });
}
