use base64::engine::general_purpose::STANDARD as b64;
use base64::Engine;
use lettre::message::Mailbox;
use once_cell::sync::Lazy;
use std::cell::UnsafeCell;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::time::Duration;
use zeroize::{Zeroize, Zeroizing};

pub static CONF: Lazy<Config> = Lazy::new(|| Config::from_env().expect("Failed to load config"));

const DB_USERNAME_VAR: &str = "WARDEN_DB_USERNAME";
const DB_PASSWORD_VAR: &str = "WARDEN_DB_PASSWORD";
const DB_HOSTNAME_VAR: &str = "WARDEN_DB_HOSTNAME";
const DB_PORT_VAR: &str = "WARDEN_DB_PORT";
const DB_NAME_VAR: &str = "WARDEN_DB_NAME";
const DB_MAX_CONNECTIONS_VAR: &str = "WARDEN_DB_MAX_CONNECTIONS";

const OTP_HMAC_KEY_VAR: &str = "WARDEN_OTP_HMAC_KEY_B64";
const TOKEN_SIGNING_KEY_VAR: &str = "WARDEN_TOKEN_SIGNING_KEY_B64";
const HASHING_KEY_VAR: &str = "WARDEN_HASHING_KEY_B64";

const HASH_LENGTH_VAR: &str = "WARDEN_HASH_LENGTH";
const HASH_ITERATIONS_VAR: &str = "WARDEN_HASH_ITERATIONS";
const HASH_MEM_COST_KIB_VAR: &str = "WARDEN_HASH_MEM_COST_KIB";
const HASH_THREADS_VAR: &str = "WARDEN_HASH_THREADS";
const HASH_SALT_LENGTH_VAR: &str = "WARDEN_HASH_SALT_LENGTH";

const EMAIL_ENABLED_VAR: &str = "WARDEN_EMAIL_ENABLED";
const EMAIL_FROM_ADDR_VAR: &str = "WARDEN_EMAIL_FROM_ADDR";
const EMAIL_REPLY_TO_ADDR_VAR: &str = "WARDEN_EMAIL_REPLY_TO_ADDR";
const SMTP_ADDRESS_VAR: &str = "WARDEN_SMTP_ADDRESS";
const SMTP_USERNAME_VAR: &str = "WARDEN_SMTP_USERNAME";
const SMTP_KEY_VAR: &str = "WARDEN_SMTP_KEY";
const MAX_SMTP_CONNECTIONS_VAR: &str = "WARDEN_MAX_SMTP_CONNECTIONS";
const SMTP_IDLE_TIMEOUT_SECS_VAR: &str = "WARDEN_SMTP_IDLE_TIMEOUT_SECS";

const OTP_LIFETIME_MINS_VAR: &str = "WARDEN_OTP_LIFETIME_MINS";
const RESET_TOKEN_LIFETIME_MINS_VAR: &str = "WARDEN_RESET_TOKEN_LIFETIME_MINS";
const DEVICE_TRUST_LIFETIME_DAYS_VAR: &str = "WARDEN_DEVICE_TRUST_LIFETIME_DAYS";
const TRUSTED_SUBNET_V4_PREFIX_VAR: &str = "WARDEN_TRUSTED_SUBNET_V4_PREFIX";

const ACTIX_WORKER_COUNT_VAR: &str = "WARDEN_ACTIX_WORKER_COUNT";
const LOG_LEVEL_VAR: &str = "WARDEN_LOG_LEVEL";

const OTP_HMAC_KEY_SIZE: usize = 32;
const TOKEN_SIGNING_KEY_SIZE: usize = 64;
const HASHING_KEY_SIZE: usize = 32;

#[derive(Zeroize)]
pub struct ConfigInner {
    pub db_username: String,
    pub db_password: String,
    pub db_hostname: String,
    pub db_port: u16,
    pub db_name: String,
    #[zeroize(skip)]
    pub db_max_connections: u32,

    pub otp_hmac_key: [u8; OTP_HMAC_KEY_SIZE],
    pub token_signing_key: [u8; TOKEN_SIGNING_KEY_SIZE],
    pub hashing_key: [u8; HASHING_KEY_SIZE],

    pub hash_length: u32,
    pub hash_iterations: u32,
    pub hash_mem_cost_kib: u32,
    pub hash_threads: u32,
    pub hash_salt_length: u32,

    pub email_enabled: bool,
    #[zeroize(skip)]
    pub email_from_address: Mailbox,
    #[zeroize(skip)]
    pub email_reply_to_address: Mailbox,
    pub smtp_address: String,
    pub smtp_username: String,
    pub smtp_key: String,
    #[zeroize(skip)]
    pub max_smtp_connections: u32,
    #[zeroize(skip)]
    pub smtp_idle_timeout: Duration,

    #[zeroize(skip)]
    pub otp_lifetime: Duration,
    #[zeroize(skip)]
    pub reset_token_lifetime: Duration,
    #[zeroize(skip)]
    pub device_trust_lifetime: Duration,
    #[zeroize(skip)]
    pub trusted_subnet_v4_prefix: u8,

    #[zeroize(skip)]
    pub actix_worker_count: usize,

    #[zeroize(skip)]
    pub log_level: String,
}

pub struct Config {
    inner: UnsafeCell<ConfigInner>,
}

impl Deref for Config {
    type Target = ConfigInner;

    fn deref(&self) -> &Self::Target {
        // Safe as long as `unsafe Config::zeroize()` hasn't been called
        unsafe { &*self.inner.get() }
    }
}

// Safe to be shared across threads as long as `unsafe Config::zeroize()` hasn't been called
unsafe impl Sync for Config {}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        // The signing secrets have no fallback. A missing key is a startup
        // failure, never a silently generated one.
        let otp_hmac_key = Zeroizing::new(
            b64.decode(env_var::<String>(OTP_HMAC_KEY_VAR)?.as_bytes())
                .map_err(|_| ConfigError::InvalidVar(OTP_HMAC_KEY_VAR))?,
        );
        let otp_hmac_key = otp_hmac_key[..]
            .try_into()
            .map_err(|_| ConfigError::InvalidVar(OTP_HMAC_KEY_VAR))?;

        let token_signing_key = Zeroizing::new(
            b64.decode(env_var::<String>(TOKEN_SIGNING_KEY_VAR)?.as_bytes())
                .map_err(|_| ConfigError::InvalidVar(TOKEN_SIGNING_KEY_VAR))?,
        );
        let token_signing_key = token_signing_key[..]
            .try_into()
            .map_err(|_| ConfigError::InvalidVar(TOKEN_SIGNING_KEY_VAR))?;

        let hashing_key = Zeroizing::new(
            b64.decode(env_var::<String>(HASHING_KEY_VAR)?.as_bytes())
                .map_err(|_| ConfigError::InvalidVar(HASHING_KEY_VAR))?,
        );
        let hashing_key = hashing_key[..]
            .try_into()
            .map_err(|_| ConfigError::InvalidVar(HASHING_KEY_VAR))?;

        let email_from_address: Mailbox = env_var_or(
            EMAIL_FROM_ADDR_VAR,
            String::from("Warden <no-reply@warden.example.gov>"),
        )
        .parse()
        .map_err(|_| ConfigError::InvalidVar(EMAIL_FROM_ADDR_VAR))?;
        let email_reply_to_address: Mailbox = env_var_or(
            EMAIL_REPLY_TO_ADDR_VAR,
            String::from("Warden Support <support@warden.example.gov>"),
        )
        .parse()
        .map_err(|_| ConfigError::InvalidVar(EMAIL_REPLY_TO_ADDR_VAR))?;

        let inner = ConfigInner {
            db_username: env_var(DB_USERNAME_VAR)?,
            db_password: env_var(DB_PASSWORD_VAR)?,
            db_hostname: env_var(DB_HOSTNAME_VAR)?,
            db_port: env_var(DB_PORT_VAR)?,
            db_name: env_var(DB_NAME_VAR)?,
            db_max_connections: env_var_or(DB_MAX_CONNECTIONS_VAR, 48),

            otp_hmac_key,
            token_signing_key,
            hashing_key,

            hash_length: env_var_or(HASH_LENGTH_VAR, 32),
            hash_iterations: env_var_or(HASH_ITERATIONS_VAR, 3),
            hash_mem_cost_kib: env_var_or(HASH_MEM_COST_KIB_VAR, 62500),
            hash_threads: env_var_or(HASH_THREADS_VAR, 2),
            hash_salt_length: env_var_or(HASH_SALT_LENGTH_VAR, 16),

            email_enabled: if cfg!(test) {
                false
            } else {
                env_var_or(EMAIL_ENABLED_VAR, false)
            },
            email_from_address,
            email_reply_to_address,
            smtp_address: env_var_or(SMTP_ADDRESS_VAR, String::new()),
            smtp_username: env_var_or(SMTP_USERNAME_VAR, String::new()),
            smtp_key: env_var_or(SMTP_KEY_VAR, String::new()),
            max_smtp_connections: env_var_or(MAX_SMTP_CONNECTIONS_VAR, 24),
            smtp_idle_timeout: Duration::from_secs(env_var_or(SMTP_IDLE_TIMEOUT_SECS_VAR, 60)),

            otp_lifetime: Duration::from_secs(env_var_or(OTP_LIFETIME_MINS_VAR, 5) * 60),
            reset_token_lifetime: Duration::from_secs(
                env_var_or(RESET_TOKEN_LIFETIME_MINS_VAR, 15) * 60,
            ),
            device_trust_lifetime: Duration::from_secs(
                env_var_or(DEVICE_TRUST_LIFETIME_DAYS_VAR, 90) * 86400,
            ),
            trusted_subnet_v4_prefix: env_var_or(
                TRUSTED_SUBNET_V4_PREFIX_VAR,
                warden_common::trust::DEFAULT_SUBNET_V4_PREFIX,
            ),

            actix_worker_count: env_var_or(ACTIX_WORKER_COUNT_VAR, num_cpus::get()),

            log_level: env_var_or(LOG_LEVEL_VAR, String::from("info")),
        };

        Ok(Config {
            inner: UnsafeCell::new(inner),
        })
    }

    /// # Safety
    ///
    /// Safe only if the Config isn't being used by other threads or across an async
    /// boundary. Generally, this should only be used at the end of the main function once
    /// all threads have been joined.
    pub unsafe fn zeroize(&self) {
        unsafe {
            (*self.inner.get()).zeroize();
        }
    }
}

fn env_var<T: FromStr>(key: &'static str) -> Result<T, ConfigError> {
    let var = std::env::var(key).map_err(|_| ConfigError::MissingVar(key))?;
    let var: T = var.parse().map_err(|_| ConfigError::InvalidVar(key))?;
    Ok(var)
}

fn env_var_or<T: FromStr>(key: &'static str, default: T) -> T {
    let Ok(var) = std::env::var(key) else {
        return default;
    };

    var.parse().unwrap_or(default)
}

#[derive(Clone, Copy, Debug)]
pub enum ConfigError {
    MissingVar(&'static str),
    InvalidVar(&'static str),
}

impl std::error::Error for ConfigError {}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingVar(key) => write!(f, "Missing environment variable '{}'", key),
            Self::InvalidVar(key) => write!(f, "Environment variable '{}' is invalid", key),
        }
    }
}
