//! Configuration module
//!
//! Worker and CLI settings are read from the process environment (after
//! loading a `.env` file when present). `validate` enforces the settings the
//! worker needs before it touches the broker.

use std::env;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::time::Duration;

use crate::storage_types::StorageBackend;

const DB_MAX_CONNECTIONS: u32 = 5;
const DB_TIMEOUT_SECS: u64 = 30;
const BROKER_CONNECT_MAX_RETRIES: u32 = 10;
const BROKER_CONNECT_RETRY_DELAY_MS: u64 = 3000;
const SUBMISSION_QUEUE: &str = "expense_processing";
const RESULT_QUEUE: &str = "expense_results";
const STORAGE_BUCKET: &str = "expenses";
const STORAGE_REGION: &str = "us-east-1";
const OCR_PATH: &str = "/ocr/tesseract/url";
const OCR_TIMEOUT_SECS: u64 = 60;
const LLM_MODEL: &str = "llm7.io/default";
const LLM_TIMEOUT_SECS: u64 = 120;
const IMAGE_FETCH_TIMEOUT_SECS: u64 = 30;
const MAX_IMAGE_SIZE_MB: usize = 20;
const MESSAGE_TIMEOUT_SECS: u64 = 600;

/// What to do with a delivery whose processing could not reach a recorded outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NackPolicy {
    /// Reject without requeue. Avoids poison-message loops.
    #[default]
    Drop,
    /// Requeue a first delivery once; drop it if it fails again after redelivery.
    RequeueOnce,
}

impl NackPolicy {
    /// Whether a failed delivery should go back on the queue.
    pub fn should_requeue(&self, redelivered: bool) -> bool {
        match self {
            NackPolicy::Drop => false,
            NackPolicy::RequeueOnce => !redelivered,
        }
    }
}

impl FromStr for NackPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "drop" => Ok(NackPolicy::Drop),
            "requeue_once" | "requeue-once" => Ok(NackPolicy::RequeueOnce),
            _ => Err(anyhow::anyhow!("Invalid nack policy: {}", s)),
        }
    }
}

impl Display for NackPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            NackPolicy::Drop => write!(f, "drop"),
            NackPolicy::RequeueOnce => write!(f, "requeue_once"),
        }
    }
}

/// Message broker settings
#[derive(Clone, Debug)]
pub struct BrokerSettings {
    pub url: String,
    pub submission_queue: String,
    pub result_queue: String,
    pub connect_max_retries: u32,
    pub connect_retry_delay: Duration,
    pub nack_policy: NackPolicy,
}

/// Object storage settings for archived receipt images
#[derive(Clone, Debug)]
pub struct ObjectStorageSettings {
    pub backend: StorageBackend,
    /// Custom endpoint for S3-compatible providers (MinIO etc.)
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub bucket: String,
    pub region: String,
    pub local_path: Option<String>,
    pub local_base_url: Option<String>,
}

/// Text recognition service
#[derive(Clone, Debug)]
pub struct OcrSettings {
    pub base_url: String,
    pub path: String,
    pub timeout: Duration,
}

/// Chat-completions service used for structured extraction
#[derive(Clone, Debug)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

/// Full process configuration for the worker and the intake CLI.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub environment: String,
    pub log_json: bool,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub broker: BrokerSettings,
    pub storage: ObjectStorageSettings,
    pub ocr: OcrSettings,
    pub llm: LlmSettings,
    pub image_fetch_timeout: Duration,
    pub max_image_size_mb: usize,
    /// Upper bound on the whole pipeline for one message
    pub message_timeout: Duration,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let log_json = env_or("LOG_FORMAT", "plain").eq_ignore_ascii_case("json");

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let nack_policy = match env_opt("BROKER_NACK_POLICY") {
            Some(raw) => raw.parse::<NackPolicy>()?,
            None => NackPolicy::default(),
        };

        let broker = BrokerSettings {
            url: env_or("RABBITMQ_URL", "amqp://localhost"),
            submission_queue: env_or("RABBITMQ_QUEUE", SUBMISSION_QUEUE),
            result_queue: env_or("RABBITMQ_REPLY_QUEUE", RESULT_QUEUE),
            connect_max_retries: env_parse("BROKER_CONNECT_MAX_RETRIES", BROKER_CONNECT_MAX_RETRIES),
            connect_retry_delay: Duration::from_millis(env_parse(
                "BROKER_CONNECT_RETRY_DELAY_MS",
                BROKER_CONNECT_RETRY_DELAY_MS,
            )),
            nack_policy,
        };

        let backend = match env_opt("STORAGE_BACKEND") {
            Some(raw) => raw.parse::<StorageBackend>()?,
            None => StorageBackend::S3,
        };

        let storage = ObjectStorageSettings {
            backend,
            endpoint: env_opt("OBJECT_STORAGE_URL"),
            access_key: env_opt("OBJECT_STORAGE_KEY"),
            secret_key: env_opt("OBJECT_STORAGE_SECRET"),
            bucket: env_or("OBJECT_STORAGE_BUCKET", STORAGE_BUCKET),
            region: env_or("OBJECT_STORAGE_REGION", STORAGE_REGION),
            local_path: env_opt("LOCAL_STORAGE_PATH"),
            local_base_url: env_opt("LOCAL_STORAGE_BASE_URL"),
        };

        let ocr = OcrSettings {
            base_url: env_or("OCR_SERVICE_URL", ""),
            path: env_or("OCR_PATH", OCR_PATH),
            timeout: Duration::from_secs(env_parse("OCR_TIMEOUT_SECS", OCR_TIMEOUT_SECS)),
        };

        let llm = LlmSettings {
            base_url: env_or("LLM_SERVICE_URL", ""),
            model: env_or("LLM_MODEL", LLM_MODEL),
            api_key: env_opt("LITELLM_API_KEY"),
            timeout: Duration::from_secs(env_parse("LLM_TIMEOUT_SECS", LLM_TIMEOUT_SECS)),
        };

        Ok(Self {
            environment,
            log_json,
            database_url,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", DB_MAX_CONNECTIONS),
            db_timeout_seconds: env_parse("DB_TIMEOUT_SECONDS", DB_TIMEOUT_SECS),
            broker,
            storage,
            ocr,
            llm,
            image_fetch_timeout: Duration::from_secs(env_parse(
                "IMAGE_FETCH_TIMEOUT_SECS",
                IMAGE_FETCH_TIMEOUT_SECS,
            )),
            max_image_size_mb: env_parse("MAX_IMAGE_SIZE_MB", MAX_IMAGE_SIZE_MB),
            message_timeout: Duration::from_secs(env_parse(
                "WORKER_MESSAGE_TIMEOUT_SECS",
                MESSAGE_TIMEOUT_SECS,
            )),
        })
    }

    /// Download cap in bytes; `None` when the configured size overflows.
    pub fn max_image_size_bytes(&self) -> Option<usize> {
        self.max_image_size_mb.checked_mul(1024 * 1024)
    }

    /// Checks the settings the worker process needs. The intake CLI only
    /// needs the database and broker and skips this.
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.database_url.starts_with("postgres://")
            && !self.database_url.starts_with("postgresql://")
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        if !self.broker.url.starts_with("amqp://") && !self.broker.url.starts_with("amqps://") {
            return Err(anyhow::anyhow!("RABBITMQ_URL must be an amqp:// or amqps:// URL"));
        }

        if self.broker.connect_max_retries == 0 {
            return Err(anyhow::anyhow!("BROKER_CONNECT_MAX_RETRIES must be at least 1"));
        }

        if self.broker.submission_queue == self.broker.result_queue {
            return Err(anyhow::anyhow!(
                "RABBITMQ_QUEUE and RABBITMQ_REPLY_QUEUE must be different queues"
            ));
        }

        if self.ocr.base_url.is_empty() {
            return Err(anyhow::anyhow!("OCR_SERVICE_URL must be set"));
        }

        if self.llm.base_url.is_empty() {
            return Err(anyhow::anyhow!("LLM_SERVICE_URL must be set"));
        }

        match self.max_image_size_bytes() {
            Some(0) => return Err(anyhow::anyhow!("MAX_IMAGE_SIZE_MB must be at least 1")),
            None => return Err(anyhow::anyhow!("MAX_IMAGE_SIZE_MB is too large")),
            Some(_) => {}
        }

        if self.storage.backend == StorageBackend::Local
            && (self.storage.local_path.is_none() || self.storage.local_base_url.is_none())
        {
            return Err(anyhow::anyhow!(
                "STORAGE_BACKEND=local requires LOCAL_STORAGE_PATH and LOCAL_STORAGE_BASE_URL"
            ));
        }

        if self.storage.access_key.is_some() != self.storage.secret_key.is_some() {
            return Err(anyhow::anyhow!(
                "OBJECT_STORAGE_KEY and OBJECT_STORAGE_SECRET must be set together"
            ));
        }

        Ok(())
    }
}
