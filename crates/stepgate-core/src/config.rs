use crate::admission::AdmissionBudget;
use crate::auth::Credential;
use crate::error::ConfigError;
use crate::orchestrator::RetryPolicy;
use crate::sink::SinkConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for every environment override, e.g. `STEPGATE_CREDENTIAL_VALUE`.
pub const ENV_PREFIX: &str = "STEPGATE_";

// ---------------------------------------------------------------------------
// RouteMode
// ---------------------------------------------------------------------------

/// What `POST /run` invokes once a request is admitted and authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteMode {
    /// Call the worker task directly and return its receipt.
    #[default]
    Direct,
    /// Start a workflow run and return the finished run.
    Orchestrated,
}

impl RouteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteMode::Direct => "direct",
            RouteMode::Orchestrated => "orchestrated",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(RouteMode::Direct),
            "orchestrated" => Some(RouteMode::Orchestrated),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// RoleSource / ExecutionRole
// ---------------------------------------------------------------------------

/// Where the identity that runs tasks comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoleSource {
    /// The gateway owns its identity and is granted read/write on the bucket.
    #[default]
    Managed,
    /// A pre-provisioned identity, referenced by ARN and never modified.
    Imported { arn: String },
}

/// A [`RoleSource`] resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRole {
    label: String,
    grants_bucket_access: bool,
}

impl ExecutionRole {
    /// Identifier stamped on every run this role executes.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Managed roles receive bucket grants; imported roles are assumed to have them.
    pub fn grants_bucket_access(&self) -> bool {
        self.grants_bucket_access
    }
}

impl RoleSource {
    pub fn resolve(&self) -> ExecutionRole {
        match self {
            RoleSource::Managed => ExecutionRole {
                label: "managed".to_string(),
                grants_bucket_access: true,
            },
            RoleSource::Imported { arn } => ExecutionRole {
                label: arn.clone(),
                grants_bucket_access: false,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigFile: the on-disk / env shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_backoff_ms() -> u64 {
    200
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

/// Unvalidated configuration as read from YAML and the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default = "default_credential_header")]
    pub credential_header: String,
    #[serde(default)]
    pub credential_value: Option<String>,
    #[serde(default)]
    pub bucket_identifier: Option<String>,
    #[serde(default = "default_steady_rate")]
    pub steady_rate: f64,
    #[serde(default = "default_burst_capacity")]
    pub burst_capacity: u32,
    #[serde(default = "default_task_timeout_seconds")]
    pub task_timeout_seconds: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub route: RouteMode,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub role: RoleSource,
    #[serde(default)]
    pub ledger_path: Option<PathBuf>,
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_credential_header() -> String {
    "my-secret".to_string()
}

fn default_steady_rate() -> f64 {
    10.0
}

fn default_burst_capacity() -> u32 {
    20
}

fn default_task_timeout_seconds() -> u64 {
    10
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            credential_header: default_credential_header(),
            credential_value: None,
            bucket_identifier: None,
            steady_rate: default_steady_rate(),
            burst_capacity: default_burst_capacity(),
            task_timeout_seconds: default_task_timeout_seconds(),
            retry: RetryConfig::default(),
            route: RouteMode::default(),
            sink: SinkConfig::default(),
            role: RoleSource::default(),
            ledger_path: None,
            bind: default_bind(),
        }
    }
}

impl ConfigFile {
    pub fn from_yaml(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Overlay `STEPGATE_*` variables on top of the file values.
    ///
    /// `lookup` is injected so tests don't have to touch the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = var("CREDENTIAL_HEADER") {
            self.credential_header = v;
        }
        if let Some(v) = var("CREDENTIAL_VALUE") {
            self.credential_value = Some(v);
        }
        if let Some(v) = var("BUCKET_IDENTIFIER") {
            self.bucket_identifier = Some(v);
        }
        if let Some(v) = var("STEADY_RATE") {
            self.steady_rate = parse_env("steady_rate", &v)?;
        }
        if let Some(v) = var("BURST_CAPACITY") {
            self.burst_capacity = parse_env("burst_capacity", &v)?;
        }
        if let Some(v) = var("TASK_TIMEOUT_SECONDS") {
            self.task_timeout_seconds = parse_env("task_timeout_seconds", &v)?;
        }
        if let Some(v) = var("ROUTE") {
            self.route = RouteMode::parse(&v).ok_or_else(|| ConfigError::Invalid {
                field: "route",
                reason: format!("'{v}' is not one of: direct, orchestrated"),
            })?;
        }
        if let Some(v) = var("LEDGER_PATH") {
            self.ledger_path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("BIND") {
            self.bind = v;
        }
        Ok(())
    }

    /// Validate and convert into the immutable runtime [`Config`].
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let credential_value = self
            .credential_value
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("credential_value"))?;
        if !is_valid_header_name(&self.credential_header) {
            return Err(ConfigError::Invalid {
                field: "credential_header",
                reason: format!("'{}' is not a valid HTTP header name", self.credential_header),
            });
        }

        let bucket_identifier = self
            .bucket_identifier
            .filter(|b| !b.is_empty())
            .ok_or(ConfigError::Missing("bucket_identifier"))?;
        validate_bucket(&bucket_identifier)?;

        if !self.steady_rate.is_finite() || self.steady_rate <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "steady_rate",
                reason: "must be a positive number".to_string(),
            });
        }
        if self.burst_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "burst_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.task_timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "task_timeout_seconds",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if let RoleSource::Imported { arn } = &self.role {
            if !arn.starts_with("arn:") {
                return Err(ConfigError::Invalid {
                    field: "role.arn",
                    reason: format!("'{arn}' is not an ARN"),
                });
            }
        }

        Ok(Config {
            credential: Credential::new(self.credential_header, credential_value),
            bucket_identifier,
            admission: AdmissionBudget {
                steady_rate: self.steady_rate,
                burst_capacity: self.burst_capacity,
            },
            task_timeout: Duration::from_secs(self.task_timeout_seconds),
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts,
                backoff: Duration::from_millis(self.retry.backoff_ms),
            },
            route: self.route,
            sink: self.sink,
            role: self.role,
            ledger_path: self.ledger_path,
            bind: self.bind,
        })
    }
}

fn parse_env<T: std::str::FromStr>(field: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        field,
        reason: format!("'{raw}' could not be parsed"),
    })
}

fn is_valid_header_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c))
}

/// Object-store bucket naming: 3-63 chars of lowercase letters, digits, `-` and `.`,
/// starting and ending with a letter or digit.
fn validate_bucket(bucket: &str) -> Result<(), ConfigError> {
    let well_formed = (3..=63).contains(&bucket.len())
        && bucket
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        && bucket
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric())
        && bucket
            .chars()
            .last()
            .is_some_and(|c| c.is_ascii_alphanumeric());
    if well_formed {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field: "bucket_identifier",
            reason: format!("'{bucket}' is not a valid bucket name"),
        })
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Process-wide configuration, built once at startup and injected into every
/// component constructor.
#[derive(Debug, Clone)]
pub struct Config {
    pub credential: Credential,
    pub bucket_identifier: String,
    pub admission: AdmissionBudget,
    pub task_timeout: Duration,
    pub retry: RetryPolicy,
    pub route: RouteMode,
    pub sink: SinkConfig,
    pub role: RoleSource,
    pub ledger_path: Option<PathBuf>,
    pub bind: String,
}

impl Config {
    /// Load from an optional YAML file, overlay the process environment, validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut file = match path {
            Some(p) => ConfigFile::from_yaml(p)?,
            None => ConfigFile::default(),
        };
        file.apply_env(|k| std::env::var(k).ok())?;
        file.resolve()
    }

    /// JSON view safe to print: the credential value is redacted.
    pub fn redacted(&self) -> serde_json::Value {
        serde_json::json!({
            "credential_header": self.credential.header(),
            "credential_value": "<redacted>",
            "bucket_identifier": self.bucket_identifier,
            "steady_rate": self.admission.steady_rate,
            "burst_capacity": self.admission.burst_capacity,
            "task_timeout_seconds": self.task_timeout.as_secs(),
            "retry": {
                "max_attempts": self.retry.max_attempts,
                "backoff_ms": u64::try_from(self.retry.backoff.as_millis()).unwrap_or(u64::MAX),
            },
            "route": self.route.as_str(),
            "sink": self.sink,
            "role": self.role,
            "ledger_path": self.ledger_path,
            "bind": self.bind,
        })
    }
}
