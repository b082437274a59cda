use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use ynamazon_amazon::{AmazonConfig, FetchOptions};
use ynamazon_reconcile::{MemoFormat, MemoOptions, YNAB_MEMO_LIMIT};
use ynamazon_ynab::YnabConfig;

pub const DEFAULT_PAYEE_TO_BE_PROCESSED: &str = "Amazon - Needs Memo";
pub const DEFAULT_PAYEE_PROCESSING_COMPLETED: &str = "Amazon";
pub const DEFAULT_TRANSACTION_DAYS: u32 = 31;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0} (set it in the environment, .env, a config file or on the command line)")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

// ── Secret ───────────────────────────────────────────────────────────────────

/// A credential that never prints in full.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        let n = chars.len();
        if n > 16 {
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[n - 4..].iter().collect();
            format!("{head}****{tail}")
        } else if n > 8 {
            let tail: String = chars[n - 2..].iter().collect();
            format!("******{tail}")
        } else {
            "********".to_string()
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({})", self.masked())
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

// ── Config file ──────────────────────────────────────────────────────────────

/// Optional TOML file; keys match the environment variable names in lower case.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub ynab_api_key: Option<Secret>,
    pub ynab_budget_id: Option<Secret>,
    pub amazon_user: Option<String>,
    pub amazon_password: Option<Secret>,
    pub ynab_payee_name_to_be_processed: Option<String>,
    pub ynab_payee_name_processing_completed: Option<String>,
    pub ynab_use_markdown: Option<bool>,
    pub suppress_partial_order_warning: Option<bool>,
    pub amazon_transaction_days: Option<u32>,
    pub amazon_order_years: Option<Vec<i32>>,
    pub amazon_full_details: Option<bool>,
    pub ynab_memo_max_length: Option<usize>,
    pub ynab_base_url: Option<String>,
    pub amazon_base_url: Option<String>,
    pub amazon_session_dir: Option<PathBuf>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Values given on the command line; they win over everything else.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub ynab_api_key: Option<String>,
    pub ynab_budget_id: Option<String>,
    pub amazon_user: Option<String>,
    pub amazon_password: Option<String>,
    pub order_years: Vec<i32>,
    pub transaction_days: Option<u32>,
}

// ── Settings ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Settings {
    pub ynab_api_key: Secret,
    pub ynab_budget_id: Secret,
    pub amazon_user: String,
    pub amazon_password: Secret,
    pub payee_to_be_processed: String,
    pub payee_processing_completed: String,
    pub use_markdown: bool,
    pub suppress_partial_order_warning: bool,
    pub transaction_days: u32,
    pub order_years: Vec<i32>,
    pub full_details: bool,
    pub memo_max_length: usize,
    pub ynab_base_url: String,
    pub amazon_base_url: String,
    /// Where signed-in Amazon sessions are kept between runs.
    pub amazon_session_dir: Option<PathBuf>,
}

impl Settings {
    /// Reads `.env`, the optional config file and the process environment.
    pub fn load(config_path: Option<&Path>, overrides: &Overrides) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!("Ignoring unreadable .env file: {e}"),
        }

        let file = config_path.map(FileConfig::load).transpose()?;
        if let Some(path) = config_path {
            tracing::debug!("Loaded config file {}", path.display());
        }
        Self::resolve(|key| std::env::var(key).ok(), file.unwrap_or_default(), overrides)
    }

    /// Merges command line, file and environment (via `lookup`) over defaults.
    pub fn resolve(
        lookup: impl Fn(&str) -> Option<String>,
        file: FileConfig,
        overrides: &Overrides,
    ) -> Result<Self, ConfigError> {
        let env = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let ynab_api_key = overrides
            .ynab_api_key
            .clone()
            .map(Secret::new)
            .or(file.ynab_api_key)
            .or_else(|| env("YNAB_API_KEY").map(Secret::new))
            .ok_or(ConfigError::Missing("YNAB_API_KEY"))?;
        let ynab_budget_id = overrides
            .ynab_budget_id
            .clone()
            .map(Secret::new)
            .or(file.ynab_budget_id)
            .or_else(|| env("YNAB_BUDGET_ID").map(Secret::new))
            .ok_or(ConfigError::Missing("YNAB_BUDGET_ID"))?;
        let amazon_user = overrides
            .amazon_user
            .clone()
            .or(file.amazon_user)
            .or_else(|| env("AMAZON_USER"))
            .ok_or(ConfigError::Missing("AMAZON_USER"))?;
        let amazon_password = overrides
            .amazon_password
            .clone()
            .map(Secret::new)
            .or(file.amazon_password)
            .or_else(|| env("AMAZON_PASSWORD").map(Secret::new))
            .ok_or(ConfigError::Missing("AMAZON_PASSWORD"))?;

        let payee_to_be_processed = file
            .ynab_payee_name_to_be_processed
            .or_else(|| env("YNAB_PAYEE_NAME_TO_BE_PROCESSED"))
            .unwrap_or_else(|| DEFAULT_PAYEE_TO_BE_PROCESSED.to_string());
        let payee_processing_completed = file
            .ynab_payee_name_processing_completed
            .or_else(|| env("YNAB_PAYEE_NAME_PROCESSING_COMPLETED"))
            .unwrap_or_else(|| DEFAULT_PAYEE_PROCESSING_COMPLETED.to_string());

        let use_markdown = match file.ynab_use_markdown {
            Some(v) => v,
            None => env_bool(&env, "YNAB_USE_MARKDOWN")?.unwrap_or(false),
        };
        let suppress_partial_order_warning = match file.suppress_partial_order_warning {
            Some(v) => v,
            None => env_bool(&env, "SUPPRESS_PARTIAL_ORDER_WARNING")?.unwrap_or(false),
        };
        let full_details = match file.amazon_full_details {
            Some(v) => v,
            None => env_bool(&env, "AMAZON_FULL_DETAILS")?.unwrap_or(true),
        };

        let transaction_days = match overrides.transaction_days.or(file.amazon_transaction_days) {
            Some(v) => v,
            None => env_number(&env, "AMAZON_TRANSACTION_DAYS")?.unwrap_or(DEFAULT_TRANSACTION_DAYS),
        };
        let memo_max_length = match file.ynab_memo_max_length {
            Some(v) => v,
            None => env_number(&env, "YNAB_MEMO_MAX_LENGTH")?.unwrap_or(YNAB_MEMO_LIMIT),
        };

        let order_years = if !overrides.order_years.is_empty() {
            overrides.order_years.clone()
        } else if let Some(years) = file.amazon_order_years {
            years
        } else {
            match env("AMAZON_ORDER_YEARS") {
                Some(raw) => parse_years(&raw)?,
                None => Vec::new(),
            }
        };

        let ynab_base_url = file
            .ynab_base_url
            .or_else(|| env("YNAB_BASE_URL"))
            .unwrap_or_else(|| ynamazon_ynab::DEFAULT_BASE_URL.to_string());
        let amazon_base_url = file
            .amazon_base_url
            .or_else(|| env("AMAZON_BASE_URL"))
            .unwrap_or_else(|| ynamazon_amazon::DEFAULT_BASE_URL.to_string());
        let amazon_session_dir = file
            .amazon_session_dir
            .or_else(|| env("AMAZON_SESSION_DIR").map(PathBuf::from))
            .or_else(default_session_dir);

        let settings = Settings {
            ynab_api_key,
            ynab_budget_id,
            amazon_user,
            amazon_password,
            payee_to_be_processed,
            payee_processing_completed,
            use_markdown,
            suppress_partial_order_warning,
            transaction_days,
            order_years,
            full_details,
            memo_max_length,
            ynab_base_url,
            amazon_base_url,
            amazon_session_dir,
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let looks_like_email = self
            .amazon_user
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
        if !looks_like_email {
            return Err(ConfigError::Invalid {
                key: "AMAZON_USER",
                reason: format!("{:?} is not an email address", self.amazon_user),
            });
        }
        if self.transaction_days == 0 {
            return Err(ConfigError::Invalid {
                key: "AMAZON_TRANSACTION_DAYS",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(20..=YNAB_MEMO_LIMIT).contains(&self.memo_max_length) {
            return Err(ConfigError::Invalid {
                key: "YNAB_MEMO_MAX_LENGTH",
                reason: format!("must be between 20 and {YNAB_MEMO_LIMIT}"),
            });
        }
        if self.payee_to_be_processed == self.payee_processing_completed {
            return Err(ConfigError::Invalid {
                key: "YNAB_PAYEE_NAME_PROCESSING_COMPLETED",
                reason: "must differ from YNAB_PAYEE_NAME_TO_BE_PROCESSED".to_string(),
            });
        }
        Ok(())
    }

    pub fn ynab_config(&self) -> YnabConfig {
        YnabConfig {
            api_key: self.ynab_api_key.expose().to_string(),
            budget_id: self.ynab_budget_id.expose().to_string(),
            base_url: self.ynab_base_url.clone(),
        }
    }

    pub fn amazon_config(&self, force_logout: bool) -> AmazonConfig {
        AmazonConfig {
            username: self.amazon_user.clone(),
            password: self.amazon_password.expose().to_string(),
            base_url: self.amazon_base_url.clone(),
            force_logout,
            session_dir: self.amazon_session_dir.clone(),
        }
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            years: self.order_years.clone(),
            transaction_days: self.transaction_days,
            full_details: self.full_details,
        }
    }

    pub fn memo_options(&self) -> MemoOptions {
        MemoOptions {
            format: if self.use_markdown {
                MemoFormat::Markdown
            } else {
                MemoFormat::Plain
            },
            suppress_partial_note: self.suppress_partial_order_warning,
            max_length: self.memo_max_length,
        }
    }
}

fn default_session_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "ynamazon", "ynamazon").map(|dirs| dirs.config_dir().join("sessions"))
}

fn env_bool(env: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = env(key) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::Invalid {
            key,
            reason: format!("{raw:?} is not a boolean"),
        }),
    }
}

fn env_number<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = env(key) else {
        return Ok(None);
    };
    raw.parse().map(Some).map_err(|_| ConfigError::Invalid {
        key,
        reason: format!("{raw:?} is not a number"),
    })
}

/// Accepts `2024,2023` or `24 23`.
fn parse_years(raw: &str) -> Result<Vec<i32>, ConfigError> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|_| ConfigError::Invalid {
                key: "AMAZON_ORDER_YEARS",
                reason: format!("{s:?} is not a year"),
            })
        })
        .collect()
}
