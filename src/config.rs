//! TOML configuration with environment fallbacks for secrets.
//!
//! Structure lives in the config file; credentials may be left out of it and
//! are then read from the environment (`SALESFORCE_*`, `API_UPSERT_URL`,
//! `BEARER_TOKEN_UPSERT`, `PERIODICITY_MINUTES`). Every section is optional,
//! so an empty file (or none at the default path) configures from the
//! environment alone. All validation happens in
//! [`load_config`] so a bad config stops the process before any cycle runs.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub crm: CrmConfig,
    #[serde(default)]
    pub upsert: UpsertConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrmConfig {
    /// `test` or `production`, any case.
    #[serde(default = "default_org_type")]
    pub org_type: String,
    #[serde(default)]
    pub auth: CrmAuthMode,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub security_token: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub instance_url: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    /// Overrides the login host derived from `org_type`.
    #[serde(default)]
    pub login_url: Option<String>,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            org_type: default_org_type(),
            auth: CrmAuthMode::default(),
            api_version: default_api_version(),
            username: None,
            password: None,
            security_token: None,
            domain: None,
            instance_url: None,
            access_token: None,
            login_url: None,
        }
    }
}

fn default_org_type() -> String {
    "production".to_string()
}
fn default_api_version() -> String {
    "59.0".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CrmAuthMode {
    /// Username + password + security token via the SOAP login call.
    #[default]
    Password,
    /// Pre-issued bearer token against a known instance.
    Token,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrgType {
    Test,
    Production,
}

impl OrgType {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "test" => Ok(OrgType::Test),
            "production" => Ok(OrgType::Production),
            other => bail!(
                "crm.org_type must be 'test' or 'production', got '{}'",
                other
            ),
        }
    }

    pub fn login_url(self) -> &'static str {
        match self {
            OrgType::Test => "https://test.salesforce.com",
            OrgType::Production => "https://login.salesforce.com",
        }
    }
}

impl CrmConfig {
    pub fn org(&self) -> Result<OrgType> {
        OrgType::parse(&self.org_type)
    }

    /// Login host for password auth.
    pub fn resolved_login_url(&self) -> Result<String> {
        match &self.login_url {
            Some(url) => Ok(url.trim_end_matches('/').to_string()),
            None => Ok(self.org()?.login_url().to_string()),
        }
    }

    /// Instance base URL for token auth.
    pub fn resolved_instance_url(&self) -> Option<String> {
        if let Some(url) = &self.instance_url {
            return Some(url.trim_end_matches('/').to_string());
        }
        self.domain
            .as_ref()
            .map(|d| format!("https://{}.my.salesforce.com", d))
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct UpsertConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl UpsertConfig {
    pub fn upsert_url(&self) -> String {
        format!("{}/upsert", self.endpoint.trim_end_matches('/'))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DedupMode {
    /// Skip records whose id is in the ledger file.
    #[default]
    Ledger,
    /// Skip records whose CRM synced flag is set, and set it after upsert.
    CrmFlag,
    /// Upsert every online record every cycle.
    None,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default)]
    pub dedup: DedupMode,
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default)]
    pub results_log: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dedup: DedupMode::default(),
            ledger_path: default_ledger_path(),
            interval_minutes: default_interval_minutes(),
            results_log: None,
        }
    }
}

impl PipelineConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("inserted_ids.json")
}
fn default_interval_minutes() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

/// Read, fill from environment, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content, |key| std::env::var(key).ok())
}

/// Load `path` if it exists, otherwise configure from the environment alone.
///
/// Used for the default config location, so a deployment that only sets
/// `SALESFORCE_*`, `API_UPSERT_URL` and `BEARER_TOKEN_UPSERT` still starts.
pub fn load_config_or_env(path: &Path) -> Result<Config> {
    if path.exists() {
        return load_config(path);
    }
    tracing::debug!(path = %path.display(), "no config file, reading settings from environment");
    parse_config("", |key| std::env::var(key).ok())
}

/// Parse and validate config text. `env` resolves fallback variables.
pub fn parse_config(content: &str, env: impl Fn(&str) -> Option<String>) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;
    apply_env(&mut config, &env)?;
    validate(&config)?;
    Ok(config)
}

fn apply_env(config: &mut Config, env: &impl Fn(&str) -> Option<String>) -> Result<()> {
    let crm = &mut config.crm;
    fill(&mut crm.username, env("SALESFORCE_USERNAME"));
    fill(&mut crm.password, env("SALESFORCE_PASSWORD"));
    fill(&mut crm.security_token, env("SALESFORCE_SECURITY_TOKEN"));
    fill(&mut crm.domain, env("SALESFORCE_DOMAIN"));
    fill(&mut crm.access_token, env("SALESFORCE_ACCESS_TOKEN"));
    if let Some(org) = env("SALESFORCE_ORG_TYPE") {
        crm.org_type = org;
    }

    if config.upsert.endpoint.is_empty() {
        if let Some(url) = env("API_UPSERT_URL") {
            config.upsert.endpoint = url;
        }
    }
    fill(&mut config.upsert.token, env("BEARER_TOKEN_UPSERT"));

    if let Some(minutes) = env("PERIODICITY_MINUTES") {
        config.pipeline.interval_minutes = minutes
            .trim()
            .parse()
            .with_context(|| format!("PERIODICITY_MINUTES is not a number: '{}'", minutes))?;
    }
    Ok(())
}

fn fill(slot: &mut Option<String>, value: Option<String>) {
    if slot.is_none() {
        *slot = value;
    }
}

fn validate(config: &Config) -> Result<()> {
    config.crm.org()?;

    match config.crm.auth {
        CrmAuthMode::Password => {
            if config.crm.username.is_none()
                || config.crm.password.is_none()
                || config.crm.security_token.is_none()
            {
                bail!(
                    "crm.auth = 'password' requires username, password and security_token \
                     (or SALESFORCE_USERNAME, SALESFORCE_PASSWORD, SALESFORCE_SECURITY_TOKEN)"
                );
            }
        }
        CrmAuthMode::Token => {
            if config.crm.access_token.is_none() {
                bail!("crm.auth = 'token' requires access_token (or SALESFORCE_ACCESS_TOKEN)");
            }
            if config.crm.resolved_instance_url().is_none() {
                bail!("crm.auth = 'token' requires domain or instance_url");
            }
        }
    }

    if config.upsert.endpoint.trim().is_empty() {
        bail!("upsert.endpoint must be set (or API_UPSERT_URL)");
    }
    if config.upsert.token.as_deref().map_or(true, str::is_empty) {
        bail!("upsert.token must be set (or BEARER_TOKEN_UPSERT)");
    }

    if config.pipeline.interval_minutes == 0 {
        bail!("pipeline.interval_minutes must be >= 1");
    }
    if config.pipeline.dedup == DedupMode::Ledger
        && config.pipeline.ledger_path.as_os_str().is_empty()
    {
        bail!("pipeline.ledger_path must be set when dedup = 'ledger'");
    }

    Ok(())
}
