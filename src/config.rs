//! Configuration management for the counter service.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use crate::counter::MAX_ENTRY_TTL_SECS;
use crate::error::{CounterError, Result};

/// Prefix for environment overrides, e.g. `SSO_COUNTERS__COUNTERS__IP__ENTRY_TTL_SECS=10`.
pub const ENV_PREFIX: &str = "SSO_COUNTERS";

/// Main configuration for the counter service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter families
    #[serde(default)]
    pub counters: CountersConfig,

    /// In-process cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Header set by the front proxy (nginx) carrying the client address
    #[serde(
        default = "default_proxy_ip_header",
        alias = "ipHeaderName",
        alias = "ipheadername"
    )]
    pub proxy_ip_header: String,

    /// What the admission filter does when the counter cache fails
    #[serde(default)]
    pub fail_mode: FailMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            proxy_ip_header: default_proxy_ip_header(),
            fail_mode: FailMode::default(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_proxy_ip_header() -> String {
    "X-Real-IP".to_string()
}

/// Admission policy applied when the counter cache is unreachable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Reject the request with 503.
    #[default]
    Closed,
    /// Let the request through as not limited and log a warning.
    Open,
}

/// Settings of the two counter families.
///
/// Each field of each family falls back to its own default, so a file or an
/// environment override may set just one of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "CountersFile")]
pub struct CountersConfig {
    /// Remote IP counter
    pub ip: CounterSettings,

    /// Sensitive action counter (password reset, confirmation retries)
    pub generic: CounterSettings,
}

impl Default for CountersConfig {
    fn default() -> Self {
        Self {
            ip: CounterSettings::ip_defaults(),
            generic: CounterSettings::generic_defaults(),
        }
    }
}

/// `counters` section as written in a file, every value optional.
#[derive(Debug, Default, Deserialize)]
struct CountersFile {
    #[serde(default, alias = "ipcounter")]
    ip: SettingsFile,
    #[serde(default)]
    generic: SettingsFile,
}

/// One family as written in a file. The `config` loader lowercases keys, so
/// the property-style spellings are listed in both cases.
#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(
        default,
        alias = "entryTimeToLiveSeconds",
        alias = "entrytimetoliveseconds"
    )]
    entry_ttl_secs: Option<u64>,
    #[serde(
        default,
        alias = "numberOfSafeRequests",
        alias = "numberofsaferequests"
    )]
    number_of_safe_requests: Option<u64>,
}

impl SettingsFile {
    fn or(self, defaults: CounterSettings) -> CounterSettings {
        CounterSettings {
            entry_ttl_secs: self.entry_ttl_secs.unwrap_or(defaults.entry_ttl_secs),
            number_of_safe_requests: self
                .number_of_safe_requests
                .unwrap_or(defaults.number_of_safe_requests),
        }
    }
}

impl From<CountersFile> for CountersConfig {
    fn from(file: CountersFile) -> Self {
        Self {
            ip: file.ip.or(CounterSettings::ip_defaults()),
            generic: file.generic.or(CounterSettings::generic_defaults()),
        }
    }
}

/// TTL and limit of one counter family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterSettings {
    /// Seconds after which an entry is evicted; the window is not extended by hits
    pub entry_ttl_secs: u64,

    /// Count at which `increment_and_check` starts reporting abuse
    pub number_of_safe_requests: u64,
}

impl CounterSettings {
    /// Defaults of the IP counter: 30 seconds, 5 requests.
    pub fn ip_defaults() -> Self {
        Self {
            entry_ttl_secs: 30,
            number_of_safe_requests: 5,
        }
    }

    /// Defaults of the generic counter: one hour, 5 tries.
    pub fn generic_defaults() -> Self {
        Self {
            entry_ttl_secs: 3600,
            number_of_safe_requests: 5,
        }
    }

    fn validate(&self, family: &str) -> Result<()> {
        if self.entry_ttl_secs == 0 || self.entry_ttl_secs > MAX_ENTRY_TTL_SECS {
            return Err(CounterError::Config(format!(
                "counters.{family}.entry_ttl_secs must be between 1 and {MAX_ENTRY_TTL_SECS}"
            )));
        }
        if self.number_of_safe_requests == 0 {
            return Err(CounterError::Config(format!(
                "counters.{family}.number_of_safe_requests must be positive"
            )));
        }
        Ok(())
    }
}

/// In-process cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How often expired entries are swept from memory
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    60
}

impl AppConfig {
    /// Load configuration from a YAML string, without environment overrides.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::build(
            ::config::Config::builder()
                .add_source(::config::File::from_str(yaml, ::config::FileFormat::Yaml)),
        )
    }

    /// Layered load: defaults, then the optional file, then `SSO_COUNTERS__*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        Self::build(
            builder.add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            ),
        )
    }

    fn build(builder: ::config::ConfigBuilder<::config::builder::DefaultState>) -> Result<Self> {
        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with. Never clamps.
    pub fn validate(&self) -> Result<()> {
        self.counters.ip.validate("ip")?;
        self.counters.generic.validate("generic")?;
        if self.cache.sweep_interval_secs == 0 {
            return Err(CounterError::Config(
                "cache.sweep_interval_secs must be positive".to_string(),
            ));
        }
        if self.server.proxy_ip_header.trim().is_empty() {
            return Err(CounterError::Config(
                "server.proxy_ip_header must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.counters.ip.entry_ttl_secs, 30);
        assert_eq!(config.counters.ip.number_of_safe_requests, 5);
        assert_eq!(config.counters.generic.entry_ttl_secs, 3600);
        assert_eq!(config.counters.generic.number_of_safe_requests, 5);
        assert_eq!(config.server.proxy_ip_header, "X-Real-IP");
        assert_eq!(config.server.fail_mode, FailMode::Closed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
counters:
  ip:
    entry_ttl_secs: 10
    number_of_safe_requests: 3
server:
  fail_mode: open
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.counters.ip.entry_ttl_secs, 10);
        assert_eq!(config.counters.ip.number_of_safe_requests, 3);
        assert_eq!(config.counters.generic, CounterSettings::generic_defaults());
        assert_eq!(config.server.fail_mode, FailMode::Open);
    }

    #[test]
    fn test_parse_property_style_names() {
        let yaml = r#"
counters:
  ipcounter:
    entryTimeToLiveSeconds: 15
    numberOfSafeRequests: 7
  generic:
    entryTimeToLiveSeconds: 600
    numberOfSafeRequests: 2
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.counters.ip.entry_ttl_secs, 15);
        assert_eq!(config.counters.ip.number_of_safe_requests, 7);
        assert_eq!(config.counters.generic.entry_ttl_secs, 600);
        assert_eq!(config.counters.generic.number_of_safe_requests, 2);
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let yaml = r#"
counters:
  generic:
    entry_ttl_secs: 0
    number_of_safe_requests: 5
"#;
        let err = AppConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, CounterError::Config(_)));
        assert!(err.to_string().contains("generic.entry_ttl_secs"));
    }

    #[test]
    fn test_zero_limit_rejected() {
        let mut config = AppConfig::default();
        config.counters.ip.number_of_safe_requests = 0;
        assert!(matches!(config.validate(), Err(CounterError::Config(_))));
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let mut config = AppConfig::default();
        config.cache.sweep_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ttl_above_maximum_rejected() {
        let mut config = AppConfig::default();
        config.counters.ip.entry_ttl_secs = u64::MAX;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, CounterError::Config(_)));

        config.counters.ip.entry_ttl_secs = MAX_ENTRY_TTL_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_single_field_keeps_family_default() {
        let yaml = r#"
counters:
  ip:
    number_of_safe_requests: 9
  generic:
    entry_ttl_secs: 60
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.counters.ip.entry_ttl_secs, 30);
        assert_eq!(config.counters.ip.number_of_safe_requests, 9);
        assert_eq!(config.counters.generic.entry_ttl_secs, 60);
        assert_eq!(config.counters.generic.number_of_safe_requests, 5);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = temp_env::with_var_unset(ENV_TTL_VAR, || AppConfig::load(None)).unwrap();
        assert_eq!(config.counters.ip, CounterSettings::ip_defaults());
        assert_eq!(config.counters.generic, CounterSettings::generic_defaults());
    }

    const ENV_TTL_VAR: &str = "SSO_COUNTERS__COUNTERS__IP__ENTRY_TTL_SECS";

    #[test]
    fn test_load_single_env_override() {
        let config =
            temp_env::with_var(ENV_TTL_VAR, Some("10"), || AppConfig::load(None)).unwrap();
        assert_eq!(config.counters.ip.entry_ttl_secs, 10);
        assert_eq!(config.counters.ip.number_of_safe_requests, 5);
        assert_eq!(config.counters.generic, CounterSettings::generic_defaults());
    }

    #[test]
    fn test_load_property_style_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            "counters:\n  ipcounter:\n    entryTimeToLiveSeconds: 15\n    numberOfSafeRequests: 7\n"
        )
        .unwrap();

        let config =
            temp_env::with_var_unset(ENV_TTL_VAR, || AppConfig::load(Some(file.path()))).unwrap();
        assert_eq!(config.counters.ip.entry_ttl_secs, 15);
        assert_eq!(config.counters.ip.number_of_safe_requests, 7);
        assert_eq!(config.counters.generic, CounterSettings::generic_defaults());
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/sso-counters.yaml"))).unwrap_err();
        assert!(matches!(err, CounterError::Config(_)));
    }
}
