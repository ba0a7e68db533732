use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::rest::{DEFAULT_STS_URL, HttpSettings};

pub const DEFAULT_USER_AGENT: &str = "spfixture/0.1";
pub const DEFAULT_CONFIG_FILE: &str = "spfixture.toml";
pub const CONFIG_PATH_ENV: &str = "SPFIXTURE_CONFIG";

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct ToolConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub http: HttpSection,
}

/// Connection defaults used when neither a flag nor an environment variable
/// supplies a value.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct ServerSection {
    pub domain: Option<String>,
    pub username: Option<String>,
    pub web_application_url: Option<String>,
    pub admin_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct HttpSection {
    pub user_agent: Option<String>,
    /// Per-request timeout; absent or zero waits indefinitely.
    pub timeout_ms: Option<u64>,
    pub sts_url: Option<String>,
}

impl ToolConfig {
    /// Resolve user agent: env SPFIXTURE_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        if let Ok(value) = env::var("SPFIXTURE_USER_AGENT") {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return trimmed;
            }
        }
        self.http
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.http
            .timeout_ms
            .filter(|millis| *millis > 0)
            .map(Duration::from_millis)
    }

    pub fn sts_url(&self) -> &str {
        self.http.sts_url.as_deref().unwrap_or(DEFAULT_STS_URL)
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            user_agent: self.user_agent(),
            timeout: self.timeout(),
            sts_url: self.sts_url().to_string(),
        }
    }
}

/// Config file location: env SPFIXTURE_CONFIG > `spfixture.toml` in the
/// working directory.
pub fn config_path() -> PathBuf {
    env::var(CONFIG_PATH_ENV)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Load and parse a ToolConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<ToolConfig> {
    if !config_path.exists() {
        return Ok(ToolConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ToolConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub domain: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub web_application_url: Option<String>,
    pub admin_port: Option<u16>,
    pub action_file: PathBuf,
}

/// Fully merged run settings. `password` stays `None` until prompted for.
#[derive(Clone)]
pub struct RunSettings {
    pub domain: String,
    pub username: String,
    pub password: Option<String>,
    pub web_application_url: String,
    pub admin_port: u16,
    pub action_file: PathBuf,
}

impl RunSettings {
    pub fn resolve(overrides: SettingsOverrides, config: &ToolConfig) -> Result<Self> {
        Self::resolve_with_lookup(overrides, config, |key| env::var(key).ok())
    }

    /// Merge flag > environment > config file for every setting.
    pub fn resolve_with_lookup<F>(
        overrides: SettingsOverrides,
        config: &ToolConfig,
        lookup: F,
    ) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let domain = overrides
            .domain
            .or_else(|| env_value("SP_DOMAIN"))
            .or_else(|| config.server.domain.clone());
        let username = overrides
            .username
            .or_else(|| env_value("SP_USERNAME"))
            .or_else(|| config.server.username.clone());
        let password = overrides.password.or_else(|| env_value("SP_PASSWORD"));
        let web_application_url = overrides
            .web_application_url
            .or_else(|| env_value("SP_WEB_APPLICATION_URL"))
            .or_else(|| config.server.web_application_url.clone());
        let admin_port = match overrides.admin_port {
            Some(port) => Some(port),
            None => match env_value("SP_ADMIN_PORT") {
                Some(value) => Some(
                    value
                        .parse::<u16>()
                        .with_context(|| format!("SP_ADMIN_PORT is not a port number: {value}"))?,
                ),
                None => config.server.admin_port,
            },
        };

        if overrides.action_file.as_os_str().is_empty() {
            bail!("missing required setting --action-file");
        }
        Ok(Self {
            domain: require(domain, "domain", "SP_DOMAIN")?,
            username: require(username, "username", "SP_USERNAME")?,
            password,
            web_application_url: require(
                web_application_url,
                "web-application-url",
                "SP_WEB_APPLICATION_URL",
            )?,
            admin_port: require(admin_port, "port", "SP_ADMIN_PORT")?,
            action_file: overrides.action_file,
        })
    }
}

fn require<T>(value: Option<T>, flag: &str, env_key: &str) -> Result<T> {
    match value {
        Some(value) => Ok(value),
        None => bail!("missing required setting --{flag} (or {env_key})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn overrides() -> SettingsOverrides {
        SettingsOverrides {
            action_file: PathBuf::from("actions.json"),
            ..SettingsOverrides::default()
        }
    }

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_has_no_server_values() {
        let config = ToolConfig::default();
        assert!(config.server.web_application_url.is_none());
        assert!(config.timeout().is_none());
        assert_eq!(config.sts_url(), DEFAULT_STS_URL);
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/spfixture.toml")).expect("load config");
        assert_eq!(config, ToolConfig::default());
    }

    #[test]
    fn load_config_parses_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("spfixture.toml");
        fs::write(
            &config_path,
            r#"
[server]
domain = "CORP"
username = "svc-fixtures"
web_application_url = "https://sp.corp.local"
admin_port = 2016

[http]
user_agent = "fixtures/2.0"
timeout_ms = 120000
sts_url = "https://sts.example/extSTS.srf"
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.server.domain.as_deref(), Some("CORP"));
        assert_eq!(config.server.admin_port, Some(2016));
        assert_eq!(config.timeout(), Some(Duration::from_secs(120)));
        assert_eq!(config.sts_url(), "https://sts.example/extSTS.srf");
        assert_eq!(config.http.user_agent.as_deref(), Some("fixtures/2.0"));
    }

    #[test]
    fn zero_timeout_means_none() {
        let config = ToolConfig {
            http: HttpSection {
                timeout_ms: Some(0),
                ..HttpSection::default()
            },
            ..ToolConfig::default()
        };
        assert!(config.timeout().is_none());
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("spfixture.toml");
        fs::write(&config_path, "[server\ndomain = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn flags_win_over_environment_and_config() {
        let config = ToolConfig {
            server: ServerSection {
                domain: Some("FILE".to_string()),
                username: Some("file-user".to_string()),
                web_application_url: Some("http://file".to_string()),
                admin_port: Some(1111),
            },
            ..ToolConfig::default()
        };
        let settings = RunSettings::resolve_with_lookup(
            SettingsOverrides {
                domain: Some("FLAG".to_string()),
                admin_port: Some(3333),
                ..overrides()
            },
            &config,
            lookup(&[
                ("SP_DOMAIN", "ENV"),
                ("SP_USERNAME", "env-user"),
                ("SP_ADMIN_PORT", "2222"),
            ]),
        )
        .expect("settings");

        assert_eq!(settings.domain, "FLAG");
        assert_eq!(settings.username, "env-user");
        assert_eq!(settings.web_application_url, "http://file");
        assert_eq!(settings.admin_port, 3333);
        assert!(settings.password.is_none());
    }

    #[test]
    fn environment_port_must_be_numeric() {
        let error = RunSettings::resolve_with_lookup(
            overrides(),
            &ToolConfig::default(),
            lookup(&[
                ("SP_DOMAIN", "CORP"),
                ("SP_USERNAME", "admin"),
                ("SP_WEB_APPLICATION_URL", "http://sp"),
                ("SP_ADMIN_PORT", "admin"),
            ]),
        )
        .err()
        .expect("must fail");
        assert!(error.to_string().contains("SP_ADMIN_PORT"));
    }

    #[test]
    fn missing_setting_names_flag_and_variable() {
        let error = RunSettings::resolve_with_lookup(
            overrides(),
            &ToolConfig::default(),
            lookup(&[("SP_DOMAIN", "CORP"), ("SP_USERNAME", "admin")]),
        )
        .err()
        .expect("must fail");
        let message = error.to_string();
        assert!(message.contains("--web-application-url"), "{message}");
        assert!(message.contains("SP_WEB_APPLICATION_URL"), "{message}");
    }

    #[test]
    fn blank_environment_values_are_ignored() {
        let settings = RunSettings::resolve_with_lookup(
            SettingsOverrides {
                web_application_url: Some("http://sp".to_string()),
                admin_port: Some(2016),
                ..overrides()
            },
            &ToolConfig::default(),
            lookup(&[
                ("SP_DOMAIN", "CORP"),
                ("SP_USERNAME", "admin"),
                ("SP_PASSWORD", "   "),
            ]),
        )
        .expect("settings");
        assert!(settings.password.is_none());
    }
}
