use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::geo::{DbFormat, DbSource};
use crate::rules::{RuleConfig, DEFAULT_FACT_NAME, DEFAULT_MAX_CYCLES};
use crate::waf::{HostPolicy, DEFAULT_ACME_CHALLENGE_PATH};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct WafConfig {
    pub geolocation: GeolocationConfig,
    pub xss: XssConfig,
    pub rules: RulesConfig,
    pub https: HttpsConfig,
    pub inspection: InspectionConfig,
    /// Settings that apply to every host.
    pub global_host: HostPolicy,
    pub hosts: Vec<HostPolicy>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GeoBackendConfig {
    pub source: DbSource,
    #[serde(default)]
    pub format: DbFormat,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeolocationConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_ipv4_backend")]
    pub ipv4: GeoBackendConfig,
    #[serde(default = "default_ipv6_backend")]
    pub ipv6: GeoBackendConfig,
    /// Reload databases when files in `data_dir` change.
    #[serde(default)]
    pub watch: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct XssConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub escalate_form_fields: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RulesConfig {
    #[serde(default = "default_fact_name")]
    pub fact_name: String,
    #[serde(default = "default_max_cycles")]
    pub max_cycles: usize,
    /// YAML file holding a list of rule definitions.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HttpsConfig {
    #[serde(default = "default_acme_challenge_path")]
    pub acme_challenge_path: String,
}

/// What to do with a response whose body cannot be decoded.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DecodeErrorAction {
    #[default]
    Pass,
    Block,
}

/// Literal text replacement applied during inspection.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Replacement {
    /// Only apply to this host; every host when empty.
    #[serde(default)]
    pub host: String,
    pub olds: Vec<String>,
    pub new: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InspectionConfig {
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    #[serde(default)]
    pub on_decode_error: DecodeErrorAction,
    #[serde(default)]
    pub request_url_replacements: Vec<Replacement>,
    #[serde(default)]
    pub request_body_replacements: Vec<Replacement>,
    #[serde(default)]
    pub response_replacements: Vec<Replacement>,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_ipv4_backend() -> GeoBackendConfig {
    GeoBackendConfig {
        source: DbSource::Ip2Region,
        format: DbFormat::Legacy,
    }
}

fn default_ipv6_backend() -> GeoBackendConfig {
    GeoBackendConfig {
        source: DbSource::GeoLite2,
        format: DbFormat::Legacy,
    }
}

fn default_fact_name() -> String {
    DEFAULT_FACT_NAME.to_string()
}

fn default_max_cycles() -> usize {
    DEFAULT_MAX_CYCLES
}

fn default_acme_challenge_path() -> String {
    DEFAULT_ACME_CHALLENGE_PATH.to_string()
}

fn default_max_body_size() -> usize {
    1048576 // 1MB
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            ipv4: default_ipv4_backend(),
            ipv6: default_ipv6_backend(),
            watch: false,
        }
    }
}

impl Default for XssConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            escalate_form_fields: false,
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            fact_name: default_fact_name(),
            max_cycles: default_max_cycles(),
            path: None,
        }
    }
}

impl Default for HttpsConfig {
    fn default() -> Self {
        Self {
            acme_challenge_path: default_acme_challenge_path(),
        }
    }
}

impl Default for InspectionConfig {
    fn default() -> Self {
        Self {
            max_body_size: default_max_body_size(),
            on_decode_error: DecodeErrorAction::Pass,
            request_url_replacements: vec![],
            request_body_replacements: vec![],
            response_replacements: vec![],
        }
    }
}

impl WafConfig {
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let config: WafConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Rule definitions from `rules.path`, resolved against `base` when
    /// relative. Empty when no path is configured.
    pub fn load_rule_configs(&self, base: &Path) -> Result<Vec<RuleConfig>, Box<dyn std::error::Error>> {
        let Some(path) = &self.rules.path else {
            return Ok(Vec::new());
        };
        let path = base.join(path);
        let content = fs::read_to_string(&path)?;
        let rules: Vec<RuleConfig> = serde_yaml::from_str(&content)?;
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waf::IpMode;

    #[test]
    fn test_defaults() {
        let config = WafConfig::default();
        assert_eq!(config.geolocation.data_dir, "data");
        assert_eq!(config.geolocation.ipv4.source, DbSource::Ip2Region);
        assert_eq!(config.geolocation.ipv6.source, DbSource::GeoLite2);
        assert!(config.xss.enabled);
        assert!(!config.xss.escalate_form_fields);
        assert_eq!(config.rules.fact_name, "MF");
        assert_eq!(config.rules.max_cycles, 5000);
        assert_eq!(config.https.acme_challenge_path, "/.well-known/acme-challenge/");
        assert_eq!(config.inspection.max_body_size, 1048576);
        assert_eq!(config.inspection.on_decode_error, DecodeErrorAction::Pass);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
geolocation:
  ipv6: { source: ip2region, format: full }
xss:
  escalate_form_fields: true
inspection:
  on_decode_error: block
  response_replacements:
    - olds: ["internal.example"]
      new: "example.com"
hosts:
  - host: "*.example.com"
    ip_mode: proxy
    ssl: true
    auto_jump_https: true
"#;
        let config: WafConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.geolocation.ipv6.format, DbFormat::Full);
        assert_eq!(config.geolocation.ipv4.source, DbSource::Ip2Region);
        assert!(config.xss.enabled);
        assert!(config.xss.escalate_form_fields);
        assert_eq!(config.inspection.on_decode_error, DecodeErrorAction::Block);
        assert_eq!(config.inspection.response_replacements[0].host, "");
        assert_eq!(config.hosts[0].ip_mode, IpMode::Proxy);
        assert!(config.global_host.guard_enabled);
    }

    #[test]
    fn test_from_file() {
        let config = WafConfig::from_file("config/waf.yaml").unwrap();
        assert_eq!(config.rules.path.as_deref(), Some("rules.yaml"));
        let rules = config.load_rule_configs(Path::new("config")).unwrap();
        assert!(!rules.is_empty());
        assert!(WafConfig::from_file("nonexistent.yaml").is_err());
    }

    #[test]
    fn test_no_rule_path() {
        let config = WafConfig::default();
        assert!(config.load_rule_configs(Path::new(".")).unwrap().is_empty());
    }
}
