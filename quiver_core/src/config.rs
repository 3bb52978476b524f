use crate::oracle::DEFAULT_NOISE_PROBABILITY;
use crate::protocol::{Protocol, ProtocolKind, StructuredFields};
use crate::scheduler::DEFAULT_ENERGY;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    #[serde(default = "default_iterations")]
    pub max_iterations: u64,
    #[serde(default = "default_energy")]
    pub energy: usize,
    /// Fixed RNG seed; absent means seed from entropy.
    #[serde(default)]
    pub rng_seed: Option<u64>,
    #[serde(default = "default_noise_probability")]
    pub noise_probability: f64,
    #[serde(default = "default_persist_incrementally")]
    pub persist_incrementally: bool,
}

pub fn default_iterations() -> u64 {
    10
}
fn default_energy() -> usize {
    DEFAULT_ENERGY
}
fn default_noise_probability() -> f64 {
    DEFAULT_NOISE_PROBABILITY
}
fn default_persist_incrementally() -> bool {
    true
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_iterations(),
            energy: default_energy(),
            rng_seed: None,
            noise_probability: default_noise_probability(),
            persist_incrementally: default_persist_incrementally(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TargetSettings {
    #[serde(default)]
    pub protocol: ProtocolKind,
    #[serde(default = "default_device_name")]
    pub device_name: String,
    #[serde(default = "default_reconnect_pause_ms")]
    pub reconnect_pause_ms: u64,
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_headers")]
    pub headers: BTreeMap<String, String>,
}

fn default_device_name() -> String {
    "Smart Lock [Group 2]".to_string()
}
fn default_reconnect_pause_ms() -> u64 {
    1000
}
fn default_url() -> String {
    "http://127.0.0.1:8000/datatb/product/add/".to_string()
}
fn default_timeout_ms() -> u64 {
    5000
}
fn default_headers() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("Content-Type".to_string(), "application/json".to_string()),
        (
            "Cookie".to_string(),
            "csrftoken=VALID_CSRF_TOKEN; sessionid=VALID_SESSION_ID".to_string(),
        ),
    ])
}

impl TargetSettings {
    pub fn reconnect_pause(&self) -> Duration {
        Duration::from_millis(self.reconnect_pause_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            protocol: ProtocolKind::default(),
            device_name: default_device_name(),
            reconnect_pause_ms: default_reconnect_pause_ms(),
            url: default_url(),
            timeout_ms: default_timeout_ms(),
            headers: default_headers(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct OutputSettings {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
}

pub fn default_base_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct QuiverConfig {
    #[serde(default)]
    pub fuzzer: FuzzerSettings,
    #[serde(default)]
    pub target: TargetSettings,
    #[serde(default)]
    pub structured: StructuredFields,
    #[serde(default)]
    pub output: OutputSettings,
}

impl QuiverConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: QuiverConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }

    /// The protocol tag for this configuration, carrying the structured field set when needed.
    pub fn protocol(&self) -> Protocol {
        match self.target.protocol {
            ProtocolKind::Binary => Protocol::Binary,
            ProtocolKind::Structured => Protocol::Structured(self.structured.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_file_yields_defaults() {
        let config: QuiverConfig = toml::from_str("").unwrap();
        assert_eq!(config.fuzzer.max_iterations, 10);
        assert_eq!(config.fuzzer.energy, 10);
        assert_eq!(config.fuzzer.rng_seed, None);
        assert!(config.fuzzer.persist_incrementally);
        assert_eq!(config.target.protocol, ProtocolKind::Binary);
        assert_eq!(config.target.device_name, "Smart Lock [Group 2]");
        assert_eq!(config.target.reconnect_pause(), Duration::from_secs(1));
        assert_eq!(config.target.timeout(), Duration::from_secs(5));
        assert_eq!(
            config.target.headers.get("Content-Type").map(String::as_str),
            Some("application/json")
        );
        assert_eq!(config.output.base_dir, PathBuf::from("."));
        assert_eq!(config.protocol(), Protocol::Binary);
    }

    #[test]
    fn structured_sections_parse_in_kebab_case() {
        let config: QuiverConfig = toml::from_str(
            r#"
            [fuzzer]
            max-iterations = 3
            rng-seed = 7
            noise-probability = 0.0

            [target]
            protocol = "structured"
            url = "http://localhost:9000/add/"
            headers = { "Content-Type" = "application/json" }

            [structured]
            text-fields = ["title"]
            removable-fields = ["title", "cost"]
            numeric-field = "cost"

            [output]
            base-dir = "/tmp/runs"
            "#,
        )
        .unwrap();
        assert_eq!(config.fuzzer.max_iterations, 3);
        assert_eq!(config.fuzzer.rng_seed, Some(7));
        assert_eq!(config.fuzzer.noise_probability, 0.0);
        assert_eq!(config.target.headers.len(), 1);
        match config.protocol() {
            Protocol::Structured(fields) => {
                assert_eq!(fields.text_fields, ["title"]);
                assert_eq!(fields.numeric_field, "cost");
            }
            other => panic!("unexpected protocol {other:?}"),
        }
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<QuiverConfig>("[fuzzer]\nthreads = 4").is_err());
        assert!(toml::from_str::<QuiverConfig>("[target]\nprotocol = \"ble\"").is_err());
    }

    #[test]
    fn load_from_file_reports_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quiver.toml");
        let err = QuiverConfig::load_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));

        std::fs::write(&path, "[fuzzer]\nenergy = 2\n").unwrap();
        let config = QuiverConfig::load_from_file(&path).unwrap();
        assert_eq!(config.fuzzer.energy, 2);
    }
}
