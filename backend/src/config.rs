use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Allowed CORS origins; `*` allows any origin.
    pub cors_origins: Vec<String>,
    pub upload_dir: PathBuf,
    pub model_dir: PathBuf,
    pub dist_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub inference_timeout_secs: u64,
    pub inference_workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 5000,
            cors_origins: vec!["*".to_string()],
            upload_dir: PathBuf::from("uploads"),
            model_dir: PathBuf::from("public/models"),
            dist_dir: PathBuf::from("dist"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            inference_timeout_secs: 30,
            inference_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

impl ServerConfig {
    /// Loads `.env`, then an optional YAML file named by `SERVER_CONFIG`,
    /// then applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup("SERVER_CONFIG") {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    fn apply_overrides<F>(&mut self, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup("BIND_ADDRESS") {
            self.bind_address = address;
        }
        if let Some(port) = lookup("PORT") {
            self.port = parse_value("PORT", port)?;
        }
        if let Some(origins) = lookup("CORS_ORIGIN") {
            self.cors_origins = origins
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect();
        }
        if let Some(dir) = lookup("UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("DIST_DIR") {
            self.dist_dir = PathBuf::from(dir);
        }
        if let Some(bytes) = lookup("MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = parse_value("MAX_UPLOAD_BYTES", bytes)?;
        }
        if let Some(secs) = lookup("INFERENCE_TIMEOUT_SECS") {
            self.inference_timeout_secs = parse_value("INFERENCE_TIMEOUT_SECS", secs)?;
        }
        if let Some(workers) = lookup("INFERENCE_WORKERS") {
            self.inference_workers = parse_value("INFERENCE_WORKERS", workers)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.inference_workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "INFERENCE_WORKERS",
                value: "0".to_string(),
            });
        }
        if self.inference_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "INFERENCE_TIMEOUT_SECS",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.is_empty() || self.cors_origins.iter().any(|origin| origin == "*")
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = ServerConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.max_upload_bytes, 5 * 1024 * 1024);
        assert!(config.allows_any_origin());
        assert_eq!(config.socket_address(), "0.0.0.0:5000");
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("PORT", "8081"),
            ("CORS_ORIGIN", "http://localhost:3000, https://example.org"),
            ("UPLOAD_DIR", "/tmp/staging"),
            ("INFERENCE_WORKERS", "2"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8081);
        assert_eq!(
            config.cors_origins,
            vec!["http://localhost:3000", "https://example.org"]
        );
        assert!(!config.allows_any_origin());
        assert_eq!(config.upload_dir, PathBuf::from("/tmp/staging"));
        assert_eq!(config.inference_workers, 2);
    }

    #[test]
    fn rejects_unparsable_numbers() {
        let err = ServerConfig::from_lookup(lookup_from(&[("PORT", "http")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "PORT", .. }));
    }

    #[test]
    fn rejects_zero_workers() {
        let err =
            ServerConfig::from_lookup(lookup_from(&[("INFERENCE_WORKERS", "0")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "INFERENCE_WORKERS",
                ..
            }
        ));
    }

    #[test]
    fn yaml_file_then_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.yaml");
        std::fs::write(&path, "port: 9000\nmodel_dir: /srv/models\ninference_timeout_secs: 5\n")
            .unwrap();

        let config = ServerConfig::from_lookup(lookup_from(&[
            ("SERVER_CONFIG", path.to_str().unwrap()),
            ("PORT", "9100"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.model_dir, PathBuf::from("/srv/models"));
        assert_eq!(config.inference_timeout(), Duration::from_secs(5));
        assert_eq!(config.upload_dir, PathBuf::from("uploads"));
    }

    #[test]
    fn missing_yaml_file_is_an_error() {
        let err = ServerConfig::from_lookup(lookup_from(&[(
            "SERVER_CONFIG",
            "/nonexistent/server.yaml",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
