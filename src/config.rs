use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::FixedOffset;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::TlsAcceptor;

use crate::scheduler::{SchedulingPolicy, DEFAULT_FALLBACK_DURATION_MINUTES};

const ENV_PREFIX: &str = "SLOTKEEPER_";

/// Server settings, read from `SLOTKEEPER_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends since the last compaction that trigger the next one.
    pub compact_threshold: u64,
    pub utc_offset_minutes: i32,
    pub fallback_duration_minutes: u32,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5434,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "slotkeeper".into(),
            max_connections: 256,
            compact_threshold: 1000,
            utc_offset_minutes: 0,
            fallback_duration_minutes: DEFAULT_FALLBACK_DURATION_MINUTES,
            tls_cert: None,
            tls_key: None,
            metrics_port: None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Invalid { var: String, value: String },
    OffsetOutOfRange(i32),
    ZeroFallbackDuration,
    TlsPairIncomplete,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "{var}: cannot parse {value:?}"),
            ConfigError::OffsetOutOfRange(m) => {
                write!(f, "{ENV_PREFIX}UTC_OFFSET_MINUTES: {m} is not a valid offset")
            }
            ConfigError::ZeroFallbackDuration => {
                write!(f, "{ENV_PREFIX}FALLBACK_DURATION_MINUTES must be at least 1")
            }
            ConfigError::TlsPairIncomplete => write!(
                f,
                "both {ENV_PREFIX}TLS_CERT and {ENV_PREFIX}TLS_KEY must be set, or neither"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `lookup` maps a full variable name, e.g. `SLOTKEEPER_PORT`, to its value.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let defaults = Config::default();

        let config = Config {
            port: parsed(&get, "PORT")?.unwrap_or(defaults.port),
            bind: get("BIND").unwrap_or(defaults.bind),
            data_dir: get("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            password: get("PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(&get, "MAX_CONNECTIONS")?.unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&get, "COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            utc_offset_minutes: parsed(&get, "UTC_OFFSET_MINUTES")?
                .unwrap_or(defaults.utc_offset_minutes),
            fallback_duration_minutes: parsed(&get, "FALLBACK_DURATION_MINUTES")?
                .unwrap_or(defaults.fallback_duration_minutes),
            tls_cert: get("TLS_CERT"),
            tls_key: get("TLS_KEY"),
            metrics_port: parsed(&get, "METRICS_PORT")?,
        };

        if config.tls_cert.is_some() != config.tls_key.is_some() {
            return Err(ConfigError::TlsPairIncomplete);
        }
        if config.fallback_duration_minutes == 0 {
            return Err(ConfigError::ZeroFallbackDuration);
        }
        config.utc_offset()?;
        Ok(config)
    }

    pub fn utc_offset(&self) -> Result<FixedOffset, ConfigError> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or(ConfigError::OffsetOutOfRange(self.utc_offset_minutes))
    }

    pub fn policy(&self) -> Result<SchedulingPolicy, ConfigError> {
        Ok(SchedulingPolicy {
            utc_offset: self.utc_offset()?,
            fallback_duration_minutes: self.fallback_duration_minutes,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotkeeper.wal")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn tls_acceptor(&self) -> io::Result<Option<TlsAcceptor>> {
        load_tls_acceptor(self.tls_cert.as_deref(), self.tls_key.as_deref())
    }
}

fn parsed<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ConfigError> {
    match get(name) {
        None => Ok(None),
        Some(value) => value.trim().parse().map(Some).map_err(|_| ConfigError::Invalid {
            var: format!("{ENV_PREFIX}{name}"),
            value,
        }),
    }
}

pub fn load_tls_acceptor(
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> io::Result<Option<TlsAcceptor>> {
    let (cert_path, key_path) = match (cert_path, key_path) {
        (None, None) => return Ok(None),
        (Some(c), Some(k)) => (c, k),
        _ => {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                ConfigError::TlsPairIncomplete.to_string(),
            ));
        }
    };

    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<_, _>>()?;

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key found in key file"))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;

    config.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (format!("{ENV_PREFIX}{k}"), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.port, 5434);
        assert_eq!(config.wal_path(), PathBuf::from("./data/slotkeeper.wal"));
        assert_eq!(config.listen_addr(), "0.0.0.0:5434");
        assert_eq!(config.policy().unwrap().fallback_duration_minutes, 60);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = from_pairs(&[
            ("PORT", "6000"),
            ("DATA_DIR", "/var/lib/salon"),
            ("MAX_CONNECTIONS", "8"),
            ("UTC_OFFSET_MINUTES", "-180"),
            ("METRICS_PORT", "9100"),
        ])
        .unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.utc_offset().unwrap().local_minus_utc(), -180 * 60);
        assert_eq!(config.wal_path(), PathBuf::from("/var/lib/salon/slotkeeper.wal"));
    }

    #[test]
    fn bad_values_are_reported() {
        let err = from_pairs(&[("PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("SLOTKEEPER_PORT"));
        assert!(matches!(
            from_pairs(&[("UTC_OFFSET_MINUTES", "1500")]),
            Err(ConfigError::OffsetOutOfRange(1500))
        ));
        assert!(matches!(
            from_pairs(&[("TLS_CERT", "cert.pem")]),
            Err(ConfigError::TlsPairIncomplete)
        ));
    }

    #[test]
    fn fallback_duration_must_be_positive() {
        let err = from_pairs(&[("FALLBACK_DURATION_MINUTES", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroFallbackDuration));
        assert!(err.to_string().contains("SLOTKEEPER_FALLBACK_DURATION_MINUTES"));

        let config = from_pairs(&[("FALLBACK_DURATION_MINUTES", "30")]).unwrap();
        assert_eq!(config.policy().unwrap().fallback_duration_minutes, 30);
    }

    #[test]
    fn no_tls_without_paths() {
        assert!(load_tls_acceptor(None, None).unwrap().is_none());
        assert!(load_tls_acceptor(Some("cert.pem"), None).is_err());
    }
}
