use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;

/// Process configuration, read once from `COVERS_*` environment variables.
/// Unparseable numbers fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub admin_users: HashSet<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            port: number(lookup("COVERS_PORT")).unwrap_or(5433),
            bind: lookup("COVERS_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: PathBuf::from(lookup("COVERS_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: lookup("COVERS_PASSWORD").unwrap_or_else(|| "covers".into()),
            max_connections: number(lookup("COVERS_MAX_CONNECTIONS")).unwrap_or(256),
            compact_threshold: number(lookup("COVERS_COMPACT_THRESHOLD")).unwrap_or(1000),
            metrics_port: number(lookup("COVERS_METRICS_PORT")),
            tls_cert: lookup("COVERS_TLS_CERT"),
            tls_key: lookup("COVERS_TLS_KEY"),
            admin_users: lookup("COVERS_ADMIN_USERS")
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|u| !u.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("covers.wal")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn number<T: FromStr>(raw: Option<String>) -> Option<T> {
    raw.and_then(|s| s.trim().parse().ok())
}
