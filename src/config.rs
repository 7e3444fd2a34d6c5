use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::str::FromStr;

/// Server settings, read from `RENTD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends since the last rewrite before the compactor kicks in.
    /// Zero disables compaction.
    pub compact_threshold: u64,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "rentd".into(),
            max_connections: 256,
            compact_threshold: 1000,
            tls_cert: None,
            tls_key: None,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> io::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unset variables keep their
    /// defaults; set but unparsable numbers are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> io::Result<Self> {
        let mut config = Self::default();
        if let Some(port) = parsed(&lookup, "RENTD_PORT")? {
            config.port = port;
        }
        if let Some(bind) = lookup("RENTD_BIND") {
            config.bind = bind;
        }
        if let Some(dir) = lookup("RENTD_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(password) = lookup("RENTD_PASSWORD") {
            config.password = password;
        }
        if let Some(n) = parsed(&lookup, "RENTD_MAX_CONNECTIONS")? {
            config.max_connections = n;
        }
        if let Some(n) = parsed(&lookup, "RENTD_COMPACT_THRESHOLD")? {
            config.compact_threshold = n;
        }
        config.tls_cert = lookup("RENTD_TLS_CERT").map(PathBuf::from);
        config.tls_key = lookup("RENTD_TLS_KEY").map(PathBuf::from);
        config.metrics_port = parsed(&lookup, "RENTD_METRICS_PORT")?;
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> io::Result<Option<T>> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim().parse().map(Some).map_err(|_| {
        io::Error::new(ErrorKind::InvalidInput, format!("{key}: invalid value {raw:?}"))
    })
}
