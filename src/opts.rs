//! Connection and session options.

use url::Url;

use crate::error::Error;

/// Options for one remote server and user mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opts {
    /// Hostname or IP address.
    ///
    /// Default: `"127.0.0.1"`
    pub host: String,

    /// Port number for the MySQL server.
    ///
    /// Default: `3306`
    pub port: u16,

    /// Unix socket path.
    ///
    /// Default: `None`
    pub socket: Option<String>,

    /// Username for authentication.
    ///
    /// Default: `""`
    pub user: String,

    /// Password for authentication.
    ///
    /// Default: `None`
    pub password: Option<String>,

    /// Default database of the connection.
    ///
    /// Default: `None`
    pub database: Option<String>,

    /// Session `wait_timeout` in seconds.
    ///
    /// Default: `28800`
    pub wait_timeout: u32,

    /// Session `interactive_timeout` in seconds.
    ///
    /// Default: `28800`
    pub interactive_timeout: u32,

    /// Session `sql_mode`. Strict modes turn bad values into errors.
    ///
    /// Default: `"TRADITIONAL"`
    pub sql_mode: String,

    /// Ask the remote server for row estimates with `EXPLAIN` instead of
    /// assuming a fixed row count.
    ///
    /// Default: `false`
    pub use_remote_estimate: bool,

    /// Rows fetched per round trip by scan cursors.
    ///
    /// Default: `100`
    pub prefetch_rows: u32,

    /// Remote warning messages promoted to errors after each execute.
    ///
    /// Default: `["Division by 0"]`
    pub escalated_warnings: Vec<String>,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3306,
            socket: None,
            user: String::new(),
            password: None,
            database: None,
            wait_timeout: 28800,
            interactive_timeout: 28800,
            sql_mode: "TRADITIONAL".to_string(),
            use_remote_estimate: false,
            prefetch_rows: 100,
            escalated_warnings: vec!["Division by 0".to_string()],
        }
    }
}

impl Opts {
    /// Whether the server runs on this machine.
    pub fn is_local(&self) -> bool {
        self.socket.is_some() || matches!(self.host.as_str(), "127.0.0.1" | "localhost")
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, Error> {
    match value {
        "true" | "True" | "1" | "yes" | "on" => Ok(true),
        "false" | "False" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidUsage(format!("Invalid {}: {}", key, value))),
    }
}

fn parse_u32(key: &str, value: &str) -> Result<u32, Error> {
    value
        .parse()
        .map_err(|_| Error::InvalidUsage(format!("Invalid {}: {}", key, value)))
}

impl TryFrom<&Url> for Opts {
    type Error = Error;

    /// Parse a MySQL connection URL.
    ///
    /// Format: `mysql://[user[:password]@]host[:port][/database][?param1=value1&..]`
    ///
    /// Supported query parameters:
    /// - `socket`: unix socket path
    /// - `wait_timeout`, `interactive_timeout`: seconds
    /// - `sql_mode`: session sql_mode
    /// - `use_remote_estimate`: true/True/1/yes/on or false/False/0/no/off
    /// - `prefetch_rows`: positive integer
    /// - `escalated_warnings`: comma-separated warning messages, empty for none
    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        if url.scheme() != "mysql" {
            return Err(Error::InvalidUsage(format!(
                "Invalid scheme: expected 'mysql://', got '{}://'",
                url.scheme()
            )));
        }

        let mut opts = Opts {
            host: url.host_str().unwrap_or("127.0.0.1").to_string(),
            port: url.port().unwrap_or(3306),
            user: url.username().to_string(),
            password: url.password().map(|s| s.to_string()),
            database: url.path().strip_prefix('/').and_then(|s| {
                if s.is_empty() {
                    None
                } else {
                    Some(s.to_string())
                }
            }),
            ..Opts::default()
        };

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "socket" => opts.socket = Some(value.to_string()),
                "wait_timeout" => opts.wait_timeout = parse_u32(&key, &value)?,
                "interactive_timeout" => opts.interactive_timeout = parse_u32(&key, &value)?,
                "sql_mode" => opts.sql_mode = value.to_string(),
                "use_remote_estimate" => opts.use_remote_estimate = parse_bool(&key, &value)?,
                "prefetch_rows" => {
                    opts.prefetch_rows = parse_u32(&key, &value)?;
                    if opts.prefetch_rows == 0 {
                        return Err(Error::InvalidUsage(
                            "Invalid prefetch_rows: must be positive".into(),
                        ));
                    }
                }
                "escalated_warnings" => {
                    opts.escalated_warnings = value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                _ => {
                    return Err(Error::InvalidUsage(format!(
                        "Unknown connection option: {}",
                        key
                    )));
                }
            }
        }

        Ok(opts)
    }
}

impl TryFrom<&str> for Opts {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let url = Url::parse(s).map_err(|e| Error::InvalidUsage(format!("Invalid URL: {}", e)))?;
        Self::try_from(&url)
    }
}
