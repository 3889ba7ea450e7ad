use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};

/// Configuration for a [`Pool`](crate::Pool) and the [`Connection`](crate::Connection)s it owns.
///
/// ```
/// use mapi_driver::PoolConfig;
///
/// let mut config = PoolConfig::default();
/// config.host = "db.example.com".into();
/// config.pool_size = 4;
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// TCP host to connect to.
    pub host: String,

    /// TCP port to connect to.
    pub port: u16,

    /// Database name sent during authentication.
    pub database: String,

    /// Username sent during authentication.
    pub username: String,

    /// Password used to compute the authentication digest.
    pub password: String,

    /// Number of Connection workers the pool maintains.
    pub pool_size: usize,

    /// Bounds the initial TCP connect.
    pub connect_timeout: Duration,

    /// Bounds every socket read (handshake, framing, result parsing).
    pub read_timeout: Duration,

    /// Bounds every socket write.
    pub send_timeout: Duration,

    /// Optional `set schema <name>` issued once per connection after auth.
    pub schema: Option<String>,

    /// Optional `set role <name>` issued once per connection after auth.
    pub role: Option<String>,

    /// Minutes relative to UTC sent as `set time zone interval '<n>' minute`.
    pub time_zone_offset: i32,

    /// Identity of this pool, used to namespace the shared prepared-statement
    /// cache (see [`crate::pool`]).
    pub name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 50000,
            database: "monetdb".to_string(),
            username: "monetdb".to_string(),
            password: "monetdb".to_string(),
            pool_size: 10,
            connect_timeout: Duration::from_millis(10_000),
            read_timeout: Duration::from_millis(10_000),
            send_timeout: Duration::from_millis(10_000),
            schema: None,
            role: None,
            time_zone_offset: 0,
            name: "default".to_string(),
        }
    }
}

impl PoolConfig {
    /// Parses a string-keyed option map into a typed config, starting from
    /// [`PoolConfig::default`] and overriding only the recognised keys in
    /// the table documented for `Pool` creation. Unrecognised keys are
    /// logged at `warn` and otherwise ignored, mirroring how the source
    /// driver's loosely-typed option map is adapted at this boundary.
    pub fn from_options(options: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();

        for (key, value) in options {
            match key.as_str() {
                "host" => config.host = value.clone(),
                "port" => {
                    config.port = value
                        .parse()
                        .map_err(|_| Error::Client(format!("invalid port: {value}")))?
                }
                "database" => config.database = value.clone(),
                "username" => config.username = value.clone(),
                "password" => config.password = value.clone(),
                "pool_size" => {
                    config.pool_size = value
                        .parse()
                        .map_err(|_| Error::Client(format!("invalid pool_size: {value}")))?
                }
                "connect_timeout" => config.connect_timeout = parse_millis(value)?,
                "read_timeout" => config.read_timeout = parse_millis(value)?,
                "send_timeout" => config.send_timeout = parse_millis(value)?,
                "schema" => config.schema = Some(value.clone()),
                "role" => config.role = Some(value.clone()),
                "time_zone_offset" => {
                    config.time_zone_offset = value
                        .parse()
                        .map_err(|_| Error::Client(format!("invalid time_zone_offset: {value}")))?
                }
                "name" => config.name = value.clone(),
                other => {
                    tracing::warn!(option = other, "unrecognised pool option, ignoring");
                }
            }
        }

        Ok(config)
    }

}

fn parse_millis(value: &str) -> Result<Duration> {
    let millis: u64 = value
        .parse()
        .map_err(|_| Error::Client(format!("invalid duration (ms): {value}")))?;
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = PoolConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 50000);
        assert_eq!(config.database, "monetdb");
        assert_eq!(config.username, "monetdb");
        assert_eq!(config.password, "monetdb");
        assert_eq!(config.pool_size, 10);
        assert_eq!(config.connect_timeout, Duration::from_millis(10_000));
        assert_eq!(config.time_zone_offset, 0);
    }

    #[test]
    fn from_options_overrides_recognised_keys() {
        let mut options = HashMap::new();
        options.insert("host".to_string(), "db.internal".to_string());
        options.insert("port".to_string(), "50001".to_string());
        options.insert("pool_size".to_string(), "3".to_string());
        options.insert("bogus".to_string(), "ignored".to_string());

        let config = PoolConfig::from_options(&options).expect("valid options");
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 50001);
        assert_eq!(config.pool_size, 3);
    }

    #[test]
    fn from_options_rejects_unparseable_values() {
        let mut options = HashMap::new();
        options.insert("port".to_string(), "not-a-port".to_string());
        assert!(PoolConfig::from_options(&options).is_err());
    }
}
