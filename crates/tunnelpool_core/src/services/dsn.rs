//! Data source names.
//!
//! Grammar:
//!
//! ```text
//! user:password@scheme(host:port)/database?charset=utf8mb4&parseTime=True&loc=Local
//! ```
//!
//! The scheme selects the dialer in the factory's
//! [`DialerRegistry`](crate::services::DialerRegistry); the remaining parts
//! become the driver configuration.

use crate::error::{TunnelPoolError, TunnelPoolResult};
use crate::models::DatabaseParams;
use std::fmt;
use std::str::FromStr;

/// Parameters appended to every generated DSN.
const DEFAULT_PARAMS: [(&str, &str); 3] =
    [("charset", "utf8mb4"), ("parseTime", "True"), ("loc", "Local")];

/// A parsed data source name.
#[derive(Clone, PartialEq, Eq)]
pub struct DataSourceName {
    /// Login username
    pub user: String,
    /// Login password
    pub password: String,
    /// Dialer scheme (`tcp` or `postgres+ssh`)
    pub scheme: String,
    /// Database host as seen from the dialer
    pub host: String,
    /// Database port
    pub port: u16,
    /// Database name
    pub database: String,
    /// Query parameters, in order
    pub params: Vec<(String, String)>,
}

impl DataSourceName {
    /// Build a DSN for `params` dialed through `scheme`.
    pub fn new(params: &DatabaseParams, scheme: &str) -> Self {
        Self {
            user: params.user.clone(),
            password: params.password.clone(),
            scheme: scheme.to_string(),
            host: params.host.clone(),
            port: params.port,
            database: params.database.clone(),
            params: DEFAULT_PARAMS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// The address handed to the dialer.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Look up a query parameter.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// The DSN with the password masked, for logging.
    pub fn redacted(&self) -> String {
        self.render(if self.password.is_empty() { "" } else { "********" })
    }

    /// Build the driver configuration.
    ///
    /// `charset` maps to `client_encoding` and a `loc` other than `Local` to
    /// the session `TimeZone`. `parseTime` is accepted for compatibility.
    pub fn to_pg_config(&self, application_name: &str) -> tokio_postgres::Config {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config.user(&self.user);
        if !self.password.is_empty() {
            pg_config.password(&self.password);
        }
        pg_config.dbname(&self.database);
        pg_config.host(&self.host);
        pg_config.port(self.port);
        pg_config.application_name(application_name);

        let mut options = Vec::new();
        for (key, value) in &self.params {
            match key.as_str() {
                "charset" => {
                    let encoding = match value.to_lowercase().as_str() {
                        "utf8" | "utf8mb4" => "UTF8".to_string(),
                        other => other.to_uppercase(),
                    };
                    options.push(format!("-c client_encoding={encoding}"));
                }
                "loc" if !value.eq_ignore_ascii_case("local") => {
                    options.push(format!("-c TimeZone={value}"));
                }
                "loc" | "parseTime" => {}
                _ => tracing::debug!(param = %key, "Ignoring unknown DSN parameter"),
            }
        }
        if !options.is_empty() {
            pg_config.options(&options.join(" "));
        }

        pg_config
    }

    fn render(&self, password: &str) -> String {
        let mut dsn = format!(
            "{}:{}@{}({})/{}",
            self.user,
            password,
            self.scheme,
            self.address(),
            self.database
        );
        if !self.params.is_empty() {
            let query: Vec<_> = self.params.iter().map(|(k, v)| format!("{k}={v}")).collect();
            dsn.push('?');
            dsn.push_str(&query.join("&"));
        }
        dsn
    }
}

impl fmt::Display for DataSourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(&self.password))
    }
}

impl fmt::Debug for DataSourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DataSourceName").field(&self.redacted()).finish()
    }
}

impl FromStr for DataSourceName {
    type Err = TunnelPoolError;

    fn from_str(s: &str) -> TunnelPoolResult<Self> {
        let invalid = |reason: &str| TunnelPoolError::config(format!("Invalid DSN: {reason}"));

        // The password may contain '@', the address never does.
        let (credentials, rest) = s.rsplit_once('@').ok_or_else(|| invalid("missing '@'"))?;
        let (user, password) = credentials.split_once(':').unwrap_or((credentials, ""));

        let open = rest.find('(').ok_or_else(|| invalid("missing '(' after scheme"))?;
        let close = rest.find(')').ok_or_else(|| invalid("missing ')' after address"))?;
        if close < open {
            return Err(invalid("unbalanced address parentheses"));
        }
        let scheme = &rest[..open];
        let address = &rest[open + 1..close];
        let tail = rest[close + 1..]
            .strip_prefix('/')
            .ok_or_else(|| invalid("missing '/' before database"))?;

        let (database, query) = tail.split_once('?').unwrap_or((tail, ""));
        let (host, port) = address.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port: u16 = port.parse().map_err(|_| invalid("port is not a number"))?;

        if user.is_empty() || scheme.is_empty() || host.is_empty() || database.is_empty() {
            return Err(invalid("user, scheme, host and database are required"));
        }

        let params = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                (k.to_string(), v.to_string())
            })
            .collect();

        Ok(Self {
            user: user.to_string(),
            password: password.to_string(),
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
            database: database.to_string(),
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::dialer::{DIRECT_SCHEME, TUNNEL_SCHEME};

    fn params() -> DatabaseParams {
        DatabaseParams::new("127.0.0.1", "metaverse", "123456", "test").with_port(3306)
    }

    #[test]
    fn test_direct_dsn() {
        let dsn = DataSourceName::new(&params(), DIRECT_SCHEME);
        assert_eq!(
            dsn.to_string(),
            "metaverse:123456@tcp(127.0.0.1:3306)/test?charset=utf8mb4&parseTime=True&loc=Local"
        );
    }

    #[test]
    fn test_tunnel_dsn() {
        let dsn = DataSourceName::new(&params(), TUNNEL_SCHEME);
        assert!(dsn.to_string().starts_with("metaverse:123456@postgres+ssh(127.0.0.1:3306)/test?"));
        assert_eq!(dsn.address(), "127.0.0.1:3306");
    }

    #[test]
    fn test_parse_with_at_in_password() {
        let dsn: DataSourceName =
            "app:p@ss:word@postgres+ssh(db.internal:5432)/orders?charset=utf8".parse().unwrap();

        assert_eq!(dsn.user, "app");
        assert_eq!(dsn.password, "p@ss:word");
        assert_eq!(dsn.scheme, "postgres+ssh");
        assert_eq!(dsn.host, "db.internal");
        assert_eq!(dsn.port, 5432);
        assert_eq!(dsn.database, "orders");
        assert_eq!(dsn.param("charset"), Some("utf8"));
        assert_eq!(dsn.param("loc"), None);
    }

    #[test]
    fn test_parse_ipv6_address() {
        let dsn: DataSourceName = "app:pw@tcp([::1]:5432)/orders".parse().unwrap();
        assert_eq!(dsn.host, "::1");
        assert_eq!(dsn.address(), "[::1]:5432");
        assert!(dsn.params.is_empty());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for input in [
            "no-at-sign",
            "app:pw@tcp127.0.0.1:5432/db",
            "app:pw@tcp(127.0.0.1)/db",
            "app:pw@tcp(127.0.0.1:port)/db",
            "app:pw@tcp(127.0.0.1:5432)db",
            "app:pw@(127.0.0.1:5432)/db",
        ] {
            let err = input.parse::<DataSourceName>().unwrap_err();
            assert!(err.is_config(), "{input} should be a config error");
        }
    }

    #[test]
    fn test_redacted_hides_password() {
        let dsn = DataSourceName::new(&params(), DIRECT_SCHEME);

        assert!(!dsn.redacted().contains("123456"));
        assert!(!format!("{dsn:?}").contains("123456"));
        assert!(dsn.redacted().starts_with("metaverse:********@tcp("));
    }

    #[test]
    fn test_pg_config_mapping() {
        let mut dsn = DataSourceName::new(&params(), DIRECT_SCHEME);
        let pg_config = dsn.to_pg_config("tunnelpool");

        assert_eq!(pg_config.get_user(), Some("metaverse"));
        assert_eq!(pg_config.get_dbname(), Some("test"));
        assert_eq!(pg_config.get_ports(), &[3306]);
        assert_eq!(pg_config.get_options(), Some("-c client_encoding=UTF8"));

        dsn.params.push(("loc".to_string(), "UTC".to_string()));
        let pg_config = dsn.to_pg_config("tunnelpool");
        assert_eq!(pg_config.get_options(), Some("-c client_encoding=UTF8 -c TimeZone=UTC"));
    }
}
