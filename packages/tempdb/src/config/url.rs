//! Database URLs: parsing, copying and rendering for the three supported dialects.

use std::fmt;
use std::str::FromStr;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS, NON_ALPHANUMERIC};
use sea_orm::DatabaseBackend;

use crate::error::{Result, TempDbError};

/// Characters escaped in credentials, database names and query values.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// SQLite paths keep their slashes; only the url delimiters are escaped.
const SQLITE_PATH: &AsciiSet = &CONTROLS.add(b'%').add(b'?').add(b'#');

const SQLITE_MEMORY: &str = ":memory:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
}

impl Dialect {
    pub fn name(self) -> &'static str {
        match self {
            Dialect::Postgres => "postgresql",
            Dialect::MySql => "mysql",
            Dialect::Sqlite => "sqlite",
        }
    }

    fn scheme(self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
            Dialect::Sqlite => "sqlite",
        }
    }

    pub fn default_port(self) -> Option<u16> {
        match self {
            Dialect::Postgres => Some(5432),
            Dialect::MySql => Some(3306),
            Dialect::Sqlite => None,
        }
    }

    /// Resolve a url scheme, ignoring any `+driver` suffix.
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        let base = scheme.split('+').next().unwrap_or_default();
        match base.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Dialect::Postgres),
            "mysql" | "mariadb" => Some(Dialect::MySql),
            "sqlite" => Some(Dialect::Sqlite),
            _ => None,
        }
    }

    pub fn is_server(self) -> bool {
        !matches!(self, Dialect::Sqlite)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = TempDbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pg" => Ok(Dialect::Postgres),
            other => Dialect::from_scheme(other).ok_or_else(|| TempDbError::Config {
                message: format!("unknown dialect '{s}' (expected postgresql, mysql or sqlite)"),
            }),
        }
    }
}

impl From<Dialect> for DatabaseBackend {
    fn from(dialect: Dialect) -> Self {
        match dialect {
            Dialect::Postgres => DatabaseBackend::Postgres,
            Dialect::MySql => DatabaseBackend::MySql,
            Dialect::Sqlite => DatabaseBackend::Sqlite,
        }
    }
}

impl From<DatabaseBackend> for Dialect {
    fn from(backend: DatabaseBackend) -> Self {
        match backend {
            DatabaseBackend::Postgres => Dialect::Postgres,
            DatabaseBackend::MySql => Dialect::MySql,
            DatabaseBackend::Sqlite => Dialect::Sqlite,
        }
    }
}

/// A parsed database url. Cloning yields an independent copy, so helpers
/// that need to retarget a url (admin connections, temp databases) never
/// touch the caller's value.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DbUrl {
    dialect: Dialect,
    username: Option<String>,
    password: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    query: Vec<(String, String)>,
}

impl DbUrl {
    /// Build a server url from parts.
    pub fn new(dialect: Dialect, host: Option<String>, database: Option<String>) -> Self {
        Self {
            dialect,
            username: None,
            password: None,
            host,
            port: None,
            database,
            query: Vec::new(),
        }
    }

    /// SQLite url for a file path (`None` for an in-memory database).
    pub fn sqlite(path: Option<String>) -> Self {
        Self::new(Dialect::Sqlite, None, path)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let (scheme, rest) = raw
            .split_once(':')
            .ok_or_else(|| TempDbError::invalid_url(raw, "missing scheme"))?;
        let dialect = Dialect::from_scheme(scheme)
            .ok_or_else(|| TempDbError::invalid_url(raw, format!("unknown scheme '{scheme}'")))?;

        if dialect == Dialect::Sqlite {
            return Self::parse_sqlite(raw, rest);
        }

        let rest = rest
            .strip_prefix("//")
            .ok_or_else(|| TempDbError::invalid_url(raw, "expected '//' after scheme"))?;
        let (rest, query) = split_query(rest);
        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], Some(&rest[i + 1..])),
            None => (rest, None),
        };
        let (userinfo, hostport) = match authority.rfind('@') {
            Some(i) => (Some(&authority[..i]), &authority[i + 1..]),
            None => (None, authority),
        };

        let (username, password) = match userinfo {
            Some(info) => match info.split_once(':') {
                Some((user, pass)) => (decode(raw, user)?, Some(decode_raw(raw, pass)?)),
                None => (decode(raw, info)?, None),
            },
            None => (None, None),
        };

        let (host, port) = split_host_port(raw, hostport)?;
        let database = match path {
            Some(p) => decode(raw, p)?,
            None => None,
        };

        Ok(Self {
            dialect,
            username,
            password,
            host,
            port,
            database,
            query: parse_query(raw, query)?,
        })
    }

    fn parse_sqlite(raw: &str, rest: &str) -> Result<Self> {
        let rest = rest.strip_prefix("//").unwrap_or(rest);
        let (path, query) = split_query(rest);
        let database = if path.is_empty() {
            None
        } else {
            Some(
                percent_decode_str(path)
                    .decode_utf8()
                    .map_err(|e| TempDbError::invalid_url(raw, e.to_string()))?
                    .into_owned(),
            )
        };
        Ok(Self {
            query: parse_query(raw, query)?,
            ..Self::sqlite(database)
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn backend(&self) -> DatabaseBackend {
        self.dialect.into()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn with_database(mut self, database: Option<String>) -> Self {
        self.database = database;
        self
    }

    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    /// Set a query parameter, replacing an existing value for the same key.
    pub fn with_query_param(mut self, key: &str, value: &str) -> Self {
        match self.query.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.query.push((key.to_string(), value.to_string())),
        }
        self
    }

    pub fn is_sqlite_memory(&self) -> bool {
        self.dialect == Dialect::Sqlite
            && self.database.as_deref().map_or(true, |d| d == SQLITE_MEMORY)
    }

    /// Render a url that SeaORM/sqlx accept.
    pub fn to_connection_string(&self) -> String {
        self.render(false)
    }

    fn render(&self, mask_password: bool) -> String {
        let mut out = String::new();
        if self.dialect == Dialect::Sqlite {
            if self.is_sqlite_memory() {
                out.push_str("sqlite::memory:");
            } else {
                out.push_str("sqlite://");
                let path = self.database.as_deref().unwrap_or_default();
                out.extend(utf8_percent_encode(path, SQLITE_PATH));
            }
        } else {
            out.push_str(self.dialect.scheme());
            out.push_str("://");
            if let Some(user) = &self.username {
                out.extend(utf8_percent_encode(user, COMPONENT));
                if let Some(pass) = &self.password {
                    out.push(':');
                    if mask_password {
                        out.push_str("***");
                    } else {
                        out.extend(utf8_percent_encode(pass, COMPONENT));
                    }
                }
                out.push('@');
            }
            let host = self.host.as_deref().unwrap_or("localhost");
            if host.contains(':') {
                out.push('[');
                out.push_str(host);
                out.push(']');
            } else {
                out.push_str(host);
            }
            if let Some(port) = self.port {
                out.push_str(&format!(":{port}"));
            }
            out.push('/');
            if let Some(db) = &self.database {
                out.extend(utf8_percent_encode(db, COMPONENT));
            }
        }
        for (i, (k, v)) in self.query.iter().enumerate() {
            out.push(if i == 0 { '?' } else { '&' });
            out.extend(utf8_percent_encode(k, COMPONENT));
            out.push('=');
            out.extend(utf8_percent_encode(v, COMPONENT));
        }
        out
    }
}

/// Masks the password, so urls can go straight into log fields.
impl fmt::Display for DbUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(true))
    }
}

impl fmt::Debug for DbUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbUrl")
            .field("dialect", &self.dialect)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("query", &self.query)
            .finish()
    }
}

impl FromStr for DbUrl {
    type Err = TempDbError;

    fn from_str(s: &str) -> Result<Self> {
        DbUrl::parse(s)
    }
}

/// Mask the password in a url string that may not parse.
///
/// Everything between the first `:` of the userinfo and the last `@` before
/// the query string is replaced, so unescaped `/` or `@` in a password are
/// still hidden.
pub(crate) fn mask_raw_password(raw: &str) -> String {
    let start = match raw.find("://") {
        Some(i) => i + 3,
        None => raw.find(':').map_or(0, |i| i + 1),
    };
    let rest = &raw[start..];
    let before_query = rest.split('?').next().unwrap_or_default();
    let Some(at) = before_query.rfind('@') else {
        return raw.to_string();
    };
    let Some(colon) = before_query[..at].find(':') else {
        return raw.to_string();
    };
    format!("{}{}:***{}", &raw[..start], &rest[..colon], &rest[at..])
}

fn split_query(s: &str) -> (&str, Option<&str>) {
    match s.split_once('?') {
        Some((head, q)) => (head, Some(q)),
        None => (s, None),
    }
}

fn decode_raw(raw: &str, s: &str) -> Result<String> {
    percent_decode_str(s)
        .decode_utf8()
        .map(|c| c.into_owned())
        .map_err(|e| TempDbError::invalid_url(raw, e.to_string()))
}

/// Decode a component, mapping an empty one to `None`.
fn decode(raw: &str, s: &str) -> Result<Option<String>> {
    if s.is_empty() {
        return Ok(None);
    }
    decode_raw(raw, s).map(Some)
}

fn split_host_port(raw: &str, hostport: &str) -> Result<(Option<String>, Option<u16>)> {
    let (host, port) = if let Some(bracketed) = hostport.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| TempDbError::invalid_url(raw, "unterminated ipv6 host"))?;
        (host, after.strip_prefix(':'))
    } else {
        match hostport.rsplit_once(':') {
            Some((h, p)) => (h, Some(p)),
            None => (hostport, None),
        }
    };

    let port = match port {
        Some(p) if !p.is_empty() => Some(
            p.parse::<u16>()
                .map_err(|_| TempDbError::invalid_url(raw, format!("invalid port '{p}'")))?,
        ),
        _ => None,
    };
    Ok((decode(raw, host)?, port))
}

fn parse_query(raw: &str, query: Option<&str>) -> Result<Vec<(String, String)>> {
    let Some(query) = query else {
        return Ok(Vec::new());
    };
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            Ok((decode_raw(raw, k)?, decode_raw(raw, v)?))
        })
        .collect()
}
