//! SIP URIs (`sip:user@host:port;params`)

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A `sip:` or `sips:` URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipUri {
    pub scheme: String,
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub params: Vec<(String, Option<String>)>,
    /// Raw `?` header part, without the question mark
    pub headers: Option<String>,
}

impl SipUri {
    pub fn new(user: Option<&str>, host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            scheme: "sip".to_string(),
            user: user.map(str::to_string),
            host: host.into(),
            port,
            params: Vec::new(),
            headers: None,
        }
    }

    pub fn param(&self, name: &str) -> Option<Option<&str>> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_deref())
    }

    /// Add or replace a URI parameter
    pub fn set_param(&mut self, name: &str, value: Option<&str>) {
        let value = value.map(str::to_string);
        match self.params.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some(entry) => entry.1 = value,
            None => self.params.push((name.to_string(), value)),
        }
    }

    pub fn with_param(mut self, name: &str, value: Option<&str>) -> Self {
        self.set_param(name, value);
        self
    }

    /// Same URI with the host part replaced and the port dropped
    pub fn with_host(&self, host: &str) -> Self {
        Self {
            host: host.to_string(),
            port: None,
            ..self.clone()
        }
    }

    /// `host[:port]`, with the default SIP port when none is given
    pub fn host_port(&self) -> String {
        let port = self.port.unwrap_or(if self.scheme == "sips" { 5061 } else { 5060 });
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, port)
        } else {
            format!("{}:{}", self.host, port)
        }
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        for (name, value) in &self.params {
            match value {
                Some(value) => write!(f, ";{}={}", name, value)?,
                None => write!(f, ";{}", name)?,
            }
        }
        if let Some(headers) = &self.headers {
            write!(f, "?{}", headers)?;
        }
        Ok(())
    }
}

impl FromStr for SipUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (scheme, rest) = s
            .split_once(':')
            .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("sip") || scheme.eq_ignore_ascii_case("sips"))
            .ok_or_else(|| Error::InvalidUri(s.to_string()))?;

        let (rest, headers) = match rest.split_once('?') {
            Some((rest, headers)) => (rest, Some(headers.to_string())),
            None => (rest, None),
        };

        let (user, host_part) = match rest.rsplit_once('@') {
            Some((user, host)) => (Some(user.to_string()), host),
            None => (None, rest),
        };

        let mut segments = host_part.split(';');
        let host_port = segments.next().unwrap_or_default();
        let params = segments
            .filter(|p| !p.is_empty())
            .map(|p| match p.split_once('=') {
                Some((name, value)) => (name.to_string(), Some(value.to_string())),
                None => (p.to_string(), None),
            })
            .collect();

        let (host, port) = if let Some(v6) = host_port.strip_prefix('[') {
            let (host, after) = v6.split_once(']').ok_or_else(|| Error::InvalidUri(s.to_string()))?;
            let port = match after.strip_prefix(':') {
                Some(port) => Some(port.parse().map_err(|_| Error::InvalidUri(s.to_string()))?),
                None => None,
            };
            (format!("[{}]", host), port)
        } else {
            match host_port.rsplit_once(':') {
                Some((host, port)) => (
                    host.to_string(),
                    Some(port.parse().map_err(|_| Error::InvalidUri(s.to_string()))?),
                ),
                None => (host_port.to_string(), None),
            }
        };

        if host.is_empty() {
            return Err(Error::InvalidUri(s.to_string()));
        }

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            user,
            host,
            port,
            params,
            headers,
        })
    }
}
