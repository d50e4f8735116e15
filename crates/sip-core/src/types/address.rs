//! name-addr values as carried by From, To and Contact

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::types::uri::SipUri;

/// `"Display Name" <sip:user@host>;tag=abc`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub display_name: Option<String>,
    pub uri: SipUri,
    /// Header parameters following the URI (`tag`, `expires`, `+sip.instance`, ...)
    pub params: Vec<(String, Option<String>)>,
}

impl Address {
    pub fn new(uri: SipUri) -> Self {
        Self {
            display_name: None,
            uri,
            params: Vec::new(),
        }
    }

    pub fn param(&self, name: &str) -> Option<Option<&str>> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_deref())
    }

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

    pub fn tag(&self) -> Option<&str> {
        self.param("tag").flatten()
    }

    pub fn with_tag(self, tag: &str) -> Self {
        self.with_param("tag", Some(tag))
    }
}

fn parse_params(input: &str) -> Vec<(String, Option<String>)> {
    input
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| match p.split_once('=') {
            Some((name, value)) => (name.trim().to_string(), Some(value.trim().to_string())),
            None => (p.to_string(), None),
        })
        .collect()
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();

        let Some(open) = s.find('<') else {
            // addr-spec form: everything after the first ';' is a header parameter
            let (uri, params) = match s.split_once(';') {
                Some((uri, params)) => (uri, parse_params(params)),
                None => (s, Vec::new()),
            };
            return Ok(Self {
                display_name: None,
                uri: uri.parse()?,
                params,
            });
        };

        let close = s[open..]
            .find('>')
            .map(|i| open + i)
            .ok_or_else(|| Error::invalid_header("address", s))?;

        let display = s[..open].trim().trim_matches('"').trim();
        let uri = s[open + 1..close].parse()?;
        let params = parse_params(&s[close + 1..]);

        Ok(Self {
            display_name: (!display.is_empty()).then(|| display.to_string()),
            uri,
            params,
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.display_name {
            write!(f, "\"{}\" ", name)?;
        }
        write!(f, "<{}>", self.uri)?;
        for (name, value) in &self.params {
            match value {
                Some(value) => write!(f, ";{}={}", name, value)?,
                None => write!(f, ";{}", name)?,
            }
        }
        Ok(())
    }
}
