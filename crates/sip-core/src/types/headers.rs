//! Ordered, case-insensitive SIP header list

use std::fmt;

use crate::types::address::Address;
use crate::types::cseq::CSeq;

/// Well-known header names used by the user agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderName {
    Via,
    From,
    To,
    CallId,
    CSeq,
    Contact,
    MaxForwards,
    Expires,
    ContentType,
    ContentLength,
    RecordRoute,
    Route,
    UserAgent,
    Allow,
    Supported,
}

impl HeaderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeaderName::Via => "Via",
            HeaderName::From => "From",
            HeaderName::To => "To",
            HeaderName::CallId => "Call-ID",
            HeaderName::CSeq => "CSeq",
            HeaderName::Contact => "Contact",
            HeaderName::MaxForwards => "Max-Forwards",
            HeaderName::Expires => "Expires",
            HeaderName::ContentType => "Content-Type",
            HeaderName::ContentLength => "Content-Length",
            HeaderName::RecordRoute => "Record-Route",
            HeaderName::Route => "Route",
            HeaderName::UserAgent => "User-Agent",
            HeaderName::Allow => "Allow",
            HeaderName::Supported => "Supported",
        }
    }
}

impl AsRef<str> for HeaderName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expand RFC 3261 compact header forms and lowercase for comparison
fn canonical(name: &str) -> String {
    let expanded = match name.trim() {
        "v" | "V" => "via",
        "f" | "F" => "from",
        "t" | "T" => "to",
        "i" | "I" => "call-id",
        "m" | "M" => "contact",
        "l" | "L" => "content-length",
        "c" | "C" => "content-type",
        "k" | "K" => "supported",
        "s" | "S" => "subject",
        other => return other.to_ascii_lowercase(),
    };
    expanded.to_string()
}

/// Header list preserving insertion order and duplicate entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value of a header
    pub fn get(&self, name: impl AsRef<str>) -> Option<&str> {
        let wanted = canonical(name.as_ref());
        self.entries
            .iter()
            .find(|(n, _)| canonical(n) == wanted)
            .map(|(_, v)| v.as_str())
    }

    /// Every value of a header, in order
    pub fn get_all(&self, name: impl AsRef<str>) -> Vec<&str> {
        let wanted = canonical(name.as_ref());
        self.entries
            .iter()
            .filter(|(n, _)| canonical(n) == wanted)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, name: impl AsRef<str>) -> bool {
        self.get(name).is_some()
    }

    /// Append a value, keeping existing ones
    pub fn append(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries.push((name.as_ref().to_string(), value.into()));
    }

    /// Replace every value of a header with a single one, keeping its position
    pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let wanted = canonical(name.as_ref());
        let value = value.into();
        match self.entries.iter().position(|(n, _)| canonical(n) == wanted) {
            Some(index) => {
                self.entries[index].1 = value;
                let mut seen = 0usize;
                self.entries.retain(|(n, _)| {
                    if canonical(n) != wanted {
                        return true;
                    }
                    seen += 1;
                    seen == 1
                });
            }
            None => self.entries.push((name.as_ref().to_string(), value)),
        }
    }

    pub fn remove(&mut self, name: impl AsRef<str>) {
        let wanted = canonical(name.as_ref());
        self.entries.retain(|(n, _)| canonical(n) != wanted);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Typed accessors shared by requests and responses
pub trait HeaderAccess {
    fn headers(&self) -> &Headers;

    fn call_id(&self) -> Option<&str> {
        self.headers().get(HeaderName::CallId)
    }

    fn cseq(&self) -> Option<CSeq> {
        self.headers().get(HeaderName::CSeq)?.parse().ok()
    }

    fn from_address(&self) -> Option<Address> {
        self.headers().get(HeaderName::From)?.parse().ok()
    }

    fn to_address(&self) -> Option<Address> {
        self.headers().get(HeaderName::To)?.parse().ok()
    }

    fn contact(&self) -> Option<Address> {
        self.headers().get(HeaderName::Contact)?.parse().ok()
    }

    fn from_tag(&self) -> Option<String> {
        self.from_address()?.tag().map(str::to_string)
    }

    fn to_tag(&self) -> Option<String> {
        self.to_address()?.tag().map(str::to_string)
    }

    fn content_type(&self) -> Option<&str> {
        self.headers().get(HeaderName::ContentType)
    }
}
