//! CSeq header value

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::types::method::Method;

/// `CSeq: <seq> <METHOD>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CSeq {
    pub seq: u32,
    pub method: Method,
}

impl CSeq {
    pub fn new(seq: u32, method: Method) -> Self {
        Self { seq, method }
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.seq, self.method)
    }
}

impl FromStr for CSeq {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split_whitespace();
        let seq = parts
            .next()
            .and_then(|seq| seq.parse().ok())
            .ok_or_else(|| Error::invalid_header("CSeq", s))?;
        let method = parts
            .next()
            .ok_or_else(|| Error::invalid_header("CSeq", s))?
            .parse()?;
        Ok(Self { seq, method })
    }
}
