//! ICE candidate line parsing
//!
//! Browsers trickle candidates as `candidate:` attribute lines. Only the fields
//! the ICE agent needs are extracted; trailing extension attributes
//! (`generation`, `raddr`/`rport`, `network-id`, ...) are accepted and dropped.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

static CANDIDATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^candidate:(\d+) (\d+) (\w+) (\d+) (\S+) (\d+) typ (\w+)")
        .expect("candidate pattern is valid")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to parse ICE candidate: {line}")]
pub struct ParseError {
    /// The candidate line exactly as received
    pub line: String,
}

impl ParseError {
    fn new(line: &str) -> Self {
        Self {
            line: line.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidateDescriptor {
    pub foundation: String,
    pub component: u16,
    pub protocol: String,
    pub priority: u32,
    pub address: String,
    pub port: u16,
    /// `host`, `srflx`, `prflx` or `relay`
    pub candidate_type: String,
}

/// A parsed candidate plus the SDP-level fields that travel beside it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCandidate {
    pub descriptor: IceCandidateDescriptor,
    pub sdp_mid: String,
    pub sdp_mline_index: u16,
    pub username_fragment: String,
}

impl fmt::Display for IceCandidateDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "candidate:{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component,
            self.protocol,
            self.priority,
            self.address,
            self.port,
            self.candidate_type
        )
    }
}

pub fn parse(line: &str) -> Result<IceCandidateDescriptor, ParseError> {
    let caps = CANDIDATE_RE
        .captures(line)
        .ok_or_else(|| ParseError::new(line))?;

    let field = |i: usize| caps.get(i).map(|m| m.as_str()).unwrap_or_default();

    let component: u16 = field(2).parse().map_err(|_| ParseError::new(line))?;
    if component == 0 {
        return Err(ParseError::new(line));
    }

    Ok(IceCandidateDescriptor {
        foundation: field(1).to_string(),
        component,
        protocol: field(3).to_string(),
        priority: field(4).parse().map_err(|_| ParseError::new(line))?,
        address: field(5).to_string(),
        port: field(6).parse().map_err(|_| ParseError::new(line))?,
        candidate_type: field(7).to_string(),
    })
}
