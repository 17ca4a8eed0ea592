// src/utils.rs
use std::fmt;

pub const DEFAULT_PORT: u16 = 7777;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserError {
    InvalidAddress(String),
    Transport(String),
    DirectoryStatus(u16),
    DirectoryDecode(String),
    EmptyDirectory,
    Probe(String),
    ProbeTimeout,
    CacheIo(String),
    Fallback(String),
    Busy,
    EngineClosed,
}

impl BrowserError {
    /// Errors that make the caller fall back to the local server list.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::DirectoryStatus(_)
                | Self::DirectoryDecode(_)
                | Self::EmptyDirectory
        )
    }
}

impl fmt::Display for BrowserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAddress(input) => write!(f, "Invalid server address: {}", input),
            Self::Transport(e) => write!(f, "Failed to reach directory: {}", e),
            Self::DirectoryStatus(code) => write!(f, "Directory returned status {}", code),
            Self::DirectoryDecode(e) => write!(f, "Failed to parse directory response: {}", e),
            Self::EmptyDirectory => write!(f, "Directory returned zero servers"),
            Self::Probe(e) => write!(f, "Query failed: {}", e),
            Self::ProbeTimeout => write!(f, "Query timed out"),
            Self::CacheIo(e) => write!(f, "Cache error: {}", e),
            Self::Fallback(e) => write!(f, "{}", e),
            Self::Busy => write!(f, "Refresh already in progress"),
            Self::EngineClosed => write!(f, "Engine is not running"),
        }
    }
}

impl std::error::Error for BrowserError {}

/// Splits `host[:port]` on the last colon. Bracketed IPv6 hosts (`[::1]:7777`)
/// are accepted; a bare host containing colons is not.
pub fn parse_address(input: &str) -> Result<(String, u16), BrowserError> {
    let trimmed = input.trim();
    let invalid = || BrowserError::InvalidAddress(input.to_string());

    if let Some(rest) = trimmed.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let port = match tail {
            "" => DEFAULT_PORT,
            _ => parse_port(tail.strip_prefix(':').ok_or_else(invalid)?).ok_or_else(invalid)?,
        };
        return Ok((host.to_string(), port));
    }

    let (host, port) = match trimmed.rsplit_once(':') {
        Some((host, port)) => (host, parse_port(port).ok_or_else(invalid)?),
        None => (trimmed, DEFAULT_PORT),
    };

    if host.is_empty() || host.contains(':') {
        return Err(invalid());
    }
    Ok((host.to_string(), port))
}

fn parse_port(value: &str) -> Option<u16> {
    match value.parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    }
}

pub fn format_address(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
