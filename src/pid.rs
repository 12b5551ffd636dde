//! Persistent-identifier normalization.
//!
//! OAI record identifiers arrive with a protocol prefix (`doi:`, `hdl:`,
//! `ark:/`) or bare. Normalization strips the prefix and records the
//! protocol tag; unrecognized shapes default to `doi`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier protocol of a persistent identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PidProtocol {
    /// Digital Object Identifier.
    Doi,
    /// Handle System identifier.
    Hdl,
    /// Archival Resource Key.
    Ark,
}

impl PidProtocol {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Doi => "doi",
            Self::Hdl => "hdl",
            Self::Ark => "ark",
        }
    }
}

impl fmt::Display for PidProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PidProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "doi" => Ok(Self::Doi),
            "hdl" => Ok(Self::Hdl),
            "ark" => Ok(Self::Ark),
            _ => Err(format!("invalid pid protocol: {s}")),
        }
    }
}

/// A normalized identifier together with its protocol tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPid {
    /// Identifier with the protocol prefix stripped.
    pub pid: String,
    /// Protocol tag; `doi` when no prefix was recognized.
    pub protocol: PidProtocol,
}

/// Strips a `doi:`/`hdl:`/`ark:/` prefix and tags the protocol.
///
/// # Examples
///
/// ```
/// use harvester_core::pid::{PidProtocol, normalize_pid};
///
/// let n = normalize_pid("hdl:11304/abc");
/// assert_eq!(n.pid, "11304/abc");
/// assert_eq!(n.protocol, PidProtocol::Hdl);
/// ```
#[must_use]
pub fn normalize_pid(identifier: &str) -> NormalizedPid {
    if let Some(rest) = identifier.strip_prefix("doi:") {
        NormalizedPid {
            pid: rest.to_string(),
            protocol: PidProtocol::Doi,
        }
    } else if let Some(rest) = identifier.strip_prefix("hdl:") {
        NormalizedPid {
            pid: rest.to_string(),
            protocol: PidProtocol::Hdl,
        }
    } else if let Some(rest) = identifier.strip_prefix("ark:/") {
        NormalizedPid {
            pid: rest.to_string(),
            protocol: PidProtocol::Ark,
        }
    } else {
        NormalizedPid {
            pid: identifier.to_string(),
            protocol: PidProtocol::Doi,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_doi_prefix() {
        let n = normalize_pid("doi:10.1234/abc");
        assert_eq!(n.pid, "10.1234/abc");
        assert_eq!(n.protocol, PidProtocol::Doi);
    }

    #[test]
    fn test_normalize_hdl_prefix() {
        let n = normalize_pid("hdl:11304/xyz");
        assert_eq!(n.pid, "11304/xyz");
        assert_eq!(n.protocol, PidProtocol::Hdl);
    }

    #[test]
    fn test_normalize_ark_prefix() {
        let n = normalize_pid("ark:/12148/btv1b8449691v");
        assert_eq!(n.pid, "12148/btv1b8449691v");
        assert_eq!(n.protocol, PidProtocol::Ark);
    }

    #[test]
    fn test_bare_identifier_defaults_to_doi() {
        let n = normalize_pid("10.1234/abc");
        assert_eq!(n.pid, "10.1234/abc");
        assert_eq!(n.protocol, PidProtocol::Doi);
    }

    #[test]
    fn test_protocol_round_trip() {
        for protocol in [PidProtocol::Doi, PidProtocol::Hdl, PidProtocol::Ark] {
            let parsed: PidProtocol = protocol.as_str().parse().unwrap();
            assert_eq!(parsed, protocol);
        }
    }
}
