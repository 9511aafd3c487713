//! ULID-based identifier generation with prefixes.
//!
//! Identifiers follow the pattern `prefix_ulid`, for example
//! `req_01hqxyz...` for a request correlation id.

use ulid::Ulid;

/// Known identifier prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPrefix {
    Conversation,
    Request,
    Call,
    Project,
}

impl IdPrefix {
    /// Get the string prefix for this identifier type.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdPrefix::Conversation => "cnv",
            IdPrefix::Request => "req",
            IdPrefix::Call => "call",
            IdPrefix::Project => "prj",
        }
    }

    /// Parse a prefix from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cnv" => Some(IdPrefix::Conversation),
            "req" => Some(IdPrefix::Request),
            "call" => Some(IdPrefix::Call),
            "prj" => Some(IdPrefix::Project),
            _ => None,
        }
    }
}

/// Identifier generation and parsing utilities.
pub struct Identifier;

impl Identifier {
    /// Generate a new ascending identifier (newer = larger).
    pub fn ascending(prefix: IdPrefix) -> String {
        format!("{}_{}", prefix.as_str(), Ulid::new().to_string().to_lowercase())
    }

    /// Parse an identifier into its prefix and ULID parts.
    pub fn parse(id: &str) -> Option<(IdPrefix, Ulid)> {
        let (prefix, ulid) = id.split_once('_')?;
        let prefix = IdPrefix::parse(prefix)?;
        let ulid = Ulid::from_string(&ulid.to_uppercase()).ok()?;
        Some((prefix, ulid))
    }

    /// Generate a request correlation id for calls to external collaborators.
    pub fn request() -> String {
        Self::ascending(IdPrefix::Request)
    }

    /// Generate a tool call id.
    pub fn call() -> String {
        Self::ascending(IdPrefix::Call)
    }

    /// Generate a conversation id.
    pub fn conversation() -> String {
        Self::ascending(IdPrefix::Conversation)
    }
}
