//! Window record key derivation.

/// The key of one identifier's window record: `<prefix><identifier>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    /// Namespace shared by every record of one limiter
    pub prefix: String,
    /// Caller-supplied identifier (user id, IP address, API key...)
    pub identifier: String,
}

impl WindowKey {
    /// Create a new window key.
    pub fn new(prefix: &str, identifier: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            identifier: identifier.to_string(),
        }
    }

    /// The store key for this record.
    pub fn to_store_key(&self) -> String {
        format!("{}{}", self.prefix, self.identifier)
    }
}

impl std::fmt::Display for WindowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.prefix, self.identifier)
    }
}
