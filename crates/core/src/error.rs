use serde::{Deserialize, Serialize};

/// The closed set of failure categories shared by every blobgate component.
///
/// Each crate keeps its own error enum; all of them map onto one of these
/// kinds so that transport layers can choose a reply signal (`NAK`, an
/// `ERR` download reply, or an HTTP status) without matching on
/// crate-specific variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network send/receive failure. Fatal to the owning connection only.
    Transport,
    /// Malformed, duplicate or out-of-order protocol message.
    Protocol,
    /// The storage backend failed an operation.
    Storage,
    /// The object is locked by another holder.
    LockConflict,
    /// Unknown pool, object, or malformed identifier.
    NotFound,
}

impl ErrorKind {
    /// Return a stable string name for this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::Storage => "storage",
            Self::LockConflict => "lock_conflict",
            Self::NotFound => "not_found",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
