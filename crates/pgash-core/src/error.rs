//! Error type for active session history operations.

/// Error type for active session history operations.
#[derive(Debug)]
pub enum AshError {
    /// History storage has not been initialized by the host.
    NotInitialized,
    /// No backend query table entry matches the given pid.
    BackendNotFound(i32),
    /// Slot index outside the backend query table.
    SlotOutOfRange { slot: usize, capacity: usize },
    /// The active-session introspection query could not be executed.
    Introspection(String),
}

impl std::fmt::Display for AshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AshError::NotInitialized => {
                write!(f, "active session history storage is not initialized")
            }
            AshError::BackendNotFound(pid) => write!(f, "backend with pid={} not found", pid),
            AshError::SlotOutOfRange { slot, capacity } => {
                write!(f, "backend slot {} out of range (capacity {})", slot, capacity)
            }
            AshError::Introspection(msg) => write!(f, "introspection query failed: {}", msg),
        }
    }
}

impl std::error::Error for AshError {}
