use mir_core::FaceId;

/// Error types for forwarding-table and face operations
///
/// None of these are fatal to the forwarder: pipeline code treats every
/// variant as a normal branch and at worst drops the packet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FwError {
    #[error("Entry not found: {0}")]
    NotFound(String),
    #[error("No record for {0}")]
    RecordNotFound(FaceId),
    #[error("PIT entry closed: {0}")]
    EntryClosed(String),
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),
    #[error("Unknown face: {0}")]
    UnknownFace(FaceId),
    #[error("Outbound queue full on {0}")]
    QueueFull(FaceId),
    #[error("Face closed: {0}")]
    FaceClosed(FaceId),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

pub type Result<T> = std::result::Result<T, FwError>;
