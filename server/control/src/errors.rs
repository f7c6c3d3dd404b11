use thiserror::Error;

pub type RelayResult<T> = Result<T, RelayError>;

/// Error kinds per the kind -> disposition table: each maps to exactly one
/// recoverable outcome (emit `error`, skip, or no-op) in the session handler.
/// None of these are fatal; only own-channel I/O failure ends a session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("name already in use")]
    NameTaken,

    #[error("invalid name")]
    InvalidName,

    #[error("room name cannot be empty")]
    InvalidRoomName,

    #[error("not found: {0}")]
    NotFound(&'static str),

    #[error("call state violation: {0}")]
    CallStateViolation(&'static str),
}
