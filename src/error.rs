use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced at the Command Router / Transport boundary.
///
/// Every variant maps to one of the wire status codes from the external
/// interface (status 0, success, is never represented here): `Invalid`,
/// `QuorumNotReached` and `Transport` map to status 1, `NotLeader` maps
/// to status 2.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("{0}")]
    Invalid(String),

    #[error("not leader")]
    NotLeader { leader: Option<String> },

    #[error("precommit did not reach quorum")]
    QuorumNotReached,

    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    /// Converts the error into the `{Status, Data}` pair used on the wire.
    pub fn to_wire(&self) -> (i32, String) {
        match self {
            Error::NotLeader { leader } => (2, leader.clone().unwrap_or_default()),
            Error::Invalid(msg) => (1, msg.clone()),
            Error::QuorumNotReached => (1, self.to_string()),
            Error::Transport(msg) => (1, msg.clone()),
        }
    }
}
