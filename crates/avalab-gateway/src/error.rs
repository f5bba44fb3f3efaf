use thiserror::Error;

/// Why a token could not be turned into a live profile.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    /// The token is well formed but its profile no longer exists
    #[error("unknown profile")]
    UnknownProfile,

    #[error(transparent)]
    Storage(avalab_db::Error),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Db(#[from] avalab_db::Error),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
