use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal server error")]
    Internal,
}

impl AppError {
    /// Message emitted to the socket in an `error` event. Database and
    /// internal details never cross the connection boundary.
    pub fn ws_message(&self) -> String {
        match self {
            AppError::Unauthorized => "not authenticated".into(),
            AppError::Forbidden => "not a participant of this conversation".into(),
            AppError::NotFound => "conversation not found".into(),
            AppError::Validation(msg) => msg.clone(),
            AppError::Conflict
            | AppError::Database(_)
            | AppError::Upstream(_)
            | AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Internal => "internal error".into(),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::Unauthorized => 401,
            AppError::Forbidden => 403,
            AppError::NotFound => 404,
            AppError::Conflict => 409,
            _ => 500,
        }
    }
}
