use thiserror::Error;

/// Errors surfaced by the query layer. Store-specific constraint codes are
/// folded into [`DbError::UniqueViolation`] so callers check one shape.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("database error: {0}")]
    Sqlx(sqlx::Error),

    #[error("hosted backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("hosted backend returned {status}: {message}")]
    Hosted {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("invalid parameter at position {position}: {reason}")]
    InvalidParameter { position: usize, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("record decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<sqlx::Error> for DbError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db) = e {
            if db.is_unique_violation() {
                let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
                return DbError::UniqueViolation(format!("{} ({})", db.message(), code));
            }
        }
        DbError::Sqlx(e)
    }
}

impl DbError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, DbError::UniqueViolation(_))
    }
}
