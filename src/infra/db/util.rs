use crate::application::repos::RepoError;

// Postgres SQLSTATE codes the catalog distinguishes.
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const INVALID_TEXT_REPRESENTATION: &str = "22P02";
const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";
const QUERY_CANCELED: &str = "57014";
const INTEGRITY_CLASS: &str = "23";

pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    let db = match err {
        sqlx::Error::PoolTimedOut => return RepoError::Timeout,
        sqlx::Error::Database(db) => db,
        other => return RepoError::from_persistence(other),
    };

    let code = db.code().map(|code| code.into_owned()).unwrap_or_default();
    let message = db.message().to_string();
    match code.as_str() {
        UNIQUE_VIOLATION => RepoError::Duplicate {
            constraint: db.constraint().unwrap_or("unknown").to_string(),
        },
        FOREIGN_KEY_VIOLATION | INVALID_TEXT_REPRESENTATION | NUMERIC_VALUE_OUT_OF_RANGE => {
            RepoError::InvalidInput { message }
        }
        QUERY_CANCELED => RepoError::Timeout,
        code if code.starts_with(INTEGRITY_CLASS) => RepoError::Integrity { message },
        _ => RepoError::Persistence(message),
    }
}

/// Postgres counts arrive as `BIGINT`.
pub(crate) fn convert_count(value: i64) -> Result<u64, RepoError> {
    value
        .try_into()
        .map_err(|_| RepoError::from_persistence("count exceeds supported range"))
}
