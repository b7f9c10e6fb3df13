use thiserror::Error;

/// Kind-tagged error surfaced at the service-method boundary.
///
/// Repositories and low-level clients use `anyhow::Result` internally (see `db::*`,
/// `k8s::*`); service methods translate those into one of these variants so that
/// callers (the eventual HTTP/CLI adapters) can match on the kind without parsing
/// strings.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("fatal error: {0}")]
    Fatal(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        CoreError::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        CoreError::Transient(msg.into())
    }

    pub fn policy_violation(msg: impl Into<String>) -> Self {
        CoreError::PolicyViolation(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        CoreError::Timeout(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        CoreError::Fatal(msg.into())
    }

    /// Classify a low-level `anyhow::Error` produced by a repository call.
    ///
    /// Repositories already attach context via `.context(...)`; this only looks at
    /// the root sqlx error to decide whether the failure is a conflict (unique
    /// violation, `23505`), a transient condition (deadlock `40P01`, connection
    /// loss), or an opaque transient fallback.
    pub fn from_db_error(context: &str, err: anyhow::Error) -> Self {
        if let Some(db_err) = err.downcast_ref::<sqlx::Error>() {
            match db_err {
                sqlx::Error::Database(db) => {
                    if let Some(code) = db.code() {
                        if code == "23505" {
                            return CoreError::Conflict(format!("{context}: {db}"));
                        }
                        if code == "40P01" {
                            return CoreError::Transient(format!(
                                "{context}: deadlock detected: {db}"
                            ));
                        }
                    }
                    CoreError::Transient(format!("{context}: {db}"))
                }
                sqlx::Error::RowNotFound => CoreError::NotFound(context.to_string()),
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                    CoreError::Transient(format!("{context}: {db_err}"))
                }
                other => CoreError::Transient(format!("{context}: {other}")),
            }
        } else {
            CoreError::Transient(format!("{context}: {err}"))
        }
    }
}

/// Classification helpers used directly against a `sqlx::Error` (for call sites
/// that have not yet wrapped it in `anyhow`).
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

pub fn is_deadlock(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("40P01"))
}
