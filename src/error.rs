//! Failure taxonomy for the question-answering pipeline.
//!
//! Every component below the request handler returns [`RagError`]. The
//! handler boundary (HTTP server or CLI) is the only place that turns these
//! into client-facing responses; see [`RagError::code`] and
//! [`RagError::status`].

use thiserror::Error;

/// External dependency names used in error reports.
pub const DEP_S3: &str = "s3";
pub const DEP_EMBEDDING: &str = "embedding";
pub const DEP_LLM: &str = "llm";

#[derive(Debug, Error)]
pub enum RagError {
    /// The request itself is malformed (e.g. no question).
    #[error("{0}")]
    Validation(String),

    /// Object storage or a model service could not be reached or refused us.
    #[error("{dependency} unavailable: {message}")]
    SourceUnavailable {
        dependency: &'static str,
        message: String,
        /// The dependency answered 503 rather than failing outright.
        overloaded: bool,
    },

    /// An uploaded payload could not be turned into a document.
    #[error("could not decode '{name}': {message}")]
    Decode { name: String, message: String },

    /// The composed prompt is larger than the model accepts.
    #[error("model input too large: {0}")]
    ModelInputTooLarge(String),

    #[error("{dependency} call timed out")]
    DeadlineExceeded { dependency: &'static str },

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;

impl RagError {
    pub fn validation(message: impl Into<String>) -> Self {
        RagError::Validation(message.into())
    }

    pub fn unavailable(dependency: &'static str, message: impl Into<String>) -> Self {
        RagError::SourceUnavailable {
            dependency,
            message: message.into(),
            overloaded: false,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        RagError::Internal(message.into())
    }

    /// Classify a non-success HTTP status returned by `dependency`.
    ///
    /// 5xx, 401, 403 and 429 mean the dependency is unusable right now;
    /// 413 means our payload was too big; anything else is our bug.
    pub fn from_status(dependency: &'static str, status: u16, body: &str) -> Self {
        let body: String = body.chars().take(500).collect();
        match status {
            413 => RagError::ModelInputTooLarge(body),
            503 => RagError::SourceUnavailable {
                dependency,
                message: format!("HTTP {}: {}", status, body),
                overloaded: true,
            },
            401 | 403 | 429 | 500..=599 => {
                RagError::unavailable(dependency, format!("HTTP {}: {}", status, body))
            }
            _ => RagError::Internal(format!("{} returned HTTP {}: {}", dependency, status, body)),
        }
    }

    /// Classify a transport-level failure from `reqwest`.
    pub fn from_transport(dependency: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RagError::DeadlineExceeded { dependency }
        } else {
            RagError::unavailable(dependency, err.to_string())
        }
    }

    /// Machine-readable code used in error response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::Validation(_) => "bad_request",
            RagError::SourceUnavailable { .. } => "source_unavailable",
            RagError::Decode { .. } => "decode_error",
            RagError::ModelInputTooLarge(_) => "model_input_too_large",
            RagError::DeadlineExceeded { .. } => "deadline_exceeded",
            RagError::Internal(_) => "internal",
        }
    }

    /// HTTP status the handler boundary should answer with.
    pub fn status(&self) -> u16 {
        match self {
            RagError::Validation(_) | RagError::Decode { .. } => 400,
            RagError::SourceUnavailable {
                overloaded: true, ..
            } => 503,
            RagError::SourceUnavailable { .. } => 502,
            RagError::ModelInputTooLarge(_) => 413,
            RagError::DeadlineExceeded { .. } => 504,
            RagError::Internal(_) => 500,
        }
    }

    /// Name of the failing external dependency, if any.
    pub fn dependency(&self) -> Option<&'static str> {
        match self {
            RagError::SourceUnavailable { dependency, .. }
            | RagError::DeadlineExceeded { dependency } => Some(dependency),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RagError {
    fn from(err: std::io::Error) -> Self {
        RagError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for RagError {
    fn from(err: serde_json::Error) -> Self {
        RagError::Internal(err.to_string())
    }
}

/// Run `fut`, failing with [`RagError::DeadlineExceeded`] after `secs` seconds.
pub async fn with_deadline<T, F>(dependency: &'static str, secs: u64, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(std::time::Duration::from_secs(secs), fut).await {
        Ok(res) => res,
        Err(_) => Err(RagError::DeadlineExceeded { dependency }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            RagError::from_status(DEP_LLM, 413, "too long"),
            RagError::ModelInputTooLarge(_)
        ));
        assert_eq!(RagError::from_status(DEP_S3, 403, "denied").status(), 502);
        assert_eq!(RagError::from_status(DEP_LLM, 503, "busy").status(), 503);
        assert_eq!(RagError::from_status(DEP_LLM, 404, "nope").status(), 500);
    }

    #[test]
    fn dependency_is_reported() {
        let err = RagError::unavailable(DEP_EMBEDDING, "connection refused");
        assert_eq!(err.dependency(), Some("embedding"));
        assert_eq!(err.code(), "source_unavailable");
        assert!(err.to_string().contains("embedding unavailable"));
    }

    #[tokio::test]
    async fn deadline_expires() {
        let res: Result<()> = with_deadline(DEP_LLM, 0, async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(())
        })
        .await;
        assert!(matches!(
            res,
            Err(RagError::DeadlineExceeded { dependency: "llm" })
        ));
    }
}
