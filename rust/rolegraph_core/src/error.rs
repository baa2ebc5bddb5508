use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl QueryError {
    /// True when the caller sent something the engine rejects outright.
    /// Transport layers map this to a 4xx; everything else is a 5xx.
    pub fn is_client_error(&self) -> bool {
        matches!(self, QueryError::InvalidRequest(_) | QueryError::Json(_))
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_error_classification() {
        assert!(QueryError::InvalidRequest("bad".to_string()).is_client_error());
        let json_err = serde_json::from_str::<u32>("nope").unwrap_err();
        assert!(QueryError::from(json_err).is_client_error());
        assert!(!QueryError::Internal("dangling edge".to_string()).is_client_error());
    }

    #[test]
    fn display_includes_detail() {
        let err = QueryError::InvalidRequest("maxPodsPerSubject must be > 0".to_string());
        assert_eq!(
            err.to_string(),
            "invalid request: maxPodsPerSubject must be > 0"
        );
    }
}
