// AI Provider Error Types

use thiserror::Error;

/// Normalized failure taxonomy shared by all provider adapters
#[derive(Error, Debug)]
pub enum AiError {
    /// Invalid or expired API key
    #[error("Provider authentication failed: {0}")]
    AuthFailed(String),

    #[error("Provider rate limit exceeded, please try again later")]
    RateLimited,

    #[error("Provider response timeout")]
    Timeout,

    /// Response could not be parsed into the expected shape
    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    /// Endpoint unreachable
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Privacy mode forbids the requested cloud model
    #[error("Privacy mode is enabled for this repository: {0}")]
    PrivacyViolation(String),

    #[error("Invalid provider configuration: {0}")]
    InvalidConfig(String),

    /// Non-2xx response that maps to no more specific variant
    #[error("Provider API error: {0}")]
    Api(String),
}

impl From<reqwest::Error> for AiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AiError::Timeout
        } else if err.is_connect() {
            AiError::Unavailable(err.to_string())
        } else if err.is_decode() {
            AiError::MalformedResponse(err.to_string())
        } else {
            AiError::Api(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AiError {
    fn from(err: serde_json::Error) -> Self {
        AiError::MalformedResponse(err.to_string())
    }
}

pub type AiResult<T> = Result<T, AiError>;
