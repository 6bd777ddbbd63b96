use thiserror::Error;

/// Raw failure reported by an engine or provider client.
///
/// Structured fields are optional; whatever the client knows is passed
/// through and [`crate::classify::classify`] does the rest.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
    pub status: Option<u16>,
    /// Seconds the provider asked us to wait, if it said so.
    pub retry_after: Option<f64>,
    pub code: Option<String>,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            retry_after: None,
            code: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, seconds: f64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(message).with_status(429)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(message).with_status(401)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_message() {
        let err = ProviderError::rate_limited("slow down").with_retry_after(2.5);
        assert_eq!(err.to_string(), "slow down");
        assert_eq!(err.status, Some(429));
        assert_eq!(err.retry_after, Some(2.5));
    }
}
