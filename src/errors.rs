use thiserror::Error;

#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error("validation error: {0}")] Validation(String),
    #[error("credential error: {0}")] Credential(String),
    #[error("connectivity error: {0}")] Connectivity(String),
    #[error("provider error: {0}")] Provider(String),
    #[error("malformed response: {0}")] MalformedResponse(String),
    #[error("not found: {0}")] NotFound(String),
}

pub type Result<T, E = OptimizerError> = std::result::Result<T, E>;

const CORS_HINT: &str = "Connection failed. This is likely a CORS or server configuration issue. \
Please ensure the endpoint is reachable and configured to accept requests from this client.";

impl OptimizerError {
    /// The single message shown to the user when this error reaches the session boundary.
    pub fn user_message(&self) -> String {
        match self {
            OptimizerError::Validation(msg) | OptimizerError::Credential(msg) => msg.clone(),
            OptimizerError::Connectivity(detail) => format!("{CORS_HINT} ({detail})"),
            OptimizerError::Provider(_) => {
                "An error occurred while optimizing the prompt. Please check your provider settings and try again."
                    .to_string()
            }
            OptimizerError::MalformedResponse(_) => {
                "The model returned an unexpected format. Please try again.".to_string()
            }
            OptimizerError::NotFound(what) => format!("Not found: {what}"),
        }
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, OptimizerError::Connectivity(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_message_points_at_cors() {
        let e = OptimizerError::Connectivity("connection refused".into());
        assert!(e.is_connectivity());
        assert!(e.user_message().contains("CORS"));
        assert!(e.user_message().contains("connection refused"));
    }

    #[test]
    fn validation_message_is_passed_through() {
        let e = OptimizerError::Validation("No execution model is selected.".into());
        assert_eq!(e.user_message(), "No execution model is selected.");
    }
}
