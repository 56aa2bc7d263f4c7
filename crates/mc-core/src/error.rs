use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("API error: {message} (status: {status})")]
    Api { status: u16, message: String },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Stream error: {0}")]
    Stream(String),

    /// A tool provider could not be opened (launch failed or endpoint unreachable).
    #[error("Cannot connect to tool provider '{provider}': {message}")]
    Connection { provider: String, message: String },

    /// A tool call failed at runtime.
    #[error("Tool error: {tool} - {message}")]
    Invocation { tool: String, message: String },

    /// Registry rebuild failed; wraps the first connection error.
    #[error("Failed to build tool registry (provider '{provider}')")]
    Registry {
        provider: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    /// A turn exceeded its wall-clock budget.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A turn was submitted with no ready agent.
    #[error("Session is not initialized")]
    NotInitialized,

    #[error("Agent exceeded the step budget of {0} model calls")]
    StepBudgetExceeded(usize),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::RateLimit(message.into())
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream(message.into())
    }

    pub fn connection(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn invocation(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invocation {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Wrap a provider failure as a registry build failure.
    pub fn registry(provider: impl Into<String>, source: Error) -> Self {
        Self::Registry {
            provider: provider.into(),
            source: Box::new(source),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    /// Name of the tool provider this error is attributed to, if any.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Error::Connection { provider, .. } | Error::Registry { provider, .. } => {
                Some(provider)
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
