use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    InvalidInput(String),
    InvalidData(String),
    StoreUnavailable(String),
    Network { retryable: bool, message: String },
}

impl AppError {
    pub fn invalid_input<M: Into<String>>(message: M) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn invalid_data<M: Into<String>>(message: M) -> Self {
        Self::InvalidData(message.into())
    }

    pub fn store_unavailable<M: Into<String>>(message: M) -> Self {
        Self::StoreUnavailable(message.into())
    }

    pub fn transient<M: Into<String>>(message: M) -> Self {
        Self::Network {
            retryable: true,
            message: message.into(),
        }
    }

    pub fn rejected<M: Into<String>>(message: M) -> Self {
        Self::Network {
            retryable: false,
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidData(_) => "invalid_data",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Network { .. } => "network_error",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::InvalidInput(message) => message,
            Self::InvalidData(message) => message,
            Self::StoreUnavailable(message) => message,
            Self::Network { message, .. } => message,
        }
    }

    /// Transient network failures are retried with backoff; everything else is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { retryable: true, .. })
    }

    /// Local persistence failures push the coordinator into offline-safe mode.
    pub fn is_local_fatal(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::InvalidData(_))
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.code(), self.message())
    }
}

impl std::error::Error for AppError {}
