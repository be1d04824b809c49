//! Error taxonomy for API requests. Callers receive these wrapped in
//! `anyhow::Error` and classify them with `downcast_ref`.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    Timeout,
    Status { status: u16 },
    EmptyResponse,
    Transport { reason: String },
    Decode { reason: String },
}

impl ApiError {
    pub(crate) fn decode(reason: impl Into<String>) -> Self {
        ApiError::Decode {
            reason: reason.into(),
        }
    }

    /// Whether another attempt against the transport may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Timeout | ApiError::EmptyResponse | ApiError::Transport { .. } => true,
            ApiError::Status { status } => *status == 429 || *status >= 500,
            ApiError::Decode { .. } => false,
        }
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, ApiError::Decode { .. })
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Timeout => write!(f, "post API request timed out"),
            ApiError::Status { status } => write!(f, "post API returned HTTP status {status}"),
            ApiError::EmptyResponse => write!(f, "post API returned an empty body"),
            ApiError::Transport { reason } => write!(f, "post API request failed: {reason}"),
            ApiError::Decode { reason } => write!(f, "failed to decode post API response: {reason}"),
        }
    }
}

impl std::error::Error for ApiError {}

/// Returns true when `err` carries a decode failure anywhere in its chain.
pub fn is_decode_error(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<ApiError>(), Some(api) if api.is_decode()))
}
