use thiserror::Error;

/// Classification of a failed Pipedrive call, derived from the HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// 401: the API token was rejected.
    Unauthorized,
    /// 400: the payload was refused.
    InvalidPayload,
    /// 5xx, usually transient. Retrying is the caller's decision.
    ServerError,
    /// 2xx status but the envelope carried `success: false`.
    Rejected,
    Other,
}

impl ApiErrorKind {
    pub fn from_status(status_code: u16) -> Self {
        match status_code {
            401 => ApiErrorKind::Unauthorized,
            400 => ApiErrorKind::InvalidPayload,
            s if s >= 500 => ApiErrorKind::ServerError,
            s if s < 400 => ApiErrorKind::Rejected,
            _ => ApiErrorKind::Other,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            ApiErrorKind::Unauthorized => "Unauthorized, check PIPEDRIVE_API_KEY",
            ApiErrorKind::InvalidPayload => "Bad Request, invalid payload sent to Pipedrive",
            ApiErrorKind::ServerError => "Server Error, try again later",
            ApiErrorKind::Rejected => "Request rejected by Pipedrive",
            ApiErrorKind::Other => "HTTP Error",
        }
    }
}

impl std::fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Missing required field: {0}")]
    MissingRequiredField(String),

    #[error("{kind} ({status_code}): {message}")]
    RemoteApi {
        status_code: u16,
        message: String,
        kind: ApiErrorKind,
    },

    #[error("Malformed response from Pipedrive: {0}")]
    MalformedResponse(String),

    #[error("HTTP request error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn remote(status_code: u16, message: impl Into<String>) -> Self {
        SyncError::RemoteApi {
            status_code,
            message: message.into(),
            kind: ApiErrorKind::from_status(status_code),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
