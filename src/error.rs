use thiserror::Error;

/// Failure vocabulary shared by every provider client.
///
/// `Auth` means the provider rejected the credential (401/403 equivalent);
/// the caller must force re-authentication and nothing in this crate retries
/// it. Everything else is `Api`, carrying the originating HTTP status or a
/// synthetic one: 400 invalid caller input, 404 not found, 429 rate limited,
/// 500 missing operator configuration, 501 operation unsupported by the
/// provider, 502 unusable provider payload or transport failure.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{message}")]
    Auth { message: String },

    #[error("{message}")]
    Api { message: String, status: u16 },
}

impl ProviderError {
    pub fn auth(message: impl Into<String>) -> Self {
        ProviderError::Auth {
            message: message.into(),
        }
    }

    pub fn api(message: impl Into<String>, status: u16) -> Self {
        ProviderError::Api {
            message: message.into(),
            status,
        }
    }

    /// Status code for `Api` errors; `None` for auth failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Auth { .. } => None,
            ProviderError::Api { status, .. } => Some(*status),
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ProviderError::Auth { .. })
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        // Timeouts and connection errors are transport failures; the caller
        // cannot distinguish them from a dead gateway, so neither do we.
        ProviderError::api(format!("provider request failed: {}", err), 502)
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::api(format!("provider returned an unusable payload: {}", err), 502)
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
