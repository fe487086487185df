use thiserror::Error;

/// The single sentence shown to the user for any failed generation,
/// edit, video or export. The underlying error is logged instead.
pub const FRIENDLY_FAILURE: &str =
    "Masterbot could not complete the request. Please try again or enter a more precise description.";

/// Central error type for studio operations.
#[derive(Error, Debug)]
pub enum StudioError {
    /// The bytes could not be decoded as an image (or video).
    #[error("Decode error: {0}")]
    Decode(String),

    /// The drawing surface for a crop could not be created or encoded.
    #[error("Canvas error: {0}")]
    Canvas(String),

    /// Missing or invalid user input. The message is user-facing.
    #[error("{0}")]
    Validation(String),

    /// The generation service returned no usable artifact or reported a failure.
    #[error("Service error: {0}")]
    Service(String),

    /// The long-running job did not finish within the attempt cap.
    #[error("Video job timed out after {attempts} polls")]
    Timeout { attempts: u32 },

    /// A storage write exceeded the slot capacity.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The generated artifact could not be fetched or was empty.
    #[error("Download error: {0}")]
    Download(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StudioError {
    /// Text for the presentation layer.
    ///
    /// Validation errors keep their own wording because they block the
    /// action before any request is sent; everything else collapses to
    /// [`FRIENDLY_FAILURE`].
    pub fn user_message(&self) -> String {
        match self {
            StudioError::Validation(message) => message.clone(),
            other => {
                tracing::error!(error = %other, "operation failed");
                FRIENDLY_FAILURE.to_string()
            }
        }
    }
}

/// Convenience type alias for studio results.
pub type StudioResult<T> = Result<T, StudioError>;
