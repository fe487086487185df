/// Generative service boundary.
///
/// [`ImageGenerator`] covers the synchronous image edit/compose model,
/// [`VideoJobService`] the long-running video model. [`gemini::GeminiClient`]
/// implements both over HTTP; workflows and the poller only see the traits.

pub mod gemini;
pub mod poller;
pub mod video;

use async_trait::async_trait;

use crate::error::StudioResult;
use crate::imaging::ImageRecord;

pub use gemini::{GeminiClient, GeminiClientBuilder};
pub use poller::{JobOperation, JobPoller, JobProgress, JobState, PollSettings, VideoArtifact};
pub use video::{Fetch, Operation, VideoRequest};

/// One image request: instruction text plus inline images
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub instruction: String,
    pub system_instruction: Option<String>,
    pub images: Vec<ImageRecord>,
    /// e.g. "1:1"
    pub aspect_ratio: String,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Return the first inline image of the response.
    ///
    /// A response without an image is a [`crate::error::StudioError::Service`]
    /// error, never retried.
    async fn generate_image(&self, request: GenerationRequest) -> StudioResult<ImageRecord>;
}

#[async_trait]
pub trait VideoJobService: Send + Sync {
    /// Create the job and return its first operation snapshot
    async fn submit(&self, request: VideoRequest) -> StudioResult<Operation>;

    /// Fetch the latest snapshot of operation `name`
    async fn poll(&self, name: &str) -> StudioResult<Operation>;

    /// Fetch the artifact at `uri`, with or without the API key parameter
    async fn fetch(&self, uri: &str, authenticated: bool) -> StudioResult<Fetch>;
}
