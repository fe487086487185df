/// Long-running video job poller.
///
/// Drives one video job from submission to a downloaded artifact:
///
/// ```text
/// NotStarted -> Submitted -> Polling ... -> Completed | Failed | TimedOut
/// ```
///
/// Progress is published on a [`tokio::sync::watch`] channel. The rotating
/// status message runs as its own task, owned by a guard that aborts it when
/// [`JobPoller::run`] returns by any path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use super::video::{probe_video_uri, Fetch, VideoRequest};
use super::VideoJobService;
use crate::config::VideoConfig;
use crate::error::{StudioError, StudioResult};

/// Status phrases cycled while a video renders
pub const ROTATING_MESSAGES: [&str; 4] = [
    "Cameras are warming up...",
    "Action! Generating the video...",
    "Final frames... This can take a few minutes.",
    "Rendering special effects...",
];

/// Shown from submission until the first rotation
pub const INITIAL_MESSAGE: &str = "Masterbot is setting the scene...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub poll_interval: Duration,
    pub message_interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from(&VideoConfig::default())
    }
}

impl From<&VideoConfig> for PollSettings {
    fn from(config: &VideoConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            message_interval: config.message_interval(),
            max_attempts: config.max_attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    NotStarted,
    Submitted,
    Polling,
    Completed,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::TimedOut)
    }
}

/// Bookkeeping for one video-generation call
#[derive(Debug, Clone, PartialEq)]
pub struct JobOperation {
    pub started: bool,
    pub done: bool,
    pub attempt: u32,
    pub max_attempts: u32,
    pub result_uri: Option<String>,
    pub error: Option<String>,
}

/// What subscribers see
#[derive(Debug, Clone, PartialEq)]
pub struct JobProgress {
    pub state: JobState,
    pub operation: JobOperation,
    pub message: String,
}

/// Downloaded video, held in memory for playback or saving
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoArtifact {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Aborts the message-rotation task when dropped
struct RotationGuard(JoinHandle<()>);

impl Drop for RotationGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct JobPoller<'a, V: VideoJobService + ?Sized> {
    service: &'a V,
    settings: PollSettings,
    progress: Arc<watch::Sender<JobProgress>>,
}

impl<'a, V: VideoJobService + ?Sized> JobPoller<'a, V> {
    pub fn new(service: &'a V, settings: PollSettings) -> Self {
        let (tx, _rx) = watch::channel(JobProgress {
            state: JobState::NotStarted,
            operation: JobOperation {
                started: false,
                done: false,
                attempt: 0,
                max_attempts: settings.max_attempts,
                result_uri: None,
                error: None,
            },
            message: INITIAL_MESSAGE.to_string(),
        });
        Self {
            service,
            settings,
            progress: Arc::new(tx),
        }
    }

    /// Watch progress updates
    pub fn subscribe(&self) -> watch::Receiver<JobProgress> {
        self.progress.subscribe()
    }

    /// Latest progress snapshot
    pub fn progress(&self) -> JobProgress {
        self.progress.borrow().clone()
    }

    /// Run the job to a terminal state.
    pub async fn run(&self, request: VideoRequest) -> StudioResult<VideoArtifact> {
        let _rotation = self.spawn_rotation();

        let result = self.drive(request).await;

        self.progress.send_modify(|p| match &result {
            Ok(_) => p.state = JobState::Completed,
            Err(StudioError::Timeout { .. }) => {
                p.state = JobState::TimedOut;
                p.operation.error = Some("timed out".into());
            }
            Err(e) => {
                p.state = JobState::Failed;
                p.operation.error = Some(e.to_string());
            }
        });

        result
    }

    fn spawn_rotation(&self) -> RotationGuard {
        let progress = Arc::clone(&self.progress);
        let period = self.settings.message_interval;

        RotationGuard(tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            let mut index = 0;
            loop {
                ticker.tick().await;
                index = (index + 1) % ROTATING_MESSAGES.len();
                progress.send_modify(|p| p.message = ROTATING_MESSAGES[index].to_string());
            }
        }))
    }

    async fn drive(&self, request: VideoRequest) -> StudioResult<VideoArtifact> {
        tracing::info!("starting video generation");
        let mut operation = self.service.submit(request).await?;
        self.progress.send_modify(|p| {
            p.state = JobState::Submitted;
            p.operation.started = true;
            p.operation.done = operation.done;
        });

        let max = self.settings.max_attempts;
        let mut attempt = 0;

        while !operation.done {
            if attempt >= max {
                tracing::warn!("video job still running after {attempt} polls");
                return Err(StudioError::Timeout { attempts: attempt });
            }

            attempt += 1;
            tracing::debug!("waiting for video generation (attempt {attempt}/{max})");
            time::sleep(self.settings.poll_interval).await;

            operation = self.service.poll(&operation.name).await.map_err(|e| {
                tracing::error!("error polling operation: {e}");
                StudioError::Service(format!("polling failed: {e}"))
            })?;

            self.progress.send_modify(|p| {
                p.state = JobState::Polling;
                p.operation.attempt = attempt;
                p.operation.done = operation.done;
            });
        }

        if let Some(error) = &operation.error {
            return Err(StudioError::Service(format!("video operation failed: {error}")));
        }

        let uri = probe_video_uri(&operation.raw).ok_or_else(|| {
            tracing::error!(response = %operation.raw, "no download link in response");
            StudioError::Service("video operation finished without a download link".into())
        })?;
        self.progress.send_modify(|p| p.operation.result_uri = Some(uri.clone()));

        let artifact = self.download(&uri).await?;
        tracing::info!("video downloaded: {} bytes", artifact.bytes.len());
        Ok(artifact)
    }

    /// Fetch with the key first, once more without it if rejected
    async fn download(&self, uri: &str) -> StudioResult<VideoArtifact> {
        let mut fetched = self.service.fetch(uri, true).await?;

        if let Fetch::Rejected { status } = fetched {
            tracing::debug!("download rejected with {status}, retrying without key");
            fetched = self.service.fetch(uri, false).await?;
        }

        match fetched {
            Fetch::Body { bytes, .. } if bytes.is_empty() => {
                Err(StudioError::Download("video payload was empty".into()))
            }
            Fetch::Body { bytes, mime_type } => Ok(VideoArtifact { bytes, mime_type }),
            Fetch::Rejected { status } => Err(StudioError::Download(format!("download rejected with {status}"))),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::imaging::ImageRecord;
    use crate::service::Operation;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Scripted video service: finishes after `done_after` polls
    pub(crate) struct ScriptedVideo {
        pub done_after: Option<u32>,
        pub finished: serde_json::Value,
        pub fetches: Mutex<Vec<(String, bool)>>,
        pub reject_authenticated: bool,
        pub body: Vec<u8>,
        pub polls: Mutex<u32>,
        pub submitted: Mutex<Vec<String>>,
    }

    impl ScriptedVideo {
        pub(crate) fn finishing_after(polls: u32) -> Self {
            Self {
                done_after: Some(polls),
                finished: json!({
                    "name": "operations/1",
                    "done": true,
                    "response": {"generatedVideos": [{"video": {"uri": "https://files/video?alt=media"}}]}
                }),
                fetches: Mutex::new(Vec::new()),
                reject_authenticated: false,
                body: vec![7; 32],
                polls: Mutex::new(0),
                submitted: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn never_finishing() -> Self {
            Self {
                done_after: None,
                ..Self::finishing_after(0)
            }
        }

        pub(crate) fn poll_count(&self) -> u32 {
            *self.polls.lock().unwrap()
        }
    }

    #[async_trait]
    impl VideoJobService for ScriptedVideo {
        async fn submit(&self, request: VideoRequest) -> StudioResult<Operation> {
            self.submitted.lock().unwrap().push(request.prompt);
            Ok(Operation::from_json(json!({"name": "operations/1"})))
        }

        async fn poll(&self, _name: &str) -> StudioResult<Operation> {
            let mut polls = self.polls.lock().unwrap();
            *polls += 1;
            match self.done_after {
                Some(n) if *polls >= n => Ok(Operation::from_json(self.finished.clone())),
                _ => Ok(Operation::from_json(json!({"name": "operations/1", "done": false}))),
            }
        }

        async fn fetch(&self, uri: &str, authenticated: bool) -> StudioResult<Fetch> {
            self.fetches.lock().unwrap().push((uri.to_string(), authenticated));
            if authenticated && self.reject_authenticated {
                return Ok(Fetch::Rejected { status: 403 });
            }
            Ok(Fetch::Body {
                bytes: self.body.clone(),
                mime_type: "video/mp4".into(),
            })
        }
    }

    fn request() -> VideoRequest {
        VideoRequest {
            prompt: "waves".into(),
            image: ImageRecord::from_bytes(b"img", "image/png"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_and_downloads() {
        let service = ScriptedVideo::finishing_after(3);
        let poller = JobPoller::new(&service, PollSettings::default());

        let started = Instant::now();
        let artifact = poller.run(request()).await.unwrap();

        assert_eq!(artifact.bytes, vec![7; 32]);
        assert_eq!(service.poll_count(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(30));

        let progress = poller.progress();
        assert_eq!(progress.state, JobState::Completed);
        assert_eq!(progress.operation.attempt, 3);
        assert!(progress.operation.done);
        assert_eq!(progress.operation.result_uri.as_deref(), Some("https://files/video?alt=media"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_exactly_max_attempts() {
        let service = ScriptedVideo::never_finishing();
        let poller = JobPoller::new(&service, PollSettings::default());

        let started = Instant::now();
        let err = poller.run(request()).await.unwrap_err();

        assert!(matches!(err, StudioError::Timeout { attempts: 60 }));
        assert_eq!(service.poll_count(), 60);
        assert_eq!(started.elapsed(), Duration::from_secs(600));
        assert_eq!(poller.progress().state, JobState::TimedOut);

        let final_message = poller.progress().message;
        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(poller.progress().message, final_message);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_on_last_allowed_poll_counts() {
        let service = ScriptedVideo::finishing_after(60);
        let poller = JobPoller::new(&service, PollSettings::default());
        assert!(poller.run(request()).await.is_ok());
        assert_eq!(service.poll_count(), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_error_fails() {
        let mut service = ScriptedVideo::finishing_after(1);
        service.finished = json!({"name": "operations/1", "done": true, "error": {"code": 13, "message": "boom"}});
        let poller = JobPoller::new(&service, PollSettings::default());

        let err = poller.run(request()).await.unwrap_err();
        assert!(matches!(err, StudioError::Service(_)));
        assert_eq!(poller.progress().state, JobState::Failed);
        assert!(service.fetches.lock().unwrap().is_empty());

        let final_message = poller.progress().message;
        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(poller.progress().message, final_message);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_link_fails() {
        let mut service = ScriptedVideo::finishing_after(1);
        service.finished = json!({"name": "operations/1", "done": true, "response": {}});
        let poller = JobPoller::new(&service, PollSettings::default());
        assert!(matches!(poller.run(request()).await, Err(StudioError::Service(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_download_retries_without_key() {
        let mut service = ScriptedVideo::finishing_after(1);
        service.reject_authenticated = true;
        let poller = JobPoller::new(&service, PollSettings::default());

        poller.run(request()).await.unwrap();

        let fetches = service.fetches.lock().unwrap();
        assert_eq!(fetches.len(), 2);
        assert!(fetches[0].1);
        assert!(!fetches[1].1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_payload_is_download_error() {
        let mut service = ScriptedVideo::finishing_after(1);
        service.body = Vec::new();
        let poller = JobPoller::new(&service, PollSettings::default());

        let err = poller.run(request()).await.unwrap_err();
        assert!(matches!(err, StudioError::Download(_)));
        assert_eq!(poller.progress().state, JobState::Failed);

        let final_message = poller.progress().message;
        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(poller.progress().message, final_message);
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_rotate_and_stop_on_terminal_state() {
        // 6 polls = 60s, enough for four rotations at 15s
        let service = ScriptedVideo::finishing_after(6);
        let poller = JobPoller::new(&service, PollSettings::default());
        let mut rx = poller.subscribe();

        let collector = tokio::spawn(async move {
            let mut seen = Vec::new();
            while rx.changed().await.is_ok() {
                let message = rx.borrow_and_update().message.clone();
                if seen.last() != Some(&message) {
                    seen.push(message);
                }
            }
            seen
        });

        poller.run(request()).await.unwrap();
        let final_message = poller.progress().message;

        // Rotation is stopped: time passing changes nothing
        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(poller.progress().message, final_message);

        drop(poller);
        let seen = collector.await.unwrap();
        assert!(seen.contains(&ROTATING_MESSAGES[1].to_string()));
        assert!(seen.contains(&ROTATING_MESSAGES[2].to_string()));
    }
}
