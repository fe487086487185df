/// Video job types and response probing.
///
/// The video service does not expose the finished video's URI at one fixed
/// place. [`VIDEO_URI_PROBES`] lists the locations we know about, tried in
/// order; the first string found wins. The order is a best guess, not a
/// contract.

use serde_json::Value;

use crate::imaging::ImageRecord;

/// Submit payload for a video job
#[derive(Debug, Clone, PartialEq)]
pub struct VideoRequest {
    pub prompt: String,
    pub image: ImageRecord,
}

/// Snapshot of a long-running operation
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub name: String,
    pub done: bool,
    pub error: Option<Value>,
    /// The full operation document, for probing
    pub raw: Value,
}

impl Operation {
    /// Build a snapshot from the JSON document the service returned
    pub fn from_json(raw: Value) -> Self {
        let name = raw.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
        let done = raw.get("done").and_then(Value::as_bool).unwrap_or(false);
        let error = raw.get("error").filter(|e| !e.is_null()).cloned();
        Self { name, done, error, raw }
    }
}

/// Result of an artifact fetch
#[derive(Debug, Clone, PartialEq)]
pub enum Fetch {
    Body { bytes: Vec<u8>, mime_type: String },
    /// The server answered with a non-success status
    Rejected { status: u16 },
}

/// Named JSON pointers into the operation document, in probe order
pub const VIDEO_URI_PROBES: &[(&str, &str)] = &[
    ("generated_video_uri", "/response/generatedVideos/0/video/uri"),
    ("rest_generated_sample", "/response/generateVideoResponse/generatedSamples/0/video/uri"),
    ("videos_uri", "/response/videos/0/uri"),
    ("results_video_uri", "/response/results/0/video/uri"),
    ("output_video_uri", "/response/output/video/uri"),
    ("result_videos_uri", "/result/videos/0/uri"),
    ("generated_download_url", "/response/generatedVideos/0/downloadUrl"),
    ("generated_url", "/response/generatedVideos/0/url"),
    ("generated_video_url", "/response/generatedVideos/0/videoUrl"),
    ("generated_uri", "/response/generatedVideos/0/uri"),
];

/// Find the video link in a finished operation
pub fn probe_video_uri(operation: &Value) -> Option<String> {
    VIDEO_URI_PROBES.iter().find_map(|(name, pointer)| {
        let uri = operation
            .pointer(pointer)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())?;
        tracing::debug!(probe = name, "found video link");
        Some(uri.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_probe_sdk_shape() {
        let op = json!({"response": {"generatedVideos": [{"video": {"uri": "https://v/1"}}]}});
        assert_eq!(probe_video_uri(&op).as_deref(), Some("https://v/1"));
    }

    #[test]
    fn test_probe_rest_shape() {
        let op = json!({"response": {"generateVideoResponse": {"generatedSamples": [{"video": {"uri": "https://v/rest"}}]}}});
        assert_eq!(probe_video_uri(&op).as_deref(), Some("https://v/rest"));
    }

    #[test]
    fn test_probe_order_prefers_earlier_location() {
        let op = json!({
            "response": {"videos": [{"uri": "second"}], "output": {"video": {"uri": "third"}}},
            "result": {"videos": [{"uri": "fourth"}]}
        });
        assert_eq!(probe_video_uri(&op).as_deref(), Some("second"));
    }

    #[test]
    fn test_probe_flat_fallbacks() {
        let op = json!({"response": {"generatedVideos": [{"videoUrl": "flat"}]}});
        assert_eq!(probe_video_uri(&op).as_deref(), Some("flat"));
    }

    #[test]
    fn test_probe_none_when_absent_or_empty() {
        assert_eq!(probe_video_uri(&json!({"response": {}})), None);
        assert_eq!(probe_video_uri(&json!({"result": {"videos": [{"uri": ""}]}})), None);
    }

    #[test]
    fn test_operation_from_json() {
        let op = Operation::from_json(json!({"name": "operations/1", "done": true, "error": {"code": 3}}));
        assert_eq!(op.name, "operations/1");
        assert!(op.done);
        assert!(op.error.is_some());

        let pending = Operation::from_json(json!({"name": "operations/2", "error": null}));
        assert!(!pending.done);
        assert!(pending.error.is_none());
    }
}
