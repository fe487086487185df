/// Shared data structures for the application state
///
/// These structs represent the creation history as it is stored in the
/// library slot and shown on the history screen. Field names serialize in
/// camelCase so the stored JSON stays compatible with earlier releases.

use serde::{Deserialize, Serialize};

/// What produced a history entry
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryKind {
    /// A garment placed onto the user's own photo
    #[serde(rename = "try-on")]
    SingleSubjectComposite,
    /// A model generated from a description plus garment photos
    #[serde(rename = "ai-model")]
    GeneratedModel,
}

impl HistoryKind {
    pub fn label(&self) -> &'static str {
        match self {
            HistoryKind::SingleSubjectComposite => "try-on",
            HistoryKind::GeneratedModel => "ai-model",
        }
    }
}

/// One persisted past creation
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Epoch millis followed by a random base-36 suffix
    pub id: String,
    #[serde(rename = "type")]
    pub kind: HistoryKind,
    #[serde(rename = "timestamp")]
    pub created_at_epoch_ms: i64,
    /// Result as a data URI
    #[serde(rename = "result")]
    pub result_image: String,
    #[serde(rename = "prompt", default, skip_serializing_if = "Option::is_none")]
    pub prompt_text: Option<String>,
    /// Garment photos used for a generated model, as data URIs
    #[serde(rename = "clothingImages", default, skip_serializing_if = "Option::is_none")]
    pub source_images: Option<Vec<String>>,
}

/// An entry before the ledger assigns its id and timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct NewHistoryEntry {
    pub kind: HistoryKind,
    pub result_image: String,
    pub prompt_text: Option<String>,
    pub source_images: Option<Vec<String>>,
}

/// Fields to merge into an existing entry; `None` leaves a field alone
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryPatch {
    pub kind: Option<HistoryKind>,
    pub result_image: Option<String>,
    pub prompt_text: Option<String>,
    pub source_images: Option<Vec<String>>,
}

impl HistoryPatch {
    /// Patch that only replaces the result image
    pub fn result(result_image: impl Into<String>) -> Self {
        Self {
            result_image: Some(result_image.into()),
            ..Self::default()
        }
    }

    pub(crate) fn apply_to(self, entry: &mut HistoryEntry) {
        if let Some(kind) = self.kind {
            entry.kind = kind;
        }
        if let Some(result) = self.result_image {
            entry.result_image = result;
        }
        if let Some(prompt) = self.prompt_text {
            entry.prompt_text = Some(prompt);
        }
        if let Some(sources) = self.source_images {
            entry.source_images = Some(sources);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_format_field_names() {
        let entry = HistoryEntry {
            id: "1700000000000abc".into(),
            kind: HistoryKind::SingleSubjectComposite,
            created_at_epoch_ms: 1_700_000_000_000,
            result_image: "data:image/png;base64,AAAA".into(),
            prompt_text: None,
            source_images: None,
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "try-on");
        assert_eq!(json["timestamp"], 1_700_000_000_000i64);
        assert_eq!(json["result"], "data:image/png;base64,AAAA");
        assert!(json.get("prompt").is_none());
    }

    #[test]
    fn test_reads_stored_ai_model_entry() {
        let json = r#"{"id":"x","type":"ai-model","timestamp":5,"result":"data:,","prompt":"red dress","clothingImages":["data:image/png;base64,AA"]}"#;
        let entry: HistoryEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.kind, HistoryKind::GeneratedModel);
        assert_eq!(entry.prompt_text.as_deref(), Some("red dress"));
        assert_eq!(entry.source_images.unwrap().len(), 1);
    }

    #[test]
    fn test_patch_only_touches_given_fields() {
        let mut entry = HistoryEntry {
            id: "x".into(),
            kind: HistoryKind::GeneratedModel,
            created_at_epoch_ms: 1,
            result_image: "old".into(),
            prompt_text: Some("keep me".into()),
            source_images: None,
        };
        HistoryPatch::result("new").apply_to(&mut entry);
        assert_eq!(entry.result_image, "new");
        assert_eq!(entry.prompt_text.as_deref(), Some("keep me"));
        assert_eq!(entry.kind, HistoryKind::GeneratedModel);
    }
}
