/// Application state container
///
/// All screen state lives in one [`AppState`] value. Handlers never mutate
/// it in place; they send an [`Action`] to [`AppState::reduce`], which
/// returns the next snapshot for the render step.

use super::data::{HistoryEntry, HistoryKind};
use super::edit::EditSession;
use crate::imaging::ImageRecord;
use crate::service::VideoArtifact;

/// Most garment photos a generated model may use
pub const MAX_GARMENT_IMAGES: usize = 5;

/// Loading text shown when nothing more specific applies
pub const DEFAULT_LOADING_MESSAGE: &str = "Creating magic...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Home,
    TryOn,
    AiModel,
    Editor,
    VideoGenerator,
    History,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppState {
    pub view: View,
    pub is_loading: bool,
    pub error: Option<String>,
    pub loading_message: String,
    /// Try-on subject photo, already normalized
    pub user_image: Option<ImageRecord>,
    /// Try-on garment photo, already normalized
    pub garment_image: Option<ImageRecord>,
    /// Generated-model garment photos, already normalized
    pub garment_images: Vec<ImageRecord>,
    pub prompt: String,
    pub video_prompt: String,
    pub edit_prompt: String,
    /// Result as a data URI
    pub result_image: Option<String>,
    pub result_video: Option<VideoArtifact>,
    pub session: Option<EditSession>,
    pub history: Vec<HistoryEntry>,
    pub active_history_tab: HistoryKind,
    /// History entry that edits should update
    pub current_history_id: Option<String>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            view: View::Home,
            is_loading: false,
            error: None,
            loading_message: DEFAULT_LOADING_MESSAGE.to_string(),
            user_image: None,
            garment_image: None,
            garment_images: Vec::new(),
            prompt: String::new(),
            video_prompt: String::new(),
            edit_prompt: String::new(),
            result_image: None,
            result_video: None,
            session: None,
            history: Vec::new(),
            active_history_tab: HistoryKind::SingleSubjectComposite,
            current_history_id: None,
        }
    }
}

/// Every state transition the studio performs
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Navigate(View),
    SetPrompt(String),
    SetEditPrompt(String),
    SetVideoPrompt(String),
    UserImageLoaded(ImageRecord),
    GarmentImageLoaded(ImageRecord),
    GarmentImagesAdded(Vec<ImageRecord>),
    RemoveGarmentImage(usize),
    /// Start a long action; ignored while another one is running
    BeginLoading { message: String, clears_result: bool },
    LoadingMessage(String),
    /// A generation finished; starts a fresh edit lineage
    ResultReady { image: String, history_id: Option<String> },
    EditApplied(String),
    Undo,
    Redo,
    VideoReady(VideoArtifact),
    /// Abort the running action with a user-facing message
    Failed(String),
    ClearError,
    HistoryChanged(Vec<HistoryEntry>),
    SelectHistoryTab(HistoryKind),
    /// Reopen a generated model in the editor
    OpenHistoryEntry(HistoryEntry),
    ResetAiModel,
}

impl AppState {
    /// Produce the next state. `self` is left untouched.
    pub fn reduce(&self, action: Action) -> AppState {
        let mut next = self.clone();

        match action {
            Action::Navigate(view) => {
                next.view = view;
                next.error = None;
                match view {
                    View::Editor => {
                        // Every visit starts with empty undo and redo stacks
                        next.session = next.result_image.clone().map(EditSession::new);
                        next.edit_prompt.clear();
                    }
                    View::TryOn => {
                        next.user_image = None;
                        next.garment_image = None;
                        next.result_image = None;
                        next.result_video = None;
                        next.prompt.clear();
                    }
                    View::VideoGenerator => {
                        next.result_video = None;
                        next.video_prompt.clear();
                    }
                    _ => {}
                }
            }
            Action::SetPrompt(text) => next.prompt = text,
            Action::SetEditPrompt(text) => next.edit_prompt = text,
            Action::SetVideoPrompt(text) => next.video_prompt = text,
            Action::UserImageLoaded(image) => {
                finish_loading(&mut next);
                next.user_image = Some(image);
                next.error = None;
            }
            Action::GarmentImageLoaded(image) => {
                finish_loading(&mut next);
                next.garment_image = Some(image);
                next.error = None;
            }
            Action::GarmentImagesAdded(images) => {
                finish_loading(&mut next);
                if next.garment_images.len() + images.len() > MAX_GARMENT_IMAGES {
                    next.error = Some(too_many_garments_message());
                } else {
                    next.garment_images.extend(images);
                    next.error = None;
                }
            }
            Action::RemoveGarmentImage(index) => {
                if index < next.garment_images.len() {
                    next.garment_images.remove(index);
                }
            }
            Action::BeginLoading { message, clears_result } => {
                if self.is_loading {
                    return next;
                }
                next.is_loading = true;
                next.error = None;
                next.loading_message = message;
                if clears_result {
                    next.result_image = None;
                    next.result_video = None;
                }
            }
            Action::LoadingMessage(message) => next.loading_message = message,
            Action::ResultReady { image, history_id } => {
                finish_loading(&mut next);
                next.session = None;
                next.result_image = Some(image);
                next.current_history_id = history_id;
            }
            Action::EditApplied(image) => {
                finish_loading(&mut next);
                let session = next
                    .session
                    .get_or_insert_with(|| EditSession::new(self.result_image.clone().unwrap_or_default()));
                session.apply_edit(image.clone());
                next.result_image = Some(image);
                next.edit_prompt.clear();
            }
            Action::Undo => {
                if let Some(session) = next.session.as_mut() {
                    if session.undo() {
                        next.result_image = Some(session.current().to_string());
                        next.error = None;
                    }
                }
            }
            Action::Redo => {
                if let Some(session) = next.session.as_mut() {
                    if session.redo() {
                        next.result_image = Some(session.current().to_string());
                        next.error = None;
                    }
                }
            }
            Action::VideoReady(video) => {
                finish_loading(&mut next);
                next.result_video = Some(video);
            }
            Action::Failed(message) => {
                finish_loading(&mut next);
                next.error = Some(message);
            }
            Action::ClearError => next.error = None,
            Action::HistoryChanged(entries) => next.history = entries,
            Action::SelectHistoryTab(kind) => next.active_history_tab = kind,
            Action::OpenHistoryEntry(entry) => {
                next.view = View::Editor;
                next.error = None;
                next.garment_images = entry
                    .source_images
                    .iter()
                    .flatten()
                    .filter_map(|uri| ImageRecord::from_data_uri(uri).ok())
                    .collect();
                next.prompt = entry.prompt_text.clone().unwrap_or_default();
                next.edit_prompt.clear();
                next.session = Some(EditSession::new(entry.result_image.clone()));
                next.result_image = Some(entry.result_image);
                next.current_history_id = Some(entry.id);
            }
            Action::ResetAiModel => {
                next.error = None;
                next.garment_images.clear();
                next.prompt.clear();
                next.video_prompt.clear();
                next.edit_prompt.clear();
                next.result_image = None;
                next.result_video = None;
                next.session = None;
                next.current_history_id = None;
            }
        }

        next
    }

    /// Entries shown under the active history tab
    pub fn visible_history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter().filter(|e| e.kind == self.active_history_tab)
    }
}

pub(crate) fn too_many_garments_message() -> String {
    format!("You can add at most {MAX_GARMENT_IMAGES} images.")
}

fn finish_loading(state: &mut AppState) {
    state.is_loading = false;
    state.loading_message = DEFAULT_LOADING_MESSAGE.to_string();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(tag: &str) -> ImageRecord {
        ImageRecord {
            base64_payload: tag.to_string(),
            mime_type: "image/png".into(),
        }
    }

    fn uri(tag: &str) -> String {
        format!("data:image/png;base64,{tag}")
    }

    fn loading() -> Action {
        Action::BeginLoading {
            message: "working".into(),
            clears_result: true,
        }
    }

    #[test]
    fn test_reduce_returns_new_snapshot() {
        let state = AppState::default();
        let next = state.reduce(Action::Navigate(View::History));
        assert_eq!(state.view, View::Home);
        assert_eq!(next.view, View::History);
    }

    #[test]
    fn test_begin_loading_is_ignored_while_busy() {
        let busy = AppState::default().reduce(loading());
        assert!(busy.is_loading);

        let again = busy.reduce(Action::BeginLoading {
            message: "second".into(),
            clears_result: false,
        });
        assert_eq!(again.loading_message, "working");
    }

    #[test]
    fn test_failure_clears_loading_and_keeps_result_unset() {
        let state = AppState {
            result_image: Some(uri("old")),
            ..AppState::default()
        };
        let failed = state.reduce(loading()).reduce(Action::Failed("try again".into()));
        assert!(!failed.is_loading);
        assert_eq!(failed.error.as_deref(), Some("try again"));
        assert_eq!(failed.result_image, None);
        assert_eq!(failed.loading_message, DEFAULT_LOADING_MESSAGE);
    }

    #[test]
    fn test_garment_limit() {
        let four = AppState::default().reduce(Action::GarmentImagesAdded(vec![image("a"); 4]));
        assert_eq!(four.garment_images.len(), 4);

        let rejected = four.reduce(Action::GarmentImagesAdded(vec![image("b"); 2]));
        assert_eq!(rejected.garment_images.len(), 4);
        assert!(rejected.error.is_some());

        let five = four.reduce(Action::GarmentImagesAdded(vec![image("c")]));
        assert_eq!(five.garment_images.len(), 5);
        let four_again = five.reduce(Action::RemoveGarmentImage(0));
        assert_eq!(four_again.garment_images[0], image("a"));
        assert_eq!(four_again.garment_images.len(), 4);
    }

    #[test]
    fn test_edits_undo_and_redo_drive_result() {
        let state = AppState::default()
            .reduce(Action::ResultReady { image: uri("v0"), history_id: Some("h1".into()) })
            .reduce(Action::Navigate(View::Editor))
            .reduce(Action::EditApplied(uri("v1")))
            .reduce(Action::EditApplied(uri("v2")));
        assert_eq!(state.result_image, Some(uri("v2")));

        let undone = state.reduce(Action::Undo);
        assert_eq!(undone.result_image, Some(uri("v1")));

        let redone = undone.reduce(Action::Redo);
        assert_eq!(redone, state);
    }

    #[test]
    fn test_entering_editor_resets_stacks() {
        let edited = AppState::default()
            .reduce(Action::ResultReady { image: uri("v0"), history_id: None })
            .reduce(Action::Navigate(View::Editor))
            .reduce(Action::EditApplied(uri("v1")));
        assert!(edited.session.as_ref().unwrap().can_undo());

        let reentered = edited
            .reduce(Action::Navigate(View::VideoGenerator))
            .reduce(Action::Navigate(View::Editor));
        let session = reentered.session.unwrap();
        assert_eq!(session.current(), uri("v1"));
        assert!(!session.can_undo());
        assert!(!session.can_redo());
    }

    #[test]
    fn test_undo_without_session_is_no_op() {
        let state = AppState::default();
        assert_eq!(state.reduce(Action::Undo), state);
    }

    #[test]
    fn test_open_history_entry_restores_editor() {
        let entry = HistoryEntry {
            id: "h9".into(),
            kind: HistoryKind::GeneratedModel,
            created_at_epoch_ms: 1,
            result_image: uri("r"),
            prompt_text: Some("red coat".into()),
            source_images: Some(vec![uri("g1"), "garbage".into()]),
        };
        let state = AppState::default().reduce(Action::OpenHistoryEntry(entry));

        assert_eq!(state.view, View::Editor);
        assert_eq!(state.current_history_id.as_deref(), Some("h9"));
        assert_eq!(state.prompt, "red coat");
        assert_eq!(state.garment_images, vec![image("g1")]);
        let session = state.session.unwrap();
        assert_eq!(session.current(), uri("r"));
        assert!(!session.can_undo());
    }

    #[test]
    fn test_visible_history_follows_tab() {
        let entry = |id: &str, kind| HistoryEntry {
            id: id.into(),
            kind,
            created_at_epoch_ms: 1,
            result_image: String::new(),
            prompt_text: None,
            source_images: None,
        };
        let state = AppState::default()
            .reduce(Action::HistoryChanged(vec![
                entry("a", HistoryKind::SingleSubjectComposite),
                entry("b", HistoryKind::GeneratedModel),
            ]))
            .reduce(Action::SelectHistoryTab(HistoryKind::GeneratedModel));
        let ids: Vec<_> = state.visible_history().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["b"]);
    }
}
