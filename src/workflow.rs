/// User-facing workflows.
///
/// [`Studio`] ties the pieces together: it owns the [`AppState`], the
/// history ledger and the service handles, runs one action at a time and
/// renders after every state transition.

use crate::error::{StudioError, StudioResult};
use crate::imaging::crop::{crop_for_export, crop_history_export};
use crate::imaging::normalize::normalize_upload;
use crate::imaging::{AspectRatio, ExportedImage, ImageRecord};
use crate::service::{GenerationRequest, ImageGenerator, JobPoller, PollSettings, VideoJobService, VideoRequest};
use crate::state::app::{too_many_garments_message, Action, AppState, View, MAX_GARMENT_IMAGES};
use crate::state::data::{HistoryKind, HistoryPatch, NewHistoryEntry};
use crate::state::history::HistoryLedger;
use crate::state::library::SlotStore;

/// Aspect ratio requested for every generated image
pub const RESULT_ASPECT_RATIO: &str = "1:1";

const GARMENT_PRESERVATION: &str = "IMPORTANT: Do not add, remove, or modify any clothing items, logos, text, \
patterns, or details on the clothing. Keep all garments exactly as shown in the provided images. Do not add \
brand logos, text overlays, or any decorative elements that are not already present. Preserve the original \
design, colors, and details of each clothing item precisely.";

const TRY_ON_INSTRUCTION: &str = "Take the clothing from the second image and realistically place it onto the \
person in the first image. The final image should only show the person wearing the new clothing in the \
original setting.";

const MODEL_SYSTEM_INSTRUCTION: &str = "You are an AI assistant for fashion design. Create a photorealistic \
fashion model from the user's description, wearing the clothing shown in the provided images. Focus only on \
generating the model as described. The clothing and accessories from the images must stay exactly the same, \
with no changes to details, logos, textures or colors. Do not add or remove anything from the garments.";

const EDIT_PRESERVATION: &str = "IMPORTANT: When making edits, do not add, remove, or modify any existing \
clothing items, logos, text, patterns, or details on the clothing. Preserve all garments exactly as they are. \
Only modify what is specifically requested in the prompt.";

/// Appended to every video prompt; users cannot override it
pub const VIDEO_PRESERVATION: &str = "Keep clothing exactly as shown in image. No changes to garments.";

type Renderer = Box<dyn FnMut(&AppState) + Send>;

/// Build the full video prompt from the user's short instruction
pub fn video_prompt(user_prompt: &str) -> String {
    format!("{}. {}", user_prompt.trim(), VIDEO_PRESERVATION)
}

pub struct Studio<G, V, S>
where
    G: ImageGenerator,
    V: VideoJobService,
    S: SlotStore,
{
    state: AppState,
    ledger: HistoryLedger<S>,
    generator: G,
    video: V,
    poll_settings: PollSettings,
    renderer: Option<Renderer>,
}

/// Apply one transition and render it
fn apply(state: &mut AppState, renderer: &mut Option<Renderer>, action: Action) {
    *state = state.reduce(action);
    if let Some(render) = renderer.as_mut() {
        render(state);
    }
}

impl<G, V, S> Studio<G, V, S>
where
    G: ImageGenerator,
    V: VideoJobService,
    S: SlotStore,
{
    pub fn new(generator: G, video: V, ledger: HistoryLedger<S>, poll_settings: PollSettings) -> Self {
        let state = AppState::default().reduce(Action::HistoryChanged(ledger.entries().to_vec()));
        Self {
            state,
            ledger,
            generator,
            video,
            poll_settings,
            renderer: None,
        }
    }

    /// Called with the new state after every transition
    pub fn set_renderer(&mut self, renderer: impl FnMut(&AppState) + Send + 'static) {
        self.renderer = Some(Box::new(renderer));
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn ledger(&self) -> &HistoryLedger<S> {
        &self.ledger
    }

    pub fn dispatch(&mut self, action: Action) {
        apply(&mut self.state, &mut self.renderer, action);
    }

    fn sync_history(&mut self) {
        let entries = self.ledger.entries().to_vec();
        self.dispatch(Action::HistoryChanged(entries));
    }

    /// Surface `err` to the user and hand it back to the caller
    fn fail<T>(&mut self, err: StudioError) -> StudioResult<T> {
        let message = err.user_message();
        self.dispatch(Action::Failed(message));
        Err(err)
    }

    /// Block validation failures before anything is sent
    fn reject<T>(&mut self, message: impl Into<String>) -> StudioResult<T> {
        self.fail(StudioError::Validation(message.into()))
    }

    fn ensure_idle(&self) -> StudioResult<()> {
        if self.state.is_loading {
            return Err(StudioError::Validation("Another operation is still running.".into()));
        }
        Ok(())
    }

    // -- Uploads --------------------------------------------------------------

    fn begin_upload(&mut self, message: &str) -> StudioResult<()> {
        self.ensure_idle()?;
        self.dispatch(Action::BeginLoading {
            message: message.into(),
            clears_result: false,
        });
        Ok(())
    }

    async fn normalize(&mut self, bytes: Vec<u8>, mime: Option<String>) -> StudioResult<ImageRecord> {
        match normalize_upload(bytes, mime).await {
            Ok(image) => Ok(image),
            Err(e) => {
                tracing::error!("error processing image: {e}");
                self.reject("Could not process the image. Please try a different format.")
            }
        }
    }

    /// Normalize and set the try-on subject photo
    pub async fn load_user_image(&mut self, bytes: Vec<u8>, mime: Option<String>) -> StudioResult<()> {
        self.begin_upload("Smart-cropping the image to a square...")?;
        let image = self.normalize(bytes, mime).await?;
        self.dispatch(Action::UserImageLoaded(image));
        Ok(())
    }

    /// Normalize and set the try-on garment photo
    pub async fn load_garment_image(&mut self, bytes: Vec<u8>, mime: Option<String>) -> StudioResult<()> {
        self.begin_upload("Smart-cropping the image to a square...")?;
        let image = self.normalize(bytes, mime).await?;
        self.dispatch(Action::GarmentImageLoaded(image));
        Ok(())
    }

    /// Normalize and append generated-model garment photos (at most five in total)
    pub async fn add_garment_images(&mut self, files: Vec<(Vec<u8>, Option<String>)>) -> StudioResult<()> {
        if self.state.garment_images.len() + files.len() > MAX_GARMENT_IMAGES {
            return self.reject(too_many_garments_message());
        }

        self.begin_upload("Smart-cropping images to squares...")?;
        let mut images = Vec::with_capacity(files.len());
        for (bytes, mime) in files {
            images.push(self.normalize(bytes, mime).await?);
        }

        self.dispatch(Action::GarmentImagesAdded(images));
        Ok(())
    }

    // -- Generation -----------------------------------------------------------

    /// Place the garment photo onto the subject photo
    pub async fn generate_try_on(&mut self) -> StudioResult<String> {
        self.ensure_idle()?;
        let (Some(user), Some(garment)) = (self.state.user_image.clone(), self.state.garment_image.clone()) else {
            return self.reject("Please select both images.");
        };

        self.dispatch(Action::BeginLoading {
            message: "Masterbot is analyzing the photo...".into(),
            clears_result: true,
        });

        let request = GenerationRequest {
            instruction: format!("{TRY_ON_INSTRUCTION} {GARMENT_PRESERVATION}"),
            system_instruction: None,
            images: vec![user, garment],
            aspect_ratio: RESULT_ASPECT_RATIO.into(),
        };

        let image = match self.generator.generate_image(request).await {
            Ok(image) => image,
            Err(e) => return self.fail(e),
        };

        let result = image.to_data_uri();
        self.ledger.add(NewHistoryEntry {
            kind: HistoryKind::SingleSubjectComposite,
            result_image: result.clone(),
            prompt_text: None,
            source_images: None,
        });
        self.sync_history();
        self.dispatch(Action::ResultReady {
            image: result.clone(),
            history_id: None,
        });

        tracing::info!("try-on complete");
        Ok(result)
    }

    /// Generate a model wearing the garment photos, described by the prompt
    pub async fn generate_model(&mut self) -> StudioResult<String> {
        self.ensure_idle()?;
        if self.state.garment_images.is_empty() || self.state.prompt.trim().is_empty() {
            return self.reject("Please select a clothing image and enter a description.");
        }

        self.dispatch(Action::BeginLoading {
            message: "Masterbot is creating the model...".into(),
            clears_result: true,
        });

        let prompt = self.state.prompt.clone();
        let garments = self.state.garment_images.clone();
        let request = GenerationRequest {
            instruction: prompt.clone(),
            system_instruction: Some(MODEL_SYSTEM_INSTRUCTION.into()),
            images: garments.clone(),
            aspect_ratio: RESULT_ASPECT_RATIO.into(),
        };

        let image = match self.generator.generate_image(request).await {
            Ok(image) => image,
            Err(e) => return self.fail(e),
        };

        let result = image.to_data_uri();
        let entry = self.ledger.add(NewHistoryEntry {
            kind: HistoryKind::GeneratedModel,
            result_image: result.clone(),
            prompt_text: Some(prompt),
            source_images: Some(garments.iter().map(ImageRecord::to_data_uri).collect()),
        });
        self.sync_history();
        self.dispatch(Action::ResultReady {
            image: result.clone(),
            history_id: Some(entry.id),
        });

        tracing::info!("model generation complete");
        Ok(result)
    }

    // -- Editing --------------------------------------------------------------

    /// Open the current result in the editor
    pub fn open_editor(&mut self) -> StudioResult<()> {
        if self.state.result_image.is_none() {
            return self.reject("There is no image to edit.");
        }
        self.dispatch(Action::Navigate(View::Editor));
        Ok(())
    }

    /// Reopen a generated model from history in the editor
    pub fn open_history_entry(&mut self, id: &str) -> StudioResult<()> {
        let entry = match self.ledger.get(id) {
            Some(entry) if entry.kind == HistoryKind::GeneratedModel && entry.source_images.is_some() => entry.clone(),
            Some(_) => return self.reject("Only generated models can be reopened for editing."),
            None => return self.reject(format!("No history entry with id {id}.")),
        };
        self.dispatch(Action::OpenHistoryEntry(entry));
        Ok(())
    }

    /// Apply the edit prompt to the current image
    pub async fn edit_image(&mut self) -> StudioResult<String> {
        self.ensure_idle()?;
        let current = match (&self.state.result_image, self.state.edit_prompt.trim().is_empty()) {
            (Some(current), false) => current.clone(),
            _ => return self.reject("Please describe the edit."),
        };
        let source = match ImageRecord::from_data_uri(&current) {
            Ok(source) => source,
            Err(e) => return self.fail(e),
        };

        self.dispatch(Action::BeginLoading {
            message: "Masterbot is editing the image...".into(),
            clears_result: false,
        });

        let request = GenerationRequest {
            instruction: format!("{} {EDIT_PRESERVATION}", self.state.edit_prompt.trim()),
            system_instruction: None,
            images: vec![source],
            aspect_ratio: RESULT_ASPECT_RATIO.into(),
        };

        let image = match self.generator.generate_image(request).await {
            Ok(image) => image,
            Err(e) => return self.fail(e),
        };

        let result = image.to_data_uri();
        if let Some(id) = self.state.current_history_id.clone() {
            self.ledger.update(&id, HistoryPatch::result(result.clone()));
            self.sync_history();
        }
        self.dispatch(Action::EditApplied(result.clone()));
        Ok(result)
    }

    pub fn undo(&mut self) {
        self.dispatch(Action::Undo);
    }

    pub fn redo(&mut self) {
        self.dispatch(Action::Redo);
    }

    // -- Video ----------------------------------------------------------------

    /// Animate the current result. Rotating status lines are rendered as they arrive.
    pub async fn generate_video(&mut self) -> StudioResult<()> {
        self.ensure_idle()?;
        let current = match (&self.state.result_image, self.state.video_prompt.trim().is_empty()) {
            (Some(current), false) => current.clone(),
            _ => return self.reject("Please describe the animation."),
        };
        let image = match ImageRecord::from_data_uri(&current) {
            Ok(image) => image,
            Err(e) => return self.fail(e),
        };

        let request = VideoRequest {
            prompt: video_prompt(&self.state.video_prompt),
            image,
        };

        let poller = JobPoller::new(&self.video, self.poll_settings);
        let mut rx = poller.subscribe();
        apply(
            &mut self.state,
            &mut self.renderer,
            Action::BeginLoading {
                message: poller.progress().message,
                clears_result: false,
            },
        );

        let run = poller.run(request);
        tokio::pin!(run);

        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break (&mut run).await;
                    }
                    let message = rx.borrow_and_update().message.clone();
                    if message != self.state.loading_message {
                        apply(&mut self.state, &mut self.renderer, Action::LoadingMessage(message));
                    }
                }
            }
        };

        match result {
            Ok(video) => {
                apply(&mut self.state, &mut self.renderer, Action::VideoReady(video));
                Ok(())
            }
            Err(e) => {
                let message = e.user_message();
                apply(&mut self.state, &mut self.renderer, Action::Failed(message));
                Err(e)
            }
        }
    }

    // -- Export & history -----------------------------------------------------

    /// Crop the current result for download as `{base}-{w}x{h}.png`
    pub fn export_result(&mut self, aspect: AspectRatio, base: &str) -> StudioResult<ExportedImage> {
        let Some(current) = self.state.result_image.clone() else {
            return self.reject("There is no image to export.");
        };
        let exported = ImageRecord::from_data_uri(&current).and_then(|source| crop_for_export(&source, aspect, base));
        match exported {
            Ok(exported) => Ok(exported),
            Err(e) => self.fail(e),
        }
    }

    /// The current result exactly as generated
    pub fn export_original(&mut self, base: &str) -> StudioResult<ExportedImage> {
        let Some(current) = self.state.result_image.clone() else {
            return self.reject("There is no image to export.");
        };
        match ImageRecord::from_data_uri(&current).and_then(|r| r.bytes()) {
            Ok(bytes) => Ok(ExportedImage {
                file_name: format!("{base}-original.png"),
                bytes,
            }),
            Err(e) => self.fail(e),
        }
    }

    /// Crop a history entry for download, capped at 2048 px wide
    pub fn export_history_entry(&mut self, id: &str, aspect: AspectRatio) -> StudioResult<ExportedImage> {
        let Some(entry) = self.ledger.get(id).cloned() else {
            return self.reject(format!("No history entry with id {id}."));
        };
        let exported = ImageRecord::from_data_uri(&entry.result_image)
            .and_then(|source| crop_history_export(&source, aspect, &entry.id));
        match exported {
            Ok(exported) => Ok(exported),
            Err(e) => self.fail(e),
        }
    }

    pub fn delete_history_entry(&mut self, id: &str) {
        self.ledger.remove(id);
        self.sync_history();
    }
}
