use std::path::Path;

use anyhow::Result;
use roomshift_contracts::aspect::AspectRatio;
use roomshift_contracts::assets::ImageAsset;
use roomshift_contracts::events::{EventPayload, EventWriter, SessionEvent};
use roomshift_contracts::export::ExportArtifact;
use roomshift_contracts::history::{HistoryEntry, VersionHistory};
use serde_json::json;

use crate::estimator::estimate_aspect_ratio;
use crate::provider::ImageGenerator;
use crate::redesign::{request_redesign, RedesignOutput, DEFAULT_PROMPT, REFINE_PRESETS};
use crate::{error_chain_text, map_object};

const GENERATION_NO_IMAGE: &str = "No image was generated. Try making the prompt clearer.";
const GENERATION_FAILED: &str = "Something went wrong while generating the image. Please try again.";
const REFINEMENT_NO_CHANGES: &str = "The AI returned no changes. Try a different prompt.";
const REFINEMENT_FAILED: &str = "Failed to refine the design. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Generation,
    Refinement,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Refinement => "refinement",
        }
    }

    fn started_event(self) -> SessionEvent {
        match self {
            Self::Generation => SessionEvent::GenerationStarted,
            Self::Refinement => SessionEvent::RefinementStarted,
        }
    }
}

/// A request accepted by the session, detached from it so the external call
/// can run anywhere (including another thread). Hand it back to
/// [`Session::complete`] with the result.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    id: u64,
    kind: RequestKind,
    model: String,
    source: ImageAsset,
    prompt: String,
    aspect_ratio: AspectRatio,
    parent_id: Option<String>,
    inherited_suggestion: Option<String>,
}

impl PendingRequest {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// The base image this request edits: the original upload for a
    /// generation, the selected version for a refinement.
    pub fn source(&self) -> &ImageAsset {
        &self.source
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn aspect_ratio(&self) -> AspectRatio {
        self.aspect_ratio
    }

    pub fn run(&self, generator: &dyn ImageGenerator) -> Result<RedesignOutput> {
        request_redesign(
            generator,
            &self.model,
            &self.source,
            &self.prompt,
            self.aspect_ratio,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A guard rejected the operation; nothing changed and nothing was sent.
    Skipped,
    /// A new version was appended and selected.
    Appended { entry_id: String },
    /// The call succeeded but returned no image.
    Empty,
    /// Transport or protocol failure.
    Failed,
    /// The request was superseded (newer request, reset or new image) and
    /// its response was dropped.
    Discarded,
}

/// Upload → generate → refine → compare state for one user session.
///
/// Invariants:
/// - `selected_history_id`, when set, names an entry in `history`
/// - the displayed generated image is always the selected entry's image
/// - error and suggestion are cleared when a request starts
/// - only the most recently issued request may complete
#[derive(Debug)]
pub struct Session {
    status: SessionStatus,
    original_image: Option<ImageAsset>,
    current_prompt: String,
    refine_prompt: String,
    history: VersionHistory,
    selected_history_id: Option<String>,
    error_message: Option<String>,
    suggestion: Option<String>,
    refining: bool,
    model: String,
    last_request_id: u64,
    in_flight: Option<(u64, RequestKind)>,
    last_diagnostic: Option<String>,
    events: Option<EventWriter>,
}

impl Session {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            status: SessionStatus::Idle,
            original_image: None,
            current_prompt: DEFAULT_PROMPT.to_string(),
            refine_prompt: String::new(),
            history: VersionHistory::new(),
            selected_history_id: None,
            error_message: None,
            suggestion: None,
            refining: false,
            model: model.into(),
            last_request_id: 0,
            in_flight: None,
            last_diagnostic: None,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self.emit(
            SessionEvent::SessionStarted,
            map_object(json!({ "model": self.model })),
        );
        self
    }

    pub fn events(&self) -> Option<&EventWriter> {
        self.events.as_ref()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn original_image(&self) -> Option<&ImageAsset> {
        self.original_image.as_ref()
    }

    pub fn original_mime_type(&self) -> Option<&str> {
        self.original_image
            .as_ref()
            .map(|image| image.mime_type.as_str())
    }

    pub fn current_prompt(&self) -> &str {
        &self.current_prompt
    }

    pub fn refine_prompt(&self) -> &str {
        &self.refine_prompt
    }

    pub fn set_refine_prompt(&mut self, prompt: impl Into<String>) {
        self.refine_prompt = prompt.into();
    }

    /// Loads preset `index` (1-based) into the refine input.
    pub fn apply_refine_preset(&mut self, index: usize) -> Option<&str> {
        let preset = index.checked_sub(1).and_then(|idx| REFINE_PRESETS.get(idx))?;
        self.refine_prompt = (*preset).to_string();
        Some(preset)
    }

    pub fn history(&self) -> &VersionHistory {
        &self.history
    }

    pub fn selected_history_id(&self) -> Option<&str> {
        self.selected_history_id.as_deref()
    }

    pub fn selected_entry(&self) -> Option<&HistoryEntry> {
        self.selected_history_id
            .as_deref()
            .and_then(|id| self.history.get(id))
    }

    pub fn generated_image(&self) -> Option<&ImageAsset> {
        self.selected_entry().map(|entry| &entry.generated_image)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn suggestion(&self) -> Option<&str> {
        self.suggestion.as_deref()
    }

    pub fn is_refining(&self) -> bool {
        self.refining
    }

    pub fn in_flight_request(&self) -> Option<(u64, RequestKind)> {
        self.in_flight
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Cause chain of the last transport or protocol failure. It is kept
    /// out of `error_message` and cleared when the next request starts.
    pub fn last_diagnostic(&self) -> Option<&str> {
        self.last_diagnostic.as_deref()
    }

    /// Replaces the original upload and starts over with an empty history.
    pub fn load_original(&mut self, image: ImageAsset) {
        self.clear_working_state();
        let payload = map_object(json!({
            "mime_type": image.mime_type,
            "image_bytes": image.byte_len(),
            "image_sha256": image.sha256(),
        }));
        self.original_image = Some(image);
        self.emit(SessionEvent::OriginalLoaded, payload);
    }

    /// Drops the original upload and the whole history ("new project").
    pub fn reset(&mut self) {
        self.clear_working_state();
        self.original_image = None;
        self.emit(SessionEvent::SessionReset, EventPayload::new());
    }

    fn clear_working_state(&mut self) {
        self.status = SessionStatus::Idle;
        self.history.clear();
        self.selected_history_id = None;
        self.error_message = None;
        self.suggestion = None;
        self.last_diagnostic = None;
        self.refine_prompt.clear();
        self.refining = false;
        self.in_flight = None;
    }

    /// Accepts a first-generation request against the original upload.
    /// Returns `None` (and changes nothing) without an original image or
    /// with a blank prompt.
    pub fn begin_generation(&mut self, prompt: &str) -> Option<PendingRequest> {
        if prompt.trim().is_empty() {
            return None;
        }
        let source = self.original_image.clone()?;

        self.current_prompt = prompt.to_string();
        self.status = SessionStatus::Loading;
        self.error_message = None;
        self.suggestion = None;
        self.last_diagnostic = None;
        // A newer generation supersedes any refinement still running.
        self.refining = false;

        let aspect_ratio = estimate_aspect_ratio(&source);
        let pending = self.issue(RequestKind::Generation, source, prompt, aspect_ratio, None, None);
        self.emit_started(&pending);
        Some(pending)
    }

    /// Accepts a refinement of the selected version. Returns `None` without
    /// an original upload, with an empty history, with a blank prompt, or
    /// while a first generation is loading.
    pub fn begin_refinement(&mut self, prompt: &str) -> Option<PendingRequest> {
        if prompt.trim().is_empty() || self.original_image.is_none() {
            return None;
        }
        if self.status == SessionStatus::Loading {
            return None;
        }
        let selected = self.selected_entry()?;
        let source = selected.generated_image.clone();
        let parent_id = Some(selected.id.clone());
        let inherited_suggestion = selected.suggestion.clone();

        self.refine_prompt = prompt.to_string();
        self.refining = true;
        self.error_message = None;
        self.suggestion = None;
        self.last_diagnostic = None;

        let aspect_ratio = estimate_aspect_ratio(&source);
        let pending = self.issue(
            RequestKind::Refinement,
            source,
            prompt,
            aspect_ratio,
            parent_id,
            inherited_suggestion,
        );
        self.emit_started(&pending);
        Some(pending)
    }

    /// Applies the result of `pending`. Results for anything other than the
    /// most recently issued request are discarded.
    pub fn complete(
        &mut self,
        pending: PendingRequest,
        result: Result<RedesignOutput>,
    ) -> RequestOutcome {
        if self.in_flight.map(|(id, _)| id) != Some(pending.id) {
            self.emit(
                SessionEvent::ResponseDiscarded,
                map_object(json!({
                    "request_id": pending.id,
                    "kind": pending.kind.as_str(),
                })),
            );
            return RequestOutcome::Discarded;
        }
        self.in_flight = None;
        match pending.kind {
            RequestKind::Generation => self.complete_generation(pending, result),
            RequestKind::Refinement => {
                self.refining = false;
                self.complete_refinement(pending, result)
            }
        }
    }

    fn complete_generation(
        &mut self,
        pending: PendingRequest,
        result: Result<RedesignOutput>,
    ) -> RequestOutcome {
        match result {
            Ok(RedesignOutput {
                image: Some(image),
                text,
            }) => {
                let entry_id = self.append_and_select(image, pending.prompt, text, None);
                self.status = SessionStatus::Success;
                self.emit_appended(SessionEvent::GenerationSucceeded, pending.id, &entry_id);
                RequestOutcome::Appended { entry_id }
            }
            Ok(RedesignOutput { image: None, text }) => {
                let message = match text.as_deref() {
                    Some(text) => {
                        format!("The AI did not generate an image, but replied: \"{text}\"")
                    }
                    None => GENERATION_NO_IMAGE.to_string(),
                };
                self.status = SessionStatus::Error;
                self.error_message = Some(message);
                self.emit(
                    SessionEvent::GenerationEmpty,
                    map_object(json!({ "request_id": pending.id, "text": text })),
                );
                RequestOutcome::Empty
            }
            Err(err) => {
                self.status = SessionStatus::Error;
                self.error_message = Some(GENERATION_FAILED.to_string());
                self.record_failure(SessionEvent::GenerationFailed, pending.id, &err);
                RequestOutcome::Failed
            }
        }
    }

    fn complete_refinement(
        &mut self,
        pending: PendingRequest,
        result: Result<RedesignOutput>,
    ) -> RequestOutcome {
        match result {
            Ok(RedesignOutput {
                image: Some(image),
                text,
            }) => {
                let suggestion = text.or(pending.inherited_suggestion);
                let entry_id =
                    self.append_and_select(image, pending.prompt, suggestion, pending.parent_id);
                self.refine_prompt.clear();
                self.emit_appended(SessionEvent::RefinementSucceeded, pending.id, &entry_id);
                RequestOutcome::Appended { entry_id }
            }
            Ok(RedesignOutput {
                image: None,
                text: Some(text),
            }) => {
                self.error_message = Some(format!(
                    "The AI replied: \"{text}\" but did not generate an image."
                ));
                self.emit(
                    SessionEvent::RefinementTextOnly,
                    map_object(json!({ "request_id": pending.id, "text": text })),
                );
                self.suggestion = Some(text);
                RequestOutcome::Empty
            }
            Ok(RedesignOutput {
                image: None,
                text: None,
            }) => {
                self.error_message = Some(REFINEMENT_NO_CHANGES.to_string());
                self.emit(
                    SessionEvent::RefinementEmpty,
                    map_object(json!({ "request_id": pending.id })),
                );
                RequestOutcome::Empty
            }
            Err(err) => {
                self.error_message = Some(REFINEMENT_FAILED.to_string());
                self.record_failure(SessionEvent::RefinementFailed, pending.id, &err);
                RequestOutcome::Failed
            }
        }
    }

    /// `begin_generation` + the external call + `complete`, synchronously.
    pub fn start_generation(
        &mut self,
        generator: &dyn ImageGenerator,
        prompt: &str,
    ) -> RequestOutcome {
        let Some(pending) = self.begin_generation(prompt) else {
            return RequestOutcome::Skipped;
        };
        let result = pending.run(generator);
        self.complete(pending, result)
    }

    /// `begin_refinement` + the external call + `complete`, synchronously.
    pub fn start_refinement(
        &mut self,
        generator: &dyn ImageGenerator,
        prompt: &str,
    ) -> RequestOutcome {
        let Some(pending) = self.begin_refinement(prompt) else {
            return RequestOutcome::Skipped;
        };
        let result = pending.run(generator);
        self.complete(pending, result)
    }

    /// Points the comparison view at another version. Unknown ids are
    /// ignored. Never issues a request and never touches the history.
    pub fn select_history(&mut self, entry_id: &str) -> bool {
        let Some(entry) = self.history.get(entry_id) else {
            return false;
        };
        let suggestion = entry.suggestion.clone();
        let changed = self.selected_history_id.as_deref() != Some(entry_id)
            || self.suggestion != suggestion;
        self.selected_history_id = Some(entry_id.to_string());
        self.suggestion = suggestion;
        if changed {
            self.emit(
                SessionEvent::HistorySelected,
                map_object(json!({
                    "entry_id": entry_id,
                    "version": self.history.display_index(entry_id),
                })),
            );
        }
        true
    }

    /// Download artifact for the selected version, named with `now_ms` for
    /// uniqueness. `Ok(None)` when nothing is selected.
    pub fn export_selected(&self, now_ms: i64) -> Result<Option<ExportArtifact>> {
        let Some(entry) = self.selected_entry() else {
            return Ok(None);
        };
        let version = self.history.display_index(&entry.id).unwrap_or(1);
        ExportArtifact::from_entry(entry, version, now_ms).map(Some)
    }

    /// Records that `artifact` was persisted by the host.
    pub fn record_export(&self, artifact: &ExportArtifact, image_path: &Path, receipt_path: &Path) {
        self.emit(
            SessionEvent::ExportWritten,
            map_object(json!({
                "entry_id": artifact.entry_id,
                "version": artifact.version,
                "image_path": image_path.to_string_lossy(),
                "receipt_path": receipt_path.to_string_lossy(),
                "sha256": artifact.sha256,
            })),
        );
    }

    fn issue(
        &mut self,
        kind: RequestKind,
        source: ImageAsset,
        prompt: &str,
        aspect_ratio: AspectRatio,
        parent_id: Option<String>,
        inherited_suggestion: Option<String>,
    ) -> PendingRequest {
        self.last_request_id += 1;
        let id = self.last_request_id;
        self.in_flight = Some((id, kind));
        PendingRequest {
            id,
            kind,
            model: self.model.clone(),
            source,
            prompt: prompt.to_string(),
            aspect_ratio,
            parent_id,
            inherited_suggestion,
        }
    }

    fn append_and_select(
        &mut self,
        image: ImageAsset,
        prompt: String,
        suggestion: Option<String>,
        parent_id: Option<String>,
    ) -> String {
        let entry_id = self
            .history
            .append(image, prompt, suggestion.clone(), parent_id)
            .id
            .clone();
        self.selected_history_id = Some(entry_id.clone());
        self.suggestion = suggestion;
        entry_id
    }

    fn emit_started(&self, pending: &PendingRequest) {
        self.emit(
            pending.kind.started_event(),
            map_object(json!({
                "request_id": pending.id,
                "prompt": pending.prompt,
                "model": pending.model,
                "aspect_ratio": pending.aspect_ratio.label(),
                "source_sha256": pending.source.sha256(),
                "parent_id": pending.parent_id,
            })),
        );
    }

    fn emit_appended(&self, event: SessionEvent, request_id: u64, entry_id: &str) {
        let Some(entry) = self.history.get(entry_id) else {
            return;
        };
        let mut payload = entry.summary();
        payload.insert("request_id".to_string(), json!(request_id));
        payload.insert(
            "version".to_string(),
            json!(self.history.display_index(entry_id)),
        );
        self.emit(event, payload);
    }

    fn record_failure(&mut self, event: SessionEvent, request_id: u64, err: &anyhow::Error) {
        let diagnostic = error_chain_text(err, 800);
        self.last_diagnostic = Some(diagnostic.clone());
        self.emit(
            event,
            map_object(json!({ "request_id": request_id, "error": diagnostic })),
        );
    }

    /// Without an event log, failure diagnostics go to stderr instead.
    fn emit(&self, event: SessionEvent, payload: EventPayload) {
        let Some(events) = self.events.as_ref() else {
            if event.is_failure() {
                let diagnostic = payload
                    .get("error")
                    .and_then(|value| value.as_str())
                    .unwrap_or_default();
                eprintln!("roomshift: {}: {diagnostic}", event.as_str());
            }
            return;
        };
        if let Err(err) = events.emit(event, payload) {
            eprintln!("roomshift: failed to record {} event: {err:#}", event.as_str());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use anyhow::{anyhow, Result};
    use roomshift_contracts::aspect::AspectRatio;
    use roomshift_contracts::assets::ImageAsset;
    use roomshift_contracts::events::EventWriter;
    use serde_json::{json, Value};

    use super::{RequestKind, RequestOutcome, Session, SessionStatus};
    use crate::estimator::tests::png_asset;
    use crate::gemini::GeminiGenerator;
    use crate::provider::{GenerationRequest, ImageGenerator, Part};
    use crate::redesign::{RedesignOutput, DEFAULT_PROMPT, REFINE_PRESETS};

    /// Replays scripted answers and records every request it receives.
    struct ScriptedGenerator {
        script: Mutex<VecDeque<Result<Vec<Part>>>>,
        seen: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedGenerator {
        fn new(script: Vec<Result<Vec<Part>>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<GenerationRequest> {
            self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
        }
    }

    impl ImageGenerator for ScriptedGenerator {
        fn name(&self) -> &str {
            "scripted"
        }

        fn generate(&self, request: &GenerationRequest) -> Result<Vec<Part>> {
            self.seen
                .lock()
                .map_err(|_| anyhow!("seen lock poisoned"))?
                .push(request.clone());
            self.script
                .lock()
                .map_err(|_| anyhow!("script lock poisoned"))?
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    /// Answers every request by parsing a fixed Gemini response payload.
    struct GeminiPayloadGenerator(Value);

    impl ImageGenerator for GeminiPayloadGenerator {
        fn name(&self) -> &str {
            "gemini-payload"
        }

        fn generate(&self, _request: &GenerationRequest) -> Result<Vec<Part>> {
            GeminiGenerator::extract_parts(&self.0)
        }
    }

    fn session_with_original() -> (Session, ImageAsset) {
        let original = png_asset(40, 30);
        let mut session = Session::new("test-model");
        session.load_original(original.clone());
        (session, original)
    }

    fn image_output(image: ImageAsset, text: Option<&str>) -> Result<RedesignOutput> {
        Ok(RedesignOutput {
            image: Some(image),
            text: text.map(str::to_string),
        })
    }

    #[test]
    fn new_session_is_idle_with_default_prompt() {
        let session = Session::new("m");
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(session.current_prompt(), DEFAULT_PROMPT);
        assert!(session.original_image().is_none());
        assert!(session.generated_image().is_none());
    }

    #[test]
    fn generation_guards_are_no_ops() {
        let generator = ScriptedGenerator::new(Vec::new());

        let mut empty = Session::new("m");
        assert_eq!(empty.start_generation(&generator, "add a rug"), RequestOutcome::Skipped);
        assert_eq!(empty.status(), SessionStatus::Idle);

        let (mut session, _) = session_with_original();
        assert_eq!(session.start_generation(&generator, "   "), RequestOutcome::Skipped);
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(session.current_prompt(), DEFAULT_PROMPT);
        assert!(generator.seen().is_empty());
    }

    #[test]
    fn successful_generation_appends_and_selects() {
        let b = png_asset(40, 30);
        let generator = ScriptedGenerator::new(vec![Ok(vec![Part::Image(b.clone())])]);
        let (mut session, original) = session_with_original();

        let outcome = session.start_generation(&generator, "add a rug");
        let entry_id = match outcome {
            RequestOutcome::Appended { entry_id } => entry_id,
            other => panic!("expected append, got {other:?}"),
        };
        assert_eq!(session.status(), SessionStatus::Success);
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.selected_history_id(), Some(entry_id.as_str()));
        assert_eq!(session.generated_image(), Some(&b));
        assert_eq!(session.selected_entry().map(|e| e.prompt.as_str()), Some("add a rug"));
        assert!(session.suggestion().is_none());

        let seen = generator.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].image.data, original.data);
        assert_eq!(seen[0].aspect_ratio, AspectRatio::Landscape4x3);
        assert_eq!(seen[0].model, "test-model");
    }

    #[test]
    fn text_only_generation_is_an_error_without_history_change() {
        let generator = ScriptedGenerator::new(vec![Ok(vec![Part::Text(
            "Please upload a clearer photo".to_string(),
        )])]);
        let (mut session, _) = session_with_original();

        assert_eq!(session.start_generation(&generator, "add a rug"), RequestOutcome::Empty);
        assert_eq!(session.status(), SessionStatus::Error);
        assert!(session.history().is_empty());
        assert!(session
            .error_message()
            .unwrap_or("")
            .contains("Please upload a clearer photo"));
    }

    #[test]
    fn empty_generation_uses_generic_message() {
        let generator = ScriptedGenerator::new(vec![Ok(Vec::new())]);
        let (mut session, _) = session_with_original();
        session.start_generation(&generator, "add a rug");
        assert_eq!(session.status(), SessionStatus::Error);
        assert_eq!(
            session.error_message(),
            Some("No image was generated. Try making the prompt clearer.")
        );
    }

    #[test]
    fn transport_failure_becomes_error_status_and_keeps_inputs() {
        let generator = ScriptedGenerator::new(vec![Err(anyhow!("dns lookup failed"))]);
        let (mut session, original) = session_with_original();

        assert_eq!(session.start_generation(&generator, "add a rug"), RequestOutcome::Failed);
        assert_eq!(session.status(), SessionStatus::Error);
        assert!(!session.error_message().unwrap_or("").contains("dns"));
        assert_eq!(session.current_prompt(), "add a rug");
        assert_eq!(session.original_image(), Some(&original));
    }

    #[test]
    fn new_request_clears_previous_error_and_suggestion() {
        let (mut session, _) = session_with_original();
        let failing = ScriptedGenerator::new(vec![Err(anyhow!("boom"))]);
        session.start_generation(&failing, "add a rug");
        assert!(session.error_message().is_some());

        let pending = session.begin_generation("add a rug");
        assert!(pending.is_some());
        assert_eq!(session.status(), SessionStatus::Loading);
        assert!(session.error_message().is_none());
        assert!(session.suggestion().is_none());
    }

    #[test]
    fn refinement_chains_from_selected_version_not_original() {
        let b = png_asset(48, 27);
        let c = png_asset(48, 27);
        let generator = ScriptedGenerator::new(vec![
            Ok(vec![Part::Image(b.clone())]),
            Ok(vec![Part::Image(c.clone())]),
        ]);
        let (mut session, original) = session_with_original();
        session.start_generation(&generator, "add a rug");
        session.start_refinement(&generator, "make walls blue");

        let seen = generator.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].image.data, b.data);
        assert_ne!(seen[1].image.data, original.data);
        // Ratio comes from the version being refined.
        assert_eq!(seen[1].aspect_ratio, AspectRatio::Landscape16x9);
    }

    #[test]
    fn end_to_end_generate_then_refine() {
        let b = png_asset(40, 30);
        let c = png_asset(40, 30);
        let generator = ScriptedGenerator::new(vec![
            Ok(vec![Part::Image(b.clone())]),
            Ok(vec![
                Part::Image(c.clone()),
                Part::Text("Adjusted wall color".to_string()),
            ]),
        ]);
        let (mut session, _) = session_with_original();

        session.start_generation(&generator, "add a rug");
        assert_eq!(session.status(), SessionStatus::Success);
        assert_eq!(session.history().len(), 1);
        let first_id = session.selected_history_id().unwrap_or_default().to_string();

        session.set_refine_prompt("make walls blue");
        let outcome = session.start_refinement(&generator, "make walls blue");
        let entry_id = match outcome {
            RequestOutcome::Appended { entry_id } => entry_id,
            other => panic!("expected append, got {other:?}"),
        };

        let history = session.history().entries();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].generated_image, b);
        assert_eq!(history[1].generated_image, c);
        assert_eq!(history[1].prompt, "make walls blue");
        assert_eq!(history[1].parent_id.as_deref(), Some(first_id.as_str()));
        assert_eq!(session.selected_history_id(), Some(entry_id.as_str()));
        assert_eq!(session.generated_image(), Some(&c));
        assert_eq!(session.suggestion(), Some("Adjusted wall color"));
        assert_eq!(session.refine_prompt(), "");
        assert!(!session.is_refining());
        assert_eq!(session.status(), SessionStatus::Success);
    }

    #[test]
    fn refinement_without_text_inherits_selected_suggestion() {
        let generator = ScriptedGenerator::new(vec![
            Ok(vec![Part::Image(png_asset(4, 3)), Part::Text("Cozy".to_string())]),
            Ok(vec![Part::Image(png_asset(4, 3))]),
        ]);
        let (mut session, _) = session_with_original();
        session.start_generation(&generator, "add a rug");
        session.start_refinement(&generator, "add plants");
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.suggestion(), Some("Cozy"));
        assert_eq!(session.selected_entry().and_then(|e| e.suggestion.as_deref()), Some("Cozy"));
    }

    #[test]
    fn refinement_text_only_sets_suggestion_and_error() {
        let generator = ScriptedGenerator::new(vec![
            Ok(vec![Part::Image(png_asset(4, 3))]),
            Ok(vec![Part::Text("Try brighter bulbs instead".to_string())]),
        ]);
        let (mut session, _) = session_with_original();
        session.start_generation(&generator, "add a rug");

        let outcome = session.start_refinement(&generator, "More lighting");
        assert_eq!(outcome, RequestOutcome::Empty);
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.suggestion(), Some("Try brighter bulbs instead"));
        assert!(session
            .error_message()
            .unwrap_or("")
            .contains("Try brighter bulbs instead"));
        assert_eq!(session.status(), SessionStatus::Success);
        assert_eq!(session.refine_prompt(), "More lighting");
    }

    #[test]
    fn refinement_empty_and_failure_messages() {
        let generator = ScriptedGenerator::new(vec![
            Ok(vec![Part::Image(png_asset(4, 3))]),
            Ok(Vec::new()),
            Err(anyhow!("socket closed")),
        ]);
        let (mut session, _) = session_with_original();
        session.start_generation(&generator, "add a rug");

        assert_eq!(session.start_refinement(&generator, "x"), RequestOutcome::Empty);
        assert_eq!(
            session.error_message(),
            Some("The AI returned no changes. Try a different prompt.")
        );

        assert_eq!(session.start_refinement(&generator, "x"), RequestOutcome::Failed);
        assert_eq!(
            session.error_message(),
            Some("Failed to refine the design. Please try again.")
        );
        assert_eq!(session.history().len(), 1);
        assert!(!session.is_refining());
    }

    #[test]
    fn refinement_guards() {
        let generator = ScriptedGenerator::new(Vec::new());
        let (mut session, _) = session_with_original();
        assert_eq!(session.start_refinement(&generator, "add plants"), RequestOutcome::Skipped);
        assert!(generator.seen().is_empty());

        let generator = ScriptedGenerator::new(vec![Ok(vec![Part::Image(png_asset(4, 3))])]);
        session.start_generation(&generator, "add a rug");
        assert_eq!(session.start_refinement(&generator, " "), RequestOutcome::Skipped);
        assert!(session.begin_refinement("add plants").is_some());
        assert!(session.is_refining());
        assert_eq!(session.status(), SessionStatus::Success);
    }

    #[test]
    fn refinement_is_refused_while_generation_loads() {
        let generator = ScriptedGenerator::new(vec![Ok(vec![Part::Image(png_asset(4, 3))])]);
        let (mut session, _) = session_with_original();
        session.start_generation(&generator, "add a rug");

        let _pending = session.begin_generation("new style");
        assert_eq!(session.status(), SessionStatus::Loading);
        assert!(session.begin_refinement("add plants").is_none());
    }

    #[test]
    fn select_history_mirrors_entry_without_requests() {
        let generator = ScriptedGenerator::new(vec![
            Ok(vec![Part::Image(png_asset(4, 3)), Part::Text("first".to_string())]),
            Ok(vec![Part::Image(png_asset(8, 6)), Part::Text("second".to_string())]),
        ]);
        let (mut session, _) = session_with_original();
        session.start_generation(&generator, "add a rug");
        session.start_refinement(&generator, "add plants");
        let entries = session.history().entries().to_vec();

        assert!(session.select_history(&entries[0].id));
        assert_eq!(session.generated_image(), Some(&entries[0].generated_image));
        assert_eq!(session.suggestion(), Some("first"));
        assert_eq!(session.history().entries(), entries.as_slice());
        assert_eq!(generator.seen().len(), 2);

        let before = (
            session.selected_history_id().map(str::to_string),
            session.suggestion().map(str::to_string),
            session.status(),
        );
        assert!(session.select_history(&entries[0].id));
        let after = (
            session.selected_history_id().map(str::to_string),
            session.suggestion().map(str::to_string),
            session.status(),
        );
        assert_eq!(before, after);

        assert!(!session.select_history("missing"));
        assert_eq!(session.selected_history_id(), Some(entries[0].id.as_str()));
    }

    #[test]
    fn refinement_after_reselect_branches_from_older_version() {
        let a = png_asset(4, 3);
        let generator = ScriptedGenerator::new(vec![
            Ok(vec![Part::Image(a.clone())]),
            Ok(vec![Part::Image(png_asset(8, 6))]),
            Ok(vec![Part::Image(png_asset(12, 9))]),
        ]);
        let (mut session, _) = session_with_original();
        session.start_generation(&generator, "add a rug");
        let first = session.selected_history_id().unwrap_or_default().to_string();
        session.start_refinement(&generator, "add plants");
        session.select_history(&first);
        session.start_refinement(&generator, "industrial style");

        assert_eq!(generator.seen()[2].image.data, a.data);
        assert_eq!(session.history().len(), 3);
        assert_eq!(session.selected_entry().and_then(|e| e.parent_id.clone()), Some(first));
    }

    #[test]
    fn stale_responses_are_discarded() {
        let (mut session, _) = session_with_original();
        let first = session.begin_generation("first idea").unwrap();
        let second = session.begin_generation("second idea").unwrap();
        assert!(second.id() > first.id());

        let late = session.complete(first, image_output(png_asset(4, 3), None));
        assert_eq!(late, RequestOutcome::Discarded);
        assert_eq!(session.status(), SessionStatus::Loading);
        assert!(session.history().is_empty());

        let outcome = session.complete(second, image_output(png_asset(4, 3), None));
        assert!(matches!(outcome, RequestOutcome::Appended { .. }));
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.selected_entry().map(|e| e.prompt.as_str()), Some("second idea"));
    }

    #[test]
    fn generation_supersedes_running_refinement() {
        let generator = ScriptedGenerator::new(vec![Ok(vec![Part::Image(png_asset(4, 3))])]);
        let (mut session, _) = session_with_original();
        session.start_generation(&generator, "add a rug");

        let refine = session.begin_refinement("add plants").unwrap();
        assert_eq!(refine.kind(), RequestKind::Refinement);
        let regenerate = session.begin_generation("start over").unwrap();
        assert!(!session.is_refining());

        assert_eq!(
            session.complete(refine, image_output(png_asset(4, 3), None)),
            RequestOutcome::Discarded
        );
        assert_eq!(session.history().len(), 1);
        session.complete(regenerate, image_output(png_asset(4, 3), None));
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.status(), SessionStatus::Success);
    }

    #[test]
    fn responses_after_reset_or_new_image_are_discarded() {
        let (mut session, _) = session_with_original();
        let pending = session.begin_generation("add a rug").unwrap();
        session.load_original(png_asset(30, 40));
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(
            session.complete(pending, image_output(png_asset(4, 3), None)),
            RequestOutcome::Discarded
        );
        assert!(session.history().is_empty());

        let pending = session.begin_generation("add a rug").unwrap();
        session.reset();
        assert_eq!(
            session.complete(pending, image_output(png_asset(4, 3), None)),
            RequestOutcome::Discarded
        );
        assert!(session.original_image().is_none());
    }

    #[test]
    fn load_original_and_reset_clear_working_state() {
        let generator = ScriptedGenerator::new(vec![
            Ok(vec![Part::Image(png_asset(4, 3)), Part::Text("nice".to_string())]),
        ]);
        let (mut session, _) = session_with_original();
        session.start_generation(&generator, "add a rug");
        session.set_refine_prompt("more plants");

        let replacement = png_asset(30, 40);
        session.load_original(replacement.clone());
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(session.history().is_empty());
        assert!(session.selected_history_id().is_none());
        assert!(session.suggestion().is_none());
        assert!(session.error_message().is_none());
        assert_eq!(session.refine_prompt(), "");
        assert_eq!(session.original_image(), Some(&replacement));
        assert_eq!(session.original_mime_type(), Some("image/png"));
        // The redesign prompt survives a new upload.
        assert_eq!(session.current_prompt(), "add a rug");

        session.reset();
        assert!(session.original_image().is_none());
        assert_eq!(session.status(), SessionStatus::Idle);
    }

    #[test]
    fn refine_presets_fill_refine_input() {
        let mut session = Session::new("m");
        assert_eq!(session.apply_refine_preset(3), Some(REFINE_PRESETS[2]));
        assert_eq!(session.refine_prompt(), "Add plants");
        assert_eq!(session.apply_refine_preset(0), None);
        assert_eq!(session.apply_refine_preset(9), None);
        assert_eq!(session.refine_prompt(), "Add plants");
    }

    #[test]
    fn export_uses_selected_version() -> anyhow::Result<()> {
        let generator = ScriptedGenerator::new(vec![
            Ok(vec![Part::Image(ImageAsset::from_bytes("image/jpeg", b"first"))]),
            Ok(vec![Part::Image(ImageAsset::from_bytes("image/png", b"second"))]),
        ]);
        let (mut session, _) = session_with_original();
        assert!(session.export_selected(1)?.is_none());

        session.start_generation(&generator, "add a rug");
        session.start_refinement(&generator, "add plants");
        let latest = session.export_selected(7)?.unwrap();
        assert_eq!(latest.bytes, b"second");
        assert_eq!(latest.version, 2);
        assert_eq!(latest.file_name, "room-design-7.png");

        let first_id = session.history().entries()[0].id.clone();
        session.select_history(&first_id);
        let first = session.export_selected(8)?.unwrap();
        assert_eq!(first.bytes, b"first");
        assert_eq!(first.file_name, "room-design-8.jpg");
        Ok(())
    }

    #[test]
    fn events_record_lifecycle_and_failure_diagnostics() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let generator = ScriptedGenerator::new(vec![
            Ok(vec![Part::Image(png_asset(4, 3))]),
            Err(anyhow!("tls handshake eof").context("Gemini request failed (https://x)")),
        ]);
        let mut session = Session::new("m").with_events(EventWriter::new(&path, "s-1"));
        session.load_original(png_asset(40, 30));
        session.start_generation(&generator, "add a rug");
        session.start_refinement(&generator, "add plants");

        let raw = std::fs::read_to_string(&path)?;
        let events = raw
            .lines()
            .map(serde_json::from_str::<Value>)
            .collect::<Result<Vec<_>, _>>()?;
        let types = events
            .iter()
            .map(|event| event["type"].as_str().unwrap_or("").to_string())
            .collect::<Vec<_>>();
        assert_eq!(
            types,
            vec![
                "session_started",
                "original_loaded",
                "generation_started",
                "generation_succeeded",
                "refinement_started",
                "refinement_failed",
            ]
        );
        assert_eq!(events[2]["aspect_ratio"], Value::String("4:3".to_string()));
        assert_eq!(events[3]["version"], serde_json::json!(1));
        let error = events[5]["error"].as_str().unwrap_or("");
        assert!(error.contains("Gemini request failed"));
        assert!(error.contains("tls handshake eof"));
        assert!(!raw.contains(&png_asset(40, 30).data));
        Ok(())
    }

    #[test]
    fn failure_without_event_log_keeps_diagnostic() {
        let generator = ScriptedGenerator::new(vec![
            Err(anyhow!("connection reset").context("Gemini request failed (https://x)")),
            Ok(vec![Part::Image(png_asset(4, 3))]),
        ]);
        let (mut session, _) = session_with_original();
        assert_eq!(
            session.start_generation(&generator, "add a rug"),
            RequestOutcome::Failed
        );

        let diagnostic = session.last_diagnostic().unwrap_or("");
        assert!(diagnostic.contains("connection reset"));
        let message = session.error_message().unwrap_or("");
        assert!(!message.contains("connection reset"));

        session.start_generation(&generator, "add a rug");
        assert!(session.last_diagnostic().is_none());
    }

    #[test]
    fn malformed_gemini_candidates_fail_with_generic_message() {
        let generator = GeminiPayloadGenerator(json!({"candidates": []}));
        let (mut session, _) = session_with_original();
        assert_eq!(
            session.start_generation(&generator, "add a rug"),
            RequestOutcome::Failed
        );
        assert_eq!(session.status(), SessionStatus::Error);
        assert_eq!(session.error_message(), Some(super::GENERATION_FAILED));
        assert!(session
            .last_diagnostic()
            .unwrap_or("")
            .contains("no candidates"));

        let images = ScriptedGenerator::new(vec![Ok(vec![Part::Image(png_asset(4, 3))])]);
        session.start_generation(&images, "add a rug");
        let generator = GeminiPayloadGenerator(json!({"candidates": [{"finishReason": "SAFETY"}]}));
        assert_eq!(
            session.start_refinement(&generator, "add plants"),
            RequestOutcome::Failed
        );
        assert_eq!(session.status(), SessionStatus::Success);
        assert_eq!(session.error_message(), Some(super::REFINEMENT_FAILED));
        assert_eq!(session.history().len(), 1);
    }

    #[test]
    fn pending_request_carries_source_prompt_and_ratio() {
        let (mut session, original) = session_with_original();
        let pending = session.begin_generation("add a rug").unwrap();
        assert_eq!(pending.source(), &original);
        assert_eq!(pending.prompt(), "add a rug");
        assert_eq!(pending.aspect_ratio(), AspectRatio::Landscape4x3);
        assert_eq!(
            session.in_flight_request(),
            Some((pending.id(), RequestKind::Generation))
        );
        session.complete(pending, image_output(png_asset(30, 40), None));
        assert!(session.in_flight_request().is_none());

        let selected = session.generated_image().cloned();
        let refine = session.begin_refinement("add plants").unwrap();
        assert_eq!(Some(refine.source()), selected.as_ref());
        assert_eq!(refine.aspect_ratio(), AspectRatio::Portrait3x4);
        assert_eq!(RequestKind::Refinement.as_str(), "refinement");
    }

    #[test]
    fn record_export_appends_export_event() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let generator = ScriptedGenerator::new(vec![Ok(vec![Part::Image(png_asset(4, 3))])]);
        let mut session = Session::new("m").with_events(EventWriter::new(&path, "s-1"));
        session.load_original(png_asset(40, 30));
        session.start_generation(&generator, "add a rug");

        let artifact = session.export_selected(5)?.unwrap();
        let image_path = temp.path().join(&artifact.file_name);
        let receipt_path = temp.path().join(format!("{}.json", artifact.file_name));
        session.record_export(&artifact, &image_path, &receipt_path);

        let raw = std::fs::read_to_string(&path)?;
        let last: Value = serde_json::from_str(raw.lines().last().unwrap_or("{}"))?;
        assert_eq!(last["type"], json!("export_written"));
        assert_eq!(last["version"], json!(1));
        assert_eq!(last["sha256"], json!(artifact.sha256));
        Ok(())
    }
}
