use std::fmt::{Debug, Formatter};
use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::epoch_millis;
use crate::grading::{Grader, GradingResult};
use crate::sequencer::Sequencer;
use crate::status::{Status, StatusPanel};

/// Recorder encodings in order of preference; the empty entry lets the
/// device pick.
pub const PREFERRED_TYPES: [&str; 4] = ["audio/webm;codecs=opus", "audio/webm", "audio/mp4", ""];

const DEFAULT_TYPE: &str = "audio/webm";

pub fn negotiate_type(is_supported: impl Fn(&str) -> bool) -> &'static str {
    PREFERRED_TYPES
        .iter()
        .copied()
        .find(|candidate| candidate.is_empty() || is_supported(candidate))
        .unwrap_or("")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    AwaitingPermission,
    Recording,
    Uploading,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("no microphone found")]
    NotFound,
    #[error("audio capture not supported")]
    Unavailable,
    #[error("{0}")]
    Device(String),
}

impl From<&CaptureError> for Status {
    fn from(e: &CaptureError) -> Self {
        match e {
            CaptureError::PermissionDenied => Status::PermissionDenied,
            CaptureError::NotFound => Status::NoMicrophone,
            other => Status::MicrophoneError { message: other.to_string() },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    Data(Vec<u8>),
    /// The recorder flushed its last fragment; carries the type it actually
    /// used when it was started without one.
    Stopped { mime_type: Option<String> },
    Error(String),
}

/// Microphone capability. `open` obtains the capture session; `start` and
/// `stop` bracket one recording whose fragments arrive on the returned
/// channel.
#[async_trait]
pub trait AudioInput: Send + Sync {
    async fn open(&self) -> Result<(), CaptureError>;
    fn is_type_supported(&self, mime_type: &str) -> bool;
    async fn start(&self, mime_type: &str) -> Result<mpsc::Receiver<RecorderEvent>, CaptureError>;
    async fn stop(&self);
}

/// A finished recording, ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub recorded_at_ms: u128,
}

impl AudioClip {
    pub fn extension(&self) -> &'static str {
        if self.mime_type.contains("mp4") {
            "mp4"
        } else {
            "webm"
        }
    }

    pub fn file_name(&self) -> String {
        format!("recording-{}.{}", self.recorded_at_ms, self.extension())
    }
}

#[derive(Debug)]
struct Recorder {
    state: CaptureState,
    session: bool,
    fragments: Vec<Vec<u8>>,
    mime_type: String,
    generation: u64,
}

impl Recorder {
    fn label(&self) -> &'static str {
        match (self.state, self.session) {
            (CaptureState::Recording, _) => "Stop Recording",
            (_, true) => "Start Recording",
            (_, false) => "Collect Audio",
        }
    }
}

pub struct InnerCaptureController {
    input: Arc<dyn AudioInput>,
    grader: Arc<dyn Grader>,
    sequencer: Sequencer,
    status: Arc<StatusPanel>,
    recorder: Mutex<Recorder>,
}

#[derive(Clone)]
pub struct CaptureController {
    inner: Arc<InnerCaptureController>,
}

impl Debug for CaptureController {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureController").finish()
    }
}

impl Deref for CaptureController {
    type Target = InnerCaptureController;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl CaptureController {
    pub fn new(
        input: Arc<dyn AudioInput>,
        grader: Arc<dyn Grader>,
        sequencer: Sequencer,
        status: Arc<StatusPanel>,
    ) -> Self {
        let inner = InnerCaptureController {
            input,
            grader,
            sequencer,
            status,
            recorder: Mutex::new(Recorder {
                state: CaptureState::Idle,
                session: false,
                fragments: Vec::new(),
                mime_type: String::new(),
                generation: 0,
            }),
        };
        CaptureController { inner: Arc::new(inner) }
    }

    pub async fn state(&self) -> CaptureState {
        self.recorder.lock().await.state
    }

    pub async fn has_session(&self) -> bool {
        self.recorder.lock().await.session
    }

    pub async fn refresh_label(&self) {
        let label = self.recorder.lock().await.label();
        self.status.recorder_label(label);
    }

    /// Record button: open the session if needed and start, or stop and
    /// upload. Clicks while waiting on permission or an upload are ignored.
    pub async fn toggle(&self) {
        let (state, session) = {
            let recorder = self.recorder.lock().await;
            (recorder.state, recorder.session)
        };
        match state {
            CaptureState::Recording => self.stop().await,
            CaptureState::Idle if session => self.start().await,
            CaptureState::Idle => {
                if self.open().await {
                    self.start().await;
                }
            }
            CaptureState::AwaitingPermission | CaptureState::Uploading => {
                debug!("ignoring record toggle while {state:?}");
            }
        }
    }

    async fn open(&self) -> bool {
        self.recorder.lock().await.state = CaptureState::AwaitingPermission;
        let res = self.input.open().await;

        let mut recorder = self.recorder.lock().await;
        recorder.state = CaptureState::Idle;
        let granted = match res {
            Ok(()) => {
                info!("microphone session granted");
                recorder.session = true;
                self.status.show(Status::MicrophoneGranted);
                true
            }
            Err(e) => {
                warn!("Error accessing microphone: {e}");
                self.status.show(Status::from(&e));
                false
            }
        };
        self.status.recorder_label(recorder.label());
        granted
    }

    async fn start(&self) {
        let mime_type = negotiate_type(|candidate| self.input.is_type_supported(candidate));
        let events = match self.input.start(mime_type).await {
            Ok(events) => events,
            Err(e) => {
                warn!("Recording error: {e}");
                self.abort(None, e.to_string()).await;
                return;
            }
        };

        let generation = {
            let mut recorder = self.recorder.lock().await;
            recorder.fragments.clear();
            recorder.mime_type = mime_type.to_string();
            recorder.state = CaptureState::Recording;
            recorder.generation += 1;
            self.status.recorder_label(recorder.label());
            recorder.generation
        };
        debug!("recording started as {mime_type:?} (generation {generation})");

        let this = self.clone();
        tokio::spawn(async move { this.pump(generation, events).await });

        let spell = self.sequencer.current_spell().await;
        let pronunciation = match spell {
            Some(spell) => self.status.pronunciation(spell).await,
            None => None,
        };
        if self.is_current(generation, CaptureState::Recording).await {
            self.status.show(Status::Recording { spell: spell.map(String::from), pronunciation });
        }
    }

    async fn stop(&self) {
        {
            let mut recorder = self.recorder.lock().await;
            if recorder.state != CaptureState::Recording {
                return;
            }
            recorder.state = CaptureState::Uploading;
            self.status.show(Status::Processing);
            self.status.recorder_label(recorder.label());
        }
        self.input.stop().await;
    }

    async fn is_current(&self, generation: u64, state: CaptureState) -> bool {
        let recorder = self.recorder.lock().await;
        recorder.generation == generation && recorder.state == state
    }

    async fn abort(&self, generation: Option<u64>, message: String) {
        let mut recorder = self.recorder.lock().await;
        if generation.is_some_and(|g| g != recorder.generation) {
            return;
        }
        recorder.state = CaptureState::Idle;
        self.status.show(Status::RecordingError { message });
        self.status.recorder_label(recorder.label());
    }

    async fn pump(&self, generation: u64, mut events: mpsc::Receiver<RecorderEvent>) {
        let device_type = loop {
            let Some(event) = events.recv().await else {
                warn!("recorder closed without stopping");
                self.abort(Some(generation), "recorder closed unexpectedly".into()).await;
                return;
            };
            let mut recorder = self.recorder.lock().await;
            if recorder.generation != generation {
                return;
            }
            match event {
                RecorderEvent::Data(fragment) if fragment.is_empty() => {}
                RecorderEvent::Data(fragment) => recorder.fragments.push(fragment),
                RecorderEvent::Stopped { mime_type } => break mime_type,
                RecorderEvent::Error(message) => {
                    drop(recorder);
                    warn!("Recording error: {message}");
                    self.abort(Some(generation), message).await;
                    return;
                }
            }
        };

        let clip = {
            let mut recorder = self.recorder.lock().await;
            if recorder.state == CaptureState::Recording {
                // The device stopped on its own.
                recorder.state = CaptureState::Uploading;
                self.status.recorder_label(recorder.label());
            }
            let fragments = std::mem::take(&mut recorder.fragments);
            if fragments.is_empty() {
                None
            } else {
                let mime_type = Some(recorder.mime_type.clone())
                    .filter(|t| !t.is_empty())
                    .or(device_type)
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| DEFAULT_TYPE.to_string());
                Some(AudioClip {
                    bytes: fragments.concat(),
                    mime_type,
                    recorded_at_ms: epoch_millis(),
                })
            }
        };

        match clip {
            Some(clip) => self.upload(clip).await,
            None => self.status.show(Status::NoAudio),
        }

        let mut recorder = self.recorder.lock().await;
        if recorder.generation == generation {
            recorder.state = CaptureState::Idle;
            self.status.recorder_label(recorder.label());
        }
    }

    async fn upload(&self, clip: AudioClip) {
        let selected = self.sequencer.current_spell().await;
        let spell = selected.unwrap_or("Unknown");

        let result = match self.grader.upload(clip, spell).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Upload error: {e}");
                self.status.show(Status::UploadError { message: e.to_string() });
                return;
            }
        };
        let display_spell = result.spell.clone().unwrap_or_else(|| spell.to_string());

        if !result.success {
            self.status.show(Status::NotRecognized { spell: display_spell, error: result.error });
            return;
        }

        // Stored but not yet graded: ask the assessment endpoint once.
        let pending = match (&result.grade, &result.file_id) {
            (None, Some(file_id)) => Some(file_id.clone()),
            _ => None,
        };
        let graded = match pending {
            Some(file_id) => match self.assess(&file_id, spell).await {
                Some(assessed) => assessed,
                None => return,
            },
            None => {
                self.status.show(Status::Graded {
                    spell: display_spell,
                    grade: result.grade.clone().unwrap_or_else(|| "N/A".into()),
                    label: result.grade_label.clone().unwrap_or_default(),
                });
                result
            }
        };

        if let Some(spell) = selected.filter(|_| graded.earns_replay()) {
            if let Err(e) = self.sequencer.play(spell).await {
                warn!("replay failed: {e}");
            }
        }
    }

    async fn assess(&self, file_id: &str, spell: &str) -> Option<GradingResult> {
        match self.grader.assess(file_id, spell).await {
            Ok(result) if result.success => {
                self.status.show(Status::Assessed {
                    spell: spell.to_string(),
                    recognized: result.recognized_text.clone(),
                    grade: result.grade.clone().unwrap_or_else(|| "N/A".into()),
                    label: result.grade_label.clone().unwrap_or_default(),
                });
                Some(result)
            }
            Ok(result) => {
                let message = result.error.unwrap_or_else(|| "Unknown error".into());
                self.status.show(Status::AssessmentFailed { message });
                None
            }
            Err(e) => {
                warn!("Assessment error: {e}");
                self.status.show(Status::AssessmentFailed { message: e.to_string() });
                None
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::sleep;

    use super::testing::{FakeGrader, FakeMicrophone};
    use super::*;
    use crate::assets::testing::{tiny_gif, MemoryAssets};
    use crate::catalog::CATALOG;
    use crate::grading::{GradingError, SpellInfo};
    use crate::sequencer::Phase;
    use crate::status::testing::StaticMetadata;
    use crate::surface::testing::RecordingSurface;

    struct Rig {
        capture: CaptureController,
        sequencer: Sequencer,
        mic: Arc<FakeMicrophone>,
        grader: Arc<FakeGrader>,
        surface: Arc<RecordingSurface>,
    }

    fn rig(mic: FakeMicrophone, grader: FakeGrader) -> Rig {
        let surface = Arc::new(RecordingSurface::default());
        let metadata = StaticMetadata {
            spells: vec![SpellInfo { spell: "Accio".into(), pronunciation: Some("AK-ee-oh".into()) }],
            ..Default::default()
        };
        let status = Arc::new(StatusPanel::new(surface.clone(), Arc::new(metadata)));
        let assets = MemoryAssets::with(&[("Accio.gif", tiny_gif())]);
        let sequencer = Sequencer::new(&CATALOG, surface.clone(), Arc::new(assets), status.clone());
        let mic = Arc::new(mic);
        let grader = Arc::new(grader);
        let capture = CaptureController::new(mic.clone(), grader.clone(), sequencer.clone(), status);
        Rig { capture, sequencer, mic, grader, surface }
    }

    fn graded(grade: &str) -> Result<GradingResult, GradingError> {
        Ok(GradingResult {
            success: true,
            spell: Some("Accio".into()),
            grade: Some(grade.into()),
            grade_label: Some("Label".into()),
            ..Default::default()
        })
    }

    async fn settle() {
        sleep(Duration::from_millis(5)).await;
    }

    #[test]
    fn negotiation_follows_preference_order() {
        assert_eq!(negotiate_type(|_| true), "audio/webm;codecs=opus");
        assert_eq!(negotiate_type(|t| t == "audio/webm"), "audio/webm");
        assert_eq!(negotiate_type(|t| t == "audio/mp4"), "audio/mp4");
        assert_eq!(negotiate_type(|_| false), "");
    }

    #[test]
    fn clip_file_name_follows_type() {
        let mut clip = AudioClip { bytes: vec![1], mime_type: "audio/mp4".into(), recorded_at_ms: 42 };
        assert_eq!(clip.file_name(), "recording-42.mp4");
        clip.mime_type = "audio/webm;codecs=opus".into();
        assert_eq!(clip.file_name(), "recording-42.webm");
    }

    #[tokio::test(start_paused = true)]
    async fn full_cycle_uploads_and_replays() {
        let rig = rig(FakeMicrophone::default(), FakeGrader::returning(graded("O")));
        rig.sequencer.show_idle("Accio").await.unwrap();
        settle().await;

        rig.capture.toggle().await;
        assert_eq!(rig.capture.state().await, CaptureState::Recording);
        assert_eq!(
            rig.surface.last_status().as_deref(),
            Some("Recording... Click to stop.\nSpell: Accio\nPronunciation: AK-ee-oh")
        );
        assert_eq!(rig.surface.last_label().as_deref(), Some("Stop Recording"));
        assert_eq!(rig.mic.started.lock().unwrap().as_slice(), ["audio/webm;codecs=opus"]);

        let tx = rig.mic.sender();
        tx.send(RecorderEvent::Data(vec![1, 2])).await.unwrap();
        tx.send(RecorderEvent::Data(vec![])).await.unwrap();
        tx.send(RecorderEvent::Data(vec![3])).await.unwrap();
        settle().await;

        rig.capture.toggle().await;
        settle().await;

        let uploads = rig.grader.uploads.lock().unwrap().clone();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0.bytes, vec![1, 2, 3]);
        assert_eq!(uploads[0].0.mime_type, "audio/webm;codecs=opus");
        assert_eq!(uploads[0].1, "Accio");

        assert!(rig.surface.statuses().contains(&"Spell: Accio\nGrade: O – Label".to_string()));
        assert_eq!(rig.sequencer.phase().await, Phase::Playing("Accio"));
        assert_eq!(rig.capture.state().await, CaptureState::Idle);
        assert_eq!(rig.surface.last_label().as_deref(), Some("Start Recording"));
    }

    #[tokio::test(start_paused = true)]
    async fn worst_grade_does_not_replay() {
        let rig = rig(FakeMicrophone::default(), FakeGrader::returning(graded("T")));
        rig.sequencer.show_idle("Accio").await.unwrap();
        rig.capture.toggle().await;
        rig.mic.sender().send(RecorderEvent::Data(vec![9])).await.unwrap();
        settle().await;
        rig.capture.toggle().await;
        settle().await;

        assert_eq!(rig.grader.uploads.lock().unwrap().len(), 1);
        assert_eq!(rig.sequencer.phase().await, Phase::ShowingIdleVariant("Accio"));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_recording_skips_upload() {
        let rig = rig(FakeMicrophone::default(), FakeGrader::returning(graded("O")));
        rig.capture.toggle().await;
        settle().await;
        rig.capture.toggle().await;
        settle().await;

        assert!(rig.grader.uploads.lock().unwrap().is_empty());
        assert_eq!(rig.surface.last_status().as_deref(), Some("No audio recorded. Please try again."));
        assert_eq!(rig.capture.state().await, CaptureState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn permission_denied_stays_idle() {
        let mic = FakeMicrophone {
            open_result: std::sync::Mutex::new(Err(CaptureError::PermissionDenied)),
            ..Default::default()
        };
        let rig = rig(mic, FakeGrader::returning(graded("O")));
        rig.capture.toggle().await;

        assert_eq!(rig.capture.state().await, CaptureState::Idle);
        assert!(!rig.capture.has_session().await);
        assert_eq!(
            rig.surface.last_status().as_deref(),
            Some("Microphone permission denied. Please allow microphone access and try again.")
        );
        assert_eq!(rig.surface.last_label().as_deref(), Some("Collect Audio"));
        assert!(rig.mic.started.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_device_has_its_own_message() {
        let mic = FakeMicrophone {
            open_result: std::sync::Mutex::new(Err(CaptureError::NotFound)),
            ..Default::default()
        };
        let rig = rig(mic, FakeGrader::returning(graded("O")));
        rig.capture.toggle().await;
        assert_eq!(
            rig.surface.last_status().as_deref(),
            Some("No microphone found. Please connect a microphone and try again.")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn session_is_reused_across_cycles() {
        let rig = rig(FakeMicrophone::default(), FakeGrader::returning(graded("O")));
        for _ in 0..2 {
            rig.capture.toggle().await;
            settle().await;
            rig.capture.toggle().await;
            settle().await;
        }
        assert_eq!(*rig.mic.opened.lock().unwrap(), 1);
        assert_eq!(rig.mic.started.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn device_error_aborts_to_idle() {
        let rig = rig(FakeMicrophone::default(), FakeGrader::returning(graded("O")));
        rig.capture.toggle().await;
        let tx = rig.mic.sender();
        tx.send(RecorderEvent::Data(vec![1])).await.unwrap();
        tx.send(RecorderEvent::Error("device lost".into())).await.unwrap();
        settle().await;

        assert_eq!(rig.capture.state().await, CaptureState::Idle);
        assert_eq!(rig.surface.last_status().as_deref(), Some("Recording error: device lost"));
        assert!(rig.grader.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn device_default_type_is_used_when_none_negotiated() {
        let mic = FakeMicrophone {
            supported: vec![],
            device_type: Some("audio/mp4".into()),
            ..Default::default()
        };
        let rig = rig(mic, FakeGrader::returning(graded("O")));
        rig.capture.toggle().await;
        rig.mic.sender().send(RecorderEvent::Data(vec![1])).await.unwrap();
        settle().await;
        rig.capture.toggle().await;
        settle().await;

        assert_eq!(rig.mic.started.lock().unwrap().as_slice(), [""]);
        let uploads = rig.grader.uploads.lock().unwrap();
        assert_eq!(uploads[0].0.mime_type, "audio/mp4");
        assert_eq!(uploads[0].1, "Unknown");
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_upload_is_reported_once() {
        let rejected = Err(GradingError::Rejected { status: 400, message: "No audio file provided".into() });
        let rig = rig(FakeMicrophone::default(), FakeGrader::returning(rejected));
        rig.capture.toggle().await;
        rig.mic.sender().send(RecorderEvent::Data(vec![1])).await.unwrap();
        settle().await;
        rig.capture.toggle().await;
        settle().await;

        assert_eq!(
            rig.surface.last_status().as_deref(),
            Some("Upload error: No audio file provided")
        );
        assert_eq!(rig.grader.uploads.lock().unwrap().len(), 1);
        assert_eq!(rig.capture.state().await, CaptureState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn unsuccessful_grading_explains() {
        let failed = Ok(GradingResult {
            success: false,
            error: Some("Speech not recognized.".into()),
            ..Default::default()
        });
        let rig = rig(FakeMicrophone::default(), FakeGrader::returning(failed));
        rig.sequencer.show_idle("Accio").await.unwrap();
        rig.capture.toggle().await;
        rig.mic.sender().send(RecorderEvent::Data(vec![1])).await.unwrap();
        settle().await;
        rig.capture.toggle().await;
        settle().await;

        assert_eq!(
            rig.surface.last_status().as_deref(),
            Some("We couldn't recognize your spell \"Accio\". Speech not recognized.")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stored_upload_is_followed_by_assessment() {
        let stored = Ok(GradingResult {
            success: true,
            spell: Some("Accio".into()),
            file_id: Some("f00d".into()),
            ..Default::default()
        });
        let grader = FakeGrader::returning(stored);
        *grader.assess_result.lock().unwrap() = Some(Ok(GradingResult {
            success: true,
            recognized_text: Some("accio".into()),
            grade: Some("E".into()),
            grade_label: Some("Exceeds Expectations".into()),
            ..Default::default()
        }));
        let rig = rig(FakeMicrophone::default(), grader);
        rig.sequencer.show_idle("Accio").await.unwrap();
        rig.capture.toggle().await;
        rig.mic.sender().send(RecorderEvent::Data(vec![1])).await.unwrap();
        settle().await;
        rig.capture.toggle().await;
        settle().await;

        assert_eq!(
            rig.grader.assessments.lock().unwrap().as_slice(),
            [("f00d".to_string(), "Accio".to_string())]
        );
        assert!(rig
            .surface
            .statuses()
            .contains(&"Spell: Accio\nRecognized: accio\nGrade: E – Exceeds Expectations".to_string()));
        assert_eq!(rig.sequencer.phase().await, Phase::Playing("Accio"));
    }

    #[tokio::test(start_paused = true)]
    async fn toggles_during_upload_are_ignored() {
        let rig = rig(FakeMicrophone::default(), FakeGrader::returning(graded("O")));
        rig.capture.toggle().await;
        rig.mic.sender().send(RecorderEvent::Data(vec![1])).await.unwrap();
        settle().await;
        {
            rig.capture.recorder.lock().await.state = CaptureState::Uploading;
        }
        rig.capture.toggle().await;
        assert_eq!(rig.mic.started.lock().unwrap().len(), 1);
    }
}
