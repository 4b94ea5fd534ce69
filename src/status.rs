use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::classifier::Classification;
use crate::grading::{MetadataSource, SpellInfo};
use crate::surface::Surface;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Classified(Classification),
    AnimationFailed { spell: String },
    ReadyToPlay { spell: String },
    SpeechUnavailable,
    RecognitionError { error: String },
    RecognitionEnded,
    MicrophoneGranted,
    PermissionDenied,
    NoMicrophone,
    MicrophoneError { message: String },
    Recording { spell: Option<String>, pronunciation: Option<String> },
    Processing,
    RecordingError { message: String },
    NoAudio,
    UploadError { message: String },
    Graded { spell: String, grade: String, label: String },
    NotRecognized { spell: String, error: Option<String> },
    Assessed { spell: String, recognized: Option<String>, grade: String, label: String },
    AssessmentFailed { message: String },
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Classified(classification) => write!(f, "{classification}"),
            Status::AnimationFailed { spell } => write!(f, "Failed to load animation for {spell}"),
            Status::ReadyToPlay { spell } => write!(f, "Ready to play: {spell}"),
            Status::SpeechUnavailable => write!(f, "Speech recognition not supported in this browser"),
            Status::RecognitionError { error } => write!(f, "Recognition error: {error}"),
            Status::RecognitionEnded => write!(f, "Recognition ended. Click to try again."),
            Status::MicrophoneGranted => {
                write!(f, "Microphone access granted. Click to start recording...")
            }
            Status::PermissionDenied => write!(
                f,
                "Microphone permission denied. Please allow microphone access and try again."
            ),
            Status::NoMicrophone => {
                write!(f, "No microphone found. Please connect a microphone and try again.")
            }
            Status::MicrophoneError { message } => {
                write!(f, "Error accessing microphone: {message}")
            }
            Status::Recording { spell: None, .. } => {
                write!(f, "Recording... Click to stop and upload.")
            }
            Status::Recording { spell: Some(spell), pronunciation } => write!(
                f,
                "Recording... Click to stop.\nSpell: {spell}\nPronunciation: {}",
                pronunciation.as_deref().unwrap_or("-")
            ),
            Status::Processing => write!(f, "Processing audio..."),
            Status::RecordingError { message } => write!(f, "Recording error: {message}"),
            Status::NoAudio => write!(f, "No audio recorded. Please try again."),
            Status::UploadError { message } => write!(f, "Upload error: {message}"),
            Status::Graded { spell, grade, label } => {
                write!(f, "Spell: {spell}\nGrade: {grade} – {label}")
            }
            Status::NotRecognized { spell, error } => write!(
                f,
                "We couldn't recognize your spell \"{spell}\". {}",
                error.as_deref().unwrap_or("Please try again.")
            ),
            Status::Assessed { spell, recognized, grade, label } => write!(
                f,
                "Spell: {spell}\nRecognized: {}\nGrade: {grade} – {label}",
                recognized.as_deref().unwrap_or("(no text)")
            ),
            Status::AssessmentFailed { message } => {
                write!(f, "Pronunciation assessment failed: {message}")
            }
        }
    }
}

/// Output window: keeps the last message and the lazily fetched spell
/// metadata used to annotate recordings.
pub struct StatusPanel {
    surface: Arc<dyn Surface>,
    metadata: Arc<dyn MetadataSource>,
    spells: OnceCell<Vec<SpellInfo>>,
    last: Mutex<Option<Status>>,
}

impl StatusPanel {
    pub fn new(surface: Arc<dyn Surface>, metadata: Arc<dyn MetadataSource>) -> Self {
        StatusPanel {
            surface,
            metadata,
            spells: OnceCell::new(),
            last: Mutex::new(None),
        }
    }

    pub fn show(&self, status: Status) {
        let message = status.to_string();
        debug!("status: {message}");
        self.surface.status(&message);
        if let Ok(mut last) = self.last.lock() {
            *last = Some(status);
        }
    }

    pub fn last(&self) -> Option<Status> {
        self.last.lock().ok().and_then(|last| last.clone())
    }

    pub fn recorder_label(&self, label: &str) {
        self.surface.recorder_label(label);
    }

    /// Fetched at most once per session; a failed fetch is retried on the
    /// next call.
    pub async fn spell_metadata(&self) -> Option<&[SpellInfo]> {
        let res = self
            .spells
            .get_or_try_init(|| async { self.metadata.spells().await })
            .await;
        match res {
            Ok(spells) => Some(spells.as_slice()),
            Err(e) => {
                warn!("Failed to load spell data: {e}");
                None
            }
        }
    }

    pub async fn pronunciation(&self, spell: &str) -> Option<String> {
        self.spell_metadata()
            .await?
            .iter()
            .find(|info| info.spell == spell)
            .and_then(|info| info.pronunciation.clone())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::grading::GradingError;

    #[derive(Default)]
    pub(crate) struct StaticMetadata {
        pub(crate) spells: Vec<SpellInfo>,
        pub(crate) fail: bool,
        pub(crate) calls: AtomicUsize,
    }

    #[async_trait]
    impl MetadataSource for StaticMetadata {
        async fn spells(&self) -> Result<Vec<SpellInfo>, GradingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(GradingError::Rejected { status: 503, message: "down".into() });
            }
            Ok(self.spells.clone())
        }
    }
}
