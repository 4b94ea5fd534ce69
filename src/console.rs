use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::assets::AssetLoader;
use crate::capture::{AudioInput, CaptureController};
use crate::catalog::CATALOG;
use crate::classifier::{Classification, TranscriptClassifier};
use crate::grading::{Grader, MetadataSource};
use crate::sequencer::Sequencer;
use crate::status::{Status, StatusPanel};
use crate::surface::Surface;

/// Outcome of one speech-recognition session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    Transcript(String),
    Error(String),
    End,
    Unavailable,
}

/// One page's worth of controllers: speech feeds the classifier and the
/// sequencer, the record button drives capture and grading.
#[derive(Clone)]
pub struct SpellConsole {
    sequencer: Sequencer,
    capture: CaptureController,
    status: Arc<StatusPanel>,
    classifier: TranscriptClassifier<'static>,
    speech_reported: Arc<AtomicBool>,
}

impl SpellConsole {
    pub fn new<G>(
        surface: Arc<dyn Surface>,
        assets: Arc<dyn AssetLoader>,
        input: Arc<dyn AudioInput>,
        grader: Arc<G>,
    ) -> Self
    where
        G: Grader + MetadataSource + 'static,
    {
        let status = Arc::new(StatusPanel::new(surface.clone(), grader.clone()));
        let sequencer = Sequencer::new(&CATALOG, surface, assets, status.clone());
        let capture = CaptureController::new(input, grader, sequencer.clone(), status.clone());
        SpellConsole {
            sequencer,
            capture,
            status,
            classifier: TranscriptClassifier::new(&CATALOG),
            speech_reported: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    pub fn capture(&self) -> &CaptureController {
        &self.capture
    }

    pub fn status(&self) -> &StatusPanel {
        &self.status
    }

    pub async fn ready(&self) {
        self.capture.refresh_label().await;
    }

    pub async fn on_speech(&self, event: SpeechEvent) {
        match event {
            SpeechEvent::Transcript(transcript) => {
                self.handle_transcript(&transcript).await;
            }
            SpeechEvent::Error(error) => {
                warn!("Recognition error: {error}");
                self.status.show(Status::RecognitionError { error });
                self.capture.refresh_label().await;
            }
            SpeechEvent::End => {
                self.capture.refresh_label().await;
                if !self.sequencer.has_visual().await {
                    self.status.show(Status::RecognitionEnded);
                }
            }
            SpeechEvent::Unavailable => {
                if !self.speech_reported.swap(true, Ordering::SeqCst) {
                    warn!("speech recognition unavailable on this page");
                    self.status.show(Status::SpeechUnavailable);
                }
            }
        }
    }

    pub async fn handle_transcript(&self, transcript: &str) -> Classification {
        info!("Recognized: {transcript}");
        let classification = self.classifier.classify(transcript);
        if let Classification::Resolved(spell) = classification {
            if let Err(e) = self.sequencer.play(spell).await {
                warn!("{e}");
            }
        }
        self.status.show(Status::Classified(classification.clone()));
        classification
    }

    /// Direct invocation, treated exactly like a transcript naming the spell.
    pub async fn cast(&self, spell: &str) -> Classification {
        debug!("simulating recognition of {spell}");
        self.handle_transcript(spell).await
    }

    pub async fn toggle_recording(&self) {
        self.capture.toggle().await;
    }

    /// Honour a `?spell=` preselection. Returns whether the parameter was
    /// used and should be stripped from the page URL.
    pub async fn preselect(&self, spell: Option<&str>) -> bool {
        let Some(spell) = spell.filter(|s| CATALOG.contains(s)) else {
            return false;
        };
        if let Err(e) = self.sequencer.show_idle(spell).await {
            warn!("preselect {spell}: {e}");
            return false;
        }
        self.capture.refresh_label().await;
        true
    }

    pub async fn shutdown(&self) {
        self.sequencer.clear().await;
    }
}
