//! WebSocket binding for one connected page: the page renders what the
//! console mounts, reports speech results, and runs the recorder on our
//! behalf.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::capture::{AudioInput, CaptureError, RecorderEvent};
use crate::console::SpeechEvent;
use crate::surface::{Surface, Visual};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "ready")]
    Ready { locale: String },
    #[serde(rename = "mount")]
    Mount { visual: Visual },
    #[serde(rename = "unmount")]
    Unmount,
    #[serde(rename = "hint")]
    Hint { visible: bool },
    #[serde(rename = "status")]
    Status { message: String },
    #[serde(rename = "recorder")]
    Recorder { label: String },
    #[serde(rename = "requestMicrophone")]
    RequestMicrophone,
    #[serde(rename = "startRecording")]
    StartRecording {
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    #[serde(rename = "stopRecording")]
    StopRecording,
    #[serde(rename = "stripQuery")]
    StripQuery { param: String },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "hello")]
    Hello {
        #[serde(rename = "supportedTypes", default)]
        supported_types: Vec<String>,
    },
    #[serde(rename = "transcript")]
    Transcript { content: String },
    #[serde(rename = "recognitionError")]
    RecognitionError { error: String },
    #[serde(rename = "recognitionEnd")]
    RecognitionEnd,
    #[serde(rename = "speechUnavailable")]
    SpeechUnavailable,
    #[serde(rename = "cast")]
    Cast { spell: String },
    #[serde(rename = "record")]
    Record,
    #[serde(rename = "microphone")]
    Microphone {
        granted: bool,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(rename = "recorderStopped")]
    RecorderStopped {
        #[serde(rename = "mimeType", default)]
        mime_type: Option<String>,
    },
    #[serde(rename = "recorderError")]
    RecorderError { message: String },
}

impl ClientEvent {
    pub fn speech(self) -> Option<SpeechEvent> {
        match self {
            ClientEvent::Transcript { content } => Some(SpeechEvent::Transcript(content)),
            ClientEvent::RecognitionError { error } => Some(SpeechEvent::Error(error)),
            ClientEvent::RecognitionEnd => Some(SpeechEvent::End),
            ClientEvent::SpeechUnavailable => Some(SpeechEvent::Unavailable),
            _ => None,
        }
    }
}

/// Map a `getUserMedia` failure (DOM exception name plus message) onto a
/// capture error.
pub fn microphone_error(name: Option<&str>, message: Option<&str>) -> CaptureError {
    match name {
        Some("NotAllowedError") | Some("PermissionDeniedError") => CaptureError::PermissionDenied,
        Some("NotFoundError") => CaptureError::NotFound,
        Some("NotSupportedError") => CaptureError::Unavailable,
        other => CaptureError::Device(
            message
                .or(other)
                .unwrap_or("unknown error")
                .to_string(),
        ),
    }
}

pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

pub(crate) fn post(outbox: &Outbox, evt: ServerEvent) {
    if outbox.send(evt).is_err() {
        debug!("page gone, dropping event");
    }
}

pub struct WsSurface {
    outbox: Outbox,
}

impl WsSurface {
    pub fn new(outbox: Outbox) -> Self {
        WsSurface { outbox }
    }
}

impl Surface for WsSurface {
    fn mount(&self, visual: Visual) {
        post(&self.outbox, ServerEvent::Mount { visual });
    }

    fn unmount(&self) {
        post(&self.outbox, ServerEvent::Unmount);
    }

    fn set_hint(&self, visible: bool) {
        post(&self.outbox, ServerEvent::Hint { visible });
    }

    fn status(&self, message: &str) {
        post(&self.outbox, ServerEvent::Status { message: message.to_string() });
    }

    fn recorder_label(&self, label: &str) {
        post(&self.outbox, ServerEvent::Recorder { label: label.to_string() });
    }
}

/// The page's `MediaRecorder`, driven over the socket.
pub struct WsMicrophone {
    outbox: Outbox,
    supported: Mutex<Vec<String>>,
    pending: Mutex<Option<oneshot::Sender<Result<(), CaptureError>>>>,
    recording: Mutex<Option<mpsc::Sender<RecorderEvent>>>,
}

impl WsMicrophone {
    pub fn new(outbox: Outbox) -> Self {
        WsMicrophone {
            outbox,
            supported: Mutex::new(Vec::new()),
            pending: Mutex::new(None),
            recording: Mutex::new(None),
        }
    }

    pub fn set_supported(&self, types: Vec<String>) {
        if let Ok(mut supported) = self.supported.lock() {
            *supported = types;
        }
    }

    /// Answer an outstanding permission request.
    pub fn answer(&self, result: Result<(), CaptureError>) {
        let pending = self.pending.lock().ok().and_then(|mut p| p.take());
        match pending {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => warn!("microphone answer without a pending request"),
        }
    }

    fn recorder(&self) -> Option<mpsc::Sender<RecorderEvent>> {
        self.recording.lock().ok().and_then(|r| r.clone())
    }

    pub async fn deliver(&self, event: RecorderEvent) {
        let finished = !matches!(event, RecorderEvent::Data(_));
        let Some(tx) = self.recorder() else {
            debug!("recorder event outside a recording: {event:?}");
            return;
        };
        if tx.send(event).await.is_err() {
            debug!("recording consumer gone");
        }
        if finished {
            if let Ok(mut recording) = self.recording.lock() {
                recording.take();
            }
        }
    }

    /// Release anything waiting on the page.
    pub fn close(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.take();
        }
        if let Ok(mut recording) = self.recording.lock() {
            recording.take();
        }
    }
}

#[async_trait]
impl AudioInput for WsMicrophone {
    async fn open(&self) -> Result<(), CaptureError> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            *pending = Some(tx);
        }
        post(&self.outbox, ServerEvent::RequestMicrophone);
        rx.await.unwrap_or(Err(CaptureError::Unavailable))
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        self.supported
            .lock()
            .map(|supported| supported.iter().any(|t| t == mime_type))
            .unwrap_or(false)
    }

    async fn start(&self, mime_type: &str) -> Result<mpsc::Receiver<RecorderEvent>, CaptureError> {
        let (tx, rx) = mpsc::channel(128);
        if let Ok(mut recording) = self.recording.lock() {
            *recording = Some(tx);
        }
        post(&self.outbox, ServerEvent::StartRecording { mime_type: mime_type.to_string() });
        Ok(rx)
    }

    async fn stop(&self) {
        post(&self.outbox, ServerEvent::StopRecording);
    }
}
