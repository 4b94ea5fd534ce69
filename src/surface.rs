//! The rendering surface the sequencer and status panel draw on.

use serde::{Deserialize, Serialize};

use crate::data_url::PngDataUrl;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum VisualSource {
    #[serde(rename = "url")]
    Url(String),
    #[serde(rename = "still")]
    Still(PngDataUrl),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualRole {
    Active,
    Idle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visual {
    pub spell: String,
    pub source: VisualSource,
    pub role: VisualRole,
    pub alt: String,
}

impl Visual {
    pub fn active(spell: &str, url: String) -> Self {
        Visual {
            spell: spell.to_string(),
            source: VisualSource::Url(url),
            role: VisualRole::Active,
            alt: format!("{spell} spell animation"),
        }
    }

    pub fn idle(spell: &str, source: VisualSource) -> Self {
        Visual {
            spell: spell.to_string(),
            source,
            role: VisualRole::Idle,
            alt: format!("{spell} idle"),
        }
    }
}

/// Display sink. Implementations only draw; every decision about what is
/// mounted lives in the controllers.
pub trait Surface: Send + Sync {
    fn mount(&self, visual: Visual);
    fn unmount(&self);
    fn set_hint(&self, visible: bool);
    fn status(&self, message: &str);
    fn recorder_label(&self, label: &str);
}
