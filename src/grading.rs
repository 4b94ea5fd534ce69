use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use crate::capture::AudioClip;
use crate::config::Api;

#[derive(Debug, Error)]
pub enum GradingError {
    #[error("invalid api base url {0}")]
    InvalidBase(String),
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    #[error("{message}")]
    Rejected { status: u16, message: String },
}

/// Pronunciation grade, best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    Outstanding,
    ExceedsExpectations,
    Acceptable,
    Troll,
}

impl Grade {
    pub fn from_code(code: &str) -> Option<Grade> {
        match code {
            "O" => Some(Grade::Outstanding),
            "E" => Some(Grade::ExceedsExpectations),
            "A" => Some(Grade::Acceptable),
            "T" => Some(Grade::Troll),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Grade::Outstanding => "Outstanding",
            Grade::ExceedsExpectations => "Exceeds Expectations",
            Grade::Acceptable => "Acceptable",
            Grade::Troll => "Troll",
        }
    }

    pub fn is_worst(self) -> bool {
        self == Grade::Troll
    }
}

impl Display for Grade {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            Grade::Outstanding => "O",
            Grade::ExceedsExpectations => "E",
            Grade::Acceptable => "A",
            Grade::Troll => "T",
        };
        f.write_str(code)
    }
}

/// Response of `/api/audio` and `/api/pronunciation`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradingResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub spell: Option<String>,
    #[serde(default)]
    pub recognized_text: Option<String>,
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub grade_label: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub file_id: Option<String>,
}

impl GradingResult {
    pub fn parsed_grade(&self) -> Option<Grade> {
        self.grade.as_deref().and_then(Grade::from_code)
    }

    /// Replay is withheld only for the worst grade; unknown or missing grades
    /// still count as a pass.
    pub fn earns_replay(&self) -> bool {
        self.success && !self.parsed_grade().is_some_and(Grade::is_worst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellInfo {
    pub spell: String,
    #[serde(default)]
    pub pronunciation: Option<String>,
}

#[async_trait]
pub trait Grader: Send + Sync {
    async fn upload(&self, clip: AudioClip, spell: &str) -> Result<GradingResult, GradingError>;
    async fn assess(&self, file_id: &str, spell: &str) -> Result<GradingResult, GradingError>;
}

#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn spells(&self) -> Result<Vec<SpellInfo>, GradingError>;
}

/// Single-attempt client for the grading backend. Nothing here retries.
#[derive(Clone)]
pub struct GradingClient {
    client: reqwest::Client,
    base: Url,
}

impl GradingClient {
    pub fn new(client: reqwest::Client, config: &Api) -> Result<Self, GradingError> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| GradingError::InvalidBase(format!("{}: {e}", config.base_url)))?;
        Ok(GradingClient { client, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url, GradingError> {
        self.base
            .join(path)
            .map_err(|e| GradingError::InvalidBase(format!("{}{path}: {e}", self.base)))
    }

    async fn read(res: reqwest::Response) -> Result<GradingResult, GradingError> {
        let status = res.status();
        let result: GradingResult = res.json().await?;
        debug!("grading result ({status}): {result:?}");
        if !status.is_success() {
            return Err(GradingError::Rejected {
                status: status.as_u16(),
                message: result.error.unwrap_or_else(|| "Unknown error".to_string()),
            });
        }
        Ok(result)
    }
}

#[async_trait]
impl Grader for GradingClient {
    async fn upload(&self, clip: AudioClip, spell: &str) -> Result<GradingResult, GradingError> {
        let file_name = clip.file_name();
        info!("uploading {file_name} ({} bytes) for {spell}", clip.bytes.len());
        let part = Part::bytes(clip.bytes)
            .file_name(file_name)
            .mime_str(&clip.mime_type)?;
        let form = Form::new().part("audio", part).text("spell", spell.to_string());
        let res = self
            .client
            .post(self.endpoint("/api/audio")?)
            .multipart(form)
            .send()
            .await?;
        Self::read(res).await
    }

    async fn assess(&self, file_id: &str, spell: &str) -> Result<GradingResult, GradingError> {
        let res = self
            .client
            .post(self.endpoint("/api/pronunciation")?)
            .json(&json!({ "file_id": file_id, "spell": spell }))
            .send()
            .await?;
        Self::read(res).await
    }
}

#[async_trait]
impl MetadataSource for GradingClient {
    async fn spells(&self) -> Result<Vec<SpellInfo>, GradingError> {
        let res = self.client.get(self.endpoint("/api/spells")?).send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(GradingError::Rejected {
                status: status.as_u16(),
                message: format!("spell catalog returned {status}"),
            });
        }
        Ok(res.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_codes_round_out_the_scale() {
        for code in ["O", "E", "A", "T"] {
            assert_eq!(Grade::from_code(code).unwrap().to_string(), code);
        }
        assert_eq!(Grade::from_code("N/A"), None);
        assert_eq!(Grade::Troll.label(), "Troll");
    }

    #[test]
    fn troll_withholds_replay() {
        let mut result = GradingResult { success: true, grade: Some("T".into()), ..Default::default() };
        assert!(!result.earns_replay());
        result.grade = Some("A".into());
        assert!(result.earns_replay());
        result.grade = None;
        assert!(result.earns_replay());
        result.success = false;
        assert!(!result.earns_replay());
    }

    #[test]
    fn result_tolerates_missing_fields() {
        let result: GradingResult =
            serde_json::from_str(r#"{"success": true, "file_id": "abc", "spell": "Accio"}"#).unwrap();
        assert_eq!(result.file_id.as_deref(), Some("abc"));
        assert_eq!(result.grade, None);
    }

    #[test]
    fn spell_info_ignores_extra_fields() {
        let spells: Vec<SpellInfo> = serde_json::from_str(
            r#"[{"spell": "Accio", "pronunciation": "AK-ee-oh", "difficulty": "easy"}, {"spell": "Nox"}]"#,
        )
        .unwrap();
        assert_eq!(spells[0].pronunciation.as_deref(), Some("AK-ee-oh"));
        assert_eq!(spells[1].pronunciation, None);
    }

    #[test]
    fn relative_base_is_rejected() {
        let api = Api { base_url: "/api".into(), timeout_secs: 1 };
        assert!(matches!(
            GradingClient::new(reqwest::Client::new(), &api),
            Err(GradingError::InvalidBase(_))
        ));
    }
}
