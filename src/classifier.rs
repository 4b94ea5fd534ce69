use std::fmt::{Display, Formatter};

use crate::catalog::SpellCatalog;

/// Keyword rules, evaluated top to bottom. A rule fires when the normalized
/// transcript contains any one of its keywords, so order decides ties such
/// as "lumos ... nox".
const RULES: &[(&[&str], &str)] = &[
    (&["lumos"], "Lumos"),
    (&["accio"], "Accio"),
    (&["alohomora"], "Alohomora"),
    (&["avada", "kedavra"], "Avada Kedavra"),
    (&["crucio"], "Crucio"),
    (&["expelliarmus"], "Expelliarmus"),
    (&["expecto", "patronum"], "Expecto Patronum"),
    (&["nox"], "Nox"),
    (&["wingardium", "leviosa"], "Wingardium Leviosa"),
    (&["petrificus", "totalus"], "Petrificus Totalus"),
    (&["stupefy"], "Stupefy"),
    (&["rictusempra"], "Rictusempra"),
    (&["expulso"], "Expulso"),
    (&["diffindo"], "Diffindo"),
    (&["reparo"], "Reparo"),
    (&["obliviate"], "Obliviate"),
    (&["silencio"], "Silencio"),
    (&["incendio"], "Incendio"),
    (&["aguamenti"], "Aguamenti"),
    (&["finite", "incantatem"], "Finite Incantatem"),
    (&["rennervate"], "Rennervate"),
    (&["colloportus"], "Colloportus"),
    (&["reducto"], "Reducto"),
    (&["impervius"], "Impervius"),
    (&["tarantallegra"], "Tarantallegra"),
    (&["obscuro"], "Obscuro"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Resolved(&'static str),
    /// Nothing matched; carries every valid spell name in catalog order.
    Unrecognized(Vec<&'static str>),
}

impl Display for Classification {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Resolved(spell) => write!(f, "Recognized: {spell}"),
            Classification::Unrecognized(names) => {
                write!(f, "No spell recognized. Try saying ")?;
                let quoted: Vec<String> = names.iter().map(|name| format!("\"{name}\"")).collect();
                match quoted.split_last() {
                    None => Ok(()),
                    Some((last, [])) => write!(f, "{last}"),
                    Some((last, rest)) => write!(f, "{}, or {last}", rest.join(", ")),
                }
            }
        }
    }
}

#[derive(Clone, Copy)]
pub struct TranscriptClassifier<'a> {
    catalog: &'a SpellCatalog,
    rules: &'a [(&'a [&'a str], &'static str)],
}

impl<'a> TranscriptClassifier<'a> {
    pub fn new(catalog: &'a SpellCatalog) -> Self {
        TranscriptClassifier { catalog, rules: RULES }
    }

    pub fn classify(&self, transcript: &str) -> Classification {
        let trimmed = transcript.trim();
        if let Some(key) = self.catalog.key(trimmed) {
            return Classification::Resolved(key);
        }

        let normalized = trimmed.to_lowercase();
        self.rules
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|kw| normalized.contains(kw)))
            .and_then(|(_, spell)| self.catalog.key(spell))
            .map(Classification::Resolved)
            .unwrap_or_else(|| Classification::Unrecognized(self.catalog.names().collect()))
    }
}
