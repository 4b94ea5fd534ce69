//! Static spell table: which animation to play for a spell and what to
//! leave on screen once it finishes.

use std::time::Duration;

use once_cell::sync::Lazy;
use thiserror::Error;

/// What the display shows after a spell's active animation ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdlePolicy {
    /// Unmount and bring back the placeholder hint.
    None,
    /// Keep a still of the active asset's first frame.
    FreezeFirstFrame,
    /// Mount `idle_asset` and leave it running.
    AlternateAsset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpellDescriptor {
    pub active_asset: Option<&'static str>,
    pub idle_policy: IdlePolicy,
    pub idle_asset: Option<&'static str>,
    pub active_duration_ms: u64,
}

impl SpellDescriptor {
    const fn first_frame(asset: &'static str, duration_ms: u64) -> Self {
        SpellDescriptor {
            active_asset: Some(asset),
            idle_policy: IdlePolicy::FreezeFirstFrame,
            idle_asset: None,
            active_duration_ms: duration_ms,
        }
    }

    const fn alternate(asset: &'static str, idle: &'static str, duration_ms: u64) -> Self {
        SpellDescriptor {
            active_asset: Some(asset),
            idle_policy: IdlePolicy::AlternateAsset,
            idle_asset: Some(idle),
            active_duration_ms: duration_ms,
        }
    }

    pub fn active_duration(&self) -> Duration {
        Duration::from_millis(self.active_duration_ms)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("no animation config for spell: {0}")]
    NotFound(String),
    #[error("spell {0} has an alternate idle policy but no idle asset")]
    MissingIdleAsset(&'static str),
    #[error("spell {0} freezes its first frame but has no active asset")]
    MissingActiveAsset(&'static str),
    #[error("spell {0} has a zero active duration")]
    ZeroDuration(&'static str),
}

/// Ordered, case-sensitive mapping from spell name to descriptor.
#[derive(Debug)]
pub struct SpellCatalog {
    entries: Vec<(&'static str, SpellDescriptor)>,
}

pub static CATALOG: Lazy<SpellCatalog> = Lazy::new(SpellCatalog::standard);

impl SpellCatalog {
    pub fn new(entries: Vec<(&'static str, SpellDescriptor)>) -> Result<Self, CatalogError> {
        let catalog = SpellCatalog { entries };
        catalog.validate()?;
        Ok(catalog)
    }

    fn standard() -> Self {
        use SpellDescriptor as D;
        SpellCatalog {
            entries: vec![
                ("Lumos", SpellDescriptor {
                    active_asset: Some("Lumos.gif"),
                    idle_policy: IdlePolicy::None,
                    idle_asset: None,
                    active_duration_ms: 5000,
                }),
                ("Accio", D::first_frame("Accio.gif", 3000)),
                ("Alohomora", D::first_frame("Alohomora.gif", 3500)),
                ("Avada Kedavra", D::alternate("Avada Kedavra.gif", "enemy idle.gif", 5000)),
                ("Crucio", D::alternate("Crucio.gif", "enemy II idle.gif", 5000)),
                ("Expelliarmus", D::first_frame("Expelliarmus.gif", 3800)),
                ("Expecto Patronum", D::alternate("Expecto Patronum.gif", "enemy idle.gif", 5000)),
                ("Nox", SpellDescriptor {
                    active_asset: None,
                    idle_policy: IdlePolicy::AlternateAsset,
                    idle_asset: Some("Lumos.gif"),
                    active_duration_ms: 2000,
                }),
                ("Wingardium Leviosa", D::alternate("Wingardium Leviosa.gif", "Wingardium Leviosa idle.gif", 5000)),
                ("Petrificus Totalus", D::alternate("Petrificus Totalus.gif", "enemy II idle.gif", 5000)),
                ("Stupefy", D::alternate("Stupefy.gif", "enemy II idle.gif", 5000)),
                ("Rictusempra", D::first_frame("Rictusempra.gif", 3000)),
                ("Expulso", D::alternate("Expulso.gif", "Expulso idle.gif", 5000)),
                ("Diffindo", D::alternate("Diffindo.gif", "slime idle.gif", 5000)),
                ("Reparo", D::first_frame("Reparo.gif", 4500)),
                ("Obliviate", D::first_frame("Obliviate.gif", 4000)),
                ("Silencio", D::first_frame("Silencio.gif", 3200)),
                ("Incendio", D::first_frame("Incendio.gif", 3800)),
                ("Aguamenti", D::alternate("Aguamenti.gif", "Aguamenti dile.gif", 3500)),
                ("Finite Incantatem", D::alternate("enemy II idle.gif", "Petrificus Totalus.gif", 5000)),
                ("Rennervate", D::first_frame("Rennervate.gif", 3600)),
                ("Colloportus", D::first_frame("Colloportus.gif", 3300)),
                ("Reducto", D::alternate("Reducto.gif", "Expulso idle.gif", 850)),
                ("Impervius", D::alternate("Impervius.gif", "joey idle.gif", 4000)),
                ("Tarantallegra", D::alternate("Tarantallegra.gif", "Skeleton Idle.gif", 5000)),
                ("Obscuro", D::alternate("Obscuro.gif", "joey idle.gif", 5000)),
            ],
        }
    }

    pub fn lookup(&self, name: &str) -> Result<&SpellDescriptor, CatalogError> {
        self.entries
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, descriptor)| descriptor)
            .ok_or_else(|| CatalogError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_ok()
    }

    /// Resolve `name` to the catalog's own `'static` key.
    pub fn key(&self, name: &str) -> Option<&'static str> {
        self.entries.iter().find(|(key, _)| *key == name).map(|(key, _)| *key)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(key, _)| *key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        for (name, descriptor) in &self.entries {
            if descriptor.active_duration_ms == 0 {
                return Err(CatalogError::ZeroDuration(name));
            }
            match descriptor.idle_policy {
                IdlePolicy::AlternateAsset
                    if descriptor.idle_asset.map_or(true, str::is_empty) =>
                {
                    return Err(CatalogError::MissingIdleAsset(name));
                }
                IdlePolicy::FreezeFirstFrame if descriptor.active_asset.is_none() => {
                    return Err(CatalogError::MissingActiveAsset(name));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_catalog_is_valid() {
        CATALOG.validate().unwrap();
        assert_eq!(CATALOG.len(), 26);
    }

    #[test]
    fn every_spell_has_positive_duration() {
        for name in CATALOG.names() {
            let descriptor = CATALOG.lookup(name).unwrap();
            assert!(descriptor.active_duration_ms > 0, "{name}");
        }
    }

    #[test]
    fn lookup_is_case_sensitive() {
        assert!(CATALOG.lookup("Accio").is_ok());
        assert_eq!(
            CATALOG.lookup("accio"),
            Err(CatalogError::NotFound("accio".to_string()))
        );
    }

    #[test]
    fn nox_has_no_active_asset() {
        let nox = CATALOG.lookup("Nox").unwrap();
        assert_eq!(nox.active_asset, None);
        assert_eq!(nox.idle_policy, IdlePolicy::AlternateAsset);
        assert_eq!(nox.idle_asset, Some("Lumos.gif"));
    }

    #[test]
    fn alternate_policy_requires_idle_asset() {
        let broken = SpellDescriptor {
            active_asset: Some("x.gif"),
            idle_policy: IdlePolicy::AlternateAsset,
            idle_asset: Some(""),
            active_duration_ms: 100,
        };
        let err = SpellCatalog::new(vec![("Broken", broken)]).unwrap_err();
        assert_eq!(err, CatalogError::MissingIdleAsset("Broken"));
    }

    #[test]
    fn zero_duration_is_rejected() {
        let err = SpellCatalog::new(vec![("Instant", SpellDescriptor::first_frame("i.gif", 0))])
            .unwrap_err();
        assert_eq!(err, CatalogError::ZeroDuration("Instant"));
    }
}
