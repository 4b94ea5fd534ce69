//! Drives the display through a spell's active animation and then its idle
//! phase.
//!
//! Every `play`, `show_idle` and `clear` bumps a generation counter. Asset
//! loads and timers remember the generation they were started under and do
//! nothing once a newer request has taken over, so a slow load can never
//! mount a visual on top of a later spell.

use std::fmt::{Debug, Formatter};
use std::ops::Deref;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, warn};

use crate::assets::{first_frame, AssetLoader};
use crate::catalog::{CatalogError, IdlePolicy, SpellCatalog, SpellDescriptor};
use crate::status::{Status, StatusPanel};
use crate::surface::{Surface, Visual, VisualSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Playing(&'static str),
    ShowingIdleVariant(&'static str),
}

#[derive(Debug)]
struct State {
    phase: Phase,
    spell: Option<&'static str>,
    generation: u64,
    mounted: bool,
}

pub struct InnerSequencer {
    catalog: &'static SpellCatalog,
    surface: Arc<dyn Surface>,
    assets: Arc<dyn AssetLoader>,
    status: Arc<StatusPanel>,
    state: Mutex<State>,
}

#[derive(Clone)]
pub struct Sequencer {
    inner: Arc<InnerSequencer>,
}

impl Debug for Sequencer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequencer").finish()
    }
}

impl Deref for Sequencer {
    type Target = InnerSequencer;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl State {
    fn bump(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }
}

impl InnerSequencer {
    fn unmount(&self, state: &mut State) {
        if state.mounted {
            self.surface.unmount();
            state.mounted = false;
        }
    }

    fn mount(&self, state: &mut State, visual: Visual) {
        self.unmount(state);
        debug!("mounting {:?} visual for {}", visual.role, visual.spell);
        self.surface.mount(visual);
        state.mounted = true;
    }
}

impl Sequencer {
    pub fn new(
        catalog: &'static SpellCatalog,
        surface: Arc<dyn Surface>,
        assets: Arc<dyn AssetLoader>,
        status: Arc<StatusPanel>,
    ) -> Self {
        let inner = InnerSequencer {
            catalog,
            surface,
            assets,
            status,
            state: Mutex::new(State {
                phase: Phase::Idle,
                spell: None,
                generation: 0,
                mounted: false,
            }),
        };
        Sequencer { inner: Arc::new(inner) }
    }

    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase
    }

    /// Spell most recently played or preselected, kept after its animation
    /// finishes.
    pub async fn current_spell(&self) -> Option<&'static str> {
        self.state.lock().await.spell
    }

    pub async fn has_visual(&self) -> bool {
        self.state.lock().await.mounted
    }

    pub fn catalog(&self) -> &'static SpellCatalog {
        self.catalog
    }

    pub async fn play(&self, spell: &str) -> Result<(), CatalogError> {
        let (key, descriptor) = self.resolve(spell)?;
        let generation = {
            let mut state = self.state.lock().await;
            self.unmount(&mut state);
            state.spell = Some(key);
            state.phase = Phase::Playing(key);
            self.surface.set_hint(false);
            state.bump()
        };
        debug!("play {key} (generation {generation})");

        let this = self.clone();
        tokio::spawn(async move { this.run_active(generation, key, descriptor).await });
        Ok(())
    }

    /// Select `spell` and go straight to its idle phase without animating.
    pub async fn show_idle(&self, spell: &str) -> Result<(), CatalogError> {
        let (key, descriptor) = self.resolve(spell)?;
        let generation = {
            let mut state = self.state.lock().await;
            self.unmount(&mut state);
            state.spell = Some(key);
            self.surface.set_hint(false);
            state.bump()
        };
        if descriptor.idle_policy == IdlePolicy::None {
            let mut state = self.state.lock().await;
            if state.generation == generation {
                state.phase = Phase::Idle;
                self.status.show(Status::ReadyToPlay { spell: key.to_string() });
            }
            return Ok(());
        }
        self.enter_idle(generation, key, descriptor).await;
        Ok(())
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.bump();
        self.unmount(&mut state);
        state.phase = Phase::Idle;
    }

    fn resolve(&self, spell: &str) -> Result<(&'static str, SpellDescriptor), CatalogError> {
        let descriptor = self.catalog.lookup(spell).map_err(|e| {
            warn!("{e}");
            e
        })?;
        let key = self.catalog.key(spell).ok_or_else(|| CatalogError::NotFound(spell.into()))?;
        Ok((key, descriptor.clone()))
    }

    async fn run_active(&self, generation: u64, spell: &'static str, descriptor: SpellDescriptor) {
        // The active phase lasts its duration from the request, however long
        // the preload takes.
        let deadline = Instant::now() + descriptor.active_duration();
        if let Some(asset) = descriptor.active_asset {
            let url = self.assets.url(asset, true);
            let preload = match timeout_at(deadline, self.assets.fetch(&url)).await {
                Ok(fetched) => fetched.map_err(|e| e.to_string()),
                Err(_) => Err(String::from("preload timed out")),
            };

            let mut state = self.state.lock().await;
            if state.generation != generation {
                debug!("dropping stale load of {spell} (generation {generation})");
                return;
            }
            let visual = match preload {
                Ok(_) => Visual::active(spell, self.assets.url(asset, true)),
                Err(e) => {
                    warn!("Failed to preload animation for {spell}: {e}");
                    self.status.show(Status::AnimationFailed { spell: spell.to_string() });
                    Visual::active(spell, url)
                }
            };
            self.mount(&mut state, visual);
        }

        sleep_until(deadline).await;
        self.enter_idle(generation, spell, descriptor).await;
    }

    async fn enter_idle(&self, generation: u64, spell: &'static str, descriptor: SpellDescriptor) {
        let mut state = self.state.lock().await;
        if state.generation != generation {
            return;
        }
        self.unmount(&mut state);

        match (descriptor.idle_policy, descriptor.idle_asset, descriptor.active_asset) {
            (IdlePolicy::AlternateAsset, Some(idle), _) => {
                let source = VisualSource::Url(self.assets.url(idle, false));
                self.mount(&mut state, Visual::idle(spell, source));
                state.phase = Phase::ShowingIdleVariant(spell);
            }
            (IdlePolicy::FreezeFirstFrame, _, Some(active)) => {
                state.phase = Phase::ShowingIdleVariant(spell);
                drop(state);
                self.freeze_first_frame(generation, spell, active).await;
            }
            _ => {
                state.phase = Phase::Idle;
                self.surface.set_hint(true);
            }
        }
    }

    async fn freeze_first_frame(&self, generation: u64, spell: &'static str, asset: &'static str) {
        let url = self.assets.url(asset, false);
        let fetched = self.assets.fetch(&url).await;

        let mut state = self.state.lock().await;
        if state.generation != generation {
            return;
        }
        let source = match fetched {
            Ok(bytes) => match first_frame(&bytes) {
                Ok(still) => VisualSource::Still(still),
                Err(e) => {
                    warn!("Failed to extract first frame of {asset}: {e}");
                    VisualSource::Url(url)
                }
            },
            Err(e) => {
                warn!("Failed to load {asset} for first frame extraction: {e}");
                self.status.show(Status::AnimationFailed { spell: spell.to_string() });
                state.phase = Phase::Idle;
                self.surface.set_hint(true);
                return;
            }
        };
        self.mount(&mut state, Visual::idle(spell, source));
    }
}
