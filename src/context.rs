//! Host Capabilities
//!
//! The pieces of the hosting game server that the core needs: whether the
//! process is still running, and how many players it currently holds. They
//! are handed to components explicitly at construction.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use serde::Serialize;

/// Answers "is the owning process still active?"
pub trait ProcessLifecycle: Send + Sync {
    fn is_active(&self) -> bool;
}

/// Live player counts supplied by the host
pub trait PlayerCounts: Send + Sync {
    fn online_players(&self) -> u32;

    fn max_players(&self) -> u32;

    fn player_names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Lifecycle flag flipped off once at shutdown
#[derive(Debug)]
pub struct ActiveFlag(AtomicBool);

impl ActiveFlag {
    pub fn new() -> Self {
        Self(AtomicBool::new(true))
    }

    pub fn deactivate(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for ActiveFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessLifecycle for ActiveFlag {
    fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Player counts set by whoever embeds the core
#[derive(Debug, Default)]
pub struct StaticPlayerCounts {
    online: AtomicU32,
    max: AtomicU32,
    names: RwLock<Vec<String>>,
}

impl StaticPlayerCounts {
    pub fn new(max: u32) -> Self {
        Self {
            online: AtomicU32::new(0),
            max: AtomicU32::new(max),
            names: RwLock::new(Vec::new()),
        }
    }

    pub fn set(&self, online: u32, max: u32) {
        self.online.store(online, Ordering::Release);
        self.max.store(max, Ordering::Release);
    }

    pub fn set_players(&self, names: Vec<String>) {
        self.online.store(names.len() as u32, Ordering::Release);
        if let Ok(mut guard) = self.names.write() {
            *guard = names;
        }
    }
}

impl PlayerCounts for StaticPlayerCounts {
    fn online_players(&self) -> u32 {
        self.online.load(Ordering::Acquire)
    }

    fn max_players(&self) -> u32 {
        self.max.load(Ordering::Acquire)
    }

    fn player_names(&self) -> Vec<String> {
        self.names.read().map(|n| n.clone()).unwrap_or_default()
    }
}

/// Capabilities passed to the control-side components
#[derive(Clone)]
pub struct HostContext {
    lifecycle: Arc<dyn ProcessLifecycle>,
    players: Arc<dyn PlayerCounts>,
}

impl HostContext {
    pub fn new(lifecycle: Arc<dyn ProcessLifecycle>, players: Arc<dyn PlayerCounts>) -> Self {
        Self { lifecycle, players }
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle.is_active()
    }

    pub fn players(&self) -> &dyn PlayerCounts {
        self.players.as_ref()
    }
}

impl fmt::Debug for HostContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostContext")
            .field("active", &self.is_active())
            .field("online_players", &self.players.online_players())
            .field("max_players", &self.players.max_players())
            .finish()
    }
}

/// Features gated on a schema check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Feature {
    Auth,
    Bans,
    Network,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feature::Auth => write!(f, "auth"),
            Feature::Bans => write!(f, "bans"),
            Feature::Network => write!(f, "network"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum FeatureState {
    /// Schema check not finished yet
    #[default]
    Pending,
    Enabled,
    /// Schema check failed; the feature refuses to run
    Disabled,
}

/// State of every gated feature
#[derive(Debug, Clone, Default, Serialize)]
pub struct Features {
    pub auth: FeatureState,
    pub bans: FeatureState,
    pub network: FeatureState,
}

impl Features {
    pub fn get(&self, feature: Feature) -> FeatureState {
        match feature {
            Feature::Auth => self.auth,
            Feature::Bans => self.bans,
            Feature::Network => self.network,
        }
    }

    /// Record a check outcome; one failed check keeps the feature disabled
    pub fn record(&mut self, feature: Feature, ok: bool) {
        let slot = match feature {
            Feature::Auth => &mut self.auth,
            Feature::Bans => &mut self.bans,
            Feature::Network => &mut self.network,
        };
        *slot = match (*slot, ok) {
            (FeatureState::Disabled, _) => FeatureState::Disabled,
            (_, true) => FeatureState::Enabled,
            (_, false) => FeatureState::Disabled,
        };
    }

    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.get(feature) == FeatureState::Enabled
    }
}

/// Contexts that track feature availability
pub trait FeatureContext {
    fn features(&self) -> &Features;

    fn features_mut(&mut self) -> &mut Features;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_flag() {
        let flag = ActiveFlag::new();
        assert!(flag.is_active());
        flag.deactivate();
        assert!(!flag.is_active());
    }

    #[test]
    fn test_static_player_counts() {
        let counts = StaticPlayerCounts::new(50);
        assert_eq!(counts.max_players(), 50);
        counts.set_players(vec!["alex".into(), "steve".into()]);
        assert_eq!(counts.online_players(), 2);
        assert_eq!(counts.player_names(), vec!["alex", "steve"]);
    }

    #[test]
    fn test_failed_check_keeps_feature_disabled() {
        let mut features = Features::default();
        assert_eq!(features.get(Feature::Network), FeatureState::Pending);

        features.record(Feature::Network, false);
        features.record(Feature::Network, true);
        assert_eq!(features.get(Feature::Network), FeatureState::Disabled);

        features.record(Feature::Auth, true);
        assert!(features.is_enabled(Feature::Auth));
    }
}
