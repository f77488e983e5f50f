//! The live rule set, swapped whole on reload.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use log::{info, warn};

use super::engine::RuleSet;
use super::loader::{load_rules, load_rules_from_str};
use super::RuleError;

/// Holds the current [`RuleSet`] snapshot.
///
/// Readers take an `Arc` snapshot and keep using it for the whole pass; a
/// reload only affects snapshots taken afterwards. A failed reload leaves the
/// previous set active.
pub struct RuleRegistry {
    current: RwLock<Arc<RuleSet>>,
    source: Option<PathBuf>,
}

impl RuleRegistry {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(rules)),
            source: None,
        }
    }

    /// Loads the initial set from `path` and remembers it for [`reload`](Self::reload).
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, RuleError> {
        let path = path.as_ref().to_path_buf();
        let rules = load_rules(&path)?;
        info!("Loaded {} rules from {}", rules.len(), path.display());
        Ok(Self {
            current: RwLock::new(Arc::new(rules)),
            source: Some(path),
        })
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn snapshot(&self) -> Arc<RuleSet> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, rules: RuleSet) {
        let next = Arc::new(rules);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Re-reads the source file. Returns the new rule count.
    pub fn reload(&self) -> Result<usize, RuleError> {
        let path = self.source.as_ref().ok_or(RuleError::NoSource)?;
        self.install(load_rules(path), &path.display().to_string())
    }

    pub fn reload_from_str(&self, content: &str) -> Result<usize, RuleError> {
        self.install(load_rules_from_str(content), "inline document")
    }

    fn install(&self, loaded: Result<RuleSet, RuleError>, origin: &str) -> Result<usize, RuleError> {
        match loaded {
            Ok(rules) => {
                let count = rules.len();
                self.replace(rules);
                info!("Reloaded {} rules from {}", count, origin);
                Ok(count)
            }
            Err(e) => {
                warn!("Rule reload from {} rejected, keeping current set: {}", origin, e);
                Err(e)
            }
        }
    }
}
