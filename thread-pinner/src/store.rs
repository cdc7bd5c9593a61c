//! The `ConfigStore` owns the active rule set and publishes every change of it.

use {
    crate::{
        config::{self, build_rule_set, ConfigFormat},
        error::ConfigError,
        lock,
        rule::{RuleConfig, RuleSet},
    },
    crossbeam_channel::{unbounded, Receiver, Sender},
    log::{info, warn},
    std::{
        fs,
        path::{Path, PathBuf},
        sync::{Arc, Mutex},
    },
    taskpin_cpu_utils::Topology,
};

/// Sent to subscribers after a new rule set has been installed.
#[derive(Debug, Clone)]
pub struct RuleSetUpdate {
    pub old: Arc<RuleSet>,
    pub new: Arc<RuleSet>,
    /// Topology the new rules were resolved against
    pub topology: Arc<Topology>,
}

#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    topology: Mutex<Arc<Topology>>,
    rules: Mutex<Arc<RuleSet>>,
    subscribers: Mutex<Vec<Sender<RuleSetUpdate>>>,
    // Serializes load-and-install so concurrent reloads cannot interleave
    reload_lock: Mutex<()>,
}

impl ConfigStore {
    /// Load the rule file at `path`.
    pub fn open(path: impl Into<PathBuf>, topology: Arc<Topology>) -> Result<Self, ConfigError> {
        let path = path.into();
        let rules = config::load_rule_set(&path, &topology)?;
        info!(
            "Loaded {} rules ({} active) from {}",
            rules.len(),
            rules.active_count(),
            path.display()
        );
        Ok(Self {
            path,
            topology: Mutex::new(topology),
            rules: Mutex::new(Arc::new(rules)),
            subscribers: Mutex::default(),
            reload_lock: Mutex::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn topology(&self) -> Arc<Topology> {
        lock(&self.topology).clone()
    }

    /// Snapshot of the active rule set.
    pub fn rules(&self) -> Arc<RuleSet> {
        lock(&self.rules).clone()
    }

    /// Receive a [`RuleSetUpdate`] for every future change of the rule set.
    pub fn subscribe(&self) -> Receiver<RuleSetUpdate> {
        let (sender, receiver) = unbounded();
        lock(&self.subscribers).push(sender);
        receiver
    }

    /// Re-read the rule file. On any error the active rule set stays in
    /// force. Returns whether the rule set changed.
    pub fn reload(&self) -> Result<bool, ConfigError> {
        let _guard = lock(&self.reload_lock);
        let topology = self.topology();
        let rules = config::load_rule_set(&self.path, &topology)?;
        Ok(self.install(rules, topology))
    }

    /// Re-resolve the rule file against a freshly detected topology.
    pub fn refresh_topology(&self, topology: Topology) -> Result<bool, ConfigError> {
        let _guard = lock(&self.reload_lock);
        let topology = Arc::new(topology);
        let rules = config::load_rule_set(&self.path, &topology)?;
        *lock(&self.topology) = topology.clone();
        Ok(self.install(rules, topology))
    }

    /// Validate `records`, write them to the rule file in its current format
    /// and install them.
    pub fn replace_and_persist(&self, records: &[RuleConfig]) -> Result<bool, ConfigError> {
        let _guard = lock(&self.reload_lock);
        let topology = self.topology();
        let rules = build_rule_set(records, &topology)?;
        let format = fs::read_to_string(&self.path)
            .map(|content| ConfigFormat::detect(&content))
            .unwrap_or(ConfigFormat::Json);
        config::persist(&self.path, format, records)?;
        Ok(self.install(rules, topology))
    }

    fn install(&self, rules: RuleSet, topology: Arc<Topology>) -> bool {
        let mut active = lock(&self.rules);
        if **active == rules {
            info!("Rule file reloaded, no rule changed");
            return false;
        }
        let new = Arc::new(rules);
        let old = std::mem::replace(&mut *active, new.clone());
        drop(active);
        info!(
            "Installed {} rules ({} active), previously {}",
            new.len(),
            new.active_count(),
            old.len()
        );

        let update = RuleSetUpdate { old, new, topology };
        lock(&self.subscribers).retain(|subscriber| {
            let delivered = subscriber.send(update.clone()).is_ok();
            if !delivered {
                warn!("Dropping disconnected rule set subscriber");
            }
            delivered
        });
        true
    }
}
