use std::collections::{HashMap, HashSet};

use futures::future::join_all;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ConfigError;
use crate::events::Event;
use crate::runtime::{Phase, ProcessSupervisor, SupervisorHandle};
use crate::spec::{ProcessSpec, Timing};

struct Instance {
    handle: SupervisorHandle,
    task: JoinHandle<()>,
}

impl Instance {
    /// An instance asked to stop no longer counts, even if its task has not
    /// been polled yet.
    fn is_active(&self) -> bool {
        !self.handle.stop_requested()
            && self.handle.phase() != Phase::Terminated
            && !self.task.is_finished()
    }
}

/// Named collection of supervisors with at most one active instance per name.
///
/// Every instance publishes into one registry-wide channel; the receiver is
/// handed out by [`Registry::new`].
pub struct Registry {
    specs: Vec<ProcessSpec>,
    timing: Timing,
    instances: RwLock<HashMap<String, Instance>>,
    events: UnboundedSender<Event>,
}

impl Registry {
    pub fn new(
        specs: Vec<ProcessSpec>,
        timing: Timing,
    ) -> Result<(Self, UnboundedReceiver<Event>), ConfigError> {
        let mut seen = HashSet::new();
        for spec in &specs {
            if spec.name.is_empty() {
                return Err(ConfigError::EmptyName);
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(ConfigError::DuplicateName(spec.name.clone()));
            }
        }

        let (events, rx) = mpsc::unbounded_channel();
        let registry = Self {
            specs,
            timing,
            instances: RwLock::new(HashMap::new()),
            events,
        };
        Ok((registry, rx))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.name.as_str())
    }

    pub fn spec(&self, name: &str) -> Option<&ProcessSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /*
        @@@
        @start();
        . Unknown names and names with an active instance are no-ops returning false.
        . A previous instance that is still winding down after stop is awaited first, so two never overlap.
        . Otherwise builds a ProcessSupervisor wired to the registry channel, runs it on its own task and records it.
    */
    pub async fn start(&self, name: &str) -> bool {
        let Some(spec) = self.spec(name) else {
            warn!(program = %name, "no such program in config");
            return false;
        };

        let mut map = self.instances.write().await;
        if map.get(name).is_some_and(Instance::is_active) {
            debug!(program = %name, "already running");
            return false;
        }
        if let Some(previous) = map.remove(name) {
            if !previous.task.is_finished() && !previous.handle.stop().await {
                warn!(program = %name, "previous instance is still shutting down");
                map.insert(name.to_string(), previous);
                return false;
            }
            if let Err(e) = previous.task.await {
                warn!(program = %name, error = %e, "supervision task failed");
            }
        }

        let mut supervisor = ProcessSupervisor::new(spec.clone(), self.timing);
        supervisor.attach(self.events.clone());
        let handle = supervisor.handle();
        let task = tokio::spawn(supervisor.run());

        map.insert(name.to_string(), Instance { handle, task });
        info!(program = %name, "supervision started");
        true
    }

    /// Stops the named instance; returns `false` when there is nothing to stop
    /// or it did not terminate in time.
    pub async fn stop(&self, name: &str) -> bool {
        let handle = {
            let map = self.instances.read().await;
            match map.get(name) {
                Some(instance) if instance.is_active() => instance.handle.clone(),
                _ => {
                    debug!(program = %name, "not running, nothing to stop");
                    return false;
                }
            }
        };

        handle.stop().await
    }

    /// Returns how many instances were started.
    pub async fn start_all(&self) -> usize {
        let mut started = 0;
        for spec in &self.specs {
            if self.start(&spec.name).await {
                started += 1;
            }
        }
        started
    }

    /// Stops every active instance concurrently.
    pub async fn stop_all(&self) {
        let handles: Vec<SupervisorHandle> = {
            let map = self.instances.read().await;
            map.values()
                .filter(|i| i.is_active())
                .map(|i| i.handle.clone())
                .collect()
        };
        if handles.is_empty() {
            return;
        }

        info!(count = handles.len(), "stopping all programs");
        let stuck = join_all(handles.iter().map(SupervisorHandle::stop))
            .await
            .into_iter()
            .filter(|stopped| !stopped)
            .count();
        if stuck > 0 {
            warn!(stuck, "some programs did not stop in time");
        }
    }

    pub async fn is_active(&self, name: &str) -> bool {
        let map = self.instances.read().await;
        map.get(name).is_some_and(Instance::is_active)
    }

    /// Current phase of every configured program, in configuration order.
    /// Programs never started report [`Phase::Idle`].
    pub async fn statuses(&self) -> Vec<(String, Phase)> {
        let map = self.instances.read().await;
        self.specs
            .iter()
            .map(|spec| {
                let phase = map
                    .get(&spec.name)
                    .map_or(Phase::Idle, |i| i.handle.phase());
                (spec.name.clone(), phase)
            })
            .collect()
    }

    /// Stops everything and waits for every supervision task to finish.
    pub async fn shutdown(&self) {
        self.stop_all().await;

        let instances: Vec<(String, Instance)> = self.instances.write().await.drain().collect();
        for (name, instance) in instances {
            if let Err(e) = instance.task.await {
                warn!(program = %name, error = %e, "supervision task failed");
            }
        }
        info!("registry shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_are_rejected() {
        let specs = vec![
            ProcessSpec::new("web", ["true"]),
            ProcessSpec::new("web", ["false"]),
        ];
        assert!(matches!(
            Registry::new(specs, Timing::default()),
            Err(ConfigError::DuplicateName(name)) if name == "web"
        ));
    }

    #[test]
    fn empty_name_is_rejected() {
        let specs = vec![ProcessSpec::new("", ["true"])];
        assert!(matches!(
            Registry::new(specs, Timing::default()),
            Err(ConfigError::EmptyName)
        ));
    }

    #[tokio::test]
    async fn unknown_names_are_no_ops() {
        let (registry, _rx) = Registry::new(vec![], Timing::default()).unwrap();
        assert!(!registry.start("ghost").await);
        assert!(!registry.stop("ghost").await);
        assert!(!registry.is_active("ghost").await);
    }

    #[tokio::test]
    async fn never_started_programs_report_idle() {
        let specs = vec![ProcessSpec::new("a", ["true"]), ProcessSpec::new("b", ["true"])];
        let (registry, _rx) = Registry::new(specs, Timing::default()).unwrap();
        assert_eq!(
            registry.statuses().await,
            vec![("a".to_string(), Phase::Idle), ("b".to_string(), Phase::Idle)]
        );
    }
}
