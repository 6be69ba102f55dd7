use std::path::PathBuf;
use std::time::Duration;

/// Where a program's combined stdout/stderr goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    File(PathBuf),
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    Always,
    OnFailure,
    Never,
}

/*
    @@@
    @should_restart();
    . Always restarts on any exit code, OnFailure only on a non-zero one, Never never does.
*/
pub fn should_restart(code: i32, policy: RestartPolicy) -> bool {
    match policy {
        RestartPolicy::Always => true,
        RestartPolicy::OnFailure => code != 0,
        RestartPolicy::Never => false,
    }
}

/// Immutable description of one supervised program, already resolved
/// against a data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub name: String,
    /// Executable followed by its arguments.
    pub command: Vec<String>,
    pub restart_always: bool,
    pub restart_on_failure: bool,
    pub output: OutputTarget,
    /// Directory the child starts in; the supervisor's own when unset.
    pub working_dir: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn new<I, S>(name: impl Into<String>, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            command: command.into_iter().map(Into::into).collect(),
            restart_always: false,
            restart_on_failure: false,
            output: OutputTarget::Discard,
            working_dir: None,
        }
    }

    pub fn restart_always(mut self, on: bool) -> Self {
        self.restart_always = on;
        self
    }

    pub fn restart_on_failure(mut self, on: bool) -> Self {
        self.restart_on_failure = on;
        self
    }

    pub fn output(mut self, output: OutputTarget) -> Self {
        self.output = output;
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// `restart_always` wins over `restart_on_failure`.
    pub fn restart_policy(&self) -> RestartPolicy {
        if self.restart_always {
            RestartPolicy::Always
        } else if self.restart_on_failure {
            RestartPolicy::OnFailure
        } else {
            RestartPolicy::Never
        }
    }

    pub fn display_command(&self) -> String {
        self.command.join(" ")
    }
}

/// Fixed intervals driving the supervision loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// How often a running child is checked for exit.
    pub poll_interval: Duration,
    /// Runs shorter than this count as fast failures and grow the backoff.
    pub fast_fail: Duration,
    /// Time a child gets to honour SIGTERM before it is killed.
    pub grace_period: Duration,
    pub backoff_floor: Duration,
    pub backoff_ceiling: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            fast_fail: Duration::from_secs(5),
            grace_period: Duration::from_secs(5),
            backoff_floor: Duration::from_secs(1),
            backoff_ceiling: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_restart_on_failure() {
        assert!(should_restart(1, RestartPolicy::OnFailure));
        assert!(should_restart(-1, RestartPolicy::OnFailure));
        assert!(!should_restart(0, RestartPolicy::OnFailure));
    }

    #[test]
    fn test_should_restart_always() {
        assert!(should_restart(0, RestartPolicy::Always));
        assert!(should_restart(123, RestartPolicy::Always));
    }

    #[test]
    fn test_should_restart_never() {
        assert!(!should_restart(0, RestartPolicy::Never));
        assert!(!should_restart(1, RestartPolicy::Never));
    }

    #[test]
    fn restart_always_takes_precedence() {
        let spec = ProcessSpec::new("p", ["true"])
            .restart_always(true)
            .restart_on_failure(true);
        assert_eq!(spec.restart_policy(), RestartPolicy::Always);

        let spec = ProcessSpec::new("p", ["true"]).restart_on_failure(true);
        assert_eq!(spec.restart_policy(), RestartPolicy::OnFailure);

        assert_eq!(ProcessSpec::new("p", ["true"]).restart_policy(), RestartPolicy::Never);
    }
}
