use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fs, path::Path, time::Duration};

use crate::error::ConfigError;
use crate::paths::resolve_output;
use crate::spec::{ProcessSpec, Timing};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ProgramConfig {
    pub name: String,
    pub command: Vec<String>,
    #[serde(default, alias = "restart_always")]
    pub restart: bool,
    #[serde(default)]
    pub restart_on_failure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Optional `supervisor:` section overriding the loop timings.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TimingConfig {
    pub poll_interval_ms: u64,
    pub fast_fail_secs: u64,
    pub grace_period_secs: u64,
    pub backoff_floor_secs: u64,
    pub backoff_ceiling_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        let t = Timing::default();
        Self {
            poll_interval_ms: t.poll_interval.as_millis() as u64,
            fast_fail_secs: t.fast_fail.as_secs(),
            grace_period_secs: t.grace_period.as_secs(),
            backoff_floor_secs: t.backoff_floor.as_secs(),
            backoff_ceiling_secs: t.backoff_ceiling.as_secs(),
        }
    }
}

impl TimingConfig {
    pub fn timing(&self) -> Timing {
        Timing {
            // a zero poll interval would make tokio's interval panic
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            fast_fail: Duration::from_secs(self.fast_fail_secs),
            grace_period: Duration::from_secs(self.grace_period_secs),
            backoff_floor: Duration::from_secs(self.backoff_floor_secs),
            backoff_ceiling: Duration::from_secs(self.backoff_ceiling_secs),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub apps: Vec<ProgramConfig>,
    #[serde(default)]
    pub supervisor: TimingConfig,
}

impl Config {
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Names must be non-empty and unique, commands non-empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for app in &self.apps {
            if app.name.trim().is_empty() {
                return Err(ConfigError::EmptyName);
            }
            if !seen.insert(app.name.as_str()) {
                return Err(ConfigError::DuplicateName(app.name.clone()));
            }
            if app.command.is_empty() || app.command[0].trim().is_empty() {
                return Err(ConfigError::EmptyCommand(app.name.clone()));
            }
        }
        Ok(())
    }

    /// Turns every app into a [`ProcessSpec`] with its output path resolved
    /// against `data_dir`.
    pub fn resolve(&self, data_dir: &Path) -> Result<Vec<ProcessSpec>, ConfigError> {
        self.validate()?;
        Ok(self
            .apps
            .iter()
            .map(|app| ProcessSpec {
                name: app.name.clone(),
                command: app.command.clone(),
                restart_always: app.restart,
                restart_on_failure: app.restart_on_failure,
                output: resolve_output(data_dir, app.output.as_deref()),
                working_dir: None,
            })
            .collect())
    }

    /// Like [`Config::resolve`], with every program started inside `data_dir`
    /// so relative commands resolve there.
    pub fn resolve_in_data_dir(&self, data_dir: &Path) -> Result<Vec<ProcessSpec>, ConfigError> {
        let mut specs = self.resolve(data_dir)?;
        for spec in &mut specs {
            spec.working_dir = Some(data_dir.to_path_buf());
        }
        Ok(specs)
    }

    pub fn timing(&self) -> Timing {
        self.supervisor.timing()
    }
}

/*
    @@@
    @parser();
    . Reads the config file and hands it to serde_yaml; JSON documents parse too since YAML is a superset.
    . I/O and syntax errors come back as ConfigError carrying the path.
*/
pub fn parser(path: &Path) -> Result<Config, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Config::from_yaml(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/*
    @@@
    @load_or_create();
    . Writes an empty default config when the file does not exist yet, then returns it.
    . Existing files go through parser().
*/
pub fn load_or_create(path: &Path) -> Result<Config, ConfigError> {
    if path.exists() {
        return parser(path);
    }

    let config = Config::default();
    let text = serde_yaml::to_string(&config).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let write_err = |source: std::io::Error| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(write_err)?;
    }
    fs::write(path, text).map_err(write_err)?;
    tracing::info!(path = %path.display(), "created default config");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::OutputTarget;

    const YAML: &str = r#"
apps:
  - name: web
    command: ["python3", "-m", "http.server"]
    restart: true
    output: web.log
  - name: worker
    command: ["./worker", "--once"]
    restart_on_failure: true
supervisor:
  grace_period_secs: 2
"#;

    #[test]
    fn parses_yaml_with_defaults() {
        let cfg = Config::from_yaml(YAML).unwrap();
        assert_eq!(cfg.apps.len(), 2);
        assert!(cfg.apps[0].restart);
        assert!(!cfg.apps[0].restart_on_failure);
        assert_eq!(cfg.apps[1].output, None);

        let timing = cfg.timing();
        assert_eq!(timing.grace_period, Duration::from_secs(2));
        assert_eq!(timing.poll_interval, Duration::from_millis(500));
        assert_eq!(timing.backoff_ceiling, Duration::from_secs(60));
    }

    #[test]
    fn parses_json_documents() {
        let json = r#"{"apps": [{"name": "echo", "command": ["printf", "hi"], "restart_always": false}]}"#;
        let cfg = Config::from_yaml(json).unwrap();
        assert_eq!(cfg.apps[0].command, vec!["printf", "hi"]);
        assert_eq!(cfg.supervisor, TimingConfig::default());
    }

    #[test]
    fn resolve_builds_specs() {
        let cfg = Config::from_yaml(YAML).unwrap();
        let specs = cfg.resolve(Path::new("/data")).unwrap();
        assert_eq!(specs[0].output, OutputTarget::File("/data/web.log".into()));
        assert_eq!(specs[1].output, OutputTarget::Discard);
        assert!(specs[1].restart_on_failure);
        assert_eq!(specs[1].working_dir, None);
    }

    #[test]
    fn service_specs_run_in_data_dir() {
        let cfg = Config::from_yaml(YAML).unwrap();
        let specs = cfg.resolve_in_data_dir(Path::new("/data")).unwrap();
        assert!(specs
            .iter()
            .all(|s| s.working_dir.as_deref() == Some(Path::new("/data"))));
        assert_eq!(specs[1].command, vec!["./worker", "--once"]);
    }

    #[test]
    fn validate_rejects_bad_entries() {
        let dup = "apps:\n  - {name: a, command: [x]}\n  - {name: a, command: [y]}\n";
        assert!(matches!(
            Config::from_yaml(dup).unwrap().validate(),
            Err(ConfigError::DuplicateName(n)) if n == "a"
        ));

        let empty_cmd = "apps:\n  - {name: a, command: []}\n";
        assert!(matches!(
            Config::from_yaml(empty_cmd).unwrap().validate(),
            Err(ConfigError::EmptyCommand(n)) if n == "a"
        ));

        let no_name = "apps:\n  - {name: '', command: [x]}\n";
        assert!(matches!(
            Config::from_yaml(no_name).unwrap().validate(),
            Err(ConfigError::EmptyName)
        ));
    }

    #[test]
    fn load_or_create_writes_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(crate::paths::CONFIG_FILE);

        let cfg = load_or_create(&path).unwrap();
        assert!(cfg.apps.is_empty());
        assert!(path.exists());
        assert_eq!(parser(&path).unwrap(), cfg);
    }

    #[test]
    fn parser_reports_path_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yml");
        fs::write(&path, "apps: [unclosed").unwrap();

        let err = parser(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("broken.yml"));
    }
}
