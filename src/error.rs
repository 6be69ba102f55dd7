use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures raised while supervising one program.
///
/// None of these escape [`crate::runtime::ProcessSupervisor::run`]; the loop
/// turns each of them into an `ERROR` status followed by a terminal `STOPPED`.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("command is empty")]
    EmptyCommand,

    #[error("cannot open output {}: {source}", path.display())]
    OutputOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to terminate pid {pid}: {source}")]
    Terminate {
        pid: u32,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("program with an empty name")]
    EmptyName,

    #[error("duplicate program name `{0}`")]
    DuplicateName(String),

    #[error("program `{0}` has an empty command")]
    EmptyCommand(String),

    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
