pub mod backoff;
pub mod control;
pub mod error;
pub mod events;
pub mod logger;
pub mod observer;
pub mod parse;
pub mod paths;
pub mod runtime;
pub mod shell;
pub mod spec;

pub use control::Registry;
pub use error::{ConfigError, SupervisorError};
pub use events::{Event, LogEvent, Status, StatusEvent};
pub use runtime::{Phase, ProcessSupervisor, SupervisorHandle};
pub use spec::{OutputTarget, ProcessSpec, RestartPolicy, Timing};
