use std::fmt;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Running { pid: u32 },
    Exited { code: i32 },
    Stopped,
    Error,
}

impl Status {
    /// `Stopped` and `Error` end the current supervision run.
    pub fn is_final(&self) -> bool {
        matches!(self, Status::Stopped | Status::Error)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Running { pid } => write!(f, "RUNNING (PID: {pid})"),
            Status::Exited { code } => write!(f, "EXITED (Code: {code})"),
            Status::Stopped => f.write_str("STOPPED"),
            Status::Error => f.write_str("ERROR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub name: String,
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Status(StatusEvent),
    Log(LogEvent),
}

impl Event {
    pub fn name(&self) -> &str {
        match self {
            Event::Status(e) => &e.name,
            Event::Log(e) => &e.name,
        }
    }

    pub fn status(&self) -> Option<&Status> {
        match self {
            Event::Status(e) => Some(&e.status),
            Event::Log(_) => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Status(e) => write!(f, "[{}] status: {}", e.name, e.status),
            Event::Log(e) => write!(f, "[{}] {}", e.name, e.message),
        }
    }
}

/// Fan-out point owned by one supervisor.
#[derive(Debug, Default)]
pub struct EventPublisher {
    subscribers: Vec<UnboundedSender<Event>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Feeds events into an existing channel, e.g. a registry-wide one.
    pub fn attach(&mut self, sender: UnboundedSender<Event>) {
        self.subscribers.push(sender);
    }

    pub fn publish(&mut self, event: Event) {
        // dropped receivers are pruned
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn status(&mut self, name: &str, status: Status) {
        self.publish(Event::Status(StatusEvent {
            name: name.to_string(),
            status,
        }));
    }

    pub fn log(&mut self, name: &str, message: impl Into<String>) {
        self.publish(Event::Log(LogEvent {
            name: name.to_string(),
            message: message.into(),
        }));
    }
}
