use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::events::{Event, Status};

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: &Event);
}

/// Mirrors events into the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl EventSink for TracingSink {
    async fn deliver(&self, event: &Event) {
        match event {
            Event::Status(e) => match e.status {
                Status::Error => error!(program = %e.name, status = %e.status, "status changed"),
                Status::Exited { code } if code != 0 => {
                    warn!(program = %e.name, status = %e.status, "status changed")
                }
                _ => info!(program = %e.name, status = %e.status, "status changed"),
            },
            Event::Log(e) => info!(program = %e.name, "{}", e.message),
        }
    }
}

/// Writes timestamped event lines to a terminal or any other async writer.
pub struct ConsoleSink<W> {
    out: Mutex<W>,
}

impl ConsoleSink<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

#[async_trait]
impl<W> EventSink for ConsoleSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn deliver(&self, event: &Event) {
        let line = format!("{} {}\n", Local::now().format("%Y-%m-%d %H:%M:%S"), event);
        let mut out = self.out.lock().await;
        if let Err(e) = out.write_all(line.as_bytes()).await {
            warn!(error = %e, "console write failed");
            return;
        }
        let _ = out.flush().await;
    }
}

/// Runs until every sender feeding `rx` is gone.
pub async fn pump(mut rx: UnboundedReceiver<Event>, sinks: Vec<Arc<dyn EventSink>>) {
    while let Some(event) = rx.recv().await {
        for sink in &sinks {
            sink.deliver(&event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{LogEvent, StatusEvent};
    use tokio::sync::mpsc;
    use tracing_test::traced_test;

    fn status(name: &str, status: Status) -> Event {
        Event::Status(StatusEvent {
            name: name.into(),
            status,
        })
    }

    #[tokio::test]
    async fn console_lines_are_timestamped() {
        let sink = ConsoleSink::new(Vec::new());
        sink.deliver(&status("web", Status::Running { pid: 7 })).await;
        sink.deliver(&Event::Log(LogEvent {
            name: "web".into(),
            message: "hello".into(),
        }))
        .await;

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[web] status: RUNNING (PID: 7)"));
        assert!(lines[1].ends_with("[web] hello"));
        // "YYYY-MM-DD HH:MM:SS " prefix
        assert_eq!(lines[0].as_bytes()[4], b'-');
        assert_eq!(lines[0].as_bytes()[19], b' ');
    }

    #[tokio::test]
    #[traced_test]
    async fn tracing_sink_logs_events() {
        TracingSink.deliver(&status("db", Status::Error)).await;
        assert!(logs_contain("status changed"));
        assert!(logs_contain("ERROR"));
    }

    #[tokio::test]
    async fn pump_preserves_order_and_ends_with_senders() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Arc::new(ConsoleSink::new(Vec::new()));

        tx.send(status("a", Status::Running { pid: 1 })).unwrap();
        tx.send(status("a", Status::Exited { code: 0 })).unwrap();
        tx.send(status("a", Status::Stopped)).unwrap();
        drop(tx);

        pump(rx, vec![sink.clone() as Arc<dyn EventSink>]).await;

        let sink = Arc::try_unwrap(sink).ok().unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let statuses: Vec<&str> = text.lines().map(|l| l.split("status: ").nth(1).unwrap()).collect();
        assert_eq!(statuses, vec!["RUNNING (PID: 1)", "EXITED (Code: 0)", "STOPPED"]);
    }
}
