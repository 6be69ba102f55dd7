use std::fs::OpenOptions;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::error::SupervisorError;
use crate::events::{Event, EventPublisher, Status};
use crate::spec::{should_restart, OutputTarget, ProcessSpec, Timing};

/// Where a supervisor is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Starting,
    Running,
    Exited,
    Stopping,
    Terminated,
}

/// Cloneable control side of a [`ProcessSupervisor`], usable from any task.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    name: String,
    stop: Arc<watch::Sender<bool>>,
    phase: watch::Receiver<Phase>,
    wait_limit: Duration,
}

impl SupervisorHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    /*
        @@@
        @stop();
        . Raises the stop flag; the supervision loop owns the child and performs SIGTERM, grace wait and SIGKILL.
        . Waits for the loop to report Terminated, bounded by grace period + poll interval + 1s.
        . Returns at once if the loop never started or already finished, so repeated calls are harmless.
        . Returns false when the loop is still alive after the wait; its child may still be running then.
    */
    pub async fn stop(&self) -> bool {
        if !self.stop.send_replace(true) {
            info!(program = %self.name, "stop requested");
        }

        let mut phase = self.phase.clone();
        if matches!(*phase.borrow(), Phase::Idle | Phase::Terminated) {
            return true;
        }

        let finished = timeout(self.wait_limit, phase.wait_for(|p| *p == Phase::Terminated))
            .await
            .is_ok();
        if finished {
            debug!(program = %self.name, "supervision terminated");
        } else {
            error!(
                program = %self.name,
                waited_ms = self.wait_limit.as_millis() as u64,
                phase = ?self.phase(),
                "supervisor did not terminate in time, child may still be alive"
            );
        }
        finished
    }
}

/// Owns one configured program: spawns it, watches it, restarts it per
/// policy and terminates it when asked to.
pub struct ProcessSupervisor {
    spec: ProcessSpec,
    timing: Timing,
    events: EventPublisher,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
    phase_tx: watch::Sender<Phase>,
    phase_rx: watch::Receiver<Phase>,
}

enum Watch {
    Exited(ExitStatus),
    StopRequested,
}

impl ProcessSupervisor {
    pub fn new(spec: ProcessSpec, timing: Timing) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (phase_tx, phase_rx) = watch::channel(Phase::Idle);
        Self {
            spec,
            timing,
            events: EventPublisher::new(),
            stop_tx: Arc::new(stop_tx),
            stop_rx,
            phase_tx,
            phase_rx,
        }
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    pub fn subscribe(&mut self) -> UnboundedReceiver<Event> {
        self.events.subscribe()
    }

    pub fn attach(&mut self, sender: UnboundedSender<Event>) {
        self.events.attach(sender);
    }

    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            name: self.spec.name.clone(),
            stop: Arc::clone(&self.stop_tx),
            phase: self.phase_rx.clone(),
            wait_limit: self.timing.grace_period + self.timing.poll_interval + Duration::from_secs(1),
        }
    }

    /*
        @@@
        @run();
        . Spawns the child with stdout/stderr appended to the output target and publishes RUNNING with its pid.
        . Polls for exit every poll_interval; a stop request interrupts the poll and goes straight to termination.
        . On natural exit publishes EXITED, then restarts per policy, sleeping the backoff delay after a fast failure.
        . Output or spawn failures publish ERROR and are never retried.
        . Always ends with STOPPED and a closing log line.
    */
    pub async fn run(self) {
        let ProcessSupervisor {
            spec,
            timing,
            mut events,
            stop_tx: _keep_stop_channel_open,
            mut stop_rx,
            phase_tx,
            phase_rx: _,
        } = self;
        let name = spec.name.as_str();
        let policy = spec.restart_policy();
        let mut backoff = Backoff::new(&timing);

        loop {
            // stop() skips waiting while Idle, so Starting must be visible
            // before the flag is read.
            phase_tx.send_replace(Phase::Starting);
            if *stop_rx.borrow() {
                break;
            }

            events.log(name, format!("Starting command: {}", spec.display_command()));
            let started_at = Instant::now();
            let mut child = match spawn_child(&spec) {
                Ok(child) => child,
                Err(e) => {
                    error!(program = %name, error = %e, "cannot start program");
                    events.log(name, format!("Error: {e}"));
                    events.status(name, Status::Error);
                    break;
                }
            };

            let pid = child.id().unwrap_or_default();
            info!(program = %name, pid, "spawned");
            phase_tx.send_replace(Phase::Running);
            events.status(name, Status::Running { pid });

            let status = match watch_child(&mut child, &mut stop_rx, timing.poll_interval).await {
                Ok(Watch::Exited(status)) => status,
                Ok(Watch::StopRequested) => {
                    phase_tx.send_replace(Phase::Stopping);
                    events.log(name, "Received stop signal.");
                    match terminate(name, &mut child, timing.grace_period).await {
                        Ok(code) => {
                            events.log(name, format!("Process terminated with code {code}."));
                        }
                        Err(e) => {
                            error!(program = %name, error = %e, "termination failed");
                            events.log(name, format!("Error: {e}"));
                            events.status(name, Status::Error);
                        }
                    }
                    break;
                }
                Err(e) => {
                    error!(program = %name, pid, error = %e, "lost track of child");
                    events.log(name, format!("Error: {e}"));
                    events.status(name, Status::Error);
                    if let Err(e) = child.kill().await {
                        error!(program = %name, pid, error = %e, "failed to SIGKILL");
                    }
                    break;
                }
            };

            phase_tx.send_replace(Phase::Exited);
            let code = exit_code(status);
            let uptime = started_at.elapsed();
            info!(program = %name, pid, exit_code = code, uptime_ms = uptime.as_millis() as u64, "child exited");
            events.log(name, format!("Process exited with code {code}."));
            events.status(name, Status::Exited { code });

            if !should_restart(code, policy) {
                events.log(name, "Process finished and will not be restarted.");
                break;
            }

            if let Some(delay) = backoff.after_run(uptime) {
                warn!(program = %name, delay_ms = delay.as_millis() as u64, "fast failure, backing off");
                events.log(
                    name,
                    format!("Process failed quickly. Waiting {:.1}s.", delay.as_secs_f64()),
                );
                if sleep_or_stop(&mut stop_rx, delay).await {
                    events.log(name, "Received stop signal.");
                    break;
                }
            }
        }

        events.status(name, Status::Stopped);
        events.log(name, "Supervision finished.");
        info!(program = %name, "supervision finished");
        phase_tx.send_replace(Phase::Terminated);
    }
}

fn spawn_child(spec: &ProcessSpec) -> Result<Child, SupervisorError> {
    let (program, args) = spec.command.split_first().ok_or(SupervisorError::EmptyCommand)?;
    let (stdout, stderr) = open_output(&spec.output)?;

    let mut command = Command::new(program);
    if let Some(dir) = &spec.working_dir {
        command.current_dir(dir);
    }
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| SupervisorError::Spawn {
            program: program.clone(),
            source,
        })
}

/*
    @@@
    @open_output();
    . Opens the output file in append mode (creating it and its parent directory) and shares it between stdout and stderr.
    . std::fs::File is unbuffered, so whatever the child writes reaches the file even if it crashes.
*/
fn open_output(target: &OutputTarget) -> Result<(Stdio, Stdio), SupervisorError> {
    let path = match target {
        OutputTarget::Discard => return Ok((Stdio::null(), Stdio::null())),
        OutputTarget::File(path) => path,
    };
    let open_err = |source: io::Error| SupervisorError::OutputOpen {
        path: path.clone(),
        source,
    };

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).ok();
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(open_err)?;
    let stderr = file.try_clone().map_err(open_err)?;
    Ok((Stdio::from(file), Stdio::from(stderr)))
}

async fn watch_child(
    child: &mut Child,
    stop_rx: &mut watch::Receiver<bool>,
    poll: Duration,
) -> io::Result<Watch> {
    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *stop_rx.borrow() {
            return Ok(Watch::StopRequested);
        }
        if let Some(status) = child.try_wait()? {
            return Ok(Watch::Exited(status));
        }
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop_rx.wait_for(|stop| *stop) => {}
        }
    }
}

/// Returns `true` when the sleep was cut short by a stop request.
async fn sleep_or_stop(stop_rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    if *stop_rx.borrow() {
        return true;
    }
    tokio::select! {
        _ = sleep(delay) => {}
        _ = stop_rx.wait_for(|stop| *stop) => {}
    }
    *stop_rx.borrow()
}

/*
    @@@
    @terminate();
    . Sends SIGTERM and waits up to the grace period for the child to exit.
    . Escalates to SIGKILL when the grace period runs out; the child is reaped either way.
*/
async fn terminate(name: &str, child: &mut Child, grace: Duration) -> Result<i32, SupervisorError> {
    let pid = child.id().unwrap_or_default();
    let term_err = |source: io::Error| SupervisorError::Terminate { pid, source };

    if let Some(status) = child.try_wait().map_err(term_err)? {
        return Ok(exit_code(status));
    }

    request_exit(name, child);

    match timeout(grace, child.wait()).await {
        Ok(status) => {
            let code = exit_code(status.map_err(term_err)?);
            info!(program = %name, pid, exit_code = code, "exited after stop signal");
            Ok(code)
        }
        Err(_) => {
            warn!(program = %name, pid, grace_ms = grace.as_millis() as u64, "sent SIGKILL after timeout");
            child.kill().await.map_err(term_err)?;
            let status = child.wait().await.map_err(term_err)?;
            Ok(exit_code(status))
        }
    }
}

#[cfg(unix)]
fn request_exit(name: &str, child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        info!(program = %name, pid, signal = ?Signal::SIGTERM, "sending stop signal");
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!(program = %name, pid, error = %e, "failed to send SIGTERM");
        }
    }
}

#[cfg(not(unix))]
fn request_exit(name: &str, child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!(program = %name, error = %e, "failed to request exit");
    }
}

/// Exit code of a finished child; death by signal maps to `128 + signo`.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return 128 + sig;
        }
    }
    -1
}
