use std::ffi::OsString;
use std::fmt;
use std::io::Stdout;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};

use offload_frame::{FrameConfig, FrameError, FrameReader, FrameWriter, CONTROL, ENVELOPE};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::{Result, TransportError};
use crate::scope::{Outbox, PostMessage, WorkerScope};
use crate::unit::{ExecutionUnit, ListenerSlot, UnitFault, UnitListener};

/// CONTROL payload asking a process worker to stop reading.
pub const SHUTDOWN_REQUEST: &[u8] = br#"{"type":"shutdown"}"#;

/// Options for spawning a [`ProcessUnit`].
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Arguments passed to the worker executable.
    pub args: Vec<OsString>,
    /// Extra environment variables for the worker.
    pub env: Vec<(OsString, OsString)>,
    /// Framing limits for both directions.
    pub frame: FrameConfig,
}

/// An execution unit backed by a child process.
///
/// Envelopes travel as JSON on the ENVELOPE channel of the child's
/// stdin/stdout; the child's stderr is inherited.
pub struct ProcessUnit {
    program: PathBuf,
    pid: u32,
    child: Mutex<Child>,
    writer: Mutex<FrameWriter<ChildStdin>>,
    slot: Arc<ListenerSlot>,
}

impl ProcessUnit {
    /// Spawn `program` as a worker process.
    pub fn spawn(program: impl AsRef<Path>, options: ProcessOptions) -> Result<Self> {
        let program = program.as_ref().to_path_buf();
        let what = format!("process unit {}", program.display());

        let mut child = Command::new(&program)
            .args(&options.args)
            .envs(options.env.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| TransportError::Spawn {
                what: what.clone(),
                source,
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(TransportError::Io(std::io::Error::other(
                "worker stdio was not captured",
            )));
        };

        let pid = child.id();
        let slot = Arc::new(ListenerSlot::default());
        let reader = FrameReader::with_config(stdout, options.frame.clone());
        let reader_slot = Arc::clone(&slot);
        let pump = std::thread::Builder::new()
            .name(format!("offload-process-{pid}"))
            .spawn(move || pump_worker_frames(reader, reader_slot));
        if let Err(source) = pump {
            let _ = child.kill();
            let _ = child.wait();
            return Err(TransportError::Spawn { what, source });
        }

        debug!(pid, program = %program.display(), "process unit started");
        Ok(Self {
            program,
            pid,
            child: Mutex::new(child),
            writer: Mutex::new(FrameWriter::with_config(stdin, options.frame)),
            slot,
        })
    }

    /// OS process id of the worker.
    pub fn id(&self) -> u32 {
        self.pid
    }
}

impl ExecutionUnit for ProcessUnit {
    fn post(&self, message: Value) -> Result<()> {
        if self.slot.is_disposed() {
            return Err(TransportError::Disposed);
        }
        // Once the reader is gone nothing would ever answer this message.
        if self.slot.is_closed() {
            return Err(TransportError::Closed);
        }
        let payload = serde_json::to_vec(&message)?;
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(ENVELOPE, &payload)?;
        Ok(())
    }

    fn set_listener(&self, listener: Option<Arc<dyn UnitListener>>) {
        self.slot.set(listener);
    }

    fn dispose(&self) {
        if !self.slot.mark_disposed() {
            return;
        }
        self.slot.set(None);

        if let Err(err) = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(CONTROL, SHUTDOWN_REQUEST)
        {
            trace!(pid = self.pid, error = %err, "shutdown request not delivered");
        }

        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = child.kill();
        match child.wait() {
            Ok(status) => debug!(pid = self.pid, %status, "process unit disposed"),
            Err(err) => warn!(pid = self.pid, error = %err, "failed to reap process unit"),
        }
    }

    fn is_disposed(&self) -> bool {
        self.slot.is_disposed()
    }
}

impl Drop for ProcessUnit {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for ProcessUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessUnit")
            .field("program", &self.program)
            .field("pid", &self.pid)
            .field("disposed", &self.slot.is_disposed())
            .field("closed", &self.slot.is_closed())
            .finish()
    }
}

fn pump_worker_frames(mut reader: FrameReader<ChildStdout>, slot: Arc<ListenerSlot>) {
    let fault = loop {
        match reader.read_frame() {
            Ok(frame) if frame.channel == ENVELOPE => {
                match serde_json::from_slice::<Value>(&frame.payload) {
                    Ok(message) => slot.deliver_message(message),
                    Err(err) => slot.deliver_fault(UnitFault::new(format!(
                        "undecodable message from worker: {err}"
                    ))),
                }
            }
            Ok(frame) => trace!(channel = frame.channel, "ignoring non-envelope frame"),
            Err(FrameError::Closed) => break UnitFault::new("worker exited"),
            Err(err) => break UnitFault::new(format!("worker stream failed: {err}")),
        }
    };
    // Closed first: a listener reacting to the fault must already see posts
    // refused.
    slot.mark_closed();
    slot.deliver_fault(fault);
}

/// Worker scope over this process's own stdin/stdout.
///
/// This is the callee half of a [`ProcessUnit`]: a worker executable builds
/// its scope here and serves calls until the parent closes stdin or sends a
/// CONTROL shutdown frame.
pub fn stdio_scope(config: FrameConfig) -> Result<WorkerScope> {
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    let reader = FrameReader::with_config(std::io::stdin(), config.clone());
    std::thread::Builder::new()
        .name("offload-stdin".to_string())
        .spawn(move || pump_parent_frames(reader, inbox_tx))
        .map_err(|source| TransportError::Spawn {
            what: "stdin reader".to_string(),
            source,
        })?;

    let writer = FrameWriter::with_config(std::io::stdout(), config);
    Ok(WorkerScope::new(
        inbox_rx,
        Outbox::new(StdoutOutbox(Mutex::new(writer))),
    ))
}

fn pump_parent_frames(
    mut reader: FrameReader<std::io::Stdin>,
    inbox: mpsc::UnboundedSender<Value>,
) {
    loop {
        match reader.read_frame() {
            Ok(frame) if frame.channel == CONTROL => {
                debug!("shutdown requested by parent");
                return;
            }
            Ok(frame) if frame.channel == ENVELOPE => {
                // Undecodable payloads still reach the dispatcher, which
                // answers them as malformed messages.
                let message = serde_json::from_slice(&frame.payload).unwrap_or(Value::Null);
                if inbox.send(message).is_err() {
                    return;
                }
            }
            Ok(frame) => trace!(channel = frame.channel, "ignoring unknown frame"),
            Err(FrameError::Closed) => return,
            Err(err) => {
                warn!(error = %err, "parent frame stream failed");
                return;
            }
        }
    }
}

struct StdoutOutbox(Mutex<FrameWriter<Stdout>>);

impl PostMessage for StdoutOutbox {
    fn post_message(&self, message: Value) -> Result<()> {
        let payload = serde_json::to_vec(&message)?;
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(ENVELOPE, &payload)?;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    struct Forward(std_mpsc::Sender<std::result::Result<Value, UnitFault>>);

    impl UnitListener for Forward {
        fn on_message(&self, message: Value) {
            let _ = self.0.send(Ok(message));
        }

        fn on_fault(&self, fault: UnitFault) {
            let _ = self.0.send(Err(fault));
        }
    }

    fn listen(unit: &ProcessUnit) -> std_mpsc::Receiver<std::result::Result<Value, UnitFault>> {
        let (tx, rx) = std_mpsc::channel();
        unit.set_listener(Some(Arc::new(Forward(tx))));
        rx
    }

    #[test]
    fn cat_echoes_envelope_frames() {
        let unit = ProcessUnit::spawn("cat", ProcessOptions::default()).unwrap();
        let events = listen(&unit);

        unit.post(json!({"id": 1, "args": [1, 2]})).unwrap();

        let echoed = events.recv_timeout(WAIT).unwrap().unwrap();
        assert_eq!(echoed, json!({"id": 1, "args": [1, 2]}));
    }

    #[test]
    fn child_exit_is_reported_as_fault() {
        let options = ProcessOptions {
            args: vec!["-c".into(), "head -c 1 > /dev/null".into()],
            ..ProcessOptions::default()
        };
        let unit = ProcessUnit::spawn("sh", options).unwrap();
        let events = listen(&unit);

        unit.post(json!("wake")).unwrap();

        let fault = events.recv_timeout(WAIT).unwrap().unwrap_err();
        assert_eq!(fault.message, "worker exited");
    }

    #[test]
    fn unreadable_output_closes_the_unit() {
        let options = ProcessOptions {
            args: vec!["-c".into(), "printf 'not a frame'; exec cat > /dev/null".into()],
            ..ProcessOptions::default()
        };
        let unit = ProcessUnit::spawn("sh", options).unwrap();
        // Give the reader time to fail before anyone listens.
        std::thread::sleep(Duration::from_millis(200));
        let events = listen(&unit);

        let fault = events.recv_timeout(WAIT).unwrap().unwrap_err();
        assert_eq!(
            fault.message,
            "worker stream failed: invalid frame marker (expected \"OF\")"
        );
        assert!(matches!(
            unit.post(json!({"id": 1, "args": []})),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let err = ProcessUnit::spawn(
            "/nonexistent/offload-worker-binary",
            ProcessOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::Spawn { .. }));
    }

    #[test]
    fn dispose_kills_child_and_rejects_posts() {
        let unit = ProcessUnit::spawn("cat", ProcessOptions::default()).unwrap();
        let events = listen(&unit);

        unit.dispose();
        unit.dispose();

        assert!(matches!(
            unit.post(json!({"id": 1})),
            Err(TransportError::Disposed)
        ));
        assert!(events.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
