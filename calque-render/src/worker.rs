//! One pool-side proxy per worker process.
//!
//! The proxy owns the child process handle, the write end of its pipe, and
//! the worker's lifecycle state. A background task pumps everything the
//! worker says into the pool's event channel, so the pool's scheduling loop
//! is the only place state transitions happen.

use chrono::Utc;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{RenderError, Result};
use crate::protocol::{self, Cookie, DownloadTask, Message};

/// Lifecycle of one worker process instance.
///
/// CRASHED is terminal for the instance; the pool may spawn a replacement
/// process under a fresh worker id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Initializing,
    Idle,
    Busy,
    Crashed,
}

/// How to launch a worker process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// Re-invokes the current executable with the given arguments, the way
    /// the pool normally reaches its own hidden worker entry point.
    pub fn current_exe(args: Vec<String>) -> Result<Self> {
        let program = std::env::current_exe()
            .map_err(|e| RenderError::SpawnFailure(format!("cannot locate own binary: {}", e)))?;
        Ok(Self { program, args })
    }
}

/// Everything a worker can tell the pool, plus channel closure.
#[derive(Debug)]
pub enum WorkerEvent {
    Message { worker_id: usize, message: Message },
    Closed { worker_id: usize, error: Option<String> },
}

/// The task a BUSY worker is holding.
#[derive(Debug, Clone)]
pub struct ActiveTask {
    pub task_id: String,
    pub task: DownloadTask,
    pub attempts: u32,
}

pub struct WorkerProxy {
    id: usize,
    state: WorkerState,
    current: Option<ActiveTask>,
    sink: Box<dyn AsyncWrite + Send + Unpin>,
    child: Option<Child>,
}

impl WorkerProxy {
    /// Spawns the worker process and starts pumping its output into the
    /// pool's event channel.
    pub fn spawn(
        id: usize,
        command: &WorkerCommand,
        events: mpsc::Sender<WorkerEvent>,
    ) -> Result<Self> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RenderError::SpawnFailure(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RenderError::SpawnFailure("worker stdin not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RenderError::SpawnFailure("worker stdout not piped".to_string()))?;

        tokio::spawn(pump_events(id, BufReader::new(stdout), events));

        debug!("worker {} spawned ({})", id, command.program.display());
        Ok(Self {
            id,
            state: WorkerState::Initializing,
            current: None,
            sink: Box::new(stdin),
            child: Some(child),
        })
    }

    /// Builds a proxy over an arbitrary duplex transport. Used by tests to
    /// drive the protocol without real processes.
    pub fn from_transport<W, R>(
        id: usize,
        writer: W,
        reader: R,
        events: mpsc::Sender<WorkerEvent>,
    ) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        tokio::spawn(pump_events(id, reader, events));
        Self {
            id,
            state: WorkerState::Initializing,
            current: None,
            sink: Box::new(writer),
            child: None,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == WorkerState::Idle
    }

    pub fn is_busy(&self) -> bool {
        self.state == WorkerState::Busy
    }

    pub fn is_live(&self) -> bool {
        self.state != WorkerState::Crashed
    }

    pub async fn send(&mut self, message: &Message) -> Result<()> {
        protocol::write_message(&mut self.sink, message).await
    }

    /// INITIALIZING -> IDLE, on READY.
    pub fn mark_ready(&mut self) {
        if self.state == WorkerState::Initializing {
            debug!("worker {} ready", self.id);
            self.state = WorkerState::Idle;
        } else {
            warn!("worker {} sent READY while {:?}", self.id, self.state);
        }
    }

    /// Stamps a task identifier, sends the DOWNLOAD message and moves
    /// IDLE -> BUSY. The caller handles a send failure as a crash.
    pub async fn dispatch(
        &mut self,
        task: DownloadTask,
        attempts: u32,
        cookies: &[Cookie],
    ) -> Result<String> {
        let task_id = format!("w{}-{}", self.id, Utc::now().timestamp_millis());
        let message = Message::Download {
            task_id: task_id.clone(),
            url: task.url.clone(),
            page_id: task.page_id.clone(),
            save_path: task.save_path.clone(),
            cookies: cookies.to_vec(),
        };
        self.send(&message).await?;
        self.current = Some(ActiveTask {
            task_id: task_id.clone(),
            task,
            attempts,
        });
        self.state = WorkerState::Busy;
        Ok(task_id)
    }

    /// BUSY -> IDLE on RESULT, regardless of whether the payload carried
    /// data or a task-level error. Returns the finished task.
    pub fn complete(&mut self) -> Option<ActiveTask> {
        if self.state != WorkerState::Busy {
            warn!("worker {} sent RESULT while {:?}", self.id, self.state);
        }
        self.state = WorkerState::Idle;
        self.current.take()
    }

    /// Any state -> CRASHED. Returns the task that was in flight, if any,
    /// so the pool can requeue it.
    pub fn mark_crashed(&mut self) -> Option<ActiveTask> {
        debug!("worker {} crashed (was {:?})", self.id, self.state);
        self.state = WorkerState::Crashed;
        self.current.take()
    }

    /// Advisory shutdown: best-effort SHUTDOWN message, then a grace
    /// period, then a hard kill for a process that is still alive.
    pub async fn shutdown(&mut self, grace: std::time::Duration) {
        if self.is_live() {
            let _ = self.send(&Message::Shutdown).await;
        }
        if let Some(child) = self.child.as_mut() {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => debug!("worker {} exited: {}", self.id, status),
                Ok(Err(e)) => warn!("worker {} wait failed: {}", self.id, e),
                Err(_) => {
                    warn!("worker {} ignored shutdown, killing", self.id);
                    if let Err(e) = child.kill().await {
                        warn!("worker {} kill failed: {}", self.id, e);
                    }
                }
            }
        }
        self.state = WorkerState::Crashed;
    }
}

/// Pumps messages off one worker's pipe into the shared event channel.
/// EOF and transport errors both surface as `Closed`.
async fn pump_events<R>(worker_id: usize, mut reader: R, events: mpsc::Sender<WorkerEvent>)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match protocol::read_message(&mut reader).await {
            Ok(Some(message)) => {
                if events
                    .send(WorkerEvent::Message { worker_id, message })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(None) => {
                let _ = events
                    .send(WorkerEvent::Closed {
                        worker_id,
                        error: None,
                    })
                    .await;
                break;
            }
            Err(e) => {
                let _ = events
                    .send(WorkerEvent::Closed {
                        worker_id,
                        error: Some(e.to_string()),
                    })
                    .await;
                break;
            }
        }
    }
}
