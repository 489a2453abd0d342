//! The download worker pool.
//!
//! One orchestrating loop owns every worker record. Queued tasks are handed
//! to IDLE workers; RESULT messages return workers to IDLE; a closed pipe is
//! a crash that requeues the in-flight task with exponential backoff until
//! its retry budget runs out. The loop ends when the queue is drained and
//! every worker has come back to IDLE.

use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::MirrorConfig;
use crate::error::Result;
use crate::protocol::{Cookie, DownloadData, DownloadTask, Message, TaskOutcome};
use crate::worker::{WorkerCommand, WorkerEvent, WorkerProxy};

/// One successfully mirrored page.
#[derive(Debug, Clone)]
pub struct CompletedDownload {
    pub task_id: String,
    pub page_id: String,
    pub url: String,
    pub data: Option<DownloadData>,
}

/// A page that could not be mirrored: either its task reported an error, or
/// its retry budget was consumed by worker crashes.
#[derive(Debug, Clone)]
pub struct FailedDownload {
    pub page_id: String,
    pub url: String,
    pub error: String,
    pub attempts: u32,
}

/// Queue statistics for one pool run.
#[derive(Debug, Default)]
pub struct PoolReport {
    pub completed: Vec<CompletedDownload>,
    pub task_errors: Vec<FailedDownload>,
    pub lost: Vec<FailedDownload>,
    pub requeues: usize,
    pub respawns: usize,
}

impl PoolReport {
    pub fn failures(&self) -> impl Iterator<Item = &FailedDownload> {
        self.task_errors.iter().chain(self.lost.iter())
    }
}

struct QueuedTask {
    task: DownloadTask,
    attempts: u32,
    ready_at: Instant,
}

pub struct WorkerPool {
    config: MirrorConfig,
    command: WorkerCommand,
    cookies: Vec<Cookie>,
    workers: Vec<WorkerProxy>,
    events_tx: mpsc::Sender<WorkerEvent>,
    events_rx: mpsc::Receiver<WorkerEvent>,
    next_worker_id: usize,
}

impl WorkerPool {
    pub fn new(config: MirrorConfig, command: WorkerCommand, cookies: Vec<Cookie>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        Self {
            config,
            command,
            cookies,
            workers: Vec::new(),
            events_tx,
            events_rx,
            next_worker_id: 0,
        }
    }

    /// Runs the queue to completion and returns the per-task accounting.
    pub async fn run(&mut self, tasks: Vec<DownloadTask>) -> Result<PoolReport> {
        info!(
            "dispatching {} pages across {} workers",
            tasks.len(),
            self.config.workers
        );

        let now = Instant::now();
        let mut queue: VecDeque<QueuedTask> = tasks
            .into_iter()
            .map(|task| QueuedTask {
                task,
                attempts: 0,
                ready_at: now,
            })
            .collect();
        let mut report = PoolReport::default();

        while self.live_workers() < self.config.workers {
            match self.spawn_worker().await {
                Ok(_) => {}
                Err(e) if self.live_workers() > 0 => {
                    warn!("worker spawn failed, continuing short-handed: {}", e);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        let respawn_budget = self.config.workers * (self.config.max_retries as usize + 1);

        loop {
            self.dispatch_ready(&mut queue).await;

            if queue.is_empty() && self.busy_workers() == 0 {
                break;
            }

            if self.live_workers() == 0 {
                if self.config.respawn && report.respawns < respawn_budget {
                    match self.spawn_worker().await {
                        Ok(id) => {
                            report.respawns += 1;
                            debug!("respawned worker {}", id);
                            continue;
                        }
                        Err(e) => warn!("respawn failed: {}", e),
                    }
                }
                // Pool exhausted: everything still queued is lost.
                warn!("no live workers remain, abandoning {} queued pages", queue.len());
                for queued in queue.drain(..) {
                    report.lost.push(FailedDownload {
                        page_id: queued.task.page_id,
                        url: queued.task.url,
                        error: "worker pool exhausted".to_string(),
                        attempts: queued.attempts,
                    });
                }
                break;
            }

            // A delayed requeue may become dispatchable before any worker
            // speaks; wake up for whichever comes first.
            let next_ready = queue
                .iter()
                .map(|t| t.ready_at)
                .min()
                .filter(|at| *at > Instant::now() && self.idle_workers() > 0);

            let event = if let Some(at) = next_ready {
                tokio::select! {
                    event = self.events_rx.recv() => event,
                    _ = tokio::time::sleep_until(at) => continue,
                }
            } else {
                self.events_rx.recv().await
            };

            match event {
                Some(event) => self.handle_event(event, &mut queue, &mut report).await,
                None => break,
            }
        }

        info!(
            "pool run finished: {} mirrored, {} task errors, {} lost, {} requeues",
            report.completed.len(),
            report.task_errors.len(),
            report.lost.len(),
            report.requeues
        );
        Ok(report)
    }

    /// Advisory shutdown for every worker, then a grace period, then a kill
    /// for stragglers.
    pub async fn shutdown(&mut self) {
        let grace = self.config.shutdown_grace;
        for worker in &mut self.workers {
            worker.shutdown(grace).await;
        }
    }

    async fn spawn_worker(&mut self) -> Result<usize> {
        let id = self.next_worker_id;
        self.next_worker_id += 1;
        let mut worker = WorkerProxy::spawn(id, &self.command, self.events_tx.clone())?;
        worker.send(&Message::Init { worker_id: id }).await?;
        self.workers.push(worker);
        Ok(id)
    }

    /// Hands every currently-ready task to an idle worker.
    async fn dispatch_ready(&mut self, queue: &mut VecDeque<QueuedTask>) {
        loop {
            let now = Instant::now();
            let Some(position) = queue.iter().position(|t| t.ready_at <= now) else {
                return;
            };
            let Some(worker) = self.workers.iter_mut().find(|w| w.is_idle()) else {
                return;
            };

            let Some(queued) = queue.remove(position) else {
                return;
            };
            match worker
                .dispatch(queued.task.clone(), queued.attempts, &self.cookies)
                .await
            {
                Ok(task_id) => {
                    debug!("task {} -> worker {}", task_id, worker.id());
                }
                Err(e) => {
                    // The send never reached the worker; the task goes back
                    // untouched and the Closed event will follow.
                    warn!("dispatch to worker {} failed: {}", worker.id(), e);
                    worker.mark_crashed();
                    queue.push_front(queued);
                }
            }
        }
    }

    async fn handle_event(
        &mut self,
        event: WorkerEvent,
        queue: &mut VecDeque<QueuedTask>,
        report: &mut PoolReport,
    ) {
        match event {
            WorkerEvent::Message { worker_id, message } => {
                self.handle_message(worker_id, message, report).await;
            }
            WorkerEvent::Closed { worker_id, error } => {
                self.handle_closed(worker_id, error, queue, report);
            }
        }
    }

    async fn handle_message(&mut self, worker_id: usize, message: Message, report: &mut PoolReport) {
        let Some(worker) = self.workers.iter_mut().find(|w| w.id() == worker_id) else {
            warn!("message from unknown worker {}", worker_id);
            return;
        };

        match message {
            Message::Ready { .. } => {
                worker.mark_ready();
                if !self.cookies.is_empty() {
                    let broadcast = Message::SetCookies {
                        cookies: self.cookies.clone(),
                    };
                    if let Err(e) = worker.send(&broadcast).await {
                        warn!("cookie broadcast to worker {} failed: {}", worker_id, e);
                        worker.mark_crashed();
                    }
                }
            }
            Message::Result(outcome) => {
                let Some(active) = worker.complete() else {
                    warn!("worker {} sent RESULT with no task in flight", worker_id);
                    return;
                };
                record_outcome(active.task, active.attempts, outcome, report);
            }
            other => {
                warn!("unexpected {:?} from worker {}", other, worker_id);
            }
        }
    }

    fn handle_closed(
        &mut self,
        worker_id: usize,
        error: Option<String>,
        queue: &mut VecDeque<QueuedTask>,
        report: &mut PoolReport,
    ) {
        let Some(worker) = self.workers.iter_mut().find(|w| w.id() == worker_id) else {
            return;
        };
        if !worker.is_live() {
            return;
        }

        match error {
            Some(e) => warn!("worker {} transport error: {}", worker_id, e),
            None => warn!("worker {} exited", worker_id),
        }

        if let Some(active) = worker.mark_crashed() {
            let attempts = active.attempts + 1;
            if attempts <= self.config.max_retries {
                let delay = self.config.backoff_base * 2u32.pow(attempts - 1);
                debug!(
                    "requeueing {} after crash (attempt {}, delay {:?})",
                    active.task.page_id, attempts, delay
                );
                report.requeues += 1;
                queue.push_back(QueuedTask {
                    task: active.task,
                    attempts,
                    ready_at: Instant::now() + delay,
                });
            } else {
                report.lost.push(FailedDownload {
                    page_id: active.task.page_id,
                    url: active.task.url,
                    error: "retries exhausted after worker crashes".to_string(),
                    attempts,
                });
            }
        }
    }

    fn live_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.is_live()).count()
    }

    fn idle_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.is_idle()).count()
    }

    fn busy_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.is_busy()).count()
    }
}

fn record_outcome(
    task: DownloadTask,
    attempts: u32,
    outcome: TaskOutcome,
    report: &mut PoolReport,
) {
    match outcome.error {
        None => report.completed.push(CompletedDownload {
            task_id: outcome.task_id,
            page_id: task.page_id,
            url: task.url,
            data: outcome.data,
        }),
        // A failed task never crashes the worker; it is a per-page failure.
        Some(error) => report.task_errors.push(FailedDownload {
            page_id: task.page_id,
            url: task.url,
            error,
            attempts,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{read_message, write_message};
    use std::path::PathBuf;
    use tokio::io::BufReader as TokioBufReader;

    fn task(name: &str) -> DownloadTask {
        DownloadTask {
            url: format!("https://site.example/{}", name),
            page_id: name.to_string(),
            save_path: PathBuf::from(format!("/tmp/mirror/{}/index.html", name)),
        }
    }

    fn test_pool(workers: usize) -> WorkerPool {
        let config = MirrorConfig::default()
            .with_workers(workers)
            .with_respawn(false);
        WorkerPool::new(
            config,
            WorkerCommand {
                program: PathBuf::from("unused-in-tests"),
                args: vec![],
            },
            vec![],
        )
    }

    /// Wires a duplex-backed proxy into the pool and returns the worker-side
    /// halves for a simulator task.
    fn attach_fake_worker(
        pool: &mut WorkerPool,
        id: usize,
    ) -> (
        TokioBufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>,
        tokio::io::WriteHalf<tokio::io::DuplexStream>,
    ) {
        let (pool_side, worker_side) = tokio::io::duplex(8192);
        let (pool_read, pool_write) = tokio::io::split(pool_side);
        let (worker_read, worker_write) = tokio::io::split(worker_side);
        let proxy = WorkerProxy::from_transport(
            id,
            pool_write,
            TokioBufReader::new(pool_read),
            pool.events_tx.clone(),
        );
        pool.workers.push(proxy);
        pool.next_worker_id = pool.next_worker_id.max(id + 1);
        (TokioBufReader::new(worker_read), worker_write)
    }

    #[tokio::test]
    async fn queue_drains_through_a_well_behaved_worker() {
        let mut pool = test_pool(1);
        let (mut stdin, mut stdout) = attach_fake_worker(&mut pool, 0);

        tokio::spawn(async move {
            write_message(&mut stdout, &Message::Ready { worker_id: 0 })
                .await
                .unwrap();
            while let Ok(Some(message)) = read_message(&mut stdin).await {
                match message {
                    Message::Download { task_id, .. } => {
                        let outcome = TaskOutcome::success(
                            task_id,
                            DownloadData {
                                bytes_written: 128,
                                block_ids: 0,
                                content_type: None,
                            },
                        );
                        write_message(&mut stdout, &Message::Result(outcome))
                            .await
                            .unwrap();
                    }
                    Message::Shutdown => break,
                    _ => {}
                }
            }
        });

        let report = pool
            .run(vec![task("A"), task("B"), task("C")])
            .await
            .unwrap();

        assert_eq!(report.completed.len(), 3);
        assert!(report.task_errors.is_empty());
        assert!(report.lost.is_empty());
        assert_eq!(report.requeues, 0);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn task_level_errors_return_the_worker_to_idle() {
        let mut pool = test_pool(1);
        let (mut stdin, mut stdout) = attach_fake_worker(&mut pool, 0);

        tokio::spawn(async move {
            write_message(&mut stdout, &Message::Ready { worker_id: 0 })
                .await
                .unwrap();
            let mut first = true;
            while let Ok(Some(message)) = read_message(&mut stdin).await {
                if let Message::Download { task_id, .. } = message {
                    let outcome = if first {
                        first = false;
                        TaskOutcome::failure(task_id, "render timed out".to_string())
                    } else {
                        TaskOutcome::success(
                            task_id,
                            DownloadData {
                                bytes_written: 64,
                                block_ids: 0,
                                content_type: None,
                            },
                        )
                    };
                    write_message(&mut stdout, &Message::Result(outcome))
                        .await
                        .unwrap();
                }
            }
        });

        let report = pool.run(vec![task("A"), task("B")]).await.unwrap();

        // The failed task is a per-page failure, not a crash: the same
        // worker went back to IDLE and finished the second page.
        assert_eq!(report.completed.len(), 1);
        assert_eq!(report.task_errors.len(), 1);
        assert_eq!(report.task_errors[0].error, "render timed out");
        assert_eq!(report.requeues, 0);
    }

    #[tokio::test]
    async fn crash_mid_task_requeues_exactly_once_then_pool_exhausts() {
        let mut pool = test_pool(1);
        pool.config.max_retries = 2;
        let (mut stdin, stdout) = attach_fake_worker(&mut pool, 0);

        tokio::spawn(async move {
            let mut stdout = stdout;
            write_message(&mut stdout, &Message::Ready { worker_id: 0 })
                .await
                .unwrap();
            // Take one task and die without answering.
            let _ = read_message(&mut stdin).await;
        });

        let report = pool.run(vec![task("A"), task("B")]).await.unwrap();

        // The in-flight task was requeued exactly once; with respawn off the
        // pool then exhausts and both pages end up lost, never duplicated.
        assert_eq!(report.requeues, 1);
        assert_eq!(report.completed.len(), 0);
        assert_eq!(report.lost.len(), 2);
        let lost_a = report.lost.iter().find(|f| f.page_id == "A").unwrap();
        assert_eq!(lost_a.attempts, 1);
        assert_eq!(lost_a.error, "worker pool exhausted");
    }
}
