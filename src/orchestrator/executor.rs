//! Fixed-point executor over a [`TaskGraph`].
//!
//! Each round skips every pending task with a dead or skipped upstream, then
//! starts every pending task whose upstreams all succeeded, concurrently. The
//! run ends when a round changes nothing. A task retries under the executor's
//! [`RetryPolicy`]; the history of every attempt is kept on its [`TaskRun`].
//!
//! ```text
//! pending ──▶ running ──▶ success
//!               │  ▲
//!               ▼  │ (retry)
//!             failed ──▶ dead
//! pending ──▶ skipped          (upstream dead/skipped, or run aborted)
//! ```

use super::dag::TaskGraph;
use crate::error::{PipelineError, Result};
use crate::models::RunContext;
use crate::retry::{Backoff, RetryDecision, RetryPolicy};
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::{LocalBoxFuture, join_all};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::sleep;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Failed,
    Success,
    Dead,
    Skipped,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Dead | TaskState::Skipped)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Failed => "failed",
            TaskState::Success => "success",
            TaskState::Dead => "dead",
            TaskState::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct TaskRun {
    pub name: String,
    pub run_date: NaiveDate,
    pub state: TaskState,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Every state the task passed through, starting with `Pending`.
    pub history: Vec<TaskState>,
}

impl TaskRun {
    fn new(name: &str, run_date: NaiveDate) -> Self {
        Self {
            name: name.to_string(),
            run_date,
            state: TaskState::Pending,
            attempts: 0,
            started_at: None,
            finished_at: None,
            last_error: None,
            history: vec![TaskState::Pending],
        }
    }

    fn transition(&mut self, next: TaskState) {
        self.state = next;
        self.history.push(next);
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Success,
    Dead,
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Success => f.write_str("success"),
            RunState::Dead => f.write_str("dead"),
            RunState::Aborted => f.write_str("aborted"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run: RunContext,
    pub state: RunState,
    /// In topological order.
    pub tasks: Vec<TaskRun>,
}

#[cfg(test)]
impl RunReport {
    pub fn task(&self, name: &str) -> Option<&TaskRun> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

pub type TaskFn<'a> = Box<dyn Fn() -> LocalBoxFuture<'a, Result<()>> + 'a>;

pub struct Executor<'a> {
    graph: TaskGraph,
    tasks: HashMap<String, TaskFn<'a>>,
    retry: RetryPolicy,
    abort: Arc<AtomicBool>,
}

impl<'a> Executor<'a> {
    pub fn new(graph: TaskGraph, retry: RetryPolicy) -> Self {
        Self {
            graph,
            tasks: HashMap::new(),
            retry,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attach the body of a graph node. Called once per attempt.
    pub fn task<F>(mut self, name: &str, body: F) -> Self
    where
        F: Fn() -> LocalBoxFuture<'a, Result<()>> + 'a,
    {
        self.tasks.insert(name.to_string(), Box::new(body));
        self
    }

    /// Checked between rounds; once set, pending tasks are skipped.
    pub fn with_abort(mut self, abort: Arc<AtomicBool>) -> Self {
        self.abort = abort;
        self
    }

    /// Run every task of the graph for `run` until no task can make progress.
    ///
    /// # Arguments
    ///
    /// * `run` - The run context stamped on every task record
    ///
    /// # Returns
    ///
    /// A [`RunReport`] with every task in a terminal state. Task failures are
    /// recorded in the report, not returned.
    ///
    /// # Errors
    ///
    /// `Graph` if a node of the graph has no registered implementation.
    pub async fn run(&self, run: RunContext) -> Result<RunReport> {
        for node in self.graph.nodes() {
            if !self.tasks.contains_key(&node.name) {
                return Err(PipelineError::Graph(format!(
                    "task {:?} has no implementation",
                    node.name
                )));
            }
        }

        let mut runs: HashMap<String, TaskRun> = self
            .graph
            .nodes()
            .iter()
            .map(|n| (n.name.clone(), TaskRun::new(&n.name, run.run_date)))
            .collect();
        let mut aborted = false;

        loop {
            if self.abort.load(Ordering::SeqCst) {
                aborted = true;
                for task in runs.values_mut().filter(|t| t.state == TaskState::Pending) {
                    warn!(task = %task.name, "Run aborted; task skipped");
                    task.transition(TaskState::Skipped);
                }
                break;
            }

            let mut changed = false;
            let mut ready = Vec::new();
            for node in self.graph.nodes() {
                if runs[&node.name].state != TaskState::Pending {
                    continue;
                }
                let upstream: Vec<TaskState> = node.upstream.iter().map(|u| runs[u].state).collect();
                if upstream
                    .iter()
                    .any(|s| matches!(s, TaskState::Dead | TaskState::Skipped))
                {
                    if let Some(task) = runs.get_mut(&node.name) {
                        warn!(task = %task.name, "Upstream did not succeed; task skipped");
                        task.transition(TaskState::Skipped);
                    }
                    changed = true;
                } else if upstream.iter().all(|s| *s == TaskState::Success) {
                    ready.push(node.name.clone());
                }
            }
            let ready: Vec<TaskRun> = ready.iter().filter_map(|name| runs.remove(name)).collect();

            if ready.is_empty() {
                if changed {
                    continue;
                }
                break;
            }
            for task in join_all(ready.into_iter().map(|t| self.drive(t))).await {
                runs.insert(task.name.clone(), task);
            }
        }

        let tasks: Vec<TaskRun> = self
            .graph
            .nodes()
            .iter()
            .filter_map(|n| runs.remove(&n.name))
            .collect();
        let state = if tasks.iter().any(|t| t.state == TaskState::Dead) {
            RunState::Dead
        } else if aborted {
            RunState::Aborted
        } else {
            RunState::Success
        };

        let report = RunReport { run, state, tasks };
        match state {
            RunState::Dead => {
                let dead: Vec<&str> = report
                    .tasks
                    .iter()
                    .filter(|t| t.state == TaskState::Dead)
                    .map(|t| t.name.as_str())
                    .collect();
                error!(run_date = %run.run_date, ?dead, "Run is dead");
            }
            RunState::Aborted => warn!(run_date = %run.run_date, "Run aborted"),
            RunState::Success => info!(run_date = %run.run_date, "Run succeeded"),
        }
        Ok(report)
    }

    /// Run one task through its attempts until success or dead.
    async fn drive(&self, mut task: TaskRun) -> TaskRun {
        let Some(body) = self.tasks.get(&task.name) else {
            task.transition(TaskState::Dead);
            return task;
        };
        let mut backoff = Backoff::new(self.retry.clone());
        task.started_at = Some(Utc::now());

        loop {
            task.attempts += 1;
            task.transition(TaskState::Running);
            info!(task = %task.name, attempt = task.attempts, "Task started");

            match body().await {
                Ok(()) => {
                    task.transition(TaskState::Success);
                    info!(task = %task.name, attempts = task.attempts, "Task succeeded");
                    return task;
                }
                Err(e) => {
                    task.transition(TaskState::Failed);
                    task.last_error = Some(e.to_string());
                    match backoff.on_failure(&e) {
                        RetryDecision::RetryAfter(delay) => {
                            warn!(
                                task = %task.name,
                                attempt = task.attempts,
                                ?delay,
                                error = %e,
                                "Task failed; will retry"
                            );
                            sleep(delay).await;
                        }
                        RetryDecision::GiveUp => {
                            task.transition(TaskState::Dead);
                            error!(
                                task = %task.name,
                                attempts = task.attempts,
                                retryable = e.is_retryable(),
                                error = %e,
                                "Task is dead"
                            );
                            return task;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use futures::FutureExt;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::time::Duration;
    use tokio::sync::Barrier;

    fn run_ctx() -> RunContext {
        RunContext::new(Utc.with_ymd_and_hms(2025, 10, 3, 0, 0, 0).unwrap())
    }

    fn chain() -> TaskGraph {
        TaskGraph::builder()
            .task("extract", &[])
            .task("load", &["extract"])
            .task("by_source", &["load"])
            .task("by_author", &["load"])
            .build()
            .unwrap()
    }

    fn ok<'a>(log: Rc<RefCell<Vec<&'static str>>>, name: &'static str) -> impl Fn() -> LocalBoxFuture<'a, Result<()>> + 'a {
        move || {
            let log = log.clone();
            async move {
                log.borrow_mut().push(name);
                Ok(())
            }
            .boxed_local()
        }
    }

    fn no_wait(attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(attempts, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_runs_in_dependency_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let executor = Executor::new(chain(), no_wait(3))
            .task("extract", ok(log.clone(), "extract"))
            .task("load", ok(log.clone(), "load"))
            .task("by_source", ok(log.clone(), "by_source"))
            .task("by_author", ok(log.clone(), "by_author"));

        let report = executor.run(run_ctx()).await.unwrap();
        assert_eq!(report.state, RunState::Success);
        assert_eq!(&log.borrow()[..2], ["extract", "load"]);
        assert_eq!(log.borrow().len(), 4);

        let load = report.task("load").unwrap();
        for name in ["by_source", "by_author"] {
            let t = report.task(name).unwrap();
            assert!(t.started_at.unwrap() >= load.finished_at.unwrap());
            assert_eq!(t.history, [TaskState::Pending, TaskState::Running, TaskState::Success]);
        }
    }

    #[tokio::test]
    async fn test_summaries_run_concurrently() {
        let barrier = Rc::new(Barrier::new(2));
        let log = Rc::new(RefCell::new(Vec::new()));
        let meet = |barrier: Rc<Barrier>| {
            move || {
                let barrier = barrier.clone();
                async move {
                    barrier.wait().await;
                    Ok::<(), PipelineError>(())
                }
                .boxed_local()
            }
        };
        let executor = Executor::new(chain(), no_wait(1))
            .task("extract", ok(log.clone(), "extract"))
            .task("load", ok(log.clone(), "load"))
            .task("by_source", meet(barrier.clone()))
            .task("by_author", meet(barrier.clone()));

        let report = tokio::time::timeout(Duration::from_secs(5), executor.run(run_ctx()))
            .await
            .expect("summaries did not run concurrently")
            .unwrap();
        assert_eq!(report.state, RunState::Success);
    }

    #[tokio::test]
    async fn test_exhausted_retries_mark_run_dead() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let executor = Executor::new(chain(), no_wait(3))
            .task("extract", || {
                async { Err::<(), _>(PipelineError::staging("k", "upload refused")) }.boxed_local()
            })
            .task("load", ok(log.clone(), "load"))
            .task("by_source", ok(log.clone(), "by_source"))
            .task("by_author", ok(log.clone(), "by_author"));

        let report = executor.run(run_ctx()).await.unwrap();
        assert_eq!(report.state, RunState::Dead);
        let extract = report.task("extract").unwrap();
        assert_eq!(
            extract.history,
            [
                TaskState::Pending,
                TaskState::Running,
                TaskState::Failed,
                TaskState::Running,
                TaskState::Failed,
                TaskState::Running,
                TaskState::Failed,
                TaskState::Dead,
            ]
        );
        assert_eq!(extract.attempts, 3);
        assert!(log.borrow().is_empty());
        for name in ["load", "by_source", "by_author"] {
            let t = report.task(name).unwrap();
            assert_eq!(t.state, TaskState::Skipped);
            assert_eq!(t.started_at, None);
        }
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let log = Rc::new(RefCell::new(Vec::new()));
        let executor = Executor::new(chain(), no_wait(3))
            .task("extract", move || {
                counter.set(counter.get() + 1);
                async { Err::<(), _>(PipelineError::Auth("401".into())) }.boxed_local()
            })
            .task("load", ok(log.clone(), "load"))
            .task("by_source", ok(log.clone(), "by_source"))
            .task("by_author", ok(log.clone(), "by_author"));

        let report = executor.run(run_ctx()).await.unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(
            report.task("extract").unwrap().history,
            [TaskState::Pending, TaskState::Running, TaskState::Failed, TaskState::Dead]
        );
    }

    #[tokio::test]
    async fn test_one_summary_failing_leaves_the_other() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let executor = Executor::new(chain(), no_wait(2))
            .task("extract", ok(log.clone(), "extract"))
            .task("load", ok(log.clone(), "load"))
            .task("by_source", || {
                async { Err::<(), _>(PipelineError::Warehouse("warehouse suspended".into())) }.boxed_local()
            })
            .task("by_author", ok(log.clone(), "by_author"));

        let report = executor.run(run_ctx()).await.unwrap();
        assert_eq!(report.state, RunState::Dead);
        assert_eq!(report.task("by_source").unwrap().state, TaskState::Dead);
        assert_eq!(report.task("by_author").unwrap().state, TaskState::Success);
        assert_eq!(
            report.task("by_source").unwrap().last_error.as_deref(),
            Some("warehouse error: warehouse suspended")
        );
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let remaining = Rc::new(Cell::new(1));
        let r = remaining.clone();
        let log = Rc::new(RefCell::new(Vec::new()));
        let executor = Executor::new(chain(), no_wait(3))
            .task("extract", ok(log.clone(), "extract"))
            .task("load", move || {
                let r = r.clone();
                async move {
                    if r.get() > 0 {
                        r.set(r.get() - 1);
                        return Err(PipelineError::TransientNetwork("reset".into()));
                    }
                    Ok(())
                }
                .boxed_local()
            })
            .task("by_source", ok(log.clone(), "by_source"))
            .task("by_author", ok(log.clone(), "by_author"));

        let report = executor.run(run_ctx()).await.unwrap();
        assert_eq!(report.state, RunState::Success);
        assert_eq!(report.task("load").unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn test_abort_skips_pending_tasks() {
        let abort = Arc::new(AtomicBool::new(false));
        let flag = abort.clone();
        let log = Rc::new(RefCell::new(Vec::new()));
        let executor = Executor::new(chain(), no_wait(1))
            .task("extract", move || {
                flag.store(true, Ordering::SeqCst);
                async { Ok(()) }.boxed_local()
            })
            .task("load", ok(log.clone(), "load"))
            .task("by_source", ok(log.clone(), "by_source"))
            .task("by_author", ok(log.clone(), "by_author"))
            .with_abort(abort);

        let report = executor.run(run_ctx()).await.unwrap();
        assert_eq!(report.state, RunState::Aborted);
        assert_eq!(report.task("extract").unwrap().state, TaskState::Success);
        assert_eq!(report.task("load").unwrap().state, TaskState::Skipped);
        assert!(log.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_missing_task_body_is_rejected() {
        let executor = Executor::new(chain(), no_wait(1));
        assert!(matches!(
            executor.run(run_ctx()).await,
            Err(PipelineError::Graph(_))
        ));
    }
}
