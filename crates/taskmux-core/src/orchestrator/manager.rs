//! Task registry, start queue, lifecycle engine, and completion waiters.
//!
//! The manager owns every task record exclusively. All bookkeeping (queue
//! admission, index maintenance, state transitions) happens inside short
//! critical sections that are never held across an await; host I/O (session
//! creation, prompt delivery, message retrieval, abort, notification) is the
//! only place the lifecycle suspends.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::config::OrchestratorConfig;
use crate::host::{
    HostClient, HostEvent, MessagePart, MessageRole, PromptRequest, SessionId, SessionMessage,
    SessionStatus, ToolPermissions,
};
use crate::orchestrator::fallback::{FallbackResolver, ModelRef};
use crate::orchestrator::policy::DelegationPolicy;
use crate::orchestrator::task::{Task, TaskId, TaskLimits, TaskStatus};

/// Result text recorded when a session completed without producing any
/// assistant output. Distinguishes completed-but-silent from absent.
const NO_OUTPUT: &str = "(no output)";

/// Options for launching a background task.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Agent type the task executes as.
    pub agent: String,
    /// Initial prompt text.
    pub prompt: String,
    /// Human-readable description, used in parent notifications.
    pub description: String,
    /// Session that is launching the task.
    pub parent_session_id: SessionId,
}

/// Terminal outcome of a task. Exactly one of result/error is recorded.
enum Outcome {
    Completed(String),
    Failed(String),
    Cancelled(String),
}

/// Deferred side effects of a terminal transition, performed outside the
/// state lock.
struct Cleanup {
    task: Task,
    waiter: Option<oneshot::Sender<Task>>,
}

/// A registered completion waiter. The token identifies the registration,
/// so a timed-out waiter can tell its own entry from a successor's.
struct Waiter {
    token: u64,
    sender: oneshot::Sender<Task>,
}

#[derive(Default)]
struct ManagerState {
    tasks: HashMap<TaskId, Task>,
    /// Pending tasks awaiting admission, FIFO by enqueue order.
    queue: VecDeque<TaskId>,
    /// Host session -> task, for event routing.
    sessions: HashMap<SessionId, TaskId>,
    /// Host session -> owning agent type, for nested-spawn permission checks.
    session_agents: HashMap<SessionId, String>,
    /// One-shot completion waiters; at most one per task, last wins.
    waiters: HashMap<TaskId, Waiter>,
    /// Monotonic source of waiter registration tokens.
    waiter_seq: u64,
    /// Number of start sequences currently in flight.
    active_starts: usize,
}

struct ManagerInner {
    config: OrchestratorConfig,
    policy: DelegationPolicy,
    resolver: FallbackResolver,
    host: Arc<dyn HostClient>,
    state: Mutex<ManagerState>,
}

/// Orchestrates background tasks: admission, lifecycle, completion.
///
/// Cheap to clone; clones share state. Launch is fire-and-forget: callers
/// observe progress via [`TaskManager::wait_for_completion`] or
/// [`TaskManager::get_result`]. Must be used inside a Tokio runtime.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<ManagerInner>,
}

impl TaskManager {
    pub fn new(config: OrchestratorConfig, host: Arc<dyn HostClient>) -> Self {
        let policy = DelegationPolicy::from_config(&config);
        let resolver = FallbackResolver::from_config(&config);
        Self {
            inner: Arc::new(ManagerInner {
                config,
                policy,
                resolver,
                host,
                state: Mutex::new(ManagerState::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ManagerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Launches a background task and returns its pending record
    /// immediately, without waiting for admission or execution.
    pub fn launch(&self, options: LaunchOptions) -> Task {
        let task = Task::new(
            options.description,
            options.agent,
            options.prompt,
            options.parent_session_id,
            TaskLimits {
                max_concurrent: self.inner.config.max_concurrent,
            },
        );
        let snapshot = task.clone();
        {
            let mut state = self.state();
            state.queue.push_back(task.id);
            state.tasks.insert(task.id, task);
        }
        debug!(task = %snapshot.id, agent = %snapshot.agent, "task enqueued");
        self.pump();
        snapshot
    }

    /// Admits queued tasks while capacity remains under the ceiling.
    ///
    /// Re-run after every start finishes, so every enqueued task is
    /// eventually admitted.
    fn pump(&self) {
        loop {
            let task_id = {
                let mut state = self.state();
                if state.active_starts >= self.inner.config.max_concurrent {
                    return;
                }
                let Some(task_id) = state.queue.pop_front() else {
                    return;
                };
                state.active_starts += 1;
                task_id
            };

            let manager = self.clone();
            tokio::spawn(async move {
                manager.run_start(task_id).await;
                {
                    let mut state = manager.state();
                    state.active_starts = state.active_starts.saturating_sub(1);
                }
                manager.pump();
            });
        }
    }

    /// Runs the start sequence for one admitted task.
    async fn run_start(&self, task_id: TaskId) {
        let (agent, prompt, parent) = {
            let mut state = self.state();
            let Some(task) = state.tasks.get_mut(&task_id) else {
                return;
            };
            // The task may have been cancelled while queued; its terminal
            // side effects already ran.
            if task.status != TaskStatus::Pending {
                return;
            }
            task.status = TaskStatus::Starting;
            (
                task.agent.clone(),
                task.prompt.clone(),
                task.parent_session_id.clone(),
            )
        };

        let session = match self.inner.host.create_session(&parent).await {
            Ok(session) => session,
            Err(err) => {
                self.finish(task_id, Outcome::Failed(format!("Failed to create session: {err:#}")))
                    .await;
                return;
            }
        };

        // Index the session, unless the task went terminal while the
        // session was being created; then the session is an orphan.
        let orphaned = {
            let mut state = self.state();
            match state.tasks.get_mut(&task_id) {
                Some(task) if !task.is_terminal() => {
                    task.session_id = Some(session.clone());
                    state.sessions.insert(session.clone(), task_id);
                    state.session_agents.insert(session.clone(), agent.clone());
                    false
                }
                _ => true,
            }
        };
        if orphaned {
            if let Err(err) = self.inner.host.abort_session(&session).await {
                debug!(session = %session, "failed to abort orphaned session: {err:#}");
            }
            return;
        }

        // Give the pane-visualization collaborator time to observe the new
        // session before the first prompt lands.
        if let Some(delay) = self.inner.config.pane_delay() {
            tokio::time::sleep(delay).await;
        }

        self.deliver_prompt(task_id, &session, &agent, &prompt).await;
    }

    /// Attempts each model in the resolved chain sequentially until one
    /// delivery succeeds, then marks the task running.
    ///
    /// At most one attempt is in flight at a time: racing the whole chain
    /// in parallel would risk duplicate prompts to the same task.
    async fn deliver_prompt(&self, task_id: TaskId, session: &SessionId, agent: &str, prompt: &str) {
        let tools = if self.inner.policy.allowed_agents(agent).is_empty() {
            ToolPermissions::deny_delegation()
        } else {
            ToolPermissions::default()
        };

        let chain = if self.inner.config.fallback_enabled {
            self.inner.resolver.resolve_chain(agent)
        } else {
            self.inner.resolver.primary(agent).into_iter().collect()
        };
        // No configured model: one attempt with the host's default.
        let candidates: Vec<Option<String>> = if chain.is_empty() {
            vec![None]
        } else {
            chain.into_iter().map(Some).collect()
        };

        let attempt_timeout = self.inner.config.attempt_timeout();
        let mut attempts: Vec<String> = Vec::new();

        for candidate in candidates {
            // A cancellation or deletion may have won since the last await.
            if self.get_result(task_id).is_none_or(|task| task.is_terminal()) {
                return;
            }

            let label = candidate.as_deref().unwrap_or("default").to_string();
            let model = match candidate.as_deref() {
                Some(raw) => match ModelRef::parse(raw) {
                    Ok(model) => Some(model),
                    Err(err) => {
                        attempts.push(format!("{label}: {err}"));
                        continue;
                    }
                },
                None => None,
            };

            let request = PromptRequest {
                agent: agent.to_string(),
                parts: vec![MessagePart::Text {
                    text: prompt.to_string(),
                }],
                tools: tools.clone(),
                model,
                variant: None,
            };

            let sent = self.inner.host.send_prompt(session, request);
            let result = match attempt_timeout {
                Some(limit) => tokio::time::timeout(limit, sent)
                    .await
                    .unwrap_or_else(|_| {
                        Err(anyhow!("timed out after {}s", limit.as_secs()))
                    }),
                None => sent.await,
            };

            match result {
                Ok(()) => {
                    let mut state = self.state();
                    if let Some(task) = state.tasks.get_mut(&task_id)
                        && !task.is_terminal()
                    {
                        task.status = TaskStatus::Running;
                        debug!(task = %task_id, model = %label, "task running");
                    }
                    return;
                }
                Err(err) => {
                    warn!(task = %task_id, model = %label, "prompt attempt failed: {err:#}");
                    attempts.push(format!("{label}: {err:#}"));
                }
            }
        }

        self.finish(
            task_id,
            Outcome::Failed(format!(
                "All model attempts failed: {}",
                attempts.join("; ")
            )),
        )
        .await;
    }

    /// Handles one inbound host event. Events for untracked sessions are
    /// ignored.
    pub async fn handle_event(&self, event: HostEvent) {
        match event {
            HostEvent::SessionStatus { session_id, status } => {
                if status != SessionStatus::Idle {
                    return;
                }
                let running_task = {
                    let state = self.state();
                    state.sessions.get(&session_id).copied().filter(|task_id| {
                        state
                            .tasks
                            .get(task_id)
                            .is_some_and(|task| task.status == TaskStatus::Running)
                    })
                };
                let Some(task_id) = running_task else {
                    return;
                };
                match self.inner.host.list_messages(&session_id).await {
                    Ok(messages) => {
                        self.finish(task_id, Outcome::Completed(extract_output(&messages)))
                            .await;
                    }
                    Err(err) => {
                        self.finish(
                            task_id,
                            Outcome::Failed(format!("Failed to read session messages: {err:#}")),
                        )
                        .await;
                    }
                }
            }
            HostEvent::SessionDeleted { session_id } => {
                let task_id = { self.state().sessions.get(&session_id).copied() };
                if let Some(task_id) = task_id {
                    // The backing session no longer exists; any completion
                    // event that might still arrive is moot.
                    self.finish(task_id, Outcome::Cancelled("Session deleted".to_string()))
                        .await;
                }
            }
        }
    }

    /// Drains an inbound host event channel until it closes.
    pub async fn run_event_loop(&self, mut events: mpsc::Receiver<HostEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
    }

    /// Cancels one task, or every non-terminal task when `task_id` is
    /// `None`. Returns the number of tasks cancelled.
    pub async fn cancel(&self, task_id: Option<TaskId>) -> usize {
        let targets = match task_id {
            Some(task_id) => vec![task_id],
            None => {
                let state = self.state();
                state
                    .tasks
                    .values()
                    .filter(|task| !task.is_terminal())
                    .map(|task| task.id)
                    .collect()
            }
        };

        let mut cancelled = 0;
        for task_id in targets {
            if self.cancel_one(task_id).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Cancels a single task. No-op if the task is absent or terminal.
    async fn cancel_one(&self, task_id: TaskId) -> bool {
        let cleanup = {
            let mut state = self.state();
            let Some(task) = state.tasks.get_mut(&task_id) else {
                return false;
            };
            if task.is_terminal() {
                return false;
            }
            // Mark terminal before touching the queue: a concurrently
            // admitted start observes the cancellation and short-circuits.
            task.force_status(TaskStatus::Cancelled);
            task.error = Some("Cancelled".to_string());
            task.completed_at = Some(Utc::now());
            let snapshot = task.clone();
            // The requester asked for cancellation; its waiter is dropped,
            // not resolved.
            state.waiters.remove(&task_id);
            state.queue.retain(|queued| *queued != task_id);
            if let Some(session) = &snapshot.session_id {
                state.sessions.remove(session);
                state.session_agents.remove(session);
            }
            Cleanup {
                task: snapshot,
                waiter: None,
            }
        };
        self.run_cleanup(cleanup).await;
        true
    }

    /// Records a terminal outcome and runs the shared side effects.
    /// Returns false if the task was absent or already terminal.
    async fn finish(&self, task_id: TaskId, outcome: Outcome) -> bool {
        let cleanup = {
            let mut state = self.state();
            let Some(task) = state.tasks.get_mut(&task_id) else {
                return false;
            };
            if task.is_terminal() {
                return false;
            }
            match outcome {
                Outcome::Completed(result) => {
                    task.status = TaskStatus::Completed;
                    task.result = Some(result);
                }
                Outcome::Failed(error) => {
                    task.status = TaskStatus::Failed;
                    task.error = Some(error);
                }
                Outcome::Cancelled(error) => {
                    task.status = TaskStatus::Cancelled;
                    task.error = Some(error);
                }
            }
            task.completed_at = Some(Utc::now());
            let snapshot = task.clone();
            state.queue.retain(|queued| *queued != task_id);
            if let Some(session) = &snapshot.session_id {
                state.sessions.remove(session);
                state.session_agents.remove(session);
            }
            let waiter = state.waiters.remove(&task_id).map(|w| w.sender);
            Cleanup {
                task: snapshot,
                waiter,
            }
        };
        self.run_cleanup(cleanup).await;
        true
    }

    /// Best-effort terminal side effects: session abort, parent
    /// notification, waiter resolution. Failures are logged, never
    /// escalated to task status.
    async fn run_cleanup(&self, cleanup: Cleanup) {
        let Cleanup { task, waiter } = cleanup;
        debug!(task = %task.id, status = ?task.status, "task terminal");

        if let Some(session) = &task.session_id
            && let Err(err) = self.inner.host.abort_session(session).await
        {
            debug!(session = %session, "failed to abort session: {err:#}");
        }

        let note = match task.status {
            TaskStatus::Completed => {
                format!("Background task \"{}\" completed", task.description)
            }
            _ => format!(
                "Background task \"{}\" failed: {}",
                task.description,
                task.error.as_deref().unwrap_or("unknown error")
            ),
        };
        let parent_agent = self.owning_agent(&task.parent_session_id);
        if let Err(err) = self
            .inner
            .host
            .send_prompt(&task.parent_session_id, PromptRequest::text(parent_agent, note))
            .await
        {
            warn!(task = %task.id, "failed to notify parent session: {err:#}");
        }

        if let Some(waiter) = waiter {
            let _ = waiter.send(task);
        }
    }

    /// Returns a snapshot of the task record, or `None` if unknown.
    pub fn get_result(&self, task_id: TaskId) -> Option<Task> {
        self.state().tasks.get(&task_id).cloned()
    }

    /// Blocks until the task reaches a terminal state, up to `timeout`.
    ///
    /// Returns `None` on timeout or when the task is unknown. At most one
    /// waiter per task is supported; a later registration supersedes an
    /// earlier one.
    pub async fn wait_for_completion(&self, task_id: TaskId, timeout: Duration) -> Option<Task> {
        let (token, waiter) = {
            let mut state = self.state();
            let task = state.tasks.get(&task_id)?;
            if task.is_terminal() {
                return Some(task.clone());
            }
            let (tx, rx) = oneshot::channel();
            state.waiter_seq += 1;
            let token = state.waiter_seq;
            state.waiters.insert(task_id, Waiter { token, sender: tx });
            (token, rx)
        };

        match tokio::time::timeout(timeout, waiter).await {
            Ok(Ok(task)) => Some(task),
            // Waiter dropped without resolution (explicit cancel, or a
            // later registration superseded this one). Report the record
            // only if it actually went terminal.
            Ok(Err(_)) => self.get_result(task_id).filter(Task::is_terminal),
            Err(_) => {
                self.remove_waiter_if(task_id, token);
                None
            }
        }
    }

    /// Removes the task's waiter only when it is still the registration
    /// identified by `token`. A later registration that slipped in while
    /// the timeout was firing stays in place.
    fn remove_waiter_if(&self, task_id: TaskId, token: u64) {
        let mut state = self.state();
        if state
            .waiters
            .get(&task_id)
            .is_some_and(|waiter| waiter.token == token)
        {
            state.waiters.remove(&task_id);
        }
    }

    /// Returns true if the owner of `parent_session_id` may spawn `agent`.
    ///
    /// Sessions the orchestrator did not create resolve to the configured
    /// root agent.
    pub fn is_agent_allowed(&self, parent_session_id: &SessionId, agent: &str) -> bool {
        let role = self.owning_agent(parent_session_id);
        self.inner.policy.is_allowed(&role, agent)
    }

    /// Returns every agent type the owner of `parent_session_id` may spawn.
    pub fn allowed_subagents(&self, parent_session_id: &SessionId) -> Vec<String> {
        let role = self.owning_agent(parent_session_id);
        self.inner.policy.allowed_agents(&role)
    }

    fn owning_agent(&self, session: &SessionId) -> String {
        self.state()
            .session_agents
            .get(session)
            .cloned()
            .unwrap_or_else(|| self.inner.config.root_agent.clone())
    }

    /// Returns snapshots of every tracked task, oldest first.
    pub fn list_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.state().tasks.values().cloned().collect();
        tasks.sort_by_key(|task| task.created_at);
        tasks
    }

    /// Number of start sequences currently in flight.
    pub fn active_count(&self) -> usize {
        self.state().active_starts
    }

    /// Number of tasks queued and awaiting admission.
    pub fn pending_count(&self) -> usize {
        self.state().queue.len()
    }

    /// Clears all in-memory state. Intended for process shutdown; callers
    /// must retrieve results first or lose them.
    pub fn cleanup(&self) {
        *self.state() = ManagerState::default();
    }
}

/// Concatenates every assistant text/reasoning fragment, in message then
/// part order, with blank-line separators.
fn extract_output(messages: &[SessionMessage]) -> String {
    let fragments: Vec<&str> = messages
        .iter()
        .filter(|message| message.role == MessageRole::Assistant)
        .flat_map(|message| message.parts.iter())
        .filter_map(|part| match part {
            MessagePart::Text { text } | MessagePart::Reasoning { text } => Some(text.as_str()),
            MessagePart::Other => None,
        })
        .collect();
    if fragments.is_empty() {
        NO_OUTPUT.to_string()
    } else {
        fragments.join("\n\n")
    }
}
