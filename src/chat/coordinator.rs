use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::agent::Agent;
use crate::chat::{TurnReport, UiUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Started,
    /// Queued behind the in-flight turn; carries the queue depth.
    Queued(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct InterruptOutcome {
    pub cancelled: bool,
    pub started_next: bool,
}

/// Coordination layer between a front-end and the agent: one turn in flight
/// at a time, FIFO queueing of input that arrives mid-turn, and prompt
/// interruption. Rendering stays with the front-end.
pub struct ChatCoordinator {
    agent: Arc<Mutex<Agent>>,
    updates_tx: mpsc::UnboundedSender<UiUpdate>,
    updates_rx: Option<mpsc::UnboundedReceiver<UiUpdate>>,
    queue: VecDeque<String>,
    turn: Option<JoinHandle<()>>,
}

impl ChatCoordinator {
    pub fn new(agent: Agent) -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Self::from_parts(agent, updates_tx, updates_rx)
    }

    /// Builds around an existing update channel, so collaborators created
    /// before the coordinator (gates, executors) can hold the sender.
    pub fn from_parts(
        agent: Agent,
        updates_tx: mpsc::UnboundedSender<UiUpdate>,
        updates_rx: mpsc::UnboundedReceiver<UiUpdate>,
    ) -> Self {
        Self {
            agent: Arc::new(Mutex::new(agent)),
            updates_tx,
            updates_rx: Some(updates_rx),
            queue: VecDeque::new(),
            turn: None,
        }
    }

    /// Detaches the update receiver so a front-end can poll it alongside
    /// other inputs without borrowing the coordinator.
    pub fn take_updates(&mut self) -> Option<mpsc::UnboundedReceiver<UiUpdate>> {
        self.updates_rx.take()
    }

    /// Shared handle for collaborators (permission checker, command
    /// executor) that report through the same update stream.
    pub fn updates_sender(&self) -> mpsc::UnboundedSender<UiUpdate> {
        self.updates_tx.clone()
    }

    pub fn agent(&self) -> Arc<Mutex<Agent>> {
        Arc::clone(&self.agent)
    }

    pub fn turn_in_flight(&self) -> bool {
        self.turn.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn queued_preview(&self) -> Option<&str> {
        self.queue.front().map(|s| s.as_str())
    }

    pub fn clear_queue(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }

    /// Starts a turn, or queues the message when one is already running.
    pub fn submit(&mut self, text: &str) -> SubmitOutcome {
        if self.turn_in_flight() {
            self.queue.push_back(text.to_string());
            return SubmitOutcome::Queued(self.queue.len());
        }
        self.start_turn(text.to_string());
        SubmitOutcome::Started
    }

    /// Called by the front-end after rendering a `TurnFinished` update.
    /// Starts the oldest queued message, if any.
    pub fn on_turn_finished(&mut self) -> bool {
        if self.turn_in_flight() {
            return false;
        }
        self.turn = None;
        if let Some(next) = self.queue.pop_front() {
            self.start_turn(next);
            return true;
        }
        false
    }

    /// Aborts the in-flight turn. Messages the agent already appended stay
    /// in the conversation; results still being produced are dropped with
    /// the task. The oldest queued message starts next, when one exists.
    pub fn interrupt(&mut self) -> InterruptOutcome {
        let Some(handle) = self.turn.take() else {
            return InterruptOutcome {
                cancelled: false,
                started_next: false,
            };
        };
        let cancelled = !handle.is_finished();
        handle.abort();
        let started_next = match self.queue.pop_front() {
            Some(next) => {
                self.start_turn(next);
                true
            }
            None => false,
        };
        InterruptOutcome {
            cancelled,
            started_next,
        }
    }

    pub async fn next_update(&mut self) -> Option<UiUpdate> {
        match self.updates_rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    fn start_turn(&mut self, text: String) {
        let agent = Arc::clone(&self.agent);
        let tx = self.updates_tx.clone();
        self.turn = Some(tokio::spawn(async move {
            let mut agent = agent.lock().await;
            let report = match agent.chat(&text).await {
                Ok(outcome) => TurnReport {
                    content: outcome.content,
                    tool_calls: outcome.tool_calls,
                    error: None,
                },
                Err(e) => TurnReport {
                    content: String::new(),
                    tool_calls: Vec::new(),
                    error: Some(e.to_string()),
                },
            };
            let _ = tx.send(UiUpdate::TurnFinished(report));
        }));
    }
}
