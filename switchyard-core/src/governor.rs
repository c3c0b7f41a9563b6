// ABOUTME: Per-conversation concurrency governor -- at most one active run per conversation key.
// ABOUTME: Queues overflow messages FIFO, deduplicates double-delivery, and bounds queue memory.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::ids::{AgentId, ConversationKey, CorrelationId};
use crate::message::InboundMessage;
use crate::metrics;

/// Tuning knobs for the governor.
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Per-key FIFO bound. When full, the oldest queued item is dropped to
    /// admit the newest.
    pub queue_cap: usize,
    /// Window in which a repeated message id or identical trimmed content is
    /// treated as transport double-delivery.
    pub dedup_window: Duration,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            queue_cap: 20,
            dedup_window: Duration::from_secs(2),
        }
    }
}

/// A message waiting its turn in a conversation's FIFO lane.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub id: String,
    pub message: InboundMessage,
    pub target_agent: AgentId,
    pub correlation_id: CorrelationId,
    pub enqueued_at: DateTime<Utc>,
}

/// The governor's record that a key is being processed. Holds the sole
/// cancellation authority for that run.
#[derive(Debug, Clone)]
pub struct RunTicket {
    pub key: ConversationKey,
    pub cancel: CancellationToken,
    pub started_at: Instant,
}

/// Outcome of submitting a message for a conversation.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Nothing was running for this key; the caller must dispatch now.
    Dispatched(QueuedMessage, RunTicket),
    /// A run is active; the message was queued behind it.
    Queued { depth: usize },
    /// Double-delivery within the dedup window; not queued, not dispatched.
    Duplicate,
}

struct DedupEntry {
    message_id: String,
    content: String,
    seen_at: Instant,
}

struct ActiveRun {
    cancel: CancellationToken,
    started_at: Instant,
}

#[derive(Default)]
struct Lane {
    run: Option<ActiveRun>,
    queue: VecDeque<QueuedMessage>,
    recent: VecDeque<DedupEntry>,
}

/// Concurrency governor keyed by [`ConversationKey`].
///
/// Within one key, messages are strictly FIFO and at most one run is active
/// at any instant. Across keys, runs proceed fully in parallel.
pub struct Governor {
    lanes: Mutex<HashMap<ConversationKey, Lane>>,
    config: GovernorConfig,
}

impl Governor {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            lanes: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Submit a message for a conversation. If the key is idle, the governor
    /// marks a run as started and the caller dispatches immediately; if busy,
    /// the message is queued and the caller must not dispatch.
    pub fn submit(
        &self,
        message: InboundMessage,
        target_agent: AgentId,
        correlation_id: CorrelationId,
    ) -> SubmitOutcome {
        let key = message.conversation_key();
        let now = Instant::now();
        let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        let lane = lanes.entry(key.clone()).or_default();

        prune_dedup(lane, now, self.config.dedup_window);
        let trimmed = message.content.trim();
        let duplicate = lane
            .recent
            .iter()
            .any(|entry| entry.message_id == message.id || entry.content == trimmed);
        if duplicate {
            tracing::debug!(key = %key, msg_id = %message.id, "Dropping duplicate message");
            metrics::record_duplicate_dropped();
            return SubmitOutcome::Duplicate;
        }
        lane.recent.push_back(DedupEntry {
            message_id: message.id.clone(),
            content: trimmed.to_string(),
            seen_at: now,
        });

        let queued = QueuedMessage {
            id: message.id.clone(),
            message,
            target_agent,
            correlation_id,
            enqueued_at: Utc::now(),
        };

        if lane.run.is_none() {
            let cancel = CancellationToken::new();
            lane.run = Some(ActiveRun {
                cancel: cancel.clone(),
                started_at: now,
            });
            return SubmitOutcome::Dispatched(
                queued,
                RunTicket {
                    key,
                    cancel,
                    started_at: now,
                },
            );
        }

        if lane.queue.len() >= self.config.queue_cap {
            if let Some(dropped) = lane.queue.pop_front() {
                tracing::warn!(
                    key = %key,
                    dropped_id = %dropped.id,
                    cap = self.config.queue_cap,
                    "Conversation queue full, dropping oldest message"
                );
                metrics::record_queue_drop();
            }
        }
        lane.queue.push_back(queued);
        SubmitOutcome::Queued {
            depth: lane.queue.len(),
        }
    }

    /// Finish the active run for a key. If anything is queued, atomically
    /// claims the next message as a new run; the caller must immediately
    /// re-dispatch it, preserving FIFO order within the key.
    pub fn complete_run(&self, key: &ConversationKey) -> Option<(QueuedMessage, RunTicket)> {
        let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        let lane = lanes.get_mut(key)?;
        lane.run = None;

        if let Some(next) = lane.queue.pop_front() {
            let cancel = CancellationToken::new();
            let started_at = Instant::now();
            lane.run = Some(ActiveRun {
                cancel: cancel.clone(),
                started_at,
            });
            return Some((
                next,
                RunTicket {
                    key: key.clone(),
                    cancel,
                    started_at,
                },
            ));
        }

        // Keep the lane while dedup memory is still warm, otherwise drop it
        // so idle conversations don't accumulate.
        prune_dedup(lane, Instant::now(), self.config.dedup_window);
        if lane.recent.is_empty() {
            lanes.remove(key);
        }
        None
    }

    /// Cancel the active run (if any) and clear the key's queue. Used when a
    /// user issues an explicit stop.
    pub fn abort(&self, key: &ConversationKey) {
        let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(lane) = lanes.get_mut(key) {
            if let Some(run) = &lane.run {
                tracing::info!(key = %key, elapsed = ?run.started_at.elapsed(), "Aborting active run");
                run.cancel.cancel();
            }
            let cleared = lane.queue.len();
            lane.queue.clear();
            if cleared > 0 {
                tracing::info!(key = %key, cleared, "Cleared queued messages on abort");
            }
        }
    }

    pub fn is_busy(&self, key: &ConversationKey) -> bool {
        let lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        lanes.get(key).map(|l| l.run.is_some()).unwrap_or(false)
    }

    pub fn queue_depth(&self, key: &ConversationKey) -> usize {
        let lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        lanes.get(key).map(|l| l.queue.len()).unwrap_or(0)
    }
}

fn prune_dedup(lane: &mut Lane, now: Instant, window: Duration) {
    while let Some(front) = lane.recent.front() {
        if now.duration_since(front.seen_at) > window {
            lane.recent.pop_front();
        } else {
            break;
        }
    }
}
