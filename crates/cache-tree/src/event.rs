//! Cache event notifications
//!
//! Nodes report structural changes, swallowed hook failures, and sweep
//! completions over an unbounded channel supplied at construction. Sends
//! never block or await, and a dropped receiver silently disables delivery;
//! past events are not replayed to late subscribers.

use tokio::sync::mpsc;

use crate::error::HookError;

/// Phase during which a hook failure was swallowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    /// A loader invocation made on behalf of a `fetch`.
    Fetch,
    /// A checker invocation made on behalf of an `exists` probe.
    Exists,
}

/// Outcome of a single backing-store save dispatched by a sweep.
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    /// Full (namespaced) key the save was dispatched for.
    pub key: String,
    /// `Ok` when the saver resolved, otherwise the captured failure.
    pub result: Result<(), HookError>,
}

/// Notification emitted by cache nodes.
#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// A new subcache was installed. `parent` is the creating node's
    /// namespace prefix, `key` the composed full key of the new subcache.
    SubcacheCreated { parent: String, key: String },
    /// A hook failure was swallowed; the operation resolved as a miss.
    HookFailure {
        phase: HookPhase,
        key: String,
        error: HookError,
    },
    /// A backup sweep finished on the node with namespace `prefix`.
    BackupComplete {
        prefix: String,
        outcomes: Vec<SaveOutcome>,
    },
    /// A cleanup sweep finished on the node with namespace `prefix`.
    CleanupComplete {
        prefix: String,
        outcomes: Vec<SaveOutcome>,
    },
}

/// Sending half held by every node in a tree.
pub type EventSender = mpsc::UnboundedSender<CacheEvent>;

/// Create an event channel suitable for
/// [`CacheBuilder::events`](crate::CacheBuilder::events).
pub fn channel() -> (EventSender, mpsc::UnboundedReceiver<CacheEvent>) {
    mpsc::unbounded_channel()
}
