//! Hierarchical write-back cache over pluggable backing-store hooks
//!
//! A cache tree keeps values in memory, lazily resolves misses through an
//! optional async loader, tracks dirty entries for deferred persistence, and
//! composes into nested subcaches that share one key namespace and hook set.
//! Two time-boxed sweeps maintain a tree: [`CacheNode::backup`] re-saves
//! dirty items that have gone unsaved past a threshold and
//! [`CacheNode::cleanup`] evicts items unread past a threshold, persisting
//! dirty evictees on the way out.
//!
//! The cache owns no storage of its own; everything it knows about the
//! backing store goes through the four optional hooks (load, save, check,
//! delete) and the optional reviver transform.
//!
//! ```no_run
//! use cache_tree::CacheNode;
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let mut cache = CacheNode::builder()
//!     .loader(|key| async move { Ok(lookup(&key).await) })
//!     .saver(|key, value: String| async move { persist(&key, &value).await })
//!     .build();
//!
//! let users = cache.subcache("users");
//! let _profile = users.fetch("7").await;         // miss goes to the loader
//! users.insert("7", "renamed".to_string());      // dirty, memory-only
//! cache.backup(Duration::from_secs(60)).await;   // persists overdue items
//! # }
//! # async fn lookup(_k: &str) -> Option<String> { None }
//! # async fn persist(_k: &str, _v: &str) -> cache_tree::HookResult<()> { Ok(()) }
//! ```

mod error;
mod event;
pub mod hooks;
mod item;
pub mod key;
mod node;
mod sweep;

pub use error::{HookError, HookResult};
pub use event::{channel, CacheEvent, EventSender, HookPhase, SaveOutcome};
pub use hooks::{Checker, Deleter, Loader, Reviver, Saver};
pub use node::{CacheBuilder, CacheNode, CacheStats, Settings};
