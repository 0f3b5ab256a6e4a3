//! Cache tree nodes
//!
//! A node owns a flat map from local key to either a cached item or a nested
//! subcache. Reads and writes are memory-first; the backing store is reached
//! only through the optional hooks supplied at construction or via
//! [`CacheNode::configure`]. Subcaches share the parent's hooks and extend
//! its namespace prefix, forming a tree over one key space.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::HookError;
use crate::event::{CacheEvent, EventSender, HookPhase};
use crate::hooks::{Checker, Deleter, Hooks, Loader, Reviver, Saver};
use crate::item::Item;
use crate::key::{self, DEFAULT_SEPARATOR};

/// One slot in a node's entry map: a cached value or a nested subcache.
/// Keys are unique within a node; items live under their raw local key,
/// subcaches under their separator-terminated one, so the two kinds never
/// collide.
pub(crate) enum Entry<T> {
    Item(Item<T>),
    Nested(CacheNode<T>),
}

/// One level of a cache tree.
///
/// The node prepends its namespace prefix to every local key before handing
/// it to a hook, so all nodes of a tree address one shared key space in the
/// backing store. A parent exclusively owns its subcaches through the entry
/// map; dropping a node drops its whole subtree.
pub struct CacheNode<T> {
    pub(crate) prefix: String,
    pub(crate) separator: char,
    pub(crate) entries: HashMap<String, Entry<T>>,
    pub(crate) hooks: Hooks<T>,
    pub(crate) reviver: Option<Reviver<T>>,
    pub(crate) events: Option<EventSender>,
    pub(crate) hits: u64,
    pub(crate) misses: u64,
}

/// Aggregated statistics for a node and its whole subtree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub items: usize,
    pub subcaches: usize,
    pub dirty: usize,
    pub hits: u64,
    pub misses: u64,
}

impl<T> CacheNode<T>
where
    T: Clone + Send + 'static,
{
    /// Start building a root node.
    pub fn builder() -> CacheBuilder<T> {
        CacheBuilder::new()
    }

    /// Namespace prefix prepended to this node's local keys. Always ends in
    /// the separator.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Namespace separator, fixed for the whole tree at root construction.
    pub fn separator(&self) -> char {
        self.separator
    }

    /// Number of local entries (items and subcaches).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn full_key(&self, local: &str) -> String {
        format!("{}{}", self.prefix, local)
    }

    pub(crate) fn emit(&self, event: CacheEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Memory-only read. Refreshes the access time on hit; never consults
    /// the backing store.
    pub fn get(&mut self, key: &str) -> Option<T> {
        match self.entries.get_mut(key) {
            Some(Entry::Item(item)) => {
                item.touch();
                self.hits += 1;
                Some(item.data.clone())
            }
            _ => {
                self.misses += 1;
                None
            }
        }
    }

    /// Memory-only membership test. True for items and subcaches alike;
    /// does not refresh access times.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Memory-only write. Updates an existing item in place (refreshing its
    /// access time and marking it dirty) or inserts a new dirty item. Never
    /// invokes the saver.
    pub fn insert(&mut self, key: &str, value: T) {
        if let Some(Entry::Item(item)) = self.entries.get_mut(key) {
            item.update(value);
            return;
        }
        self.entries
            .insert(key.to_string(), Entry::Item(Item::fresh(key.to_string(), value)));
    }

    /// Read through the loader on miss.
    ///
    /// A resident item is returned directly with its access time refreshed;
    /// the loader is never consulted for it. On a miss the loader (when
    /// configured) resolves the full key; a loaded value passes through the
    /// reviver before being cached clean. A loader failure is swallowed: the
    /// call resolves `None` and a [`HookPhase::Fetch`] failure event is
    /// emitted, indistinguishable from "not found" to the caller.
    pub async fn fetch(&mut self, key: &str) -> Option<T> {
        if let Some(Entry::Item(item)) = self.entries.get_mut(key) {
            item.touch();
            self.hits += 1;
            return Some(item.data.clone());
        }
        self.misses += 1;
        // a slot held by a subcache carries no data and is not loadable
        if self.entries.contains_key(key) {
            return None;
        }
        let loader = self.hooks.loader.clone()?;
        let full = self.full_key(key);
        match loader(full.clone()).await {
            Ok(Some(raw)) => {
                let value = match &self.reviver {
                    Some(revive) => revive(raw),
                    None => raw,
                };
                self.entries.insert(
                    key.to_string(),
                    Entry::Item(Item::synced(key.to_string(), value.clone())),
                );
                Some(value)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(key = %full, error = %err, "loader failed, treating as miss");
                self.emit(CacheEvent::HookFailure {
                    phase: HookPhase::Fetch,
                    key: full,
                    error: err,
                });
                None
            }
        }
    }

    /// Write-through store.
    ///
    /// The local entry is replaced with a clean item before the backing
    /// write is attempted, and is not rolled back if that write fails. A
    /// saver failure is returned as the outcome value, never raised; without
    /// a saver only the local commit happens.
    pub async fn store(&mut self, key: &str, value: T) -> Result<(), HookError> {
        self.entries.insert(
            key.to_string(),
            Entry::Item(Item::synced(key.to_string(), value.clone())),
        );
        let Some(saver) = self.hooks.saver.clone() else {
            return Ok(());
        };
        let full = self.full_key(key);
        match saver(full.clone(), value).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(key = %full, error = %err, "saver failed");
                Err(err)
            }
        }
    }

    /// Remove the local entry (item or subcache) and delete the key from the
    /// backing store.
    ///
    /// Local removal happens first and is unconditional. A deleter failure
    /// is returned as the outcome value, never raised; without a deleter
    /// only the local removal happens.
    pub async fn remove(&mut self, key: &str) -> Result<(), HookError> {
        self.entries.remove(key);
        let Some(deleter) = self.hooks.deleter.clone() else {
            return Ok(());
        };
        let full = self.full_key(key);
        match deleter(full.clone()).await {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(key = %full, error = %err, "deleter failed");
                Err(err)
            }
        }
    }

    /// Remove the local entry without ever consulting the deleter. Returns
    /// whether anything was removed.
    pub fn evict(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Membership check falling back to the backing store.
    ///
    /// A locally present entry answers `true` without any hook call.
    /// Otherwise the checker (when configured) probes the backing store; a
    /// checker failure is swallowed into `false` with a
    /// [`HookPhase::Exists`] failure event.
    pub async fn exists(&self, key: &str) -> bool {
        if self.entries.contains_key(key) {
            return true;
        }
        let Some(checker) = self.hooks.checker.clone() else {
            return false;
        };
        let full = self.full_key(key);
        match checker(full.clone()).await {
            Ok(found) => found,
            Err(err) => {
                warn!(key = %full, error = %err, "checker failed, treating as absent");
                self.emit(CacheEvent::HookFailure {
                    phase: HookPhase::Exists,
                    key: full,
                    error: err,
                });
                false
            }
        }
    }

    /// Get or create the subcache nested under `key`.
    ///
    /// Creation is idempotent: an existing subcache at the normalized key is
    /// returned as is. A new subcache copies this node's current hooks and
    /// event sender, extends its namespace prefix with the normalized key,
    /// and announces itself with a [`CacheEvent::SubcacheCreated`].
    pub fn subcache(&mut self, key: &str) -> &mut CacheNode<T> {
        self.subcache_inner(key, None)
    }

    /// Like [`CacheNode::subcache`], giving the new subcache its own reviver.
    /// An existing subcache keeps the reviver it already has.
    pub fn subcache_with_reviver(&mut self, key: &str, reviver: Reviver<T>) -> &mut CacheNode<T> {
        self.subcache_inner(key, Some(reviver))
    }

    fn subcache_inner(&mut self, key: &str, reviver: Option<Reviver<T>>) -> &mut CacheNode<T> {
        let local = key::normalize(key, self.separator);
        if !matches!(self.entries.get(&local), Some(Entry::Nested(_))) {
            let composed = key::compose(Some(&self.prefix), key, self.separator);
            let child = CacheNode {
                prefix: composed.clone(),
                separator: self.separator,
                entries: HashMap::new(),
                hooks: self.hooks.clone(),
                reviver,
                events: self.events.clone(),
                hits: 0,
                misses: 0,
            };
            self.entries.insert(local.clone(), Entry::Nested(child));
            self.emit(CacheEvent::SubcacheCreated {
                parent: self.prefix.clone(),
                key: composed,
            });
        }
        match self.entries.get_mut(&local) {
            Some(Entry::Nested(node)) => node,
            _ => unreachable!("subcache slot was just installed"),
        }
    }

    /// Apply hook and namespace overrides.
    ///
    /// Each hook present in `settings` replaces this node's hook; absent
    /// fields are left untouched, so hooks cannot be unset this way. A new
    /// namespace key is normalized into this node's prefix. With `propagate`
    /// the same overrides recurse into every nested subcache, recomputing
    /// each child's key against the new prefix only when this node's prefix
    /// actually changed; item entries are never descended into.
    pub fn configure(&mut self, settings: &Settings<T>, propagate: bool) {
        if let Some(loader) = &settings.loader {
            self.hooks.loader = Some(loader.clone());
        }
        if let Some(saver) = &settings.saver {
            self.hooks.saver = Some(saver.clone());
        }
        if let Some(checker) = &settings.checker {
            self.hooks.checker = Some(checker.clone());
        }
        if let Some(deleter) = &settings.deleter {
            self.hooks.deleter = Some(deleter.clone());
        }

        let mut key_changed = false;
        if let Some(new_key) = &settings.key {
            let next = key::normalize(new_key, self.separator);
            key_changed = next != self.prefix;
            self.prefix = next;
        }

        if !propagate {
            return;
        }
        let prefix = self.prefix.clone();
        let separator = self.separator;
        for (local, entry) in self.entries.iter_mut() {
            if let Entry::Nested(child) = entry {
                let mut child_settings = settings.clone();
                child_settings.key = if key_changed {
                    Some(key::compose(Some(&prefix), local, separator))
                } else {
                    None
                };
                child.configure(&child_settings, true);
            }
        }
    }

    /// Aggregate statistics over this node and every nested subcache.
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            hits: self.hits,
            misses: self.misses,
            ..CacheStats::default()
        };
        for entry in self.entries.values() {
            match entry {
                Entry::Item(item) => {
                    stats.items += 1;
                    if item.dirty {
                        stats.dirty += 1;
                    }
                }
                Entry::Nested(child) => {
                    stats.subcaches += 1;
                    let nested = child.stats();
                    stats.items += nested.items;
                    stats.subcaches += nested.subcaches;
                    stats.dirty += nested.dirty;
                    stats.hits += nested.hits;
                    stats.misses += nested.misses;
                }
            }
        }
        stats
    }
}

/// Builder for a root [`CacheNode`].
///
/// The separator is a construction-time-only setting: subcaches inherit it
/// and there is no way to change it on an existing tree.
pub struct CacheBuilder<T> {
    key: Option<String>,
    separator: char,
    hooks: Hooks<T>,
    reviver: Option<Reviver<T>>,
    events: Option<EventSender>,
}

impl<T> CacheBuilder<T> {
    fn new() -> Self {
        Self {
            key: None,
            separator: DEFAULT_SEPARATOR,
            hooks: Hooks::default(),
            reviver: None,
            events: None,
        }
    }

    /// Namespace key of the root; normalized to end in the separator.
    /// Defaults to the bare separator.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Namespace separator for the whole tree. Defaults to
    /// [`DEFAULT_SEPARATOR`].
    pub fn separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    /// Install a loader hook.
    pub fn loader<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = crate::error::HookResult<Option<T>>> + Send + 'static,
    {
        self.hooks.loader = Some(crate::hooks::loader(f));
        self
    }

    /// Install a saver hook.
    pub fn saver<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(String, T) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = crate::error::HookResult<()>> + Send + 'static,
    {
        self.hooks.saver = Some(crate::hooks::saver(f));
        self
    }

    /// Install a checker hook.
    pub fn checker<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = crate::error::HookResult<bool>> + Send + 'static,
    {
        self.hooks.checker = Some(crate::hooks::checker(f));
        self
    }

    /// Install a deleter hook.
    pub fn deleter<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = crate::error::HookResult<bool>> + Send + 'static,
    {
        self.hooks.deleter = Some(crate::hooks::deleter(f));
        self
    }

    /// Install a reviver applied to freshly loaded values.
    pub fn reviver<F>(mut self, f: F) -> Self
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        self.reviver = Some(crate::hooks::reviver(f));
        self
    }

    /// Deliver node events to `sender`. Subcaches share the sender.
    pub fn events(mut self, sender: EventSender) -> Self {
        self.events = Some(sender);
        self
    }

    /// Build the root node.
    pub fn build(self) -> CacheNode<T> {
        let prefix = key::normalize(self.key.as_deref().unwrap_or(""), self.separator);
        CacheNode {
            prefix,
            separator: self.separator,
            entries: HashMap::new(),
            hooks: self.hooks,
            reviver: self.reviver,
            events: self.events,
            hits: 0,
            misses: 0,
        }
    }
}

/// Hook and namespace overrides applied by [`CacheNode::configure`].
///
/// Only fields that are set are applied; everything else keeps its current
/// value. There is deliberately no separator override here.
pub struct Settings<T> {
    pub(crate) loader: Option<Loader<T>>,
    pub(crate) saver: Option<Saver<T>>,
    pub(crate) checker: Option<Checker>,
    pub(crate) deleter: Option<Deleter>,
    pub(crate) key: Option<String>,
}

impl<T> Settings<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the node's namespace key.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Override the loader hook.
    pub fn loader<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = crate::error::HookResult<Option<T>>> + Send + 'static,
    {
        self.loader = Some(crate::hooks::loader(f));
        self
    }

    /// Override the saver hook.
    pub fn saver<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(String, T) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = crate::error::HookResult<()>> + Send + 'static,
    {
        self.saver = Some(crate::hooks::saver(f));
        self
    }

    /// Override the checker hook.
    pub fn checker<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = crate::error::HookResult<bool>> + Send + 'static,
    {
        self.checker = Some(crate::hooks::checker(f));
        self
    }

    /// Override the deleter hook.
    pub fn deleter<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = crate::error::HookResult<bool>> + Send + 'static,
    {
        self.deleter = Some(crate::hooks::deleter(f));
        self
    }
}

impl<T> Default for Settings<T> {
    fn default() -> Self {
        Self {
            loader: None,
            saver: None,
            checker: None,
            deleter: None,
            key: None,
        }
    }
}

impl<T> Clone for Settings<T> {
    fn clone(&self) -> Self {
        Self {
            loader: self.loader.clone(),
            saver: self.saver.clone(),
            checker: self.checker.clone(),
            deleter: self.deleter.clone(),
            key: self.key.clone(),
        }
    }
}
