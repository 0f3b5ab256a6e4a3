//! Tree sweeps
//!
//! Two recursive maintenance walks over a cache tree. `backup` persists
//! dirty items whose last successful save is older than a threshold;
//! `cleanup` evicts items unread past a threshold, persisting dirty evictees
//! when a saver is available. Each node dispatches all of its eligible saves
//! and child sweeps at once, then joins them before resolving and notifying,
//! so a parent sees every child subtree as one settled unit.

use std::time::{Duration, Instant};

use futures_util::future::{join, join_all, BoxFuture};
use futures_util::FutureExt;
use tracing::debug;

use crate::event::{CacheEvent, SaveOutcome};
use crate::node::{CacheNode, Entry};

impl<T> CacheNode<T>
where
    T: Clone + Send + 'static,
{
    /// Persist every dirty item in the subtree whose last successful save is
    /// older than `max_age`. A never-saved dirty item is always eligible.
    ///
    /// Returns one outcome per dispatched save, descendants included; saver
    /// failures are captured in the outcomes, never raised. The node emits a
    /// [`CacheEvent::BackupComplete`] once its own saves and every child
    /// sweep have settled. A node without a saver resolves immediately with
    /// no side effects.
    ///
    /// A successful save does not clear the item's dirty flag: the item
    /// stays eligible and is saved again by the next sweep past the
    /// threshold, until it is rewritten or evicted.
    pub fn backup(&mut self, max_age: Duration) -> BoxFuture<'_, Vec<SaveOutcome>> {
        async move {
            let Some(saver) = self.hooks.saver.clone() else {
                return Vec::new();
            };
            let now = Instant::now();
            let prefix = self.prefix.clone();
            let mut save_futs = Vec::new();
            let mut child_futs = Vec::new();
            for entry in self.entries.values_mut() {
                match entry {
                    Entry::Item(item) => {
                        if item.save_overdue(max_age, now) {
                            let key = format!("{prefix}{}", item.key);
                            let data = item.data.clone();
                            let saver = saver.clone();
                            save_futs.push(async move {
                                let result = saver(key.clone(), data).await;
                                SaveOutcome { key, result }
                            });
                        }
                    }
                    Entry::Nested(child) => child_futs.push(child.backup(max_age)),
                }
            }
            let (own, nested) = join(join_all(save_futs), join_all(child_futs)).await;
            let mut outcomes = own;
            for child_outcomes in nested {
                outcomes.extend(child_outcomes);
            }
            debug!(prefix = %prefix, saves = outcomes.len(), "backup sweep complete");
            self.emit(CacheEvent::BackupComplete {
                prefix,
                outcomes: outcomes.clone(),
            });
            outcomes
        }
        .boxed()
    }

    /// Evict every item in the subtree unread for longer than `max_age`.
    ///
    /// Expired items are removed from the entry map strictly before any save
    /// is dispatched, so work interleaving with the sweep's suspension
    /// points never observes an entry that is both expired and still
    /// readable. Dirty evictees are persisted through the saver, with
    /// failures captured in the outcomes. Subcache entries are recursed
    /// into, never evicted themselves. The node emits a
    /// [`CacheEvent::CleanupComplete`] once its saves and child sweeps have
    /// settled.
    ///
    /// Without a saver the sweep degrades to a memory-only walk over the
    /// subtree that discards expired items outright, dirty or not.
    pub fn cleanup(&mut self, max_age: Duration) -> BoxFuture<'_, Vec<SaveOutcome>> {
        async move {
            let Some(saver) = self.hooks.saver.clone() else {
                self.clean_no_save(max_age);
                return Vec::new();
            };
            let now = Instant::now();
            let prefix = self.prefix.clone();
            // stable snapshot of the keys to visit; eviction below mutates
            // the map before anything is awaited
            let keys: Vec<String> = self.entries.keys().cloned().collect();
            let mut save_futs = Vec::new();
            for local in keys {
                let expired = matches!(
                    self.entries.get(&local),
                    Some(Entry::Item(item)) if item.idle(max_age, now)
                );
                if !expired {
                    continue;
                }
                if let Some(Entry::Item(item)) = self.entries.remove(&local) {
                    if item.dirty {
                        let key = format!("{prefix}{}", item.key);
                        let data = item.data;
                        let saver = saver.clone();
                        save_futs.push(async move {
                            let result = saver(key.clone(), data).await;
                            SaveOutcome { key, result }
                        });
                    }
                }
            }
            let child_futs: Vec<_> = self
                .entries
                .values_mut()
                .filter_map(|entry| match entry {
                    Entry::Nested(child) => Some(child.cleanup(max_age)),
                    _ => None,
                })
                .collect();
            let (own, nested) = join(join_all(save_futs), join_all(child_futs)).await;
            let mut outcomes = own;
            for child_outcomes in nested {
                outcomes.extend(child_outcomes);
            }
            debug!(prefix = %prefix, saves = outcomes.len(), "cleanup sweep complete");
            self.emit(CacheEvent::CleanupComplete {
                prefix,
                outcomes: outcomes.clone(),
            });
            outcomes
        }
        .boxed()
    }

    /// Memory-only expiry for saver-less subtrees. Dirty items are discarded
    /// along with clean ones; children are walked the same way regardless of
    /// their own hooks.
    fn clean_no_save(&mut self, max_age: Duration) {
        let now = Instant::now();
        let keys: Vec<String> = self.entries.keys().cloned().collect();
        for local in keys {
            let expired = matches!(
                self.entries.get(&local),
                Some(Entry::Item(item)) if item.idle(max_age, now)
            );
            if expired {
                self.entries.remove(&local);
                continue;
            }
            if let Some(Entry::Nested(child)) = self.entries.get_mut(&local) {
                child.clean_no_save(max_age);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::thread::sleep;
    use std::time::Duration;

    use crate::event::{self, CacheEvent};
    use crate::node::CacheNode;

    type SaveLog = Arc<Mutex<Vec<(String, i32)>>>;

    fn cache_with_saver() -> (CacheNode<i32>, SaveLog) {
        let log: SaveLog = Arc::new(Mutex::new(Vec::new()));
        let saves = log.clone();
        let cache = CacheNode::builder()
            .saver(move |key, value| {
                let saves = saves.clone();
                async move {
                    saves.lock().unwrap().push((key, value));
                    Ok(())
                }
            })
            .build();
        (cache, log)
    }

    #[tokio::test]
    async fn test_backup_saves_dirty_item_once() {
        let (tx, mut rx) = event::channel();
        let log: SaveLog = Arc::new(Mutex::new(Vec::new()));
        let saves = log.clone();
        let mut cache = CacheNode::builder()
            .saver(move |key, value| {
                let saves = saves.clone();
                async move {
                    saves.lock().unwrap().push((key, value));
                    Ok(())
                }
            })
            .events(tx)
            .build();

        cache.insert("a", 1);
        let outcomes = cache.backup(Duration::ZERO).await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].key, "/a");
        assert!(outcomes[0].result.is_ok());
        assert_eq!(log.lock().unwrap().as_slice(), &[("/a".to_string(), 1)]);

        match rx.try_recv().unwrap() {
            CacheEvent::BackupComplete { prefix, outcomes } => {
                assert_eq!(prefix, "/");
                assert_eq!(outcomes.len(), 1);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_backup_leaves_item_dirty_and_saves_again() {
        let (mut cache, log) = cache_with_saver();
        cache.insert("a", 1);

        cache.backup(Duration::ZERO).await;
        assert_eq!(cache.stats().dirty, 1);
        assert_eq!(cache.get("a"), Some(1));

        cache.backup(Duration::ZERO).await;
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_backup_skips_clean_items() {
        let (mut cache, log) = cache_with_saver();
        cache.store("b", 2).await.unwrap();
        assert_eq!(log.lock().unwrap().len(), 1);

        let outcomes = cache.backup(Duration::ZERO).await;
        assert!(outcomes.is_empty());
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_backup_honors_save_age_threshold() {
        let (mut cache, log) = cache_with_saver();
        // store commits optimistically, the rewrite dirties the item but
        // keeps its save time
        cache.store("x", 1).await.unwrap();
        cache.insert("x", 2);

        let outcomes = cache.backup(Duration::from_secs(3600)).await;
        assert!(outcomes.is_empty());

        sleep(Duration::from_millis(5));
        let outcomes = cache.backup(Duration::ZERO).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(
            log.lock().unwrap().last().cloned(),
            Some(("/x".to_string(), 2))
        );
    }

    #[tokio::test]
    async fn test_backup_without_saver_resolves_empty() {
        let (tx, mut rx) = event::channel();
        let mut cache: CacheNode<i32> = CacheNode::builder().events(tx).build();
        cache.insert("a", 1);

        let outcomes = cache.backup(Duration::ZERO).await;
        assert!(outcomes.is_empty());
        assert!(cache.contains("a"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_backup_recurses_into_subcaches() {
        let (mut cache, log) = cache_with_saver();
        cache.subcache("users").insert("7", 9);

        let outcomes = cache.backup(Duration::ZERO).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].key, "/users/7");
        assert_eq!(
            log.lock().unwrap().as_slice(),
            &[("/users/7".to_string(), 9)]
        );
    }

    #[tokio::test]
    async fn test_backup_captures_saver_failure() {
        let mut cache = CacheNode::builder()
            .saver(|_key, _value: i32| async move { Err("disk-full".into()) })
            .build();
        cache.insert("a", 1);

        let outcomes = cache.backup(Duration::ZERO).await;
        assert_eq!(outcomes.len(), 1);
        let err = outcomes[0].result.as_ref().unwrap_err();
        assert_eq!(err.to_string(), "disk-full");
        // the item survives a failed backup untouched
        assert!(cache.contains("a"));
    }

    #[tokio::test]
    async fn test_cleanup_evicts_and_persists_dirty_item() {
        let (tx, mut rx) = event::channel();
        let log: SaveLog = Arc::new(Mutex::new(Vec::new()));
        let saves = log.clone();
        let mut cache = CacheNode::builder()
            .saver(move |key, value| {
                let saves = saves.clone();
                async move {
                    saves.lock().unwrap().push((key, value));
                    Ok(())
                }
            })
            .events(tx)
            .build();

        cache.insert("a", 1);
        sleep(Duration::from_millis(5));
        let outcomes = cache.cleanup(Duration::ZERO).await;

        assert!(!cache.contains("a"));
        assert_eq!(outcomes.len(), 1);
        assert_eq!(log.lock().unwrap().as_slice(), &[("/a".to_string(), 1)]);

        match rx.try_recv().unwrap() {
            CacheEvent::CleanupComplete { prefix, outcomes } => {
                assert_eq!(prefix, "/");
                assert_eq!(outcomes.len(), 1);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cleanup_does_not_save_clean_evictees() {
        let (mut cache, log) = cache_with_saver();
        cache.store("b", 2).await.unwrap();
        assert_eq!(log.lock().unwrap().len(), 1);

        sleep(Duration::from_millis(5));
        let outcomes = cache.cleanup(Duration::ZERO).await;

        assert!(!cache.contains("b"));
        assert!(outcomes.is_empty());
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_recently_accessed_items() {
        let (mut cache, _log) = cache_with_saver();
        cache.insert("a", 1);

        let outcomes = cache.cleanup(Duration::from_secs(60)).await;
        assert!(outcomes.is_empty());
        assert!(cache.contains("a"));
    }

    #[tokio::test]
    async fn test_cleanup_recurses_without_evicting_subcache_entry() {
        let (mut cache, _log) = cache_with_saver();
        cache.subcache("users").insert("7", 9);

        sleep(Duration::from_millis(5));
        let outcomes = cache.cleanup(Duration::ZERO).await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].key, "/users/7");
        // the subcache slot itself survives, emptied
        assert!(cache.contains("users/"));
        assert!(cache.subcache("users").is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_without_saver_discards_silently() {
        let (tx, mut rx) = event::channel();
        let mut cache: CacheNode<i32> = CacheNode::builder().events(tx).build();
        cache.insert("a", 1);
        cache.subcache("users").insert("7", 9);

        sleep(Duration::from_millis(5));
        let outcomes = cache.cleanup(Duration::ZERO).await;

        assert!(outcomes.is_empty());
        assert!(!cache.contains("a"));
        assert!(cache.subcache("users").is_empty());
        // only the subcreate notifications, no sweep completions
        while let Ok(event) = rx.try_recv() {
            assert!(matches!(event, CacheEvent::SubcacheCreated { .. }));
        }
    }

    #[tokio::test]
    async fn test_cleanup_captures_saver_failure() {
        let mut cache = CacheNode::builder()
            .saver(|_key, _value: i32| async move { Err("disk-full".into()) })
            .build();
        cache.insert("a", 1);

        sleep(Duration::from_millis(5));
        let outcomes = cache.cleanup(Duration::ZERO).await;

        // eviction stands even though the save failed
        assert!(!cache.contains("a"));
        assert_eq!(outcomes.len(), 1);
        assert_eq!(
            outcomes[0].result.as_ref().unwrap_err().to_string(),
            "disk-full"
        );
    }

    #[tokio::test]
    async fn test_full_lifecycle_against_backing_map() {
        let store: Arc<Mutex<HashMap<String, i32>>> = Arc::new(Mutex::new(HashMap::new()));
        store.lock().unwrap().insert("/sessions/alpha".to_string(), 40);

        let load_store = store.clone();
        let save_store = store.clone();
        let delete_store = store.clone();
        let mut cache = CacheNode::builder()
            .loader(move |key| {
                let store = load_store.clone();
                async move { Ok(store.lock().unwrap().get(&key).copied()) }
            })
            .saver(move |key, value| {
                let store = save_store.clone();
                async move {
                    store.lock().unwrap().insert(key, value);
                    Ok(())
                }
            })
            .deleter(move |key| {
                let store = delete_store.clone();
                async move { Ok(store.lock().unwrap().remove(&key).is_some()) }
            })
            .build();

        let sessions = cache.subcache("sessions");

        // miss resolved through the loader
        assert_eq!(sessions.fetch("alpha").await, Some(40));

        // local rewrite goes dirty, backup pushes it out
        sessions.insert("alpha", 41);
        assert_eq!(store.lock().unwrap().get("/sessions/alpha"), Some(&40));
        cache.backup(Duration::ZERO).await;
        assert_eq!(store.lock().unwrap().get("/sessions/alpha"), Some(&41));

        // idle eviction persists the still-dirty value and empties memory
        cache.subcache("sessions").insert("alpha", 42);
        sleep(Duration::from_millis(5));
        cache.cleanup(Duration::ZERO).await;
        assert!(cache.subcache("sessions").is_empty());
        assert_eq!(store.lock().unwrap().get("/sessions/alpha"), Some(&42));

        // the evicted value comes back through the loader
        assert_eq!(cache.subcache("sessions").fetch("alpha").await, Some(42));

        // remove clears both sides
        cache.subcache("sessions").remove("alpha").await.unwrap();
        assert!(store.lock().unwrap().get("/sessions/alpha").is_none());
        assert!(!cache.subcache("sessions").contains("alpha"));
    }
}
