//! Backing-store hook types
//!
//! A node reaches its backing store only through these optional async hooks,
//! each invoked with the full (namespaced) key. Hooks are stored as `Arc`'d
//! boxed-future closures so subcaches can share them; the adapter functions
//! below lift plain async closures into the stored shape.
//!
//! Absent hooks are modeled as `None`, not as no-op defaults: a missing
//! loader turns `fetch` into a memory-only lookup, a missing saver disables
//! write-through and switches `cleanup` to its memory-only walk, and so on.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::error::HookResult;

/// Resolves a full key against the backing store. `Ok(None)` means
/// "not found".
pub type Loader<T> = Arc<dyn Fn(String) -> BoxFuture<'static, HookResult<Option<T>>> + Send + Sync>;

/// Persists a value under a full key.
pub type Saver<T> = Arc<dyn Fn(String, T) -> BoxFuture<'static, HookResult<()>> + Send + Sync>;

/// Probes the backing store for a full key.
pub type Checker = Arc<dyn Fn(String) -> BoxFuture<'static, HookResult<bool>> + Send + Sync>;

/// Deletes a full key from the backing store, reporting whether anything
/// was removed.
pub type Deleter = Arc<dyn Fn(String) -> BoxFuture<'static, HookResult<bool>> + Send + Sync>;

/// Transform applied to values freshly loaded from the backing store, never
/// to values already in memory.
pub type Reviver<T> = Arc<dyn Fn(T) -> T + Send + Sync>;

/// The optional hook set carried by every node. Subcaches copy their
/// parent's set at creation and are independent afterwards.
pub(crate) struct Hooks<T> {
    pub(crate) loader: Option<Loader<T>>,
    pub(crate) saver: Option<Saver<T>>,
    pub(crate) checker: Option<Checker>,
    pub(crate) deleter: Option<Deleter>,
}

impl<T> Clone for Hooks<T> {
    fn clone(&self) -> Self {
        Self {
            loader: self.loader.clone(),
            saver: self.saver.clone(),
            checker: self.checker.clone(),
            deleter: self.deleter.clone(),
        }
    }
}

impl<T> Default for Hooks<T> {
    fn default() -> Self {
        Self {
            loader: None,
            saver: None,
            checker: None,
            deleter: None,
        }
    }
}

/// Lift a plain async closure into a [`Loader`].
pub fn loader<T, F, Fut>(f: F) -> Loader<T>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HookResult<Option<T>>> + Send + 'static,
{
    Arc::new(move |key| f(key).boxed())
}

/// Lift a plain async closure into a [`Saver`].
pub fn saver<T, F, Fut>(f: F) -> Saver<T>
where
    F: Fn(String, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HookResult<()>> + Send + 'static,
{
    Arc::new(move |key, value| f(key, value).boxed())
}

/// Lift a plain async closure into a [`Checker`].
pub fn checker<F, Fut>(f: F) -> Checker
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HookResult<bool>> + Send + 'static,
{
    Arc::new(move |key| f(key).boxed())
}

/// Lift a plain async closure into a [`Deleter`].
pub fn deleter<F, Fut>(f: F) -> Deleter
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HookResult<bool>> + Send + 'static,
{
    Arc::new(move |key| f(key).boxed())
}

/// Wrap a plain closure into a [`Reviver`].
pub fn reviver<T, F>(f: F) -> Reviver<T>
where
    F: Fn(T) -> T + Send + Sync + 'static,
{
    Arc::new(f)
}
