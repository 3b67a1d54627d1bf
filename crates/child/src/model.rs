//! Shared model exposed by the child to its host
//!
//! Entries are either plain data or methods. Methods take the invoke payload
//! (or `null` for value requests) and return a future, so asynchronous work
//! is awaited transparently before a value reply goes out.

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

type Method = Arc<dyn Fn(Value) -> BoxFuture<'static, Value> + Send + Sync>;

/// One named entry of a [`Model`]
#[derive(Clone)]
pub enum ModelEntry {
    Data(Value),
    Method(Method),
}

impl std::fmt::Debug for ModelEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelEntry::Data(value) => f.debug_tuple("Data").field(value).finish(),
            ModelEntry::Method(_) => f.write_str("Method(..)"),
        }
    }
}

/// Named data and methods, shared between the child application and its session
///
/// Cloning shares the entries.
///
/// # Example
///
/// ```
/// use parley_child::Model;
/// use serde_json::json;
///
/// let model = Model::new()
///     .with_data("title", json!("Widget"))
///     .with_fn("double", |payload| json!(payload.as_i64().unwrap_or(0) * 2))
///     .with_method("height", |_| async { json!(480) });
///
/// assert!(model.contains("double"));
/// assert_eq!(model.snapshot().get("title"), Some(&json!("Widget")));
/// ```
#[derive(Clone, Default)]
pub struct Model {
    entries: Arc<Mutex<HashMap<String, ModelEntry>>>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(self, name: impl Into<String>, value: Value) -> Self {
        self.insert(name, ModelEntry::Data(value));
        self
    }

    /// Adds an asynchronous method
    pub fn with_method<F, Fut>(self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Value> + Send + 'static,
    {
        let method: Method = Arc::new(move |payload| method(payload).boxed());
        self.insert(name, ModelEntry::Method(method));
        self
    }

    /// Adds a synchronous method
    pub fn with_fn<F>(self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.with_method(name, move |payload| {
            let result = method(payload);
            async move { result }
        })
    }

    pub fn insert(&self, name: impl Into<String>, entry: ModelEntry) {
        self.entries.lock().insert(name.into(), entry);
    }

    pub fn get(&self, name: &str) -> Option<ModelEntry> {
        self.entries.lock().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.lock().contains_key(name)
    }

    /// Merges the host's shared model; host entries replace local ones
    pub fn merge(&self, shared: Map<String, Value>) {
        let mut entries = self.entries.lock();
        for (name, value) in shared {
            entries.insert(name, ModelEntry::Data(value));
        }
    }

    /// Starts the named method, if there is one
    pub fn invoke(&self, name: &str, payload: Value) -> Option<BoxFuture<'static, Value>> {
        match self.get(name)? {
            ModelEntry::Method(method) => Some(method(payload)),
            ModelEntry::Data(_) => None,
        }
    }

    /// Resolves the named entry: methods are called and awaited, data is
    /// returned as is, missing entries yield `None`
    pub async fn resolve(&self, name: &str) -> Option<Value> {
        match self.get(name)? {
            ModelEntry::Data(value) => Some(value),
            ModelEntry::Method(method) => Some(method(Value::Null).await),
        }
    }

    /// Data entries only
    pub fn snapshot(&self) -> Map<String, Value> {
        self.entries
            .lock()
            .iter()
            .filter_map(|(name, entry)| match entry {
                ModelEntry::Data(value) => Some((name.clone(), value.clone())),
                ModelEntry::Method(_) => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_resolve_data_and_methods() {
        let model = Model::new()
            .with_data("title", json!("Widget"))
            .with_fn("answer", |_| json!(42))
            .with_method("slow", |_| async {
                tokio::task::yield_now().await;
                json!("done")
            });

        assert_eq!(model.resolve("title").await, Some(json!("Widget")));
        assert_eq!(model.resolve("answer").await, Some(json!(42)));
        assert_eq!(model.resolve("slow").await, Some(json!("done")));
        assert_eq!(model.resolve("missing").await, None);
    }

    #[tokio::test]
    async fn test_invoke_only_runs_methods() {
        let model = Model::new()
            .with_data("title", json!("Widget"))
            .with_fn("echo", |payload| payload);

        assert!(model.invoke("title", json!(1)).is_none());
        assert!(model.invoke("missing", json!(1)).is_none());
        assert_eq!(model.invoke("echo", json!("hi")).unwrap().await, json!("hi"));
    }

    #[test]
    fn test_merge_host_wins() {
        let model = Model::new()
            .with_data("greet", json!("local"))
            .with_fn("size", |_| json!(1))
            .with_data("kept", json!(true));

        let mut shared = Map::new();
        shared.insert("greet".to_string(), json!("hello"));
        shared.insert("size".to_string(), json!(10));
        model.merge(shared);

        let snapshot = model.snapshot();
        assert_eq!(snapshot.get("greet"), Some(&json!("hello")));
        assert_eq!(snapshot.get("size"), Some(&json!(10)));
        assert_eq!(snapshot.get("kept"), Some(&json!(true)));
    }

    #[test]
    fn test_clones_share_entries() {
        let model = Model::new();
        let view = model.clone();
        model.insert("late", ModelEntry::Data(json!(1)));
        assert!(view.contains("late"));
    }
}
