//! Observable Properties
//!
//! Reactive value holder used for manipulator position and status, scan
//! progress, the `active` flag and the tabular entry label.
//!
//! Two ways to follow a value:
//!
//! - **Async**: [`Observable::subscribe`] returns a `tokio::sync::watch`
//!   receiver (latest value wins, no backlog).
//! - **Sync**: [`Observable::observe`] registers a closure that runs on every
//!   publish, on the publishing thread. The returned [`ObserverGuard`]
//!   unregisters the closure when dropped.
//!
//! ```rust
//! use scan_core::observable::Observable;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let progress = Observable::new("progress", 0.0_f64).with_units("fraction");
//! let calls = Arc::new(AtomicUsize::new(0));
//!
//! let counter = calls.clone();
//! let guard = progress.observe(move |_| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//! progress.publish(0.5);
//! drop(guard);
//! progress.publish(1.0);
//!
//! assert_eq!(calls.load(Ordering::SeqCst), 1);
//! assert_eq!(progress.get(), 1.0);
//! ```

use anyhow::{anyhow, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tokio::sync::watch;

/// Validator callback type.
pub type Validator<T> = Arc<dyn Fn(&T) -> Result<()> + Send + Sync>;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct ObservableSharedState<T> {
    metadata: ObservableMetadata,
    validator: Option<Validator<T>>,
}

struct ListenerRegistry<T> {
    next_id: u64,
    listeners: Vec<(u64, Listener<T>)>,
}

/// Descriptive metadata of an observable, used by presentation layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservableMetadata {
    /// Property name (unique within its component)
    pub name: String,

    /// Human-readable description
    pub description: Option<String>,

    /// Unit symbol shown next to the value
    pub units: Option<String>,

    /// Read-only properties reject [`Observable::set`]; their owner publishes
    /// through [`Observable::publish`].
    pub read_only: bool,

    /// Data type hint (`"float"`, `"bool"`, `"string"`, `"quantity"`, `"enum"`)
    #[serde(default)]
    pub dtype: String,
}

/// A thread-safe, observable value with change notifications.
///
/// Clones share the same value, metadata and listeners.
pub struct Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    sender: watch::Sender<T>,
    shared: Arc<RwLock<ObservableSharedState<T>>>,
    listeners: Arc<Mutex<ListenerRegistry<T>>>,
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.read();
        f.debug_struct("Observable")
            .field("metadata", &shared.metadata)
            .field("has_validator", &shared.validator.is_some())
            .field("listeners", &self.listeners.lock().listeners.len())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            shared: self.shared.clone(),
            listeners: self.listeners.clone(),
        }
    }
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new observable with an initial value.
    pub fn new(name: impl Into<String>, initial_value: T) -> Self {
        let (sender, _) = watch::channel(initial_value);
        Self {
            sender,
            shared: Arc::new(RwLock::new(ObservableSharedState {
                metadata: ObservableMetadata {
                    name: name.into(),
                    description: None,
                    units: None,
                    read_only: false,
                    dtype: String::new(),
                },
                validator: None,
            })),
            listeners: Arc::new(Mutex::new(ListenerRegistry {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    /// Set the description shown by [`Describe`](crate::describe::Describe).
    pub fn with_description(self, description: impl Into<String>) -> Self {
        self.shared.write().metadata.description = Some(description.into());
        self
    }

    /// Set the unit symbol.
    pub fn with_units(self, units: impl Into<String>) -> Self {
        self.shared.write().metadata.units = Some(units.into());
        self
    }

    /// Set the value type hint.
    pub fn with_dtype(self, dtype: impl Into<String>) -> Self {
        self.shared.write().metadata.dtype = dtype.into();
        self
    }

    /// Mark this observable as read-only for external writers.
    pub fn read_only(self) -> Self {
        self.shared.write().metadata.read_only = true;
        self
    }

    /// Add a custom validator applied by [`Observable::set`].
    pub fn with_validator<F>(self, validator: F) -> Self
    where
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        self.shared.write().validator = Some(Arc::new(validator));
        self
    }

    /// Get the current value (clone).
    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Attribute name
    pub fn name(&self) -> String {
        self.shared.read().metadata.name.clone()
    }

    /// Get the metadata (returns a clone).
    pub fn metadata(&self) -> ObservableMetadata {
        self.shared.read().metadata.clone()
    }

    /// Validate a value without setting it.
    ///
    /// Fails if the property is read-only or the validator rejects `value`.
    pub fn validate(&self, value: &T) -> Result<()> {
        let guard = self.shared.read();
        if guard.metadata.read_only {
            return Err(anyhow!("Property '{}' is read-only", guard.metadata.name));
        }

        if let Some(validator) = &guard.validator {
            validator(value)?;
        }

        Ok(())
    }

    /// Set a new value from outside the owning component.
    pub fn set(&self, value: T) -> Result<()> {
        self.validate(&value)?;
        self.publish(value);
        Ok(())
    }

    /// Store `value` and notify subscribers and listeners, skipping
    /// validation. Used by the component that owns the property.
    pub fn publish(&self, value: T) {
        self.sender.send_replace(value.clone());

        // Snapshot so listeners may (un)register without deadlocking
        let listeners: Vec<Listener<T>> = self
            .listeners
            .lock()
            .listeners
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&value);
        }
    }

    /// Subscribe to value changes.
    ///
    /// ```rust,ignore
    /// let mut rx = observable.subscribe();
    /// while rx.changed().await.is_ok() {
    ///     let value = rx.borrow().clone();
    /// }
    /// ```
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }

    /// Register a synchronous listener called on every publish.
    ///
    /// The listener stays registered until the returned guard is dropped.
    #[must_use = "the listener is removed when the guard is dropped"]
    pub fn observe<F>(&self, listener: F) -> ObserverGuard
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut registry = self.listeners.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.push((id, Arc::new(listener)));

        let weak: Weak<Mutex<ListenerRegistry<T>>> = Arc::downgrade(&self.listeners);
        ObserverGuard {
            unregister: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    registry.lock().listeners.retain(|(lid, _)| *lid != id);
                }
            })),
        }
    }

    /// Number of registered synchronous listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().listeners.len()
    }

    /// Number of live watch receivers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Whether any watch receiver is alive.
    pub fn has_subscribers(&self) -> bool {
        self.subscriber_count() > 0 || self.listener_count() > 0
    }
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + Serialize + 'static,
{
    /// Current value as JSON.
    pub fn get_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self.get())
            .map_err(|e| anyhow!("Failed to serialize property '{}': {}", self.name(), e))
    }
}

/// RAII registration of an [`Observable::observe`] listener.
pub struct ObserverGuard {
    unregister: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ObserverGuard {
    /// Remove the listener now.
    pub fn unsubscribe(mut self) {
        if let Some(unregister) = self.unregister.take() {
            unregister();
        }
    }
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        if let Some(unregister) = self.unregister.take() {
            unregister();
        }
    }
}

impl std::fmt::Debug for ObserverGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverGuard")
            .field("active", &self.unregister.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_observable_get_set() {
        let obs = Observable::new("test", 42i32);
        assert_eq!(obs.get(), 42);

        obs.set(100).unwrap();
        assert_eq!(obs.get(), 100);
    }

    #[tokio::test]
    async fn test_observable_subscription() {
        let obs = Observable::new("test", 0i32);
        let mut rx = obs.subscribe();

        obs.publish(42);

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 42);
    }

    #[test]
    fn test_observable_validation() {
        let obs = Observable::new("test", 50.0_f64).with_validator(|v| {
            if (0.0..=100.0).contains(v) {
                Ok(())
            } else {
                Err(anyhow!("out of range"))
            }
        });

        assert!(obs.set(75.0).is_ok());
        assert!(obs.set(150.0).is_err());
        assert_eq!(obs.get(), 75.0);
    }

    #[test]
    fn test_read_only_rejects_set_but_owner_publishes() {
        let obs = Observable::new("progress", 0.0_f64).read_only();
        assert!(obs.set(0.5).is_err());
        obs.publish(0.5);
        assert_eq!(obs.get(), 0.5);
    }

    #[test]
    fn test_listener_called_until_guard_dropped() {
        let obs = Observable::new("position", 0.0_f64);
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        let guard = obs.observe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(obs.listener_count(), 1);

        obs.publish(1.0);
        obs.publish(2.0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        drop(guard);
        assert_eq!(obs.listener_count(), 0);
        obs.publish(3.0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_listener_sees_published_value() {
        let obs = Observable::new("label", String::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        let _guard = obs.observe(move |v: &String| s.lock().push(v.clone()));
        obs.publish("a".to_string());
        obs.publish("b".to_string());

        assert_eq!(*seen.lock(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_clones_share_state() {
        let obs = Observable::new("shared", 1u32).with_units("counts");
        let clone = obs.clone();
        clone.publish(7);
        assert_eq!(obs.get(), 7);
        assert_eq!(obs.metadata().units.as_deref(), Some("counts"));
    }

    #[test]
    fn test_guard_outliving_observable_is_harmless() {
        let obs = Observable::new("short", 0u8);
        let guard = obs.observe(|_| {});
        drop(obs);
        guard.unsubscribe();
    }
}
