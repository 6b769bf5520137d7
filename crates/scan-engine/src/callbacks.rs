//! Dataset-ready callbacks.

use parking_lot::RwLock;
use scan_core::data::DataSet;
use std::sync::Arc;
use tracing::warn;

/// Called once with every dataset a scan completes.
pub type DatasetCallback = Arc<dyn Fn(&DataSet) -> anyhow::Result<()> + Send + Sync>;

/// Registration-ordered list of [`DatasetCallback`]s.
#[derive(Default, Clone)]
pub struct DatasetCallbacks {
    callbacks: Arc<RwLock<Vec<DatasetCallback>>>,
}

impl DatasetCallbacks {
    /// No callbacks registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback.
    pub fn add<F>(&self, callback: F)
    where
        F: Fn(&DataSet) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    /// Number of registered callbacks
    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    /// Whether no callback is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every callback in registration order.
    ///
    /// A failing callback is logged and does not prevent the others from
    /// running.
    pub fn notify(&self, data_set: &DataSet) {
        let callbacks: Vec<DatasetCallback> = self.callbacks.read().clone();
        for (index, callback) in callbacks.iter().enumerate() {
            if let Err(e) = callback(data_set) {
                warn!(callback = index, error = %e, "dataset callback failed");
            }
        }
    }
}

impl std::fmt::Debug for DatasetCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetCallbacks")
            .field("count", &self.len())
            .finish()
    }
}
