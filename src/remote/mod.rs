//! Remote task services.
//!
//! Every integrated service implements [`RemoteTaskApi`]; jobs iterate the
//! whole [`RemoteSet`] uniformly instead of branching on service names.

pub mod google;
pub mod memory;
pub mod todoist;
pub mod traits;

use std::sync::Arc;

pub use google::GoogleTasksClient;
pub use memory::MemoryRemote;
pub use todoist::TodoistClient;
pub use traits::RemoteTaskApi;

/// The ordered set of integrated services.
#[derive(Clone, Default)]
pub struct RemoteSet {
    apis: Vec<Arc<dyn RemoteTaskApi>>,
}

impl RemoteSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: integrate another service.
    pub fn with(mut self, api: Arc<dyn RemoteTaskApi>) -> Self {
        self.apis.push(api);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn RemoteTaskApi>> {
        self.apis.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.apis.iter().map(|api| api.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.apis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apis.is_empty()
    }
}
