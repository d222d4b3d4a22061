use std::sync::Arc;

use drop_store::DropService;

#[derive(Clone)]
pub struct DropAxumState {
    pub service: Arc<DropService>,
    /// Base URL prefixed to links handed back to uploaders
    pub public_url: Arc<str>,
}

impl DropAxumState {
    pub fn new(service: DropService, public_url: &str) -> Self {
        Self {
            service: Arc::new(service),
            public_url: Arc::from(public_url.trim_end_matches('/')),
        }
    }

    /// Public link of `<id>/<name>`
    pub fn link(&self, path: &str) -> String {
        format!("{}/{}", self.public_url, path)
    }
}
