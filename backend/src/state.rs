use std::sync::Arc;
use url::Url;

use crate::classifier::Classifier;
use crate::storage::ImageStore;

/// Per-process context handed to every handler through `web::Data`.
pub struct AppState {
    pub classifier: Arc<Classifier>,
    pub store: ImageStore,
    pub base_url: Url,
}

impl AppState {
    pub fn new(classifier: Classifier, store: ImageStore, base_url: Url) -> Self {
        Self {
            classifier: Arc::new(classifier),
            store,
            base_url,
        }
    }
}
