//! Service layer: the resilient store wrapper, key naming, directory
//! emulation, and the image derivative pipeline.

pub mod folders;
pub mod images;
pub mod keys;
pub mod store;

use std::sync::Arc;

use folders::FolderService;
use images::ImageService;
use store::ObjectStore;

/// Shared state handed to every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ObjectStore>,
    pub folders: FolderService,
    pub images: ImageService,
}

impl AppState {
    pub fn new(store: Arc<ObjectStore>) -> Self {
        Self {
            folders: FolderService::new(store.clone()),
            images: ImageService::new(store.clone()),
            store,
        }
    }
}
