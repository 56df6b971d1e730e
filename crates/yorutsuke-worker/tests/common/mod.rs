#![allow(dead_code)]

use std::sync::Arc;

use bytes::Bytes;
use object_store::memory::InMemory;
use yorutsuke_core::ExtractionBackend;
use yorutsuke_inference::Comparator;
use yorutsuke_object::ObjectStoreClient;
use yorutsuke_test::MemoryStore;
use yorutsuke_worker::{PipelineConfig, WorkerState};

pub const BUCKET: &str = "yorutsuke-test";

/// Worker state over an in-memory store and object store.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub objects: ObjectStoreClient,
    pub state: WorkerState,
}

impl Harness {
    pub fn new(backends: Vec<Arc<dyn ExtractionBackend>>) -> Self {
        Self::with_store(MemoryStore::new(), backends)
    }

    pub fn with_store(store: MemoryStore, backends: Vec<Arc<dyn ExtractionBackend>>) -> Self {
        let store = Arc::new(store);
        let objects = ObjectStoreClient::new(InMemory::new());
        let state = WorkerState::new(
            store.clone(),
            store.clone(),
            objects.clone(),
            BUCKET,
            Comparator::new(backends),
        );

        Self {
            store,
            objects,
            state,
        }
    }

    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.state = self.state.with_pipeline(pipeline);
        self
    }

    pub async fn put(&self, key: &str, body: impl Into<Bytes>) {
        self.objects.put(key, body.into(), None).await.unwrap();
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.objects.exists(key).await.unwrap()
    }
}

/// Joins result lines into a file body.
pub fn jsonl(lines: &[String]) -> Bytes {
    let mut body = lines.join("\n");
    body.push('\n');
    Bytes::from(body)
}
