#![allow(dead_code)]

use deepwrite_rust::seed::{self, SeedData};
use deepwrite_rust::store::RecordStore;
use deepwrite_rust::{InMemoryStore, Record, UserContext, WriteService};
use std::sync::Arc;

// Service over a seeded in-memory store, wired with the survey policies and hooks
pub struct TestApp {
    pub service: WriteService<InMemoryStore>,
    pub store: Arc<InMemoryStore>,
    pub seed: SeedData,
}

impl TestApp {
    pub async fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let seed = seed::load_seed_data(store.as_ref()).await.unwrap();
        let registry = Arc::new(seed::survey_registry());
        let strategy = Arc::new(seed::survey_policies(store.clone(), registry.clone()));
        let service =
            WriteService::new(store.clone(), registry, strategy).with_hooks(seed::survey_hooks());
        Self { service, store, seed }
    }

    /// Applicant `n` of the fixtures, zero-based
    pub fn applicant(&self, n: usize) -> UserContext {
        UserContext::new(self.seed.applicants[n].to_string()).with_type("Applicant")
    }

    pub fn admin(&self) -> UserContext {
        UserContext::new("100".to_string()).with_type("Admin")
    }

    pub async fn record(&self, resource_type: &str, id: i64) -> Option<Record> {
        self.store.get_record(resource_type, id).await.unwrap()
    }
}
