use anyhow::Result;
use log::debug;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use crate::model::{
    apply_query, MutationTree, Record, RecordId, RecordPage, RecordQuery, Registry, WriteOutcome,
};
use crate::store::executor::PlanExecutor;
use crate::store::traits::{MutationStore, RecordStore, RecordTx, Store};

#[derive(Debug, Clone, Default)]
struct Tables {
    records: HashMap<String, BTreeMap<RecordId, Record>>,
    /// Next id per resource type; ids start at 1 like a fresh sequence
    sequences: HashMap<String, RecordId>,
}

impl Tables {
    fn insert(&mut self, resource_type: &str, attributes: Map<String, Value>) -> Record {
        let next = self.sequences.entry(resource_type.to_string()).or_insert(1);
        let record = Record::new(resource_type, *next, attributes);
        *next += 1;
        self.records
            .entry(resource_type.to_string())
            .or_default()
            .insert(record.id, record.clone());
        record
    }

    fn table(&self, resource_type: &str) -> impl Iterator<Item = &Record> {
        self.records
            .get(resource_type)
            .into_iter()
            .flat_map(|table| table.values())
    }
}

/// Store kept entirely in memory. Writes run against a snapshot that replaces
/// the live tables only when the plan commits.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    /// Serializes mutation plans so snapshots never overwrite each other
    write_gate: tokio::sync::Mutex<()>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records of one type
    pub fn count(&self, resource_type: &str) -> usize {
        self.tables
            .read()
            .records
            .get(resource_type)
            .map(|table| table.len())
            .unwrap_or(0)
    }
}

/// Snapshot of the tables that a plan mutates
struct MemoryTx {
    tables: Tables,
}

#[async_trait::async_trait]
impl RecordTx for MemoryTx {
    async fn get(&mut self, resource_type: &str, id: RecordId) -> Result<Option<Record>> {
        Ok(self
            .tables
            .records
            .get(resource_type)
            .and_then(|table| table.get(&id))
            .cloned())
    }

    async fn select(&mut self, query: &RecordQuery) -> Result<Vec<Record>> {
        let records = self.tables.table(&query.resource_type).cloned();
        Ok(apply_query(records, query).records)
    }

    async fn insert(
        &mut self,
        resource_type: &str,
        attributes: Map<String, Value>,
    ) -> Result<Record> {
        Ok(self.tables.insert(resource_type, attributes))
    }

    async fn update(&mut self, record: &Record) -> Result<()> {
        self.tables
            .records
            .entry(record.resource_type.clone())
            .or_default()
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn delete(&mut self, resource_type: &str, id: RecordId) -> Result<bool> {
        Ok(self
            .tables
            .records
            .get_mut(resource_type)
            .and_then(|table| table.remove(&id))
            .is_some())
    }
}

#[async_trait::async_trait]
impl RecordStore for InMemoryStore {
    async fn get_record(&self, resource_type: &str, id: RecordId) -> Result<Option<Record>> {
        Ok(self
            .tables
            .read()
            .records
            .get(resource_type)
            .and_then(|table| table.get(&id))
            .cloned())
    }

    async fn find_records(&self, query: &RecordQuery) -> Result<RecordPage> {
        let records: Vec<Record> = self
            .tables
            .read()
            .table(&query.resource_type)
            .cloned()
            .collect();
        Ok(apply_query(records, query))
    }

    async fn insert_record(
        &self,
        resource_type: &str,
        attributes: Map<String, Value>,
    ) -> Result<Record> {
        Ok(self.tables.write().insert(resource_type, attributes))
    }
}

#[async_trait::async_trait]
impl MutationStore for InMemoryStore {
    async fn execute(&self, registry: &Registry, tree: &MutationTree) -> Result<WriteOutcome> {
        let _gate = self.write_gate.lock().await;
        let snapshot = self.tables.read().clone();
        let mut tx = MemoryTx { tables: snapshot };

        let outcome = PlanExecutor::new(registry, &mut tx).apply(tree).await?;
        match &outcome {
            WriteOutcome::Committed(_) => {
                *self.tables.write() = tx.tables;
                debug!("In-memory plan committed");
            }
            WriteOutcome::Rejected(_) => debug!("In-memory plan rolled back"),
        }
        Ok(outcome)
    }
}

impl Store for InMemoryStore {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WriteError;
    use crate::model::{
        generate_request_id, AssociationDef, Association, Method, MutationBody, ResourceDef,
        TempIdBinding, ValidationRule,
    };
    use serde_json::json;

    fn attrs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn registry() -> Registry {
        Registry::new(vec![
            ResourceDef::new("survey", "surveys", &["name"])
                .with_association(AssociationDef::many("questions", "question").dependent())
                .with_validation(ValidationRule::presence("name")),
            ResourceDef::new("question", "questions", &["content", "survey_id"])
                .with_association(AssociationDef::many("answers", "answer").dependent()),
            ResourceDef::new("answer", "answers", &["value", "question_id"])
                .with_validation(ValidationRule::format("value", "^XXXXX", true)),
        ])
    }

    fn create(resource_type: &str, token: &str, attributes: Value) -> MutationBody {
        let mut body = MutationBody::new(resource_type, None);
        body.attributes = attrs(attributes);
        body.temp_id = Some(TempIdBinding {
            request_id: generate_request_id(),
            token: token.to_string(),
        });
        body
    }

    #[tokio::test]
    async fn test_nested_create_commits_with_foreign_keys() {
        let registry = registry();
        let store = InMemoryStore::new();
        let survey = store.insert_record("survey", attrs(json!({"name": "s"}))).await.unwrap();

        let mut tree = MutationTree::new();
        let root = tree.root_mut("survey", &survey.id.to_string(), Method::Update);
        let mut question = create("question", "[q1]", json!({"content": "why"}));
        question.associations.insert(
            "answers".to_string(),
            Association::Many(vec![create("answer", "[a1]", json!({"value": "ok"}))]),
        );
        root.body
            .associations
            .insert("questions".to_string(), Association::Many(vec![question]));

        let WriteOutcome::Committed(summary) = store.execute(&registry, &tree).await.unwrap() else {
            panic!("expected commit");
        };
        assert_eq!(summary.created.len(), 2);

        let answer = store.get_record("answer", 1).await.unwrap().unwrap();
        assert_eq!(answer.attributes.get("question_id"), Some(&json!(1)));
        let question = store.get_record("question", 1).await.unwrap().unwrap();
        assert_eq!(question.attributes.get("survey_id"), Some(&json!(survey.id)));
    }

    #[tokio::test]
    async fn test_rejected_plan_leaves_store_untouched() {
        let registry = registry();
        let store = InMemoryStore::new();
        let survey = store.insert_record("survey", attrs(json!({"name": "s"}))).await.unwrap();

        let mut tree = MutationTree::new();
        let root = tree.root_mut("survey", &survey.id.to_string(), Method::Update);
        root.body.attributes = attrs(json!({"name": "renamed"}));
        root.body.associations.insert(
            "questions".to_string(),
            Association::Many(vec![create("question", "[q1]", json!({"content": "c"}))]),
        );
        let bad = create("answer", "[a1]", json!({"value": "XXXXX nope"}));
        if let Some(Association::Many(questions)) = root.body.associations.get_mut("questions") {
            questions[0]
                .associations
                .insert("answers".to_string(), Association::Many(vec![bad]));
        }

        let WriteOutcome::Rejected(failures) = store.execute(&registry, &tree).await.unwrap() else {
            panic!("expected rejection");
        };
        assert_eq!(failures[0].errors[0].key, "questions[0].answers[0].value");
        assert_eq!(store.count("question"), 0);
        let survey = store.get_record("survey", survey.id).await.unwrap().unwrap();
        assert_eq!(survey.attributes.get("name"), Some(&json!("s")));
    }

    #[tokio::test]
    async fn test_destroy_cascades_through_dependents() {
        let registry = registry();
        let store = InMemoryStore::new();
        let survey = store.insert_record("survey", attrs(json!({"name": "s"}))).await.unwrap();
        let question = store
            .insert_record("question", attrs(json!({"survey_id": survey.id})))
            .await
            .unwrap();
        store
            .insert_record("answer", attrs(json!({"question_id": question.id})))
            .await
            .unwrap();

        let mut tree = MutationTree::new();
        let root = tree.root_mut("survey", &survey.id.to_string(), Method::Destroy);
        root.body.destroy = true;

        let WriteOutcome::Committed(summary) = store.execute(&registry, &tree).await.unwrap() else {
            panic!("expected commit");
        };
        let mut types: Vec<&str> = summary
            .destroyed
            .iter()
            .map(|d| d.resource_type.as_str())
            .collect();
        types.sort();
        assert_eq!(types, vec!["answers", "questions", "surveys"]);
        assert_eq!(store.count("answer"), 0);
    }

    #[tokio::test]
    async fn test_nested_record_of_another_parent_is_not_found() {
        let registry = registry();
        let store = InMemoryStore::new();
        let first = store.insert_record("survey", attrs(json!({"name": "a"}))).await.unwrap();
        let second = store.insert_record("survey", attrs(json!({"name": "b"}))).await.unwrap();
        let question = store
            .insert_record("question", attrs(json!({"survey_id": second.id})))
            .await
            .unwrap();

        let mut tree = MutationTree::new();
        let root = tree.root_mut("survey", &first.id.to_string(), Method::Update);
        let mut nested = MutationBody::new("question", Some(question.id.to_string()));
        nested.attributes = attrs(json!({"content": "x"}));
        root.body
            .associations
            .insert("questions".to_string(), Association::Many(vec![nested]));

        let err = store.execute(&registry, &tree).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WriteError>(),
            Some(WriteError::NotFound { .. })
        ));
    }
}
