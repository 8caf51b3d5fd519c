use anyhow::Result;
use log::debug;
use serde_json::{Map, Value};

use crate::error::WriteError;
use crate::model::{
    loose_eq, Association, ChangedEntity, CreatedRecord, DestroyedEntity, FieldError, Method,
    MutationBody, MutationTree, Record, RecordId, RecordQuery, Registry, ResourceDef, RootMutation,
    ScopeFilter, StoragePath, ValidationFailure, WriteOutcome, WriteSummary,
};
use crate::store::traits::RecordTx;
use crate::store::validate::validate_attributes;

/// One node of a root, flattened in pre-order
struct Step<'t> {
    body: &'t MutationBody,
    method: Method,
    storage_path: StoragePath,
    parent: Option<usize>,
    /// Column on this node's records pointing at the parent record
    foreign_key: Option<String>,
    children: Vec<usize>,
}

/// Applies a mutation tree through an open transaction. Callers commit when
/// the outcome is `Committed` and roll back otherwise.
pub struct PlanExecutor<'a, T: RecordTx> {
    registry: &'a Registry,
    tx: &'a mut T,
    summary: WriteSummary,
}

impl<'a, T: RecordTx> PlanExecutor<'a, T> {
    pub fn new(registry: &'a Registry, tx: &'a mut T) -> Self {
        Self {
            registry,
            tx,
            summary: WriteSummary::default(),
        }
    }

    pub async fn apply(mut self, tree: &MutationTree) -> Result<WriteOutcome> {
        let mut failures = Vec::new();

        for root in &tree.roots {
            let steps = self.plan(root)?;
            let mut ids: Vec<Option<RecordId>> = vec![None; steps.len()];
            let mut errors: Vec<Vec<FieldError>> = vec![Vec::new(); steps.len()];

            for idx in 0..steps.len() {
                let step = &steps[idx];
                let parent_id = match step.parent {
                    Some(parent) => match ids[parent] {
                        Some(id) => Some(id),
                        // parent was destroyed or is a collection
                        None => continue,
                    },
                    None => None,
                };
                ids[idx] = self.run_step(step, parent_id, &mut errors[idx]).await?;
            }

            let ordered: Vec<FieldError> = post_order(&steps)
                .into_iter()
                .flat_map(|idx| std::mem::take(&mut errors[idx]))
                .collect();
            if !ordered.is_empty() {
                failures.push(ValidationFailure {
                    root: root.root_ref(),
                    errors: ordered,
                });
            }
        }

        if failures.is_empty() {
            debug!(
                "Plan applied: {} created, {} changed, {} destroyed",
                self.summary.created.len(),
                self.summary.changed.len(),
                self.summary.destroyed.len()
            );
            Ok(WriteOutcome::Committed(self.summary))
        } else {
            debug!("Plan rejected with {} failing roots", failures.len());
            Ok(WriteOutcome::Rejected(failures))
        }
    }

    fn plan<'t>(&self, root: &'t RootMutation) -> Result<Vec<Step<'t>>> {
        let mut steps = Vec::new();
        self.flatten(
            &root.body,
            root.method,
            StoragePath::root(root.root_ref()),
            None,
            None,
            &mut steps,
        )?;
        Ok(steps)
    }

    fn flatten<'t>(
        &self,
        body: &'t MutationBody,
        method: Method,
        storage_path: StoragePath,
        parent: Option<usize>,
        foreign_key: Option<String>,
        steps: &mut Vec<Step<'t>>,
    ) -> Result<()> {
        let idx = steps.len();
        steps.push(Step {
            body,
            method,
            storage_path: storage_path.clone(),
            parent,
            foreign_key,
            children: Vec::new(),
        });
        if let Some(parent) = parent {
            steps[parent].children.push(idx);
        }

        let resource = self.registry.require(&body.resource_type)?;
        for (name, association) in &body.associations {
            let definition =
                resource
                    .association(name)
                    .ok_or_else(|| WriteError::InvalidAssociation {
                        parent: resource.plural.clone(),
                        child: name.clone(),
                    })?;
            let foreign_key = definition.foreign_key_for(resource);
            match association {
                Association::Many(items) => {
                    for (position, child) in items.iter().enumerate() {
                        self.flatten(
                            child,
                            child.method(),
                            storage_path.child(name, Some(position)),
                            Some(idx),
                            Some(foreign_key.clone()),
                            steps,
                        )?;
                    }
                }
                Association::One(child) => {
                    self.flatten(
                        child,
                        child.method(),
                        storage_path.child(name, None),
                        Some(idx),
                        Some(foreign_key),
                        steps,
                    )?;
                }
            }
        }
        Ok(())
    }

    async fn run_step(
        &mut self,
        step: &Step<'_>,
        parent_id: Option<RecordId>,
        errors: &mut Vec<FieldError>,
    ) -> Result<Option<RecordId>> {
        let resource = self.registry.require(&step.body.resource_type)?;
        match step.method {
            Method::Update => {
                let record = self.load(resource, step, parent_id).await?;
                let id = record.id;
                if !step.body.attributes.is_empty() {
                    self.update_record(resource, record, step, errors).await?;
                }
                Ok(Some(id))
            }
            Method::Create => {
                let mut attributes = step.body.attributes.clone();
                if let (Some(fk), Some(parent_id)) = (&step.foreign_key, parent_id) {
                    attributes.insert(fk.clone(), Value::from(parent_id));
                }
                collect_errors(resource, &attributes, &step.storage_path, errors)?;

                let record = self.tx.insert(&resource.name, attributes).await?;
                self.summary.created.push(CreatedRecord {
                    resource_type: resource.name.clone(),
                    id: record.id,
                    binding: step.body.temp_id.clone(),
                });
                let set: Map<String, Value> = record
                    .attributes
                    .iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                self.summary.changed.push(ChangedEntity {
                    resource_type: resource.name.clone(),
                    id: record.id,
                    attributes: set,
                    client_path: step.body.client_path.clone(),
                });
                Ok(Some(record.id))
            }
            Method::Destroy => {
                let record = self.load(resource, step, parent_id).await?;
                self.destroy_cascade(resource, record.id, step.body.client_path.clone())
                    .await?;
                Ok(None)
            }
            Method::UpdateAll => {
                for record in self.select_bulk(resource, step, parent_id).await? {
                    self.update_record(resource, record, step, errors).await?;
                }
                Ok(None)
            }
            Method::DestroyAll => {
                for record in self.select_bulk(resource, step, parent_id).await? {
                    self.destroy_cascade(resource, record.id, None).await?;
                }
                Ok(None)
            }
        }
    }

    /// Fetch the record a step names; nested records must belong to their parent
    async fn load(
        &mut self,
        resource: &ResourceDef,
        step: &Step<'_>,
        parent_id: Option<RecordId>,
    ) -> Result<Record> {
        let raw_id = step.body.id.clone().unwrap_or_default();
        let id = step
            .body
            .real_id()
            .and_then(|id| id.parse::<RecordId>().ok())
            .ok_or_else(|| WriteError::not_found(&resource.name, &raw_id))?;

        let record = self
            .tx
            .get(&resource.name, id)
            .await?
            .ok_or_else(|| WriteError::not_found(&resource.name, id))?;

        if let (Some(fk), Some(parent_id)) = (&step.foreign_key, parent_id) {
            let owner = record.attributes.get(fk).cloned().unwrap_or(Value::Null);
            if !loose_eq(&owner, &Value::from(parent_id)) {
                return Err(WriteError::not_found(&resource.name, id).into());
            }
        }
        Ok(record)
    }

    async fn select_bulk(
        &mut self,
        resource: &ResourceDef,
        step: &Step<'_>,
        parent_id: Option<RecordId>,
    ) -> Result<Vec<Record>> {
        let filter = step.body.bulk_filter.clone().unwrap_or(ScopeFilter::Nothing);
        let mut query = RecordQuery::new(&resource.name).with_filter(filter);
        if let (Some(fk), Some(parent_id)) = (&step.foreign_key, parent_id) {
            query = query.with_condition(fk, Value::from(parent_id));
        }
        self.tx.select(&query).await
    }

    async fn update_record(
        &mut self,
        resource: &ResourceDef,
        mut record: Record,
        step: &Step<'_>,
        errors: &mut Vec<FieldError>,
    ) -> Result<()> {
        let mut changed = Map::new();
        for (key, value) in &step.body.attributes {
            if record.attributes.get(key) != Some(value) {
                changed.insert(key.clone(), value.clone());
                record.attributes.insert(key.clone(), value.clone());
            }
        }
        collect_errors(resource, &record.attributes, &step.storage_path, errors)?;
        if changed.is_empty() {
            return Ok(());
        }

        record.updated_at = chrono::Utc::now();
        self.tx.update(&record).await?;
        self.summary.changed.push(ChangedEntity {
            resource_type: resource.name.clone(),
            id: record.id,
            attributes: changed,
            client_path: step.body.client_path.clone(),
        });
        Ok(())
    }

    /// Delete a record and, through dependent associations, everything under it
    async fn destroy_cascade(
        &mut self,
        resource: &ResourceDef,
        id: RecordId,
        client_path: Option<String>,
    ) -> Result<()> {
        let mut pending: Vec<(String, RecordId, Option<String>)> =
            vec![(resource.name.clone(), id, client_path)];

        while let Some((resource_type, id, client_path)) = pending.pop() {
            let resource = self.registry.require(&resource_type)?;
            for association in resource.associations.iter().filter(|a| a.dependent_destroy) {
                let target = self.registry.require(&association.target)?;
                let query = RecordQuery::new(&target.name)
                    .with_condition(&association.foreign_key_for(resource), Value::from(id));
                for child in self.tx.select(&query).await? {
                    pending.push((target.name.clone(), child.id, None));
                }
            }

            if self.tx.delete(&resource.name, id).await? {
                self.summary.destroyed.push(DestroyedEntity {
                    resource_type: resource.plural.clone(),
                    id,
                    destroyed: true,
                    client_path,
                });
            }
        }
        Ok(())
    }
}

fn collect_errors(
    resource: &ResourceDef,
    attributes: &Map<String, Value>,
    storage_path: &StoragePath,
    errors: &mut Vec<FieldError>,
) -> Result<()> {
    for (field, messages) in validate_attributes(resource, attributes)? {
        errors.push(FieldError {
            key: storage_path.field_key(&field),
            messages,
        });
    }
    Ok(())
}

/// Children before their parent, siblings in order
fn post_order(steps: &[Step<'_>]) -> Vec<usize> {
    fn visit(steps: &[Step<'_>], idx: usize, out: &mut Vec<usize>) {
        for &child in &steps[idx].children {
            visit(steps, child, out);
        }
        out.push(idx);
    }

    let mut out = Vec::with_capacity(steps.len());
    if !steps.is_empty() {
        visit(steps, 0, &mut out);
    }
    out
}
