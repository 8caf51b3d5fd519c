use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::auth::AuthorizationStrategy;
use crate::config::WriteSettings;
use crate::error::WriteError;
use crate::logic::hooks::Hooks;
use crate::model::{
    underscore, Record, RecordId, RecordQuery, Registry, RequestContext, ResourceDef, Scope,
    ScopeFilter, ScopeKind, SortDirection, SortField, UserContext,
};
use crate::store::Store;

type ReadFuture<'b> = Pin<Box<dyn Future<Output = Result<Value, WriteError>> + 'b>>;

/// `{ number, size }` pages (the default) or `{ offset, limit }` windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Paginate {
    Paged {
        number: Option<usize>,
        size: Option<usize>,
    },
    Offset {
        offset: Option<usize>,
        limit: Option<usize>,
    },
}

impl Paginate {
    fn parse(value: Option<&Value>) -> Result<Paginate, WriteError> {
        let Some(value) = value else {
            return Ok(Paginate::Paged {
                number: None,
                size: None,
            });
        };
        let mut value = value.clone();
        if let Value::Object(map) = &mut value {
            map.entry("type").or_insert_with(|| json!("paged"));
        }
        serde_json::from_value(value)
            .map_err(|e| WriteError::InvalidQuery(format!("paginate: {}", e)))
    }

    /// `(offset, limit)` after defaulting and capping the page size
    fn window(&self, settings: &WriteSettings) -> (usize, usize) {
        match self {
            Paginate::Paged { number, size } => {
                let size = settings.page_size(*size);
                let number = number.unwrap_or(1).max(1);
                ((number - 1).saturating_mul(size), size)
            }
            Paginate::Offset { offset, limit } => (offset.unwrap_or(0), settings.page_size(*limit)),
        }
    }

    /// Links to neighbouring pages, in the request's own pagination style
    fn links(&self, settings: &WriteSettings, total: usize) -> Value {
        let (offset, limit) = self.window(settings);
        let mut links = Map::new();
        match self {
            Paginate::Paged { .. } => {
                let number = offset / limit + 1;
                let last = total.div_ceil(limit).max(1);
                links.insert("first".into(), json!({"number": 1, "size": limit}));
                if number > 1 {
                    links.insert("prev".into(), json!({"number": number - 1, "size": limit}));
                }
                if number < last {
                    links.insert("next".into(), json!({"number": number + 1, "size": limit}));
                }
                links.insert("last".into(), json!({"number": last, "size": limit}));
            }
            Paginate::Offset { .. } => {
                links.insert("first".into(), json!({"offset": 0, "limit": limit}));
                if offset > 0 {
                    links.insert(
                        "prev".into(),
                        json!({"offset": offset.saturating_sub(limit), "limit": limit}),
                    );
                }
                let next = offset.saturating_add(limit);
                if next < total {
                    links.insert("next".into(), json!({"offset": next, "limit": limit}));
                }
            }
        }
        Value::Object(links)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SortParam {
    field: String,
    #[serde(default = "default_direction")]
    direction: SortDirection,
}

fn default_direction() -> SortDirection {
    SortDirection::Asc
}

/// One key of the read document
#[derive(Debug)]
struct ReadNode<'r> {
    resource: &'r ResourceDef,
    /// Key as the client wrote it
    key: String,
    client_path: String,
    query: Map<String, Value>,
    children: Vec<ReadNode<'r>>,
}

impl<'r> ReadNode<'r> {
    /// Plural keys read collections, singular keys read one record
    fn is_list(&self) -> bool {
        self.key == self.resource.plural && self.resource.plural != self.resource.name
    }

    fn walk<'n>(&'n self, out: &mut Vec<&'n ReadNode<'r>>) {
        out.push(self);
        for child in &self.children {
            child.walk(out);
        }
    }
}

/// Replace `{ "fromContext": "survey.id" }` values with the named field of an
/// enclosing record. Unknown context names are left untouched.
pub fn resolve_conditions(value: &mut Value, context: &HashMap<String, Record>) {
    match value {
        Value::Array(items) => items
            .iter_mut()
            .for_each(|item| resolve_conditions(item, context)),
        Value::Object(map) => {
            for entry in map.values_mut() {
                let reference = entry
                    .as_object()
                    .and_then(|o| o.get("fromContext"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                match reference {
                    Some(reference) => {
                        let Some((name, field)) = reference.split_once('.') else {
                            continue;
                        };
                        let resolved = context
                            .get(name)
                            .and_then(|record| record.field(&underscore(field)));
                        if let Some(resolved) = resolved {
                            *entry = resolved;
                        }
                    }
                    None => resolve_conditions(entry, context),
                }
            }
        }
        _ => {}
    }
}

pub struct ReadPipeline<'a> {
    pub store: &'a dyn Store,
    pub registry: &'a Registry,
    pub strategy: &'a dyn AuthorizationStrategy,
    pub hooks: &'a Hooks,
    pub settings: &'a WriteSettings,
}

impl<'a> ReadPipeline<'a> {
    pub async fn read(
        &self,
        ctx: &RequestContext,
        query: &Map<String, Value>,
    ) -> Result<Value, WriteError> {
        debug!("Read {} received", ctx.request_id);
        self.hooks.run_before_read(ctx)?;

        let nodes = self.parse_level(query, None, "")?;
        let mut flat = Vec::new();
        for node in &nodes {
            node.walk(&mut flat);
        }

        let scopes: Vec<Scope> = flat
            .iter()
            .map(|node| Scope {
                resource_type: node.resource.name.clone(),
                path_type: node.key.clone(),
                token: ".*".to_string(),
                kind: ScopeKind::Index,
                parent: None,
                occurrence_index: None,
                client_path: node.client_path.clone(),
                error_path: None,
                destroyed: false,
                storage_path: None,
            })
            .collect();
        self.strategy.authorize(&scopes, &ctx.user).await?;

        let mut filters: HashMap<String, ScopeFilter> = HashMap::new();
        for node in &flat {
            if !filters.contains_key(&node.resource.name) {
                let filter = self
                    .strategy
                    .authorized_scope(&ctx.user, &node.resource.name)
                    .await?;
                filters.insert(node.resource.name.clone(), filter);
            }
        }
        debug!("Read {}: {} nodes authorized", ctx.request_id, flat.len());

        let mut response = Map::new();
        for node in &nodes {
            let result = self
                .query_node(node, None, HashMap::new(), &filters, &ctx.user)
                .await?;
            response.insert(self.settings.key_format.outgoing(&node.key), result);
        }
        Ok(Value::Object(response))
    }

    fn parse_level(
        &self,
        level: &Map<String, Value>,
        parent: Option<&'a ResourceDef>,
        prefix: &str,
    ) -> Result<Vec<ReadNode<'a>>, WriteError> {
        let mut nodes = Vec::new();
        for (key, value) in level {
            let key = underscore(key);
            let resource = match parent {
                None => self.registry.require(&key)?,
                Some(parent) => {
                    let association =
                        parent
                            .association(&key)
                            .ok_or_else(|| WriteError::InvalidAssociation {
                                parent: parent.plural.clone(),
                                child: key.clone(),
                            })?;
                    self.registry.require(&association.target)?
                }
            };
            let query = value
                .as_object()
                .cloned()
                .ok_or_else(|| WriteError::InvalidQuery(format!("{} must be an object", key)))?;
            let client_path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            let children = match query.get("include").and_then(Value::as_object) {
                Some(include) => {
                    self.parse_level(include, Some(resource), &format!("{}.include", client_path))?
                }
                None => Vec::new(),
            };
            nodes.push(ReadNode {
                resource,
                key,
                client_path,
                query,
                children,
            });
        }
        Ok(nodes)
    }

    fn query_node<'b>(
        &'b self,
        node: &'b ReadNode<'a>,
        parent_id: Option<RecordId>,
        context: HashMap<String, Record>,
        filters: &'b HashMap<String, ScopeFilter>,
        user: &'b UserContext,
    ) -> ReadFuture<'b> {
        Box::pin(async move {
            let mut query = Value::Object(node.query.clone());
            if let Some(parent_id) = parent_id {
                // per-parent overrides: { "extend": { "<parent id>": { ... } } }
                let extension = node
                    .query
                    .get("extend")
                    .and_then(|e| e.get(parent_id.to_string()))
                    .and_then(Value::as_object)
                    .cloned();
                if let (Some(extension), Value::Object(query)) = (extension, &mut query) {
                    for (key, value) in extension {
                        query.insert(key, value);
                    }
                }
            }
            resolve_conditions(&mut query, &context);
            let query = query.as_object().cloned().unwrap_or_default();
            let filter = filters
                .get(&node.resource.name)
                .cloned()
                .unwrap_or(ScopeFilter::Nothing);

            if node.is_list() {
                self.query_list(node, &query, filter, context, filters, user).await
            } else {
                self.query_item(node, &query, filter, context, filters, user).await
            }
        })
    }

    async fn query_item(
        &self,
        node: &ReadNode<'a>,
        query: &Map<String, Value>,
        filter: ScopeFilter,
        context: HashMap<String, Record>,
        filters: &HashMap<String, ScopeFilter>,
        user: &UserContext,
    ) -> Result<Value, WriteError> {
        let resource = node.resource;
        let record = if let Some(id) = query.get("id") {
            let id = id
                .as_i64()
                .or_else(|| id.as_str().and_then(|s| s.parse().ok()))
                .ok_or_else(|| WriteError::not_found(&resource.name, id))?;
            self.store
                .get_record(&resource.name, id)
                .await?
                .filter(|record| filter.matches(record))
                .ok_or_else(|| WriteError::not_found(&resource.name, id))?
        } else if let Some(find) = query.get("find").and_then(Value::as_object) {
            let conditions: Map<String, Value> = find
                .iter()
                .map(|(k, v)| (self.settings.key_format.incoming(k), v.clone()))
                .collect();
            let mut lookup = RecordQuery::new(&resource.name).with_filter(filter);
            lookup.conditions = conditions;
            lookup.limit = Some(1);
            self.store
                .find_records(&lookup)
                .await?
                .records
                .into_iter()
                .next()
                .ok_or_else(|| WriteError::not_found(&resource.name, Value::Object(find.clone())))?
        } else {
            return Err(WriteError::InvalidQuery(format!(
                "{} needs an id or find",
                node.client_path
            )));
        };

        self.serialize(node, query, record, context, filters, user).await
    }

    async fn query_list(
        &self,
        node: &ReadNode<'a>,
        query: &Map<String, Value>,
        filter: ScopeFilter,
        context: HashMap<String, Record>,
        filters: &HashMap<String, ScopeFilter>,
        user: &UserContext,
    ) -> Result<Value, WriteError> {
        let resource = node.resource;
        let paginate = Paginate::parse(query.get("paginate"))?;
        let (offset, limit) = paginate.window(self.settings);

        let sort: Vec<SortParam> = match query.get("sort") {
            Some(sort) => serde_json::from_value(sort.clone())
                .map_err(|e| WriteError::InvalidQuery(format!("sort: {}", e)))?,
            None => Vec::new(),
        };

        let mut lookup = RecordQuery::new(&resource.name).with_filter(filter);
        if let Some(conditions) = query.get("filter").and_then(Value::as_object) {
            for (field, value) in conditions {
                let field = self.settings.key_format.incoming(field);
                lookup = lookup.with_condition(&field, value.clone());
            }
        }
        lookup.sort = sort
            .iter()
            .map(|s| SortField {
                field: self.settings.key_format.incoming(&s.field),
                direction: s.direction,
            })
            .collect();
        lookup.offset = Some(offset);
        lookup.limit = Some(limit);

        let page = self.store.find_records(&lookup).await?;
        debug!(
            "Read {}: {} of {} records",
            node.client_path,
            page.records.len(),
            page.total
        );

        let mut data = Vec::with_capacity(page.records.len());
        for record in page.records {
            data.push(
                self.serialize(node, query, record, context.clone(), filters, user)
                    .await?,
            );
        }

        Ok(json!({
            "data": data,
            "meta": {
                "recordCount": page.total,
                "paginationParams": paginate.links(self.settings, page.total),
                "sort": query.get("sort").cloned().unwrap_or(Value::Null),
                "paginate": query.get("paginate").cloned().unwrap_or(Value::Null),
                "filter": query.get("filter").cloned().unwrap_or(Value::Null),
            }
        }))
    }

    /// `{ id, type, attributes, include? }`, restricted to requested and fetchable fields
    async fn serialize(
        &self,
        node: &ReadNode<'a>,
        query: &Map<String, Value>,
        record: Record,
        context: HashMap<String, Record>,
        filters: &HashMap<String, ScopeFilter>,
        user: &UserContext,
    ) -> Result<Value, WriteError> {
        let resource = node.resource;
        let fetchable = self
            .registry
            .permissions(&resource.name)
            .fetchable_fields(resource, user);
        let requested: Option<Vec<String>> =
            query.get("fields").and_then(Value::as_array).map(|fields| {
                fields
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|f| self.settings.key_format.incoming(f))
                    .collect()
            });

        let attributes: Map<String, Value> = record
            .attributes
            .iter()
            .filter(|(key, _)| fetchable.contains(*key))
            .filter(|(key, _)| requested.as_ref().map(|r| r.contains(key)).unwrap_or(true))
            .map(|(key, value)| (self.settings.key_format.outgoing(key), value.clone()))
            .collect();

        let mut out = json!({
            "id": record.id.to_string(),
            "type": resource.plural,
            "attributes": attributes,
        });

        if !node.children.is_empty() {
            let parent_id = record.id;
            let mut next_context = context;
            next_context.insert(resource.name.clone(), record);
            let mut include = Map::new();
            for child in &node.children {
                let result = self
                    .query_node(child, Some(parent_id), next_context.clone(), filters, user)
                    .await?;
                include.insert(self.settings.key_format.outgoing(&child.key), result);
            }
            out["include"] = Value::Object(include);
        }
        Ok(out)
    }
}
