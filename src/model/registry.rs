use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::WriteError;
use crate::model::{class_name, UserContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    Many,
    One,
}

fn default_cardinality() -> Cardinality {
    Cardinality::Many
}

/// A declared relationship from a parent resource to a child resource.
/// The foreign key always lives on the child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationDef {
    pub name: String,
    pub target: String,
    #[serde(default = "default_cardinality")]
    pub cardinality: Cardinality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
    #[serde(default)]
    pub dependent_destroy: bool,
}

impl AssociationDef {
    pub fn many(name: &str, target: &str) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            cardinality: Cardinality::Many,
            foreign_key: None,
            dependent_destroy: false,
        }
    }

    pub fn one(name: &str, target: &str) -> Self {
        Self {
            cardinality: Cardinality::One,
            ..Self::many(name, target)
        }
    }

    pub fn dependent(mut self) -> Self {
        self.dependent_destroy = true;
        self
    }

    pub fn with_foreign_key(mut self, key: &str) -> Self {
        self.foreign_key = Some(key.to_string());
        self
    }

    /// Column on the child pointing at the parent, `<parent>_id` unless overridden
    pub fn foreign_key_for(&self, parent: &ResourceDef) -> String {
        self.foreign_key
            .clone()
            .unwrap_or_else(|| format!("{}_id", parent.name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub field: String,
    #[serde(flatten)]
    pub check: ValidationCheck,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ValidationCheck {
    Presence,
    Format {
        pattern: String,
        /// Reject values that match instead of values that don't
        #[serde(default)]
        negate: bool,
    },
    Length {
        #[serde(default)]
        min: Option<usize>,
        #[serde(default)]
        max: Option<usize>,
    },
}

impl ValidationRule {
    pub fn presence(field: &str) -> Self {
        Self {
            field: field.to_string(),
            check: ValidationCheck::Presence,
        }
    }

    pub fn format(field: &str, pattern: &str, negate: bool) -> Self {
        Self {
            field: field.to_string(),
            check: ValidationCheck::Format {
                pattern: pattern.to_string(),
                negate,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDef {
    /// Singular, snake_case name (`survey`)
    pub name: String,
    /// Plural name used in paths and responses (`surveys`)
    pub plural: String,
    pub attributes: Vec<String>,
    #[serde(default)]
    pub associations: Vec<AssociationDef>,
    #[serde(default)]
    pub validations: Vec<ValidationRule>,
}

impl ResourceDef {
    pub fn new(name: &str, plural: &str, attributes: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            plural: plural.to_string(),
            attributes: attributes.iter().map(|a| a.to_string()).collect(),
            associations: Vec::new(),
            validations: Vec::new(),
        }
    }

    pub fn with_association(mut self, association: AssociationDef) -> Self {
        self.associations.push(association);
        self
    }

    pub fn with_validation(mut self, rule: ValidationRule) -> Self {
        self.validations.push(rule);
        self
    }

    /// `Survey`
    pub fn display_name(&self) -> String {
        class_name(&self.name)
    }

    pub fn association(&self, name: &str) -> Option<&AssociationDef> {
        self.associations.iter().find(|a| a.name == name)
    }

    pub fn attribute_set(&self) -> BTreeSet<String> {
        self.attributes.iter().cloned().collect()
    }
}

/// Field-level capability supplied by the resource layer.
/// Defaults expose every declared attribute.
pub trait FieldPermissions: Send + Sync {
    fn creatable_fields(&self, resource: &ResourceDef, _user: &UserContext) -> BTreeSet<String> {
        resource.attribute_set()
    }

    fn updatable_fields(&self, resource: &ResourceDef, _user: &UserContext) -> BTreeSet<String> {
        resource.attribute_set()
    }

    fn fetchable_fields(&self, resource: &ResourceDef, _user: &UserContext) -> BTreeSet<String> {
        resource.attribute_set()
    }
}

pub struct AllFields;

impl FieldPermissions for AllFields {}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryFile {
    resources: Vec<ResourceDef>,
}

/// Static relationship registry: resource types, their attributes and associations
pub struct Registry {
    resources: Vec<ResourceDef>,
    by_name: HashMap<String, usize>,
    permissions: HashMap<String, Arc<dyn FieldPermissions>>,
    default_permissions: Arc<dyn FieldPermissions>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("resources", &self.resources)
            .field("permissions", &self.permissions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    pub fn new(resources: Vec<ResourceDef>) -> Self {
        let mut by_name = HashMap::new();
        for (idx, resource) in resources.iter().enumerate() {
            by_name.insert(resource.name.clone(), idx);
            by_name.insert(resource.plural.clone(), idx);
        }
        Self {
            resources,
            by_name,
            permissions: HashMap::new(),
            default_permissions: Arc::new(AllFields),
        }
    }

    /// Parse a `{"resources": [...]}` schema document
    pub fn from_json(json: &str) -> Result<Self> {
        let file: RegistryFile =
            serde_json::from_str(json).context("Failed to parse resource schema")?;
        Ok(Self::new(file.resources))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schema file {}", path.display()))?;
        Self::from_json(&raw)
    }

    pub fn with_permissions(
        mut self,
        resource: &str,
        permissions: impl FieldPermissions + 'static,
    ) -> Self {
        let name = self
            .resource(resource)
            .map(|r| r.name.clone())
            .unwrap_or_else(|| resource.to_string());
        self.permissions.insert(name, Arc::new(permissions));
        self
    }

    /// Lookup by singular or plural name
    pub fn resource(&self, name: &str) -> Option<&ResourceDef> {
        self.by_name.get(name).map(|idx| &self.resources[*idx])
    }

    pub fn require(&self, name: &str) -> Result<&ResourceDef, WriteError> {
        self.resource(name)
            .ok_or_else(|| WriteError::UnknownResource(name.to_string()))
    }

    pub fn resources(&self) -> impl Iterator<Item = &ResourceDef> {
        self.resources.iter()
    }

    pub fn permissions(&self, name: &str) -> &dyn FieldPermissions {
        self.resource(name)
            .and_then(|r| self.permissions.get(&r.name))
            .unwrap_or(&self.default_permissions)
            .as_ref()
    }

    /// The association `child` declared on `parent`, provided its target resolves
    /// to the same resource `child` names.
    pub fn association(&self, parent: &str, child: &str) -> Option<&AssociationDef> {
        let parent = self.resource(parent)?;
        let association = parent.association(child)?;
        let target = self.resource(&association.target)?;
        let named = self.resource(child)?;
        (target.name == named.name).then_some(association)
    }
}
