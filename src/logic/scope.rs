use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use crate::error::WriteError;
use crate::logic::path::{is_temp_id, is_wildcard, join_path, parse_path, PathSegment};
use crate::model::{AssociationDef, Operation, Registry, ResourceDef, Scope, ScopeKey, ScopeKind};

fn word_id_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"^\.\w+$").unwrap_or_else(|e| panic!("invalid id regex: {e}"))
    })
}

/// Decide what a segment asks for from its token, its position and the destroy flag
pub fn classify(token: &str, is_last: bool, destroy: bool) -> Result<ScopeKind, WriteError> {
    let kind = if is_temp_id(token) {
        ScopeKind::Create
    } else if word_id_regex().is_match(token) {
        match (is_last, destroy) {
            (false, _) => ScopeKind::Show,
            (true, false) => ScopeKind::Update,
            (true, true) => ScopeKind::Destroy,
        }
    } else if is_wildcard(token) {
        match (is_last, destroy) {
            (false, _) => ScopeKind::Index,
            (true, false) => ScopeKind::UpdateAll,
            (true, true) => ScopeKind::DestroyAll,
        }
    } else {
        return Err(WriteError::InvalidId(token.to_string()));
    };
    Ok(kind)
}

/// Check that `child_type` is a declared association of the parent scope's
/// resource and that the parent is grounded on a single record.
pub fn validate_association<'r>(
    registry: &'r Registry,
    parent: &Scope,
    child_type: &str,
) -> Result<&'r AssociationDef, WriteError> {
    let association = registry
        .association(&parent.resource_type, child_type)
        .ok_or_else(|| WriteError::InvalidAssociation {
            parent: parent.path_type.clone(),
            child: child_type.to_string(),
        })?;

    if matches!(parent.kind, ScopeKind::Index | ScopeKind::UpdateAll) {
        return Err(WriteError::InvalidParentScope {
            parent: format!("{}.{}", parent.path_type, child_type),
            child: child_type.to_string(),
        });
    }
    Ok(association)
}

/// Resolve a path's segments to their resource definitions, validating each
/// association along the way
pub fn resolve_segments<'r>(
    registry: &'r Registry,
    segments: &[PathSegment],
) -> Result<Vec<&'r ResourceDef>, WriteError> {
    let mut resolved: Vec<&ResourceDef> = Vec::with_capacity(segments.len());
    for segment in segments {
        let resource = match resolved.last() {
            None => registry.require(&segment.resource_type)?,
            Some(parent) => {
                let association = registry
                    .association(&parent.name, &segment.resource_type)
                    .ok_or_else(|| WriteError::InvalidAssociation {
                        parent: parent.plural.clone(),
                        child: segment.resource_type.clone(),
                    })?;
                registry.require(&association.target)?
            }
        };
        resolved.push(resource);
    }
    Ok(resolved)
}

/// Creates that the same request also destroys: `(resource type, token)`
pub fn discarded_creates(scopes: &[Scope]) -> HashSet<(String, String)> {
    scopes
        .iter()
        .filter(|s| s.kind == ScopeKind::Create && s.destroyed)
        .map(|s| (s.resource_type.clone(), s.token.clone()))
        .collect()
}

pub struct ScopeCollector;

impl ScopeCollector {
    /// Walk every operation, emit one scope per segment, deduplicate by
    /// `(kind, type, token)` and number the non-show scopes per type.
    pub fn collect(
        registry: &Registry,
        operations: &[Operation],
    ) -> Result<Vec<Scope>, WriteError> {
        let discarded = Self::find_discarded(registry, operations)?;

        let mut collected: Vec<Scope> = Vec::new();
        let mut positions: HashMap<ScopeKey, usize> = HashMap::new();

        for operation in operations {
            for scope in Self::collect_operation(registry, operation, &discarded)? {
                match positions.get(&scope.key()) {
                    Some(&idx) => {
                        let existing = &mut collected[idx];
                        existing.destroyed |= scope.destroyed;
                        if existing.error_path.is_none() {
                            existing.error_path = scope.error_path;
                        }
                    }
                    None => {
                        positions.insert(scope.key(), collected.len());
                        collected.push(scope);
                    }
                }
            }
        }

        let mut counters: HashMap<String, usize> = HashMap::new();
        for scope in collected.iter_mut().filter(|s| s.kind != ScopeKind::Show) {
            let counter = counters.entry(scope.resource_type.clone()).or_insert(0);
            scope.occurrence_index = Some(*counter);
            *counter += 1;
        }

        debug!(
            "Collected {} scopes from {} operations",
            collected.len(),
            operations.len()
        );
        Ok(collected)
    }

    /// Scopes for a single operation, in path order
    pub fn collect_operation(
        registry: &Registry,
        operation: &Operation,
        discarded: &HashSet<(String, String)>,
    ) -> Result<Vec<Scope>, WriteError> {
        let segments = parse_path(&operation.path)?;
        let last = segments.len() - 1;
        let mut scopes: Vec<Scope> = Vec::with_capacity(segments.len());
        let mut inside_discarded = false;

        for (idx, segment) in segments.iter().enumerate() {
            let is_last = idx == last;
            let kind = classify(&segment.token, is_last, is_last && operation.destroy)?;

            let resource = match scopes.last() {
                None => registry.require(&segment.resource_type)?,
                Some(parent) => {
                    let association =
                        validate_association(registry, parent, &segment.resource_type)?;
                    registry.require(&association.target)?
                }
            };

            inside_discarded |= kind == ScopeKind::Create
                && discarded.contains(&(resource.name.clone(), segment.token.clone()));
            let parent = scopes.last().map(|p| p.key());

            scopes.push(Scope {
                resource_type: resource.name.clone(),
                path_type: segment.resource_type.clone(),
                token: segment.token.clone(),
                kind,
                parent,
                occurrence_index: None,
                client_path: join_path(&segments[..=idx]),
                error_path: if is_last {
                    operation.error_path.clone()
                } else {
                    None
                },
                destroyed: inside_discarded,
                storage_path: None,
            });
        }
        Ok(scopes)
    }

    /// `(resource type, temp token)` of creates cancelled by a destroy in the same request
    fn find_discarded(
        registry: &Registry,
        operations: &[Operation],
    ) -> Result<HashSet<(String, String)>, WriteError> {
        let mut discarded = HashSet::new();
        for operation in operations.iter().filter(|op| op.destroy) {
            let segments = parse_path(&operation.path)?;
            let resources = resolve_segments(registry, &segments)?;
            if let (Some(terminal), Some(resource)) = (segments.last(), resources.last()) {
                if is_temp_id(&terminal.token) {
                    discarded.insert((resource.name.clone(), terminal.token.clone()));
                }
            }
        }
        Ok(discarded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssociationDef, ResourceDef};
    use serde_json::json;

    fn registry() -> Registry {
        Registry::new(vec![
            ResourceDef::new("survey", "surveys", &["name"])
                .with_association(AssociationDef::many("questions", "question")),
            ResourceDef::new("question", "questions", &["content"])
                .with_association(AssociationDef::many("answers", "answer")),
            ResourceDef::new("answer", "answers", &["value"]),
        ])
    }

    #[test]
    fn test_classification_table() {
        assert_eq!(classify(".5", false, false).unwrap(), ScopeKind::Show);
        assert_eq!(classify(".5", true, false).unwrap(), ScopeKind::Update);
        assert_eq!(classify(".5", true, true).unwrap(), ScopeKind::Destroy);
        assert_eq!(classify(".mine", false, true).unwrap(), ScopeKind::Show);
        assert_eq!(classify("[x]", true, false).unwrap(), ScopeKind::Create);
        assert_eq!(classify("[x]", false, true).unwrap(), ScopeKind::Create);
        assert_eq!(classify(".*", false, false).unwrap(), ScopeKind::Index);
        assert_eq!(classify(".*", true, false).unwrap(), ScopeKind::UpdateAll);
        assert_eq!(classify(".*", true, true).unwrap(), ScopeKind::DestroyAll);
        assert!(matches!(
            classify("bogus", true, false),
            Err(WriteError::InvalidId(token)) if token == "bogus"
        ));
    }

    #[test]
    fn test_invalid_association() {
        let ops = vec![Operation::update("surveys.1.answers.2", json!({"value": "x"}))];
        assert!(matches!(
            ScopeCollector::collect(&registry(), &ops),
            Err(WriteError::InvalidAssociation { parent, child })
                if parent == "surveys" && child == "answers"
        ));
    }

    #[test]
    fn test_children_of_collections_are_rejected() {
        let ops = vec![Operation::update("surveys.*.questions.2", json!({"content": "x"}))];
        assert!(matches!(
            ScopeCollector::collect(&registry(), &ops),
            Err(WriteError::InvalidParentScope { .. })
        ));
    }

    #[test]
    fn test_unknown_root_type() {
        let ops = vec![Operation::update("admins.1", json!({}))];
        assert!(matches!(
            ScopeCollector::collect(&registry(), &ops),
            Err(WriteError::UnknownResource(name)) if name == "admins"
        ));
    }

    #[test]
    fn test_scopes_are_deduplicated_and_indexed() {
        let ops = vec![
            Operation::update("surveys.1.questions.2", json!({"content": "a"})),
            Operation::update("surveys.1.questions[q1]", json!({"content": "b"})),
            Operation::update("surveys.1.questions.2", json!({"content": "c"})),
            Operation::update("surveys.1.questions.2.answers[a1]", json!({"value": "d"})),
        ];
        let scopes = ScopeCollector::collect(&registry(), &ops).unwrap();
        let summary: Vec<(&str, &str, Option<usize>)> = scopes
            .iter()
            .map(|s| (s.kind.as_str(), s.token.as_str(), s.occurrence_index))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("show", ".1", None),
                ("update", ".2", Some(0)),
                ("create", "[q1]", Some(1)),
                ("show", ".2", None),
                ("create", "[a1]", Some(0)),
            ]
        );
        assert_eq!(scopes[4].client_path, "surveys.1.questions.2.answers[a1]");
        assert_eq!(scopes[4].resource_type, "answer");
        assert_eq!(scopes[4].path_type, "answers");
        assert_eq!(scopes[4].parent.as_ref().map(|p| p.kind), Some(ScopeKind::Show));
    }

    #[test]
    fn test_create_then_destroy_marks_scope() {
        let ops = vec![
            Operation::update("surveys.1.questions[q1]", json!({"content": "x"})),
            Operation::update("surveys.1.questions[q1].answers[a1]", json!({"value": "y"})),
            Operation::destroy("surveys.1.questions[q1]"),
        ];
        let scopes = ScopeCollector::collect(&registry(), &ops).unwrap();
        let discarded = discarded_creates(&scopes);
        assert!(discarded.contains(&("question".to_string(), "[q1]".to_string())));
        assert!(discarded.contains(&("answer".to_string(), "[a1]".to_string())));
        assert!(!scopes[0].destroyed);
    }

    #[test]
    fn test_destroy_only_discards_creates_of_its_own_type() {
        let ops = vec![
            Operation::update("surveys[x]", json!({"name": "n"})),
            Operation::update("surveys.1.questions[x]", json!({"content": "c"})),
            Operation::destroy("surveys.1.questions[x]"),
        ];
        let scopes = ScopeCollector::collect(&registry(), &ops).unwrap();
        let survey = scopes
            .iter()
            .find(|s| s.resource_type == "survey" && s.token == "[x]")
            .unwrap();
        let question = scopes.iter().find(|s| s.resource_type == "question").unwrap();
        assert!(!survey.destroyed);
        assert!(question.destroyed);
        assert_eq!(
            discarded_creates(&scopes),
            HashSet::from([("question".to_string(), "[x]".to_string())])
        );
    }

    #[test]
    fn test_error_path_lands_on_terminal_scope() {
        let ops = vec![Operation::update("surveys.1.questions.2", json!({"content": "x"}))
            .with_error_path("questionForm")];
        let scopes = ScopeCollector::collect(&registry(), &ops).unwrap();
        assert_eq!(scopes[0].error_path, None);
        assert_eq!(scopes[1].error_path.as_deref(), Some("questionForm"));
    }
}
