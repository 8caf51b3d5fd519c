use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::model::{ResourceDef, ValidationCheck};

fn pattern_cache() -> &'static Mutex<HashMap<String, regex::Regex>> {
    static CACHE: OnceLock<Mutex<HashMap<String, regex::Regex>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn pattern_matches(pattern: &str, value: &str) -> Result<bool> {
    let mut cache = pattern_cache().lock();
    if !cache.contains_key(pattern) {
        let compiled = regex::Regex::new(pattern)
            .with_context(|| format!("Invalid validation pattern {pattern}"))?;
        cache.insert(pattern.to_string(), compiled);
    }
    Ok(cache
        .get(pattern)
        .map(|re| re.is_match(value))
        .unwrap_or(false))
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

fn as_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Run the resource's validation rules against a record's attributes.
/// Returns `(field, messages)` pairs in rule order, empty when valid.
pub fn validate_attributes(
    resource: &ResourceDef,
    attributes: &Map<String, Value>,
) -> Result<Vec<(String, Vec<String>)>> {
    let mut errors: Vec<(String, Vec<String>)> = Vec::new();

    for rule in &resource.validations {
        let value = attributes.get(&rule.field);
        let message = match &rule.check {
            ValidationCheck::Presence => is_blank(value).then(|| "can't be blank".to_string()),
            ValidationCheck::Format { pattern, negate } => {
                let matched = pattern_matches(pattern, &as_text(value))?;
                (matched == *negate).then(|| "is invalid".to_string())
            }
            ValidationCheck::Length { min, max } => {
                let length = as_text(value).chars().count();
                match (min, max) {
                    (Some(min), _) if length < *min => Some(format!(
                        "is too short (minimum is {} characters)",
                        min
                    )),
                    (_, Some(max)) if length > *max => Some(format!(
                        "is too long (maximum is {} characters)",
                        max
                    )),
                    _ => None,
                }
            }
        };

        if let Some(message) = message {
            match errors.iter_mut().find(|(field, _)| field == &rule.field) {
                Some((_, messages)) => messages.push(message),
                None => errors.push((rule.field.clone(), vec![message])),
            }
        }
    }

    Ok(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ValidationRule;
    use serde_json::json;

    fn answer() -> ResourceDef {
        ResourceDef::new("answer", "answers", &["value"])
            .with_validation(ValidationRule::format("value", "^XXXXX", true))
            .with_validation(ValidationRule {
                field: "value".to_string(),
                check: ValidationCheck::Length {
                    min: None,
                    max: Some(10),
                },
            })
    }

    fn attrs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_negated_format() {
        let errors = validate_attributes(&answer(), &attrs(json!({"value": "XXXXX bad"}))).unwrap();
        assert_eq!(errors, vec![("value".to_string(), vec!["is invalid".to_string()])]);
        assert!(validate_attributes(&answer(), &attrs(json!({"value": "fine"})))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_messages_accumulate_per_field() {
        let attributes = attrs(json!({"value": "XXXXX and far too long"}));
        let errors = validate_attributes(&answer(), &attributes).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].1,
            vec![
                "is invalid".to_string(),
                "is too long (maximum is 10 characters)".to_string()
            ]
        );
    }

    #[test]
    fn test_presence() {
        let survey = ResourceDef::new("survey", "surveys", &["name"])
            .with_validation(ValidationRule::presence("name"));
        for blank in [json!({}), json!({"name": null}), json!({"name": "  "})] {
            let errors = validate_attributes(&survey, &attrs(blank)).unwrap();
            assert_eq!(errors[0].1, vec!["can't be blank".to_string()]);
        }
    }
}
