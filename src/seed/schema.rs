use std::collections::BTreeSet;

use crate::model::{
    AssociationDef, FieldPermissions, Registry, ResourceDef, UserContext, ValidationRule,
};

/// Survey domain used by the CLI when no schema file is configured, and by the tests
pub fn survey_registry() -> Registry {
    Registry::new(vec![
        ResourceDef::new("survey", "surveys", &["name", "approved", "applicant_id"])
            .with_association(AssociationDef::many("questions", "question").dependent())
            .with_association(AssociationDef::many("answers", "answer"))
            .with_validation(ValidationRule::presence("name")),
        ResourceDef::new("question", "questions", &["content", "survey_id"])
            .with_association(AssociationDef::many("answers", "answer").dependent()),
        ResourceDef::new(
            "answer",
            "answers",
            &["value", "question_id", "survey_id", "applicant_id"],
        )
        .with_association(AssociationDef::many("attachments", "attachment").dependent())
        .with_validation(ValidationRule::format("value", "^XXXXX", true)),
        ResourceDef::new(
            "attachment",
            "attachments",
            &["title", "file_uid", "file_name", "answer_id", "applicant_id"],
        ),
        ResourceDef::new("applicant", "applicants", &["name", "nickname", "email", "active"])
            .with_association(AssociationDef::many("surveys", "survey"))
            .with_association(AssociationDef::many("answers", "answer"))
            .with_association(AssociationDef::many("attachments", "attachment")),
        ResourceDef::new(
            "activity",
            "activities",
            &["log_message", "target_id", "target_type", "user_id", "user_type"],
        ),
    ])
    .with_permissions("survey", SurveyFields)
    .with_permissions("question", AdminWritable)
    .with_permissions("answer", ApplicantWritable)
}

fn without(resource: &ResourceDef, field: &str) -> BTreeSet<String> {
    let mut fields = resource.attribute_set();
    fields.remove(field);
    fields
}

/// Admins may not rename a survey, applicants may not approve one
pub struct SurveyFields;

impl FieldPermissions for SurveyFields {
    fn creatable_fields(&self, resource: &ResourceDef, user: &UserContext) -> BTreeSet<String> {
        self.updatable_fields(resource, user)
    }

    fn updatable_fields(&self, resource: &ResourceDef, user: &UserContext) -> BTreeSet<String> {
        match user.user_type.as_str() {
            "Admin" => without(resource, "name"),
            "Applicant" => without(resource, "approved"),
            _ => BTreeSet::new(),
        }
    }
}

pub struct AdminWritable;

impl FieldPermissions for AdminWritable {
    fn updatable_fields(&self, resource: &ResourceDef, user: &UserContext) -> BTreeSet<String> {
        if user.is_type("Admin") {
            resource.attribute_set()
        } else {
            BTreeSet::new()
        }
    }
}

pub struct ApplicantWritable;

impl FieldPermissions for ApplicantWritable {
    fn updatable_fields(&self, resource: &ResourceDef, user: &UserContext) -> BTreeSet<String> {
        if user.is_type("Applicant") {
            resource.attribute_set()
        } else {
            BTreeSet::new()
        }
    }
}
