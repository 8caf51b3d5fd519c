use serde_json::Value;
use std::sync::Arc;

use crate::auth::{FnPolicy, Policy, PolicyStrategy};
use crate::logic::Hooks;
use crate::model::{loose_eq, Record, Registry, ScopeFilter, ScopeKind, UserContext};
use crate::store::RecordStore;

fn owns(user: &UserContext, record: Option<&Record>, field: &str) -> bool {
    record
        .and_then(|r| r.field(field))
        .map(|owner| loose_eq(&owner, &Value::String(user.user_id.clone())))
        .unwrap_or(false)
}

/// Admins see every survey, applicants their own
pub struct SurveyPolicy;

impl Policy for SurveyPolicy {
    fn allows(&self, kind: ScopeKind, user: &UserContext, record: Option<&Record>) -> bool {
        match kind {
            ScopeKind::Update | ScopeKind::Destroy => {
                user.is_type("Admin") || owns(user, record, "applicant_id")
            }
            _ => true,
        }
    }

    fn scope(&self, user: &UserContext) -> ScopeFilter {
        match user.user_type.as_str() {
            "Admin" => ScopeFilter::All,
            "Applicant" => ScopeFilter::field("applicant_id", Value::String(user.user_id.clone())),
            _ => ScopeFilter::Nothing,
        }
    }
}

/// Records carrying an `applicant_id` only their applicant may change
pub struct ApplicantOwnedPolicy;

impl Policy for ApplicantOwnedPolicy {
    fn allows(&self, kind: ScopeKind, user: &UserContext, record: Option<&Record>) -> bool {
        match kind {
            ScopeKind::Show | ScopeKind::Index => true,
            ScopeKind::Create => user.is_type("Applicant"),
            ScopeKind::Update | ScopeKind::Destroy => owns(user, record, "applicant_id"),
            ScopeKind::UpdateAll | ScopeKind::DestroyAll => user.is_type("Applicant"),
        }
    }

    fn scope(&self, user: &UserContext) -> ScopeFilter {
        if user.is_type("Applicant") {
            ScopeFilter::field("applicant_id", Value::String(user.user_id.clone()))
        } else {
            ScopeFilter::All
        }
    }
}

/// Authorization rules for the survey registry
pub fn survey_policies<S: RecordStore>(
    store: Arc<S>,
    registry: Arc<Registry>,
) -> PolicyStrategy<S> {
    PolicyStrategy::new(store, registry)
        .with_policy("survey", SurveyPolicy)
        .with_policy(
            "question",
            FnPolicy::new(
                |kind: ScopeKind, user: &UserContext, _record: Option<&Record>| {
                    matches!(kind, ScopeKind::Show | ScopeKind::Index)
                        || user.is_type("Admin")
                        || user.is_type("Applicant")
                },
                |_user: &UserContext| ScopeFilter::All,
            ),
        )
        .with_policy("answer", ApplicantOwnedPolicy)
        .with_policy("attachment", ApplicantOwnedPolicy)
        .with_policy(
            "applicant",
            FnPolicy::new(
                |kind: ScopeKind, user: &UserContext, record: Option<&Record>| match kind {
                    ScopeKind::Update | ScopeKind::Destroy => owns(user, record, "id"),
                    ScopeKind::UpdateAll | ScopeKind::DestroyAll => false,
                    _ => true,
                },
                |_user: &UserContext| ScopeFilter::All,
            ),
        )
        .with_policy(
            "activity",
            FnPolicy::new(
                |_kind: ScopeKind, user: &UserContext, _record: Option<&Record>| {
                    user.is_type("Admin")
                },
                |user: &UserContext| {
                    if user.is_type("Admin") {
                        ScopeFilter::All
                    } else {
                        ScopeFilter::Nothing
                    }
                },
            ),
        )
}

/// Request hooks for the survey domain: a user named `homer`, an inactive
/// applicant, or a `block_me` context flag may not write; `block_me` also blocks reads.
pub fn survey_hooks() -> Hooks {
    Hooks::default()
        .with_before_update(|ctx| {
            if ctx.user.user_name.as_deref() == Some("homer") {
                return Err(format!("{} may not make updates", ctx.user.describe()));
            }
            if ctx.client_context.contains_key("block_me") {
                return Err("updates are blocked for this request".to_string());
            }
            if ctx.user.is_type("Applicant")
                && ctx.user.attributes.get("active") == Some(&Value::Bool(false))
            {
                return Err("applicants cannot modify inactive surveys".to_string());
            }
            Ok(())
        })
        .with_before_read(|ctx| {
            if ctx.client_context.contains_key("block_me") {
                Err("reads are blocked for this request".to_string())
            } else {
                Ok(())
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RequestContext;
    use serde_json::json;

    fn survey_owned_by(applicant: i64) -> Record {
        Record::new(
            "survey",
            1,
            json!({"name": "s", "applicant_id": applicant})
                .as_object()
                .cloned()
                .unwrap(),
        )
    }

    #[test]
    fn test_survey_policy_checks_ownership() {
        let owner = UserContext::new("1".to_string()).with_type("Applicant");
        let other = UserContext::new("2".to_string()).with_type("Applicant");
        let admin = UserContext::new("9".to_string()).with_type("Admin");
        let record = survey_owned_by(1);

        assert!(SurveyPolicy.allows(ScopeKind::Update, &owner, Some(&record)));
        assert!(!SurveyPolicy.allows(ScopeKind::Destroy, &other, Some(&record)));
        assert!(SurveyPolicy.allows(ScopeKind::Update, &admin, Some(&record)));
        assert!(SurveyPolicy.allows(ScopeKind::UpdateAll, &other, None));
        assert!(SurveyPolicy.scope(&owner).matches(&record));
        assert!(!SurveyPolicy.scope(&other).matches(&record));
        assert_eq!(
            SurveyPolicy.scope(&UserContext::new("3".to_string())),
            ScopeFilter::Nothing
        );
    }

    #[test]
    fn test_hooks_reject_homer_and_inactive_applicants() {
        let hooks = survey_hooks();
        let homer = UserContext::with_details("1".to_string(), None, Some("homer".to_string()));
        assert!(hooks.run_before_update(&RequestContext::new(homer)).is_err());

        let inactive = UserContext::new("1".to_string())
            .with_type("Applicant")
            .with_attribute("active", json!(false));
        assert!(hooks.run_before_update(&RequestContext::new(inactive.clone())).is_err());
        assert!(hooks.run_before_read(&RequestContext::new(inactive)).is_ok());
    }
}
