mod common;

use common::TestApp;
use deepwrite_rust::{Operation, UpdateRequest};
use serde_json::{json, Map};

fn request(ops: Vec<Operation>) -> UpdateRequest {
    UpdateRequest::new(ops)
}

#[tokio::test]
async fn test_nested_creates_resolve_temp_ids_and_redirect() {
    let app = TestApp::new().await;
    let user = app.applicant(0);
    let survey = app.seed.surveys[0];
    let survey_path = format!("surveys.{}", survey);

    let result = app
        .service
        .perform_update(
            &user,
            &request(vec![
                Operation::update(
                    &format!("{}.questions[q1]", survey_path),
                    json!({"content": "How is the cherry pie?"}),
                ),
                Operation::update(
                    &format!("{}.questions[q1].answers[a1]", survey_path),
                    json!({"value": "Damn good", "applicantId": app.seed.applicants[0]}),
                ),
            ])
            .with_redirect("/surveys/[q1]/answers/[a1]"),
        )
        .await
        .unwrap();

    let question_id = result.temp_ids.get("[q1]").unwrap();
    let answer_id = result.temp_ids.get("[a1]").unwrap();
    assert_eq!(
        result.redirect.as_deref(),
        Some(format!("/surveys/{}/answers/{}", question_id, answer_id).as_str())
    );

    let question = app.record("question", question_id).await.unwrap();
    assert_eq!(question.attributes.get("survey_id"), Some(&json!(survey)));
    let answer = app.record("answer", answer_id).await.unwrap();
    assert_eq!(answer.attributes.get("question_id"), Some(&json!(question_id)));

    // outgoing keys are camelCase
    let created_answer = result
        .changed
        .iter()
        .find(|c| c.resource_type == "answer")
        .unwrap();
    assert_eq!(created_answer.attributes.get("questionId"), Some(&json!(question_id)));
}

#[tokio::test]
async fn test_sibling_operations_merge_into_one_record() {
    let app = TestApp::new().await;
    let path = format!("surveys.{}.questions[q1]", app.seed.surveys[0]);
    let before = app.store.count("question");

    let result = app
        .service
        .perform_update(
            &app.admin(),
            &request(vec![
                Operation::update(&path, json!({"content": "merged"})),
                Operation::update(&format!("{}.answers[a1]", path), json!({"value": "one"})),
                Operation::update(&format!("{}.answers[a2]", path), json!({"value": "two"})),
            ]),
        )
        .await;
    // admins may not create answers
    assert_eq!(result.unwrap_err().status_code(), 403);
    assert_eq!(app.store.count("question"), before);

    let result = app
        .service
        .perform_update(
            &app.applicant(0),
            &request(vec![
                Operation::update(&path, json!({"content": "merged"})),
                Operation::update(&format!("{}.answers[a1]", path), json!({"value": "one"})),
                Operation::update(&format!("{}.answers[a2]", path), json!({"value": "two"})),
            ]),
        )
        .await
        .unwrap();

    assert_eq!(app.store.count("question"), before + 1);
    let question_id = result.temp_ids.get("[q1]").unwrap();
    let question = app.record("question", question_id).await.unwrap();
    assert_eq!(question.attributes.get("content"), Some(&json!("merged")));
    for token in ["[a1]", "[a2]"] {
        let answer = app.record("answer", result.temp_ids.get(token).unwrap()).await.unwrap();
        assert_eq!(answer.attributes.get("question_id"), Some(&json!(question_id)));
    }
}

#[tokio::test]
async fn test_create_destroyed_in_same_request_is_never_persisted() {
    let app = TestApp::new().await;
    let path = format!("surveys.{}.questions[q1]", app.seed.surveys[0]);
    let before = app.store.count("question");

    let result = app
        .service
        .perform_update(
            &app.admin(),
            &request(vec![
                Operation::update(&path, json!({"content": "short lived"})),
                Operation::destroy(&path),
            ]),
        )
        .await
        .unwrap();

    assert!(result.temp_ids.is_empty());
    assert!(result.changed.is_empty());
    assert!(result.destroyed.is_empty());
    assert_eq!(app.store.count("question"), before);
}

#[tokio::test]
async fn test_unauthorized_update_points_at_offending_scope() {
    let app = TestApp::new().await;
    let user = app.applicant(1);
    let survey = app.seed.surveys[0];
    let survey_path = format!("surveys.{}", survey);

    let err = app
        .service
        .perform_update(
            &user,
            &request(vec![
                Operation::update(&survey_path, json!({"name": "Mine now"})),
                Operation::update(
                    &format!(
                        "{}.questions.{}.answers.{}",
                        survey_path, app.seed.questions[0], app.seed.answers[0]
                    ),
                    json!({"value": "changed"}),
                ),
            ]),
        )
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 403);
    let errors = err.errors();
    assert_eq!(
        errors[0].title,
        format!(
            "Applicant with id '{}' is not authorized to update Survey with id '{}'",
            app.seed.applicants[1], survey
        )
    );
    assert_eq!(errors[0].source.pointer.as_deref(), Some(survey_path.as_str()));

    let record = app.record("survey", survey).await.unwrap();
    assert_eq!(record.attributes.get("name"), Some(&json!("Double R Diner")));
    let answer = app.record("answer", app.seed.answers[0]).await.unwrap();
    assert_eq!(answer.attributes.get("value"), Some(&json!("Damn fine")));
}

#[tokio::test]
async fn test_unpermitted_attributes_are_rejected() {
    let app = TestApp::new().await;
    let path = format!("surveys.{}", app.seed.surveys[0]);

    let err = app
        .service
        .perform_update(
            &app.applicant(0),
            &request(vec![Operation::update(&path, json!({"approved": true}))]),
        )
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 405);
    assert_eq!(
        err.errors()[0].source.pointer.as_deref(),
        Some(format!("{}.approved", path).as_str())
    );
    let survey = app.record("survey", app.seed.surveys[0]).await.unwrap();
    assert_eq!(survey.attributes.get("approved"), Some(&json!(false)));
}

#[tokio::test]
async fn test_deep_validation_errors_map_back_to_client_paths() {
    let app = TestApp::new().await;
    let survey_path = format!("surveys.{}", app.seed.surveys[0]);
    let answer_path = format!(
        "{}.questions.{}.answers.{}",
        survey_path, app.seed.questions[0], app.seed.answers[0]
    );

    let err = app
        .service
        .perform_update(
            &app.applicant(0),
            &request(vec![
                Operation::update(&survey_path, json!({"name": ""})),
                Operation::update(&answer_path, json!({"value": "XXXXX bad"}))
                    .with_error_path("answerForm"),
            ]),
        )
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 409);
    let errors = err.errors();
    assert_eq!(errors.len(), 2);

    let answer_error = errors
        .iter()
        .find(|e| e.title == "Value is invalid")
        .unwrap();
    assert_eq!(answer_error.source.pointer.as_deref(), Some("answerForm.value"));
    assert_eq!(
        answer_error.source.client_path.as_deref(),
        Some(format!("{}.value", answer_path).as_str())
    );

    let survey_error = errors
        .iter()
        .find(|e| e.title == "Name can't be blank")
        .unwrap();
    assert_eq!(
        survey_error.source.pointer.as_deref(),
        Some(format!("{}.name", survey_path).as_str())
    );

    // rolled back as a whole
    let answer = app.record("answer", app.seed.answers[0]).await.unwrap();
    assert_eq!(answer.attributes.get("value"), Some(&json!("Damn fine")));
}

#[tokio::test]
async fn test_errors_on_later_create_siblings_keep_their_own_path() {
    let app = TestApp::new().await;
    let applicant = app.seed.applicants[0];
    let question_path = format!("surveys.{}.questions[q1]", app.seed.surveys[0]);

    let err = app
        .service
        .perform_update(
            &app.applicant(0),
            &request(vec![
                Operation::update(&question_path, json!({"content": "How is the pie?"})),
                Operation::update(
                    &format!("{}.answers[a1]", question_path),
                    json!({"value": "Cherry", "applicantId": applicant}),
                ),
                Operation::update(
                    &format!("{}.answers[a2]", question_path),
                    json!({"value": "XXXXX nope", "applicantId": applicant}),
                ),
            ]),
        )
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 409);
    let errors = err.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].title, "Value is invalid");
    assert_eq!(
        errors[0].source.pointer.as_deref(),
        Some(format!("{}.answers[a2].value", question_path).as_str())
    );
    assert_eq!(
        errors[0].source.storage_path.as_deref(),
        Some("questions[0].answers[1].value")
    );
    assert_eq!(app.store.count("question"), 3);
    assert_eq!(app.store.count("answer"), 2);
}

#[tokio::test]
async fn test_bulk_update_is_limited_to_authorized_records() {
    let app = TestApp::new().await;

    app.service
        .perform_update(
            &app.applicant(0),
            &request(vec![Operation::update("surveys.*", json!({"name": "Renamed"}))]),
        )
        .await
        .unwrap();

    let mine = app.record("survey", app.seed.surveys[0]).await.unwrap();
    let theirs = app.record("survey", app.seed.surveys[1]).await.unwrap();
    assert_eq!(mine.attributes.get("name"), Some(&json!("Renamed")));
    assert_eq!(theirs.attributes.get("name"), Some(&json!("Great Northern")));
}

#[tokio::test]
async fn test_bulk_destroy_is_limited_to_authorized_records() {
    let app = TestApp::new().await;

    app.service
        .perform_update(&app.applicant(0), &request(vec![Operation::destroy("surveys.*")]))
        .await
        .unwrap();

    assert!(app.record("survey", app.seed.surveys[0]).await.is_none());
    assert!(app.record("survey", app.seed.surveys[1]).await.is_some());
}

#[tokio::test]
async fn test_nested_bulk_destroy_only_touches_the_named_parent() {
    let app = TestApp::new().await;
    let path = format!("surveys.{}.questions.*", app.seed.surveys[1]);

    app.service
        .perform_update(&app.admin(), &request(vec![Operation::destroy(&path)]))
        .await
        .unwrap();

    assert_eq!(app.store.count("question"), 2);
    assert!(app.record("question", app.seed.questions[2]).await.is_none());
    assert!(app.record("question", app.seed.questions[0]).await.is_some());
    assert!(app.record("question", app.seed.questions[1]).await.is_some());
    assert!(app.record("survey", app.seed.surveys[1]).await.is_some());
}

#[tokio::test]
async fn test_destroy_cascades_through_dependents() {
    let app = TestApp::new().await;
    let survey = app.seed.surveys[0];
    let path = format!("surveys.{}", survey);

    let result = app
        .service
        .perform_update(&app.applicant(0), &request(vec![Operation::destroy(&path)]))
        .await
        .unwrap();

    let requested: Vec<_> = result
        .destroyed
        .iter()
        .filter(|d| d.client_path.is_some())
        .collect();
    assert_eq!(requested.len(), 1);
    assert_eq!(requested[0].resource_type, "surveys");
    assert_eq!(requested[0].id, survey);
    assert_eq!(result.destroyed.len(), 5);

    assert!(app.record("survey", survey).await.is_none());
    assert_eq!(app.store.count("question"), 1);
    assert_eq!(app.store.count("answer"), 0);
}

#[tokio::test]
async fn test_only_changed_keys_are_reported_and_arrays_stay_opaque() {
    let app = TestApp::new().await;
    let survey_path = format!("surveys.{}", app.seed.surveys[0]);
    let answer_path = format!(
        "{}.questions.{}.answers.{}",
        survey_path, app.seed.questions[0], app.seed.answers[0]
    );

    let result = app
        .service
        .perform_update(
            &app.applicant(0),
            &request(vec![
                Operation::update(&survey_path, json!({"name": "Double R Diner"})),
                Operation::update(&answer_path, json!({"value": ["black", "coffee"]})),
            ]),
        )
        .await
        .unwrap();

    assert_eq!(result.changed.len(), 1);
    let changed = &result.changed[0];
    assert_eq!(changed.resource_type, "answer");
    let mut expected = Map::new();
    expected.insert("value".to_string(), json!(["black", "coffee"]));
    assert_eq!(changed.attributes, expected);
}

#[tokio::test]
async fn test_before_update_hook_sees_user_and_context() {
    let app = TestApp::new().await;
    let path = format!("surveys.{}", app.seed.surveys[0]);
    let op = || request(vec![Operation::update(&path, json!({"name": "x"}))]);

    let mut context = Map::new();
    context.insert("block_me".to_string(), json!(true));
    let err = app
        .service
        .perform_update(&app.applicant(0), &op().with_context(context))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);

    let inactive = app.applicant(0).with_attribute("active", json!(false));
    let err = app.service.perform_update(&inactive, &op()).await.unwrap_err();
    assert_eq!(
        err.errors()[0].title,
        "applicants cannot modify inactive surveys"
    );

    let survey = app.record("survey", app.seed.surveys[0]).await.unwrap();
    assert_eq!(survey.attributes.get("name"), Some(&json!("Double R Diner")));
}

#[tokio::test]
async fn test_malformed_paths_are_rejected() {
    let app = TestApp::new().await;
    for (path, status) in [
        ("surveys..1", 400),
        ("surveys.1.owls.2", 400),
        ("surveys.*.questions.1", 400),
        ("owls.1", 400),
    ] {
        let err = app
            .service
            .perform_update(&app.admin(), &request(vec![Operation::update(path, json!({}))]))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), status, "{}", path);
    }
}
