mod common;

use common::TestApp;
use deepwrite_rust::NestedRequest;
use serde_json::{json, Map};

#[tokio::test]
async fn test_read_single_record_with_included_children() {
    let app = TestApp::new().await;
    let survey = app.seed.surveys[0];

    let response = app
        .service
        .read(
            &app.applicant(0),
            &NestedRequest::new(json!({
                "survey": {
                    "id": survey,
                    "fields": ["name"],
                    "include": {
                        "questions": {
                            "filter": {"surveyId": {"fromContext": "survey.id"}}
                        }
                    }
                }
            })),
        )
        .await
        .unwrap();

    let body = &response["survey"];
    assert_eq!(body["id"], json!(survey.to_string()));
    assert_eq!(body["type"], json!("surveys"));
    assert_eq!(body["attributes"], json!({"name": "Double R Diner"}));

    let questions = &body["include"]["questions"];
    assert_eq!(questions["meta"]["recordCount"], json!(2));
    assert_eq!(questions["data"].as_array().unwrap().len(), 2);
    assert_eq!(questions["data"][0]["attributes"]["surveyId"], json!(survey));
}

#[tokio::test]
async fn test_extend_overrides_per_parent() {
    let app = TestApp::new().await;
    let survey = app.seed.surveys[0];

    let mut extend = Map::new();
    extend.insert(survey.to_string(), json!({"fields": ["content"]}));
    let response = app
        .service
        .read(
            &app.admin(),
            &NestedRequest::new(json!({
                "survey": {
                    "id": survey,
                    "include": {
                        "questions": {
                            "filter": {"surveyId": {"fromContext": "survey.id"}},
                            "extend": extend
                        }
                    }
                }
            })),
        )
        .await
        .unwrap();

    let first = &response["survey"]["include"]["questions"]["data"][0];
    assert_eq!(first["attributes"], json!({"content": "How is the coffee?"}));
}

#[tokio::test]
async fn test_list_reads_sort_and_paginate() {
    let app = TestApp::new().await;

    let response = app
        .service
        .read(
            &app.admin(),
            &NestedRequest::new(json!({
                "questions": {
                    "sort": [{"field": "content", "direction": "desc"}],
                    "paginate": {"number": 1, "size": 2}
                }
            })),
        )
        .await
        .unwrap();

    let list = &response["questions"];
    assert_eq!(list["meta"]["recordCount"], json!(3));
    assert_eq!(list["meta"]["paginate"], json!({"number": 1, "size": 2}));
    assert_eq!(
        list["meta"]["paginationParams"]["next"],
        json!({"number": 2, "size": 2})
    );
    let contents: Vec<_> = list["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|q| q["attributes"]["content"].clone())
        .collect();
    assert_eq!(contents, vec![json!("Who is the owl?"), json!("How is the pie?")]);
}

#[tokio::test]
async fn test_pages_past_the_end_are_empty() {
    let app = TestApp::new().await;

    for paginate in [
        json!({"number": u64::MAX, "size": 10}),
        json!({"type": "offset", "offset": u64::MAX}),
    ] {
        let response = app
            .service
            .read(
                &app.admin(),
                &NestedRequest::new(json!({"questions": {"paginate": paginate}})),
            )
            .await
            .unwrap();

        let list = &response["questions"];
        assert_eq!(list["meta"]["recordCount"], json!(3));
        assert!(list["data"].as_array().unwrap().is_empty());
        assert!(list["meta"]["paginationParams"].get("next").is_none());
    }
}

#[tokio::test]
async fn test_reads_are_limited_to_the_authorized_scope() {
    let app = TestApp::new().await;
    let user = app.applicant(1);

    let response = app
        .service
        .read(&user, &NestedRequest::new(json!({"surveys": {}})))
        .await
        .unwrap();
    let data = response["surveys"]["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["id"], json!(app.seed.surveys[1].to_string()));

    let err = app
        .service
        .read(
            &user,
            &NestedRequest::new(json!({"survey": {"id": app.seed.surveys[0]}})),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_find_matches_on_attributes() {
    let app = TestApp::new().await;

    let response = app
        .service
        .read(
            &app.admin(),
            &NestedRequest::new(json!({"survey": {"find": {"name": "Great Northern"}}})),
        )
        .await
        .unwrap();
    assert_eq!(response["survey"]["id"], json!(app.seed.surveys[1].to_string()));

    let err = app
        .service
        .read(&app.admin(), &NestedRequest::new(json!({"survey": {}})))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn test_before_read_hook_receives_context() {
    let app = TestApp::new().await;
    let mut context = Map::new();
    context.insert("block_me".to_string(), json!(true));

    let err = app
        .service
        .read(
            &app.admin(),
            &NestedRequest::new(json!({"surveys": {}})).with_context(context),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);
}

#[tokio::test]
async fn test_unknown_includes_are_rejected() {
    let app = TestApp::new().await;

    let err = app
        .service
        .read(
            &app.admin(),
            &NestedRequest::new(json!({"survey": {"id": 1, "include": {"owls": {}}}})),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
}
