use anyhow::Result;
use log::info;
use serde_json::{json, Map, Value};

use crate::model::RecordId;
use crate::store::RecordStore;

/// Ids of the fixture records, for callers that address them by path
#[derive(Debug, Clone, PartialEq)]
pub struct SeedData {
    pub applicants: Vec<RecordId>,
    pub surveys: Vec<RecordId>,
    pub questions: Vec<RecordId>,
    pub answers: Vec<RecordId>,
}

fn attrs(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Two applicants, each owning a survey. The first survey has two questions
/// answered by its applicant; the second has one unanswered question.
pub async fn load_seed_data<S: RecordStore + ?Sized>(store: &S) -> Result<SeedData> {
    let mut applicants = Vec::new();
    for (name, email) in [
        ("Dale Cooper", "dale@example.com"),
        ("Audrey Horne", "audrey@example.com"),
    ] {
        let record = store
            .insert_record(
                "applicant",
                attrs(json!({"name": name, "nickname": null, "email": email, "active": true})),
            )
            .await?;
        applicants.push(record.id);
    }

    let mut surveys = Vec::new();
    for (name, owner) in [("Double R Diner", applicants[0]), ("Great Northern", applicants[1])] {
        let record = store
            .insert_record(
                "survey",
                attrs(json!({"name": name, "approved": false, "applicant_id": owner})),
            )
            .await?;
        surveys.push(record.id);
    }

    let mut questions = Vec::new();
    for (content, survey) in [
        ("How is the coffee?", surveys[0]),
        ("How is the pie?", surveys[0]),
        ("Who is the owl?", surveys[1]),
    ] {
        let record = store
            .insert_record("question", attrs(json!({"content": content, "survey_id": survey})))
            .await?;
        questions.push(record.id);
    }

    let mut answers = Vec::new();
    for (value, question) in [("Damn fine", questions[0]), ("Cherry", questions[1])] {
        let record = store
            .insert_record(
                "answer",
                attrs(json!({
                    "value": value,
                    "question_id": question,
                    "survey_id": surveys[0],
                    "applicant_id": applicants[0],
                })),
            )
            .await?;
        answers.push(record.id);
    }

    info!(
        "Seeded {} applicants, {} surveys, {} questions, {} answers",
        applicants.len(),
        surveys.len(),
        questions.len(),
        answers.len()
    );

    Ok(SeedData {
        applicants,
        surveys,
        questions,
        answers,
    })
}
