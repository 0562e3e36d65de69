mod test_support;

use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{request_err, request_ok, spawn_sidecar, str_field, temp_dir};

fn create_form_with_questions(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    user: &str,
    texts: &[&str],
) -> (String, Vec<String>) {
    let form = request_ok(
        stdin,
        reader,
        "form",
        "forms.create",
        json!({ "actingUserId": user, "title": "Ordered" }),
    );
    let form_id = str_field(&form, "formId");
    let mut ids = Vec::new();
    for (i, text) in texts.iter().enumerate() {
        let q = request_ok(
            stdin,
            reader,
            &format!("q{}", i),
            "questions.create",
            json!({
                "actingUserId": user,
                "formId": form_id,
                "type": "SHORT_RESPONSE",
                "text": text
            }),
        );
        assert_eq!(q["order"].as_i64(), Some(i as i64 + 1));
        ids.push(str_field(&q, "questionId"));
    }
    (form_id, ids)
}

fn listed(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    user: &str,
    form_id: &str,
) -> Vec<(i64, String)> {
    let res = request_ok(
        stdin,
        reader,
        "list",
        "questions.list",
        json!({ "actingUserId": user, "formId": form_id }),
    );
    res["questions"]
        .as_array()
        .expect("questions")
        .iter()
        .map(|q| {
            (
                q["order"].as_i64().expect("order"),
                q["text"].as_str().unwrap_or("").to_string(),
            )
        })
        .collect()
}

#[test]
fn deleting_middle_question_closes_the_gap() {
    let workspace = temp_dir("formsd-reindex-middle");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (form_id, ids) =
        create_form_with_questions(&mut stdin, &mut reader, "author", &["A", "B", "C", "D"]);

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "questions.delete",
        json!({ "actingUserId": "author", "formId": form_id, "questionId": ids[1] }),
    );
    assert_eq!(deleted["deleted"].as_bool(), Some(true));
    assert_eq!(deleted["reindexed"].as_i64(), Some(2));

    assert_eq!(
        listed(&mut stdin, &mut reader, "author", &form_id),
        vec![(1, "A".to_string()), (2, "C".to_string()), (3, "D".to_string())]
    );

    // Deleting the last question moves nothing; deleting the first moves the rest.
    let last = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "questions.delete",
        json!({ "actingUserId": "author", "formId": form_id, "questionId": ids[3] }),
    );
    assert_eq!(last["reindexed"].as_i64(), Some(0));
    let first = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "questions.delete",
        json!({ "actingUserId": "author", "formId": form_id, "questionId": ids[0] }),
    );
    assert_eq!(first["reindexed"].as_i64(), Some(1));
    assert_eq!(
        listed(&mut stdin, &mut reader, "author", &form_id),
        vec![(1, "C".to_string())]
    );

    // New questions continue the contiguous sequence.
    let q = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "questions.create",
        json!({ "actingUserId": "author", "formId": form_id, "type": "SHORT_RESPONSE", "text": "E" }),
    );
    assert_eq!(q["order"].as_i64(), Some(2));
}

#[test]
fn question_options_go_with_the_question() {
    let workspace = temp_dir("formsd-reindex-options");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let form = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "forms.create",
        json!({ "actingUserId": "author", "title": "Choices" }),
    );
    let form_id = str_field(&form, "formId");
    let q = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "questions.create",
        json!({ "actingUserId": "author", "formId": form_id, "type": "SELECT_MULTIPLE_OPTIONS" }),
    );
    let question_id = str_field(&q, "questionId");
    for i in 0..3 {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("o{}", i),
            "options.create",
            json!({
                "actingUserId": "author",
                "formId": form_id,
                "questionId": question_id,
                "text": format!("opt {}", i)
            }),
        );
    }
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "questions.delete",
        json!({ "actingUserId": "author", "formId": form_id, "questionId": question_id }),
    );
    assert!(listed(&mut stdin, &mut reader, "author", &form_id).is_empty());

    let code = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "questions.delete",
        json!({ "actingUserId": "author", "formId": form_id, "questionId": question_id }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn rejected_deletes_leave_orders_untouched() {
    let workspace = temp_dir("formsd-reindex-rejects");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (form_a, ids_a) =
        create_form_with_questions(&mut stdin, &mut reader, "author", &["A1", "A2"]);
    let (form_b, _) = create_form_with_questions(&mut stdin, &mut reader, "author", &["B1"]);

    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "questions.delete",
        json!({ "actingUserId": "author", "formId": form_b, "questionId": ids_a[0] }),
    );
    assert_eq!(code, "cross_reference_mismatch");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "questions.delete",
        json!({ "actingUserId": "intruder", "formId": form_a, "questionId": ids_a[0] }),
    );
    assert_eq!(code, "not_authorized");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "questions.delete",
        json!({ "actingUserId": "author", "formId": form_a }),
    );
    assert_eq!(code, "bad_params");

    // Answered questions are pinned by their responses.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "forms.togglePublish",
        json!({ "actingUserId": "author", "formId": form_a }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "responses.submit",
        json!({
            "actingUserId": "candidate",
            "formId": form_a,
            "answers": [
                { "type": "SHORT_RESPONSE", "questionId": ids_a[0], "text": "hello" }
            ]
        }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "questions.delete",
        json!({ "actingUserId": "author", "formId": form_a, "questionId": ids_a[0] }),
    );
    assert_eq!(code, "bad_params");

    assert_eq!(
        listed(&mut stdin, &mut reader, "author", &form_a),
        vec![(1, "A1".to_string()), (2, "A2".to_string())]
    );
    assert_eq!(
        listed(&mut stdin, &mut reader, "author", &form_b),
        vec![(1, "B1".to_string())]
    );
}
