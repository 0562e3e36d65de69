use crate::error::{DbResultExt, FormsError};
use crate::ipc::error::respond;
use crate::ipc::handlers::forms::{load_form, load_owned_form, load_questions, question_json};
use crate::ipc::helpers::{acting_user, new_id, now_rfc3339, required_str};
use crate::ipc::types::{AppState, Request};
use crate::scoring::{
    grade_submission, tabulate_responses, validate_answers, AnswerInput, Grade, RecordedAnswer,
    Tabulation,
};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Submission {
    pub response_id: String,
    pub submitted_at: String,
    pub grade: Grade,
}

/// Grades a candidate's answers and stores the response with all of its
/// answers in one transaction. Nothing is written when any answer is rejected.
pub fn submit_response(
    conn: &Connection,
    user_id: &str,
    form_id: &str,
    answers: &[AnswerInput],
) -> Result<Submission, FormsError> {
    let form = load_form(conn, form_id)?;
    if !form.published && form.user_id != user_id {
        return Err(FormsError::not_authorized("form is not published"));
    }

    let questions = load_questions(conn, form_id)?;
    validate_answers(&questions, answers)?;
    let grade = grade_submission(&questions, answers);

    let response_id = new_id();
    let submitted_at = now_rfc3339();

    let tx = conn.unchecked_transaction().db("db_tx_failed")?;
    tx.execute(
        "INSERT INTO responses(id, form_id, submitted_by, submitted_at, score, total_questions)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &response_id,
            form_id,
            user_id,
            &submitted_at,
            grade.score,
            grade.total_questions,
        ),
    )
    .db_table("db_insert_failed", "responses")?;

    for answer in answers {
        let answer_id = new_id();
        let is_correct = grade
            .per_answer
            .get(answer.question_id())
            .copied()
            .flatten();
        tx.execute(
            "INSERT INTO answers(id, form_id, question_id, response_id, answer_text, is_correct, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &answer_id,
                form_id,
                answer.question_id(),
                &response_id,
                answer.answer_text(),
                is_correct,
                &submitted_at,
            ),
        )
        .db_table("db_insert_failed", "answers")?;

        for option_id in answer.selected_option_ids() {
            tx.execute(
                "INSERT INTO answer_options(answer_id, option_id) VALUES(?, ?)",
                (&answer_id, option_id),
            )
            .db_table("db_insert_failed", "answer_options")?;
        }
    }

    tx.commit().db("db_commit_failed")?;

    tracing::info!(
        form_id,
        response_id = %response_id,
        answers = answers.len(),
        score = ?grade.score,
        total_questions = ?grade.total_questions,
        "response submitted"
    );
    Ok(Submission {
        response_id,
        submitted_at,
        grade,
    })
}

/// Selected options per answer id, in option order: (option id, option text).
fn load_selected_options(
    conn: &Connection,
    form_id: &str,
) -> Result<HashMap<String, Vec<(String, String)>>, FormsError> {
    let mut stmt = conn
        .prepare(
            "SELECT ao.answer_id, o.id, o.option_text
             FROM answer_options ao
             JOIN answers a ON a.id = ao.answer_id
             JOIN options o ON o.id = ao.option_id
             WHERE a.form_id = ?
             ORDER BY o.ord",
        )
        .db("db_query_failed")?;
    let rows = stmt
        .query_map([form_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .db("db_query_failed")?;

    let mut out: HashMap<String, Vec<(String, String)>> = HashMap::new();
    for (answer_id, option_id, text) in rows {
        out.entry(answer_id).or_default().push((option_id, text));
    }
    Ok(out)
}

#[derive(Debug, Clone)]
struct AnswerRow {
    id: String,
    response_id: String,
    question_id: String,
    answer_text: String,
    is_correct: Option<bool>,
    created_at: String,
}

fn load_answer_rows(
    conn: &Connection,
    form_id: &str,
    order_by: &str,
) -> Result<Vec<AnswerRow>, FormsError> {
    let sql = format!(
        "SELECT a.id, a.response_id, a.question_id, a.answer_text, a.is_correct, a.created_at
         FROM answers a
         JOIN responses r ON r.id = a.response_id
         JOIN questions q ON q.id = a.question_id
         WHERE a.form_id = ?
         ORDER BY {}",
        order_by
    );
    let mut stmt = conn.prepare(&sql).db("db_query_failed")?;
    let rows = stmt
        .query_map([form_id], |r| {
            Ok(AnswerRow {
                id: r.get(0)?,
                response_id: r.get(1)?,
                question_id: r.get(2)?,
                answer_text: r.get(3)?,
                is_correct: r.get::<_, Option<i64>>(4)?.map(|v| v != 0),
                created_at: r.get(5)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .db("db_query_failed")?;
    Ok(rows)
}

fn answer_json(row: &AnswerRow, selected: &HashMap<String, Vec<(String, String)>>) -> Value {
    let picked = selected.get(&row.id).map(Vec::as_slice).unwrap_or_default();
    json!({
        "id": row.id,
        "responseId": row.response_id,
        "questionId": row.question_id,
        "answerText": row.answer_text,
        "selectedOptionIds": picked.iter().map(|(id, _)| id).collect::<Vec<_>>(),
        "isCorrect": row.is_correct,
        "createdAt": row.created_at,
    })
}

/// Builds the export matrix for a form the caller owns.
pub fn export_table(conn: &Connection, user_id: &str, form_id: &str) -> Result<Tabulation, FormsError> {
    load_owned_form(conn, form_id, user_id)?;
    let questions = load_questions(conn, form_id)?;
    let mut selected = load_selected_options(conn, form_id)?;
    let rows = load_answer_rows(conn, form_id, "r.submitted_at, r.rowid, q.ord")?;

    let answers: Vec<RecordedAnswer> = rows
        .into_iter()
        .map(|row| {
            let selected_option_texts = selected
                .remove(&row.id)
                .unwrap_or_default()
                .into_iter()
                .map(|(_, text)| text)
                .collect();
            RecordedAnswer {
                response_id: row.response_id,
                question_id: row.question_id,
                answer_text: row.answer_text,
                selected_option_texts,
            }
        })
        .collect();

    Ok(tabulate_responses(&questions, &answers))
}

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn to_csv(table: Tabulation) -> String {
    let mut csv = String::new();
    for line in table.into_matrix() {
        let cells: Vec<String> = line.iter().map(|c| csv_quote(c)).collect();
        csv.push_str(&cells.join(","));
        csv.push('\n');
    }
    csv
}

fn responses_submit(conn: &Connection, params: &Value) -> Result<Value, FormsError> {
    let user_id = acting_user(params)?;
    let form_id = required_str(params, "formId")?;
    let raw_answers = params.get("answers").cloned().unwrap_or_else(|| json!([]));
    let answers: Vec<AnswerInput> = serde_json::from_value(raw_answers)
        .map_err(|e| FormsError::validation(format!("invalid answers: {}", e)))?;

    let submission = submit_response(conn, &user_id, &form_id, &answers)?;
    let per_answer: Vec<Value> = submission
        .grade
        .per_answer
        .iter()
        .map(|(question_id, is_correct)| json!({ "questionId": question_id, "isCorrect": is_correct }))
        .collect();
    Ok(json!({
        "responseId": submission.response_id,
        "submittedAt": submission.submitted_at,
        "score": submission.grade.score,
        "totalQuestions": submission.grade.total_questions,
        "answers": per_answer,
    }))
}

fn responses_list(conn: &Connection, params: &Value) -> Result<Value, FormsError> {
    let user_id = acting_user(params)?;
    let form_id = required_str(params, "formId")?;
    load_owned_form(conn, &form_id, &user_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, submitted_by, submitted_at, score, total_questions
             FROM responses
             WHERE form_id = ?
             ORDER BY submitted_at DESC, rowid DESC",
        )
        .db("db_query_failed")?;
    let responses = stmt
        .query_map([&form_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<i64>>(3)?,
                r.get::<_, Option<i64>>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .db("db_query_failed")?;

    let selected = load_selected_options(conn, &form_id)?;
    let mut answers_by_response: HashMap<String, Vec<Value>> = HashMap::new();
    for row in load_answer_rows(conn, &form_id, "q.ord")? {
        let v = answer_json(&row, &selected);
        answers_by_response
            .entry(row.response_id)
            .or_default()
            .push(v);
    }

    let out: Vec<Value> = responses
        .into_iter()
        .map(|(id, submitted_by, submitted_at, score, total_questions)| {
            let answers = answers_by_response.remove(&id).unwrap_or_default();
            json!({
                "id": id,
                "submittedBy": submitted_by,
                "submittedAt": submitted_at,
                "score": score,
                "totalQuestions": total_questions,
                "answers": answers,
            })
        })
        .collect();
    Ok(json!({ "responses": out }))
}

fn responses_summary(conn: &Connection, params: &Value) -> Result<Value, FormsError> {
    let user_id = acting_user(params)?;
    let form_id = required_str(params, "formId")?;
    load_owned_form(conn, &form_id, &user_id)?;

    let questions = load_questions(conn, &form_id)?;
    let selected = load_selected_options(conn, &form_id)?;
    let mut answers_by_question: HashMap<String, Vec<Value>> = HashMap::new();
    for row in load_answer_rows(conn, &form_id, "a.created_at DESC, a.rowid DESC")? {
        let v = answer_json(&row, &selected);
        answers_by_question
            .entry(row.question_id)
            .or_default()
            .push(v);
    }

    let out: Vec<Value> = questions
        .iter()
        .map(|q| {
            let mut v = question_json(q, true);
            v["answers"] = json!(answers_by_question.remove(&q.id).unwrap_or_default());
            v
        })
        .collect();
    Ok(json!({ "questions": out }))
}

fn responses_export(conn: &Connection, params: &Value) -> Result<Value, FormsError> {
    let user_id = acting_user(params)?;
    let form_id = required_str(params, "formId")?;
    let table = export_table(conn, &user_id, &form_id)?;
    Ok(json!({ "header": table.header, "rows": table.rows }))
}

fn responses_export_csv(conn: &Connection, params: &Value) -> Result<Value, FormsError> {
    let user_id = acting_user(params)?;
    let form_id = required_str(params, "formId")?;
    let out_path = match params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return Err(FormsError::validation("missing outPath")),
    };

    let table = export_table(conn, &user_id, &form_id)?;
    let rows_exported = table.rows.len();
    let csv = to_csv(table);

    let out = PathBuf::from(&out_path);
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).map_err(|source| FormsError::Io {
            path: out_path.clone(),
            source,
        })?;
    }
    std::fs::write(&out, csv).map_err(|source| FormsError::Io {
        path: out_path.clone(),
        source,
    })?;

    tracing::info!(form_id = %form_id, rows_exported, path = %out_path, "responses exported");
    Ok(json!({ "rowsExported": rows_exported, "path": out_path }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let run: fn(&Connection, &Value) -> Result<Value, FormsError> = match req.method.as_str() {
        "responses.submit" => responses_submit,
        "responses.list" => responses_list,
        "responses.summary" => responses_summary,
        "responses.export" => responses_export,
        "responses.exportCsv" => responses_export_csv,
        _ => return None,
    };
    let result = state.conn().and_then(|conn| run(conn, &req.params));
    Some(respond(&req.id, &req.method, result))
}
