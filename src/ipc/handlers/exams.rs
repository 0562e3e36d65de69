use crate::error::{DbResultExt, FormsError};
use crate::ipc::error::respond;
use crate::ipc::handlers::forms::{load_form, load_questions, question_json, FormRow};
use crate::ipc::helpers::{acting_user, new_id, now_rfc3339, parse_params};
use crate::ipc::types::{AppState, Request};
use crate::scoring::QuestionType;
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Value};

pub const EXAM_OPTION_COUNT: usize = 4;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamDraft {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub questions: Option<Vec<ExamQuestionDraft>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamQuestionDraft {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub options: Option<Vec<String>>,
    /// Kept loose so a fractional or string index is reported as an index
    /// problem rather than a decode failure.
    #[serde(default)]
    pub correct_option: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExamQuestion {
    pub text: String,
    pub options: Vec<String>,
    pub correct_option: usize,
}

fn is_blank(s: Option<&String>) -> bool {
    s.map(|v| v.trim().is_empty()).unwrap_or(true)
}

/// Checks each question fully (text, options, correct index) before moving
/// on to the next one, and stops at the first broken rule.
pub fn validate_exam(draft: &ExamDraft) -> Result<(String, Vec<ExamQuestion>), FormsError> {
    if is_blank(draft.title.as_ref()) {
        return Err(FormsError::validation("invalid or missing exam title"));
    }
    let questions = match draft.questions.as_deref() {
        Some(q) if !q.is_empty() => q,
        _ => return Err(FormsError::validation("at least one question is required")),
    };

    let mut out = Vec::with_capacity(questions.len());
    for (i, q) in questions.iter().enumerate() {
        if is_blank(q.text.as_ref()) {
            return Err(FormsError::validation_with(
                "invalid question text",
                json!({ "questionIndex": i }),
            ));
        }

        let options = q.options.as_deref().unwrap_or_default();
        if options.len() != EXAM_OPTION_COUNT {
            return Err(FormsError::validation_with(
                "each question must have exactly 4 options",
                json!({ "questionIndex": i, "optionCount": options.len() }),
            ));
        }
        if let Some(j) = options.iter().position(|o| o.trim().is_empty()) {
            return Err(FormsError::validation_with(
                "option text must not be empty",
                json!({ "questionIndex": i, "optionIndex": j }),
            ));
        }

        let correct = q
            .correct_option
            .as_ref()
            .and_then(|v| v.as_i64())
            .filter(|n| (0..EXAM_OPTION_COUNT as i64).contains(n));
        let Some(correct) = correct else {
            return Err(FormsError::validation_with(
                "invalid correct option index",
                json!({ "questionIndex": i, "correctOption": q.correct_option }),
            ));
        };

        out.push(ExamQuestion {
            text: q.text.clone().unwrap_or_default(),
            options: options.to_vec(),
            correct_option: correct as usize,
        });
    }

    Ok((draft.title.clone().unwrap_or_default(), out))
}

/// Writes the exam form, its questions and their options, then points every
/// question at its correct option once the option ids exist. One transaction.
pub fn create_exam(
    conn: &Connection,
    user_id: &str,
    draft: &ExamDraft,
) -> Result<FormRow, FormsError> {
    let (title, questions) = validate_exam(draft)?;

    let form = FormRow {
        id: new_id(),
        user_id: user_id.to_string(),
        title,
        published: true,
        created_at: now_rfc3339(),
    };

    let tx = conn.unchecked_transaction().db("db_tx_failed")?;
    tx.execute(
        "INSERT INTO forms(id, user_id, title, published, created_at) VALUES(?, ?, ?, 1, ?)",
        (&form.id, &form.user_id, &form.title, &form.created_at),
    )
    .db_table("db_insert_failed", "forms")?;

    let mut created: Vec<(String, Vec<String>)> = Vec::with_capacity(questions.len());
    for (i, q) in questions.iter().enumerate() {
        let question_id = new_id();
        tx.execute(
            "INSERT INTO questions(id, form_id, user_id, type, text, placeholder, ord, is_exam_question)
             VALUES(?, ?, ?, ?, ?, '', ?, 1)",
            (
                &question_id,
                &form.id,
                &form.user_id,
                QuestionType::SelectOneOption.as_str(),
                &q.text,
                (i + 1) as i64,
            ),
        )
        .db_table("db_insert_failed", "questions")?;

        let mut option_ids = Vec::with_capacity(q.options.len());
        for (j, text) in q.options.iter().enumerate() {
            let option_id = new_id();
            tx.execute(
                "INSERT INTO options(id, question_id, option_text, ord, is_correct) VALUES(?, ?, ?, ?, 0)",
                (&option_id, &question_id, text, j as i64),
            )
            .db_table("db_insert_failed", "options")?;
            option_ids.push(option_id);
        }
        created.push((question_id, option_ids));
    }

    for ((question_id, option_ids), q) in created.iter().zip(&questions) {
        let correct_id = &option_ids[q.correct_option];
        tx.execute(
            "UPDATE questions SET correct_option_id = ? WHERE id = ?",
            (correct_id, question_id),
        )
        .db_table("db_update_failed", "questions")?;
        tx.execute("UPDATE options SET is_correct = 1 WHERE id = ?", [correct_id])
            .db_table("db_update_failed", "options")?;
    }

    tx.commit().db("db_commit_failed")?;

    tracing::info!(
        form_id = %form.id,
        user_id,
        questions = questions.len(),
        "exam created"
    );
    Ok(form)
}

fn exams_create(conn: &Connection, params: &Value) -> Result<Value, FormsError> {
    let user_id = acting_user(params)?;
    let draft: ExamDraft = parse_params(params)?;
    let form = create_exam(conn, &user_id, &draft)?;

    let form = load_form(conn, &form.id)?;
    let questions: Vec<Value> = load_questions(conn, &form.id)?
        .iter()
        .map(|q| question_json(q, true))
        .collect();
    let mut form_json = form.to_json();
    form_json["questions"] = json!(questions);
    Ok(json!({ "form": form_json }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let run: fn(&Connection, &Value) -> Result<Value, FormsError> = match req.method.as_str() {
        "exams.create" => exams_create,
        _ => return None,
    };
    let result = state.conn().and_then(|conn| run(conn, &req.params));
    Some(respond(&req.id, &req.method, result))
}
