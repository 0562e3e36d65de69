use crate::error::{DbResultExt, FormsError};
use crate::ipc::error::respond;
use crate::ipc::handlers::forms::{load_owned_form, load_questions, question_json};
use crate::ipc::helpers::{acting_user, new_id, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::scoring::QuestionType;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct QuestionRef {
    pub form_id: String,
    pub user_id: String,
    pub order: i64,
    pub question_type: String,
    pub is_exam_question: bool,
}

pub fn find_question(conn: &Connection, question_id: &str) -> Result<Option<QuestionRef>, FormsError> {
    conn.query_row(
        "SELECT form_id, user_id, ord, type, is_exam_question FROM questions WHERE id = ?",
        [question_id],
        |r| {
            Ok(QuestionRef {
                form_id: r.get(0)?,
                user_id: r.get(1)?,
                order: r.get(2)?,
                question_type: r.get(3)?,
                is_exam_question: r.get::<_, i64>(4)? != 0,
            })
        },
    )
    .optional()
    .db("db_query_failed")
}

/// The question must exist and sit in `form_id`.
pub fn load_question_in_form(
    conn: &Connection,
    form_id: &str,
    question_id: &str,
) -> Result<QuestionRef, FormsError> {
    let Some(question) = find_question(conn, question_id)? else {
        return Err(FormsError::not_found("question does not exist"));
    };
    if question.form_id != form_id {
        return Err(FormsError::cross_reference(
            "given questionId is not from the given formId",
        ));
    }
    Ok(question)
}

/// Deletes a question and its options, closing the gap it leaves in the
/// form's order sequence. Returns how many siblings moved up.
pub fn reindex_and_delete(
    conn: &Connection,
    user_id: &str,
    form_id: &str,
    question_id: &str,
) -> Result<usize, FormsError> {
    load_owned_form(conn, form_id, user_id)?;
    let question = load_question_in_form(conn, form_id, question_id)?;

    let tx = conn.unchecked_transaction().db("db_tx_failed")?;

    let answer_count: i64 = tx
        .query_row(
            "SELECT COUNT(*) FROM answers WHERE question_id = ?",
            [question_id],
            |r| r.get(0),
        )
        .db("db_query_failed")?;
    if answer_count > 0 {
        // Submitted responses are immutable; their answers pin the question.
        return Err(FormsError::validation_with(
            "question has recorded answers and cannot be deleted",
            json!({ "questionId": question_id, "answerCount": answer_count }),
        ));
    }

    tx.execute("DELETE FROM options WHERE question_id = ?", [question_id])
        .db_table("db_delete_failed", "options")?;

    let changed = tx
        .execute(
            "DELETE FROM questions WHERE id = ? AND form_id = ?",
            (question_id, form_id),
        )
        .db_table("db_delete_failed", "questions")?;
    if changed == 0 {
        return Err(FormsError::not_found("question does not exist"));
    }

    let reindexed = tx
        .execute(
            "UPDATE questions SET ord = ord - 1 WHERE form_id = ? AND ord >= ? AND id <> ?",
            (form_id, question.order, question_id),
        )
        .db_table("db_update_failed", "questions")?;

    tx.commit().db("db_commit_failed")?;

    tracing::info!(
        form_id,
        question_id,
        order = question.order,
        reindexed,
        "question deleted"
    );
    Ok(reindexed)
}

/// Points a question at its correct option and keeps the per-option flag in
/// step. Repeating the call with the same option changes nothing.
pub fn set_correct_option(
    conn: &Connection,
    user_id: &str,
    question_id: &str,
    option_id: &str,
) -> Result<(), FormsError> {
    let Some(question) = find_question(conn, question_id)? else {
        return Err(FormsError::not_found("question not found"));
    };
    if question.user_id != user_id {
        return Err(FormsError::not_authorized(
            "question is not owned by the acting user",
        ));
    }
    if !question.is_exam_question {
        return Err(FormsError::not_found("exam question not found"));
    }

    let belongs: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM options WHERE id = ? AND question_id = ?",
            (option_id, question_id),
            |r| r.get(0),
        )
        .optional()
        .db("db_query_failed")?;
    if belongs.is_none() {
        return Err(FormsError::cross_reference(
            "option not found for this question",
        ));
    }

    let tx = conn.unchecked_transaction().db("db_tx_failed")?;
    tx.execute(
        "UPDATE questions SET correct_option_id = ? WHERE id = ?",
        (option_id, question_id),
    )
    .db_table("db_update_failed", "questions")?;
    tx.execute(
        "UPDATE options SET is_correct = CASE WHEN id = ? THEN 1 ELSE 0 END WHERE question_id = ?",
        (option_id, question_id),
    )
    .db_table("db_update_failed", "options")?;
    tx.commit().db("db_commit_failed")?;

    tracing::info!(question_id, option_id, "correct option set");
    Ok(())
}

fn questions_list(conn: &Connection, params: &Value) -> Result<Value, FormsError> {
    let user_id = acting_user(params)?;
    let form_id = required_str(params, "formId")?;
    load_owned_form(conn, &form_id, &user_id)?;

    let questions: Vec<Value> = load_questions(conn, &form_id)?
        .iter()
        .map(|q| question_json(q, true))
        .collect();
    Ok(json!({ "questions": questions }))
}

fn questions_create(conn: &Connection, params: &Value) -> Result<Value, FormsError> {
    let user_id = acting_user(params)?;
    let form_id = required_str(params, "formId")?;
    let type_raw = required_str(params, "type")?;
    let Some(question_type) = QuestionType::parse(&type_raw) else {
        return Err(FormsError::validation_with(
            "type must be one of: SHORT_RESPONSE, SELECT_ONE_OPTION, SELECT_MULTIPLE_OPTIONS",
            json!({ "type": type_raw }),
        ));
    };
    let text = optional_str(params, "text")?.unwrap_or_default();
    let placeholder = optional_str(params, "placeholder")?.unwrap_or_default();
    let is_exam_question = match params.get("isExamQuestion") {
        None | Some(Value::Null) => false,
        Some(v) => v
            .as_bool()
            .ok_or_else(|| FormsError::validation("isExamQuestion must be a boolean"))?,
    };
    if is_exam_question && question_type == QuestionType::ShortResponse {
        return Err(FormsError::validation(
            "exam questions must select from options",
        ));
    }

    load_owned_form(conn, &form_id, &user_id)?;

    let next_order: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(ord), 0) + 1 FROM questions WHERE form_id = ?",
            [&form_id],
            |r| r.get(0),
        )
        .db("db_query_failed")?;

    let question_id = new_id();
    conn.execute(
        "INSERT INTO questions(id, form_id, user_id, type, text, placeholder, ord, is_exam_question)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &question_id,
            &form_id,
            &user_id,
            question_type.as_str(),
            &text,
            &placeholder,
            next_order,
            is_exam_question as i64,
        ),
    )
    .db_table("db_insert_failed", "questions")?;

    tracing::debug!(form_id = %form_id, question_id = %question_id, order = next_order, "question created");
    Ok(json!({
        "questionId": question_id,
        "order": next_order,
        "type": question_type.as_str(),
        "isExamQuestion": is_exam_question,
    }))
}

fn questions_update(conn: &Connection, params: &Value) -> Result<Value, FormsError> {
    let user_id = acting_user(params)?;
    let form_id = required_str(params, "formId")?;
    let question_id = required_str(params, "questionId")?;
    let text = optional_str(params, "text")?;
    let placeholder = optional_str(params, "placeholder")?;
    if text.is_none() && placeholder.is_none() {
        return Err(FormsError::validation("provide text and/or placeholder"));
    }

    load_owned_form(conn, &form_id, &user_id)?;
    load_question_in_form(conn, &form_id, &question_id)?;

    conn.execute(
        "UPDATE questions
         SET text = COALESCE(?, text), placeholder = COALESCE(?, placeholder)
         WHERE id = ? AND form_id = ?",
        (&text, &placeholder, &question_id, &form_id),
    )
    .db_table("db_update_failed", "questions")?;

    Ok(json!({ "questionId": question_id }))
}

fn questions_delete(conn: &Connection, params: &Value) -> Result<Value, FormsError> {
    let user_id = acting_user(params)?;
    let form_id = required_str(params, "formId")?;
    let question_id = required_str(params, "questionId")?;
    let reindexed = reindex_and_delete(conn, &user_id, &form_id, &question_id)?;
    Ok(json!({ "deleted": true, "reindexed": reindexed }))
}

fn questions_set_correct_option(conn: &Connection, params: &Value) -> Result<Value, FormsError> {
    let user_id = acting_user(params)?;
    let question_id = required_str(params, "questionId")?;
    let option_id = required_str(params, "optionId")?;
    set_correct_option(conn, &user_id, &question_id, &option_id)?;
    Ok(json!({ "questionId": question_id, "correctOptionId": option_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let run: fn(&Connection, &Value) -> Result<Value, FormsError> = match req.method.as_str() {
        "questions.list" => questions_list,
        "questions.create" => questions_create,
        "questions.update" => questions_update,
        "questions.delete" => questions_delete,
        "questions.setCorrectOption" => questions_set_correct_option,
        _ => return None,
    };
    let result = state.conn().and_then(|conn| run(conn, &req.params));
    Some(respond(&req.id, &req.method, result))
}
