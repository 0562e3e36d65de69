use crate::error::{DbResultExt, FormsError};
use crate::ipc::error::respond;
use crate::ipc::handlers::forms::load_owned_form;
use crate::ipc::handlers::questions::load_question_in_form;
use crate::ipc::helpers::{acting_user, new_id, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::scoring::{option_label, QuestionType};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

fn options_create(conn: &Connection, params: &Value) -> Result<Value, FormsError> {
    let user_id = acting_user(params)?;
    let form_id = required_str(params, "formId")?;
    let question_id = required_str(params, "questionId")?;
    let text = optional_str(params, "text")?.unwrap_or_default();

    load_owned_form(conn, &form_id, &user_id)?;
    let question = load_question_in_form(conn, &form_id, &question_id)?;
    if QuestionType::parse(&question.question_type) == Some(QuestionType::ShortResponse) {
        return Err(FormsError::validation(
            "short response questions have no options",
        ));
    }

    let next_order: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(ord), -1) + 1 FROM options WHERE question_id = ?",
            [&question_id],
            |r| r.get(0),
        )
        .db("db_query_failed")?;

    let option_id = new_id();
    conn.execute(
        "INSERT INTO options(id, question_id, option_text, ord, is_correct) VALUES(?, ?, ?, ?, 0)",
        (&option_id, &question_id, &text, next_order),
    )
    .db_table("db_insert_failed", "options")?;

    Ok(json!({
        "optionId": option_id,
        "order": next_order,
        "label": option_label(next_order.max(0) as usize),
        "text": text,
    }))
}

fn options_update_text(conn: &Connection, params: &Value) -> Result<Value, FormsError> {
    let user_id = acting_user(params)?;
    let form_id = required_str(params, "formId")?;
    let question_id = required_str(params, "questionId")?;
    let option_id = required_str(params, "optionId")?;
    let Some(text) = optional_str(params, "text")? else {
        return Err(FormsError::validation("missing text"));
    };

    load_owned_form(conn, &form_id, &user_id)?;
    load_question_in_form(conn, &form_id, &question_id)?;

    let belongs: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM options WHERE id = ? AND question_id = ?",
            (&option_id, &question_id),
            |r| r.get(0),
        )
        .optional()
        .db("db_query_failed")?;
    if belongs.is_none() {
        return Err(FormsError::cross_reference(
            "option not found for this question",
        ));
    }

    conn.execute(
        "UPDATE options SET option_text = ? WHERE id = ? AND question_id = ?",
        (&text, &option_id, &question_id),
    )
    .db_table("db_update_failed", "options")?;

    Ok(json!({ "optionId": option_id, "text": text }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let run: fn(&Connection, &Value) -> Result<Value, FormsError> = match req.method.as_str() {
        "options.create" => options_create,
        "options.updateText" => options_update_text,
        _ => return None,
    };
    let result = state.conn().and_then(|conn| run(conn, &req.params));
    Some(respond(&req.id, &req.method, result))
}
