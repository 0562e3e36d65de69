use crate::error::{DbResultExt, FormsError};
use crate::ipc::error::respond;
use crate::ipc::helpers::{
    acting_user, new_id, now_rfc3339, optional_acting_user, optional_str, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::scoring::{option_label, OptionDef, QuestionDef, QuestionType};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct FormRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub published: bool,
    pub created_at: String,
}

impl FormRow {
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "userId": self.user_id,
            "title": self.title,
            "published": self.published,
            "createdAt": self.created_at,
        })
    }
}

fn map_form_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<FormRow> {
    Ok(FormRow {
        id: r.get(0)?,
        user_id: r.get(1)?,
        title: r.get(2)?,
        published: r.get::<_, i64>(3)? != 0,
        created_at: r.get(4)?,
    })
}

pub fn load_form(conn: &Connection, form_id: &str) -> Result<FormRow, FormsError> {
    conn.query_row(
        "SELECT id, user_id, title, published, created_at FROM forms WHERE id = ?",
        [form_id],
        map_form_row,
    )
    .optional()
    .db("db_query_failed")?
    .ok_or_else(|| FormsError::not_found("form not found"))
}

pub fn load_owned_form(
    conn: &Connection,
    form_id: &str,
    user_id: &str,
) -> Result<FormRow, FormsError> {
    let form = load_form(conn, form_id)?;
    if form.user_id != user_id {
        return Err(FormsError::not_authorized(
            "form is not owned by the acting user",
        ));
    }
    Ok(form)
}

/// Questions of a form in display order, each with its options in order.
pub fn load_questions(conn: &Connection, form_id: &str) -> Result<Vec<QuestionDef>, FormsError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, ord, type, text, placeholder, is_exam_question, correct_option_id
             FROM questions
             WHERE form_id = ?
             ORDER BY ord",
        )
        .db("db_query_failed")?;
    let rows = stmt
        .query_map([form_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, i64>(5)? != 0,
                r.get::<_, Option<String>>(6)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .db("db_query_failed")?;

    let mut opt_stmt = conn
        .prepare(
            "SELECT o.id, o.question_id, o.ord, o.option_text
             FROM options o
             JOIN questions q ON q.id = o.question_id
             WHERE q.form_id = ?
             ORDER BY o.ord",
        )
        .db("db_query_failed")?;
    let option_rows = opt_stmt
        .query_map([form_id], |r| {
            Ok((
                r.get::<_, String>(1)?,
                OptionDef {
                    id: r.get(0)?,
                    order: r.get(2)?,
                    text: r.get(3)?,
                },
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .db("db_query_failed")?;
    let mut options_by_question: HashMap<String, Vec<OptionDef>> = HashMap::new();
    for (question_id, option) in option_rows {
        options_by_question
            .entry(question_id)
            .or_default()
            .push(option);
    }

    let mut questions = Vec::with_capacity(rows.len());
    for (id, order, type_raw, text, placeholder, is_exam_question, correct_option_id) in rows {
        let Some(question_type) = QuestionType::parse(&type_raw) else {
            return Err(FormsError::validation_with(
                "stored question has an unknown type",
                json!({ "questionId": id, "type": type_raw }),
            ));
        };
        let options = options_by_question.remove(&id).unwrap_or_default();
        questions.push(QuestionDef {
            id,
            order,
            question_type,
            text,
            placeholder,
            is_exam_question,
            correct_option_id,
            options,
        });
    }
    Ok(questions)
}

/// Question as shown to clients. Correctness is only revealed to the author.
pub fn question_json(q: &QuestionDef, reveal_correct: bool) -> Value {
    let options: Vec<Value> = q
        .options
        .iter()
        .enumerate()
        .map(|(i, o)| {
            let mut v = json!({
                "id": o.id,
                "order": o.order,
                "label": option_label(i),
                "text": o.text,
            });
            if reveal_correct {
                v["isCorrect"] = json!(q.correct_option_id.as_deref() == Some(o.id.as_str()));
            }
            v
        })
        .collect();

    let mut v = json!({
        "id": q.id,
        "order": q.order,
        "type": q.question_type.as_str(),
        "text": q.text,
        "placeholder": q.placeholder,
        "isExamQuestion": q.is_exam_question,
        "options": options,
    });
    if reveal_correct {
        v["correctOptionId"] = json!(q.correct_option_id);
    }
    v
}

fn forms_create(conn: &Connection, params: &Value) -> Result<Value, FormsError> {
    let user_id = acting_user(params)?;
    let title = optional_str(params, "title")?.unwrap_or_default();

    let form = FormRow {
        id: new_id(),
        user_id,
        title,
        published: false,
        created_at: now_rfc3339(),
    };
    conn.execute(
        "INSERT INTO forms(id, user_id, title, published, created_at) VALUES(?, ?, ?, 0, ?)",
        (&form.id, &form.user_id, &form.title, &form.created_at),
    )
    .db_table("db_insert_failed", "forms")?;

    tracing::info!(form_id = %form.id, user_id = %form.user_id, "form created");
    Ok(json!({
        "formId": form.id,
        "title": form.title,
        "published": false,
        "createdAt": form.created_at,
    }))
}

fn forms_list(conn: &Connection, params: &Value) -> Result<Value, FormsError> {
    let user_id = acting_user(params)?;
    let mut stmt = conn
        .prepare(
            "SELECT f.id, f.user_id, f.title, f.published, f.created_at,
               (SELECT COUNT(*) FROM questions q WHERE q.form_id = f.id) AS question_count,
               (SELECT COUNT(*) FROM responses r WHERE r.form_id = f.id) AS response_count
             FROM forms f
             WHERE f.user_id = ?
             ORDER BY f.created_at DESC, f.rowid DESC",
        )
        .db("db_query_failed")?;
    let forms = stmt
        .query_map([&user_id], |r| {
            let form = map_form_row(r)?;
            let question_count: i64 = r.get(5)?;
            let response_count: i64 = r.get(6)?;
            let mut v = form.to_json();
            v["questionCount"] = json!(question_count);
            v["responseCount"] = json!(response_count);
            Ok(v)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .db("db_query_failed")?;
    Ok(json!({ "forms": forms }))
}

fn forms_get(conn: &Connection, params: &Value) -> Result<Value, FormsError> {
    let user_id = acting_user(params)?;
    let form_id = required_str(params, "formId")?;
    let form = load_owned_form(conn, &form_id, &user_id)?;
    Ok(json!({ "form": form.to_json() }))
}

fn forms_update_title(conn: &Connection, params: &Value) -> Result<Value, FormsError> {
    let user_id = acting_user(params)?;
    let form_id = required_str(params, "formId")?;
    let Some(title) = optional_str(params, "title")? else {
        return Err(FormsError::validation("missing title"));
    };
    load_owned_form(conn, &form_id, &user_id)?;

    conn.execute(
        "UPDATE forms SET title = ? WHERE id = ? AND user_id = ?",
        (&title, &form_id, &user_id),
    )
    .db_table("db_update_failed", "forms")?;

    let form = load_form(conn, &form_id)?;
    Ok(json!({ "form": form.to_json() }))
}

fn forms_toggle_publish(conn: &Connection, params: &Value) -> Result<Value, FormsError> {
    let user_id = acting_user(params)?;
    let form_id = required_str(params, "formId")?;
    let form = load_owned_form(conn, &form_id, &user_id)?;

    let published = !form.published;
    conn.execute(
        "UPDATE forms SET published = ? WHERE id = ? AND user_id = ?",
        (published as i64, &form_id, &user_id),
    )
    .db_table("db_update_failed", "forms")?;

    tracing::info!(form_id = %form_id, published, "form publish toggled");
    Ok(json!({ "formId": form_id, "published": published }))
}

fn forms_open(conn: &Connection, params: &Value) -> Result<Value, FormsError> {
    let form_id = required_str(params, "formId")?;
    let viewer = optional_acting_user(params);
    let form = load_form(conn, &form_id)?;

    let is_author = viewer.as_deref() == Some(form.user_id.as_str());
    if !is_author && !form.published {
        return Err(FormsError::not_authorized("form is not published"));
    }

    let questions: Vec<Value> = load_questions(conn, &form_id)?
        .iter()
        .map(|q| question_json(q, is_author))
        .collect();
    Ok(json!({
        "form": form.to_json(),
        "isAuthor": is_author,
        "questions": questions,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let run: fn(&Connection, &Value) -> Result<Value, FormsError> = match req.method.as_str() {
        "forms.create" => forms_create,
        "forms.list" => forms_list,
        "forms.get" => forms_get,
        "forms.updateTitle" => forms_update_title,
        "forms.togglePublish" => forms_toggle_publish,
        "forms.open" => forms_open,
        _ => return None,
    };
    let result = state.conn().and_then(|conn| run(conn, &req.params));
    Some(respond(&req.id, &req.method, result))
}
