use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "forms.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS forms(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            published INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_forms_user ON forms(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS questions(
            id TEXT PRIMARY KEY,
            form_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            type TEXT NOT NULL,
            text TEXT NOT NULL DEFAULT '',
            placeholder TEXT NOT NULL DEFAULT '',
            ord INTEGER NOT NULL,
            is_exam_question INTEGER NOT NULL DEFAULT 0,
            correct_option_id TEXT,
            FOREIGN KEY(form_id) REFERENCES forms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_questions_form_ord ON questions(form_id, ord)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS options(
            id TEXT PRIMARY KEY,
            question_id TEXT NOT NULL,
            option_text TEXT NOT NULL DEFAULT '',
            ord INTEGER NOT NULL,
            is_correct INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(question_id) REFERENCES questions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_options_question ON options(question_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS responses(
            id TEXT PRIMARY KEY,
            form_id TEXT NOT NULL,
            submitted_by TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            score INTEGER,
            total_questions INTEGER,
            FOREIGN KEY(form_id) REFERENCES forms(id),
            CHECK((score IS NULL) = (total_questions IS NULL)),
            CHECK(score IS NULL OR score <= total_questions)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_responses_form ON responses(form_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS answers(
            id TEXT PRIMARY KEY,
            form_id TEXT NOT NULL,
            question_id TEXT NOT NULL,
            response_id TEXT NOT NULL,
            answer_text TEXT NOT NULL DEFAULT '',
            is_correct INTEGER,
            created_at TEXT NOT NULL,
            FOREIGN KEY(form_id) REFERENCES forms(id),
            FOREIGN KEY(question_id) REFERENCES questions(id),
            FOREIGN KEY(response_id) REFERENCES responses(id),
            UNIQUE(response_id, question_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_answers_form ON answers(form_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_answers_question ON answers(question_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS answer_options(
            answer_id TEXT NOT NULL,
            option_id TEXT NOT NULL,
            PRIMARY KEY(answer_id, option_id),
            FOREIGN KEY(answer_id) REFERENCES answers(id),
            FOREIGN KEY(option_id) REFERENCES options(id)
        )",
        [],
    )?;

    // Workspaces written before correct_option_id existed only carry the
    // per-option flag. Promote it to the question-level reference.
    ensure_questions_correct_option_id(&conn)?;

    Ok(conn)
}

fn ensure_questions_correct_option_id(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "questions", "correct_option_id")? {
        return Ok(());
    }

    conn.execute("ALTER TABLE questions ADD COLUMN correct_option_id TEXT", [])?;
    conn.execute(
        "UPDATE questions
         SET correct_option_id = (
           SELECT o.id FROM options o
           WHERE o.question_id = questions.id AND o.is_correct = 1
           ORDER BY o.ord
           LIMIT 1
         )",
        [],
    )?;
    // At most one flagged option per question from here on.
    conn.execute(
        "UPDATE options
         SET is_correct = CASE
           WHEN id = (SELECT q.correct_option_id FROM questions q WHERE q.id = options.question_id)
           THEN 1 ELSE 0 END",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
