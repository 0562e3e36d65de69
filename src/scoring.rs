use crate::error::FormsError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    ShortResponse,
    SelectOneOption,
    SelectMultipleOptions,
}

impl QuestionType {
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionType::ShortResponse => "SHORT_RESPONSE",
            QuestionType::SelectOneOption => "SELECT_ONE_OPTION",
            QuestionType::SelectMultipleOptions => "SELECT_MULTIPLE_OPTIONS",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SHORT_RESPONSE" => Some(QuestionType::ShortResponse),
            // Older exam rows were stored with the bare "exam" type.
            "SELECT_ONE_OPTION" | "EXAM" => Some(QuestionType::SelectOneOption),
            "SELECT_MULTIPLE_OPTIONS" => Some(QuestionType::SelectMultipleOptions),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptionDef {
    pub id: String,
    pub order: i64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuestionDef {
    pub id: String,
    pub order: i64,
    pub question_type: QuestionType,
    pub text: String,
    pub placeholder: String,
    pub is_exam_question: bool,
    pub correct_option_id: Option<String>,
    pub options: Vec<OptionDef>,
}

/// A candidate's answer to one question. The variant must match the
/// question's type; each variant carries only what that type needs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnswerInput {
    #[serde(rename_all = "camelCase")]
    ShortResponse { question_id: String, text: String },
    #[serde(rename_all = "camelCase")]
    SelectOneOption {
        question_id: String,
        option_id: String,
    },
    #[serde(rename_all = "camelCase")]
    SelectMultipleOptions {
        question_id: String,
        option_ids: Vec<String>,
    },
}

impl AnswerInput {
    pub fn question_id(&self) -> &str {
        match self {
            AnswerInput::ShortResponse { question_id, .. }
            | AnswerInput::SelectOneOption { question_id, .. }
            | AnswerInput::SelectMultipleOptions { question_id, .. } => question_id,
        }
    }

    pub fn question_type(&self) -> QuestionType {
        match self {
            AnswerInput::ShortResponse { .. } => QuestionType::ShortResponse,
            AnswerInput::SelectOneOption { .. } => QuestionType::SelectOneOption,
            AnswerInput::SelectMultipleOptions { .. } => QuestionType::SelectMultipleOptions,
        }
    }

    /// Stored free text; option-based answers store an empty string.
    pub fn answer_text(&self) -> &str {
        match self {
            AnswerInput::ShortResponse { text, .. } => text,
            _ => "",
        }
    }

    pub fn selected_option_ids(&self) -> &[String] {
        match self {
            AnswerInput::ShortResponse { .. } => &[],
            AnswerInput::SelectOneOption { option_id, .. } => std::slice::from_ref(option_id),
            AnswerInput::SelectMultipleOptions { option_ids, .. } => option_ids,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub score: Option<i64>,
    pub total_questions: Option<i64>,
    /// Keyed by question id. `None` for answers to non-exam questions.
    pub per_answer: BTreeMap<String, Option<bool>>,
}

/// Display letter for the option at `position` (0 => "A").
pub fn option_label(position: usize) -> String {
    if position < 26 {
        char::from(b'A' + position as u8).to_string()
    } else {
        (position + 1).to_string()
    }
}

/// Rejects answers that point outside the form, repeat a question, use the
/// wrong variant for the question type, or select foreign options.
pub fn validate_answers(
    questions: &[QuestionDef],
    answers: &[AnswerInput],
) -> Result<(), FormsError> {
    let by_id: HashMap<&str, &QuestionDef> =
        questions.iter().map(|q| (q.id.as_str(), q)).collect();
    let mut seen: HashSet<&str> = HashSet::new();

    for answer in answers {
        let question_id = answer.question_id();
        let Some(question) = by_id.get(question_id) else {
            return Err(FormsError::cross_reference(format!(
                "question {} does not belong to this form",
                question_id
            )));
        };
        if !seen.insert(question_id) {
            return Err(FormsError::validation_with(
                "duplicate answer for question",
                json!({ "questionId": question_id }),
            ));
        }
        if answer.question_type() != question.question_type {
            return Err(FormsError::validation_with(
                "answer type does not match question type",
                json!({
                    "questionId": question_id,
                    "expected": question.question_type.as_str(),
                    "got": answer.question_type().as_str(),
                }),
            ));
        }

        let mut picked: HashSet<&str> = HashSet::new();
        for option_id in answer.selected_option_ids() {
            if !question.options.iter().any(|o| o.id == *option_id) {
                return Err(FormsError::cross_reference(format!(
                    "option {} does not belong to question {}",
                    option_id, question_id
                )));
            }
            if !picked.insert(option_id.as_str()) {
                return Err(FormsError::validation_with(
                    "option selected more than once",
                    json!({ "questionId": question_id, "optionId": option_id }),
                ));
            }
        }
    }

    Ok(())
}

fn selection_is_correct(question: &QuestionDef, selected: &[String]) -> bool {
    // No designated correct option means nothing can match.
    let Some(correct) = question.correct_option_id.as_deref() else {
        return false;
    };
    selected.iter().any(|id| id == correct)
}

pub fn grade_submission(questions: &[QuestionDef], answers: &[AnswerInput]) -> Grade {
    let by_id: HashMap<&str, &QuestionDef> =
        questions.iter().map(|q| (q.id.as_str(), q)).collect();
    let total_exam_questions = questions.iter().filter(|q| q.is_exam_question).count() as i64;

    let mut per_answer: BTreeMap<String, Option<bool>> = BTreeMap::new();
    for answer in answers {
        let verdict = match by_id.get(answer.question_id()) {
            Some(q) if q.is_exam_question => {
                Some(selection_is_correct(q, answer.selected_option_ids()))
            }
            _ => None,
        };
        per_answer.insert(answer.question_id().to_string(), verdict);
    }

    if total_exam_questions == 0 {
        return Grade {
            score: None,
            total_questions: None,
            per_answer,
        };
    }

    let score = per_answer.values().filter(|v| **v == Some(true)).count() as i64;
    Grade {
        score: Some(score),
        total_questions: Some(total_exam_questions),
        per_answer,
    }
}

/// One stored answer as read back for export.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedAnswer {
    pub response_id: String,
    pub question_id: String,
    pub answer_text: String,
    pub selected_option_texts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tabulation {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Tabulation {
    pub fn into_matrix(self) -> Vec<Vec<String>> {
        let mut out = Vec::with_capacity(self.rows.len() + 1);
        out.push(self.header);
        out.extend(self.rows);
        out
    }
}

fn cell_value(question_type: QuestionType, answer: &RecordedAnswer) -> String {
    match question_type {
        QuestionType::SelectOneOption => match answer.selected_option_texts.as_slice() {
            [only] => only.clone(),
            _ => String::new(),
        },
        _ => answer.answer_text.clone(),
    }
}

/// Pivots answers into one row per response and one column per question.
///
/// Columns follow question order: with orders numbered from 1 the column of a
/// question is `order - 1`. Rows appear in the order their response is first
/// seen in `answers`.
pub fn tabulate_responses(questions: &[QuestionDef], answers: &[RecordedAnswer]) -> Tabulation {
    let mut ordered: Vec<&QuestionDef> = questions.iter().collect();
    ordered.sort_by_key(|q| q.order);

    let columns: HashMap<&str, (usize, QuestionType)> = ordered
        .iter()
        .enumerate()
        .map(|(i, q)| (q.id.as_str(), (i, q.question_type)))
        .collect();
    let header: Vec<String> = ordered.iter().map(|q| q.text.clone()).collect();

    let mut row_of: HashMap<&str, usize> = HashMap::new();
    let mut rows: Vec<Vec<String>> = Vec::new();
    for answer in answers {
        let row = *row_of.entry(answer.response_id.as_str()).or_insert_with(|| {
            rows.push(vec![String::new(); header.len()]);
            rows.len() - 1
        });
        let Some(&(col, question_type)) = columns.get(answer.question_id.as_str()) else {
            continue;
        };
        rows[row][col] = cell_value(question_type, answer);
    }

    Tabulation { header, rows }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(id: &str, order: i64, text: &str) -> OptionDef {
        OptionDef {
            id: id.to_string(),
            order,
            text: text.to_string(),
        }
    }

    fn exam_question(id: &str, order: i64, correct: Option<&str>) -> QuestionDef {
        QuestionDef {
            id: id.to_string(),
            order,
            question_type: QuestionType::SelectOneOption,
            text: format!("{} text", id),
            placeholder: String::new(),
            is_exam_question: true,
            correct_option_id: correct.map(str::to_string),
            options: (0..4)
                .map(|i| option(&format!("{}-o{}", id, i), i, &format!("opt {}", i)))
                .collect(),
        }
    }

    fn pick(question_id: &str, option_id: &str) -> AnswerInput {
        AnswerInput::SelectOneOption {
            question_id: question_id.to_string(),
            option_id: option_id.to_string(),
        }
    }

    #[test]
    fn option_labels_are_letters() {
        assert_eq!(option_label(0), "A");
        assert_eq!(option_label(3), "D");
        assert_eq!(option_label(26), "27");
    }

    #[test]
    fn question_type_parses_wire_names() {
        assert_eq!(
            QuestionType::parse("select_one_option"),
            Some(QuestionType::SelectOneOption)
        );
        assert_eq!(
            QuestionType::parse("exam"),
            Some(QuestionType::SelectOneOption)
        );
        assert_eq!(QuestionType::parse("essay"), None);
    }

    #[test]
    fn answer_input_deserializes_tagged_variants() {
        let raw = serde_json::json!([
            { "type": "SHORT_RESPONSE", "questionId": "q1", "text": "hi" },
            { "type": "SELECT_ONE_OPTION", "questionId": "q2", "optionId": "o1" },
            { "type": "SELECT_MULTIPLE_OPTIONS", "questionId": "q3", "optionIds": ["a", "b"] }
        ]);
        let parsed: Vec<AnswerInput> = serde_json::from_value(raw).expect("parse answers");
        assert_eq!(parsed[0].answer_text(), "hi");
        assert_eq!(parsed[1].selected_option_ids(), ["o1".to_string()]);
        assert_eq!(parsed[2].selected_option_ids().len(), 2);
        assert_eq!(parsed[2].answer_text(), "");
    }

    #[test]
    fn exam_scores_one_of_two() {
        let questions = vec![
            exam_question("q1", 1, Some("q1-o0")),
            exam_question("q2", 2, Some("q2-o1")),
        ];
        let answers = vec![pick("q1", "q1-o0"), pick("q2", "q2-o0")];
        let grade = grade_submission(&questions, &answers);
        assert_eq!(grade.score, Some(1));
        assert_eq!(grade.total_questions, Some(2));
        assert_eq!(grade.per_answer.get("q1"), Some(&Some(true)));
        assert_eq!(grade.per_answer.get("q2"), Some(&Some(false)));
    }

    #[test]
    fn unanswered_exam_scores_zero_not_null() {
        let questions = vec![
            exam_question("q1", 1, Some("q1-o0")),
            exam_question("q2", 2, Some("q2-o1")),
        ];
        let grade = grade_submission(&questions, &[]);
        assert_eq!(grade.score, Some(0));
        assert_eq!(grade.total_questions, Some(2));
        assert!(grade.per_answer.is_empty());
    }

    #[test]
    fn missing_correct_option_is_always_wrong() {
        let questions = vec![exam_question("q1", 1, None)];
        let grade = grade_submission(&questions, &[pick("q1", "q1-o0")]);
        assert_eq!(grade.score, Some(0));
        assert_eq!(grade.per_answer.get("q1"), Some(&Some(false)));
    }

    #[test]
    fn non_exam_form_has_no_score() {
        let mut q = exam_question("q1", 1, Some("q1-o0"));
        q.is_exam_question = false;
        let grade = grade_submission(&[q], &[pick("q1", "q1-o0")]);
        assert_eq!(grade.score, None);
        assert_eq!(grade.total_questions, None);
        assert_eq!(grade.per_answer.get("q1"), Some(&None));
    }

    #[test]
    fn multi_select_containing_correct_option_counts() {
        let mut q = exam_question("q1", 1, Some("q1-o2"));
        q.question_type = QuestionType::SelectMultipleOptions;
        let answer = AnswerInput::SelectMultipleOptions {
            question_id: "q1".into(),
            option_ids: vec!["q1-o0".into(), "q1-o2".into()],
        };
        let grade = grade_submission(&[q], &[answer]);
        assert_eq!(grade.score, Some(1));
    }

    #[test]
    fn score_matches_count_of_correct_answers() {
        let questions: Vec<QuestionDef> = (0..6)
            .map(|i| {
                let correct = format!("q{}-o{}", i, i % 4);
                exam_question(&format!("q{}", i), i + 1, Some(correct.as_str()))
            })
            .collect();
        let answers: Vec<AnswerInput> = (0..6)
            .map(|i| pick(&format!("q{}", i), &format!("q{}-o{}", i, (i * 3) % 4)))
            .collect();
        let grade = grade_submission(&questions, &answers);
        let trues = grade.per_answer.values().filter(|v| **v == Some(true)).count() as i64;
        assert_eq!(grade.score, Some(trues));
        assert_eq!(grade.total_questions, Some(6));
    }

    #[test]
    fn validate_rejects_foreign_question_and_option() {
        let questions = vec![exam_question("q1", 1, Some("q1-o0"))];
        let e = validate_answers(&questions, &[pick("other", "q1-o0")]).unwrap_err();
        assert_eq!(e.code(), "cross_reference_mismatch");
        let e = validate_answers(&questions, &[pick("q1", "q2-o0")]).unwrap_err();
        assert_eq!(e.code(), "cross_reference_mismatch");
    }

    #[test]
    fn validate_rejects_duplicates_and_type_mismatch() {
        let questions = vec![exam_question("q1", 1, Some("q1-o0"))];
        let e = validate_answers(&questions, &[pick("q1", "q1-o0"), pick("q1", "q1-o1")])
            .unwrap_err();
        assert_eq!(e.code(), "bad_params");

        let text = AnswerInput::ShortResponse {
            question_id: "q1".into(),
            text: "x".into(),
        };
        let e = validate_answers(&questions, &[text]).unwrap_err();
        assert_eq!(e.code(), "bad_params");
        assert!(validate_answers(&questions, &[pick("q1", "q1-o3")]).is_ok());
    }

    #[test]
    fn tabulate_short_and_single_select() {
        let questions = vec![
            QuestionDef {
                id: "q1".into(),
                order: 1,
                question_type: QuestionType::ShortResponse,
                text: "Q1 text".into(),
                placeholder: String::new(),
                is_exam_question: false,
                correct_option_id: None,
                options: vec![],
            },
            QuestionDef {
                id: "q2".into(),
                order: 2,
                question_type: QuestionType::SelectOneOption,
                text: "Q2 text".into(),
                placeholder: String::new(),
                is_exam_question: false,
                correct_option_id: None,
                options: vec![option("a", 0, "A"), option("b", 1, "B")],
            },
        ];
        let answers = vec![
            RecordedAnswer {
                response_id: "r1".into(),
                question_id: "q2".into(),
                answer_text: String::new(),
                selected_option_texts: vec!["B".into()],
            },
            RecordedAnswer {
                response_id: "r1".into(),
                question_id: "q1".into(),
                answer_text: "hi".into(),
                selected_option_texts: vec![],
            },
        ];
        let table = tabulate_responses(&questions, &answers);
        assert_eq!(table.header, vec!["Q1 text", "Q2 text"]);
        assert_eq!(table.rows, vec![vec!["hi".to_string(), "B".to_string()]]);
        assert_eq!(table.into_matrix().len(), 2);
    }

    #[test]
    fn tabulate_leaves_unanswered_columns_blank() {
        let mut q1 = exam_question("q1", 1, None);
        q1.question_type = QuestionType::ShortResponse;
        let q2 = exam_question("q2", 2, None);
        let q3 = exam_question("q3", 3, None);
        let answers = vec![
            RecordedAnswer {
                response_id: "r1".into(),
                question_id: "q1".into(),
                answer_text: "first".into(),
                selected_option_texts: vec![],
            },
            RecordedAnswer {
                response_id: "r2".into(),
                question_id: "q2".into(),
                answer_text: String::new(),
                selected_option_texts: vec!["x".into(), "y".into()],
            },
        ];
        let table = tabulate_responses(&[q3, q1, q2], &answers);
        assert_eq!(table.header, vec!["q1 text", "q2 text", "q3 text"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0], vec!["first", "", ""]);
        // Two selections on a single-select question render as blank.
        assert_eq!(table.rows[1], vec!["", "", ""]);
    }
}
