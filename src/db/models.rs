//! Database row types matching migrations/0001_init.sql.
//! Used by sqlx for typed queries, then converted into the domain types.

use crate::error::AppError;
use crate::types::{Answer, Correctness, Prediction, Profile, Question, QuestionType, Resolution};

/// Column list shared by every `SELECT` that loads a `QuestionRow`.
pub const QUESTION_COLUMNS: &str = "id, creator_id, title, question_type, deadline, resolved, \
     resolved_at, resolved_by, correct_answer_boolean, correct_answer_text, correct_answer_float, \
     created_at, updated_at";

/// Column list shared by every `SELECT` that loads a `PredictionRow`.
pub const PREDICTION_COLUMNS: &str = "id, question_id, user_id, prediction_boolean, \
     prediction_text, prediction_float, confidence, is_correct, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
pub struct QuestionRow {
    pub id: i64,
    pub creator_id: String,
    pub title: String,
    pub question_type: String,
    pub deadline: Option<i64>,
    pub resolved: bool,
    pub resolved_at: Option<i64>,
    pub resolved_by: Option<String>,
    pub correct_answer_boolean: Option<bool>,
    pub correct_answer_text: Option<String>,
    pub correct_answer_float: Option<f64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct PredictionRow {
    pub id: i64,
    pub question_id: i64,
    pub user_id: String,
    pub prediction_boolean: Option<bool>,
    pub prediction_text: Option<String>,
    pub prediction_float: Option<f64>,
    pub confidence: i64,
    pub is_correct: Option<bool>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct ProfileRow {
    pub id: String,
    pub display_name: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<QuestionRow> for Question {
    type Error = AppError;

    fn try_from(row: QuestionRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = move |msg: String| AppError::CorruptRow(format!("question {id}: {msg}"));

        let question_type: QuestionType = row.question_type.parse().map_err(corrupt)?;
        let answer = Answer::from_columns(
            question_type,
            row.correct_answer_boolean,
            row.correct_answer_text,
            row.correct_answer_float,
        )
        .map_err(corrupt)?;

        let resolution = match (row.resolved, row.resolved_at, row.resolved_by, answer) {
            (false, None, None, None) => None,
            (true, Some(resolved_at), Some(resolved_by), Some(correct_answer)) => Some(Resolution {
                resolved_at,
                resolved_by,
                correct_answer,
            }),
            _ => {
                return Err(corrupt(
                    "resolved flag, resolution metadata and correct answer disagree".to_string(),
                ))
            }
        };

        Ok(Question {
            id,
            creator_id: row.creator_id,
            title: row.title,
            question_type,
            deadline: row.deadline,
            resolution,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl PredictionRow {
    /// The answer type is implied by which column is populated; the ledger
    /// guarantees it matches the parent question's type.
    fn implied_type(&self) -> Option<QuestionType> {
        match (
            self.prediction_boolean.is_some(),
            self.prediction_text.is_some(),
            self.prediction_float.is_some(),
        ) {
            (true, false, false) => Some(QuestionType::Boolean),
            (false, true, false) => Some(QuestionType::Text),
            (false, false, true) => Some(QuestionType::Float),
            _ => None,
        }
    }
}

impl TryFrom<PredictionRow> for Prediction {
    type Error = AppError;

    fn try_from(row: PredictionRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = |msg: &str| AppError::CorruptRow(format!("prediction {id}: {msg}"));

        let question_type = row
            .implied_type()
            .ok_or_else(|| corrupt("exactly one prediction column must be set"))?;
        let answer = Answer::from_columns(
            question_type,
            row.prediction_boolean,
            row.prediction_text,
            row.prediction_float,
        )
        .ok()
        .flatten()
        .ok_or_else(|| corrupt("prediction value is missing"))?;
        let confidence =
            u8::try_from(row.confidence).map_err(|_| corrupt("confidence out of range"))?;
        if confidence > 100 {
            return Err(corrupt("confidence out of range"));
        }

        Ok(Prediction {
            id,
            question_id: row.question_id,
            user_id: row.user_id,
            answer,
            confidence,
            correctness: Correctness::from_flag(row.is_correct),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Profile {
            id: row.id,
            display_name: row.display_name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
