use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{AppError, Result};

// ---------------------------------------------------------------------------
// Question type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    Boolean,
    Text,
    Float,
}

impl std::fmt::Display for QuestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QuestionType::Boolean => "boolean",
            QuestionType::Text => "text",
            QuestionType::Float => "float",
        };
        write!(f, "{s}")
    }
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "boolean" => Ok(QuestionType::Boolean),
            "text" => Ok(QuestionType::Text),
            "float" => Ok(QuestionType::Float),
            other => Err(format!("unknown question type '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Answer: one value, shaped by the question type
// ---------------------------------------------------------------------------

/// A correct answer or a prediction value. On the wire this is externally
/// tagged: `{"boolean": true}`, `{"text": "..."}`, `{"float": 1.5}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Answer {
    Boolean(bool),
    Text(String),
    Float(f64),
}

impl Answer {
    pub fn question_type(&self) -> QuestionType {
        match self {
            Answer::Boolean(_) => QuestionType::Boolean,
            Answer::Text(_) => QuestionType::Text,
            Answer::Float(_) => QuestionType::Float,
        }
    }

    /// Checks shape against `expected` and rejects values no store column should hold.
    pub fn validate_for(&self, expected: QuestionType) -> Result<()> {
        let found = self.question_type();
        if found != expected {
            return Err(AppError::TypeMismatch { expected, found });
        }
        match self {
            Answer::Text(t) if t.trim().is_empty() => {
                Err(AppError::Validation("text answer must not be blank".to_string()))
            }
            Answer::Float(v) if !v.is_finite() => {
                Err(AppError::Validation("float answer must be finite".to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Splits into the `(boolean, text, float)` storage columns; exactly one is `Some`.
    pub fn columns(&self) -> (Option<bool>, Option<&str>, Option<f64>) {
        match self {
            Answer::Boolean(b) => (Some(*b), None, None),
            Answer::Text(t) => (None, Some(t.as_str()), None),
            Answer::Float(v) => (None, None, Some(*v)),
        }
    }

    /// Rebuilds an answer from storage columns.
    ///
    /// Returns `Ok(None)` when all three are unset, `Ok(Some(_))` when exactly the
    /// column selected by `question_type` is set, and an error for any other shape.
    pub fn from_columns(
        question_type: QuestionType,
        boolean: Option<bool>,
        text: Option<String>,
        float: Option<f64>,
    ) -> std::result::Result<Option<Answer>, String> {
        match (question_type, boolean, text, float) {
            (_, None, None, None) => Ok(None),
            (QuestionType::Boolean, Some(b), None, None) => Ok(Some(Answer::Boolean(b))),
            (QuestionType::Text, None, Some(t), None) => Ok(Some(Answer::Text(t))),
            (QuestionType::Float, None, None, Some(v)) => Ok(Some(Answer::Float(v))),
            _ => Err(format!(
                "answer columns do not match question type {question_type}"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Correctness
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Correctness {
    /// Parent question not resolved yet.
    Pending,
    Correct,
    Incorrect,
}

impl Correctness {
    pub fn from_flag(flag: Option<bool>) -> Self {
        match flag {
            None => Correctness::Pending,
            Some(true) => Correctness::Correct,
            Some(false) => Correctness::Incorrect,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Correctness::Pending => None,
            Correctness::Correct => Some(true),
            Correctness::Incorrect => Some(false),
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Correctness::Pending)
    }
}

impl From<bool> for Correctness {
    fn from(correct: bool) -> Self {
        if correct {
            Correctness::Correct
        } else {
            Correctness::Incorrect
        }
    }
}

// ---------------------------------------------------------------------------
// Question / Prediction
// ---------------------------------------------------------------------------

/// Written once, together, by the resolution transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub resolved_at: i64,
    pub resolved_by: String,
    pub correct_answer: Answer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub id: i64,
    pub creator_id: String,
    pub title: String,
    pub question_type: QuestionType,
    /// Unix epoch milliseconds.
    pub deadline: Option<i64>,
    /// `None` while the question is open.
    pub resolution: Option<Resolution>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Question {
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    pub fn is_past_deadline(&self, now_ms: i64) -> bool {
        self.deadline.map_or(false, |d| d < now_ms)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub id: i64,
    pub question_id: i64,
    pub user_id: String,
    pub answer: Answer,
    pub confidence: u8,
    pub correctness: Correctness,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A question right after resolution, with every prediction stamped.
#[derive(Debug, Clone)]
pub struct ResolvedQuestion {
    pub question: Question,
    pub predictions: Vec<Prediction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    pub id: String,
    pub display_name: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

// ---------------------------------------------------------------------------
// Scores
// ---------------------------------------------------------------------------

/// Accuracy over a user's resolved predictions. Never built for zero of them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserScore {
    pub user_id: String,
    pub user_name: String,
    pub total_predictions: u32,
    pub correct_predictions: u32,
    pub score_percentage: f64,
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverPolicy {
    /// Any authenticated user may resolve any question.
    Any,
    /// Only the question's creator may resolve it.
    Creator,
}

impl FromStr for ResolverPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any" => Ok(ResolverPolicy::Any),
            "creator" => Ok(ResolverPolicy::Creator),
            other => Err(format!("RESOLVER_POLICY must be 'any' or 'creator', got '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlinePolicy {
    /// Deadlines are informational only.
    Advisory,
    /// No predictions after the deadline, no resolution before it.
    Enforced,
}

impl FromStr for DeadlinePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "advisory" => Ok(DeadlinePolicy::Advisory),
            "enforced" => Ok(DeadlinePolicy::Enforced),
            other => Err(format!(
                "DEADLINE_POLICY must be 'advisory' or 'enforced', got '{other}'"
            )),
        }
    }
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
