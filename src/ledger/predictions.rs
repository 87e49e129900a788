use tracing::info;

use crate::db::models::{PredictionRow, PREDICTION_COLUMNS};
use crate::error::{AppError, Result};
use crate::registry::QuestionRegistry;
use crate::types::{now_ms, Answer, DeadlinePolicy, Prediction};

/// One prediction per (question, user). Writes are only accepted while the
/// parent question is open.
#[derive(Clone)]
pub struct PredictionLedger {
    pool: sqlx::SqlitePool,
    registry: QuestionRegistry,
    deadline_policy: DeadlinePolicy,
}

impl PredictionLedger {
    pub fn new(pool: sqlx::SqlitePool, deadline_policy: DeadlinePolicy) -> Self {
        let registry = QuestionRegistry::new(pool.clone());
        Self { pool, registry, deadline_policy }
    }

    /// Inserts or overwrites the caller's prediction for `question_id`.
    ///
    /// The open-question check and the write are a single statement, so an
    /// upsert racing a resolution either lands before it (and gets stamped)
    /// or is rejected.
    pub async fn upsert(
        &self,
        question_id: i64,
        user_id: &str,
        answer: Answer,
        confidence: i64,
    ) -> Result<Prediction> {
        let question = self.registry.get(question_id).await?;
        if question.is_resolved() {
            return Err(AppError::AlreadyResolved(question_id));
        }
        answer.validate_for(question.question_type)?;
        if !(0..=100).contains(&confidence) {
            return Err(AppError::InvalidConfidence(confidence));
        }

        let now = now_ms();
        if self.deadline_policy == DeadlinePolicy::Enforced && question.is_past_deadline(now) {
            return Err(AppError::DeadlinePassed(question_id));
        }

        let (boolean, text, float) = answer.columns();
        let result = sqlx::query(
            r#"
            INSERT INTO predictions (
                question_id, user_id, prediction_boolean, prediction_text, prediction_float,
                confidence, created_at, updated_at
            )
            SELECT ?, ?, ?, ?, ?, ?, ?, ?
            WHERE EXISTS (SELECT 1 FROM questions WHERE id = ? AND resolved = 0)
            ON CONFLICT(question_id, user_id) DO UPDATE SET
                prediction_boolean = excluded.prediction_boolean,
                prediction_text = excluded.prediction_text,
                prediction_float = excluded.prediction_float,
                confidence = excluded.confidence,
                updated_at = excluded.updated_at
            WHERE predictions.is_correct IS NULL
            "#,
        )
        .bind(question_id)
        .bind(user_id)
        .bind(boolean)
        .bind(text)
        .bind(float)
        .bind(confidence)
        .bind(now)
        .bind(now)
        .bind(question_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Resolved between our read and the write.
            return Err(AppError::AlreadyResolved(question_id));
        }

        let prediction = self
            .find(question_id, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("prediction for question {question_id}")))?;

        info!(
            question_id,
            prediction_id = prediction.id,
            user_id,
            confidence,
            "Prediction saved"
        );
        Ok(prediction)
    }

    pub async fn find(&self, question_id: i64, user_id: &str) -> Result<Option<Prediction>> {
        let sql = format!(
            "SELECT {PREDICTION_COLUMNS} FROM predictions WHERE question_id = ? AND user_id = ?"
        );
        sqlx::query_as::<_, PredictionRow>(&sql)
            .bind(question_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Prediction::try_from)
            .transpose()
    }

    pub async fn list_for_question(&self, question_id: i64) -> Result<Vec<Prediction>> {
        let sql = format!(
            "SELECT {PREDICTION_COLUMNS} FROM predictions WHERE question_id = ? ORDER BY id ASC"
        );
        let rows = sqlx::query_as::<_, PredictionRow>(&sql)
            .bind(question_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Prediction::try_from).collect()
    }

    /// Newest first.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Prediction>> {
        let sql = format!(
            "SELECT {PREDICTION_COLUMNS} FROM predictions WHERE user_id = ? \
             ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query_as::<_, PredictionRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Prediction::try_from).collect()
    }

    /// Every stamped prediction in insertion order; this is the leaderboard's
    /// encounter order.
    pub async fn list_resolved(&self) -> Result<Vec<Prediction>> {
        let sql = format!(
            "SELECT {PREDICTION_COLUMNS} FROM predictions WHERE is_correct IS NOT NULL ORDER BY id ASC"
        );
        let rows = sqlx::query_as::<_, PredictionRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Prediction::try_from).collect()
    }
}
