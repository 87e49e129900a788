use std::collections::HashMap;

use sqlx::{QueryBuilder, Sqlite};
use tracing::info;

use crate::db::models::{QuestionRow, QUESTION_COLUMNS};
use crate::error::{AppError, Result};
use crate::types::{now_ms, Question, QuestionType};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QuestionOrder {
    /// Newest first.
    #[default]
    Newest,
    /// Soonest deadline first; questions without a deadline last.
    DeadlineAsc,
}

#[derive(Debug, Clone, Default)]
pub struct QuestionFilter {
    pub resolved: Option<bool>,
    /// Only questions with a deadline at or after this epoch-ms instant.
    pub deadline_from: Option<i64>,
    pub order: QuestionOrder,
    pub limit: Option<i64>,
}

/// Owns question records. The only mutation after creation is resolution,
/// which belongs to the scoring engine.
#[derive(Clone)]
pub struct QuestionRegistry {
    pool: sqlx::SqlitePool,
}

impl QuestionRegistry {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        creator_id: &str,
        title: &str,
        question_type: QuestionType,
        deadline: Option<i64>,
    ) -> Result<Question> {
        let title = title.trim();
        if title.is_empty() {
            return Err(AppError::Validation("title must not be blank".to_string()));
        }

        let now = now_ms();
        let kind = question_type.to_string();
        let sql = format!(
            "INSERT INTO questions (creator_id, title, question_type, deadline, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) RETURNING {QUESTION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, QuestionRow>(&sql)
            .bind(creator_id)
            .bind(title)
            .bind(kind)
            .bind(deadline)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

        let question = Question::try_from(row)?;
        info!(
            question_id = question.id,
            creator_id,
            question_type = %question.question_type,
            "Question created"
        );
        Ok(question)
    }

    pub async fn get(&self, id: i64) -> Result<Question> {
        let sql = format!("SELECT {QUESTION_COLUMNS} FROM questions WHERE id = ?");
        let row = sqlx::query_as::<_, QuestionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("question {id}")))?;

        Question::try_from(row)
    }

    /// Loads every listed question that exists; unknown ids are skipped.
    pub async fn get_many(&self, ids: &[i64]) -> Result<HashMap<i64, Question>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {QUESTION_COLUMNS} FROM questions WHERE id IN ("));
        let mut sep = qb.separated(", ");
        for id in ids {
            sep.push_bind(*id);
        }
        sep.push_unseparated(")");

        let rows = qb.build_query_as::<QuestionRow>().fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|r| Question::try_from(r).map(|q| (q.id, q)))
            .collect()
    }

    pub async fn list(&self, filter: &QuestionFilter) -> Result<Vec<Question>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {QUESTION_COLUMNS} FROM questions WHERE 1 = 1"));

        if let Some(resolved) = filter.resolved {
            qb.push(" AND resolved = ").push_bind(resolved);
        }
        if let Some(from) = filter.deadline_from {
            qb.push(" AND deadline IS NOT NULL AND deadline >= ").push_bind(from);
        }
        qb.push(match filter.order {
            QuestionOrder::Newest => " ORDER BY created_at DESC, id DESC",
            QuestionOrder::DeadlineAsc => " ORDER BY deadline IS NULL, deadline ASC, id ASC",
        });
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit.max(0));
        }

        let rows = qb.build_query_as::<QuestionRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(Question::try_from).collect()
    }
}
