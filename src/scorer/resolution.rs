use std::collections::HashMap;

use tracing::{info, warn};

use crate::db::models::{PredictionRow, PREDICTION_COLUMNS};
use crate::error::{AppError, Result};
use crate::registry::QuestionRegistry;
use crate::types::{
    now_ms, Answer, Correctness, DeadlinePolicy, Prediction, QuestionType, Resolution,
    ResolvedQuestion, ResolverPolicy,
};

/// Resolves questions and stamps every attached prediction, all inside one
/// SQLite transaction.
#[derive(Clone)]
pub struct ScoringEngine {
    pool: sqlx::SqlitePool,
    registry: QuestionRegistry,
    resolver_policy: ResolverPolicy,
    deadline_policy: DeadlinePolicy,
}

impl ScoringEngine {
    pub fn new(
        pool: sqlx::SqlitePool,
        resolver_policy: ResolverPolicy,
        deadline_policy: DeadlinePolicy,
    ) -> Self {
        let registry = QuestionRegistry::new(pool.clone());
        Self { pool, registry, resolver_policy, deadline_policy }
    }

    /// Records `correct_answer` on the question and stamps correctness on each
    /// of its predictions.
    ///
    /// Boolean predictions are judged by exact equality. Text and float
    /// predictions take their verdict from `manual`, keyed by prediction id;
    /// missing ids count as incorrect. Either everything is written or nothing is.
    pub async fn resolve(
        &self,
        question_id: i64,
        correct_answer: Answer,
        manual: Option<HashMap<i64, bool>>,
        resolver_id: &str,
    ) -> Result<ResolvedQuestion> {
        let mut question = self.registry.get(question_id).await?;
        if question.is_resolved() {
            return Err(AppError::AlreadyResolved(question_id));
        }
        correct_answer.validate_for(question.question_type)?;

        if self.resolver_policy == ResolverPolicy::Creator && question.creator_id != resolver_id {
            return Err(AppError::Forbidden(format!(
                "only the creator may resolve question {question_id}"
            )));
        }

        let now = now_ms();
        if self.deadline_policy == DeadlinePolicy::Enforced
            && question.deadline.map_or(false, |d| now < d)
        {
            return Err(AppError::DeadlineNotReached(question_id));
        }

        let mut manual = manual.unwrap_or_default();
        if question.question_type == QuestionType::Boolean && !manual.is_empty() {
            warn!(
                question_id,
                entries = manual.len(),
                "Ignoring manual correctness map for boolean question"
            );
            manual.clear();
        }

        let mut tx = self.pool.begin().await?;

        // The guard on `resolved` makes the first of two racing resolvers win.
        let (boolean, text, float) = correct_answer.columns();
        let claimed = sqlx::query(
            r#"
            UPDATE questions SET
                resolved = 1,
                resolved_at = ?,
                resolved_by = ?,
                correct_answer_boolean = ?,
                correct_answer_text = ?,
                correct_answer_float = ?,
                updated_at = ?
            WHERE id = ? AND resolved = 0
            "#,
        )
        .bind(now)
        .bind(resolver_id)
        .bind(boolean)
        .bind(text)
        .bind(float)
        .bind(now)
        .bind(question_id)
        .execute(&mut *tx)
        .await?;
        if claimed.rows_affected() == 0 {
            return Err(AppError::AlreadyResolved(question_id));
        }

        let sql = format!(
            "SELECT {PREDICTION_COLUMNS} FROM predictions WHERE question_id = ? ORDER BY id ASC"
        );
        let rows = sqlx::query_as::<_, PredictionRow>(&sql)
            .bind(question_id)
            .fetch_all(&mut *tx)
            .await?;
        let mut predictions = rows
            .into_iter()
            .map(Prediction::try_from)
            .collect::<Result<Vec<_>>>()?;

        if let Some(stray) = manual
            .keys()
            .find(|id| !predictions.iter().any(|p| p.id == **id))
        {
            return Err(AppError::Validation(format!(
                "prediction {stray} does not belong to question {question_id}"
            )));
        }

        let total = predictions.len();
        for (stamped, prediction) in predictions.iter_mut().enumerate() {
            let verdict = judge(&correct_answer, prediction, &manual);
            let written = sqlx::query(
                "UPDATE predictions SET is_correct = ? WHERE id = ? AND is_correct IS NULL",
            )
            .bind(verdict.as_flag())
            .bind(prediction.id)
            .execute(&mut *tx)
            .await?;
            if written.rows_affected() != 1 {
                return Err(AppError::PartialResolution { question_id, stamped, total });
            }
            prediction.correctness = verdict;
        }

        tx.commit().await?;

        let correct = predictions
            .iter()
            .filter(|p| p.correctness == Correctness::Correct)
            .count();
        info!(
            question_id,
            resolver_id,
            question_type = %question.question_type,
            predictions = total,
            correct,
            "Question resolved"
        );

        question.resolution = Some(Resolution {
            resolved_at: now,
            resolved_by: resolver_id.to_string(),
            correct_answer,
        });
        question.updated_at = now;

        Ok(ResolvedQuestion { question, predictions })
    }
}

/// Verdict for one prediction. Pure, so re-running a failed resolution with the
/// same inputs yields the same stamps.
pub fn judge(
    correct_answer: &Answer,
    prediction: &Prediction,
    manual: &HashMap<i64, bool>,
) -> Correctness {
    match (correct_answer, &prediction.answer) {
        (Answer::Boolean(expected), Answer::Boolean(got)) => Correctness::from(expected == got),
        (Answer::Boolean(_), _) => Correctness::Incorrect,
        (Answer::Text(_) | Answer::Float(_), _) => {
            Correctness::from(manual.get(&prediction.id).copied().unwrap_or(false))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::ledger::PredictionLedger;

    struct Fixture {
        registry: QuestionRegistry,
        ledger: PredictionLedger,
        engine: ScoringEngine,
        pool: sqlx::SqlitePool,
    }

    async fn fixture(resolver: ResolverPolicy, deadline: DeadlinePolicy) -> Fixture {
        let pool = test_pool().await;
        Fixture {
            registry: QuestionRegistry::new(pool.clone()),
            ledger: PredictionLedger::new(pool.clone(), DeadlinePolicy::Advisory),
            engine: ScoringEngine::new(pool.clone(), resolver, deadline),
            pool,
        }
    }

    async fn default_fixture() -> Fixture {
        fixture(ResolverPolicy::Any, DeadlinePolicy::Advisory).await
    }

    fn prediction(id: i64, answer: Answer) -> Prediction {
        Prediction {
            id,
            question_id: 1,
            user_id: "u".to_string(),
            answer,
            confidence: 50,
            correctness: Correctness::Pending,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn judge_boolean_uses_exact_equality_and_ignores_map() {
        let manual = HashMap::from([(1, true), (2, true)]);
        let yes = prediction(1, Answer::Boolean(true));
        let no = prediction(2, Answer::Boolean(false));
        assert_eq!(judge(&Answer::Boolean(true), &yes, &manual), Correctness::Correct);
        assert_eq!(judge(&Answer::Boolean(true), &no, &manual), Correctness::Incorrect);
        assert_eq!(judge(&Answer::Boolean(false), &no, &HashMap::new()), Correctness::Correct);
    }

    #[test]
    fn judge_text_and_float_default_to_incorrect() {
        let manual = HashMap::from([(1, true), (3, false)]);
        let a = prediction(1, Answer::Float(3.0));
        let b = prediction(2, Answer::Float(3.0));
        let c = prediction(3, Answer::Text("x".to_string()));
        assert_eq!(judge(&Answer::Float(3.0), &a, &manual), Correctness::Correct);
        // Equal value but not marked: still incorrect.
        assert_eq!(judge(&Answer::Float(3.0), &b, &manual), Correctness::Incorrect);
        assert_eq!(judge(&Answer::Text("x".to_string()), &c, &manual), Correctness::Incorrect);
    }

    #[tokio::test]
    async fn boolean_resolution_stamps_by_equality() {
        let f = default_fixture().await;
        let q = f.registry.create("owner", "q", QuestionType::Boolean, None).await.unwrap();
        let a = f.ledger.upsert(q.id, "A", Answer::Boolean(true), 80).await.unwrap();
        let b = f.ledger.upsert(q.id, "B", Answer::Boolean(false), 30).await.unwrap();

        let resolved = f
            .engine
            .resolve(q.id, Answer::Boolean(true), None, "judge")
            .await
            .unwrap();

        let res = resolved.question.resolution.as_ref().unwrap();
        assert_eq!(res.correct_answer, Answer::Boolean(true));
        assert_eq!(res.resolved_by, "judge");

        let stored = f.ledger.list_for_question(q.id).await.unwrap();
        assert_eq!(stored, resolved.predictions);
        let by_id: HashMap<i64, Correctness> =
            stored.iter().map(|p| (p.id, p.correctness)).collect();
        assert_eq!(by_id[&a.id], Correctness::Correct);
        assert_eq!(by_id[&b.id], Correctness::Incorrect);

        let reloaded = f.registry.get(q.id).await.unwrap();
        assert_eq!(reloaded.resolution, resolved.question.resolution);
    }

    #[tokio::test]
    async fn text_resolution_uses_manual_map_with_false_default() {
        let f = default_fixture().await;
        let q = f.registry.create("owner", "q", QuestionType::Text, None).await.unwrap();
        let a = f.ledger.upsert(q.id, "A", Answer::Text("Paris".to_string()), 90).await.unwrap();
        let b = f.ledger.upsert(q.id, "B", Answer::Text("paris".to_string()), 90).await.unwrap();

        let manual = HashMap::from([(a.id, true)]);
        let resolved = f
            .engine
            .resolve(q.id, Answer::Text("Paris".to_string()), Some(manual), "judge")
            .await
            .unwrap();

        let verdicts: Vec<(i64, Correctness)> =
            resolved.predictions.iter().map(|p| (p.id, p.correctness)).collect();
        assert_eq!(
            verdicts,
            vec![(a.id, Correctness::Correct), (b.id, Correctness::Incorrect)]
        );
        assert!(f
            .ledger
            .list_for_question(q.id)
            .await
            .unwrap()
            .iter()
            .all(|p| p.correctness.is_resolved()));
    }

    #[tokio::test]
    async fn question_without_predictions_resolves() {
        let f = default_fixture().await;
        let q = f.registry.create("owner", "q", QuestionType::Float, None).await.unwrap();

        let resolved = f.engine.resolve(q.id, Answer::Float(4.2), None, "judge").await.unwrap();
        assert!(resolved.predictions.is_empty());
        assert!(f.registry.get(q.id).await.unwrap().is_resolved());
    }

    #[tokio::test]
    async fn second_resolution_fails_and_changes_nothing() {
        let f = default_fixture().await;
        let q = f.registry.create("owner", "q", QuestionType::Boolean, None).await.unwrap();
        f.ledger.upsert(q.id, "A", Answer::Boolean(true), 50).await.unwrap();
        f.engine.resolve(q.id, Answer::Boolean(true), None, "first").await.unwrap();
        let before_q = f.registry.get(q.id).await.unwrap();
        let before_p = f.ledger.list_for_question(q.id).await.unwrap();

        let err = f
            .engine
            .resolve(q.id, Answer::Boolean(false), None, "second")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::AlreadyResolved(id) if id == q.id));
        assert_eq!(f.registry.get(q.id).await.unwrap(), before_q);
        assert_eq!(f.ledger.list_for_question(q.id).await.unwrap(), before_p);
    }

    #[tokio::test]
    async fn wrong_answer_shape_is_rejected() {
        let f = default_fixture().await;
        let q = f.registry.create("owner", "q", QuestionType::Boolean, None).await.unwrap();

        let err = f
            .engine
            .resolve(q.id, Answer::Float(1.0), None, "judge")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TypeMismatch { .. }));
        assert!(!f.registry.get(q.id).await.unwrap().is_resolved());
    }

    #[tokio::test]
    async fn unknown_question_is_not_found() {
        let f = default_fixture().await;
        let err = f
            .engine
            .resolve(99, Answer::Boolean(true), None, "judge")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn stray_manual_entry_rolls_back_everything() {
        let f = default_fixture().await;
        let q = f.registry.create("owner", "q", QuestionType::Float, None).await.unwrap();
        let a = f.ledger.upsert(q.id, "A", Answer::Float(1.0), 50).await.unwrap();

        let manual = HashMap::from([(a.id, true), (a.id + 1000, true)]);
        let err = f
            .engine
            .resolve(q.id, Answer::Float(1.0), Some(manual), "judge")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert!(!f.registry.get(q.id).await.unwrap().is_resolved());
        let stored = f.ledger.find(q.id, "A").await.unwrap().unwrap();
        assert_eq!(stored.correctness, Correctness::Pending);
    }

    #[tokio::test]
    async fn failed_stamp_reports_partial_resolution_and_rolls_back() {
        let f = default_fixture().await;
        let q = f.registry.create("owner", "q", QuestionType::Boolean, None).await.unwrap();
        f.ledger.upsert(q.id, "A", Answer::Boolean(true), 50).await.unwrap();
        let b = f.ledger.upsert(q.id, "B", Answer::Boolean(true), 50).await.unwrap();
        // A stamp that slipped in outside a resolution makes B unwritable.
        sqlx::query("UPDATE predictions SET is_correct = 0 WHERE id = ?")
            .bind(b.id)
            .execute(&f.pool)
            .await
            .unwrap();

        let err = f
            .engine
            .resolve(q.id, Answer::Boolean(true), None, "judge")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::PartialResolution { stamped: 1, total: 2, .. }
        ));
        assert!(!f.registry.get(q.id).await.unwrap().is_resolved());
        let a = f.ledger.find(q.id, "A").await.unwrap().unwrap();
        assert_eq!(a.correctness, Correctness::Pending);
    }

    #[tokio::test]
    async fn creator_policy_blocks_other_resolvers() {
        let f = fixture(ResolverPolicy::Creator, DeadlinePolicy::Advisory).await;
        let q = f.registry.create("owner", "q", QuestionType::Boolean, None).await.unwrap();

        let err = f
            .engine
            .resolve(q.id, Answer::Boolean(true), None, "stranger")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        assert!(f.engine.resolve(q.id, Answer::Boolean(true), None, "owner").await.is_ok());
    }

    #[tokio::test]
    async fn enforced_deadline_blocks_early_resolution() {
        let f = fixture(ResolverPolicy::Any, DeadlinePolicy::Enforced).await;
        let future = now_ms() + 86_400_000;
        let early = f.registry.create("o", "q", QuestionType::Boolean, Some(future)).await.unwrap();
        let past = f.registry.create("o", "q", QuestionType::Boolean, Some(1)).await.unwrap();

        let err = f
            .engine
            .resolve(early.id, Answer::Boolean(true), None, "judge")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DeadlineNotReached(_)));
        assert!(f.engine.resolve(past.id, Answer::Boolean(true), None, "judge").await.is_ok());
    }

    #[tokio::test]
    async fn advisory_deadline_allows_early_resolution() {
        let f = default_fixture().await;
        let future = now_ms() + 86_400_000;
        let q = f.registry.create("o", "q", QuestionType::Boolean, Some(future)).await.unwrap();
        assert!(f.engine.resolve(q.id, Answer::Boolean(false), None, "judge").await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_resolvers_and_upsert_settle_on_file_database() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("race.db");
        let pool = crate::db::connect(db_path.to_str().unwrap()).await.unwrap();
        let registry = QuestionRegistry::new(pool.clone());
        let ledger = PredictionLedger::new(pool.clone(), DeadlinePolicy::Advisory);
        let engine = ScoringEngine::new(pool.clone(), ResolverPolicy::Any, DeadlinePolicy::Advisory);

        for round in 0..20 {
            let q = registry
                .create("owner", &format!("race {round}"), QuestionType::Boolean, None)
                .await
                .unwrap();
            let id = q.id;
            ledger.upsert(id, "early", Answer::Boolean(true), 60).await.unwrap();

            let first = {
                let engine = engine.clone();
                tokio::spawn(async move { engine.resolve(id, Answer::Boolean(true), None, "r1").await })
            };
            let second = {
                let engine = engine.clone();
                tokio::spawn(async move { engine.resolve(id, Answer::Boolean(false), None, "r2").await })
            };
            let late = {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.upsert(id, "late", Answer::Boolean(false), 40).await })
            };

            let outcomes = [first.await.unwrap(), second.await.unwrap()];
            assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1, "round {round}");
            assert!(
                outcomes
                    .iter()
                    .any(|r| matches!(r, Err(AppError::AlreadyResolved(q)) if *q == id)),
                "round {round}: loser must see AlreadyResolved"
            );

            match late.await.unwrap() {
                Ok(_) | Err(AppError::AlreadyResolved(_)) => {}
                Err(e) => panic!("round {round}: unexpected upsert error: {e}"),
            }

            assert!(registry.get(id).await.unwrap().is_resolved());
            let predictions = ledger.list_for_question(id).await.unwrap();
            assert!(
                predictions.iter().all(|p| p.correctness.is_resolved()),
                "round {round}: pending prediction left behind"
            );
        }

        pool.close().await;
    }
}
