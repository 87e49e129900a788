use std::collections::HashMap;

use crate::config::UNKNOWN_USER_NAME;
use crate::types::{Correctness, Prediction, UserScore};

/// Accuracy over the resolved predictions in `predictions`.
///
/// Pending predictions are ignored. Returns `None` when nothing is resolved,
/// which is different from a score of 0%. The user id is taken from the first
/// prediction; callers pass one user's predictions.
pub fn aggregate<'a, I>(predictions: I) -> Option<UserScore>
where
    I: IntoIterator<Item = &'a Prediction>,
{
    let mut user_id: Option<&str> = None;
    let mut total = 0u32;
    let mut correct = 0u32;

    for p in predictions {
        user_id.get_or_insert(p.user_id.as_str());
        match p.correctness {
            Correctness::Pending => {}
            Correctness::Correct => {
                total += 1;
                correct += 1;
            }
            Correctness::Incorrect => total += 1,
        }
    }

    if total == 0 {
        return None;
    }

    Some(UserScore {
        user_id: user_id.unwrap_or_default().to_string(),
        user_name: UNKNOWN_USER_NAME.to_string(),
        total_predictions: total,
        correct_predictions: correct,
        score_percentage: percentage_one_decimal(correct, total),
    })
}

/// `correct / total * 100` rounded to one decimal, half away from zero.
///
/// Works in integer tenths of a percent so decimal ties like 6.25 round up
/// instead of depending on their binary representation. `total` must be > 0.
pub fn percentage_one_decimal(correct: u32, total: u32) -> f64 {
    let (c, t) = (u64::from(correct), u64::from(total));
    let tenths = (2000 * c + t) / (2 * t);
    tenths as f64 / 10.0
}

/// Per-user scores ordered by `score_percentage` descending.
///
/// Users are grouped in the order their id first appears in `predictions`.
/// The sort is stable, so tied users keep that encounter order. Users with no
/// resolved predictions are left out.
pub fn leaderboard(predictions: &[Prediction]) -> Vec<UserScore> {
    let mut groups: Vec<Vec<&Prediction>> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for p in predictions {
        let slot = *index.entry(p.user_id.as_str()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(p);
    }

    let mut scores: Vec<UserScore> = groups
        .into_iter()
        .filter_map(|group| aggregate(group))
        .collect();
    scores.sort_by(|a, b| b.score_percentage.total_cmp(&a.score_percentage));
    scores
}

/// Replaces the placeholder name on each score with the user's display name, if any.
pub fn apply_display_names(scores: &mut [UserScore], names: &HashMap<String, String>) {
    for score in scores {
        if let Some(name) = names.get(&score.user_id) {
            score.user_name = name.clone();
        }
    }
}
