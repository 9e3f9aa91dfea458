use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schemas::{AgentRunStatus, MergeStrategy};

/// Fixed output when every fan-out target failed or timed out.
pub const NO_AGENTS_COMPLETED: &str = "No agents completed successfully.";

/// One collected fan-out result, indexed by agent id in the run's declared
/// order so merges are deterministic.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AgentRunResult {
    pub agent_id: Uuid,
    pub status: AgentRunStatus,
    #[serde(default)]
    pub response: Option<String>,
    pub tool_calls: u32,
    pub turns: u32,
    #[serde(default)]
    pub score: Option<f32>,
    pub duration_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
}

fn completed(results: &[AgentRunResult]) -> Vec<&AgentRunResult> {
    results
        .iter()
        .filter(|r| r.status == AgentRunStatus::Completed)
        .collect()
}

fn response_of(result: &AgentRunResult) -> &str {
    result.response.as_deref().unwrap_or_default()
}

/// Fold collected results into one response under the chosen strategy.
pub fn merge_results(
    strategy: MergeStrategy,
    results: &[AgentRunResult],
    agent_names: &HashMap<Uuid, String>,
) -> String {
    let done = completed(results);
    if done.is_empty() {
        return NO_AGENTS_COMPLETED.to_string();
    }

    match strategy {
        MergeStrategy::FirstCompleted => response_of(done[0]).to_string(),

        MergeStrategy::BestScore => {
            let scored: Vec<&AgentRunResult> = done
                .iter()
                .copied()
                .filter(|r| r.score.is_some())
                .collect();
            let winner: &AgentRunResult = if scored.is_empty() {
                done.iter()
                    .copied()
                    .min_by_key(|r| r.duration_ms)
                    .expect("non-empty completed set")
            } else {
                scored
                    .into_iter()
                    .max_by(|a, b| {
                        a.score
                            .unwrap_or(f32::MIN)
                            .total_cmp(&b.score.unwrap_or(f32::MIN))
                    })
                    .expect("non-empty scored set")
            };
            response_of(winner).to_string()
        }

        MergeStrategy::MergeAll => {
            if done.len() == 1 {
                return response_of(done[0]).to_string();
            }
            done.iter()
                .map(|r| {
                    let name = agent_names
                        .get(&r.agent_id)
                        .cloned()
                        .unwrap_or_else(|| r.agent_id.to_string());
                    format!("[Agent {name}]: {}", response_of(r))
                })
                .collect::<Vec<_>>()
                .join("\n\n")
        }

        MergeStrategy::Consensus => {
            if done.len() == 1 {
                return response_of(done[0]).to_string();
            }
            let mut merged = format!(
                "{} of {} agents responded. Responses:",
                done.len(),
                results.len()
            );
            for (i, result) in done.iter().enumerate() {
                merged.push_str(&format!("\n[{}] {}", i + 1, response_of(result)));
            }
            merged
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(
        agent_id: Uuid,
        status: AgentRunStatus,
        response: Option<&str>,
        score: Option<f32>,
        duration_ms: u64,
    ) -> AgentRunResult {
        AgentRunResult {
            agent_id,
            status,
            response: response.map(str::to_string),
            tool_calls: 0,
            turns: 1,
            score,
            duration_ms,
            error: None,
        }
    }

    fn names(pairs: &[(Uuid, &str)]) -> HashMap<Uuid, String> {
        pairs.iter().map(|(id, n)| (*id, n.to_string())).collect()
    }

    #[test]
    fn empty_completion_yields_fixed_message() {
        let a = Uuid::new_v4();
        let results = vec![result(a, AgentRunStatus::TimedOut, None, None, 500)];
        for strategy in [
            MergeStrategy::FirstCompleted,
            MergeStrategy::BestScore,
            MergeStrategy::MergeAll,
            MergeStrategy::Consensus,
        ] {
            assert_eq!(
                merge_results(strategy, &results, &HashMap::new()),
                NO_AGENTS_COMPLETED
            );
        }
    }

    #[test]
    fn first_completed_respects_declared_order() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let results = vec![
            result(a, AgentRunStatus::Failed, None, None, 10),
            result(b, AgentRunStatus::Completed, Some("B."), None, 200),
        ];
        assert_eq!(
            merge_results(MergeStrategy::FirstCompleted, &results, &HashMap::new()),
            "B."
        );
    }

    #[test]
    fn best_score_prefers_score_then_latency() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let scored = vec![
            result(a, AgentRunStatus::Completed, Some("low"), Some(0.2), 10),
            result(b, AgentRunStatus::Completed, Some("high"), Some(0.9), 900),
        ];
        assert_eq!(
            merge_results(MergeStrategy::BestScore, &scored, &HashMap::new()),
            "high"
        );

        let unscored = vec![
            result(a, AgentRunStatus::Completed, Some("slow"), None, 900),
            result(b, AgentRunStatus::Completed, Some("fast"), None, 10),
        ];
        assert_eq!(
            merge_results(MergeStrategy::BestScore, &unscored, &HashMap::new()),
            "fast"
        );
    }

    #[test]
    fn merge_all_labels_multiple_responses() {
        let (x, y) = (Uuid::new_v4(), Uuid::new_v4());
        let results = vec![
            result(x, AgentRunStatus::Completed, Some("A."), None, 100),
            result(y, AgentRunStatus::Completed, Some("B."), None, 200),
        ];
        assert_eq!(
            merge_results(
                MergeStrategy::MergeAll,
                &results,
                &names(&[(x, "x"), (y, "y")])
            ),
            "[Agent x]: A.\n\n[Agent y]: B."
        );
    }

    #[test]
    fn merge_all_single_response_is_verbatim() {
        let x = Uuid::new_v4();
        let results = vec![result(x, AgentRunStatus::Completed, Some("A."), None, 100)];
        assert_eq!(
            merge_results(MergeStrategy::MergeAll, &results, &names(&[(x, "x")])),
            "A."
        );
    }

    #[test]
    fn consensus_counts_and_enumerates() {
        let (x, y, z) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let results = vec![
            result(x, AgentRunStatus::Completed, Some("A."), None, 100),
            result(y, AgentRunStatus::Completed, Some("B."), None, 200),
            result(z, AgentRunStatus::TimedOut, None, None, 5000),
        ];
        assert_eq!(
            merge_results(MergeStrategy::Consensus, &results, &HashMap::new()),
            "2 of 3 agents responded. Responses:\n[1] A.\n[2] B."
        );
    }
}
