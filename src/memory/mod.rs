//! Per-agent semantic memory: summary building, similarity recall, and
//! best-effort persistence.
//!
//! Memory never blocks the main path. Embedding failures degrade to "no
//! memories", storage failures log and move on, and persistence is skipped
//! entirely once the agent loop has burned most of its deadline.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::embedding::Embedder;
use crate::schemas::{AgentMemory, MemoryMatch};
use crate::storage::Storage;
use crate::utils::truncate_chars;

pub const MEMORY_MATCH_COUNT: usize = 5;
pub const MEMORY_MATCH_THRESHOLD: f32 = 0.7;
pub const MAX_SUMMARY_CHARS: usize = 2000;

/// Once this much of the loop deadline is spent, storing a memory is not
/// worth the remaining budget.
pub const STORE_CUTOFF: Duration = Duration::from_secs(20);

pub const MEMORY_SECTION_HEADER: &str = "RELEVANT PAST INTERACTIONS:";

/// One-line summary of a finished interaction, capped for embedding.
pub fn build_summary(command: &str, response: &str) -> String {
    truncate_chars(&format!("Command: {command} | Response: {response}"), MAX_SUMMARY_CHARS)
}

pub struct MemoryService {
    storage: Arc<dyn Storage>,
    embedder: Arc<dyn Embedder>,
}

impl MemoryService {
    pub fn new(storage: Arc<dyn Storage>, embedder: Arc<dyn Embedder>) -> Self {
        Self { storage, embedder }
    }

    /// Embed text, degrading to `None` on missing credential or any
    /// provider failure.
    async fn generate_embedding(&self, text: &str) -> Option<Vec<f32>> {
        match self.embedder.embed_query(text).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                log::warn!("Embedding unavailable, continuing without memory: {e}");
                None
            }
        }
    }

    /// Similar past interactions for a new command, most similar first.
    /// Empty when embedding or the similarity query is unavailable.
    pub async fn retrieve(&self, agent_id: Uuid, command: &str) -> Vec<MemoryMatch> {
        let Some(embedding) = self.generate_embedding(command).await else {
            return Vec::new();
        };

        let matches = match self
            .storage
            .match_agent_memories(agent_id, &embedding, MEMORY_MATCH_COUNT, MEMORY_MATCH_THRESHOLD)
            .await
        {
            Ok(matches) => matches,
            Err(e) => {
                log::warn!("Memory retrieval failed for agent {agent_id}: {e}");
                return Vec::new();
            }
        };

        // Touch last_accessed_at without holding up the caller.
        let ids: Vec<Uuid> = matches.iter().map(|m| m.memory.id).collect();
        if !ids.is_empty() {
            let storage = Arc::clone(&self.storage);
            tokio::spawn(async move {
                if let Err(e) = storage.touch_agent_memories(&ids).await {
                    log::warn!("Failed to touch agent memories: {e}");
                }
            });
        }

        matches
    }

    /// Serialize matches as the prompt section the executor injects, or
    /// `None` when there is nothing to say.
    pub fn format_for_prompt(matches: &[MemoryMatch]) -> Option<String> {
        if matches.is_empty() {
            return None;
        }

        let mut section = String::from(MEMORY_SECTION_HEADER);
        for (i, m) in matches.iter().enumerate() {
            let tools = if m.memory.tool_names.is_empty() {
                "none".to_string()
            } else {
                m.memory.tool_names.join(", ")
            };
            section.push_str(&format!(
                "\n{}. [{}](tools: {}) {}",
                i + 1,
                m.memory.created_at.format("%Y-%m-%d"),
                tools,
                m.memory.summary,
            ));
        }
        Some(section)
    }

    /// Persist one interaction. Skipped silently when the embedding fails
    /// or when `elapsed` says the loop already spent its budget.
    #[allow(clippy::too_many_arguments)]
    pub async fn store(
        &self,
        agent_id: Uuid,
        session_id: &str,
        command_id: Option<Uuid>,
        command: &str,
        response: &str,
        tool_names: Vec<String>,
        turn_count: u32,
        importance: f32,
        elapsed: Duration,
    ) {
        if elapsed > STORE_CUTOFF {
            log::debug!("Skipping memory store for agent {agent_id}, deadline nearly spent");
            return;
        }

        let summary = build_summary(command, response);
        let Some(embedding) = self.generate_embedding(&summary).await else {
            return;
        };

        let memory = AgentMemory {
            id: Uuid::new_v4(),
            agent_id,
            session_id: session_id.to_string(),
            command_id,
            summary,
            embedding,
            command_text: command.to_string(),
            response_text: response.to_string(),
            tool_names,
            turn_count,
            importance,
            created_at: Utc::now(),
            last_accessed_at: None,
        };

        if let Err(e) = self.storage.insert_agent_memory(memory).await {
            log::warn!("Failed to store agent memory: {e}");
        }
    }
}
