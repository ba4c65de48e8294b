//! Agent-to-agent collaboration: consultation, consensus (sync and async),
//! conflict resolution, and knowledge propagation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::agent::loop_::AgentReasoningLoop;
use crate::agent::types::{Trigger, TriggerContext};
use crate::memory::{Memory, MemoryEntry, MemoryType};
use crate::store::Store;
use crate::store::collab::{Conversation, ConversationMessage, ConversationStatus, ConversationType};
use crate::store::skills::SkillCategory;

pub struct CollaborationProtocol {
    store: Store,
    loop_: Arc<AgentReasoningLoop>,
    memory: Arc<dyn Memory>,
}

/// Outcome of a synchronous consensus round.
#[derive(Debug, Clone)]
pub struct ConsensusResult {
    pub conversation_id: String,
    pub winner: Option<String>,
    pub tallies: HashMap<String, usize>,
}

/// Outcome of a conflict-resolution round.
#[derive(Debug, Clone)]
pub struct ConflictResult {
    pub conversation_id: String,
    /// `resolved`, `escalated`, or `needs_human`.
    pub outcome: String,
    pub winning_position: Option<String>,
}

impl CollaborationProtocol {
    pub fn new(store: Store, loop_: Arc<AgentReasoningLoop>, memory: Arc<dyn Memory>) -> Self {
        Self { store, loop_, memory }
    }

    fn consult_ctx(question: String) -> TriggerContext {
        TriggerContext {
            preview: Some(question),
            ..Default::default()
        }
    }

    // ── Consultation ──────────────────────────────────────────────────────────

    /// One agent asks another a question and waits for the answer.
    pub async fn start_consultation(
        &self,
        from_agent: &str,
        to_agent: &str,
        user_id: &str,
        question: &str,
        context: Option<&str>,
    ) -> Result<(Conversation, String), String> {
        let conversation = self
            .store
            .create_conversation(
                user_id,
                from_agent,
                &[from_agent.to_string(), to_agent.to_string()],
                ConversationType::Consultation,
                question,
                serde_json::json!({"context": context}),
                None,
            )
            .map_err(|e| e.to_string())?;
        self.store
            .add_conversation_message(
                &conversation.id,
                from_agent,
                "question",
                question,
                serde_json::json!({}),
            )
            .map_err(|e| e.to_string())?;

        let prompt = match context {
            Some(context) => format!("{question}\n\nContext: {context}"),
            None => question.to_string(),
        };
        let outcome = self
            .loop_
            .run(to_agent, Trigger::Consultation, Self::consult_ctx(prompt), None)
            .await?;
        let answer = if outcome.final_thought.is_empty() {
            "(no answer)".to_string()
        } else {
            outcome.final_thought
        };

        self.store
            .add_conversation_message(
                &conversation.id,
                to_agent,
                "response",
                &answer,
                serde_json::json!({}),
            )
            .map_err(|e| e.to_string())?;
        self.store
            .complete_conversation(&conversation.id, ConversationStatus::Completed, Some(&answer))
            .map_err(|e| e.to_string())?;
        Ok((conversation, answer))
    }

    // ── Synchronous consensus ─────────────────────────────────────────────────

    /// Every voter runs in parallel; the first integer in each answer selects
    /// an option (1-based); majority wins.
    pub async fn request_consensus(
        &self,
        initiator: &str,
        voters: &[String],
        user_id: &str,
        topic: &str,
        options: &[String],
    ) -> Result<ConsensusResult, String> {
        if options.len() < 2 {
            return Err("consensus needs at least two options".to_string());
        }
        let conversation = self
            .store
            .create_conversation(
                user_id,
                initiator,
                voters,
                ConversationType::Consensus,
                topic,
                serde_json::json!({"options": options}),
                None,
            )
            .map_err(|e| e.to_string())?;

        let listing = options
            .iter()
            .enumerate()
            .map(|(i, option)| format!("{}. {option}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");
        let instruction = format!(
            "Vote on: {topic}\nOptions:\n{listing}\nRespond with the option number followed by \
             a one-sentence reason."
        );

        let mut join_set = tokio::task::JoinSet::new();
        for voter in voters {
            let loop_ = Arc::clone(&self.loop_);
            let voter = voter.clone();
            let instruction = instruction.clone();
            join_set.spawn(async move {
                let outcome = loop_
                    .run(&voter, Trigger::Consultation, Self::consult_ctx(instruction), None)
                    .await;
                (voter, outcome)
            });
        }

        let mut tallies: HashMap<String, usize> = HashMap::new();
        while let Some(joined) = join_set.join_next().await {
            let Ok((voter, outcome)) = joined else { continue };
            let answer = match outcome {
                Ok(outcome) => outcome.final_thought,
                Err(e) => {
                    warn!("voter {voter} failed: {e}");
                    continue;
                }
            };
            let choice = first_integer(&answer)
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| options.get(i))
                .cloned();
            self.store
                .add_conversation_message(
                    &conversation.id,
                    &voter,
                    "vote",
                    &answer,
                    serde_json::json!({"choice": choice}),
                )
                .map_err(|e| e.to_string())?;
            if let Some(choice) = choice {
                *tallies.entry(choice).or_default() += 1;
            }
        }

        let winner = majority(&tallies);
        let result_text = match &winner {
            Some(winner) => format!("{winner} ({:?})", tallies),
            None => "no majority".to_string(),
        };
        self.store
            .add_conversation_message(
                &conversation.id,
                initiator,
                "result",
                &result_text,
                serde_json::json!({"tallies": tallies}),
            )
            .map_err(|e| e.to_string())?;
        self.store
            .complete_conversation(
                &conversation.id,
                ConversationStatus::Completed,
                winner.as_deref(),
            )
            .map_err(|e| e.to_string())?;

        Ok(ConsensusResult {
            conversation_id: conversation.id,
            winner,
            tallies,
        })
    }

    // ── Async consensus ───────────────────────────────────────────────────────

    /// Fire-and-forget votes with a deadline.  Returns the conversation and
    /// the vote task handles (callers may drop them; finalization is driven
    /// by the last vote in or by [`Self::check_async_consensus`] after the
    /// deadline).
    pub fn request_async_consensus(
        &self,
        initiator: &str,
        voters: &[String],
        user_id: &str,
        topic: &str,
        options: &[String],
        deadline_minutes: i64,
    ) -> Result<(Conversation, Vec<JoinHandle<()>>), String> {
        if options.len() < 2 {
            return Err("consensus needs at least two options".to_string());
        }
        let deadline = (Utc::now() + chrono::Duration::minutes(deadline_minutes)).to_rfc3339();
        let conversation = self
            .store
            .create_conversation(
                user_id,
                initiator,
                voters,
                ConversationType::AsyncConsensus,
                topic,
                serde_json::json!({"options": options, "expected_votes": voters.len()}),
                Some(&deadline),
            )
            .map_err(|e| e.to_string())?;

        let listing = options
            .iter()
            .enumerate()
            .map(|(i, option)| format!("{}. {option}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");

        let mut handles = Vec::new();
        for voter in voters {
            let loop_ = Arc::clone(&self.loop_);
            let store = self.store.clone();
            let voter = voter.clone();
            let conversation_id = conversation.id.clone();
            let instruction = format!(
                "Vote on: {topic}\nOptions:\n{listing}\nRespond with the option number and a \
                 short reason."
            );
            handles.push(tokio::spawn(async move {
                let outcome = loop_
                    .run(&voter, Trigger::Consultation, Self::consult_ctx(instruction), None)
                    .await;
                let answer = match outcome {
                    Ok(outcome) => outcome.final_thought,
                    Err(e) => {
                        warn!("async voter {voter} failed: {e}");
                        return;
                    }
                };
                if let Err(e) = store.add_conversation_message(
                    &conversation_id,
                    &voter,
                    "vote",
                    &answer,
                    serde_json::json!({}),
                ) {
                    warn!("async vote write failed: {e}");
                    return;
                }
                let _ = finalize_async_consensus(&store, &conversation_id);
            }));
        }
        Ok((conversation, handles))
    }

    /// Single-writer finalization: completes the conversation when all votes
    /// are in or the deadline has passed.  Majority of normalized text votes.
    pub fn check_async_consensus(&self, conversation_id: &str) -> Result<bool, String> {
        finalize_async_consensus(&self.store, conversation_id)
    }

    // ── Conflict resolution ───────────────────────────────────────────────────

    /// One rebuttal round: each position owner sees the other positions and
    /// must defend or reply CONCEDE.  Any concession hands the win to the
    /// remaining position; a full stand-off escalates or goes to a human.
    pub async fn resolve_conflict(
        &self,
        initiator: &str,
        user_id: &str,
        topic: &str,
        positions: &[(String, String)],
        escalate_to: Option<&str>,
    ) -> Result<ConflictResult, String> {
        if positions.len() < 2 {
            return Err("conflict resolution needs at least two positions".to_string());
        }
        let participant_ids: Vec<String> =
            positions.iter().map(|(agent, _)| agent.clone()).collect();
        let conversation = self
            .store
            .create_conversation(
                user_id,
                initiator,
                &participant_ids,
                ConversationType::ConflictResolution,
                topic,
                serde_json::json!({"positions": positions.iter().map(|(a, p)| serde_json::json!({"agent": a, "position": p})).collect::<Vec<_>>()}),
                None,
            )
            .map_err(|e| e.to_string())?;

        let mut conceded: Vec<usize> = Vec::new();
        for (index, (agent, position)) in positions.iter().enumerate() {
            let others = positions
                .iter()
                .enumerate()
                .filter(|(other, _)| *other != index)
                .map(|(_, (other_agent, other_position))| {
                    format!("- {other_agent}: {other_position}")
                })
                .collect::<Vec<_>>()
                .join("\n");
            let prompt = format!(
                "Conflict on: {topic}\nYour position: {position}\nOther positions:\n{others}\n\
                 Either defend your position in one paragraph, or reply with exactly CONCEDE \
                 if the others convinced you."
            );
            let outcome = self
                .loop_
                .run(agent, Trigger::Consultation, Self::consult_ctx(prompt), None)
                .await;
            let answer = outcome.map(|o| o.final_thought).unwrap_or_default();
            let conceding = answer.trim().to_uppercase().starts_with("CONCEDE");
            self.store
                .add_conversation_message(
                    &conversation.id,
                    agent,
                    "response",
                    &answer,
                    serde_json::json!({"conceded": conceding}),
                )
                .map_err(|e| e.to_string())?;
            if conceding {
                conceded.push(index);
            }
        }

        let standing: Vec<&(String, String)> = positions
            .iter()
            .enumerate()
            .filter(|(index, _)| !conceded.contains(index))
            .map(|(_, p)| p)
            .collect();

        let result = if !conceded.is_empty() && standing.len() == 1 {
            let winner = standing[0].1.clone();
            self.store
                .complete_conversation(
                    &conversation.id,
                    ConversationStatus::Completed,
                    Some(&winner),
                )
                .map_err(|e| e.to_string())?;
            ConflictResult {
                conversation_id: conversation.id,
                outcome: "resolved".to_string(),
                winning_position: Some(winner),
            }
        } else if let Some(arbiter) = escalate_to {
            let listing = positions
                .iter()
                .map(|(agent, position)| format!("- {agent}: {position}"))
                .collect::<Vec<_>>()
                .join("\n");
            let prompt = format!(
                "You are arbitrating a conflict on: {topic}\nPositions:\n{listing}\nPick the \
                 strongest position and restate it in one sentence."
            );
            let decision = self
                .loop_
                .run(arbiter, Trigger::Consultation, Self::consult_ctx(prompt), None)
                .await
                .map(|o| o.final_thought)
                .unwrap_or_default();
            self.store
                .complete_conversation(
                    &conversation.id,
                    ConversationStatus::Completed,
                    Some(&decision),
                )
                .map_err(|e| e.to_string())?;
            ConflictResult {
                conversation_id: conversation.id,
                outcome: "escalated".to_string(),
                winning_position: Some(decision),
            }
        } else {
            self.store
                .complete_conversation(
                    &conversation.id,
                    ConversationStatus::Failed,
                    Some("needs_human"),
                )
                .map_err(|e| e.to_string())?;
            ConflictResult {
                conversation_id: conversation.id,
                outcome: "needs_human".to_string(),
                winning_position: None,
            }
        };
        Ok(result)
    }

    // ── Knowledge propagation ─────────────────────────────────────────────────

    /// Share a learning with peer agents.  When `tags` name skill categories,
    /// only peers holding one of those skills receive it.  Returns the number
    /// of peers reached.
    pub async fn propagate_knowledge(
        &self,
        source_agent: &str,
        user_id: &str,
        learning: &str,
        tags: &[String],
        importance: f64,
    ) -> Result<usize, String> {
        let peers = self
            .store
            .list_active_agents_for_user(user_id)
            .map_err(|e| e.to_string())?;
        let skill_filter: Vec<SkillCategory> = tags
            .iter()
            .filter_map(|tag| SkillCategory::parse(tag))
            .collect();

        let mut reached = 0;
        for peer in peers.iter().filter(|p| p.id != source_agent) {
            if !skill_filter.is_empty() {
                let peer_skills = self.store.list_skills(&peer.id).unwrap_or_default();
                let holds_any = peer_skills
                    .iter()
                    .any(|skill| skill_filter.contains(&skill.category));
                if !holds_any {
                    continue;
                }
            }
            let entry = MemoryEntry {
                id: String::new(),
                agent_id: peer.id.clone(),
                memory_type: MemoryType::SharedLearning,
                content: learning.to_string(),
                summary: None,
                importance: importance.clamp(0.0, 1.0),
                valence: 0.0,
                related_entity: Some(source_agent.to_string()),
                session_id: None,
                access_count: 0,
                expires_at: None,
                tags: tags.to_vec(),
                score: 0.0,
                created_at: String::new(),
            };
            match self.memory.store(entry).await {
                Ok(_) => reached += 1,
                Err(e) => warn!("knowledge propagation to {} failed: {e}", peer.id),
            }
        }
        Ok(reached)
    }

    // ── Read APIs ─────────────────────────────────────────────────────────────

    pub fn conversations_for(&self, agent_id: &str) -> Result<Vec<Conversation>, String> {
        self.store
            .list_conversations_for_agent(agent_id)
            .map_err(|e| e.to_string())
    }

    pub fn conversation_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ConversationMessage>, String> {
        self.store
            .list_conversation_messages(conversation_id)
            .map_err(|e| e.to_string())
    }

    pub fn consensus_result(&self, conversation_id: &str) -> Result<Option<String>, String> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .map_err(|e| e.to_string())?;
        Ok(conversation.result)
    }
}

/// Finalize an async consensus conversation when all votes are in or the
/// deadline has passed.  Returns `true` once the conversation is no longer
/// active.
fn finalize_async_consensus(store: &Store, conversation_id: &str) -> Result<bool, String> {
    let conversation = store
        .get_conversation(conversation_id)
        .map_err(|e| e.to_string())?;
    if conversation.status != ConversationStatus::Active {
        return Ok(true); // already finalized
    }
    let expected = conversation
        .metadata
        .get("expected_votes")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(conversation.participant_ids.len() as u64);
    let votes = store.count_votes(conversation_id).map_err(|e| e.to_string())?;
    let deadline_passed = conversation
        .deadline
        .as_deref()
        .is_some_and(|deadline| deadline < Utc::now().to_rfc3339().as_str());
    if (votes as u64) < expected && !deadline_passed {
        return Ok(false);
    }

    let options: Vec<String> = conversation
        .metadata
        .get("options")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    let mut tallies: HashMap<String, usize> = HashMap::new();
    for message in store
        .list_conversation_messages(conversation_id)
        .map_err(|e| e.to_string())?
    {
        if message.message_type != "vote" {
            continue;
        }
        if let Some(choice) = first_integer(&message.content)
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| options.get(i))
        {
            *tallies.entry(choice.clone()).or_default() += 1;
        }
    }
    let winner = majority(&tallies);
    store
        .complete_conversation(
            conversation_id,
            ConversationStatus::Completed,
            winner.as_deref(),
        )
        .map_err(|e| e.to_string())?;
    Ok(true)
}

/// First integer in a free-text vote.
fn first_integer(text: &str) -> Option<usize> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn majority(tallies: &HashMap<String, usize>) -> Option<String> {
    let total: usize = tallies.values().sum();
    tallies
        .iter()
        .max_by_key(|(_, count)| **count)
        .filter(|(_, count)| **count * 2 > total)
        .map(|(option, _)| option.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::loop_::test_support::ScriptedRouter;
    use crate::ai::types::AiResponse;
    use crate::channels::ChannelManager;
    use crate::channels::manager::test_support::RecordingChannel;
    use crate::config::{BudgetConfig, LoopConfig};
    use crate::memory::SqliteMemoryStore;
    use crate::services::{
        ApprovalService, CostTracker, MasterNotificationService, ReflectionService,
    };
    use crate::store::agents::AgenticProfile;
    use crate::tools::ToolRegistry;

    fn fixture(
        responses: Vec<AiResponse>,
        agent_names: &[&str],
    ) -> (Arc<CollaborationProtocol>, Store, Vec<String>, Arc<SqliteMemoryStore>) {
        let store = Store::in_memory().unwrap();
        let memory = Arc::new(SqliteMemoryStore::in_memory().unwrap());
        let registry = Arc::new(ToolRegistry::new());

        let mut channels = ChannelManager::new();
        channels.register(Arc::new(RecordingChannel::new("email")));
        let notifier = Arc::new(MasterNotificationService::new(
            store.clone(),
            Arc::new(channels),
            None,
        ));
        let approvals = ApprovalService::new(store.clone(), Arc::clone(&notifier), None);
        let reflection = ReflectionService::new(store.clone(), memory.clone());
        let cost = CostTracker::new(store.clone(), notifier, None, BudgetConfig::default());

        let loop_ = Arc::new(AgentReasoningLoop::new(
            store.clone(),
            memory.clone(),
            ScriptedRouter::new(responses),
            registry,
            approvals,
            reflection,
            cost,
            LoopConfig::default(),
        ));

        let mut ids = Vec::new();
        for name in agent_names {
            let profile = AgenticProfile::new("u1", *name);
            store.insert_agent(&profile).unwrap();
            ids.push(profile.id);
        }
        (
            Arc::new(CollaborationProtocol::new(store.clone(), loop_, memory.clone())),
            store,
            ids,
            memory,
        )
    }

    #[tokio::test]
    async fn consultation_records_question_and_answer() {
        let (protocol, store, ids, _) = fixture(
            vec![AiResponse::text("Use the cheaper vendor; quality is equal.")],
            &["Asker", "Expert"],
        );

        let (conversation, answer) = protocol
            .start_consultation(&ids[0], &ids[1], "u1", "Which vendor should we pick?", None)
            .await
            .unwrap();
        assert!(answer.contains("cheaper vendor"));

        let messages = store.list_conversation_messages(&conversation.id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].message_type, "question");
        assert_eq!(messages[1].message_type, "response");
        assert_eq!(
            store.get_conversation(&conversation.id).unwrap().status,
            ConversationStatus::Completed
        );
    }

    #[tokio::test]
    async fn consensus_majority_wins() {
        // Votes 1, 1, 2 in some order — majority is option 1 either way.
        let (protocol, _, ids, _) = fixture(
            vec![
                AiResponse::text("1 — cheaper and proven"),
                AiResponse::text("1 because of support quality"),
                AiResponse::text("2, the newer stack"),
            ],
            &["Initiator", "V1", "V2", "V3"],
        );

        let result = protocol
            .request_consensus(
                &ids[0],
                &ids[1..].to_vec(),
                "u1",
                "Which platform?",
                &["Platform A".to_string(), "Platform B".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(result.winner.as_deref(), Some("Platform A"));
        assert_eq!(result.tallies["Platform A"], 2);
        assert_eq!(
            protocol.consensus_result(&result.conversation_id).unwrap().as_deref(),
            Some("Platform A")
        );
    }

    #[tokio::test]
    async fn consensus_without_majority_has_no_winner() {
        let (protocol, _, ids, _) = fixture(
            vec![AiResponse::text("1"), AiResponse::text("2")],
            &["Initiator", "V1", "V2"],
        );
        let result = protocol
            .request_consensus(
                &ids[0],
                &ids[1..].to_vec(),
                "u1",
                "Tie?",
                &["A".to_string(), "B".to_string()],
            )
            .await
            .unwrap();
        assert!(result.winner.is_none());
    }

    #[tokio::test]
    async fn async_consensus_finalizes_when_all_votes_arrive() {
        let (protocol, store, ids, _) = fixture(
            vec![AiResponse::text("1 fine"), AiResponse::text("1 agreed")],
            &["Initiator", "V1", "V2"],
        );

        let (conversation, handles) = protocol
            .request_async_consensus(
                &ids[0],
                &ids[1..].to_vec(),
                "u1",
                "Adopt the proposal?",
                &["Yes".to_string(), "No".to_string()],
                60,
            )
            .unwrap();
        for handle in handles {
            handle.await.unwrap();
        }

        let finalized = store.get_conversation(&conversation.id).unwrap();
        assert_eq!(finalized.status, ConversationStatus::Completed);
        assert_eq!(finalized.result.as_deref(), Some("Yes"));
    }

    #[tokio::test]
    async fn conflict_concession_resolves() {
        let (protocol, _, ids, _) = fixture(
            vec![
                AiResponse::text("I stand by weekly releases; they derisk deploys."),
                AiResponse::text("CONCEDE"),
            ],
            &["Initiator", "A", "B"],
        );

        let result = protocol
            .resolve_conflict(
                &ids[0],
                "u1",
                "Release cadence",
                &[
                    (ids[1].clone(), "weekly releases".to_string()),
                    (ids[2].clone(), "monthly releases".to_string()),
                ],
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.outcome, "resolved");
        assert_eq!(result.winning_position.as_deref(), Some("weekly releases"));
    }

    #[tokio::test]
    async fn conflict_standoff_without_arbiter_needs_human() {
        let (protocol, store, ids, _) = fixture(
            vec![
                AiResponse::text("Weekly is right because of risk."),
                AiResponse::text("Monthly is right because of cost."),
            ],
            &["Initiator", "A", "B"],
        );

        let result = protocol
            .resolve_conflict(
                &ids[0],
                "u1",
                "Release cadence",
                &[
                    (ids[1].clone(), "weekly".to_string()),
                    (ids[2].clone(), "monthly".to_string()),
                ],
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.outcome, "needs_human");
        assert_eq!(
            store.get_conversation(&result.conversation_id).unwrap().status,
            ConversationStatus::Failed
        );
    }

    #[tokio::test]
    async fn conflict_standoff_with_arbiter_escalates() {
        let (protocol, _, ids, _) = fixture(
            vec![
                AiResponse::text("Weekly, final answer."),
                AiResponse::text("Monthly, final answer."),
                AiResponse::text("Weekly releases are the stronger position."),
            ],
            &["Initiator", "A", "B", "Arbiter"],
        );

        let result = protocol
            .resolve_conflict(
                &ids[0],
                "u1",
                "Release cadence",
                &[
                    (ids[1].clone(), "weekly".to_string()),
                    (ids[2].clone(), "monthly".to_string()),
                ],
                Some(&ids[3]),
            )
            .await
            .unwrap();
        assert_eq!(result.outcome, "escalated");
        assert!(result.winning_position.unwrap().contains("Weekly"));
    }

    #[tokio::test]
    async fn knowledge_propagation_respects_skill_filter() {
        let (protocol, store, ids, memory) =
            fixture(vec![], &["Source", "AnalysisPeer", "PlainPeer"]);
        // Give only one peer the analysis skill.
        store
            .get_or_create_skill(&ids[1], SkillCategory::Analysis)
            .unwrap();

        let reached = protocol
            .propagate_knowledge(
                &ids[0],
                "u1",
                "Vendor X quotes are negotiable in Q4",
                &["analysis".to_string()],
                0.8,
            )
            .await
            .unwrap();
        assert_eq!(reached, 1, "only the analysis-skilled peer");

        let found = memory.recall(&ids[1], "vendor negotiable", 5).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(matches!(found[0].memory_type, MemoryType::SharedLearning));

        let missed = memory.recall(&ids[2], "vendor negotiable", 5).await.unwrap();
        assert!(missed.is_empty());
    }

    #[test]
    fn vote_parsing() {
        assert_eq!(first_integer("1 — best option"), Some(1));
        assert_eq!(first_integer("I pick option 2 here"), Some(2));
        assert_eq!(first_integer("no number"), None);
    }
}
