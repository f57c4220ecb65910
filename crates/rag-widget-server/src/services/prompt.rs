use thiserror::Error;
use tracing::debug;

use crate::database::models::ScoredChunk;
use crate::document::tokenizer;
use crate::llm::ChatMessage;

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("context overflow: {0}")]
    ContextOverflow(String),
}

#[derive(Debug, Clone)]
pub struct ComposedPrompt {
    pub messages: Vec<ChatMessage>,
    pub included_chunks: usize,
    pub dropped_chunks: usize,
    pub dropped_history: usize,
}

/// Builds the messages list under a token budget
/// `B = context_window - max_tokens - safety_margin`:
/// system prompt first, then the retrieved-context block (trimmed from the
/// lowest-score end to fit B/2), then bounded history, then the query last.
pub struct PromptComposer {
    history_turns: usize,
    safety_margin: usize,
}

impl PromptComposer {
    pub fn new(history_turns: usize, safety_margin: usize) -> Self {
        Self {
            history_turns,
            safety_margin,
        }
    }

    pub fn compose(
        &self,
        system_prompt: &str,
        chunks: &[ScoredChunk],
        history: &[ChatMessage],
        query: &str,
        model: &str,
        context_window: usize,
        max_tokens: u32,
    ) -> Result<ComposedPrompt, PromptError> {
        let budget = context_window
            .saturating_sub(max_tokens as usize)
            .saturating_sub(self.safety_margin);

        let system_tokens = tokenizer::count_tokens(system_prompt, model);
        let query_tokens = tokenizer::count_tokens(query, model);
        let base = system_tokens + query_tokens;

        if base > budget {
            return Err(PromptError::ContextOverflow(format!(
                "system prompt and query need {base} tokens, budget is {budget}"
            )));
        }

        // Context block: half the budget, trimmed from the low-score end.
        // chunks arrive sorted by score descending.
        let context_budget = budget / 2;
        let blocks: Vec<(String, usize)> = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                let block = format!("[C{}:{}] {}", i + 1, chunk.chunk_id, chunk.excerpt);
                let tokens = tokenizer::count_tokens(&block, model);
                (block, tokens)
            })
            .collect();

        let mut included = blocks.len();
        let mut context_tokens: usize = blocks.iter().map(|(_, t)| t).sum();
        while included > 1 && context_tokens > context_budget {
            included -= 1;
            context_tokens -= blocks[included].1;
        }

        // A single oversized chunk survives the half-budget rule as long as
        // chunk + query + system still fit the full budget.
        if included == 1 && base + context_tokens > budget {
            return Err(PromptError::ContextOverflow(format!(
                "a single retrieved chunk plus the query needs {} tokens, budget is {budget}",
                base + context_tokens
            )));
        }

        let context_message = if included > 0 {
            let mut body = String::from("Context:\n");
            for (block, _) in blocks.iter().take(included) {
                body.push_str(block);
                body.push('\n');
            }
            let tokens = tokenizer::count_tokens(&body, model);
            Some((ChatMessage::system(body), tokens))
        } else {
            None
        };
        let context_total = context_message.as_ref().map(|(_, t)| *t).unwrap_or(0);

        // History: most recent turns only, then drop oldest until it fits.
        let max_messages = self.history_turns * 2;
        let recent: Vec<&ChatMessage> = history
            .iter()
            .skip(history.len().saturating_sub(max_messages))
            .collect();

        let history_token_counts: Vec<usize> = recent
            .iter()
            .map(|m| tokenizer::count_tokens(&m.content, model))
            .collect();
        let mut history_start = 0usize;
        let mut history_tokens: usize = history_token_counts.iter().sum();
        while history_start < recent.len()
            && base + context_total + history_tokens > budget
        {
            history_tokens -= history_token_counts[history_start];
            history_start += 1;
        }

        let mut messages = Vec::with_capacity(3 + recent.len());
        messages.push(ChatMessage::system(system_prompt));
        if let Some((context, _)) = context_message {
            messages.push(context);
        }
        for message in &recent[history_start..] {
            messages.push((*message).clone());
        }
        messages.push(ChatMessage::user(query));

        let dropped_chunks = blocks.len() - included;
        let dropped_history = history.len() - (recent.len() - history_start);
        if dropped_chunks > 0 || dropped_history > 0 {
            debug!(dropped_chunks, dropped_history, "prompt trimmed to budget");
        }

        Ok(ComposedPrompt {
            messages,
            included_chunks: included,
            dropped_chunks,
            dropped_history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn chunk(score: f32, excerpt: &str) -> ScoredChunk {
        ScoredChunk {
            chunk_id: Uuid::new_v4(),
            excerpt: excerpt.to_string(),
            heading: None,
            publish_date: None,
            score,
        }
    }

    fn turns(n: usize) -> Vec<ChatMessage> {
        (0..n)
            .flat_map(|i| {
                vec![
                    ChatMessage::user(format!("question number {i}")),
                    ChatMessage::assistant(format!("answer number {i}")),
                ]
            })
            .collect()
    }

    #[test]
    fn message_order_is_system_context_history_query() {
        let composer = PromptComposer::new(5, 100);
        let chunks = vec![chunk(0.9, "most relevant"), chunk(0.5, "less relevant")];
        let history = turns(2);

        let prompt = composer
            .compose(
                "You answer questions.",
                &chunks,
                &history,
                "what is alpha?",
                "gpt-4o-mini",
                8000,
                512,
            )
            .unwrap();

        assert_eq!(prompt.messages[0].role, "system");
        assert_eq!(prompt.messages[0].content, "You answer questions.");
        assert!(prompt.messages[1].content.starts_with("Context:"));
        assert!(prompt.messages[1].content.contains("[C1:"));
        assert_eq!(prompt.messages.last().unwrap().content, "what is alpha?");
        assert_eq!(prompt.messages.last().unwrap().role, "user");
        assert_eq!(prompt.included_chunks, 2);
    }

    #[test]
    fn empty_retrieval_composes_without_context_block() {
        let composer = PromptComposer::new(5, 100);
        let prompt = composer
            .compose("sys", &[], &[], "query", "gpt-4o-mini", 8000, 512)
            .unwrap();

        assert_eq!(prompt.messages.len(), 2);
        assert_eq!(prompt.included_chunks, 0);
    }

    #[test]
    fn low_score_chunks_are_dropped_first() {
        let composer = PromptComposer::new(5, 10);
        let chunks = vec![
            chunk(0.9, &"high score words ".repeat(80)),
            chunk(0.3, &"low score words ".repeat(80)),
        ];

        // Budget small enough that only one chunk fits in half of it.
        let prompt = composer
            .compose("sys", &chunks, &[], "query", "gpt-4o-mini", 700, 100)
            .unwrap();

        assert_eq!(prompt.included_chunks, 1);
        assert_eq!(prompt.dropped_chunks, 1);
        assert!(prompt.messages[1].content.contains("high score"));
        assert!(!prompt.messages[1].content.contains("low score"));
    }

    #[test]
    fn history_drops_oldest_first() {
        let composer = PromptComposer::new(5, 10);
        let history: Vec<ChatMessage> = (0..5)
            .flat_map(|i| {
                vec![
                    ChatMessage::user(format!("question number {i} {}", "filler ".repeat(25))),
                    ChatMessage::assistant(format!("answer number {i} {}", "filler ".repeat(25))),
                ]
            })
            .collect();

        let prompt = composer
            .compose("sys", &[], &history, "query", "gpt-4o-mini", 200, 50)
            .unwrap();

        assert!(prompt.dropped_history >= 4);
        // The newest exchange survives longest, the oldest goes first.
        let contents: Vec<&str> = prompt
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert!(contents.iter().any(|c| c.contains("number 4")));
        assert!(!contents.iter().any(|c| c.contains("number 0")));
    }

    #[test]
    fn history_is_capped_to_five_turns() {
        let composer = PromptComposer::new(5, 10);
        let history = turns(10);

        let prompt = composer
            .compose("sys", &[], &history, "query", "gpt-4o-mini", 100000, 50)
            .unwrap();

        // system + 10 history messages + query
        assert_eq!(prompt.messages.len(), 12);
        assert!(!prompt
            .messages
            .iter()
            .any(|m| m.content.contains("number 0")));
    }

    #[test]
    fn oversized_query_overflows() {
        let composer = PromptComposer::new(5, 10);
        let err = composer
            .compose(
                "sys",
                &[],
                &[],
                &"very long query ".repeat(200),
                "gpt-4o-mini",
                300,
                100,
            )
            .unwrap_err();
        assert!(matches!(err, PromptError::ContextOverflow(_)));
    }

    #[test]
    fn single_giant_chunk_overflows() {
        let composer = PromptComposer::new(5, 10);
        let chunks = vec![chunk(0.9, &"immense chunk text ".repeat(500))];
        let err = composer
            .compose("sys", &chunks, &[], "query", "gpt-4o-mini", 800, 100)
            .unwrap_err();
        assert!(matches!(err, PromptError::ContextOverflow(_)));
    }
}
