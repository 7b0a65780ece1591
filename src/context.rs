//! # Context assembly (retrieval + history + budget)
//!
//! Builds the bounded context for one language-model call: the static
//! system prompt, the retrieved catalog passages (best match first), and
//! the prior conversation rendered one `"<Role>: <content>"` line per
//! message in original order.
//!
//! The whole context is kept under a token budget, counted with
//! `tiktoken_rs::cl100k_base`. When retrieval plus history exceeds the
//! budget, history is truncated from the **oldest** end first; the most
//! recent turns are retained and passages are never dropped. Grounding
//! wins over long memory; that tradeoff is pinned by tests.

use tiktoken_rs::cl100k_base;
use tracing::debug;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::models::Message;
use crate::vector_index::CatalogIndex;

/// The assembled, budget-bounded prompt context for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledContext {
    /// Retrieved catalog passages, best match first.
    pub passages: Vec<String>,
    /// Prior conversation, one `"<Role>: <content>"` line per message.
    pub formatted_history: String,
    /// Static instructions from the template.
    pub system_prompt: String,
}

/// Render history as `"<Role>: <content>"` lines, preserving order.
///
/// Messages with a role outside the schema are skipped (they cannot be
/// attributed in the prompt).
pub fn format_history<'a, I>(messages: I) -> String
where
    I: IntoIterator<Item = &'a Message>,
{
    let mut lines = Vec::new();
    for message in messages {
        match message.role() {
            Ok(role) => lines.push(format!("{}: {}", role.label(), message.content)),
            Err(err) => debug!("skipping history line: {err}"),
        }
    }
    lines.join("\n")
}

pub struct ContextAssembler {
    system_prompt: String,
    max_tokens: usize,
}

impl ContextAssembler {
    pub fn new(system_prompt: String, max_tokens: usize) -> Self {
        Self {
            system_prompt,
            max_tokens,
        }
    }

    /// Assemble the context for `query` against one conversation.
    ///
    /// Embeds the query, retrieves the `k` best passages from `index`,
    /// formats `history`, and enforces the token budget by ejecting the
    /// oldest history messages until everything fits.
    pub async fn assemble(
        &self,
        index: &CatalogIndex,
        embedder: &dyn EmbeddingProvider,
        history: &[Message],
        query: &str,
        k: usize,
    ) -> Result<AssembledContext> {
        let query_vector = embedder.embed(query).await?;
        let passages: Vec<String> = index
            .query(&query_vector, k)?
            .into_iter()
            .map(|(chunk, _)| chunk.text.clone())
            .collect();

        let bpe = cl100k_base().unwrap();
        let count = |text: &str| bpe.encode_with_special_tokens(text).len();

        let fixed_tokens = count(&self.system_prompt)
            + passages.iter().map(|p| count(p)).sum::<usize>()
            + count(query);

        let mut kept: Vec<&Message> = history.iter().collect();
        loop {
            let formatted_history = format_history(kept.iter().copied());
            let total = fixed_tokens + count(&formatted_history);
            if total <= self.max_tokens || kept.is_empty() {
                if total > self.max_tokens {
                    debug!("context exceeds budget even with empty history ({total} tokens)");
                }
                return Ok(AssembledContext {
                    passages,
                    formatted_history,
                    system_prompt: self.system_prompt.clone(),
                });
            }
            kept.remove(0);
            debug!("ejecting oldest history message to fit context budget");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageRole;
    use chrono::Utc;

    fn message(role: MessageRole, content: &str) -> Message {
        Message {
            id: None,
            conversation_id: 1,
            role: role.as_str().to_string(),
            content: content.to_string(),
            image_path: None,
            created_at: Utc::now().naive_utc(),
        }
    }

    #[test]
    fn history_renders_role_labels_in_order() {
        let history = vec![
            message(MessageRole::User, "Salut"),
            message(MessageRole::Assistant, "Bonjour"),
            message(MessageRole::System, "Regles"),
        ];

        let formatted = format_history(&history);
        assert_eq!(formatted, "User: Salut\nAssistant: Bonjour\nSystem: Regles");
    }

    #[test]
    fn history_skips_unknown_roles() {
        let mut odd = message(MessageRole::User, "ok");
        odd.role = "operator".to_string();
        let history = vec![odd, message(MessageRole::Assistant, "Bonjour")];

        assert_eq!(format_history(&history), "Assistant: Bonjour");
    }

    #[tokio::test]
    async fn budget_pressure_drops_oldest_history_first_never_passages() {
        use crate::vector_index::{CatalogIndex, IndexedChunk};

        struct FixedEmbedder;
        impl EmbeddingProvider for FixedEmbedder {
            fn dimensions(&self) -> usize {
                3
            }
            fn embed<'a>(
                &'a self,
                _text: &'a str,
            ) -> crate::embedding::BoxFuture<'a, Result<Vec<f32>>> {
                Box::pin(async { Ok(vec![1.0, 0.0, 0.0]) })
            }
            fn embed_batch<'a>(
                &'a self,
                texts: &'a [String],
            ) -> crate::embedding::BoxFuture<'a, Result<Vec<Vec<f32>>>> {
                Box::pin(async move { Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect()) })
            }
        }

        let index = CatalogIndex::build(
            3,
            vec![(
                IndexedChunk {
                    text: "Returns are accepted within 30 days with the original invoice."
                        .to_string(),
                    source_id: "returns.pdf".to_string(),
                },
                vec![1.0, 0.0, 0.0],
            )],
        )
        .unwrap();

        let history = vec![
            message(MessageRole::User, "This is a long opening question about a squeaky door."),
            message(MessageRole::Assistant, "An equally long first answer about hinges."),
            message(MessageRole::User, "Last follow-up"),
        ];

        let assembler = ContextAssembler::new("Help the client.".to_string(), 40);
        let context = assembler
            .assemble(&index, &FixedEmbedder, &history, "door", 1)
            .await
            .unwrap();

        // Passages survive; the oldest history line goes first.
        assert_eq!(context.passages.len(), 1);
        assert!(!context.formatted_history.contains("squeaky"));
        assert!(context.formatted_history.contains("Last follow-up"));
    }
}
