//! # Chat orchestration
//!
//! Ties retrieval, history, and the static prompt into one LLM call per
//! turn, and writes the result back into the conversation store.
//!
//! [`ChatEngine`] is the composition root: it owns the provider client,
//! the embedding provider, the index cache, the context assembler, and the
//! store. Turn handling follows one sequence:
//!
//! 1. take the per-conversation lock (turns on one conversation never
//!    interleave; different conversations run concurrently),
//! 2. reject closed conversations up front,
//! 3. realize the catalog index through the cache,
//! 4. assemble the bounded context,
//! 5. call the chat model with bounded retry and a deadline,
//! 6. append the user message and the reply in **one** transaction:
//!    a failed turn appends nothing, so a clean retry is always possible.
//!
//! Configuration problems surface immediately; transient provider
//! failures are retried and then surfaced as
//! [`EngineError::ProviderUnavailable`]; store failures are never retried.

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs,
    },
};
use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogLoader, DocumentSource};
use crate::config::GuichetConfig;
use crate::context::{AssembledContext, ContextAssembler, format_history};
use crate::embedding::{EmbeddingProvider, OpenAiEmbedder};
use crate::error::{EngineError, Result};
use crate::index_cache::IndexCache;
use crate::models::{Conversation, ConversationStatus, MessageRole};
use crate::provider::{self, RetryPolicy};
use crate::store::ConversationStore;
use crate::template::ChatTemplate;
use crate::vector_index::CatalogIndex;

/// The retrieval-augmented conversation engine.
pub struct ChatEngine {
    config: GuichetConfig,
    client: Client<OpenAIConfig>,
    template: ChatTemplate,
    assembler: ContextAssembler,
    embedder: Arc<dyn EmbeddingProvider>,
    cache: Arc<IndexCache>,
    store: Mutex<ConversationStore>,
    locks: StdMutex<HashMap<i32, Arc<Mutex<()>>>>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl std::fmt::Debug for ChatEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatEngine").finish_non_exhaustive()
    }
}

impl ChatEngine {
    /// Build an engine from configuration, loading documents from the
    /// configured catalog directory.
    pub fn new(config: GuichetConfig, template: ChatTemplate) -> Result<Self> {
        let source = Arc::new(CatalogLoader::new(&config.catalog_dir));
        Self::with_source(config, template, source)
    }

    /// Build an engine with an explicit document source.
    pub fn with_source(
        config: GuichetConfig,
        template: ChatTemplate,
        source: Arc<dyn DocumentSource>,
    ) -> Result<Self> {
        config.validate()?;

        let client = provider::create_client(&config);
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(OpenAiEmbedder::new(&config)?);
        let cache = Arc::new(IndexCache::new(source, embedder.clone(), &config));
        let store = ConversationStore::open(&config.session_db_url)?;
        let assembler =
            ContextAssembler::new(template.system_prompt.clone(), config.context_budget());

        Ok(Self {
            retry: RetryPolicy::from_config(&config),
            timeout: config.provider_timeout(),
            client,
            template,
            assembler,
            embedder,
            cache,
            store: Mutex::new(store),
            locks: StdMutex::new(HashMap::new()),
            config,
        })
    }

    /// Mutual-exclusion scope for one conversation id.
    fn conversation_lock(&self, conversation_id: i32) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("conversation lock registry poisoned");
        locks.entry(conversation_id).or_default().clone()
    }

    /// Resolve a conversation reference or start a fresh conversation.
    pub async fn start_or_continue(
        &self,
        user_id: Option<i32>,
        conversation_ref: Option<i32>,
        default_client_name: &str,
    ) -> Result<Conversation> {
        self.store
            .lock()
            .await
            .get_or_create(user_id, conversation_ref, default_client_name)
    }

    /// Fetch a conversation by id.
    pub async fn conversation(&self, conversation_id: i32) -> Result<Conversation> {
        self.store.lock().await.get(conversation_id)
    }

    /// Realize the catalog index ahead of the first turn.
    pub async fn prewarm(&self) -> Result<Arc<CatalogIndex>> {
        self.cache.get_or_build(&self.config.api_key).await
    }

    /// Discard the cached and persisted index and build a fresh one.
    pub async fn reindex(&self) -> Result<Arc<CatalogIndex>> {
        self.cache.rebuild(&self.config.api_key).await
    }

    /// Handle one assisted turn and return the assistant's reply.
    pub async fn handle_turn(
        &self,
        conversation_id: i32,
        user_message: &str,
        image_ref: Option<&str>,
    ) -> Result<String> {
        if user_message.trim().is_empty() {
            return Err(EngineError::InvalidRecord(
                "message content must not be empty".to_string(),
            ));
        }

        let lock = self.conversation_lock(conversation_id);
        let _turn = lock.lock().await;

        let (conversation, history) = {
            let mut store = self.store.lock().await;
            let conversation = store.get(conversation_id)?;
            if conversation.status()? == ConversationStatus::Closed {
                return Err(EngineError::ConversationClosed(conversation_id));
            }
            let history = store.history(conversation_id)?;
            (conversation, history)
        };

        let index = self.cache.get_or_build(&self.config.api_key).await?;
        let context = self
            .assembler
            .assemble(
                index.as_ref(),
                self.embedder.as_ref(),
                &history,
                user_message,
                self.config.retrieval_top_k,
            )
            .await?;

        let decorated = self.template.decorate(user_message);
        let reply = self.complete_turn(&context, &decorated).await?;

        {
            let mut store = self.store.lock().await;
            store.append_exchange(conversation_id, user_message, image_ref, &reply)?;
            if conversation.status()? == ConversationStatus::New {
                store.set_status(conversation_id, ConversationStatus::InProgress)?;
            }
        }

        debug!("turn completed for conversation {conversation_id}");
        Ok(reply)
    }

    /// Record uploaded images and run an assisted turn over them.
    ///
    /// One user message is appended per image as it arrives; the images
    /// are real client content and stay recorded even if the assisted
    /// reply afterwards fails.
    pub async fn post_images(&self, conversation_id: i32, image_refs: &[String]) -> Result<String> {
        if image_refs.is_empty() {
            return Err(EngineError::InvalidRecord(
                "at least one image reference is required".to_string(),
            ));
        }

        let lock = self.conversation_lock(conversation_id);
        let _turn = lock.lock().await;

        {
            let mut store = self.store.lock().await;
            for image_ref in image_refs {
                let name = Path::new(image_ref)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(image_ref);
                store.append_message(
                    conversation_id,
                    MessageRole::User,
                    &format!("Image received: {name}"),
                    Some(image_ref),
                )?;
            }
        }

        let history = self.store.lock().await.history(conversation_id)?;
        let index = self.cache.get_or_build(&self.config.api_key).await?;
        let context = self
            .assembler
            .assemble(
                index.as_ref(),
                self.embedder.as_ref(),
                &history,
                "Photos sent by the client for support",
                self.config.retrieval_top_k,
            )
            .await?;

        let reply = self
            .complete_turn(
                &context,
                "The client sent photos. Review the conversation and give first advice.",
            )
            .await?;

        self.store.lock().await.append_message(
            conversation_id,
            MessageRole::Assistant,
            &reply,
            None,
        )?;
        Ok(reply)
    }

    /// Close a conversation, producing a hand-off summary.
    ///
    /// A conversation without substantive user/assistant content is
    /// deleted instead, and `None` is returned. Summary generation is
    /// best-effort: when the provider is unreachable the fallback summary
    /// is stored and the conversation still closes.
    pub async fn close(
        &self,
        conversation_id: i32,
        fallback_summary: Option<&str>,
    ) -> Result<Option<String>> {
        let lock = self.conversation_lock(conversation_id);
        let _turn = lock.lock().await;

        let substantive = {
            let mut store = self.store.lock().await;
            store.get(conversation_id)?;
            store.has_substantive_messages(conversation_id)?
        };

        if !substantive {
            self.store.lock().await.delete(conversation_id)?;
            info!("deleted empty conversation {conversation_id}");
            return Ok(None);
        }

        let history = self.store.lock().await.history(conversation_id)?;
        let transcript = format_history(&history);
        let prompt = format!(
            "{transcript}\n\nWrite a summary of the whole conversation with the client, \
             for hand-off to a human support technician. List the important points so \
             they can act without rereading the full exchange."
        );

        let summary = match self.complete(&self.template.system_prompt, &prompt).await {
            Ok(summary) => summary,
            Err(err) => {
                warn!("summary generation failed, using fallback: {err}");
                fallback_summary
                    .unwrap_or("Conversation closed by the client.")
                    .to_string()
            }
        };

        {
            let mut store = self.store.lock().await;
            store.set_summary(conversation_id, &summary)?;
            store.set_status(conversation_id, ConversationStatus::Closed)?;
        }
        info!("closed conversation {conversation_id}");
        Ok(Some(summary))
    }

    /// Update the client display name on a conversation.
    pub async fn rename_client(&self, conversation_id: i32, name: &str) -> Result<Conversation> {
        self.store.lock().await.rename_client(conversation_id, name)
    }

    /// One turn's completion: context plus the user message, flattened the
    /// way the support prompt expects it.
    async fn complete_turn(&self, context: &AssembledContext, user_message: &str) -> Result<String> {
        let payload = format!(
            "{}\nContext from catalog:\n{}\nUser: {}",
            context.formatted_history,
            context.passages.join("\n"),
            user_message
        );
        self.complete(&context.system_prompt, &payload).await
    }

    /// Call the chat model with bounded retry and a per-call deadline.
    async fn complete(&self, system_prompt: &str, user_content: &str) -> Result<String> {
        provider::with_retries(&self.retry, "chat completion", || async {
            let messages = vec![
                ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                    content: ChatCompletionRequestSystemMessageContent::Text(
                        system_prompt.to_string(),
                    ),
                    name: None,
                }),
                ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                    content: ChatCompletionRequestUserMessageContent::Text(
                        user_content.to_string(),
                    ),
                    name: None,
                }),
            ];

            let request = CreateChatCompletionRequestArgs::default()
                .max_tokens(u32::from(self.config.response_max_tokens))
                .model(self.config.model.clone())
                .messages(messages)
                .build()
                .map_err(provider::classify_error)?;

            debug!("sending chat completion request");
            let response = provider::within_deadline(
                self.timeout,
                "chat completion",
                self.client.chat().create(request),
            )
            .await?;

            response
                .choices
                .into_iter()
                .find_map(|choice| choice.message.content)
                .filter(|content| !content.is_empty())
                .ok_or_else(|| {
                    EngineError::ProviderUnavailable(
                        "provider returned an empty completion".to_string(),
                    )
                })
        })
        .await
    }
}
