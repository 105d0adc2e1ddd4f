use anyhow::{anyhow, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::settings::ProviderConfig;
use crate::core::api::{ProviderClient, StreamEvent};
use crate::core::context::{ContextTracker, MetricsSnapshot, TokenUsage, TrimReport};
use crate::core::models::ModelCatalog;
use crate::core::tokens::{estimate_tokens, TiktokenCounter};
use crate::core::usage::{UsageRecord, UsageStore};
use crate::core::Role;
use crate::error::Error;

/// Project instructions appended to the system prompt when present.
pub const PROJECT_INSTRUCTIONS_FILE: &str = "AGENTS.md";

// ── Chat Events (for UI consumption) ────────────────────────────────────

/// Events emitted by the ChatEngine for UI updates.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// A new assistant streaming message started.
    StreamStart,
    /// Content chunk received.
    ContentChunk(String),
    /// Streaming finished, final message ready.
    StreamEnd { content: String },
    /// The user interrupted the exchange; nothing was recorded.
    Cancelled,
    /// Metrics after the exchange was recorded.
    Metrics(MetricsSnapshot),
    /// Older entries were dropped to stay within the context window.
    ContextTrimmed(TrimReport),
    /// Error during streaming.
    Error(String),
}

// ── Chat Engine ─────────────────────────────────────────────────────────

/// One provider conversation: the HTTP client plus the context tracker that
/// holds its history. Moved into a task for each round-trip and handed back.
pub struct ChatEngine {
    client: Option<ProviderClient>,
    provider: String,
    tracker: ContextTracker,
    usage_store: Option<Arc<UsageStore>>,
    cancel_token: CancellationToken,
}

impl ChatEngine {
    pub fn new(provider: &ProviderConfig, model: &str, catalog: ModelCatalog) -> Self {
        let client = match ProviderClient::new(provider) {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(provider = %provider.name, error = %e, "provider client unavailable");
                None
            }
        };
        let tracker = ContextTracker::new(
            model,
            provider.name.clone(),
            Box::new(TiktokenCounter::new()),
            catalog,
        );
        Self::with_tracker(client, tracker)
    }

    /// Build around an existing tracker. The system prompt is seeded here.
    pub fn with_tracker(client: Option<ProviderClient>, mut tracker: ContextTracker) -> Self {
        let cwd = std::env::current_dir().unwrap_or_default();
        tracker.add_message(Role::System, system_prompt(&cwd));
        Self {
            client,
            provider: tracker.provider().to_string(),
            tracker,
            usage_store: None,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn set_usage_store(&mut self, store: Arc<UsageStore>) {
        self.usage_store = Some(store);
    }

    pub fn tracker(&self) -> &ContextTracker {
        &self.tracker
    }

    pub fn model(&self) -> &str {
        self.tracker.model()
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Switch model on the same provider. The conversation starts over since
    /// its token counts belong to the old model.
    pub fn set_model(&mut self, model: &str) {
        self.tracker.update_model(model, self.provider.clone());
        self.tracker.clear_context();
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Set an external cancel token (from the UI) so Esc can interrupt the exchange.
    pub fn set_cancel_token(&mut self, token: CancellationToken) {
        self.cancel_token = token;
    }

    pub fn clear(&mut self) {
        self.tracker.clear_context();
        self.cancel_token = CancellationToken::new();
    }

    pub fn dispose(self) {
        self.tracker.dispose();
    }

    /// Run one prompt through the provider and record the exchange.
    /// Emits ChatEvents to the provided sender for UI updates.
    pub async fn send_message(
        &mut self,
        prompt: &str,
        event_tx: mpsc::UnboundedSender<ChatEvent>,
    ) -> Result<()> {
        if self.tracker.is_rate_limited() {
            return Err(anyhow!(
                "Rate limit reached for {}. Wait for the window to reset.",
                self.provider
            ));
        }
        let client = self
            .client
            .clone()
            .ok_or_else(|| anyhow!("No usable provider configured for \"{}\"", self.provider))?;

        let entry = self.tracker.add_message(Role::User, prompt);
        self.report_trim(&event_tx);
        // A prompt that alone overflows the window is trimmed away with the rest
        if !self.tracker.entries().iter().any(|e| e.id == entry.id) {
            tracing::warn!(tokens = entry.token_count, model = %self.tracker.model(), "prompt exceeds context window");
            return Err(Error::Provider(anyhow!(
                "Prompt is too large for the {} context window ({} tokens, limit {})",
                self.tracker.model(),
                entry.token_count,
                self.tracker.context_usage().max
            ))
            .into());
        }

        let _ = event_tx.send(ChatEvent::StreamStart);

        let messages = self.tracker.context_messages();

        // Create a channel for stream events
        let (stream_tx, mut stream_rx) = mpsc::unbounded_channel::<StreamEvent>();

        // Forward stream events to chat events
        let event_tx_clone = event_tx.clone();
        let forward_handle = tokio::spawn(async move {
            while let Some(evt) = stream_rx.recv().await {
                let chat_evt = match evt {
                    StreamEvent::ContentChunk(c) => ChatEvent::ContentChunk(c),
                    StreamEvent::Error(e) => ChatEvent::Error(e),
                };
                let _ = event_tx_clone.send(chat_evt);
            }
        });

        let result = client
            .stream_chat(
                self.tracker.model(),
                &messages,
                Some(stream_tx),
                self.cancel_token.clone(),
            )
            .await;

        // Wait for forwarding to finish
        let _ = forward_handle.await;

        let result = result.map_err(Error::Provider)?;
        if result.cancelled {
            tracing::debug!("exchange cancelled before completion");
            let _ = event_tx.send(ChatEvent::Cancelled);
            return Ok(());
        }

        let usage = result.usage.unwrap_or_else(|| {
            let input: u64 = messages
                .iter()
                .map(|m| estimate_tokens(&m.content) as u64)
                .sum();
            let output = estimate_tokens(&result.content) as u64;
            tracing::debug!(input, output, "provider sent no usage, estimating");
            TokenUsage {
                input_tokens: input,
                output_tokens: output,
                total_tokens: input + output,
            }
        });

        let cost_before = self.tracker.metrics().session.total_cost;
        self.tracker.record_usage(usage);
        if let Some(rl) = result.rate_limit {
            self.tracker.update_rate_limit(rl.remaining, rl.limit);
        }
        self.tracker.add_message(Role::Assistant, result.content.clone());
        self.report_trim(&event_tx);

        let metrics = self.tracker.metrics();
        self.record_ledger(usage, metrics.session.total_cost - cost_before);

        let _ = event_tx.send(ChatEvent::StreamEnd {
            content: result.content,
        });
        let _ = event_tx.send(ChatEvent::Metrics(metrics));

        Ok(())
    }

    fn report_trim(&mut self, event_tx: &mpsc::UnboundedSender<ChatEvent>) {
        if let Some(report) = self.tracker.take_trim_report() {
            let _ = event_tx.send(ChatEvent::ContextTrimmed(report));
        }
    }

    fn record_ledger(&self, usage: TokenUsage, cost: f64) {
        let Some(store) = &self.usage_store else {
            return;
        };
        let record = UsageRecord {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.total_tokens,
            cost,
            ..UsageRecord::new(&self.provider, self.tracker.model())
        };
        if let Err(e) = store.record(&record) {
            tracing::warn!(error = %e, "failed to write usage ledger");
        }
    }
}

fn system_prompt(cwd: &Path) -> String {
    let base = format!(
        "You are codemonkey, a coding assistant running in a terminal.\n\
         Working directory: {}\n\n\
         Answer with working code first and keep explanations short. \
         When editing existing code, show only the parts that change.",
        cwd.display()
    );

    let instructions = cwd.join(PROJECT_INSTRUCTIONS_FILE);
    match std::fs::read_to_string(&instructions) {
        Ok(extra) if !extra.trim().is_empty() => {
            format!("{}\n\n--- {} ---\n{}", base, PROJECT_INSTRUCTIONS_FILE, extra)
        }
        _ => base,
    }
}
