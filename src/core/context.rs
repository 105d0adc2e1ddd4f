use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::models::ModelCatalog;
use super::tokens::TokenCounter;
use super::{ChatMessage, Role};

/// Trimming starts once the context grows past this share of the window.
pub const TRIM_THRESHOLD: f64 = 0.85;

/// Share of non-system entries kept by a trim (newest first).
pub const TRIM_KEEP_RATIO: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextEntry {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub token_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Provider-reported usage for one round-trip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost: f64,
    pub request_count: u64,
    pub context_tokens: usize,
    pub remaining_requests: Option<u64>,
    pub max_requests: Option<u64>,
}

/// Read-only view handed to the UI and to `/tokens`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    #[serde(flatten)]
    pub session: SessionMetrics,
    pub max_context_length: usize,
    pub model: String,
    pub provider: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContextUsage {
    pub used: usize,
    pub max: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimReport {
    pub removed: usize,
    pub remaining_entries: usize,
    pub context_tokens: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextExport {
    pub entries: Vec<ContextEntry>,
    pub metrics: SessionMetrics,
    pub model: String,
    pub provider: String,
    pub exported_at: DateTime<Utc>,
}

/// Rolling conversation window for one session, bounded by the active
/// model's context limit.
///
/// Owns its token counter. Call [`dispose`](Self::dispose) at end of life;
/// dropping the tracker releases the counter as well.
pub struct ContextTracker {
    entries: Vec<ContextEntry>,
    metrics: SessionMetrics,
    model: String,
    provider: String,
    max_context_length: usize,
    counter: Box<dyn TokenCounter>,
    catalog: ModelCatalog,
    last_trim: Option<TrimReport>,
    disposed: bool,
}

impl ContextTracker {
    pub fn new(
        model: impl Into<String>,
        provider: impl Into<String>,
        counter: Box<dyn TokenCounter>,
        catalog: ModelCatalog,
    ) -> Self {
        let model = model.into();
        let max_context_length = catalog.context_limit(&model);
        Self {
            entries: Vec::new(),
            metrics: SessionMetrics::default(),
            model,
            provider: provider.into(),
            max_context_length,
            counter,
            catalog,
            last_trim: None,
            disposed: false,
        }
    }

    /// Start with a request quota; `remaining` begins at `max`.
    pub fn with_max_requests(mut self, max_requests: u64) -> Self {
        self.metrics.max_requests = Some(max_requests);
        self.metrics.remaining_requests = Some(max_requests);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    /// Append an entry and apply the trim policy.
    ///
    /// Only `context_tokens` moves here; the input/output totals come from
    /// [`record_usage`](Self::record_usage).
    pub fn add_message(&mut self, role: Role, content: impl Into<String>) -> ContextEntry {
        let content = content.into();
        let token_count = self.counter.count_tokens(&content, &self.model);
        let entry = ContextEntry {
            id: Uuid::new_v4(),
            role,
            content,
            token_count,
            timestamp: Utc::now(),
        };
        self.entries.push(entry.clone());
        self.metrics.context_tokens += token_count;
        self.trim_if_needed();
        entry
    }

    pub fn record_usage(&mut self, usage: TokenUsage) {
        self.metrics.total_input_tokens += usage.input_tokens;
        self.metrics.total_output_tokens += usage.output_tokens;
        self.metrics.request_count += 1;

        let pricing = self.catalog.pricing(&self.model);
        self.metrics.total_cost += pricing.cost(usage.input_tokens, usage.output_tokens);

        if let Some(remaining) = self.metrics.remaining_requests.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }

        tracing::info!(
            model = %self.model,
            tokens = usage.total_tokens,
            total_cost = self.metrics.total_cost,
            "token usage recorded"
        );
    }

    /// Overwrite rate-limit state with provider-reported values.
    pub fn update_rate_limit(&mut self, remaining: u64, max: u64) {
        self.metrics.remaining_requests = Some(remaining);
        self.metrics.max_requests = Some(max);
    }

    pub fn context_messages(&self) -> Vec<ChatMessage> {
        self.entries
            .iter()
            .map(|e| ChatMessage::new(e.role, e.content.clone()))
            .collect()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            session: self.metrics.clone(),
            max_context_length: self.max_context_length,
            model: self.model.clone(),
            provider: self.provider.clone(),
        }
    }

    pub fn context_usage(&self) -> ContextUsage {
        let used = self.metrics.context_tokens;
        let max = self.max_context_length;
        let percentage = if max == 0 {
            0.0
        } else {
            used as f64 / max as f64 * 100.0
        };
        ContextUsage {
            used,
            max,
            percentage,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.metrics.remaining_requests == Some(0)
    }

    /// Drop every non-system entry.
    pub fn clear_context(&mut self) {
        self.entries.retain(|e| e.role == Role::System);
        self.recalculate_context_tokens();
        tracing::debug!(remaining = self.entries.len(), "context cleared");
    }

    /// Swap the model/provider and re-resolve the window. Entries are kept
    /// as counted; only the limit changes.
    pub fn update_model(&mut self, model: impl Into<String>, provider: impl Into<String>) {
        self.model = model.into();
        self.provider = provider.into();
        self.max_context_length = self.catalog.context_limit(&self.model);
        self.recalculate_context_tokens();
        self.trim_if_needed();
    }

    /// Last trim since the previous call, if any.
    pub fn take_trim_report(&mut self) -> Option<TrimReport> {
        self.last_trim.take()
    }

    /// Up to the ten most recent entries, each cut to 100 characters.
    pub fn summary(&self) -> String {
        if self.entries.is_empty() {
            return String::new();
        }
        let start = self.entries.len().saturating_sub(10);
        let lines: Vec<String> = self.entries[start..]
            .iter()
            .map(|e| {
                let head: String = e.content.chars().take(100).collect();
                format!("{}: {}...", e.role, head)
            })
            .collect();
        format!("Recent conversation summary:\n{}", lines.join("\n"))
    }

    pub fn export_context(&self) -> ContextExport {
        ContextExport {
            entries: self.entries.clone(),
            metrics: self.metrics.clone(),
            model: self.model.clone(),
            provider: self.provider.clone(),
            exported_at: Utc::now(),
        }
    }

    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.disposed {
            return;
        }
        self.counter.dispose();
        self.entries.clear();
        self.disposed = true;
    }

    fn recalculate_context_tokens(&mut self) {
        self.metrics.context_tokens = self.entries.iter().map(|e| e.token_count).sum();
    }

    fn trim_if_needed(&mut self) {
        let threshold = self.max_context_length as f64 * TRIM_THRESHOLD;
        if (self.metrics.context_tokens as f64) <= threshold {
            return;
        }

        let before = self.entries.len();
        let (system, rest): (Vec<ContextEntry>, Vec<ContextEntry>) = self
            .entries
            .drain(..)
            .partition(|e| e.role == Role::System);

        let keep = (rest.len() as f64 * TRIM_KEEP_RATIO).floor() as usize;
        let skip = rest.len() - keep;

        self.entries = system;
        self.entries.extend(rest.into_iter().skip(skip));
        self.recalculate_context_tokens();

        let report = TrimReport {
            removed: before - self.entries.len(),
            remaining_entries: self.entries.len(),
            context_tokens: self.metrics.context_tokens,
        };
        tracing::debug!(
            removed = report.removed,
            remaining = report.remaining_entries,
            context_tokens = report.context_tokens,
            max = self.max_context_length,
            "context trimmed"
        );
        self.last_trim = Some(report);
    }
}

impl Drop for ContextTracker {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ContextTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextTracker")
            .field("model", &self.model)
            .field("provider", &self.provider)
            .field("entries", &self.entries.len())
            .field("context_tokens", &self.metrics.context_tokens)
            .field("max_context_length", &self.max_context_length)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{ModelSpec, Pricing};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// One token per whitespace-separated word.
    #[derive(Default)]
    struct WordCounter {
        disposed: Arc<AtomicUsize>,
    }

    impl TokenCounter for WordCounter {
        fn count_tokens(&mut self, text: &str, _model: &str) -> usize {
            text.split_whitespace().count()
        }

        fn dispose(&mut self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn words(n: usize) -> String {
        vec!["w"; n].join(" ")
    }

    fn tracker(model: &str) -> ContextTracker {
        let mut catalog = ModelCatalog::builtin();
        catalog.insert(
            "tiny",
            ModelSpec {
                context_limit: 1000,
                pricing: Pricing::FREE,
            },
        );
        ContextTracker::new(model, "test", Box::new(WordCounter::default()), catalog)
    }

    #[test]
    fn add_message_counts_tokens() {
        let mut t = tracker("tiny");
        let entry = t.add_message(Role::User, "hello there world");
        assert_eq!(entry.token_count, 3);
        assert_eq!(t.metrics().session.context_tokens, 3);
        // totals are provider-reported only
        assert_eq!(t.metrics().session.total_input_tokens, 0);
    }

    #[test]
    fn trim_boundary_at_85_percent() {
        let mut t = tracker("tiny");
        t.add_message(Role::System, words(50));
        t.add_message(Role::User, words(400));
        t.add_message(Role::Assistant, words(400));
        assert_eq!(t.context_usage().used, 850);
        assert_eq!(t.entries().len(), 3);
        assert!(t.take_trim_report().is_none());

        let last = t.add_message(Role::User, "w");
        // 851 > 850: keep system + floor(3 / 2) newest non-system
        assert_eq!(t.entries().len(), 2);
        assert_eq!(t.entries()[0].role, Role::System);
        assert_eq!(t.entries()[1].id, last.id);
        assert_eq!(t.context_usage().used, 51);

        let report = t.take_trim_report().unwrap();
        assert_eq!(report.removed, 2);
        assert_eq!(report.remaining_entries, 2);
        assert_eq!(report.context_tokens, 51);
        assert!(t.take_trim_report().is_none());
    }

    #[test]
    fn single_non_system_entry_over_limit_is_dropped() {
        let mut t = tracker("tiny");
        t.add_message(Role::System, "be brief");
        t.add_message(Role::User, words(900));
        assert_eq!(t.entries().len(), 1);
        assert_eq!(t.entries()[0].role, Role::System);
        assert_eq!(t.context_usage().used, 2);
    }

    #[test]
    fn clear_preserves_system_entries() {
        let mut t = tracker("gpt-4o");
        t.add_message(Role::System, words(7));
        t.add_message(Role::System, words(5));
        for i in 0..5 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            t.add_message(role, words(10));
        }
        assert_eq!(t.entries().len(), 7);

        t.clear_context();
        assert_eq!(t.entries().len(), 2);
        assert!(t.entries().iter().all(|e| e.role == Role::System));
        assert_eq!(t.context_usage().used, 12);
    }

    #[test]
    fn cost_accrual_uses_model_pricing() {
        let mut t = tracker("gpt-4o");
        t.record_usage(TokenUsage {
            input_tokens: 1_000_000,
            output_tokens: 1_000_000,
            total_tokens: 2_000_000,
        });
        let m = t.metrics().session;
        assert_eq!(m.total_cost, 12.5);
        assert_eq!(m.request_count, 1);
        assert_eq!(m.total_input_tokens, 1_000_000);
    }

    #[test]
    fn unknown_model_uses_default_window() {
        let t = tracker("some-new-model");
        assert_eq!(t.context_usage().max, 8192);
        let mut t = t;
        t.record_usage(TokenUsage {
            input_tokens: 500,
            output_tokens: 500,
            total_tokens: 1000,
        });
        assert_eq!(t.metrics().session.total_cost, 0.0);
    }

    #[test]
    fn rate_limit_tracking() {
        let mut t = tracker("gpt-4o").with_max_requests(2);
        assert!(!t.is_rate_limited());
        t.record_usage(TokenUsage::default());
        t.record_usage(TokenUsage::default());
        assert!(t.is_rate_limited());
        t.record_usage(TokenUsage::default());
        assert_eq!(t.metrics().session.remaining_requests, Some(0));

        t.update_rate_limit(40, 50);
        assert!(!t.is_rate_limited());
        assert_eq!(t.metrics().session.max_requests, Some(50));
    }

    #[test]
    fn untracked_rate_limit_is_never_limited() {
        let mut t = tracker("gpt-4o");
        t.record_usage(TokenUsage::default());
        assert_eq!(t.metrics().session.remaining_requests, None);
        assert!(!t.is_rate_limited());
    }

    #[test]
    fn update_model_swaps_limit_then_trims() {
        let mut t = tracker("gpt-4o");
        t.add_message(Role::User, words(500));
        t.add_message(Role::Assistant, words(500));
        assert_eq!(t.context_usage().max, 128_000);

        t.update_model("tiny", "local");
        assert_eq!(t.model(), "tiny");
        assert_eq!(t.provider(), "local");
        assert_eq!(t.context_usage().max, 1000);
        assert_eq!(t.entries().len(), 1);
        assert_eq!(t.entries()[0].role, Role::Assistant);
    }

    #[test]
    fn context_messages_keep_insertion_order() {
        let mut t = tracker("gpt-4o");
        t.add_message(Role::System, "sys");
        t.add_message(Role::User, "one");
        t.add_message(Role::Assistant, "two");
        let roles: Vec<Role> = t.context_messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    }

    #[test]
    fn metrics_snapshot_is_side_effect_free() {
        let mut t = tracker("gpt-4o");
        t.add_message(Role::User, "one two");
        let a = t.metrics();
        let b = t.metrics();
        assert_eq!(a, b);
        assert_eq!(a.max_context_length, 128_000);
        assert_eq!(a.model, "gpt-4o");
    }

    #[test]
    fn export_serializes_entries() {
        let mut t = tracker("gpt-4o");
        let entry = t.add_message(Role::User, "hello");
        let json = serde_json::to_value(t.export_context()).unwrap();
        assert_eq!(json["entries"][0]["id"], entry.id.to_string());
        assert_eq!(json["entries"][0]["role"], "user");
        assert_eq!(json["entries"][0]["tokenCount"], 1);
        assert_eq!(json["model"], "gpt-4o");
    }

    #[test]
    fn summary_lists_recent_entries() {
        let mut t = tracker("gpt-4o");
        assert_eq!(t.summary(), "");
        for i in 0..12 {
            t.add_message(Role::User, format!("message {}", i));
        }
        let summary = t.summary();
        assert!(summary.starts_with("Recent conversation summary:"));
        assert!(!summary.contains("message 1..."));
        assert!(summary.contains("message 11..."));
    }

    #[test]
    fn dispose_releases_counter_once() {
        let disposed = Arc::new(AtomicUsize::new(0));
        let counter = WordCounter {
            disposed: disposed.clone(),
        };
        let t = ContextTracker::new("gpt-4o", "test", Box::new(counter), ModelCatalog::builtin());
        t.dispose();
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }
}
