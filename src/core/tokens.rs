use std::collections::HashMap;
use tiktoken_rs::CoreBPE;

/// Token estimator used by the context tracker.
///
/// Implementations may hold expensive resources (encoder tables); `dispose`
/// releases them.
pub trait TokenCounter: Send {
    fn count_tokens(&mut self, text: &str, model: &str) -> usize;

    fn dispose(&mut self) {}
}

/// Roughly four characters per token for English text.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Character-based counter used when no encoder is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicCounter;

impl TokenCounter for HeuristicCounter {
    fn count_tokens(&mut self, text: &str, _model: &str) -> usize {
        estimate_tokens(text)
    }
}

/// BPE counter backed by tiktoken encodings, cached per model name.
///
/// Models tiktoken doesn't know (Claude, Llama, ...) use `cl100k_base`.
#[derive(Default)]
pub struct TiktokenCounter {
    encoders: HashMap<String, CoreBPE>,
}

impl TiktokenCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn encoder(&mut self, model: &str) -> Option<&CoreBPE> {
        if !self.encoders.contains_key(model) {
            let bpe = tiktoken_rs::get_bpe_from_model(model)
                .or_else(|_| tiktoken_rs::cl100k_base())
                .map_err(|e| tracing::warn!(model, error = %e, "tokenizer unavailable"))
                .ok()?;
            self.encoders.insert(model.to_string(), bpe);
        }
        self.encoders.get(model)
    }

    pub fn cached_encoders(&self) -> usize {
        self.encoders.len()
    }
}

impl TokenCounter for TiktokenCounter {
    fn count_tokens(&mut self, text: &str, model: &str) -> usize {
        match self.encoder(model) {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => estimate_tokens(text),
        }
    }

    fn dispose(&mut self) {
        self.encoders.clear();
    }
}
