use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Context window used for models missing from the catalog.
pub const DEFAULT_CONTEXT_LIMIT: usize = 8192;

/// USD per one million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pricing {
    pub input: f64,
    pub output: f64,
}

impl Pricing {
    pub const FREE: Pricing = Pricing {
        input: 0.0,
        output: 0.0,
    };

    pub const fn per_million(input: f64, output: f64) -> Self {
        Self { input, output }
    }

    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input
            + (output_tokens as f64 / 1_000_000.0) * self.output
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    pub context_limit: usize,
    #[serde(default)]
    pub pricing: Pricing,
}

const BUILTIN_MODELS: &[(&str, usize, Pricing)] = &[
    ("gpt-4o", 128_000, Pricing::per_million(2.5, 10.0)),
    ("gpt-4-turbo", 128_000, Pricing::per_million(10.0, 30.0)),
    ("gpt-4", 8192, Pricing::per_million(30.0, 60.0)),
    ("gpt-3.5-turbo", 16_385, Pricing::per_million(0.5, 1.5)),
    ("claude-3-5-sonnet-20241022", 200_000, Pricing::per_million(3.0, 15.0)),
    ("claude-3-haiku-20240307", 200_000, Pricing::per_million(0.25, 1.25)),
    ("llama-3.3-70b-versatile", 32_768, Pricing::per_million(0.59, 0.79)),
    // Local models
    ("qwen2.5-coder", 32_768, Pricing::FREE),
    ("deepseek-coder", 16_384, Pricing::FREE),
    ("llama3.2", 8192, Pricing::FREE),
];

/// Per-model context limits and pricing. Unknown models degrade to
/// [`DEFAULT_CONTEXT_LIMIT`] and zero cost.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: HashMap<String, ModelSpec>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModelCatalog {
    pub fn builtin() -> Self {
        let models = BUILTIN_MODELS
            .iter()
            .map(|(name, context_limit, pricing)| {
                (
                    name.to_string(),
                    ModelSpec {
                        context_limit: *context_limit,
                        pricing: *pricing,
                    },
                )
            })
            .collect();
        Self { models }
    }

    /// Add or replace an entry, e.g. from the config file.
    pub fn insert(&mut self, model: impl Into<String>, spec: ModelSpec) {
        self.models.insert(model.into(), spec);
    }

    pub fn with_overrides(mut self, overrides: &HashMap<String, ModelSpec>) -> Self {
        for (name, spec) in overrides {
            self.insert(name.clone(), *spec);
        }
        self
    }

    pub fn context_limit(&self, model: &str) -> usize {
        match self.models.get(model) {
            Some(spec) => spec.context_limit,
            None => {
                tracing::debug!(model, "no context limit for model, using default");
                DEFAULT_CONTEXT_LIMIT
            }
        }
    }

    pub fn pricing(&self, model: &str) -> Pricing {
        match self.models.get(model) {
            Some(spec) => spec.pricing,
            None => {
                tracing::debug!(model, "no pricing for model, treating as free");
                Pricing::FREE
            }
        }
    }
}
