use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default context window assumed until the backend reports otherwise.
pub const DEFAULT_MAX_TOKENS: u64 = 200_000;

/// Token usage as reported on the wire by a single API turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

impl TokenUsage {
    /// Tokens occupying the context window: prompt input plus everything
    /// served from or written to the prompt cache.
    pub fn context_window(&self) -> u64 {
        self.input_tokens + self.cache_creation_input_tokens + self.cache_read_input_tokens
    }

    pub fn is_empty(&self) -> bool {
        *self == TokenUsage::default()
    }
}

/// Cumulative usage persisted in the metadata snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_creation_tokens: u64,
    #[serde(default)]
    pub cost_usd: f64,
}

impl UsageTotals {
    pub fn accumulate(&mut self, usage: &TokenUsage) {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.cache_read_tokens += usage.cache_read_input_tokens;
        self.cache_creation_tokens += usage.cache_creation_input_tokens;
    }
}

/// Current context window occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextWindow {
    #[serde(default)]
    pub current_tokens: u64,
    #[serde(default)]
    pub max_tokens: u64,
}

impl Default for ContextWindow {
    fn default() -> Self {
        Self {
            current_tokens: 0,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Per-chat metadata snapshot, overwritten wholesale on each write.
///
/// Regenerable from the message stream; the history file stays
/// authoritative if the two ever disagree after a crash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMetadata {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub backend_type: Option<String>,
    #[serde(default)]
    pub permission_mode: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    #[serde(default)]
    pub context: ContextWindow,
    #[serde(default)]
    pub usage: UsageTotals,
}

impl Default for ChatMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            model: None,
            backend_type: None,
            permission_mode: None,
            created_at: now,
            last_active_at: now,
            context: ContextWindow::default(),
            usage: UsageTotals::default(),
        }
    }
}

impl ChatMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an assistant turn: model name (first one wins) and current
    /// context window occupancy.
    pub fn observe_assistant(&mut self, model: Option<&str>, usage: Option<&TokenUsage>) {
        if self.model.is_none() {
            self.model = model.map(str::to_string);
        }
        if let Some(usage) = usage {
            self.context.current_tokens = usage.context_window() + usage.output_tokens;
        }
        self.last_active_at = Utc::now();
    }

    /// Record a turn-result summary: cumulative token totals and the
    /// backend-reported running cost.
    pub fn observe_result(&mut self, usage: Option<&TokenUsage>, total_cost_usd: Option<f64>) {
        if let Some(usage) = usage {
            self.usage.accumulate(usage);
        }
        if let Some(cost) = total_cost_usd {
            self.usage.cost_usd = cost;
        }
        self.last_active_at = Utc::now();
    }
}
