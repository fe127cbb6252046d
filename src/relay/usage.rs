use rustc_hash::FxHashSet;

use crate::observability::token_counter::TokenEstimator;
use crate::protocol::openai_chat::{ChatCompletionChunk, Usage};
use crate::protocol::xai::derived_completion_tokens;

/// Estimated tokens charged per tool call on top of the text estimate.
pub const TOOL_CALL_TOKEN_OVERHEAD: i64 = 7;

/// Where the final usage numbers came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageSource {
    Provider,
    Estimated,
}

impl UsageSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            UsageSource::Provider => "provider",
            UsageSource::Estimated => "estimated",
        }
    }
}

/// Usage returned to the caller at the end of a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalUsage {
    pub usage: Usage,
    pub source: UsageSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UsageRegime {
    Estimated,
    ProviderSupplied {
        prompt_tokens: i64,
        total_tokens: i64,
    },
}

/// Streaming usage state machine.
///
/// Starts in the estimated regime and latches into the provider-supplied
/// regime on the first frame that carries usage. Later usage frames overwrite
/// prompt/total; frames without usage leave the state alone.
#[derive(Debug, Clone)]
pub struct UsageReconciler {
    regime: UsageRegime,
}

impl UsageReconciler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            regime: UsageRegime::Estimated,
        }
    }

    /// Fold one frame's optional usage into the state.
    pub fn observe(&mut self, usage: Option<&Usage>) {
        if let Some(usage) = usage {
            self.regime = UsageRegime::ProviderSupplied {
                prompt_tokens: usage.prompt_tokens,
                total_tokens: usage.total_tokens,
            };
        }
    }

    /// Current canonical completion count, zero until usage has been seen.
    #[must_use]
    pub fn completion_tokens(&self) -> i64 {
        match self.regime {
            UsageRegime::ProviderSupplied {
                prompt_tokens,
                total_tokens,
            } => derived_completion_tokens(prompt_tokens, total_tokens),
            UsageRegime::Estimated => 0,
        }
    }

    /// Produce the final usage at stream close.
    ///
    /// The estimator is only consulted in the estimated regime.
    #[must_use]
    pub fn finish(
        &self,
        text: &TextAccumulator,
        request_prompt_tokens: i64,
        model: &str,
        estimator: &dyn TokenEstimator,
    ) -> FinalUsage {
        match self.regime {
            UsageRegime::ProviderSupplied {
                prompt_tokens,
                total_tokens,
            } => FinalUsage {
                usage: Usage::from_counts(
                    prompt_tokens,
                    derived_completion_tokens(prompt_tokens, total_tokens),
                    total_tokens,
                ),
                source: UsageSource::Provider,
            },
            UsageRegime::Estimated => {
                let text_tokens = estimator.estimate(text.text(), model);
                let tool_calls = i64::try_from(text.tool_call_count()).unwrap_or(i64::MAX);
                let completion_tokens = text_tokens
                    .wrapping_add(TOOL_CALL_TOKEN_OVERHEAD.wrapping_mul(tool_calls));
                FinalUsage {
                    usage: Usage::from_counts(
                        request_prompt_tokens,
                        completion_tokens,
                        request_prompt_tokens.wrapping_add(text_tokens),
                    ),
                    source: UsageSource::Estimated,
                }
            }
        }
    }
}

impl Default for UsageReconciler {
    fn default() -> Self {
        Self::new()
    }
}

/// Append-only buffer of streamed output text plus the number of distinct
/// tool calls, used as estimation input.
#[derive(Debug, Default)]
pub struct TextAccumulator {
    text: String,
    tool_calls: FxHashSet<(u32, u32)>,
}

impl TextAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the textual parts of one chunk.
    ///
    /// Content, reasoning content, tool names and argument fragments all count
    /// as output text. A tool call is identified by its `(choice, index)` pair
    /// so fragments of one call are counted once.
    pub fn push_chunk(&mut self, chunk: &ChatCompletionChunk) {
        for choice in &chunk.choices {
            let delta = &choice.delta;
            if let Some(content) = delta.content.as_deref() {
                self.text.push_str(content);
            }
            if let Some(reasoning) = delta.reasoning_content.as_deref() {
                self.text.push_str(reasoning);
            }
            let Some(tool_calls) = delta.tool_calls.as_deref() else {
                continue;
            };
            for call in tool_calls {
                self.tool_calls.insert((choice.index, call.index));
                if let Some(function) = call.function.as_ref() {
                    if let Some(name) = function.name.as_deref() {
                        self.text.push_str(name);
                    }
                    if let Some(arguments) = function.arguments.as_deref() {
                        self.text.push_str(arguments);
                    }
                }
            }
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn tool_call_count(&self) -> usize {
        self.tool_calls.len()
    }
}
