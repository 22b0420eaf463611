pub mod chat;
pub mod salvage;

pub use chat::ChatClient;

use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::error::{llm_error, LlmError};
use crate::prompt::PromptPair;

/// The LLM seam. The shipped implementation is [`ChatClient`]; tests drive
/// the planner with scripted implementations.
pub trait LlmService: Send + Sync {
    /// One request/response attempt. Implementations enforce their own
    /// per-attempt timeout and honor the cancel token while waiting.
    fn complete(&self, prompt: &PromptPair, cancel: &CancelToken) -> Result<String, LlmError>;

    fn model(&self) -> &str;
}

/// Parsed response plus what it took to get there.
#[derive(Debug, Clone)]
pub struct JsonOutcome {
    pub value: serde_json::Value,
    /// True when the raw response only parsed after salvage fixups.
    pub salvage_applied: bool,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Number of re-requests after the first attempt.
    pub max_retries: u32,
    pub backoff_cap: Duration,
    pub total_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_cap_secs: u64, total_timeout_secs: u64) -> Self {
        Self {
            max_retries,
            backoff_cap: Duration::from_secs(backoff_cap_secs),
            total_timeout: Duration::from_secs(total_timeout_secs),
        }
    }
}

/// Call the model until a JSON object parses or the budget runs out.
///
/// Re-requests on three failure classes: transport, empty body, and JSON
/// parse. Salvage is tried after a parse failure and before the next network
/// attempt. Auth failures and cancellation are terminal.
pub fn call_with_json_retry(
    service: &dyn LlmService,
    prompt: &PromptPair,
    policy: &RetryPolicy,
    cancel: &CancelToken,
) -> Result<JsonOutcome, LlmError> {
    let started = Instant::now();
    let mut attempts: u32 = 0;
    let mut last_failure = String::new();
    let mut last_was_transport = false;

    loop {
        if cancel.is_cancelled() {
            return llm_error::CancelledSnafu.fail();
        }
        attempts += 1;

        match service.complete(prompt, cancel) {
            Ok(body) => {
                let trimmed = body.trim();
                if trimmed.is_empty() {
                    last_failure = "empty response body".to_string();
                    last_was_transport = false;
                    tracing::warn!(attempt = attempts, "LLM returned an empty body");
                } else {
                    match serde_json::from_str::<serde_json::Value>(trimmed) {
                        Ok(value) => {
                            return Ok(JsonOutcome {
                                value,
                                salvage_applied: false,
                                attempts,
                            })
                        }
                        Err(parse_err) => {
                            let repaired = salvage::salvage(trimmed);
                            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&repaired)
                            {
                                tracing::warn!(
                                    attempt = attempts,
                                    "response parsed only after JSON salvage"
                                );
                                return Ok(JsonOutcome {
                                    value,
                                    salvage_applied: true,
                                    attempts,
                                });
                            }
                            last_failure = parse_err.to_string();
                            last_was_transport = false;
                            tracing::warn!(attempt = attempts, "unparseable response: {parse_err}");
                        }
                    }
                }
            }
            Err(e @ LlmError::Auth { .. }) => return Err(e),
            Err(e @ LlmError::Cancelled { .. }) => return Err(e),
            Err(LlmError::Transport { message, .. }) => {
                last_failure = message;
                last_was_transport = true;
                tracing::warn!(attempt = attempts, "transport failure: {last_failure}");
            }
            Err(e @ LlmError::Format { .. }) => return Err(e),
        }

        if attempts > policy.max_retries || started.elapsed() >= policy.total_timeout {
            // the exhausted class keeps its identity: transport stays
            // transport, everything else is a format (parse) exhaustion
            if last_was_transport {
                return llm_error::TransportSnafu {
                    message: format!("{last_failure} (after {attempts} attempts)"),
                }
                .fail();
            }
            return llm_error::FormatSnafu {
                attempts,
                message: last_failure,
            }
            .fail();
        }

        sleep_with_backoff(attempts, policy, cancel)?;
    }
}

/// Exponential backoff with a little jitter, capped, polled against the
/// cancel token in 100ms slices.
fn sleep_with_backoff(
    attempt: u32,
    policy: &RetryPolicy,
    cancel: &CancelToken,
) -> Result<(), LlmError> {
    let base = Duration::from_secs(1 << attempt.min(6));
    let jitter = Duration::from_millis(pseudo_jitter_millis());
    let delay = (base + jitter).min(policy.backoff_cap);

    let deadline = Instant::now() + delay;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return llm_error::CancelledSnafu.fail();
        }
        std::thread::sleep(Duration::from_millis(100).min(remaining));
    }
}

fn pseudo_jitter_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 % 500)
        .unwrap_or(0)
}
