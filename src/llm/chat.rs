//! OpenAI-compatible chat-completions client. HTTP I/O runs on a dedicated
//! worker thread so the caller can keep polling the cancel token; a
//! cancelled call abandons the in-flight attempt.

use std::collections::HashMap;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::cancel::CancelToken;
use crate::config::{resolve_api_key, Settings};
use crate::error::{llm_error, LlmError, Result};
use crate::llm::LlmService;
use crate::prompt::PromptPair;

const CANCEL_POLL: Duration = Duration::from_millis(100);

pub struct ChatClient {
    agent: ureq::Agent,
    api_base: String,
    api_key: String,
    model: String,
    attempt_timeout: Duration,
}

impl ChatClient {
    /// Build a client from settings, resolving the bearer token from the
    /// supplied map or the environment. Missing credentials fail here, at
    /// pipeline start, not mid-run.
    pub fn from_settings(
        settings: &Settings,
        api_keys: Option<&HashMap<String, String>>,
    ) -> Result<Self> {
        let api_key = resolve_api_key(api_keys)?;
        let attempt_timeout = Duration::from_secs(settings.attempt_timeout_secs);
        Ok(Self {
            agent: ureq::builder().timeout(attempt_timeout).build(),
            api_base: settings.api_base.clone(),
            api_key,
            model: settings.model.clone(),
            attempt_timeout,
        })
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    fn build_payload(&self, prompt: &PromptPair) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user},
            ],
            "temperature": 0,
            "top_p": 1,
            "response_format": {"type": "json_object"},
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

fn send_request(
    agent: ureq::Agent,
    url: String,
    api_key: String,
    payload: serde_json::Value,
) -> std::result::Result<String, LlmError> {
    match agent
        .post(&url)
        .set("authorization", &format!("Bearer {api_key}"))
        .set("content-type", "application/json")
        .send_json(payload)
    {
        Ok(resp) => {
            let parsed: ChatResponse = resp.into_json().map_err(|e| LlmError::Transport {
                message: format!("malformed response envelope: {e}"),
                location: snafu::Location::default(),
            })?;
            Ok(parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .unwrap_or_default())
        }
        Err(ureq::Error::Status(code, resp)) => {
            let body = resp.into_string().unwrap_or_default();
            if code == 401 || code == 403 {
                return llm_error::AuthSnafu {
                    message: format!("status {code}: {body}"),
                }
                .fail();
            }
            // 429 and 5xx are transport-class; the retry wrapper decides
            llm_error::TransportSnafu {
                message: format!("status {code}: {body}"),
            }
            .fail()
        }
        Err(ureq::Error::Transport(t)) => llm_error::TransportSnafu {
            message: t.to_string(),
        }
        .fail(),
    }
}

impl LlmService for ChatClient {
    fn complete(
        &self,
        prompt: &PromptPair,
        cancel: &CancelToken,
    ) -> std::result::Result<String, LlmError> {
        if cancel.is_cancelled() {
            return llm_error::CancelledSnafu.fail();
        }

        let payload = self.build_payload(prompt);
        let agent = self.agent.clone();
        let url = self.api_base.clone();
        let api_key = self.api_key.clone();

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(send_request(agent, url, api_key, payload));
        });

        // small grace on top of the agent timeout so ureq reports first
        let deadline = Instant::now() + self.attempt_timeout + Duration::from_secs(5);
        loop {
            if cancel.is_cancelled() {
                // the worker is abandoned; its response is dropped
                return llm_error::CancelledSnafu.fail();
            }
            match rx.recv_timeout(CANCEL_POLL) {
                Ok(result) => return result,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if Instant::now() >= deadline {
                        return llm_error::TransportSnafu {
                            message: format!(
                                "attempt exceeded {}s timeout",
                                self.attempt_timeout.as_secs()
                            ),
                        }
                        .fail();
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return llm_error::TransportSnafu {
                        message: "request worker terminated unexpectedly".to_string(),
                    }
                    .fail()
                }
            }
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}
