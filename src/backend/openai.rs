//! OpenAI-compatible chat completion backend.
//!
//! Holds the running conversation: system prompt with host facts and the
//! required plan format, the user's task, then alternating assistant plans
//! and execution feedback. Multi-command plans are drained one step at a
//! time through an internal queue so the loop validates and executes each
//! command individually.

use super::{format_step_feedback, PlanDecision, PlanSource, Proposal};
use crate::config::BackendConfig;
use crate::context::HostContext;
use crate::error::{BackendError, PlanError, Result};
use crate::plan::{self, StepRecord};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Default)]
struct ConversationState {
    messages: Vec<ChatMessage>,
    pending: VecDeque<Proposal>,
    /// How many history records have already been turned into feedback
    /// messages.
    reported: usize,
}

pub struct OpenAiPlanSource {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    host: HostContext,
    state: Mutex<ConversationState>,
}

impl OpenAiPlanSource {
    pub fn new(
        config: &BackendConfig,
        host: HostContext,
        query: &str,
    ) -> std::result::Result<Self, BackendError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("SHELLPILOT_API_KEY").ok())
            .ok_or(BackendError::MissingApiKey)?;

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BackendError::Request {
                url: config.base_url.clone(),
                message: e.to_string(),
            })?;

        let state = ConversationState {
            messages: vec![
                ChatMessage::system(system_prompt(&host)),
                ChatMessage::user(query.to_string()),
            ],
            ..ConversationState::default()
        };

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            host,
            state: Mutex::new(state),
        })
    }

    async fn advance(&self, history: &[StepRecord]) -> Result<PlanDecision> {
        let mut state = self.state.lock().await;

        // Feed back every record the model has not seen yet before asking
        // for anything new. A failed step invalidates the rest of the plan it
        // came from: the model gets to replan with the failure in front of it.
        let mut drop_pending = false;
        for record in &history[state.reported.min(history.len())..] {
            if !record.result.success() {
                drop_pending = true;
            }
            let feedback = format_step_feedback(record);
            state.messages.push(ChatMessage::user(feedback));
        }
        state.reported = history.len();
        if drop_pending {
            state.pending.clear();
        }

        // Drain the current plan first; the model is consulted again only
        // once its previous proposal is exhausted.
        if let Some(proposal) = state.pending.pop_front() {
            return Ok(PlanDecision::Step(proposal));
        }

        let mut retried = false;
        loop {
            let content = self.complete(&state.messages).await?;
            state.messages.push(ChatMessage::assistant(content.clone()));

            match plan::extract_plan(&content, &self.host) {
                Ok(plan) => {
                    debug!(steps = plan.steps.len(), "extracted command plan");
                    let target = plan.target_platform;
                    state.pending.extend(
                        plan.steps.into_iter().map(|step| Proposal {
                            step,
                            target_platform: target,
                        }),
                    );
                    return match state.pending.pop_front() {
                        Some(proposal) => Ok(PlanDecision::Step(proposal)),
                        None => Ok(PlanDecision::Done),
                    };
                }
                Err(PlanError::NotFound) => return Ok(PlanDecision::Done),
                Err(err) if !retried => {
                    warn!(error = %err, "unparseable command plan, asking for a correction");
                    retried = true;
                    state.messages.push(ChatMessage::user(format!(
                        "Your command plan could not be parsed ({err}). Reply with a \
                         corrected ```json plan, or plain text if the task is finished."
                    )));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
    ) -> std::result::Result<String, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError::Request {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| BackendError::MalformedResponse("empty completion".into()))
    }
}

impl PlanSource for OpenAiPlanSource {
    fn next_step<'a>(
        &'a self,
        history: &'a [StepRecord],
    ) -> Pin<Box<dyn Future<Output = Result<PlanDecision>> + Send + 'a>> {
        Box::pin(self.advance(history))
    }
}

fn system_prompt(host: &HostContext) -> String {
    let distro = host
        .distro_name
        .as_deref()
        .or(host.distro_id.as_deref())
        .unwrap_or("unknown distribution");
    format!(
        "You are a careful system administration assistant. The host runs {platform} \
         ({distro}); the working directory is {cwd}.\n\
         When the task needs shell commands, reply with exactly one fenced JSON object:\n\
         ```json\n\
         {{\"commands\": [\"<command>\", ...], \"sudo\": false, \
         \"platform\": \"{platform}\", \"cwd\": null, \"notes\": \"<why>\"}}\n\
         ```\n\
         One command per list entry, no shell chaining unless unavoidable. Set \"sudo\" \
         to true only when privileges are required. After each command you will receive \
         its exit code and output. When the task is complete (or impossible), reply in \
         plain text with no JSON object.",
        platform = host.platform,
        cwd = host.working_dir.display(),
    )
}
