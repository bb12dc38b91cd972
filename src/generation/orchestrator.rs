use crate::config::GenerationPolicy;
use crate::extract::record::GenerationResult;
use crate::extract::weight::DEFAULT_WEIGHT_KG;
use crate::generation::Sleeper;
use crate::generation::template::{listing_prompt, parse_response};
use crate::llm::{Credential, GenerationRequest, GenerationService, InlineImage, LlmError};
use serde::Serialize;
use serde_with::{DurationMilliSeconds, serde_as};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    RateLimited,
    NotFound,
    OtherError,
}

impl AttemptOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::RateLimited => "rate_limited",
            AttemptOutcome::NotFound => "not_found",
            AttemptOutcome::OtherError => "other_error",
        }
    }
}

impl From<&LlmError> for AttemptOutcome {
    fn from(err: &LlmError) -> Self {
        match err {
            LlmError::RateLimited(_) => AttemptOutcome::RateLimited,
            LlmError::ModelNotFound(_) => AttemptOutcome::NotFound,
            LlmError::Http(_) | LlmError::InvalidResponse(_) => AttemptOutcome::OtherError,
        }
    }
}

/// One call against the generation service, as reported in the stage transcript.
#[serde_as]
#[derive(Debug, Clone, Serialize)]
pub struct ModelAttempt {
    pub model: String,
    pub attempt_index: u32,
    pub outcome: AttemptOutcome,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(rename = "next_delay_ms", skip_serializing_if = "Option::is_none")]
    pub next_delay: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What to do after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Done,
    Retry { delay: Duration, cursor: usize },
}

/// Transition function of the retry state machine. `cursor` indexes the model
/// pool (modulo its length); index 0 is the top-priority model.
pub fn next_step(
    policy: &GenerationPolicy,
    cursor: usize,
    attempt: u32,
    outcome: AttemptOutcome,
) -> Step {
    let pool = policy.models.len().max(1);
    let top_priority = cursor % pool == 0;
    match outcome {
        AttemptOutcome::Success => Step::Done,
        AttemptOutcome::RateLimited if top_priority && attempt == 0 => Step::Retry {
            delay: policy.recovery_cooldown,
            cursor,
        },
        AttemptOutcome::RateLimited => Step::Retry {
            delay: policy.rotation_delay,
            cursor: cursor + 1,
        },
        AttemptOutcome::NotFound => Step::Retry {
            delay: Duration::ZERO,
            cursor: cursor + 1,
        },
        AttemptOutcome::OtherError => {
            let delay = policy
                .backoff_step
                .saturating_mul(attempt + 1)
                .min(policy.backoff_ceiling);
            Step::Retry {
                delay,
                cursor: if top_priority { cursor } else { cursor + 1 },
            }
        }
    }
}

pub struct GenerationInput<'a> {
    pub title: &'a str,
    pub image: Option<InlineImage>,
    pub instructions: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationRun {
    pub result: GenerationResult,
    pub attempts: Vec<ModelAttempt>,
}

pub struct GenerationOrchestrator {
    service: Arc<dyn GenerationService>,
    sleeper: Arc<dyn Sleeper>,
    policy: GenerationPolicy,
}

impl GenerationOrchestrator {
    pub fn new(
        service: Arc<dyn GenerationService>,
        sleeper: Arc<dyn Sleeper>,
        policy: GenerationPolicy,
    ) -> Self {
        Self {
            service,
            sleeper,
            policy,
        }
    }

    /// Drives the retry state machine to a result. Never fails: exhausting the
    /// attempt ceiling, or having no credential, yields a degraded result.
    pub async fn generate(
        &self,
        credential: Option<&Credential>,
        input: GenerationInput<'_>,
    ) -> GenerationRun {
        let Some(credential) = credential else {
            warn!(target = "lister.llm", title = %input.title, "generation_skipped_no_credential");
            return GenerationRun {
                result: degraded(input.title, "no API credential configured"),
                attempts: Vec::new(),
            };
        };
        if self.policy.models.is_empty() {
            return GenerationRun {
                result: degraded(input.title, "no generation models configured"),
                attempts: Vec::new(),
            };
        }

        debug!(target = "lister.llm", credential = ?credential, title = %input.title, "generation_started");
        if !self.policy.initial_throttle.is_zero() {
            self.sleeper.sleep(self.policy.initial_throttle).await;
        }

        let parts = listing_prompt(input.title, input.instructions);
        let mut attempts = Vec::new();
        let mut cursor = 0usize;
        let mut last_error = String::from("no attempt made");

        for attempt in 0..self.policy.max_attempts {
            let model = &self.policy.models[cursor % self.policy.models.len()];
            let request = GenerationRequest {
                model: model.clone(),
                parts: parts.clone(),
                image: input.image.clone(),
            };
            let outcome = self.service.generate(credential, &request).await;
            match outcome {
                Ok(text) => {
                    crate::metrics::generation_attempt(model, AttemptOutcome::Success.as_str());
                    attempts.push(ModelAttempt {
                        model: model.clone(),
                        attempt_index: attempt,
                        outcome: AttemptOutcome::Success,
                        next_delay: None,
                        error: None,
                    });
                    let parsed = parse_response(&text, input.title);
                    info!(target = "lister.llm", model = %model, attempt, weight_kg = parsed.weight_kg, "generation_succeeded");
                    return GenerationRun {
                        result: GenerationResult {
                            refined_title: parsed.title,
                            description: parsed.description,
                            weight_kg: parsed.weight_kg,
                            degraded: false,
                        },
                        attempts,
                    };
                }
                Err(err) => {
                    let kind = AttemptOutcome::from(&err);
                    crate::metrics::generation_attempt(model, kind.as_str());
                    last_error = err.to_string();
                    let is_last = attempt + 1 >= self.policy.max_attempts;
                    let (delay, next_cursor) = match next_step(&self.policy, cursor, attempt, kind) {
                        Step::Retry { delay, cursor } => (delay, cursor),
                        Step::Done => (Duration::ZERO, cursor),
                    };
                    attempts.push(ModelAttempt {
                        model: model.clone(),
                        attempt_index: attempt,
                        outcome: kind,
                        next_delay: (!is_last).then_some(delay),
                        error: Some(last_error.clone()),
                    });
                    match kind {
                        AttemptOutcome::RateLimited if next_cursor == cursor => {
                            warn!(target = "lister.llm", model = %model, attempt, cooldown_secs = delay.as_secs(), "generation_recovery_cooldown")
                        }
                        AttemptOutcome::RateLimited => {
                            warn!(target = "lister.llm", model = %model, attempt, "generation_rate_limited")
                        }
                        AttemptOutcome::NotFound => {
                            warn!(target = "lister.llm", model = %model, attempt, "generation_model_not_found")
                        }
                        _ => {
                            warn!(target = "lister.llm", model = %model, attempt, error = %last_error, "generation_failed")
                        }
                    }
                    if is_last {
                        break;
                    }
                    if !delay.is_zero() {
                        self.sleeper.sleep(delay).await;
                    }
                    cursor = next_cursor;
                }
            }
        }

        warn!(
            target = "lister.llm",
            title = %input.title,
            attempts = attempts.len(),
            error = %last_error,
            "generation_degraded"
        );
        GenerationRun {
            result: degraded(input.title, &last_error),
            attempts,
        }
    }
}

/// Placeholder result carried when no model produced a listing.
pub fn degraded(title: &str, error: &str) -> GenerationResult {
    let head: String = title.chars().take(20).collect();
    GenerationResult {
        refined_title: format!("[Error] {head}..."),
        description: format!("Error: {error}"),
        weight_kg: DEFAULT_WEIGHT_KG,
        degraded: true,
    }
}
