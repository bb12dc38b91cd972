use crate::config::CategoryPolicy;
use crate::extract::record::CategoryChoice;
use crate::generation::Sleeper;
use crate::llm::{Credential, GenerationRequest, GenerationService};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct CategoryRun {
    pub choice: Option<CategoryChoice>,
    pub attempts: u32,
    /// False when every invocation failed and the first candidate was taken.
    pub classified: bool,
}

pub struct CategorySelector {
    service: Arc<dyn GenerationService>,
    sleeper: Arc<dyn Sleeper>,
    policy: CategoryPolicy,
}

impl CategorySelector {
    pub fn new(
        service: Arc<dyn GenerationService>,
        sleeper: Arc<dyn Sleeper>,
        policy: CategoryPolicy,
    ) -> Self {
        Self {
            service,
            sleeper,
            policy,
        }
    }

    /// Classifies `title` into one of `candidates`. The answer is always a
    /// member of the list; an empty list yields no choice.
    pub async fn select(
        &self,
        credential: Option<&Credential>,
        title: &str,
        candidates: &[String],
    ) -> CategoryRun {
        let Some(first) = candidates.first() else {
            return CategoryRun {
                choice: None,
                attempts: 0,
                classified: false,
            };
        };

        let mut attempts = 0;
        let mut response = None;
        if let Some(credential) = credential {
            let request = GenerationRequest::text(&self.policy.model, category_prompt(title, candidates));
            for attempt in 0..self.policy.attempts {
                attempts += 1;
                match self.service.generate(credential, &request).await {
                    Ok(text) => {
                        response = Some(text);
                        break;
                    }
                    Err(err) => {
                        warn!(target = "lister.category", attempt = attempt + 1, error = %err, "category_call_failed");
                        if attempt + 1 < self.policy.attempts {
                            self.sleeper.sleep(self.policy.retry_delay).await;
                        }
                    }
                }
            }
        } else {
            warn!(target = "lister.category", "category_skipped_no_credential");
        }

        let classified = response.is_some();
        let label = match response {
            Some(text) => validate(text.trim(), candidates, &self.policy.fallback_marker),
            None => first,
        };
        info!(target = "lister.category", label = %label, classified, attempts, "category_selected");
        CategoryRun {
            choice: Some(CategoryChoice {
                id: category_id_from_label(label),
                label: Some(label.clone()),
                source: "model".into(),
            }),
            attempts,
            classified,
        }
    }
}

/// First candidate the response mentions; otherwise the first fallback-marked
/// candidate; otherwise the first candidate. `candidates` must be non-empty.
fn validate<'a>(response: &str, candidates: &'a [String], marker: &str) -> &'a String {
    candidates
        .iter()
        .find(|candidate| response.contains(candidate.as_str()))
        .or_else(|| candidates.iter().find(|c| c.contains(marker)))
        .unwrap_or(&candidates[0])
}

fn category_prompt(title: &str, candidates: &[String]) -> String {
    format!(
        "Select the best category for this product title from the list below.\n\
         Product Title: {title}\n\n\
         Category List:\n{}\n\n\
         Return ONLY the exact string from the list. Nothing else.\n\
         If unsure, pick the one containing \"Others\".",
        candidates.join("\n")
    )
}

/// `"100630-Beauty/Hair Care"` → `"100630"`. Labels without a dash are their own id.
pub fn category_id_from_label(label: &str) -> String {
    label
        .split_once('-')
        .map(|(id, _)| id)
        .unwrap_or(label)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::testing::{RecordingSleeper, ScriptedService};
    use crate::llm::LlmError;
    use std::time::Duration;

    fn candidates() -> Vec<String> {
        vec![
            "100630-Beauty/Hair Care/Shampoo".into(),
            "100636-Home & Living/Others".into(),
            "100001-Others".into(),
        ]
    }

    fn selector(service: Arc<ScriptedService>, sleeper: Arc<RecordingSleeper>) -> CategorySelector {
        CategorySelector::new(service, sleeper, CategoryPolicy::default())
    }

    fn key() -> Credential {
        Credential::new("test-key").unwrap()
    }

    #[test]
    fn id_is_prefix_before_first_dash() {
        assert_eq!(category_id_from_label("100630-Beauty/Hair Care"), "100630");
        assert_eq!(category_id_from_label("Unnumbered"), "Unnumbered");
    }

    #[tokio::test]
    async fn picks_candidate_mentioned_in_response() {
        let service = Arc::new(ScriptedService::new(|_, _| {
            Ok("Answer: 100630-Beauty/Hair Care/Shampoo\n".into())
        }));
        let sleeper = Arc::new(RecordingSleeper::default());
        let run = selector(service.clone(), sleeper)
            .select(Some(&key()), "Mild Shampoo", &candidates())
            .await;
        let choice = run.choice.unwrap();
        assert_eq!(choice.id, "100630");
        assert!(run.classified);
        let prompt = &service.requests()[0].parts[0];
        assert!(prompt.contains("Mild Shampoo"));
        assert!(prompt.contains("100001-Others"));
    }

    #[tokio::test]
    async fn unmatched_response_falls_back_to_others() {
        let service = Arc::new(ScriptedService::new(|_, _| Ok("Garden tools".into())));
        let sleeper = Arc::new(RecordingSleeper::default());
        let run = selector(service, sleeper)
            .select(Some(&key()), "Rake", &candidates())
            .await;
        assert_eq!(
            run.choice.unwrap().label.as_deref(),
            Some("100636-Home & Living/Others")
        );
    }

    #[tokio::test]
    async fn failing_calls_return_first_candidate_after_retries() {
        let service = Arc::new(ScriptedService::new(|_, _| Err(LlmError::Http("503".into()))));
        let sleeper = Arc::new(RecordingSleeper::default());
        let list = candidates();
        let run = selector(service.clone(), sleeper.clone())
            .select(Some(&key()), "Anything", &list)
            .await;
        let label = run.choice.unwrap().label.unwrap();
        assert!(list.contains(&label));
        assert_eq!(label, list[0]);
        assert!(!run.classified);
        assert_eq!(service.models_called().len(), 3);
        assert_eq!(sleeper.delays(), vec![Duration::from_secs(5); 2]);
    }

    #[tokio::test]
    async fn empty_candidate_list_yields_nothing() {
        let service = Arc::new(ScriptedService::new(|_, _| Ok("x".into())));
        let sleeper = Arc::new(RecordingSleeper::default());
        let run = selector(service.clone(), sleeper).select(Some(&key()), "t", &[]).await;
        assert!(run.choice.is_none());
        assert!(service.models_called().is_empty());
    }
}
