use crate::llm::Credential;
use std::{env, path::PathBuf, time::Duration};
use tracing::warn;

const DEFAULT_MODELS: &[&str] = &[
    "gemini-2.0-flash",
    "gemini-flash-latest",
    "gemini-2.0-flash-lite",
];

const DEFAULT_CATEGORIES: &[&str] = &[
    "100630-Beauty/Hair Care/Shampoo",
    "100631-Beauty/Hair Care/Conditioner",
    "100664-Beauty/Skincare/Facial Cleanser",
    "100012-Home & Living/Kitchenware/Others",
    "100636-Home & Living/Others",
    "100001-Others",
];

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub output_dir: PathBuf,
    pub extraction: ExtractionPolicy,
    pub generation: GenerationPolicy,
    pub category: CategoryPolicy,
    pub pricing: PricingPolicy,
    pub credential: Option<Credential>,
    pub categories: Vec<String>,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self {
            output_dir: env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("output")),
            extraction: ExtractionPolicy::from_env(),
            generation: GenerationPolicy::from_env(),
            category: CategoryPolicy::from_env(),
            pricing: PricingPolicy::from_env(),
            credential: env::var("GEMINI_API_KEY")
                .ok()
                .and_then(|key| Credential::new(key)),
            categories: load_categories(),
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.output_dir.join("debug_snapshot.html")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.output_dir.join("images")
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            extraction: ExtractionPolicy::default(),
            generation: GenerationPolicy::default(),
            category: CategoryPolicy::default(),
            pricing: PricingPolicy::default(),
            credential: None,
            categories: DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionPolicy {
    /// Upper bound on the merged gallery.
    pub max_images: usize,
    /// The raw-markup scan only runs while fewer images than this were found.
    pub brute_force_threshold: usize,
}

impl Default for ExtractionPolicy {
    fn default() -> Self {
        Self {
            max_images: 15,
            brute_force_threshold: 2,
        }
    }
}

impl ExtractionPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_images: env_parse("MAX_IMAGES")
                .filter(|v: &usize| *v >= 1)
                .unwrap_or(defaults.max_images),
            brute_force_threshold: env_parse("BRUTE_FORCE_THRESHOLD")
                .unwrap_or(defaults.brute_force_threshold),
        }
    }
}

/// Retry and rotation policy for the generation service.
///
/// The recovery cooldown models the quota-reset window observed for the
/// top-priority model: it is granted once, for the very first rate limit of
/// a run, and never again.
#[derive(Debug, Clone)]
pub struct GenerationPolicy {
    pub models: Vec<String>,
    pub max_attempts: u32,
    pub initial_throttle: Duration,
    pub recovery_cooldown: Duration,
    pub rotation_delay: Duration,
    pub backoff_step: Duration,
    pub backoff_ceiling: Duration,
    pub max_image_dimension: u32,
}

impl Default for GenerationPolicy {
    fn default() -> Self {
        Self {
            models: DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
            max_attempts: 20,
            initial_throttle: Duration::from_secs(10),
            recovery_cooldown: Duration::from_secs(65),
            rotation_delay: Duration::from_secs(5),
            backoff_step: Duration::from_secs(10),
            backoff_ceiling: Duration::from_secs(120),
            max_image_dimension: 1024,
        }
    }
}

impl GenerationPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let models = env::var("GEMINI_MODELS")
            .ok()
            .map(|raw| split_list(&raw))
            .filter(|list| !list.is_empty())
            .unwrap_or(defaults.models);
        Self {
            models,
            max_attempts: env_parse("GENERATION_MAX_ATTEMPTS")
                .filter(|v: &u32| *v >= 1)
                .unwrap_or(defaults.max_attempts),
            initial_throttle: env_secs("GENERATION_INITIAL_THROTTLE_SECS")
                .unwrap_or(defaults.initial_throttle),
            recovery_cooldown: env_secs("GENERATION_RECOVERY_COOLDOWN_SECS")
                .unwrap_or(defaults.recovery_cooldown),
            rotation_delay: env_secs("GENERATION_ROTATION_DELAY_SECS")
                .unwrap_or(defaults.rotation_delay),
            backoff_step: env_secs("GENERATION_BACKOFF_STEP_SECS")
                .unwrap_or(defaults.backoff_step),
            backoff_ceiling: env_secs("GENERATION_BACKOFF_CEILING_SECS")
                .unwrap_or(defaults.backoff_ceiling),
            max_image_dimension: env_parse("GENERATION_MAX_IMAGE_DIMENSION")
                .filter(|v: &u32| *v >= 64)
                .unwrap_or(defaults.max_image_dimension),
        }
    }

    /// Policy without the initial throttle; the remaining delays are left
    /// to the injected sleeper.
    #[cfg(test)]
    pub fn immediate(models: &[&str], max_attempts: u32) -> Self {
        Self {
            models: models.iter().map(|m| m.to_string()).collect(),
            max_attempts,
            initial_throttle: Duration::ZERO,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct CategoryPolicy {
    pub model: String,
    pub attempts: u32,
    pub retry_delay: Duration,
    pub fallback_marker: String,
}

impl Default for CategoryPolicy {
    fn default() -> Self {
        Self {
            model: "gemini-flash-latest".into(),
            attempts: 3,
            retry_delay: Duration::from_secs(5),
            fallback_marker: "Others".into(),
        }
    }
}

impl CategoryPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            model: env::var("GEMINI_CATEGORY_MODEL").unwrap_or(defaults.model),
            attempts: env_parse("CATEGORY_ATTEMPTS")
                .filter(|v: &u32| *v >= 1)
                .unwrap_or(defaults.attempts),
            retry_delay: env_secs("CATEGORY_RETRY_DELAY_SECS").unwrap_or(defaults.retry_delay),
            fallback_marker: defaults.fallback_marker,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PricingPolicy {
    /// KRW per SGD.
    pub exchange_rate: f64,
    pub fees_rate: f64,
    pub margin: f64,
    pub discount_rate: f64,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            exchange_rate: 1143.0,
            fees_rate: 0.1935,
            margin: 1.3,
            discount_rate: 0.3,
        }
    }
}

impl PricingPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            exchange_rate: env_parse("PRICING_EXCHANGE_RATE")
                .filter(|v: &f64| *v > 0.0)
                .unwrap_or(defaults.exchange_rate),
            fees_rate: env_parse("PRICING_FEES_RATE")
                .filter(|v: &f64| (0.0..1.0).contains(v))
                .unwrap_or(defaults.fees_rate),
            margin: env_parse("PRICING_MARGIN")
                .filter(|v: &f64| *v > 0.0)
                .unwrap_or(defaults.margin),
            discount_rate: env_parse("PRICING_DISCOUNT_RATE")
                .filter(|v: &f64| (0.0..1.0).contains(v))
                .unwrap_or(defaults.discount_rate),
        }
    }
}

fn load_categories() -> Vec<String> {
    let Ok(path) = env::var("CATEGORY_LIST_PATH") else {
        return PipelineConfig::default().categories;
    };
    match std::fs::read_to_string(&path) {
        Ok(raw) => {
            let list: Vec<String> = raw
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect();
            if list.is_empty() {
                warn!(target = "lister.config", path = %path, "category list empty; using defaults");
                PipelineConfig::default().categories
            } else {
                list
            }
        }
        Err(err) => {
            warn!(target = "lister.config", path = %path, error = %err, "category list unreadable; using defaults");
            PipelineConfig::default().categories
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split([',', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}
