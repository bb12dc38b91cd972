use crate::config::PipelineConfig;
use crate::extract::profiles::select_profile;
use crate::extract::record::{CategoryChoice, PriceQuote, ProductRecord};
use crate::extract::{
    AssetFetcher, ExtractionResolver, LoadedPage, PageLoader, StrategyReport, create_working_dir,
    write_snapshot,
};
use crate::generation::{
    CategoryRun, CategorySelector, GenerationInput, GenerationOrchestrator, GenerationRun,
    Sleeper, TokioSleeper, vision,
};
use crate::llm::{Credential, GeminiClient, GeminiConfig, GenerationService};
use crate::models::{
    BatchRequest, BatchResponse, ItemRequest, ItemResponse, SkippedItem, StageReport,
};
use crate::pricing;
use chrono::Utc;
use serde_json::{Value, json};
use std::{future::Future, path::Path, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Per-item pipeline: load, extract, fetch assets, generate, classify, quote.
#[derive(Clone)]
pub struct Pipeline {
    pub config: Arc<PipelineConfig>,
    loader: Arc<PageLoader>,
    resolver: Arc<ExtractionResolver>,
    fetcher: Arc<AssetFetcher>,
    orchestrator: Arc<GenerationOrchestrator>,
    selector: Arc<CategorySelector>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        service: Arc<dyn GenerationService>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let orchestrator = GenerationOrchestrator::new(
            service.clone(),
            sleeper.clone(),
            config.generation.clone(),
        );
        let selector = CategorySelector::new(service, sleeper, config.category.clone());
        Self {
            resolver: Arc::new(ExtractionResolver::new(config.extraction.clone())),
            loader: Arc::new(PageLoader::new()),
            fetcher: Arc::new(AssetFetcher::new()),
            orchestrator: Arc::new(orchestrator),
            selector: Arc::new(selector),
            config: Arc::new(config),
        }
    }

    pub fn from_env() -> Self {
        let service = Arc::new(GeminiClient::new(GeminiConfig::from_env()));
        Self::new(PipelineConfig::from_env(), service, Arc::new(TokioSleeper))
    }

    /// Request credential when given, else the configured one.
    fn credential(&self, api_key: Option<&str>) -> Option<Credential> {
        api_key
            .and_then(Credential::new)
            .or_else(|| self.config.credential.clone())
    }

    pub async fn run_item(&self, request: ItemRequest) -> Result<ItemResponse, PipelineError> {
        let source = request.source.trim().to_string();
        if source.is_empty() {
            return Err(PipelineError::invalid_input("load_page", "source is empty"));
        }
        let credential = self.credential(request.api_key.as_deref());
        let mut stages = Vec::new();

        let page = self
            .capture_stage("load_page", &mut stages, stages::load_page(&self.loader, &source))
            .await?;

        let (mut record, referer) = self
            .capture_stage(
                "extract_product",
                &mut stages,
                stages::extract_product(&self.resolver, &page, &self.config),
            )
            .await?;

        let local_paths = self
            .capture_stage(
                "fetch_assets",
                &mut stages,
                stages::fetch_assets(&self.fetcher, &record, &page, referer.as_deref(), &self.config),
            )
            .await?;
        record.local_image_paths = local_paths;

        let generation = self
            .capture_stage(
                "generate_listing",
                &mut stages,
                stages::generate_listing(
                    &self.orchestrator,
                    credential.as_ref(),
                    &record,
                    request.instructions.as_deref(),
                    self.config.generation.max_image_dimension,
                ),
            )
            .await?;
        record.generation = Some(generation.result);

        let candidates = request
            .categories
            .clone()
            .unwrap_or_else(|| self.config.categories.clone());
        let category = self
            .capture_stage(
                "select_category",
                &mut stages,
                stages::select_category(
                    &self.selector,
                    credential.as_ref(),
                    &record,
                    request.category_id.as_deref(),
                    &candidates,
                ),
            )
            .await?;
        record.category = category;

        let quote = self
            .capture_stage(
                "quote_price",
                &mut stages,
                stages::quote_price(&self.config, &record),
            )
            .await?;
        record.quote = quote;

        crate::metrics::item_finished("completed");
        Ok(ItemResponse { record, stages })
    }

    /// Runs items one at a time. A failed item is listed in `skipped` and the
    /// batch carries on.
    pub async fn run_batch(&self, request: BatchRequest) -> BatchResponse {
        let items = request.items();
        let total = items.len();
        let mut response = BatchResponse::default();
        for (index, item) in items.into_iter().enumerate() {
            let source = item.source.clone();
            info!(target = "lister.api", source = %source, position = index + 1, total, "batch_item_started");
            match self.run_item(item).await {
                Ok(done) => response.items.push(done),
                Err(err) => {
                    crate::metrics::item_finished("skipped");
                    warn!(target = "lister.api", source = %source, stage = err.stage(), error = %err.detail(), "batch_item_skipped");
                    response.skipped.push(SkippedItem {
                        source,
                        stage: err.stage().to_string(),
                        error: err.detail().to_string(),
                    });
                }
            }
        }
        response
    }

    pub async fn stage_extract(
        &self,
        source: &str,
    ) -> Result<(ProductRecord, Vec<StrategyReport>), PipelineError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(PipelineError::invalid_input("extract_product", "source is empty"));
        }
        let page = stages::load_page(&self.loader, source).await?.value;
        let resolution = self.resolver.resolve(&page);
        Ok((resolution.record, resolution.reports))
    }

    pub async fn stage_describe(
        &self,
        title: &str,
        image_path: Option<&str>,
        instructions: Option<&str>,
        api_key: Option<&str>,
    ) -> Result<GenerationRun, PipelineError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(PipelineError::invalid_input("generate_listing", "title is empty"));
        }
        let image = match image_path {
            Some(path) => {
                let path = Path::new(path);
                if !path.is_file() {
                    return Err(PipelineError::invalid_input(
                        "generate_listing",
                        format!("image not found: {}", path.display()),
                    ));
                }
                vision::representative_image(path, self.config.generation.max_image_dimension)
                    .await
            }
            None => None,
        };
        let credential = self.credential(api_key);
        Ok(self
            .orchestrator
            .generate(
                credential.as_ref(),
                GenerationInput {
                    title,
                    image,
                    instructions,
                },
            )
            .await)
    }

    pub async fn stage_select_category(
        &self,
        title: &str,
        categories: Option<&[String]>,
        api_key: Option<&str>,
    ) -> Result<CategoryRun, PipelineError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(PipelineError::invalid_input("select_category", "title is empty"));
        }
        let candidates = categories.unwrap_or(&self.config.categories);
        let credential = self.credential(api_key);
        Ok(self
            .selector
            .select(credential.as_ref(), title, candidates)
            .await)
    }

    pub fn stage_quote(
        &self,
        price_krw: u64,
        weight_raw: Option<&str>,
        estimate_kg: Option<f64>,
    ) -> PriceQuote {
        let weight = pricing::effective_weight(weight_raw, estimate_kg);
        pricing::quote(&self.config.pricing, price_krw, weight)
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    Internal,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::InvalidInput,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Internal,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

pub mod stages {
    use super::*;

    pub async fn load_page(
        loader: &PageLoader,
        source: &str,
    ) -> Result<StageOutcome<LoadedPage>, PipelineError> {
        let referer = select_profile(source).referer;
        let page = loader.load(source, referer).await;
        let output = json!({
            "source": page.source,
            "local": page.is_local(),
            "bytes": page.html.len(),
            "navigation_error": page.navigation_error,
        });
        Ok(StageOutcome::new(page, output))
    }

    /// Resolves the record. No title after every strategy is the one
    /// unrecoverable extraction failure: the markup is snapshotted and the
    /// item fails.
    pub async fn extract_product(
        resolver: &ExtractionResolver,
        page: &LoadedPage,
        config: &PipelineConfig,
    ) -> Result<StageOutcome<(ProductRecord, Option<String>)>, PipelineError> {
        let resolution = resolver.resolve(page);
        if resolution.record.title.is_empty() {
            write_snapshot(&config.snapshot_path(), page).await;
            let reason = match &page.navigation_error {
                Some(err) => format!("no product title found ({err})"),
                None => "no product title found".to_string(),
            };
            return Err(PipelineError::internal("extract_product", reason));
        }

        let referer = resolution.referer();
        let record = resolution.record;
        let output = json!({
            "profile": resolution.profile.name,
            "site_base": resolution.site_base,
            "strategies": resolution.reports,
            "title": record.title,
            "price": record.price,
            "image_count": record.images.len(),
            "weight_raw": record.weight_raw,
            "weight_kg": record.weight_kg,
        });
        Ok(StageOutcome::new((record, referer), output))
    }

    pub async fn fetch_assets(
        fetcher: &AssetFetcher,
        record: &ProductRecord,
        page: &LoadedPage,
        referer: Option<&str>,
        config: &PipelineConfig,
    ) -> Result<StageOutcome<Vec<std::path::PathBuf>>, PipelineError> {
        let dir = match create_working_dir(&config.images_dir(), &record.title, Utc::now().timestamp()).await {
            Ok(dir) => dir,
            Err(err) => {
                write_snapshot(&config.snapshot_path(), page).await;
                return Err(PipelineError::internal(
                    "fetch_assets",
                    format!("working directory unavailable: {err}"),
                ));
            }
        };
        let summary = fetcher
            .fetch_all(&record.images, &dir, referer, page.is_local())
            .await;
        let output = json!({
            "dir": dir,
            "requested": record.images.len(),
            "saved": summary.saved.len(),
            "failed": summary.failed,
        });
        Ok(StageOutcome::new(summary.saved, output))
    }

    pub async fn generate_listing(
        orchestrator: &GenerationOrchestrator,
        credential: Option<&Credential>,
        record: &ProductRecord,
        instructions: Option<&str>,
        max_image_dimension: u32,
    ) -> Result<StageOutcome<GenerationRun>, PipelineError> {
        let image = match record.local_image_paths.first() {
            Some(path) => vision::representative_image(path, max_image_dimension).await,
            None => None,
        };
        let with_image = image.is_some();
        let run = orchestrator
            .generate(
                credential,
                GenerationInput {
                    title: &record.title,
                    image,
                    instructions,
                },
            )
            .await;
        let output = json!({
            "with_image": with_image,
            "degraded": run.result.degraded,
            "refined_title": run.result.refined_title,
            "weight_kg": run.result.weight_kg,
            "attempts": run.attempts,
        });
        Ok(StageOutcome::new(run, output))
    }

    /// Explicit category ids skip the classifier. A degraded listing is
    /// classified by its source title.
    pub async fn select_category(
        selector: &CategorySelector,
        credential: Option<&Credential>,
        record: &ProductRecord,
        category_id: Option<&str>,
        candidates: &[String],
    ) -> Result<StageOutcome<Option<CategoryChoice>>, PipelineError> {
        if let Some(id) = category_id.map(str::trim).filter(|id| !id.is_empty()) {
            let choice = CategoryChoice {
                id: id.to_string(),
                label: None,
                source: "request".into(),
            };
            let output = json!({ "skipped": true, "choice": choice });
            return Ok(StageOutcome::new(Some(choice), output));
        }

        let title = match &record.generation {
            Some(generation) if !generation.degraded => generation.refined_title.as_str(),
            _ => record.title.as_str(),
        };
        let run = selector.select(credential, title, candidates).await;
        let output = json!({
            "skipped": false,
            "candidates": candidates.len(),
            "attempts": run.attempts,
            "classified": run.classified,
            "choice": run.choice,
        });
        Ok(StageOutcome::new(run.choice, output))
    }

    pub async fn quote_price(
        config: &PipelineConfig,
        record: &ProductRecord,
    ) -> Result<StageOutcome<Option<PriceQuote>>, PipelineError> {
        let Some(price) = record.price else {
            return Ok(StageOutcome::new(None, json!({ "skipped": "no price extracted" })));
        };
        let estimate = record
            .generation
            .as_ref()
            .filter(|g| !g.degraded)
            .map(|g| g.weight_kg);
        let weight = pricing::effective_weight(record.weight_raw.as_deref(), estimate);
        let quote = pricing::quote(&config.pricing, price, weight);
        Ok(StageOutcome::new(Some(quote), json!(quote)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationPolicy;
    use crate::generation::testing::{RecordingSleeper, ScriptedService};
    use crate::llm::LlmError;

    const LISTING: &str = "🎁 Item: **Mild Test Shampoo**\n🤍 Description\nGentle care\n[WEIGHT]: 0.8";

    struct Fixture {
        _dir: tempfile::TempDir,
        root: std::path::PathBuf,
        service: Arc<ScriptedService>,
        pipeline: Pipeline,
    }

    fn fixture(
        respond: impl Fn(&str, usize) -> Result<String, LlmError> + Send + Sync + 'static,
    ) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let config = PipelineConfig {
            output_dir: root.join("out"),
            generation: GenerationPolicy::immediate(&["top", "backup"], 5),
            ..PipelineConfig::default()
        };
        let service = Arc::new(ScriptedService::new(respond));
        let pipeline = Pipeline::new(config, service.clone(), Arc::new(RecordingSleeper::default()));
        Fixture {
            _dir: dir,
            root,
            service,
            pipeline,
        }
    }

    fn saved_page(root: &Path) -> String {
        let page_dir = root.join("saved");
        std::fs::create_dir_all(page_dir.join("page_files")).unwrap();
        std::fs::write(page_dir.join("page_files/1.jpg"), b"jpeg").unwrap();
        std::fs::write(page_dir.join("page_files/2.png"), b"png").unwrap();
        let html = r#"<html><head>
            <script type="application/ld+json">{"@type":"Product","name":"테스트 샴푸","offers":{"price":"12,900"}}</script>
            </head><body>
            <img src="page_files/1.jpg"><img src="page_files/2.png"><img src="page_files/logo.png">
            <table><tr><th>용량</th><td>500ml</td></tr></table>
            </body></html>"#;
        let path = page_dir.join("page.html");
        std::fs::write(&path, html).unwrap();
        path.to_str().unwrap().to_string()
    }

    fn item(source: String) -> ItemRequest {
        ItemRequest {
            source,
            api_key: Some("test-key".into()),
            ..ItemRequest::default()
        }
    }

    #[tokio::test]
    async fn saved_page_runs_every_stage() {
        let fx = fixture(|model, _| {
            if model == "gemini-flash-latest" {
                Ok("100630-Beauty/Hair Care/Shampoo".into())
            } else {
                Ok(LISTING.into())
            }
        });
        let source = saved_page(&fx.root);
        let response = fx.pipeline.run_item(item(source)).await.unwrap();
        let record = response.record;

        assert_eq!(record.title, "테스트 샴푸");
        assert_eq!(record.price, Some(12900));
        assert_eq!(record.images.len(), 2);
        assert_eq!(record.local_image_paths.len(), 2);
        assert!(record.local_image_paths[0].ends_with("1.jpg"));
        assert!(record.local_image_paths[1].ends_with("2.png"));

        let generation = record.generation.unwrap();
        assert_eq!(generation.refined_title, "Mild Test Shampoo");
        assert_eq!(generation.weight_kg, 0.8);
        assert!(!generation.description.contains("[WEIGHT]"));
        assert!(!generation.description.contains("**"));

        assert_eq!(record.category.unwrap().id, "100630");
        // Page weight (500 ml) wins over the generated estimate.
        let quote = record.quote.unwrap();
        assert_eq!(quote.weight_kg, 0.5);
        assert_eq!(quote.shipping_sgd, 4.0);

        let names: Vec<&str> = response.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "load_page",
                "extract_product",
                "fetch_assets",
                "generate_listing",
                "select_category",
                "quote_price"
            ]
        );
    }

    #[tokio::test]
    async fn explicit_category_skips_classifier() {
        let fx = fixture(|_, _| Ok(LISTING.into()));
        let source = saved_page(&fx.root);
        let request = ItemRequest {
            category_id: Some("100001".into()),
            ..item(source)
        };
        let record = fx.pipeline.run_item(request).await.unwrap().record;
        let category = record.category.unwrap();
        assert_eq!(category.id, "100001");
        assert_eq!(category.source, "request");
        assert_eq!(fx.service.models_called(), vec!["top"]);
    }

    #[tokio::test]
    async fn degraded_generation_still_completes_item() {
        let fx = fixture(|_, _| Err(LlmError::RateLimited("quota".into())));
        let source = saved_page(&fx.root);
        let record = fx.pipeline.run_item(item(source)).await.unwrap().record;
        let generation = record.generation.unwrap();
        assert!(generation.degraded);
        assert_eq!(generation.weight_kg, 0.5);
        // Five listing attempts, then three category attempts.
        assert_eq!(fx.service.models_called().len(), 8);
        assert_eq!(
            record.category.unwrap().label.as_deref(),
            Some("100630-Beauty/Hair Care/Shampoo")
        );
    }

    #[tokio::test]
    async fn batch_skips_titleless_item_and_writes_snapshot() {
        let fx = fixture(|_, _| Ok(LISTING.into()));
        let good = saved_page(&fx.root);
        let broken = fx.root.join("broken.html");
        std::fs::write(&broken, "<html><body><p>login required</p></body></html>").unwrap();

        let request = BatchRequest {
            sources: crate::models::SourceList::Multiple(vec![
                broken.to_str().unwrap().to_string(),
                good,
            ]),
            category_id: Some("100001".into()),
            instructions: None,
            api_key: Some("test-key".into()),
            categories: None,
        };
        let response = fx.pipeline.run_batch(request).await;
        assert_eq!(response.items.len(), 1);
        assert_eq!(response.skipped.len(), 1);
        assert_eq!(response.skipped[0].stage, "extract_product");

        let snapshot = std::fs::read_to_string(fx.pipeline.config.snapshot_path()).unwrap();
        assert!(snapshot.contains("login required"));
    }

    #[tokio::test]
    async fn blank_source_is_invalid_input() {
        let fx = fixture(|_, _| Ok(LISTING.into()));
        let err = fx.pipeline.run_item(item("  ".into())).await.unwrap_err();
        assert_eq!(err.kind(), PipelineErrorKind::InvalidInput);
        assert_eq!(err.stage(), "load_page");
    }

    #[tokio::test]
    async fn quote_stage_prefers_page_weight() {
        let fx = fixture(|_, _| Ok(LISTING.into()));
        let quote = fx.pipeline.stage_quote(10000, Some("1kg"), Some(3.0));
        assert_eq!(quote.weight_kg, 1.0);
        assert_eq!(quote.listing_price_sgd, 38.57);
    }
}
