//! Product extraction: page loading, the strategy cascade, image
//! normalization and asset download.

pub mod assets;
pub mod images;
pub mod loader;
pub mod profiles;
pub mod record;
pub mod resolver;
pub mod strategies;
pub mod weight;

pub use assets::{AssetFetcher, create_working_dir};
pub use loader::{LoadedPage, PageLoader};
pub use record::{PriceQuote, ProductRecord};
pub use resolver::{ExtractionResolver, StrategyReport, write_snapshot};
