pub mod ensemble;
pub mod search;
pub mod stage;
pub mod temporal;
pub mod variant;

mod error;

pub use error::{Error, Result};
pub use search::{
	ResultMode, SearchRequest, SearchResponse, StageRequest, TemporalAggregation, TemporalMode,
};

use std::{future::Future, pin::Pin, sync::Arc};

use tokio::sync::Semaphore;

use frameseek_config::{Config, ObjectFilterProviderConfig, RetrievalProviderConfig};
use frameseek_domain::{Candidate, MethodKind};
use frameseek_providers::{object_filter, retrieval};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait RetrievalProvider
where
	Self: Send + Sync,
{
	fn retrieve<'a>(
		&'a self,
		cfg: &'a RetrievalProviderConfig,
		method: MethodKind,
		query: &'a str,
		limit: u32,
	) -> BoxFuture<'a, frameseek_providers::Result<Vec<Candidate>>>;
}

pub trait ObjectFilterProvider
where
	Self: Send + Sync,
{
	/// Returns the ids whose frames contain every selected object.
	fn filter<'a>(
		&'a self,
		cfg: &'a ObjectFilterProviderConfig,
		ids: &'a [String],
		objects: &'a [String],
	) -> BoxFuture<'a, frameseek_providers::Result<Vec<String>>>;
}

pub struct FrameseekService {
	pub cfg: Arc<Config>,
	pub provider: Arc<dyn RetrievalProvider>,
	pub object_filter: Arc<dyn ObjectFilterProvider>,
	permits: Arc<Semaphore>,
}
impl FrameseekService {
	pub fn new(cfg: Config) -> Self {
		Self::with_providers(cfg, Arc::new(HttpRetrieval), Arc::new(HttpObjectFilter))
	}

	pub fn with_provider(cfg: Config, provider: Arc<dyn RetrievalProvider>) -> Self {
		Self::with_providers(cfg, provider, Arc::new(HttpObjectFilter))
	}

	pub fn with_providers(
		cfg: Config,
		provider: Arc<dyn RetrievalProvider>,
		object_filter: Arc<dyn ObjectFilterProvider>,
	) -> Self {
		let permits = Arc::new(Semaphore::new(cfg.stage.worker_pool_size.max(1) as usize));

		Self { cfg: Arc::new(cfg), provider, object_filter, permits }
	}
}

struct HttpRetrieval;
impl RetrievalProvider for HttpRetrieval {
	fn retrieve<'a>(
		&'a self,
		cfg: &'a RetrievalProviderConfig,
		method: MethodKind,
		query: &'a str,
		limit: u32,
	) -> BoxFuture<'a, frameseek_providers::Result<Vec<Candidate>>> {
		Box::pin(retrieval::retrieve(cfg, method, query, limit))
	}
}

struct HttpObjectFilter;
impl ObjectFilterProvider for HttpObjectFilter {
	fn filter<'a>(
		&'a self,
		cfg: &'a ObjectFilterProviderConfig,
		ids: &'a [String],
		objects: &'a [String],
	) -> BoxFuture<'a, frameseek_providers::Result<Vec<String>>> {
		Box::pin(object_filter::filter(cfg, ids, objects))
	}
}
