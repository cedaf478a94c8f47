mod error;

pub use error::{Error, Result};

use std::{
	collections::{HashMap, HashSet},
	fs,
	path::Path,
	sync::{
		Arc, Mutex,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::Map;

use frameseek_config::{
	Config, Ensemble, ObjectFilterProviderConfig, Providers, RetrievalProviderConfig, Search,
	Service, Stage, Temporal,
};
use frameseek_domain::{Candidate, MethodKind};
use frameseek_service::{BoxFuture, ObjectFilterProvider, RetrievalProvider};

/// Matches every query text for a method.
pub const ANY_QUERY: &str = "*";

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RecordedHit {
	pub id: String,
	pub video_id: String,
	pub frame_index: u32,
	pub score: f32,
}
impl RecordedHit {
	pub fn new(id: &str, video_id: &str, frame_index: u32, score: f32) -> Self {
		Self { id: id.to_string(), video_id: video_id.to_string(), frame_index, score }
	}
}

/// One recorded backend response, as stored in replay files.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Recording {
	pub method: MethodKind,
	pub query: String,
	pub hits: Vec<RecordedHit>,
}

#[derive(Clone, Debug)]
enum Reply {
	Hits(Vec<RecordedHit>),
	Fail(String),
	Hang,
}

#[derive(Clone, Debug)]
struct Entry {
	reply: Reply,
	delay: Option<Duration>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordedCall {
	pub method: MethodKind,
	pub query: String,
	pub limit: u32,
}

/// In-memory retrieval backend keyed by `(method, query)`.
///
/// Unknown keys return an empty hit list. Failures, delays and hangs can be injected per key.
/// Doubles as an object filter over the labels registered with `with_objects`.
#[derive(Default)]
pub struct RecordedBackend {
	entries: HashMap<(MethodKind, String), Entry>,
	objects: HashMap<String, HashSet<String>>,
	object_filter_failure: Option<String>,
	calls: Mutex<Vec<RecordedCall>>,
	object_filter_calls: Mutex<Vec<Vec<String>>>,
	in_flight: Arc<AtomicUsize>,
	peak_in_flight: AtomicUsize,
}
impl RecordedBackend {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn from_recordings(recordings: Vec<Recording>) -> Self {
		let mut backend = Self::new();

		for recording in recordings {
			backend.insert(recording.method, &recording.query, recording.hits);
		}

		backend
	}

	pub fn load(path: &Path) -> Result<Self> {
		let raw = fs::read_to_string(path)?;
		let recordings: Vec<Recording> = serde_json::from_str(&raw)?;

		Ok(Self::from_recordings(recordings))
	}

	pub fn insert(&mut self, method: MethodKind, query: &str, hits: Vec<RecordedHit>) {
		self.set(method, query, Reply::Hits(hits));
	}

	pub fn with_hits(mut self, method: MethodKind, query: &str, hits: Vec<RecordedHit>) -> Self {
		self.insert(method, query, hits);

		self
	}

	pub fn with_failure(mut self, method: MethodKind, query: &str, message: &str) -> Self {
		self.set(method, query, Reply::Fail(message.to_string()));

		self
	}

	/// Never answers; only a timeout or cancellation ends the call.
	pub fn with_hang(mut self, method: MethodKind, query: &str) -> Self {
		self.set(method, query, Reply::Hang);

		self
	}

	pub fn with_delay(mut self, method: MethodKind, query: &str, delay: Duration) -> Self {
		self.entries
			.entry((method, query.to_string()))
			.or_insert_with(|| Entry { reply: Reply::Hits(Vec::new()), delay: None })
			.delay = Some(delay);

		self
	}

	/// Labels the frame `id` with `objects` for the object filter.
	pub fn with_objects(mut self, id: &str, objects: &[&str]) -> Self {
		self.objects
			.entry(id.to_string())
			.or_default()
			.extend(objects.iter().map(|object| object.to_string()));

		self
	}

	pub fn with_object_filter_failure(mut self, message: &str) -> Self {
		self.object_filter_failure = Some(message.to_string());

		self
	}

	/// Id lists sent to the object filter, one entry per call.
	pub fn object_filter_calls(&self) -> Vec<Vec<String>> {
		self.object_filter_calls.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}

	pub fn calls(&self) -> Vec<RecordedCall> {
		self.calls.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}

	pub fn call_count(&self) -> usize {
		self.calls.lock().unwrap_or_else(|err| err.into_inner()).len()
	}

	/// Highest number of calls observed running at once.
	pub fn peak_in_flight(&self) -> usize {
		self.peak_in_flight.load(Ordering::SeqCst)
	}

	pub fn in_flight(&self) -> usize {
		self.in_flight.load(Ordering::SeqCst)
	}

	fn set(&mut self, method: MethodKind, query: &str, reply: Reply) {
		let entry = self
			.entries
			.entry((method, query.to_string()))
			.or_insert_with(|| Entry { reply: Reply::Hits(Vec::new()), delay: None });

		entry.reply = reply;
	}

	fn lookup(&self, method: MethodKind, query: &str) -> Option<Entry> {
		self.entries
			.get(&(method, query.to_string()))
			.or_else(|| self.entries.get(&(method, ANY_QUERY.to_string())))
			.cloned()
	}
}
impl RetrievalProvider for RecordedBackend {
	fn retrieve<'a>(
		&'a self,
		_cfg: &'a RetrievalProviderConfig,
		method: MethodKind,
		query: &'a str,
		limit: u32,
	) -> BoxFuture<'a, frameseek_providers::Result<Vec<Candidate>>> {
		self.calls.lock().unwrap_or_else(|err| err.into_inner()).push(RecordedCall {
			method,
			query: query.to_string(),
			limit,
		});

		let entry = self.lookup(method, query);
		let guard = InFlight::enter(Arc::clone(&self.in_flight));

		self.peak_in_flight.fetch_max(guard.current, Ordering::SeqCst);

		Box::pin(async move {
			let _guard = guard;
			let Some(entry) = entry else { return Ok(Vec::new()) };

			if let Some(delay) = entry.delay {
				tokio::time::sleep(delay).await;
			}

			match entry.reply {
				Reply::Hits(hits) => Ok(hits
					.into_iter()
					.take(limit as usize)
					.map(|hit| Candidate {
						id: hit.id,
						video_id: hit.video_id,
						frame_index: hit.frame_index,
						raw_score: hit.score,
						method,
					})
					.collect()),
				Reply::Fail(message) =>
					Err(frameseek_providers::Error::InvalidResponse { message }),
				Reply::Hang => std::future::pending().await,
			}
		})
	}
}

impl ObjectFilterProvider for RecordedBackend {
	fn filter<'a>(
		&'a self,
		_cfg: &'a ObjectFilterProviderConfig,
		ids: &'a [String],
		objects: &'a [String],
	) -> BoxFuture<'a, frameseek_providers::Result<Vec<String>>> {
		self.object_filter_calls.lock().unwrap_or_else(|err| err.into_inner()).push(ids.to_vec());

		Box::pin(async move {
			if let Some(message) = self.object_filter_failure.clone() {
				return Err(frameseek_providers::Error::InvalidResponse { message });
			}

			Ok(ids
				.iter()
				.filter(|id| {
					self.objects
						.get(id.as_str())
						.is_some_and(|labels| objects.iter().all(|object| labels.contains(object)))
				})
				.cloned()
				.collect())
		})
	}
}

struct InFlight {
	counter: Arc<AtomicUsize>,
	current: usize,
}
impl InFlight {
	fn enter(counter: Arc<AtomicUsize>) -> Self {
		let current = counter.fetch_add(1, Ordering::SeqCst) + 1;

		Self { counter, current }
	}
}
impl Drop for InFlight {
	fn drop(&mut self) {
		self.counter.fetch_sub(1, Ordering::SeqCst);
	}
}

/// A valid configuration pointing at loopback retrieval and object filter endpoints.
pub fn test_config() -> Config {
	Config {
		service: Service { log_level: "info".to_string() },
		search: Search::default(),
		ensemble: Ensemble::default(),
		stage: Stage::default(),
		temporal: Temporal::default(),
		providers: Providers {
			retrieval: RetrievalProviderConfig {
				provider_id: "recorded".to_string(),
				api_base: "http://127.0.0.1:9".to_string(),
				api_key: String::new(),
				path: "/v1/retrieve".to_string(),
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
			object_filter: Some(ObjectFilterProviderConfig {
				provider_id: "recorded".to_string(),
				api_base: "http://127.0.0.1:9".to_string(),
				api_key: String::new(),
				path: "/v1/objects/filter".to_string(),
				timeout_ms: 1_000,
				default_headers: Map::new(),
			}),
		},
	}
}
