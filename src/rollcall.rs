//! High level rollcall orchestration.
//!
//! Wires together the password cipher, the login form extractor, the
//! transport seam and the result classifier to expose a single operation:
//! fetch the rollcall page, log in when the portal asks for it, follow the
//! portal's `Refresh` redirects and report what the final page says.

use std::sync::Arc;
use std::time::{Duration, Instant};

use http::header::{HeaderMap, HeaderValue, ORIGIN, REFERER};
use http::Method;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::{ConfigError, RollcallConfig};
use crate::modules::events::{
	AttemptEvent, AttemptStage, ErrorEvent, EventDispatcher, EventHandler, LoggingHandler,
	MetricsHandler, OutcomeEvent, PostResponseEvent, PreRequestEvent,
};
use crate::modules::metrics::{MetricsCollector, MetricsSnapshot};
use crate::portal::core::{
	CipherError, Credentials, CredentialsError, PaddingPolicy, PortalHttpClient,
	PortalHttpClientError, PortalHttpResponse, ReqwestSessionFactory, RollcallOutcome,
	RollcallResult, SessionFactory, encrypt_password, extract_login_form, origin_from_url,
};
use crate::portal::detectors::{MarkerSet, ResultClassifier};

/// Path of the rollcall entry page, relative to the portal base URL.
pub const ROLLCALL_PATH: &str = "/mooc/teach/rollcall/start.php";
/// Landing page the portal redirects to after a successful login.
const LOGIN_ACCEPTED_PAGE: &str = "account_use.php";

/// Result alias used across the orchestration layer.
pub type RollcallClientResult<T> = Result<T, RollcallError>;

/// Error surfaced when an attempt cannot produce a verdict.
///
/// `HttpStatus`, `Transport` and `Session` are the HTTP failures; none of
/// them is retried internally.
#[derive(Debug, Error)]
pub enum RollcallError {
	#[error("invalid credentials: {0}")]
	InvalidCredentials(#[from] CredentialsError),
	#[error("{stage} request to {url} returned HTTP {status}")]
	HttpStatus {
		stage: AttemptStage,
		status: u16,
		url: Url,
	},
	#[error("{stage} request failed: {message}")]
	Transport { stage: AttemptStage, message: String },
	#[error("{stage} request timed out after {timeout:?}")]
	Timeout {
		stage: AttemptStage,
		timeout: Duration,
	},
	#[error("invalid key material: {0}")]
	InvalidKeyMaterial(#[from] CipherError),
	#[error("attempt cancelled during {0}")]
	Cancelled(AttemptStage),
	#[error("invalid rollcall url: {0}")]
	InvalidUrl(#[from] url::ParseError),
	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),
	#[error("failed to open http session: {0}")]
	Session(PortalHttpClientError),
	#[error("header conversion failed: {0}")]
	InvalidHeader(String),
}

impl RollcallError {
	/// Stage whose network call failed without producing a response.
	pub fn network_stage(&self) -> Option<AttemptStage> {
		match self {
			RollcallError::Transport { stage, .. } | RollcallError::Timeout { stage, .. } => {
				Some(*stage)
			}
			_ => None,
		}
	}

	pub fn is_timeout(&self) -> bool {
		matches!(self, RollcallError::Timeout { .. })
	}
}

/// Fluent builder for [`RollcallClient`].
pub struct RollcallClientBuilder {
	config: RollcallConfig,
	session_factory: Option<Arc<dyn SessionFactory>>,
	handlers: Vec<Arc<dyn EventHandler>>,
	enable_logging: bool,
	enable_metrics: bool,
}

impl RollcallClientBuilder {
	pub fn new() -> Self {
		Self {
			config: RollcallConfig::default(),
			session_factory: None,
			handlers: Vec::new(),
			enable_logging: true,
			enable_metrics: true,
		}
	}

	pub fn with_config(mut self, config: RollcallConfig) -> Self {
		self.config = config;
		self
	}

	pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
		self.config.base_url = base_url.into();
		self
	}

	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		self.config.request_timeout_ms = timeout.as_millis().min(u64::MAX as u128) as u64;
		self
	}

	pub fn with_padding(mut self, padding: PaddingPolicy) -> Self {
		self.config.padding = padding;
		self
	}

	pub fn with_markers(mut self, markers: MarkerSet) -> Self {
		self.config.markers = markers;
		self
	}

	pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
		self.config.user_agent = user_agent.into();
		self
	}

	pub fn with_max_refresh_hops(mut self, hops: usize) -> Self {
		self.config.max_refresh_hops = hops;
		self
	}

	/// Replace the reqwest transport, e.g. with a recording or canned one.
	pub fn with_session_factory(mut self, factory: Arc<dyn SessionFactory>) -> Self {
		self.session_factory = Some(factory);
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.handlers.push(handler);
		self
	}

	pub fn disable_logging(mut self) -> Self {
		self.enable_logging = false;
		self
	}

	pub fn disable_metrics(mut self) -> Self {
		self.enable_metrics = false;
		self
	}

	pub fn build(self) -> RollcallClientResult<RollcallClient> {
		self.config.validate()?;
		let base_url = self.config.base_url()?;

		let sessions = match self.session_factory {
			Some(factory) => factory,
			None => Arc::new(
				ReqwestSessionFactory::new(&self.config).map_err(RollcallError::Session)?,
			),
		};

		let metrics = self.enable_metrics.then(MetricsCollector::new);

		let mut events = EventDispatcher::new();
		if self.enable_logging {
			events.register_handler(Arc::new(LoggingHandler));
		}
		if let Some(ref collector) = metrics {
			events.register_handler(Arc::new(MetricsHandler::new(collector.clone())));
		}
		for handler in self.handlers {
			events.register_handler(handler);
		}

		Ok(RollcallClient {
			classifier: ResultClassifier::new(&self.config.markers),
			config: self.config,
			base_url,
			sessions,
			events: Arc::new(events),
			metrics,
		})
	}
}

impl Default for RollcallClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Rollcall protocol client.
///
/// Cheap to share behind an `Arc`; every attempt opens its own session, so
/// concurrent attempts for different users never share cookies.
pub struct RollcallClient {
	config: RollcallConfig,
	base_url: Url,
	sessions: Arc<dyn SessionFactory>,
	classifier: ResultClassifier,
	events: Arc<EventDispatcher>,
	metrics: Option<MetricsCollector>,
}

impl RollcallClient {
	/// Construct a client for the default portal.
	pub fn new() -> RollcallClientResult<Self> {
		RollcallClientBuilder::new().build()
	}

	/// Obtain a builder to customise the client instance.
	pub fn builder() -> RollcallClientBuilder {
		RollcallClientBuilder::new()
	}

	pub fn config(&self) -> &RollcallConfig {
		&self.config
	}

	/// Aggregated statistics, if metrics are enabled.
	pub fn metrics(&self) -> Option<MetricsSnapshot> {
		self.metrics.as_ref().map(MetricsCollector::snapshot)
	}

	/// Rollcall entry URL; a missing or blank token yields the bare page.
	pub fn rollcall_url(&self, goto: Option<&str>) -> RollcallClientResult<Url> {
		let base = self.base_url.as_str().trim_end_matches('/');
		let mut url = Url::parse(&format!("{base}{ROLLCALL_PATH}"))?;
		if let Some(token) = goto.map(str::trim).filter(|token| !token.is_empty()) {
			url.set_query(Some(&format!("goto={token}")));
		}
		Ok(url)
	}

	/// Validate raw credentials, then run [`RollcallClient::attempt_rollcall`].
	pub async fn attempt(
		&self,
		goto: Option<&str>,
		username: &str,
		password: &str,
	) -> RollcallClientResult<RollcallResult> {
		let credentials = Credentials::new(username, password)?;
		self.attempt_rollcall(goto, &credentials).await
	}

	/// Run one rollcall attempt to completion.
	pub async fn attempt_rollcall(
		&self,
		goto: Option<&str>,
		credentials: &Credentials,
	) -> RollcallClientResult<RollcallResult> {
		self.attempt_rollcall_with_cancel(goto, credentials, &CancellationToken::new())
			.await
	}

	/// Run one rollcall attempt, aborting with [`RollcallError::Cancelled`]
	/// as soon as `cancel` fires.
	///
	/// The session is released on every exit path, including when the caller
	/// drops the returned future.
	pub async fn attempt_rollcall_with_cancel(
		&self,
		goto: Option<&str>,
		credentials: &Credentials,
		cancel: &CancellationToken,
	) -> RollcallClientResult<RollcallResult> {
		let result = self.run_attempt(goto, credentials, cancel).await;
		self.report(credentials.username(), &result);
		result
	}

	async fn run_attempt(
		&self,
		goto: Option<&str>,
		credentials: &Credentials,
		cancel: &CancellationToken,
	) -> RollcallClientResult<RollcallResult> {
		let rollcall_url = self.rollcall_url(goto)?;
		if cancel.is_cancelled() {
			return Err(RollcallError::Cancelled(AttemptStage::Fetch));
		}

		let session = self.sessions.open_session().map_err(RollcallError::Session)?;
		let attempt = Attempt {
			client: self,
			session: session.as_ref(),
			credentials,
			cancel,
			started: Instant::now(),
		};

		attempt.run(rollcall_url).await
	}

	fn report(&self, username: &str, result: &RollcallClientResult<RollcallResult>) {
		let event = match result {
			Ok(result) => AttemptEvent::Outcome(OutcomeEvent {
				username: username.to_string(),
				outcome: result.outcome,
				message: result.message.clone(),
				elapsed: result.elapsed,
				timestamp: chrono::Utc::now(),
			}),
			Err(err) => AttemptEvent::Error(ErrorEvent {
				username: username.to_string(),
				stage: err.network_stage(),
				error: err.to_string(),
				timestamp: chrono::Utc::now(),
			}),
		};
		self.events.dispatch(event);
	}
}

enum PortalRequest<'a> {
	Get(&'a Url),
	PostForm {
		url: &'a Url,
		fields: &'a [(String, String)],
	},
}

impl PortalRequest<'_> {
	fn method(&self) -> Method {
		match self {
			PortalRequest::Get(_) => Method::GET,
			PortalRequest::PostForm { .. } => Method::POST,
		}
	}

	fn url(&self) -> &Url {
		match self {
			PortalRequest::Get(url) => url,
			PortalRequest::PostForm { url, .. } => url,
		}
	}
}

/// State of a single attempt; lives exactly as long as its session borrow.
struct Attempt<'a> {
	client: &'a RollcallClient,
	session: &'a dyn PortalHttpClient,
	credentials: &'a Credentials,
	cancel: &'a CancellationToken,
	started: Instant,
}

impl Attempt<'_> {
	async fn run(&self, rollcall_url: Url) -> RollcallClientResult<RollcallResult> {
		let page = self
			.exchange(AttemptStage::Fetch, PortalRequest::Get(&rollcall_url), &HeaderMap::new())
			.await?;
		let login_page = page.text();

		if let Some(detection) = self.client.classifier.classify(&login_page) {
			return Ok(self.finish(
				detection.outcome,
				format!("rollcall page shows \"{}\"", detection.marker),
			));
		}

		let form = match extract_login_form(&login_page, &page.url) {
			Ok(form) => form,
			Err(err) => {
				return Ok(self.finish(
					RollcallOutcome::Undetermined,
					format!("login form unusable: {err}"),
				));
			}
		};

		let login_key = form.login_key().unwrap_or_default().to_string();
		if login_key.is_empty() {
			log::warn!(
				"[{}] no login_key on {}; encrypting with an empty key",
				self.credentials.username(),
				page.url
			);
		}
		let encrypt_pwd = encrypt_password(
			self.credentials.password(),
			&login_key,
			self.client.config.padding,
		)?;
		let submission = form.into_submission(self.credentials, encrypt_pwd);

		let headers = navigation_headers(&page.url, true)?;
		let mut latest = self
			.exchange(
				AttemptStage::Login,
				PortalRequest::PostForm {
					url: &submission.url,
					fields: &submission.fields,
				},
				&headers,
			)
			.await?;

		for hop in 0..self.client.config.max_refresh_hops {
			let header_target = latest.header_refresh_target();
			let target = match header_target {
				Some(target) if hop == 0 => target,
				header_target => {
					// Never navigate away from a page that already carries a verdict.
					if self.client.classifier.classify(&latest.text()).is_some() {
						break;
					}
					match header_target.or_else(|| latest.meta_refresh_target()) {
						Some(target) => target,
						None => break,
					}
				}
			};
			let headers = navigation_headers(&latest.url, false)?;
			latest = self
				.exchange(AttemptStage::Refresh, PortalRequest::Get(&target), &headers)
				.await?;
		}

		Ok(self.conclude(&login_page, &latest))
	}

	/// Classify the page reached after logging in.
	fn conclude(&self, login_page: &str, latest: &PortalHttpResponse) -> RollcallResult {
		let classifier = &self.client.classifier;
		let final_page = latest.text();

		if let Some(detection) = classifier.classify(&final_page) {
			return self.finish(
				detection.outcome,
				format!("portal shows \"{}\" after login", detection.marker),
			);
		}

		if classifier.indicates_bad_credentials(&final_page)
			|| classifier.indicates_bad_credentials(login_page)
		{
			return self.finish(
				RollcallOutcome::LoginFailed,
				"portal rejected the username or password",
			);
		}

		let message = if latest.url.as_str().contains(LOGIN_ACCEPTED_PAGE) {
			format!("login accepted ({}) but no rollcall marker found", latest.url)
		} else {
			format!("no rollcall marker found at {}", latest.url)
		};
		self.finish(RollcallOutcome::Undetermined, message)
	}

	fn finish(&self, outcome: RollcallOutcome, message: impl Into<String>) -> RollcallResult {
		RollcallResult::new(outcome, message, self.started.elapsed())
	}

	/// One bounded, cancellable request; non-2xx responses are errors.
	async fn exchange(
		&self,
		stage: AttemptStage,
		request: PortalRequest<'_>,
		headers: &HeaderMap,
	) -> RollcallClientResult<PortalHttpResponse> {
		if self.cancel.is_cancelled() {
			return Err(RollcallError::Cancelled(stage));
		}

		let method = request.method();
		let url = request.url().clone();
		let username = self.credentials.username();
		self.client.events.dispatch(AttemptEvent::PreRequest(PreRequestEvent {
			username: username.to_string(),
			stage,
			url: url.clone(),
			method: method.clone(),
			timestamp: chrono::Utc::now(),
		}));

		let timeout = self.client.config.request_timeout();
		let call = async {
			match request {
				PortalRequest::Get(url) => self.session.get(url, headers).await,
				PortalRequest::PostForm { url, fields } => {
					self.session.post_form(url, headers, fields).await
				}
			}
		};

		let started = Instant::now();
		let outcome = tokio::select! {
			biased;
			_ = self.cancel.cancelled() => return Err(RollcallError::Cancelled(stage)),
			outcome = tokio::time::timeout(timeout, call) => outcome,
		};

		let response = match outcome {
			Ok(Ok(response)) => response,
			Ok(Err(PortalHttpClientError::Timeout)) | Err(_) => {
				return Err(RollcallError::Timeout { stage, timeout });
			}
			Ok(Err(PortalHttpClientError::Transport(message))) => {
				return Err(RollcallError::Transport { stage, message });
			}
		};

		self.client.events.dispatch(AttemptEvent::PostResponse(PostResponseEvent {
			username: username.to_string(),
			stage,
			url: response.url.clone(),
			method,
			status: response.status,
			latency: started.elapsed(),
			timestamp: chrono::Utc::now(),
		}));

		if !response.is_success() {
			return Err(RollcallError::HttpStatus {
				stage,
				status: response.status,
				url: response.url,
			});
		}

		Ok(response)
	}
}

/// `Referer` (and for form posts `Origin`) pointing at the page we came from.
fn navigation_headers(from: &Url, with_origin: bool) -> RollcallClientResult<HeaderMap> {
	let mut headers = HeaderMap::new();
	headers.insert(
		REFERER,
		HeaderValue::from_str(from.as_str())
			.map_err(|_| RollcallError::InvalidHeader("referer".into()))?,
	);
	if with_origin {
		headers.insert(
			ORIGIN,
			HeaderValue::from_str(&origin_from_url(from))
				.map_err(|_| RollcallError::InvalidHeader("origin".into()))?,
		);
	}
	Ok(headers)
}

#[cfg(test)]
mod tests {
	use super::*;

	struct NoSessions;

	impl SessionFactory for NoSessions {
		fn open_session(&self) -> Result<Box<dyn PortalHttpClient>, PortalHttpClientError> {
			Err(PortalHttpClientError::Transport("offline".into()))
		}
	}

	fn client(base_url: &str) -> RollcallClient {
		RollcallClient::builder()
			.with_base_url(base_url)
			.with_session_factory(Arc::new(NoSessions))
			.disable_logging()
			.build()
			.unwrap()
	}

	#[test]
	fn builds_rollcall_url_with_and_without_goto() {
		let client = client("https://elearning.nkust.edu.tw");
		assert_eq!(
			client.rollcall_url(Some("MeFqUN8kZvb5_xwEVC2T5uO~~")).unwrap().as_str(),
			"https://elearning.nkust.edu.tw/mooc/teach/rollcall/start.php?goto=MeFqUN8kZvb5_xwEVC2T5uO~~"
		);
		assert_eq!(
			client.rollcall_url(None).unwrap().as_str(),
			"https://elearning.nkust.edu.tw/mooc/teach/rollcall/start.php"
		);
		assert_eq!(
			client.rollcall_url(Some("  ")).unwrap().as_str(),
			"https://elearning.nkust.edu.tw/mooc/teach/rollcall/start.php"
		);
	}

	#[test]
	fn keeps_base_path_prefix() {
		let client = client("http://127.0.0.1:8080/portal/");
		assert_eq!(
			client.rollcall_url(None).unwrap().as_str(),
			"http://127.0.0.1:8080/portal/mooc/teach/rollcall/start.php"
		);
	}

	#[test]
	fn rejects_invalid_configuration() {
		let result = RollcallClient::builder()
			.with_base_url("not a url")
			.with_session_factory(Arc::new(NoSessions))
			.build();
		assert!(matches!(result, Err(RollcallError::Config(_))));
	}

	#[tokio::test]
	async fn session_failure_is_reported_as_error() {
		let client = client("https://portal.test");
		let creds = Credentials::new("alice", "pw").unwrap();
		let err = client.attempt_rollcall(None, &creds).await.unwrap_err();
		assert!(matches!(err, RollcallError::Session(_)));
		assert_eq!(client.metrics().unwrap().errors, 1);
	}

	#[tokio::test]
	async fn empty_credentials_fail_fast() {
		let client = client("https://portal.test");
		let err = client.attempt(None, "", "pw").await.unwrap_err();
		assert!(matches!(
			err,
			RollcallError::InvalidCredentials(CredentialsError::EmptyUsername)
		));
		assert_eq!(client.metrics().unwrap().attempts, 0);
	}

	#[test]
	fn navigation_headers_carry_referer_and_origin() {
		let from = Url::parse("https://portal.test:8443/mooc/login.php?goto=x").unwrap();
		let headers = navigation_headers(&from, true).unwrap();
		assert_eq!(headers[REFERER], "https://portal.test:8443/mooc/login.php?goto=x");
		assert_eq!(headers[ORIGIN], "https://portal.test:8443");
		assert!(!navigation_headers(&from, false).unwrap().contains_key(ORIGIN));
	}
}
