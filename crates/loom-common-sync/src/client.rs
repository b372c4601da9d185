// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::SyncError;
use crate::wire::{PullRequest, PullResponse, PushRequest, PushResponse, PULL_PATH, PUSH_PATH};

/// Bearer credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
	pub fn new(token: impl Into<String>) -> Self {
		Self(token.into())
	}

	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for AuthToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("AuthToken([REDACTED])")
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct FetchResponse {
	pub status: u16,
	/// Parsed JSON body, or `Value::Null` when the body is empty or not JSON.
	pub body: Value,
}

impl FetchResponse {
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// The server's `error` field, if it sent one.
	pub fn error_message(&self) -> Option<&str> {
		self.body.get("error").and_then(Value::as_str)
	}
}

/// Authenticated transport to the remote store.
///
/// Credential refresh and the single retry after an expired token belong to
/// the implementation; callers only see the final response.
#[async_trait]
pub trait AuthFetch: Send + Sync {
	async fn post_json(&self, path: &str, body: Value) -> Result<FetchResponse, SyncError>;

	/// Best-effort send that returns immediately. Delivery is not guaranteed.
	fn beacon(&self, path: &str, body: Value);
}

/// [`AuthFetch`] over reqwest with a static bearer token.
#[derive(Clone)]
pub struct HttpAuthFetch {
	base_url: Url,
	http: reqwest::Client,
	token: Option<AuthToken>,
}

impl HttpAuthFetch {
	pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SyncError> {
		let mut normalized = base_url.trim().to_string();
		if !normalized.ends_with('/') {
			normalized.push('/');
		}
		let base_url = Url::parse(&normalized).map_err(|e| SyncError::InvalidUrl(e.to_string()))?;
		let http = loom_common_http::new_client_with_timeout(timeout)?;

		Ok(Self {
			base_url,
			http,
			token: None,
		})
	}

	pub fn with_token(mut self, token: AuthToken) -> Self {
		self.token = Some(token);
		self
	}

	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	fn endpoint(&self, path: &str) -> Result<Url, SyncError> {
		self
			.base_url
			.join(path.trim_start_matches('/'))
			.map_err(|e| SyncError::InvalidUrl(e.to_string()))
	}

	fn request(&self, url: Url, body: &Value) -> reqwest::RequestBuilder {
		let req = self.http.post(url).json(body);
		match &self.token {
			Some(token) => req.bearer_auth(token.expose()),
			None => req,
		}
	}
}

#[async_trait]
impl AuthFetch for HttpAuthFetch {
	async fn post_json(&self, path: &str, body: Value) -> Result<FetchResponse, SyncError> {
		let url = self.endpoint(path)?;
		debug!(url = %url, "POST");

		let response = self.request(url, &body).send().await?;
		let status = response.status().as_u16();
		let text = response.text().await?;
		let body = serde_json::from_str(&text).unwrap_or(Value::Null);

		Ok(FetchResponse { status, body })
	}

	fn beacon(&self, path: &str, body: Value) {
		let url = match self.endpoint(path) {
			Ok(url) => url,
			Err(e) => {
				warn!(error = %e, "beacon dropped");
				return;
			}
		};

		let Ok(handle) = tokio::runtime::Handle::try_current() else {
			warn!("no runtime for beacon, dropped");
			return;
		};

		let request = self.request(url, &body);
		handle.spawn(async move {
			match request.send().await {
				Ok(resp) => debug!(status = resp.status().as_u16(), "beacon delivered"),
				Err(e) => debug!(error = %e, "beacon failed"),
			}
		});
	}
}

/// Speaks the pull/push protocol over any [`AuthFetch`].
#[derive(Clone)]
pub struct SyncClient {
	fetch: Arc<dyn AuthFetch>,
}

impl SyncClient {
	pub fn new(fetch: Arc<dyn AuthFetch>) -> Self {
		Self { fetch }
	}

	pub async fn pull(&self, request: &PullRequest) -> Result<PullResponse, SyncError> {
		let response: PullResponse = self.call(PULL_PATH, request).await?;
		info!(
			count = response.models.len(),
			server_time = %response.server_time,
			"pulled changes"
		);
		Ok(response)
	}

	pub async fn push(&self, request: &PushRequest) -> Result<PushResponse, SyncError> {
		let response: PushResponse = self.call(PUSH_PATH, request).await?;
		info!(
			sent = request.changes.len(),
			applied = response.results.applied_count(),
			conflicts = response.results.conflicts.len(),
			"pushed changes"
		);
		Ok(response)
	}

	/// Fire-and-forget push used while the host is shutting down.
	pub fn push_beacon(&self, request: &PushRequest) {
		match serde_json::to_value(request) {
			Ok(body) => self.fetch.beacon(PUSH_PATH, body),
			Err(e) => warn!(error = %e, "failed to encode beacon push"),
		}
	}

	async fn call<Req, Resp>(&self, path: &str, request: &Req) -> Result<Resp, SyncError>
	where
		Req: Serialize,
		Resp: DeserializeOwned,
	{
		let body = serde_json::to_value(request)?;
		let response = self.fetch.post_json(path, body).await?;

		if !response.is_success() {
			let message = response
				.error_message()
				.map(str::to_string)
				.unwrap_or_else(|| format!("HTTP {}", response.status));

			return Err(match response.status {
				401 | 403 => SyncError::Auth(message),
				status => SyncError::Server { status, message },
			});
		}

		Ok(serde_json::from_value(response.body)?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use std::sync::Mutex;
	use wiremock::matchers::{body_json, header, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	struct CannedFetch {
		response: FetchResponse,
		calls: Mutex<Vec<(String, Value)>>,
	}

	impl CannedFetch {
		fn new(status: u16, body: Value) -> Arc<Self> {
			Arc::new(Self {
				response: FetchResponse { status, body },
				calls: Mutex::new(Vec::new()),
			})
		}
	}

	#[async_trait]
	impl AuthFetch for CannedFetch {
		async fn post_json(&self, path: &str, body: Value) -> Result<FetchResponse, SyncError> {
			self.calls.lock().unwrap().push((path.to_string(), body));
			Ok(self.response.clone())
		}

		fn beacon(&self, path: &str, body: Value) {
			self.calls.lock().unwrap().push((path.to_string(), body));
		}
	}

	#[test]
	fn token_debug_is_redacted() {
		let token = AuthToken::new("super-secret");
		assert!(!format!("{token:?}").contains("super-secret"));
	}

	#[tokio::test]
	async fn non_2xx_uses_error_field() {
		let fetch = CannedFetch::new(500, json!({"error": "database is down"}));
		let client = SyncClient::new(fetch);

		let err = client
			.pull(&PullRequest { last_sync_at: None })
			.await
			.unwrap_err();

		match err {
			SyncError::Server { status, message } => {
				assert_eq!(status, 500);
				assert_eq!(message, "database is down");
			}
			other => panic!("unexpected error: {other:?}"),
		}
	}

	#[tokio::test]
	async fn unauthorized_maps_to_auth_error() {
		let fetch = CannedFetch::new(401, json!({"error": "token expired", "code": "TOKEN_EXPIRED"}));
		let client = SyncClient::new(fetch);

		let err = client
			.push(&PushRequest { changes: vec![] })
			.await
			.unwrap_err();
		assert!(matches!(err, SyncError::Auth(msg) if msg == "token expired"));
	}

	#[tokio::test]
	async fn error_without_body_reports_status() {
		let fetch = CannedFetch::new(502, Value::Null);
		let client = SyncClient::new(fetch);

		let err = client
			.pull(&PullRequest { last_sync_at: None })
			.await
			.unwrap_err();
		assert_eq!(err.to_string(), "server error: 502 - HTTP 502");
	}

	#[tokio::test]
	async fn malformed_success_body_is_invalid_response() {
		let fetch = CannedFetch::new(200, json!({"unexpected": true}));
		let client = SyncClient::new(fetch);

		let err = client
			.pull(&PullRequest { last_sync_at: None })
			.await
			.unwrap_err();
		assert!(matches!(err, SyncError::InvalidResponse(_)));
	}

	#[tokio::test]
	async fn beacon_goes_to_push_path() {
		let fetch = CannedFetch::new(200, Value::Null);
		let client = SyncClient::new(fetch.clone());

		client.push_beacon(&PushRequest { changes: vec![] });

		let calls = fetch.calls.lock().unwrap();
		assert_eq!(calls[0].0, PUSH_PATH);
		assert_eq!(calls[0].1, json!({"changes": []}));
	}

	#[tokio::test]
	async fn http_fetch_sends_bearer_and_json() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/api/sync/pull"))
			.and(header("authorization", "Bearer abc123"))
			.and(body_json(json!({"lastSyncAt": "2025-01-01T00:00:00Z"})))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"models": [{"id": "m1", "title": "Hi", "updatedAt": "2025-01-02T00:00:00Z"}],
				"serverTime": "2025-01-03T00:00:00Z",
				"count": 1
			})))
			.expect(1)
			.mount(&server)
			.await;

		let fetch = HttpAuthFetch::new(&format!("{}/api", server.uri()), Duration::from_secs(5))
			.unwrap()
			.with_token(AuthToken::new("abc123"));
		let client = SyncClient::new(Arc::new(fetch));

		let response = client
			.pull(&PullRequest {
				last_sync_at: Some("2025-01-01T00:00:00Z".into()),
			})
			.await
			.unwrap();

		assert_eq!(response.count, 1);
		assert_eq!(response.server_time, "2025-01-03T00:00:00Z");
	}

	#[tokio::test]
	async fn http_fetch_reads_error_body() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/sync/push"))
			.respond_with(ResponseTemplate::new(422).set_body_json(json!({"error": "bad change"})))
			.mount(&server)
			.await;

		let fetch = HttpAuthFetch::new(&server.uri(), Duration::from_secs(5)).unwrap();
		let client = SyncClient::new(Arc::new(fetch));

		let err = client
			.push(&PushRequest { changes: vec![] })
			.await
			.unwrap_err();
		assert!(matches!(err, SyncError::Server { status: 422, ref message } if message == "bad change"));
	}

	#[test]
	fn invalid_base_url_is_rejected() {
		assert!(matches!(
			HttpAuthFetch::new("not a url", Duration::from_secs(1)),
			Err(SyncError::InvalidUrl(_))
		));
	}
}
