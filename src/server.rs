//! HTTP API for ban reporters.
//!
//! `POST /api/sync` takes `{"domain": "...", "bans": {"<ip>": <seconds>}}`,
//! checks the caller IP, validates the body and runs a sync. Syncs for the same
//! domain are serialised so two reporters cannot both create the rule.
//!
//! Ban keys are parsed as IP addresses and echoed back in canonical form, so
//! `0:0:0:0:0:0:0:1` comes back as `::1`. Two keys naming the same address are
//! rejected.

use crate::config::{AllowlistEntry, CallerConfig};
use crate::error::SyncError;
use crate::expression::BanSet;
use crate::sync::BanSyncService;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dashmap::DashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

/// Shared state for the HTTP handlers.
pub struct AppState {
    service: BanSyncService,
    caller: CallerConfig,
    allowlist: Vec<AllowlistEntry>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl AppState {
    pub fn new(service: BanSyncService, caller: CallerConfig) -> Self {
        let allowlist = caller.parse_allowlist();
        Self {
            service,
            caller,
            allowlist,
            locks: DashMap::new(),
        }
    }

    /// Check the caller IP against the allowlist. An empty allowlist admits everyone.
    fn authorize(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        if self.allowlist.is_empty() {
            return Ok(());
        }

        let ip = extract_client_ip(headers, &self.caller);
        info!(caller = ?ip, "Request from caller");

        match ip {
            Some(ip) if self.allowlist.iter().any(|entry| entry.contains(&ip)) => Ok(()),
            Some(ip) => {
                warn!(caller = %ip, "Unauthorized IP attempted access");
                Err(ApiError::Forbidden(format!("IP {} not allowed", ip)))
            }
            None => {
                warn!("Request without a caller IP header");
                Err(ApiError::Forbidden("IP unknown not allowed".to_string()))
            }
        }
    }

    /// Per-domain guard. Domains off the allow-list get none; the sync rejects them.
    async fn domain_guard(&self, domain: &str) -> Option<OwnedMutexGuard<()>> {
        if !self.service.resolver().is_allowed(domain) {
            return None;
        }
        let lock = self.locks.entry(domain.to_string()).or_default().clone();
        Some(lock.lock_owned().await)
    }
}

/// Build the API router, including the OpenAPI docs.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/sync", post(sync_bans))
        .route("/health", get(health))
        .with_state(state)
        .merge(crate::docs::docs_router())
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = String)),
    tag = "health"
)]
pub async fn health() -> &'static str {
    "ok"
}

/// Body of `POST /api/sync`.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct SyncRequest {
    /// Single domain to sync.
    #[serde(default)]
    #[validate(
        length(min = 1, code = "too_small", message = "Domain cannot be empty"),
        custom(function = "validate_single_domain")
    )]
    #[schema(example = "example.com")]
    pub domain: String,

    /// Banned IP addresses mapped to ban durations in seconds.
    #[schema(value_type = Object, example = json!({"192.0.2.1": 3600, "2001:db8::1": 600}))]
    pub bans: Option<IndexMap<String, Value>>,
}

fn validate_single_domain(domain: &str) -> Result<(), ValidationError> {
    if domain.contains(',') || domain.contains(' ') {
        return Err(ValidationError::new("custom")
            .with_message(Cow::Borrowed("Only a single domain is allowed")));
    }
    Ok(())
}

/// Ban duration in whole seconds. Integral floats such as `3600.0` are accepted.
fn ban_duration(value: &Value) -> Option<u64> {
    let seconds = match value.as_u64() {
        Some(seconds) => seconds,
        None => {
            let seconds = value.as_f64()?;
            if seconds.fract() != 0.0 || seconds < 1.0 || seconds >= u64::MAX as f64 {
                return None;
            }
            seconds as u64
        }
    };
    (seconds > 0).then_some(seconds)
}

fn ban_error(
    key: &str,
    code: &'static str,
    message: impl Into<Cow<'static, str>>,
) -> ValidationError {
    let mut err = ValidationError::new(code).with_message(message.into());
    err.add_param(Cow::Borrowed("key"), &key);
    err
}

impl SyncRequest {
    /// Validate the body and build its ban set, collecting every problem found.
    pub fn into_bans(self) -> Result<(String, BanSet), ValidationErrors> {
        let mut errors = match self.validate() {
            Ok(()) => ValidationErrors::new(),
            Err(errors) => errors,
        };

        let mut bans = BanSet::new();
        match &self.bans {
            Some(entries) => {
                for (key, value) in entries {
                    let ip = key.parse::<IpAddr>();
                    let duration = ban_duration(value);

                    if ip.is_err() {
                        errors.add("bans", ban_error(key, "invalid_ip", "Invalid IP address"));
                    }
                    if duration.is_none() {
                        errors.add(
                            "bans",
                            ban_error(
                                key,
                                "invalid_duration",
                                "Ban duration must be a positive integer",
                            ),
                        );
                    }
                    if let (Ok(ip), Some(duration)) = (ip, duration) {
                        if bans.insert(ip, duration).is_some() {
                            errors.add(
                                "bans",
                                ban_error(
                                    key,
                                    "duplicate_ip",
                                    format!("Duplicate IP address {}", ip),
                                ),
                            );
                        }
                    }
                }
            }
            None => errors.add(
                "bans",
                ValidationError::new("invalid_type").with_message(Cow::Borrowed("Expected object")),
            ),
        }

        if errors.is_empty() {
            Ok((self.domain, bans))
        } else {
            Err(errors)
        }
    }
}

/// One problem found in a request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ValidationIssue {
    /// JSON pointer to the offending value.
    #[schema(example = "/bans/not-an-ip")]
    pub path: String,
    #[schema(example = "invalid_ip")]
    pub code: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(path: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            code: code.into(),
            message: message.into(),
        }
    }

    fn from_error(field: &str, err: &ValidationError) -> Self {
        let path = match err.params.get("key").and_then(Value::as_str) {
            Some(key) => format!("/{}/{}", field, key.replace('~', "~0").replace('/', "~1")),
            None => format!("/{}", field),
        };
        let message = match &err.message {
            Some(message) => message.to_string(),
            None => err.code.to_string(),
        };
        Self::new(path, err.code.to_string(), message)
    }
}

/// Flatten validation errors into issues, domain problems first.
fn issues_from(errors: &ValidationErrors) -> Vec<ValidationIssue> {
    let field_errors = errors.field_errors();
    let mut issues = Vec::new();
    for field in ["domain", "bans"] {
        if let Some(errs) = field_errors.get(field) {
            for err in errs.iter() {
                issues.push(ValidationIssue::from_error(field, err));
            }
        }
    }
    issues
}

/// Successful sync.
#[derive(Debug, Serialize, ToSchema)]
pub struct SyncResponse {
    #[schema(example = true)]
    pub success: bool,
    #[schema(example = "Successfully synced 1 IP bans for example.com")]
    pub message: String,
    /// The synced bans, keys in canonical form.
    #[schema(value_type = Object, example = json!({"192.0.2.1": 3600}))]
    pub data: BanSet,
}

/// Sync the ban list of one domain into its Cloudflare firewall rule.
#[utoipa::path(
    post,
    path = "/api/sync",
    request_body = SyncRequest,
    responses(
        (status = 200, description = "Bans synced", body = SyncResponse),
        (status = 400, description = "Invalid request body", body = ErrorBody),
        (status = 403, description = "Caller IP or domain not allowed", body = ErrorBody),
        (status = 500, description = "Missing credentials or Cloudflare API failure", body = ErrorBody)
    ),
    tag = "sync"
)]
pub async fn sync_bans(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SyncResponse>, ApiError> {
    let span = tracing::info_span!("sync", request_id = %Uuid::new_v4());
    handle_sync(state, headers, body).instrument(span).await
}

async fn handle_sync(
    state: Arc<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SyncResponse>, ApiError> {
    let start = Instant::now();
    let result = run_sync(&state, &headers, &body, start).await;

    if let Err(ref e) = result {
        warn!(
            duration_ms = start.elapsed().as_millis() as u64,
            status = e.status_code().as_u16(),
            "Request failed"
        );
    }

    result
}

async fn run_sync(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
    start: Instant,
) -> Result<Json<SyncResponse>, ApiError> {
    state.authorize(headers)?;

    let request: SyncRequest = serde_json::from_slice(body).map_err(|e| {
        let code = if e.is_data() { "invalid_type" } else { "invalid_json" };
        ApiError::BadRequest(vec![ValidationIssue::new("", code, e.to_string())])
    })?;
    let (domain, bans) = request.into_bans()?;

    info!(domain = %domain, bans = bans.len(), "Starting sync");

    let _guard = state.domain_guard(&domain).await;
    let message = state.service.sync_bans(&domain, &bans).await.map_err(|e| {
        error!(domain = %domain, kind = e.kind(), error = %e, "Sync failed");
        ApiError::from(e)
    })?;

    info!(
        domain = %domain,
        duration_ms = start.elapsed().as_millis() as u64,
        "Sync succeeded"
    );

    Ok(Json(SyncResponse {
        success: true,
        message,
        data: bans,
    }))
}

/// Errors returned to HTTP callers.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(Vec<ValidationIssue>),
    Forbidden(String),
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    #[schema(example = false)]
    pub success: bool,
    #[schema(example = "Domain example.net not allowed")]
    pub message: String,
    /// Present on 400 responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issues: Option<Vec<ValidationIssue>>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self {
            ApiError::BadRequest(issues) => ErrorBody {
                success: false,
                message: "Validation failed".to_string(),
                issues: Some(issues),
            },
            ApiError::Forbidden(message) | ApiError::Internal(message) => ErrorBody {
                success: false,
                message,
                issues: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        ApiError::BadRequest(issues_from(&errors))
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::DisallowedDomain(_) => ApiError::Forbidden(err.to_string()),
            SyncError::Config(_) => ApiError::Internal(err.to_string()),
            SyncError::InvalidDomain => ApiError::BadRequest(vec![ValidationIssue::new(
                "/domain",
                "too_small",
                err.to_string(),
            )]),
            other => ApiError::Internal(format!("Internal server error: {}", other)),
        }
    }
}

/// Extract the caller IP from request headers.
pub fn extract_client_ip(headers: &HeaderMap, config: &CallerConfig) -> Option<IpAddr> {
    for header_name in &config.headers {
        let header_lower = header_name.to_lowercase();
        if let Some(value) = headers
            .get(header_lower.as_str())
            .and_then(|v| v.to_str().ok())
        {
            let ip_str = if config.use_first_ip {
                // X-Forwarded-For: client, proxy1, proxy2
                value.split(',').next()?.trim()
            } else {
                // Use the last IP (closest proxy)
                value.split(',').last()?.trim()
            };

            if let Ok(ip) = ip_str.parse() {
                return Some(ip);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::DomainResolver;
    use crate::sync::tests::{ruleset, test_credentials, Call, MockClient};
    use axum::body::Body;
    use axum::http::{HeaderValue, Request};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tower::ServiceExt;

    fn create_state(client: Arc<MockClient>, caller: CallerConfig) -> Arc<AppState> {
        let resolver = DomainResolver::new("example.com", test_credentials());
        let service = BanSyncService::new(resolver, client, "fail2ban");
        Arc::new(AppState::new(service, caller))
    }

    fn create_app(client: Arc<MockClient>, caller: CallerConfig) -> Router {
        router(create_state(client, caller))
    }

    async fn wait_for_calls(client: &MockClient, count: usize) {
        for _ in 0..200 {
            if client.calls().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} calls, saw {:?}", client.calls());
    }

    fn existing_rule_client() -> Arc<MockClient> {
        Arc::new(MockClient::with_ruleset(Some(ruleset(
            "rs-1",
            &[("rule-1", "fail2ban")],
        ))))
    }

    fn sync_request(body: Value, caller_ip: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/sync")
            .header("content-type", "application/json");
        if let Some(ip) = caller_ip {
            builder = builder.header("cf-connecting-ip", ip);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_app(existing_rule_client(), CallerConfig::default());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_sync_success() {
        let client = existing_rule_client();
        let app = create_app(client.clone(), CallerConfig::default());

        let (status, body) = send(
            app,
            sync_request(
                json!({"domain": "example.com", "bans": {"192.168.1.1": 3600, "10.0.0.1": 600}}),
                None,
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(
            body["message"],
            json!("Successfully synced 2 IP bans for example.com")
        );
        assert_eq!(body["data"], json!({"192.168.1.1": 3600, "10.0.0.1": 600}));
        assert!(client.calls().iter().any(|c| matches!(
            c,
            Call::UpdateRule { rule, .. } if rule.expression == "ip.src in {192.168.1.1 10.0.0.1}"
        )));
    }

    #[tokio::test]
    async fn test_disallowed_domain_is_forbidden() {
        let app = create_app(existing_rule_client(), CallerConfig::default());
        let (status, body) = send(
            app,
            sync_request(json!({"domain": "unauthorized.com", "bans": {}}), None),
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["message"], json!("Domain unauthorized.com not allowed"));
    }

    #[tokio::test]
    async fn test_missing_credentials_is_server_error() {
        let resolver = DomainResolver::new(
            "example.com",
            Arc::new(std::collections::HashMap::<String, String>::new()),
        );
        let service = BanSyncService::new(resolver, existing_rule_client(), "fail2ban");
        let app = router(Arc::new(AppState::new(service, CallerConfig::default())));

        let (status, body) = send(
            app,
            sync_request(json!({"domain": "example.com", "bans": {}}), None),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], json!("Zone ID missing"));
    }

    #[tokio::test]
    async fn test_remote_error_is_internal() {
        let client = Arc::new(MockClient::default());
        client.push_ruleset(Err(SyncError::Http {
            status: 403,
            status_text: "Forbidden".to_string(),
            body: "Forbidden".to_string(),
        }));
        let app = create_app(client, CallerConfig::default());

        let (status, body) = send(
            app,
            sync_request(json!({"domain": "example.com", "bans": {"1.1.1.1": 60}}), None),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body["message"],
            json!("Internal server error: HTTP 403: Forbidden - Forbidden")
        );
    }

    #[tokio::test]
    async fn test_invalid_body() {
        let client = existing_rule_client();
        let app = create_app(client.clone(), CallerConfig::default());

        let (status, body) = send(
            app,
            sync_request(
                json!({"domain": "a.com,b.com", "bans": {"not-an-ip": 60, "1.1.1.1": 0}}),
                None,
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], json!("Validation failed"));
        let codes: Vec<&str> = body["issues"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["code"].as_str().unwrap())
            .collect();
        assert!(codes.contains(&"custom"));
        assert!(codes.contains(&"invalid_ip"));
        assert!(codes.contains(&"invalid_duration"));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let app = create_app(existing_rule_client(), CallerConfig::default());
        let request = Request::builder()
            .method("POST")
            .uri("/api/sync")
            .body(Body::from("{not json"))
            .unwrap();

        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["issues"][0]["code"], json!("invalid_json"));
    }

    #[tokio::test]
    async fn test_caller_ip_allowlist() {
        let caller = CallerConfig {
            allowed_ips: vec!["10.0.0.0/8".to_string()],
            ..CallerConfig::default()
        };

        let app = create_app(existing_rule_client(), caller.clone());
        let (status, _) = send(
            app,
            sync_request(json!({"domain": "example.com", "bans": {}}), Some("10.1.2.3")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let client = existing_rule_client();
        let app = create_app(client.clone(), caller.clone());
        let (status, body) = send(
            app,
            sync_request(json!({"domain": "example.com", "bans": {}}), Some("1.2.3.4")),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["message"], json!("IP 1.2.3.4 not allowed"));
        assert!(client.calls().is_empty());

        let app = create_app(existing_rule_client(), caller);
        let (status, body) = send(
            app,
            sync_request(json!({"domain": "example.com", "bans": {}}), None),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["message"], json!("IP unknown not allowed"));
    }

    #[tokio::test]
    async fn test_forwarded_headers_ignored_by_default() {
        let caller = CallerConfig {
            allowed_ips: vec!["10.0.0.0/8".to_string()],
            ..CallerConfig::default()
        };

        for header in ["x-forwarded-for", "x-real-ip"] {
            let client = existing_rule_client();
            let app = create_app(client.clone(), caller.clone());
            let request = Request::builder()
                .method("POST")
                .uri("/api/sync")
                .header("content-type", "application/json")
                .header(header, "10.0.0.1")
                .body(Body::from(
                    json!({"domain": "example.com", "bans": {"1.1.1.1": 60}}).to_string(),
                ))
                .unwrap();

            let (status, body) = send(app, request).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{header} was trusted");
            assert_eq!(body["message"], json!("IP unknown not allowed"));
            assert!(client.calls().is_empty());
        }
    }

    fn parse(body: Value) -> Result<(String, BanSet), Vec<ValidationIssue>> {
        serde_json::from_value::<SyncRequest>(body)
            .unwrap()
            .into_bans()
            .map_err(|e| issues_from(&e))
    }

    #[test]
    fn test_sync_request_keeps_order() {
        let (domain, bans) = parse(json!({
            "domain": "example.com",
            "bans": {"192.168.1.1": 3600, "10.0.0.1": 60}
        }))
        .unwrap();

        assert_eq!(domain, "example.com");
        let ips: Vec<String> = bans.keys().map(|ip| ip.to_string()).collect();
        assert_eq!(ips, vec!["192.168.1.1", "10.0.0.1"]);
    }

    #[test]
    fn test_sync_request_missing_fields() {
        let issues = parse(json!({})).unwrap_err();
        let paths: Vec<&str> = issues.iter().map(|i| i.path.as_str()).collect();
        let codes: Vec<&str> = issues.iter().map(|i| i.code.as_str()).collect();
        assert_eq!(paths, vec!["/domain", "/bans"]);
        assert_eq!(codes, vec!["too_small", "invalid_type"]);
    }

    #[test]
    fn test_sync_request_empty_domain() {
        let issues = parse(json!({"domain": "", "bans": {}})).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, "too_small");
        assert_eq!(issues[0].message, "Domain cannot be empty");
    }

    #[test]
    fn test_sync_request_single_domain() {
        let issues = parse(json!({"domain": "a.com b.com", "bans": {}})).unwrap_err();
        assert_eq!(issues[0].path, "/domain");
        assert_eq!(issues[0].code, "custom");
        assert_eq!(issues[0].message, "Only a single domain is allowed");
    }

    #[test]
    fn test_sync_request_issue_paths() {
        let issues = parse(json!({
            "domain": "example.com",
            "bans": {"not-an-ip": 60, "1.1.1.1": "60"}
        }))
        .unwrap_err();

        let found: Vec<(&str, &str)> = issues
            .iter()
            .map(|i| (i.path.as_str(), i.code.as_str()))
            .collect();
        assert!(found.contains(&("/bans/not-an-ip", "invalid_ip")));
        assert!(found.contains(&("/bans/1.1.1.1", "invalid_duration")));
        assert!(!found.iter().any(|(path, _)| *path == "/domain"));
    }

    #[test]
    fn test_sync_request_integral_float_duration() {
        let (_, bans) = parse(json!({
            "domain": "example.com",
            "bans": {"1.1.1.1": 3600.0}
        }))
        .unwrap();
        assert_eq!(bans.get(&"1.1.1.1".parse::<IpAddr>().unwrap()), Some(&3600));

        for bad in [json!(3600.5), json!(-60), json!(0), json!(0.0)] {
            let issues = parse(json!({"domain": "example.com", "bans": {"1.1.1.1": bad}}))
                .unwrap_err();
            assert_eq!(issues[0].code, "invalid_duration", "accepted {bad}");
        }
    }

    #[test]
    fn test_sync_request_duplicate_spellings() {
        let issues = parse(json!({
            "domain": "example.com",
            "bans": {"::1": 60, "0:0:0:0:0:0:0:1": 120}
        }))
        .unwrap_err();

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, "duplicate_ip");
        assert_eq!(issues[0].path, "/bans/0:0:0:0:0:0:0:1");
    }

    #[test]
    fn test_sync_request_canonical_keys() {
        let (_, bans) = parse(json!({
            "domain": "example.com",
            "bans": {"0:0:0:0:0:0:0:1": 60}
        }))
        .unwrap();
        let ips: Vec<String> = bans.keys().map(|ip| ip.to_string()).collect();
        assert_eq!(ips, vec!["::1"]);
    }

    #[tokio::test]
    async fn test_wrong_field_type() {
        let client = existing_rule_client();
        let app = create_app(client.clone(), CallerConfig::default());

        let (status, body) = send(
            app,
            sync_request(json!({"domain": 5, "bans": {}}), None),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["issues"][0]["code"], json!("invalid_type"));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_same_domain_syncs_run_one_at_a_time() {
        let client = existing_rule_client();
        let gate = Arc::new(Notify::new());
        client.hold_next_fetch(gate.clone());
        let app = router(create_state(client.clone(), CallerConfig::default()));
        let body = json!({"domain": "example.com", "bans": {"1.1.1.1": 60}});

        let first = tokio::spawn(send(app.clone(), sync_request(body.clone(), None)));
        wait_for_calls(&client, 1).await;

        let second = tokio::spawn(send(app.clone(), sync_request(body, None)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.calls().len(), 1, "second sync ran while the first held the lock");

        gate.notify_one();
        let (first_status, _) = first.await.unwrap();
        let (second_status, _) = second.await.unwrap();
        assert_eq!(first_status, StatusCode::OK);
        assert_eq!(second_status, StatusCode::OK);

        let calls = client.calls();
        assert!(
            matches!(
                calls.as_slice(),
                [
                    Call::GetRuleset { .. },
                    Call::UpdateRule { .. },
                    Call::GetRuleset { .. },
                    Call::UpdateRule { .. },
                ]
            ),
            "unexpected call order: {calls:?}"
        );
    }

    #[tokio::test]
    async fn test_only_allowed_domains_get_a_lock() {
        let state = create_state(existing_rule_client(), CallerConfig::default());

        let (status, _) = send(
            router(state.clone()),
            sync_request(json!({"domain": "unauthorized.com", "bans": {}}), None),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(state.locks.is_empty());

        let (status, _) = send(
            router(state.clone()),
            sync_request(json!({"domain": "example.com", "bans": {}}), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state.locks.len(), 1);
        assert!(state.locks.contains_key("example.com"));
    }

    #[tokio::test]
    async fn test_openapi_document_served() {
        let app = create_app(existing_rule_client(), CallerConfig::default());
        let request = Request::builder()
            .uri("/openapi.json")
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/api/sync"]["post"].is_object());
    }

    #[tokio::test]
    async fn test_root_redirects_to_docs() {
        let app = create_app(existing_rule_client(), CallerConfig::default());
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()["location"], "/docs/");
    }

    #[test]
    fn test_extract_client_ip_xff() {
        let config = CallerConfig {
            headers: vec!["x-forwarded-for".to_string()],
            use_first_ip: true,
            ..CallerConfig::default()
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8, 9.10.11.12"),
        );

        let ip = extract_client_ip(&headers, &config);
        assert_eq!(ip, Some("1.2.3.4".parse().unwrap()));
    }

    #[test]
    fn test_extract_client_ip_xff_last() {
        let config = CallerConfig {
            headers: vec!["X-Forwarded-For".to_string()],
            use_first_ip: false,
            ..CallerConfig::default()
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8, 9.10.11.12"),
        );

        let ip = extract_client_ip(&headers, &config);
        assert_eq!(ip, Some("9.10.11.12".parse().unwrap()));
    }

    #[test]
    fn test_extract_client_ip_priority() {
        let config = CallerConfig {
            headers: vec!["cf-connecting-ip".to_string(), "x-real-ip".to_string()],
            ..CallerConfig::default()
        };

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("5.6.7.8"));
        headers.insert("cf-connecting-ip", HeaderValue::from_static("1.2.3.4"));

        // First configured header wins
        let ip = extract_client_ip(&headers, &config);
        assert_eq!(ip, Some("1.2.3.4".parse().unwrap()));
    }

    #[test]
    fn test_extract_client_ip_default_reads_cloudflare_only() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));

        assert!(extract_client_ip(&headers, &CallerConfig::default()).is_none());
    }

    #[test]
    fn test_extract_client_ip_none() {
        let ip = extract_client_ip(&HeaderMap::new(), &CallerConfig::default());
        assert!(ip.is_none());
    }
}
