// pdsync/src/crm/pipedrive.rs
//! Pipedrive REST adapters.
//!
//! Every response is wrapped in an envelope `{ "success": bool, "data": ..., "error": ... }`.
//! Both API generations share the same transport and envelope handling. They
//! differ in the update verb (v1 `PUT`, v2 `PATCH`) and in the spelling of
//! the multi-value keys (v1 `email`/`phone`, v2 `emails`/`phones`).
//!
//! Authentication is the `api_token` query parameter. URLs are only ever
//! logged by path so the token never reaches the log.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

use super::{ApiVersion, CrmClient, LookupField, RemoteRecord};
use crate::config::PipedriveConfig;
use crate::errors::{Result, SyncError};
use crate::mapping::Payload;

/// Host serving account-level endpoints such as `users/me`.
const PUBLIC_API_HOST: &str = "https://api.pipedrive.com";
const BODY_SNIPPET_LEN: usize = 200;

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// A request ready to go out: verb, full URL (token included) and JSON body.
#[derive(Debug)]
struct PreparedRequest {
    method: Method,
    url: Url,
    body: Option<Value>,
}

struct Transport {
    http: reqwest::Client,
    root: Url,
    api_key: String,
}

impl Transport {
    fn new(root: Url, api_key: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Transport {
            http,
            root,
            api_key: api_key.to_string(),
        })
    }

    fn endpoint(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self.root.join(path)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
            pairs.append_pair("api_token", &self.api_key);
        }
        Ok(url)
    }

    fn prepare(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<PreparedRequest> {
        Ok(PreparedRequest {
            method,
            url: self.endpoint(path, query)?,
            body,
        })
    }

    /// Sends one request and returns the HTTP status with the raw body.
    async fn send(&self, prepared: PreparedRequest) -> Result<(u16, String)> {
        debug!("{} {}", prepared.method, prepared.url.path());
        let mut request = self.http.request(prepared.method, prepared.url);
        if let Some(body) = &prepared.body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| e.without_url())?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| e.without_url())?;
        Ok((status, text))
    }
}

/// `{host}/api/{version}/`, with the trailing slash so relative joins stay
/// under the version prefix.
fn api_root(host: &str, version: ApiVersion) -> Result<Url> {
    Ok(Url::parse(&format!(
        "{}/api/{}/",
        host.trim_end_matches('/'),
        version.path_segment()
    ))?)
}

/// `{host}/v1/`, where account-level endpoints such as `users/me` live.
fn account_root(host: &str) -> Result<Url> {
    Ok(Url::parse(&format!("{}/v1/", host.trim_end_matches('/')))?)
}

/// Turns an HTTP status and body into the envelope's `data`, or the matching error.
pub(crate) fn decode_envelope(status: u16, body: &str) -> Result<Value> {
    let envelope = serde_json::from_str::<Envelope>(body).ok();

    if status >= 400 {
        let message = envelope
            .as_ref()
            .and_then(|e| e.error.as_ref())
            .map(crate::mapping::stringify)
            .unwrap_or_else(|| snippet(body, status));
        return Err(SyncError::remote(status, message));
    }

    let envelope = envelope.ok_or_else(|| {
        SyncError::MalformedResponse(format!("body is not a Pipedrive envelope: {}", snippet(body, status)))
    })?;

    if !envelope.success {
        let message = envelope
            .error
            .as_ref()
            .map(crate::mapping::stringify)
            .unwrap_or_else(|| "success flag was false".to_string());
        return Err(SyncError::remote(status, message));
    }

    match envelope.data {
        Some(Value::Null) | None => Err(SyncError::MalformedResponse(
            "envelope has no 'data'".to_string(),
        )),
        Some(data) => Ok(data),
    }
}

fn snippet(body: &str, status: u16) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("empty body (HTTP {})", status)
    } else {
        trimmed.chars().take(BODY_SNIPPET_LEN).collect()
    }
}

fn decode_record(data: Value) -> Result<RemoteRecord> {
    serde_json::from_value(data)
        .map_err(|e| SyncError::MalformedResponse(format!("unexpected person shape: {}", e)))
}

/// The search endpoint returns `{ items: [{ item: {...}, result_score }] }`.
/// Only the first hit is considered.
fn first_search_item(data: Value) -> Result<Option<RemoteRecord>> {
    let Some(first) = data
        .get("items")
        .and_then(Value::as_array)
        .and_then(|items| items.first())
    else {
        return Ok(None);
    };

    let item = first.get("item").cloned().ok_or_else(|| {
        SyncError::MalformedResponse("search result entry has no 'item'".to_string())
    })?;
    decode_record(item).map(Some)
}

/// Renames multi-value keys to the spelling the API version expects.
fn shape_body(payload: &Payload, version: ApiVersion) -> Value {
    let renames: &[(&str, &str)] = match version {
        ApiVersion::V1 => &[("emails", "email"), ("phones", "phone")],
        ApiVersion::V2 => &[("email", "emails"), ("phone", "phones")],
    };

    let mut body = Map::new();
    for (key, value) in payload.as_map() {
        let key = renames
            .iter()
            .find(|(from, _)| *from == key.as_str())
            .map(|(_, to)| *to)
            .unwrap_or(key.as_str());
        body.insert(key.to_string(), value.clone());
    }
    Value::Object(body)
}

/// Prefixes provider errors with the operation that produced them.
fn annotate(operation: &'static str) -> impl Fn(SyncError) -> SyncError {
    move |err| match err {
        SyncError::RemoteApi {
            status_code,
            message,
            kind,
        } => SyncError::RemoteApi {
            status_code,
            message: format!("Failed to {} person: {}", operation, message),
            kind,
        },
        SyncError::MalformedResponse(message) => {
            SyncError::MalformedResponse(format!("Failed to {} person: {}", operation, message))
        }
        other => other,
    }
}

fn read_search(status: u16, body: &str) -> Result<Option<RemoteRecord>> {
    decode_envelope(status, body)
        .and_then(first_search_item)
        .map_err(annotate("search"))
}

fn read_record(operation: &'static str, status: u16, body: &str) -> Result<RemoteRecord> {
    decode_envelope(status, body)
        .and_then(decode_record)
        .map_err(annotate(operation))
}

/// Persons endpoints shared by both API generations.
struct PersonsApi {
    transport: Transport,
    version: ApiVersion,
}

impl PersonsApi {
    fn new(config: &PipedriveConfig, version: ApiVersion) -> Result<Self> {
        let transport = Transport::new(
            api_root(&config.api_host()?, version)?,
            &config.api_key,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(PersonsApi { transport, version })
    }

    fn search_request(&self, term: &str, field: LookupField) -> Result<PreparedRequest> {
        self.transport.prepare(
            Method::GET,
            "persons/search",
            &[("term", term), ("fields", field.as_str())],
            None,
        )
    }

    fn create_request(&self, payload: &Payload) -> Result<PreparedRequest> {
        let body = shape_body(payload, self.version);
        self.transport.prepare(Method::POST, "persons", &[], Some(body))
    }

    fn update_request(&self, id: u64, payload: &Payload) -> Result<PreparedRequest> {
        let body = shape_body(payload, self.version);
        self.transport.prepare(
            self.version.update_method(),
            &format!("persons/{}", id),
            &[],
            Some(body),
        )
    }

    async fn search(&self, term: &str, field: LookupField) -> Result<Option<RemoteRecord>> {
        let (status, body) = self.transport.send(self.search_request(term, field)?).await?;
        read_search(status, &body)
    }

    async fn create(&self, payload: &Payload) -> Result<RemoteRecord> {
        let (status, body) = self.transport.send(self.create_request(payload)?).await?;
        read_record("create", status, &body)
    }

    async fn update(&self, id: u64, payload: &Payload) -> Result<RemoteRecord> {
        let (status, body) = self.transport.send(self.update_request(id, payload)?).await?;
        read_record("update", status, &body)
    }
}

/// Adapter for `/api/v1`. Updates are full `PUT`s.
pub struct PipedriveV1Client {
    api: PersonsApi,
}

impl PipedriveV1Client {
    pub fn new(config: &PipedriveConfig) -> Result<Self> {
        Ok(PipedriveV1Client {
            api: PersonsApi::new(config, ApiVersion::V1)?,
        })
    }
}

#[async_trait]
impl CrmClient for PipedriveV1Client {
    async fn search(&self, term: &str, field: LookupField) -> Result<Option<RemoteRecord>> {
        self.api.search(term, field).await
    }

    async fn create(&self, payload: &Payload) -> Result<RemoteRecord> {
        self.api.create(payload).await
    }

    async fn update(&self, id: u64, payload: &Payload) -> Result<RemoteRecord> {
        self.api.update(id, payload).await
    }
}

/// Adapter for `/api/v2`. Updates are partial `PATCH`es.
pub struct PipedriveV2Client {
    api: PersonsApi,
}

impl PipedriveV2Client {
    pub fn new(config: &PipedriveConfig) -> Result<Self> {
        Ok(PipedriveV2Client {
            api: PersonsApi::new(config, ApiVersion::V2)?,
        })
    }
}

#[async_trait]
impl CrmClient for PipedriveV2Client {
    async fn search(&self, term: &str, field: LookupField) -> Result<Option<RemoteRecord>> {
        self.api.search(term, field).await
    }

    async fn create(&self, payload: &Payload) -> Result<RemoteRecord> {
        self.api.create(payload).await
    }

    async fn update(&self, id: u64, payload: &Payload) -> Result<RemoteRecord> {
        self.api.update(id, payload).await
    }
}

/// Asks `/v1/users/me` which company the API token belongs to.
/// Returns `None` when the account reports no domain.
pub async fn fetch_company_domain(config: &PipedriveConfig) -> Result<Option<String>> {
    let host = config.base_url.as_deref().unwrap_or(PUBLIC_API_HOST);
    let transport = Transport::new(
        account_root(host)?,
        &config.api_key,
        Duration::from_secs(config.request_timeout_secs),
    )?;

    let (status, body) = transport
        .send(transport.prepare(Method::GET, "users/me", &[], None)?)
        .await?;
    let data = decode_envelope(status, &body)?;
    Ok(data
        .get("company_domain")
        .and_then(Value::as_str)
        .filter(|domain| !domain.trim().is_empty())
        .map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ApiErrorKind;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn transport(version: ApiVersion) -> Result<Transport> {
        Transport::new(
            api_root("https://acme.pipedrive.com/", version)?,
            "secret-token",
            Duration::from_secs(5),
        )
    }

    fn config(base_url: &str, version: ApiVersion) -> PipedriveConfig {
        PipedriveConfig {
            api_key: "secret-token".to_string(),
            company_domain: None,
            base_url: Some(base_url.to_string()),
            api_version: version,
            lookup_field: LookupField::Name,
            request_timeout_secs: 5,
        }
    }

    fn jane() -> Payload {
        let mut payload = Payload::new();
        payload.insert("name", json!("Jane Doe"));
        payload.insert("email", json!([{ "label": "work", "value": "j@x.com", "primary": true }]));
        payload
    }

    fn header_end(bytes: &[u8]) -> Option<usize> {
        bytes.windows(4).position(|w| w == b"\r\n\r\n")
    }

    /// Accepts one connection on a local port, replies with `reply_body` and
    /// yields the request line it received.
    async fn serve_once(
        reply_body: &'static str,
    ) -> std::io::Result<(String, JoinHandle<std::io::Result<String>>)> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base_url = format!("http://{}", listener.local_addr()?);

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await?;
            let mut received = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
                if let Some(end) = header_end(&received) {
                    let headers = String::from_utf8_lossy(&received[..end]).to_lowercase();
                    let length = headers
                        .lines()
                        .find_map(|line| line.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if received.len() >= end + 4 + length {
                        break;
                    }
                }
            }

            let reply = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                reply_body.len(),
                reply_body
            );
            socket.write_all(reply.as_bytes()).await?;
            socket.shutdown().await?;

            let text = String::from_utf8_lossy(&received).to_string();
            Ok(text.lines().next().unwrap_or_default().trim_end().to_string())
        });

        Ok((base_url, handle))
    }

    #[test]
    fn test_endpoint_appends_token_and_query() -> anyhow::Result<()> {
        let url = transport(ApiVersion::V1)?
            .endpoint("persons/search", &[("term", "Jane Doe"), ("fields", "name")])?;

        assert_eq!(url.path(), "/api/v1/persons/search");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("term".to_string(), "Jane Doe".to_string()),
                ("fields".to_string(), "name".to_string()),
                ("api_token".to_string(), "secret-token".to_string()),
            ]
        );

        let v2 = transport(ApiVersion::V2)?.endpoint("persons/42", &[])?;
        assert_eq!(v2.path(), "/api/v2/persons/42");
        Ok(())
    }

    #[test]
    fn test_decode_envelope_returns_data() -> anyhow::Result<()> {
        let data = decode_envelope(200, r#"{"success":true,"data":{"id":7,"name":"Jane"}}"#)?;
        assert_eq!(data, json!({ "id": 7, "name": "Jane" }));
        Ok(())
    }

    #[test]
    fn test_decode_envelope_classifies_http_errors() {
        let unauthorized = decode_envelope(
            401,
            r#"{"success":false,"error":"unauthorized access","errorCode":401}"#,
        );
        match unauthorized {
            Err(SyncError::RemoteApi {
                status_code,
                message,
                kind,
            }) => {
                assert_eq!(status_code, 401);
                assert_eq!(message, "unauthorized access");
                assert_eq!(kind, ApiErrorKind::Unauthorized);
            }
            other => panic!("expected RemoteApi, got {:?}", other),
        }

        let bad_gateway = decode_envelope(502, "<html>Bad Gateway</html>");
        assert!(matches!(
            bad_gateway,
            Err(SyncError::RemoteApi { kind: ApiErrorKind::ServerError, .. })
        ));

        let empty = decode_envelope(404, "");
        match empty {
            Err(SyncError::RemoteApi { message, kind, .. }) => {
                assert_eq!(kind, ApiErrorKind::Other);
                assert_eq!(message, "empty body (HTTP 404)");
            }
            other => panic!("expected RemoteApi, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_envelope_success_false_is_rejected() {
        let result = decode_envelope(200, r#"{"success":false,"error":"Name is required"}"#);
        match result {
            Err(SyncError::RemoteApi { kind, message, .. }) => {
                assert_eq!(kind, ApiErrorKind::Rejected);
                assert_eq!(message, "Name is required");
            }
            other => panic!("expected RemoteApi, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_envelope_malformed() {
        assert!(matches!(
            decode_envelope(200, r#"{"success":true}"#),
            Err(SyncError::MalformedResponse(_))
        ));
        assert!(matches!(
            decode_envelope(200, r#"{"success":true,"data":null}"#),
            Err(SyncError::MalformedResponse(_))
        ));
        assert!(matches!(
            decode_envelope(200, "not json"),
            Err(SyncError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_first_search_item() -> anyhow::Result<()> {
        assert_eq!(first_search_item(json!({ "items": [] }))?, None);
        assert_eq!(first_search_item(json!({}))?, None);

        let found = first_search_item(json!({
            "items": [
                { "result_score": 0.9, "item": { "id": 42, "name": "Jane Doe" } },
                { "result_score": 0.5, "item": { "id": 43, "name": "Jane Doe" } }
            ]
        }))?;
        assert_eq!(found.map(|r| r.id), Some(42));

        assert!(matches!(
            first_search_item(json!({ "items": [{ "result_score": 1.0 }] })),
            Err(SyncError::MalformedResponse(_))
        ));
        Ok(())
    }

    #[test]
    fn test_shape_body_per_version() {
        let mut payload = Payload::new();
        payload.insert("name", json!("Jane"));
        payload.insert("email", json!([{ "label": "work", "value": "j@x.com", "primary": true }]));
        payload.insert("phones", json!([{ "label": "work", "value": "555", "primary": true }]));

        let v1 = shape_body(&payload, ApiVersion::V1);
        assert!(v1.get("email").is_some());
        assert!(v1.get("phone").is_some());
        assert!(v1.get("phones").is_none());

        let v2 = shape_body(&payload, ApiVersion::V2);
        assert!(v2.get("emails").is_some());
        assert!(v2.get("phones").is_some());
        assert!(v2.get("email").is_none());
        assert_eq!(v2.get("name"), Some(&json!("Jane")));
    }

    #[test]
    fn test_annotate_prefixes_operation() {
        let err = annotate("create")(SyncError::remote(400, "bad field"));
        assert_eq!(
            err.to_string(),
            "Bad Request, invalid payload sent to Pipedrive (400): Failed to create person: bad field"
        );
    }

    #[test]
    fn test_account_root_serves_users_me() -> anyhow::Result<()> {
        let transport = Transport::new(
            account_root(PUBLIC_API_HOST)?,
            "secret-token",
            Duration::from_secs(5),
        )?;
        let url = transport.endpoint("users/me", &[])?;

        assert_eq!(url.host_str(), Some("api.pipedrive.com"));
        assert_eq!(url.path(), "/v1/users/me");
        Ok(())
    }

    #[test]
    fn test_update_request_per_version() -> anyhow::Result<()> {
        let v1 = PersonsApi::new(&config("https://acme.pipedrive.com", ApiVersion::V1), ApiVersion::V1)?
            .update_request(42, &jane())?;
        assert_eq!(v1.method, Method::PUT);
        assert_eq!(v1.url.path(), "/api/v1/persons/42");
        assert!(v1.body.as_ref().and_then(|b| b.get("email")).is_some());

        let v2 = PersonsApi::new(&config("https://acme.pipedrive.com", ApiVersion::V2), ApiVersion::V2)?
            .update_request(42, &jane())?;
        assert_eq!(v2.method, Method::PATCH);
        assert_eq!(v2.url.path(), "/api/v2/persons/42");
        assert!(v2.body.as_ref().and_then(|b| b.get("emails")).is_some());
        Ok(())
    }

    #[test]
    fn test_create_and_search_requests() -> anyhow::Result<()> {
        let api = PersonsApi::new(&config("https://acme.pipedrive.com", ApiVersion::V1), ApiVersion::V1)?;

        let create = api.create_request(&jane())?;
        assert_eq!(create.method, Method::POST);
        assert_eq!(create.url.path(), "/api/v1/persons");

        let search = api.search_request("j@x.com", LookupField::Email)?;
        assert_eq!(search.method, Method::GET);
        assert!(search.body.is_none());
        let pairs: Vec<(String, String)> = search.url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("fields".to_string(), "email".to_string())));
        assert!(pairs.contains(&("term".to_string(), "j@x.com".to_string())));
        Ok(())
    }

    #[test]
    fn test_read_record_rejected_create() {
        let result = read_record("create", 200, r#"{"success":false,"error":"Name is required"}"#);
        match result {
            Err(SyncError::RemoteApi { kind, message, status_code }) => {
                assert_eq!(kind, ApiErrorKind::Rejected);
                assert_eq!(status_code, 200);
                assert_eq!(message, "Failed to create person: Name is required");
            }
            other => panic!("expected RemoteApi, got {:?}", other),
        }
    }

    #[test]
    fn test_read_search_and_record() -> anyhow::Result<()> {
        let found = read_search(
            200,
            r#"{"success":true,"data":{"items":[{"result_score":1.0,"item":{"id":42,"name":"Jane Doe"}}]}}"#,
        )?;
        assert_eq!(found.map(|r| r.id), Some(42));
        assert_eq!(read_search(200, r#"{"success":true,"data":{"items":[]}}"#)?, None);

        let updated = read_record("update", 200, r#"{"success":true,"data":{"id":42,"name":"Jane Doe"}}"#)?;
        assert_eq!(updated.id, 42);

        assert!(matches!(
            read_record("update", 200, r#"{"success":true,"data":{"name":"no id"}}"#),
            Err(SyncError::MalformedResponse(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_v2_client_patches_and_reports_rejection() -> anyhow::Result<()> {
        let (base_url, server) = serve_once(r#"{"success":false,"error":"Invalid field"}"#).await?;
        let client = PipedriveV2Client::new(&config(&base_url, ApiVersion::V2))?;

        let result = client.update(42, &jane()).await;

        let request_line = server.await??;
        assert!(request_line.starts_with("PATCH /api/v2/persons/42?"), "{}", request_line);
        match result {
            Err(SyncError::RemoteApi { kind, message, .. }) => {
                assert_eq!(kind, ApiErrorKind::Rejected);
                assert_eq!(message, "Failed to update person: Invalid field");
            }
            other => panic!("expected RemoteApi, got {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_v1_client_creates_over_http() -> anyhow::Result<()> {
        let (base_url, server) =
            serve_once(r#"{"success":true,"data":{"id":100,"name":"Jane Doe"}}"#).await?;
        let client = PipedriveV1Client::new(&config(&base_url, ApiVersion::V1))?;

        let created = client.create(&jane()).await?;

        let request_line = server.await??;
        assert!(request_line.starts_with("POST /api/v1/persons?"), "{}", request_line);
        assert_eq!(created.id, 100);
        assert_eq!(created.name(), Some("Jane Doe"));
        Ok(())
    }
}
