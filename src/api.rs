//! Access to the delivery backend.
//!
//! `DeliveryApi` is the seam between the dashboard and the network; `HttpApi`
//! is the real implementation.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::delivery::{DeliveryPage, KeyDurations, PersonDayEntry, SchedulePayload};
use crate::error::ApiError;

/// Operations the backend offers.
#[async_trait]
pub trait DeliveryApi: Send + Sync {
    /// `GET /api/data?email=<addr>[&page=<n>]`
    async fn fetch_deliveries(&self, email: &str, page: Option<u32>) -> Result<DeliveryPage, ApiError>;

    /// `GET /api/per-key-per-day`
    async fn fetch_key_durations(&self) -> Result<KeyDurations, ApiError>;

    /// `GET /api/per-person-per-day`
    async fn fetch_person_allocations(&self) -> Result<Vec<PersonDayEntry>, ApiError>;

    /// `POST /api/post`
    async fn post_schedule(&self, payload: &SchedulePayload) -> Result<Value, ApiError>;

    /// `DELETE /api/data/<code>`, returning the server's confirmation message.
    async fn delete_delivery(&self, code: &str) -> Result<String, ApiError>;
}

/// `reqwest`-backed client.
pub struct HttpApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct DeleteBody {
    message: Option<String>,
    error: Option<String>,
}

impl HttpApi {
    pub fn new(config: &Config, token: Option<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|source| ApiError::Fetch { resource: "client", source })?;
        Ok(HttpApi {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, resource: &'static str) -> Result<Response, ApiError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|source| ApiError::Fetch { resource, source })?;
        let status = response.status();
        debug!(%status, resource, "backend responded");
        if !status.is_success() {
            warn!(%status, resource, "request failed");
            return Err(ApiError::Status { resource, status });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, resource: &'static str) -> Result<T, ApiError> {
        let response = self.send(self.client.get(self.url(path)), resource).await?;
        response
            .json()
            .await
            .map_err(|source| ApiError::Decode { resource, source })
    }
}

#[async_trait]
impl DeliveryApi for HttpApi {
    async fn fetch_deliveries(&self, email: &str, page: Option<u32>) -> Result<DeliveryPage, ApiError> {
        let mut path = format!("/api/data?email={}", urlencoding::encode(email));
        if let Some(page) = page {
            path.push_str(&format!("&page={page}"));
        }
        self.get_json(&path, "deliveries").await
    }

    async fn fetch_key_durations(&self) -> Result<KeyDurations, ApiError> {
        self.get_json("/api/per-key-per-day", "task durations").await
    }

    async fn fetch_person_allocations(&self) -> Result<Vec<PersonDayEntry>, ApiError> {
        self.get_json("/api/per-person-per-day", "daily allocations").await
    }

    async fn post_schedule(&self, payload: &SchedulePayload) -> Result<Value, ApiError> {
        let request = self.client.post(self.url("/api/post")).json(payload);
        let response = self.send(request, "schedule submission").await?;
        response.json().await.map_err(|source| ApiError::Decode {
            resource: "schedule submission",
            source,
        })
    }

    async fn delete_delivery(&self, code: &str) -> Result<String, ApiError> {
        let url = self.url(&format!("/api/data/{}", urlencoding::encode(code)));
        let response = self
            .authorize(self.client.delete(url))
            .send()
            .await
            .map_err(|source| ApiError::Fetch { resource: "delivery deletion", source })?;
        let status = response.status();
        let body: Option<DeleteBody> = response.json().await.ok();
        if !status.is_success() {
            warn!(%status, code, "delete rejected");
            let message = body
                .and_then(|b| b.error)
                .unwrap_or_else(|| "Failed to delete the delivery.".to_string());
            return Err(ApiError::Rejected(message));
        }
        Ok(body
            .and_then(|b| b.message)
            .unwrap_or_else(|| format!("Delivery {code} deleted.")))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::TaskRecord;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Answer one connection with a canned response; yields the raw request.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    let head = String::from_utf8_lossy(&request[..end]).to_lowercase();
                    let length = head
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{addr}"), handle)
    }

    fn api(base_url: String) -> HttpApi {
        HttpApi {
            client: Client::builder().no_proxy().build().unwrap(),
            base_url,
            token: Some("t0k".into()),
        }
    }

    fn payload() -> SchedulePayload {
        SchedulePayload {
            task: TaskRecord { del_code: "DEL-42".into(), key: "K1".into(), ..TaskRecord::default() },
            updated_at: "01/06/2024".into(),
            sliders: vec![],
        }
    }

    #[tokio::test]
    async fn test_delete_returns_server_message() {
        let (url, server) = serve_once("200 OK", r#"{"message":"Delivery DEL 42 removed"}"#).await;
        let message = api(url).delete_delivery("DEL 42").await.unwrap();
        assert_eq!(message, "Delivery DEL 42 removed");

        let request = server.await.unwrap();
        assert!(request.starts_with("DELETE /api/data/DEL%2042 HTTP/1.1"));
        assert!(request.to_lowercase().contains("authorization: bearer t0k"));
    }

    #[tokio::test]
    async fn test_rejected_delete_shows_server_error() {
        let (url, server) = serve_once("400 Bad Request", r#"{"error":"Delivery is locked"}"#).await;
        let err = api(url).delete_delivery("DEL-42").await.unwrap_err();
        assert!(matches!(&err, ApiError::Rejected(msg) if msg == "Delivery is locked"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_delete_without_body_uses_generic_message() {
        let (url, server) = serve_once("500 Internal Server Error", "").await;
        let err = api(url).delete_delivery("DEL-42").await.unwrap_err();
        assert!(matches!(&err, ApiError::Rejected(msg) if msg == "Failed to delete the delivery."));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_page_request_and_decode() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"DEL-1":[{"DelCode_w_o__":"DEL-1","Delivery_code":"DEL-1","Step_ID":0,"Client":"Omved"}]}"#,
        )
        .await;
        let page = api(url).fetch_deliveries("a@example.com", Some(2)).await.unwrap();
        assert_eq!(page["DEL-1"][0].client, "Omved");

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/data?email=a%40example.com&page=2 HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_failed_fetch_maps_to_status() {
        let (url, server) = serve_once("503 Service Unavailable", "").await;
        let err = api(url).fetch_deliveries("a@example.com", None).await.unwrap_err();
        assert!(matches!(err, ApiError::Status { resource: "deliveries", status } if status.as_u16() == 503));
        assert!(err.to_string().starts_with("failed to fetch deliveries"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_post_sends_payload() {
        let (url, server) = serve_once("200 OK", r#"{"status":"ok"}"#).await;
        let reply = api(url).post_schedule(&payload()).await.unwrap();
        assert_eq!(reply["status"], "ok");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/post HTTP/1.1"));
        assert!(request.contains(r#""DelCode_w_o__":"DEL-42""#));
    }

    #[tokio::test]
    async fn test_failed_post_maps_to_status() {
        let (url, server) = serve_once("500 Internal Server Error", r#"{"error":"boom"}"#).await;
        let err = api(url).post_schedule(&payload()).await.unwrap_err();
        assert!(matches!(err, ApiError::Status { resource: "schedule submission", status } if status.as_u16() == 500));
        server.await.unwrap();
    }

    #[test]
    fn test_urls_are_joined_without_double_slash() {
        let config = Config {
            api_base_url: "http://localhost:3001/".into(),
            ..Config::default()
        };
        let api = HttpApi::new(&config, None).unwrap();
        assert_eq!(api.url("/api/post"), "http://localhost:3001/api/post");
    }

    #[test]
    fn test_status_error_reads_as_fetch_failure() {
        let err = ApiError::Status {
            resource: "deliveries",
            status: reqwest::StatusCode::BAD_GATEWAY,
        };
        assert!(err.to_string().starts_with("failed to fetch deliveries"));
    }
}
