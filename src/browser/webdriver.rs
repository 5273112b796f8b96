//! W3C WebDriver client.
//!
//! Talks the JSON wire protocol spoken by chromedriver, geckodriver and
//! Selenium Grid:
//! - `POST /session` starts a browser
//! - `POST /session/{id}/url` navigates and blocks until the page loaded
//! - `GET /session/{id}/screenshot` returns a base64 PNG of the viewport
//! - `DELETE /session/{id}` stops the browser

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, RequestBuilder};
use serde_json::{Value, json};
use tracing::debug;

use super::types::{BrowserError, BrowserId, BrowserOptions, BrowserProvider, BrowserResult};

/// Browser provider backed by a W3C WebDriver endpoint
#[derive(Debug, Clone)]
pub struct WebDriverProvider {
    base_url: String,
    client: Client,
}

impl WebDriverProvider {
    /// Create a provider for the WebDriver endpoint at `base_url`
    pub fn new(base_url: impl Into<String>) -> BrowserResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| BrowserError::Connection(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Base URL of the WebDriver endpoint
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Send a command and unwrap the `value` member of the response
    async fn send(&self, request: RequestBuilder) -> BrowserResult<Value> {
        let response = request
            .send()
            .await
            .map_err(|e| BrowserError::Connection(e.to_string()))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| BrowserError::InvalidResponse(e.to_string()))?;

        let value = body.get("value").cloned().unwrap_or(Value::Null);

        if !status.is_success() {
            return Err(protocol_error(status.as_u16(), &value));
        }

        Ok(value)
    }
}

#[async_trait]
impl BrowserProvider for WebDriverProvider {
    async fn start(&self, options: &BrowserOptions) -> BrowserResult<BrowserId> {
        let request = self
            .client
            .post(self.endpoint("session"))
            .json(&new_session_payload(options));

        let value = self.send(request).await?;
        let id = value["sessionId"]
            .as_str()
            .ok_or_else(|| BrowserError::InvalidResponse("missing sessionId".to_string()))?;

        debug!(session = id, "WebDriver session created");
        Ok(BrowserId(id.to_string()))
    }

    async fn load(&self, id: &BrowserId, url: &str) -> BrowserResult<()> {
        let request = self
            .client
            .post(self.endpoint(&format!("session/{}/url", id)))
            .json(&json!({ "url": url }));

        self.send(request).await?;
        Ok(())
    }

    async fn screenshot(&self, id: &BrowserId) -> BrowserResult<Vec<u8>> {
        let request = self
            .client
            .get(self.endpoint(&format!("session/{}/screenshot", id)));

        let value = self.send(request).await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| BrowserError::InvalidResponse("screenshot is not a string".to_string()))?;

        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| BrowserError::InvalidResponse(format!("screenshot is not base64: {}", e)))
    }

    async fn stop(&self, id: &BrowserId) -> BrowserResult<()> {
        let request = self
            .client
            .delete(self.endpoint(&format!("session/{}", id)));

        self.send(request).await?;
        debug!(session = %id, "WebDriver session deleted");
        Ok(())
    }
}

/// Build the `POST /session` payload for the given options
fn new_session_payload(options: &BrowserOptions) -> Value {
    let mut args = options.args.clone();
    if options.headless {
        args.push("--headless=new".to_string());
    }
    let (width, height) = options.window_size;
    args.push(format!("--window-size={},{}", width, height));

    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": options.browser_name,
                "goog:chromeOptions": {
                    "args": args
                }
            }
        }
    })
}

/// Turn a WebDriver error payload into a `BrowserError`
fn protocol_error(status: u16, value: &Value) -> BrowserError {
    let code = value["error"].as_str().unwrap_or("unknown error");
    let message = value["message"].as_str().unwrap_or("");
    BrowserError::Protocol(format!("{} (HTTP {}): {}", code, status, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_payload_headless() {
        let options = BrowserOptions::default().window_size(1024, 768);
        let payload = new_session_payload(&options);

        let args = payload["capabilities"]["alwaysMatch"]["goog:chromeOptions"]["args"]
            .as_array()
            .unwrap();
        assert!(args.contains(&json!("--headless=new")));
        assert!(args.contains(&json!("--window-size=1024,768")));
        assert_eq!(payload["capabilities"]["alwaysMatch"]["browserName"], "chrome");
    }

    #[test]
    fn test_new_session_payload_headed() {
        let options = BrowserOptions::default().headless(false);
        let payload = new_session_payload(&options);

        let args = payload["capabilities"]["alwaysMatch"]["goog:chromeOptions"]["args"]
            .as_array()
            .unwrap();
        assert!(!args.contains(&json!("--headless=new")));
    }

    #[test]
    fn test_protocol_error_message() {
        let value = json!({ "error": "invalid session id", "message": "session deleted" });
        let err = protocol_error(404, &value);
        assert_eq!(
            err.to_string(),
            "Protocol error: invalid session id (HTTP 404): session deleted"
        );
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let provider = WebDriverProvider::new("http://127.0.0.1:9515/").unwrap();
        assert_eq!(provider.base_url(), "http://127.0.0.1:9515");
        assert_eq!(provider.endpoint("session"), "http://127.0.0.1:9515/session");
    }
}
