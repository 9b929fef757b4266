//! Tool: web_fetch — fetch a public URL with SSRF hardening.
//!
//! Every hop is validated and IP-pinned: the request connects to the exact
//! address `validate_url` vetted (via `resolve()` on the client builder), and
//! redirects are followed manually so each Location is re-vetted before it is
//! touched.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::net::validate_url;
use super::{Danger, Tool, ToolResult};

const MAX_REDIRECT_HOPS: usize = 5;
const MAX_BODY_BYTES: usize = 512 * 1024;
const MAX_OUTPUT_CHARS: usize = 20_000;
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

pub struct WebFetchTool;

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a public http(s) URL and return the response body as text. \
         Private and internal addresses are refused."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The http or https URL to fetch."
                }
            },
            "required": ["url"]
        })
    }

    fn danger(&self) -> Danger {
        Danger::Medium
    }

    async fn execute(&self, input: serde_json::Value, cancel: &CancellationToken) -> ToolResult {
        let raw = match input.get("url").and_then(|v| v.as_str()) {
            Some(u) => u.to_string(),
            None => return ToolResult::error("missing required parameter: url"),
        };

        let mut current = raw;
        for hop in 0..=MAX_REDIRECT_HOPS {
            if cancel.is_cancelled() {
                return ToolResult::error("fetch cancelled");
            }

            let vetted = match validate_url(&current).await {
                Ok(v) => v,
                Err(e) => return ToolResult::error(format!("URL rejected: {e}")),
            };

            debug!(url = %vetted.url, pinned = %vetted.pinned, hop, "fetching");

            // Pin DNS: the connection goes to the vetted address, whatever
            // the hostname resolves to by the time the socket opens.
            let client = match reqwest::Client::builder()
                .resolve(&vetted.host, SocketAddr::new(vetted.pinned, vetted.port))
                .redirect(reqwest::redirect::Policy::none())
                .timeout(FETCH_TIMEOUT)
                .build()
            {
                Ok(c) => c,
                Err(e) => return ToolResult::error(format!("client build failed: {e}")),
            };

            let resp = tokio::select! {
                _ = cancel.cancelled() => return ToolResult::error("fetch cancelled"),
                r = client.get(vetted.url.clone()).send() => match r {
                    Ok(r) => r,
                    Err(e) => return ToolResult::error(format!("fetch failed: {e}")),
                },
            };

            let status = resp.status();
            if status.is_redirection() {
                let location = match resp
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                {
                    Some(l) => l.to_string(),
                    None => return ToolResult::error("redirect without a Location header"),
                };
                if hop == MAX_REDIRECT_HOPS {
                    return ToolResult::error(format!(
                        "too many redirects (limit {MAX_REDIRECT_HOPS})"
                    ));
                }
                // Relative redirects resolve against the current URL, then
                // the next loop iteration re-vets the result.
                current = match vetted.url.join(&location) {
                    Ok(u) => u.to_string(),
                    Err(e) => return ToolResult::error(format!("bad redirect target: {e}")),
                };
                continue;
            }

            let body = match resp.bytes().await {
                Ok(b) => b,
                Err(e) => return ToolResult::error(format!("body read failed: {e}")),
            };
            let body = &body[..body.len().min(MAX_BODY_BYTES)];
            let text = String::from_utf8_lossy(body);
            let mut out = format!("HTTP {} — {}\n\n", status.as_u16(), vetted.url);
            out.extend(text.chars().take(MAX_OUTPUT_CHARS));
            if text.chars().count() > MAX_OUTPUT_CHARS {
                out.push_str("\n\n[output truncated]");
            }
            return ToolResult::success(out);
        }

        ToolResult::error("redirect loop")
    }
}
