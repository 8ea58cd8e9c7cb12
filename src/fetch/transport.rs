use std::fmt;

use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use tokio::sync::mpsc;

use crate::config::HttpConfig;
use crate::error::{Context, Result};

use super::request::OutboundRequest;

/// Opaque token the transport hands back for each issued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReplyHandle(u64);

impl ReplyHandle {
    pub fn new(raw: u64) -> Self {
        ReplyHandle(raw)
    }
}

impl fmt::Display for ReplyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Final outcome of one HTTP exchange, as seen by the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub handle: ReplyHandle,
    pub network_error: Option<String>,
    pub status: Option<u16>,
    pub body: String,
    /// `Retry-After` in seconds, when the provider sent one.
    pub retry_after: Option<u64>,
}

impl Completion {
    pub fn network_error(handle: ReplyHandle, message: impl Into<String>) -> Self {
        Self {
            handle,
            network_error: Some(message.into()),
            status: None,
            body: String::new(),
            retry_after: None,
        }
    }

    pub fn response(handle: ReplyHandle, status: u16, body: impl Into<String>) -> Self {
        Self {
            handle,
            network_error: None,
            status: Some(status),
            body: body.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Progress { handle: ReplyHandle, percent: u8 },
    Finished(Completion),
}

/// Channel back into the dispatcher's worker context.
#[derive(Debug, Clone)]
pub struct ReplyNotifier {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl ReplyNotifier {
    pub fn new(tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { tx }
    }

    pub fn progress(&self, handle: ReplyHandle, percent: u8) {
        let _ = self.tx.send(TransportEvent::Progress {
            handle,
            percent: percent.min(100),
        });
    }

    pub fn finish(&self, completion: Completion) {
        let _ = self.tx.send(TransportEvent::Finished(completion));
    }
}

/// Generic asynchronous HTTP capability used by the dispatcher.
///
/// `issue` must return immediately; the exchange reports back through `notifier`,
/// finishing exactly once per handle.
pub trait Transport: Send {
    fn issue(&mut self, request: &OutboundRequest, notifier: ReplyNotifier) -> ReplyHandle;
}

/// `reqwest`-backed transport; each request runs on its own tokio task.
pub struct ReqwestTransport {
    client: Client,
    next_handle: u64,
}

impl ReqwestTransport {
    pub fn new(http: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(http.timeout)
            .user_agent(http.user_agent.as_str())
            .build()
            .context("Failed to construct dispatcher HTTP client")?;
        Ok(Self {
            client,
            next_handle: 0,
        })
    }
}

impl Transport for ReqwestTransport {
    fn issue(&mut self, request: &OutboundRequest, notifier: ReplyNotifier) -> ReplyHandle {
        self.next_handle += 1;
        let handle = ReplyHandle(self.next_handle);
        let client = self.client.clone();
        let url = request.url().to_string();

        tokio::spawn(async move {
            let completion = perform(&client, &url, handle, &notifier).await;
            notifier.finish(completion);
        });

        handle
    }
}

async fn perform(
    client: &Client,
    url: &str,
    handle: ReplyHandle,
    notifier: &ReplyNotifier,
) -> Completion {
    // Strip the URL from reqwest errors, it carries the API key.
    let mut response = match client.get(url).send().await {
        Ok(response) => response,
        Err(err) => return Completion::network_error(handle, err.without_url().to_string()),
    };

    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok());
    let total = response.content_length().filter(|len| *len > 0);

    let mut body = Vec::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                body.extend_from_slice(&chunk);
                if let Some(total) = total {
                    let percent = (body.len() as u64 * 100 / total).min(100) as u8;
                    notifier.progress(handle, percent);
                }
            }
            Ok(None) => break,
            Err(err) => return Completion::network_error(handle, err.without_url().to_string()),
        }
    }

    Completion {
        handle,
        network_error: None,
        status: Some(status),
        body: String::from_utf8_lossy(&body).into_owned(),
        retry_after,
    }
}
