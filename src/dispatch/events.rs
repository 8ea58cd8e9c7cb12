use tokio::sync::mpsc;

use crate::fetch::{DownloadId, HistoricalSeries, Quote, RequestKind, Symbol};

/// Everything the dispatcher reports to the rest of the application.
///
/// The `Download*` variants track whether the network exchange finished; the rest
/// say whether the data was usable. Every released request produces exactly one
/// `DownloadStarted`, zero or more `DownloadProgress`, and exactly one of
/// `DownloadCompleted` / `DownloadError`.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    DownloadStarted {
        id: DownloadId,
        description: String,
    },
    DownloadProgress {
        id: DownloadId,
        percent: u8,
    },
    DownloadCompleted {
        id: DownloadId,
    },
    DownloadError {
        id: DownloadId,
        message: String,
    },
    QuoteReady {
        symbol: Symbol,
        quote: Quote,
    },
    HistoricalReady {
        symbol: Symbol,
        series: HistoricalSeries,
    },
    InvalidPayload {
        symbol: Symbol,
        message: String,
    },
    FetchError {
        symbol: Symbol,
        message: String,
    },
    /// `symbol` is set when the provider refused that symbol's request; local
    /// window denials leave it `None` and keep the symbol queued.
    RateLimitExceeded {
        kind: RequestKind,
        symbol: Option<Symbol>,
        message: String,
        remaining_seconds: i64,
    },
}

pub type EventReceiver = mpsc::UnboundedReceiver<DispatchEvent>;

/// Sending half handed to the worker. Observers that went away are ignored.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<DispatchEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: DispatchEvent) {
        log::trace!("dispatch event: {:?}", event);
        let _ = self.tx.send(event);
    }
}
