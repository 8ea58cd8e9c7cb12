use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::fetch::{
    Completion, DownloadId, OutboundRequest, ReplyHandle, ReplyNotifier, RequestKind, Symbol,
    Transport, TransportEvent,
};
use crate::settings::{CredentialSource, SettingsStore};
use crate::utils::Clock;

use super::classifier::{ClassifiedResult, ResponseClassifier};
use super::events::{DispatchEvent, EventReceiver, EventSink};
use super::queue::{QueueEntry, RequestQueue};
use super::throttle::{Acquisition, Countdown, HistoricalThrottle, QuoteThrottle};
use super::timer::Scheduler;

/// External capabilities the dispatcher drives.
pub struct Collaborators {
    pub transport: Box<dyn Transport>,
    pub settings: Arc<dyn SettingsStore>,
    pub credentials: Arc<dyn CredentialSource>,
    pub clock: Arc<dyn Clock>,
}

/// Snapshot of the worker's queues, for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    pub quote_pending: usize,
    pub historical_pending: usize,
    pub in_flight: usize,
    pub historical_paused: bool,
}

enum Command {
    Enqueue {
        symbol: Symbol,
        kind: RequestKind,
        reply: Option<oneshot::Sender<bool>>,
    },
    TimeToNextHistorical {
        reply: oneshot::Sender<i64>,
    },
    Status {
        reply: oneshot::Sender<QueueStatus>,
    },
    SaveWindow {
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<()>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tick {
    Quote(u64),
    Historical(u64),
}

struct DownloadRecord {
    download_id: DownloadId,
    symbol: Symbol,
    kind: RequestKind,
}

/// Message-passing front of the dispatcher. Cheap to clone; safe to use from any thread.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl DispatcherHandle {
    /// Queue `raw` for `kind`. Returns whether the queue changed; blank symbols fail
    /// with [`AppError::InvalidInput`] without reaching the worker.
    pub async fn enqueue(&self, raw: &str, kind: RequestKind) -> Result<bool> {
        let symbol = Symbol::parse(raw)?;
        let (reply, rx) = oneshot::channel();
        self.send(Command::Enqueue {
            symbol,
            kind,
            reply: Some(reply),
        })?;
        Ok(rx.await?)
    }

    /// Fire-and-forget variant of [`enqueue`](Self::enqueue) for non-async callers.
    pub fn submit(&self, raw: &str, kind: RequestKind) -> Result<()> {
        let symbol = Symbol::parse(raw)?;
        self.send(Command::Enqueue {
            symbol,
            kind,
            reply: None,
        })
    }

    /// Seconds until the sliding window admits another historical request.
    pub async fn time_to_next_historical(&self) -> Result<i64> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::TimeToNextHistorical { reply })?;
        Ok(rx.await?)
    }

    pub async fn status(&self) -> Result<QueueStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status { reply })?;
        Ok(rx.await?)
    }

    /// Persist the historical window now.
    pub async fn save_window(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SaveWindow { reply })?;
        rx.await?
    }

    /// Persist the window, drop queued symbols, let in-flight requests finish, then stop.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply })?;
        rx.await?
    }

    fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| AppError::Closed)
    }
}

/// Owns both queues and both throttles; all mutation happens on its own task.
pub struct Dispatcher {
    config: Config,
    quote_queue: RequestQueue,
    historical_queue: RequestQueue,
    quote_throttle: QuoteThrottle,
    historical_throttle: HistoricalThrottle,
    historical_generation: u64,
    historical_paused: bool,
    /// Epoch second the current pause re-arms at; may outlast the local window.
    historical_paused_until: Option<i64>,
    downloads: HashMap<ReplyHandle, DownloadRecord>,
    classifier: ResponseClassifier,
    collaborators: Collaborators,
    events: EventSink,
    scheduler: Scheduler<Tick>,
    notifier: ReplyNotifier,
    shutdown_reply: Option<oneshot::Sender<Result<()>>>,
    accepting: bool,
}

struct Inboxes {
    commands: mpsc::UnboundedReceiver<Command>,
    transport: mpsc::UnboundedReceiver<TransportEvent>,
    timers: mpsc::UnboundedReceiver<Tick>,
}

impl Dispatcher {
    /// Load the persisted window and start the worker task on the current tokio runtime.
    pub fn spawn(
        config: Config,
        collaborators: Collaborators,
    ) -> Result<(DispatcherHandle, EventReceiver, JoinHandle<()>)> {
        let (events, event_rx) = EventSink::channel();
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (transport_tx, transport) = mpsc::unbounded_channel();
        let (scheduler, timers) = Scheduler::channel();

        let mut historical_throttle =
            HistoricalThrottle::new(config.historical.max_requests, config.historical.window);
        let persisted = collaborators.settings.load_historical_window()?;
        historical_throttle.load(&persisted);
        info!(
            "Historical window loaded: {} slot(s), next request in {}s",
            historical_throttle.capacity(),
            historical_throttle.remaining(collaborators.clock.now_secs())
        );

        let dispatcher = Dispatcher {
            quote_throttle: QuoteThrottle::new(config.quote.interval, config.quote_cooldown()),
            classifier: ResponseClassifier::new(config.historical.series_key.clone()),
            config,
            quote_queue: RequestQueue::new(),
            historical_queue: RequestQueue::new(),
            historical_throttle,
            historical_generation: 0,
            historical_paused: false,
            historical_paused_until: None,
            downloads: HashMap::new(),
            collaborators,
            events,
            scheduler,
            notifier: ReplyNotifier::new(transport_tx),
            shutdown_reply: None,
            accepting: true,
        };

        let inboxes = Inboxes {
            commands,
            transport,
            timers,
        };
        let task = tokio::spawn(dispatcher.run(inboxes));

        Ok((DispatcherHandle { tx: command_tx }, event_rx, task))
    }

    async fn run(mut self, mut inboxes: Inboxes) {
        loop {
            tokio::select! {
                command = inboxes.commands.recv(), if self.accepting => match command {
                    Some(command) => self.on_command(command),
                    None => {
                        self.begin_shutdown();
                        let _ = self.save_window();
                    }
                },
                Some(event) = inboxes.transport.recv() => self.on_transport_event(event),
                Some(tick) = inboxes.timers.recv() => self.on_tick(tick),
            }

            if !self.accepting && self.downloads.is_empty() {
                break;
            }
        }

        debug!("Dispatcher worker stopped");
        if let Some(reply) = self.shutdown_reply.take() {
            let _ = reply.send(Ok(()));
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Enqueue {
                symbol,
                kind,
                reply,
            } => {
                let added = self.on_enqueue(symbol, kind);
                if let Some(reply) = reply {
                    let _ = reply.send(added);
                }
            }
            Command::TimeToNextHistorical { reply } => {
                let _ = reply.send(self.historical_remaining());
            }
            Command::Status { reply } => {
                let _ = reply.send(QueueStatus {
                    quote_pending: self.quote_queue.len(),
                    historical_pending: self.historical_queue.len(),
                    in_flight: self.downloads.len(),
                    historical_paused: self.historical_paused,
                });
            }
            Command::SaveWindow { reply } => {
                let _ = reply.send(self.save_window());
            }
            Command::Shutdown { reply } => {
                self.begin_shutdown();
                match self.save_window() {
                    Ok(()) => self.shutdown_reply = Some(reply),
                    Err(err) => {
                        let _ = reply.send(Err(err));
                    }
                }
            }
        }
    }

    fn begin_shutdown(&mut self) {
        if !self.accepting {
            return;
        }
        self.accepting = false;

        let dropped: Vec<Symbol> = self
            .quote_queue
            .clear()
            .into_iter()
            .chain(self.historical_queue.clear())
            .collect();
        if !dropped.is_empty() {
            info!("Dropping {} queued request(s) on shutdown", dropped.len());
        }
        if !self.downloads.is_empty() {
            info!(
                "Waiting for {} in-flight request(s) before stopping",
                self.downloads.len()
            );
        }
    }

    fn save_window(&self) -> Result<()> {
        let window = self.historical_throttle.save();
        self.collaborators
            .settings
            .save_historical_window(&window)
            .map(|()| debug!("Historical window saved: {:?}", window))
            .map_err(|err| {
                warn!("Failed to save historical window: {}", err);
                err
            })
    }

    fn on_enqueue(&mut self, symbol: Symbol, kind: RequestKind) -> bool {
        let now = self.collaborators.clock.now();
        let queue = match kind {
            RequestKind::Quote => &mut self.quote_queue,
            RequestKind::Historical => &mut self.historical_queue,
        };

        let added = queue.enqueue(symbol.clone(), now);
        if added {
            debug!("Queued {} request for {} ({} pending)", kind, symbol, queue.len());
        } else {
            debug!("{} request for {} already queued", kind, symbol);
        }

        match kind {
            RequestKind::Quote => {
                if self.quote_throttle.is_idle() {
                    self.drain_quote();
                }
            }
            RequestKind::Historical => {
                if !self.historical_paused {
                    self.drain_historical();
                } else if added {
                    let countdown = Countdown {
                        remaining_secs: self.historical_remaining(),
                    };
                    self.report_historical_limit(countdown);
                }
            }
        }

        added
    }

    fn drain_quote(&mut self) {
        while self.quote_throttle.is_idle() {
            let Some(entry) = self.quote_queue.dequeue() else {
                return;
            };
            let key = match self.collaborators.credentials.key_for(RequestKind::Quote) {
                Ok(key) => key,
                Err(err) => {
                    self.reject_unissued(entry.symbol, &err);
                    continue;
                }
            };

            let now = Instant::now();
            if let Some(previous) = self.quote_throttle.last_release() {
                debug!("Quote gate open {:?} after previous release", now - previous);
            }
            let arm = self.quote_throttle.release(now);
            self.scheduler.start(arm.delay, Tick::Quote(arm.generation));
            self.issue(entry, RequestKind::Quote, &key);
        }
    }

    fn drain_historical(&mut self) {
        while !self.historical_paused {
            if self.historical_queue.is_empty() {
                return;
            }
            let key = match self.collaborators.credentials.key_for(RequestKind::Historical) {
                Ok(key) => key,
                Err(err) => {
                    if let Some(entry) = self.historical_queue.dequeue() {
                        self.reject_unissued(entry.symbol, &err);
                    }
                    continue;
                }
            };

            let now = self.collaborators.clock.now_secs();
            match self.historical_throttle.try_acquire(now) {
                Acquisition::Granted => {
                    if let Some(entry) = self.historical_queue.dequeue() {
                        self.issue(entry, RequestKind::Historical, &key);
                    }
                }
                Acquisition::Denied(countdown) => {
                    self.pause_historical(countdown.remaining_secs);
                    self.report_historical_limit(countdown);
                }
            }
        }
    }

    fn pause_historical(&mut self, seconds: i64) {
        let seconds = seconds.max(0);
        let now = self.collaborators.clock.now_secs();
        self.historical_paused = true;
        self.historical_paused_until = Some(now.saturating_add(seconds));
        self.historical_generation += 1;
        info!(
            "Historical queue paused for {}s ({} pending)",
            seconds,
            self.historical_queue.len()
        );
        self.scheduler.start(
            Duration::from_secs(seconds as u64),
            Tick::Historical(self.historical_generation),
        );
    }

    /// Seconds until the historical queue may release again, counting a provider-imposed pause.
    fn historical_remaining(&self) -> i64 {
        let now = self.collaborators.clock.now_secs();
        let local = self.historical_throttle.remaining(now);
        let paused = match self.historical_paused_until {
            Some(until) if self.historical_paused => until.saturating_sub(now).max(0),
            _ => 0,
        };
        local.max(paused)
    }

    fn report_historical_limit(&self, countdown: Countdown) {
        self.events.emit(DispatchEvent::RateLimitExceeded {
            kind: RequestKind::Historical,
            symbol: None,
            message: format!(
                "Historical data request limit reached. Next request in {}",
                countdown
            ),
            remaining_seconds: countdown.remaining_secs,
        });
    }

    /// Credentials or URL failed before anything reached the network.
    fn reject_unissued(&self, symbol: Symbol, err: &AppError) {
        warn!("Not dispatching request for {}: {}", symbol, err);
        self.events.emit(DispatchEvent::FetchError {
            symbol,
            message: err.to_string(),
        });
    }

    fn issue(&mut self, entry: QueueEntry, kind: RequestKind, api_key: &str) {
        let QueueEntry {
            symbol,
            enqueued_at,
        } = entry;
        let request = match OutboundRequest::build(&self.config, symbol.clone(), kind, api_key) {
            Ok(request) => request,
            Err(err) => {
                self.reject_unissued(symbol, &err);
                return;
            }
        };

        let handle = self
            .collaborators
            .transport
            .issue(&request, self.notifier.clone());
        let download_id = request.download_id().clone();
        let waited = self.collaborators.clock.now() - enqueued_at;
        info!(
            "Released {} request for {} as {} after {}s in queue",
            kind,
            symbol,
            handle,
            waited.num_seconds()
        );

        self.downloads.insert(
            handle,
            DownloadRecord {
                download_id: download_id.clone(),
                symbol,
                kind,
            },
        );
        self.events.emit(DispatchEvent::DownloadStarted {
            id: download_id,
            description: request.description(),
        });
    }

    fn on_tick(&mut self, tick: Tick) {
        if !self.accepting {
            return;
        }
        match tick {
            Tick::Quote(generation) => {
                if self.quote_throttle.fire(generation) {
                    self.drain_quote();
                }
            }
            Tick::Historical(generation) => {
                if generation == self.historical_generation && self.historical_paused {
                    debug!("Historical queue re-armed");
                    self.historical_paused = false;
                    self.historical_paused_until = None;
                    self.drain_historical();
                }
            }
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Progress { handle, percent } => {
                if let Some(record) = self.downloads.get(&handle) {
                    self.events.emit(DispatchEvent::DownloadProgress {
                        id: record.download_id.clone(),
                        percent,
                    });
                }
            }
            TransportEvent::Finished(completion) => self.on_completion(completion),
        }
    }

    fn on_completion(&mut self, completion: Completion) {
        let Some(record) = self.downloads.remove(&completion.handle) else {
            warn!("Completion for unknown reply {}", completion.handle);
            return;
        };

        let result = self
            .classifier
            .classify(record.kind, &record.symbol, &completion);
        self.emit_result(&record, result);

        let lifecycle = match (&completion.network_error, completion.status) {
            (Some(message), _) => DispatchEvent::DownloadError {
                id: record.download_id,
                message: message.clone(),
            },
            (None, Some(status)) if status != 200 => DispatchEvent::DownloadError {
                id: record.download_id,
                message: format!("HTTP status {status}"),
            },
            _ => DispatchEvent::DownloadCompleted {
                id: record.download_id,
            },
        };
        self.events.emit(lifecycle);
    }

    fn emit_result(&mut self, record: &DownloadRecord, result: ClassifiedResult) {
        let symbol = record.symbol.clone();
        match result {
            ClassifiedResult::QuoteData(quote) => {
                self.events.emit(DispatchEvent::QuoteReady { symbol, quote });
            }
            ClassifiedResult::HistoricalData(series) => {
                info!("Received {} daily bar(s) for {}", series.len(), symbol);
                self.events
                    .emit(DispatchEvent::HistoricalReady { symbol, series });
            }
            ClassifiedResult::InvalidPayload(message) => {
                warn!("{}", message);
                self.events
                    .emit(DispatchEvent::InvalidPayload { symbol, message });
            }
            ClassifiedResult::TransientError(message) => {
                warn!("{} request for {} failed: {}", record.kind, symbol, message);
                self.events.emit(DispatchEvent::FetchError { symbol, message });
            }
            ClassifiedResult::RateLimited {
                retry_after,
                message,
            } => self.on_provider_rate_limit(symbol, record.kind, retry_after, message),
        }
    }

    /// The provider refused `symbol`; it is not retried, the gate is held back instead.
    fn on_provider_rate_limit(
        &mut self,
        symbol: Symbol,
        kind: RequestKind,
        retry_after: Option<u64>,
        message: String,
    ) {
        match kind {
            RequestKind::Quote => {
                let arm = self
                    .quote_throttle
                    .cooldown(retry_after.map(Duration::from_secs));
                warn!(
                    "Quote provider throttled us; cooling down for {:?}",
                    arm.delay
                );
                self.scheduler.start(arm.delay, Tick::Quote(arm.generation));
                self.events.emit(DispatchEvent::RateLimitExceeded {
                    kind,
                    symbol: Some(symbol),
                    message,
                    remaining_seconds: arm.delay.as_secs_f64().ceil() as i64,
                });
            }
            RequestKind::Historical => {
                let now = self.collaborators.clock.now_secs();
                let local = self.historical_throttle.remaining(now);
                let remaining = if local > 0 {
                    local
                } else {
                    retry_after
                        .map(|secs| secs as i64)
                        .unwrap_or(self.config.historical.window.as_secs() as i64)
                };
                warn!("Historical provider throttled us; pausing for {}s", remaining);
                self.pause_historical(remaining);
                self.events.emit(DispatchEvent::RateLimitExceeded {
                    kind,
                    symbol: Some(symbol),
                    message: format!(
                        "{} Next request in {}",
                        message,
                        Countdown {
                            remaining_secs: remaining
                        }
                    ),
                    remaining_seconds: remaining,
                });
            }
        }
    }
}
