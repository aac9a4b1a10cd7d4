//! Background event-stream subscriber
//!
//! One tokio task owns the connection. It moves through
//! `Connecting -> Streaming -> Backoff -> Connecting` until stopped, and
//! publishes its phase on a watch channel. Stop requests travel on a second
//! watch channel and are observed while connecting, while waiting for bytes,
//! between lines and during backoff.

use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::framing::{FrameParser, LineBuffer};
use super::source::{EventSource, EventStream};
use super::{EventHandler, PolicyEvent};
use crate::config::SubscriberConfig;
use crate::error::CacheError;

/// Where the subscriber loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberPhase {
    /// Not running, either not started yet or stopped
    Disconnected,
    /// Opening a stream session
    Connecting,
    /// Reading events
    Streaming,
    /// Waiting before the next connection attempt
    Backoff,
}

/// Handle to a running subscriber task
///
/// Dropping the handle signals the task to stop and aborts it, but does not
/// wait: a handler call already running on another worker thread may still
/// complete afterwards. Only [`stop`](Self::stop), once awaited, guarantees
/// that no further events reach the handler.
#[derive(Debug)]
pub struct EventSubscriber {
    stop_tx: watch::Sender<bool>,
    phase_tx: Arc<watch::Sender<SubscriberPhase>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    stop_timeout: Duration,
}

impl EventSubscriber {
    /// Spawn the subscriber loop on the current tokio runtime
    pub fn start(
        source: Arc<dyn EventSource>,
        handler: EventHandler,
        config: &SubscriberConfig,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (phase_tx, _) = watch::channel(SubscriberPhase::Disconnected);
        let phase_tx = Arc::new(phase_tx);

        info!(
            source = %source.describe(),
            reconnect_delay_ms = config.reconnect_delay_ms,
            max_reconnect_delay_ms = config.max_reconnect_delay_ms,
            "Starting event subscriber"
        );

        let worker = Worker {
            source,
            handler,
            stop_rx,
            phase_tx: phase_tx.clone(),
            base_delay: config.reconnect_delay(),
            max_delay: config.max_reconnect_delay(),
        };
        let handle = tokio::spawn(worker.run());

        Self {
            stop_tx,
            phase_tx,
            handle: Mutex::new(Some(handle)),
            stop_timeout: config.stop_timeout(),
        }
    }

    /// Current phase
    pub fn phase(&self) -> SubscriberPhase {
        *self.phase_tx.borrow()
    }

    /// Receiver that observes phase transitions
    pub fn watch_phase(&self) -> watch::Receiver<SubscriberPhase> {
        self.phase_tx.subscribe()
    }

    /// Whether the background task is still alive
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Signal the loop to exit and wait for it
    ///
    /// The task is aborted if it does not finish within the configured stop
    /// timeout. Either way the handler is never invoked after this returns.
    /// Calling `stop` again is a no-op.
    pub async fn stop(&self) {
        self.stop_tx.send_replace(true);
        let Some(mut handle) = self.handle.lock().take() else {
            return;
        };

        if tokio::time::timeout(self.stop_timeout, &mut handle)
            .await
            .is_err()
        {
            warn!(
                timeout_ms = self.stop_timeout.as_millis() as u64,
                "Event subscriber did not stop in time; aborting"
            );
            handle.abort();
            let _ = handle.await;
        }

        self.phase_tx.send_replace(SubscriberPhase::Disconnected);
        info!("Event subscriber stopped");
    }
}

impl Drop for EventSubscriber {
    fn drop(&mut self) {
        self.stop_tx.send_replace(true);
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}

/// How a streaming session ended
enum SessionEnd {
    Stopped,
    Closed,
    Failed(CacheError),
}

struct Worker {
    source: Arc<dyn EventSource>,
    handler: EventHandler,
    stop_rx: watch::Receiver<bool>,
    phase_tx: Arc<watch::Sender<SubscriberPhase>>,
    base_delay: Duration,
    max_delay: Duration,
}

impl Worker {
    async fn run(mut self) {
        let mut delay = self.base_delay;

        while !self.stop_requested() {
            self.phase_tx.send_replace(SubscriberPhase::Connecting);

            let connected = tokio::select! {
                biased;
                _ = stop_signal(&mut self.stop_rx) => break,
                result = self.source.connect() => result,
            };

            match connected {
                Ok(stream) => {
                    info!(source = %self.source.describe(), "Event stream connected");
                    self.phase_tx.send_replace(SubscriberPhase::Streaming);
                    match self.consume(stream).await {
                        SessionEnd::Stopped => break,
                        SessionEnd::Closed => info!("Event stream closed by server"),
                        SessionEnd::Failed(error) => {
                            warn!(error = %error, "Event stream failed");
                        }
                    }
                    delay = self.base_delay;
                }
                Err(error) => {
                    warn!(
                        source = %self.source.describe(),
                        error = %error,
                        delay_ms = delay.as_millis() as u64,
                        "Event stream connection failed"
                    );
                }
            }

            if self.stop_requested() {
                break;
            }

            self.phase_tx.send_replace(SubscriberPhase::Backoff);
            debug!(delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
            tokio::select! {
                biased;
                _ = stop_signal(&mut self.stop_rx) => break,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(self.max_delay);
        }

        self.phase_tx.send_replace(SubscriberPhase::Disconnected);
        debug!("Event subscriber loop exited");
    }

    async fn consume(&mut self, mut stream: EventStream) -> SessionEnd {
        let mut lines = LineBuffer::new();
        let mut parser = FrameParser::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = stop_signal(&mut self.stop_rx) => return SessionEnd::Stopped,
                next = stream.next() => next,
            };

            let chunk = match next {
                None => return SessionEnd::Closed,
                Some(Err(error)) => return SessionEnd::Failed(error),
                Some(Ok(chunk)) => chunk,
            };

            for line in lines.push(&chunk) {
                if self.stop_requested() {
                    return SessionEnd::Stopped;
                }
                let line = match line {
                    Ok(line) => line,
                    Err(error) => {
                        warn!(error = %error, "Dropping malformed event");
                        parser.reset();
                        continue;
                    }
                };
                let event = match parser.feed_line(&line) {
                    None => continue,
                    Some(frame) => frame.and_then(|frame| PolicyEvent::from_frame(&frame)),
                };
                match event {
                    Ok(event) => {
                        debug!(
                            event_type = %event.event_type,
                            app_id = ?event.app_id,
                            "Dispatching policy event"
                        );
                        (self.handler)(event);
                    }
                    Err(error) => warn!(error = %error, "Dropping malformed event"),
                }
            }
        }
    }

    fn stop_requested(&self) -> bool {
        *self.stop_rx.borrow()
    }
}

/// Resolves once stop was requested or the handle is gone
async fn stop_signal(stop_rx: &mut watch::Receiver<bool>) {
    let _ = stop_rx.wait_for(|stopped| *stopped).await;
}
