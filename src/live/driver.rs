//! Event-driven live session

use super::{MarketHistory, Shutdown};
use crate::candle::{Candle, DataError, Interval, LookbackIndex};
use crate::config::Config;
use crate::data::CandleStore;
use crate::engine::{EngineError, TradingEngine};
use crate::execution::{AccountBalance, ExecutionEngine};
use crate::feed::{FeedError, MarketDataSource, MarketStream, StreamMessage};
use crate::risk::CloseReason;
use crate::signal::Strategy;
use crate::telemetry::{self, LatencyMetric};
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Grace period for producer tasks after shutdown
const JOIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Message from a producer task to the consumer
#[derive(Debug)]
enum LiveEvent {
    Candles {
        symbol: String,
        interval: Interval,
        candles: Vec<Candle>,
    },
    Stream(StreamMessage),
    Fatal(EngineError),
}

/// Live (paper or exchange) session.
///
/// Producers (REST pollers, the stream forwarder, the account refresher) only
/// send messages; the consumer loop in [`LiveDriver::run`] is the single writer
/// of the candle history and the engine.
pub struct LiveDriver {
    config: Config,
    source: Arc<dyn MarketDataSource>,
    stream: Option<Arc<dyn MarketStream>>,
    execution: Arc<dyn ExecutionEngine>,
    store: Option<CandleStore>,
    shutdown: Shutdown,
    account: Arc<RwLock<AccountBalance>>,
}

impl LiveDriver {
    pub fn new(
        config: Config,
        source: Arc<dyn MarketDataSource>,
        execution: Arc<dyn ExecutionEngine>,
        shutdown: Shutdown,
    ) -> Self {
        let account = AccountBalance {
            available: config.ledger.initial_balance,
            total: config.ledger.initial_balance,
            open_positions: 0,
            updated_at: Utc::now(),
        };
        Self {
            config,
            source,
            stream: None,
            execution,
            store: None,
            shutdown,
            account: Arc::new(RwLock::new(account)),
        }
    }

    /// Also consume the streaming feed
    pub fn with_stream(mut self, stream: Arc<dyn MarketStream>) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Persist candle history here on exit
    pub fn with_store(mut self, store: CandleStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Latest account balance seen from the venue
    pub fn account(&self) -> Arc<RwLock<AccountBalance>> {
        self.account.clone()
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Run until shutdown or a fatal error.
    ///
    /// A fatal error triggers shutdown, dumps the ledger and is returned.
    pub async fn run(
        &mut self,
        engine: &mut TradingEngine,
        strategy: &mut dyn Strategy,
    ) -> Result<(), EngineError> {
        let (tx, mut rx) = mpsc::channel(self.config.live.queue_capacity.max(1));
        let mut handles = self.spawn_pollers(&tx);

        if self.config.live.streaming {
            if let Some(stream) = self.stream.clone() {
                let mut intervals = vec![self.config.engine.base_interval];
                intervals.extend(self.config.engine.intervals.iter().copied());
                match stream
                    .subscribe(&self.config.engine.symbols, &intervals, self.shutdown.subscribe())
                    .await
                {
                    Ok(stream_rx) => handles.push(tokio::spawn(forward_stream(
                        stream_rx,
                        tx.clone(),
                        self.receive_timeout(),
                        self.shutdown.subscribe(),
                    ))),
                    Err(e) => {
                        self.shutdown.trigger();
                        let e = EngineError::from(e);
                        engine.dump(&e);
                        return Err(e);
                    }
                }
            }
        }

        handles.push(tokio::spawn(refresh_account(
            self.execution.clone(),
            self.account.clone(),
            std::time::Duration::from_secs(self.config.live.account_refresh_secs.max(1)),
            self.shutdown.subscribe(),
        )));
        drop(tx);

        info!(
            symbols = ?self.config.engine.symbols,
            base = %self.config.engine.base_interval,
            strategy = strategy.name(),
            "Live session started"
        );

        let mut histories: HashMap<String, MarketHistory> = self
            .config
            .engine
            .symbols
            .iter()
            .map(|s| {
                (
                    s.clone(),
                    MarketHistory::new(
                        s,
                        self.config.engine.base_interval,
                        &self.config.engine.intervals,
                        self.config.engine.lookback(),
                    ),
                )
            })
            .collect();

        let result = self
            .consume(&mut rx, &mut histories, engine, strategy)
            .await;

        self.shutdown.trigger();
        for handle in handles {
            if timeout(JOIN_TIMEOUT, handle).await.is_err() {
                warn!("Producer task did not stop in time");
            }
        }

        match result {
            Err(e) => {
                engine.dump(&e);
                Err(e)
            }
            Ok(()) => {
                if self.config.live.flatten_on_shutdown {
                    engine.close_all(CloseReason::Shutdown).await?;
                }
                engine.save_snapshot()?;
                self.persist(&histories);
                info!(
                    equity = %engine.ledger().equity(),
                    open = engine.ledger().open_count(),
                    "Live session stopped"
                );
                Ok(())
            }
        }
    }

    fn receive_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.config.live.receive_timeout_ms.max(1))
    }

    fn spawn_pollers(&self, tx: &mpsc::Sender<LiveEvent>) -> Vec<JoinHandle<()>> {
        let engine = &self.config.engine;
        let mut intervals = vec![engine.base_interval];
        intervals.extend(engine.intervals.iter().copied().filter(|i| *i > engine.base_interval));

        let mut handles = Vec::new();
        for symbol in &engine.symbols {
            for interval in &intervals {
                handles.push(tokio::spawn(poll_candles(
                    self.source.clone(),
                    symbol.clone(),
                    *interval,
                    engine.lookback() + interval.duration() * 2,
                    Duration::milliseconds(self.config.live.poll_delay_ms as i64),
                    tx.clone(),
                    self.shutdown.subscribe(),
                )));
            }
        }
        handles
    }

    async fn consume(
        &self,
        rx: &mut mpsc::Receiver<LiveEvent>,
        histories: &mut HashMap<String, MarketHistory>,
        engine: &mut TradingEngine,
        strategy: &mut dyn Strategy,
    ) -> Result<(), EngineError> {
        let receive_timeout = self.receive_timeout();

        loop {
            if self.shutdown.is_triggered() {
                return Ok(());
            }
            let event = match timeout(receive_timeout, rx.recv()).await {
                Err(_) => continue,
                Ok(None) => {
                    debug!("All producers stopped");
                    return Ok(());
                }
                Ok(Some(event)) => event,
            };

            let symbol = match event {
                LiveEvent::Fatal(e) => return Err(e),
                LiveEvent::Candles {
                    symbol,
                    interval,
                    candles,
                } => {
                    if let Some(history) = histories.get_mut(&symbol) {
                        history.merge(interval, candles, Utc::now());
                    }
                    symbol
                }
                LiveEvent::Stream(StreamMessage::Candle {
                    symbol,
                    interval,
                    candle,
                    closed,
                }) => {
                    if interval == self.config.engine.base_interval && !closed {
                        continue;
                    }
                    if let Some(history) = histories.get_mut(&symbol) {
                        history.merge(interval, vec![candle], Utc::now());
                    }
                    symbol
                }
                LiveEvent::Stream(StreamMessage::AccountUpdate(balance)) => {
                    *self.account.write().await = balance;
                    continue;
                }
                LiveEvent::Stream(StreamMessage::OrderUpdate(fill)) => {
                    debug!(symbol = %fill.symbol, side = ?fill.side, price = %fill.price, "Order update");
                    continue;
                }
                LiveEvent::Stream(StreamMessage::Disconnected(reason)) => {
                    debug!(?reason, "Stream ended");
                    continue;
                }
            };

            if let Err(e) = self.step(&symbol, histories, engine, strategy).await {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!(symbol = %symbol, error = %e, "Live tick failed");
            }
        }
    }

    /// Hand the newest closed base tick of `symbol` to the engine once every
    /// interval covers it
    async fn step(
        &self,
        symbol: &str,
        histories: &mut HashMap<String, MarketHistory>,
        engine: &mut TradingEngine,
        strategy: &mut dyn Strategy,
    ) -> Result<(), EngineError> {
        let Some(history) = histories.get_mut(symbol) else {
            return Ok(());
        };
        let Some(pending) = history.pending_tick() else {
            return Ok(());
        };

        let dataset = match history.dataset() {
            Ok(dataset) => dataset,
            Err(DataError::EmptySeries(what)) => {
                debug!(symbol, %what, "Waiting for history");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let Some(last) = dataset.len().checked_sub(1) else {
            return Ok(());
        };
        if dataset.tick_time(last) != Some(pending) {
            debug!(symbol, tick = %pending, "Waiting for coarse coverage");
            return Ok(());
        }

        let index = LookbackIndex::build(&dataset, self.config.engine.lookback());
        let Some(view) = index.view(&dataset, last) else {
            return Ok(());
        };
        history.mark_processed(pending);

        let report = engine
            .on_tick(symbol, view.price, view.time, &view, strategy)
            .await?;
        if !report.is_quiet() {
            info!(
                symbol,
                time = %report.timestamp,
                price = %report.price,
                closed = report.closed.len(),
                opened = report.opened.is_some(),
                rejected = ?report.rejected.as_ref().map(|r| r.as_str()),
                "Live tick"
            );
        }
        Ok(())
    }

    fn persist(&self, histories: &HashMap<String, MarketHistory>) {
        let Some(store) = &self.store else {
            return;
        };
        for history in histories.values() {
            let mut intervals = vec![self.config.engine.base_interval];
            intervals.extend(self.config.engine.intervals.iter().copied());
            for interval in intervals {
                let Some(series) = history.series(interval).filter(|s| !s.is_empty()) else {
                    continue;
                };
                if let Err(e) = store.append(series) {
                    warn!(symbol = history.symbol(), %interval, error = %e, "Failed to persist candles");
                }
            }
        }
    }
}

/// Send unless shutdown wins first; false means stop
async fn forward(
    tx: &mpsc::Sender<LiveEvent>,
    event: LiveEvent,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    tokio::select! {
        sent = tx.send(event) => sent.is_ok(),
        _ = shutdown.changed() => false,
    }
}

/// Backfill once, then refresh the last few candles after every interval boundary
async fn poll_candles(
    source: Arc<dyn MarketDataSource>,
    symbol: String,
    interval: Interval,
    backfill: Duration,
    poll_delay: Duration,
    tx: mpsc::Sender<LiveEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let now = Utc::now();
    let mut result = source.fetch_range(&symbol, interval, now - backfill, now).await;

    loop {
        match result {
            Ok(candles) => {
                let event = LiveEvent::Candles {
                    symbol: symbol.clone(),
                    interval,
                    candles,
                };
                if !forward(&tx, event, &mut shutdown).await {
                    break;
                }
            }
            Err(e) if e.is_fatal() => {
                forward(&tx, LiveEvent::Fatal(e.into()), &mut shutdown).await;
                break;
            }
            Err(e) => warn!(symbol = %symbol, %interval, error = %e, "Candle poll failed"),
        }

        let now = Utc::now();
        let wait = (interval.next_boundary(now) + poll_delay - now)
            .to_std()
            .unwrap_or_default();
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        if *shutdown.borrow() {
            break;
        }

        let now = Utc::now();
        let started = Instant::now();
        result = source
            .fetch_candles(&symbol, interval, interval.window_start(now) - interval.duration() * 2, now)
            .await;
        telemetry::record_latency(LatencyMetric::CandlePoll, started.elapsed());
    }
    debug!(symbol = %symbol, %interval, "Candle poller stopped");
}

/// Move stream messages onto the consumer queue; a capped-out stream is fatal
async fn forward_stream(
    mut stream_rx: mpsc::Receiver<StreamMessage>,
    tx: mpsc::Sender<LiveEvent>,
    receive_timeout: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let message = match timeout(receive_timeout, stream_rx.recv()).await {
            Err(_) => continue,
            Ok(None) => break,
            Ok(Some(message)) => message,
        };

        let event = match message {
            StreamMessage::Disconnected(Some(reason)) => {
                let e = FeedError::RetriesExhausted {
                    what: "market stream".to_string(),
                    attempts: 0,
                    last_error: reason,
                };
                forward(&tx, LiveEvent::Fatal(e.into()), &mut shutdown).await;
                break;
            }
            StreamMessage::Disconnected(None) => break,
            message => LiveEvent::Stream(message),
        };
        if !forward(&tx, event, &mut shutdown).await {
            break;
        }
    }
    debug!("Stream forwarder stopped");
}

/// Refresh the shared account balance; the write replaces every field at once
async fn refresh_account(
    execution: Arc<dyn ExecutionEngine>,
    account: Arc<RwLock<AccountBalance>>,
    period: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        match timeout(period, execution.get_account_balance()).await {
            Ok(Ok(balance)) => {
                debug!(available = %balance.available, total = %balance.total, "Account refreshed");
                *account.write().await = balance;
            }
            Ok(Err(e)) => warn!(error = %e, "Account refresh failed"),
            Err(_) => warn!("Account refresh timed out"),
        }
    }
    debug!("Account refresher stopped");
}
