//! Ordered ingestion of the ledger event log.
//!
//! The ingestor is the ordering barrier in front of the [`Aggregator`]. It
//! keeps a high-water mark (the greatest applied key) and a bounded window
//! of recently applied keys:
//!
//! - a key above the high-water mark is applied
//! - a key in the window is a re-delivery and is skipped
//! - a key at or below the high-water mark that was never applied is an
//!   ordering anomaly: ingestion halts until an operator calls
//!   [`EventIngestor::resume`]
//!
//! Keys older than the window are checked against the store's applied set.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use memproof_core::{EventKey, LedgerEvent};
use memproof_ledger::Ledger;
use memproof_store::AggregateStore;

use crate::aggregator::{Aggregator, ApplyOutcome};
use crate::error::{AggregateError, Result};

/// A source of ordered ledger events.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetch up to `limit` events after `after`, in log order.
    ///
    /// Sources with at-least-once delivery may return keys at or below
    /// `after`; the ingestor deduplicates them.
    async fn fetch(&self, after: Option<EventKey>, limit: usize) -> Result<Vec<LedgerEvent>>;
}

/// Reads events straight from a [`Ledger`].
pub struct LedgerSource<L: Ledger> {
    ledger: Arc<L>,
}

impl<L: Ledger> LedgerSource<L> {
    pub fn new(ledger: Arc<L>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl<L: Ledger> EventSource for LedgerSource<L> {
    async fn fetch(&self, after: Option<EventKey>, limit: usize) -> Result<Vec<LedgerEvent>> {
        Ok(self.ledger.events_since(after, limit).await?)
    }
}

/// Configuration for ingestion.
#[derive(Debug, Clone)]
pub struct IngestorConfig {
    /// Maximum events fetched per poll.
    pub page_size: usize,
    /// Number of recently applied keys remembered in memory.
    pub dedup_window: usize,
    /// Delay between polls when caught up.
    pub poll_interval: Duration,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            dedup_window: 1024,
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Whether the ingestor is accepting events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestorStatus {
    Running,
    /// Stopped on an ordering anomaly.
    Halted { key: EventKey, reason: String },
}

/// Counts from one ingestion pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub applied: usize,
    pub duplicates: usize,
    /// High-water mark after the pass.
    pub high_water: Option<EventKey>,
}

/// Drives the aggregator from an [`EventSource`], one event at a time.
pub struct EventIngestor<S: AggregateStore, E: EventSource> {
    aggregator: Aggregator<S>,
    source: E,
    config: IngestorConfig,
    high_water: Option<EventKey>,
    window: BTreeSet<EventKey>,
    status: IngestorStatus,
    recovered: bool,
}

impl<S: AggregateStore, E: EventSource> EventIngestor<S, E> {
    /// Create an ingestor. State left by a previous run is recovered from
    /// the store on the first poll, or explicitly with
    /// [`recover`](Self::recover).
    pub fn new(store: Arc<S>, source: E, config: IngestorConfig) -> Self {
        Self {
            aggregator: Aggregator::new(store),
            source,
            config,
            high_water: None,
            window: BTreeSet::new(),
            status: IngestorStatus::Running,
            recovered: false,
        }
    }

    pub fn aggregator(&self) -> &Aggregator<S> {
        &self.aggregator
    }

    pub fn status(&self) -> &IngestorStatus {
        &self.status
    }

    pub fn high_water_mark(&self) -> Option<EventKey> {
        self.high_water
    }

    /// Reload the high-water mark and dedup window from the store.
    pub async fn recover(&mut self) -> Result<()> {
        let store = self.aggregator.store();
        self.high_water = store.high_water_mark().await?;
        self.window = store
            .recent_applied_keys(self.config.dedup_window)
            .await?
            .into_iter()
            .collect();
        self.recovered = true;
        tracing::info!(
            high_water = ?self.high_water,
            window = self.window.len(),
            "ingestor recovered"
        );
        Ok(())
    }

    /// Clear a halt after the anomaly has been resolved out of band.
    pub fn resume(&mut self) {
        if let IngestorStatus::Halted { key, .. } = &self.status {
            tracing::warn!(event = %key, "ingestion resumed by operator");
        }
        self.status = IngestorStatus::Running;
    }

    /// Pass one event through the ordering barrier.
    pub async fn ingest(&mut self, event: &LedgerEvent) -> Result<ApplyOutcome> {
        if let IngestorStatus::Halted { key, reason } = &self.status {
            return Err(AggregateError::Halted {
                key: *key,
                reason: reason.clone(),
            });
        }

        let key = event.key();
        match self.high_water {
            Some(high_water) if key <= high_water => {
                if self.is_redelivery(&key).await? {
                    tracing::debug!(event = %key, "re-delivered event skipped");
                    return Ok(ApplyOutcome::Duplicate);
                }
                Err(self.halt(key, high_water, event))
            }
            _ => {
                let outcome = self.aggregator.apply(event).await?;
                self.advance(key);
                Ok(outcome)
            }
        }
    }

    /// Fetch one page from the source and ingest it in order.
    pub async fn poll_once(&mut self) -> Result<IngestReport> {
        if !self.recovered {
            self.recover().await?;
        }
        let events = self
            .source
            .fetch(self.high_water, self.config.page_size)
            .await?;

        let mut report = IngestReport::default();
        for event in &events {
            match self.ingest(event).await? {
                ApplyOutcome::Applied => report.applied += 1,
                ApplyOutcome::Duplicate => report.duplicates += 1,
            }
        }
        report.high_water = self.high_water;

        if !events.is_empty() {
            tracing::debug!(
                applied = report.applied,
                duplicates = report.duplicates,
                high_water = ?report.high_water,
                "ingested page"
            );
        }
        Ok(report)
    }

    /// Poll until the source returns an empty page.
    pub async fn catch_up(&mut self) -> Result<IngestReport> {
        let mut total = IngestReport::default();
        loop {
            let page = self.poll_once().await?;
            total.applied += page.applied;
            total.duplicates += page.duplicates;
            total.high_water = page.high_water;
            if page.applied == 0 && page.duplicates == 0 {
                return Ok(total);
            }
        }
    }

    /// Poll until `shutdown` flips to true or ingestion halts.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            match self.catch_up().await {
                Ok(_) => {}
                Err(err @ (AggregateError::Ordering { .. } | AggregateError::Halted { .. })) => {
                    return Err(err)
                }
                Err(err) => {
                    tracing::warn!(error = %err, "ingestion pass failed, will retry");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn is_redelivery(&self, key: &EventKey) -> Result<bool> {
        if self.window.contains(key) {
            return Ok(true);
        }
        let older_than_window = self
            .window
            .first()
            .map_or(true, |oldest| key < oldest);
        if older_than_window {
            return Ok(self.aggregator.store().is_applied(key).await?);
        }
        Ok(false)
    }

    fn advance(&mut self, key: EventKey) {
        self.high_water = Some(key);
        self.window.insert(key);
        while self.window.len() > self.config.dedup_window {
            self.window.pop_first();
        }
    }

    fn halt(&mut self, key: EventKey, high_water: EventKey, event: &LedgerEvent) -> AggregateError {
        let reason = format!(
            "{} event at {} is not above high-water mark {} and was never applied",
            event.kind.name(),
            key,
            high_water
        );
        tracing::error!(
            event = %key,
            high_water = %high_water,
            kind = event.kind.name(),
            tx = %event.tx_hash,
            "event ordering anomaly, halting ingestion"
        );
        self.status = IngestorStatus::Halted { key, reason };
        AggregateError::Ordering { key, high_water }
    }
}
