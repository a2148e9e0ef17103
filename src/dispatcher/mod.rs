//! The scan loop: watch-set construction, log dispatch, and checkpoint advancement.
//!
//! A single logical cycle drives all state transitions; no two cycles ever run
//! concurrently. Within a cycle the only suspension points are chain queries, sink
//! deliveries, and the final checkpoint save. The in-memory checkpoint is committed
//! strictly after the durable save succeeds, so cancellation at any await point
//! leaves the previous checkpoint intact and the cycle re-runnable.

mod sink;

pub use sink::{NotificationSink, SinkError};

use std::{sync::Arc, time::Duration};

use alloy::primitives::Address;
use tracing::{debug, error, info, warn};

use crate::{
    chain::ChainSource,
    checkpoint::{Checkpoint, CheckpointStore, DEFAULT_WINDOW},
    config::{SpecKind, WatchConfig},
    decoder::{self, DecodeError},
    error::{ConfigError, WatchError},
    registry::{ContractRegistry, InstanceResolver},
    reorg::ReorgGuard,
    scanner::{DEFAULT_MAX_BLOCK_RANGE, LogScanner, WatchSet},
    types::EventKey,
};

/// Default confirmation depth subtracted from the chain head before scanning, so
/// freshly mined blocks likely to be reorganized are not dispatched yet.
pub const DEFAULT_CONFIRMATIONS: u64 = 12;

/// A handler invocation that failed during a cycle, kept for operator replay.
#[derive(Debug)]
pub struct HandlerFailure {
    pub key: EventKey,
    pub handler: String,
    pub error: SinkError,
}

/// Outcome of one scan cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// First block of the scanned range.
    pub from: u64,
    /// Last block of the scanned range (the new checkpoint on success).
    pub to: u64,
    /// Events delivered to their handlers.
    pub dispatched: usize,
    /// Events skipped because their key was already in the dedupe window.
    pub duplicates: usize,
    /// Logs skipped due to decode mismatch or ABI drift.
    pub decode_skips: usize,
    /// Per-event handler failures (isolated, did not stop the cycle).
    pub failures: Vec<HandlerFailure>,
    /// Common ancestor the checkpoint was rolled back to, if a reorg was detected.
    pub reorged_to: Option<u64>,
}

impl CycleReport {
    /// Whether the cycle had no confirmed blocks to scan.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.to < self.from
    }
}

/// Builder for [`Watcher`].
pub struct WatcherBuilder {
    config: WatchConfig,
    storage: Address,
    overrides: Vec<(String, Address)>,
    confirmations: u64,
    max_block_range: u64,
    window: u64,
    start_block: u64,
}

impl WatcherBuilder {
    /// Starts a builder from the watch config and the storage contract address that
    /// roots contract name resolution.
    #[must_use]
    pub fn new(config: WatchConfig, storage: Address) -> Self {
        Self {
            config,
            storage,
            overrides: Vec::new(),
            confirmations: DEFAULT_CONFIRMATIONS,
            max_block_range: DEFAULT_MAX_BLOCK_RANGE,
            window: DEFAULT_WINDOW,
            start_block: 0,
        }
    }

    /// Sets the confirmation depth subtracted from the chain head each cycle.
    #[must_use]
    pub fn confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = confirmations;
        self
    }

    /// Sets the maximum number of blocks per log query chunk (minimum 1).
    #[must_use]
    pub fn max_block_range(mut self, max_block_range: u64) -> Self {
        self.max_block_range = max_block_range;
        self
    }

    /// Sets the trailing window, in blocks, for dedupe keys and retained tip hashes.
    #[must_use]
    pub fn window(mut self, window: u64) -> Self {
        self.window = window;
        self
    }

    /// Sets the first block to scan on a fresh start (ignored when a persisted
    /// checkpoint exists).
    #[must_use]
    pub fn start_block(mut self, start_block: u64) -> Self {
        self.start_block = start_block;
        self
    }

    /// Seeds a manual address override for a contract name.
    #[must_use]
    pub fn override_address(mut self, name: impl Into<String>, address: Address) -> Self {
        self.overrides.push((name.into(), address));
        self
    }

    /// Validates the configuration against the sink, loads the persisted checkpoint,
    /// and assembles the watcher.
    ///
    /// # Errors
    ///
    /// [`WatchError::Config`] if any configured handler is unknown to the sink (fail
    /// fast, before the first cycle); [`WatchError::Store`] if the checkpoint cannot
    /// be loaded.
    pub async fn connect<S: NotificationSink>(
        self,
        chain: Arc<dyn ChainSource>,
        store: Box<dyn CheckpointStore>,
        sink: S,
    ) -> Result<Watcher<S>, WatchError> {
        for spec in self.config.specs() {
            if !sink.supports(&spec.handler) {
                return Err(ConfigError::UnknownHandler {
                    contract: spec.contract.clone(),
                    event: spec.event.clone(),
                    handler: spec.handler.clone(),
                }
                .into());
            }
        }

        let checkpoint = match store.load().await? {
            Some(checkpoint) => {
                info!(block = checkpoint.block, "resuming from persisted checkpoint");
                checkpoint
            }
            None => Checkpoint::at(self.start_block.saturating_sub(1)),
        };

        let mut registry = ContractRegistry::new(Arc::clone(&chain), self.storage);
        for (name, address) in self.overrides {
            registry = registry.with_override(name, address);
        }
        let resolver = InstanceResolver::new(&self.config.directories());

        Ok(Watcher {
            scanner: LogScanner::new(Arc::clone(&chain), self.max_block_range),
            guard: ReorgGuard::new(Arc::clone(&chain)),
            chain,
            config: self.config,
            registry,
            resolver,
            store,
            sink,
            checkpoint,
            confirmations: self.confirmations,
            window: self.window,
        })
    }
}

/// The event-watching and dispatch core.
///
/// Owns every collaborator and the checkpoint; see the module docs for the
/// concurrency and cancellation discipline.
pub struct Watcher<S: NotificationSink> {
    chain: Arc<dyn ChainSource>,
    config: WatchConfig,
    registry: ContractRegistry,
    resolver: InstanceResolver,
    scanner: LogScanner,
    guard: ReorgGuard,
    store: Box<dyn CheckpointStore>,
    sink: S,
    checkpoint: Checkpoint,
    confirmations: u64,
    window: u64,
}

impl<S: NotificationSink> Watcher<S> {
    /// The last fully-processed block.
    #[must_use]
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Runs scan cycles forever, pausing `interval` between cycles.
    ///
    /// Cycle-local failures are logged and retried on the next cycle; nothing here
    /// terminates the loop. Cancel by dropping the future; safe at any await point.
    pub async fn run(&mut self, interval: Duration) {
        loop {
            match self.run_cycle().await {
                Ok(report) if report.is_idle() => {
                    debug!(block = self.checkpoint.block, "no new confirmed blocks");
                }
                Ok(report) => {
                    info!(
                        from = report.from,
                        to = report.to,
                        dispatched = report.dispatched,
                        failures = report.failures.len(),
                        "cycle complete"
                    );
                }
                Err(err) => {
                    error!(error = %err, "cycle failed, state unchanged, retrying next cycle");
                }
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Executes exactly one scan cycle.
    ///
    /// Reorg check, confirmed-range computation, instance refresh, watch-set
    /// construction, chunked fetch, in-order dispatch, checkpoint advance. Any error
    /// leaves the block marker where it was, so the next cycle retries the same
    /// range; dedupe keys of events already delivered are kept in memory so the
    /// retry does not deliver them twice.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, WatchError> {
        // work on a copy; the in-memory checkpoint moves only after a durable save
        let mut checkpoint = self.checkpoint.clone();

        let reorged_to = self.guard.check(&mut checkpoint).await?;
        if reorged_to.is_some() {
            self.store.save(&checkpoint).await?;
            self.checkpoint = checkpoint.clone();
        }

        let head = self.chain.block_number().await?;
        let to = head.saturating_sub(self.confirmations);
        let from = checkpoint.block + 1;
        let mut report = CycleReport { from, to, reorged_to, ..CycleReport::default() };
        if to < from {
            return Ok(report);
        }

        // instance discovery must precede the range query, so an instance created
        // mid-range is already part of the watch-set that scans it
        self.resolver.refresh(&mut self.registry).await;
        let watch = self.build_watch_set().await?;

        // observe the tip hash before fetching logs: if the chain reorganizes after
        // the fetch, the retained hash still describes the branch the logs came from
        // and the next cycle's guard rolls the range back
        let tip_hash = self.chain.block_hash(to).await?;

        // an empty watch-set must not turn into an unconstrained eth_getLogs filter
        let logs = if watch.is_empty() {
            Vec::new()
        } else {
            self.scanner.fetch(&watch, from, to).await?
        };

        let committed = match self.dispatch_logs(&watch, &logs, Some(&mut checkpoint), &mut report).await
        {
            Ok(()) => {
                checkpoint.advance(to, tip_hash, self.window);
                self.store.save(&checkpoint).await.map_err(WatchError::from)
            }
            Err(err) => Err(err),
        };

        match committed {
            Ok(()) => {
                self.checkpoint = checkpoint;
                Ok(report)
            }
            Err(err) => {
                // the block marker stays put, but events already delivered keep their
                // dedupe keys so the retry cycle does not deliver them again
                self.checkpoint.recent_events.extend(checkpoint.recent_events.iter().copied());
                Err(err)
            }
        }
    }

    /// Re-scans `from..=to` and re-delivers every matching event, ignoring the dedupe
    /// window and leaving the checkpoint untouched.
    ///
    /// This is the operator recovery tool paired with the advance-and-replay failure
    /// policy: a cycle records handler failures but still advances, and `replay`
    /// re-drives the affected range on demand.
    pub async fn replay(&mut self, from: u64, to: u64) -> Result<CycleReport, WatchError> {
        info!(from, to, "replaying block range");
        self.resolver.refresh(&mut self.registry).await;
        let watch = self.build_watch_set().await?;
        let logs = if watch.is_empty() {
            Vec::new()
        } else {
            self.scanner.fetch(&watch, from, to).await?
        };

        let mut report = CycleReport { from, to, ..CycleReport::default() };
        self.dispatch_logs(&watch, &logs, None, &mut report).await?;
        Ok(report)
    }

    /// Materializes the watch-target set from the registry and the instance resolver.
    async fn build_watch_set(&mut self) -> Result<WatchSet, WatchError> {
        let mut watch = WatchSet::default();
        for (index, spec) in self.config.specs().iter().enumerate() {
            let deployment = self.registry.resolve(&spec.contract).await?;
            let Some(event) = deployment.abi.events().find(|event| event.name == spec.event)
            else {
                return Err(WatchError::StaleDeployment {
                    name: spec.contract.clone(),
                    reason: format!("event `{}` not present in ABI", spec.event),
                });
            };
            let topic0 = event.selector();

            match spec.kind {
                SpecKind::Direct => watch.insert(deployment.address, topic0, index),
                SpecKind::Global => {
                    for &address in self.resolver.current(&spec.contract) {
                        watch.insert(address, topic0, index);
                    }
                }
            }
        }
        Ok(watch)
    }

    /// Dispatches `logs` in canonical order. With a checkpoint, duplicate keys are
    /// skipped and dispatched keys recorded; without one (replay), every match is
    /// delivered.
    async fn dispatch_logs(
        &mut self,
        watch: &WatchSet,
        logs: &[alloy::rpc::types::Log],
        mut checkpoint: Option<&mut Checkpoint>,
        report: &mut CycleReport,
    ) -> Result<(), WatchError> {
        for log in logs {
            let Some(spec_index) = watch.route(log) else {
                continue; // unmonitored event
            };
            let Some(key) = EventKey::from_log(log) else {
                continue; // pending log, never dispatched
            };
            if let Some(checkpoint) = checkpoint.as_deref_mut()
                && checkpoint.is_duplicate(key)
            {
                debug!(key = %key, "skipping already-dispatched event");
                report.duplicates += 1;
                continue;
            }

            let spec = self.config.specs()[spec_index].clone();
            let deployment = self.registry.resolve(&spec.contract).await?;

            match decoder::decode(log, &deployment.abi, &spec, key) {
                Ok(event) => {
                    if let Err(error) = self.sink.deliver(&event.handler, &event).await {
                        error!(
                            key = %key,
                            handler = %event.handler,
                            error = %error,
                            "handler failed, continuing with subsequent events"
                        );
                        report.failures.push(HandlerFailure {
                            key,
                            handler: event.handler.clone(),
                            error,
                        });
                    } else {
                        report.dispatched += 1;
                    }
                    // attempted either way; replay is the recovery path for failures
                    if let Some(checkpoint) = checkpoint.as_deref_mut() {
                        checkpoint.record_event(key);
                    }
                    if spec.refreshes_registry {
                        self.registry.flush();
                    }
                }
                Err(err @ DecodeError::Mismatch { .. }) => {
                    warn!(key = %key, error = %err, "skipping undecodable log");
                    report.decode_skips += 1;
                }
                Err(err @ DecodeError::AbiDrift { .. }) => {
                    warn!(key = %key, error = %err, "ABI drift, forcing re-resolution");
                    self.registry.invalidate(&spec.contract);
                    report.decode_skips += 1;
                }
            }
        }
        Ok(())
    }
}
