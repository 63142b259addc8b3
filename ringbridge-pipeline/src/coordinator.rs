use std::sync::Arc;
use std::time::Duration;

use ringbridge_protocol::{Packet, ProtocolError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{PipelineError, Result};
use crate::metrics::{MetricsMap, StreamObservables};
use crate::queue::PacketQueue;
use crate::sink::{DataLinkOptions, DataLinkSink};
use crate::source::{PacketCallback, SeedLinkOptions, SeedLinkSource, wait_or_cancelled};

/// Pause between ingress polls when no packet is waiting.
const FAN_OUT_IDLE_SLEEP: Duration = Duration::from_millis(25);
/// Health-check cadence of the main loop.
const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct PipelineOptions {
    /// Capacity of the ingress queue between source and fan-out.
    pub import_queue_size: usize,
    /// Whether the fan-out task keeps per-stream metrics current.
    pub export_metrics: bool,
    /// Minimum spacing between metric snapshots.
    pub metrics_interval: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            import_queue_size: 8192,
            export_metrics: false,
            metrics_interval: Duration::from_secs(60),
        }
    }
}

/// Owns the ingress queue, the SEEDLink source, every DataLink sink, and
/// the fan-out task between them.
pub struct Pipeline {
    options: PipelineOptions,
    ingress: Arc<PacketQueue>,
    source: SeedLinkSource,
    sinks: Vec<Arc<DataLinkSink>>,
    registry: Arc<StreamObservables>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        options: PipelineOptions,
        source_options: SeedLinkOptions,
        sink_options: Vec<DataLinkOptions>,
    ) -> Result<Self> {
        if sink_options.is_empty() {
            return Err(
                ProtocolError::InvalidArgument("at least one DataLink sink is required".into())
                    .into(),
            );
        }

        let ingress = Arc::new(PacketQueue::new(options.import_queue_size));
        let sinks = sink_options
            .into_iter()
            .map(|sink_options| DataLinkSink::new(sink_options).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        let ingress_for_callback = Arc::clone(&ingress);
        let callback: PacketCallback = Arc::new(move |packet: Packet| {
            ingress_for_callback.push(packet);
            Ok(())
        });
        let source = SeedLinkSource::new(callback, source_options)?;

        Ok(Self {
            options,
            ingress,
            source,
            sinks,
            registry: Arc::new(StreamObservables::new()),
            cancel: CancellationToken::new(),
        })
    }

    /// The observable registry snapshots are pushed into.
    pub fn registry(&self) -> Arc<StreamObservables> {
        Arc::clone(&self.registry)
    }

    pub fn sinks(&self) -> &[Arc<DataLinkSink>] {
        &self.sinks
    }

    pub fn ingress_failed_to_enqueue(&self) -> u64 {
        self.ingress.failed_to_enqueue()
    }

    /// Request cooperative termination; idempotent, safe from any task.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// A token that stops the pipeline when cancelled; the signal bridge
    /// hooks into this.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start everything and supervise until a stop request or a fatal task
    /// error. Returns the first fatal error, after tearing everything down
    /// in reverse dependency order.
    pub async fn run(&mut self) -> Result<()> {
        info!(sinks = self.sinks.len(), "starting pipeline");

        let fan_out_cancel = CancellationToken::new();
        let mut fan_out_handle = Some(tokio::spawn(fan_out(
            Arc::clone(&self.ingress),
            self.sinks.clone(),
            Arc::clone(&self.registry),
            self.options.clone(),
            fan_out_cancel.clone(),
        )));
        let mut sink_handles: Vec<(String, Option<JoinHandle<Result<()>>>)> = self
            .sinks
            .iter()
            .map(|sink| (format!("DataLink sink {}", sink.name()), Some(sink.start())))
            .collect();
        let mut source_handle = Some(self.source.start()?);

        let run_error = loop {
            if self.cancel.is_cancelled() {
                break None;
            }
            if let Some(error) = poll_task(&mut source_handle, "SEEDLink import").await {
                break Some(error);
            }
            if let Some(error) = poll_task(&mut fan_out_handle, "fan-out").await {
                break Some(error);
            }
            let mut sink_error = None;
            for (name, handle) in &mut sink_handles {
                if let Some(error) = poll_task(handle, name).await {
                    sink_error = Some(error);
                    break;
                }
            }
            if let Some(error) = sink_error {
                break Some(error);
            }
            if wait_or_cancelled(&self.cancel, HEALTH_POLL_INTERVAL).await {
                break None;
            }
        };
        if let Some(error) = &run_error {
            error!(%error, "fatal pipeline error, shutting down");
        }

        // Reverse dependency order: fan-out first, then sinks, then the
        // source (which persists its state file on the way out).
        self.cancel.cancel();
        fan_out_cancel.cancel();
        join_task(&mut fan_out_handle, "fan-out").await;
        for sink in &self.sinks {
            sink.stop();
        }
        for (name, handle) in &mut sink_handles {
            join_task(handle, name).await;
        }
        self.source.stop();
        join_task(&mut source_handle, "SEEDLink import").await;
        info!("pipeline stopped");

        match run_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Reap a finished task; `Some` carries the fatal error to propagate.
async fn poll_task(
    slot: &mut Option<JoinHandle<Result<()>>>,
    name: &str,
) -> Option<PipelineError> {
    if !slot.as_ref().is_some_and(JoinHandle::is_finished) {
        return None;
    }
    let handle = slot.take().expect("checked above");
    match handle.await {
        Ok(Ok(())) => Some(PipelineError::Fatal(format!("{name} task ended prematurely"))),
        Ok(Err(error)) => Some(PipelineError::Fatal(format!("{name}: {error}"))),
        Err(join_error) => Some(PipelineError::Fatal(format!("{name} panicked: {join_error}"))),
    }
}

async fn join_task(slot: &mut Option<JoinHandle<Result<()>>>, name: &str) {
    if let Some(handle) = slot.take() {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(task = name, %error, "task exited with error"),
            Err(join_error) => warn!(task = name, %join_error, "task panicked"),
        }
    }
}

/// The fan-out task: metrics first, then one ingress packet to every sink.
/// The last sink receives the packet by move, earlier ones by copy.
async fn fan_out(
    ingress: Arc<PacketQueue>,
    sinks: Vec<Arc<DataLinkSink>>,
    registry: Arc<StreamObservables>,
    options: PipelineOptions,
    cancel: CancellationToken,
) -> Result<()> {
    debug!("entering fan-out loop");
    let mut metrics = MetricsMap::new(registry, options.metrics_interval);

    while !cancel.is_cancelled() {
        if options.export_metrics {
            metrics.tabulate_and_reset_all();
        }
        match ingress.pop() {
            Some(packet) => {
                if options.export_metrics
                    && let Err(error) = metrics.update(&packet)
                {
                    warn!(%error, "failed to update metrics for packet");
                }
                let (last, rest) = match sinks.split_last() {
                    Some(split) => split,
                    None => continue,
                };
                for sink in rest {
                    sink.enqueue(packet.clone());
                }
                last.enqueue(packet);
            }
            None => {
                if wait_or_cancelled(&cancel, FAN_OUT_IDLE_SLEEP).await {
                    break;
                }
            }
        }
    }
    debug!("leaving fan-out loop");
    Ok(())
}
