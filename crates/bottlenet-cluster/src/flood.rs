//! The measurement kernel: a saturation-aware flood loop.
//!
//! For each remote, the flood walks a fixed descending ladder of
//! `(payload size, writer count)` steps sized against progressively slower
//! pipes. A step drives many concurrent POSTs at the remote's `/perf` sink
//! and watches for overload: once more than 5% of its requests blow the
//! latency budget the step is abandoned and the next, gentler rung is
//! tried. The first step that completes cleanly yields the sample set.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bottlenet_core::{compute_perf, PerfSample};
use bytes::Bytes;
use reqwest::header;
use tokio::sync::mpsc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ClusterError, ClusterResult};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Response header carrying the sink's verdict on the body it absorbed.
pub const FINAL_STATUS_HEADER: &str = "FinalStatus";

/// Sink verdict for a completely received payload.
pub const SINK_SUCCESS: &str = "Success";

/// Hard per-request deadline for a flood writer.
const WRITER_DEADLINE: Duration = Duration::from_secs(10);

/// Chunk size the payload is streamed in; every emitted chunk is added to
/// the process-wide transfer counter.
const PROGRESS_CHUNK: usize = 256 * 1024;

/// Requests issued per configured writer, enough samples per step to
/// approximate a normal distribution.
const SAMPLES_PER_THREAD: usize = 10;

/// Fraction of a step's samples allowed to be slow: 1/20th, i.e. 5%.
const SLOW_SAMPLE_DIVISOR: usize = 20;

/// One rung of the descending saturation ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloodStep {
    /// Bytes carried by each request
    pub payload_bytes: u64,
    /// Concurrent writers admitted at once
    pub threads: u32,
}

/// The ladder a flood walks, fastest pipe first.
#[derive(Debug, Clone)]
pub struct FloodProfile {
    /// Steps in descending order of targeted pipe capacity
    pub steps: Vec<FloodStep>,
}

impl Default for FloodProfile {
    fn default() -> Self {
        // 100 Gbit -> 256 MiB * 50 threads
        // 40 Gbit  -> 256 MiB * 20 threads
        // 25 Gbit  -> 128 MiB * 25 threads
        // 10 Gbit  -> 128 MiB * 10 threads
        // 1 Gbit   -> 64  MiB * 2  threads
        Self {
            steps: vec![
                FloodStep {
                    payload_bytes: 256 * MIB,
                    threads: 50,
                },
                FloodStep {
                    payload_bytes: 256 * MIB,
                    threads: 20,
                },
                FloodStep {
                    payload_bytes: 128 * MIB,
                    threads: 25,
                },
                FloodStep {
                    payload_bytes: 128 * MIB,
                    threads: 10,
                },
                FloodStep {
                    payload_bytes: 64 * MIB,
                    threads: 2,
                },
            ],
        }
    }
}

/// Process-wide count of bytes pushed toward remote sinks.
///
/// Writers snapshot it around each request; the delta over the request's
/// lifetime measures pipe utilisation during the attempt rather than the
/// bytes any single stream contributed.
#[derive(Debug, Default)]
pub struct TransferCounter(AtomicU64);

impl TransferCounter {
    /// Record `n` more bytes handed to the transport.
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Current total.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Latency budget for one request of a step.
///
/// Each ladder rung is sized so that all writers together saturate the
/// targeted pipe in about a second; with a normal latency distribution
/// around that mean, at most 5% of requests should take longer than two
/// seconds. Below the 10 Gbit tier the budget is unbounded and only the
/// writer deadline applies.
fn max_latency_for(payload_bytes: u64, threads: u32) -> f64 {
    const GBIT10_BYTES_PER_SEC: f64 = 1.25 * GIB as f64;
    let step_bytes = (payload_bytes * u64::from(threads)) as f64;
    if step_bytes >= GBIT10_BYTES_PER_SEC {
        2.0
    } else {
        f64::INFINITY
    }
}

/// State shared by every writer of one flood step.
#[derive(Debug)]
struct StepShared {
    client: reqwest::Client,
    remote: String,
    url: String,
    payload: Bytes,
    transferred: Arc<TransferCounter>,
    inner: CancellationToken,
    err_tx: mpsc::Sender<ClusterError>,
    max_latency: f64,
    slow_samples: AtomicU32,
    max_slow_samples: u32,
    overloaded: AtomicBool,
}

impl StepShared {
    /// Count a slow sample; the overload signal fires exactly once, when
    /// the count reaches the 5% budget.
    fn record_slow_sample(&self) {
        let seen = self.slow_samples.fetch_add(1, Ordering::SeqCst) + 1;
        if seen >= self.max_slow_samples && !self.overloaded.swap(true, Ordering::SeqCst) {
            let _ = self.err_tx.try_send(ClusterError::NetworkOverloaded);
            self.inner.cancel();
        }
    }

    fn report(&self, err: ClusterError) {
        let _ = self.err_tx.try_send(err);
    }
}

/// Stream of payload chunks that feeds the process-wide transfer counter
/// as each chunk is handed to the transport.
fn progress_stream(
    payload: Bytes,
    transferred: Arc<TransferCounter>,
) -> impl futures_util::Stream<Item = Result<Bytes, std::convert::Infallible>> {
    let total = payload.len();
    futures_util::stream::unfold(0usize, move |offset| {
        let payload = payload.clone();
        let transferred = Arc::clone(&transferred);
        async move {
            if offset >= total {
                return None;
            }
            let end = usize::min(offset + PROGRESS_CHUNK, total);
            let chunk = payload.slice(offset..end);
            transferred.add(chunk.len() as u64);
            Some((Ok(chunk), end))
        }
    })
}

/// Request body over [`progress_stream`].
fn progress_body(payload: Bytes, transferred: Arc<TransferCounter>) -> reqwest::Body {
    reqwest::Body::wrap_stream(progress_stream(payload, transferred))
}

async fn drain_response(mut response: reqwest::Response) -> Result<(), reqwest::Error> {
    while response.chunk().await?.is_some() {}
    Ok(())
}

/// One concurrent POST against the sink.
///
/// Returns the `(latency, throughput)` sample on success; slow samples and
/// transport failures are reported through the shared step state instead.
async fn run_writer(shared: Arc<StepShared>, permit: OwnedSemaphorePermit) -> Option<(f64, f64)> {
    let _permit = permit;
    let before = shared.transferred.get();
    let start = Instant::now();

    let request = shared
        .client
        .post(&shared.url)
        .header(header::CONTENT_LENGTH, shared.payload.len() as u64)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .timeout(WRITER_DEADLINE)
        .body(progress_body(
            shared.payload.clone(),
            Arc::clone(&shared.transferred),
        ));

    let response = tokio::select! {
        _ = shared.inner.cancelled() => return None,
        sent = request.send() => sent,
    };
    let response = match response {
        Ok(response) => response,
        Err(err) if err.is_timeout() => {
            shared.record_slow_sample();
            return None;
        }
        Err(err) => {
            shared.report(ClusterError::Transport {
                addr: shared.remote.clone(),
                source: err,
            });
            return None;
        }
    };

    let status_code = response.status();
    let final_status = response
        .headers()
        .get(FINAL_STATUS_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();

    let drained = tokio::select! {
        _ = shared.inner.cancelled() => return None,
        drained = drain_response(response) => drained,
    };
    match drained {
        Ok(()) => {}
        Err(err) if err.is_timeout() => {
            shared.record_slow_sample();
            return None;
        }
        Err(err) => {
            shared.report(ClusterError::Transport {
                addr: shared.remote.clone(),
                source: err,
            });
            return None;
        }
    }

    if !status_code.is_success() || final_status != SINK_SUCCESS {
        let status = if final_status.is_empty() {
            status_code.to_string()
        } else {
            final_status
        };
        shared.report(ClusterError::SinkStatus {
            addr: shared.remote.clone(),
            status,
        });
        return None;
    }

    let after = shared.transferred.get();
    let latency = start.elapsed().as_secs_f64();
    if latency > shared.max_latency {
        shared.record_slow_sample();
    }

    // global progress during the attempt, not this writer's bytes alone
    let throughput = (after - before) as f64 / latency;
    Some((latency, throughput))
}

/// Drives saturating writes against remote perf sinks.
#[derive(Debug, Clone)]
pub struct Flooder {
    client: reqwest::Client,
    profile: FloodProfile,
    transferred: Arc<TransferCounter>,
}

impl Flooder {
    /// A flooder using the given client and step ladder.
    pub fn new(client: reqwest::Client, profile: FloodProfile) -> Self {
        Self {
            client,
            profile,
            transferred: Arc::new(TransferCounter::default()),
        }
    }

    /// Measure the edge toward `remote`, downgrading through the ladder
    /// until a step completes without saturating the network.
    pub async fn flood(&self, round: &CancellationToken, remote: &str) -> ClusterResult<PerfSample> {
        let mut last = Err(ClusterError::Internal("empty flood profile".into()));
        for (idx, step) in self.profile.steps.iter().enumerate() {
            match self.do_flood(round, remote, *step).await {
                Ok(sample) => return Ok(sample),
                Err(err) => {
                    if round.is_cancelled() {
                        return Err(ClusterError::Cancelled);
                    }
                    if err.downgrades_step() {
                        debug!(remote, step = idx, error = %err, "step saturated, downgrading");
                        last = Err(err);
                        continue;
                    }
                    return Err(err);
                }
            }
        }
        last
    }

    /// Run one ladder step: up to `10 x threads` POSTs through a bounded
    /// concurrency gate, watching for overload.
    pub async fn do_flood(
        &self,
        outer: &CancellationToken,
        remote: &str,
        step: FloodStep,
    ) -> ClusterResult<PerfSample> {
        let max_samples = step.threads as usize * SAMPLES_PER_THREAD;
        let inner = outer.child_token();
        let semaphore = Arc::new(Semaphore::new(step.threads as usize));
        let (err_tx, mut err_rx) = mpsc::channel::<ClusterError>(step.threads as usize);
        let shared = Arc::new(StepShared {
            client: self.client.clone(),
            remote: remote.to_string(),
            url: format!("http://{remote}/perf"),
            payload: Bytes::from(vec![0u8; step.payload_bytes as usize]),
            transferred: Arc::clone(&self.transferred),
            inner: inner.clone(),
            err_tx,
            max_latency: max_latency_for(step.payload_bytes, step.threads),
            slow_samples: AtomicU32::new(0),
            max_slow_samples: (max_samples / SLOW_SAMPLE_DIVISOR) as u32,
            overloaded: AtomicBool::new(false),
        });

        let mut writers: JoinSet<Option<(f64, f64)>> = JoinSet::new();
        let mut step_error = None;

        for _ in 0..max_samples {
            tokio::select! {
                biased;
                _ = outer.cancelled() => {
                    inner.cancel();
                    writers.shutdown().await;
                    return Err(ClusterError::Cancelled);
                }
                err = err_rx.recv() => {
                    step_error = err;
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    let Ok(permit) = permit else { break };
                    if inner.is_cancelled() {
                        continue;
                    }
                    writers.spawn(run_writer(Arc::clone(&shared), permit));
                }
            }
        }

        // every in-flight writer drains before the sample multiset is reduced
        let mut latencies = Vec::with_capacity(max_samples);
        let mut throughputs = Vec::with_capacity(max_samples);
        while let Some(joined) = writers.join_next().await {
            if let Ok(Some((latency, throughput))) = joined {
                latencies.push(latency);
                throughputs.push(throughput);
            }
        }

        if step_error.is_none() {
            // overload may fire only while the last writers drain
            step_error = err_rx.try_recv().ok();
        }
        if let Some(err) = step_error {
            return Err(err);
        }
        Ok(compute_perf(&latencies, &throughputs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[test]
    fn latency_budget_is_two_seconds_down_to_ten_gbit() {
        // 256 MiB * 50 targets ~100 Gbit
        assert_eq!(max_latency_for(256 * MIB, 50), 2.0);
        assert_eq!(max_latency_for(256 * MIB, 20), 2.0);
        assert_eq!(max_latency_for(128 * MIB, 25), 2.0);
        // 128 MiB * 10 = 1.25 GiB/s, exactly the 10 Gbit boundary
        assert_eq!(max_latency_for(128 * MIB, 10), 2.0);
        // the 1 Gbit rung never trips the latency budget
        assert_eq!(max_latency_for(64 * MIB, 2), f64::INFINITY);
    }

    #[test]
    fn default_ladder_descends() {
        let profile = FloodProfile::default();
        assert_eq!(profile.steps.len(), 5);
        let loads: Vec<u64> = profile
            .steps
            .iter()
            .map(|s| s.payload_bytes * u64::from(s.threads))
            .collect();
        for pair in loads.windows(2) {
            assert!(pair[0] > pair[1], "ladder must descend: {loads:?}");
        }
        assert_eq!(
            profile.steps[4],
            FloodStep {
                payload_bytes: 64 * MIB,
                threads: 2
            }
        );
    }

    #[tokio::test]
    async fn progress_stream_feeds_the_transfer_counter() {
        let transferred = Arc::new(TransferCounter::default());
        let payload = Bytes::from(vec![7u8; 3 * PROGRESS_CHUNK + 123]);
        let total = payload.len() as u64;

        let stream = progress_stream(payload, Arc::clone(&transferred));
        futures_util::pin_mut!(stream);
        let mut streamed = 0u64;
        while let Some(chunk) = stream.next().await {
            streamed += chunk.unwrap().len() as u64;
        }
        assert_eq!(streamed, total);
        assert_eq!(transferred.get(), total);
    }

    fn step_shared(max_samples: usize) -> (Arc<StepShared>, mpsc::Receiver<ClusterError>) {
        let (err_tx, err_rx) = mpsc::channel(8);
        let shared = Arc::new(StepShared {
            client: reqwest::Client::new(),
            remote: "127.0.0.1:1".into(),
            url: "http://127.0.0.1:1/perf".into(),
            payload: Bytes::new(),
            transferred: Arc::new(TransferCounter::default()),
            inner: CancellationToken::new(),
            err_tx,
            max_latency: 2.0,
            slow_samples: AtomicU32::new(0),
            max_slow_samples: (max_samples / SLOW_SAMPLE_DIVISOR) as u32,
            overloaded: AtomicBool::new(false),
        });
        (shared, err_rx)
    }

    #[tokio::test]
    async fn overload_fires_exactly_once_at_five_percent() {
        let (shared, mut err_rx) = step_shared(100); // budget: 5 slow samples
        for _ in 0..4 {
            shared.record_slow_sample();
        }
        assert!(err_rx.try_recv().is_err());
        assert!(!shared.inner.is_cancelled());

        for _ in 0..10 {
            shared.record_slow_sample();
        }
        assert!(matches!(
            err_rx.try_recv(),
            Ok(ClusterError::NetworkOverloaded)
        ));
        assert!(err_rx.try_recv().is_err(), "overload must signal once");
        assert!(shared.inner.is_cancelled());
    }

    #[tokio::test]
    async fn tiny_steps_overload_on_the_first_slow_sample() {
        // 1 writer -> 10 samples -> a zero slow-sample budget
        let (shared, mut err_rx) = step_shared(10);
        shared.record_slow_sample();
        assert!(matches!(
            err_rx.try_recv(),
            Ok(ClusterError::NetworkOverloaded)
        ));
    }
}
