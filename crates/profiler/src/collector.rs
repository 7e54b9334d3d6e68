//! HTTP endpoint receiving per-stage timing and size reports from running
//! jobs.
//!
//! Handlers decode the message and enqueue it; they answer `200 "ok"` before
//! anything is processed. A single worker drains the queue and is the sole
//! writer of the profile store, so no lock is ever exposed.

use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::ProfilingError;
use crate::markov::MarkovModel;
use crate::message::{parse_sizes, parse_times, CollectorMessage, DataParam, TimeMsg};

/// Accumulated observations of one job run.
#[derive(Debug, Default)]
pub struct ProfileStore {
    markov: MarkovModel,
    /// First observed time per `(lineage, partition)`.
    current_times: HashMap<(String, i32), u64>,
    /// Parent set per `(lineage, partition)`.
    parents: HashMap<(String, i32), Vec<(String, i32)>>,
}

impl ProfileStore {
    pub fn new(markov: MarkovModel) -> Self {
        Self {
            markov,
            ..Default::default()
        }
    }

    /// Fold one decoded message into the store.
    pub fn fold(&mut self, msg: CollectorMessage) {
        match msg {
            CollectorMessage::Time(time) => self.fold_time(time),
            CollectorMessage::Sizes(sizes) => {
                for (lineage, bytes) in sizes {
                    self.markov.update_size(&lineage, bytes);
                }
            }
        }
    }

    fn fold_time(&mut self, msg: TimeMsg) {
        let key = (msg.lineage.clone(), msg.partition);
        if self.current_times.contains_key(&key) {
            // First write wins.
            warn!(
                "duplicate timing for {} partition {}, discarding",
                msg.lineage, msg.partition
            );
            return;
        }
        let mut parent_keys = Vec::new();
        for parent in &msg.parents {
            for &pid in &parent.partitions {
                parent_keys.push((parent.lineage.clone(), pid));
            }
        }
        self.current_times.insert(key.clone(), msg.time_ms);
        self.parents.insert(key, parent_keys);
    }

    /// Attribute effective durations and fold them into the Markov model.
    ///
    /// An operator's duration on a partition is its reported time minus the
    /// latest of its parents' times (barrier semantics). Entries whose
    /// parents never reported are logged and skipped.
    pub fn collect(mut self) -> MarkovModel {
        if self
            .current_times
            .keys()
            .any(|(lineage, _)| lineage == crate::markov::START_NODE)
        {
            self.markov.bootstrap();
        }
        for ((lineage, partition), &time) in &self.current_times {
            let declared = &self.parents[&(lineage.clone(), *partition)];
            let mut parent_times = Vec::with_capacity(declared.len());
            let mut missing = false;
            for parent_key in declared {
                match self.current_times.get(parent_key) {
                    Some(&t) => parent_times.push(t),
                    None => {
                        warn!(
                            "{}",
                            ProfilingError::MissingParent(parent_key.0.clone(), parent_key.1)
                        );
                        missing = true;
                    }
                }
            }
            if missing {
                continue;
            }
            let barrier = parent_times.iter().max().copied().unwrap_or(0);
            let duration = time.saturating_sub(barrier);
            debug!(
                "attributing {} ms to {} (partition {})",
                duration, lineage, partition
            );
            self.markov.update_cost(lineage, duration);
        }
        self.markov
    }
}

/// A profiling collector bound to a port.
pub struct Collector;

/// Handle to a running collector; `stop` drains and returns the model.
pub struct RunningCollector {
    shutdown_tx: oneshot::Sender<()>,
    thread: thread::JoinHandle<Result<ProfileStore, ProfilingError>>,
    addr: SocketAddr,
}

impl Collector {
    /// Start serving on `127.0.0.1:port` (0 picks a free port), seeding the
    /// worker with the given model.
    pub fn start(port: u16, markov: MarkovModel) -> Result<RunningCollector, ProfilingError> {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let thread = thread::spawn(move || run_server(port, markov, shutdown_rx, ready_tx));
        let addr = ready_rx
            .recv()
            .map_err(|_| ProfilingError::Collector("collector thread died on startup".into()))?
            .map_err(ProfilingError::Collector)?;
        Ok(RunningCollector {
            shutdown_tx,
            thread,
            addr,
        })
    }
}

impl RunningCollector {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Allow in-flight messages to drain, stop the server, and return the
    /// model with all observed durations attributed.
    pub fn stop(self, quiescence: Duration) -> Result<MarkovModel, ProfilingError> {
        thread::sleep(quiescence);
        let _ = self.shutdown_tx.send(());
        let store = self
            .thread
            .join()
            .map_err(|_| ProfilingError::Collector("collector thread panicked".into()))??;
        Ok(store.collect())
    }
}

fn run_server(
    port: u16,
    markov: MarkovModel,
    shutdown_rx: oneshot::Receiver<()>,
    ready_tx: std::sync::mpsc::Sender<Result<SocketAddr, String>>,
) -> Result<ProfileStore, ProfilingError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let times_tx = tx.clone();
        let sizes_tx = tx;
        let app = Router::new()
            .route(
                "/times",
                get(move |query: Query<DataParam>| times_handler(query, times_tx.clone())),
            )
            .route(
                "/sizes",
                get(move |query: Query<DataParam>| sizes_handler(query, sizes_tx.clone())),
            );

        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let server = match axum::Server::try_bind(&addr) {
            Ok(builder) => builder.serve(app.into_make_service()),
            Err(err) => {
                let _ = ready_tx.send(Err(err.to_string()));
                return Err(ProfilingError::Collector(err.to_string()));
            }
        };
        let _ = ready_tx.send(Ok(server.local_addr()));

        let worker = tokio::spawn(async move {
            let mut store = ProfileStore::new(markov);
            while let Some(msg) = rx.recv().await {
                store.fold(msg);
            }
            store
        });

        server
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .map_err(|err| ProfilingError::Collector(err.to_string()))?;

        // The handlers (and their senders) are gone; the worker drains the
        // rest of the queue and hands the store back.
        worker
            .await
            .map_err(|err| ProfilingError::Collector(err.to_string()))
    })
}

// Axum requires async handlers even though these never await.
#[allow(clippy::unused_async)]
async fn times_handler(
    Query(DataParam { data }): Query<DataParam>,
    tx: mpsc::UnboundedSender<CollectorMessage>,
) -> impl IntoResponse {
    match parse_times(&data) {
        Ok(msg) => {
            let _ = tx.send(CollectorMessage::Time(msg));
            (StatusCode::OK, "ok")
        }
        Err(err) => {
            warn!("{}", err);
            (StatusCode::BAD_REQUEST, "malformed message")
        }
    }
}

#[allow(clippy::unused_async)]
async fn sizes_handler(
    Query(DataParam { data }): Query<DataParam>,
    tx: mpsc::UnboundedSender<CollectorMessage>,
) -> impl IntoResponse {
    match parse_sizes(&data) {
        Ok(sizes) => {
            let _ = tx.send(CollectorMessage::Sizes(sizes));
            (StatusCode::OK, "ok")
        }
        Err(err) => {
            warn!("{}", err);
            (StatusCode::BAD_REQUEST, "malformed message")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markov::START_NODE;
    use common::{CostStrategy, ProbStrategy};

    #[test]
    fn attribution_subtracts_latest_parent() {
        let mut store = ProfileStore::new(MarkovModel::new());
        store.fold(CollectorMessage::Time(
            parse_times("start;-1;;200").unwrap(),
        ));
        store.fold(CollectorMessage::Time(
            parse_times("L;0;start,-1#;1000").unwrap(),
        ));
        let markov = store.collect();
        assert_eq!(markov.node("L").unwrap().cost().avg(), 800.0);
    }

    #[test]
    fn latest_parent_wins_across_partitions() {
        let mut store = ProfileStore::new(MarkovModel::new());
        store.fold(CollectorMessage::Time(parse_times("p;0;;100").unwrap()));
        store.fold(CollectorMessage::Time(parse_times("p;1;;400").unwrap()));
        store.fold(CollectorMessage::Time(
            parse_times("child;0;p,0,1#;1000").unwrap(),
        ));
        let markov = store.collect();
        assert_eq!(markov.node("child").unwrap().cost().avg(), 600.0);
    }

    #[test]
    fn duplicate_times_are_discarded() {
        let mut store = ProfileStore::new(MarkovModel::new());
        store.fold(CollectorMessage::Time(parse_times("L;0;;100").unwrap()));
        store.fold(CollectorMessage::Time(parse_times("L;0;;999").unwrap()));
        let markov = store.collect();
        assert_eq!(markov.node("L").unwrap().cost().avg(), 100.0);
    }

    #[test]
    fn missing_parent_is_skipped_not_fatal() {
        let mut store = ProfileStore::new(MarkovModel::new());
        store.fold(CollectorMessage::Time(
            parse_times("L;0;ghost,3#;1000").unwrap(),
        ));
        let markov = store.collect();
        assert!(markov.node("L").is_none());
    }

    #[test]
    fn sizes_fold_into_model() {
        let mut store = ProfileStore::new(MarkovModel::new());
        store.fold(CollectorMessage::Sizes(
            parse_sizes("a:100;b:200").unwrap(),
        ));
        let markov = store.collect();
        assert_eq!(markov.output_bytes("a"), Some(100));
        assert_eq!(markov.output_bytes("b"), Some(200));
    }

    #[test]
    fn start_and_stop_roundtrip() {
        let mut seed = MarkovModel::new();
        seed.start_run();
        let running = Collector::start(0, seed).unwrap();
        assert_ne!(running.addr().port(), 0);
        let model = running.stop(Duration::ZERO).unwrap();
        assert_eq!(model.total_runs(), 1);
    }

    #[test]
    fn bootstrap_edge_preserves_run_invariant() {
        let mut store = ProfileStore::new(MarkovModel::new());
        store.fold(CollectorMessage::Time(
            parse_times("start;-1;;200").unwrap(),
        ));
        let markov = store.collect();
        // The context edge exists, but start's visit count still tracks runs.
        assert_eq!(markov.node(START_NODE).unwrap().visits(), 0);
        assert!(markov
            .total_cost(START_NODE, ProbStrategy::Max, CostStrategy::Max)
            .is_some());
    }
}
