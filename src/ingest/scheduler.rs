// src/ingest/scheduler.rs
//! Perpetual cycle scheduler.
//!
//! Each cycle walks the city list in order and runs the fetch → publish
//! pipeline for every city as its own task, so a failure or panic in one city
//! never reaches its siblings. Cycles never overlap, which keeps one in-flight
//! reading per city and therefore per-city publish order equal to fetch order.
//!
//! Shutdown is a `watch` flag: no cycle starts after it flips, and pipelines
//! already running get `grace` to finish before they are aborted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge};
use tokio::sync::{mpsc, watch};
use tokio::task::{Id, JoinError, JoinHandle, JoinSet};

use crate::config::CityList;
use crate::ingest::{ensure_metrics_described, run_city, CycleReport, DeliveryOutcome};
use crate::publish::Publisher;
use crate::source::WeatherSource;

/// Exponential pause applied after cycles that delivered nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    min: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }

    /// Back-to-back cycles regardless of failures.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Pause after `idle_streak` consecutive cycles without a delivery.
    pub fn delay(&self, idle_streak: u32) -> Duration {
        if idle_streak == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(idle_streak - 1).unwrap_or(u32::MAX);
        self.min.saturating_mul(factor).min(self.max)
    }
}

#[derive(Debug, Clone)]
pub struct LoopCfg {
    /// Fixed cadence measured from cycle start; `None` runs cycles back-to-back.
    pub interval: Option<Duration>,
    /// Run all cities of a cycle at once instead of one after another.
    pub concurrent: bool,
    pub grace: Duration,
    pub backoff: Backoff,
    /// Stop after this many cycles.
    pub max_cycles: Option<u64>,
}

impl Default for LoopCfg {
    fn default() -> Self {
        Self {
            interval: None,
            concurrent: false,
            grace: Duration::from_secs(5),
            backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(30)),
            max_cycles: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub delivered: u64,
    pub fetch_failed: u64,
    pub publish_failed: u64,
    /// Pipelines that panicked or were abandoned at shutdown.
    pub lost: u64,
}

impl RunSummary {
    fn absorb(&mut self, r: &CycleReport) {
        self.delivered += r.delivered() as u64;
        self.fetch_failed += r.fetch_failed() as u64;
        self.publish_failed += r.publish_failed() as u64;
        self.lost += (r.panicked() + r.abandoned.len()) as u64;
    }
}

/// Sender half flips to `true` to request shutdown.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

pub struct IngestLoop {
    cities: CityList,
    source: Arc<dyn WeatherSource>,
    publisher: Publisher,
    cfg: LoopCfg,
    reports: Option<mpsc::UnboundedSender<CycleReport>>,
}

impl IngestLoop {
    pub fn new(
        cities: CityList,
        source: Arc<dyn WeatherSource>,
        publisher: Publisher,
        cfg: LoopCfg,
    ) -> Self {
        Self {
            cities,
            source,
            publisher,
            cfg,
            reports: None,
        }
    }

    /// Forward every finished cycle's report to `tx`.
    pub fn with_reports(mut self, tx: mpsc::UnboundedSender<CycleReport>) -> Self {
        self.reports = Some(tx);
        self
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<RunSummary> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> RunSummary {
        ensure_metrics_described();
        tracing::info!(
            target: "ingest",
            cities = self.cities.len(),
            topic = self.publisher.topic(),
            concurrent = self.cfg.concurrent,
            interval = ?self.cfg.interval,
            "ingest loop started"
        );

        let mut summary = RunSummary::default();
        let mut idle_streak = 0u32;

        loop {
            let stop = *shutdown.borrow();
            if stop || self.reached_max(summary.cycles) {
                break;
            }

            let started = Instant::now();
            summary.cycles += 1;
            let report = self.run_cycle(summary.cycles, &mut shutdown).await;
            summary.absorb(&report);

            counter!("ingest_cycles_total").increment(1);
            gauge!("ingest_last_cycle_ts").set(chrono::Utc::now().timestamp() as f64);
            tracing::info!(
                target: "ingest",
                cycle = report.cycle,
                delivered = report.delivered(),
                fetch_failed = report.fetch_failed(),
                publish_failed = report.publish_failed(),
                panicked = report.panicked(),
                abandoned = report.abandoned.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "cycle finished"
            );

            idle_streak = if report.delivered() == 0 {
                idle_streak.saturating_add(1)
            } else {
                0
            };
            let interrupted = report.interrupted;
            if let Some(tx) = &self.reports {
                let _ = tx.send(report);
            }
            if interrupted || self.reached_max(summary.cycles) {
                break;
            }

            let pause = self.pause_after(started.elapsed(), idle_streak);
            if !pause.is_zero() {
                if idle_streak > 0 {
                    tracing::warn!(
                        target: "ingest",
                        idle_streak,
                        pause_ms = pause.as_millis() as u64,
                        "no deliveries in last cycle, backing off"
                    );
                }
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = wait_for_shutdown(&mut shutdown) => break,
                }
            }
        }

        if let Err(e) = self.publisher.flush(self.cfg.grace).await {
            tracing::warn!(target: "ingest", error = %e, "broker flush on shutdown failed");
        }
        tracing::info!(
            target: "ingest",
            cycles = summary.cycles,
            delivered = summary.delivered,
            "ingest loop stopped"
        );
        summary
    }

    /// One pass over the city list.
    pub async fn run_cycle(&self, cycle: u64, shutdown: &mut watch::Receiver<bool>) -> CycleReport {
        let cities = self.cities.as_slice();
        let width = if self.cfg.concurrent { cities.len() } else { 1 };
        let mut queue = cities.iter().enumerate();
        let mut slots: Vec<Option<DeliveryOutcome>> = cities.iter().map(|_| None).collect();
        let mut tasks: HashMap<Id, usize> = HashMap::new();
        let mut set: JoinSet<(usize, DeliveryOutcome)> = JoinSet::new();
        let mut interrupted = false;

        loop {
            while set.len() < width {
                let Some((idx, city)) = queue.next() else { break };
                let source = Arc::clone(&self.source);
                let publisher = self.publisher.clone();
                let city = city.clone();
                let handle =
                    set.spawn(async move { (idx, run_city(source.as_ref(), &publisher, &city).await) });
                tasks.insert(handle.id(), idx);
            }
            if set.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                joined = set.join_next() => {
                    if let Some(joined) = joined {
                        collect(cycle, cities, &tasks, joined, &mut slots);
                    }
                }
                _ = wait_for_shutdown(shutdown) => {
                    interrupted = true;
                    break;
                }
            }
        }

        let mut abandoned: Vec<String> = Vec::new();
        if interrupted {
            let deadline = tokio::time::Instant::now() + self.cfg.grace;
            loop {
                match tokio::time::timeout_at(deadline, set.join_next()).await {
                    Ok(Some(joined)) => collect(cycle, cities, &tasks, joined, &mut slots),
                    Ok(None) => break,
                    Err(_) => {
                        set.abort_all();
                        // Aborted tasks come back as cancelled; late finishers still count.
                        while let Some(joined) = set.join_next().await {
                            collect(cycle, cities, &tasks, joined, &mut slots);
                        }
                        break;
                    }
                }
            }

            let mut unfinished: Vec<usize> = tasks
                .values()
                .copied()
                .filter(|&idx| slots[idx].is_none())
                .collect();
            unfinished.sort_unstable();
            abandoned = unfinished.into_iter().map(|idx| cities[idx].clone()).collect();
            if !abandoned.is_empty() {
                tracing::warn!(
                    target: "ingest",
                    cycle,
                    cities = ?abandoned,
                    "grace period elapsed, abandoned in-flight cities"
                );
                for city in &abandoned {
                    counter!("ingest_lost_total", "city" => city.clone(), "reason" => "abandoned")
                        .increment(1);
                }
            }
        }

        let outcomes = cities
            .iter()
            .zip(slots)
            .filter_map(|(c, o)| o.map(|o| (c.clone(), o)))
            .collect();
        CycleReport {
            cycle,
            outcomes,
            interrupted,
            abandoned,
        }
    }

    fn reached_max(&self, cycles: u64) -> bool {
        self.cfg.max_cycles.is_some_and(|max| cycles >= max)
    }

    fn pause_after(&self, elapsed: Duration, idle_streak: u32) -> Duration {
        let cadence = self
            .cfg
            .interval
            .map(|i| i.saturating_sub(elapsed))
            .unwrap_or_default();
        cadence.max(self.cfg.backoff.delay(idle_streak))
    }
}

fn collect(
    cycle: u64,
    cities: &[String],
    tasks: &HashMap<Id, usize>,
    joined: Result<(usize, DeliveryOutcome), JoinError>,
    slots: &mut [Option<DeliveryOutcome>],
) {
    let e = match joined {
        Ok((idx, outcome)) => {
            slots[idx] = Some(outcome);
            return;
        }
        Err(e) => e,
    };
    // Cancelled tasks are reported as abandoned by the caller.
    if !e.is_panic() {
        return;
    }
    let Some(&idx) = tasks.get(&e.id()) else {
        tracing::error!(target: "ingest", cycle, error = %e, "untracked city pipeline panicked");
        return;
    };
    let city = &cities[idx];
    let message = panic_message(e);
    tracing::error!(target: "ingest", cycle, city = %city, panic = %message, "city pipeline panicked");
    counter!("ingest_lost_total", "city" => city.clone(), "reason" => "panicked").increment(1);
    slots[idx] = Some(DeliveryOutcome::Panicked(message));
}

fn panic_message(e: JoinError) -> String {
    let payload = e.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Resolves once shutdown is requested. A dropped sender never resolves.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    let signalled = rx.wait_for(|stop| *stop).await.is_ok();
    if !signalled {
        std::future::pending::<()>().await;
    }
}
