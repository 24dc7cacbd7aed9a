//! Runs the forecaster over every partitioned series.
//!
//! Each group is fitted on tokio's blocking pool, gated by a semaphore so at
//! most `workers` fits are within their budget at once. A group that errors,
//! panics or overruns its time budget only affects its own result. Results come
//! back in the order the batches were given, whatever order they finish in.

use std::{any::Any, sync::Arc, time::Duration};

use log::{debug, info, warn};
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    task::{self, JoinError, JoinHandle},
    time,
};

use crate::{
    config::PipelineConfig,
    error::ForecastError,
    forecaster::{ForecastSpec, ForecastWindow, Forecaster, TimeSeries},
    partition::SeriesBatch,
};

#[derive(Debug, Clone, PartialEq)]
pub struct GroupResult {
    /// Group key, `None` for the implicit single series.
    pub group: Option<String>,
    pub outcome: Result<ForecastWindow, ForecastError>,
}

#[derive(Clone)]
pub struct Orchestrator {
    forecaster: Arc<dyn Forecaster>,
    workers: usize,
    group_timeout: Duration,
}

enum Pending {
    Rejected(ForecastError),
    Running(JoinHandle<Result<ForecastWindow, ForecastError>>),
}

impl Orchestrator {
    pub fn new(forecaster: Arc<dyn Forecaster>, workers: usize, group_timeout: Duration) -> Self {
        Self {
            forecaster,
            workers: workers.max(1),
            group_timeout,
        }
    }

    pub fn from_config(forecaster: Arc<dyn Forecaster>, config: &PipelineConfig) -> Self {
        Self::new(forecaster, config.workers, config.group_timeout())
    }

    pub async fn run(&self, batches: Vec<SeriesBatch>) -> Vec<GroupResult> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let pending = batches
            .into_iter()
            .map(|batch| {
                let task = match batch.series {
                    Err(err) => Pending::Rejected(err),
                    Ok(series) => {
                        let semaphore = Arc::clone(&semaphore);
                        let forecaster = Arc::clone(&self.forecaster);
                        let budget = self.group_timeout;
                        Pending::Running(tokio::spawn(async move {
                            let permit = semaphore.acquire_owned().await.map_err(|err| {
                                ForecastError::ModelFit(format!("worker pool unavailable: {err}"))
                            })?;
                            fit_within_budget(forecaster, series, budget, permit).await
                        }))
                    }
                };
                (batch.key, task)
            })
            .collect::<Vec<_>>();

        let mut results = Vec::with_capacity(pending.len());
        for (group, task) in pending {
            let outcome = match task {
                Pending::Rejected(err) => Err(err),
                Pending::Running(handle) => match handle.await {
                    Ok(outcome) => outcome,
                    Err(err) => Err(ForecastError::ModelFit(join_failure(err))),
                },
            };
            let label = group.as_deref().unwrap_or("<series>");
            match &outcome {
                Ok(window) => debug!("Group '{label}' forecast {} period(s)", window.len()),
                Err(err) => warn!("Group '{label}' failed ({}): {err}", err.kind()),
            }
            results.push(GroupResult { group, outcome });
        }
        info!(
            "Forecast {} of {} group(s) with {}",
            results.iter().filter(|r| r.outcome.is_ok()).count(),
            results.len(),
            self.forecaster.name()
        );
        results
    }
}

async fn fit_within_budget(
    forecaster: Arc<dyn Forecaster>,
    series: TimeSeries,
    budget: Duration,
    _permit: OwnedSemaphorePermit,
) -> Result<ForecastWindow, ForecastError> {
    let spec = ForecastSpec::for_series(&series);
    // The permit is released when the budget expires. An abandoned fit keeps
    // running on the blocking pool but no longer holds a worker slot.
    let fit = task::spawn_blocking(move || forecaster.fit_predict(&series, &spec));
    match time::timeout(budget, fit).await {
        Err(_) => Err(ForecastError::Timeout(budget.as_secs())),
        Ok(Err(err)) => Err(ForecastError::ModelFit(join_failure(err))),
        Ok(Ok(Err(err))) => Err(ForecastError::ModelFit(format!("{err:#}"))),
        Ok(Ok(Ok(window))) if window.len() != spec.horizon => Err(ForecastError::ModelFit(
            format!("expected {} forecast periods, got {}", spec.horizon, window.len()),
        )),
        Ok(Ok(Ok(window))) => Ok(window),
    }
}

fn join_failure(err: JoinError) -> String {
    if err.is_panic() {
        format!("forecaster panicked: {}", panic_message(err.into_panic()))
    } else {
        format!("forecast task cancelled: {err}")
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecaster::{ForecastPoint, TrendForecaster};
    use anyhow::bail;
    use chrono::NaiveDate;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Instant,
    };

    fn series(len: usize) -> TimeSeries {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        TimeSeries {
            timestamps: (0..len)
                .map(|i| start + chrono::Duration::days(30 * i as i64))
                .collect(),
            values: (0..len).map(|i| i as f64).collect(),
        }
    }

    fn batch(key: &str, series: Result<TimeSeries, ForecastError>) -> SeriesBatch {
        SeriesBatch {
            key: Some(key.to_string()),
            series,
        }
    }

    /// Fails for series whose first value is negative, panics when it is 99.
    struct Picky;

    impl Forecaster for Picky {
        fn name(&self) -> &'static str {
            "picky"
        }

        fn fit_predict(
            &self,
            series: &TimeSeries,
            spec: &ForecastSpec,
        ) -> anyhow::Result<ForecastWindow> {
            match series.values[0] {
                v if v < 0.0 => bail!("negative start"),
                v if v == 99.0 => panic!("boom"),
                _ => TrendForecaster.fit_predict(series, spec),
            }
        }
    }

    struct Sleepy(Duration);

    impl Forecaster for Sleepy {
        fn name(&self) -> &'static str {
            "sleepy"
        }

        fn fit_predict(
            &self,
            series: &TimeSeries,
            spec: &ForecastSpec,
        ) -> anyhow::Result<ForecastWindow> {
            std::thread::sleep(self.0);
            TrendForecaster.fit_predict(series, spec)
        }
    }

    /// Stalls only on four-point series.
    struct SlowFirst(Duration);

    impl Forecaster for SlowFirst {
        fn name(&self) -> &'static str {
            "slow-first"
        }

        fn fit_predict(
            &self,
            series: &TimeSeries,
            spec: &ForecastSpec,
        ) -> anyhow::Result<ForecastWindow> {
            if series.len() == 4 {
                std::thread::sleep(self.0);
            }
            TrendForecaster.fit_predict(series, spec)
        }
    }

    struct Short;

    impl Forecaster for Short {
        fn name(&self) -> &'static str {
            "short"
        }

        fn fit_predict(&self, _: &TimeSeries, _: &ForecastSpec) -> anyhow::Result<ForecastWindow> {
            Ok(ForecastWindow {
                points: vec![ForecastPoint {
                    period: NaiveDate::from_ymd_opt(2020, 1, 31).unwrap(),
                    point_estimate: 1.0,
                    lower_bound: 0.0,
                    upper_bound: 2.0,
                }],
            })
        }
    }

    #[derive(Default)]
    struct Counting {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Forecaster for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn fit_predict(
            &self,
            series: &TimeSeries,
            spec: &ForecastSpec,
        ) -> anyhow::Result<ForecastWindow> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            self.running.fetch_sub(1, Ordering::SeqCst);
            TrendForecaster.fit_predict(series, spec)
        }
    }

    #[tokio::test]
    async fn failures_stay_with_their_group_and_order_is_kept() {
        let mut failing = series(4);
        failing.values[0] = -1.0;
        let mut panicking = series(4);
        panicking.values[0] = 99.0;
        let batches = vec![
            batch("ok-1", Ok(series(5))),
            batch("fails", Ok(failing)),
            batch("short", Err(ForecastError::InsufficientData { required: 3, found: 1 })),
            batch("panics", Ok(panicking)),
            batch("ok-2", Ok(series(6))),
        ];
        let results = Orchestrator::new(Arc::new(Picky), 2, Duration::from_secs(10))
            .run(batches)
            .await;

        let groups = results
            .iter()
            .map(|r| r.group.as_deref().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(groups, vec!["ok-1", "fails", "short", "panics", "ok-2"]);
        assert_eq!(results[0].outcome.as_ref().unwrap().len(), 12);
        assert_eq!(
            results[1].outcome,
            Err(ForecastError::ModelFit("negative start".into()))
        );
        assert!(matches!(
            results[2].outcome,
            Err(ForecastError::InsufficientData { found: 1, .. })
        ));
        let Err(ForecastError::ModelFit(message)) = &results[3].outcome else {
            panic!("expected a model fit error");
        };
        assert!(message.contains("boom"));
        assert!(results[4].outcome.is_ok());
    }

    #[tokio::test]
    async fn stalled_group_times_out() {
        let orchestrator =
            Orchestrator::new(Arc::new(Sleepy(Duration::from_secs(2))), 2, Duration::from_secs(1));
        let results = orchestrator.run(vec![batch("slow", Ok(series(4)))]).await;
        assert_eq!(results[0].outcome, Err(ForecastError::Timeout(1)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timed_out_group_frees_its_worker_for_the_next() {
        let orchestrator =
            Orchestrator::new(Arc::new(SlowFirst(Duration::from_secs(6))), 1, Duration::from_secs(1));
        let started = Instant::now();
        let results = orchestrator
            .run(vec![batch("slow", Ok(series(4))), batch("fast", Ok(series(5)))])
            .await;
        let elapsed = started.elapsed();

        assert_eq!(results[0].outcome, Err(ForecastError::Timeout(1)));
        assert_eq!(results[1].outcome.as_ref().unwrap().len(), 12);
        assert!(elapsed < Duration::from_secs(4), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn wrong_window_length_is_a_fit_error() {
        let results = Orchestrator::new(Arc::new(Short), 1, Duration::from_secs(5))
            .run(vec![batch("a", Ok(series(3)))])
            .await;
        assert!(matches!(
            &results[0].outcome,
            Err(ForecastError::ModelFit(message)) if message.contains("expected 12")
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_is_bounded_by_workers() {
        let forecaster = Arc::new(Counting::default());
        let batches = (0..8)
            .map(|i| batch(&format!("g{i}"), Ok(series(4))))
            .collect::<Vec<_>>();
        let results = Orchestrator::new(forecaster.clone(), 2, Duration::from_secs(10))
            .run(batches)
            .await;
        assert!(results.iter().all(|r| r.outcome.is_ok()));
        assert!(forecaster.peak.load(Ordering::SeqCst) <= 2);
    }
}
