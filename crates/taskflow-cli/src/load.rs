//! Load tester for the ingestion endpoint.
//!
//! Scenarios mirror the workflow test suite: a few sequential functional
//! requests, one single request, then medium and high concurrent loads.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{DateTime, Local, Utc};
use clap::ValueEnum;
use serde::Serialize;
use taskflow_core::ingest::RetryPolicy;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::info;

pub const DEFAULT_URL: &str = "http://localhost:7071/api/tasks";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest response/error text kept per request.
const MAX_TEXT_LEN: usize = 200;

/// Client-side retry: 2 attempts, 0.5s * attempt between them.
pub const CLIENT_RETRY: RetryPolicy = RetryPolicy {
    max_attempts: 2,
    base_delay: Duration::from_millis(500),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    Functional,
    Single,
    Medium,
    High,
    Suite,
}

/// How one scenario is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub test_case: &'static str,
    pub n: usize,
    /// 1 = sequential.
    pub concurrency: usize,
    /// Pause between sequential requests.
    pub pause: Duration,
}

impl Scenario {
    /// Plans to run, each paired with the pause that precedes it.
    pub fn plans(self) -> Vec<(Duration, Plan)> {
        const FUNCTIONAL: Plan = Plan {
            test_case: "functional",
            n: 5,
            concurrency: 1,
            pause: Duration::from_millis(500),
        };
        const SINGLE: Plan = Plan {
            test_case: "single_request",
            n: 1,
            concurrency: 1,
            pause: Duration::ZERO,
        };
        const MEDIUM: Plan = Plan {
            test_case: "medium_load",
            n: 50,
            concurrency: 10,
            pause: Duration::ZERO,
        };
        const HIGH: Plan = Plan {
            test_case: "high_load",
            n: 200,
            concurrency: 20,
            pause: Duration::ZERO,
        };

        match self {
            Scenario::Functional => vec![(Duration::ZERO, FUNCTIONAL)],
            Scenario::Single => vec![(Duration::ZERO, SINGLE)],
            Scenario::Medium => vec![(Duration::ZERO, MEDIUM)],
            Scenario::High => vec![(Duration::ZERO, HIGH)],
            Scenario::Suite => vec![
                (Duration::ZERO, FUNCTIONAL),
                (Duration::from_secs(5), SINGLE),
                (Duration::from_secs(5), MEDIUM),
                (Duration::from_secs(10), HIGH),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestResult {
    pub task_id: usize,
    pub status_code: Option<u16>,
    pub duration_ms: f64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub test_case: String,
    pub n: usize,
    pub total_duration_ms: f64,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub avg_duration_ms: f64,
    /// Over successful requests only; 0 when none succeeded.
    pub min_duration_ms: f64,
    pub max_duration_ms: f64,
    pub results: Vec<RequestResult>,
    pub timestamp: DateTime<Utc>,
}

impl ScenarioReport {
    pub fn from_results(test_case: &str, results: Vec<RequestResult>, total: Duration) -> Self {
        let n = results.len();
        let successful_requests = results.iter().filter(|r| r.success).count();
        let avg_duration_ms = if n == 0 {
            0.0
        } else {
            results.iter().map(|r| r.duration_ms).sum::<f64>() / n as f64
        };
        let ok_durations = results.iter().filter(|r| r.success).map(|r| r.duration_ms);
        let min_duration_ms = ok_durations.clone().reduce(f64::min).unwrap_or(0.0);
        let max_duration_ms = ok_durations.reduce(f64::max).unwrap_or(0.0);

        Self {
            test_case: test_case.to_string(),
            n,
            total_duration_ms: millis(total),
            successful_requests,
            failed_requests: n - successful_requests,
            avg_duration_ms,
            min_duration_ms,
            max_duration_ms,
            results,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SuiteReport {
    pub timestamp: String,
    pub tests: Vec<ScenarioReport>,
}

/// HTTP client with the load tester's retry rules.
#[derive(Clone)]
pub struct LoadClient {
    http: reqwest::Client,
    url: String,
    retry: RetryPolicy,
}

impl LoadClient {
    pub fn new(url: impl Into<String>, timeout: Duration, retry: RetryPolicy) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            url: url.into(),
            retry,
        })
    }

    /// Submit one task. 4xx and 2xx end the request; 5xx and transport
    /// errors are retried while attempts remain.
    pub async fn send(&self, task_id: usize, payload: &str) -> RequestResult {
        let started = Instant::now();
        let body = serde_json::json!({ "task": payload });
        let mut attempt = 1;

        loop {
            let last = !self.retry.has_attempts_after(attempt);
            match self.http.post(&self.url).json(&body).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() || status.is_client_error() || last {
                        let text = response.text().await.unwrap_or_default();
                        return RequestResult {
                            task_id,
                            status_code: Some(status.as_u16()),
                            duration_ms: millis(started.elapsed()),
                            success: status == reqwest::StatusCode::OK,
                            response: Some(truncate(&text)),
                            error: None,
                            attempt,
                            timestamp: Utc::now(),
                        };
                    }
                }
                Err(err) if last => {
                    let error = if err.is_timeout() {
                        "Request timeout".to_string()
                    } else {
                        truncate(&err.to_string())
                    };
                    return RequestResult {
                        task_id,
                        status_code: None,
                        duration_ms: millis(started.elapsed()),
                        success: false,
                        response: None,
                        error: Some(error),
                        attempt,
                        timestamp: Utc::now(),
                    };
                }
                Err(_) => {}
            }

            tokio::time::sleep(self.retry.next_delay(attempt)).await;
            attempt += 1;
        }
    }
}

/// Run one plan. Payloads are `<test_case>_<stamp>_<i>`.
pub async fn run_plan(client: &LoadClient, plan: Plan, stamp: &str) -> ScenarioReport {
    info!(test_case = plan.test_case, n = plan.n, concurrency = plan.concurrency, "scenario starting");
    let started = Instant::now();
    let mut results = Vec::with_capacity(plan.n);

    if plan.concurrency <= 1 {
        for i in 1..=plan.n {
            let payload = format!("{}_{stamp}_{i}", plan.test_case);
            results.push(client.send(i, &payload).await);
            if i < plan.n && !plan.pause.is_zero() {
                tokio::time::sleep(plan.pause).await;
            }
        }
    } else {
        let permits = Arc::new(Semaphore::new(plan.concurrency));
        let mut joins = JoinSet::new();
        for i in 1..=plan.n {
            let client = client.clone();
            let permits = Arc::clone(&permits);
            let payload = format!("{}_{stamp}_{i}", plan.test_case);
            joins.spawn(async move {
                // the semaphore is never closed
                let _permit = permits.acquire_owned().await.ok();
                client.send(i, &payload).await
            });
        }
        while let Some(joined) = joins.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => tracing::error!(error = %err, "request task panicked"),
            }
            if results.len() % 50 == 0 {
                info!(completed = results.len(), n = plan.n, "progress");
            }
        }
    }

    let report = ScenarioReport::from_results(plan.test_case, results, started.elapsed());
    info!(
        test_case = %report.test_case,
        successful = report.successful_requests,
        n = report.n,
        total_ms = report.total_duration_ms,
        avg_ms = report.avg_duration_ms,
        "scenario finished"
    );
    report
}

/// Run every plan of `scenario` and write the combined report into `out_dir`.
pub async fn run_scenario(
    client: &LoadClient,
    scenario: Scenario,
    out_dir: &Path,
) -> anyhow::Result<PathBuf> {
    let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let mut tests = Vec::new();

    for (pause, plan) in scenario.plans() {
        if !pause.is_zero() {
            info!(seconds = pause.as_secs(), "waiting before next scenario");
            tokio::time::sleep(pause).await;
        }
        tests.push(run_plan(client, plan, &stamp).await);
    }

    let report = SuiteReport {
        timestamp: stamp.clone(),
        tests,
    };
    write_report(&report, out_dir, &stamp)
}

fn write_report(report: &SuiteReport, out_dir: &Path, stamp: &str) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("create results dir: {}", out_dir.display()))?;
    let path = out_dir.join(format!("test_results_{stamp}.json"));
    let contents = serde_json::to_string_pretty(report).context("serialize results")?;
    std::fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;

    for test in &report.tests {
        info!(
            test_case = %test.test_case,
            "{}/{} successful",
            test.successful_requests,
            test.n
        );
    }
    info!(path = %path.display(), "results saved");
    Ok(path)
}

fn truncate(text: &str) -> String {
    text.chars().take(MAX_TEXT_LEN).collect()
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use taskflow_core::config::IngestConfig;
    use taskflow_core::impls::memory::{Fault, InMemoryTaskStore};
    use taskflow_core::ingest::IngestEndpoint;

    fn result(task_id: usize, success: bool, duration_ms: f64) -> RequestResult {
        RequestResult {
            task_id,
            status_code: Some(if success { 200 } else { 503 }),
            duration_ms,
            success,
            response: None,
            error: None,
            attempt: 1,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn report_aggregates_durations() {
        let results = vec![
            result(1, true, 10.0),
            result(2, true, 30.0),
            result(3, false, 80.0),
        ];

        let report = ScenarioReport::from_results("medium_load", results, Duration::from_secs(2));

        assert_eq!(report.n, 3);
        assert_eq!(report.successful_requests, 2);
        assert_eq!(report.failed_requests, 1);
        assert_eq!(report.avg_duration_ms, 40.0);
        assert_eq!(report.min_duration_ms, 10.0);
        assert_eq!(report.max_duration_ms, 30.0);
        assert_eq!(report.total_duration_ms, 2000.0);
    }

    #[test]
    fn empty_report_is_all_zero() {
        let report = ScenarioReport::from_results("single_request", vec![], Duration::ZERO);
        assert_eq!(report.avg_duration_ms, 0.0);
        assert_eq!(report.min_duration_ms, 0.0);
        assert_eq!(report.failed_requests, 0);
    }

    #[rstest]
    #[case(Scenario::Functional, 5)]
    #[case(Scenario::Single, 1)]
    #[case(Scenario::Medium, 50)]
    #[case(Scenario::High, 200)]
    #[case(Scenario::Suite, 256)]
    fn scenario_request_counts(#[case] scenario: Scenario, #[case] total: usize) {
        let n: usize = scenario.plans().iter().map(|(_, plan)| plan.n).sum();
        assert_eq!(n, total);
    }

    #[test]
    fn truncate_keeps_first_chars() {
        assert_eq!(truncate(&"é".repeat(300)).chars().count(), MAX_TEXT_LEN);
        assert_eq!(truncate("short"), "short");
    }

    async fn spawn_server(store: Arc<InMemoryTaskStore>) -> String {
        let mut config = IngestConfig::new(
            "Server=tcp:localhost,5432;Initial Catalog=tasks;User ID=u;Password=p",
        );
        config.retry.base_delay = Duration::from_millis(1);
        let endpoint = IngestEndpoint::new(Arc::new(config), store);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(taskflow_core::http::serve_listener(
            endpoint,
            listener,
            std::future::pending(),
        ));
        format!("http://{addr}/api/tasks")
    }

    fn fast_client(url: String) -> LoadClient {
        let retry = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(10),
        };
        LoadClient::new(url, Duration::from_secs(5), retry).unwrap()
    }

    #[tokio::test]
    async fn client_retries_service_unavailable() {
        // first request exhausts the server's 3 attempts, the retry succeeds
        let store = Arc::new(InMemoryTaskStore::new().with_faults([Some(Fault::Connect); 3]));
        let client = fast_client(spawn_server(store.clone()).await);

        let result = client.send(1, "retry_me").await;

        assert!(result.success);
        assert_eq!(result.attempt, 2);
        assert_eq!(result.status_code, Some(200));
        assert_eq!(result.response.as_deref(), Some("Task added: retry_me"));
        assert_eq!(store.rows().await.len(), 1);
    }

    #[tokio::test]
    async fn client_does_not_retry_bad_request() {
        let store = Arc::new(InMemoryTaskStore::new());
        let client = fast_client(spawn_server(store.clone()).await);

        let result = client.send(1, "").await;

        assert!(!result.success);
        assert_eq!(result.attempt, 1);
        assert_eq!(result.status_code, Some(400));
        assert_eq!(store.calls().await, 0);
    }

    #[tokio::test]
    async fn unreachable_server_reports_error() {
        let client = fast_client("http://127.0.0.1:1/api/tasks".to_string());

        let result = client.send(7, "x").await;

        assert!(!result.success);
        assert_eq!(result.status_code, None);
        assert_eq!(result.attempt, 2);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn concurrent_plan_collects_every_result() {
        let store = Arc::new(InMemoryTaskStore::new());
        let client = fast_client(spawn_server(store.clone()).await);
        let plan = Plan {
            test_case: "medium_load",
            n: 12,
            concurrency: 4,
            pause: Duration::ZERO,
        };

        let report = run_plan(&client, plan, "stamp").await;

        assert_eq!(report.n, 12);
        assert_eq!(report.successful_requests, 12);
        assert_eq!(store.rows().await.len(), 12);
    }
}
