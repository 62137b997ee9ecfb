use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 60;

/// Body of a `/status` read. `status` is `"done"`, `"error"`, or any other
/// value (the server also emits `"idle"` and `"processing"`), all of which
/// mean the job is still running.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub plot_files: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub error: Option<String>,
}

/// What a single status read means for the polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollSignal {
    /// Still running, nothing to report.
    Continue,
    /// Still running, but the server flagged a non-fatal problem.
    Notice(String),
    /// Terminal: plot-type tag to file identifier.
    Done(BTreeMap<String, String>),
    /// Terminal failure.
    Fatal(String),
}

/// Classify one status read.
///
/// `status == "error"` is terminal; a non-empty `error` field under any
/// other status is advisory and polling continues. The asymmetry matches
/// the server's status writer, which keeps partial-failure messages around
/// across `processing` updates (flagged for product clarification, kept
/// as observed).
pub fn classify(status: &JobStatus) -> PollSignal {
    if status.status == "done" {
        return PollSignal::Done(status.plot_files.clone().unwrap_or_default());
    }
    if status.status == "error" {
        let message = status
            .error
            .clone()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| "plot generation failed".to_string());
        return PollSignal::Fatal(message);
    }
    if let Some(error) = status.error.as_deref().filter(|e| !e.is_empty()) {
        return PollSignal::Notice(error.to_string());
    }
    PollSignal::Continue
}

/// Client-side polling policy. Not part of the server contract; the hard
/// timeout ceiling is `interval * max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Done(BTreeMap<String, String>),
    Failed(String),
    TimedOut { attempts: u32 },
}

/// Poll `fetch` on a fixed cadence until a terminal signal or the attempt
/// ceiling. Advisory notices are handed to `notice` without stopping the
/// loop. Returns exactly one terminal outcome; no tick runs after it.
///
/// A transport failure on any tick is terminal for the job; there is no
/// retry inside the loop.
pub async fn run_poll_loop<F, Fut, N>(mut fetch: F, policy: PollPolicy, mut notice: N) -> PollOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<JobStatus>>,
    N: FnMut(&str),
{
    if policy.max_attempts == 0 {
        return PollOutcome::TimedOut { attempts: 0 };
    }

    let mut attempts: u32 = 0;
    loop {
        tokio::time::sleep(policy.interval).await;
        attempts += 1;

        let status = match fetch().await {
            Ok(status) => status,
            Err(err) => return PollOutcome::Failed(format!("status request failed: {err:#}")),
        };

        match classify(&status) {
            PollSignal::Continue => {}
            PollSignal::Notice(message) => notice(&message),
            PollSignal::Done(files) => return PollOutcome::Done(files),
            PollSignal::Fatal(message) => return PollOutcome::Failed(message),
        }

        if attempts >= policy.max_attempts {
            return PollOutcome::TimedOut { attempts };
        }
    }
}

/// Owner of the single live plot job. Submitting a new job bumps the
/// generation counter and aborts the previous loop task, so two loops can
/// never race to deliver conflicting terminal results; a superseded loop
/// that was already mid-tick fails the generation check instead of
/// delivering.
#[derive(Debug, Default)]
pub struct PlotJobRunner {
    current: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl PlotJobRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a poll loop for a freshly submitted job, superseding any
    /// previous one. `on_terminal` fires exactly once, and only if the job
    /// is still the current generation when its loop ends.
    pub fn submit<F, Fut, N, C>(
        &mut self,
        fetch: F,
        policy: PollPolicy,
        notice: N,
        on_terminal: C,
    ) -> u64
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<JobStatus>> + Send + 'static,
        N: FnMut(&str) + Send + 'static,
        C: FnOnce(PollOutcome) + Send + 'static,
    {
        // Bump before aborting: an old loop past its last await must see
        // itself stale before we let go of it.
        let generation = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let current = Arc::clone(&self.current);
        self.task = Some(tokio::spawn(async move {
            let outcome = run_poll_loop(fetch, policy, notice).await;
            if current.load(Ordering::SeqCst) == generation {
                on_terminal(outcome);
            }
        }));
        generation
    }

    /// Explicit client-side cancellation. The server-side job keeps running;
    /// its result is simply never collected.
    #[allow(dead_code)]
    pub fn abandon(&mut self) {
        self.current.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PlotJobRunner {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use anyhow::anyhow;

    fn running(status: &str, error: Option<&str>) -> JobStatus {
        JobStatus {
            status: status.to_string(),
            plot_files: None,
            error: error.map(str::to_string),
        }
    }

    fn done(files: &[(&str, &str)]) -> JobStatus {
        JobStatus {
            status: "done".to_string(),
            plot_files: Some(
                files
                    .iter()
                    .map(|(tag, file)| (tag.to_string(), file.to_string()))
                    .collect(),
            ),
            error: None,
        }
    }

    /// Fetch closure that pops canned responses and counts calls.
    fn scripted(
        responses: Vec<Result<JobStatus>>,
    ) -> (
        impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = Result<JobStatus>> + Send>>,
        Arc<AtomicUsize>,
    ) {
        let queue = Arc::new(Mutex::new(VecDeque::from(responses)));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let fetch = move || {
            let queue = Arc::clone(&queue);
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                queue
                    .lock()
                    .expect("script lock")
                    .pop_front()
                    .expect("script exhausted")
            }) as std::pin::Pin<Box<dyn Future<Output = Result<JobStatus>> + Send>>
        };
        (fetch, calls)
    }

    #[test]
    fn classify_separates_terminal_from_advisory_errors() {
        assert_eq!(
            classify(&running("processing", None)),
            PollSignal::Continue
        );
        assert_eq!(classify(&running("idle", None)), PollSignal::Continue);
        assert_eq!(
            classify(&running("running", Some("partial I/O warning"))),
            PollSignal::Notice("partial I/O warning".to_string())
        );
        assert_eq!(
            classify(&running("error", Some("exploded"))),
            PollSignal::Fatal("exploded".to_string())
        );
        assert_eq!(
            classify(&running("error", None)),
            PollSignal::Fatal("plot generation failed".to_string())
        );
    }

    #[test]
    fn classify_done_carries_the_result_map() {
        let signal = classify(&done(&[("events_over_time", "a_events_over_time.png")]));
        let PollSignal::Done(files) = signal else {
            panic!("expected done");
        };
        assert_eq!(
            files.get("events_over_time").map(String::as_str),
            Some("a_events_over_time.png")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn loop_delivers_done_after_exactly_three_ticks() {
        let (fetch, calls) = scripted(vec![
            Ok(running("processing", None)),
            Ok(running("processing", None)),
            Ok(done(&[("level_distribution", "x_level_distribution.png")])),
        ]);
        let notices = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notices);

        let outcome = run_poll_loop(fetch, PollPolicy::default(), move |msg: &str| {
            sink.lock().expect("notice lock").push(msg.to_string());
        })
        .await;

        let PollOutcome::Done(files) = outcome else {
            panic!("expected done");
        };
        assert_eq!(files.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(notices.lock().expect("notice lock").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_times_out_at_the_ceiling_not_before() {
        let (fetch, calls) = scripted(vec![
            Ok(running("processing", None)),
            Ok(running("processing", None)),
            Ok(running("processing", None)),
        ]);
        let policy = PollPolicy {
            interval: Duration::from_millis(500),
            max_attempts: 3,
        };

        let outcome = run_poll_loop(fetch, policy, |_| {}).await;

        assert_eq!(outcome, PollOutcome::TimedOut { attempts: 3 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_error_stops_before_the_ceiling() {
        let (fetch, calls) = scripted(vec![
            Ok(running("processing", None)),
            Ok(running("error", Some("render crashed"))),
        ]);

        let outcome = run_poll_loop(fetch, PollPolicy::default(), |_| {}).await;

        assert_eq!(outcome, PollOutcome::Failed("render crashed".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn advisory_error_surfaces_and_keeps_polling() {
        let (fetch, calls) = scripted(vec![
            Ok(running("running", Some("partial I/O warning"))),
            Ok(done(&[])),
        ]);
        let notices = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notices);

        let outcome = run_poll_loop(fetch, PollPolicy::default(), move |msg: &str| {
            sink.lock().expect("notice lock").push(msg.to_string());
        })
        .await;

        assert!(matches!(outcome, PollOutcome::Done(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            *notices.lock().expect("notice lock"),
            vec!["partial I/O warning".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_is_terminal() {
        let (fetch, calls) = scripted(vec![Err(anyhow!("connection refused"))]);

        let outcome = run_poll_loop(fetch, PollPolicy::default(), |_| {}).await;

        let PollOutcome::Failed(message) = outcome else {
            panic!("expected failure");
        };
        assert!(message.contains("connection refused"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn new_submission_supersedes_the_previous_loop() {
        let mut runner = PlotJobRunner::new();

        let first_results: Arc<Mutex<Vec<PollOutcome>>> = Arc::new(Mutex::new(Vec::new()));
        let first_sink = Arc::clone(&first_results);
        let (first_fetch, _) = scripted(
            std::iter::repeat_with(|| Ok(running("processing", None)))
                .take(100)
                .collect(),
        );
        runner.submit(first_fetch, PollPolicy::default(), |_| {}, move |outcome| {
            first_sink.lock().expect("first lock").push(outcome);
        });

        let second_results: Arc<Mutex<Vec<PollOutcome>>> = Arc::new(Mutex::new(Vec::new()));
        let second_sink = Arc::clone(&second_results);
        let (second_fetch, _) = scripted(vec![Ok(done(&[("custom", "x_custom.png")]))]);
        runner.submit(
            second_fetch,
            PollPolicy::default(),
            |_| {},
            move |outcome| {
                second_sink.lock().expect("second lock").push(outcome);
            },
        );

        // Give both loops far more time than the second needs.
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        assert!(first_results.lock().expect("first lock").is_empty());
        let delivered = second_results.lock().expect("second lock");
        assert_eq!(delivered.len(), 1);
        assert!(matches!(delivered[0], PollOutcome::Done(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_job_never_delivers() {
        let mut runner = PlotJobRunner::new();
        let results: Arc<Mutex<Vec<PollOutcome>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&results);
        let (fetch, _) = scripted(vec![Ok(done(&[]))]);

        runner.submit(fetch, PollPolicy::default(), |_| {}, move |outcome| {
            sink.lock().expect("result lock").push(outcome);
        });
        runner.abandon();

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        assert!(results.lock().expect("result lock").is_empty());
    }
}
