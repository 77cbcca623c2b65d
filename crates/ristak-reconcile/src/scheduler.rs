//! [`Scheduler`] — runs a [`Job`] on a fixed interval, at most one run at a
//! time.
//!
//! Every run, scheduled or manual, must first win the job's running flag.
//! A tick that finds the flag taken is dropped, never queued.

use std::{
  fmt::Debug,
  future::Future,
  sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use tokio::{
  task::JoinHandle,
  time::{Instant, MissedTickBehavior},
};

// ─── Job ─────────────────────────────────────────────────────────────────────

/// A unit of recurring work.
pub trait Job: Send + Sync + 'static {
  type Output: Debug + Send + 'static;
  type Error: std::error::Error + Send + Sync + 'static;

  /// Stable name used in logs and on the operator API.
  fn name(&self) -> &str;

  fn run(&self) -> impl Future<Output = Result<Self::Output, Self::Error>> + Send + '_;
}

// ─── Schedule ────────────────────────────────────────────────────────────────

/// When a job fires: once after `initial_delay`, then every `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSpec {
  pub interval:      Duration,
  pub initial_delay: Duration,
}

impl ScheduleSpec {
  pub const fn new(interval: Duration, initial_delay: Duration) -> Self {
    Self { interval, initial_delay }
  }

  /// Every five minutes, first run ten seconds after start.
  pub const fn retroactive_linking() -> Self {
    Self::new(Duration::from_secs(5 * 60), Duration::from_secs(10))
  }

  /// Hourly, first run immediately.
  pub const fn hourly_sync() -> Self { Self::new(Duration::from_secs(60 * 60), Duration::ZERO) }
}

// ─── Outcomes ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
  Idle,
  Running,
}

/// What happened to a run request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome<T> {
  Completed(T),
  /// Another run held the flag; nothing was done.
  Skipped,
}

impl<T> RunOutcome<T> {
  pub fn is_skipped(&self) -> bool { matches!(self, Self::Skipped) }

  pub fn completed(self) -> Option<T> {
    match self {
      Self::Completed(v) => Some(v),
      Self::Skipped => None,
    }
  }
}

// ─── Shared state ────────────────────────────────────────────────────────────

struct Inner<J> {
  job:     J,
  spec:    ScheduleSpec,
  running: AtomicBool,
}

/// Clears the running flag when dropped, including on error or panic.
struct RunPermit<'a>(&'a AtomicBool);

impl Drop for RunPermit<'_> {
  fn drop(&mut self) { self.0.store(false, Ordering::Release); }
}

impl<J: Job> Inner<J> {
  fn try_acquire(&self) -> Option<RunPermit<'_>> {
    self
      .running
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| RunPermit(&self.running))
  }

  async fn run_guarded(&self) -> Result<RunOutcome<J::Output>, J::Error> {
    let Some(_permit) = self.try_acquire() else {
      return Ok(RunOutcome::Skipped);
    };
    let output = self.job.run().await?;
    Ok(RunOutcome::Completed(output))
  }

  /// One scheduled firing. Errors are logged, never propagated.
  async fn tick(self: Arc<Self>) {
    let job = self.job.name();
    let started = Instant::now();
    match self.run_guarded().await {
      Ok(RunOutcome::Completed(output)) => tracing::info!(
        job,
        elapsed_ms = started.elapsed().as_millis() as u64,
        ?output,
        "scheduled run complete"
      ),
      Ok(RunOutcome::Skipped) => {
        tracing::info!(job, "previous run still in progress, skipping tick");
      }
      Err(e) => tracing::error!(job, error = %e, "scheduled run failed"),
    }
  }
}

// ─── Scheduler ───────────────────────────────────────────────────────────────

pub struct Scheduler<J: Job> {
  inner:   Arc<Inner<J>>,
  trigger: Mutex<Option<JoinHandle<()>>>,
}

impl<J: Job> Scheduler<J> {
  pub fn new(job: J, spec: ScheduleSpec) -> Self {
    Self {
      inner:   Arc::new(Inner { job, spec, running: AtomicBool::new(false) }),
      trigger: Mutex::new(None),
    }
  }

  pub fn job(&self) -> &J { &self.inner.job }

  pub fn spec(&self) -> ScheduleSpec { self.inner.spec }

  pub fn state(&self) -> JobState {
    if self.is_running() { JobState::Running } else { JobState::Idle }
  }

  /// Whether a run is executing right now.
  pub fn is_running(&self) -> bool { self.inner.running.load(Ordering::Acquire) }

  /// Whether the recurring trigger is registered.
  pub fn is_active(&self) -> bool {
    let trigger = self.trigger.lock().unwrap_or_else(PoisonError::into_inner);
    trigger.as_ref().is_some_and(|h| !h.is_finished())
  }

  /// Run the job now unless a run is already in progress.
  pub async fn run_once(&self) -> Result<RunOutcome<J::Output>, J::Error> {
    let outcome = self.inner.run_guarded().await;
    if let Ok(RunOutcome::Skipped) = outcome {
      tracing::info!(job = self.inner.job.name(), "manual run skipped, already running");
    }
    outcome
  }

  /// Register the recurring trigger. A no-op if already active.
  ///
  /// Must be called from within a Tokio runtime.
  pub fn start(&self) {
    let mut trigger = self.trigger.lock().unwrap_or_else(PoisonError::into_inner);
    if trigger.as_ref().is_some_and(|h| !h.is_finished()) {
      tracing::debug!(job = self.inner.job.name(), "scheduler already active");
      return;
    }

    let inner = Arc::clone(&self.inner);
    let spec = self.inner.spec;
    // tokio intervals must be non-zero.
    let period = spec.interval.max(Duration::from_millis(1));

    tracing::info!(
      job = inner.job.name(),
      interval_secs = period.as_secs(),
      initial_delay_secs = spec.initial_delay.as_secs(),
      "starting scheduler"
    );

    *trigger = Some(tokio::spawn(async move {
      if !spec.initial_delay.is_zero() {
        tokio::time::sleep(spec.initial_delay).await;
      }
      tokio::spawn(Arc::clone(&inner).tick());

      let mut interval = tokio::time::interval_at(Instant::now() + period, period);
      interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
      loop {
        interval.tick().await;
        tokio::spawn(Arc::clone(&inner).tick());
      }
    }));
  }

  /// Cancel the recurring trigger. A run already in flight finishes.
  pub fn stop(&self) {
    let handle = self.trigger.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(handle) = handle {
      handle.abort();
      tracing::info!(job = self.inner.job.name(), "scheduler stopped");
    }
  }
}

impl<J: Job> Drop for Scheduler<J> {
  fn drop(&mut self) { self.stop(); }
}
