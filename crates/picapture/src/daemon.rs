//! The capture loop.
//!
//! A [`Daemon`] runs capture cycles one after another: capture, then (only if
//! the capture succeeded) publish the record and rotate old files, then pause.
//! Nothing runs concurrently and nothing is retried.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::capture::{CaptureProvider, CaptureRecord, CaptureTarget};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::paths::PathMapper;
use crate::publish::StatePublisher;
use crate::retention::Retention;

/// Source of capture timestamps.
pub type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Waits between capture cycles.
#[async_trait::async_trait]
pub trait Pacer: Send {
    /// Wait for `interval` before the next cycle starts.
    async fn pause(&mut self, interval: Duration);
}

/// Paces cycles with the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SleepPacer;

#[async_trait::async_trait]
impl Pacer for SleepPacer {
    async fn pause(&mut self, interval: Duration) {
        tokio::time::sleep(interval).await;
    }
}

/// What a single capture cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The capture failed; nothing was published or removed.
    Skipped,
    /// A capture was taken.
    Captured {
        /// The record that was (or should have been) published.
        record: CaptureRecord,
        /// Whether the record reached the shared store.
        published: bool,
        /// Files removed by rotation.
        removed: Vec<PathBuf>,
    },
}

impl CycleOutcome {
    /// Whether a capture was taken this cycle.
    #[must_use]
    pub fn is_captured(&self) -> bool {
        matches!(self, Self::Captured { .. })
    }
}

/// Runs capture cycles against a provider and a publisher.
pub struct Daemon<C, P> {
    output_dir: PathBuf,
    interval: Duration,
    provider: C,
    publisher: P,
    mapper: PathMapper,
    retention: Retention,
    clock: Clock,
}

impl<C: fmt::Debug, P: fmt::Debug> fmt::Debug for Daemon<C, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Daemon")
            .field("output_dir", &self.output_dir)
            .field("interval", &self.interval)
            .field("provider", &self.provider)
            .field("publisher", &self.publisher)
            .field("mapper", &self.mapper)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl<C, P> Daemon<C, P>
where
    C: CaptureProvider,
    P: StatePublisher,
{
    /// Create a daemon for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the retention pattern is invalid.
    pub fn new(config: &Config, provider: C, publisher: P) -> Result<Self> {
        Ok(Self {
            output_dir: config.capture.output_dir.clone(),
            interval: config.interval(),
            provider,
            publisher,
            mapper: PathMapper::new(
                &config.capture.output_dir,
                config.capture.host_output_path.clone(),
            ),
            retention: Retention::from_config(config)?,
            clock: Box::new(Utc::now),
        })
    }

    /// Replace the clock used to timestamp captures.
    #[must_use]
    pub fn with_clock(
        mut self,
        clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static,
    ) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// The publisher records are sent to.
    #[must_use]
    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// The capture provider.
    #[must_use]
    pub fn provider(&self) -> &C {
        &self.provider
    }

    /// Create the output directory if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn prepare_output_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.output_dir).map_err(|source| Error::DirectoryCreate {
            path: self.output_dir.clone(),
            source,
        })
    }

    /// Ask the provider for a capture, logging failures.
    async fn capture_now(&self) -> Option<CaptureTarget> {
        let target = CaptureTarget::new(&self.output_dir, (self.clock)());
        match self.provider.capture(&target).await {
            Ok(()) => Some(target),
            Err(e) => {
                error!("Capture via {} failed: {}", self.provider.name(), e);
                None
            }
        }
    }

    /// Run one capture cycle.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let Some(target) = self.capture_now().await else {
            return CycleOutcome::Skipped;
        };

        let record = CaptureRecord::new(target.taken_at, self.mapper.map(&target.path));
        let published = match self.publisher.publish(&record).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to update store: {}", e);
                false
            }
        };
        let removed = self.retention.rotate();

        CycleOutcome::Captured {
            record,
            published,
            removed,
        }
    }

    /// Run cycles until `shutdown` resolves, pausing with `pacer` between
    /// them.
    ///
    /// A cycle in progress when `shutdown` resolves runs to completion, so
    /// every published capture has also been rotated. Returns the number of
    /// cycles that completed.
    pub async fn run<T, F>(&mut self, pacer: &mut T, shutdown: F) -> u64
    where
        T: Pacer,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            "Starting capture loop in {} every {:?}",
            self.output_dir.display(),
            self.interval
        );

        let interval = self.interval;
        let mut cycles = 0u64;
        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => break,
                () = std::future::ready(()) => {}
            }
            self.run_cycle().await;
            cycles += 1;

            tokio::select! {
                biased;
                () = &mut shutdown => break,
                () = pacer.pause(interval) => {}
            }
        }

        info!("Capture loop stopped after {} cycles", cycles);
        cycles
    }
}
