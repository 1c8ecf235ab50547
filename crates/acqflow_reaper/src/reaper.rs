//! The reaper poll loop.

use crate::candidate::{scan_candidates, ReapCandidate};
use crate::capture::Stager;
use crate::checkpoint::CheckpointStore;
use crate::config::ReaperConfig;
use crate::error::{ReaperError, Result};
use crate::header::{CommandHeaderParser, HeaderParser, PatientFilter};
use crate::metrics::REAPER_METRICS;
use crate::tracker::{Classification, StabilityTracker};
use acqflow_protocol::CancellationToken;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Result of one capture attempt.
#[derive(Debug)]
pub enum CaptureOutcome {
    /// Published into the sort stage at this path.
    Captured(PathBuf),
    /// Patient id did not match the filter; handled without capture.
    Filtered,
    /// Retried on the next poll.
    Failed(ReaperError),
}

/// Counts for one poll, mostly for tests and debug logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    /// Candidates at or after the checkpoint
    pub candidates: usize,
    pub discovered: usize,
    pub monitoring: usize,
    pub captured: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Stable candidates held back behind an earlier failure
    pub deferred: usize,
}

pub struct Reaper {
    id: String,
    data_path: PathBuf,
    pattern: String,
    poll_interval: Duration,
    filter: Option<PatientFilter>,
    parser: Box<dyn HeaderParser>,
    stager: Stager,
    checkpoint: CheckpointStore,
    tracker: StabilityTracker,
}

impl Reaper {
    /// Build a reaper that parses headers with the configured command.
    pub fn from_config(config: &ReaperConfig) -> Result<Self> {
        let parser = CommandHeaderParser::new(config.header_command.clone());
        Self::with_parser(config, Box::new(parser))
    }

    /// Build a reaper and publish any captures a previous run left behind.
    pub fn with_parser(config: &ReaperConfig, parser: Box<dyn HeaderParser>) -> Result<Self> {
        let id = config.resolved_reaper_id()?;
        glob::Pattern::new(&config.pattern)?;
        let filter = config
            .patient_filter
            .as_deref()
            .map(PatientFilter::new)
            .transpose()?;

        let stager = Stager::new(
            id.clone(),
            config.reap_stage(),
            config.sort_stage(),
            config.companion_prefix_len,
        )?;
        let checkpoint = CheckpointStore::load(config.resolved_checkpoint_path()?);

        let recovered = stager.recover()?;
        REAPER_METRICS.add_recovered(recovered as u64);

        let tracker = StabilityTracker::new(checkpoint.current());

        info!(
            reaper_id = %id,
            data_path = %config.data_path.display(),
            checkpoint = %checkpoint.current(),
            recovered,
            "Reaper ready"
        );

        Ok(Self {
            id,
            data_path: config.data_path.clone(),
            pattern: config.pattern.clone(),
            poll_interval: config.poll_interval(),
            filter,
            parser,
            stager,
            checkpoint,
            tracker,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn checkpoint(&self) -> DateTime<Utc> {
        self.checkpoint.current()
    }

    pub fn sort_stage(&self) -> &Path {
        self.stager.sort_stage()
    }

    /// Poll until `token` is cancelled.
    ///
    /// A cancelled capture ends the loop; every other failure is logged and
    /// the next poll proceeds.
    pub fn run(&mut self, token: &CancellationToken) -> Result<()> {
        info!(
            pattern = %self.pattern,
            interval_secs = self.poll_interval.as_secs(),
            "Reaper started"
        );
        while !token.is_cancelled() {
            match self.poll_once(token) {
                Ok(summary) => debug!(?summary, "Poll complete"),
                Err(ReaperError::Cancelled) => break,
                Err(e) => error!("Poll failed: {}", e),
            }
            token.sleep(self.poll_interval);
        }
        Ok(())
    }

    /// One scan, classify and capture pass.
    pub fn poll_once(&mut self, token: &CancellationToken) -> Result<PollSummary> {
        let watermark = self.checkpoint.current();
        let mut candidates = scan_candidates(&self.data_path, &self.pattern)?;
        candidates.retain(|c| c.mtime >= watermark);
        // Capture order is modification-time order
        candidates.sort_by(|a, b| a.mtime.cmp(&b.mtime).then_with(|| a.path.cmp(&b.path)));

        let mut summary = PollSummary {
            candidates: candidates.len(),
            ..Default::default()
        };

        if candidates.is_empty() {
            warn!("No matching files found (or error while checking for files)");
            return Ok(summary);
        }

        // After a failure, later candidates wait so the checkpoint never
        // passes a file that still needs capture.
        let mut blocked = false;
        for candidate in candidates.iter_mut() {
            match self.tracker.classify(candidate) {
                Classification::Discovered => {
                    info!("Discovered {}", candidate);
                    REAPER_METRICS.inc_discovered();
                    summary.discovered += 1;
                }
                Classification::Monitoring => {
                    info!("Monitoring {}", candidate);
                    summary.monitoring += 1;
                }
                Classification::AlreadyCaptured => {
                    debug!("Captured   {}", candidate);
                }
                Classification::Stable if blocked => {
                    debug!("Deferred   {}", candidate);
                    summary.deferred += 1;
                }
                Classification::Stable => match self.capture(candidate, token)? {
                    CaptureOutcome::Captured(dir) => {
                        candidate.needs_capture = false;
                        REAPER_METRICS.inc_captured();
                        summary.captured += 1;
                        debug!(dir = %dir.display(), "Published capture");
                        if let Err(e) = self.checkpoint.advance(candidate.mtime) {
                            error!(
                                path = %self.checkpoint.path().display(),
                                "Failed to write checkpoint: {}", e
                            );
                        }
                    }
                    CaptureOutcome::Filtered => {
                        candidate.needs_capture = false;
                        REAPER_METRICS.inc_skipped();
                        summary.skipped += 1;
                    }
                    CaptureOutcome::Failed(e) => {
                        warn!("Error while reaping {}: {}", candidate, e);
                        REAPER_METRICS.inc_failed();
                        summary.failed += 1;
                        blocked = true;
                    }
                },
            }
        }

        self.tracker.replace(&candidates);
        Ok(summary)
    }

    /// Parse, filter and stage one stable candidate.
    ///
    /// Only cancellation is returned as an error.
    fn capture(
        &self,
        candidate: &ReapCandidate,
        token: &CancellationToken,
    ) -> Result<CaptureOutcome> {
        let header = match self.parser.parse(&candidate.path) {
            Ok(header) => header,
            Err(e) => return Ok(CaptureOutcome::Failed(e)),
        };
        let label = format!("{} {}", candidate, header);

        if let Some(filter) = &self.filter {
            if !filter.matches(&header.patient_id) {
                info!(filter = filter.as_str(), "Skipping   {} due to patient ID mismatch", label);
                return Ok(CaptureOutcome::Filtered);
            }
        }

        info!("Reaping    {}", label);
        match self
            .stager
            .capture(&candidate.path, &header.series_uid, token)
        {
            Ok(dir) => {
                info!("Reaped     {}", label);
                Ok(CaptureOutcome::Captured(dir))
            }
            Err(ReaperError::Cancelled) => {
                warn!("Cancelled  {}", label);
                Err(ReaperError::Cancelled)
            }
            Err(e) => Ok(CaptureOutcome::Failed(e)),
        }
    }
}
