//! Counters for retention activity.
//!
//! Recorded through the `metrics` facade when the `metrics` feature is
//! enabled; the embedding application installs whatever recorder it wants.
//! Without the feature every function is a no-op.

#[cfg(feature = "metrics")]
use ::metrics::{counter, histogram};

/// Record the start of a retention cycle.
pub fn record_cycle_started() {
    #[cfg(feature = "metrics")]
    {
        counter!("logwarden_cycles_total").increment(1);
    }
}

/// Record the end of a retention cycle.
pub fn record_cycle_finished(duration_secs: f64, failed: bool) {
    #[cfg(feature = "metrics")]
    {
        let status = if failed { "error" } else { "ok" };
        histogram!("logwarden_cycle_duration_seconds", "status" => status).record(duration_secs);
    }
    #[cfg(not(feature = "metrics"))]
    {
        let _ = (duration_secs, failed);
    }
}

/// Record a cycle trigger that was dropped because a cycle was still running.
pub fn record_trigger_skipped() {
    #[cfg(feature = "metrics")]
    {
        counter!("logwarden_triggers_skipped_total").increment(1);
    }
}

/// Record a committed archive and the number of files moved into it.
pub fn record_archive_written(files: u64) {
    #[cfg(feature = "metrics")]
    {
        counter!("logwarden_archives_written_total").increment(1);
        counter!("logwarden_files_archived_total").increment(files);
    }
    #[cfg(not(feature = "metrics"))]
    {
        let _ = files;
    }
}

/// Record expired archives removed by pruning.
pub fn record_archives_pruned(count: u64) {
    #[cfg(feature = "metrics")]
    {
        counter!("logwarden_archives_pruned_total").increment(count);
    }
    #[cfg(not(feature = "metrics"))]
    {
        let _ = count;
    }
}

/// Record a failure, labelled by the cycle phase it happened in.
pub fn record_cycle_error(phase: &str) {
    #[cfg(feature = "metrics")]
    {
        counter!("logwarden_cycle_errors_total", "phase" => phase.to_string()).increment(1);
    }
    #[cfg(not(feature = "metrics"))]
    {
        let _ = phase;
    }
}
