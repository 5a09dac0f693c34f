//! # Pipeline Constants
//!
//! Field names, key layouts and default values shared by the splitter, the
//! workers and the cleanup path. Keeping them in one place is what makes the
//! storage keys written by a worker line up with the prefix deleted on
//! completion.

use std::time::Duration;

/// Column every input record must carry.
pub const TICKER_FIELD: &str = "Ticker";

/// Number of indexed price and volume slots attached to each record.
pub const HISTORY_SLOTS: usize = 10;

/// Default number of records per chunk.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Retention window for job counters.
pub const PROGRESS_TTL: Duration = Duration::from_secs(86_400);

/// Status value a completion trigger must carry for cleanup to run.
pub const COMPLETED_STATUS: &str = "COMPLETED";

/// Enrichment fields added to every record.
pub mod fields {
    pub const SECTOR: &str = "Sector";
    pub const VOLUME_AVG: &str = "VolumeAvg";
    pub const PRICE_SMA: &str = "PriceSMA_EUR";
    pub const CURRENCY_USED: &str = "CurrencyUsed";
    pub const UNKNOWN_SECTOR: &str = "Unknown";

    /// `Price_1` .. `Price_10`
    pub fn price(slot: usize) -> String {
        format!("Price_{slot}")
    }

    /// `Volume_1` .. `Volume_10`
    pub fn volume(slot: usize) -> String {
        format!("Volume_{slot}")
    }
}

/// Counter-store and object-store key layouts.
pub mod keys {
    use crate::models::JobId;

    pub fn processed_counter(job_id: &JobId) -> String {
        format!("job:{job_id}:processed")
    }

    pub fn total_counter(job_id: &JobId) -> String {
        format!("job:{job_id}:total")
    }

    /// Prefix under which every enriched chunk of a job is written.
    pub fn job_prefix(processed_prefix: &str, job_id: &JobId) -> String {
        format!("{}/{job_id}/", processed_prefix.trim_end_matches('/'))
    }

    pub fn chunk_object(processed_prefix: &str, job_id: &JobId, chunk_index: u32) -> String {
        format!(
            "{}chunk_{chunk_index}.csv",
            job_prefix(processed_prefix, job_id)
        )
    }

    /// Location a source dataset is moved to once it has been split.
    pub fn inprocessing(inprocessing_prefix: &str, source_key: &str) -> String {
        format!(
            "{}/{}",
            inprocessing_prefix.trim_end_matches('/'),
            source_key.trim_start_matches('/')
        )
    }
}
