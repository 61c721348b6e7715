//! Recognized configuration keys.
//!
//! Construction and the file-path resolution these keys feed are external
//! collaborators; this struct only models the key/value surface the
//! engines read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MIN_PARALLEL_TASKS: u32 = 1;
pub const MAX_PARALLEL_TASKS: u32 = 10;
pub const DEFAULT_PARALLEL_TASKS: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub remote_backup_root_id: Option<String>,
    #[serde(default)]
    pub archive_output_dir: Option<String>,
    #[serde(default)]
    pub temp_work_dir: Option<String>,
    #[serde(default)]
    pub remote_restore_parent_id: Option<String>,
    /// Informational threshold for the scheduling collaborator; not
    /// enforced by the core.
    #[serde(default)]
    pub backup_cycle_hours: Option<u32>,
    #[serde(default = "default_max_parallel_tasks")]
    pub max_parallel_tasks: i64,
    #[serde(default)]
    pub excluded_relative_paths: Vec<String>,
    #[serde(default)]
    pub last_successful_backup_utc: Option<DateTime<Utc>>,
}

fn default_max_parallel_tasks() -> i64 {
    DEFAULT_PARALLEL_TASKS as i64
}

impl Default for Config {
    fn default() -> Self {
        Config {
            remote_backup_root_id: None,
            archive_output_dir: None,
            temp_work_dir: None,
            remote_restore_parent_id: None,
            backup_cycle_hours: None,
            max_parallel_tasks: DEFAULT_PARALLEL_TASKS as i64,
            excluded_relative_paths: Vec::new(),
            last_successful_backup_utc: None,
        }
    }
}

impl Config {
    /// Clamp `max_parallel_tasks` into `[1, 10]` at point of use, so an
    /// out-of-range stored value is corrected on every read rather than
    /// rejected at parse time.
    pub fn clamped_parallel_tasks(&self) -> u32 {
        clamp_parallel_tasks(self.max_parallel_tasks)
    }
}

pub fn clamp_parallel_tasks(requested: i64) -> u32 {
    requested.clamp(MIN_PARALLEL_TASKS as i64, MAX_PARALLEL_TASKS as i64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_boundaries() {
        assert_eq!(clamp_parallel_tasks(0), 1);
        assert_eq!(clamp_parallel_tasks(-1), 1);
        assert_eq!(clamp_parallel_tasks(11), 10);
        assert_eq!(clamp_parallel_tasks(1_000_000), 10);
        assert_eq!(clamp_parallel_tasks(5), 5);
    }

    #[test]
    fn test_default_is_one() {
        assert_eq!(Config::default().clamped_parallel_tasks(), 1);
    }
}
