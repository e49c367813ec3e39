use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Failure record for an ad session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayFailure {
    /// Timestamp in "MM-DD-YY HH:MM" format.
    pub t: String,
    /// Campaign name.
    pub campaign: String,
    /// Error description (e.g. "speech provider returned no audio").
    pub err: String,
}

/// Play data: campaign_name -> date_str -> vec of hour integers.
pub type PlayData = HashMap<String, HashMap<String, Vec<u8>>>;

/// Summary statistics over the play log.
#[derive(Debug, Clone, Serialize)]
pub struct PlayStatistics {
    pub total_plays: usize,
    /// (campaign name, play count), sorted descending by count.
    pub per_campaign: Vec<(String, usize)>,
}

const MAX_FAILURES: usize = 50;

/// JSON-based play statistics logger.
///
/// Records every completed ad play (per-campaign, per-date, per-hour) and
/// the most recent session failures. Loads from disk on each operation and
/// saves after mutations.
pub struct PlayLogger {
    plays_path: PathBuf,
    failures_path: PathBuf,
}

impl PlayLogger {
    /// Create a new logger storing files in the given directory.
    pub fn new(directory: &Path) -> Self {
        Self {
            plays_path: directory.join("ad_plays.json"),
            failures_path: directory.join("ad_failures.json"),
        }
    }

    /// Record a play for the given campaign at the current date and hour.
    pub fn log_play(&self, campaign_name: &str) {
        let now = Local::now();
        let date_key = now.format("%m-%d-%y").to_string();
        let hour = now.format("%H").to_string().parse::<u8>().unwrap_or(0);
        self.log_play_at(campaign_name, &date_key, hour);
    }

    /// Record a play at a specific date and hour (for testing).
    pub fn log_play_at(&self, campaign_name: &str, date_key: &str, hour: u8) {
        let mut data = self.load_plays();
        data.entry(campaign_name.to_string())
            .or_default()
            .entry(date_key.to_string())
            .or_default()
            .push(hour);
        self.save_plays(&data);
    }

    /// Record a failure. Trims to MAX_FAILURES (oldest discarded).
    pub fn log_failure(&self, campaign_name: &str, error: &str) {
        let timestamp = Local::now().format("%m-%d-%y %H:%M").to_string();

        let mut failures = self.load_failures();
        failures.push(PlayFailure {
            t: timestamp,
            campaign: campaign_name.to_string(),
            err: error.to_string(),
        });
        if failures.len() > MAX_FAILURES {
            let excess = failures.len() - MAX_FAILURES;
            failures.drain(..excess);
        }
        self.save_failures(&failures);
    }

    /// Summary statistics: total plays and per-campaign counts.
    pub fn get_statistics(&self) -> PlayStatistics {
        let data = self.load_plays();
        let mut per_campaign: Vec<(String, usize)> = data
            .iter()
            .map(|(name, dates)| {
                let count = dates.values().map(Vec::len).sum();
                (name.clone(), count)
            })
            .collect();
        per_campaign.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        PlayStatistics {
            total_plays: per_campaign.iter().map(|(_, n)| n).sum(),
            per_campaign,
        }
    }

    /// Sorted play hours for a campaign on a specific date.
    pub fn get_play_hours_for_date(&self, campaign_name: &str, date_str: &str) -> Vec<u8> {
        let data = self.load_plays();
        let mut hours = data
            .get(campaign_name)
            .and_then(|dates| dates.get(date_str))
            .cloned()
            .unwrap_or_default();
        hours.sort();
        hours
    }

    /// All recorded failure records, oldest first.
    pub fn get_failures(&self) -> Vec<PlayFailure> {
        self.load_failures()
    }

    fn load_plays(&self) -> PlayData {
        std::fs::read_to_string(&self.plays_path)
            .ok()
            .and_then(|data| serde_json::from_str(&data).ok())
            .unwrap_or_default()
    }

    fn save_plays(&self, data: &PlayData) {
        if let Ok(json) = serde_json::to_string_pretty(data) {
            if let Err(e) = std::fs::write(&self.plays_path, json) {
                eprintln!("[play_log] could not write play log: {}", e);
            }
        }
    }

    fn load_failures(&self) -> Vec<PlayFailure> {
        std::fs::read_to_string(&self.failures_path)
            .ok()
            .and_then(|data| serde_json::from_str(&data).ok())
            .unwrap_or_default()
    }

    fn save_failures(&self, failures: &[PlayFailure]) {
        if let Ok(json) = serde_json::to_string_pretty(failures) {
            if let Err(e) = std::fs::write(&self.failures_path, json) {
                eprintln!("[play_log] could not write failure log: {}", e);
            }
        }
    }
}
