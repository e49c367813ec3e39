use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A voice advertisement campaign.
///
/// Owned by the operator's campaign store; the scheduler only reads these
/// records and asks the store to update `last_played_at` after a play.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Campaign {
    /// Opaque unique identifier.
    pub id: String,
    /// Display name of the campaign.
    pub name: String,
    /// Utterance to synthesize.
    pub text: String,
    /// Voice identifier passed to the synthesis provider.
    pub voice_name: String,
    /// Minimum minutes between successive plays. Must be > 0.
    pub interval_minutes: u32,
    /// Inactive campaigns are never selected.
    pub active: bool,
    /// Optional start of the playback window (inclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    /// Optional end of the playback window (exclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    /// Most recent successful play. `None` means never played.
    #[serde(default)]
    pub last_played_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Create a new active campaign with a fresh id and no play history.
    pub fn new(name: String, text: String, voice_name: String, interval_minutes: u32) -> Self {
        Campaign {
            id: generate_id(),
            name,
            text,
            voice_name,
            interval_minutes,
            active: true,
            start_date: None,
            end_date: None,
            last_played_at: None,
        }
    }

    /// Validate fields that the scheduler depends on.
    pub fn validate(&self) -> Result<(), String> {
        if self.text.trim().is_empty() {
            return Err("Campaign text must not be empty".to_string());
        }
        if self.interval_minutes == 0 {
            return Err("Campaign interval must be at least 1 minute".to_string());
        }
        Ok(())
    }

    /// Check whether this campaign may play at the given instant.
    ///
    /// Rules:
    /// 1. Must be active.
    /// 2. `end_date`, if set, must be in the future.
    /// 3. `start_date`, if set, must not be in the future.
    /// 4. Never played, or at least `interval_minutes` since the last play.
    pub fn is_eligible_at(&self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        if let Some(end) = self.end_date {
            if end <= now {
                return false;
            }
        }
        if let Some(start) = self.start_date {
            if start > now {
                return false;
            }
        }
        match self.last_played_at {
            None => true,
            Some(last) => now - last >= Duration::minutes(i64::from(self.interval_minutes)),
        }
    }
}

/// Select the next campaign due for playback at `now`.
///
/// Scans in stored order and returns the first eligible campaign; stable
/// order is the tie-break, there is no priority scoring.
pub fn select_due(campaigns: &[Campaign], now: DateTime<Utc>) -> Option<&Campaign> {
    campaigns.iter().find(|c| c.is_eligible_at(now))
}

/// Generate a random 32-hex-character campaign id.
pub fn generate_id() -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut id = String::with_capacity(32);
    for _ in 0..32 {
        id.push(HEX[fastrand::usize(..16)] as char);
    }
    id
}
