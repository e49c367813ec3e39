use crate::campaign::Campaign;
use crate::station::{Station, find_station};
use crate::synth::VOICE_NAMES;
use crate::volume::VolumeSettings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const STATE_FILE: &str = "storecast_state.json";

/// Persisted operator state: campaigns, volume settings, and the selected
/// station. This is the simple data-entry side of the system; the scheduler
/// only sees it through snapshot and acknowledgement callbacks.
#[derive(Debug, Serialize, Deserialize)]
pub struct Engine {
    pub campaigns: Vec<Campaign>,
    #[serde(default)]
    pub volumes: VolumeSettings,
    #[serde(default)]
    pub selected_station_id: Option<String>,
}

impl Engine {
    pub fn new() -> Self {
        Engine {
            campaigns: Vec::new(),
            volumes: VolumeSettings::default(),
            selected_station_id: Some("lofi".to_string()),
        }
    }

    /// First-run state with a couple of example campaigns.
    pub fn seeded() -> Self {
        let mut engine = Engine::new();
        engine.campaigns.push(Campaign::new(
            "Flash Sale".to_string(),
            "Attention shoppers! Flash sale in the beverage aisle. Cold drinks at half price for the next thirty minutes. Don't miss it!"
                .to_string(),
            "Fenrir".to_string(),
            5,
        ));
        let mut closing = Campaign::new(
            "Closing Hours".to_string(),
            "A reminder that our store closes at ten pm. Please bring your final purchases to the checkout."
                .to_string(),
            "Kore".to_string(),
            15,
        );
        closing.active = false;
        engine.campaigns.push(closing);
        engine
    }

    /// Load state from the default file, or seed a fresh instance.
    pub fn load() -> Self {
        Self::load_from(Path::new(STATE_FILE))
    }

    /// Load state from a specific path. Missing file means first run.
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(data) => match serde_json::from_str(&data) {
                    Ok(engine) => return engine,
                    Err(e) => eprintln!("Warning: corrupt state file, starting fresh: {}", e),
                },
                Err(e) => eprintln!("Warning: could not read state file: {}", e),
            }
            return Engine::new();
        }
        Engine::seeded()
    }

    /// Persist current state to the default file.
    pub fn save(&self) -> Result<(), String> {
        self.save_to(Path::new(STATE_FILE))
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        let json =
            serde_json::to_string_pretty(self).map_err(|e| format!("Serialize error: {}", e))?;
        fs::write(path, json).map_err(|e| format!("Write error: {}", e))?;
        Ok(())
    }

    /// Create a campaign. Returns its id.
    pub fn add_campaign(
        &mut self,
        name: String,
        text: String,
        voice_name: String,
        interval_minutes: u32,
    ) -> Result<String, String> {
        if !VOICE_NAMES.contains(&voice_name.as_str()) {
            return Err(format!(
                "Unknown voice '{}' (available: {})",
                voice_name,
                VOICE_NAMES.join(", ")
            ));
        }
        let campaign = Campaign::new(name, text, voice_name, interval_minutes);
        campaign.validate()?;
        let id = campaign.id.clone();
        self.campaigns.push(campaign);
        Ok(id)
    }

    pub fn find_campaign(&self, id: &str) -> Option<&Campaign> {
        self.campaigns.iter().find(|c| c.id == id)
    }

    fn find_campaign_mut(&mut self, id: &str) -> Result<&mut Campaign, String> {
        self.campaigns
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| format!("Campaign '{}' not found", id))
    }

    pub fn set_campaign_active(&mut self, id: &str, active: bool) -> Result<(), String> {
        self.find_campaign_mut(id)?.active = active;
        Ok(())
    }

    pub fn remove_campaign(&mut self, id: &str) -> Result<(), String> {
        let before = self.campaigns.len();
        self.campaigns.retain(|c| c.id != id);
        if self.campaigns.len() == before {
            return Err(format!("Campaign '{}' not found", id));
        }
        Ok(())
    }

    /// Acknowledge a successful play.
    pub fn mark_played(&mut self, id: &str, played_at: DateTime<Utc>) {
        if let Some(campaign) = self.campaigns.iter_mut().find(|c| c.id == id) {
            campaign.last_played_at = Some(played_at);
        }
    }

    /// Select a built-in station, or `None` to turn the radio off.
    /// Returns the resolved station for convenience.
    pub fn set_station(&mut self, id: Option<&str>) -> Result<Option<Station>, String> {
        match id {
            None => {
                self.selected_station_id = None;
                Ok(None)
            }
            Some(id) => {
                let station =
                    find_station(id).ok_or_else(|| format!("Unknown station '{}'", id))?;
                self.selected_station_id = Some(station.id.clone());
                Ok(Some(station))
            }
        }
    }

    pub fn selected_station(&self) -> Option<Station> {
        self.selected_station_id
            .as_deref()
            .and_then(find_station)
    }

    pub fn set_music_volume(&mut self, level: f32) {
        self.volumes.music = level.clamp(0.0, 1.0);
    }

    pub fn set_ads_volume(&mut self, level: f32) {
        self.volumes.ads = level.clamp(0.0, 1.0);
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn seeded_state_has_sample_campaigns() {
        let engine = Engine::seeded();
        assert_eq!(engine.campaigns.len(), 2);
        assert!(engine.campaigns[0].active);
        assert!(!engine.campaigns[1].active);
        assert_eq!(engine.selected_station_id.as_deref(), Some("lofi"));
    }

    #[test]
    fn add_campaign_assigns_unique_ids() {
        let mut engine = Engine::new();
        let a = engine
            .add_campaign("A".into(), "text a".into(), "Kore".into(), 5)
            .unwrap();
        let b = engine
            .add_campaign("B".into(), "text b".into(), "Puck".into(), 10)
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(engine.campaigns.len(), 2);
    }

    #[test]
    fn add_campaign_rejects_unknown_voice() {
        let mut engine = Engine::new();
        let result = engine.add_campaign("A".into(), "text".into(), "Hal9000".into(), 5);
        assert!(result.unwrap_err().contains("Unknown voice"));
    }

    #[test]
    fn add_campaign_rejects_invalid_fields() {
        let mut engine = Engine::new();
        assert!(engine
            .add_campaign("A".into(), "  ".into(), "Kore".into(), 5)
            .is_err());
        assert!(engine
            .add_campaign("A".into(), "text".into(), "Kore".into(), 0)
            .is_err());
    }

    #[test]
    fn set_campaign_active_toggles() {
        let mut engine = Engine::new();
        let id = engine
            .add_campaign("A".into(), "text".into(), "Kore".into(), 5)
            .unwrap();
        engine.set_campaign_active(&id, false).unwrap();
        assert!(!engine.find_campaign(&id).unwrap().active);
        engine.set_campaign_active(&id, true).unwrap();
        assert!(engine.find_campaign(&id).unwrap().active);
    }

    #[test]
    fn operations_on_unknown_campaign_error() {
        let mut engine = Engine::new();
        assert!(engine.set_campaign_active("ghost", true).is_err());
        assert!(engine.remove_campaign("ghost").is_err());
    }

    #[test]
    fn mark_played_sets_timestamp() {
        let mut engine = Engine::new();
        let id = engine
            .add_campaign("A".into(), "text".into(), "Kore".into(), 5)
            .unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        engine.mark_played(&id, ts);
        assert_eq!(engine.find_campaign(&id).unwrap().last_played_at, Some(ts));
    }

    #[test]
    fn station_selection_validates_catalog() {
        let mut engine = Engine::new();
        assert!(engine.set_station(Some("jazz-lounge")).is_ok());
        assert_eq!(engine.selected_station().unwrap().id, "jazz-lounge");
        assert!(engine.set_station(Some("pirate-fm")).is_err());
        // Failed selection leaves the previous one in place
        assert_eq!(engine.selected_station().unwrap().id, "jazz-lounge");
        engine.set_station(None).unwrap();
        assert!(engine.selected_station().is_none());
    }

    #[test]
    fn volume_setters_clamp() {
        let mut engine = Engine::new();
        engine.set_music_volume(1.8);
        engine.set_ads_volume(-0.5);
        assert_eq!(engine.volumes.music, 1.0);
        assert_eq!(engine.volumes.ads, 0.0);
    }

    #[test]
    fn state_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut engine = Engine::new();
        let id = engine
            .add_campaign("A".into(), "text".into(), "Zephyr".into(), 7)
            .unwrap();
        engine.set_music_volume(0.3);
        engine.set_station(Some("pop")).unwrap();
        engine.save_to(&path).unwrap();

        let loaded = Engine::load_from(&path);
        assert_eq!(loaded.campaigns.len(), 1);
        assert_eq!(loaded.find_campaign(&id).unwrap().voice_name, "Zephyr");
        assert_eq!(loaded.volumes.music, 0.3);
        assert_eq!(loaded.selected_station_id.as_deref(), Some("pop"));
    }

    #[test]
    fn missing_state_file_seeds_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::load_from(&dir.path().join("nope.json"));
        assert_eq!(engine.campaigns.len(), 2);
    }

    #[test]
    fn corrupt_state_file_starts_fresh_not_seeded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        let engine = Engine::load_from(&path);
        assert!(engine.campaigns.is_empty());
    }

    #[test]
    fn volumes_default_when_missing_from_json() {
        let json = r#"{"campaigns":[]}"#;
        let engine: Engine = serde_json::from_str(json).unwrap();
        assert_eq!(engine.volumes, VolumeSettings::default());
        assert!(engine.selected_station_id.is_none());
    }
}
