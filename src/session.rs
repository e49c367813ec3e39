//! One in-flight ad transmission, from admission to volume restoration.
//!
//! The session is an explicit state machine owned by the scheduler; every
//! transition re-reads live volume settings instead of trusting values
//! captured at admission, so slider changes during an ad still take effect.

use crate::campaign::Campaign;
use crate::player::AdOutput;
use crate::stream::StreamController;
use crate::synth::{AudioClip, SynthesisError};
use crate::volume::VolumeSettings;
use std::time::{Duration, Instant};

/// Lifecycle of a single ad transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Background volume ramping toward the ducked level.
    Ducking,
    /// Waiting on the speech provider (the duck ramp keeps running).
    Synthesizing,
    /// Ad audio playing on the dedicated output.
    Playing,
    /// Playback done: holding the ducked level, then ramping back up.
    Restoring,
    Done,
    Failed,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Done | SessionPhase::Failed)
    }
}

/// Outcome of a session step, for the scheduler to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNote {
    /// Ad audio finished; the restore hold has begun.
    EnteredRestore,
    /// Session finished cleanly; the campaign should be acknowledged.
    Completed,
    /// Session aborted; volume was restored, campaign stays unacknowledged.
    Failed(String),
}

pub struct AdSession {
    pub campaign_id: String,
    pub campaign_name: String,
    /// Matches a synthesis result to the session that requested it.
    pub generation: u64,
    phase: SessionPhase,
    started_at: Instant,
    ducked: bool,
    hold_until: Option<Instant>,
    restore_ramping: bool,
}

impl AdSession {
    /// Admit a campaign. When a background source is selected, start the
    /// duck ramp; either way the session is immediately ready for its
    /// synthesis request — ducking and synthesis proceed in parallel.
    pub fn begin(
        campaign: &Campaign,
        generation: u64,
        stream: &mut StreamController,
        volumes: VolumeSettings,
        duck_ratio: f32,
        now: Instant,
    ) -> AdSession {
        let mut session = AdSession {
            campaign_id: campaign.id.clone(),
            campaign_name: campaign.name.clone(),
            generation,
            phase: SessionPhase::Ducking,
            started_at: now,
            ducked: false,
            hold_until: None,
            restore_ramping: false,
        };
        if stream.has_source() {
            let ducked_level = (volumes.music * duck_ratio).clamp(0.0, 1.0);
            stream.ramp_volume_to(ducked_level, now);
            session.ducked = true;
        }
        session.phase = SessionPhase::Synthesizing;
        session
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn is_ducked(&self) -> bool {
        self.ducked
    }

    /// True while the final restore ramp is running.
    pub fn restore_ramping(&self) -> bool {
        self.restore_ramping
    }

    /// Deliver the synthesis result. On success the clip plays at the live
    /// ads gain; on failure the session aborts with an immediate (no-fade)
    /// volume restore. Results for a phase the session already left are
    /// ignored.
    pub fn on_synthesis(
        &mut self,
        result: Result<AudioClip, SynthesisError>,
        ad_output: &mut dyn AdOutput,
        stream: &mut StreamController,
        volumes: VolumeSettings,
    ) -> Option<SessionNote> {
        if self.phase != SessionPhase::Synthesizing {
            return None;
        }
        match result {
            Ok(clip) => match ad_output.play(&clip, volumes.ads) {
                Ok(()) => {
                    self.phase = SessionPhase::Playing;
                    None
                }
                Err(e) => Some(self.fail(
                    ad_output,
                    stream,
                    volumes,
                    format!("Audio engine error: {}", e),
                )),
            },
            Err(e) => Some(self.fail(ad_output, stream, volumes, e.to_string())),
        }
    }

    /// Advance time-driven transitions: end of playback, the restore hold,
    /// and completion of the restore ramp.
    pub fn tick(
        &mut self,
        now: Instant,
        ad_output: &mut dyn AdOutput,
        stream: &mut StreamController,
        volumes: VolumeSettings,
        restore_hold: Duration,
    ) -> Option<SessionNote> {
        match self.phase {
            SessionPhase::Playing => {
                if ad_output.is_finished() {
                    self.phase = SessionPhase::Restoring;
                    self.hold_until = Some(now + restore_hold);
                    Some(SessionNote::EnteredRestore)
                } else {
                    None
                }
            }
            SessionPhase::Restoring => {
                if self.restore_ramping {
                    if stream.ramp_active() {
                        None
                    } else {
                        self.phase = SessionPhase::Done;
                        Some(SessionNote::Completed)
                    }
                } else if self.hold_until.is_some_and(|t| now >= t) {
                    if self.ducked && stream.has_source() {
                        // Target is the music volume as configured right now
                        stream.ramp_volume_to(volumes.music, now);
                        self.restore_ramping = true;
                        None
                    } else {
                        stream.set_volume(volumes.music);
                        self.phase = SessionPhase::Done;
                        Some(SessionNote::Completed)
                    }
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Abort from any non-terminal phase: stop ad audio and restore the
    /// background volume immediately, with no fade.
    pub fn fail(
        &mut self,
        ad_output: &mut dyn AdOutput,
        stream: &mut StreamController,
        volumes: VolumeSettings,
        reason: String,
    ) -> SessionNote {
        self.phase = SessionPhase::Failed;
        ad_output.stop();
        stream.set_volume(volumes.music);
        SessionNote::Failed(reason)
    }
}
