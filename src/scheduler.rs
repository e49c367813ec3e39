//! DueAdScheduler — scans the campaign list on a fixed cadence, admits at
//! most one ad session at a time, and owns the background stream around it.
//!
//! All state lives on one dedicated thread. Operator commands and synthesis
//! worker results arrive as `SchedulerMsg` values on a single channel, so
//! every transition happens on one timeline and the single-flight invariant
//! is a plain field, not a lock. The campaign store and volume settings are
//! reached through callbacks and re-read at every point of use.

use crate::campaign::{Campaign, select_due};
use crate::player::{AdOutput, AudioEngine, EngineFactory};
use crate::session::{AdSession, SessionNote};
use crate::station::Station;
use crate::stream::StreamController;
use crate::synth::{AudioClip, SpeechSynthesizer, SynthesisError};
use crate::volume::VolumeSettings;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Tunable timings and levels. Defaults are the reference values; treat
/// them as configuration, not law.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the campaign list is scanned for a due ad.
    pub scan_interval: Duration,
    /// Loop receive timeout; bounds the resolution of ramps and holds.
    pub tick_interval: Duration,
    /// Fraction of the music volume used while an ad plays.
    pub duck_ratio: f32,
    /// How long the ducked level is held after ad audio ends.
    pub restore_hold: Duration,
    /// Delay before the single stream reconnect attempt.
    pub reconnect_delay: Duration,
    /// Absolute gain change per ramp step.
    pub ramp_step: f32,
    /// Interval between ramp steps.
    pub ramp_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            scan_interval: Duration::from_secs(5),
            tick_interval: Duration::from_millis(25),
            duck_ratio: 0.2,
            restore_hold: Duration::from_secs(2),
            reconnect_delay: Duration::from_secs(3),
            ramp_step: crate::volume::DEFAULT_RAMP_STEP,
            ramp_interval: crate::volume::DEFAULT_RAMP_INTERVAL,
        }
    }
}

/// Messages handled by the scheduler thread.
pub enum SchedulerMsg {
    /// Operator started the system: init the audio engine if needed and
    /// begin scanning.
    Start,
    /// Operator paused the system: stop scanning, pause the stream. An
    /// in-flight session still runs to completion.
    Stop,
    /// Switch the background source; `None` turns the radio off.
    SetSource(Option<Station>),
    /// Volume settings changed; reapply the live values.
    VolumesChanged,
    /// Manual "play now". The token makes re-delivery a no-op.
    PlayNow { campaign_id: String, token: u64 },
    /// Synthesis worker finished.
    SynthReady {
        generation: u64,
        result: Result<AudioClip, SynthesisError>,
    },
    Shutdown,
}

/// Notifications emitted back to the operator surface.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    Status(String),
    AdStarted {
        campaign_id: String,
        name: String,
    },
    AdFinished {
        campaign_id: String,
        name: String,
    },
    AdFailed {
        campaign_id: String,
        name: String,
        reason: String,
    },
}

/// Hooks into the campaign store and operator surface. Campaigns and
/// volumes are fetched fresh on every use, never cached.
pub struct SchedulerCallbacks {
    pub get_campaigns: Box<dyn Fn() -> Vec<Campaign> + Send>,
    pub get_volumes: Box<dyn Fn() -> VolumeSettings + Send>,
    pub on_ad_played: Box<dyn Fn(&str, DateTime<Utc>) + Send>,
    pub on_event: Box<dyn Fn(SchedulerEvent) + Send>,
}

/// A synthesis job to hand to a worker thread.
pub struct SynthRequest {
    pub generation: u64,
    pub text: String,
    pub voice_name: String,
}

/// The scheduler state machine. Driven by `handle_msg` and `tick`; never
/// blocks and never sleeps.
pub struct SchedulerCore {
    config: SchedulerConfig,
    callbacks: SchedulerCallbacks,
    engine_factory: EngineFactory,
    engine: Option<Box<dyn AudioEngine>>,
    ad_output: Option<Box<dyn AdOutput>>,
    stream: StreamController,
    session: Option<AdSession>,
    pending_synth: Option<SynthRequest>,
    running: bool,
    next_scan: Instant,
    last_manual_token: u64,
    next_generation: u64,
}

impl SchedulerCore {
    pub fn new(
        config: SchedulerConfig,
        callbacks: SchedulerCallbacks,
        engine_factory: EngineFactory,
        now: Instant,
    ) -> Self {
        let volumes = (callbacks.get_volumes)().clamped();
        let stream = StreamController::new(
            volumes.music,
            config.ramp_step,
            config.ramp_interval,
            config.reconnect_delay,
        );
        SchedulerCore {
            config,
            callbacks,
            engine_factory,
            engine: None,
            ad_output: None,
            stream,
            session: None,
            pending_synth: None,
            running: false,
            next_scan: now,
            last_manual_token: 0,
            next_generation: 1,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn has_active_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn stream(&self) -> &StreamController {
        &self.stream
    }

    /// Hand out the queued synthesis job, if any. The driver dispatches it
    /// to a worker and posts the result back as `SynthReady`.
    pub fn take_synth_request(&mut self) -> Option<SynthRequest> {
        self.pending_synth.take()
    }

    pub fn handle_msg(&mut self, msg: SchedulerMsg, now: Instant, wall: DateTime<Utc>) {
        match msg {
            SchedulerMsg::Start => self.handle_start(now),
            SchedulerMsg::Stop => {
                if self.running {
                    self.running = false;
                    self.stream.set_running(false);
                    self.status("System paused.");
                }
            }
            SchedulerMsg::SetSource(station) => {
                for status in self.stream.set_source(station) {
                    self.status(status.to_string());
                }
            }
            SchedulerMsg::VolumesChanged => self.apply_volumes(now),
            SchedulerMsg::PlayNow { campaign_id, token } => {
                self.handle_play_now(&campaign_id, token, now);
            }
            SchedulerMsg::SynthReady { generation, result } => {
                self.handle_synth_ready(generation, result, wall);
            }
            SchedulerMsg::Shutdown => self.shutdown(),
        }
    }

    /// Advance ramps, the reconnect policy, the active session, and the
    /// scan cadence.
    pub fn tick(&mut self, now: Instant, wall: DateTime<Utc>) {
        for status in self.stream.tick(now) {
            self.status(status.to_string());
        }

        if let Some(mut session) = self.session.take() {
            let volumes = (self.callbacks.get_volumes)().clamped();
            let note = match &mut self.ad_output {
                Some(out) => session.tick(
                    now,
                    out.as_mut(),
                    &mut self.stream,
                    volumes,
                    self.config.restore_hold,
                ),
                None => {
                    self.stream.set_volume(volumes.music);
                    Some(SessionNote::Failed("audio engine lost".to_string()))
                }
            };
            self.resolve_session(session, note, wall);
        }

        if self.running
            && self.session.is_none()
            && self.engine.is_some()
            && now >= self.next_scan
        {
            self.next_scan = now + self.config.scan_interval;
            let campaigns = (self.callbacks.get_campaigns)();
            if let Some(campaign) = select_due(&campaigns, wall) {
                let campaign = campaign.clone();
                self.admit(&campaign, now);
            }
        }
    }

    pub fn shutdown(&mut self) {
        if let Some(mut session) = self.session.take() {
            let volumes = (self.callbacks.get_volumes)().clamped();
            if let Some(out) = &mut self.ad_output {
                session.fail(
                    out.as_mut(),
                    &mut self.stream,
                    volumes,
                    "shutting down".to_string(),
                );
            }
        }
        if let Some(out) = &mut self.ad_output {
            out.stop();
        }
        self.running = false;
        self.stream.set_running(false);
    }

    fn handle_start(&mut self, now: Instant) {
        if self.engine.is_none() {
            match (self.engine_factory)() {
                Ok(mut engine) => {
                    let stream_out = engine.create_stream_output();
                    let ad_out = engine.create_ad_output();
                    match (stream_out, ad_out) {
                        (Ok(stream_out), Ok(ad_out)) => {
                            self.stream.attach(stream_out);
                            self.ad_output = Some(ad_out);
                            self.engine = Some(engine);
                        }
                        (Err(e), _) | (_, Err(e)) => {
                            self.status(format!("Audio engine unavailable: {}", e));
                            return;
                        }
                    }
                }
                Err(e) => {
                    self.status(format!("Audio engine unavailable: {}", e));
                    return;
                }
            }
        }
        self.running = true;
        self.next_scan = now;
        for status in self.stream.set_running(true) {
            self.status(status.to_string());
        }
    }

    fn handle_play_now(&mut self, campaign_id: &str, token: u64, now: Instant) {
        // Record the token before any rejection so a re-delivered request
        // stays a no-op regardless of what happens to this one.
        if token == self.last_manual_token {
            return;
        }
        self.last_manual_token = token;

        if self.engine.is_none() {
            self.status("Start the system first.");
            return;
        }
        if self.session.is_some() {
            // Session conflict: silently dropped
            return;
        }
        let campaigns = (self.callbacks.get_campaigns)();
        let Some(campaign) = campaigns.iter().find(|c| c.id == campaign_id) else {
            return;
        };
        let campaign = campaign.clone();
        self.admit(&campaign, now);
    }

    fn handle_synth_ready(
        &mut self,
        generation: u64,
        result: Result<AudioClip, SynthesisError>,
        wall: DateTime<Utc>,
    ) {
        let Some(mut session) = self.session.take() else {
            // Session already resolved; the late result is ignored.
            return;
        };
        if session.generation != generation {
            self.session = Some(session);
            return;
        }
        let volumes = (self.callbacks.get_volumes)().clamped();
        let note = match &mut self.ad_output {
            Some(out) => session.on_synthesis(result, out.as_mut(), &mut self.stream, volumes),
            None => {
                self.stream.set_volume(volumes.music);
                Some(SessionNote::Failed("audio engine lost".to_string()))
            }
        };
        self.resolve_session(session, note, wall);
    }

    fn resolve_session(
        &mut self,
        session: AdSession,
        note: Option<SessionNote>,
        wall: DateTime<Utc>,
    ) {
        match note {
            Some(SessionNote::EnteredRestore) => {
                self.status("Returning to the program...");
                self.session = Some(session);
            }
            Some(SessionNote::Completed) => {
                (self.callbacks.on_ad_played)(&session.campaign_id, wall);
                self.emit(SchedulerEvent::AdFinished {
                    campaign_id: session.campaign_id,
                    name: session.campaign_name,
                });
            }
            Some(SessionNote::Failed(reason)) => {
                eprintln!(
                    "[scheduler] ad '{}' failed: {}",
                    session.campaign_name, reason
                );
                self.emit(SchedulerEvent::AdFailed {
                    campaign_id: session.campaign_id,
                    name: session.campaign_name,
                    reason,
                });
            }
            None => self.session = Some(session),
        }
    }

    fn admit(&mut self, campaign: &Campaign, now: Instant) {
        let generation = self.next_generation;
        self.next_generation += 1;
        let volumes = (self.callbacks.get_volumes)().clamped();
        let session = AdSession::begin(
            campaign,
            generation,
            &mut self.stream,
            volumes,
            self.config.duck_ratio,
            now,
        );
        self.pending_synth = Some(SynthRequest {
            generation,
            text: campaign.text.clone(),
            voice_name: campaign.voice_name.clone(),
        });
        self.status(format!("Broadcasting: {}...", campaign.name));
        self.emit(SchedulerEvent::AdStarted {
            campaign_id: campaign.id.clone(),
            name: campaign.name.clone(),
        });
        self.session = Some(session);
    }

    /// Reapply the live volume settings, respecting the ducking state.
    fn apply_volumes(&mut self, now: Instant) {
        let volumes = (self.callbacks.get_volumes)().clamped();
        match &self.session {
            Some(s) if s.restore_ramping() => {
                // Restart the restore ramp toward the new live target
                self.stream.ramp_volume_to(volumes.music, now);
            }
            Some(s) if s.is_ducked() && !s.phase().is_terminal() => {
                self.stream
                    .set_volume((volumes.music * self.config.duck_ratio).clamp(0.0, 1.0));
            }
            _ => self.stream.set_volume(volumes.music),
        }
    }

    fn emit(&self, event: SchedulerEvent) {
        (self.callbacks.on_event)(event);
    }

    fn status(&self, message: impl Into<String>) {
        self.emit(SchedulerEvent::Status(message.into()));
    }
}

// ── Runtime ──────────────────────────────────────────────────────────────────

/// Thread-safe handle for sending commands to the scheduler thread.
/// Wraps an `mpsc::Sender`, which is naturally `Send + Sync`.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerMsg>,
}

impl SchedulerHandle {
    pub fn start(&self) {
        let _ = self.tx.send(SchedulerMsg::Start);
    }

    pub fn stop(&self) {
        let _ = self.tx.send(SchedulerMsg::Stop);
    }

    pub fn set_source(&self, station: Option<Station>) {
        let _ = self.tx.send(SchedulerMsg::SetSource(station));
    }

    pub fn volumes_changed(&self) {
        let _ = self.tx.send(SchedulerMsg::VolumesChanged);
    }

    pub fn play_now(&self, campaign_id: impl Into<String>, token: u64) {
        let _ = self.tx.send(SchedulerMsg::PlayNow {
            campaign_id: campaign_id.into(),
            token,
        });
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(SchedulerMsg::Shutdown);
    }
}

/// Spawn the scheduler on a dedicated thread.
///
/// The audio engine is created lazily inside the thread on the first
/// `Start`. Synthesis runs on short-lived worker threads that post their
/// result back into the scheduler channel; the workers never touch
/// scheduler state. Call `shutdown` on the handle to end the thread.
pub fn spawn_scheduler(
    config: SchedulerConfig,
    engine_factory: EngineFactory,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    callbacks: SchedulerCallbacks,
) -> SchedulerHandle {
    let (tx, rx) = mpsc::channel::<SchedulerMsg>();
    let worker_tx = tx.clone();

    std::thread::Builder::new()
        .name("ad-scheduler".into())
        .spawn(move || scheduler_loop(rx, worker_tx, config, engine_factory, synthesizer, callbacks))
        .expect("failed to spawn ad-scheduler thread");

    SchedulerHandle { tx }
}

fn scheduler_loop(
    rx: mpsc::Receiver<SchedulerMsg>,
    worker_tx: mpsc::Sender<SchedulerMsg>,
    config: SchedulerConfig,
    engine_factory: EngineFactory,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    callbacks: SchedulerCallbacks,
) {
    let tick_interval = config.tick_interval;
    let mut core = SchedulerCore::new(config, callbacks, engine_factory, Instant::now());

    loop {
        match rx.recv_timeout(tick_interval) {
            Ok(SchedulerMsg::Shutdown) => {
                core.shutdown();
                break;
            }
            Ok(msg) => core.handle_msg(msg, Instant::now(), Utc::now()),
            Err(mpsc::RecvTimeoutError::Timeout) => core.tick(Instant::now(), Utc::now()),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                core.shutdown();
                break;
            }
        }

        if let Some(request) = core.take_synth_request() {
            let generation = request.generation;
            let synth = synthesizer.clone();
            let reply = worker_tx.clone();
            let spawned = std::thread::Builder::new().name("ad-synth".into()).spawn(
                move || {
                    let result = synth.synthesize(&request.text, &request.voice_name);
                    let _ = reply.send(SchedulerMsg::SynthReady { generation, result });
                },
            );
            if spawned.is_err() {
                core.handle_msg(
                    SchedulerMsg::SynthReady {
                        generation,
                        result: Err(SynthesisError::TransportFailure(
                            "could not spawn synthesis worker".to_string(),
                        )),
                    },
                    Instant::now(),
                    Utc::now(),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{StreamHealth, StreamOutput};
    use chrono::TimeZone;
    use std::sync::Mutex;

    // ── Mock audio backend ──────────────────────────────────────────────

    #[derive(Debug, Default)]
    struct StreamState {
        loads: Vec<String>,
        volumes: Vec<f32>,
    }

    struct MockStreamOutput {
        state: Arc<Mutex<StreamState>>,
    }

    impl StreamOutput for MockStreamOutput {
        fn load(&mut self, url: &str) {
            self.state.lock().unwrap().loads.push(url.to_string());
        }
        fn stop(&mut self) {}
        fn pause(&mut self) {}
        fn resume(&mut self) {}
        fn set_volume(&mut self, gain: f32) {
            self.state.lock().unwrap().volumes.push(gain);
        }
        fn poll(&mut self) -> StreamHealth {
            StreamHealth::Playing
        }
    }

    #[derive(Debug, Default)]
    struct AdState {
        plays: usize,
        gains: Vec<f32>,
        finished: bool,
    }

    struct MockAdOutput {
        state: Arc<Mutex<AdState>>,
    }

    impl AdOutput for MockAdOutput {
        fn play(&mut self, _clip: &AudioClip, gain: f32) -> Result<(), String> {
            let mut s = self.state.lock().unwrap();
            s.plays += 1;
            s.gains.push(gain);
            s.finished = false;
            Ok(())
        }
        fn is_finished(&self) -> bool {
            self.state.lock().unwrap().finished
        }
        fn stop(&mut self) {}
    }

    struct MockEngine {
        stream_state: Arc<Mutex<StreamState>>,
        ad_state: Arc<Mutex<AdState>>,
    }

    impl AudioEngine for MockEngine {
        fn create_stream_output(&mut self) -> Result<Box<dyn StreamOutput>, String> {
            Ok(Box::new(MockStreamOutput {
                state: self.stream_state.clone(),
            }))
        }
        fn create_ad_output(&mut self) -> Result<Box<dyn AdOutput>, String> {
            Ok(Box::new(MockAdOutput {
                state: self.ad_state.clone(),
            }))
        }
    }

    // ── Fixture ─────────────────────────────────────────────────────────

    struct Fixture {
        core: SchedulerCore,
        ad_state: Arc<Mutex<AdState>>,
        campaigns: Arc<Mutex<Vec<Campaign>>>,
        volumes: Arc<Mutex<VolumeSettings>>,
        played: Arc<Mutex<Vec<(String, DateTime<Utc>)>>>,
        events: Arc<Mutex<Vec<SchedulerEvent>>>,
        t0: Instant,
        w0: DateTime<Utc>,
    }

    impl Fixture {
        fn new(campaign_list: Vec<Campaign>) -> Self {
            Self::with_factory_result(campaign_list, true)
        }

        fn with_factory_result(campaign_list: Vec<Campaign>, engine_ok: bool) -> Self {
            let stream_state = Arc::new(Mutex::new(StreamState::default()));
            let ad_state = Arc::new(Mutex::new(AdState::default()));
            let campaigns = Arc::new(Mutex::new(campaign_list));
            let volumes = Arc::new(Mutex::new(VolumeSettings {
                music: 0.8,
                ads: 1.0,
            }));
            let played: Arc<Mutex<Vec<(String, DateTime<Utc>)>>> =
                Arc::new(Mutex::new(Vec::new()));
            let events: Arc<Mutex<Vec<SchedulerEvent>>> = Arc::new(Mutex::new(Vec::new()));

            let callbacks = SchedulerCallbacks {
                get_campaigns: {
                    let campaigns = campaigns.clone();
                    Box::new(move || campaigns.lock().unwrap().clone())
                },
                get_volumes: {
                    let volumes = volumes.clone();
                    Box::new(move || *volumes.lock().unwrap())
                },
                on_ad_played: {
                    let played = played.clone();
                    Box::new(move |id, ts| played.lock().unwrap().push((id.to_string(), ts)))
                },
                on_event: {
                    let events = events.clone();
                    Box::new(move |e| events.lock().unwrap().push(e))
                },
            };

            let factory: EngineFactory = if engine_ok {
                let stream_state = stream_state.clone();
                let ad_state = ad_state.clone();
                Box::new(move || {
                    Ok(Box::new(MockEngine {
                        stream_state: stream_state.clone(),
                        ad_state: ad_state.clone(),
                    }) as Box<dyn AudioEngine>)
                })
            } else {
                Box::new(|| Err("no output device".to_string()))
            };

            let t0 = Instant::now();
            let w0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
            let config = SchedulerConfig::default();
            let core = SchedulerCore::new(config, callbacks, factory, t0);

            Fixture {
                core,
                ad_state,
                campaigns,
                volumes,
                played,
                events,
                t0,
                w0,
            }
        }

        fn started(campaign_list: Vec<Campaign>) -> Self {
            let mut f = Self::new(campaign_list);
            f.core.handle_msg(SchedulerMsg::Start, f.t0, f.w0);
            f
        }

        fn ad_started_count(&self) -> usize {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| matches!(e, SchedulerEvent::AdStarted { .. }))
                .count()
        }

        fn statuses(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    SchedulerEvent::Status(s) => Some(s.clone()),
                    _ => None,
                })
                .collect()
        }

        fn finish_ad_audio(&self) {
            self.ad_state.lock().unwrap().finished = true;
        }

        /// Deliver the pending synthesis request successfully.
        fn deliver_synth(&mut self, at: Instant, wall: DateTime<Utc>) {
            let request = self.core.take_synth_request().expect("no synth pending");
            self.core.handle_msg(
                SchedulerMsg::SynthReady {
                    generation: request.generation,
                    result: Ok(AudioClip {
                        sample_rate: 24_000,
                        channels: 1,
                        samples: vec![0.1; 1024],
                    }),
                },
                at,
                wall,
            );
        }

        /// Tick forward in 50 ms steps until the session resolves.
        fn run_session_out(&mut self, from: Instant, wall: DateTime<Utc>) -> Instant {
            let mut t = from;
            for _ in 0..500 {
                t += Duration::from_millis(50);
                self.core.tick(t, wall);
                if !self.core.has_active_session() {
                    break;
                }
            }
            t
        }
    }

    fn due_campaign(name: &str) -> Campaign {
        Campaign::new(
            name.to_string(),
            format!("{} announcement", name),
            "Kore".to_string(),
            5,
        )
    }

    // ── Tests ───────────────────────────────────────────────────────────

    #[test]
    fn never_played_campaign_is_admitted_on_first_scan() {
        let mut f = Fixture::started(vec![due_campaign("Promo")]);
        f.core.tick(f.t0 + Duration::from_millis(25), f.w0);
        assert_eq!(f.ad_started_count(), 1);
        assert!(f.core.has_active_session());
    }

    #[test]
    fn full_session_acknowledges_campaign_after_playback() {
        let campaign = due_campaign("Promo");
        let id = campaign.id.clone();
        let mut f = Fixture::started(vec![campaign]);

        let t1 = f.t0 + Duration::from_millis(25);
        f.core.tick(t1, f.w0);
        f.deliver_synth(t1, f.w0);
        assert_eq!(f.ad_state.lock().unwrap().plays, 1);

        f.finish_ad_audio();
        let wall_done = f.w0 + chrono::Duration::seconds(10);
        f.run_session_out(t1, wall_done);

        let played = f.played.lock().unwrap();
        assert_eq!(played.len(), 1);
        assert_eq!(played[0].0, id);
        // Played timestamp is taken at completion, never earlier
        assert!(played[0].1 >= wall_done);
        drop(played);

        // Volume restored to the live music setting
        assert!((f.core.stream().current_gain() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn first_eligible_campaign_in_stored_order_wins() {
        let a = due_campaign("A");
        let b = due_campaign("B");
        let mut f = Fixture::started(vec![a, b]);
        f.core.tick(f.t0 + Duration::from_millis(25), f.w0);

        let events = f.events.lock().unwrap();
        let started: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                SchedulerEvent::AdStarted { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(started, vec!["A".to_string()]);
    }

    #[test]
    fn no_second_admission_while_session_is_active() {
        let mut f = Fixture::started(vec![due_campaign("A"), due_campaign("B")]);
        let t1 = f.t0 + Duration::from_millis(25);
        f.core.tick(t1, f.w0);
        assert_eq!(f.ad_started_count(), 1);

        // Scan deadlines keep passing while the ad is in flight
        for i in 1..10 {
            f.core.tick(t1 + Duration::from_secs(6 * i), f.w0);
        }
        assert_eq!(f.ad_started_count(), 1);
    }

    #[test]
    fn scanning_stops_while_paused() {
        let mut f = Fixture::started(vec![due_campaign("Promo")]);
        f.core
            .handle_msg(SchedulerMsg::Stop, f.t0 + Duration::from_millis(5), f.w0);
        f.core.tick(f.t0 + Duration::from_secs(30), f.w0);
        assert_eq!(f.ad_started_count(), 0);
        assert!(f.statuses().contains(&"System paused.".to_string()));
    }

    #[test]
    fn manual_trigger_with_repeated_token_is_a_noop() {
        let campaign = due_campaign("Promo");
        let id = campaign.id.clone();
        // Interval pushed out so the scanner stays quiet
        let mut not_due = campaign;
        not_due.last_played_at = Some(Utc.with_ymd_and_hms(2024, 6, 1, 11, 59, 0).unwrap());
        not_due.interval_minutes = 60;
        let mut f = Fixture::started(vec![not_due]);

        let t1 = f.t0 + Duration::from_millis(5);
        f.core.handle_msg(
            SchedulerMsg::PlayNow {
                campaign_id: id.clone(),
                token: 42,
            },
            t1,
            f.w0,
        );
        assert_eq!(f.ad_started_count(), 1);

        // Same token re-delivered after the session resolved
        f.deliver_synth(t1, f.w0);
        f.finish_ad_audio();
        f.run_session_out(t1, f.w0);
        f.core.handle_msg(
            SchedulerMsg::PlayNow {
                campaign_id: id,
                token: 42,
            },
            t1 + Duration::from_secs(60),
            f.w0,
        );
        assert_eq!(f.ad_started_count(), 1);
    }

    #[test]
    fn manual_trigger_bypasses_interval_eligibility() {
        let mut campaign = due_campaign("Promo");
        campaign.last_played_at = Some(Utc.with_ymd_and_hms(2024, 6, 1, 11, 59, 59).unwrap());
        campaign.interval_minutes = 120;
        let id = campaign.id.clone();
        let mut f = Fixture::started(vec![campaign]);

        f.core.handle_msg(
            SchedulerMsg::PlayNow {
                campaign_id: id,
                token: 1,
            },
            f.t0 + Duration::from_millis(5),
            f.w0,
        );
        assert_eq!(f.ad_started_count(), 1);
    }

    #[test]
    fn manual_trigger_before_start_reports_status() {
        let campaign = due_campaign("Promo");
        let id = campaign.id.clone();
        let mut f = Fixture::new(vec![campaign]);

        f.core.handle_msg(
            SchedulerMsg::PlayNow {
                campaign_id: id,
                token: 1,
            },
            f.t0,
            f.w0,
        );
        assert_eq!(f.ad_started_count(), 0);
        assert!(f.statuses().contains(&"Start the system first.".to_string()));
    }

    #[test]
    fn manual_trigger_during_session_is_silently_dropped() {
        let a = due_campaign("A");
        let b = due_campaign("B");
        let b_id = b.id.clone();
        let mut f = Fixture::started(vec![a, b]);

        let t1 = f.t0 + Duration::from_millis(25);
        f.core.tick(t1, f.w0);
        assert_eq!(f.ad_started_count(), 1);

        f.core.handle_msg(
            SchedulerMsg::PlayNow {
                campaign_id: b_id,
                token: 7,
            },
            t1 + Duration::from_millis(5),
            f.w0,
        );
        assert_eq!(f.ad_started_count(), 1);
        assert!(f.core.has_active_session());
    }

    #[test]
    fn synthesis_failure_restores_volume_and_skips_acknowledgement() {
        let mut f = Fixture::started(vec![due_campaign("Promo")]);
        let t1 = f.t0 + Duration::from_millis(25);
        f.core.tick(t1, f.w0);

        let request = f.core.take_synth_request().unwrap();
        f.core.handle_msg(
            SchedulerMsg::SynthReady {
                generation: request.generation,
                result: Err(SynthesisError::TransportFailure("dns failure".to_string())),
            },
            t1 + Duration::from_millis(100),
            f.w0,
        );

        assert!(!f.core.has_active_session());
        assert!(f.played.lock().unwrap().is_empty());
        assert!((f.core.stream().current_gain() - 0.8).abs() < 1e-6);
        assert!(f
            .events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, SchedulerEvent::AdFailed { .. })));
    }

    #[test]
    fn failed_campaign_is_retried_on_a_later_scan() {
        let mut f = Fixture::started(vec![due_campaign("Promo")]);
        let t1 = f.t0 + Duration::from_millis(25);
        f.core.tick(t1, f.w0);
        let request = f.core.take_synth_request().unwrap();
        f.core.handle_msg(
            SchedulerMsg::SynthReady {
                generation: request.generation,
                result: Err(SynthesisError::EmptyResponse),
            },
            t1,
            f.w0,
        );

        // last_played_at unchanged, so the next scan picks it up again
        f.core.tick(t1 + Duration::from_secs(6), f.w0);
        assert_eq!(f.ad_started_count(), 2);
    }

    #[test]
    fn stale_synthesis_generation_is_ignored() {
        let mut f = Fixture::started(vec![due_campaign("Promo")]);
        let t1 = f.t0 + Duration::from_millis(25);
        f.core.tick(t1, f.w0);
        let request = f.core.take_synth_request().unwrap();

        f.core.handle_msg(
            SchedulerMsg::SynthReady {
                generation: request.generation + 99,
                result: Ok(AudioClip {
                    sample_rate: 24_000,
                    channels: 1,
                    samples: vec![0.1; 64],
                }),
            },
            t1,
            f.w0,
        );
        // Session still waiting; nothing was played
        assert!(f.core.has_active_session());
        assert_eq!(f.ad_state.lock().unwrap().plays, 0);
    }

    #[test]
    fn live_volume_change_is_respected_at_restore_time() {
        let mut f = Fixture::started(vec![due_campaign("Promo")]);
        f.core.handle_msg(
            SchedulerMsg::SetSource(Some(Station {
                id: "lofi".to_string(),
                name: "Lofi".to_string(),
                url: "https://radio.example/lofi".to_string(),
                genre: "Chill".to_string(),
            })),
            f.t0,
            f.w0,
        );
        let t1 = f.t0 + Duration::from_millis(25);
        f.core.tick(t1, f.w0);
        assert!(f.core.has_active_session());
        f.deliver_synth(t1, f.w0);

        // Operator drags the music slider mid-ad
        volumes_set(&f.volumes, 0.3);
        f.core
            .handle_msg(SchedulerMsg::VolumesChanged, t1 + Duration::from_millis(50), f.w0);
        // Immediately re-ducked against the new setting: 0.3 * 0.2
        assert!((f.core.stream().current_gain() - 0.06).abs() < 1e-6);

        f.finish_ad_audio();
        f.run_session_out(t1, f.w0);
        assert!(!f.core.has_active_session());
        assert!((f.core.stream().current_gain() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn campaign_added_mid_run_is_picked_up_by_the_next_scan() {
        let mut f = Fixture::started(Vec::new());
        f.core.tick(f.t0 + Duration::from_millis(25), f.w0);
        assert_eq!(f.ad_started_count(), 0);

        // Operator creates a campaign while the system is running; the
        // scheduler sees it on its next snapshot, no restart required
        f.campaigns.lock().unwrap().push(due_campaign("Fresh"));
        f.core.tick(f.t0 + Duration::from_secs(6), f.w0);
        assert_eq!(f.ad_started_count(), 1);
    }

    #[test]
    fn engine_factory_failure_surfaces_as_status() {
        let mut f = Fixture::with_factory_result(vec![due_campaign("Promo")], false);
        f.core.handle_msg(SchedulerMsg::Start, f.t0, f.w0);
        assert!(!f.core.is_running());
        assert!(f
            .statuses()
            .iter()
            .any(|s| s.contains("Audio engine unavailable")));

        // No admissions without an engine
        f.core.tick(f.t0 + Duration::from_secs(10), f.w0);
        assert_eq!(f.ad_started_count(), 0);
    }

    #[test]
    fn handle_is_send_and_clone() {
        fn assert_send_sync<T: Send + Sync + Clone>() {}
        assert_send_sync::<SchedulerHandle>();
    }

    fn volumes_set(cell: &Arc<Mutex<VolumeSettings>>, music: f32) {
        cell.lock().unwrap().music = music;
    }
}
