//! Background stream control — source switching, gain ramps, and the
//! bounded reconnect policy.
//!
//! `StreamController` owns the orchestration state and runs entirely on the
//! scheduler thread; the actual audio pipeline sits behind the
//! `StreamOutput` boundary. The rodio implementation feeds a sink from an
//! HTTP body on a feeder thread and reports health through a shared cell
//! the controller polls each tick.

use crate::station::Station;
use crate::volume::VolumeRamp;
use rodio::{Decoder, OutputStreamHandle, Sink};
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Observed state of the underlying stream output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamHealth {
    Idle,
    Connecting,
    Playing,
    Failed(String),
}

/// Boundary to the actual audio pipeline playing the background stream.
pub trait StreamOutput {
    /// Begin loading and playing the given URL. Progress and errors are
    /// reported through `poll`, not synchronously.
    fn load(&mut self, url: &str);
    /// Stop playback and discard the loaded source.
    fn stop(&mut self);
    fn pause(&mut self);
    fn resume(&mut self);
    fn set_volume(&mut self, gain: f32);
    fn poll(&mut self) -> StreamHealth;
}

/// Operator-facing status changes emitted by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    Connecting(String),
    OnAir(String),
    AdsOnly,
    Off,
    Reconnecting(String),
    ReconnectFailed(String),
}

impl std::fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamStatus::Connecting(name) => write!(f, "Connecting to {}...", name),
            StreamStatus::OnAir(name) => write!(f, "On air: {}", name),
            StreamStatus::AdsOnly => write!(f, "System active (ads only)"),
            StreamStatus::Off => write!(f, "Radio off."),
            StreamStatus::Reconnecting(name) => write!(f, "{} dropped, reconnecting...", name),
            StreamStatus::ReconnectFailed(reason) => write!(f, "Reconnect failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReconnectPhase {
    Idle,
    /// One retry scheduled. The generation pins it to the source that
    /// failed, so a retry never applies to a switched-away source.
    Scheduled { generation: u64 },
    /// The single retry was fired; a further failure exhausts the budget.
    Retried,
    Exhausted,
}

/// Owns the background stream: selected source, running flag, current gain,
/// an optional in-flight ramp, and the reconnect state.
pub struct StreamController {
    output: Option<Box<dyn StreamOutput>>,
    source: Option<Station>,
    running: bool,
    gain: f32,
    ramp: Option<VolumeRamp>,
    ramp_step: f32,
    ramp_interval: Duration,
    reconnect_delay: Duration,
    generation: u64,
    loaded: bool,
    reconnect: ReconnectPhase,
    reconnect_at: Option<Instant>,
    last_health: StreamHealth,
}

impl StreamController {
    pub fn new(
        initial_gain: f32,
        ramp_step: f32,
        ramp_interval: Duration,
        reconnect_delay: Duration,
    ) -> Self {
        StreamController {
            output: None,
            source: None,
            running: false,
            gain: initial_gain.clamp(0.0, 1.0),
            ramp: None,
            ramp_step,
            ramp_interval,
            reconnect_delay,
            generation: 0,
            loaded: false,
            reconnect: ReconnectPhase::Idle,
            reconnect_at: None,
            last_health: StreamHealth::Idle,
        }
    }

    /// Install the audio output once the engine exists. Selection made
    /// before this point is honored on the next `set_running(true)`.
    pub fn attach(&mut self, mut output: Box<dyn StreamOutput>) {
        output.set_volume(self.gain);
        self.output = Some(output);
        self.loaded = false;
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn source(&self) -> Option<&Station> {
        self.source.as_ref()
    }

    pub fn current_gain(&self) -> f32 {
        self.gain
    }

    pub fn ramp_active(&self) -> bool {
        self.ramp.is_some()
    }

    /// Switch the background source. `None` turns the radio off.
    pub fn set_source(&mut self, station: Option<Station>) -> Vec<StreamStatus> {
        let mut statuses = Vec::new();
        self.generation += 1;
        self.reconnect = ReconnectPhase::Idle;
        self.reconnect_at = None;
        self.loaded = false;
        self.last_health = StreamHealth::Idle;
        self.source = station;

        match (&self.source, &mut self.output) {
            (Some(st), Some(out)) => {
                if self.running {
                    out.set_volume(self.gain);
                    out.load(&st.url);
                    self.loaded = true;
                    self.last_health = StreamHealth::Connecting;
                    statuses.push(StreamStatus::Connecting(st.name.clone()));
                }
            }
            (None, Some(out)) => {
                out.stop();
                statuses.push(if self.running {
                    StreamStatus::AdsOnly
                } else {
                    StreamStatus::Off
                });
            }
            (None, None) => statuses.push(StreamStatus::Off),
            (Some(_), None) => {}
        }
        statuses
    }

    /// Toggle whether the controller is actively outputting. Does not clear
    /// the selected source.
    pub fn set_running(&mut self, running: bool) -> Vec<StreamStatus> {
        let mut statuses = Vec::new();
        self.running = running;
        if running {
            self.reconnect = ReconnectPhase::Idle;
            self.reconnect_at = None;
            match (&self.source, &mut self.output) {
                (Some(st), Some(out)) => {
                    if self.loaded {
                        out.resume();
                    } else {
                        out.set_volume(self.gain);
                        out.load(&st.url);
                        self.loaded = true;
                    }
                    self.last_health = StreamHealth::Connecting;
                    statuses.push(StreamStatus::Connecting(st.name.clone()));
                }
                (None, _) => statuses.push(StreamStatus::AdsOnly),
                (Some(_), None) => {}
            }
        } else if let Some(out) = &mut self.output {
            out.pause();
        }
        statuses
    }

    /// Set the gain immediately, cancelling any in-progress ramp.
    pub fn set_volume(&mut self, level: f32) {
        self.ramp = None;
        self.gain = level.clamp(0.0, 1.0);
        if let Some(out) = &mut self.output {
            out.set_volume(self.gain);
        }
    }

    /// Smoothly interpolate the gain to `level`. Replaces any prior ramp.
    pub fn ramp_volume_to(&mut self, level: f32, now: Instant) {
        self.ramp = Some(VolumeRamp::new(
            self.gain,
            level,
            self.ramp_step,
            self.ramp_interval,
            now,
        ));
    }

    /// Advance ramps and the reconnect policy. Call on every loop tick.
    pub fn tick(&mut self, now: Instant) -> Vec<StreamStatus> {
        let mut statuses = Vec::new();

        if let Some(ramp) = &mut self.ramp {
            if let Some(level) = ramp.tick(now) {
                self.gain = level;
                if let Some(out) = &mut self.output {
                    out.set_volume(level);
                }
            }
            if ramp.is_done() {
                self.ramp = None;
            }
        }

        if !(self.running && self.loaded) {
            return statuses;
        }
        let (Some(out), Some(station)) = (&mut self.output, &self.source) else {
            return statuses;
        };

        let health = out.poll();
        if health != self.last_health {
            match &health {
                StreamHealth::Playing => {
                    self.reconnect = ReconnectPhase::Idle;
                    self.reconnect_at = None;
                    statuses.push(StreamStatus::OnAir(station.name.clone()));
                }
                StreamHealth::Failed(reason) => match self.reconnect {
                    ReconnectPhase::Idle => {
                        self.reconnect = ReconnectPhase::Scheduled {
                            generation: self.generation,
                        };
                        self.reconnect_at = Some(now + self.reconnect_delay);
                        statuses.push(StreamStatus::Reconnecting(station.name.clone()));
                    }
                    ReconnectPhase::Retried => {
                        self.reconnect = ReconnectPhase::Exhausted;
                        self.reconnect_at = None;
                        statuses.push(StreamStatus::ReconnectFailed(reason.clone()));
                    }
                    ReconnectPhase::Scheduled { .. } | ReconnectPhase::Exhausted => {}
                },
                StreamHealth::Connecting | StreamHealth::Idle => {}
            }
            self.last_health = health;
        }

        if let ReconnectPhase::Scheduled { generation } = self.reconnect {
            if let Some(at) = self.reconnect_at {
                if now >= at {
                    self.reconnect_at = None;
                    if generation == self.generation {
                        out.load(&station.url);
                        self.reconnect = ReconnectPhase::Retried;
                        self.last_health = StreamHealth::Connecting;
                    } else {
                        // Stale retry for a source that was switched away
                        self.reconnect = ReconnectPhase::Idle;
                    }
                }
            }
        }

        statuses
    }
}

// ── Rodio implementation ─────────────────────────────────────────────────────

/// How many bytes to buffer before probing the container format. Seeks
/// during probing are only possible within this prefix.
const STREAM_PREFIX_BYTES: usize = 64 * 1024;

/// Feeds a rodio sink from an HTTP audio stream.
pub struct RodioStreamOutput {
    sink: Arc<Sink>,
    client: reqwest::blocking::Client,
    health: Arc<Mutex<StreamHealth>>,
    generation: Arc<AtomicU64>,
}

impl RodioStreamOutput {
    pub fn new(handle: &OutputStreamHandle) -> Result<Self, String> {
        let sink =
            Sink::try_new(handle).map_err(|e| format!("Failed to create stream sink: {}", e))?;
        // No overall timeout: the body is an endless live stream.
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
        Ok(RodioStreamOutput {
            sink: Arc::new(sink),
            client,
            health: Arc::new(Mutex::new(StreamHealth::Idle)),
            generation: Arc::new(AtomicU64::new(0)),
        })
    }
}

impl StreamOutput for RodioStreamOutput {
    fn load(&mut self, url: &str) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.sink.stop();
        *self.health.lock().unwrap() = StreamHealth::Connecting;

        let sink = self.sink.clone();
        let health = self.health.clone();
        let current = self.generation.clone();
        let client = self.client.clone();
        let url = url.to_string();
        let spawned = std::thread::Builder::new()
            .name("stream-feeder".into())
            .spawn(move || feed_stream(&client, &url, generation, &sink, &health, &current));
        if spawned.is_err() {
            *self.health.lock().unwrap() =
                StreamHealth::Failed("could not spawn stream feeder".to_string());
        }
    }

    fn stop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.sink.stop();
        *self.health.lock().unwrap() = StreamHealth::Idle;
    }

    fn pause(&mut self) {
        self.sink.pause();
    }

    fn resume(&mut self) {
        self.sink.play();
    }

    fn set_volume(&mut self, gain: f32) {
        self.sink.set_volume(gain);
    }

    fn poll(&mut self) -> StreamHealth {
        let mut guard = self.health.lock().unwrap();
        // A live stream that ran dry is a failure, not a natural end.
        if *guard == StreamHealth::Playing && self.sink.empty() {
            *guard = StreamHealth::Failed("stream ended unexpectedly".to_string());
        }
        guard.clone()
    }
}

fn feed_stream(
    client: &reqwest::blocking::Client,
    url: &str,
    generation: u64,
    sink: &Arc<Sink>,
    health: &Arc<Mutex<StreamHealth>>,
    current: &Arc<AtomicU64>,
) {
    let fail = |message: String| {
        if current.load(Ordering::SeqCst) == generation {
            eprintln!("[stream] {}", message);
            *health.lock().unwrap() = StreamHealth::Failed(message);
        }
    };

    let response = match client.get(url).send() {
        Ok(r) => r,
        Err(e) => return fail(format!("cannot reach stream: {}", e)),
    };
    if !response.status().is_success() {
        return fail(format!("stream returned {}", response.status()));
    }

    let reader = match PrefixedStreamReader::new(response) {
        Ok(r) => r,
        Err(e) => return fail(format!("cannot read stream: {}", e)),
    };
    let source = match Decoder::new(reader) {
        Ok(s) => s,
        Err(e) => return fail(format!("cannot decode stream: {}", e)),
    };

    // Switched away while we were connecting — discard silently.
    if current.load(Ordering::SeqCst) != generation {
        return;
    }
    sink.append(source);
    sink.play();
    if current.load(Ordering::SeqCst) == generation {
        *health.lock().unwrap() = StreamHealth::Playing;
    }
}

/// `Read + Seek` shim over a live HTTP body: a buffered prefix satisfies the
/// decoder's format probing, everything after streams straight through.
struct PrefixedStreamReader<B> {
    prefix: Vec<u8>,
    pos: u64,
    body: Mutex<B>,
}

impl<B: Read> PrefixedStreamReader<B> {
    fn new(mut body: B) -> io::Result<Self> {
        let mut prefix = vec![0u8; STREAM_PREFIX_BYTES];
        let mut filled = 0;
        while filled < prefix.len() {
            match body.read(&mut prefix[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        prefix.truncate(filled);
        Ok(PrefixedStreamReader {
            prefix,
            pos: 0,
            body: Mutex::new(body),
        })
    }
}

impl<B: Read> Read for PrefixedStreamReader<B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let pos = self.pos as usize;
        if pos < self.prefix.len() {
            let available = &self.prefix[pos..];
            let n = available.len().min(buf.len());
            buf[..n].copy_from_slice(&available[..n]);
            self.pos += n as u64;
            return Ok(n);
        }
        let n = self.body.lock().unwrap().read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<B: Read> Seek for PrefixedStreamReader<B> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => p,
            SeekFrom::Current(delta) => self
                .pos
                .checked_add_signed(delta)
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek out of range"))?,
            SeekFrom::End(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "live stream has no end",
                ));
            }
        };
        if target == self.pos {
            return Ok(self.pos);
        }
        // Only the buffered prefix is seekable; the live tail is not.
        if target <= self.prefix.len() as u64 && self.pos <= self.prefix.len() as u64 {
            self.pos = target;
            Ok(target)
        } else {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "cannot seek within a live stream",
            ))
        }
    }
}
