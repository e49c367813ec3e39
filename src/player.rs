//! Audio engine lifecycle and the dedicated ad voice output.
//!
//! The engine is created when the operator starts the system and owns the
//! physical output; it is injected into the scheduler rather than living in
//! a global. Both outputs share one device: the background stream sink and
//! the ad sink are summed by the device mixer.

use crate::stream::{RodioStreamOutput, StreamOutput};
use crate::synth::AudioClip;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};

/// Output for synthesized ad audio, independent of the background stream.
pub trait AdOutput {
    /// Start playing a clip at the given gain, replacing anything queued.
    fn play(&mut self, clip: &AudioClip, gain: f32) -> Result<(), String>;
    /// True once the clip has played to completion.
    fn is_finished(&self) -> bool;
    fn stop(&mut self);
}

/// Lifecycle-scoped handle to the physical audio output.
pub trait AudioEngine {
    fn create_stream_output(&mut self) -> Result<Box<dyn StreamOutput>, String>;
    fn create_ad_output(&mut self) -> Result<Box<dyn AdOutput>, String>;
}

/// Builds the engine inside the scheduler thread on operator start.
pub type EngineFactory = Box<dyn Fn() -> Result<Box<dyn AudioEngine>, String> + Send>;

/// Rodio-backed engine. Not serializable, created fresh per run.
pub struct RodioEngine {
    _stream: OutputStream,
    handle: OutputStreamHandle,
}

impl RodioEngine {
    /// Initialize the default audio output.
    pub fn new() -> Result<Self, String> {
        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| format!("Failed to open audio output: {}", e))?;
        Ok(RodioEngine {
            _stream: stream,
            handle,
        })
    }

    /// Factory for injecting into the scheduler.
    pub fn factory() -> EngineFactory {
        Box::new(|| RodioEngine::new().map(|e| Box::new(e) as Box<dyn AudioEngine>))
    }
}

impl AudioEngine for RodioEngine {
    fn create_stream_output(&mut self) -> Result<Box<dyn StreamOutput>, String> {
        RodioStreamOutput::new(&self.handle).map(|o| Box::new(o) as Box<dyn StreamOutput>)
    }

    fn create_ad_output(&mut self) -> Result<Box<dyn AdOutput>, String> {
        let sink = Sink::try_new(&self.handle)
            .map_err(|e| format!("Failed to create ad sink: {}", e))?;
        Ok(Box::new(RodioAdOutput { sink }))
    }
}

struct RodioAdOutput {
    sink: Sink,
}

impl AdOutput for RodioAdOutput {
    fn play(&mut self, clip: &AudioClip, gain: f32) -> Result<(), String> {
        if clip.samples.is_empty() {
            return Err("Cannot play an empty audio clip".to_string());
        }
        if clip.channels == 0 || clip.sample_rate == 0 {
            return Err(format!(
                "Invalid clip format: {} channels at {} Hz",
                clip.channels, clip.sample_rate
            ));
        }
        self.sink.stop();
        self.sink.set_volume(gain.clamp(0.0, 1.0));
        self.sink.append(SamplesBuffer::new(
            clip.channels,
            clip.sample_rate,
            clip.samples.clone(),
        ));
        self.sink.play();
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.sink.empty()
    }

    fn stop(&mut self) {
        self.sink.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_creation_succeeds_or_fails_gracefully() {
        match RodioEngine::new() {
            Ok(mut engine) => {
                assert!(engine.create_ad_output().is_ok());
                assert!(engine.create_stream_output().is_ok());
            }
            Err(e) => assert!(e.contains("Failed to open audio output")),
        }
    }

    #[test]
    fn ad_output_rejects_empty_clip() {
        if let Ok(mut engine) = RodioEngine::new() {
            let mut out = engine.create_ad_output().unwrap();
            let clip = AudioClip {
                sample_rate: 24_000,
                channels: 1,
                samples: Vec::new(),
            };
            assert!(out.play(&clip, 1.0).is_err());
        }
    }

    #[test]
    fn ad_output_rejects_degenerate_format() {
        if let Ok(mut engine) = RodioEngine::new() {
            let mut out = engine.create_ad_output().unwrap();
            let clip = AudioClip {
                sample_rate: 0,
                channels: 0,
                samples: vec![0.0; 16],
            };
            assert!(out.play(&clip, 1.0).is_err());
        }
    }

    #[test]
    fn factory_is_send() {
        fn assert_send<T: Send>(_: &T) {}
        let factory = RodioEngine::factory();
        assert_send(&factory);
    }
}
