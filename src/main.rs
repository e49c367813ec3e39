use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use storecast::engine::Engine;
use storecast::play_log::PlayLogger;
use storecast::player::RodioEngine;
use storecast::scheduler::{
    SchedulerCallbacks, SchedulerConfig, SchedulerEvent, spawn_scheduler,
};
use storecast::station::builtin_stations;
use storecast::synth::{HttpSynthesizer, SpeechSynthesizer, VOICE_NAMES};

#[derive(Parser)]
#[command(name = "storecast", about = "Storefront ad broadcast engine CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show engine status
    Status,
    /// Background station management
    Station {
        #[command(subcommand)]
        action: StationCmd,
    },
    /// Ad campaign management
    Campaign {
        #[command(subcommand)]
        action: CampaignCmd,
    },
    /// Volume configuration
    Volume {
        #[command(subcommand)]
        action: VolumeCmd,
    },
    /// Show play statistics and recent failures
    Stats,
    /// Run the broadcast engine until quit
    Run,
}

#[derive(Subcommand)]
enum StationCmd {
    /// List available stations
    List,
    /// Select a station by id
    Select { id: String },
    /// Turn the radio off (ads only)
    Off,
}

#[derive(Subcommand)]
enum CampaignCmd {
    /// Create a new campaign
    Add {
        /// Display name
        name: String,
        /// Text to synthesize
        text: String,
        /// Provider voice name
        #[arg(short, long, default_value = "Kore")]
        voice: String,
        /// Minimum minutes between plays
        #[arg(short, long, default_value_t = 15)]
        interval: u32,
        /// Playback window start (RFC 3339)
        #[arg(long)]
        start: Option<String>,
        /// Playback window end (RFC 3339)
        #[arg(long)]
        end: Option<String>,
    },
    /// List all campaigns
    List,
    /// Activate a campaign
    Enable { id: String },
    /// Pause a campaign
    Disable { id: String },
    /// Delete a campaign
    Remove { id: String },
}

#[derive(Subcommand)]
enum VolumeCmd {
    /// Set the background music gain (0.0-1.0)
    Music { level: f32 },
    /// Set the ad voice gain (0.0-1.0)
    Ads { level: f32 },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Commands::Status => cmd_status(),
        Commands::Station { action } => cmd_station(action),
        Commands::Campaign { action } => cmd_campaign(action),
        Commands::Volume { action } => cmd_volume(action),
        Commands::Stats => cmd_stats(),
        Commands::Run => cmd_run(),
    }
}

fn cmd_status() -> Result<(), String> {
    let engine = Engine::load();
    let active = engine.campaigns.iter().filter(|c| c.active).count();
    println!("Campaigns: {} ({} active)", engine.campaigns.len(), active);
    match engine.selected_station() {
        Some(s) => println!("Station:   {} [{}]", s.name, s.id),
        None => println!("Station:   off (ads only)"),
    }
    println!(
        "Volumes:   music {:.0}%, ads {:.0}%",
        engine.volumes.music * 100.0,
        engine.volumes.ads * 100.0
    );
    Ok(())
}

fn cmd_station(action: StationCmd) -> Result<(), String> {
    let mut engine = Engine::load();
    match action {
        StationCmd::List => {
            let selected = engine.selected_station_id.clone();
            for s in builtin_stations() {
                let marker = if selected.as_deref() == Some(&s.id) {
                    "*"
                } else {
                    " "
                };
                println!("{} {:<16} {} ({})", marker, s.id, s.name, s.genre);
            }
            Ok(())
        }
        StationCmd::Select { id } => {
            let station = engine.set_station(Some(&id))?;
            engine.save()?;
            if let Some(station) = station {
                println!("Station set to {}", station.name);
            }
            Ok(())
        }
        StationCmd::Off => {
            let _ = engine.set_station(None)?;
            engine.save()?;
            println!("Radio off. Ads will still play.");
            Ok(())
        }
    }
}

fn cmd_campaign(action: CampaignCmd) -> Result<(), String> {
    let mut engine = Engine::load();
    match action {
        CampaignCmd::Add {
            name,
            text,
            voice,
            interval,
            start,
            end,
        } => {
            let start = start.as_deref().map(parse_timestamp).transpose()?;
            let end = end.as_deref().map(parse_timestamp).transpose()?;
            let id = engine.add_campaign(name, text, voice, interval)?;
            if let Some(campaign) = engine.campaigns.iter_mut().find(|c| c.id == id) {
                campaign.start_date = start;
                campaign.end_date = end;
            }
            engine.save()?;
            println!("Created campaign {}", id);
            Ok(())
        }
        CampaignCmd::List => {
            if engine.campaigns.is_empty() {
                println!("No campaigns.");
                return Ok(());
            }
            for c in &engine.campaigns {
                let state = if c.active { "active" } else { "paused" };
                let last = match c.last_played_at {
                    Some(t) => t.format("%Y-%m-%d %H:%M UTC").to_string(),
                    None => "never".to_string(),
                };
                println!(
                    "{}  {:<20} {:<7} every {:>3} min  voice {:<7} last played: {}",
                    c.id, c.name, state, c.interval_minutes, c.voice_name, last
                );
            }
            Ok(())
        }
        CampaignCmd::Enable { id } => {
            engine.set_campaign_active(&id, true)?;
            engine.save()?;
            println!("Campaign enabled.");
            Ok(())
        }
        CampaignCmd::Disable { id } => {
            engine.set_campaign_active(&id, false)?;
            engine.save()?;
            println!("Campaign paused.");
            Ok(())
        }
        CampaignCmd::Remove { id } => {
            engine.remove_campaign(&id)?;
            engine.save()?;
            println!("Campaign removed.");
            Ok(())
        }
    }
}

fn cmd_volume(action: VolumeCmd) -> Result<(), String> {
    let mut engine = Engine::load();
    match action {
        VolumeCmd::Music { level } => engine.set_music_volume(level),
        VolumeCmd::Ads { level } => engine.set_ads_volume(level),
    }
    engine.save()?;
    println!(
        "Volumes: music {:.0}%, ads {:.0}%",
        engine.volumes.music * 100.0,
        engine.volumes.ads * 100.0
    );
    Ok(())
}

fn cmd_stats() -> Result<(), String> {
    let logger = PlayLogger::new(&log_dir());
    let stats = logger.get_statistics();
    println!("Total plays: {}", stats.total_plays);
    for (name, count) in &stats.per_campaign {
        println!("  {:<20} {}", name, count);
    }
    let failures = logger.get_failures();
    if !failures.is_empty() {
        println!("Recent failures:");
        for f in failures.iter().rev().take(10) {
            println!("  {}  {}  {}", f.t, f.campaign, f.err);
        }
    }
    Ok(())
}

fn cmd_run() -> Result<(), String> {
    let engine = Arc::new(Mutex::new(Engine::load()));
    let play_log = Arc::new(PlayLogger::new(&log_dir()));

    let callbacks = SchedulerCallbacks {
        get_campaigns: {
            let engine = engine.clone();
            Box::new(move || engine.lock().unwrap().campaigns.clone())
        },
        get_volumes: {
            let engine = engine.clone();
            Box::new(move || engine.lock().unwrap().volumes)
        },
        on_ad_played: {
            let engine = engine.clone();
            let play_log = play_log.clone();
            Box::new(move |id, ts| {
                let mut engine = engine.lock().unwrap();
                engine.mark_played(id, ts);
                let name = engine
                    .find_campaign(id)
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| id.to_string());
                if let Err(e) = engine.save() {
                    eprintln!("Warning: could not save state: {}", e);
                }
                drop(engine);
                play_log.log_play(&name);
            })
        },
        on_event: {
            let play_log = play_log.clone();
            Box::new(move |event| match event {
                SchedulerEvent::Status(msg) => println!("{}", msg),
                SchedulerEvent::AdStarted { .. } => {}
                SchedulerEvent::AdFinished { name, .. } => println!("Ad finished: {}", name),
                SchedulerEvent::AdFailed { name, reason, .. } => {
                    eprintln!("Ad failed: {}: {}", name, reason);
                    play_log.log_failure(&name, &reason);
                }
            })
        },
    };

    let synthesizer: Arc<dyn SpeechSynthesizer> = Arc::new(HttpSynthesizer::from_env());
    let handle = spawn_scheduler(
        SchedulerConfig::default(),
        RodioEngine::factory(),
        synthesizer,
        callbacks,
    );

    handle.set_source(engine.lock().unwrap().selected_station());
    handle.start();

    println!("storecast running.");
    println!("Commands: play <id> | start | stop | station <id|off> | volume music|ads <level> | quit");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.map_err(|e| format!("stdin error: {}", e))?;
        let mut parts = line.split_whitespace();
        match parts.next() {
            None => {}
            Some("quit") | Some("q") | Some("exit") => break,
            Some("start") => handle.start(),
            Some("stop") => handle.stop(),
            Some("play") => match parts.next() {
                Some(id) => handle.play_now(id, Utc::now().timestamp_millis() as u64),
                None => println!("Usage: play <campaign-id>"),
            },
            Some("station") => match parts.next() {
                Some("off") => {
                    let mut engine = engine.lock().unwrap();
                    let _ = engine.set_station(None)?;
                    let _ = engine.save();
                    drop(engine);
                    handle.set_source(None);
                }
                Some(id) => {
                    let mut engine = engine.lock().unwrap();
                    match engine.set_station(Some(id)) {
                        Ok(station) => {
                            let _ = engine.save();
                            drop(engine);
                            handle.set_source(station);
                        }
                        Err(e) => println!("{}", e),
                    }
                }
                None => println!("Usage: station <id|off>"),
            },
            Some("volume") => {
                let target = parts.next();
                let level = parts.next().and_then(|v| v.parse::<f32>().ok());
                match (target, level) {
                    (Some("music"), Some(level)) => {
                        let mut engine = engine.lock().unwrap();
                        engine.set_music_volume(level);
                        let _ = engine.save();
                        drop(engine);
                        handle.volumes_changed();
                    }
                    (Some("ads"), Some(level)) => {
                        let mut engine = engine.lock().unwrap();
                        engine.set_ads_volume(level);
                        let _ = engine.save();
                        drop(engine);
                        handle.volumes_changed();
                    }
                    _ => println!("Usage: volume music|ads <0.0-1.0>"),
                }
            }
            Some("voices") => println!("Voices: {}", VOICE_NAMES.join(", ")),
            Some(other) => println!("Unknown command '{}'", other),
        }
    }

    handle.shutdown();
    // Give the scheduler thread a moment to restore volume and wind down
    std::thread::sleep(std::time::Duration::from_millis(200));
    Ok(())
}

fn log_dir() -> PathBuf {
    let dir = dirs::data_dir()
        .map(|d| d.join("storecast"))
        .unwrap_or_else(|| PathBuf::from("."));
    if let Err(e) = std::fs::create_dir_all(&dir) {
        eprintln!("Warning: could not create data dir: {}", e);
    }
    dir
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("Invalid timestamp '{}' (expected RFC 3339): {}", s, e))
}
