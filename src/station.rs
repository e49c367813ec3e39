use serde::{Deserialize, Serialize};

/// An addressable background radio stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Station {
    pub id: String,
    pub name: String,
    pub url: String,
    pub genre: String,
}

impl Station {
    fn new(id: &str, name: &str, url: &str, genre: &str) -> Self {
        Station {
            id: id.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            genre: genre.to_string(),
        }
    }
}

/// Built-in station catalog. "Radio off" is the absence of a selection,
/// not a catalog entry.
pub fn builtin_stations() -> Vec<Station> {
    vec![
        Station::new(
            "lofi",
            "Lofi / Chill (Ambient)",
            "https://stream.zeno.fm/0r0xa792kwzuv",
            "Relaxation",
        ),
        Station::new(
            "sertanejo",
            "Sertanejo (Hunter FM)",
            "https://live.hunter.fm/sertanejo_high",
            "Sertanejo",
        ),
        Station::new(
            "mpb",
            "MPB (Hunter FM)",
            "https://live.hunter.fm/mpb_high",
            "MPB / Classics",
        ),
        Station::new(
            "pop",
            "International Pop",
            "https://live.hunter.fm/pop_high",
            "Pop",
        ),
        Station::new(
            "80s",
            "The 80s (Hunter FM)",
            "https://live.hunter.fm/80s_high",
            "Flashback / 80s",
        ),
        Station::new(
            "jazz-lounge",
            "Jazz & Swing (Public Domain)",
            "https://relay.publicdomainradio.org/jazz_swing.mp3",
            "Jazz / Vintage",
        ),
        Station::new(
            "classical-chill",
            "Classical Relax (Public Domain)",
            "https://relay.publicdomainradio.org/classical.mp3",
            "Instrumental / Calm",
        ),
    ]
}

/// Look up a built-in station by id.
pub fn find_station(id: &str) -> Option<Station> {
    builtin_stations().into_iter().find(|s| s.id == id)
}
