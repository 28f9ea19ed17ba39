//! Preset selection from environment channels.
//!
//! Deployments pick presets through several independently named variables
//! (one per media family plus a unified list). They are merged in channel
//! order; the first occurrence of an ID wins.

use std::collections::HashSet;

/// A named environment input carrying a preset list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetChannel {
    /// Legacy channel, historically used for video presets
    Legacy,
    Image,
    Audio,
    Unified,
}

impl PresetChannel {
    pub const ALL: [Self; 4] = [Self::Legacy, Self::Image, Self::Audio, Self::Unified];

    #[must_use]
    pub const fn env_var(self) -> &'static str {
        match self {
            Self::Legacy => "PRESET_DOWNLOAD",
            Self::Image => "IMAGE_PRESET_DOWNLOAD",
            Self::Audio => "AUDIO_PRESET_DOWNLOAD",
            Self::Unified => "PRESET_IDS",
        }
    }
}

/// Where a selection came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionSource {
    Explicit,
    Channels,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetSelection {
    pub ids: Vec<String>,
    pub source: SelectionSource,
}

impl PresetSelection {
    /// An explicit list overrides the channels entirely
    #[must_use]
    pub fn resolve(explicit: Option<&str>) -> Self {
        match explicit {
            Some(list) => Self {
                ids: merge_channels([("explicit", list)]),
                source: SelectionSource::Explicit,
            },
            None => Self::from_env(),
        }
    }

    /// Merge all environment channels
    #[must_use]
    pub fn from_env() -> Self {
        let values: Vec<(&str, String)> = PresetChannel::ALL
            .iter()
            .filter_map(|c| {
                std::env::var(c.env_var())
                    .ok()
                    .map(|value| (c.env_var(), value))
            })
            .collect();

        Self {
            ids: merge_channels(values.iter().map(|(name, value)| (*name, value.as_str()))),
            source: SelectionSource::Channels,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Split a comma and/or whitespace separated preset list
#[must_use]
pub fn parse_preset_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// Merge `(channel, list)` pairs with order-preserving de-duplication
pub fn merge_channels<'a, I>(channels: I) -> Vec<String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for (channel, raw) in channels {
        for id in parse_preset_list(raw) {
            if seen.insert(id.clone()) {
                merged.push(id);
            } else {
                tracing::debug!("Preset '{id}' from {channel} already selected");
            }
        }
    }

    merged
}
