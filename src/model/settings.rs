use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ShowSettings {
    pub playback: PlaybackSettings,
    pub network: NetworkSettings,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PlaybackSettings {
    /// Extra wait after the show's total duration before the automatic stop.
    pub completion_buffer_ms: u64,
    /// Floor for the total duration of a show without audio or cues.
    pub min_show_duration_ms: u64,
    pub min_lighting_duration_ms: u64,
    /// Used when neither the sequence nor its effect type carries a duration.
    pub lighting_fallback_duration_ms: u64,
    pub progress_interval_ms: u64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            completion_buffer_ms: 2000,
            min_show_duration_ms: 60_000,
            min_lighting_duration_ms: 500,
            lighting_fallback_duration_ms: 5000,
            progress_interval_ms: 100,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkSettings {
    pub dispatch_timeout_ms: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            dispatch_timeout_ms: 3000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_settings_fall_back_to_defaults() {
        let settings: ShowSettings =
            serde_json::from_str(r#"{"playback":{"completionBufferMs":4000}}"#).unwrap();
        assert_eq!(settings.playback.completion_buffer_ms, 4000);
        assert_eq!(settings.playback.min_lighting_duration_ms, 500);
        assert_eq!(settings.network.dispatch_timeout_ms, 3000);
    }
}
