use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{
    audio::AudioTrack,
    catalog::EffectCatalog,
    cue::{Sequence, SequenceDraft, SequenceKind},
    device::ControllerEndpoint,
    settings::{PlaybackSettings, ShowSettings},
};

pub mod audio;
pub mod catalog;
pub mod cue;
pub mod device;
pub mod document;
pub mod settings;
pub mod validation;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("area {0} is outside 1-99")]
    AreaOutOfRange(u8),
    #[error("channel {0} is outside 1-12")]
    ChannelOutOfRange(u8),
    #[error("relay index {0} is invalid")]
    RelayOutOfRange(u8),
    #[error("repeat count must be at least 1")]
    ZeroRepeat,
    #[error("unknown controller '{0}'")]
    UnknownController(Uuid),
    #[error("unknown firework type '{0}'")]
    UnknownFireworkType(Uuid),
    #[error("unknown lighting effect type '{0}'")]
    UnknownLightingType(Uuid),
    #[error("sequence '{0}' not found")]
    SequenceNotFound(Uuid),
    #[error("firework sequence '{0}' has a fixed duration")]
    NotResizable(Uuid),
    #[error("show has no audio track")]
    NoAudioTrack,
    #[error("sequence id '{0}' is used more than once")]
    DuplicateSequence(Uuid),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Show {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub sequences: Vec<Sequence>,
    #[serde(default)]
    pub audio_track: Option<AudioTrack>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Default for Show {
    fn default() -> Self {
        Self::new("Untitled Show")
    }
}

impl Show {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            sequences: Vec::new(),
            audio_track: None,
            created_at: now,
            updated_at: now,
            metadata: BTreeMap::new(),
        }
    }

    pub fn sequence(&self, id: &Uuid) -> Option<&Sequence> {
        self.sequences.iter().find(|s| s.id.eq(id))
    }

    /// Sequences in display order: by timestamp, insertion order on ties.
    pub fn sequences_by_time(&self) -> Vec<&Sequence> {
        let mut sorted: Vec<&Sequence> = self.sequences.iter().collect();
        sorted.sort_by_key(|s| s.timestamp);
        sorted
    }

    /// Controller ids referenced by at least one sequence, first-seen order.
    pub fn referenced_controllers(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = Vec::new();
        for sequence in &self.sequences {
            if !ids.contains(&sequence.controller_id) {
                ids.push(sequence.controller_id);
            }
        }
        ids
    }

    pub fn total_duration(&self, catalog: &EffectCatalog, settings: &PlaybackSettings) -> u64 {
        if let Some(duration) = self.audio_track.as_ref().and_then(|a| a.duration) {
            return duration.max(1);
        }
        self.sequences
            .iter()
            .map(|s| s.active_end(catalog, settings))
            .max()
            .filter(|end| *end > 0)
            .unwrap_or(settings.min_show_duration_ms.max(1))
    }

    /// Rejects shows that could not have been built through the editing operations:
    /// repeated sequence ids or out-of-range fields.
    pub fn check_integrity(&self) -> Result<(), ModelError> {
        let mut seen = std::collections::HashSet::with_capacity(self.sequences.len());
        for sequence in &self.sequences {
            if !seen.insert(sequence.id) {
                return Err(ModelError::DuplicateSequence(sequence.id));
            }
            sequence.check_ranges()?;
        }
        Ok(())
    }

    pub fn add_sequence(&self, draft: SequenceDraft) -> (Show, Uuid) {
        let mut id = Uuid::new_v4();
        while self.sequence(&id).is_some() {
            id = Uuid::new_v4();
        }
        let mut next = self.clone();
        next.sequences.push(draft.into_sequence(id));
        (next, id)
    }

    pub fn remove_sequence(&self, id: &Uuid) -> Show {
        let mut next = self.clone();
        next.sequences.retain(|s| s.id.ne(id));
        next
    }

    pub fn move_sequence(&self, id: &Uuid, new_timestamp: i64) -> Show {
        let mut next = self.clone();
        if let Some(sequence) = next.sequences.iter_mut().find(|s| s.id.eq(id)) {
            sequence.timestamp = new_timestamp.max(0) as u64;
        }
        next
    }

    /// Only lighting sequences carry an editable duration; fireworks are left untouched.
    pub fn resize_sequence(&self, id: &Uuid, new_duration: i64, min_duration: u64) -> Show {
        let mut next = self.clone();
        if let Some(sequence) = next.sequences.iter_mut().find(|s| s.id.eq(id)) {
            if let SequenceKind::Lighting { duration, .. } = &mut sequence.kind {
                *duration = Some((new_duration.max(0) as u64).max(min_duration));
            }
        }
        next
    }

    pub fn move_audio(&self, new_start_offset: i64) -> Show {
        let mut next = self.clone();
        if let Some(track) = next.audio_track.as_mut() {
            track.start_offset = new_start_offset.max(0) as u64;
        }
        next
    }

    pub fn with_audio_track(&self, track: Option<AudioTrack>) -> Show {
        let mut next = self.clone();
        next.audio_track = track;
        next
    }
}

/// Everything the backend needs to edit and play one show.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShowModel {
    pub show: Show,
    pub catalog: EffectCatalog,
    pub controllers: Vec<ControllerEndpoint>,
    pub settings: ShowSettings,
}

impl ShowModel {
    pub fn total_duration(&self) -> u64 {
        self.show
            .total_duration(&self.catalog, &self.settings.playback)
    }

    pub fn effective_duration(&self, sequence: &Sequence) -> u64 {
        sequence.effective_duration(&self.catalog, &self.settings.playback)
    }

    pub fn controller(&self, id: &Uuid) -> Option<&ControllerEndpoint> {
        self.controllers.iter().find(|c| c.id.eq(id))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::catalog::{FireworkType, LightingEffectType};

    pub(crate) struct Fixture {
        pub model: ShowModel,
        pub controller_id: Uuid,
        pub firework_type_id: Uuid,
        pub lighting_type_id: Uuid,
    }

    /// One controller, a 2000 ms firework type with 500 ms safety delay and a
    /// 5000 ms lighting effect type.
    pub(crate) fn fixture() -> Fixture {
        let controller_id = Uuid::new_v4();
        let firework_type_id = Uuid::new_v4();
        let lighting_type_id = Uuid::new_v4();
        let model = ShowModel {
            show: Show::new("Test Show"),
            catalog: EffectCatalog {
                firework_types: vec![FireworkType {
                    id: firework_type_id,
                    name: "Red Peony".to_string(),
                    duration_ms: 2000,
                    safety_delay_ms: 500,
                }],
                lighting_effect_types: vec![LightingEffectType {
                    id: lighting_type_id,
                    name: "Wash".to_string(),
                    default_duration_ms: Some(5000),
                }],
            },
            controllers: vec![ControllerEndpoint {
                id: controller_id,
                name: "C1".to_string(),
                address: "127.0.0.1:9".to_string(),
            }],
            settings: ShowSettings::default(),
        };
        Fixture {
            model,
            controller_id,
            firework_type_id,
            lighting_type_id,
        }
    }

    pub(crate) fn firework_draft(fixture: &Fixture, timestamp: u64, channel: u8) -> SequenceDraft {
        SequenceDraft {
            timestamp,
            controller_id: fixture.controller_id,
            area: 1,
            delay: 0,
            repeat: 1,
            kind: SequenceKind::Firework {
                firework_type_id: fixture.firework_type_id,
                channel,
            },
        }
    }

    pub(crate) fn lighting_draft(fixture: &Fixture, timestamp: u64) -> SequenceDraft {
        SequenceDraft {
            timestamp,
            controller_id: fixture.controller_id,
            area: 1,
            delay: 0,
            repeat: 1,
            kind: SequenceKind::Lighting {
                effect_type_id: fixture.lighting_type_id,
                duration: None,
                relays: None,
            },
        }
    }

    #[test]
    fn add_and_remove_produce_new_snapshots() {
        let fixture = fixture();
        let original = fixture.model.show.clone();
        let (added, id) = original.add_sequence(firework_draft(&fixture, 1000, 1));

        assert!(original.sequences.is_empty());
        assert_eq!(added.sequences.len(), 1);
        assert_eq!(added.sequences[0].id, id);

        let removed = added.remove_sequence(&id);
        assert!(removed.sequences.is_empty());
        assert_eq!(removed.remove_sequence(&id), removed);
    }

    #[test]
    fn move_clamps_to_zero_and_keeps_duration() {
        let fixture = fixture();
        let (show, id) = fixture
            .model
            .show
            .add_sequence(lighting_draft(&fixture, 3000));
        let show = show.resize_sequence(&id, 1500, 500);

        let moved = show.move_sequence(&id, -250);
        let sequence = moved.sequence(&id).unwrap();
        assert_eq!(sequence.timestamp, 0);
        assert_eq!(
            sequence.effective_duration(&fixture.model.catalog, &fixture.model.settings.playback),
            1500
        );
    }

    #[test]
    fn resize_clamps_and_skips_fireworks() {
        let fixture = fixture();
        let (show, lighting) = fixture
            .model
            .show
            .add_sequence(lighting_draft(&fixture, 0));
        let (show, firework) = show.add_sequence(firework_draft(&fixture, 0, 1));

        let resized = show
            .resize_sequence(&lighting, 100, 500)
            .resize_sequence(&firework, 100, 500);
        let catalog = &fixture.model.catalog;
        let settings = &fixture.model.settings.playback;
        assert_eq!(
            resized
                .sequence(&lighting)
                .unwrap()
                .effective_duration(catalog, settings),
            500
        );
        assert_eq!(resized.sequence(&firework), show.sequence(&firework));
    }

    #[test]
    fn explicit_duration_outlives_type_default_changes() {
        let mut fixture = fixture();
        let (show, id) = fixture
            .model
            .show
            .add_sequence(lighting_draft(&fixture, 0));
        let show = show.resize_sequence(&id, 1200, 500);

        fixture.model.catalog.lighting_effect_types[0].default_duration_ms = Some(9000);
        let sequence = show.sequence(&id).unwrap();
        assert_eq!(
            sequence.effective_duration(&fixture.model.catalog, &fixture.model.settings.playback),
            1200
        );
    }

    #[test]
    fn total_duration_prefers_audio_then_cues_then_floor() {
        let fixture = fixture();
        let catalog = &fixture.model.catalog;
        let settings = &fixture.model.settings.playback;
        let empty = fixture.model.show.clone();
        assert_eq!(empty.total_duration(catalog, settings), 60_000);

        let (show, _) = empty.add_sequence(firework_draft(&fixture, 3000, 2));
        assert_eq!(show.total_duration(catalog, settings), 5000);

        let mut track = AudioTrack::from_url("https://example.com/a.mp3".to_string());
        let pending = show.with_audio_track(Some(track.clone()));
        assert_eq!(pending.total_duration(catalog, settings), 5000);

        track.duration = Some(120_000);
        let with_audio = show.with_audio_track(Some(track));
        assert_eq!(with_audio.total_duration(catalog, settings), 120_000);
    }

    #[test]
    fn delayed_cue_extends_total_duration() {
        let fixture = fixture();
        let catalog = &fixture.model.catalog;
        let settings = &fixture.model.settings.playback;
        let mut draft = firework_draft(&fixture, 0, 1);
        draft.delay = 5000;
        let (show, _) = fixture.model.show.add_sequence(draft);

        assert_eq!(show.total_duration(catalog, settings), 7000);
    }

    #[test]
    fn integrity_check_rejects_duplicate_ids_and_bad_ranges() {
        let fixture = fixture();
        let (show, id) = fixture
            .model
            .show
            .add_sequence(firework_draft(&fixture, 0, 1));
        assert!(show.check_integrity().is_ok());

        let mut duplicated = show.clone();
        let mut twin = duplicated.sequences[0].clone();
        twin.timestamp = 1000;
        duplicated.sequences.push(twin);
        assert_eq!(
            duplicated.check_integrity(),
            Err(ModelError::DuplicateSequence(id))
        );

        let mut out_of_range = show;
        out_of_range.sequences[0].area = 120;
        assert_eq!(
            out_of_range.check_integrity(),
            Err(ModelError::AreaOutOfRange(120))
        );
    }

    #[test]
    fn move_audio_clamps_to_zero() {
        let track = AudioTrack::from_url("https://example.com/a.mp3".to_string());
        let show = Show::new("Audio").with_audio_track(Some(track));
        assert_eq!(
            show.move_audio(4200).audio_track.unwrap().start_offset,
            4200
        );
        assert_eq!(show.move_audio(-10).audio_track.unwrap().start_offset, 0);
        assert_eq!(Show::new("Silent").move_audio(100).audio_track, None);
    }
}
