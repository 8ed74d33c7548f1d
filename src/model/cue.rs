use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{
    ModelError, catalog::EffectCatalog, device::ControllerEndpoint, settings::PlaybackSettings,
};

pub const AREA_RANGE: RangeInclusive<u8> = 1..=99;
pub const CHANNEL_RANGE: RangeInclusive<u8> = 1..=12;

fn default_repeat() -> u32 {
    1
}

/// Field ranges every sequence must satisfy, independent of catalog and controllers.
fn check_ranges(area: u8, repeat: u32, kind: &SequenceKind) -> Result<(), ModelError> {
    if !AREA_RANGE.contains(&area) {
        return Err(ModelError::AreaOutOfRange(area));
    }
    if repeat == 0 {
        return Err(ModelError::ZeroRepeat);
    }
    match kind {
        SequenceKind::Firework { channel, .. } if !CHANNEL_RANGE.contains(channel) => {
            Err(ModelError::ChannelOutOfRange(*channel))
        }
        SequenceKind::Lighting { relays, .. } => {
            match relays.iter().flatten().find(|r| **r == 0) {
                Some(relay) => Err(ModelError::RelayOutOfRange(*relay)),
                None => Ok(()),
            }
        }
        SequenceKind::Firework { .. } => Ok(()),
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Sequence {
    pub id: Uuid,
    /// Offset from show start in milliseconds.
    pub timestamp: u64,
    pub controller_id: Uuid,
    pub area: u8,
    /// Extra offset applied when the cue is fired.
    #[serde(default)]
    pub delay: u64,
    #[serde(default = "default_repeat")]
    pub repeat: u32,
    #[serde(flatten)]
    pub kind: SequenceKind,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SequenceKind {
    #[serde(rename_all = "camelCase")]
    Firework {
        firework_type_id: Uuid,
        channel: u8,
    },
    #[serde(rename_all = "camelCase")]
    Lighting {
        effect_type_id: Uuid,
        /// Set by resize edits; wins over the effect type default once present.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<u64>,
        /// Empty or absent targets every relay.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        relays: Option<Vec<u8>>,
    },
}

/// Relays addressed by a lighting fire command.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RelayTarget {
    All,
    Only(Vec<u8>),
}

impl Sequence {
    pub fn effective_duration(&self, catalog: &EffectCatalog, settings: &PlaybackSettings) -> u64 {
        match &self.kind {
            SequenceKind::Firework {
                firework_type_id, ..
            } => catalog
                .firework(firework_type_id)
                .map(|t| t.duration_ms)
                .unwrap_or(0),
            SequenceKind::Lighting {
                effect_type_id,
                duration,
                ..
            } => duration
                .or_else(|| {
                    catalog
                        .lighting(effect_type_id)
                        .and_then(|t| t.default_duration_ms)
                })
                .unwrap_or(settings.lighting_fallback_duration_ms),
        }
    }

    /// End of the occupied interval `[timestamp, timestamp + effective_duration)`.
    pub fn occupied_end(&self, catalog: &EffectCatalog, settings: &PlaybackSettings) -> u64 {
        self.timestamp
            .saturating_add(self.effective_duration(catalog, settings))
    }

    pub fn fire_at(&self) -> u64 {
        self.timestamp.saturating_add(self.delay)
    }

    /// When the effect is over on the hardware: ignition plus effective duration.
    /// Equals `occupied_end` unless the sequence carries a delay.
    pub fn active_end(&self, catalog: &EffectCatalog, settings: &PlaybackSettings) -> u64 {
        self.fire_at()
            .saturating_add(self.effective_duration(catalog, settings))
    }

    pub fn check_ranges(&self) -> Result<(), ModelError> {
        check_ranges(self.area, self.repeat, &self.kind)
    }

    pub fn is_firework(&self) -> bool {
        matches!(self.kind, SequenceKind::Firework { .. })
    }

    pub fn relay_target(&self) -> Option<RelayTarget> {
        match &self.kind {
            SequenceKind::Firework { .. } => None,
            SequenceKind::Lighting { relays, .. } => Some(match relays {
                Some(relays) if !relays.is_empty() => RelayTarget::Only(relays.clone()),
                _ => RelayTarget::All,
            }),
        }
    }
}

/// A sequence before it has been given an identity.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SequenceDraft {
    pub timestamp: u64,
    pub controller_id: Uuid,
    pub area: u8,
    #[serde(default)]
    pub delay: u64,
    #[serde(default = "default_repeat")]
    pub repeat: u32,
    #[serde(flatten)]
    pub kind: SequenceKind,
}

impl SequenceDraft {
    pub fn validate(
        &self,
        catalog: &EffectCatalog,
        controllers: &[ControllerEndpoint],
    ) -> Result<(), ModelError> {
        check_ranges(self.area, self.repeat, &self.kind)?;
        if !controllers.iter().any(|c| c.id.eq(&self.controller_id)) {
            return Err(ModelError::UnknownController(self.controller_id));
        }
        match &self.kind {
            SequenceKind::Firework {
                firework_type_id, ..
            } => {
                if catalog.firework(firework_type_id).is_none() {
                    return Err(ModelError::UnknownFireworkType(*firework_type_id));
                }
            }
            SequenceKind::Lighting { effect_type_id, .. } => {
                if catalog.lighting(effect_type_id).is_none() {
                    return Err(ModelError::UnknownLightingType(*effect_type_id));
                }
            }
        }
        Ok(())
    }

    pub fn into_sequence(self, id: Uuid) -> Sequence {
        Sequence {
            id,
            timestamp: self.timestamp,
            controller_id: self.controller_id,
            area: self.area,
            delay: self.delay,
            repeat: self.repeat,
            kind: self.kind,
        }
    }
}
