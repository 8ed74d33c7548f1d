use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{engine::hardware::DispatchError, executor::ExecutorEvent, model::cue::Sequence};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "param", rename_all = "camelCase")]
pub enum UiEvent {
    // Playback Events
    #[serde(rename_all = "camelCase")]
    PlaybackStarted { from_ms: u64 },
    #[serde(rename_all = "camelCase")]
    PlaybackPaused { position_ms: u64 },
    PlaybackStopped,
    PlaybackCompleted,
    /// A request that was refused without changing any state.
    PlaybackRejected { reason: String },
    #[serde(rename_all = "camelCase")]
    SequenceFired { sequence_id: Uuid },
    #[serde(rename_all = "camelCase")]
    SequenceMissed { sequence_id: Uuid, error: DispatchError },

    // Hardware Events
    #[serde(rename_all = "camelCase")]
    ControllerDisconnected { controller_id: Uuid },
    #[serde(rename_all = "camelCase")]
    ControllerStopped { controller_id: Uuid },
    #[serde(rename_all = "camelCase")]
    ControllerTested {
        controller_id: Uuid,
        error: Option<DispatchError>,
    },
    AudioError { error: String },

    // Model Events
    ShowModelLoaded,
    ShowUpdated,
    SequenceAdded { sequence: Sequence },
    #[serde(rename_all = "camelCase")]
    SequenceRemoved { sequence_id: Uuid },
    SequenceUpdated { sequence: Sequence },
    #[serde(rename_all = "camelCase")]
    AudioMoved { start_offset: u64 },
    AudioChanged,
    /// A rejected edit; nothing was applied.
    EditRejected { reason: String },
}

impl From<ExecutorEvent> for UiEvent {
    fn from(value: ExecutorEvent) -> Self {
        match value {
            ExecutorEvent::Fired { sequence_id, .. } => UiEvent::SequenceFired { sequence_id },
            ExecutorEvent::Missed {
                sequence_id, error, ..
            } => UiEvent::SequenceMissed { sequence_id, error },
            ExecutorEvent::EmergencyStopped { controller_id } => {
                UiEvent::ControllerStopped { controller_id }
            }
            ExecutorEvent::TestCompleted {
                controller_id,
                result,
            } => UiEvent::ControllerTested {
                controller_id,
                error: result.err(),
            },
            ExecutorEvent::AudioError { error } => UiEvent::AudioError { error },
        }
    }
}
