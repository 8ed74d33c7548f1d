use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    model::{ModelError, Show, ShowModel},
    timeline::Viewport,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    #[error("another gesture is already in progress")]
    GestureInProgress,
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// The single live pointer gesture. Offsets are pointer time minus the
/// grabbed edge, captured when the gesture starts.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum Gesture {
    #[default]
    Idle,
    #[serde(rename_all = "camelCase")]
    DraggingSequence { id: Uuid, grab_offset_ms: i64 },
    #[serde(rename_all = "camelCase")]
    DraggingAudio { grab_offset_ms: i64 },
    #[serde(rename_all = "camelCase")]
    ResizingSequence { id: Uuid, grab_offset_ms: i64 },
}

#[derive(Debug, Clone, Default)]
pub struct EditSession {
    gesture: Gesture,
    viewport: Option<Viewport>,
}

impl EditSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gesture(&self) -> Gesture {
        self.gesture
    }

    pub fn is_idle(&self) -> bool {
        self.gesture == Gesture::Idle
    }

    fn ensure_idle(&self) -> Result<(), EditError> {
        if self.is_idle() {
            Ok(())
        } else {
            Err(EditError::GestureInProgress)
        }
    }

    fn start(&mut self, gesture: Gesture, viewport: Viewport) {
        log::debug!("Gesture started: {:?}", gesture);
        self.gesture = gesture;
        self.viewport = Some(viewport);
    }

    pub fn begin_sequence_drag(
        &mut self,
        model: &ShowModel,
        id: Uuid,
        pointer: f64,
        viewport: Viewport,
    ) -> Result<(), EditError> {
        self.ensure_idle()?;
        let sequence = model
            .show
            .sequence(&id)
            .ok_or(ModelError::SequenceNotFound(id))?;
        let grab_offset_ms = viewport.to_time(pointer) as i64 - sequence.timestamp as i64;
        self.start(Gesture::DraggingSequence { id, grab_offset_ms }, viewport);
        Ok(())
    }

    /// Grabs the trailing edge of a lighting sequence.
    pub fn begin_sequence_resize(
        &mut self,
        model: &ShowModel,
        id: Uuid,
        pointer: f64,
        viewport: Viewport,
    ) -> Result<(), EditError> {
        self.ensure_idle()?;
        let sequence = model
            .show
            .sequence(&id)
            .ok_or(ModelError::SequenceNotFound(id))?;
        if sequence.is_firework() {
            return Err(ModelError::NotResizable(id).into());
        }
        let end = sequence.timestamp + model.effective_duration(sequence);
        let grab_offset_ms = viewport.to_time(pointer) as i64 - end as i64;
        self.start(Gesture::ResizingSequence { id, grab_offset_ms }, viewport);
        Ok(())
    }

    pub fn begin_audio_drag(
        &mut self,
        model: &ShowModel,
        pointer: f64,
        viewport: Viewport,
    ) -> Result<(), EditError> {
        self.ensure_idle()?;
        let track = model
            .show
            .audio_track
            .as_ref()
            .ok_or(ModelError::NoAudioTrack)?;
        let grab_offset_ms = viewport.to_time(pointer) as i64 - track.start_offset as i64;
        self.start(Gesture::DraggingAudio { grab_offset_ms }, viewport);
        Ok(())
    }

    /// Applies the active gesture at the new pointer position and returns the
    /// resulting show, or `None` when idle. A gesture whose sequence has
    /// disappeared is abandoned.
    pub fn pointer_moved(&mut self, model: &ShowModel, pointer: f64) -> Option<Show> {
        let viewport = self.viewport?;
        let pointer_ms = viewport.to_time(pointer) as i64;
        match self.gesture {
            Gesture::Idle => None,
            Gesture::DraggingSequence { id, grab_offset_ms } => {
                if model.show.sequence(&id).is_none() {
                    log::warn!("Dragged sequence '{}' no longer exists.", id);
                    self.release();
                    return None;
                }
                Some(model.show.move_sequence(&id, pointer_ms - grab_offset_ms))
            }
            Gesture::ResizingSequence { id, grab_offset_ms } => {
                let Some(sequence) = model.show.sequence(&id) else {
                    log::warn!("Resized sequence '{}' no longer exists.", id);
                    self.release();
                    return None;
                };
                let new_duration = pointer_ms - grab_offset_ms - sequence.timestamp as i64;
                Some(model.show.resize_sequence(
                    &id,
                    new_duration,
                    model.settings.playback.min_lighting_duration_ms,
                ))
            }
            Gesture::DraggingAudio { grab_offset_ms } => {
                if model.show.audio_track.is_none() {
                    self.release();
                    return None;
                }
                Some(model.show.move_audio(pointer_ms - grab_offset_ms))
            }
        }
    }

    /// Ends the gesture on pointer release or lost capture.
    pub fn release(&mut self) -> Gesture {
        let previous = std::mem::take(&mut self.gesture);
        self.viewport = None;
        if previous != Gesture::Idle {
            log::debug!("Gesture ended: {:?}", previous);
        }
        previous
    }

    /// Background click on the timeline. Ignored while a gesture is live.
    pub fn seek(&self, pointer: f64, viewport: Viewport) -> Option<u64> {
        if self.is_idle() {
            Some(viewport.to_time(pointer))
        } else {
            log::debug!("Seek ignored during {:?}", self.gesture);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        audio::AudioTrack,
        tests::{firework_draft, fixture, lighting_draft},
    };

    // 1 unit == 10 ms
    fn viewport() -> Viewport {
        Viewport::new(60_000, 6000.0)
    }

    #[test]
    fn drag_keeps_grab_offset_and_clamps_at_zero() {
        let fixture = fixture();
        let (show, id) = fixture
            .model
            .show
            .add_sequence(firework_draft(&fixture, 5000, 1));
        let model = ShowModel {
            show,
            ..fixture.model
        };
        let mut session = EditSession::new();

        session
            .begin_sequence_drag(&model, id, 520.0, viewport())
            .unwrap();
        let moved = session.pointer_moved(&model, 820.0).unwrap();
        assert_eq!(moved.sequence(&id).unwrap().timestamp, 8000);

        let moved = session.pointer_moved(&model, 10.0).unwrap();
        assert_eq!(moved.sequence(&id).unwrap().timestamp, 0);
        assert_eq!(
            session.release(),
            Gesture::DraggingSequence {
                id,
                grab_offset_ms: 200
            }
        );
        assert!(session.is_idle());
    }

    #[test]
    fn second_gesture_is_rejected() {
        let fixture = fixture();
        let (show, id) = fixture
            .model
            .show
            .add_sequence(lighting_draft(&fixture, 0));
        let show = show.with_audio_track(Some(AudioTrack::from_url(
            "https://example.com/a.mp3".to_string(),
        )));
        let model = ShowModel {
            show,
            ..fixture.model
        };
        let mut session = EditSession::new();

        session.begin_audio_drag(&model, 0.0, viewport()).unwrap();
        assert_eq!(
            session.begin_sequence_drag(&model, id, 0.0, viewport()),
            Err(EditError::GestureInProgress)
        );
        assert_eq!(
            session.begin_sequence_resize(&model, id, 500.0, viewport()),
            Err(EditError::GestureInProgress)
        );
        assert!(matches!(session.gesture(), Gesture::DraggingAudio { .. }));
    }

    #[test]
    fn resize_tracks_trailing_edge_with_minimum() {
        let fixture = fixture();
        let (show, id) = fixture
            .model
            .show
            .add_sequence(lighting_draft(&fixture, 1000));
        let model = ShowModel {
            show,
            ..fixture.model
        };
        let mut session = EditSession::new();

        // trailing edge at 6000 ms == 600 units
        session
            .begin_sequence_resize(&model, id, 600.0, viewport())
            .unwrap();
        let resized = session.pointer_moved(&model, 220.0).unwrap();
        let sequence = resized.sequence(&id).unwrap();
        assert_eq!(model.effective_duration(sequence), 1200);

        let resized = session.pointer_moved(&model, 50.0).unwrap();
        assert_eq!(model.effective_duration(resized.sequence(&id).unwrap()), 500);
    }

    #[test]
    fn fireworks_cannot_be_resized() {
        let fixture = fixture();
        let (show, id) = fixture
            .model
            .show
            .add_sequence(firework_draft(&fixture, 0, 1));
        let model = ShowModel {
            show,
            ..fixture.model
        };
        let mut session = EditSession::new();
        assert_eq!(
            session.begin_sequence_resize(&model, id, 200.0, viewport()),
            Err(EditError::Model(ModelError::NotResizable(id)))
        );
        assert!(session.is_idle());
    }

    #[test]
    fn audio_drag_moves_start_offset() {
        let fixture = fixture();
        let show = fixture.model.show.with_audio_track(Some(AudioTrack::from_url(
            "https://example.com/a.mp3".to_string(),
        )));
        let model = ShowModel {
            show,
            ..fixture.model
        };
        let mut session = EditSession::new();

        session.begin_audio_drag(&model, 30.0, viewport()).unwrap();
        let moved = session.pointer_moved(&model, 280.0).unwrap();
        assert_eq!(moved.audio_track.unwrap().start_offset, 2500);
        let moved = session.pointer_moved(&model, 0.0).unwrap();
        assert_eq!(moved.audio_track.unwrap().start_offset, 0);
    }

    #[test]
    fn seek_is_ignored_during_gesture() {
        let fixture = fixture();
        let (show, id) = fixture
            .model
            .show
            .add_sequence(firework_draft(&fixture, 0, 1));
        let model = ShowModel {
            show,
            ..fixture.model
        };
        let mut session = EditSession::new();
        assert_eq!(session.seek(300.0, viewport()), Some(3000));

        session
            .begin_sequence_drag(&model, id, 0.0, viewport())
            .unwrap();
        assert_eq!(session.seek(300.0, viewport()), None);
        session.release();
        assert_eq!(session.seek(300.0, viewport()), Some(3000));
    }

    #[test]
    fn vanished_sequence_abandons_gesture() {
        let fixture = fixture();
        let (show, id) = fixture
            .model
            .show
            .add_sequence(firework_draft(&fixture, 0, 1));
        let mut model = ShowModel {
            show,
            ..fixture.model
        };
        let mut session = EditSession::new();
        session
            .begin_sequence_drag(&model, id, 0.0, viewport())
            .unwrap();

        model.show = model.show.remove_sequence(&id);
        assert_eq!(session.pointer_moved(&model, 100.0), None);
        assert!(session.is_idle());
        assert_eq!(session.pointer_moved(&model, 200.0), None);
    }
}
