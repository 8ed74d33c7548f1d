use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::Utc;
use tokio::sync::{RwLock, RwLockReadGuard, broadcast, watch};
use uuid::Uuid;

use crate::{
    engine::probe::probe_audio_file,
    event::UiEvent,
    model::{
        ModelError, Show, ShowModel,
        audio::AudioTrack,
        catalog::{EffectCatalog, FireworkType, LightingEffectType},
        cue::{Sequence, SequenceDraft},
        device::ControllerEndpoint,
        document::ShowDocument,
        settings::ShowSettings,
    },
};

/// Read-only view of the show model for components that only take snapshots.
#[derive(Clone)]
pub struct ShowModelHandle {
    state: Arc<RwLock<ShowModel>>,
    revision_rx: watch::Receiver<u64>,
}

impl ShowModelHandle {
    pub async fn read(&self) -> RwLockReadGuard<'_, ShowModel> {
        self.state.read().await
    }

    pub async fn snapshot(&self) -> ShowModel {
        self.read().await.clone()
    }

    pub async fn get_sequence_by_id(&self, sequence_id: &Uuid) -> Option<Sequence> {
        self.read().await.show.sequence(sequence_id).cloned()
    }

    /// Changes every time the model is replaced.
    pub fn revisions(&self) -> watch::Receiver<u64> {
        self.revision_rx.clone()
    }
}

/// Sole writer of the show model. Every edit goes through a value-returning
/// model operation and replaces the stored snapshot.
#[derive(Clone)]
pub struct ShowModelManager {
    state: Arc<RwLock<ShowModel>>,
    revision_tx: Arc<watch::Sender<u64>>,
    event_tx: broadcast::Sender<UiEvent>,
}

impl ShowModelManager {
    pub fn new(event_tx: broadcast::Sender<UiEvent>) -> (Self, ShowModelHandle) {
        Self::with_model(ShowModel::default(), event_tx)
    }

    pub fn with_model(
        model: ShowModel,
        event_tx: broadcast::Sender<UiEvent>,
    ) -> (Self, ShowModelHandle) {
        let state = Arc::new(RwLock::new(model));
        let (revision_tx, revision_rx) = watch::channel(0u64);
        let manager = Self {
            state: state.clone(),
            revision_tx: Arc::new(revision_tx),
            event_tx,
        };
        (manager, ShowModelHandle { state, revision_rx })
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, ShowModel> {
        self.state.read().await
    }

    pub async fn snapshot(&self) -> ShowModel {
        self.read().await.clone()
    }

    fn notify(&self, event: UiEvent) {
        if self.event_tx.send(event).is_err() {
            log::trace!("No UI clients are listening to model events.");
        }
    }

    fn bump_revision(&self) {
        self.revision_tx.send_modify(|revision| *revision += 1);
    }

    /// Runs `op` against the current model and stores the show it returns.
    /// Nothing is stored when `op` fails or returns an identical show.
    async fn apply_show<F, R>(&self, op: F) -> Result<R, ModelError>
    where
        F: FnOnce(&ShowModel) -> Result<(Show, R), ModelError>,
    {
        let mut guard = self.state.write().await;
        let (mut next, result) = op(&*guard)?;
        if next != guard.show {
            next.updated_at = Utc::now();
            guard.show = next;
            drop(guard);
            self.bump_revision();
        }
        Ok(result)
    }

    async fn write_with<F, R>(&self, updater: F) -> R
    where
        F: FnOnce(&mut ShowModel) -> R,
    {
        let mut guard = self.state.write().await;
        let result = updater(&mut *guard);
        drop(guard);
        self.bump_revision();
        result
    }

    pub async fn add_sequence(&self, draft: SequenceDraft) -> Result<Uuid, ModelError> {
        let (id, sequence) = self
            .apply_show(|model| {
                draft.validate(&model.catalog, &model.controllers)?;
                let (show, id) = model.show.add_sequence(draft);
                let sequence = show.sequence(&id).cloned();
                Ok((show, (id, sequence)))
            })
            .await?;
        if let Some(sequence) = sequence {
            self.notify(UiEvent::SequenceAdded { sequence });
        }
        Ok(id)
    }

    pub async fn remove_sequence(&self, sequence_id: &Uuid) {
        let existed = self
            .apply_show(|model| {
                Ok((
                    model.show.remove_sequence(sequence_id),
                    model.show.sequence(sequence_id).is_some(),
                ))
            })
            .await
            .unwrap_or(false);
        if existed {
            self.notify(UiEvent::SequenceRemoved {
                sequence_id: *sequence_id,
            });
        }
    }

    pub async fn move_sequence(
        &self,
        sequence_id: &Uuid,
        new_timestamp: i64,
    ) -> Result<(), ModelError> {
        let sequence = self
            .apply_show(|model| {
                if model.show.sequence(sequence_id).is_none() {
                    return Err(ModelError::SequenceNotFound(*sequence_id));
                }
                let show = model.show.move_sequence(sequence_id, new_timestamp);
                let sequence = show.sequence(sequence_id).cloned();
                Ok((show, sequence))
            })
            .await?;
        if let Some(sequence) = sequence {
            self.notify(UiEvent::SequenceUpdated { sequence });
        }
        Ok(())
    }

    pub async fn resize_sequence(
        &self,
        sequence_id: &Uuid,
        new_duration: i64,
    ) -> Result<(), ModelError> {
        let sequence = self
            .apply_show(|model| {
                let existing = model
                    .show
                    .sequence(sequence_id)
                    .ok_or(ModelError::SequenceNotFound(*sequence_id))?;
                if existing.is_firework() {
                    return Err(ModelError::NotResizable(*sequence_id));
                }
                let show = model.show.resize_sequence(
                    sequence_id,
                    new_duration,
                    model.settings.playback.min_lighting_duration_ms,
                );
                let sequence = show.sequence(sequence_id).cloned();
                Ok((show, sequence))
            })
            .await?;
        if let Some(sequence) = sequence {
            self.notify(UiEvent::SequenceUpdated { sequence });
        }
        Ok(())
    }

    pub async fn move_audio(&self, new_start_offset: i64) -> Result<(), ModelError> {
        let start_offset = self
            .apply_show(|model| {
                if model.show.audio_track.is_none() {
                    return Err(ModelError::NoAudioTrack);
                }
                let show = model.show.move_audio(new_start_offset);
                let start_offset = show
                    .audio_track
                    .as_ref()
                    .map(|t| t.start_offset)
                    .unwrap_or(0);
                Ok((show, start_offset))
            })
            .await?;
        self.notify(UiEvent::AudioMoved { start_offset });
        Ok(())
    }

    /// Runs an edit gesture step against the current model while holding the
    /// write lock, so edits from other connections are never overwritten.
    /// `None` keeps the current show.
    pub async fn apply_gesture<F>(&self, gesture: F)
    where
        F: FnOnce(&ShowModel) -> Option<Show>,
    {
        let changed = self
            .apply_show(|model| {
                let show = gesture(model).unwrap_or_else(|| model.show.clone());
                let changed = model.show != show;
                Ok((show, changed))
            })
            .await
            .unwrap_or(false);
        if changed {
            self.notify(UiEvent::ShowUpdated);
        }
    }

    /// Attaches a file-backed track and resolves its duration in the background.
    pub async fn attach_audio_file(&self, path: PathBuf) -> Uuid {
        let track = AudioTrack::from_file(path);
        let track_id = track.id;
        self.set_audio_track(Some(track)).await;

        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.resolve_audio_duration(track_id).await {
                log::error!("Failed to resolve audio duration: {:?}", e);
                manager.notify(UiEvent::AudioError {
                    error: e.to_string(),
                });
            }
        });
        track_id
    }

    /// Remote tracks are referenced only; their duration is set by the caller.
    pub async fn attach_audio_url(&self, url: String, duration: Option<u64>) -> Uuid {
        let mut track = AudioTrack::from_url(url);
        track.duration = duration;
        let track_id = track.id;
        self.set_audio_track(Some(track)).await;
        track_id
    }

    pub async fn detach_audio(&self) {
        self.set_audio_track(None).await;
    }

    async fn set_audio_track(&self, track: Option<AudioTrack>) {
        // with_audio_track cannot fail
        let _ = self
            .apply_show(|model| Ok((model.show.with_audio_track(track), ())))
            .await;
        self.notify(UiEvent::AudioChanged);
    }

    pub async fn resolve_audio_duration(&self, track_id: Uuid) -> Result<(), anyhow::Error> {
        let path = {
            let model = self.read().await;
            match model.show.audio_track.as_ref() {
                Some(track) if track.id == track_id => track.file_path.clone(),
                _ => None,
            }
        };
        let Some(path) = path else {
            log::warn!("Audio track '{}' is not attached to a file.", track_id);
            return Ok(());
        };

        let probe = tokio::task::spawn_blocking(move || probe_audio_file(&path)).await??;
        log::info!(
            "Audio track '{}' resolved: {} ms, {} bytes",
            track_id,
            probe.duration_ms,
            probe.size_bytes
        );

        let _ = self
            .apply_show(|model| {
                let mut show = model.show.clone();
                if let Some(track) = show.audio_track.as_mut().filter(|t| t.id == track_id) {
                    track.duration = Some(probe.duration_ms);
                    track.size_bytes = Some(probe.size_bytes);
                }
                Ok((show, ()))
            })
            .await;
        self.notify(UiEvent::AudioChanged);
        Ok(())
    }

    pub async fn set_catalog(&self, catalog: EffectCatalog) {
        self.write_with(|model| model.catalog = catalog).await;
        self.notify(UiEvent::ShowUpdated);
    }

    pub async fn upsert_firework_type(&self, firework_type: FireworkType) {
        self.write_with(|model| model.catalog.upsert_firework(firework_type))
            .await;
        self.notify(UiEvent::ShowUpdated);
    }

    pub async fn upsert_lighting_type(&self, effect_type: LightingEffectType) {
        self.write_with(|model| model.catalog.upsert_lighting(effect_type))
            .await;
        self.notify(UiEvent::ShowUpdated);
    }

    pub async fn register_controller(&self, endpoint: ControllerEndpoint) {
        log::info!(
            "Controller '{}' registered at {}",
            endpoint.name,
            endpoint.address
        );
        self.write_with(|model| {
            model.controllers.retain(|c| c.id != endpoint.id);
            model.controllers.push(endpoint);
        })
        .await;
    }

    pub async fn update_settings(&self, settings: ShowSettings) {
        self.write_with(|model| model.settings = settings).await;
    }

    pub async fn export_document(&self) -> ShowDocument {
        let model = self.read().await;
        ShowDocument::export(&model.show, &model.catalog)
    }

    /// Replaces show and catalog. An invalid document leaves the model untouched.
    pub async fn import_document(&self, document: ShowDocument) -> Result<(), ModelError> {
        let (show, catalog) = document.into_parts()?;
        self.write_with(|model| {
            model.show = show;
            model.catalog = catalog;
        })
        .await;
        self.notify(UiEvent::ShowModelLoaded);
        Ok(())
    }

    pub async fn load_from_file(&self, path: &Path) -> Result<(), anyhow::Error> {
        let content = tokio::fs::read_to_string(path).await?;

        let document: ShowDocument =
            tokio::task::spawn_blocking(move || serde_json::from_str(&content)).await??;

        self.import_document(document).await?;

        log::info!("Show loaded from: {}", path.display());
        Ok(())
    }

    pub async fn save_to_file(&self, path: &Path) -> Result<(), anyhow::Error> {
        let document = self.export_document().await;

        let content =
            tokio::task::spawn_blocking(move || serde_json::to_string_pretty(&document)).await??;

        tokio::fs::write(path, content).await?;
        log::info!("Show saved to: {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        engine::probe::tests::write_wav,
        model::tests::{Fixture, firework_draft, fixture, lighting_draft},
    };

    fn setup_manager() -> (
        Fixture,
        ShowModelManager,
        ShowModelHandle,
        broadcast::Receiver<UiEvent>,
    ) {
        let fixture = fixture();
        let (event_tx, event_rx) = broadcast::channel::<UiEvent>(32);
        let (manager, handle) = ShowModelManager::with_model(fixture.model.clone(), event_tx);
        (fixture, manager, handle, event_rx)
    }

    #[tokio::test]
    async fn add_sequence_validates_and_announces() {
        let (fixture, manager, handle, mut event_rx) = setup_manager();
        let revisions = handle.revisions();

        let id = manager
            .add_sequence(firework_draft(&fixture, 1000, 2))
            .await
            .unwrap();

        assert!(revisions.has_changed().unwrap());
        assert_eq!(handle.get_sequence_by_id(&id).await.unwrap().timestamp, 1000);
        match event_rx.recv().await.unwrap() {
            UiEvent::SequenceAdded { sequence } => assert_eq!(sequence.id, id),
            other => panic!("Wrong UI event emitted: {:?}", other),
        }

        let mut invalid = firework_draft(&fixture, 0, 1);
        invalid.area = 0;
        assert_eq!(
            manager.add_sequence(invalid).await,
            Err(ModelError::AreaOutOfRange(0))
        );
        assert_eq!(handle.snapshot().await.show.sequences.len(), 1);
    }

    #[tokio::test]
    async fn snapshots_are_not_affected_by_later_edits() {
        let (fixture, manager, handle, _) = setup_manager();
        let id = manager
            .add_sequence(lighting_draft(&fixture, 1000))
            .await
            .unwrap();
        let before = handle.snapshot().await;

        manager.move_sequence(&id, 4000).await.unwrap();
        manager.resize_sequence(&id, 1200).await.unwrap();

        assert_eq!(before.show.sequence(&id).unwrap().timestamp, 1000);
        let after = handle.snapshot().await;
        let sequence = after.show.sequence(&id).unwrap();
        assert_eq!(sequence.timestamp, 4000);
        assert_eq!(after.effective_duration(sequence), 1200);
        assert!(after.show.updated_at >= before.show.updated_at);
    }

    #[tokio::test]
    async fn invalid_edits_are_rejected_without_change() {
        let (fixture, manager, handle, _) = setup_manager();
        let firework = manager
            .add_sequence(firework_draft(&fixture, 0, 1))
            .await
            .unwrap();
        let revision = *handle.revisions().borrow();

        assert_eq!(
            manager.resize_sequence(&firework, 900).await,
            Err(ModelError::NotResizable(firework))
        );
        let missing = Uuid::new_v4();
        assert_eq!(
            manager.move_sequence(&missing, 10).await,
            Err(ModelError::SequenceNotFound(missing))
        );
        assert_eq!(manager.move_audio(500).await, Err(ModelError::NoAudioTrack));
        manager.remove_sequence(&Uuid::new_v4()).await;
        assert_eq!(*handle.revisions().borrow(), revision);
    }

    #[tokio::test]
    async fn save_then_load_restores_show() {
        let (fixture, manager, _, _) = setup_manager();
        manager
            .add_sequence(firework_draft(&fixture, 500, 3))
            .await
            .unwrap();
        manager
            .attach_audio_url("https://example.com/show.mp3".to_string(), Some(42_000))
            .await;
        let saved = manager.snapshot().await;

        let path = std::env::temp_dir().join(format!("lume-show-{}.json", Uuid::new_v4()));
        manager.save_to_file(&path).await.unwrap();

        let (event_tx, mut event_rx) = broadcast::channel::<UiEvent>(32);
        let (loader, handle) = ShowModelManager::new(event_tx);
        loader.load_from_file(&path).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        let loaded = handle.snapshot().await;
        assert_eq!(loaded.show, saved.show);
        assert_eq!(loaded.catalog, saved.catalog);
        assert_eq!(event_rx.recv().await.unwrap(), UiEvent::ShowModelLoaded);
    }

    #[tokio::test]
    async fn attached_file_gets_probed_duration() {
        let (_, manager, handle, _) = setup_manager();
        let path = std::env::temp_dir().join(format!("lume-audio-{}.wav", Uuid::new_v4()));
        write_wav(&path, 8000, 16_000);

        let track_id = manager.attach_audio_file(path.clone()).await;

        let mut resolved = None;
        for _ in 0..100 {
            let snapshot = handle.snapshot().await;
            if let Some(duration) = snapshot.show.audio_track.as_ref().and_then(|t| t.duration) {
                resolved = Some((snapshot, duration));
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        std::fs::remove_file(&path).unwrap();

        let (snapshot, duration) = resolved.expect("audio duration was never resolved");
        assert_eq!(duration, 2000);
        assert_eq!(snapshot.show.audio_track.as_ref().unwrap().id, track_id);
        assert_eq!(snapshot.total_duration(), 2000);
    }

    #[tokio::test]
    async fn import_with_duplicate_sequence_ids_is_rejected() {
        let (fixture, manager, handle, mut event_rx) = setup_manager();
        let kept = manager
            .add_sequence(firework_draft(&fixture, 0, 1))
            .await
            .unwrap();
        let _ = event_rx.recv().await;
        let revision = *handle.revisions().borrow();

        let mut document = manager.export_document().await;
        let mut twin = document.show.sequences[0].clone();
        twin.timestamp = 1000;
        document.show.sequences.push(twin);
        assert_eq!(
            manager.import_document(document).await,
            Err(ModelError::DuplicateSequence(kept))
        );

        let mut document = manager.export_document().await;
        document.show.sequences[0].area = 120;
        assert_eq!(
            manager.import_document(document).await,
            Err(ModelError::AreaOutOfRange(120))
        );

        assert_eq!(*handle.revisions().borrow(), revision);
        assert_eq!(handle.snapshot().await.show.sequences.len(), 1);
        assert!(event_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn gesture_step_keeps_concurrent_edits() {
        let (fixture, manager, handle, _) = setup_manager();
        let dragged = manager
            .add_sequence(firework_draft(&fixture, 1000, 1))
            .await
            .unwrap();
        let stale = handle.snapshot().await;

        let added = manager
            .add_sequence(firework_draft(&fixture, 8000, 2))
            .await
            .unwrap();
        manager
            .apply_gesture(|model| Some(model.show.move_sequence(&dragged, 3000)))
            .await;

        let show = handle.snapshot().await.show;
        assert_eq!(show.sequence(&dragged).unwrap().timestamp, 3000);
        assert!(show.sequence(&added).is_some());
        assert!(stale.show.sequence(&added).is_none());

        let revision = *handle.revisions().borrow();
        manager.apply_gesture(|_| None).await;
        assert_eq!(*handle.revisions().borrow(), revision);
    }
}
