use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
    time::{self, Instant, Interval, MissedTickBehavior},
};
use uuid::Uuid;

use crate::{
    engine::{audio_engine::AudioCommand, hardware::DispatchError},
    event::UiEvent,
    executor::{ExecutorCommand, ExecutorEvent, FireAction, FireRequest},
    manager::ShowModelHandle,
    model::{
        ShowModel,
        audio::AudioTrack,
        cue::{Sequence, SequenceKind},
        device::ControllerEndpoint,
        settings::PlaybackSettings,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackStatus {
    Stopped,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    /// Registered but not contacted yet.
    Unknown,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowState {
    pub status: PlaybackStatus,
    pub position_ms: u64,
    pub total_duration_ms: u64,
    pub fired_sequences: Vec<Uuid>,
    pub controllers: HashMap<Uuid, ConnectionStatus>,
}

impl ShowState {
    pub fn new() -> Self {
        Self {
            status: PlaybackStatus::Stopped,
            position_ms: 0,
            total_duration_ms: 0,
            fired_sequences: Vec::new(),
            controllers: HashMap::new(),
        }
    }
}

impl Default for ShowState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum PlaybackCommand {
    /// Starts from `from_ms`, or from the cursor left by a seek or pause.
    #[serde(rename_all = "camelCase")]
    Play { from_ms: Option<u64> },
    Pause,
    Resume,
    #[serde(rename_all = "camelCase")]
    Seek { position_ms: u64 },
    Stop,
    #[serde(rename_all = "camelCase")]
    TestController { controller_id: Uuid },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("the show has no sequences to play")]
    EmptyShow,
    #[error("cannot {command} while {status:?}")]
    InvalidTransition {
        command: &'static str,
        status: PlaybackStatus,
    },
    #[error("unknown controller '{0}'")]
    UnknownController(Uuid),
}

/// One scheduled ignition. Lighting sequences with repeats own several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TaskKey {
    sequence_id: Uuid,
    repetition: u32,
}

#[derive(Debug)]
enum TimerEvent {
    Due { epoch: u64, key: TaskKey },
    Completed { epoch: u64 },
}

/// Playback state machine. All transitions run on this actor's loop, one at a
/// time; timer tasks only post wake-ups back to it.
pub struct CueScheduler {
    model_handle: ShowModelHandle,
    executor_tx: mpsc::Sender<ExecutorCommand>,
    command_rx: mpsc::Receiver<PlaybackCommand>,
    event_rx: mpsc::Receiver<ExecutorEvent>,
    state_tx: watch::Sender<ShowState>,
    ui_event_tx: broadcast::Sender<UiEvent>,
    revision_rx: watch::Receiver<u64>,
    timer_tx: mpsc::Sender<TimerEvent>,
    timer_rx: mpsc::Receiver<TimerEvent>,

    status: PlaybackStatus,
    // show time where the next play starts when not playing
    cursor_ms: u64,
    // show time at `started_at`
    anchor_ms: u64,
    started_at: Instant,
    // bumped on every cancellation; wake-ups from older epochs are dropped
    epoch: u64,
    snapshot: ShowModel,
    pending: HashMap<TaskKey, JoinHandle<()>>,
    completion: Option<JoinHandle<()>>,
    fired: HashSet<TaskKey>,
    controllers: HashMap<Uuid, ConnectionStatus>,
    // controllers fired at since the last stop, even if later edited out of the show
    dispatched: HashMap<Uuid, ControllerEndpoint>,
    audio_instance: Option<Uuid>,
}

impl CueScheduler {
    pub fn new(
        model_handle: ShowModelHandle,
        executor_tx: mpsc::Sender<ExecutorCommand>,
        command_rx: mpsc::Receiver<PlaybackCommand>,
        event_rx: mpsc::Receiver<ExecutorEvent>,
        state_tx: watch::Sender<ShowState>,
        ui_event_tx: broadcast::Sender<UiEvent>,
    ) -> Self {
        let (timer_tx, timer_rx) = mpsc::channel::<TimerEvent>(64);
        let revision_rx = model_handle.revisions();
        Self {
            model_handle,
            executor_tx,
            command_rx,
            event_rx,
            state_tx,
            ui_event_tx,
            revision_rx,
            timer_tx,
            timer_rx,
            status: PlaybackStatus::Stopped,
            cursor_ms: 0,
            anchor_ms: 0,
            started_at: Instant::now(),
            epoch: 0,
            snapshot: ShowModel::default(),
            pending: HashMap::new(),
            completion: None,
            fired: HashSet::new(),
            controllers: HashMap::new(),
            dispatched: HashMap::new(),
            audio_instance: None,
        }
    }

    pub async fn run(mut self) {
        log::info!("CueScheduler run loop started.");
        self.snapshot = self.model_handle.snapshot().await;
        let mut progress = progress_timer(&self.snapshot.settings.playback);

        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    let Some(command) = command else { break };
                    log::debug!("CueScheduler received command: {:?}", command);
                    if let Err(e) = self.handle_command(command).await {
                        log::warn!("Playback request rejected: {}", e);
                        self.notify(UiEvent::PlaybackRejected { reason: e.to_string() });
                    }
                    self.publish_state();
                },
                Some(timer) = self.timer_rx.recv() => {
                    if let Err(e) = self.handle_timer(timer).await {
                        log::error!("Error handling timer event: {:?}", e);
                    }
                    self.publish_state();
                },
                Some(event) = self.event_rx.recv() => {
                    self.handle_executor_event(event);
                    self.publish_state();
                },
                Ok(()) = self.revision_rx.changed() => {
                    if let Err(e) = self.handle_model_changed().await {
                        log::error!("Error rescheduling after edit: {:?}", e);
                    }
                    if progress.period() != progress_period(&self.snapshot.settings.playback) {
                        progress = progress_timer(&self.snapshot.settings.playback);
                    }
                    self.publish_state();
                },
                _ = progress.tick(), if self.status == PlaybackStatus::Playing => {
                    self.publish_state();
                },
                else => break,
            }
        }

        self.cancel_pending();
        log::info!("CueScheduler run loop finished.");
    }

    async fn handle_command(&mut self, command: PlaybackCommand) -> Result<(), PlaybackError> {
        match command {
            PlaybackCommand::Play { from_ms } => self.handle_play(from_ms).await,
            PlaybackCommand::Pause => self.handle_pause().await,
            PlaybackCommand::Resume => {
                if self.status != PlaybackStatus::Paused {
                    return Err(PlaybackError::InvalidTransition {
                        command: "resume",
                        status: self.status,
                    });
                }
                self.handle_play(None).await
            }
            PlaybackCommand::Seek { position_ms } => self.handle_seek(position_ms).await,
            PlaybackCommand::Stop => {
                self.handle_stop().await;
                Ok(())
            }
            PlaybackCommand::TestController { controller_id } => {
                let endpoint = self
                    .model_handle
                    .read()
                    .await
                    .controller(&controller_id)
                    .cloned()
                    .ok_or(PlaybackError::UnknownController(controller_id))?;
                self.send_executor(ExecutorCommand::TestChannels(endpoint))
                    .await;
                Ok(())
            }
        }
    }

    async fn handle_play(&mut self, from_ms: Option<u64>) -> Result<(), PlaybackError> {
        if self.status == PlaybackStatus::Playing {
            return Err(PlaybackError::InvalidTransition {
                command: "play",
                status: self.status,
            });
        }
        let model = self.model_handle.snapshot().await;
        if model.show.sequences.is_empty() {
            return Err(PlaybackError::EmptyShow);
        }

        match (self.status, from_ms) {
            (PlaybackStatus::Stopped, _) => self.fired.clear(),
            // an explicit start point behaves like a seek
            (PlaybackStatus::Paused, Some(from_ms)) => self.prune_fired(&model, from_ms),
            _ => {}
        }
        let from_ms = from_ms.unwrap_or(self.cursor_ms);
        log::info!("PLAY: from {} ms", from_ms);
        self.status = PlaybackStatus::Playing;
        self.start_run(model, from_ms);
        self.restart_audio(from_ms).await;
        self.notify(UiEvent::PlaybackStarted { from_ms });
        Ok(())
    }

    async fn handle_pause(&mut self) -> Result<(), PlaybackError> {
        if self.status != PlaybackStatus::Playing {
            return Err(PlaybackError::InvalidTransition {
                command: "pause",
                status: self.status,
            });
        }
        let position_ms = self.position_ms();
        self.cancel_pending();
        self.stop_audio().await;
        self.cursor_ms = position_ms;
        self.status = PlaybackStatus::Paused;
        log::info!("PAUSE: at {} ms", position_ms);
        self.notify(UiEvent::PlaybackPaused { position_ms });
        Ok(())
    }

    async fn handle_seek(&mut self, position_ms: u64) -> Result<(), PlaybackError> {
        let model = self.model_handle.snapshot().await;
        self.prune_fired(&model, position_ms);

        log::info!("SEEK: to {} ms while {:?}", position_ms, self.status);
        match self.status {
            PlaybackStatus::Playing => {
                self.start_run(model, position_ms);
                self.restart_audio(position_ms).await;
            }
            PlaybackStatus::Paused | PlaybackStatus::Stopped => {
                self.cursor_ms = position_ms;
                self.snapshot = model;
            }
        }
        Ok(())
    }

    /// Forgets ignitions at or after `position_ms` so they may fire again.
    fn prune_fired(&mut self, model: &ShowModel, position_ms: u64) {
        self.fired.retain(|key| {
            model
                .show
                .sequence(&key.sequence_id)
                .and_then(|s| repetition_at(model, s, key.repetition))
                .is_some_and(|at| at < position_ms)
        });
    }

    async fn handle_stop(&mut self) {
        self.cancel_pending();
        self.stop_audio().await;
        self.status = PlaybackStatus::Stopped;
        self.cursor_ms = 0;
        self.fired.clear();
        log::info!("STOP");
        self.emergency_stop_all().await;
        self.snapshot = self.model_handle.snapshot().await;
        self.notify(UiEvent::PlaybackStopped);
    }

    async fn handle_model_changed(&mut self) -> Result<(), anyhow::Error> {
        let model = self.model_handle.snapshot().await;
        if self.status == PlaybackStatus::Playing {
            let position_ms = self.position_ms();
            log::debug!("Show edited during playback, rescheduling at {} ms", position_ms);
            // audio keeps playing unless the track itself was moved or replaced
            let audio_changed = audio_placement(self.snapshot.show.audio_track.as_ref())
                != audio_placement(model.show.audio_track.as_ref());
            self.start_run(model, position_ms);
            if audio_changed {
                self.restart_audio(position_ms).await;
            }
        } else {
            self.snapshot = model;
        }
        Ok(())
    }

    async fn handle_timer(&mut self, timer: TimerEvent) -> Result<(), anyhow::Error> {
        match timer {
            TimerEvent::Due { epoch, key } => {
                if epoch != self.epoch || self.pending.remove(&key).is_none() {
                    log::trace!("Dropping stale wake-up for {:?}", key);
                    return Ok(());
                }
                self.dispatch(key).await?;
            }
            TimerEvent::Completed { epoch } => {
                if epoch != self.epoch || self.status != PlaybackStatus::Playing {
                    return Ok(());
                }
                log::info!("Show completed at {} ms", self.position_ms());
                self.completion = None;
                self.cancel_pending();
                self.stop_audio().await;
                self.status = PlaybackStatus::Stopped;
                self.cursor_ms = 0;
                self.fired.clear();
                self.emergency_stop_all().await;
                self.notify(UiEvent::PlaybackCompleted);
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, key: TaskKey) -> Result<(), anyhow::Error> {
        let Some(sequence) = self.snapshot.show.sequence(&key.sequence_id).cloned() else {
            return Ok(());
        };
        self.fired.insert(key);

        let Some(controller) = self.snapshot.controller(&sequence.controller_id).cloned() else {
            log::warn!(
                "Sequence '{}' missed: controller '{}' is not registered.",
                sequence.id,
                sequence.controller_id
            );
            self.notify(UiEvent::SequenceMissed {
                sequence_id: sequence.id,
                error: DispatchError::Connection("controller not registered".to_string()),
            });
            return Ok(());
        };

        let action = match &sequence.kind {
            SequenceKind::Firework { channel, .. } => FireAction::Channel(*channel),
            SequenceKind::Lighting { .. } => match sequence.relay_target() {
                Some(relays) => FireAction::Relays(relays),
                None => return Ok(()),
            },
        };
        self.dispatched.insert(controller.id, controller.clone());
        log::info!(
            "FIRE: sequence '{}' (repetition {}) on '{}' area {} at {} ms",
            sequence.id,
            key.repetition,
            controller.name,
            sequence.area,
            self.position_ms()
        );
        self.executor_tx
            .send(ExecutorCommand::Fire(FireRequest {
                sequence_id: sequence.id,
                controller,
                area: sequence.area,
                action,
            }))
            .await?;
        Ok(())
    }

    fn handle_executor_event(&mut self, event: ExecutorEvent) {
        match &event {
            ExecutorEvent::Fired { controller_id, .. } => {
                self.controllers
                    .insert(*controller_id, ConnectionStatus::Connected);
            }
            ExecutorEvent::Missed {
                sequence_id,
                controller_id,
                error,
            } => {
                log::warn!("Sequence '{}' missed: {}", sequence_id, error);
                if error.is_network() {
                    self.mark_disconnected(*controller_id);
                }
            }
            ExecutorEvent::TestCompleted {
                controller_id,
                result,
            } => match result {
                Ok(()) => {
                    self.controllers
                        .insert(*controller_id, ConnectionStatus::Connected);
                }
                Err(error) if error.is_network() => self.mark_disconnected(*controller_id),
                Err(error) => log::warn!("Channel test rejected: {}", error),
            },
            ExecutorEvent::EmergencyStopped { .. } | ExecutorEvent::AudioError { .. } => {}
        }
        self.notify(event.into());
    }

    fn mark_disconnected(&mut self, controller_id: Uuid) {
        let previous = self
            .controllers
            .insert(controller_id, ConnectionStatus::Disconnected);
        if previous != Some(ConnectionStatus::Disconnected) {
            log::error!("Controller '{}' marked as disconnected.", controller_id);
            self.notify(UiEvent::ControllerDisconnected { controller_id });
        }
    }

    /// Cancels whatever is scheduled and schedules `model` from `from_ms`.
    /// Audio is left alone.
    fn start_run(&mut self, model: ShowModel, from_ms: u64) {
        self.cancel_pending();
        self.snapshot = model;
        self.anchor_ms = from_ms;
        self.started_at = Instant::now();

        let mut schedule = Vec::new();
        for sequence in &self.snapshot.show.sequences {
            if sequence.active_end(&self.snapshot.catalog, &self.snapshot.settings.playback)
                < from_ms
            {
                continue;
            }
            for (repetition, at) in repetition_times(&self.snapshot, sequence) {
                let key = TaskKey {
                    sequence_id: sequence.id,
                    repetition,
                };
                if self.fired.contains(&key) {
                    continue;
                }
                if at >= from_ms {
                    schedule.push((key, at - from_ms));
                } else if repetition == 0 {
                    // interval already under way: catch up now
                    schedule.push((key, 0));
                }
            }
        }
        for (key, delay_ms) in schedule {
            self.schedule(key, delay_ms);
        }

        let total_ms = self.snapshot.total_duration();
        let completion_ms = total_ms.saturating_sub(from_ms)
            + self.snapshot.settings.playback.completion_buffer_ms;
        let deadline = self.started_at + Duration::from_millis(completion_ms);
        let timer_tx = self.timer_tx.clone();
        let epoch = self.epoch;
        self.completion = Some(tokio::spawn(async move {
            time::sleep_until(deadline).await;
            let _ = timer_tx.send(TimerEvent::Completed { epoch }).await;
        }));
        log::debug!(
            "Scheduled {} ignitions from {} ms, completion in {} ms",
            self.pending.len(),
            from_ms,
            completion_ms
        );
    }

    fn schedule(&mut self, key: TaskKey, delay_ms: u64) {
        let deadline = self.started_at + Duration::from_millis(delay_ms);
        let timer_tx = self.timer_tx.clone();
        let epoch = self.epoch;
        let handle = tokio::spawn(async move {
            time::sleep_until(deadline).await;
            let _ = timer_tx.send(TimerEvent::Due { epoch, key }).await;
        });
        if let Some(previous) = self.pending.insert(key, handle) {
            previous.abort();
        }
    }

    /// Aborts every pending timer. Wake-ups already queued carry the old epoch
    /// and are dropped when they arrive.
    fn cancel_pending(&mut self) {
        self.epoch += 1;
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
        if let Some(handle) = self.completion.take() {
            handle.abort();
        }
    }

    async fn restart_audio(&mut self, from_ms: u64) {
        self.stop_audio().await;
        self.start_audio(from_ms).await;
    }

    async fn start_audio(&mut self, from_ms: u64) {
        let Some(track) = self.snapshot.show.audio_track.clone() else {
            return;
        };
        let Some(filepath) = track.file_path else {
            log::warn!("Audio track '{}' has no local file, not playing it.", track.name);
            return;
        };
        let offset = from_ms as i64 - track.start_offset as i64;
        if track.duration.is_some_and(|d| offset >= d as i64) {
            return;
        }
        let (start_position, delay) = if offset >= 0 {
            (Duration::from_millis(offset as u64), Duration::ZERO)
        } else {
            (Duration::ZERO, Duration::from_millis(offset.unsigned_abs()))
        };

        let id = Uuid::now_v7();
        self.audio_instance = Some(id);
        self.send_executor(ExecutorCommand::Audio(AudioCommand::Play {
            id,
            filepath,
            start_position,
            delay,
        }))
        .await;
    }

    async fn stop_audio(&mut self) {
        if let Some(id) = self.audio_instance.take() {
            self.send_executor(ExecutorCommand::Audio(AudioCommand::Stop { id }))
                .await;
        }
    }

    /// Every registered controller, every controller the show references and
    /// every controller fired at since the last stop, whether or not anything
    /// is still scheduled for it.
    async fn emergency_stop_all(&mut self) {
        let latest = self.model_handle.snapshot().await;
        let mut endpoints: Vec<ControllerEndpoint> = latest.controllers.clone();
        let mut add = |endpoint: &ControllerEndpoint| {
            if !endpoints.iter().any(|e| e.id == endpoint.id) {
                endpoints.push(endpoint.clone());
            }
        };

        let mut referenced = latest.show.referenced_controllers();
        for id in self.snapshot.show.referenced_controllers() {
            if !referenced.contains(&id) {
                referenced.push(id);
            }
        }
        for id in &referenced {
            match latest.controller(id).or_else(|| self.snapshot.controller(id)) {
                Some(endpoint) => add(endpoint),
                None => log::warn!("Cannot emergency-stop unregistered controller '{}'.", id),
            }
        }
        for endpoint in self.snapshot.controllers.iter().chain(self.dispatched.values()) {
            add(endpoint);
        }
        self.dispatched.clear();

        if !endpoints.is_empty() {
            self.send_executor(ExecutorCommand::EmergencyStop(endpoints))
                .await;
        }
    }

    async fn send_executor(&self, command: ExecutorCommand) {
        if let Err(e) = self.executor_tx.send(command).await {
            log::error!("Failed to send command to Executor: {}", e);
        }
    }

    fn position_ms(&self) -> u64 {
        match self.status {
            PlaybackStatus::Playing => {
                self.anchor_ms + self.started_at.elapsed().as_millis() as u64
            }
            PlaybackStatus::Paused | PlaybackStatus::Stopped => self.cursor_ms,
        }
    }

    fn notify(&self, event: UiEvent) {
        if self.ui_event_tx.send(event).is_err() {
            log::trace!("No UI clients are listening to playback events.");
        }
    }

    fn publish_state(&self) {
        let mut fired_sequences: Vec<Uuid> = self
            .fired
            .iter()
            .filter(|key| key.repetition == 0)
            .map(|key| key.sequence_id)
            .collect();
        fired_sequences.sort();
        let mut controllers = self.controllers.clone();
        for endpoint in &self.snapshot.controllers {
            controllers
                .entry(endpoint.id)
                .or_insert(ConnectionStatus::Unknown);
        }
        let state = ShowState {
            status: self.status,
            position_ms: self.position_ms(),
            total_duration_ms: self.snapshot.total_duration(),
            fired_sequences,
            controllers,
        };
        if self.state_tx.send(state).is_err() {
            log::trace!("No UI clients are listening to state updates.");
        }
    }
}

/// Ignition times of a sequence. Fireworks ignite once; lighting repeats are
/// spread evenly across the effective duration.
fn repetition_times(model: &ShowModel, sequence: &Sequence) -> Vec<(u32, u64)> {
    if sequence.is_firework() || sequence.repeat <= 1 {
        return vec![(0, sequence.fire_at())];
    }
    let interval = model.effective_duration(sequence) / sequence.repeat as u64;
    (0..sequence.repeat)
        .map(|k| (k, sequence.fire_at() + k as u64 * interval))
        .collect()
}

fn repetition_at(model: &ShowModel, sequence: &Sequence, repetition: u32) -> Option<u64> {
    repetition_times(model, sequence)
        .into_iter()
        .find(|(k, _)| *k == repetition)
        .map(|(_, at)| at)
}

fn audio_placement(track: Option<&AudioTrack>) -> Option<(Uuid, u64)> {
    track.map(|t| (t.id, t.start_offset))
}

fn progress_period(settings: &PlaybackSettings) -> Duration {
    Duration::from_millis(settings.progress_interval_ms.max(10))
}

fn progress_timer(settings: &PlaybackSettings) -> Interval {
    let mut progress = time::interval(progress_period(settings));
    progress.set_missed_tick_behavior(MissedTickBehavior::Skip);
    progress
}
