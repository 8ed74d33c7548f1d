use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};

use crate::{
    engine::{
        audio_engine::{AudioCommand, AudioEngine},
        hardware::HardwareDispatcher,
    },
    event::UiEvent,
    executor::{EngineEvent, Executor, ExecutorCommand, ExecutorEvent},
    manager::{ShowModelHandle, ShowModelManager},
    model::ShowModel,
    scheduler::{CueScheduler, PlaybackCommand, ShowState},
};

pub mod apiserver;
pub mod edit;
pub mod engine;
pub mod event;
pub mod executor;
pub mod manager;
pub mod model;
pub mod scheduler;
pub mod timeline;

pub struct BackendHandle {
    pub model_manager: ShowModelManager,
    pub model_handle: ShowModelHandle,

    pub scheduler_tx: mpsc::Sender<PlaybackCommand>,
    pub state_rx: watch::Receiver<ShowState>,
    pub event_tx: broadcast::Sender<UiEvent>,
}

/// Wires the model, scheduler, executor and audio engine together and spawns
/// their run loops. Must be called from inside a tokio runtime.
pub fn start_backend(model: ShowModel, dispatcher: Arc<dyn HardwareDispatcher>) -> BackendHandle {
    let (scheduler_tx, scheduler_rx) = mpsc::channel::<PlaybackCommand>(32);
    let (exec_tx, exec_rx) = mpsc::channel::<ExecutorCommand>(32);
    let (audio_tx, audio_rx) = mpsc::channel::<AudioCommand>(32);
    let (executor_event_tx, executor_event_rx) = mpsc::channel::<ExecutorEvent>(32);
    let (engine_event_tx, engine_event_rx) = mpsc::channel::<EngineEvent>(32);
    let (state_tx, state_rx) = watch::channel::<ShowState>(ShowState::new());
    let (event_tx, _) = broadcast::channel::<UiEvent>(256);

    let (model_manager, model_handle) = ShowModelManager::with_model(model, event_tx.clone());

    let audio_tx = match AudioEngine::new(audio_rx, engine_event_tx) {
        Ok(audio_engine) => {
            tokio::spawn(audio_engine.run());
            Some(audio_tx)
        }
        Err(e) => {
            log::warn!("No audio output available, running without sound: {:?}", e);
            None
        }
    };

    let scheduler = CueScheduler::new(
        model_handle.clone(),
        exec_tx,
        scheduler_rx,
        executor_event_rx,
        state_tx,
        event_tx.clone(),
    );

    let executor = Executor::new(
        dispatcher,
        exec_rx,
        audio_tx,
        executor_event_tx,
        engine_event_rx,
    );

    tokio::spawn(scheduler.run());
    tokio::spawn(executor.run());

    BackendHandle {
        model_manager,
        model_handle,
        scheduler_tx,
        state_rx,
        event_tx,
    }
}
