use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    engine::{
        audio_engine::AudioCommand,
        hardware::{DispatchError, HardwareDispatcher},
    },
    model::{cue::RelayTarget, device::ControllerEndpoint},
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "target", rename_all = "camelCase")]
pub enum FireAction {
    /// Select and confirm the area, then ignite the channel.
    Channel(u8),
    Relays(RelayTarget),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FireRequest {
    pub sequence_id: Uuid,
    pub controller: ControllerEndpoint,
    pub area: u8,
    pub action: FireAction,
}

#[derive(Debug)]
pub enum ExecutorCommand {
    Fire(FireRequest),
    EmergencyStop(Vec<ControllerEndpoint>),
    TestChannels(ControllerEndpoint),
    Audio(AudioCommand),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorEvent {
    Fired {
        sequence_id: Uuid,
        controller_id: Uuid,
    },
    Missed {
        sequence_id: Uuid,
        controller_id: Uuid,
        error: DispatchError,
    },
    EmergencyStopped {
        controller_id: Uuid,
    },
    TestCompleted {
        controller_id: Uuid,
        result: Result<(), DispatchError>,
    },
    AudioError {
        error: String,
    },
}

#[derive(Debug)]
pub enum EngineEvent {
    AudioStarted { instance_id: Uuid },
    AudioCompleted { instance_id: Uuid },
    AudioError { instance_id: Uuid, error: String },
}

pub struct Executor {
    dispatcher: Arc<dyn HardwareDispatcher>,
    command_rx: mpsc::Receiver<ExecutorCommand>,
    // None when no audio device could be opened
    audio_tx: Option<mpsc::Sender<AudioCommand>>,
    event_tx: mpsc::Sender<ExecutorEvent>,
    engine_event_rx: mpsc::Receiver<EngineEvent>,
}

impl Executor {
    pub fn new(
        dispatcher: Arc<dyn HardwareDispatcher>,
        command_rx: mpsc::Receiver<ExecutorCommand>,
        audio_tx: Option<mpsc::Sender<AudioCommand>>,
        event_tx: mpsc::Sender<ExecutorEvent>,
        engine_event_rx: mpsc::Receiver<EngineEvent>,
    ) -> Self {
        Self {
            dispatcher,
            command_rx,
            audio_tx,
            event_tx,
            engine_event_rx,
        }
    }

    pub async fn run(mut self) {
        log::info!("Executor run loop started.");
        loop {
            tokio::select! {
                Some(command) = self.command_rx.recv() => {
                    log::debug!("Executor received command: {:?}", command);
                    if let Err(e) = self.process_command(command).await {
                        log::error!("Error processing executor command: {:?}", e);
                    }
                },
                Some(event) = self.engine_event_rx.recv() => {
                    if let Err(e) = self.handle_engine_event(event).await {
                        log::error!("Error handling engine event: {:?}", e);
                    }
                }
                else => break,
            }
        }
        log::info!("Executor run loop finished.");
    }

    /// Every hardware command runs on its own task so one slow controller
    /// never holds up the others.
    async fn process_command(&self, command: ExecutorCommand) -> Result<(), anyhow::Error> {
        match command {
            ExecutorCommand::Fire(request) => {
                let dispatcher = self.dispatcher.clone();
                let event_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let sequence_id = request.sequence_id;
                    let controller_id = request.controller.id;
                    let result =
                        tokio::task::spawn_blocking(move || fire(dispatcher.as_ref(), &request))
                            .await;
                    let event = match result {
                        Ok(Ok(())) => ExecutorEvent::Fired {
                            sequence_id,
                            controller_id,
                        },
                        Ok(Err(error)) => ExecutorEvent::Missed {
                            sequence_id,
                            controller_id,
                            error,
                        },
                        Err(e) => ExecutorEvent::Missed {
                            sequence_id,
                            controller_id,
                            error: DispatchError::Connection(format!("dispatch task failed: {e}")),
                        },
                    };
                    if let Err(e) = event_tx.send(event).await {
                        log::error!("Failed to report dispatch result: {}", e);
                    }
                });
            }
            ExecutorCommand::EmergencyStop(controllers) => {
                for controller in controllers {
                    let dispatcher = self.dispatcher.clone();
                    let event_tx = self.event_tx.clone();
                    tokio::spawn(async move {
                        let controller_id = controller.id;
                        log::info!("EMERGENCY STOP: controller '{}'", controller.name);
                        if let Err(e) = tokio::task::spawn_blocking(move || {
                            dispatcher.emergency_stop(&controller)
                        })
                        .await
                        {
                            log::error!("Emergency stop task failed: {}", e);
                        }
                        if let Err(e) = event_tx
                            .send(ExecutorEvent::EmergencyStopped { controller_id })
                            .await
                        {
                            log::error!("Failed to report emergency stop: {}", e);
                        }
                    });
                }
            }
            ExecutorCommand::TestChannels(controller) => {
                let dispatcher = self.dispatcher.clone();
                let event_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let controller_id = controller.id;
                    let result = tokio::task::spawn_blocking(move || {
                        dispatcher.test_all_channels(&controller)
                    })
                    .await
                    .unwrap_or_else(|e| {
                        Err(DispatchError::Connection(format!("test task failed: {e}")))
                    });
                    if let Err(e) = event_tx
                        .send(ExecutorEvent::TestCompleted {
                            controller_id,
                            result,
                        })
                        .await
                    {
                        log::error!("Failed to report channel test: {}", e);
                    }
                });
            }
            // a stalled audio engine must never hold up firing
            ExecutorCommand::Audio(audio_command) => match &self.audio_tx {
                Some(audio_tx) => match audio_tx.try_send(audio_command) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(command)) => {
                        log::warn!("Audio engine is busy, dropping {:?}", command);
                    }
                    Err(mpsc::error::TrySendError::Closed(command)) => {
                        log::warn!("Audio engine has stopped, dropping {:?}", command);
                    }
                },
                None => log::debug!("No audio output, dropping {:?}", audio_command),
            },
        }
        Ok(())
    }

    async fn handle_engine_event(&self, event: EngineEvent) -> Result<(), anyhow::Error> {
        match event {
            EngineEvent::AudioStarted { instance_id } => {
                log::info!("Audio instance '{}' started.", instance_id);
            }
            EngineEvent::AudioCompleted { instance_id } => {
                log::info!("Audio instance '{}' completed.", instance_id);
            }
            EngineEvent::AudioError { instance_id, error } => {
                log::error!("Audio instance '{}' failed: {}", instance_id, error);
                self.event_tx
                    .send(ExecutorEvent::AudioError { error })
                    .await?;
            }
        }
        Ok(())
    }
}

/// One cue's hardware dispatch. A channel is only ignited after its area was
/// selected and confirmed on the same controller.
fn fire(dispatcher: &dyn HardwareDispatcher, request: &FireRequest) -> Result<(), DispatchError> {
    let controller = &request.controller;
    match &request.action {
        FireAction::Channel(channel) => {
            dispatcher.set_area(controller, request.area)?;
            dispatcher.sync_area(controller, request.area)?;
            dispatcher.fire_channel(controller, *channel)
        }
        FireAction::Relays(relays) => dispatcher.fire_relays(controller, relays),
    }
}
