use anyhow::{Context, Result};
use kira::{
    AudioManager, AudioManagerSettings, DefaultBackend, StartTime, Tween,
    sound::{
        PlaybackPosition, PlaybackState,
        static_sound::{StaticSoundData, StaticSoundHandle},
    },
};
use std::{collections::HashMap, path::PathBuf, time::Duration};
use tokio::{sync::mpsc, time};
use uuid::Uuid;

use crate::executor::EngineEvent;

#[derive(Debug, Clone, PartialEq)]
pub enum AudioCommand {
    /// Start the track at `start_position` into the file, after `delay`.
    Play {
        id: Uuid,
        filepath: PathBuf,
        start_position: Duration,
        delay: Duration,
    },
    Stop {
        id: Uuid,
    },
}

pub struct AudioEngine {
    manager: AudioManager,
    command_rx: mpsc::Receiver<AudioCommand>,
    event_tx: mpsc::Sender<EngineEvent>,
    playing_sounds: HashMap<Uuid, StaticSoundHandle>,
}

impl AudioEngine {
    pub fn new(
        command_rx: mpsc::Receiver<AudioCommand>,
        event_tx: mpsc::Sender<EngineEvent>,
    ) -> Result<Self> {
        let manager = AudioManager::<DefaultBackend>::new(AudioManagerSettings::default())
            .context("Failed to initialize AudioManager")?;

        Ok(Self {
            manager,
            command_rx,
            event_tx,
            playing_sounds: HashMap::new(),
        })
    }

    pub async fn run(mut self) {
        let mut poll_timer = time::interval(Duration::from_millis(50));
        log::info!("AudioEngine run loop started");
        loop {
            tokio::select! {
                Some(command) = self.command_rx.recv() => {
                    log::debug!("AudioEngine received command: {:?}", command);

                    let result = match command {
                        AudioCommand::Play { id, filepath, start_position, delay } => {
                            self.handle_play(id, filepath, start_position, delay).await
                        }
                        AudioCommand::Stop { id } => {
                            self.handle_stop(id);
                            Ok(())
                        }
                    };
                    if let Err(e) = result {
                        log::error!("Error processing audio_engine command: {:?}", e);
                    }
                },
                _ = poll_timer.tick() => {
                    let finished: Vec<Uuid> = self
                        .playing_sounds
                        .iter()
                        .filter(|(_, handle)| handle.state() == PlaybackState::Stopped)
                        .map(|(id, _)| *id)
                        .collect();
                    for instance_id in finished {
                        self.playing_sounds.remove(&instance_id);
                        if let Err(e) = self.event_tx.send(EngineEvent::AudioCompleted { instance_id }).await {
                            log::error!("Error polling Sound status: {:?}", e);
                        }
                    }
                },
                else => break
            }
        }
        log::info!("AudioEngine run loop finished.");
    }

    async fn handle_play(
        &mut self,
        id: Uuid,
        filepath: PathBuf,
        start_position: Duration,
        delay: Duration,
    ) -> Result<()> {
        log::info!(
            "PLAY: id={}, file={}, from={:?}, delay={:?}",
            id,
            filepath.display(),
            start_position,
            delay
        );

        let filepath_clone = filepath.clone();
        let loaded =
            tokio::task::spawn_blocking(move || StaticSoundData::from_file(filepath_clone)).await?;
        let sound_data = match loaded {
            Ok(data) => data
                .start_position(PlaybackPosition::Seconds(start_position.as_secs_f64()))
                .start_time(StartTime::Delayed(delay)),
            Err(e) => {
                let error = format!("Failed to load {}: {}", filepath.display(), e);
                self.event_tx
                    .send(EngineEvent::AudioError {
                        instance_id: id,
                        error: error.clone(),
                    })
                    .await?;
                return Err(anyhow::anyhow!(error));
            }
        };

        let handle = self.manager.play(sound_data)?;

        self.event_tx
            .send(EngineEvent::AudioStarted { instance_id: id })
            .await?;

        self.playing_sounds.insert(id, handle);
        Ok(())
    }

    fn handle_stop(&mut self, id: Uuid) {
        if let Some(mut handle) = self.playing_sounds.remove(&id) {
            log::info!("STOP: id={}", id);
            handle.stop(Tween {
                duration: Duration::from_millis(100),
                ..Default::default()
            });
        } else {
            log::debug!("Stop command received for finished or unknown ID: {}", id);
        }
    }
}
