pub mod audio_engine;
pub mod hardware;
pub mod probe;
