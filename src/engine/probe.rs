use std::{fs::File, path::Path};

use anyhow::{Context, Result, anyhow};
use symphonia::core::{
    formats::FormatOptions, io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
};

#[derive(Debug, Clone, PartialEq)]
pub struct AudioProbe {
    pub duration_ms: u64,
    pub size_bytes: u64,
}

/// Reads the container headers of an audio file to learn its length.
/// Blocking; run it on a blocking task.
pub fn probe_audio_file(path: &Path) -> Result<AudioProbe> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let size_bytes = file.metadata().map(|m| m.len()).unwrap_or(0);
    let stream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("Unsupported audio format: {}", path.display()))?;

    let track = probed
        .format
        .default_track()
        .ok_or_else(|| anyhow!("No audio track in {}", path.display()))?;
    let params = &track.codec_params;
    let frames = params
        .n_frames
        .ok_or_else(|| anyhow!("Unknown frame count in {}", path.display()))?;
    let sample_rate = params
        .sample_rate
        .filter(|rate| *rate > 0)
        .ok_or_else(|| anyhow!("Unknown sample rate in {}", path.display()))?;

    Ok(AudioProbe {
        duration_ms: frames * 1000 / sample_rate as u64,
        size_bytes,
    })
}
