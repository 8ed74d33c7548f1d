use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrack {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Resolved after the file has been probed; `None` until then.
    #[serde(default)]
    pub duration: Option<u64>,
    /// Position of the audio's zero point relative to show start.
    #[serde(default)]
    pub start_offset: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl AudioTrack {
    pub fn from_file(path: PathBuf) -> Self {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let format = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        Self {
            id: Uuid::new_v4(),
            name,
            file_path: Some(path),
            url: None,
            duration: None,
            start_offset: 0,
            size_bytes: None,
            format,
        }
    }

    pub fn from_url(url: String) -> Self {
        let name = url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(url.as_str())
            .to_string();
        Self {
            id: Uuid::new_v4(),
            name,
            file_path: None,
            url: Some(url),
            duration: None,
            start_offset: 0,
            size_bytes: None,
            format: None,
        }
    }
}
