use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    ModelError, Show,
    catalog::{EffectCatalog, FireworkType, LightingEffectType},
};

pub const FORMAT_VERSION: &str = "1.0";

/// Interchange document exchanged with the import/export collaborator.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShowDocument {
    pub show: Show,
    pub firework_types: Vec<FireworkType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lighting_effect_types: Option<Vec<LightingEffectType>>,
    pub exported_at: DateTime<Utc>,
    pub format_version: String,
}

impl ShowDocument {
    pub fn export(show: &Show, catalog: &EffectCatalog) -> Self {
        Self {
            show: show.clone(),
            firework_types: catalog.firework_types.clone(),
            lighting_effect_types: Some(catalog.lighting_effect_types.clone()),
            exported_at: Utc::now(),
            format_version: FORMAT_VERSION.to_string(),
        }
    }

    /// Splits the document into show and catalog, rejecting shows with repeated
    /// sequence ids or out-of-range fields.
    pub fn into_parts(self) -> Result<(Show, EffectCatalog), ModelError> {
        self.show.check_integrity()?;
        if self.format_version != FORMAT_VERSION {
            log::warn!(
                "Importing show document with format version '{}' (expected '{}').",
                self.format_version,
                FORMAT_VERSION
            );
        }
        let catalog = EffectCatalog {
            firework_types: self.firework_types,
            lighting_effect_types: self.lighting_effect_types.unwrap_or_default(),
        };
        Ok((self.show, catalog))
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, path::PathBuf};

    use super::*;
    use crate::model::{
        audio::AudioTrack,
        tests::{firework_draft, fixture, lighting_draft},
    };

    #[test]
    fn export_then_import_keeps_sequences_and_audio() {
        let fixture = fixture();
        let (show, _) = fixture
            .model
            .show
            .add_sequence(firework_draft(&fixture, 0, 1));
        let (show, lighting) = show.add_sequence(lighting_draft(&fixture, 2500));
        let show = show.resize_sequence(&lighting, 1200, 500);
        let mut track = AudioTrack::from_file(PathBuf::from("/tmp/show.wav"));
        track.duration = Some(90_000);
        track.start_offset = 750;
        let show = show.with_audio_track(Some(track));

        let json = serde_json::to_string_pretty(&ShowDocument::export(&show, &fixture.model.catalog))
            .unwrap();
        let document: ShowDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(document.format_version, FORMAT_VERSION);

        let (imported, catalog) = document.into_parts().unwrap();
        let before: HashSet<String> = show
            .sequences
            .iter()
            .map(|s| serde_json::to_string(s).unwrap())
            .collect();
        let after: HashSet<String> = imported
            .sequences
            .iter()
            .map(|s| serde_json::to_string(s).unwrap())
            .collect();
        assert_eq!(before, after);
        assert_eq!(imported.audio_track, show.audio_track);
        assert_eq!(catalog, fixture.model.catalog);
    }

    #[test]
    fn timestamps_are_iso_8601_strings() {
        let show = Show::new("Dates");
        let value = serde_json::to_value(ShowDocument::export(&show, &EffectCatalog::default()))
            .unwrap();
        let created = value["show"]["createdAt"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(created).is_ok());
        assert!(value["exportedAt"].is_string());
    }

    #[test]
    fn missing_lighting_types_import_as_empty() {
        let show = Show::new("Old");
        let mut value =
            serde_json::to_value(ShowDocument::export(&show, &EffectCatalog::default())).unwrap();
        value
            .as_object_mut()
            .unwrap()
            .remove("lightingEffectTypes");
        let document: ShowDocument = serde_json::from_value(value).unwrap();
        let (_, catalog) = document.into_parts().unwrap();
        assert!(catalog.lighting_effect_types.is_empty());
    }

    #[test]
    fn document_with_repeated_sequence_id_is_rejected() {
        let fixture = fixture();
        let (show, id) = fixture
            .model
            .show
            .add_sequence(firework_draft(&fixture, 0, 1));
        let mut value =
            serde_json::to_value(ShowDocument::export(&show, &fixture.model.catalog)).unwrap();
        let mut twin = value["show"]["sequences"][0].clone();
        twin["timestamp"] = 1000.into();
        twin["channel"] = 2.into();
        value["show"]["sequences"]
            .as_array_mut()
            .unwrap()
            .push(twin);

        let document: ShowDocument = serde_json::from_value(value).unwrap();
        assert_eq!(
            document.into_parts().unwrap_err(),
            ModelError::DuplicateSequence(id)
        );
    }
}
