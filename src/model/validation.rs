use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{ShowModel, cue::SequenceKind};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ValidationIssue {
    #[serde(rename_all = "camelCase")]
    UnknownEffectType { sequence_id: Uuid, type_id: Uuid },
    #[serde(rename_all = "camelCase")]
    UnknownController {
        sequence_id: Uuid,
        controller_id: Uuid,
    },
    /// A firework ignites on an area still inside a previous ignition's safety delay.
    #[serde(rename_all = "camelCase")]
    SafetyDelayViolation {
        sequence_id: Uuid,
        previous_id: Uuid,
        gap_ms: u64,
        required_ms: u64,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub timing_valid: bool,
    pub effects_valid: bool,
    pub controllers_available: bool,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

pub fn validate(model: &ShowModel) -> ValidationReport {
    let mut issues = Vec::new();

    for sequence in &model.show.sequences {
        let type_id = match &sequence.kind {
            SequenceKind::Firework {
                firework_type_id, ..
            } => model
                .catalog
                .firework(firework_type_id)
                .is_none()
                .then_some(*firework_type_id),
            SequenceKind::Lighting { effect_type_id, .. } => model
                .catalog
                .lighting(effect_type_id)
                .is_none()
                .then_some(*effect_type_id),
        };
        if let Some(type_id) = type_id {
            issues.push(ValidationIssue::UnknownEffectType {
                sequence_id: sequence.id,
                type_id,
            });
        }
        if model.controller(&sequence.controller_id).is_none() {
            issues.push(ValidationIssue::UnknownController {
                sequence_id: sequence.id,
                controller_id: sequence.controller_id,
            });
        }
    }

    let mut ignitions: Vec<_> = model
        .show
        .sequences
        .iter()
        .filter_map(|s| match &s.kind {
            SequenceKind::Firework {
                firework_type_id, ..
            } => model
                .catalog
                .firework(firework_type_id)
                .map(|t| (s, t.safety_delay_ms)),
            SequenceKind::Lighting { .. } => None,
        })
        .collect();
    ignitions.sort_by_key(|(s, _)| s.fire_at());
    for (index, (sequence, _)) in ignitions.iter().enumerate() {
        let previous = ignitions[..index].iter().rev().find(|(p, _)| {
            p.controller_id.eq(&sequence.controller_id) && p.area == sequence.area
        });
        if let Some((previous, required_ms)) = previous {
            let gap_ms = sequence.fire_at() - previous.fire_at();
            if gap_ms < *required_ms {
                issues.push(ValidationIssue::SafetyDelayViolation {
                    sequence_id: sequence.id,
                    previous_id: previous.id,
                    gap_ms,
                    required_ms: *required_ms,
                });
            }
        }
    }

    ValidationReport {
        timing_valid: !issues
            .iter()
            .any(|i| matches!(i, ValidationIssue::SafetyDelayViolation { .. })),
        effects_valid: !issues
            .iter()
            .any(|i| matches!(i, ValidationIssue::UnknownEffectType { .. })),
        controllers_available: !issues
            .iter()
            .any(|i| matches!(i, ValidationIssue::UnknownController { .. })),
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::{firework_draft, fixture, lighting_draft};

    #[test]
    fn well_spaced_show_is_valid() {
        let fixture = fixture();
        let (show, _) = fixture
            .model
            .show
            .add_sequence(firework_draft(&fixture, 0, 1));
        let (show, _) = show.add_sequence(firework_draft(&fixture, 3000, 2));
        let (show, _) = show.add_sequence(lighting_draft(&fixture, 100));
        let model = ShowModel {
            show,
            ..fixture.model
        };

        let report = validate(&model);
        assert!(report.is_valid());
        assert!(report.timing_valid && report.effects_valid && report.controllers_available);
    }

    #[test]
    fn ignitions_inside_safety_delay_are_flagged() {
        let fixture = fixture();
        let (show, first) = fixture
            .model
            .show
            .add_sequence(firework_draft(&fixture, 1000, 1));
        let (show, second) = show.add_sequence(firework_draft(&fixture, 1200, 2));
        let model = ShowModel {
            show,
            ..fixture.model
        };

        let report = validate(&model);
        assert!(!report.timing_valid);
        assert_eq!(
            report.issues,
            vec![ValidationIssue::SafetyDelayViolation {
                sequence_id: second,
                previous_id: first,
                gap_ms: 200,
                required_ms: 500,
            }]
        );
    }

    #[test]
    fn unknown_references_are_reported() {
        let fixture = fixture();
        let mut draft = lighting_draft(&fixture, 0);
        draft.controller_id = Uuid::new_v4();
        let (show, _) = fixture.model.show.add_sequence(draft);
        let mut model = ShowModel {
            show,
            ..fixture.model
        };
        model.catalog.lighting_effect_types.clear();

        let report = validate(&model);
        assert!(!report.effects_valid);
        assert!(!report.controllers_available);
        assert!(report.timing_valid);
        assert_eq!(report.issues.len(), 2);
    }
}
