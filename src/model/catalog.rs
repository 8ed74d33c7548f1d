use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FireworkType {
    pub id: Uuid,
    pub name: String,
    pub duration_ms: u64,
    /// Minimum hold-off after ignition before the same area may fire again.
    pub safety_delay_ms: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LightingEffectType {
    pub id: Uuid,
    pub name: String,
    pub default_duration_ms: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EffectCatalog {
    pub firework_types: Vec<FireworkType>,
    pub lighting_effect_types: Vec<LightingEffectType>,
}

impl EffectCatalog {
    pub fn firework(&self, id: &Uuid) -> Option<&FireworkType> {
        self.firework_types.iter().find(|t| t.id.eq(id))
    }

    pub fn lighting(&self, id: &Uuid) -> Option<&LightingEffectType> {
        self.lighting_effect_types.iter().find(|t| t.id.eq(id))
    }

    /// Inserts the type, replacing an existing entry with the same id.
    pub fn upsert_firework(&mut self, firework_type: FireworkType) {
        match self
            .firework_types
            .iter_mut()
            .find(|t| t.id.eq(&firework_type.id))
        {
            Some(existing) => *existing = firework_type,
            None => self.firework_types.push(firework_type),
        }
    }

    pub fn upsert_lighting(&mut self, effect_type: LightingEffectType) {
        match self
            .lighting_effect_types
            .iter_mut()
            .find(|t| t.id.eq(&effect_type.id))
        {
            Some(existing) => *existing = effect_type,
            None => self.lighting_effect_types.push(effect_type),
        }
    }
}
