//! Named run configurations persisted in a single string slot.
//!
//! The slot holds `{"schemaVersion": N, "presets": [...]}`. Loading is
//! fail-soft: a missing slot, unparsable JSON, a different schema version or
//! any entry that fails validation all produce an empty list. A corrupted
//! collection is never loaded partially.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::config::RUN_PRESETS_SCHEMA_VERSION;
use crate::config::RUN_PRESETS_STORAGE_KEY;
use crate::storage::KeyValueStore;
use crate::storage::StorageError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    pub command_id: String,
    pub task_names: Vec<String>,
    pub dry_run: bool,
    pub toggles: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPreset {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub last_used_at: Option<String>,
    pub config: RunConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetDraft {
    pub name: String,
    pub config: RunConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PresetValidationError {
    #[error("preset id is empty")]
    EmptyId,
    #[error("preset {id} has an empty name")]
    EmptyName { id: String },
    #[error("preset {id} has no command id")]
    EmptyCommandId { id: String },
    #[error("preset {id} has a blank task name")]
    BlankTaskName { id: String },
    #[error("preset {id} has an invalid {field} timestamp {value:?}")]
    InvalidTimestamp {
        id: String,
        field: &'static str,
        value: String,
    },
    #[error("preset id {id} appears more than once")]
    DuplicateId { id: String },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PresetsEnvelopeRef<'a> {
    schema_version: u32,
    presets: &'a [RunPreset],
}

/// Slug of `name` plus the digits of `timestamp_iso`.
///
/// `("My Security Dry Run", "2026-02-21T23:31:05.000Z")` gives
/// `my-security-dry-run-20260221233105000`.
pub fn create_preset_id(name: &str, timestamp_iso: &str) -> String {
    let mut slug = String::new();
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    let slug = if slug.is_empty() { "preset" } else { slug };

    let digits: String = timestamp_iso.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        slug.to_string()
    } else {
        format!("{slug}-{digits}")
    }
}

/// Splits comma separated task names, trimming, dropping blanks, deduplicating
/// (case-sensitive) and sorting.
pub fn parse_preset_task_input(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn build_run_preset(draft: PresetDraft, timestamp_iso: &str) -> RunPreset {
    let name = draft.name.trim().to_string();
    RunPreset {
        id: create_preset_id(&name, timestamp_iso),
        name,
        created_at: timestamp_iso.to_string(),
        last_used_at: None,
        config: draft.config,
    }
}

pub fn validate_run_preset(preset: &RunPreset) -> Result<(), PresetValidationError> {
    let id = || preset.id.clone();
    if preset.id.trim().is_empty() {
        return Err(PresetValidationError::EmptyId);
    }
    if preset.name.trim().is_empty() {
        return Err(PresetValidationError::EmptyName { id: id() });
    }
    if preset.config.command_id.trim().is_empty() {
        return Err(PresetValidationError::EmptyCommandId { id: id() });
    }
    if preset.config.task_names.iter().any(|task| task.trim().is_empty()) {
        return Err(PresetValidationError::BlankTaskName { id: id() });
    }
    let timestamps = [
        ("createdAt", Some(&preset.created_at)),
        ("lastUsedAt", preset.last_used_at.as_ref()),
    ];
    for (field, value) in timestamps {
        if let Some(value) = value {
            if chrono::DateTime::parse_from_rfc3339(value).is_err() {
                return Err(PresetValidationError::InvalidTimestamp {
                    id: id(),
                    field,
                    value: value.clone(),
                });
            }
        }
    }
    Ok(())
}

pub fn store_run_presets(
    storage: &mut impl KeyValueStore,
    presets: &[RunPreset],
) -> Result<(), StorageError> {
    store_run_presets_at(storage, RUN_PRESETS_STORAGE_KEY, presets)
}

pub fn store_run_presets_at(
    storage: &mut impl KeyValueStore,
    key: &str,
    presets: &[RunPreset],
) -> Result<(), StorageError> {
    let encoded = serde_json::to_string(&PresetsEnvelopeRef {
        schema_version: RUN_PRESETS_SCHEMA_VERSION,
        presets,
    })
    .map_err(|source| StorageError::Serialize {
        key: key.to_string(),
        source,
    })?;
    storage.set(key, encoded)
}

pub fn load_run_presets(storage: &impl KeyValueStore) -> Vec<RunPreset> {
    load_run_presets_at(storage, RUN_PRESETS_STORAGE_KEY)
}

pub fn load_run_presets_at(storage: &impl KeyValueStore, key: &str) -> Vec<RunPreset> {
    match decode_presets(storage, key) {
        Ok(presets) => presets,
        Err(reason) => {
            tracing::debug!(key, %reason, "discarding stored run presets");
            Vec::new()
        }
    }
}

fn decode_presets(storage: &impl KeyValueStore, key: &str) -> Result<Vec<RunPreset>, String> {
    let raw = match storage.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Ok(Vec::new()),
        Err(err) => return Err(err.to_string()),
    };
    let value: Value = serde_json::from_str(&raw).map_err(|err| format!("parse: {err}"))?;
    let version = value.get("schemaVersion").and_then(Value::as_u64);
    if version != Some(u64::from(RUN_PRESETS_SCHEMA_VERSION)) {
        return Err(format!("schema version {version:?} is not {RUN_PRESETS_SCHEMA_VERSION}"));
    }
    let entries = value
        .get("presets")
        .and_then(Value::as_array)
        .ok_or_else(|| "presets is not an array".to_string())?;

    let mut seen = HashSet::new();
    let mut presets = Vec::with_capacity(entries.len());
    for entry in entries {
        let preset: RunPreset =
            serde_json::from_value(entry.clone()).map_err(|err| format!("entry shape: {err}"))?;
        validate_run_preset(&preset).map_err(|err| err.to_string())?;
        if !seen.insert(preset.id.clone()) {
            return Err(PresetValidationError::DuplicateId { id: preset.id }.to_string());
        }
        presets.push(preset);
    }
    Ok(presets)
}

/// Replaces the preset with the same id, or appends it. Returns true on replace.
pub fn add_or_update_preset(presets: &mut Vec<RunPreset>, preset: RunPreset) -> bool {
    match presets.iter_mut().find(|existing| existing.id == preset.id) {
        Some(existing) => {
            *existing = preset;
            true
        }
        None => {
            presets.push(preset);
            false
        }
    }
}

/// Appends a copy of `id` named `"<name> copy"`; returns the new preset.
pub fn duplicate_preset(
    presets: &mut Vec<RunPreset>,
    id: &str,
    timestamp_iso: &str,
) -> Option<RunPreset> {
    let source = presets.iter().find(|preset| preset.id == id)?;
    let name = format!("{} copy", source.name);
    let base_id = create_preset_id(&name, timestamp_iso);
    let copy = RunPreset {
        id: unique_id(presets, base_id),
        name,
        created_at: timestamp_iso.to_string(),
        last_used_at: None,
        config: source.config.clone(),
    };
    presets.push(copy.clone());
    Some(copy)
}

/// Stamps `lastUsedAt`; returns false when no preset has `id`.
pub fn mark_preset_used(presets: &mut [RunPreset], id: &str, timestamp_iso: &str) -> bool {
    match presets.iter_mut().find(|preset| preset.id == id) {
        Some(preset) => {
            preset.last_used_at = Some(timestamp_iso.to_string());
            true
        }
        None => false,
    }
}

pub fn remove_preset(presets: &mut Vec<RunPreset>, id: &str) -> bool {
    let before = presets.len();
    presets.retain(|preset| preset.id != id);
    presets.len() != before
}

fn unique_id(presets: &[RunPreset], base: String) -> String {
    let taken = |candidate: &str| presets.iter().any(|preset| preset.id == candidate);
    if !taken(base.as_str()) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}-{n}");
        if !taken(candidate.as_str()) {
            return candidate;
        }
        n += 1;
    }
}
