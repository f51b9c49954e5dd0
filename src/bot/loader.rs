//! Export directory loader
//!
//! Reads `Intents/`, `Slots/` and `SlotTypes/` JSON files, resolves slot
//! type references and checks the definition before anything is served.

use regex::Regex;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use super::export::{self, IntentFile, NextStep, SlotFile, SlotTypeFile};
use super::model::{
    BuiltinType, ClosingBranch, ClosingSpec, ConfirmationSpec, DeclineBehavior, EnumValue,
    EnumeratedValues, FulfillmentMode, Intent, NextIntentRule, ResolutionStrategy, SlotSpec,
    SlotType, SlotTypeKind, SubSlot, UtteranceTemplate, FALLBACK_INTENT, FALLBACK_SIGNATURE,
};
use super::{BotDefinition, DefinitionError};
use crate::condition::Condition;
use crate::text;

pub(super) fn load(path: &Path, locale: &str) -> Result<BotDefinition, DefinitionError> {
    let (root, locale_dir) = locate(path, locale)?;
    let locale_name = locale_dir
        .file_name()
        .map_or_else(|| locale.to_string(), |n| n.to_string_lossy().into_owned());

    let bot_name = match root.as_deref().map(|r| r.join("Bot.json")) {
        Some(bot_file) if bot_file.is_file() => read_json::<export::BotFile>(&bot_file)?.name,
        _ => None,
    }
    .or_else(|| {
        root.as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
    })
    .unwrap_or_else(|| "Bot".to_string());

    let mut slot_types = load_slot_types(&locale_dir.join("SlotTypes"))?;
    let (intents, fallback) = load_intents(&locale_dir.join("Intents"), &mut slot_types)?;

    let known: HashSet<&str> = intents
        .iter()
        .map(|i| i.name.as_str())
        .chain(std::iter::once(fallback.name.as_str()))
        .collect();
    for intent in intents.iter().chain(std::iter::once(&fallback)) {
        for target in next_intents(&intent.closing.next) {
            if !known.contains(target) {
                return Err(DefinitionError::malformed(
                    &locale_dir.join("Intents").join(&intent.name),
                    format!("closing setting references undeclared intent {target}"),
                ));
            }
        }
    }

    tracing::info!(
        bot = %bot_name,
        locale = %locale_name,
        intents = intents.len(),
        slot_types = slot_types.len(),
        "Loaded bot definition"
    );

    Ok(BotDefinition::from_parts(
        bot_name,
        locale_name,
        intents,
        fallback,
        slot_types,
    ))
}

/// Resolve `(bot root, locale directory)` from a user-supplied path
fn locate(path: &Path, locale: &str) -> Result<(Option<PathBuf>, PathBuf), DefinitionError> {
    if path.join("Intents").is_dir() {
        // Pointed at a locale directory: <root>/BotLocales/<locale>
        let root = path
            .parent()
            .filter(|p| p.file_name().is_some_and(|n| n == "BotLocales"))
            .and_then(Path::parent)
            .or_else(|| path.parent())
            .map(Path::to_path_buf);
        return Ok((root, path.to_path_buf()));
    }
    for candidate in [path.join("BotLocales").join(locale), path.join(locale)] {
        if candidate.join("Intents").is_dir() {
            return Ok((Some(path.to_path_buf()), candidate));
        }
    }
    if !path.exists() {
        return Err(DefinitionError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "export path does not exist"),
        });
    }
    Err(DefinitionError::malformed(
        path,
        format!("no Intents directory for locale {locale}"),
    ))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, DefinitionError> {
    let raw = fs::read_to_string(path).map_err(|source| DefinitionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| DefinitionError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Sub-directories of `dir` sorted by name; a missing directory is empty
fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>, DefinitionError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let io_err = |source| DefinitionError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if entry.file_type().map_err(io_err)?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

// ============================================================================
// Slot types
// ============================================================================

fn load_slot_types(dir: &Path) -> Result<HashMap<String, SlotType>, DefinitionError> {
    let mut files = Vec::new();
    for sub in sorted_subdirs(dir)? {
        let path = sub.join("SlotType.json");
        if path.is_file() {
            let file: SlotTypeFile = read_json(&path)?;
            files.push((path, file));
        }
    }

    // Sub-slots reference their types by identifier, so collect those first
    let mut ids: HashMap<String, String> = HashMap::new();
    let mut names = HashSet::new();
    for (path, file) in &files {
        let name = file
            .name
            .clone()
            .ok_or_else(|| DefinitionError::malformed(path, "slot type is missing a name"))?;
        if !names.insert(name.clone()) {
            return Err(DefinitionError::malformed(
                path,
                format!("duplicate slot type {name}"),
            ));
        }
        if let Some(id) = &file.identifier {
            ids.insert(id.clone(), name);
        }
    }

    let mut types = HashMap::new();
    for (path, file) in files {
        let slot_type = convert_slot_type(&path, file, &ids, &names)?;
        types.insert(slot_type.name.clone(), slot_type);
    }

    // Built-in sub-slot types need entries of their own
    let builtin_refs: Vec<String> = types
        .values()
        .filter_map(|t| match &t.kind {
            SlotTypeKind::Composite(subs) => Some(subs.iter().map(|s| s.slot_type.clone())),
            _ => None,
        })
        .flatten()
        .filter(|name| !types.contains_key(name))
        .collect();
    for name in builtin_refs {
        if let Some(builtin) = SlotType::builtin(&name) {
            types.insert(name, builtin);
        }
    }
    Ok(types)
}

fn convert_slot_type(
    path: &Path,
    file: SlotTypeFile,
    ids: &HashMap<String, String>,
    names: &HashSet<String>,
) -> Result<SlotType, DefinitionError> {
    let name = file.name.unwrap_or_default();
    let selection = file.value_selection_setting;

    let kind = if let Some(composite) = file.composite_slot_type_setting {
        let mut subs = Vec::with_capacity(composite.sub_slots.len());
        for sub in composite.sub_slots {
            let slot_type = resolve_type_ref(&sub.slot_type_id, ids, names).ok_or_else(|| {
                DefinitionError::malformed(
                    path,
                    format!(
                        "sub-slot {} references undeclared slot type {}",
                        sub.name, sub.slot_type_id
                    ),
                )
            })?;
            subs.push(SubSlot {
                name: sub.name,
                slot_type,
            });
        }
        if subs.is_empty() {
            return Err(DefinitionError::malformed(
                path,
                format!("composite slot type {name} has no sub-slots"),
            ));
        }
        SlotTypeKind::Composite(subs)
    } else if let Some(pattern) = selection.as_ref().and_then(|s| {
        s.regex_filter
            .as_ref()
            .map(|f| f.pattern.clone())
            .or_else(|| s.regex_filter_pattern.clone())
    }) {
        let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
            DefinitionError::malformed(path, format!("invalid pattern for {name}: {e}"))
        })?;
        SlotTypeKind::Pattern(regex)
    } else if let Some(values) = file.slot_type_values.filter(|v| !v.is_empty()) {
        let strategy = match selection
            .as_ref()
            .and_then(|s| s.resolution_strategy.as_deref())
        {
            Some("TopResolution") => ResolutionStrategy::TopResolution,
            _ => ResolutionStrategy::OriginalValue,
        };
        SlotTypeKind::Enumerated(index_values(path, &name, values, strategy)?)
    } else if let Some(builtin) = file
        .parent_slot_type_signature
        .as_deref()
        .and_then(BuiltinType::from_name)
    {
        SlotTypeKind::Builtin(builtin)
    } else {
        SlotTypeKind::Enumerated(EnumeratedValues {
            values: Vec::new(),
            index: HashMap::new(),
            strategy: ResolutionStrategy::OriginalValue,
        })
    };

    Ok(SlotType {
        name,
        identifier: file.identifier,
        kind,
    })
}

fn index_values(
    path: &Path,
    type_name: &str,
    raw: Vec<export::SlotTypeValue>,
    strategy: ResolutionStrategy,
) -> Result<EnumeratedValues, DefinitionError> {
    let mut values = Vec::with_capacity(raw.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for (position, value) in raw.into_iter().enumerate() {
        let canonical = value.sample_value.value.unwrap_or_default();
        let synonyms: Vec<String> = value
            .synonyms
            .unwrap_or_default()
            .into_iter()
            .filter_map(|s| s.value)
            .collect();

        for form in std::iter::once(&canonical).chain(synonyms.iter()) {
            let key = text::normalize(form);
            if key.is_empty() {
                continue;
            }
            if let Some(&existing) = index.get(&key) {
                if existing != position {
                    return Err(DefinitionError::malformed(
                        path,
                        format!("{type_name}: value {form:?} is listed under more than one canonical value"),
                    ));
                }
            }
            index.insert(key, position);
        }
        values.push(EnumValue {
            canonical,
            synonyms,
        });
    }

    Ok(EnumeratedValues {
        values,
        index,
        strategy,
    })
}

/// Resolve a slot type reference by identifier, name, or built-in name
fn resolve_type_ref(
    reference: &str,
    ids: &HashMap<String, String>,
    names: &HashSet<String>,
) -> Option<String> {
    if let Some(name) = ids.get(reference) {
        return Some(name.clone());
    }
    if names.contains(reference) || BuiltinType::from_name(reference).is_some() {
        return Some(reference.to_string());
    }
    None
}

// ============================================================================
// Intents
// ============================================================================

fn load_intents(
    dir: &Path,
    slot_types: &mut HashMap<String, SlotType>,
) -> Result<(Vec<Intent>, Intent), DefinitionError> {
    let ids: HashMap<String, String> = slot_types
        .values()
        .filter_map(|t| t.identifier.clone().map(|id| (id, t.name.clone())))
        .collect();
    let names: HashSet<String> = slot_types.keys().cloned().collect();

    let mut intents = Vec::new();
    let mut fallback = None;
    let mut seen = HashSet::new();

    for intent_dir in sorted_subdirs(dir)? {
        let path = intent_dir.join("Intent.json");
        if !path.is_file() {
            continue;
        }
        let file: IntentFile = read_json(&path)?;
        let name = file
            .name
            .clone()
            .ok_or_else(|| DefinitionError::malformed(&path, "intent is missing a name"))?;
        if !seen.insert(name.clone()) {
            return Err(DefinitionError::malformed(
                &path,
                format!("duplicate intent {name}"),
            ));
        }

        let mut slots = Vec::new();
        for slot_dir in sorted_subdirs(&intent_dir.join("Slots"))? {
            let slot_path = slot_dir.join("Slot.json");
            if !slot_path.is_file() {
                continue;
            }
            let slot_file: SlotFile = read_json(&slot_path)?;
            slots.push((slot_path, slot_file));
        }

        let intent = convert_intent(&path, name, file, slots, &ids, &names)?;
        for spec in &intent.slots {
            if !slot_types.contains_key(&spec.slot_type) {
                if let Some(builtin) = SlotType::builtin(&spec.slot_type) {
                    slot_types.insert(spec.slot_type.clone(), builtin);
                }
            }
        }

        if intent.is_fallback {
            fallback = Some(intent);
        } else {
            intents.push(intent);
        }
    }

    Ok((intents, fallback.unwrap_or_else(Intent::default_fallback)))
}

fn convert_intent(
    path: &Path,
    name: String,
    file: IntentFile,
    slot_files: Vec<(PathBuf, SlotFile)>,
    ids: &HashMap<String, String>,
    names: &HashSet<String>,
) -> Result<Intent, DefinitionError> {
    let is_fallback = name == FALLBACK_INTENT
        || file.parent_intent_signature.as_deref() == Some(FALLBACK_SIGNATURE);

    // Fill order
    let mut priorities: HashMap<String, i64> = HashMap::new();
    let mut used = HashSet::new();
    let slot_ids: HashMap<String, String> = slot_files
        .iter()
        .filter_map(|(_, f)| Some((f.identifier.clone()?, f.name.clone()?)))
        .collect();
    for priority in file.slot_priorities.unwrap_or_default() {
        let slot_name = priority
            .slot_name
            .or_else(|| priority.slot_id.and_then(|id| slot_ids.get(&id).cloned()))
            .ok_or_else(|| {
                DefinitionError::malformed(path, "slot priority does not name a declared slot")
            })?;
        if !used.insert(priority.priority) {
            return Err(DefinitionError::malformed(
                path,
                format!("duplicate slot priority {}", priority.priority),
            ));
        }
        priorities.insert(slot_name, priority.priority);
    }

    let mut slots = Vec::with_capacity(slot_files.len());
    for (slot_path, slot) in slot_files {
        let slot_name = slot
            .name
            .ok_or_else(|| DefinitionError::malformed(&slot_path, "slot is missing a name"))?;
        let reference = slot
            .slot_type_name
            .or(slot.slot_type_id)
            .ok_or_else(|| {
                DefinitionError::malformed(
                    &slot_path,
                    format!("slot {slot_name} has no slot type reference"),
                )
            })?;
        let slot_type = resolve_type_ref(&reference, ids, names).ok_or_else(|| {
            DefinitionError::malformed(
                &slot_path,
                format!("slot {slot_name} references undeclared slot type {reference}"),
            )
        })?;

        let elicitation = slot.value_elicitation_setting;
        let required = elicitation
            .as_ref()
            .and_then(|e| e.slot_constraint.as_deref())
            == Some("Required");
        let invocation_label = elicitation
            .as_ref()
            .and_then(|e| e.slot_capture_setting.as_ref())
            .and_then(export::SlotCaptureSetting::invocation_label);
        let prompt_spec = elicitation.and_then(|e| e.prompt_specification);
        let max_retries = prompt_spec.as_ref().and_then(|p| p.max_retries);
        let prompt = prompt_spec
            .map(|p| export::messages(p.message_groups_list))
            .unwrap_or_default();

        let priority = match priorities.get(&slot_name) {
            Some(p) => *p,
            None if required => {
                return Err(DefinitionError::malformed(
                    path,
                    format!("required slot {slot_name} has no fill-order priority"),
                ))
            }
            None => i64::MAX,
        };

        slots.push(SlotSpec {
            name: slot_name,
            slot_type,
            required,
            priority,
            prompt,
            max_retries,
            allow_multiple: slot
                .multiple_values_setting
                .is_some_and(|m| m.allow_multiple_values),
            invocation_label,
        });
    }
    if let Some(unknown) = priorities
        .keys()
        .find(|n| !slots.iter().any(|s| &s.name == *n))
    {
        return Err(DefinitionError::malformed(
            path,
            format!("slot priority references undeclared slot {unknown}"),
        ));
    }
    slots.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));

    let templates: Vec<UtteranceTemplate> = file
        .sample_utterances
        .unwrap_or_default()
        .iter()
        .map(|u| UtteranceTemplate::parse(&u.utterance))
        .collect();
    for template in &templates {
        if let Some(missing) = template
            .placeholders()
            .find(|p| !slots.iter().any(|s| s.name == *p))
        {
            return Err(DefinitionError::malformed(
                path,
                format!(
                    "sample utterance {:?} references undeclared slot {missing}",
                    template.text
                ),
            ));
        }
    }
    if templates.is_empty() && !is_fallback {
        tracing::debug!(intent = %name, "Intent has no sample utterances; reachable only as a follow-up");
    }

    let confirmation = file
        .intent_confirmation_setting
        .filter(|c| c.is_active != Some(false))
        .and_then(|c| {
            let max_retries = c.prompt_specification.as_ref().and_then(|p| p.max_retries);
            let prompt = c
                .prompt_specification
                .map(|p| export::messages(p.message_groups_list))
                .unwrap_or_default();
            if prompt.is_empty() {
                return None;
            }
            let on_decline = match c.declination_next_step.and_then(|s| s.dialog_action) {
                Some(action) if action.kind == "ElicitSlot" => {
                    let slot = action.slot_to_elicit;
                    if let Some(name) = &slot {
                        if !slots.iter().any(|s| &s.name == name) {
                            return Some(Err(DefinitionError::malformed(
                                path,
                                format!("declination re-elicits undeclared slot {name}"),
                            )));
                        }
                    }
                    DeclineBehavior::Reelicit(slot)
                }
                _ => DeclineBehavior::End,
            };
            Some(Ok(ConfirmationSpec {
                prompt,
                declination: c
                    .declination_response
                    .map(|r| export::messages(r.message_groups_list))
                    .unwrap_or_default(),
                on_decline,
                max_retries,
            }))
        })
        .transpose()?;

    let closing = match file.intent_closing_setting {
        Some(setting) if setting.active.or(setting.is_active) != Some(false) => {
            convert_closing(path, setting)?
        }
        _ => ClosingSpec::default(),
    };

    Ok(Intent {
        name,
        templates,
        slots,
        confirmation,
        fulfillment: if file.fulfillment_code_hook.is_some_and(|h| h.on()) {
            FulfillmentMode::CodeHook
        } else {
            FulfillmentMode::ReturnIntent
        },
        dialog_code_hook: file.dialog_code_hook.is_some_and(|h| h.on()),
        invocation_label: file
            .initial_response_setting
            .and_then(|s| s.code_hook)
            .and_then(|h| h.invocation_label),
        closing,
        is_fallback,
    })
}

fn convert_closing(
    path: &Path,
    setting: export::ClosingSetting,
) -> Result<ClosingSpec, DefinitionError> {
    let response = setting
        .closing_response
        .map(|r| export::messages(r.message_groups_list))
        .unwrap_or_default();

    let conditional_step = setting.next_step.as_ref().and_then(NextStep::action_type)
        == Some("EvaluateConditional");

    let next = match (setting.conditional, setting.next_step) {
        (Some(conditional), _) if conditional_step && conditional.is_active => {
            let mut branches = Vec::with_capacity(conditional.conditional_branches.len());
            for (i, branch) in conditional.conditional_branches.into_iter().enumerate() {
                let condition = Condition::parse(&branch.condition.expression_string)
                    .map_err(|e| DefinitionError::malformed(path, e.to_string()))?;
                branches.push(ClosingBranch {
                    name: branch.name.unwrap_or_else(|| format!("branch{i}")),
                    condition,
                    next_intent: branch.next_step.and_then(|s| s.intent_name()),
                    response: branch
                        .response
                        .map(|r| export::messages(r.message_groups_list))
                        .unwrap_or_default(),
                });
            }
            let (default_intent, default_response) = match conditional.default_branch {
                Some(default) => (
                    default.next_step.and_then(|s| s.intent_name()),
                    default
                        .response
                        .map(|r| export::messages(r.message_groups_list))
                        .unwrap_or_default(),
                ),
                None => (None, Vec::new()),
            };
            NextIntentRule::Conditional {
                branches,
                default_intent,
                default_response,
            }
        }
        (_, Some(step)) if !conditional_step => step
            .intent_name()
            .filter(|n| !n.is_empty())
            .map_or(NextIntentRule::None, NextIntentRule::Fixed),
        _ => NextIntentRule::None,
    };

    Ok(ClosingSpec { response, next })
}

fn next_intents(rule: &NextIntentRule) -> Vec<&str> {
    match rule {
        NextIntentRule::None => Vec::new(),
        NextIntentRule::Fixed(name) => vec![name.as_str()],
        NextIntentRule::Conditional {
            branches,
            default_intent,
            ..
        } => branches
            .iter()
            .filter_map(|b| b.next_intent.as_deref())
            .chain(default_intent.as_deref())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, value: &Value) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    }

    /// Minimal valid export: one intent with one enumerated slot
    fn minimal_export() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "Bot.json", &json!({"name": "MiniBot"}));
        write(
            root,
            "BotLocales/en_US/SlotTypes/Colors/SlotType.json",
            &json!({
                "name": "Colors",
                "identifier": "COLORS1",
                "slotTypeValues": [
                    {"sampleValue": {"value": "Red"}, "synonyms": [{"value": "crimson"}]},
                    {"sampleValue": {"value": "Blue"}}
                ],
                "valueSelectionSetting": {"resolutionStrategy": "TopResolution"}
            }),
        );
        write(
            root,
            "BotLocales/en_US/Intents/PickColor/Intent.json",
            &json!({
                "name": "PickColor",
                "sampleUtterances": [{"utterance": "pick {Color}"}, {"utterance": "choose a color"}],
                "slotPriorities": [{"priority": 1, "slotName": "Color"}],
                "fulfillmentCodeHook": {"enabled": true}
            }),
        );
        write(
            root,
            "BotLocales/en_US/Intents/PickColor/Slots/Color/Slot.json",
            &json!({
                "name": "Color",
                "slotTypeId": "COLORS1",
                "valueElicitationSetting": {
                    "slotConstraint": "Required",
                    "promptSpecification": {
                        "maxRetries": 2,
                        "messageGroupsList": [{"message": {"plainTextMessage": {"value": "Which color?"}}}]
                    }
                }
            }),
        );
        dir
    }

    fn malformed_reason(result: Result<BotDefinition, DefinitionError>) -> String {
        match result {
            Err(DefinitionError::Malformed { reason, .. }) => reason,
            other => panic!("expected malformed definition, got {other:?}"),
        }
    }

    #[test]
    fn test_minimal_export() {
        let dir = minimal_export();
        let bot = load(dir.path(), "en_US").unwrap();
        assert_eq!(bot.name(), "MiniBot");

        let intent = bot.intent("PickColor").unwrap();
        assert_eq!(intent.fulfillment, FulfillmentMode::CodeHook);
        assert_eq!(intent.slots[0].slot_type, "Colors");
        assert_eq!(intent.slots[0].max_retries, Some(2));
        assert!(intent.slots[0].required);

        // No exported fallback intent, so one is synthesised
        assert_eq!(bot.fallback().name, FALLBACK_INTENT);
    }

    #[test]
    fn test_locale_directory_path() {
        let dir = minimal_export();
        let bot = load(&dir.path().join("BotLocales/en_US"), "fr_FR").unwrap();
        assert_eq!(bot.locale(), "en_US");
        assert_eq!(bot.name(), "MiniBot");
    }

    #[test]
    fn test_missing_path() {
        let dir = TempDir::new().unwrap();
        let result = load(&dir.path().join("nope"), "en_US");
        assert!(matches!(result, Err(DefinitionError::Io { .. })));
    }

    #[test]
    fn test_invalid_json() {
        let dir = minimal_export();
        fs::write(
            dir.path().join("BotLocales/en_US/Intents/PickColor/Intent.json"),
            "{ not json",
        )
        .unwrap();
        let result = load(dir.path(), "en_US");
        assert!(matches!(result, Err(DefinitionError::Parse { .. })));
    }

    #[test]
    fn test_intent_without_name() {
        let dir = minimal_export();
        write(
            dir.path(),
            "BotLocales/en_US/Intents/Anon/Intent.json",
            &json!({"sampleUtterances": [{"utterance": "hello"}]}),
        );
        assert!(malformed_reason(load(dir.path(), "en_US")).contains("missing a name"));
    }

    #[test]
    fn test_undeclared_slot_type() {
        let dir = minimal_export();
        write(
            dir.path(),
            "BotLocales/en_US/Intents/PickColor/Slots/Color/Slot.json",
            &json!({"name": "Color", "slotTypeName": "Shades",
                    "valueElicitationSetting": {"slotConstraint": "Required"}}),
        );
        assert!(malformed_reason(load(dir.path(), "en_US")).contains("undeclared slot type Shades"));
    }

    fn pick_color_with_declination(next_step: Value) -> Value {
        json!({
            "name": "PickColor",
            "sampleUtterances": [{"utterance": "choose a color"}],
            "slotPriorities": [{"priority": 1, "slotName": "Color"}],
            "intentConfirmationSetting": {
                "promptSpecification": {
                    "messageGroupsList": [{"message": {"plainTextMessage": {"value": "{Color}, right?"}}}]
                },
                "declinationNextStep": next_step
            }
        })
    }

    #[test]
    fn test_declination_reelicits_named_slot() {
        let dir = minimal_export();
        write(
            dir.path(),
            "BotLocales/en_US/Intents/PickColor/Intent.json",
            &pick_color_with_declination(
                json!({"dialogAction": {"type": "ElicitSlot", "slotToElicit": "Color"}}),
            ),
        );
        let bot = load(dir.path(), "en_US").unwrap();
        let confirmation = bot.intent("PickColor").unwrap().confirmation.clone().unwrap();
        assert_eq!(
            confirmation.on_decline,
            DeclineBehavior::Reelicit(Some("Color".to_string()))
        );
    }

    #[test]
    fn test_declination_to_undeclared_slot() {
        let dir = minimal_export();
        write(
            dir.path(),
            "BotLocales/en_US/Intents/PickColor/Intent.json",
            &pick_color_with_declination(
                json!({"dialogAction": {"type": "ElicitSlot", "slotToElicit": "Shade"}}),
            ),
        );
        assert!(malformed_reason(load(dir.path(), "en_US")).contains("undeclared slot Shade"));
    }

    #[test]
    fn test_required_slot_without_priority() {
        let dir = minimal_export();
        write(
            dir.path(),
            "BotLocales/en_US/Intents/PickColor/Intent.json",
            &json!({"name": "PickColor", "sampleUtterances": [{"utterance": "choose a color"}]}),
        );
        assert!(malformed_reason(load(dir.path(), "en_US")).contains("fill-order priority"));
    }

    #[test]
    fn test_placeholder_must_reference_declared_slot() {
        let dir = minimal_export();
        write(
            dir.path(),
            "BotLocales/en_US/Intents/PickColor/Intent.json",
            &json!({
                "name": "PickColor",
                "sampleUtterances": [{"utterance": "pick {Shade}"}],
                "slotPriorities": [{"priority": 1, "slotName": "Color"}]
            }),
        );
        assert!(malformed_reason(load(dir.path(), "en_US")).contains("undeclared slot Shade"));
    }

    #[test]
    fn test_synonym_collision() {
        let dir = minimal_export();
        write(
            dir.path(),
            "BotLocales/en_US/SlotTypes/Colors/SlotType.json",
            &json!({
                "name": "Colors",
                "identifier": "COLORS1",
                "slotTypeValues": [
                    {"sampleValue": {"value": "Red"}, "synonyms": [{"value": "ruby"}]},
                    {"sampleValue": {"value": "Pink"}, "synonyms": [{"value": "RUBY"}]}
                ]
            }),
        );
        assert!(malformed_reason(load(dir.path(), "en_US")).contains("more than one canonical value"));
    }

    #[test]
    fn test_invalid_regex() {
        let dir = minimal_export();
        write(
            dir.path(),
            "BotLocales/en_US/SlotTypes/Colors/SlotType.json",
            &json!({
                "name": "Colors",
                "identifier": "COLORS1",
                "valueSelectionSetting": {"regexFilter": {"pattern": "[a-z"}}
            }),
        );
        assert!(malformed_reason(load(dir.path(), "en_US")).contains("invalid pattern"));
    }

    #[test]
    fn test_closing_setting_to_unknown_intent() {
        let dir = minimal_export();
        write(
            dir.path(),
            "BotLocales/en_US/Intents/PickColor/Intent.json",
            &json!({
                "name": "PickColor",
                "sampleUtterances": [{"utterance": "choose a color"}],
                "slotPriorities": [{"priority": 1, "slotName": "Color"}],
                "intentClosingSetting": {
                    "nextStep": {"dialogAction": {"type": "StartIntent"}, "intent": {"name": "Nowhere"}}
                }
            }),
        );
        assert!(malformed_reason(load(dir.path(), "en_US")).contains("undeclared intent Nowhere"));
    }

    #[test]
    fn test_bad_condition_expression() {
        let dir = minimal_export();
        write(
            dir.path(),
            "BotLocales/en_US/Intents/PickColor/Intent.json",
            &json!({
                "name": "PickColor",
                "sampleUtterances": [{"utterance": "choose a color"}],
                "slotPriorities": [{"priority": 1, "slotName": "Color"}],
                "intentClosingSetting": {
                    "nextStep": {"dialogAction": {"type": "EvaluateConditional"}},
                    "conditional": {
                        "isActive": true,
                        "conditionalBranches": [{
                            "name": "broken",
                            "condition": {"expressionString": "{Color} = "},
                            "nextStep": {"dialogAction": {"type": "EndConversation"}}
                        }]
                    }
                }
            }),
        );
        assert!(malformed_reason(load(dir.path(), "en_US")).contains("invalid condition"));
    }
}
