//! Utterance matching
//!
//! Ranks candidate intents by similarity to their sample utterances and
//! pulls raw slot candidates out of `{slot}` placeholder positions.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

use crate::bot::{BotDefinition, Intent, TemplatePart, UtteranceTemplate};
use crate::config::EmulatorConfig;
use crate::session::Session;
use crate::slots::{RawSlotValue, SlotTypeValidator};
use crate::text;

/// Upper bound on alignments explored per template
const MAX_ALIGNMENTS: usize = 4096;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("scorer failed: {0}")]
    Scorer(String),
}

/// One ranked candidate
#[derive(Debug, Clone, PartialEq)]
pub struct IntentMatch {
    pub intent: String,
    pub confidence: f64,
    /// Raw slot candidates captured from placeholder positions
    pub slots: BTreeMap<String, String>,
}

impl IntentMatch {
    pub fn fallback(intent: impl Into<String>) -> Self {
        Self {
            intent: intent.into(),
            confidence: 0.0,
            slots: BTreeMap::new(),
        }
    }
}

/// Ranks intents for an utterance.
///
/// Implementations return candidates best-first. When nothing clears the
/// confidence floor the list holds only the fallback intent.
#[async_trait]
pub trait UtteranceMatcher: Send + Sync {
    async fn rank(
        &self,
        text: &str,
        candidates: &[&Intent],
        session: &Session,
    ) -> Result<Vec<IntentMatch>, MatchError>;
}

#[async_trait]
impl<T: UtteranceMatcher + ?Sized> UtteranceMatcher for Arc<T> {
    async fn rank(
        &self,
        text: &str,
        candidates: &[&Intent],
        session: &Session,
    ) -> Result<Vec<IntentMatch>, MatchError> {
        (**self).rank(text, candidates, session).await
    }
}

/// Default matcher: template alignment plus fuzzy similarity
pub struct SampleUtteranceMatcher {
    bot: Arc<BotDefinition>,
    config: EmulatorConfig,
}

impl SampleUtteranceMatcher {
    pub fn new(bot: Arc<BotDefinition>, config: EmulatorConfig) -> Self {
        Self { bot, config }
    }

    /// Best score for one intent with the slots captured by its best template
    fn score_intent(&self, input: &Input, intent: &Intent) -> (f64, BTreeMap<String, String>) {
        let validator = SlotTypeValidator::new(&self.bot, &self.config);
        let mut best = (0.0, BTreeMap::new());

        for template in intent.templates.iter().filter(|t| !t.is_placeholder_only()) {
            let (score, slots) = score_template(input, template, intent, &validator);
            if score > best.0 {
                best = (score, slots);
            }
        }
        best
    }
}

#[async_trait]
impl UtteranceMatcher for SampleUtteranceMatcher {
    async fn rank(
        &self,
        text: &str,
        candidates: &[&Intent],
        _session: &Session,
    ) -> Result<Vec<IntentMatch>, MatchError> {
        let input = Input::new(text);
        let floor = self.config.confidence_floor;

        let mut ranked: Vec<(IntentMatch, usize)> = Vec::new();
        if !input.tokens.is_empty() {
            for intent in candidates.iter().filter(|i| !i.is_fallback) {
                let (confidence, slots) = self.score_intent(&input, intent);
                if confidence >= floor {
                    let unresolved = intent.unresolved_required(&slots);
                    ranked.push((
                        IntentMatch {
                            intent: intent.name.clone(),
                            confidence,
                            slots,
                        },
                        unresolved,
                    ));
                }
            }
        }

        ranked.sort_by(|(a, a_unresolved), (b, b_unresolved)| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a_unresolved.cmp(b_unresolved))
                .then_with(|| {
                    self.bot
                        .declaration_order(&a.intent)
                        .cmp(&self.bot.declaration_order(&b.intent))
                })
        });

        tracing::debug!(
            utterance = %text,
            candidates = candidates.len(),
            top = ?ranked.first().map(|(m, _)| (&m.intent, m.confidence)),
            "Ranked intents"
        );

        if ranked.is_empty() {
            return Ok(vec![IntentMatch::fallback(&self.bot.fallback().name)]);
        }
        Ok(ranked.into_iter().map(|(m, _)| m).collect())
    }
}

// ============================================================================
// Scoring
// ============================================================================

struct Input {
    /// Normalised tokens
    tokens: Vec<String>,
    /// Byte range of each token in `raw`
    offsets: Vec<(usize, usize)>,
    raw: String,
    normalized: String,
}

impl Input {
    fn new(text: &str) -> Self {
        let tokens = text::tokens(text);
        let offsets = text::token_spans(text);
        let normalized = tokens.join(" ");
        Self {
            tokens,
            offsets,
            raw: text.to_string(),
            normalized,
        }
    }

    /// Original text covering tokens `start..end`
    fn span(&self, start: usize, end: usize) -> String {
        if start >= end {
            return String::new();
        }
        match (self.offsets.get(start), self.offsets.get(end - 1)) {
            (Some(&(from, _)), Some(&(_, to))) => {
                self.raw.get(from..to).map(str::to_string).unwrap_or_default()
            }
            _ => String::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct Alignment {
    start: usize,
    end: usize,
    captures: Vec<(String, usize, usize)>,
}

/// Template score: max of alignment and fuzzy similarity
fn score_template(
    input: &Input,
    template: &UtteranceTemplate,
    intent: &Intent,
    validator: &SlotTypeValidator<'_>,
) -> (f64, BTreeMap<String, String>) {
    let words = template.words();
    let fuzzy = text::jaccard(&input.tokens, &words.iter().map(|w| (*w).to_string()).collect::<Vec<_>>())
        .max(text::edit_ratio(&input.normalized, &words.join(" ")));

    let mut validity_cache: HashMap<(String, usize, usize), bool> = HashMap::new();
    let mut is_valid = |slot: &str, start: usize, end: usize| -> bool {
        *validity_cache
            .entry((slot.to_string(), start, end))
            .or_insert_with(|| {
                intent.slot(slot).is_some_and(|spec| {
                    validator
                        .validate_slot(&RawSlotValue::Text(input.span(start, end)), spec)
                        .is_ok()
                })
            })
    };

    let mut best: Option<(usize, f64, Alignment)> = None;
    for alignment in align(&template.parts, &input.tokens) {
        let valid = alignment
            .captures
            .iter()
            .filter(|(slot, s, e)| is_valid(slot, *s, *e))
            .count();
        let score = alignment_score(&alignment, input.tokens.len());
        let better = match &best {
            None => true,
            Some((best_valid, best_score, _)) => {
                (valid, score).partial_cmp(&(*best_valid, *best_score)) == Some(Ordering::Greater)
            }
        };
        if better {
            best = Some((valid, score, alignment));
        }
    }

    match best {
        Some((_, score, alignment)) if score >= fuzzy => {
            let slots = alignment
                .captures
                .iter()
                .map(|(slot, s, e)| (slot.clone(), input.span(*s, *e)))
                .collect();
            (score, slots)
        }
        _ => (fuzzy, BTreeMap::new()),
    }
}

/// 1.0 for an exact full alignment, else `0.5 + 0.5 * covered / total`
#[allow(clippy::cast_precision_loss)]
fn alignment_score(alignment: &Alignment, total: usize) -> f64 {
    if alignment.start == 0 && alignment.end == total {
        return 1.0;
    }
    let covered = alignment.end - alignment.start;
    0.5 + 0.5 * covered as f64 / total as f64
}

/// Every contiguous alignment of `parts` against `tokens`
fn align(parts: &[TemplatePart], tokens: &[String]) -> Vec<Alignment> {
    fn extend(
        parts: &[TemplatePart],
        tokens: &[String],
        index: usize,
        pos: usize,
        start: usize,
        captures: &mut Vec<(String, usize, usize)>,
        out: &mut Vec<Alignment>,
    ) {
        if out.len() >= MAX_ALIGNMENTS {
            return;
        }
        let Some(part) = parts.get(index) else {
            out.push(Alignment {
                start,
                end: pos,
                captures: captures.clone(),
            });
            return;
        };
        match part {
            TemplatePart::Word(word) => {
                if tokens.get(pos) == Some(word) {
                    extend(parts, tokens, index + 1, pos + 1, start, captures, out);
                }
            }
            TemplatePart::Slot(name) => {
                for end in pos + 1..=tokens.len() {
                    captures.push((name.clone(), pos, end));
                    extend(parts, tokens, index + 1, end, start, captures, out);
                    captures.pop();
                }
            }
        }
    }

    let mut out = Vec::new();
    if parts.is_empty() {
        return out;
    }
    let mut captures = Vec::new();
    for start in 0..tokens.len() {
        extend(parts, tokens, 0, start, start, &mut captures, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::fixtures::airline_bot;
    use crate::bot::{SlotSpec, SlotType};

    fn matcher() -> SampleUtteranceMatcher {
        SampleUtteranceMatcher::new(airline_bot(), EmulatorConfig::default())
    }

    async fn rank_all(text: &str) -> Vec<IntentMatch> {
        let bot = airline_bot();
        let candidates: Vec<&Intent> = bot.intents().iter().collect();
        matcher()
            .rank(text, &candidates, &Session::new("test"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_exact_template_scores_one() {
        let ranked = rank_all("Book a flight").await;
        assert_eq!(ranked[0].intent, "BookFlight");
        assert!((ranked[0].confidence - 1.0).abs() < 1e-9);
        assert!(ranked[0].slots.is_empty());
    }

    #[tokio::test]
    async fn test_extracts_slots_with_original_casing() {
        let ranked = rank_all("book a flight from Los Angeles to New York").await;
        assert_eq!(ranked[0].intent, "BookFlight");
        assert_eq!(ranked[0].slots["Origin"], "Los Angeles");
        assert_eq!(ranked[0].slots["Destination"], "New York");
    }

    #[tokio::test]
    async fn test_captured_names_keep_apostrophes() {
        let ranked = rank_all("my name is Jane O'Brien").await;
        assert_eq!(ranked[0].intent, "UpdateName");
        assert_eq!(ranked[0].slots["PassengerName"], "Jane O'Brien");
    }

    #[tokio::test]
    async fn test_filler_prefers_valid_captures() {
        let ranked = rank_all("please book a flight from Boston to Chicago thanks").await;
        assert_eq!(ranked[0].intent, "BookFlight");
        assert_eq!(ranked[0].slots["Destination"], "Chicago");
        assert!(ranked[0].confidence < 1.0);
        assert!(ranked[0].confidence >= 0.6);
    }

    #[tokio::test]
    async fn test_gibberish_falls_back() {
        let ranked = rank_all("asdkjh").await;
        assert_eq!(ranked, vec![IntentMatch::fallback("FallbackIntent")]);

        let ranked = rank_all("   ").await;
        assert_eq!(ranked[0].intent, "FallbackIntent");
    }

    #[tokio::test]
    async fn test_placeholder_only_templates_never_match() {
        // CheckFlightStatus has a bare "{FlightNumber}" template
        let ranked = rank_all("AA123").await;
        assert_eq!(ranked[0].intent, "FallbackIntent");
    }

    #[tokio::test]
    async fn test_restricted_candidates() {
        let bot = airline_bot();
        let book = bot.intent("BookFlight").unwrap();
        let ranked = matcher()
            .rank("goodbye", &[book], &Session::new("test"))
            .await
            .unwrap();
        assert_eq!(ranked[0].intent, "FallbackIntent");
    }

    fn greeting_intent(name: &str, required: &[&str]) -> Intent {
        Intent {
            name: name.to_string(),
            templates: vec![UtteranceTemplate::parse("hello there")],
            slots: required
                .iter()
                .enumerate()
                .map(|(i, slot)| SlotSpec {
                    name: (*slot).to_string(),
                    slot_type: "AMAZON.FreeFormInput".to_string(),
                    required: true,
                    priority: i64::try_from(i).unwrap(),
                    prompt: Vec::new(),
                    max_retries: None,
                    allow_multiple: false,
                    invocation_label: None,
                })
                .collect(),
            is_fallback: false,
            ..Intent::default_fallback()
        }
    }

    #[tokio::test]
    async fn test_ties_break_on_unresolved_then_declaration_order() {
        let mut types = HashMap::new();
        types.insert(
            "AMAZON.FreeFormInput".to_string(),
            SlotType::builtin("AMAZON.FreeFormInput").unwrap(),
        );
        let bot = Arc::new(BotDefinition::from_parts(
            "Greeter".into(),
            "en_US".into(),
            vec![
                greeting_intent("Alpha", &["Name"]),
                greeting_intent("Beta", &[]),
                greeting_intent("Gamma", &[]),
            ],
            Intent::default_fallback(),
            types,
        ));
        let matcher = SampleUtteranceMatcher::new(bot.clone(), EmulatorConfig::default());
        let candidates: Vec<&Intent> = bot.intents().iter().collect();

        let ranked = matcher
            .rank("Hello there!", &candidates, &Session::new("test"))
            .await
            .unwrap();
        let names: Vec<&str> = ranked.iter().map(|m| m.intent.as_str()).collect();
        assert_eq!(names, vec!["Beta", "Gamma", "Alpha"]);
    }

    #[test]
    fn test_align_requires_nonempty_captures() {
        let template = UtteranceTemplate::parse("to {City}");
        let tokens: Vec<String> = vec!["to".into()];
        assert!(align(&template.parts, &tokens).is_empty());

        let tokens: Vec<String> = vec!["fly".into(), "to".into(), "new".into(), "york".into()];
        let alignments = align(&template.parts, &tokens);
        assert_eq!(alignments.len(), 2);
        assert!(alignments.iter().all(|a| a.start == 1));
    }

    #[test]
    fn test_alignment_score() {
        let full = Alignment {
            start: 0,
            end: 4,
            captures: Vec::new(),
        };
        assert!((alignment_score(&full, 4) - 1.0).abs() < 1e-9);
        let partial = Alignment {
            start: 1,
            end: 3,
            captures: Vec::new(),
        };
        assert!((alignment_score(&partial, 4) - 0.75).abs() < 1e-9);
    }
}
