//! Role tag to billable task matching.
//!
//! A person's role tag is free text; a project's catalog holds several task names,
//! each with its own rate. [`RoleMatcher`] runs an ordered list of [`Rule`]s over a
//! [`MatchState`] (current tag + surviving candidates) and accepts the result only
//! when exactly one candidate survives:
//!
//! 1. [`Rule::ExactOverride`]: forced tag for specific full names.
//! 2. [`Rule::SubstringMatch`]: tasks containing the tag (case-sensitive).
//! 3. [`Rule::SynonymFallback`]: only with zero candidates; tag synonyms, then per-person synonyms.
//! 4. [`Rule::NameDisambiguation`]: only with several candidates; keep those naming the person's first name, if that leaves exactly one.
//! 5. [`Rule::PersonOverride`]: only with several candidates; forced task per first name.
//! 6. [`Rule::ExclusionFilter`]: always; drop catch-all non-billable tasks.
//!
//! All override tables come from [`MatcherConfig`], never from code.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// `tag` is replaced by `substitute` when searching the task catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Synonym {
    pub tag: String,
    pub substitute: String,
}

impl Synonym {
    pub fn new(tag: &str, substitute: &str) -> Self {
        Self {
            tag: tag.to_string(),
            substitute: substitute.to_string(),
        }
    }
}

/// Data behind the matching rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Full name -> role tag used instead of the recorded one.
    pub identity_overrides: BTreeMap<String, String>,
    /// Tried in order when the tag matches no task.
    pub synonyms: Vec<Synonym>,
    /// Full name -> substring tried after the tag synonyms.
    pub person_synonyms: BTreeMap<String, String>,
    /// First name -> task name chosen when several candidates remain.
    pub person_task_overrides: BTreeMap<String, String>,
    /// Task names containing any of these are never billed.
    pub excluded_markers: Vec<String>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            identity_overrides: BTreeMap::new(),
            synonyms: vec![
                Synonym::new("Production", "Project"),
                Synonym::new("Product", "Project"),
                Synonym::new("Engineering", "Development"),
                Synonym::new("Development", "Engineering"),
            ],
            person_synonyms: BTreeMap::new(),
            person_task_overrides: BTreeMap::new(),
            excluded_markers: vec!["Non-Billable".to_string()],
        }
    }
}

/// Who is being matched.
#[derive(Debug, Clone, Copy)]
pub struct Subject<'a> {
    pub full_name: &'a str,
    pub first_name: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchState {
    pub tag: String,
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    ExactOverride(BTreeMap<String, String>),
    SubstringMatch,
    SynonymFallback {
        synonyms: Vec<Synonym>,
        person_synonyms: BTreeMap<String, String>,
    },
    NameDisambiguation,
    PersonOverride(BTreeMap<String, String>),
    ExclusionFilter(Vec<String>),
}

fn containing(pool: &[String], needle: &str) -> Vec<String> {
    if needle.is_empty() {
        return Vec::new();
    }
    pool.iter().filter(|t| t.contains(needle)).cloned().collect()
}

impl Rule {
    pub fn name(&self) -> &'static str {
        match self {
            Rule::ExactOverride(_) => "exact_override",
            Rule::SubstringMatch => "substring_match",
            Rule::SynonymFallback { .. } => "synonym_fallback",
            Rule::NameDisambiguation => "name_disambiguation",
            Rule::PersonOverride(_) => "person_override",
            Rule::ExclusionFilter(_) => "exclusion_filter",
        }
    }

    /// Apply this rule. `pool` is the project's full billable catalog.
    pub fn apply(&self, state: MatchState, subject: Subject<'_>, pool: &[String]) -> MatchState {
        match self {
            Rule::ExactOverride(overrides) => match overrides.get(subject.full_name) {
                Some(tag) => MatchState {
                    tag: tag.clone(),
                    ..state
                },
                None => state,
            },
            Rule::SubstringMatch => MatchState {
                candidates: containing(pool, &state.tag),
                ..state
            },
            Rule::SynonymFallback {
                synonyms,
                person_synonyms,
            } => {
                if !state.candidates.is_empty() {
                    return state;
                }
                let tag = state.tag.clone();
                let substitutes = synonyms
                    .iter()
                    .filter(|s| s.tag == tag)
                    .map(|s| s.substitute.as_str())
                    .chain(person_synonyms.get(subject.full_name).map(String::as_str));
                for substitute in substitutes {
                    let candidates = containing(pool, substitute);
                    if !candidates.is_empty() {
                        return MatchState { candidates, ..state };
                    }
                }
                state
            }
            Rule::NameDisambiguation => {
                if state.candidates.len() <= 1 {
                    return state;
                }
                let narrowed = containing(&state.candidates, subject.first_name);
                if narrowed.len() == 1 {
                    MatchState {
                        candidates: narrowed,
                        ..state
                    }
                } else {
                    state
                }
            }
            Rule::PersonOverride(overrides) => {
                if state.candidates.len() <= 1 {
                    return state;
                }
                match overrides.get(subject.first_name) {
                    Some(task) if state.candidates.contains(task) => MatchState {
                        candidates: vec![task.clone()],
                        ..state
                    },
                    _ => state,
                }
            }
            Rule::ExclusionFilter(markers) => MatchState {
                candidates: state
                    .candidates
                    .into_iter()
                    .filter(|t| !markers.iter().any(|m| t.contains(m.as_str())))
                    .collect(),
                ..state
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched(String),
    /// No candidate survived. Carries the tag finally tried and the catalog searched.
    NoMatch { tag: String, pool: Vec<String> },
    /// Several candidates survived every rule.
    Ambiguous { tag: String, candidates: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct RoleMatcher {
    rules: Vec<Rule>,
}

impl RoleMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        let MatcherConfig {
            identity_overrides,
            synonyms,
            person_synonyms,
            person_task_overrides,
            excluded_markers,
        } = config;
        Self::with_rules(vec![
            Rule::ExactOverride(identity_overrides),
            Rule::SubstringMatch,
            Rule::SynonymFallback {
                synonyms,
                person_synonyms,
            },
            Rule::NameDisambiguation,
            Rule::PersonOverride(person_task_overrides),
            Rule::ExclusionFilter(excluded_markers),
        ])
    }

    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn match_task(&self, tag: &str, subject: Subject<'_>, pool: &[String]) -> MatchOutcome {
        let mut state = MatchState {
            tag: tag.to_string(),
            candidates: Vec::new(),
        };
        for rule in &self.rules {
            state = rule.apply(state, subject, pool);
            debug!(
                rule = rule.name(),
                person = subject.full_name,
                tag = %state.tag,
                candidates = ?state.candidates,
                "Applied matching rule"
            );
        }

        let MatchState { tag, mut candidates } = state;
        match candidates.len() {
            1 => MatchOutcome::Matched(candidates.remove(0)),
            0 => MatchOutcome::NoMatch {
                tag,
                pool: pool.to_vec(),
            },
            _ => MatchOutcome::Ambiguous { tag, candidates },
        }
    }
}

impl Default for RoleMatcher {
    fn default() -> Self {
        Self::new(MatcherConfig::default())
    }
}
