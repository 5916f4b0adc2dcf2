//! Order-independent reducers for fan-in of branch state.
//!
//! Every function here is pure and total: it combines the `current` value of
//! a state field with an `incoming` value from another branch and never
//! fails. Entries that look malformed (a map key that disagrees with the
//! entry's own id, NaN scores, ...) are carried through untouched rather
//! than dropped.
//!
//! # Ordering guarantees
//!
//! | reducer                       | commutative | associative | idempotent |
//! |-------------------------------|-------------|-------------|------------|
//! | [`merge_techniques_used`]     | yes         | yes         | yes        |
//! | [`merge_methodology_trace`]   | yes         | yes         | yes        |
//! | [`merge_item_scores`]         | yes         | yes         | yes        |
//! | [`merge_excluded_techniques`] | unless `excluded_at` ties | yes | yes |
//! | [`merge_agent_contributions`] | unless artifact keys collide | yes | yes |

use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::domain::{
    AgentContribution, ExcludedTechnique, ItemScore, PartialEvaluationState, TraceEvent,
};

/// Sorted, de-duplicated union of technique ids.
pub fn merge_techniques_used(current: &[String], incoming: &[String]) -> Vec<String> {
    current
        .iter()
        .chain(incoming)
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Concatenate two traces, dropping duplicates by
/// `(step, agent, technique_id, item_id, action)`.
///
/// Output is sorted by `(step, timestamp, agent, technique_id)`. When two
/// events share an identity the one that sorts first is kept, so the result
/// does not depend on which side it came from.
pub fn merge_methodology_trace(current: &[TraceEvent], incoming: &[TraceEvent]) -> Vec<TraceEvent> {
    let mut all: Vec<&TraceEvent> = current.iter().chain(incoming).collect();
    all.sort_by(|a, b| trace_order(a, b));

    let mut seen = HashSet::with_capacity(all.len());
    let mut merged = Vec::with_capacity(all.len());
    for event in all {
        if seen.insert(event.key()) {
            merged.push(event.clone());
        }
    }
    merged
}

fn trace_order(a: &TraceEvent, b: &TraceEvent) -> Ordering {
    a.step
        .cmp(&b.step)
        .then_with(|| a.timestamp.cmp(&b.timestamp))
        .then_with(|| a.agent.cmp(&b.agent))
        .then_with(|| a.technique_id.cmp(&b.technique_id))
        .then_with(|| a.item_id.cmp(&b.item_id))
        .then_with(|| a.action.cmp(&b.action))
        .then_with(|| a.evidence_ref.cmp(&b.evidence_ref))
        .then_with(|| match (a.score_delta, b.score_delta) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (x, y) => x.is_some().cmp(&y.is_some()),
        })
}

/// Union of two item-score maps.
///
/// On a key collision the entry with the strictly later `timestamp` wins.
/// Equal timestamps fall back to comparing a SHA-256 digest of each entry's
/// JSON form (larger wins); identical content keeps `incoming`.
pub fn merge_item_scores(
    current: &BTreeMap<String, ItemScore>,
    incoming: &BTreeMap<String, ItemScore>,
) -> BTreeMap<String, ItemScore> {
    let mut merged = current.clone();
    for (item_id, candidate) in incoming {
        let replace = match merged.get(item_id) {
            Some(existing) => incoming_supersedes(existing, candidate),
            None => true,
        };
        if replace {
            merged.insert(item_id.clone(), candidate.clone());
        }
    }
    merged
}

fn incoming_supersedes(existing: &ItemScore, incoming: &ItemScore) -> bool {
    match incoming.timestamp.cmp(&existing.timestamp) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => content_digest(incoming) >= content_digest(existing),
    }
}

fn content_digest(score: &ItemScore) -> [u8; 32] {
    let bytes = serde_json::to_vec(score).unwrap_or_default();
    Sha256::digest(&bytes).into()
}

/// De-duplicate exclusions by `technique_id`.
///
/// This is not plain incoming-wins: the record with the later `excluded_at`
/// wins whichever side it arrives on, so an older incoming record loses to a
/// newer current one. Only an `excluded_at` tie falls back to incoming-wins.
/// Output is sorted by technique id.
pub fn merge_excluded_techniques(
    current: &[ExcludedTechnique],
    incoming: &[ExcludedTechnique],
) -> Vec<ExcludedTechnique> {
    let mut by_id: BTreeMap<&str, &ExcludedTechnique> = BTreeMap::new();
    for entry in current.iter().chain(incoming) {
        match by_id.get(entry.technique_id.as_str()) {
            Some(existing) if existing.excluded_at > entry.excluded_at => {}
            _ => {
                by_id.insert(entry.technique_id.as_str(), entry);
            }
        }
    }
    by_id.into_values().cloned().collect()
}

/// Per-agent union of technique and item sets; artifact maps are merged
/// shallowly with incoming values winning on key collision.
pub fn merge_agent_contributions(
    current: &BTreeMap<String, AgentContribution>,
    incoming: &BTreeMap<String, AgentContribution>,
) -> BTreeMap<String, AgentContribution> {
    let mut merged = current.clone();
    for (agent, contribution) in incoming {
        match merged.get_mut(agent) {
            Some(existing) => {
                existing
                    .technique_ids
                    .extend(contribution.technique_ids.iter().cloned());
                existing
                    .item_ids
                    .extend(contribution.item_ids.iter().cloned());
                for (key, value) in &contribution.artifacts {
                    existing.artifacts.insert(key.clone(), value.clone());
                }
            }
            None => {
                merged.insert(agent.clone(), contribution.clone());
            }
        }
    }
    merged
}

/// Apply every field reducer to two partial states.
pub fn merge_partial_states(
    current: &PartialEvaluationState,
    incoming: &PartialEvaluationState,
) -> PartialEvaluationState {
    PartialEvaluationState {
        item_scores: merge_item_scores(&current.item_scores, &incoming.item_scores),
        trace_events: merge_methodology_trace(&current.trace_events, &incoming.trace_events),
        techniques_used: merge_techniques_used(&current.techniques_used, &incoming.techniques_used),
        excluded_techniques: merge_excluded_techniques(
            &current.excluded_techniques,
            &incoming.excluded_techniques,
        ),
        agent_contributions: merge_agent_contributions(
            &current.agent_contributions,
            &incoming.agent_contributions,
        ),
    }
}

/// Fold any number of partial states, starting from empty.
pub fn fold_partial_states<'a, I>(states: I) -> PartialEvaluationState
where
    I: IntoIterator<Item = &'a PartialEvaluationState>,
{
    states
        .into_iter()
        .fold(PartialEvaluationState::default(), |acc, next| {
            merge_partial_states(&acc, next)
        })
}
