// src/pipeline/comparator.rs — Stimulus repetition check

use super::types::{value_text, Stimulus};

/// True when `candidate` shares a case-insensitively equal value with any
/// prior stimulus on any dimension both of them carry.
///
/// A single matching dimension is enough, even if every other one differs.
pub fn is_repeated(candidate: &Stimulus, prior: &[Stimulus]) -> bool {
    find_repetition(candidate, prior).is_some()
}

/// The first prior index and dimension that make `candidate` a repeat.
pub fn find_repetition<'a>(
    candidate: &'a Stimulus,
    prior: &[Stimulus],
) -> Option<(usize, &'a str)> {
    prior.iter().enumerate().find_map(|(idx, existing)| {
        candidate
            .0
            .iter()
            .find(|(key, value)| {
                existing
                    .get(key)
                    .is_some_and(|other| eq_ignore_case(&value_text(value), &value_text(other)))
            })
            .map(|(key, _)| (idx, key.as_str()))
    })
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}
