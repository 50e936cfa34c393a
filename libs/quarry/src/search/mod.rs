//! Search strategy evaluation
//!
//! Turns the configured search-field groups and a caller's term into a
//! [`SearchFilter`]. The filter over-selects: every group that matches
//! qualifies a row, and priority/weight are only carried along as hints.

mod filter;
mod fuzzy;
mod normalize;

pub use filter::{FieldPredicate, FilterGroup, SearchFilter};
pub use fuzzy::{fuzzy_pattern, FuzzyPattern};
pub use normalize::{escape_like, normalize_for_matching};

use crate::config::SearchSettings;
use crate::models::{SearchFieldGroup, SearchStrategy};
use crate::Error;
use std::collections::HashSet;
use std::sync::Mutex;

pub struct SearchEngine {
    settings: SearchSettings,
    /// Configuration errors already logged.
    reported: Mutex<HashSet<String>>,
}

impl SearchEngine {
    pub fn new(settings: SearchSettings) -> Self {
        Self {
            settings,
            reported: Mutex::new(HashSet::new()),
        }
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Build the search filter for `term`. Returns `None` when the term is
    /// missing or blank, or when no group yields a predicate.
    pub fn build_search_filters(
        &self,
        groups: &[SearchFieldGroup],
        term: Option<&str>,
    ) -> Option<SearchFilter> {
        let term = term.map(str::trim).filter(|t| !t.is_empty())?;
        let length = term.chars().count();
        let fuzzy_allowed =
            (self.settings.min_fuzzy_length..=self.settings.max_fuzzy_length).contains(&length);
        let normalized = normalize_for_matching(term);

        let mut ordered: Vec<&SearchFieldGroup> = groups.iter().collect();
        // Stable: equal priorities keep declaration order.
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut out_groups = Vec::new();
        let mut algorithms: Vec<SearchStrategy> = Vec::new();

        for group in ordered {
            let Some(strategies) = self.effective_strategies(group, fuzzy_allowed) else {
                continue;
            };

            let weight = self.checked_weight(group);
            let mut predicates = Vec::new();
            for field in &group.fields {
                for strategy in &strategies {
                    let value = match strategy {
                        // An all-punctuation term normalizes to nothing; keep the raw term.
                        SearchStrategy::Fuzzy if !normalized.is_empty() => normalized.clone(),
                        _ => term.to_string(),
                    };
                    predicates.push(FieldPredicate {
                        field: field.clone(),
                        is_array: group.is_array,
                        strategy: *strategy,
                        value,
                    });
                }
            }

            for strategy in &strategies {
                if !algorithms.contains(strategy) {
                    algorithms.push(*strategy);
                }
            }

            out_groups.push(FilterGroup {
                fields: group.fields.clone(),
                is_array: group.is_array,
                strategies,
                priority: group.priority,
                weight,
                predicates,
            });
        }

        let filter = SearchFilter {
            term: term.to_string(),
            groups: out_groups,
            algorithms,
        };
        (!filter.is_empty()).then_some(filter)
    }

    /// Strategy set for a group, or `None` if the group has to be skipped.
    fn effective_strategies(
        &self,
        group: &SearchFieldGroup,
        fuzzy_allowed: bool,
    ) -> Option<Vec<SearchStrategy>> {
        if group.fields.is_empty() {
            self.report(Error::Configuration(
                "search group declares no fields; group skipped".to_string(),
            ));
            return None;
        }
        if group.is_array && group.fields.len() != 1 {
            self.report(Error::Configuration(format!(
                "array search group must name exactly one field, got {:?}; group skipped",
                group.fields
            )));
            return None;
        }

        let mut parsed = Vec::new();
        for name in &group.strategies {
            match name.parse::<SearchStrategy>() {
                Ok(s) => parsed.push(s),
                Err(e) => self.report(Error::Configuration(format!(
                    "{e} in search group {:?}; strategy skipped",
                    group.fields
                ))),
            }
        }

        if parsed.is_empty() {
            match group.default_strategy.parse::<SearchStrategy>() {
                Ok(s) => parsed.push(s),
                Err(e) => {
                    self.report(Error::Configuration(format!(
                        "{e} as default strategy of search group {:?}; group skipped",
                        group.fields
                    )));
                    return None;
                }
            }
        }

        let mut strategies = Vec::with_capacity(parsed.len());
        for strategy in parsed {
            let strategy = match strategy {
                SearchStrategy::Fuzzy if !fuzzy_allowed => SearchStrategy::Contains,
                other => other,
            };
            if !strategies.contains(&strategy) {
                strategies.push(strategy);
            }
        }
        Some(strategies)
    }

    fn checked_weight(&self, group: &SearchFieldGroup) -> f64 {
        if group.weight.is_finite() && (0.0..=1.0).contains(&group.weight) {
            return group.weight;
        }
        self.report(Error::Configuration(format!(
            "search group {:?} has weight {} outside 0.0..=1.0; clamped",
            group.fields, group.weight
        )));
        if group.weight.is_nan() {
            0.0
        } else {
            group.weight.clamp(0.0, 1.0)
        }
    }

    fn report(&self, err: Error) {
        let message = err.to_string();
        let first_time = match self.reported.lock() {
            Ok(mut reported) => reported.insert(message.clone()),
            Err(_) => true,
        };
        if first_time {
            crate::metrics::SEARCH_CONFIG_ERRORS_TOTAL.inc();
            tracing::warn!(error = %message, "Invalid search configuration");
        }
    }

    #[cfg(test)]
    fn reported_count(&self) -> usize {
        self.reported.lock().map(|r| r.len()).unwrap_or(0)
    }
}
