//! Bounded edit-distance matching expressed as a regular expression.
//!
//! Document stores cannot compute Levenshtein distance inside a match stage,
//! so FUZZY is rendered as an anchored alternation of every edit pattern
//! reachable from the term within the edit budget. `.` stands for an inserted
//! or substituted character; deletions drop a literal. The alternation grows
//! roughly as `(3n)^k`, so the budget is lowered until it fits the cap, and a
//! level is only expanded when its worst case already fits.

use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Tok {
    Lit(char),
    Any,
}

fn render(tokens: &[Tok]) -> String {
    let mut out = String::new();
    for tok in tokens {
        match tok {
            Tok::Lit(c) => out.push_str(&regex::escape(&c.to_string())),
            Tok::Any => out.push('.'),
        }
    }
    out
}

fn single_edits(tokens: &[Tok]) -> Vec<Vec<Tok>> {
    let mut out = Vec::with_capacity(tokens.len() * 3 + 1);
    for i in 0..tokens.len() {
        let mut substituted = tokens.to_vec();
        substituted[i] = Tok::Any;
        out.push(substituted);

        let mut deleted = tokens.to_vec();
        deleted.remove(i);
        out.push(deleted);
    }
    for i in 0..=tokens.len() {
        let mut inserted = tokens.to_vec();
        inserted.insert(i, Tok::Any);
        out.push(inserted);
    }
    out
}

/// Regex matching values within `max_edits` of `term` (whole value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuzzyPattern {
    pub pattern: String,
    /// Edit budget actually encoded (may be lower than requested).
    pub edits: usize,
    pub alternatives: usize,
}

pub fn fuzzy_pattern(term: &str, max_edits: usize, max_alternatives: usize) -> FuzzyPattern {
    let base: Vec<Tok> = term.chars().map(Tok::Lit).collect();

    let mut all: BTreeSet<Vec<Tok>> = BTreeSet::new();
    all.insert(base.clone());
    let mut frontier = vec![base];
    let mut edits = 0;

    // Never let an edit remove the whole term.
    let edit_budget = max_edits.min(term.chars().count().saturating_sub(1));

    while edits < edit_budget {
        // Upper bound before generating anything: each pattern of length n
        // has at most 3n + 1 single-edit neighbours.
        let bound = frontier
            .iter()
            .map(|tokens| tokens.len() * 3 + 1)
            .fold(all.len(), usize::saturating_add);
        if bound > max_alternatives {
            break;
        }

        let mut next_level = BTreeSet::new();
        for tokens in &frontier {
            for candidate in single_edits(tokens) {
                if !candidate.is_empty() && !all.contains(&candidate) {
                    next_level.insert(candidate);
                }
            }
        }
        frontier = next_level.iter().cloned().collect();
        all.extend(next_level);
        edits += 1;
    }

    let rendered: BTreeSet<String> = all.iter().map(|t| render(t)).collect();
    let alternatives = rendered.len();
    let pattern = format!(
        "^(?:{})$",
        rendered.into_iter().collect::<Vec<_>>().join("|")
    );

    FuzzyPattern {
        pattern,
        edits,
        alternatives,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::RegexBuilder;

    fn levenshtein(a: &str, b: &str) -> usize {
        let a: Vec<char> = a.chars().collect();
        let b: Vec<char> = b.chars().collect();
        let mut prev: Vec<usize> = (0..=b.len()).collect();
        for i in 1..=a.len() {
            let mut cur = vec![i; b.len() + 1];
            for j in 1..=b.len() {
                let cost = usize::from(a[i - 1] != b[j - 1]);
                cur[j] = (prev[j] + 1).min(cur[j - 1] + 1).min(prev[j - 1] + cost);
            }
            prev = cur;
        }
        prev[b.len()]
    }

    fn compile(p: &FuzzyPattern) -> regex::Regex {
        RegexBuilder::new(&p.pattern)
            .case_insensitive(true)
            .build()
            .unwrap()
    }

    #[test]
    fn one_edit_neighbourhood() {
        let p = fuzzy_pattern("kenniy", 1, 512);
        assert_eq!(p.edits, 1);
        let re = compile(&p);
        for candidate in ["kenniy", "Kenny", "kennie", "kenniey", "Kenniy", "kennix"] {
            assert!(re.is_match(candidate), "{candidate} should match");
        }
        for candidate in ["ken", "kendall", "benny", "kenniyyy"] {
            assert!(!re.is_match(candidate), "{candidate} should not match");
        }
    }

    #[test]
    fn matches_exactly_the_bounded_distance_set() {
        let term = "abc";
        let p = fuzzy_pattern(term, 1, 512);
        let re = compile(&p);
        let alphabet = ['a', 'b', 'c', 'x'];
        let mut candidates = vec![String::new()];
        for _ in 0..4 {
            let mut longer = Vec::new();
            for c in &candidates {
                for a in alphabet {
                    longer.push(format!("{c}{a}"));
                }
            }
            candidates.extend(longer);
        }
        for candidate in candidates.iter().filter(|c| !c.is_empty()) {
            assert_eq!(
                re.is_match(candidate),
                levenshtein(term, candidate) <= 1,
                "mismatch for {candidate}"
            );
        }
    }

    #[test]
    fn budget_shrinks_to_fit_cap() {
        let p = fuzzy_pattern("alexandria", 2, 64);
        assert_eq!(p.edits, 1);
        assert!(p.alternatives <= 64);

        let tiny = fuzzy_pattern("alexandria", 2, 1);
        assert_eq!(tiny.edits, 0);
        assert_eq!(tiny.pattern, "^(?:alexandria)$");
    }

    #[test]
    fn long_term_skips_expansion() {
        let term = "a".repeat(10_000);
        let started = std::time::Instant::now();
        let p = fuzzy_pattern(&term, 1, 512);
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
        assert_eq!(p.edits, 0);
        assert_eq!(p.alternatives, 1);
    }

    #[test]
    fn escapes_regex_metacharacters() {
        let p = fuzzy_pattern("a.b", 0, 16);
        assert_eq!(p.pattern, "^(?:a\\.b)$");
    }
}
