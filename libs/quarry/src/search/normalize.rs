use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// Normalize a search term for accent- and case-insensitive matching:
/// - decomposes (NFKD) and removes combining marks
/// - lowercases
/// - drops punctuation, keeps single spaces between words
pub fn normalize_for_matching(input: &str) -> String {
    let folded: String = input
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(|c| c.to_lowercase())
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| c.is_alphanumeric() || *c == ' ')
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Escape `%`, `_` and `\` for use inside a SQL `LIKE` pattern.
pub fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_case_diacritics_and_punctuation() {
        assert_eq!(normalize_for_matching("Kénniy"), "kenniy");
        assert_eq!(normalize_for_matching("Évê"), "eve");
        assert_eq!(normalize_for_matching("  Carreño\t Quiñones "), "carreno quinones");
        assert_eq!(normalize_for_matching("O'Brien"), "obrien");
    }

    #[test]
    fn escapes_like_metacharacters() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }
}
