//! Include/exclude table pattern matching (§4.1, §6 `-t`/`-T`). Patterns
//! accept `*` wildcards and may be schema-qualified (`public.orders`) or
//! bare (`orders`), matched against both forms of the candidate table.

/// Whether `pattern` matches `candidate`, where `*` matches any run of
/// characters (including none).
pub fn matches(pattern: &str, candidate: &str) -> bool {
    glob_match(pattern, candidate)
}

/// True if `table` (given as both its bare name and its qualified name)
/// matches any of `patterns`. An empty pattern list matches nothing.
pub fn matches_any(patterns: &[String], bare_name: &str, qualified_name: &str) -> bool {
    patterns
        .iter()
        .any(|p| matches(p, bare_name) || matches(p, qualified_name))
}

fn glob_match(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let candidate: Vec<char> = candidate.chars().collect();
    glob_match_rec(&pattern, &candidate)
}

fn glob_match_rec(pattern: &[char], candidate: &[char]) -> bool {
    match pattern.first() {
        None => candidate.is_empty(),
        Some('*') => {
            glob_match_rec(&pattern[1..], candidate)
                || (!candidate.is_empty() && glob_match_rec(pattern, &candidate[1..]))
        }
        Some(c) => {
            !candidate.is_empty() && *c == candidate[0] && glob_match_rec(&pattern[1..], &candidate[1..])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(matches("orders", "orders"));
        assert!(!matches("orders", "order_items"));
    }

    #[test]
    fn wildcard_suffix() {
        assert!(matches("order*", "order_items"));
        assert!(matches("order*", "orders"));
    }

    #[test]
    fn wildcard_prefix_and_middle() {
        assert!(matches("*_log", "audit_log"));
        assert!(matches("sch*.orders", "schema_a.orders"));
    }

    #[test]
    fn bare_or_qualified() {
        let patterns = vec!["orders".to_string()];
        assert!(matches_any(&patterns, "orders", "public.orders"));
    }

    #[test]
    fn empty_list_matches_nothing() {
        assert!(!matches_any(&[], "orders", "public.orders"));
    }

    #[test]
    fn star_alone_matches_everything() {
        assert!(matches("*", ""));
        assert!(matches("*", "anything"));
    }
}
