//! Ordered, configurable bank-name normalization pipeline (§4.D): each step
//! is recorded so `matching_audit.normalization_steps_json` shows exactly
//! what happened to a name before it was searched against
//! `regulator_lookup`. Disabled entirely when `matching.normalization_enabled`
//! is false, in which case the original name passes through untouched.

use crate::config::Config;

/// Returns `(normalized_name, steps)`.
pub fn normalize(original: &str, config: &Config) -> (String, Vec<String>) {
    if !config.get_bool("matching.normalization_enabled", true) {
        return (original.to_string(), Vec::new());
    }

    let mut steps = Vec::new();
    let mut name = original.to_uppercase();
    if name != original {
        steps.push("uppercase".to_string());
    }

    let trimmed = name.trim().to_string();
    if trimmed != name {
        steps.push("trim".to_string());
    }
    name = trimmed;

    let collapsed = collapse_spaces(&name);
    if collapsed != name {
        steps.push("collapse_spaces".to_string());
    }
    name = collapsed;

    for prefix in config.get_string_list("matching.prefixes", &["THE "]) {
        if name.starts_with(&prefix) {
            name = name[prefix.len()..].to_string();
            steps.push(format!("strip_prefix:{prefix}"));
        }
    }

    for suffix in config.get_string_list(
        "matching.suffixes",
        &[" PLC", " LIMITED", " LTD", " UK"],
    ) {
        if name.ends_with(&suffix) {
            name = name[..name.len() - suffix.len()].to_string();
            steps.push(format!("strip_suffix:{suffix}"));
        }
    }

    let abbreviations = config.get_string_map(
        "matching.abbreviations",
        &[("BS", "BUILDING SOCIETY"), ("B/S", "BUILDING SOCIETY")],
    );
    for (abbr, expansion) in &abbreviations {
        let expanded = expand_whole_word(&name, abbr, expansion);
        if expanded != name {
            steps.push(format!("expand_abbreviation:{abbr}->{expansion}"));
            name = expanded;
        }
    }

    (name, steps)
}

fn collapse_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Replaces `abbr` with `expansion` only where it appears as a whole
/// space-delimited word, never inside a longer token.
fn expand_whole_word(name: &str, abbr: &str, expansion: &str) -> String {
    name.split(' ')
        .map(|word| if word == abbr { expansion } else { word })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn config() -> Config {
        let conn = db::open_in_memory().unwrap();
        crate::config::ensure_defaults(&conn).unwrap();
        Config::load(&conn).unwrap()
    }

    #[test]
    fn strips_prefix_and_suffix_and_collapses_spaces() {
        let (normalized, steps) = normalize("  The   Santander   PLC ", &config());
        assert_eq!(normalized, "SANTANDER");
        assert!(steps.contains(&"strip_prefix:THE ".to_string()));
        assert!(steps.contains(&"strip_suffix: PLC".to_string()));
    }

    #[test]
    fn expands_abbreviation_at_word_boundary_only() {
        let (normalized, _) = normalize("LEEDS BS", &config());
        assert_eq!(normalized, "LEEDS BUILDING SOCIETY");

        // "BS" inside a longer token must not be expanded.
        let (normalized, _) = normalize("ABSOLUTE BANK", &config());
        assert_eq!(normalized, "ABSOLUTE BANK");
    }

    #[test]
    fn bypassed_entirely_when_disabled() {
        let conn = db::open_in_memory().unwrap();
        crate::config::ensure_defaults(&conn).unwrap();
        conn.execute(
            "UPDATE config SET config_value = 'false' WHERE config_key = 'matching.normalization_enabled'",
            [],
        )
        .unwrap();
        let config = Config::load(&conn).unwrap();

        let (normalized, steps) = normalize("  the Santander PLC ", &config);
        assert_eq!(normalized, "  the Santander PLC ");
        assert!(steps.is_empty());
    }

    #[test]
    fn prefix_only_strips_at_start() {
        let (normalized, steps) = normalize("SANTANDER THE BANK", &config());
        assert_eq!(normalized, "SANTANDER THE BANK");
        assert!(steps.iter().all(|s| !s.starts_with("strip_prefix")));
    }
}
