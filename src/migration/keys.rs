//! Ordering of migration keys.
//!
//! A table's migration keys must follow one naming convention: pure numbers
//! (`"1"`, `"10"`), a numeric prefix (`"001_init"`) or plain names (`"init"`).
//! Numbers order by value, prefixed keys by the value of their leading digits
//! and plain names by declaration order or alphabetically.

use crate::error::ConfigError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;

static NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+$").expect("valid regex"));
static NUMERIC_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+").expect("valid regex"));

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MigrationKeyKind {
    Numeric,
    NumericPrefixed,
    Text,
}

impl MigrationKeyKind {
    pub fn of(key: &str) -> Self {
        if NUMERIC.is_match(key) {
            MigrationKeyKind::Numeric
        } else if NUMERIC_PREFIX.is_match(key) {
            MigrationKeyKind::NumericPrefixed
        } else {
            MigrationKeyKind::Text
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MigrationKeyKind::Numeric => "numeric",
            MigrationKeyKind::NumericPrefixed => "numeric-prefixed",
            MigrationKeyKind::Text => "string",
        }
    }
}

/// How pure string keys are ordered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StringKeyOrder {
    /// Declaration order.
    #[default]
    Insertion,
    Lexicographic,
}

/// Leading run of ASCII digits.
fn digit_prefix(key: &str) -> &str {
    let end = key
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(key.len());
    &key[..end]
}

/// Numeric comparison of two digit strings of any length.
fn cmp_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Pairwise comparison used to decide whether a key comes after the last
/// applied one. Agrees with [`sort_migration_keys`] for keys of one kind
/// (lexicographic mode for string keys).
pub fn compare_migration_keys(a: &str, b: &str) -> Ordering {
    match (MigrationKeyKind::of(a), MigrationKeyKind::of(b)) {
        (MigrationKeyKind::Numeric, MigrationKeyKind::Numeric) => cmp_digits(a, b),
        (MigrationKeyKind::NumericPrefixed, MigrationKeyKind::NumericPrefixed) => {
            cmp_digits(digit_prefix(a), digit_prefix(b))
        }
        _ => a.cmp(b),
    }
}

/// Sort the migration keys of `table` into application order.
///
/// Fails with [`ConfigError::MixedMigrationKeys`] when the keys use more than
/// one convention.
pub fn sort_migration_keys(
    table: &str,
    keys: &[String],
    string_order: StringKeyOrder,
) -> Result<Vec<String>, ConfigError> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }

    let mut groups: Vec<(MigrationKeyKind, Vec<String>)> = Vec::new();
    for key in keys {
        let kind = MigrationKeyKind::of(key);
        match groups.iter_mut().find(|(k, _)| *k == kind) {
            Some((_, members)) => members.push(key.clone()),
            None => groups.push((kind, vec![key.clone()])),
        }
    }

    if groups.len() > 1 {
        return Err(ConfigError::MixedMigrationKeys {
            table: table.to_string(),
            groups: groups
                .into_iter()
                .map(|(kind, members)| (kind.label(), members))
                .collect(),
        });
    }

    let mut sorted = keys.to_vec();
    match groups[0].0 {
        MigrationKeyKind::Numeric => sorted.sort_by(|a, b| cmp_digits(a, b)),
        MigrationKeyKind::NumericPrefixed => {
            sorted.sort_by(|a, b| cmp_digits(digit_prefix(a), digit_prefix(b)))
        }
        MigrationKeyKind::Text => match string_order {
            StringKeyOrder::Lexicographic => sorted.sort(),
            StringKeyOrder::Insertion => {
                if sorted.len() > 1 {
                    tracing::warn!(
                        table = %table,
                        "migration keys are applied in declaration order; prefix them with numbers (e.g. 001_init) to keep the order stable across edits"
                    );
                }
            }
        },
    }
    Ok(sorted)
}

/// Keys of `sorted` still to apply after `last_applied`.
///
/// An empty `last_applied` means nothing ran yet. When `last_applied` is not one
/// of the keys (it was renamed or removed), keys comparing greater are pending.
pub fn pending_migrations<'a>(sorted: &'a [String], last_applied: &str) -> Vec<&'a String> {
    if last_applied.is_empty() {
        return sorted.iter().collect();
    }
    match sorted.iter().position(|k| k == last_applied) {
        Some(i) => sorted[i + 1..].iter().collect(),
        None => sorted
            .iter()
            .filter(|k| compare_migration_keys(k, last_applied) == Ordering::Greater)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn keys(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn classifies_keys() {
        assert_eq!(MigrationKeyKind::of("10"), MigrationKeyKind::Numeric);
        assert_eq!(MigrationKeyKind::of("001_init"), MigrationKeyKind::NumericPrefixed);
        assert_eq!(MigrationKeyKind::of("init"), MigrationKeyKind::Text);
        assert_eq!(MigrationKeyKind::of("v2"), MigrationKeyKind::Text);
    }

    #[test]
    fn numeric_keys_sort_by_value() {
        let sorted = sort_migration_keys("t", &keys(&["10", "2", "1"]), StringKeyOrder::Insertion).unwrap();
        assert_eq!(sorted, keys(&["1", "2", "10"]));
    }

    #[test]
    fn numeric_keys_longer_than_u64_still_sort() {
        let big = "123456789012345678901234567890";
        let sorted = sort_migration_keys("t", &keys(&[big, "99"]), StringKeyOrder::Insertion).unwrap();
        assert_eq!(sorted, keys(&["99", big]));
    }

    #[test]
    fn prefixed_keys_sort_by_prefix() {
        let sorted = sort_migration_keys(
            "t",
            &keys(&["010_fix", "002_add", "001_init"]),
            StringKeyOrder::Insertion,
        )
        .unwrap();
        assert_eq!(sorted, keys(&["001_init", "002_add", "010_fix"]));
    }

    #[test]
    fn equal_prefixes_keep_declaration_order() {
        let sorted = sort_migration_keys(
            "t",
            &keys(&["2_b", "1_z", "2_a", "1_a"]),
            StringKeyOrder::Insertion,
        )
        .unwrap();
        assert_eq!(sorted, keys(&["1_z", "1_a", "2_b", "2_a"]));
    }

    #[test]
    fn mixed_conventions_are_rejected() {
        let err = sort_migration_keys("t", &keys(&["1", "001_init"]), StringKeyOrder::Insertion).unwrap_err();
        match err {
            ConfigError::MixedMigrationKeys { table, groups } => {
                assert_eq!(table, "t");
                assert_eq!(
                    groups,
                    vec![
                        ("numeric", keys(&["1"])),
                        ("numeric-prefixed", keys(&["001_init"])),
                    ]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn string_keys_keep_declaration_order_by_default() {
        let sorted = sort_migration_keys("t", &keys(&["init", "add_column"]), StringKeyOrder::Insertion).unwrap();
        assert_eq!(sorted, keys(&["init", "add_column"]));
    }

    #[test]
    fn string_keys_can_sort_lexicographically() {
        let sorted = sort_migration_keys("t", &keys(&["init", "add_column"]), StringKeyOrder::Lexicographic).unwrap();
        assert_eq!(sorted, keys(&["add_column", "init"]));
    }

    #[test]
    fn empty_set_sorts_to_empty() {
        assert!(sort_migration_keys("t", &[], StringKeyOrder::Insertion).unwrap().is_empty());
    }

    #[test]
    fn comparator_agrees_with_batch_order() {
        let cases: [(&[&str], StringKeyOrder); 3] = [
            (&["10", "2", "1", "33", "007"], StringKeyOrder::Insertion),
            (&["010_fix", "002_add", "001_init", "3_x"], StringKeyOrder::Insertion),
            (&["init", "add_column", "zeta", "beta"], StringKeyOrder::Lexicographic),
        ];
        for (input, order) in cases {
            let sorted = sort_migration_keys("t", &keys(input), order).unwrap();
            for (i, a) in sorted.iter().enumerate() {
                for b in &sorted[i + 1..] {
                    assert_ne!(compare_migration_keys(a, b), Ordering::Greater, "{a} vs {b}");
                    assert_ne!(compare_migration_keys(b, a), Ordering::Less, "{b} vs {a}");
                }
            }
        }
        assert_eq!(compare_migration_keys("2", "10"), Ordering::Less);
        assert_eq!(compare_migration_keys("002_add", "010_fix"), Ordering::Less);
        assert_eq!(compare_migration_keys("b", "a"), Ordering::Greater);
    }

    #[test]
    fn pending_after_last_applied() {
        let sorted = keys(&["1", "2", "10"]);
        assert_eq!(pending_migrations(&sorted, ""), vec!["1", "2", "10"]);
        assert_eq!(pending_migrations(&sorted, "2"), vec!["10"]);
        assert!(pending_migrations(&sorted, "10").is_empty());
        assert_eq!(pending_migrations(&sorted, "5"), vec!["10"]);
    }

    #[test]
    fn pending_follows_declaration_order_for_string_keys() {
        let sorted = keys(&["init", "add_column", "backfill"]);
        assert_eq!(pending_migrations(&sorted, "init"), vec!["add_column", "backfill"]);
    }

    #[test]
    fn only_ascii_digits_count_as_numeric() {
        assert_eq!(MigrationKeyKind::of("\u{661}\u{662}"), MigrationKeyKind::Text);
        assert_eq!(MigrationKeyKind::of("\u{660}\u{669}_init"), MigrationKeyKind::Text);
        assert_eq!(MigrationKeyKind::of("12"), MigrationKeyKind::Numeric);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn logs_while(f: impl FnOnce()) -> String {
        let out = Captured::default();
        let sink = out.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || sink.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = out.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn declaration_order_warns_about_unstable_keys() {
        let logs = logs_while(|| {
            sort_migration_keys("t", &keys(&["init", "backfill"]), StringKeyOrder::Insertion).unwrap();
        });
        assert!(logs.contains("WARN"));
        assert!(logs.contains("declaration order"));
        assert!(logs.contains("table=t"));
    }

    #[test]
    fn no_warning_for_numbered_or_alphabetical_keys() {
        let logs = logs_while(|| {
            sort_migration_keys("t", &keys(&["init", "backfill"]), StringKeyOrder::Lexicographic).unwrap();
            sort_migration_keys("t", &keys(&["001_init", "002_more"]), StringKeyOrder::Insertion).unwrap();
            sort_migration_keys("t", &keys(&["init"]), StringKeyOrder::Insertion).unwrap();
        });
        assert!(logs.is_empty(), "unexpected output: {logs}");
    }
}
