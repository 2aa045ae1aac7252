//! Table-name inflection and identifier checks for relation configs.

use regex::Regex;
use relmap_core::{ConfigError, Error, Result};
use std::sync::OnceLock;

const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("datum", "data"),
    ("index", "indices"),
    ("matrix", "matrices"),
    ("vertex", "vertices"),
    ("analysis", "analyses"),
    ("status", "statuses"),
];

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')
}

/// Simple English pluralization of a singular word.
///
/// - `y` after a consonant becomes `ies`
/// - `s`, `x`, `z`, `ch`, `sh` endings add `es`
/// - everything else adds `s`
pub fn pluralize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }
    if let Some((_, plural)) = IRREGULAR.iter().find(|(s, _)| *s == word) {
        return (*plural).to_string();
    }
    if let Some(stem) = word.strip_suffix('y') {
        if stem.chars().last().is_some_and(|c| !is_vowel(c)) {
            return format!("{stem}ies");
        }
    }
    if word.ends_with('s')
        || word.ends_with('x')
        || word.ends_with('z')
        || word.ends_with("ch")
        || word.ends_with("sh")
    {
        return format!("{word}es");
    }
    format!("{word}s")
}

/// Reverse of [`pluralize`] for table names.
///
/// Words that do not look plural are returned unchanged.
pub fn singularize(word: &str) -> String {
    if let Some((singular, _)) = IRREGULAR.iter().find(|(_, p)| *p == word) {
        return (*singular).to_string();
    }
    if IRREGULAR.iter().any(|(s, _)| *s == word) {
        return word.to_string();
    }
    if let Some(stem) = word.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{stem}y");
        }
    }
    // consonant + "uses", as in buses and campuses
    if let Some(stem) = word.strip_suffix("uses") {
        if stem.chars().last().is_some_and(|c| !is_vowel(c)) {
            return format!("{stem}us");
        }
    }
    for suffix in ["ches", "shes", "xes", "zes", "sses"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if word.ends_with("ss") || word.ends_with("us") || word.ends_with("is") {
        return word.to_string();
    }
    match word.strip_suffix('s') {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => word.to_string(),
    }
}

/// Plural form of a table name that may already be plural.
pub fn plural_table(name: &str) -> String {
    pluralize(&singularize(name))
}

/// Default join table for a many-to-many relation: `user` + `roles`.
pub fn default_join_table(main_table: &str, ref_table: &str) -> String {
    format!("{}_{}", singularize(main_table), plural_table(ref_table))
}

/// Default foreign-key column pointing at `table`.
pub fn default_fk(table: &str) -> String {
    format!("{}_id", singularize(table))
}

fn ident_pattern() -> &'static Regex {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
            .expect("identifier pattern compiles")
    })
}

/// Require `name` to be a plain (optionally schema-qualified) identifier.
#[allow(clippy::result_large_err)]
pub fn check_ident(key: &str, what: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Config(ConfigError::for_key(
            key,
            format!("{what} is required"),
        )));
    }
    if !ident_pattern().is_match(name) {
        return Err(Error::Config(ConfigError::for_key(
            key,
            format!("{what} '{name}' is not a valid identifier"),
        )));
    }
    Ok(())
}
