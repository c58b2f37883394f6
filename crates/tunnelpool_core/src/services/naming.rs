//! Table naming for mapped entity types.
//!
//! Entity type names are converted to snake_case; the last word is
//! pluralized unless the strategy is singular.

/// Words whose plural does not follow the suffix rules.
const IRREGULAR: [(&str, &str); 8] = [
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("mouse", "mice"),
    ("goose", "geese"),
    ("foot", "feet"),
    ("tooth", "teeth"),
];

/// Words with identical singular and plural forms.
const UNCOUNTABLE: [&str; 8] =
    ["equipment", "information", "rice", "money", "species", "series", "fish", "sheep"];

/// Maps entity type names to table names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamingStrategy {
    /// Prefix prepended to every table name
    pub table_prefix: String,
    /// Keep table names singular
    pub singular_table: bool,
}

impl NamingStrategy {
    /// Singular table names (`User` -> `user`).
    pub fn singular() -> Self {
        Self { table_prefix: String::new(), singular_table: true }
    }

    /// Plural table names (`User` -> `users`).
    pub fn plural() -> Self {
        Self { table_prefix: String::new(), singular_table: false }
    }

    /// Singular unless `pluralize` is set.
    pub fn from_pluralize(pluralize: bool) -> Self {
        if pluralize {
            Self::plural()
        } else {
            Self::singular()
        }
    }

    /// Set the table prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    /// Table name for an entity named `entity` (e.g. `UserProfile`).
    pub fn table_name(&self, entity: &str) -> String {
        let snake = to_snake_case(entity);
        let name = if self.singular_table { snake } else { pluralize_last_word(&snake) };
        format!("{}{}", self.table_prefix, name)
    }

    /// Table name for the Rust type `T`, using its unqualified name.
    pub fn table_name_of<T: ?Sized>(&self) -> String {
        self.table_name(short_type_name::<T>())
    }

    /// Column name for a field (e.g. `UserName` -> `user_name`).
    pub fn column_name(&self, field: &str) -> String {
        to_snake_case(field)
    }
}

/// Unqualified type name with generic arguments stripped.
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Convert `CamelCase` or `mixedCase` to `snake_case`, keeping acronyms together.
pub fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let starts_word = match prev {
                None => false,
                Some(p) if p == '_' => false,
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) => p.is_uppercase() && next.is_some_and(|n| n.is_lowercase()),
            };
            if starts_word {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn pluralize_last_word(snake: &str) -> String {
    let (head, last) = match snake.rfind('_') {
        Some(idx) => snake.split_at(idx + 1),
        None => ("", snake),
    };
    format!("{head}{}", pluralize(last))
}

/// Plural form of a single lowercase English word.
pub fn pluralize(word: &str) -> String {
    if word.is_empty() || UNCOUNTABLE.contains(&word) {
        return word.to_string();
    }
    if let Some((_, plural)) = IRREGULAR.iter().find(|(singular, _)| *singular == word) {
        return plural.to_string();
    }

    let is_vowel = |c: char| matches!(c, 'a' | 'e' | 'i' | 'o' | 'u');
    let penultimate = word.chars().rev().nth(1);

    if word.ends_with('y') && penultimate.is_some_and(|c| !is_vowel(c)) {
        return format!("{}ies", &word[..word.len() - 1]);
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|suffix| word.ends_with(suffix)) {
        return format!("{word}es");
    }
    if word.ends_with("fe") {
        return format!("{}ves", &word[..word.len() - 2]);
    }
    if word.ends_with('f') && !word.ends_with("ff") {
        return format!("{}ves", &word[..word.len() - 1]);
    }
    format!("{word}s")
}
