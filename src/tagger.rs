// src/tagger.rs
//! Keyword tagging against fixed commodity dictionaries.

use std::collections::BTreeSet;

pub const COMMODITY_KEYWORDS_TR: &[&str] = &[
    "altın",
    "gümüş",
    "petrol",
    "doğalgaz",
    "bakır",
    "pamuk",
    "buğday",
    "mısır",
    "kahve",
    "şeker",
    "nikel",
    "alüminyum",
    "platin",
    "paladyum",
];

pub const COMMODITY_KEYWORDS_EN: &[&str] = &[
    "gold",
    "silver",
    "oil",
    "crude",
    "brent",
    "natural gas",
    "copper",
    "cotton",
    "wheat",
    "corn",
    "coffee",
    "sugar",
    "nickel",
    "aluminum",
    "platinum",
    "palladium",
];

fn keywords_for(language: &str) -> &'static [&'static str] {
    if language.to_lowercase().starts_with("tr") {
        COMMODITY_KEYWORDS_TR
    } else {
        COMMODITY_KEYWORDS_EN
    }
}

/// Sorted set of dictionary keywords that occur as substrings of `text`.
pub fn tag(text: &str, language: &str) -> BTreeSet<String> {
    let lowered = text.to_lowercase();
    keywords_for(language)
        .iter()
        .filter(|kw| lowered.contains(*kw))
        .map(|kw| kw.to_string())
        .collect()
}

/// Comma-joined, trimmed, sorted form used for storage and payloads.
pub fn join_tags<'a, I>(tags: I) -> String
where
    I: IntoIterator<Item = &'a String>,
{
    let set: BTreeSet<&str> = tags
        .into_iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    set.into_iter().collect::<Vec<_>>().join(",")
}

/// Inverse of [`join_tags`].
pub fn split_tags(joined: &str) -> BTreeSet<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
