//! Query language for finding entries: free terms plus `book:`, `mood:` and
//! `date:` filters.

use std::cmp::{max, min};
use std::str::FromStr;

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, Time};

use crate::content;
use crate::model::{Book, DiaryEntry, Mood};

const UNFILED_KEYS: [&str; 2] = ["none", "unfiled"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeFilter {
    pub from: Option<i64>,
    pub to: Option<i64>, // exclusive
}

impl RangeFilter {
    pub fn has_range(&self) -> bool {
        self.from.is_some() || self.to.is_some()
    }

    pub fn merge(&mut self, other: RangeFilter) {
        if let Some(from) = other.from {
            self.from = Some(match self.from {
                Some(existing) => max(existing, from),
                None => from,
            });
        }
        if let Some(to) = other.to {
            self.to = Some(match self.to {
                Some(existing) => min(existing, to),
                None => to,
            });
        }
    }

    pub fn contains(&self, at: OffsetDateTime) -> bool {
        let ts = at.unix_timestamp();
        self.from.map_or(true, |from| ts >= from) && self.to.map_or(true, |to| ts < to)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub terms: Vec<String>,
    /// Book ids or names; `none`/`unfiled` selects entries without a book.
    pub books: Vec<String>,
    pub moods: Vec<Mood>,
    pub date: RangeFilter,
}

impl SearchQuery {
    pub fn has_terms(&self) -> bool {
        !self.terms.is_empty()
    }

    pub fn has_filters(&self) -> bool {
        !self.books.is_empty() || !self.moods.is_empty() || self.date.has_range()
    }

    pub fn highlight_terms(&self) -> Vec<String> {
        self.terms.clone()
    }
}

pub fn parse_query(input: &str) -> SearchQuery {
    let mut query = SearchQuery::default();
    for raw in input.split_whitespace() {
        if let Some(book) = raw.strip_prefix("book:") {
            if !book.is_empty() {
                query.books.push(book.to_string());
            }
            continue;
        }
        if let Some(mood) = raw.strip_prefix("mood:") {
            match Mood::from_str(mood) {
                Ok(mood) if !query.moods.contains(&mood) => query.moods.push(mood),
                Ok(_) => {}
                Err(err) => tracing::warn!(%err, "ignoring mood filter"),
            }
            continue;
        }
        if let Some(range) = raw.strip_prefix("date:") {
            query.date.merge(parse_date_range(range));
            continue;
        }
        if let Some(value) = sanitize_term(raw) {
            query.terms.push(value.to_lowercase());
        }
    }
    query
}

/// The free-text part of `input` with filters removed, for `--regex` mode.
pub fn regex_pattern_from_input(input: &str) -> Option<String> {
    let parts: Vec<&str> = input
        .split_whitespace()
        .filter(|raw| !is_filter(raw))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

pub fn build_regex(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .with_context(|| format!("invalid search pattern {pattern:?}"))
}

/// Entry dates as shown in listings, e.g. `March 1, 2024`.
pub fn long_date(at: OffsetDateTime) -> String {
    at.date()
        .format(format_description!(
            "[month repr:long] [day padding:none], [year]"
        ))
        .unwrap_or_else(|_| at.date().to_string())
}

/// Compiled form of a query, resolved against the known books.
pub struct EntryMatcher {
    query: SearchQuery,
    regex: Option<Regex>,
    book_ids: Vec<String>,
    include_unfiled: bool,
}

impl EntryMatcher {
    pub fn new(query: SearchQuery, books: &[Book]) -> Self {
        let mut book_ids = Vec::new();
        let mut include_unfiled = false;
        for key in &query.books {
            let found = books
                .iter()
                .find(|book| book.id == *key || book.name.eq_ignore_ascii_case(key));
            match found {
                Some(book) => book_ids.push(book.id.clone()),
                None if UNFILED_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key)) => {
                    include_unfiled = true
                }
                None => tracing::debug!(book = %key, "book filter matches no book"),
            }
        }
        Self {
            query,
            regex: None,
            book_ids,
            include_unfiled,
        }
    }

    pub fn with_regex(mut self, regex: Regex) -> Self {
        self.regex = Some(regex);
        self
    }

    pub fn query(&self) -> &SearchQuery {
        &self.query
    }

    pub fn matches(&self, entry: &DiaryEntry) -> bool {
        if !self.query.books.is_empty() {
            let in_book = match &entry.book_id {
                Some(id) => self.book_ids.contains(id),
                None => self.include_unfiled,
            };
            if !in_book {
                return false;
            }
        }
        if !self.query.moods.is_empty()
            && !entry.mood.map_or(false, |mood| self.query.moods.contains(&mood))
        {
            return false;
        }
        if !self.query.date.contains(entry.date) {
            return false;
        }

        let text = content::plain_text(&entry.content);
        if let Some(regex) = &self.regex {
            return regex.is_match(&text);
        }
        if self.query.terms.is_empty() {
            return true;
        }
        let text = text.to_lowercase();
        let date = long_date(entry.date).to_lowercase();
        self.query
            .terms
            .iter()
            .all(|term| text.contains(term.as_str()) || date.contains(term.as_str()))
    }

    /// Matching entries in their incoming order, at most `limit` of them.
    pub fn filter(&self, entries: Vec<DiaryEntry>, limit: usize) -> Vec<DiaryEntry> {
        entries
            .into_iter()
            .filter(|entry| self.matches(entry))
            .take(limit)
            .collect()
    }
}

fn is_filter(raw: &str) -> bool {
    ["book:", "mood:", "date:"]
        .iter()
        .any(|prefix| raw.starts_with(prefix))
}

fn sanitize_term(raw: &str) -> Option<String> {
    let term: String = raw
        .chars()
        .filter(|ch| ch.is_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | '\''))
        .collect();
    if term.is_empty() {
        None
    } else {
        Some(term)
    }
}

fn parse_date_range(input: &str) -> RangeFilter {
    let mut range = RangeFilter::default();
    let parts: Vec<&str> = input.split("..").collect();
    match parts.as_slice() {
        [single] => {
            if let Some((from, to)) = parse_single_date(single) {
                range.from = Some(from);
                range.to = Some(to);
            }
        }
        [from, to] => {
            if !from.is_empty() {
                if let Some((start, _)) = parse_single_date(from) {
                    range.from = Some(start);
                }
            }
            if !to.is_empty() {
                if let Some((_, end)) = parse_single_date(to) {
                    range.to = Some(end);
                }
            }
        }
        _ => {}
    }
    range
}

fn parse_single_date(input: &str) -> Option<(i64, i64)> {
    let date = Date::parse(input, format_description!("[year]-[month]-[day]")).ok()?;
    let from = date.with_time(Time::MIDNIGHT).assume_utc().unix_timestamp();
    let to = date
        .checked_add(Duration::days(1))?
        .with_time(Time::MIDNIGHT)
        .assume_utc()
        .unix_timestamp();
    Some((from, to))
}
