//! Ordered tag list attached to a photo.
//!
//! On the wire a tag list is a JSON array of single-key objects
//! (`[{"species": "oak"}, {"season": "spring"}]`). In storage it is a
//! delimited text column: `"species" => "oak", "season" => "spring"`, with
//! `\"` and `\\` escapes inside the quotes. An empty list is stored as an
//! empty string and a NULL column reads back as an empty list.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::de::Deserializer;
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::iter::Peekable;
use std::str::Chars;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagList(Vec<Tag>);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagParseError {
    #[error("expected '\"' at position {0}")]
    ExpectedQuote(usize),
    #[error("unterminated quoted string")]
    Unterminated,
    #[error("expected '=>' at position {0}")]
    ExpectedArrow(usize),
    #[error("expected ',' at position {0}")]
    ExpectedComma(usize),
    #[error("empty tag key")]
    EmptyKey,
}

impl TagList {
    pub fn new(tags: Vec<Tag>) -> Self {
        Self(tags)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tag> {
        self.0.iter()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|tag| tag.key == key)
            .map(|tag| tag.value.as_str())
    }

    pub fn encode(&self) -> String {
        self.0
            .iter()
            .map(|tag| format!("{} => {}", quote(&tag.key), quote(&tag.value)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn parse(input: &str) -> Result<Self, TagParseError> {
        let mut cursor = Cursor {
            chars: input.chars().peekable(),
            position: 0,
        };
        let mut tags = Vec::new();

        cursor.skip_whitespace();
        if cursor.is_done() {
            return Ok(Self::default());
        }

        loop {
            let key = cursor.quoted()?;
            if key.is_empty() {
                return Err(TagParseError::EmptyKey);
            }
            cursor.skip_whitespace();
            cursor.arrow()?;
            cursor.skip_whitespace();
            let value = cursor.quoted()?;
            tags.push(Tag { key, value });

            cursor.skip_whitespace();
            match cursor.next() {
                None => break,
                Some(',') => cursor.skip_whitespace(),
                Some(_) => return Err(TagParseError::ExpectedComma(cursor.position - 1)),
            }
        }

        Ok(Self(tags))
    }
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

struct Cursor<'a> {
    chars: Peekable<Chars<'a>>,
    position: usize,
}

impl Cursor<'_> {
    fn next(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c.is_some() {
            self.position += 1;
        }
        c
    }

    fn is_done(&mut self) -> bool {
        self.chars.peek().is_none()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.next();
        }
    }

    fn quoted(&mut self) -> Result<String, TagParseError> {
        let start = self.position;
        if self.next() != Some('"') {
            return Err(TagParseError::ExpectedQuote(start));
        }

        let mut out = String::new();
        loop {
            match self.next() {
                None => return Err(TagParseError::Unterminated),
                Some('\\') => match self.next() {
                    Some(c) => out.push(c),
                    None => return Err(TagParseError::Unterminated),
                },
                Some('"') => return Ok(out),
                Some(c) => out.push(c),
            }
        }
    }

    fn arrow(&mut self) -> Result<(), TagParseError> {
        let start = self.position;
        match (self.next(), self.next()) {
            (Some('='), Some('>')) => Ok(()),
            _ => Err(TagParseError::ExpectedArrow(start)),
        }
    }
}

impl FromIterator<Tag> for TagList {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for TagList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct Single<'a>(&'a Tag);

        impl Serialize for Single<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(&self.0.key, &self.0.value)?;
                map.end()
            }
        }

        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for tag in &self.0 {
            seq.serialize_element(&Single(tag))?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for TagList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Option::<Vec<BTreeMap<String, String>>>::deserialize(deserializer)?;
        Ok(entries
            .unwrap_or_default()
            .into_iter()
            .flat_map(|entry| entry.into_iter().map(|(key, value)| Tag { key, value }))
            .collect())
    }
}

impl ToSql for TagList {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.encode()))
    }
}

impl FromSql for TagList {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(Self::default()),
            other => {
                let text = other.as_str()?;
                TagList::parse(text).map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    }
}
