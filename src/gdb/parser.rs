//! GDB Machine Interface (MI) Parser
//!
//! Recursive-descent parser for the MI wire grammar. Every primitive takes a
//! cursor (`&mut &str`), consumes exactly the item it recognises together with
//! one trailing comma, and leaves the remainder for the next call:
//!
//! ```text
//! [some text],[some more text]   ->  item "[some text]", cursor "[some more text]"
//! ```
//!
//! A primitive that fails leaves the cursor untouched.

use crate::gdb::types::{Record, RecordType, Token};
use tracing::trace;

/// Shape of an item, decided by its leading character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Invalid,
    String,
    List,
    Tuple,
}

impl ItemKind {
    pub fn of(text: &str) -> Self {
        match text.as_bytes().first() {
            Some(b'"') => ItemKind::String,
            Some(b'[') => ItemKind::List,
            Some(b'{') => ItemKind::Tuple,
            _ => ItemKind::Invalid,
        }
    }
}

/// One parsed value. Slices borrow from the record data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Item<'a> {
    /// Contents between the quotes, escapes still in place
    String(&'a str),
    /// Contents between the brackets
    List(&'a str),
    /// Contents between the braces
    Tuple(&'a str),
    /// Bare text up to the next separator
    Scalar(&'a str),
}

impl<'a> Item<'a> {
    /// Text as it appeared on the wire
    pub fn raw(&self) -> String {
        match self {
            Item::String(s) => format!("\"{}\"", s),
            Item::List(s) => format!("[{}]", s),
            Item::Tuple(s) => format!("{{{}}}", s),
            Item::Scalar(s) => s.to_string(),
        }
    }

    /// Scalar value with escapes resolved; lists and tuples come back raw
    pub fn value(&self) -> String {
        match self {
            Item::String(s) | Item::Scalar(s) => unescape(s),
            Item::List(_) | Item::Tuple(_) => self.raw(),
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Item::List(_))
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, Item::Tuple(_))
    }

    /// Elements of a list or tuple, each parsed with [`parse_item`]
    pub fn items(&self) -> Vec<Item<'a>> {
        match *self {
            Item::List(mut s) | Item::Tuple(mut s) => parse_list_items(&mut s),
            _ => Vec::new(),
        }
    }

    /// Key/value pairs inside a list or tuple
    pub fn pairs(&self) -> Vec<(&'a str, Item<'a>)> {
        match *self {
            Item::List(mut s) | Item::Tuple(mut s) => parse_key_values(&mut s),
            _ => Vec::new(),
        }
    }
}

/// Last value stored under `key`
pub fn find_value<'a>(pairs: &[(&'a str, Item<'a>)], key: &str) -> Option<Item<'a>> {
    pairs.iter().rev().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Unescaped string stored under `key`, empty if absent
pub fn find_string(pairs: &[(&str, Item<'_>)], key: &str) -> String {
    find_value(pairs, key).map(|v| v.value()).unwrap_or_default()
}

fn skip_separator(input: &mut &str) {
    if let Some(rest) = input.strip_prefix(',') {
        *input = rest;
    }
}

/// Index of the closer matching the opener at index 0. Quoted text is skipped.
fn matching_close(text: &str, open: u8, close: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 1;
    let mut in_string = false;
    let mut escape = false;

    for (i, &b) in bytes.iter().enumerate().skip(1) {
        if escape {
            escape = false;
            continue;
        }
        match b {
            b'\\' if in_string => escape = true,
            b'"' => in_string = !in_string,
            _ if in_string => {}
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_delimited<'a>(input: &mut &'a str, open: u8, close: u8) -> Option<&'a str> {
    let text: &'a str = *input;
    if text.as_bytes().first() != Some(&open) {
        return None;
    }
    let end = matching_close(text, open, close)?;
    let inner = &text[1..end];
    *input = &text[end + 1..];
    skip_separator(input);
    Some(inner)
}

/// Consume a `{...}` tuple and return its interior
pub fn parse_tuple<'a>(input: &mut &'a str) -> Option<&'a str> {
    parse_delimited(input, b'{', b'}')
}

/// Consume a `[...]` list and return its interior
pub fn parse_list<'a>(input: &mut &'a str) -> Option<&'a str> {
    parse_delimited(input, b'[', b']')
}

/// Consume a quoted string and return the text between the quotes.
///
/// The closing quote is the first one that is not escaped and is followed by
/// a separator, a closer or the end of input. Escapes are left for the caller.
pub fn parse_string<'a>(input: &mut &'a str) -> Option<&'a str> {
    let text: &'a str = *input;
    let bytes = text.as_bytes();
    if bytes.first() != Some(&b'"') {
        return None;
    }

    let mut end = None;
    for i in 1..bytes.len() {
        if bytes[i] != b'"' {
            continue;
        }
        let backslashes = bytes[1..i].iter().rev().take_while(|&&b| b == b'\\').count();
        if backslashes % 2 == 1 {
            continue;
        }
        match bytes.get(i + 1) {
            None | Some(b',') | Some(b'}') | Some(b']') => {
                end = Some(i);
                break;
            }
            _ => {}
        }
    }

    let end = end?;
    let inner = &text[1..end];
    *input = &text[end + 1..];
    skip_separator(input);
    Some(inner)
}

/// Consume one item of any shape.
///
/// Anything that is not a string, list or tuple is taken as a bare scalar
/// running up to the next comma, brace, bracket or the end of input.
pub fn parse_item<'a>(input: &mut &'a str) -> Option<Item<'a>> {
    match ItemKind::of(input) {
        ItemKind::String => parse_string(input).map(Item::String),
        ItemKind::List => parse_list(input).map(Item::List),
        ItemKind::Tuple => parse_tuple(input).map(Item::Tuple),
        ItemKind::Invalid => {
            let text: &'a str = *input;
            if text.is_empty() {
                return None;
            }
            let end = text
                .find(|c: char| c == ',' || c == '}' || c == ']')
                .unwrap_or(text.len());
            let value = &text[..end];
            *input = if end < text.len() { &text[end + 1..] } else { "" };
            skip_separator(input);
            Some(Item::Scalar(value))
        }
    }
}

/// Consume `key=value`. Quotes around the key are stripped.
pub fn parse_key_value<'a>(input: &mut &'a str) -> Option<(&'a str, Item<'a>)> {
    let text: &'a str = *input;
    let bytes = text.as_bytes();
    let eq = (0..bytes.len()).find(|&i| bytes[i] == b'=' && (i == 0 || bytes[i - 1] != b'\\'))?;

    let key = &text[..eq];
    let key = key.strip_prefix('"').unwrap_or(key);
    let key = key.strip_suffix('"').unwrap_or(key);

    *input = &text[eq + 1..];
    let value = match parse_item(input) {
        Some(value) => value,
        None => {
            // Unterminated value: keep what is there rather than stalling
            let rest: &'a str = *input;
            *input = "";
            Item::Scalar(rest)
        }
    };
    Some((key, value))
}

/// Consume items until the input is exhausted or stops shrinking
pub fn parse_list_items<'a>(input: &mut &'a str) -> Vec<Item<'a>> {
    let mut items = Vec::new();
    while !input.is_empty() {
        let before = input.len();
        if let Some(item) = parse_item(input) {
            if !matches!(item, Item::Scalar("")) {
                items.push(item);
            }
        }
        if input.len() == before {
            trace!("list parse stalled at: {}", input);
            break;
        }
    }
    items
}

/// Consume key/value pairs until the input is exhausted or stops shrinking
pub fn parse_key_values<'a>(input: &mut &'a str) -> Vec<(&'a str, Item<'a>)> {
    let mut pairs = Vec::new();
    while !input.is_empty() {
        let before = input.len();
        let pair = parse_key_value(input);
        if input.len() == before {
            trace!("key/value parse stalled at: {}", input);
            break;
        }
        if let Some(pair) = pair {
            pairs.push(pair);
        }
    }
    pairs
}

/// Resolve backslash escapes. `\n`, `\t` and `\r` map to control characters,
/// any other escaped character is taken literally.
pub fn unescape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some('r') => result.push('\r'),
            Some(other) => result.push(other),
            None => {}
        }
    }

    result
}

/// Classify one line of debugger output into a [`Record`].
///
/// Lines that do not start with an optional token followed by a known sigil
/// come back as [`RecordType::Invalid`] carrying the whole line as data.
pub fn classify_line(line: &str) -> Record {
    let token_end = line
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(line.len());
    let token: Option<Token> = if token_end > 0 {
        line[..token_end].parse().ok()
    } else {
        None
    };
    let rest = &line[token_end..];

    let invalid = || Record {
        kind: RecordType::Invalid,
        token,
        class: String::new(),
        data: line.to_string(),
    };

    let kind = match rest.chars().next() {
        Some(c) => RecordType::from_sigil(c),
        None => return invalid(),
    };
    if kind == RecordType::Invalid {
        return invalid();
    }

    let body = &rest[1..];
    if kind.is_stream() {
        return Record {
            kind,
            token,
            class: String::new(),
            data: body.to_string(),
        };
    }

    match body.find(|c: char| c == ',' || c == ' ') {
        Some(0) => invalid(),
        Some(pos) => Record {
            kind,
            token,
            class: body[..pos].to_string(),
            data: body[pos + 1..].to_string(),
        },
        None => Record {
            kind,
            token,
            class: body.to_string(),
            data: String::new(),
        },
    }
}

/// Unescaped text of a stream record payload (`"..."`)
pub fn stream_text(data: &str) -> String {
    let mut cursor = data;
    match parse_string(&mut cursor) {
        Some(inner) => unescape(inner),
        None => unescape(data.trim_matches('"')),
    }
}
