//! Header cards and the ordered, case-insensitive keyword namespace.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::str;

use crate::block::{BLOCK_SIZE, CARDS_PER_BLOCK, CARD_SIZE, HEADER_PAD_BYTE};
use crate::error::{Error, Result};
use crate::value::{format_value, parse_value, Value};

// ── Types ──

/// One 80-byte keyword record.
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    /// The 8-byte keyword name, ASCII, left-justified, space-padded.
    pub keyword: [u8; 8],
    /// The parsed value, if this card has a value indicator (`= ` in bytes 8..10).
    pub value: Option<Value>,
    /// An optional comment string.
    pub comment: Option<String>,
}

impl Card {
    /// Build a valued card. The keyword is upper-cased and truncated to 8 bytes.
    pub fn new(keyword: &str, value: Value, comment: Option<&str>) -> Card {
        Card {
            keyword: make_keyword(keyword),
            value: Some(value),
            comment: comment.map(String::from),
        }
    }

    /// Return the keyword as a trimmed UTF-8 string.
    pub fn keyword_str(&self) -> &str {
        let end = self
            .keyword
            .iter()
            .rposition(|&b| b != b' ')
            .map(|i| i + 1)
            .unwrap_or(0);
        str::from_utf8(&self.keyword[..end]).unwrap_or("")
    }

    pub fn is_end(&self) -> bool {
        &self.keyword == b"END     "
    }

    /// COMMENT, HISTORY and blank keywords carry free text and may repeat.
    pub fn is_commentary(&self) -> bool {
        matches!(self.keyword_str(), "COMMENT" | "HISTORY" | "")
    }
}

/// Pad and upper-case a keyword into its fixed 8-byte form.
pub fn make_keyword(name: &str) -> [u8; 8] {
    let mut buf = [b' '; 8];
    for (dst, src) in buf.iter_mut().zip(name.bytes()) {
        *dst = src.to_ascii_uppercase();
    }
    buf
}

/// An ordered list of cards with case-insensitive keyword lookup.
///
/// Valued keywords are unique: [`Header::set`] replaces an existing card in
/// place and only appends when the keyword is new.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    cards: Vec<Card>,
}

impl Header {
    pub fn new() -> Header {
        Header::default()
    }

    pub fn from_cards(cards: Vec<Card>) -> Header {
        Header {
            cards: cards.into_iter().filter(|c| !c.is_end()).collect(),
        }
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Position of the first card named `keyword`.
    pub fn position(&self, keyword: &str) -> Option<usize> {
        let key = make_keyword(keyword);
        self.cards.iter().position(|c| c.keyword == key)
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.position(keyword).is_some()
    }

    pub fn get(&self, keyword: &str) -> Option<&Value> {
        self.position(keyword)
            .and_then(|i| self.cards[i].value.as_ref())
    }

    pub fn get_integer(&self, keyword: &str) -> Option<i64> {
        self.get(keyword).and_then(Value::as_i64)
    }

    pub fn get_float(&self, keyword: &str) -> Option<f64> {
        self.get(keyword).and_then(Value::as_f64)
    }

    pub fn get_string(&self, keyword: &str) -> Option<&str> {
        self.get(keyword).and_then(Value::as_str)
    }

    pub fn get_logical(&self, keyword: &str) -> Option<bool> {
        self.get(keyword).and_then(Value::as_bool)
    }

    /// Like [`Header::get_integer`], but a missing or non-integer value is an error.
    pub fn require_integer(&self, keyword: &'static str) -> Result<i64> {
        match self.get(keyword) {
            None => Err(Error::MissingKeyword(keyword)),
            Some(v) => v.as_i64().ok_or(Error::InvalidValue),
        }
    }

    /// Set `keyword`, replacing the value in place if present, else appending.
    pub fn set(&mut self, keyword: &str, value: Value, comment: Option<&str>) {
        match self.position(keyword) {
            Some(i) => {
                self.cards[i].value = Some(value);
                if comment.is_some() {
                    self.cards[i].comment = comment.map(String::from);
                }
            }
            None => self.cards.push(Card::new(keyword, value, comment)),
        }
    }

    /// Set `keyword` directly after `anchor`. Falls back to appending when the
    /// anchor is absent. An existing card of the same name is moved.
    pub fn set_after(&mut self, anchor: &str, keyword: &str, value: Value, comment: Option<&str>) {
        self.remove(keyword);
        let card = Card::new(keyword, value, comment);
        match self.position(anchor) {
            Some(i) => self.cards.insert(i + 1, card),
            None => self.cards.push(card),
        }
    }

    /// Append a card without checking for duplicates.
    pub fn push(&mut self, card: Card) {
        self.cards.push(card);
    }

    /// Remove the first card named `keyword`, returning it.
    pub fn remove(&mut self, keyword: &str) -> Option<Card> {
        self.position(keyword).map(|i| self.cards.remove(i))
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Card> {
        self.cards.iter()
    }
}

// ── Parsing ──

/// Parse a single 80-byte card.
pub fn parse_card(card_bytes: &[u8; CARD_SIZE]) -> Result<Card> {
    let mut keyword = [b' '; 8];
    keyword.copy_from_slice(&card_bytes[..8]);
    if !keyword
        .iter()
        .all(|b| matches!(b, b'A'..=b'Z' | b'0'..=b'9' | b' ' | b'-' | b'_'))
    {
        return Err(Error::InvalidHeader("invalid keyword name"));
    }

    let mut card = Card {
        keyword,
        value: None,
        comment: None,
    };
    if card.is_end() {
        return Ok(card);
    }

    if !card.is_commentary() && &card_bytes[8..10] == b"= " {
        if let Some((value, comment)) = parse_value(&card_bytes[10..]) {
            card.value = Some(value);
            card.comment = comment.map(String::from);
            return Ok(card);
        }
    }

    let text = str::from_utf8(&card_bytes[8..])
        .map_err(|_| Error::InvalidHeader("non-ASCII card text"))?
        .trim_end();
    if !text.is_empty() {
        card.comment = Some(String::from(text));
    }
    Ok(card)
}

/// Parse header blocks up to and including the END card.
///
/// Returns the cards and the number of bytes consumed, always a whole number
/// of blocks.
pub fn parse_header_blocks(data: &[u8]) -> Result<(Header, usize)> {
    let mut cards = Vec::new();
    for (block_idx, block) in data.chunks_exact(BLOCK_SIZE).enumerate() {
        for raw in block.chunks_exact(CARD_SIZE) {
            let raw: &[u8; CARD_SIZE] = raw
                .try_into()
                .map_err(|_| Error::InvalidHeader("short card"))?;
            let card = parse_card(raw)?;
            if card.is_end() {
                return Ok((Header::from_cards(cards), (block_idx + 1) * BLOCK_SIZE));
            }
            cards.push(card);
        }
    }
    Err(Error::UnexpectedEof)
}

// ── Writing ──

/// Serialize a [`Card`] into an 80-byte card image.
pub fn format_card(card: &Card) -> [u8; CARD_SIZE] {
    let mut buf = [b' '; CARD_SIZE];
    buf[..8].copy_from_slice(&card.keyword);

    match (&card.value, &card.comment) {
        (Some(value), comment) => {
            buf[8] = b'=';
            let mut field = format_value(value);
            if let Some(comment) = comment {
                insert_comment(&mut field, comment);
            }
            buf[10..].copy_from_slice(&field);
        }
        (None, Some(text)) => {
            let bytes = text.as_bytes();
            let len = bytes.len().min(72);
            buf[8..8 + len].copy_from_slice(&bytes[..len]);
        }
        (None, None) => {}
    }
    buf
}

/// Write ` / comment` after the value, or after column 30 for short values.
fn insert_comment(field: &mut [u8; 70], comment: &str) {
    let used = field
        .iter()
        .rposition(|&b| b != b' ')
        .map(|i| i + 1)
        .unwrap_or(0);
    let sep = used.max(20) + 1;
    if sep + 3 >= field.len() {
        return;
    }
    field[sep] = b'/';
    let start = sep + 2;
    let bytes = comment.as_bytes();
    let len = bytes.len().min(field.len() - start);
    field[start..start + len].copy_from_slice(&bytes[..len]);
}

/// Serialize a header into complete blocks, appending END and padding with
/// blanks.
pub fn serialize_header(header: &Header) -> Vec<u8> {
    let total_blocks = (header.len() + 1).div_ceil(CARDS_PER_BLOCK);
    let mut buf = vec![HEADER_PAD_BYTE; total_blocks * BLOCK_SIZE];
    for (i, card) in header.iter().enumerate() {
        buf[i * CARD_SIZE..(i + 1) * CARD_SIZE].copy_from_slice(&format_card(card));
    }
    let end = header.len() * CARD_SIZE;
    buf[end..end + 3].copy_from_slice(b"END");
    buf
}
