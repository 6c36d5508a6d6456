//! Keyword translation between an image header and its compressed-table
//! header.
//!
//! Structural keywords of the image move under a `Z` prefix when the image
//! is stored as a table, so they do not collide with the table's own
//! structural keywords. Everything else passes through unchanged.

use alloc::string::String;
use alloc::vec::Vec;

use crate::header::{Card, Header};
use crate::value::Value;

/// EXTNAME given to compressed tables that had none.
pub const COMPRESSED_EXTNAME: &str = "COMPRESSED_IMAGE";

/// Fixed image keyword to table keyword renames.
const RENAMES: &[(&str, &str)] = &[
    ("SIMPLE", "ZSIMPLE"),
    ("XTENSION", "ZTENSION"),
    ("BITPIX", "ZBITPIX"),
    ("NAXIS", "ZNAXIS"),
    ("EXTEND", "ZEXTEND"),
    ("BLOCKED", "ZBLOCKED"),
    ("PCOUNT", "ZPCOUNT"),
    ("GCOUNT", "ZGCOUNT"),
    ("CHECKSUM", "ZHECKSUM"),
    ("DATASUM", "ZDATASUM"),
];

/// Table keywords that describe the table or the compression and have no
/// place in the image header.
const TABLE_ONLY: &[&str] = &[
    "XTENSION", "BITPIX", "NAXIS", "PCOUNT", "GCOUNT", "TFIELDS", "THEAP", "ZIMAGE", "ZCMPTYPE",
    "ZSCALE", "ZZERO", "ZBLANK", "ZQUANTIZ", "CHECKSUM", "DATASUM",
];

/// Indexed table keywords (`TTYPE1`, `ZTILE2`, ...) dropped from the image
/// header.
const TABLE_ONLY_INDEXED: &[&str] = &["NAXIS", "TTYPE", "TFORM", "TDIM", "ZTILE", "ZNAME", "ZVAL"];

/// If `keyword` is `prefix` followed by a positive decimal index, return
/// the index digits.
pub(crate) fn indexed_suffix<'a>(keyword: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = keyword.strip_prefix(prefix)?;
    let valid = !rest.is_empty()
        && !rest.starts_with('0')
        && rest.bytes().all(|b| b.is_ascii_digit());
    valid.then_some(rest)
}

fn renamed(card: &Card, keyword: &str) -> Card {
    Card {
        keyword: crate::header::make_keyword(keyword),
        value: card.value.clone(),
        comment: card.comment.clone(),
    }
}

fn image_to_table_name(keyword: &str) -> Option<String> {
    if let Some(&(_, to)) = RENAMES.iter().find(|(from, _)| *from == keyword) {
        return Some(String::from(to));
    }
    indexed_suffix(keyword, "NAXIS").map(|m| alloc::format!("ZNAXIS{m}"))
}

fn table_to_image_name(keyword: &str) -> Option<String> {
    if let Some(&(from, _)) = RENAMES.iter().find(|(_, to)| *to == keyword) {
        return Some(String::from(from));
    }
    indexed_suffix(keyword, "ZNAXIS").map(|m| alloc::format!("NAXIS{m}"))
}

/// Translate an image header into the keywords of its compressed table.
///
/// Structural keywords are renamed and `EXTNAME = 'COMPRESSED_IMAGE'` is
/// added when the image has no EXTNAME. Commentary cards are copied as-is.
pub fn image_to_table_header(image: &Header) -> Header {
    let mut cards: Vec<Card> = image
        .iter()
        .map(|card| {
            if card.is_commentary() {
                return card.clone();
            }
            match image_to_table_name(card.keyword_str()) {
                Some(name) => renamed(card, &name),
                None => card.clone(),
            }
        })
        .collect();
    if !image.contains("EXTNAME") {
        cards.push(Card::new(
            "EXTNAME",
            Value::String(String::from(COMPRESSED_EXTNAME)),
            Some("name of this binary table extension"),
        ));
    }
    Header::from_cards(cards)
}

/// Move `keyword` from `body` to the end of `cards`.
fn take(body: &mut Header, cards: &mut Vec<Card>, keyword: &str) {
    if let Some(card) = body.remove(keyword) {
        cards.push(card);
    }
}

fn is_table_only(card: &Card) -> bool {
    let kw = card.keyword_str();
    if TABLE_ONLY.contains(&kw) {
        return true;
    }
    if TABLE_ONLY_INDEXED
        .iter()
        .any(|p| indexed_suffix(kw, p).is_some())
    {
        return true;
    }
    kw == "EXTNAME"
        && card
            .value
            .as_ref()
            .and_then(Value::as_str)
            .is_some_and(|s| s.trim() == COMPRESSED_EXTNAME)
}

/// Translate a compressed-table header back into an image header.
///
/// Table structure and compression keywords are dropped and the `Z`-prefixed
/// structural keywords get their plain names back. The result always starts
/// with the mandatory image keywords in their required order. An integer
/// image with a ZBLANK keyword gets it back as BLANK.
pub fn table_to_image_header(table: &Header) -> Header {
    let mut body: Vec<Card> = Vec::new();
    for card in table.iter() {
        if card.is_commentary() {
            body.push(card.clone());
            continue;
        }
        let kw = card.keyword_str();
        if let Some(name) = table_to_image_name(kw) {
            body.push(renamed(card, &name));
        } else if !is_table_only(card) {
            body.push(card.clone());
        }
    }

    let mut body = Header::from_cards(body);
    let mut cards = Vec::new();

    let is_primary = body.contains("SIMPLE");
    if !is_primary && !body.contains("XTENSION") {
        body.set(
            "XTENSION",
            Value::String(String::from("IMAGE")),
            Some("IMAGE extension"),
        );
    }
    let naxis = body.get_integer("NAXIS").unwrap_or(0);
    take(&mut body, &mut cards, if is_primary { "SIMPLE" } else { "XTENSION" });
    take(&mut body, &mut cards, "BITPIX");
    take(&mut body, &mut cards, "NAXIS");
    for m in 1..=naxis.max(0) {
        take(&mut body, &mut cards, &alloc::format!("NAXIS{m}"));
    }
    if is_primary {
        take(&mut body, &mut cards, "EXTEND");
    } else {
        if !body.contains("PCOUNT") {
            body.set("PCOUNT", Value::Integer(0), Some("required keyword"));
        }
        if !body.contains("GCOUNT") {
            body.set("GCOUNT", Value::Integer(1), Some("required keyword"));
        }
        take(&mut body, &mut cards, "PCOUNT");
        take(&mut body, &mut cards, "GCOUNT");
    }

    let bitpix = cards
        .iter()
        .find(|c| c.keyword_str() == "BITPIX")
        .and_then(|c| c.value.as_ref())
        .and_then(Value::as_i64)
        .unwrap_or(0);
    cards.extend(body.iter().cloned());
    let mut image = Header::from_cards(cards);
    if bitpix > 0 {
        if let Some(blank) = table.get_integer("ZBLANK") {
            image.set("BLANK", Value::Integer(blank), Some("null value"));
        }
    }
    image
}
