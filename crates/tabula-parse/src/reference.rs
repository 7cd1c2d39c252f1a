//! Reference prefixes and cell coordinates.

use tabula_common::ElementKind;

/// Classify a reference prefix word (case-insensitive).
///
/// `table|tbl|t`, `column|col|c`, `row|r`, `cell`, `subset|set|group`.
pub fn reference_prefix(word: &str) -> Option<ElementKind> {
    match word.trim().to_ascii_lowercase().as_str() {
        "table" | "tbl" | "t" => Some(ElementKind::Table),
        "column" | "col" | "c" => Some(ElementKind::Column),
        "row" | "r" => Some(ElementKind::Row),
        "cell" => Some(ElementKind::Cell),
        "subset" | "set" | "group" => Some(ElementKind::Subset),
        _ => None,
    }
}

/// Parse A1 notation into 1-based `(row, column)` indices.
///
/// ```
/// assert_eq!(tabula_parse::parse_a1("B3"), Some((3, 2)));
/// assert_eq!(tabula_parse::parse_a1("aa10"), Some((10, 27)));
/// assert_eq!(tabula_parse::parse_a1("3B"), None);
/// ```
pub fn parse_a1(s: &str) -> Option<(usize, usize)> {
    let s = s.trim();
    let split = s.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = s.split_at(split);
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let row: usize = digits.parse().ok()?;
    if row == 0 {
        return None;
    }
    let mut col = 0usize;
    for c in letters.chars() {
        col = col
            .checked_mul(26)?
            .checked_add((c.to_ascii_uppercase() as u8 - b'A' + 1) as usize)?;
    }
    Some((row, col))
}

/// Render a 1-based column index as letters (`1` → `A`, `27` → `AA`).
pub fn column_letters(mut index: usize) -> String {
    let mut out = Vec::new();
    while index > 0 {
        let rem = (index - 1) % 26;
        out.push(b'A' + rem as u8);
        index = (index - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
