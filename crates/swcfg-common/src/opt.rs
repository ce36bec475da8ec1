//! Command token cursor and option value parsing.

use crate::error::{DatastoreError, DatastoreResult, ResultCode};

/// How a set-membership option value edits the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetEdit {
    /// Bare value: replace the set with this single member.
    Replace,
    /// `+value`
    Add,
    /// `-value` or `~value`
    Remove,
}

impl SetEdit {
    /// True for every edit that puts the value into the set.
    pub fn is_added(&self) -> bool {
        !matches!(self, SetEdit::Remove)
    }
}

/// Strips the sigil of a set-membership value.
pub fn parse_set_edit(raw: &str) -> DatastoreResult<(SetEdit, &str)> {
    let (edit, value) = match raw.chars().next() {
        Some('+') => (SetEdit::Add, &raw[1..]),
        Some('-') | Some('~') => (SetEdit::Remove, &raw[1..]),
        Some(_) => (SetEdit::Replace, raw),
        None => return Err(DatastoreError::invalid_args()),
    };
    if value.is_empty() {
        return Err(DatastoreError::bad_opt_value(ResultCode::InvalidArgs, raw));
    }
    Ok((edit, value))
}

/// Parses an unsigned integer, decimal or `0x` hex.
///
/// Overflow of `max` is `OUT_OF_RANGE`, anything unparsable is
/// `INVALID_ARGS`.
pub fn parse_uint(raw: &str, max: u64) -> DatastoreResult<u64> {
    let (digits, radix) = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (raw, 10),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(DatastoreError::bad_opt_value(ResultCode::InvalidArgs, raw));
    }
    match u64::from_str_radix(digits, radix) {
        Ok(v) if v <= max => Ok(v),
        _ => Err(DatastoreError::bad_opt_value(ResultCode::OutOfRange, raw)),
    }
}

pub fn parse_u64(raw: &str) -> DatastoreResult<u64> {
    parse_uint(raw, u64::MAX)
}

pub fn parse_u32(raw: &str) -> DatastoreResult<u32> {
    parse_uint(raw, u64::from(u32::MAX)).map(|v| v as u32)
}

pub fn parse_u8(raw: &str) -> DatastoreResult<u8> {
    parse_uint(raw, u64::from(u8::MAX)).map(|v| v as u8)
}

/// Parses `true` / `false`.
pub fn parse_bool(raw: &str) -> DatastoreResult<bool> {
    match raw {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(DatastoreError::bad_opt_value(ResultCode::InvalidArgs, raw)),
    }
}

/// Forward-only cursor over the tokens of one command.
///
/// Handlers borrow the tokens for the duration of the call only.
#[derive(Debug, Clone)]
pub struct Tokens<'a> {
    items: &'a [String],
    pos: usize,
}

impl<'a> Tokens<'a> {
    pub fn new(items: &'a [String]) -> Self {
        Self { items, pos: 0 }
    }

    pub fn peek(&self) -> Option<&'a str> {
        self.items.get(self.pos).map(String::as_str)
    }

    /// Consumes the value following an option, if there is one.
    pub fn value(&mut self) -> Option<&'a str> {
        self.next()
    }

    /// Consumes a mandatory option value.
    pub fn require_value(&mut self) -> DatastoreResult<&'a str> {
        self.value()
            .ok_or_else(|| DatastoreError::interp(ResultCode::InvalidArgs, "Bad opt value."))
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.items.len()
    }

    /// Tokens not consumed yet.
    pub fn rest(&self) -> &'a [String] {
        &self.items[self.pos.min(self.items.len())..]
    }

    /// Fails if anything is left after a command that takes no options.
    pub fn expect_end(&self) -> DatastoreResult<()> {
        match self.peek() {
            None => Ok(()),
            Some(extra) => Err(DatastoreError::interp(
                ResultCode::InvalidArgs,
                format!("Bad opt = {}.", extra),
            )),
        }
    }
}

impl<'a> Iterator for Tokens<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.items.get(self.pos)?;
        self.pos += 1;
        Some(item.as_str())
    }
}

/// Splits a command line into tokens.
///
/// Tokens are separated by whitespace; double quotes group a token and
/// `\"` escapes a quote inside them. Empty and `#` comment lines yield no
/// tokens.
pub fn tokenize(line: &str) -> DatastoreResult<Vec<String>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(Vec::new());
    }

    let mut tokens = Vec::new();
    let mut cur = String::new();
    let mut in_token = false;
    let mut in_quote = false;
    let mut chars = trimmed.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quote = !in_quote;
                in_token = true;
            }
            '\\' if in_quote => match chars.next() {
                Some(escaped) => cur.push(escaped),
                None => return Err(DatastoreError::invalid_args()),
            },
            c if c.is_whitespace() && !in_quote => {
                if in_token {
                    tokens.push(std::mem::take(&mut cur));
                    in_token = false;
                }
            }
            c => {
                cur.push(c);
                in_token = true;
            }
        }
    }

    if in_quote {
        return Err(DatastoreError::interp(ResultCode::InvalidArgs, "Unterminated quote."));
    }
    if in_token {
        tokens.push(cur);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_set_edit_sigils() {
        assert_eq!(parse_set_edit("a1").unwrap(), (SetEdit::Replace, "a1"));
        assert_eq!(parse_set_edit("+a1").unwrap(), (SetEdit::Add, "a1"));
        assert_eq!(parse_set_edit("-a1").unwrap(), (SetEdit::Remove, "a1"));
        assert_eq!(parse_set_edit("~a1").unwrap(), (SetEdit::Remove, "a1"));
        assert!(parse_set_edit("+").is_err());
        assert!(SetEdit::Replace.is_added());
        assert!(!SetEdit::Remove.is_added());
    }

    #[test]
    fn test_parse_u64_bounds() {
        assert_eq!(parse_u64("18446744073709551615").unwrap(), u64::MAX);
        let err = parse_u64("18446744073709551616").unwrap_err();
        assert_eq!(err.result_code(), ResultCode::OutOfRange);
        assert_eq!(err.message(), Some("Bad opt value = 18446744073709551616."));
        assert_eq!(
            parse_u64("abc").unwrap_err().result_code(),
            ResultCode::InvalidArgs
        );
        assert_eq!(
            parse_u64("-1").unwrap_err().result_code(),
            ResultCode::InvalidArgs
        );
        assert_eq!(parse_u64("0x10").unwrap(), 16);
    }

    #[test]
    fn test_parse_narrow_uints() {
        assert_eq!(parse_u8("255").unwrap(), 255);
        assert_eq!(parse_u8("256").unwrap_err().result_code(), ResultCode::OutOfRange);
        assert_eq!(parse_u32("4294967295").unwrap(), u32::MAX);
    }

    #[test]
    fn test_tokens_cursor() {
        let items: Vec<String> = ["-expire", "10", "-tmp-dir"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut toks = Tokens::new(&items);
        assert_eq!(toks.next(), Some("-expire"));
        assert_eq!(toks.value(), Some("10"));
        assert_eq!(toks.next(), Some("-tmp-dir"));
        assert_eq!(toks.value(), None);
        assert!(toks.require_value().is_err());
        assert!(toks.expect_end().is_ok());
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize(r#"l2-bridge "my bridge" create -tmp-dir /var/tmp"#).unwrap(),
            vec!["l2-bridge", "my bridge", "create", "-tmp-dir", "/var/tmp"]
        );
        assert!(tokenize("   # comment").unwrap().is_empty());
        assert!(tokenize("").unwrap().is_empty());
        assert!(tokenize(r#"a "b"#).is_err());
        assert_eq!(tokenize(r#"a "q\"x""#).unwrap(), vec!["a", "q\"x"]);
    }
}
