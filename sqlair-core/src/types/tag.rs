//! Column-name tag grammar (spec.md §4.1) as one small state machine.
//!
//! Valid forms:
//!   - a double- or single-quoted literal, balanced, preserved verbatim;
//!   - an identifier: `[A-Za-z_][A-Za-z0-9_]*`;
//!   - a pure decimal integer.
//! Either form may be followed by `,omitempty`.

/// A validated, parsed column tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnTag {
    /// The column name with quotes stripped (quoted tags keep their body
    /// verbatim, including any internal whitespace or punctuation).
    pub name: String,
    pub omit_empty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagError(pub String);

impl std::fmt::Display for TagError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse and validate a raw tag string, e.g. `col`, `"my col"`, `42,omitempty`.
pub fn parse_tag(raw: &str) -> Result<ColumnTag, TagError> {
    if raw.is_empty() {
        return Err(TagError("tag must be non-empty".into()));
    }

    let (body, rest) = split_first_comma(raw);
    let omit_empty = match rest {
        None => false,
        Some(flag) if flag == "omitempty" => true,
        Some(other) => {
            return Err(TagError(format!(
                "unrecognised tag flag {:?}; only `,omitempty` is supported",
                other
            )))
        }
    };

    let name = parse_body(body)?;
    Ok(ColumnTag { name, omit_empty })
}

fn split_first_comma(raw: &str) -> (&str, Option<&str>) {
    // A quoted body may itself contain commas, so only split on a comma that
    // lies outside of a balanced quote.
    let bytes = raw.as_bytes();
    if let Some(&first) = bytes.first() {
        if first == b'"' || first == b'\'' {
            if let Some(end) = find_closing_quote(raw, first as char) {
                let after = &raw[end + 1..];
                return match after.strip_prefix(',') {
                    Some(rest) => (&raw[..=end], Some(rest)),
                    None => (&raw[..=end], if after.is_empty() { None } else { Some(after) }),
                };
            }
            return (raw, None);
        }
    }

    match raw.find(',') {
        Some(idx) => (&raw[..idx], Some(&raw[idx + 1..])),
        None => (raw, None),
    }
}

fn find_closing_quote(raw: &str, quote: char) -> Option<usize> {
    let mut chars = raw.char_indices();
    chars.next(); // skip opening quote
    for (idx, c) in chars {
        if c == quote {
            return Some(idx);
        }
    }
    None
}

fn parse_body(body: &str) -> Result<String, TagError> {
    let mut chars = body.chars();
    match chars.next() {
        Some(q @ ('"' | '\'')) => {
            if body.len() < 2 || !body.ends_with(q) {
                return Err(TagError(format!("unbalanced quote in tag {:?}", body)));
            }
            Ok(body[1..body.len() - 1].to_string())
        }
        Some(c) if c.is_ascii_digit() => {
            if body.chars().all(|c| c.is_ascii_digit()) {
                Ok(body.to_string())
            } else {
                Err(TagError(format!(
                    "tag {:?} is not a pure decimal integer",
                    body
                )))
            }
        }
        Some(c) if c.is_alphabetic() || c == '_' => {
            if body
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_')
            {
                Ok(body.to_string())
            } else {
                Err(TagError(format!(
                    "tag {:?} must be letters, digits, and underscores",
                    body
                )))
            }
        }
        Some(_) | None => Err(TagError(format!("malformed tag body {:?}", body))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_identifier() {
        let t = parse_tag("person_id").unwrap();
        assert_eq!(t.name, "person_id");
        assert!(!t.omit_empty);
    }

    #[test]
    fn digits_only() {
        let t = parse_tag("42").unwrap();
        assert_eq!(t.name, "42");
    }

    #[test]
    fn with_omitempty() {
        let t = parse_tag("name,omitempty").unwrap();
        assert_eq!(t.name, "name");
        assert!(t.omit_empty);
    }

    #[test]
    fn quoted_with_comma_inside() {
        let t = parse_tag("\"a, b\",omitempty").unwrap();
        assert_eq!(t.name, "a, b");
        assert!(t.omit_empty);
    }

    #[test]
    fn single_quoted() {
        let t = parse_tag("'weird col'").unwrap();
        assert_eq!(t.name, "weird col");
    }

    #[test]
    fn empty_is_error() {
        assert!(parse_tag("").is_err());
    }

    #[test]
    fn unbalanced_quote_is_error() {
        assert!(parse_tag("\"oops").is_err());
    }

    #[test]
    fn bad_flag_is_error() {
        assert!(parse_tag("name,bogus").is_err());
    }

    #[test]
    fn invalid_identifier_start_is_error() {
        assert!(parse_tag("1abc").is_err());
    }

    #[test]
    fn mixed_digits_and_letters_is_error() {
        assert!(parse_tag("4a").is_err());
    }
}
