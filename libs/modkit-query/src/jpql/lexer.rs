use crate::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier or keyword.
    Ident,
    /// Quoted string or quoted identifier.
    Str,
    Number,
    /// `:name`
    Named,
    /// `?1` or bare `?`
    Positional,
    /// `:#{...}`, `?#{...}` or `:${...}`
    Template,
    /// Operators and punctuation, including two-character operators.
    Punct,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    #[must_use]
    pub fn text<'a>(&self, src: &'a str) -> &'a str {
        &src[self.start..self.end]
    }
}

const TWO_CHAR_OPS: [&str; 5] = ["<=", ">=", "<>", "!=", "||"];

/// Split query text into tokens.
///
/// # Errors
/// Returns `Error::QuerySyntax` for unterminated strings or templates and for
/// characters outside the query language.
pub fn tokenize(src: &str) -> Result<Vec<Token>, Error> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        let kind = if is_ident_start(c) {
            i = scan_while(bytes, i, is_ident_char);
            TokenKind::Ident
        } else if c.is_ascii_digit() {
            i = scan_number(bytes, i);
            TokenKind::Number
        } else if c == b'\'' || c == b'"' || c == b'`' {
            i = scan_quoted(bytes, i, c).ok_or_else(|| syntax(start, "unterminated quoted text"))?;
            TokenKind::Str
        } else if (c == b':' || c == b'?') && matches!(bytes.get(i + 1), Some(b'#' | b'$')) {
            if bytes.get(i + 2) != Some(&b'{') {
                return Err(syntax(start, "malformed template expression"));
            }
            i = scan_template(bytes, i + 3).ok_or_else(|| syntax(start, "unterminated template expression"))?;
            TokenKind::Template
        } else if c == b':' && bytes.get(i + 1).is_some_and(|b| is_ident_start(*b)) {
            i = scan_while(bytes, i + 1, is_ident_char);
            TokenKind::Named
        } else if c == b'?' {
            i = scan_while(bytes, i + 1, |b| b.is_ascii_digit());
            TokenKind::Positional
        } else if TWO_CHAR_OPS.iter().any(|op| src[i..].starts_with(op)) {
            i += 2;
            TokenKind::Punct
        } else if b"(),.=<>+-*/%[]{}:;|!".contains(&c) {
            i += 1;
            TokenKind::Punct
        } else {
            return Err(syntax(start, "unexpected character"));
        };
        out.push(Token {
            kind,
            start,
            end: i,
        });
    }
    Ok(out)
}

pub fn syntax(offset: usize, message: &str) -> Error {
    Error::QuerySyntax {
        offset,
        message: message.to_owned(),
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$' || !b.is_ascii()
}

fn is_ident_char(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit()
}

fn scan_while(bytes: &[u8], mut i: usize, pred: impl Fn(u8) -> bool) -> usize {
    while i < bytes.len() && pred(bytes[i]) {
        i += 1;
    }
    i
}

fn scan_number(bytes: &[u8], i: usize) -> usize {
    let mut i = scan_while(bytes, i, |b| b.is_ascii_digit());
    if bytes.get(i) == Some(&b'.') && bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
        i = scan_while(bytes, i + 1, |b| b.is_ascii_digit());
    }
    if matches!(bytes.get(i), Some(b'e' | b'E'))
        && bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit() || *b == b'-' || *b == b'+')
    {
        i = scan_while(bytes, i + 2, |b| b.is_ascii_digit());
    }
    // Literal suffixes such as 10L, 1.5F, 2BD.
    scan_while(bytes, i, |b| b.is_ascii_alphabetic())
}

/// Quotes are escaped by doubling them.
fn scan_quoted(bytes: &[u8], start: usize, quote: u8) -> Option<usize> {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return Some(i + 1);
        }
        i += 1;
    }
    None
}

fn scan_template(bytes: &[u8], mut i: usize) -> Option<usize> {
    let mut depth = 1usize;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<(TokenKind, String)> {
        tokenize(src)
            .unwrap()
            .into_iter()
            .map(|t| (t.kind.clone(), t.text(src).to_owned()))
            .collect()
    }

    #[test]
    fn parameters_and_templates() {
        let toks = kinds("u.a = :name and u.b <> ?1 or u.c = :#{#user.id}");
        assert!(toks.contains(&(TokenKind::Named, ":name".to_owned())));
        assert!(toks.contains(&(TokenKind::Positional, "?1".to_owned())));
        assert!(toks.contains(&(TokenKind::Punct, "<>".to_owned())));
        assert!(toks.contains(&(TokenKind::Template, ":#{#user.id}".to_owned())));
    }

    #[test]
    fn doubled_quote_stays_in_string() {
        let toks = kinds("'it''s' 10L");
        assert_eq!(toks[0], (TokenKind::Str, "'it''s'".to_owned()));
        assert_eq!(toks[1], (TokenKind::Number, "10L".to_owned()));
    }

    #[test]
    fn unterminated_string_reports_offset() {
        let err = tokenize("select 'x").unwrap_err();
        assert!(matches!(err, Error::QuerySyntax { offset: 7, .. }));
    }
}
