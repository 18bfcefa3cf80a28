//! Textual query fragments with block and inline composition.
//!
//! Block composition separates fragments with a single space, inline
//! composition glues them together. Nested streams render as a unit, so
//! rendering is associative: rendering `X` followed by `Y` equals the
//! rendered text of `X` joined with the rendered text of `Y`. Fragments that
//! render empty contribute neither text nor separator.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Glue {
    Block,
    Inline,
}

/// A rendered unit of query text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryToken {
    Text(String),
    /// Nested stream rendered as a unit.
    Stream(QueryTokenStream),
    /// Nested stream wrapped in parentheses when it spans several blocks.
    Expression(QueryTokenStream),
}

impl QueryToken {
    pub fn text(s: impl Into<String>) -> Self {
        QueryToken::Text(s.into())
    }

    fn render_into(&self, out: &mut String) {
        match self {
            QueryToken::Text(s) => out.push_str(s),
            QueryToken::Stream(stream) => stream.render_into(out),
            QueryToken::Expression(stream) => {
                let inner = stream.render();
                if stream.needs_parentheses() {
                    out.push('(');
                    out.push_str(&inner);
                    out.push(')');
                } else {
                    out.push_str(&inner);
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Entry {
    glue: Glue,
    token: QueryToken,
}

/// Ordered sequence of query tokens.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct QueryTokenStream {
    entries: Vec<Entry>,
}

impl QueryTokenStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream of block-joined words.
    pub fn of<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut stream = Self::new();
        for w in words {
            stream.append(QueryToken::Text(w.into()));
        }
        stream
    }

    /// Block join: separated from preceding text by a space.
    pub fn append(&mut self, token: QueryToken) -> &mut Self {
        self.entries.push(Entry {
            glue: Glue::Block,
            token,
        });
        self
    }

    pub fn append_text(&mut self, s: impl Into<String>) -> &mut Self {
        self.append(QueryToken::Text(s.into()))
    }

    /// Block join of a whole stream.
    pub fn append_stream(&mut self, stream: QueryTokenStream) -> &mut Self {
        self.append(QueryToken::Stream(stream))
    }

    /// Inline join: glued to the preceding text.
    pub fn append_inline(&mut self, stream: QueryTokenStream) -> &mut Self {
        self.entries.push(Entry {
            glue: Glue::Inline,
            token: QueryToken::Stream(stream),
        });
        self
    }

    pub fn append_inline_text(&mut self, s: impl Into<String>) -> &mut Self {
        self.entries.push(Entry {
            glue: Glue::Inline,
            token: QueryToken::Text(s.into()),
        });
        self
    }

    /// Block join of a unit parenthesized when it has several blocks.
    pub fn append_expression(&mut self, stream: QueryTokenStream) -> &mut Self {
        self.append(QueryToken::Expression(stream))
    }

    /// Comma separated list of streams.
    pub fn comma_separated(items: impl IntoIterator<Item = QueryTokenStream>) -> Self {
        let mut out = Self::new();
        for (i, item) in items.into_iter().enumerate() {
            if i > 0 {
                out.append_inline_text(",");
            }
            out.append_stream(item);
        }
        out
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.render().is_empty()
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut String) {
        let mut piece = String::new();
        for entry in &self.entries {
            piece.clear();
            entry.token.render_into(&mut piece);
            if piece.is_empty() {
                continue;
            }
            if entry.glue == Glue::Block && !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&piece);
        }
    }

    fn needs_parentheses(&self) -> bool {
        self.entries
            .iter()
            .filter(|e| e.glue == Glue::Block)
            .filter(|e| {
                let mut s = String::new();
                e.token.render_into(&mut s);
                !s.is_empty()
            })
            .count()
            > 1
    }
}

impl fmt::Display for QueryTokenStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<QueryTokenStream> {
        let mut nested = QueryTokenStream::of(["where", "u.age"]);
        nested.append_inline_text(">").append_inline(QueryTokenStream::of(["?1"]));
        let mut expr = QueryTokenStream::new();
        expr.append_expression(QueryTokenStream::of(["a", "or", "b"]));
        vec![
            QueryTokenStream::new(),
            QueryTokenStream::of(["select", "u"]),
            QueryTokenStream::of([""]),
            nested,
            expr,
        ]
    }

    #[test]
    fn block_and_inline_concatenation_is_associative() {
        for x in samples() {
            for y in samples() {
                let (rx, ry) = (x.render(), y.render());

                let mut block = QueryTokenStream::new();
                block.append_stream(x.clone()).append_stream(y.clone());
                let expected = match (rx.is_empty(), ry.is_empty()) {
                    (true, _) => ry.clone(),
                    (_, true) => rx.clone(),
                    _ => format!("{rx} {ry}"),
                };
                assert_eq!(block.render(), expected);

                let mut inline = QueryTokenStream::new();
                inline.append_inline(x.clone()).append_inline(y.clone());
                assert_eq!(inline.render(), format!("{rx}{ry}"));
            }
        }
    }

    #[test]
    fn empty_parts_add_no_separator() {
        let mut s = QueryTokenStream::of(["select"]);
        s.append_stream(QueryTokenStream::new()).append_text("u");
        assert_eq!(s.render(), "select u");
        assert!(QueryTokenStream::of(["", ""]).is_empty());
    }

    #[test]
    fn expressions_parenthesize_only_multi_block_streams() {
        let mut s = QueryTokenStream::of(["where"]);
        s.append_expression(QueryTokenStream::of(["x"]));
        s.append_text("and");
        s.append_expression(QueryTokenStream::of(["a", "or", "b"]));
        assert_eq!(s.render(), "where x and (a or b)");
    }

    #[test]
    fn comma_list() {
        let s = QueryTokenStream::comma_separated([
            QueryTokenStream::of(["u.a"]),
            QueryTokenStream::of(["u.b", "desc"]),
        ]);
        assert_eq!(s.render(), "u.a, u.b desc");
        assert_eq!(s.render(), s.render());
    }
}
