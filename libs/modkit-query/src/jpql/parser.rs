use super::ast::{
    Expr, FromRoot, FromSource, Join, JoinTarget, OrderedQuery, QueryBody, QueryExpression,
    SelectClause, SelectItem, SelectQuery, SetOperator, Statement, Term,
};
use super::lexer::{Token, TokenKind, syntax, tokenize};
use crate::Error;

/// Reserved words; never read as aliases and never end an operand.
const KEYWORDS: &[&str] = &[
    "select", "from", "where", "group", "by", "having", "order", "union", "intersect", "except",
    "all", "distinct", "limit", "offset", "fetch", "first", "next", "rows", "row", "only", "as",
    "join", "left", "right", "inner", "outer", "cross", "full", "on", "with", "and", "or", "not",
    "is", "between", "like", "in", "member", "of", "escape", "case", "when", "then", "else", "new",
    "empty", "exists", "some", "any", "asc", "desc", "nulls", "last", "set", "lateral",
];

/// Keywords that may end an operand, e.g. `case ... end x`.
const VALUE_KEYWORDS: &[&str] = &["end", "null", "true", "false"];

const CLAUSE_STOPS: &[&str] = &[
    "group", "having", "order", "union", "intersect", "except", "limit", "offset", "fetch",
];

const SELECT_STOPS: &[&str] = &[
    "from", "where", "group", "having", "order", "union", "intersect", "except", "limit",
    "offset", "fetch",
];

const ORDER_STOPS: &[&str] = &["limit", "offset", "fetch", "union", "intersect", "except"];

const PAGING_STOPS: &[&str] = &["union", "intersect", "except"];

const JOIN_STOPS: &[&str] = &[
    "where", "group", "having", "order", "union", "intersect", "except", "limit", "offset",
    "fetch", "join", "left", "right", "inner", "cross", "full",
];

const JOIN_PREFIXES: &[&str] = &["left", "right", "inner", "outer", "cross", "full"];

fn is_keyword(word: &str) -> bool {
    KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

/// Parse query text into a [`Statement`].
///
/// # Errors
/// Returns `Error::QuerySyntax` with the byte offset of the offending token.
pub fn parse(src: &str) -> Result<Statement, Error> {
    let tokens = tokenize(src)?;
    let mut p = Parser {
        src,
        tokens,
        pos: 0,
    };
    if p.at_kw("update") || p.at_kw("delete") || p.at_kw("insert") {
        return Ok(Statement::Modifying(src.trim().to_owned()));
    }
    let query = p.query_expression()?;
    if let Some(tok) = p.peek() {
        return Err(syntax(
            tok.start,
            &format!("unexpected token `{}`", tok.text(src)),
        ));
    }
    Ok(Statement::Select(query))
}

/// Parse a select query, rejecting modifying statements.
///
/// # Errors
/// Returns `Error::QuerySyntax` for malformed text or modifying statements.
pub fn parse_select(src: &str) -> Result<QueryExpression, Error> {
    match parse(src)? {
        Statement::Select(q) => Ok(q),
        Statement::Modifying(_) => Err(syntax(0, "expected a select query")),
    }
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n)
    }

    fn text(&self, tok: &Token) -> &str {
        tok.text(self.src)
    }

    fn tok_is_kw(&self, tok: &Token, kw: &str) -> bool {
        tok.kind == TokenKind::Ident && self.text(tok).eq_ignore_ascii_case(kw)
    }

    fn tok_is_punct(&self, tok: &Token, p: &str) -> bool {
        tok.kind == TokenKind::Punct && self.text(tok) == p
    }

    fn at_kw(&self, kw: &str) -> bool {
        self.peek().is_some_and(|t| self.tok_is_kw(t, kw))
    }

    fn at_any_kw(&self, kws: &[&str]) -> bool {
        kws.iter().any(|k| self.at_kw(k))
    }

    fn at_punct(&self, p: &str) -> bool {
        self.peek().is_some_and(|t| self.tok_is_punct(t, p))
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        let hit = self.at_kw(kw);
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        let hit = self.at_punct(p);
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn offset(&self) -> usize {
        self.peek().map_or(self.src.len(), |t| t.start)
    }

    fn expect_kw(&mut self, kw: &str) -> Result<(), Error> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(syntax(self.offset(), &format!("expected `{kw}`")))
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<Token, Error> {
        match self.peek() {
            Some(t) if self.tok_is_punct(t, p) => {
                let t = t.clone();
                self.pos += 1;
                Ok(t)
            }
            _ => Err(syntax(self.offset(), &format!("expected `{p}`"))),
        }
    }

    fn subquery_ahead(&self) -> bool {
        self.at_punct("(")
            && self
                .peek_at(1)
                .is_some_and(|t| self.tok_is_kw(t, "select") || self.tok_is_kw(t, "from"))
    }

    fn query_expression(&mut self) -> Result<QueryExpression, Error> {
        let mut branches = vec![self.ordered_query()?];
        let mut operators = Vec::new();
        while let Some(op) = self.set_operator() {
            operators.push(op);
            branches.push(self.ordered_query()?);
        }
        Ok(QueryExpression {
            branches,
            operators,
        })
    }

    fn set_operator(&mut self) -> Option<SetOperator> {
        let (plain, all) = if self.eat_kw("union") {
            (SetOperator::Union, SetOperator::UnionAll)
        } else if self.eat_kw("intersect") {
            (SetOperator::Intersect, SetOperator::IntersectAll)
        } else if self.eat_kw("except") {
            (SetOperator::Except, SetOperator::ExceptAll)
        } else {
            return None;
        };
        Some(if self.eat_kw("all") { all } else { plain })
    }

    fn ordered_query(&mut self) -> Result<OrderedQuery, Error> {
        let body = if self.at_punct("(")
            && self.peek_at(1).is_some_and(|t| {
                self.tok_is_kw(t, "select") || self.tok_is_kw(t, "from") || self.tok_is_punct(t, "(")
            }) {
            self.pos += 1;
            let inner = self.query_expression()?;
            self.expect_punct(")")?;
            QueryBody::Nested(Box::new(inner))
        } else {
            QueryBody::Select(Box::new(self.select_query()?))
        };

        let mut order_by = Vec::new();
        if self.eat_kw("order") {
            self.expect_kw("by")?;
            order_by = self.expr_list(ORDER_STOPS)?;
        }
        let paging = if self.at_any_kw(&["limit", "offset", "fetch"]) {
            Some(self.expr(PAGING_STOPS, false)?)
        } else {
            None
        };
        Ok(OrderedQuery {
            body,
            order_by,
            paging,
        })
    }

    fn select_query(&mut self) -> Result<SelectQuery, Error> {
        let select = if self.eat_kw("select") {
            let distinct = self.eat_kw("distinct");
            Some(SelectClause {
                distinct,
                items: self.select_items()?,
            })
        } else {
            None
        };
        self.expect_kw("from")?;
        let mut from = vec![self.from_root()?];
        while self.eat_punct(",") {
            from.push(self.from_root()?);
        }
        let where_clause = if self.eat_kw("where") {
            Some(self.expr(CLAUSE_STOPS, false)?)
        } else {
            None
        };
        let mut group_by = Vec::new();
        if self.eat_kw("group") {
            self.expect_kw("by")?;
            group_by = self.expr_list(CLAUSE_STOPS)?;
        }
        let having = if self.eat_kw("having") {
            Some(self.expr(CLAUSE_STOPS, false)?)
        } else {
            None
        };
        Ok(SelectQuery {
            select,
            from,
            where_clause,
            group_by,
            having,
        })
    }

    fn select_items(&mut self) -> Result<Vec<SelectItem>, Error> {
        let mut items = Vec::new();
        loop {
            let expr = self.expr(SELECT_STOPS, true)?;
            let alias = self.alias()?;
            items.push(SelectItem { expr, alias });
            if !self.eat_punct(",") {
                return Ok(items);
            }
        }
    }

    fn expr_list(&mut self, stops: &[&str]) -> Result<Vec<Expr>, Error> {
        let mut out = vec![self.expr(stops, false)?];
        while self.eat_punct(",") {
            out.push(self.expr(stops, false)?);
        }
        Ok(out)
    }

    /// Optional `[as] alias`.
    fn alias(&mut self) -> Result<Option<String>, Error> {
        let explicit = self.eat_kw("as");
        match self.peek() {
            Some(t) if t.kind == TokenKind::Ident && !is_keyword(self.text(t)) => {
                let name = self.text(t).to_owned();
                self.pos += 1;
                Ok(Some(name))
            }
            _ if explicit => Err(syntax(self.offset(), "expected alias after `as`")),
            _ => Ok(None),
        }
    }

    fn dotted_name(&mut self) -> Result<String, Error> {
        let mut name = String::new();
        loop {
            match self.peek() {
                Some(t) if t.kind == TokenKind::Ident => {
                    name.push_str(self.text(t));
                    self.pos += 1;
                }
                _ => return Err(syntax(self.offset(), "expected identifier")),
            }
            if self.at_punct(".") {
                self.pos += 1;
                name.push('.');
            } else {
                return Ok(name);
            }
        }
    }

    fn from_root(&mut self) -> Result<FromRoot, Error> {
        let source = if self.subquery_ahead() {
            self.pos += 1;
            let inner = self.query_expression()?;
            self.expect_punct(")")?;
            FromSource::Subquery(Box::new(inner))
        } else {
            FromSource::Entity(self.dotted_name()?)
        };
        let alias = self.alias()?;
        let mut joins = Vec::new();
        while self.at_any_kw(JOIN_PREFIXES) || self.at_kw("join") {
            joins.push(self.join()?);
        }
        Ok(FromRoot {
            source,
            alias,
            joins,
        })
    }

    fn join(&mut self) -> Result<Join, Error> {
        let mut words = Vec::new();
        while let Some(w) = JOIN_PREFIXES.iter().find(|k| self.at_kw(k)) {
            words.push(*w);
            self.pos += 1;
        }
        self.expect_kw("join")?;
        words.push("join");
        if self.eat_kw("fetch") {
            words.push("fetch");
        }
        self.eat_kw("lateral");

        let target = if self.subquery_ahead() {
            self.pos += 1;
            let inner = self.query_expression()?;
            self.expect_punct(")")?;
            JoinTarget::Subquery(Box::new(inner))
        } else {
            let mark = self.pos;
            let path = self.dotted_name()?;
            if self.at_punct("(") {
                self.pos = mark;
                JoinTarget::Function(self.expr(JOIN_STOPS, true)?)
            } else {
                JoinTarget::Path(path)
            }
        };
        let alias = self.alias()?;
        let condition = if self.at_kw("on") || self.at_kw("with") {
            let kw = self
                .peek()
                .map_or_else(String::new, |t| self.text(t).to_lowercase());
            self.pos += 1;
            Some((kw, self.expr(JOIN_STOPS, false)?))
        } else {
            None
        };
        Ok(Join {
            kind: words.join(" "),
            target,
            alias,
            condition,
        })
    }

    /// Scan an expression up to a stop keyword, `,` or an unbalanced `)` at
    /// nesting level zero. Subqueries are parsed recursively; everything else
    /// is kept as source text. With `item` set, an identifier directly after
    /// an operand ends the expression as an implicit alias.
    fn expr(&mut self, stops: &[&str], item: bool) -> Result<Expr, Error> {
        let mut terms = Vec::new();
        let mut seg_start: Option<usize> = None;
        let mut last_end = 0;
        let mut depth = 0usize;
        let mut prev_operand = false;
        let mut prev_dot = false;

        while let Some(tok) = self.peek().cloned() {
            let word = self.text(&tok).to_owned();
            if depth == 0 && !prev_dot {
                if self.tok_is_punct(&tok, ",") || self.tok_is_punct(&tok, ")") {
                    break;
                }
                if tok.kind == TokenKind::Ident {
                    if stops.iter().any(|s| s.eq_ignore_ascii_case(&word)) {
                        break;
                    }
                    if item
                        && (word.eq_ignore_ascii_case("as")
                            || (prev_operand && !is_keyword(&word) && !is_value_kw(&word)))
                    {
                        break;
                    }
                }
            }

            if self.subquery_ahead() {
                let from = seg_start.unwrap_or(tok.start);
                terms.push(Term::Text(self.src[from..tok.end].to_owned()));
                self.pos += 1;
                let inner = self.query_expression()?;
                let close = self.expect_punct(")")?;
                terms.push(Term::Subquery(Box::new(inner)));
                seg_start = Some(close.start);
                last_end = close.end;
                prev_operand = true;
                prev_dot = false;
                continue;
            }

            if self.tok_is_punct(&tok, "(") {
                depth += 1;
            } else if self.tok_is_punct(&tok, ")") {
                depth -= 1;
            }
            seg_start.get_or_insert(tok.start);
            last_end = tok.end;
            self.pos += 1;

            prev_dot = self.tok_is_punct(&tok, ".");
            prev_operand = match tok.kind {
                TokenKind::Ident => !is_keyword(&word),
                TokenKind::Punct => word == ")",
                _ => true,
            };
        }

        if depth > 0 {
            return Err(syntax(self.offset(), "unbalanced parentheses"));
        }
        if let Some(start) = seg_start {
            terms.push(Term::Text(self.src[start..last_end].to_owned()));
        }
        if terms.is_empty() {
            return Err(syntax(self.offset(), "expected expression"));
        }
        Ok(Expr { terms })
    }
}

fn is_value_kw(word: &str) -> bool {
    VALUE_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn select(src: &str) -> QueryExpression {
        parse_select(src).unwrap()
    }

    #[test]
    fn simple_select() {
        let q = select("SELECT u FROM User u WHERE u.lastname = :lastname");
        let s = q.primary().unwrap();
        assert_eq!(s.primary_alias(), Some("u"));
        assert_eq!(
            s.where_clause.as_ref().and_then(Expr::as_plain),
            Some("u.lastname = :lastname")
        );
        assert_eq!(s.select.as_ref().unwrap().items[0].expr.as_path(), Some("u"));
    }

    #[test]
    fn union_keeps_order_on_last_branch() {
        let q = select("select a.x from A a union select b.x from B b order by x");
        assert_eq!(q.operators, vec![SetOperator::Union]);
        assert!(q.branches[0].order_by.is_empty());
        assert_eq!(q.branches[1].order_by.len(), 1);
    }

    #[test]
    fn aliases_explicit_and_implicit() {
        let q = select("select u.name as n, count(u) c, u.age from User u group by u.name, u.age");
        let items = &q.primary().unwrap().select.as_ref().unwrap().items;
        assert_eq!(items[0].alias.as_deref(), Some("n"));
        assert_eq!(items[1].alias.as_deref(), Some("c"));
        assert_eq!(items[2].alias, None);
    }

    #[test]
    fn joins_and_subqueries() {
        let q = select(
            "select u from User u left join fetch u.roles r join (select m from Manager m) mm \
             where u.id in (select x.id from X x order by x.id) order by u.id limit 10",
        );
        let s = q.primary().unwrap();
        let joins = &s.from[0].joins;
        assert_eq!(joins[0].kind, "left join fetch");
        assert_eq!(joins[0].alias.as_deref(), Some("r"));
        assert!(matches!(joins[1].target, JoinTarget::Subquery(_)));
        assert_eq!(joins[1].alias.as_deref(), Some("mm"));
        let terms = &s.where_clause.as_ref().unwrap().terms;
        assert!(matches!(terms[1], Term::Subquery(_)));
        assert_eq!(terms[0], Term::Text("u.id in (".to_owned()));
        assert!(q.branches[0].paging.is_some());
    }

    #[test]
    fn constructor_expression_detected() {
        let q = select("select new com.acme.UserDto(u.firstname, u.lastname) from User u");
        let item = &q.primary().unwrap().select.as_ref().unwrap().items[0];
        assert_eq!(item.expr.constructor_class(), Some("com.acme.UserDto"));
    }

    #[test]
    fn modifying_statements_pass_through() {
        let st = parse("update User u set u.active = false where u.id = ?1").unwrap();
        assert!(matches!(st, Statement::Modifying(_)));
    }

    #[test]
    fn syntax_error_has_offset() {
        let err = parse("select u from").unwrap_err();
        assert!(matches!(err, Error::QuerySyntax { offset: 13, .. }));
        assert!(parse("select u from User u where (u.a = 1").is_err());
    }
}
