use serde_json::Value;

use super::lexer::{tokenize, Keyword, Spanned, Token};
use super::ParseError;

/// Deepest expression nesting accepted by the parser.
const MAX_DEPTH: usize = 256;

/// Variables bound by the caller on every evaluation.
pub(crate) const GLOBAL_VARS: &[&str] = &["line"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ObjectKey {
    Literal(String),
    Expr(Ast),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Ast {
    Identity,
    Literal(Value),
    Index(Box<Ast>, Box<Ast>),
    Slice(Box<Ast>, Option<Box<Ast>>, Option<Box<Ast>>),
    Iterate(Box<Ast>),
    Pipe(Box<Ast>, Box<Ast>),
    /// `a, b, c` as one flat list so long lists do not nest
    Comma(Vec<Ast>),
    Alt(Box<Ast>, Box<Ast>),
    And(Box<Ast>, Box<Ast>),
    Or(Box<Ast>, Box<Ast>),
    Binary(BinOp, Box<Ast>, Box<Ast>),
    Neg(Box<Ast>),
    Array(Option<Box<Ast>>),
    Object(Vec<(ObjectKey, Ast)>),
    If(Box<Ast>, Box<Ast>, Option<Box<Ast>>),
    Try(Box<Ast>, Option<Box<Ast>>),
    Var(String),
    Bind(Box<Ast>, String, Box<Ast>),
    Call(String, Vec<Ast>),
}

pub(crate) fn parse(input: &str) -> Result<Ast, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        end: input.chars().count(),
        scope: GLOBAL_VARS.iter().map(|v| v.to_string()).collect(),
    };
    if parser.tokens.is_empty() {
        return Err(ParseError::new("empty expression", 0));
    }
    let ast = parser.parse_pipe()?;
    if let Some(spanned) = parser.tokens.get(parser.pos) {
        return Err(ParseError::new(
            format!("unexpected token {}", describe(&spanned.token)),
            spanned.offset,
        ));
    }
    Ok(ast)
}

fn describe(token: &Token) -> String {
    match token {
        Token::Dot => "'.'".to_string(),
        Token::DotDot => "'..'".to_string(),
        Token::Field(name) => format!("'.{}'", name),
        Token::Ident(name) => format!("'{}'", name),
        Token::Keyword(kw) => format!("{:?}", kw).to_lowercase(),
        Token::Var(name) => format!("'${}'", name),
        Token::Number(n) => format!("number {}", n),
        Token::Str(s) => format!("string {:?}", s),
        Token::LParen => "'('".to_string(),
        Token::RParen => "')'".to_string(),
        Token::LBracket => "'['".to_string(),
        Token::RBracket => "']'".to_string(),
        Token::LBrace => "'{'".to_string(),
        Token::RBrace => "'}'".to_string(),
        Token::Pipe => "'|'".to_string(),
        Token::Comma => "','".to_string(),
        Token::Colon => "':'".to_string(),
        Token::Semicolon => "';'".to_string(),
        Token::Question => "'?'".to_string(),
        Token::Alt => "'//'".to_string(),
        Token::Eq => "'=='".to_string(),
        Token::Ne => "'!='".to_string(),
        Token::Lt => "'<'".to_string(),
        Token::Le => "'<='".to_string(),
        Token::Gt => "'>'".to_string(),
        Token::Ge => "'>='".to_string(),
        Token::Plus => "'+'".to_string(),
        Token::Minus => "'-'".to_string(),
        Token::Star => "'*'".to_string(),
        Token::Slash => "'/'".to_string(),
        Token::Percent => "'%'".to_string(),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    end: usize,
    /// Variables visible at the current position.
    scope: Vec<String>,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|s| s.offset)
            .unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        if self.eat(&expected) {
            return Ok(());
        }
        let found = match self.peek() {
            Some(token) => describe(token),
            None => "end of input".to_string(),
        };
        Err(ParseError::new(
            format!("expected {} but found {}", describe(&expected), found),
            self.offset(),
        ))
    }

    fn unexpected(&self) -> ParseError {
        match self.peek() {
            Some(token) => ParseError::new(
                format!("unexpected token {}", describe(token)),
                self.offset(),
            ),
            None => ParseError::new("unexpected end of input", self.end),
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ParseError::new("expression is nested too deeply", self.offset()));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_pipe(&mut self) -> Result<Ast, ParseError> {
        self.enter()?;
        let result = self.parse_pipe_inner();
        self.leave();
        result
    }

    fn parse_pipe_inner(&mut self) -> Result<Ast, ParseError> {
        let lhs = self.parse_comma()?;

        // `term as $name | body`
        if self.eat(&Token::Keyword(Keyword::As)) {
            let name = match self.advance() {
                Some(Token::Var(name)) => name,
                _ => {
                    return Err(ParseError::new(
                        "expected variable after 'as'",
                        self.offset(),
                    ))
                }
            };
            self.expect(Token::Pipe)?;
            self.scope.push(name.clone());
            let body = self.parse_pipe();
            self.scope.pop();
            return Ok(Ast::Bind(Box::new(lhs), name, Box::new(body?)));
        }

        if self.eat(&Token::Pipe) {
            let rhs = self.parse_pipe()?;
            return Ok(Ast::Pipe(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn check_var(&self, name: &str, offset: usize) -> Result<(), ParseError> {
        if self.scope.iter().any(|bound| bound == name) {
            Ok(())
        } else {
            Err(ParseError::new(format!("${} is not defined", name), offset))
        }
    }

    fn parse_comma(&mut self) -> Result<Ast, ParseError> {
        let first = self.parse_alt()?;
        if self.peek() != Some(&Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            items.push(self.parse_alt()?);
        }
        Ok(Ast::Comma(items))
    }

    fn parse_alt(&mut self) -> Result<Ast, ParseError> {
        let lhs = self.parse_or()?;
        if self.eat(&Token::Alt) {
            self.enter()?;
            let rhs = self.parse_alt();
            self.leave();
            return Ok(Ast::Alt(Box::new(lhs), Box::new(rhs?)));
        }
        Ok(lhs)
    }

    fn parse_or(&mut self) -> Result<Ast, ParseError> {
        let mark = self.depth;
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Keyword(Keyword::Or)) {
            self.enter()?;
            let rhs = self.parse_and()?;
            lhs = Ast::Or(Box::new(lhs), Box::new(rhs));
        }
        self.depth = mark;
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Ast, ParseError> {
        let mark = self.depth;
        let mut lhs = self.parse_compare()?;
        while self.eat(&Token::Keyword(Keyword::And)) {
            self.enter()?;
            let rhs = self.parse_compare()?;
            lhs = Ast::And(Box::new(lhs), Box::new(rhs));
        }
        self.depth = mark;
        Ok(lhs)
    }

    fn compare_op(&self) -> Option<BinOp> {
        Some(match self.peek()? {
            Token::Eq => BinOp::Eq,
            Token::Ne => BinOp::Ne,
            Token::Lt => BinOp::Lt,
            Token::Le => BinOp::Le,
            Token::Gt => BinOp::Gt,
            Token::Ge => BinOp::Ge,
            _ => return None,
        })
    }

    fn parse_compare(&mut self) -> Result<Ast, ParseError> {
        let lhs = self.parse_additive()?;
        if let Some(op) = self.compare_op() {
            self.pos += 1;
            let rhs = self.parse_additive()?;
            if self.compare_op().is_some() {
                return Err(ParseError::new(
                    "comparison operators cannot be chained",
                    self.offset(),
                ));
            }
            return Ok(Ast::Binary(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Ast, ParseError> {
        let mark = self.depth;
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            self.enter()?;
            let rhs = self.parse_multiplicative()?;
            lhs = Ast::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = mark;
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Ast, ParseError> {
        let mark = self.depth;
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            self.pos += 1;
            self.enter()?;
            let rhs = self.parse_unary()?;
            lhs = Ast::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = mark;
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Ast, ParseError> {
        if self.eat(&Token::Minus) {
            self.enter()?;
            let operand = self.parse_unary();
            self.leave();
            return Ok(Ast::Neg(Box::new(operand?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Ast, ParseError> {
        self.enter()?;
        let result = self.parse_postfix_inner();
        self.leave();
        result
    }

    fn parse_postfix_inner(&mut self) -> Result<Ast, ParseError> {
        let mark = self.depth;
        let mut term = self.parse_primary()?;
        loop {
            self.enter()?;
            match self.peek() {
                Some(Token::Field(name)) => {
                    let key = Ast::Literal(Value::String(name.clone()));
                    self.pos += 1;
                    term = Ast::Index(Box::new(term), Box::new(key));
                }
                Some(Token::Dot) => match self.tokens.get(self.pos + 1).map(|s| &s.token) {
                    Some(Token::Str(name)) => {
                        let key = Ast::Literal(Value::String(name.clone()));
                        self.pos += 2;
                        term = Ast::Index(Box::new(term), Box::new(key));
                    }
                    Some(Token::LBracket) => {
                        self.pos += 1;
                        term = self.parse_bracket_suffix(term)?;
                    }
                    _ => break,
                },
                Some(Token::LBracket) => {
                    term = self.parse_bracket_suffix(term)?;
                }
                Some(Token::Question) => {
                    self.pos += 1;
                    term = Ast::Try(Box::new(term), None);
                }
                _ => break,
            }
        }
        self.depth = mark;
        Ok(term)
    }

    /// Parses `[]`, `[e]`, `[e:]`, `[:e]`, `[e:e]` after a term.
    fn parse_bracket_suffix(&mut self, term: Ast) -> Result<Ast, ParseError> {
        self.expect(Token::LBracket)?;
        if self.eat(&Token::RBracket) {
            return Ok(Ast::Iterate(Box::new(term)));
        }
        if self.eat(&Token::Colon) {
            let to = self.parse_pipe()?;
            self.expect(Token::RBracket)?;
            return Ok(Ast::Slice(Box::new(term), None, Some(Box::new(to))));
        }
        let index = self.parse_pipe()?;
        if self.eat(&Token::Colon) {
            if self.eat(&Token::RBracket) {
                return Ok(Ast::Slice(Box::new(term), Some(Box::new(index)), None));
            }
            let to = self.parse_pipe()?;
            self.expect(Token::RBracket)?;
            return Ok(Ast::Slice(
                Box::new(term),
                Some(Box::new(index)),
                Some(Box::new(to)),
            ));
        }
        self.expect(Token::RBracket)?;
        Ok(Ast::Index(Box::new(term), Box::new(index)))
    }

    fn parse_primary(&mut self) -> Result<Ast, ParseError> {
        let token = match self.peek() {
            Some(token) => token.clone(),
            None => return Err(self.unexpected()),
        };

        match token {
            Token::Dot => {
                self.pos += 1;
                if let Some(Token::Str(name)) = self.peek() {
                    let key = Ast::Literal(Value::String(name.clone()));
                    self.pos += 1;
                    return Ok(Ast::Index(Box::new(Ast::Identity), Box::new(key)));
                }
                Ok(Ast::Identity)
            }
            Token::DotDot => {
                self.pos += 1;
                Ok(Ast::Call("recurse".to_string(), Vec::new()))
            }
            Token::Field(name) => {
                self.pos += 1;
                Ok(Ast::Index(
                    Box::new(Ast::Identity),
                    Box::new(Ast::Literal(Value::String(name))),
                ))
            }
            Token::Number(n) => {
                self.pos += 1;
                Ok(Ast::Literal(super::eval::number(n)))
            }
            Token::Str(s) => {
                self.pos += 1;
                Ok(Ast::Literal(Value::String(s)))
            }
            Token::Keyword(Keyword::True) => {
                self.pos += 1;
                Ok(Ast::Literal(Value::Bool(true)))
            }
            Token::Keyword(Keyword::False) => {
                self.pos += 1;
                Ok(Ast::Literal(Value::Bool(false)))
            }
            Token::Keyword(Keyword::Null) => {
                self.pos += 1;
                Ok(Ast::Literal(Value::Null))
            }
            Token::Keyword(Keyword::If) => {
                self.pos += 1;
                self.parse_if_rest()
            }
            Token::Keyword(Keyword::Try) => {
                self.pos += 1;
                let body = self.parse_postfix()?;
                let handler = if self.eat(&Token::Keyword(Keyword::Catch)) {
                    Some(Box::new(self.parse_postfix()?))
                } else {
                    None
                };
                Ok(Ast::Try(Box::new(body), handler))
            }
            Token::LParen => {
                self.pos += 1;
                let inner = self.parse_pipe()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                self.pos += 1;
                if self.eat(&Token::RBracket) {
                    return Ok(Ast::Array(None));
                }
                let inner = self.parse_pipe()?;
                self.expect(Token::RBracket)?;
                Ok(Ast::Array(Some(Box::new(inner))))
            }
            Token::LBrace => {
                self.pos += 1;
                self.parse_object_rest()
            }
            Token::Var(name) => {
                self.check_var(&name, self.offset())?;
                self.pos += 1;
                Ok(Ast::Var(name))
            }
            Token::Ident(name) => {
                let start = self.offset();
                self.pos += 1;
                let mut args = Vec::new();
                if self.eat(&Token::LParen) {
                    loop {
                        args.push(self.parse_pipe()?);
                        if self.eat(&Token::Semicolon) {
                            continue;
                        }
                        self.expect(Token::RParen)?;
                        break;
                    }
                }
                if !super::eval::is_builtin(&name, args.len()) {
                    return Err(ParseError::new(
                        format!("{}/{} is not defined", name, args.len()),
                        start,
                    ));
                }
                Ok(Ast::Call(name, args))
            }
            _ => Err(self.unexpected()),
        }
    }

    /// After `if`: `cond then a (elif cond then b)* (else c)? end`
    fn parse_if_rest(&mut self) -> Result<Ast, ParseError> {
        let cond = self.parse_pipe()?;
        self.expect(Token::Keyword(Keyword::Then))?;
        let then = self.parse_pipe()?;
        let otherwise = if self.eat(&Token::Keyword(Keyword::Elif)) {
            self.enter()?;
            let nested = self.parse_if_rest();
            self.leave();
            return Ok(Ast::If(
                Box::new(cond),
                Box::new(then),
                Some(Box::new(nested?)),
            ));
        } else if self.eat(&Token::Keyword(Keyword::Else)) {
            Some(Box::new(self.parse_pipe()?))
        } else {
            None
        };
        self.expect(Token::Keyword(Keyword::End))?;
        Ok(Ast::If(Box::new(cond), Box::new(then), otherwise))
    }

    /// After `{`: `key: value, key, "key": value, (expr): value }`
    fn parse_object_rest(&mut self) -> Result<Ast, ParseError> {
        let mut entries = Vec::new();
        if self.eat(&Token::RBrace) {
            return Ok(Ast::Object(entries));
        }
        loop {
            let key = match self.advance() {
                Some(Token::Ident(name)) => ObjectKey::Literal(name),
                Some(Token::Keyword(kw)) => ObjectKey::Literal(format!("{:?}", kw).to_lowercase()),
                Some(Token::Str(name)) => ObjectKey::Literal(name),
                Some(Token::Var(name)) => {
                    self.check_var(&name, self.tokens[self.pos - 1].offset)?;
                    entries.push((ObjectKey::Literal(name.clone()), Ast::Var(name)));
                    if self.eat(&Token::Comma) {
                        continue;
                    }
                    self.expect(Token::RBrace)?;
                    break;
                }
                Some(Token::LParen) => {
                    let expr = self.parse_pipe()?;
                    self.expect(Token::RParen)?;
                    ObjectKey::Expr(expr)
                }
                _ => {
                    self.pos = self.pos.saturating_sub(1);
                    return Err(ParseError::new("expected object key", self.offset()));
                }
            };

            let value = if self.eat(&Token::Colon) {
                self.parse_object_value()?
            } else {
                match &key {
                    ObjectKey::Literal(name) => Ast::Index(
                        Box::new(Ast::Identity),
                        Box::new(Ast::Literal(Value::String(name.clone()))),
                    ),
                    ObjectKey::Expr(_) => {
                        return Err(ParseError::new(
                            "computed object key needs a value",
                            self.offset(),
                        ))
                    }
                }
            };
            entries.push((key, value));

            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(Token::RBrace)?;
            break;
        }
        Ok(Ast::Object(entries))
    }

    /// Object values bind tighter than `,` so `{a: 1, b: 2}` splits on commas.
    fn parse_object_value(&mut self) -> Result<Ast, ParseError> {
        let mut value = self.parse_alt()?;
        while self.eat(&Token::Pipe) {
            let rhs = self.parse_alt()?;
            value = Ast::Pipe(Box::new(value), Box::new(rhs));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(name: &str) -> Ast {
        Ast::Index(Box::new(Ast::Identity), Box::new(Ast::Literal(json!(name))))
    }

    #[test]
    fn test_parse_field_chain() {
        let ast = parse(".a.b").unwrap();
        assert_eq!(
            ast,
            Ast::Index(Box::new(field("a")), Box::new(Ast::Literal(json!("b"))))
        );
    }

    #[test]
    fn test_parse_precedence() {
        // `and` binds tighter than `or`, comparison tighter than `and`
        let ast = parse(".a == 1 or .b and .c").unwrap();
        match ast {
            Ast::Or(lhs, rhs) => {
                assert!(matches!(*lhs, Ast::Binary(BinOp::Eq, _, _)));
                assert!(matches!(*rhs, Ast::And(_, _)));
            }
            other => panic!("unexpected ast: {:?}", other),
        }
    }

    #[test]
    fn test_parse_pipe_is_lowest() {
        let ast = parse(".a, .b | length").unwrap();
        assert!(matches!(ast, Ast::Pipe(lhs, _) if matches!(&*lhs, Ast::Comma(items) if items.len() == 2)));
    }

    #[test]
    fn test_parse_call_with_args() {
        let ast = parse("test(\"x\"; \"i\")").unwrap();
        assert_eq!(
            ast,
            Ast::Call(
                "test".into(),
                vec![Ast::Literal(json!("x")), Ast::Literal(json!("i"))]
            )
        );
    }

    #[test]
    fn test_parse_bind() {
        let ast = parse(".a as $x | $x").unwrap();
        assert_eq!(
            ast,
            Ast::Bind(Box::new(field("a")), "x".into(), Box::new(Ast::Var("x".into())))
        );
    }

    #[test]
    fn test_parse_object_shorthand() {
        let ast = parse("{id, name: .n}").unwrap();
        assert_eq!(
            ast,
            Ast::Object(vec![
                (ObjectKey::Literal("id".into()), field("id")),
                (ObjectKey::Literal("name".into()), field("n")),
            ])
        );
    }

    #[test]
    fn test_parse_slices_and_iterate() {
        assert!(matches!(parse(".[]").unwrap(), Ast::Iterate(_)));
        assert!(matches!(parse(".a[1:]").unwrap(), Ast::Slice(_, Some(_), None)));
        assert!(matches!(parse(".[:2]").unwrap(), Ast::Slice(_, None, Some(_))));
        assert!(matches!(parse(".a[]?").unwrap(), Ast::Try(_, None)));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("").is_err());
        assert!(parse("   ").is_err());
        assert!(parse(".a ==").is_err());
        assert!(parse("(.a").is_err());
        assert!(parse(".a == 1 == 2").is_err());
        assert!(parse("if .a then 1").is_err());
        assert!(parse(".a )").is_err());
    }

    #[test]
    fn test_unknown_names_are_rejected() {
        assert!(parse("$line").is_ok());
        assert!(parse("$nope").unwrap_err().message.contains("$nope"));
        assert!(parse("frobnicate").unwrap_err().message.contains("frobnicate/0"));
        assert!(parse("length(1)").is_err());
        assert!(parse(".a as $x | $x").is_ok());
        assert!(parse("(.a as $x | $x), $x").is_err());
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let deep = format!("{}.{}", "(".repeat(400), ")".repeat(400));
        let err = parse(&deep).unwrap_err();
        assert!(err.message.contains("nested too deeply"));

        let long_chain = vec!["1"; 1000].join(" + ");
        assert!(parse(&long_chain).is_err());
        assert!(parse(&vec!["1"; 50].join(" + ")).is_ok());
    }

    #[test]
    fn test_long_comma_lists_stay_flat() {
        let ids: Vec<String> = (1..=2000).map(|n| n.to_string()).collect();
        let ast = parse(&format!("$line | IN({})", ids.join(", "))).unwrap();
        match ast {
            Ast::Pipe(_, rhs) => match *rhs {
                Ast::Call(name, args) => {
                    assert_eq!(name, "IN");
                    assert!(matches!(&args[0], Ast::Comma(items) if items.len() == 2000));
                }
                other => panic!("unexpected ast: {:?}", other),
            },
            other => panic!("unexpected ast: {:?}", other),
        }
    }
}
