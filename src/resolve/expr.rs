//! The embedded `${script:...}` expression language.
//!
//! Only a tiny, auditable subset is supported: string and integer literals,
//! `+` concatenation, parentheses, and calls to the two helper objects
//! (`PropertyLookup.getValue(name)` and `PathHelper.makeSafe(text)`).

use std::fmt;

use logos::Logos;

use crate::error::ResolveError;

/// Capabilities an expression may call into.
pub trait ScriptHelpers {
    /// Look a property up by name, resolving its value fully. Missing
    /// properties evaluate to an empty string.
    fn property(&mut self, name: &str) -> Result<String, ResolveError>;

    fn make_safe(&self, value: &str) -> String {
        make_safe(value)
    }
}

/// Evaluates the body of a `${script:...}` reference.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, expr: &str, helpers: &mut dyn ScriptHelpers) -> Result<String, ResolveError>;
}

/// Map arbitrary text to an identifier-safe string: anything that cannot
/// appear in an identifier becomes `_`.
pub fn make_safe(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '$' { c } else { '_' })
        .collect()
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum Token {
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"[0-9]+", |lex| lex.slice().to_string())]
    Int(String),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    #[regex(r#"'([^'\\]|\\.)*'"#, |lex| unescape(lex.slice()))]
    Str(String),

    #[token("+")]
    Plus,
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(";")]
    Semicolon,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(name) => write!(f, "identifier `{name}`"),
            Token::Int(value) => write!(f, "number {value}"),
            Token::Str(_) => write!(f, "string literal"),
            Token::Plus => write!(f, "`+`"),
            Token::Dot => write!(f, "`.`"),
            Token::Comma => write!(f, "`,`"),
            Token::LParen => write!(f, "`(`"),
            Token::RParen => write!(f, "`)`"),
            Token::Semicolon => write!(f, "`;`"),
        }
    }
}

fn unescape(quoted: &str) -> String {
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(String),
    Concat(Vec<Expr>),
    Call {
        object: String,
        method: String,
        args: Vec<Expr>,
    },
}

/// Deepest nesting of parentheses and call arguments the parser accepts.
const MAX_NESTING: usize = 64;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(source: &str) -> Result<Self, ResolveError> {
        let mut tokens = Vec::new();
        for (token, span) in Token::lexer(source).spanned() {
            match token {
                Ok(token) => tokens.push(token),
                Err(()) => {
                    return Err(ResolveError::Expression(format!(
                        "unexpected input `{}` at offset {}",
                        &source[span.clone()],
                        span.start
                    )));
                }
            }
        }
        Ok(Self {
            tokens,
            pos: 0,
            depth: 0,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ResolveError> {
        match self.advance() {
            Some(ref token) if token == expected => Ok(()),
            Some(token) => Err(self.error(format!("expected {expected}, found {token}"))),
            None => Err(self.error(format!("expected {expected}, found end of expression"))),
        }
    }

    fn error(&self, message: String) -> ResolveError {
        ResolveError::Expression(message)
    }

    fn parse_program(&mut self) -> Result<Expr, ResolveError> {
        let expr = self.parse_expr()?;
        if self.peek() == Some(&Token::Semicolon) {
            self.advance();
        }
        match self.advance() {
            None => Ok(expr),
            Some(token) => Err(self.error(format!("unexpected trailing {token}"))),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ResolveError> {
        if self.depth == MAX_NESTING {
            return Err(self.error("expression nested too deeply".into()));
        }
        self.depth += 1;
        let expr = self.parse_concat();
        self.depth -= 1;
        expr
    }

    fn parse_concat(&mut self) -> Result<Expr, ResolveError> {
        let mut parts = vec![self.parse_primary()?];
        while self.peek() == Some(&Token::Plus) {
            self.advance();
            parts.push(self.parse_primary()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Expr::Concat(parts)
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, ResolveError> {
        match self.advance() {
            Some(Token::Str(value)) | Some(Token::Int(value)) => Ok(Expr::Literal(value)),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(object)) => {
                self.expect(&Token::Dot)?;
                let method = match self.advance() {
                    Some(Token::Ident(method)) => method,
                    Some(token) => {
                        return Err(self.error(format!("expected method name, found {token}")));
                    }
                    None => return Err(self.error("expected method name".into())),
                };
                self.expect(&Token::LParen)?;
                let mut args = Vec::new();
                if self.peek() != Some(&Token::RParen) {
                    args.push(self.parse_expr()?);
                    while self.peek() == Some(&Token::Comma) {
                        self.advance();
                        args.push(self.parse_expr()?);
                    }
                }
                self.expect(&Token::RParen)?;
                Ok(Expr::Call {
                    object,
                    method,
                    args,
                })
            }
            Some(token) => Err(self.error(format!("unexpected {token}"))),
            None => Err(self.error("empty expression".into())),
        }
    }
}

fn eval(expr: &Expr, helpers: &mut dyn ScriptHelpers) -> Result<String, ResolveError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Concat(parts) => {
            let mut out = String::new();
            for part in parts {
                out.push_str(&eval(part, helpers)?);
            }
            Ok(out)
        }
        Expr::Call {
            object,
            method,
            args,
        } => {
            let [arg] = args.as_slice() else {
                return Err(ResolveError::Expression(format!(
                    "{object}.{method} takes exactly one argument, got {}",
                    args.len()
                )));
            };
            let arg = eval(arg, helpers)?;
            match (object.as_str(), method.as_str()) {
                ("PropertyLookup", "getValue") | ("PropertyLookup", "get") => helpers.property(&arg),
                ("PathHelper", "makeSafe") => Ok(helpers.make_safe(&arg)),
                _ => Err(ResolveError::Expression(format!(
                    "unsupported helper call {object}.{method}"
                ))),
            }
        }
    }
}

/// The built-in sandboxed evaluator: parses the expression and only ever
/// calls into the supplied helpers.
#[derive(Debug, Default, Clone, Copy)]
pub struct HelperScript;

impl ExpressionEvaluator for HelperScript {
    fn evaluate(&self, expr: &str, helpers: &mut dyn ScriptHelpers) -> Result<String, ResolveError> {
        let ast = Parser::new(expr)?.parse_program()?;
        eval(&ast, helpers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapHelpers {
        values: HashMap<&'static str, &'static str>,
        lookups: Vec<String>,
    }

    impl ScriptHelpers for MapHelpers {
        fn property(&mut self, name: &str) -> Result<String, ResolveError> {
            self.lookups.push(name.to_string());
            Ok(self.values.get(name).copied().unwrap_or_default().to_string())
        }
    }

    fn helpers() -> MapHelpers {
        MapHelpers {
            values: HashMap::from([("version", "1.2.3"), ("branch", "feature/x y")]),
            lookups: Vec::new(),
        }
    }

    #[test]
    fn make_safe_replaces_non_identifier_characters() {
        assert_eq!(make_safe("feature/x y-1.0"), "feature_x_y_1_0");
        assert_eq!(make_safe("already_safe$1"), "already_safe$1");
        assert_eq!(make_safe(""), "");
    }

    #[test]
    fn evaluates_property_lookup() {
        let mut h = helpers();
        let out = HelperScript
            .evaluate(r#"PropertyLookup.getValue("version")"#, &mut h)
            .unwrap();
        assert_eq!(out, "1.2.3");
        assert_eq!(h.lookups, vec!["version"]);
    }

    #[test]
    fn evaluates_nested_calls_and_concatenation() {
        let mut h = helpers();
        let out = HelperScript
            .evaluate(
                r#"'build-' + PathHelper.makeSafe(PropertyLookup.getValue("branch")) + "-" + 7;"#,
                &mut h,
            )
            .unwrap();
        assert_eq!(out, "build-feature_x_y-7");
    }

    #[test]
    fn missing_property_is_empty() {
        let mut h = helpers();
        let out = HelperScript
            .evaluate(r#"PropertyLookup.getValue("nope")"#, &mut h)
            .unwrap();
        assert_eq!(out, "");
    }

    #[test]
    fn string_escapes_are_decoded() {
        let mut h = helpers();
        let out = HelperScript.evaluate(r#""a\"b\\c\n""#, &mut h).unwrap();
        assert_eq!(out, "a\"b\\c\n");
    }

    #[test]
    fn unknown_helpers_are_rejected() {
        let mut h = helpers();
        let err = HelperScript
            .evaluate(r#"Runtime.exec("rm -rf /")"#, &mut h)
            .unwrap_err();
        assert!(matches!(err, ResolveError::Expression(msg) if msg.contains("Runtime.exec")));
    }

    fn nested(levels: usize) -> String {
        format!("{}'x'{}", "(".repeat(levels), ")".repeat(levels))
    }

    #[test]
    fn moderate_nesting_is_fine() {
        let mut h = helpers();
        assert_eq!(HelperScript.evaluate(&nested(32), &mut h).unwrap(), "x");
    }

    #[test]
    fn deep_nesting_is_an_error_not_a_crash() {
        let err = std::thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn(|| HelperScript.evaluate(&nested(200_000), &mut helpers()))
            .unwrap()
            .join()
            .unwrap()
            .unwrap_err();
        assert_eq!(err, ResolveError::Expression("expression nested too deeply".into()));
    }

    #[test]
    fn syntax_errors_are_reported() {
        let mut h = helpers();
        assert!(HelperScript.evaluate("", &mut h).is_err());
        assert!(HelperScript.evaluate("PathHelper.makeSafe(", &mut h).is_err());
        assert!(HelperScript.evaluate("'a' 'b'", &mut h).is_err());
        assert!(HelperScript.evaluate("#", &mut h).is_err());
        assert!(HelperScript.evaluate("PathHelper.makeSafe('a', 'b')", &mut h).is_err());
    }
}
