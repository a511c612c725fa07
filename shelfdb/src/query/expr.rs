use crate::error::{Result, ShelfError};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Key token that addresses array elements themselves instead of a property.
pub const ITEM_KEY: &str = "$item";

/// Comparison operators of the filter language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    /// `===`: only meaningful when addressing array elements.
    StrictEq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Operator {
    pub fn parse(token: &str) -> Result<Self> {
        Ok(match token {
            "=" => Operator::Eq,
            "===" => Operator::StrictEq,
            "!=" => Operator::Ne,
            ">" => Operator::Gt,
            ">=" => Operator::Gte,
            "<" => Operator::Lt,
            "<=" => Operator::Lte,
            other => return Err(ShelfError::Query(format!("unknown operator '{other}'"))),
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::StrictEq => "===",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Bool(bool),
    Null,
    Undefined,
    Number(f64),
    Text(String),
}

impl Literal {
    /// `$true`, `$false`, `$null` and `$undefined` are symbols; quotes force text;
    /// anything that reads as a number is a number.
    pub fn parse(token: &str) -> Literal {
        let token = token.trim();
        match token {
            "$true" => return Literal::Bool(true),
            "$false" => return Literal::Bool(false),
            "$null" => return Literal::Null,
            "$undefined" => return Literal::Undefined,
            _ => {}
        }
        for quote in ['"', '\''] {
            if token.len() >= 2 && token.starts_with(quote) && token.ends_with(quote) {
                return Literal::Text(token[1..token.len() - 1].to_string());
            }
        }
        if number_pattern().map_or(false, |pattern| pattern.is_match(token)) {
            if let Ok(n) = token.parse::<f64>() {
                return Literal::Number(n);
            }
        }
        Literal::Text(token.to_string())
    }
}

/// One `<path> <op> <literal>` comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub path: String,
    pub op: Operator,
    pub literal: Literal,
}

impl Expr {
    pub fn parse(text: &str) -> Result<Self> {
        let captures = expr_pattern()?
            .captures(text)
            .ok_or_else(|| ShelfError::Query(format!("malformed expression '{text}'")))?;
        let literal = captures[3].trim();
        if literal.is_empty() {
            return Err(ShelfError::Query(format!("expression '{text}' has no value")));
        }
        Ok(Expr {
            path: captures[1].to_string(),
            op: Operator::parse(&captures[2])?,
            literal: Literal::parse(literal),
        })
    }

    /// Build from the three tokens of an array sub-filter.
    pub fn from_tokens(key: &str, op: &str, literal: &str) -> Result<Self> {
        if key.trim().is_empty() {
            return Err(ShelfError::Query("array filter needs a key or '$item'".into()));
        }
        Ok(Expr {
            path: key.trim().to_string(),
            op: Operator::parse(op.trim())?,
            literal: Literal::parse(literal),
        })
    }

    pub fn addresses_item(&self) -> bool {
        self.path == ITEM_KEY
    }
}

fn expr_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    compiled(&PATTERN, r"^\s*([^\s=!<>]+)\s*(===|==|!=|>=|<=|=|>|<)\s*(.*?)\s*$")
}

fn number_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    compiled(&PATTERN, r"^-?\d+(\.\d+)?([eE][+-]?\d+)?$")
}

fn compiled(
    cell: &'static OnceLock<std::result::Result<Regex, regex::Error>>,
    pattern: &str,
) -> Result<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern))
        .as_ref()
        .map_err(|e| ShelfError::Query(format!("invalid pattern: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_basic_expressions() {
        let expr = Expr::parse("age > 16").unwrap();
        assert_eq!(expr.path, "age");
        assert_eq!(expr.op, Operator::Gt);
        assert_eq!(expr.literal, Literal::Number(16.0));

        let expr = Expr::parse("address.city!=Oslo").unwrap();
        assert_eq!(expr.op, Operator::Ne);
        assert_eq!(expr.literal, Literal::Text("Oslo".into()));

        assert_eq!(Expr::parse("level === 2").unwrap().op, Operator::StrictEq);
        assert_eq!(Expr::parse("tags.length >= 3").unwrap().path, "tags.length");
    }

    #[test]
    fn test_symbolic_and_quoted_literals() {
        assert_eq!(Literal::parse("$true"), Literal::Bool(true));
        assert_eq!(Literal::parse("$null"), Literal::Null);
        assert_eq!(Literal::parse("$undefined"), Literal::Undefined);
        assert_eq!(Literal::parse("'Tom Smith'"), Literal::Text("Tom Smith".into()));
        assert_eq!(Literal::parse("\"16\""), Literal::Text("16".into()));
        assert_eq!(Literal::parse("-2.5"), Literal::Number(-2.5));
        assert_eq!(Literal::parse("1e3"), Literal::Number(1000.0));
        assert_eq!(Literal::parse("NaN"), Literal::Text("NaN".into()));

        let expr = Expr::parse("name = \"Tom Smith\"").unwrap();
        assert_eq!(expr.literal, Literal::Text("Tom Smith".into()));
    }

    #[test]
    fn test_malformed_expressions() {
        assert!(matches!(Expr::parse("age").unwrap_err(), ShelfError::Query(_)));
        assert!(Expr::parse("age >").is_err());
        assert!(Expr::parse("> 3").is_err());
        assert!(Expr::from_tokens("x", "~", "1").is_err());

        let err = Expr::parse("age == 2").unwrap_err();
        assert_eq!(err.to_string(), "Query error: unknown operator '=='");
        assert!(Expr::from_tokens("$item", "==", "1").is_err());
    }
}
