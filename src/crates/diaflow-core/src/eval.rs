//! Built-in boolean expression evaluator for condition nodes
//!
//! Condition nodes evaluate expressions like `x > 3 && status == "ok"`
//! against a context assembled from the node's inputs and upstream
//! outputs. Deployments can plug their own evaluator through the
//! `CONDITION_EVALUATION_SERVICE` key; this module is the fallback used
//! when none is registered.
//!
//! Supported surface:
//!
//! - literals: numbers, `"strings"`, `true`, `false`, `null`
//! - variables: bare identifiers and `{{name}}` template references
//! - comparisons: `==`, `!=`, `===`, `!==`, `>`, `>=`, `<`, `<=`
//! - boolean operators: `&&`/`and`, `||`/`or`, `!`/`not`, parentheses
//!
//! Unknown variables resolve to `null`. Evaluation never panics; a
//! malformed expression yields an error the condition handler maps to a
//! `false` result with diagnostics.

use crate::error::{DiagramError, Result};
use crate::ports::ConditionEvaluator;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Fallback [`ConditionEvaluator`] with no external dependencies.
pub struct BasicConditionEvaluator;

#[async_trait]
impl ConditionEvaluator for BasicConditionEvaluator {
    async fn evaluate(&self, expression: &str, context: &Value) -> Result<bool> {
        evaluate_expression(expression, context)
    }
}

/// Evaluate a boolean expression against a JSON context object.
pub fn evaluate_expression(expression: &str, context: &Value) -> Result<bool> {
    // `{{name}}` template references are plain variable lookups.
    static TEMPLATE: OnceLock<Regex> = OnceLock::new();
    let template = TEMPLATE.get_or_init(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").unwrap());
    let normalized = template.replace_all(expression, "$1");

    let tokens = tokenize(&normalized)
        .map_err(|e| DiagramError::Validation(format!("invalid condition '{expression}': {e}")))?;
    let mut parser = Parser {
        tokens,
        position: 0,
        context,
    };
    let value = parser.parse_or()?;
    if parser.position != parser.tokens.len() {
        return Err(DiagramError::Validation(format!(
            "invalid condition '{expression}': unexpected trailing tokens"
        )));
    }
    Ok(truthy(&value))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Op(String),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    value.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err("unterminated string literal".into());
                }
                i += 1; // closing quote
                tokens.push(Token::Str(value));
            }
            '=' | '!' | '<' | '>' | '&' | '|' => {
                // Longest-match against the known operator set.
                const OPS: [&str; 11] = [
                    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!",
                ];
                let rest: String = chars[i..].iter().take(3).collect();
                let matched = OPS.iter().find(|op| rest.starts_with(**op));
                match matched {
                    Some(op) => {
                        tokens.push(Token::Op((*op).to_string()));
                        i += op.len();
                    }
                    None => return Err(format!("unknown operator starting at '{rest}'")),
                }
            }
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                let mut literal = String::new();
                literal.push(c);
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    literal.push(chars[i]);
                    i += 1;
                }
                let number = literal
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{literal}'"))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    ident.push(chars[i]);
                    i += 1;
                }
                match ident.as_str() {
                    "and" => tokens.push(Token::Op("&&".into())),
                    "or" => tokens.push(Token::Op("||".into())),
                    "not" => tokens.push(Token::Op("!".into())),
                    _ => tokens.push(Token::Ident(ident)),
                }
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    position: usize,
    context: &'a Value,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn eat_op(&mut self, ops: &[&str]) -> Option<String> {
        if let Some(Token::Op(op)) = self.peek() {
            if ops.contains(&op.as_str()) {
                let op = op.clone();
                self.position += 1;
                return Some(op);
            }
        }
        None
    }

    fn parse_or(&mut self) -> Result<Value> {
        let mut left = self.parse_and()?;
        while self.eat_op(&["||"]).is_some() {
            let right = self.parse_and()?;
            left = Value::Bool(truthy(&left) || truthy(&right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Value> {
        let mut left = self.parse_not()?;
        while self.eat_op(&["&&"]).is_some() {
            let right = self.parse_not()?;
            left = Value::Bool(truthy(&left) && truthy(&right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Value> {
        if self.eat_op(&["!"]).is_some() {
            let value = self.parse_not()?;
            return Ok(Value::Bool(!truthy(&value)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Value> {
        let left = self.parse_term()?;
        let Some(op) = self.eat_op(&["==", "===", "!=", "!==", ">=", "<=", ">", "<"]) else {
            return Ok(left);
        };
        let right = self.parse_term()?;

        let result = match op.as_str() {
            "==" | "===" => values_equal(&left, &right),
            "!=" | "!==" => !values_equal(&left, &right),
            op => {
                let (Some(a), Some(b)) = (as_number(&left), as_number(&right)) else {
                    // Ordering on non-numbers falls back to string compare.
                    let a = value_to_string(&left);
                    let b = value_to_string(&right);
                    return Ok(Value::Bool(match op {
                        ">" => a > b,
                        ">=" => a >= b,
                        "<" => a < b,
                        "<=" => a <= b,
                        _ => unreachable!(),
                    }));
                };
                match op {
                    ">" => a > b,
                    ">=" => a >= b,
                    "<" => a < b,
                    "<=" => a <= b,
                    _ => unreachable!(),
                }
            }
        };
        Ok(Value::Bool(result))
    }

    fn parse_term(&mut self) -> Result<Value> {
        match self.peek().cloned() {
            Some(Token::Number(n)) => {
                self.position += 1;
                Ok(serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null))
            }
            Some(Token::Str(s)) => {
                self.position += 1;
                Ok(Value::String(s))
            }
            Some(Token::Ident(name)) => {
                self.position += 1;
                Ok(match name.as_str() {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    "null" | "None" => Value::Null,
                    _ => self
                        .context
                        .get(&name)
                        .cloned()
                        .unwrap_or(Value::Null),
                })
            }
            Some(Token::LParen) => {
                self.position += 1;
                let value = self.parse_or()?;
                match self.peek() {
                    Some(Token::RParen) => {
                        self.position += 1;
                        Ok(value)
                    }
                    _ => Err(DiagramError::Validation(
                        "invalid condition: missing closing parenthesis".into(),
                    )),
                }
            }
            other => Err(DiagramError::Validation(format!(
                "invalid condition: unexpected token {other:?}"
            ))),
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(expr: &str, ctx: Value) -> bool {
        evaluate_expression(expr, &ctx).unwrap()
    }

    #[test]
    fn test_numeric_comparison() {
        assert!(eval("x > 3", json!({"x": 5})));
        assert!(!eval("x > 3", json!({"x": 2})));
        assert!(eval("x >= 5 && x <= 5", json!({"x": 5})));
    }

    #[test]
    fn test_string_equality_and_js_operators() {
        assert!(eval("status === \"ok\"", json!({"status": "ok"})));
        assert!(eval("status !== 'bad'", json!({"status": "ok"})));
    }

    #[test]
    fn test_boolean_connectives() {
        let ctx = json!({"a": 1, "b": 0});
        assert!(eval("a && !b", ctx.clone()));
        assert!(eval("b || a", ctx.clone()));
        assert!(eval("a and not b", ctx.clone()));
        assert!(!eval("a and b", ctx));
    }

    #[test]
    fn test_template_variable_syntax() {
        assert!(eval("{{count}} == 3", json!({"count": 3})));
    }

    #[test]
    fn test_unknown_variable_is_null() {
        assert!(!eval("missing", json!({})));
        assert!(eval("missing == null", json!({})));
    }

    #[test]
    fn test_parentheses_and_precedence() {
        let ctx = json!({"a": 1, "b": 0, "c": 1});
        assert!(eval("a && (b || c)", ctx.clone()));
        // && binds tighter than ||
        assert!(eval("b && c || a", ctx));
    }

    #[test]
    fn test_bare_literals() {
        assert!(eval("true", json!({})));
        assert!(!eval("false", json!({})));
        assert!(eval("1 < 2", json!({})));
    }

    #[test]
    fn test_malformed_expression_errors() {
        assert!(evaluate_expression("x >", &json!({"x": 1})).is_err());
        assert!(evaluate_expression("(x", &json!({"x": 1})).is_err());
        assert!(evaluate_expression("x ~ 1", &json!({"x": 1})).is_err());
    }
}
