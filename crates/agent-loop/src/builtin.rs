//! Built-in Tools
//!
//! `calculator`, `datetime` and a memory-backed `search`, plus [`FnTool`] for
//! registering plain closures.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{AgentError, Result};
use crate::memory::MemoryStore;
use crate::tool::{ParameterSchema, Tool, ToolCall, ToolRegistry, ToolSchema};

const EXPRESSION_CHARS: &str = "0123456789+-*/^(). ";
const OPERATORS: &[char] = &['+', '-', '*', '/', '^'];

/// Calculator tool - evaluates arithmetic expressions
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "calculator".into(),
            description: "Evaluate an arithmetic expression using + - * / ^ and parentheses".into(),
            parameters: vec![ParameterSchema::required(
                "expression",
                "string",
                "Expression to evaluate (e.g., '2 + 2', '(3 + 4) * 5')",
            )],
            has_side_effects: false,
        }
    }

    async fn execute(&self, call: &ToolCall) -> Result<Value> {
        let expr = call
            .str_arg("expression")
            .ok_or_else(|| AgentError::ToolValidation("expression must be a string".into()))?;

        if let Some(bad) = expr.chars().find(|c| !EXPRESSION_CHARS.contains(*c)) {
            return Err(AgentError::ToolExecution(format!(
                "Invalid character '{bad}' in expression"
            )));
        }

        let result = evaluate_expression(expr).map_err(AgentError::ToolExecution)?;
        number_value(result).ok_or_else(|| AgentError::ToolExecution("Result is not finite".into()))
    }
}

/// Integral results become JSON integers so `15 * 8 + 42` yields `162`, not `162.0`
#[allow(clippy::cast_possible_truncation)]
fn number_value(x: f64) -> Option<Value> {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;

    if !x.is_finite() {
        return None;
    }
    if x.fract() == 0.0 && x.abs() < MAX_EXACT {
        return Some(json!(x as i64));
    }
    serde_json::Number::from_f64(x).map(Value::Number)
}

/// Deepest parenthesis nesting the calculator accepts
const MAX_DEPTH: usize = 64;

/// Longest expression the calculator accepts, in tokens
const MAX_TOKENS: usize = 65_536;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Token {
    Number(f64),
    Op(char),
    Open,
    Close,
}

fn tokenize(expr: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = expr.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        let token = match c {
            ' ' => continue,
            '(' => Token::Open,
            ')' => Token::Close,
            '+' | '-' | '*' | '/' | '^' => Token::Op(c),
            '0'..='9' | '.' => {
                let mut end = start + 1;
                while let Some(&(i, d)) = chars.peek() {
                    if !(d.is_ascii_digit() || d == '.') {
                        break;
                    }
                    end = i + 1;
                    chars.next();
                }
                let text = &expr[start..end];
                Token::Number(
                    text.parse()
                        .map_err(|_| format!("Invalid number '{text}'"))?,
                )
            }
            other => return Err(format!("Invalid character '{other}'")),
        };

        if tokens.len() == MAX_TOKENS {
            return Err(format!("Expression longer than {MAX_TOKENS} tokens"));
        }
        tokens.push(token);
    }

    Ok(tokens)
}

/// Operator waiting on the stack
#[derive(Clone, Copy, Debug)]
enum Pending {
    Open,
    Negate,
    Binary(char),
}

impl Pending {
    const fn precedence(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Binary('+' | '-') => 1,
            Self::Binary('*' | '/') => 2,
            Self::Negate => 3,
            Self::Binary(_) => 4,
        }
    }

    fn apply(self, values: &mut Vec<f64>) -> std::result::Result<(), String> {
        let malformed = || "Malformed expression".to_string();

        let right = values.pop().ok_or_else(malformed)?;
        let result = match self {
            Self::Negate => -right,
            Self::Binary(op) => {
                let left = values.pop().ok_or_else(malformed)?;
                match op {
                    '+' => left + right,
                    '-' => left - right,
                    '*' => left * right,
                    '/' if right == 0.0 => return Err("Division by zero".into()),
                    '/' => left / right,
                    _ => left.powf(right),
                }
            }
            Self::Open => return Err(malformed()),
        };

        values.push(result);
        Ok(())
    }
}

/// Iterative shunting-yard evaluation
///
/// Operands and operators must alternate: `2(3)` or `(1)(2)` are rejected
/// rather than read as products. `^` binds tighter than unary minus and is
/// right associative, so `-2 ^ 2` is `-4` and `2 ^ 3 ^ 2` is `512`.
fn evaluate_expression(expr: &str) -> std::result::Result<f64, String> {
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Err("Empty expression".into());
    }

    let mut values: Vec<f64> = Vec::new();
    let mut pending: Vec<Pending> = Vec::new();
    let mut depth = 0usize;
    let mut expect_operand = true;

    for token in tokens {
        match (expect_operand, token) {
            (true, Token::Number(n)) => {
                values.push(n);
                expect_operand = false;
            }
            (true, Token::Open) => {
                depth += 1;
                if depth > MAX_DEPTH {
                    return Err(format!("Parentheses nested deeper than {MAX_DEPTH}"));
                }
                pending.push(Pending::Open);
            }
            (true, Token::Op('-')) => pending.push(Pending::Negate),
            (true, Token::Op('+')) => {}
            (true, _) => return Err("Expected a number".into()),
            (false, Token::Op(op)) => {
                let incoming = Pending::Binary(op);
                while let Some(&top) = pending.last() {
                    let (held, next) = (top.precedence(), incoming.precedence());
                    if matches!(top, Pending::Open) || held < next || (held == next && op == '^') {
                        break;
                    }
                    pending.pop();
                    top.apply(&mut values)?;
                }
                pending.push(incoming);
                expect_operand = true;
            }
            (false, Token::Close) => {
                loop {
                    match pending.pop() {
                        Some(Pending::Open) => break,
                        Some(op) => op.apply(&mut values)?,
                        None => return Err("Unbalanced parentheses".into()),
                    }
                }
                depth -= 1;
            }
            (false, Token::Number(_) | Token::Open) => {
                return Err("Missing operator between operands".into());
            }
        }
    }

    if expect_operand {
        return Err("Expression ends without an operand".into());
    }
    while let Some(op) = pending.pop() {
        if matches!(op, Pending::Open) {
            return Err("Unbalanced parentheses".into());
        }
        op.apply(&mut values)?;
    }

    match values.as_slice() {
        [result] => Ok(*result),
        _ => Err("Malformed expression".into()),
    }
}

/// Longest arithmetic expression embedded in free text
///
/// A candidate needs at least two numbers and one operator, so prose like
/// "version 2" or "state-of-the-art" is ignored.
pub fn extract_expression(text: &str) -> Option<String> {
    text.split(|c: char| !EXPRESSION_CHARS.contains(c))
        .map(|run| run.trim().trim_end_matches('.').trim())
        .filter(|run| is_expression(run))
        .max_by_key(|run| run.len())
        .map(str::to_string)
}

fn is_expression(run: &str) -> bool {
    let mut numbers = 0;
    let mut in_number = false;
    for c in run.chars() {
        let digit = c.is_ascii_digit();
        if digit && !in_number {
            numbers += 1;
        }
        in_number = digit || (in_number && c == '.');
    }
    numbers >= 2 && run.contains(OPERATORS)
}

/// Whether free text asks for arithmetic
///
/// Stricter than [`extract_expression`]: `+`, `*` and `^` count between two
/// operands, while `-` and `/` only count with spaces on both sides, so
/// dates (`2024-01-15`, `1/15/2024`), phone numbers and version ranges stay
/// out of the calculator.
pub fn has_arithmetic(text: &str) -> bool {
    text.split(|c: char| !EXPRESSION_CHARS.contains(c))
        .filter(|run| is_expression(run))
        .any(has_binary_operator)
}

fn has_binary_operator(run: &str) -> bool {
    let chars: Vec<char> = run.chars().collect();

    chars.iter().enumerate().any(|(i, &c)| {
        if !OPERATORS.contains(&c) {
            return false;
        }
        let before = chars[..i].iter().rev().find(|b| **b != ' ');
        let after = chars[i + 1..].iter().find(|a| **a != ' ');
        let binary = before.is_some_and(|b| b.is_ascii_digit() || *b == ')')
            && after.is_some_and(|a| a.is_ascii_digit() || matches!(*a, '(' | '-' | '.'));
        let spaced = i > 0 && chars[i - 1] == ' ' && chars.get(i + 1) == Some(&' ');

        binary && (matches!(c, '+' | '*' | '^') || spaced)
    })
}

/// DateTime tool - returns the current time
pub struct DateTimeTool;

#[async_trait]
impl Tool for DateTimeTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "datetime".into(),
            description: "Get the current date and time (UTC)".into(),
            parameters: vec![ParameterSchema::optional(
                "format",
                "string",
                "Output format: 'iso', 'date', 'time', 'unix' or 'human'",
                json!("human"),
            )],
            has_side_effects: false,
        }
    }

    async fn execute(&self, call: &ToolCall) -> Result<Value> {
        let format = call.str_arg("format").unwrap_or("human");
        let now = chrono::Utc::now();

        let output = match format {
            "iso" => json!(now.to_rfc3339()),
            "date" => json!(now.format("%Y-%m-%d").to_string()),
            "time" => json!(now.format("%H:%M:%S").to_string()),
            "unix" => json!(now.timestamp()),
            "human" => json!(now.format("%A, %B %d, %Y at %H:%M:%S UTC").to_string()),
            other => {
                return Err(AgentError::ToolValidation(format!("Unknown format: {other}")));
            }
        };

        Ok(output)
    }
}

/// Knowledge-base search over a memory store
pub struct SearchTool {
    memory: Arc<dyn MemoryStore>,
    default_limit: usize,
}

impl SearchTool {
    pub fn new(memory: Arc<dyn MemoryStore>) -> Self {
        Self {
            memory,
            default_limit: 5,
        }
    }

    #[must_use]
    pub const fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "search".into(),
            description: "Search the agent's knowledge base by keyword".into(),
            parameters: vec![
                ParameterSchema::required("query", "string", "Text to look for"),
                ParameterSchema::optional("limit", "number", "Maximum hits", json!(5)),
            ],
            has_side_effects: false,
        }
    }

    async fn execute(&self, call: &ToolCall) -> Result<Value> {
        let query = call
            .str_arg("query")
            .ok_or_else(|| AgentError::ToolValidation("query must be a string".into()))?;
        let limit = call
            .arguments
            .get("limit")
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(self.default_limit);

        let hits = self.memory.search(query, limit).await;
        tracing::debug!(query, hits = hits.len(), "Knowledge base search");

        Ok(Value::Array(
            hits.into_iter()
                .map(|(key, value)| json!({ "key": key, "value": value }))
                .collect(),
        ))
    }
}

/// Register `calculator`, `datetime` and a `search` over `memory`
pub async fn register_builtins(registry: &ToolRegistry, memory: Arc<dyn MemoryStore>) {
    registry.register(CalculatorTool).await;
    registry.register(DateTimeTool).await;
    registry.register(SearchTool::new(memory)).await;
}

/// Adapter turning a closure into a tool
pub struct FnTool<F> {
    schema: ToolSchema,
    func: F,
}

impl<F> FnTool<F>
where
    F: Fn(&ToolCall) -> anyhow::Result<Value> + Send + Sync,
{
    pub fn new(name: impl Into<String>, description: impl Into<String>, func: F) -> Self {
        Self {
            schema: ToolSchema {
                name: name.into(),
                description: description.into(),
                parameters: Vec::new(),
                has_side_effects: false,
            },
            func,
        }
    }

    #[must_use]
    pub fn with_parameter(mut self, parameter: ParameterSchema) -> Self {
        self.schema.parameters.push(parameter);
        self
    }

    #[must_use]
    pub const fn with_side_effects(mut self) -> Self {
        self.schema.has_side_effects = true;
        self
    }
}

#[async_trait]
impl<F> Tool for FnTool<F>
where
    F: Fn(&ToolCall) -> anyhow::Result<Value> + Send + Sync,
{
    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    async fn execute(&self, call: &ToolCall) -> Result<Value> {
        (self.func)(call).map_err(|e| AgentError::ToolExecution(e.to_string()))
    }
}
