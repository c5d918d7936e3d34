//! Expression Module for the Block Compiler
//!
//! Template attributes carry small javascript-like expressions. They are
//! parsed with oxc, lowered into an [`Expr`] tree once at compile time, and
//! evaluated by `eval` at render time. Free identifiers become context
//! lookups; literals, operators, property names, object keys and arrow
//! function parameters are left alone.

use lazy_static::lazy_static;
use oxc_allocator::Allocator;
use oxc_ast::ast::{
    ArrayExpressionElement, Argument, ArrowFunctionExpression, BindingPattern, ChainElement,
    Expression, ObjectPropertyKind, PropertyKey, Statement, TemplateLiteral,
};
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType, Span};
use oxc_syntax::operator::{BinaryOperator, LogicalOperator, UnaryOperator};
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

use crate::eval::{number_value, to_display_string};
use crate::scope::ZERO;
use crate::validate::{CompilerError, ERR_INVALID_EXPRESSION};

// ═══════════════════════════════════════════════════════════════════════════════
// WORD OPERATORS
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    /// Identifiers never rewritten into context lookups.
    pub static ref RESERVED_WORDS: HashSet<&'static str> =
        ["NaN", "undefined", "console", "window", "eval", "RegExp", "Date"]
            .into_iter()
            .collect();

    /// Builtins the evaluator knows how to call.
    pub static ref BUILTIN_GLOBALS: HashSet<&'static str> =
        ["Math", "Array", "Object", "JSON", "String", "Number", "Boolean"]
            .into_iter()
            .collect();

    static ref INTERPOLATION_RE: Regex = Regex::new(r"\{\{(.*?)\}\}").unwrap();
}

const WORD_REPLACEMENT: [(&str, &str); 6] = [
    ("and", "&&"),
    ("or", "||"),
    ("gt", ">"),
    ("gte", ">="),
    ("lt", "<"),
    ("lte", "<="),
];

fn push_word(out: &mut String, word: &mut String, after_dot: &mut bool) {
    if word.is_empty() {
        return;
    }
    match WORD_REPLACEMENT.iter().find(|(w, _)| *w == word.as_str()) {
        Some((_, op)) if !*after_dot => out.push_str(op),
        _ => out.push_str(word),
    }
    word.clear();
    *after_dot = false;
}

/// Rewrite `and`, `or`, `gt`, `gte`, `lt` and `lte` into their operators.
/// Quoted text and property names such as `x.and` are left alone.
pub fn replace_word_operators(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut word = String::new();
    let mut quote = None;
    let mut escaped = false;
    let mut after_dot = false;
    for c in expr.chars() {
        if let Some(open) = quote {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == open {
                quote = None;
            }
            continue;
        }
        if c.is_alphanumeric() || c == '_' || c == '$' {
            word.push(c);
            continue;
        }
        push_word(&mut out, &mut word, &mut after_dot);
        if !c.is_whitespace() {
            after_dot = c == '.';
        }
        if matches!(c, '\'' | '"' | '`') {
            quote = Some(c);
        }
        out.push(c);
    }
    push_word(&mut out, &mut word, &mut after_dot);
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXPRESSION TREE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
    Plus,
    Typeof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    In,
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    KeyValue(String, Expr),
    Spread(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Free identifier, resolved against the scope
    Var(String),
    /// Arrow function parameter
    Local(String),
    /// Builtin such as `Math` or `Array`
    Global(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Array(Vec<Expr>),
    Object(Vec<Property>),
    Spread(Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Arrow(Vec<String>, Box<Expr>),
    /// String built from text and interpolated parts
    Concat(Vec<Expr>),
}

impl Expr {
    /// The body passed by the enclosing `t-call`.
    pub fn zero() -> Self {
        Expr::Var(ZERO.to_string())
    }

    /// Context identifiers read by this expression, in first-use order.
    pub fn variables(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_variables(&mut names);
        names
    }

    fn collect_variables(&self, names: &mut Vec<String>) {
        match self {
            Expr::Var(name) => {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            Expr::Literal(_) | Expr::Local(_) | Expr::Global(_) => {}
            Expr::Member(object, _) => object.collect_variables(names),
            Expr::Index(object, index) => {
                object.collect_variables(names);
                index.collect_variables(names);
            }
            Expr::Call(callee, args) => {
                callee.collect_variables(names);
                args.iter().for_each(|a| a.collect_variables(names));
            }
            Expr::Array(items) | Expr::Concat(items) => {
                items.iter().for_each(|i| i.collect_variables(names))
            }
            Expr::Object(props) => {
                for prop in props {
                    match prop {
                        Property::KeyValue(_, value) | Property::Spread(value) => {
                            value.collect_variables(names)
                        }
                    }
                }
            }
            Expr::Spread(inner) | Expr::Unary(_, inner) | Expr::Arrow(_, inner) => {
                inner.collect_variables(names)
            }
            Expr::Binary(_, left, right) => {
                left.collect_variables(names);
                right.collect_variables(names);
            }
            Expr::Conditional(test, yes, no) => {
                test.collect_variables(names);
                yes.collect_variables(names);
                no.collect_variables(names);
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOWERING
// ═══════════════════════════════════════════════════════════════════════════════

/// Turns the oxc tree into an [`Expr`], tracking arrow parameters in scope.
struct Lowering<'s> {
    source: &'s str,
    locals: Vec<String>,
}

type LowerResult = Result<Expr, String>;

impl Lowering<'_> {
    fn unsupported(&self, span: Span) -> String {
        let text = self
            .source
            .get(span.start as usize..span.end as usize)
            .unwrap_or(self.source);
        format!("\"{}\" is not supported in template expressions", text)
    }

    fn expression(&mut self, expr: &Expression<'_>) -> LowerResult {
        match expr {
            Expression::BooleanLiteral(lit) => Ok(Expr::Literal(Value::Bool(lit.value))),
            Expression::NullLiteral(_) => Ok(Expr::Literal(Value::Null)),
            Expression::NumericLiteral(lit) => Ok(Expr::Literal(number_value(lit.value))),
            Expression::StringLiteral(lit) => Ok(Expr::Literal(Value::String(lit.value.to_string()))),
            Expression::TemplateLiteral(tpl) => self.template_literal(tpl),
            Expression::Identifier(ident) => self.identifier(&ident.name.to_string(), ident.span),
            Expression::ParenthesizedExpression(paren) => self.expression(&paren.expression),
            Expression::StaticMemberExpression(member) => Ok(Expr::Member(
                Box::new(self.expression(&member.object)?),
                member.property.name.to_string(),
            )),
            Expression::ComputedMemberExpression(member) => Ok(Expr::Index(
                Box::new(self.expression(&member.object)?),
                Box::new(self.expression(&member.expression)?),
            )),
            Expression::CallExpression(call) => {
                let callee = self.expression(&call.callee)?;
                let args = self.arguments(&call.arguments)?;
                Ok(Expr::Call(Box::new(callee), args))
            }
            // member access on null is already null, so `?.` lowers to plain access
            Expression::ChainExpression(chain) => match &chain.expression {
                ChainElement::CallExpression(call) => {
                    let callee = self.expression(&call.callee)?;
                    let args = self.arguments(&call.arguments)?;
                    Ok(Expr::Call(Box::new(callee), args))
                }
                ChainElement::StaticMemberExpression(member) => Ok(Expr::Member(
                    Box::new(self.expression(&member.object)?),
                    member.property.name.to_string(),
                )),
                ChainElement::ComputedMemberExpression(member) => Ok(Expr::Index(
                    Box::new(self.expression(&member.object)?),
                    Box::new(self.expression(&member.expression)?),
                )),
                _ => Err(self.unsupported(chain.span)),
            },
            Expression::ArrayExpression(array) => {
                let mut items = Vec::with_capacity(array.elements.len());
                for element in &array.elements {
                    items.push(match element {
                        ArrayExpressionElement::SpreadElement(spread) => {
                            Expr::Spread(Box::new(self.expression(&spread.argument)?))
                        }
                        ArrayExpressionElement::Elision(_) => Expr::Literal(Value::Null),
                        other => match other.as_expression() {
                            Some(item) => self.expression(item)?,
                            None => return Err(self.unsupported(array.span)),
                        },
                    });
                }
                Ok(Expr::Array(items))
            }
            Expression::ObjectExpression(object) => {
                let mut props = Vec::with_capacity(object.properties.len());
                for prop in &object.properties {
                    props.push(match prop {
                        ObjectPropertyKind::ObjectProperty(p) => {
                            if p.computed || p.method {
                                return Err(self.unsupported(p.span));
                            }
                            let key = match &p.key {
                                PropertyKey::StaticIdentifier(id) => id.name.to_string(),
                                PropertyKey::StringLiteral(lit) => lit.value.to_string(),
                                PropertyKey::NumericLiteral(lit) => {
                                    to_display_string(&number_value(lit.value))
                                }
                                _ => return Err(self.unsupported(p.span)),
                            };
                            Property::KeyValue(key, self.expression(&p.value)?)
                        }
                        ObjectPropertyKind::SpreadProperty(spread) => {
                            Property::Spread(self.expression(&spread.argument)?)
                        }
                    });
                }
                Ok(Expr::Object(props))
            }
            Expression::UnaryExpression(unary) => {
                let op = match unary.operator {
                    UnaryOperator::LogicalNot => UnaryOp::Not,
                    UnaryOperator::UnaryNegation => UnaryOp::Negate,
                    UnaryOperator::UnaryPlus => UnaryOp::Plus,
                    UnaryOperator::Typeof => UnaryOp::Typeof,
                    _ => return Err(self.unsupported(unary.span)),
                };
                Ok(Expr::Unary(op, Box::new(self.expression(&unary.argument)?)))
            }
            Expression::BinaryExpression(binary) => {
                let op = match binary.operator {
                    BinaryOperator::Addition => BinaryOp::Add,
                    BinaryOperator::Subtraction => BinaryOp::Subtract,
                    BinaryOperator::Multiplication => BinaryOp::Multiply,
                    BinaryOperator::Division => BinaryOp::Divide,
                    BinaryOperator::Remainder => BinaryOp::Remainder,
                    BinaryOperator::Equality => BinaryOp::Equal,
                    BinaryOperator::Inequality => BinaryOp::NotEqual,
                    BinaryOperator::StrictEquality => BinaryOp::StrictEqual,
                    BinaryOperator::StrictInequality => BinaryOp::StrictNotEqual,
                    BinaryOperator::LessThan => BinaryOp::Less,
                    BinaryOperator::LessEqualThan => BinaryOp::LessEqual,
                    BinaryOperator::GreaterThan => BinaryOp::Greater,
                    BinaryOperator::GreaterEqualThan => BinaryOp::GreaterEqual,
                    BinaryOperator::In => BinaryOp::In,
                    _ => return Err(self.unsupported(binary.span)),
                };
                self.binary(op, &binary.left, &binary.right)
            }
            Expression::LogicalExpression(logical) => {
                let op = match logical.operator {
                    LogicalOperator::And => BinaryOp::And,
                    LogicalOperator::Or => BinaryOp::Or,
                    LogicalOperator::Coalesce => BinaryOp::Nullish,
                };
                self.binary(op, &logical.left, &logical.right)
            }
            Expression::ConditionalExpression(cond) => Ok(Expr::Conditional(
                Box::new(self.expression(&cond.test)?),
                Box::new(self.expression(&cond.consequent)?),
                Box::new(self.expression(&cond.alternate)?),
            )),
            Expression::ArrowFunctionExpression(arrow) => self.arrow(arrow),
            Expression::AssignmentExpression(_)
            | Expression::UpdateExpression(_)
            | Expression::SequenceExpression(_) => {
                Err("assignments and statements are not supported".to_string())
            }
            other => Err(self.unsupported(other.span())),
        }
    }

    fn binary(&mut self, op: BinaryOp, left: &Expression<'_>, right: &Expression<'_>) -> LowerResult {
        Ok(Expr::Binary(
            op,
            Box::new(self.expression(left)?),
            Box::new(self.expression(right)?),
        ))
    }

    fn arguments(&mut self, args: &[Argument<'_>]) -> Result<Vec<Expr>, String> {
        let mut lowered = Vec::with_capacity(args.len());
        for arg in args {
            lowered.push(match arg {
                Argument::SpreadElement(spread) => {
                    Expr::Spread(Box::new(self.expression(&spread.argument)?))
                }
                other => match other.as_expression() {
                    Some(expr) => self.expression(expr)?,
                    None => return Err(self.unsupported(other.span())),
                },
            });
        }
        Ok(lowered)
    }

    fn template_literal(&mut self, tpl: &TemplateLiteral<'_>) -> LowerResult {
        let mut parts = Vec::new();
        for (i, quasi) in tpl.quasis.iter().enumerate() {
            let text = quasi.value.cooked.as_ref().unwrap_or(&quasi.value.raw).to_string();
            if !text.is_empty() {
                parts.push(Expr::Literal(Value::String(text)));
            }
            if let Some(expr) = tpl.expressions.get(i) {
                parts.push(self.expression(expr)?);
            }
        }
        if parts.is_empty() {
            return Ok(Expr::Literal(Value::String(String::new())));
        }
        if parts.len() == 1 && matches!(parts[0], Expr::Literal(_)) {
            return Ok(parts.remove(0));
        }
        Ok(Expr::Concat(parts))
    }

    fn arrow(&mut self, arrow: &ArrowFunctionExpression<'_>) -> LowerResult {
        if arrow.params.rest.is_some() || !arrow.expression {
            return Err(self.unsupported(arrow.span));
        }
        let mut params = Vec::with_capacity(arrow.params.items.len());
        for param in &arrow.params.items {
            match &param.pattern {
                BindingPattern::BindingIdentifier(id) => params.push(id.name.to_string()),
                _ => return Err(self.unsupported(param.span)),
            }
        }
        let Some(Statement::ExpressionStatement(body)) = arrow.body.statements.first() else {
            return Err(self.unsupported(arrow.span));
        };
        let depth = self.locals.len();
        self.locals.extend(params.iter().cloned());
        let lowered = self.expression(&body.expression);
        self.locals.truncate(depth);
        Ok(Expr::Arrow(params, Box::new(lowered?)))
    }

    fn identifier(&self, name: &str, span: Span) -> LowerResult {
        if self.locals.iter().any(|local| local == name) {
            return Ok(Expr::Local(name.to_string()));
        }
        if BUILTIN_GLOBALS.contains(name) {
            return Ok(Expr::Global(name.to_string()));
        }
        match name {
            "undefined" | "NaN" => Ok(Expr::Literal(Value::Null)),
            _ if RESERVED_WORDS.contains(name) => Err(self.unsupported(span)),
            _ => Ok(Expr::Var(name.to_string())),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PUBLIC API
// ═══════════════════════════════════════════════════════════════════════════════

fn expression_error(expr: &str, reason: &str) -> CompilerError {
    CompilerError::with_details(
        ERR_INVALID_EXPRESSION,
        &format!("Invalid expression: {}", reason),
        "",
        0,
        0,
        Some(expr.to_string()),
        vec![],
    )
}

/// Parse a template expression. An empty expression evaluates to null.
pub fn compile_expression(expr: &str) -> Result<Expr, CompilerError> {
    if expr.trim().is_empty() {
        return Ok(Expr::Literal(Value::Null));
    }
    let source = replace_word_operators(expr);
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, &source, SourceType::default())
        .parse_expression()
        .map_err(|errors| {
            let reason = errors
                .first()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "syntax error".to_string());
            expression_error(expr, &reason)
        })?;
    let mut lowering = Lowering {
        source: &source,
        locals: Vec::new(),
    };
    lowering
        .expression(&parsed)
        .map_err(|reason| expression_error(expr, &reason))
}

/// Whether `text` contains at least one `{{ }}` interpolation.
pub fn is_interpolated(text: &str) -> bool {
    INTERPOLATION_RE.is_match(text)
}

/// Compile text with `{{ expr }}` parts into a string-valued expression. A
/// text made of exactly one interpolation keeps the value's own type.
pub fn interpolate(text: &str) -> Result<Expr, CompilerError> {
    let mut parts = Vec::new();
    let mut last = 0;
    for caps in INTERPOLATION_RE.captures_iter(text) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if whole.start() > last {
            parts.push(Expr::Literal(Value::String(
                text[last..whole.start()].to_string(),
            )));
        }
        parts.push(compile_expression(inner.as_str())?);
        last = whole.end();
    }
    if last < text.len() {
        parts.push(Expr::Literal(Value::String(text[last..].to_string())));
    }
    match parts.len() {
        0 => Ok(Expr::Literal(Value::String(String::new()))),
        1 if last == text.len() && !matches!(parts[0], Expr::Literal(_)) => Ok(parts.remove(0)),
        _ => Ok(Expr::Concat(parts)),
    }
}
