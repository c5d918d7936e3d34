//! Expression Evaluator for the Block Compiler
//!
//! Evaluates compiled [`Expr`] trees against a [`Scope`] and provides the
//! value conversions templates rely on: display strings, truthiness,
//! defaults and loop collections.

use serde_json::{Map, Value};

use crate::expression::{BinaryOp, Expr, Property, UnaryOp};
use crate::render::RenderError;
use crate::scope::Scope;

// ═══════════════════════════════════════════════════════════════════════════════
// VALUE HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Convert a float into a JSON value, keeping integral values integral.
/// Non-finite results become null.
pub fn number_value(n: f64) -> Value {
    if !n.is_finite() {
        return Value::Null;
    }
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        return Value::from(n as i64);
    }
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn format_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    let f = n.as_f64().unwrap_or(0.0);
    if f.fract() == 0.0 && f.abs() < 1e21 {
        format!("{:.0}", f)
    } else {
        f.to_string()
    }
}

/// The text a value renders as: null is empty, arrays are comma-joined.
pub fn to_display_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(n),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(to_display_string)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// `value` unless it is null or false.
pub fn with_default(value: Value, default: impl FnOnce() -> Value) -> Value {
    match value {
        Value::Null | Value::Bool(false) => default(),
        other => other,
    }
}

pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse().unwrap_or(f64::NAN)
            }
        }
        Value::Array(items) if items.is_empty() => 0.0,
        Value::Array(items) if items.len() == 1 => to_number(&Value::String(to_display_string(
            &items[0],
        ))),
        _ => f64::NAN,
    }
}

/// What a loop binds per iteration: the loop variable and its `_value`
/// companion. Arrays bind the item to both; objects bind the key and value.
pub fn get_values(collection: &Value) -> Result<(Vec<Value>, Vec<Value>), RenderError> {
    match collection {
        Value::Array(items) => Ok((items.clone(), items.clone())),
        Value::Object(map) => Ok((
            map.keys().map(|k| Value::String(k.clone())).collect(),
            map.values().cloned().collect(),
        )),
        other => Err(RenderError::InvalidLoopExpression(describe_type(other))),
    }
}

fn describe_type(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean {}", b),
        Value::Number(n) => format!("number {}", n),
        Value::String(s) => format!("string {:?}", s),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
    }
}

fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "undefined",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) | Value::Object(_) => "object",
    }
}

fn loose_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::String(_))
        | (Value::String(_), Value::Number(_))
        | (Value::Bool(_), _)
        | (_, Value::Bool(_))
            if !left.is_null() && !right.is_null() =>
        {
            to_number(left) == to_number(right)
        }
        _ => strict_equals(left, right),
    }
}

fn strict_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> bool {
    if let (Value::String(a), Value::String(b)) = (left, right) {
        return match op {
            BinaryOp::Less => a < b,
            BinaryOp::LessEqual => a <= b,
            BinaryOp::Greater => a > b,
            _ => a >= b,
        };
    }
    let (a, b) = (to_number(left), to_number(right));
    match op {
        BinaryOp::Less => a < b,
        BinaryOp::LessEqual => a <= b,
        BinaryOp::Greater => a > b,
        _ => a >= b,
    }
}

fn add(left: Value, right: Value) -> Value {
    let stringy = |v: &Value| matches!(v, Value::String(_) | Value::Array(_) | Value::Object(_));
    if stringy(&left) || stringy(&right) {
        Value::String(to_display_string(&left) + &to_display_string(&right))
    } else {
        number_value(to_number(&left) + to_number(&right))
    }
}

fn member(object: &Value, name: &str) -> Value {
    match (object, name) {
        (Value::Array(items), "length") => Value::from(items.len()),
        (Value::String(s), "length") => Value::from(s.chars().count()),
        (Value::Object(map), _) => map.get(name).cloned().unwrap_or(Value::Null),
        (Value::Array(items), _) => name
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i).cloned())
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn index(object: &Value, key: &Value) -> Value {
    match (object, key) {
        (Value::Array(items), Value::Number(n)) => n
            .as_u64()
            .and_then(|i| items.get(i as usize).cloned())
            .unwrap_or(Value::Null),
        (Value::String(s), Value::Number(n)) => n
            .as_u64()
            .and_then(|i| s.chars().nth(i as usize))
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::Null),
        _ => member(object, &to_display_string(key)),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVALUATOR
// ═══════════════════════════════════════════════════════════════════════════════

pub fn evaluate(expr: &Expr, scope: &Scope) -> Result<Value, RenderError> {
    Evaluator {
        scope,
        locals: Vec::new(),
    }
    .eval(expr)
}

struct Evaluator<'s> {
    scope: &'s Scope,
    locals: Vec<(String, Value)>,
}

impl Evaluator<'_> {
    fn eval(&mut self, expr: &Expr) -> Result<Value, RenderError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(name) => Ok(self.scope.lookup(name).unwrap_or(Value::Null)),
            Expr::Local(name) => Ok(self
                .locals
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Null)),
            Expr::Global(name) => Err(RenderError::Expression(format!(
                "{} can only be used through its members",
                name
            ))),
            Expr::Member(object, name) => {
                if let Expr::Global(global) = object.as_ref() {
                    return global_constant(global, name);
                }
                Ok(member(&self.eval(object)?, name))
            }
            Expr::Index(object, key) => {
                let object = self.eval(object)?;
                Ok(index(&object, &self.eval(key)?))
            }
            Expr::Call(callee, args) => self.call(callee, args),
            Expr::Array(items) => Ok(Value::Array(self.eval_list(items)?)),
            Expr::Object(props) => {
                let mut map = Map::new();
                for prop in props {
                    match prop {
                        Property::KeyValue(key, value) => {
                            map.insert(key.clone(), self.eval(value)?);
                        }
                        Property::Spread(inner) => {
                            if let Value::Object(spread) = self.eval(inner)? {
                                map.extend(spread);
                            }
                        }
                    }
                }
                Ok(Value::Object(map))
            }
            Expr::Spread(_) => Err(RenderError::Expression(
                "spread is only allowed in arrays, objects and calls".to_string(),
            )),
            Expr::Unary(op, operand) => {
                let value = self.eval(operand)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!is_truthy(&value)),
                    UnaryOp::Negate => number_value(-to_number(&value)),
                    UnaryOp::Plus => number_value(to_number(&value)),
                    UnaryOp::Typeof => Value::String(type_of(&value).to_string()),
                })
            }
            Expr::Binary(op, left, right) => self.binary(*op, left, right),
            Expr::Conditional(test, yes, no) => {
                if is_truthy(&self.eval(test)?) {
                    self.eval(yes)
                } else {
                    self.eval(no)
                }
            }
            Expr::Arrow(..) => Err(RenderError::Expression(
                "arrow functions can only be passed to array methods".to_string(),
            )),
            Expr::Concat(parts) => {
                let mut out = String::new();
                for part in parts {
                    out.push_str(&to_display_string(&self.eval(part)?));
                }
                Ok(Value::String(out))
            }
        }
    }

    fn eval_list(&mut self, items: &[Expr]) -> Result<Vec<Value>, RenderError> {
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Expr::Spread(inner) => match self.eval(inner)? {
                    Value::Array(spread) => values.extend(spread),
                    Value::Null => {}
                    other => values.push(other),
                },
                _ => values.push(self.eval(item)?),
            }
        }
        Ok(values)
    }

    fn binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Value, RenderError> {
        let left = self.eval(left)?;
        match op {
            BinaryOp::And if !is_truthy(&left) => return Ok(left),
            BinaryOp::Or if is_truthy(&left) => return Ok(left),
            BinaryOp::Nullish if !left.is_null() => return Ok(left),
            BinaryOp::And | BinaryOp::Or | BinaryOp::Nullish => return self.eval(right),
            _ => {}
        }
        let right = self.eval(right)?;
        Ok(match op {
            BinaryOp::Add => add(left, right),
            BinaryOp::Subtract => number_value(to_number(&left) - to_number(&right)),
            BinaryOp::Multiply => number_value(to_number(&left) * to_number(&right)),
            BinaryOp::Divide => number_value(to_number(&left) / to_number(&right)),
            BinaryOp::Remainder => number_value(to_number(&left) % to_number(&right)),
            BinaryOp::Equal => Value::Bool(loose_equals(&left, &right)),
            BinaryOp::NotEqual => Value::Bool(!loose_equals(&left, &right)),
            BinaryOp::StrictEqual => Value::Bool(strict_equals(&left, &right)),
            BinaryOp::StrictNotEqual => Value::Bool(!strict_equals(&left, &right)),
            BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
                Value::Bool(compare(op, &left, &right))
            }
            BinaryOp::In => Value::Bool(match &right {
                Value::Object(map) => map.contains_key(&to_display_string(&left)),
                Value::Array(items) => {
                    (to_number(&left) as usize) < items.len() && to_number(&left) >= 0.0
                }
                _ => false,
            }),
            BinaryOp::And | BinaryOp::Or | BinaryOp::Nullish => Value::Null,
        })
    }

    fn call(&mut self, callee: &Expr, args: &[Expr]) -> Result<Value, RenderError> {
        match callee {
            Expr::Global(name) => {
                let args = self.eval_list(args)?;
                call_global(name, &args)
            }
            Expr::Member(object, method) => {
                if let Expr::Global(global) = object.as_ref() {
                    let args = self.eval_list(args)?;
                    return call_static(global, method, &args);
                }
                let receiver = self.eval(object)?;
                self.call_method(receiver, method, args)
            }
            other => Err(RenderError::Expression(format!(
                "{} is not a function",
                describe_callee(other)
            ))),
        }
    }

    /// Apply an arrow function argument to `args`.
    fn apply(&mut self, function: &Expr, args: &[Value]) -> Result<Value, RenderError> {
        let Expr::Arrow(params, body) = function else {
            return Err(RenderError::Expression(
                "expected an arrow function argument".to_string(),
            ));
        };
        let depth = self.locals.len();
        for (i, param) in params.iter().enumerate() {
            let value = args.get(i).cloned().unwrap_or(Value::Null);
            self.locals.push((param.clone(), value));
        }
        let result = self.eval(body);
        self.locals.truncate(depth);
        result
    }

    fn call_method(
        &mut self,
        receiver: Value,
        method: &str,
        args: &[Expr],
    ) -> Result<Value, RenderError> {
        match receiver {
            Value::Array(items) => self.array_method(items, method, args),
            Value::String(s) => {
                let args = self.eval_list(args)?;
                string_method(&s, method, &args)
            }
            other => Err(RenderError::Expression(format!(
                "{}.{} is not a function",
                describe_type(&other),
                method
            ))),
        }
    }

    fn array_method(
        &mut self,
        items: Vec<Value>,
        method: &str,
        args: &[Expr],
    ) -> Result<Value, RenderError> {
        let with_callback = ["map", "filter", "find", "findIndex", "some", "every"];
        if with_callback.contains(&method) {
            let Some(callback) = args.first() else {
                return Err(RenderError::Expression(format!("{} needs a callback", method)));
            };
            let mut mapped = Vec::new();
            for (i, item) in items.iter().enumerate() {
                let result = self.apply(callback, &[item.clone(), Value::from(i)])?;
                let keep = is_truthy(&result);
                match method {
                    "map" => mapped.push(result),
                    "filter" if keep => mapped.push(item.clone()),
                    "find" if keep => return Ok(item.clone()),
                    "findIndex" if keep => return Ok(Value::from(i)),
                    "some" if keep => return Ok(Value::Bool(true)),
                    "every" if !keep => return Ok(Value::Bool(false)),
                    _ => {}
                }
            }
            return Ok(match method {
                "map" | "filter" => Value::Array(mapped),
                "findIndex" => Value::from(-1),
                "some" => Value::Bool(false),
                "every" => Value::Bool(true),
                _ => Value::Null,
            });
        }

        let args = self.eval_list(args)?;
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Null);
        match method {
            "join" => {
                let separator = match arg(0) {
                    Value::Null => ",".to_string(),
                    other => to_display_string(&other),
                };
                Ok(Value::String(
                    items
                        .iter()
                        .map(to_display_string)
                        .collect::<Vec<_>>()
                        .join(&separator),
                ))
            }
            "includes" => Ok(Value::Bool(
                items.iter().any(|item| strict_equals(item, &arg(0))),
            )),
            "indexOf" => Ok(items
                .iter()
                .position(|item| strict_equals(item, &arg(0)))
                .map(Value::from)
                .unwrap_or(Value::from(-1))),
            "slice" => {
                let (start, end) = slice_bounds(items.len(), &arg(0), &arg(1));
                Ok(Value::Array(items[start..end].to_vec()))
            }
            "concat" => {
                let mut joined = items;
                for extra in args.iter().cloned() {
                    match extra {
                        Value::Array(more) => joined.extend(more),
                        other => joined.push(other),
                    }
                }
                Ok(Value::Array(joined))
            }
            "reverse" => Ok(Value::Array(items.into_iter().rev().collect())),
            _ => Err(RenderError::Expression(format!(
                "array.{} is not a function",
                method
            ))),
        }
    }
}

fn slice_bounds(len: usize, start: &Value, end: &Value) -> (usize, usize) {
    let resolve = |value: &Value, fallback: usize| -> usize {
        if value.is_null() {
            return fallback;
        }
        let n = to_number(value);
        if n < 0.0 {
            len.saturating_sub((-n) as usize)
        } else {
            (n as usize).min(len)
        }
    };
    let start = resolve(start, 0);
    let end = resolve(end, len);
    (start.min(end), end)
}

fn string_method(s: &str, method: &str, args: &[Value]) -> Result<Value, RenderError> {
    let arg = |i: usize| args.get(i).map(to_display_string).unwrap_or_default();
    Ok(match method {
        "toUpperCase" => Value::String(s.to_uppercase()),
        "toLowerCase" => Value::String(s.to_lowercase()),
        "trim" => Value::String(s.trim().to_string()),
        "includes" => Value::Bool(s.contains(&arg(0))),
        "startsWith" => Value::Bool(s.starts_with(&arg(0))),
        "endsWith" => Value::Bool(s.ends_with(&arg(0))),
        "indexOf" => Value::from(
            s.find(&arg(0))
                .map(|byte| s[..byte].chars().count() as i64)
                .unwrap_or(-1),
        ),
        "split" => Value::Array(
            s.split(&arg(0))
                .map(|part| Value::String(part.to_string()))
                .collect(),
        ),
        "slice" => {
            let chars: Vec<char> = s.chars().collect();
            let null = Value::Null;
            let (start, end) = slice_bounds(
                chars.len(),
                args.first().unwrap_or(&null),
                args.get(1).unwrap_or(&null),
            );
            Value::String(chars[start..end].iter().collect())
        }
        "replace" => Value::String(s.replacen(&arg(0), &arg(1), 1)),
        _ => {
            return Err(RenderError::Expression(format!(
                "string.{} is not a function",
                method
            )))
        }
    })
}

/// Longest array `Array(n)` may allocate.
pub const MAX_ARRAY_LENGTH: usize = 1 << 20;

fn array_length(n: &serde_json::Number) -> Result<usize, RenderError> {
    n.as_u64()
        .and_then(|len| usize::try_from(len).ok())
        .filter(|len| *len <= MAX_ARRAY_LENGTH)
        .ok_or_else(|| RenderError::Expression(format!("Invalid array length: {}", n)))
}

fn call_global(name: &str, args: &[Value]) -> Result<Value, RenderError> {
    let first = args.first().cloned().unwrap_or(Value::Null);
    Ok(match name {
        "Array" => match (&first, args.len()) {
            (Value::Number(n), 1) => Value::Array(vec![Value::Null; array_length(n)?]),
            _ => Value::Array(args.to_vec()),
        },
        "String" => Value::String(to_display_string(&first)),
        "Number" => number_value(to_number(&first)),
        "Boolean" => Value::Bool(is_truthy(&first)),
        _ => {
            return Err(RenderError::Expression(format!(
                "{} is not a function",
                name
            )))
        }
    })
}

fn call_static(global: &str, method: &str, args: &[Value]) -> Result<Value, RenderError> {
    let numbers: Vec<f64> = args.iter().map(to_number).collect();
    let first = numbers.first().copied().unwrap_or(f64::NAN);
    let result = match (global, method) {
        ("Math", "max") => number_value(numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        ("Math", "min") => number_value(numbers.iter().copied().fold(f64::INFINITY, f64::min)),
        ("Math", "floor") => number_value(first.floor()),
        ("Math", "ceil") => number_value(first.ceil()),
        ("Math", "round") => number_value((first + 0.5).floor()),
        ("Math", "abs") => number_value(first.abs()),
        ("Object", "keys") => match args.first() {
            Some(Value::Object(map)) => {
                Value::Array(map.keys().map(|k| Value::String(k.clone())).collect())
            }
            _ => Value::Array(vec![]),
        },
        ("Object", "values") => match args.first() {
            Some(Value::Object(map)) => Value::Array(map.values().cloned().collect()),
            _ => Value::Array(vec![]),
        },
        ("JSON", "stringify") => Value::String(
            serde_json::to_string(args.first().unwrap_or(&Value::Null))
                .map_err(|e| RenderError::Expression(e.to_string()))?,
        ),
        ("Array", "isArray") => Value::Bool(matches!(args.first(), Some(Value::Array(_)))),
        _ => {
            return Err(RenderError::Expression(format!(
                "{}.{} is not a function",
                global, method
            )))
        }
    };
    Ok(result)
}

fn global_constant(global: &str, name: &str) -> Result<Value, RenderError> {
    match (global, name) {
        ("Math", "PI") => Ok(number_value(std::f64::consts::PI)),
        ("Math", "E") => Ok(number_value(std::f64::consts::E)),
        _ => Err(RenderError::Expression(format!(
            "{}.{} is not available",
            global, name
        ))),
    }
}

fn describe_callee(expr: &Expr) -> String {
    match expr {
        Expr::Var(name) | Expr::Local(name) => name.clone(),
        Expr::Member(_, name) => name.clone(),
        _ => "expression".to_string(),
    }
}
