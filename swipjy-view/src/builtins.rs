//! 注入模板作用域的平台原语与运算符语义

use std::sync::Arc;

use serde::Serialize;

use crate::ast::BinaryOp;
use crate::interpreter::{Exec, Globals, Interpreter};
use crate::library::{into_node, TreeLibrary};
use crate::value::{Function, Object, Value};

/// 内置函数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Require,
    CreateElement,
    Fragment,
    JsonStringify,
    JsonParse,
    MathMin,
    MathMax,
    MathFloor,
    MathCeil,
    MathRound,
    MathAbs,
    ObjectKeys,
    ObjectValues,
    ObjectEntries,
    ObjectAssign,
    ArrayIsArray,
    ConsoleLog,
    ConsoleWarn,
    ConsoleError,
    String,
    Number,
    Boolean,
    ParseInt,
    ParseFloat,
}

impl Builtin {
    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Require => "require",
            Builtin::CreateElement => "createElement",
            Builtin::Fragment => "Fragment",
            Builtin::JsonStringify => "stringify",
            Builtin::JsonParse => "parse",
            Builtin::MathMin => "min",
            Builtin::MathMax => "max",
            Builtin::MathFloor => "floor",
            Builtin::MathCeil => "ceil",
            Builtin::MathRound => "round",
            Builtin::MathAbs => "abs",
            Builtin::ObjectKeys => "keys",
            Builtin::ObjectValues => "values",
            Builtin::ObjectEntries => "entries",
            Builtin::ObjectAssign => "assign",
            Builtin::ArrayIsArray => "isArray",
            Builtin::ConsoleLog => "log",
            Builtin::ConsoleWarn => "warn",
            Builtin::ConsoleError => "error",
            Builtin::String => "String",
            Builtin::Number => "Number",
            Builtin::Boolean => "Boolean",
            Builtin::ParseInt => "parseInt",
            Builtin::ParseFloat => "parseFloat",
        }
    }
}

fn namespace(entries: &[(&str, Value)]) -> Value {
    Value::object(
        entries
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect(),
    )
}

fn builtin(builtin: Builtin) -> Value {
    Value::Function(Function::Builtin(builtin))
}

/// 树构建库模块的导出对象
pub(crate) fn library_namespace() -> Value {
    namespace(&[
        ("createElement", builtin(Builtin::CreateElement)),
        ("Fragment", builtin(Builtin::Fragment)),
    ])
}

/// 模块作用域的初始名字表
pub(crate) fn globals(library: &dyn TreeLibrary) -> Globals {
    let mut globals = Globals::new();
    globals.insert(library.binding_name().to_string(), library_namespace());
    globals.insert("require".into(), builtin(Builtin::Require));
    globals.insert(
        "JSON".into(),
        namespace(&[
            ("stringify", builtin(Builtin::JsonStringify)),
            ("parse", builtin(Builtin::JsonParse)),
        ]),
    );
    globals.insert(
        "Math".into(),
        namespace(&[
            ("min", builtin(Builtin::MathMin)),
            ("max", builtin(Builtin::MathMax)),
            ("floor", builtin(Builtin::MathFloor)),
            ("ceil", builtin(Builtin::MathCeil)),
            ("round", builtin(Builtin::MathRound)),
            ("abs", builtin(Builtin::MathAbs)),
            ("PI", Value::Number(std::f64::consts::PI)),
        ]),
    );
    globals.insert(
        "Object".into(),
        namespace(&[
            ("keys", builtin(Builtin::ObjectKeys)),
            ("values", builtin(Builtin::ObjectValues)),
            ("entries", builtin(Builtin::ObjectEntries)),
            ("assign", builtin(Builtin::ObjectAssign)),
        ]),
    );
    globals.insert(
        "Array".into(),
        namespace(&[("isArray", builtin(Builtin::ArrayIsArray))]),
    );
    globals.insert(
        "console".into(),
        namespace(&[
            ("log", builtin(Builtin::ConsoleLog)),
            ("info", builtin(Builtin::ConsoleLog)),
            ("warn", builtin(Builtin::ConsoleWarn)),
            ("error", builtin(Builtin::ConsoleError)),
        ]),
    );
    globals.insert("String".into(), builtin(Builtin::String));
    globals.insert("Number".into(), builtin(Builtin::Number));
    globals.insert("Boolean".into(), builtin(Builtin::Boolean));
    globals.insert("parseInt".into(), builtin(Builtin::ParseInt));
    globals.insert("parseFloat".into(), builtin(Builtin::ParseFloat));
    globals.insert("NaN".into(), Value::Number(f64::NAN));
    globals.insert("Infinity".into(), Value::Number(f64::INFINITY));
    globals
}

// ---- 运算符 ----

fn to_primitive(value: &Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) | Value::Node(_) | Value::Function(_) => {
            Value::from(value.to_string())
        }
        other => other.clone(),
    }
}

pub(crate) fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => Arc::ptr_eq(x, y),
        (Value::Object(x), Value::Object(y)) => Arc::ptr_eq(x, y),
        (Value::Node(x), Value::Node(y)) => Arc::ptr_eq(x, y),
        _ => a == b,
    }
}

fn loose_equals(a: &Value, b: &Value) -> bool {
    if a.is_nullish() || b.is_nullish() {
        return a.is_nullish() && b.is_nullish();
    }
    if std::mem::discriminant(a) == std::mem::discriminant(b) {
        return strict_equals(a, b);
    }
    match (a, b) {
        (Value::Number(_) | Value::String(_) | Value::Bool(_), Value::Number(_) | Value::String(_) | Value::Bool(_)) => {
            a.to_number() == b.to_number()
        }
        (Value::Number(_) | Value::String(_), _) => loose_equals(a, &to_primitive(b)),
        (_, Value::Number(_) | Value::String(_)) => loose_equals(&to_primitive(a), b),
        _ => false,
    }
}

/// 同值零比较（`includes` 使用，NaN 等于 NaN）
fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x.is_nan() && y.is_nan() => true,
        _ => strict_equals(a, b),
    }
}

pub(crate) fn binary_op(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => {
            let (l, r) = (to_primitive(left), to_primitive(right));
            if matches!(l, Value::String(_)) || matches!(r, Value::String(_)) {
                Value::from(format!("{}{}", l, r))
            } else {
                Value::Number(l.to_number() + r.to_number())
            }
        }
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::StrictEq => Value::Bool(strict_equals(left, right)),
        BinaryOp::StrictNe => Value::Bool(!strict_equals(left, right)),
        BinaryOp::LooseEq => Value::Bool(loose_equals(left, right)),
        BinaryOp::LooseNe => Value::Bool(!loose_equals(left, right)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            Value::Bool(compare(op, left, right))
        }
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> bool {
    let (l, r) = (to_primitive(left), to_primitive(right));
    let ordering = match (&l, &r) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => l.to_number().partial_cmp(&r.to_number()),
    };
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    }
}

// ---- 工具 ----

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

/// `slice` 风格的下标：负数从末尾计算，结果截断到 `[0, len]`
fn relative_index(value: &Value, len: usize, default: usize) -> usize {
    if matches!(value, Value::Undefined) {
        return default;
    }
    let n = value.to_number();
    if n.is_nan() {
        return 0;
    }
    let n = n.trunc();
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        (n as usize).min(len)
    }
}

fn json_stringify(value: &Value, indent: &Value) -> Exec<Value> {
    if matches!(value, Value::Undefined | Value::Function(_)) {
        return Ok(Value::Undefined);
    }

    let indent = match indent {
        Value::Number(n) if *n >= 1.0 => " ".repeat((*n as usize).min(10)),
        Value::String(s) => s.chars().take(10).collect(),
        _ => String::new(),
    };

    if indent.is_empty() {
        return serde_json::to_string(value)
            .map(Value::from)
            .map_err(|e| e.to_string());
    }

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer).map_err(|e| e.to_string())?;
    String::from_utf8(buf).map(Value::from).map_err(|e| e.to_string())
}

fn console_line(args: &[Value]) -> String {
    args.iter()
        .map(|value| match value {
            Value::Array(_) | Value::Object(_) => {
                serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
            }
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_int(text: &str, radix: &Value) -> Value {
    let radix = match radix.to_number() {
        n if n.is_nan() || n == 0.0 => 10,
        n => n as u32,
    };
    if !(2..=36).contains(&radix) {
        return Value::Number(f64::NAN);
    }

    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let digits = if radix == 16 {
        digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
            .unwrap_or(digits)
    } else {
        digits
    };

    let valid: String = digits.chars().take_while(|c| c.is_digit(radix)).collect();
    if valid.is_empty() {
        return Value::Number(f64::NAN);
    }
    let magnitude = valid
        .chars()
        .filter_map(|c| c.to_digit(radix))
        .fold(0.0, |acc, d| acc * f64::from(radix) + f64::from(d));
    Value::Number(if negative { -magnitude } else { magnitude })
}

fn parse_float(text: &str) -> Value {
    let text = text.trim_start();
    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_exp = false;
    let chars: Vec<char> = text.chars().collect();
    while end < chars.len() {
        let c = chars[end];
        let accepted = c.is_ascii_digit()
            || ((c == '-' || c == '+') && (end == 0 || matches!(chars[end - 1], 'e' | 'E')))
            || (c == '.' && !seen_dot && !seen_exp)
            || ((c == 'e' || c == 'E') && !seen_exp && end > 0);
        if !accepted {
            break;
        }
        seen_dot |= c == '.';
        seen_exp |= c == 'e' || c == 'E';
        end += 1;
    }

    let mut candidate: String = chars[..end].iter().collect();
    while !candidate.is_empty() {
        if let Ok(n) = candidate.parse::<f64>() {
            return Value::Number(n);
        }
        candidate.pop();
    }
    if text.starts_with("Infinity") {
        return Value::Number(f64::INFINITY);
    }
    Value::Number(f64::NAN)
}

fn callback(value: &Value, method: &str) -> Exec<Value> {
    match value {
        Value::Function(_) => Ok(value.clone()),
        other => Err(format!("{} is not a function (in {})", other.type_of(), method)),
    }
}

impl Interpreter<'_> {
    pub(crate) fn call_builtin(&self, builtin: Builtin, args: &[Value]) -> Exec<Value> {
        match builtin {
            Builtin::Require => self.require(&arg(args, 0).to_string()),
            Builtin::CreateElement => {
                let props = match arg(args, 1) {
                    Value::Object(map) => (*map).clone(),
                    _ => Object::new(),
                };
                let children = args.iter().skip(2).cloned().collect();
                self.create_element(&arg(args, 0), props, children)
                    .map(Value::node)
            }
            Builtin::Fragment => {
                let children = arg(args, 0).get("children");
                into_node(children, self.library).map(Value::node)
            }
            Builtin::JsonStringify => json_stringify(&arg(args, 0), &arg(args, 2)),
            Builtin::JsonParse => serde_json::from_str::<serde_json::Value>(&arg(args, 0).to_string())
                .map(Value::from)
                .map_err(|e| format!("JSON.parse: {}", e)),
            Builtin::MathMin => Ok(Value::Number(args.iter().map(Value::to_number).fold(
                f64::INFINITY,
                |acc, n| if acc.is_nan() || n.is_nan() { f64::NAN } else { acc.min(n) },
            ))),
            Builtin::MathMax => Ok(Value::Number(args.iter().map(Value::to_number).fold(
                f64::NEG_INFINITY,
                |acc, n| if acc.is_nan() || n.is_nan() { f64::NAN } else { acc.max(n) },
            ))),
            Builtin::MathFloor => Ok(Value::Number(arg(args, 0).to_number().floor())),
            Builtin::MathCeil => Ok(Value::Number(arg(args, 0).to_number().ceil())),
            Builtin::MathRound => Ok(Value::Number((arg(args, 0).to_number() + 0.5).floor())),
            Builtin::MathAbs => Ok(Value::Number(arg(args, 0).to_number().abs())),
            Builtin::ObjectKeys | Builtin::ObjectValues | Builtin::ObjectEntries => {
                let entries: Vec<(String, Value)> = match arg(args, 0) {
                    Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                    Value::Array(items) => items
                        .iter()
                        .enumerate()
                        .map(|(i, v)| (i.to_string(), v.clone()))
                        .collect(),
                    Value::Undefined | Value::Null => {
                        return Err("Cannot convert undefined or null to object".to_string())
                    }
                    _ => Vec::new(),
                };
                Ok(Value::array(
                    entries
                        .into_iter()
                        .map(|(key, value)| match builtin {
                            Builtin::ObjectKeys => Value::from(key),
                            Builtin::ObjectValues => value,
                            _ => Value::array(vec![Value::from(key), value]),
                        })
                        .collect(),
                ))
            }
            Builtin::ObjectAssign => {
                let mut target = match arg(args, 0) {
                    Value::Object(map) => (*map).clone(),
                    Value::Undefined | Value::Null => {
                        return Err("Cannot convert undefined or null to object".to_string())
                    }
                    _ => Object::new(),
                };
                for source in args.iter().skip(1) {
                    if let Value::Object(map) = source {
                        target.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
                    }
                }
                Ok(Value::object(target))
            }
            Builtin::ArrayIsArray => Ok(Value::Bool(matches!(arg(args, 0), Value::Array(_)))),
            Builtin::ConsoleLog => {
                tracing::info!(template = self.template, "{}", console_line(args));
                Ok(Value::Undefined)
            }
            Builtin::ConsoleWarn => {
                tracing::warn!(template = self.template, "{}", console_line(args));
                Ok(Value::Undefined)
            }
            Builtin::ConsoleError => {
                tracing::error!(template = self.template, "{}", console_line(args));
                Ok(Value::Undefined)
            }
            Builtin::String => Ok(match args.first() {
                Some(value) => Value::from(value.to_string()),
                None => Value::from(""),
            }),
            Builtin::Number => Ok(Value::Number(args.first().map_or(0.0, Value::to_number))),
            Builtin::Boolean => Ok(Value::Bool(arg(args, 0).is_truthy())),
            Builtin::ParseInt => Ok(parse_int(&arg(args, 0).to_string(), &arg(args, 1))),
            Builtin::ParseFloat => Ok(parse_float(&arg(args, 0).to_string())),
        }
    }

    /// 字符串、数组与数字上的方法；未知方法返回 `None`
    pub(crate) fn call_method(&self, target: &Value, method: &str, args: &[Value]) -> Exec<Option<Value>> {
        match target {
            Value::Array(items) => self.array_method(items, target, method, args),
            Value::String(s) => Ok(string_method(s, method, args)),
            Value::Number(n) => Ok(number_method(*n, method, args)),
            _ => Ok(None),
        }
    }

    fn array_method(&self, items: &[Value], array: &Value, method: &str, args: &[Value]) -> Exec<Option<Value>> {
        let each = |f: &Value, i: usize, item: &Value| {
            self.call_value(f, &[item.clone(), Value::from(i as f64), array.clone()])
        };

        let result = match method {
            "map" => {
                let f = callback(&arg(args, 0), method)?;
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(each(&f, i, item)?);
                }
                Value::array(out)
            }
            "filter" => {
                let f = callback(&arg(args, 0), method)?;
                let mut out = Vec::new();
                for (i, item) in items.iter().enumerate() {
                    if each(&f, i, item)?.is_truthy() {
                        out.push(item.clone());
                    }
                }
                Value::array(out)
            }
            "forEach" => {
                let f = callback(&arg(args, 0), method)?;
                for (i, item) in items.iter().enumerate() {
                    each(&f, i, item)?;
                }
                Value::Undefined
            }
            "find" | "findIndex" | "some" | "every" => {
                let f = callback(&arg(args, 0), method)?;
                let mut found = None;
                for (i, item) in items.iter().enumerate() {
                    let hit = each(&f, i, item)?.is_truthy();
                    if hit != (method == "every") {
                        found = Some(i);
                        break;
                    }
                }
                match method {
                    "find" => found.map(|i| items[i].clone()).unwrap_or_default(),
                    "findIndex" => Value::from(found.map_or(-1.0, |i| i as f64)),
                    "some" => Value::Bool(found.is_some()),
                    _ => Value::Bool(found.is_none()),
                }
            }
            "reduce" => {
                let f = callback(&arg(args, 0), method)?;
                let mut iter = items.iter().enumerate();
                let mut acc = match args.get(1) {
                    Some(initial) => initial.clone(),
                    None => match iter.next() {
                        Some((_, first)) => first.clone(),
                        None => return Err("Reduce of empty array with no initial value".to_string()),
                    },
                };
                for (i, item) in iter {
                    acc = self.call_value(&f, &[acc, item.clone(), Value::from(i as f64), array.clone()])?;
                }
                acc
            }
            "join" => {
                let separator = match arg(args, 0) {
                    Value::Undefined => ",".to_string(),
                    other => other.to_string(),
                };
                let parts: Vec<String> = items
                    .iter()
                    .map(|item| if item.is_nullish() { String::new() } else { item.to_string() })
                    .collect();
                Value::from(parts.join(&separator))
            }
            "includes" => {
                let needle = arg(args, 0);
                Value::Bool(items.iter().any(|item| same_value_zero(item, &needle)))
            }
            "indexOf" => {
                let needle = arg(args, 0);
                let index = items.iter().position(|item| strict_equals(item, &needle));
                Value::from(index.map_or(-1.0, |i| i as f64))
            }
            "slice" => {
                let start = relative_index(&arg(args, 0), items.len(), 0);
                let end = relative_index(&arg(args, 1), items.len(), items.len());
                Value::array(items.get(start..end.max(start)).unwrap_or_default().to_vec())
            }
            "concat" => {
                let mut out = items.to_vec();
                for extra in args {
                    match extra {
                        Value::Array(more) => out.extend(more.iter().cloned()),
                        other => out.push(other.clone()),
                    }
                }
                Value::array(out)
            }
            "reverse" => Value::array(items.iter().rev().cloned().collect()),
            "toString" => Value::from(array.to_string()),
            _ => return Ok(None),
        };
        Ok(Some(result))
    }
}

fn string_method(s: &str, method: &str, args: &[Value]) -> Option<Value> {
    let text_arg = |i: usize| arg(args, i).to_string();
    let chars: Vec<char> = s.chars().collect();

    let result = match method {
        "toUpperCase" => Value::from(s.to_uppercase()),
        "toLowerCase" => Value::from(s.to_lowercase()),
        "trim" => Value::from(s.trim()),
        "trimStart" => Value::from(s.trim_start()),
        "trimEnd" => Value::from(s.trim_end()),
        "startsWith" => Value::Bool(s.starts_with(&text_arg(0))),
        "endsWith" => Value::Bool(s.ends_with(&text_arg(0))),
        "includes" => Value::Bool(s.contains(&text_arg(0))),
        "indexOf" => {
            let index = s
                .find(&text_arg(0))
                .map(|byte| s[..byte].chars().count() as f64);
            Value::from(index.unwrap_or(-1.0))
        }
        "slice" => {
            let start = relative_index(&arg(args, 0), chars.len(), 0);
            let end = relative_index(&arg(args, 1), chars.len(), chars.len());
            Value::from(chars[start..end.max(start)].iter().collect::<String>())
        }
        "substring" => {
            let clamp = |v: &Value, default: usize| match v {
                Value::Undefined => default,
                other => {
                    let n = other.to_number();
                    if n.is_nan() || n < 0.0 {
                        0
                    } else {
                        (n as usize).min(chars.len())
                    }
                }
            };
            let a = clamp(&arg(args, 0), 0);
            let b = clamp(&arg(args, 1), chars.len());
            let (start, end) = if a <= b { (a, b) } else { (b, a) };
            Value::from(chars[start..end].iter().collect::<String>())
        }
        "charAt" => {
            let index = arg(args, 0).to_number();
            let index = if index.is_nan() { 0.0 } else { index };
            let c = (index >= 0.0)
                .then(|| chars.get(index as usize))
                .flatten()
                .map(|c| c.to_string())
                .unwrap_or_default();
            Value::from(c)
        }
        "split" => {
            let limit = match arg(args, 1) {
                Value::Undefined => usize::MAX,
                other => other.to_number().max(0.0) as usize,
            };
            let parts: Vec<Value> = match arg(args, 0) {
                Value::Undefined => vec![Value::from(s)],
                separator => {
                    let separator = separator.to_string();
                    if separator.is_empty() {
                        chars.iter().map(|c| Value::from(c.to_string())).collect()
                    } else {
                        s.split(separator.as_str()).map(Value::from).collect()
                    }
                }
            };
            Value::array(parts.into_iter().take(limit).collect())
        }
        "replace" => Value::from(s.replacen(&text_arg(0), &text_arg(1), 1)),
        "replaceAll" => Value::from(s.replace(&text_arg(0), &text_arg(1))),
        "repeat" => {
            let count = arg(args, 0).to_number();
            let count = if count.is_finite() && count > 0.0 { count as usize } else { 0 };
            Value::from(s.repeat(count))
        }
        "padStart" | "padEnd" => {
            let width = arg(args, 0).to_number().max(0.0) as usize;
            let fill = match arg(args, 1) {
                Value::Undefined => " ".to_string(),
                other => other.to_string(),
            };
            if chars.len() >= width || fill.is_empty() {
                Value::from(s)
            } else {
                let padding: String = fill.chars().cycle().take(width - chars.len()).collect();
                if method == "padStart" {
                    Value::from(format!("{}{}", padding, s))
                } else {
                    Value::from(format!("{}{}", s, padding))
                }
            }
        }
        "toString" => Value::from(s),
        _ => return None,
    };
    Some(result)
}

fn number_method(n: f64, method: &str, args: &[Value]) -> Option<Value> {
    match method {
        "toFixed" => {
            let digits = arg(args, 0).to_number();
            let digits = if digits.is_nan() { 0 } else { digits.clamp(0.0, 100.0) as usize };
            if n.is_finite() {
                Some(Value::from(format!("{:.*}", digits, n)))
            } else {
                Some(Value::from(Value::Number(n).to_string()))
            }
        }
        "toString" => Some(Value::from(Value::Number(n).to_string())),
        _ => None,
    }
}
