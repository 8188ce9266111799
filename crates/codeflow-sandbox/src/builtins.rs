//! The fixed allow-list of globals and methods visible to user code.
//!
//! Anything absent here does not exist inside the sandbox: no filesystem,
//! no network, no process, no import machinery.

use crate::interp::{Flow, Interp};
use crate::value::{format_number, from_json, to_json, RegexData, Value};
use regex::RegexBuilder;
use serde_json::{Map, Value as JsonValue};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Pattern source length cap for user regular expressions.
const MAX_REGEX_SOURCE: usize = 1_000;
/// Compiled-program size cap handed to the regex builder.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Install the sandbox globals: frozen copies of the job data, the
/// write-only `output` object, the buffered `console`, and pure builtins.
pub fn install_globals(
    interp: &mut Interp,
    inputs: &JsonValue,
    secrets: &Map<String, JsonValue>,
    context: &JsonValue,
) {
    interp.define_global("inputs", from_json(inputs, true));
    interp.define_global("secrets", from_json(&JsonValue::Object(secrets.clone()), true));
    interp.define_global("context", from_json(context, true));
    interp.define_global("output", Value::object(Vec::new()));

    interp.define_global(
        "console",
        Value::object(vec![
            ("log".into(), native("console.log", console_log)),
            ("info".into(), native("console.info", console_log)),
            ("warn".into(), native("console.warn", console_log)),
            ("error".into(), native("console.error", console_log)),
        ]),
    );

    interp.define_global(
        "Math",
        Value::object(vec![
            ("floor".into(), native("Math.floor", |_, a| Ok(Value::Number(arg_num(a, 0).floor())))),
            ("ceil".into(), native("Math.ceil", |_, a| Ok(Value::Number(arg_num(a, 0).ceil())))),
            ("round".into(), native("Math.round", |_, a| Ok(Value::Number(arg_num(a, 0).round())))),
            ("trunc".into(), native("Math.trunc", |_, a| Ok(Value::Number(arg_num(a, 0).trunc())))),
            ("abs".into(), native("Math.abs", |_, a| Ok(Value::Number(arg_num(a, 0).abs())))),
            ("sqrt".into(), native("Math.sqrt", |_, a| Ok(Value::Number(arg_num(a, 0).sqrt())))),
            ("sign".into(), native("Math.sign", |_, a| {
                let n = arg_num(a, 0);
                Ok(Value::Number(if n == 0.0 || n.is_nan() { n } else { n.signum() }))
            })),
            ("min".into(), native("Math.min", math_min)),
            ("max".into(), native("Math.max", math_max)),
            ("pow".into(), native("Math.pow", math_pow)),
            ("PI".into(), Value::Number(std::f64::consts::PI)),
        ]),
    );

    interp.define_global(
        "JSON",
        Value::object(vec![
            ("parse".into(), native("JSON.parse", json_parse)),
            ("stringify".into(), native("JSON.stringify", json_stringify)),
        ]),
    );

    interp.define_global(
        "Date",
        Value::object(vec![("now".into(), native("Date.now", date_now))]),
    );

    interp.define_global(
        "Object",
        Value::object(vec![
            ("keys".into(), native("Object.keys", object_keys)),
            ("values".into(), native("Object.values", object_values)),
        ]),
    );

    interp.define_global(
        "Array",
        Value::object(vec![("isArray".into(), native("Array.isArray", array_is_array))]),
    );

    interp.define_global("RegExp", native("RegExp", regexp_ctor));
    interp.define_global("String", native("String", string_ctor));
    interp.define_global("Number", native("Number", number_ctor));
    interp.define_global("Boolean", native("Boolean", boolean_ctor));
    interp.define_global("parseInt", native("parseInt", parse_int));
    interp.define_global("parseFloat", native("parseFloat", parse_float));
    interp.define_global("isNaN", native("isNaN", is_nan));
    interp.define_global("setTimeout", native("setTimeout", set_timeout));
    interp.define_global("clearTimeout", native("clearTimeout", clear_timeout));
}

fn native(name: &'static str, f: crate::value::NativeFn) -> Value {
    Value::Native { name, f }
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Undefined)
}

fn arg_num(args: &[Value], i: usize) -> f64 {
    arg(args, i).to_number()
}

fn console_log(interp: &mut Interp, args: &[Value]) -> Result<Value, Flow> {
    let line = args
        .iter()
        .map(|v| match v {
            Value::Object(_) | Value::Array(_) => {
                serde_json::to_string(&to_json(v)).unwrap_or_else(|_| v.to_display())
            }
            other => other.to_display(),
        })
        .collect::<Vec<_>>()
        .join(" ");
    interp.log_line(line);
    Ok(Value::Undefined)
}

fn math_min(_: &mut Interp, args: &[Value]) -> Result<Value, Flow> {
    Ok(Value::Number(
        args.iter().map(|v| v.to_number()).fold(f64::INFINITY, f64::min),
    ))
}

fn math_max(_: &mut Interp, args: &[Value]) -> Result<Value, Flow> {
    Ok(Value::Number(
        args.iter().map(|v| v.to_number()).fold(f64::NEG_INFINITY, f64::max),
    ))
}

fn math_pow(_: &mut Interp, args: &[Value]) -> Result<Value, Flow> {
    Ok(Value::Number(arg_num(args, 0).powf(arg_num(args, 1))))
}

fn json_parse(interp: &mut Interp, args: &[Value]) -> Result<Value, Flow> {
    let text = arg(args, 0).to_display();
    interp.charge_alloc(text.len())?;
    match serde_json::from_str::<JsonValue>(&text) {
        Ok(json) => Ok(from_json(&json, false)),
        Err(e) => Err(Flow::error(format!("JSON.parse: {}", e))),
    }
}

fn json_stringify(interp: &mut Interp, args: &[Value]) -> Result<Value, Flow> {
    let json = to_json(&arg(args, 0));
    match serde_json::to_string(&json) {
        Ok(s) => {
            interp.charge_alloc(s.len())?;
            Ok(Value::Str(s))
        }
        Err(e) => Err(Flow::error(format!("JSON.stringify: {}", e))),
    }
}

fn date_now(_: &mut Interp, _: &[Value]) -> Result<Value, Flow> {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as f64)
        .unwrap_or(0.0);
    Ok(Value::Number(ms))
}

fn object_keys(_: &mut Interp, args: &[Value]) -> Result<Value, Flow> {
    match arg(args, 0) {
        Value::Object(data) => Ok(Value::array(
            data.borrow()
                .entries
                .iter()
                .map(|(k, _)| Value::Str(k.clone()))
                .collect(),
        )),
        _ => Ok(Value::array(Vec::new())),
    }
}

fn object_values(_: &mut Interp, args: &[Value]) -> Result<Value, Flow> {
    match arg(args, 0) {
        Value::Object(data) => Ok(Value::array(
            data.borrow().entries.iter().map(|(_, v)| v.clone()).collect(),
        )),
        _ => Ok(Value::array(Vec::new())),
    }
}

fn array_is_array(_: &mut Interp, args: &[Value]) -> Result<Value, Flow> {
    Ok(Value::Bool(matches!(arg(args, 0), Value::Array(_))))
}

fn string_ctor(interp: &mut Interp, args: &[Value]) -> Result<Value, Flow> {
    let s = arg(args, 0);
    let s = if matches!(s, Value::Undefined) && args.is_empty() {
        String::new()
    } else {
        s.to_display()
    };
    interp.charge_alloc(s.len())?;
    Ok(Value::Str(s))
}

fn number_ctor(_: &mut Interp, args: &[Value]) -> Result<Value, Flow> {
    if args.is_empty() {
        return Ok(Value::Number(0.0));
    }
    Ok(Value::Number(arg_num(args, 0)))
}

fn boolean_ctor(_: &mut Interp, args: &[Value]) -> Result<Value, Flow> {
    Ok(Value::Bool(arg(args, 0).truthy()))
}

fn parse_int(_: &mut Interp, args: &[Value]) -> Result<Value, Flow> {
    let text = arg(args, 0).to_display();
    let radix = match args.get(1) {
        Some(v) => {
            let r = v.to_number();
            if r.is_finite() && (2.0..=36.0).contains(&r) {
                r as u32
            } else {
                10
            }
        }
        None => 10,
    };
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let prefix: String = digits
        .chars()
        .take_while(|c| c.is_digit(radix))
        .collect();
    if prefix.is_empty() {
        return Ok(Value::Number(f64::NAN));
    }
    let value = i64::from_str_radix(&prefix, radix)
        .map(|v| v as f64)
        .unwrap_or(f64::NAN);
    Ok(Value::Number(if negative { -value } else { value }))
}

fn parse_float(_: &mut Interp, args: &[Value]) -> Result<Value, Flow> {
    let text = arg(args, 0).to_display();
    let trimmed = text.trim();
    // Longest numeric prefix.
    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_digit = false;
    for (i, c) in trimmed.char_indices() {
        match c {
            '-' | '+' if i == 0 => end = i + 1,
            '.' if !seen_dot => {
                seen_dot = true;
                end = i + 1;
            }
            d if d.is_ascii_digit() => {
                seen_digit = true;
                end = i + 1;
            }
            _ => break,
        }
    }
    if !seen_digit {
        return Ok(Value::Number(f64::NAN));
    }
    Ok(Value::Number(trimmed[..end].parse().unwrap_or(f64::NAN)))
}

fn is_nan(_: &mut Interp, args: &[Value]) -> Result<Value, Flow> {
    Ok(Value::Bool(arg_num(args, 0).is_nan()))
}

/// `RegExp(pattern, flags?)` / `new RegExp(...)`. Regex literal syntax is
/// not part of the dialect; the constructor is the one way in.
fn regexp_ctor(interp: &mut Interp, args: &[Value]) -> Result<Value, Flow> {
    let (source, inherited_flags) = match arg(args, 0) {
        Value::RegExp(data) => (data.source.clone(), data.flags.clone()),
        Value::Undefined => (String::new(), String::new()),
        other => (other.to_display(), String::new()),
    };
    let flags = match args.get(1) {
        Some(v) => v.to_display(),
        None => inherited_flags,
    };
    interp.charge_alloc(source.len() + 64)?;
    compile_regexp(&source, &flags)
}

pub fn compile_regexp(source: &str, flags: &str) -> Result<Value, Flow> {
    if source.len() > MAX_REGEX_SOURCE {
        return Err(Flow::error(format!(
            "regular expression exceeds {} characters",
            MAX_REGEX_SOURCE
        )));
    }
    let mut global = false;
    let mut builder = RegexBuilder::new(source);
    builder.size_limit(REGEX_SIZE_LIMIT);
    for flag in flags.chars() {
        match flag {
            'g' => global = true,
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            other => {
                return Err(Flow::error(format!(
                    "invalid regular expression flag '{}'",
                    other
                )))
            }
        }
    }
    let regex = builder
        .build()
        .map_err(|e| Flow::error(format!("invalid regular expression: {}", e)))?;
    Ok(Value::RegExp(Rc::new(RegexData {
        source: source.to_string(),
        flags: flags.to_string(),
        global,
        regex,
    })))
}

/// Methods on regex receivers.
pub fn regexp_method(
    interp: &mut Interp,
    data: &RegexData,
    name: &str,
    args: &[Value],
) -> Result<Value, Flow> {
    match name {
        "test" => {
            let haystack = arg(args, 0).to_display();
            Ok(Value::Bool(data.regex.is_match(&haystack)))
        }
        "exec" => {
            let haystack = arg(args, 0).to_display();
            match data.regex.captures(&haystack) {
                Some(captures) => Ok(capture_array(interp, &captures)?),
                None => Ok(Value::Null),
            }
        }
        "toString" => Ok(Value::Str(format!("/{}/{}", data.source, data.flags))),
        other => Err(Flow::error(format!("{} is not a RegExp method", other))),
    }
}

/// `[full, group1, ...]` for one match, undefined for non-participating
/// groups.
fn capture_array(interp: &mut Interp, captures: &regex::Captures<'_>) -> Result<Value, Flow> {
    let mut items = Vec::with_capacity(captures.len());
    for group in 0..captures.len() {
        items.push(match captures.get(group) {
            Some(m) => Value::Str(m.as_str().to_string()),
            None => Value::Undefined,
        });
    }
    interp.charge_alloc(items.len() * 16 + 32)?;
    Ok(Value::array(items))
}

fn set_timeout(interp: &mut Interp, args: &[Value]) -> Result<Value, Flow> {
    let callback = arg(args, 0);
    if !matches!(callback, Value::Arrow(_) | Value::Native { .. }) {
        return Err(Flow::error("setTimeout requires a function"));
    }
    let delay = arg_num(args, 1);
    let id = interp.register_timer(if delay.is_finite() { delay } else { 0.0 }, callback);
    Ok(Value::Number(id as f64))
}

fn clear_timeout(interp: &mut Interp, args: &[Value]) -> Result<Value, Flow> {
    let id = arg_num(args, 0);
    if id.is_finite() && id >= 0.0 {
        interp.cancelled_timers.push(id as u64);
    }
    Ok(Value::Undefined)
}

/// Methods on string receivers.
pub fn string_method(
    interp: &mut Interp,
    s: &str,
    name: &str,
    args: &[Value],
) -> Result<Value, Flow> {
    let charge = |interp: &mut Interp, out: String| -> Result<Value, Flow> {
        interp.charge_alloc(out.len())?;
        Ok(Value::Str(out))
    };
    match name {
        "toUpperCase" => charge(interp, s.to_uppercase()),
        "toLowerCase" => charge(interp, s.to_lowercase()),
        "trim" => charge(interp, s.trim().to_string()),
        "toString" => charge(interp, s.to_string()),
        "charAt" => {
            let i = arg_num(args, 0);
            let c = if i.is_finite() && i >= 0.0 {
                s.chars().nth(i as usize).map(|c| c.to_string()).unwrap_or_default()
            } else {
                String::new()
            };
            charge(interp, c)
        }
        "indexOf" => {
            let needle = arg(args, 0).to_display();
            let idx = s
                .find(&needle)
                .map(|byte| s[..byte].chars().count() as f64)
                .unwrap_or(-1.0);
            Ok(Value::Number(idx))
        }
        "includes" => Ok(Value::Bool(s.contains(&arg(args, 0).to_display()))),
        "startsWith" => Ok(Value::Bool(s.starts_with(&arg(args, 0).to_display()))),
        "endsWith" => Ok(Value::Bool(s.ends_with(&arg(args, 0).to_display()))),
        "slice" | "substring" => {
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len() as f64;
            let resolve = |v: f64, for_slice: bool| -> usize {
                let v = if v.is_nan() { 0.0 } else { v };
                let v = if v < 0.0 && for_slice { (len + v).max(0.0) } else { v.max(0.0) };
                v.min(len) as usize
            };
            let for_slice = name == "slice";
            let mut start = resolve(arg_num(args, 0), for_slice);
            let mut end = match args.get(1) {
                Some(v) => resolve(v.to_number(), for_slice),
                None => chars.len(),
            };
            // substring swaps reversed bounds; slice yields empty.
            if start > end {
                if for_slice {
                    return charge(interp, String::new());
                }
                std::mem::swap(&mut start, &mut end);
            }
            charge(interp, chars[start..end].iter().collect())
        }
        "split" => {
            let parts: Vec<Value> = match arg(args, 0) {
                Value::Undefined => vec![Value::Str(s.to_string())],
                Value::RegExp(data) => data
                    .regex
                    .split(s)
                    .map(|p| Value::Str(p.to_string()))
                    .collect(),
                other => {
                    let sep = other.to_display();
                    if sep.is_empty() {
                        s.chars().map(|c| Value::Str(c.to_string())).collect()
                    } else {
                        s.split(&sep).map(|p| Value::Str(p.to_string())).collect()
                    }
                }
            };
            interp.charge_alloc(s.len() + parts.len() * 16)?;
            Ok(Value::array(parts))
        }
        "match" => {
            let Value::RegExp(data) = arg(args, 0) else {
                return Err(Flow::error("match requires a RegExp argument"));
            };
            if data.global {
                let matches: Vec<Value> = data
                    .regex
                    .find_iter(s)
                    .map(|m| Value::Str(m.as_str().to_string()))
                    .collect();
                if matches.is_empty() {
                    return Ok(Value::Null);
                }
                interp.charge_alloc(s.len() + matches.len() * 16)?;
                Ok(Value::array(matches))
            } else {
                match data.regex.captures(s) {
                    Some(captures) => capture_array(interp, &captures),
                    None => Ok(Value::Null),
                }
            }
        }
        "replace" => {
            let to = arg(args, 1).to_display();
            let out = match arg(args, 0) {
                // A global pattern replaces every occurrence; otherwise only
                // the first. `$1`-style group references expand.
                Value::RegExp(data) => {
                    if data.global {
                        data.regex.replace_all(s, to.as_str()).into_owned()
                    } else {
                        data.regex.replace(s, to.as_str()).into_owned()
                    }
                }
                other => {
                    let from = other.to_display();
                    if from.is_empty() {
                        s.to_string()
                    } else {
                        s.replacen(&from, &to, 1)
                    }
                }
            };
            charge(interp, out)
        }
        "replaceAll" => {
            let to = arg(args, 1).to_display();
            let out = match arg(args, 0) {
                Value::RegExp(data) => data.regex.replace_all(s, to.as_str()).into_owned(),
                other => {
                    let from = other.to_display();
                    if from.is_empty() {
                        s.to_string()
                    } else {
                        s.replace(&from, &to)
                    }
                }
            };
            charge(interp, out)
        }
        "repeat" => {
            let count = arg_num(args, 0);
            if !count.is_finite() || count < 0.0 {
                return Err(Flow::error("invalid repeat count"));
            }
            let count = count as usize;
            interp.charge_alloc(s.len().saturating_mul(count))?;
            Ok(Value::Str(s.repeat(count)))
        }
        "padStart" | "padEnd" => {
            let target = arg_num(args, 0).max(0.0) as usize;
            let pad = match args.get(1) {
                Some(v) => v.to_display(),
                None => " ".to_string(),
            };
            let current = s.chars().count();
            if current >= target || pad.is_empty() {
                return charge(interp, s.to_string());
            }
            interp.charge_alloc(target)?;
            let mut filler = String::new();
            while filler.chars().count() < target - current {
                filler.push_str(&pad);
            }
            let filler: String = filler.chars().take(target - current).collect();
            let out = if name == "padStart" {
                format!("{}{}", filler, s)
            } else {
                format!("{}{}", s, filler)
            };
            Ok(Value::Str(out))
        }
        "concat" => {
            let mut out = s.to_string();
            for a in args {
                out.push_str(&a.to_display());
            }
            charge(interp, out)
        }
        other => Err(Flow::error(format!("{} is not a string method", other))),
    }
}

/// Methods on array receivers.
pub fn array_method(
    interp: &mut Interp,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
) -> Result<Value, Flow> {
    let Value::Array(data) = receiver else {
        return Err(Flow::error("internal: array method on non-array"));
    };

    let mutating = matches!(name, "push" | "pop" | "shift" | "reverse");
    if mutating && data.borrow().frozen {
        return Err(Flow::error("cannot modify a read-only array"));
    }

    match name {
        "push" => {
            let mut d = data.borrow_mut();
            for v in args {
                d.items.push(v);
            }
            let len = d.items.len();
            drop(d);
            interp.charge_alloc(16)?;
            Ok(Value::Number(len as f64))
        }
        "pop" => Ok(data.borrow_mut().items.pop().unwrap_or(Value::Undefined)),
        "shift" => {
            let mut d = data.borrow_mut();
            if d.items.is_empty() {
                Ok(Value::Undefined)
            } else {
                Ok(d.items.remove(0))
            }
        }
        "reverse" => {
            data.borrow_mut().items.reverse();
            Ok(receiver.clone())
        }
        "join" => {
            let sep = match args.first() {
                Some(v) => v.to_display(),
                None => ",".to_string(),
            };
            let parts: Vec<String> =
                data.borrow().items.iter().map(|v| v.to_display()).collect();
            let out = parts.join(&sep);
            interp.charge_alloc(out.len())?;
            Ok(Value::Str(out))
        }
        "indexOf" => {
            let needle = args.first().cloned().unwrap_or(Value::Undefined);
            let idx = data
                .borrow()
                .items
                .iter()
                .position(|v| v.strict_equals(&needle))
                .map(|i| i as f64)
                .unwrap_or(-1.0);
            Ok(Value::Number(idx))
        }
        "includes" => {
            let needle = args.first().cloned().unwrap_or(Value::Undefined);
            Ok(Value::Bool(
                data.borrow().items.iter().any(|v| v.strict_equals(&needle)),
            ))
        }
        "slice" => {
            let items = data.borrow().items.clone();
            let len = items.len() as f64;
            let resolve = |v: f64| -> usize {
                let v = if v.is_nan() { 0.0 } else { v };
                let v = if v < 0.0 { (len + v).max(0.0) } else { v };
                v.min(len) as usize
            };
            let start = resolve(args.first().map(|v| v.to_number()).unwrap_or(0.0));
            let end = resolve(args.get(1).map(|v| v.to_number()).unwrap_or(len));
            let out: Vec<Value> = if start < end {
                items[start..end].to_vec()
            } else {
                Vec::new()
            };
            interp.charge_alloc(out.len() * 16 + 32)?;
            Ok(Value::array(out))
        }
        "concat" => {
            let mut out = data.borrow().items.clone();
            for a in args {
                match a {
                    Value::Array(more) => out.extend(more.borrow().items.iter().cloned()),
                    other => out.push(other),
                }
            }
            interp.charge_alloc(out.len() * 16 + 32)?;
            Ok(Value::array(out))
        }
        "map" => {
            let cb = args.into_iter().next().unwrap_or(Value::Undefined);
            let items = data.borrow().items.clone();
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                out.push(interp.call_function(cb.clone(), vec![item, Value::Number(i as f64)])?);
            }
            interp.charge_alloc(out.len() * 16 + 32)?;
            Ok(Value::array(out))
        }
        "filter" => {
            let cb = args.into_iter().next().unwrap_or(Value::Undefined);
            let items = data.borrow().items.clone();
            let mut out = Vec::new();
            for (i, item) in items.into_iter().enumerate() {
                if interp
                    .call_function(cb.clone(), vec![item.clone(), Value::Number(i as f64)])?
                    .truthy()
                {
                    out.push(item);
                }
            }
            interp.charge_alloc(out.len() * 16 + 32)?;
            Ok(Value::array(out))
        }
        "forEach" => {
            let cb = args.into_iter().next().unwrap_or(Value::Undefined);
            let items = data.borrow().items.clone();
            for (i, item) in items.into_iter().enumerate() {
                interp.call_function(cb.clone(), vec![item, Value::Number(i as f64)])?;
            }
            Ok(Value::Undefined)
        }
        "reduce" => {
            let mut iter_args = args.into_iter();
            let cb = iter_args.next().unwrap_or(Value::Undefined);
            let items = data.borrow().items.clone();
            let mut iter = items.into_iter().enumerate();
            let mut acc = match iter_args.next() {
                Some(seed) => seed,
                None => match iter.next() {
                    Some((_, first)) => first,
                    None => return Err(Flow::error("reduce of empty array with no initial value")),
                },
            };
            for (i, item) in iter {
                acc = interp.call_function(
                    cb.clone(),
                    vec![acc, item, Value::Number(i as f64)],
                )?;
            }
            Ok(acc)
        }
        "find" => {
            let cb = args.into_iter().next().unwrap_or(Value::Undefined);
            let items = data.borrow().items.clone();
            for (i, item) in items.into_iter().enumerate() {
                if interp
                    .call_function(cb.clone(), vec![item.clone(), Value::Number(i as f64)])?
                    .truthy()
                {
                    return Ok(item);
                }
            }
            Ok(Value::Undefined)
        }
        "some" => {
            let cb = args.into_iter().next().unwrap_or(Value::Undefined);
            let items = data.borrow().items.clone();
            for (i, item) in items.into_iter().enumerate() {
                if interp
                    .call_function(cb.clone(), vec![item, Value::Number(i as f64)])?
                    .truthy()
                {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "every" => {
            let cb = args.into_iter().next().unwrap_or(Value::Undefined);
            let items = data.borrow().items.clone();
            for (i, item) in items.into_iter().enumerate() {
                if !interp
                    .call_function(cb.clone(), vec![item, Value::Number(i as f64)])?
                    .truthy()
                {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        other => Err(Flow::error(format!("{} is not an array method", other))),
    }
}

/// Methods on number receivers.
pub fn number_method(n: f64, name: &str, args: &[Value]) -> Result<Value, Flow> {
    match name {
        "toFixed" => {
            let places = args
                .first()
                .map(|v| v.to_number())
                .filter(|p| p.is_finite() && *p >= 0.0 && *p <= 100.0)
                .unwrap_or(0.0) as usize;
            Ok(Value::Str(format!("{:.*}", places, n)))
        }
        "toString" => Ok(Value::Str(format_number(n))),
        other => Err(Flow::error(format!("{} is not a number method", other))),
    }
}
