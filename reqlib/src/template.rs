//! Variable merging and Mustache-style substitution over JSON values.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Flat variable mapping used for substitution.
pub type Variables = HashMap<String, String>;

/// Merge the three variable sources. Precedence, lowest first:
/// environment, stage, CLI parameters.
#[must_use]
pub fn merge_variables(env: &Variables, cli_params: &Variables, stage_vars: &Variables) -> Variables {
    let mut vars = env.clone();
    vars.extend(stage_vars.iter().map(|(k, v)| (k.clone(), v.clone())));
    vars.extend(cli_params.iter().map(|(k, v)| (k.clone(), v.clone())));
    vars
}

/// Substitute every string leaf of `value`. Keys are never substituted and
/// non-string scalars pass through untouched.
#[must_use]
pub fn substitute_value(value: &Value, vars: &Variables) -> Value {
    match value {
        Value::String(s) => Value::String(substitute_template(s, vars)),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute_value(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_value(v, vars)))
                .collect(),
        ),
        Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
    }
}

static TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\{\{\{\s*(?P<triple>[^{}]*?)\s*\}\}\}|\{\{\s*(?P<sigil>[#^/!&]?)\s*(?P<name>[^{}]*?)\s*\}\}",
    )
    .expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Text(&'a str),
    Var(&'a str),
    Open {
        name: &'a str,
        inverted: bool,
        raw: &'a str,
    },
    Close {
        name: &'a str,
        raw: &'a str,
    },
}

impl Token<'_> {
    fn as_literal(self) -> Self {
        match self {
            Token::Open { raw, .. } | Token::Close { raw, .. } => Token::Text(raw),
            other => other,
        }
    }
}

fn tokenize(template: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut last = 0;
    for caps in TAG_RE.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > last {
            tokens.push(Token::Text(&template[last..whole.start()]));
        }
        last = whole.end();

        if let Some(name) = caps.name("triple") {
            tokens.push(Token::Var(name.as_str()));
            continue;
        }
        let name = caps.name("name").map_or("", |m| m.as_str());
        let sigil = caps.name("sigil").map_or("", |m| m.as_str());
        match sigil {
            "!" => {}
            "#" | "^" => tokens.push(Token::Open {
                name,
                inverted: sigil == "^",
                raw: whole.as_str(),
            }),
            "/" => tokens.push(Token::Close {
                name,
                raw: whole.as_str(),
            }),
            _ => tokens.push(Token::Var(name)),
        }
    }
    if last < template.len() {
        tokens.push(Token::Text(&template[last..]));
    }
    tokens
}

fn sections_balanced(tokens: &[Token<'_>]) -> bool {
    let mut stack: Vec<&str> = Vec::new();
    for token in tokens {
        match token {
            Token::Open { name, .. } => stack.push(*name),
            Token::Close { name, .. } => {
                if stack.pop() != Some(*name) {
                    return false;
                }
            }
            Token::Text(_) | Token::Var(_) => {}
        }
    }
    stack.is_empty()
}

/// Index of the `Close` matching the `Open` at `open`. Only called on
/// balanced token streams.
fn matching_close(tokens: &[Token<'_>], open: usize) -> usize {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        match token {
            Token::Open { .. } => depth += 1,
            Token::Close { .. } => {
                depth -= 1;
                if depth == 0 {
                    return i;
                }
            }
            Token::Text(_) | Token::Var(_) => {}
        }
    }
    tokens.len()
}

fn render_tokens(tokens: &[Token<'_>], vars: &Variables, out: &mut String) {
    let mut i = 0;
    while i < tokens.len() {
        match tokens[i] {
            Token::Text(text) => out.push_str(text),
            Token::Var(name) => {
                if let Some(v) = vars.get(name) {
                    out.push_str(v);
                }
            }
            Token::Open { name, inverted, .. } => {
                let close = matching_close(tokens, i);
                let truthy = vars.get(name).is_some_and(|v| !v.is_empty());
                if truthy != inverted {
                    render_tokens(&tokens[i + 1..close], vars, out);
                }
                i = close;
            }
            Token::Close { .. } => {}
        }
        i += 1;
    }
}

/// Render a single template string.
///
/// Interpolated values are inserted verbatim, unknown names render as the
/// empty string. Unbalanced section tags are kept as literal text.
#[must_use]
pub fn substitute_template(template: &str, vars: &Variables) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }
    let mut tokens = tokenize(template);
    if !sections_balanced(&tokens) {
        tokens = tokens.into_iter().map(Token::as_literal).collect();
    }
    let mut out = String::with_capacity(template.len());
    render_tokens(&tokens, vars, &mut out);
    out
}
