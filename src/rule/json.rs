//! JSON path subset: `$`, `.key`, `['key']`, `[N]`, `[*]`, `.*` and `..key`.

use serde_json::Value;

use super::RuleError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Key(String),
    Index(i64),
    Wildcard,
    Descend(String),
}

pub(crate) fn query<'a>(root: &'a Value, path: &str) -> Result<Vec<&'a Value>, RuleError> {
    let tokens = tokenize(path)?;
    let mut current = vec![root];

    for token in &tokens {
        let mut next = Vec::new();
        for value in current {
            match token {
                Token::Key(key) => next.extend(value.get(key.as_str())),
                Token::Index(index) => {
                    if let Value::Array(items) = value {
                        let pos = if *index >= 0 {
                            usize::try_from(*index).ok()
                        } else {
                            usize::try_from(index.unsigned_abs())
                                .ok()
                                .and_then(|back| items.len().checked_sub(back))
                        };
                        next.extend(pos.and_then(|pos| items.get(pos)));
                    }
                }
                Token::Wildcard => match value {
                    Value::Array(items) => next.extend(items.iter()),
                    Value::Object(map) => next.extend(map.values()),
                    _ => {}
                },
                Token::Descend(key) => descend(value, key, &mut next),
            }
        }
        current = next;
        if current.is_empty() {
            break;
        }
    }

    Ok(current)
}

fn descend<'a>(value: &'a Value, key: &str, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            if key == "*" {
                out.extend(map.values());
            } else if let Some(found) = map.get(key) {
                out.push(found);
            }
            for child in map.values() {
                descend(child, key, out);
            }
        }
        Value::Array(items) => {
            if key == "*" {
                out.extend(items.iter());
            }
            for child in items {
                descend(child, key, out);
            }
        }
        _ => {}
    }
}

fn tokenize(path: &str) -> Result<Vec<Token>, RuleError> {
    let path = path.trim();
    let rest = path.strip_prefix('$').unwrap_or(path);
    let mut tokens = Vec::new();
    let mut chars = rest;

    // `@json:data.list` is shorthand for `$.data.list`
    if !chars.is_empty() && !chars.starts_with(['.', '[']) {
        let end = chars.find(['.', '[']).unwrap_or(chars.len());
        tokens.push(name_token(&chars[..end]));
        chars = &chars[end..];
    }

    while !chars.is_empty() {
        if let Some(after) = chars.strip_prefix("..") {
            let end = after.find(['.', '[']).unwrap_or(after.len());
            let key = &after[..end];
            if key.is_empty() {
                return Err(RuleError::Json(format!("missing key after `..` in `{path}`")));
            }
            tokens.push(Token::Descend(key.to_string()));
            chars = &after[end..];
        } else if let Some(after) = chars.strip_prefix('.') {
            let end = after.find(['.', '[']).unwrap_or(after.len());
            let key = &after[..end];
            if key.is_empty() {
                return Err(RuleError::Json(format!("empty key in `{path}`")));
            }
            tokens.push(name_token(key));
            chars = &after[end..];
        } else if let Some(after) = chars.strip_prefix('[') {
            let end = after
                .find(']')
                .ok_or_else(|| RuleError::Json(format!("unclosed `[` in `{path}`")))?;
            tokens.push(bracket_token(after[..end].trim(), path)?);
            chars = &after[end + 1..];
        } else {
            return Err(RuleError::Json(format!("unexpected `{chars}` in `{path}`")));
        }
    }

    Ok(tokens)
}

fn name_token(key: &str) -> Token {
    if key == "*" {
        Token::Wildcard
    } else {
        Token::Key(key.to_string())
    }
}

fn bracket_token(inner: &str, path: &str) -> Result<Token, RuleError> {
    if inner == "*" {
        return Ok(Token::Wildcard);
    }
    for quote in ['\'', '"'] {
        if let Some(key) = inner
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return Ok(Token::Key(key.to_string()));
        }
    }
    inner
        .parse::<i64>()
        .map(Token::Index)
        .map_err(|_| RuleError::Json(format!("unsupported selector `[{inner}]` in `{path}`")))
}

/// String form of a JSON value: strings unquoted, null empty, containers
/// serialized.
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}
