use rhai::{Array, Dynamic, Engine, EvalAltResult, Scope};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::natives;
use super::{Bindings, Evaluator, ScriptError, ScriptInput, ScriptValue};

/// Resource limits for a single script run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptLimits {
    /// Maximum number of engine operations per evaluation (default: 200000)
    pub max_operations: u64,
    /// Maximum length of any string a script builds (default: 4 MiB)
    pub max_string_size: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: 200_000,
            max_string_size: 4 * 1024 * 1024,
        }
    }
}

/// [`Evaluator`] backed by the rhai engine.
///
/// The engine has no module resolver and no I/O; scripts can reach only the
/// functions registered here. A fresh [`Scope`] is built for every call.
pub struct RhaiEvaluator {
    engine: Engine,
}

impl RhaiEvaluator {
    pub fn new() -> Self {
        Self::with_limits(ScriptLimits::default())
    }

    pub fn with_limits(limits: ScriptLimits) -> Self {
        let mut engine = Engine::new();
        engine.set_max_operations(limits.max_operations);
        engine.set_max_string_size(limits.max_string_size);
        engine.set_max_expr_depths(64, 32);

        engine.on_print(|text| info!(target: "bookrule::script", "{text}"));
        engine.on_debug(|text, _source, pos| {
            debug!(target: "bookrule::script", %pos, "{text}");
        });

        engine.register_fn("log", |text: &str| {
            info!(target: "bookrule::script", "{text}");
        });
        engine.register_fn("md5", |text: &str| natives::md5_hex(text));
        engine.register_fn("base64_encode", |text: &str| natives::base64_encode(text));
        engine.register_fn(
            "base64_decode",
            |text: &str| -> Result<String, Box<EvalAltResult>> {
                natives::base64_decode(text).map_err(|err| err.to_string().into())
            },
        );
        engine.register_fn(
            "aes_cbc_decrypt",
            |data: &str, key: &str, iv: &str| -> Result<String, Box<EvalAltResult>> {
                natives::aes_cbc_decrypt(data, key, iv).map_err(|err| err.to_string().into())
            },
        );

        Self { engine }
    }
}

impl Default for RhaiEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator for RhaiEvaluator {
    fn evaluate(&self, script: &str, bindings: &Bindings) -> Result<ScriptValue, ScriptError> {
        let mut scope = Scope::new();
        match &bindings.result {
            ScriptInput::Text(text) => {
                scope.push("result", text.clone());
            }
            ScriptInput::List(items) => {
                let array: Array = items.iter().cloned().map(Dynamic::from).collect();
                scope.push("result", array);
            }
        }
        scope.push_constant("baseUrl", bindings.base_url.clone());
        for (name, value) in &bindings.vars {
            scope.push_constant(name.as_str(), value.clone());
        }

        let value = self
            .engine
            .eval_with_scope::<Dynamic>(&mut scope, script)
            .map_err(|err| ScriptError::Eval(err.to_string()))?;

        Ok(into_script_value(value))
    }
}

fn into_script_value(value: Dynamic) -> ScriptValue {
    if value.is_unit() {
        return ScriptValue::Empty;
    }
    if value.is_array() {
        return match value.into_array() {
            Ok(items) => ScriptValue::List(items.into_iter().map(|item| item.to_string()).collect()),
            Err(_) => ScriptValue::Empty,
        };
    }
    ScriptValue::Text(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(script: &str, input: ScriptInput) -> Result<ScriptValue, ScriptError> {
        let bindings = Bindings::new(input, "https://s.com").with_var("key", "rust");
        RhaiEvaluator::new().evaluate(script, &bindings)
    }

    #[test]
    fn test_scalar_result() {
        let value = run("result.len()", ScriptInput::Text("abcd".into())).unwrap();
        assert_eq!(value, ScriptValue::Text("4".into()));
    }

    #[test]
    fn test_list_result() {
        let value = run(
            "result.map(|s| s + \"!\")",
            ScriptInput::List(vec!["a".into(), "b".into()]),
        )
        .unwrap();
        assert_eq!(value, ScriptValue::List(vec!["a!".into(), "b!".into()]));
    }

    #[test]
    fn test_unit_is_empty() {
        let value = run("let x = 1;", ScriptInput::Text(String::new())).unwrap();
        assert_eq!(value, ScriptValue::Empty);
    }

    #[test]
    fn test_bound_variables() {
        let value = run("baseUrl + \"/s?q=\" + key", ScriptInput::Text(String::new())).unwrap();
        assert_eq!(value, ScriptValue::Text("https://s.com/s?q=rust".into()));
    }

    #[test]
    fn test_natives_registered() {
        let value = run("md5(\"hello\")", ScriptInput::Text(String::new())).unwrap();
        assert_eq!(value, ScriptValue::Text("5d41402abc4b2a76b9719d911017c592".into()));

        let value = run("base64_decode(base64_encode(result))", ScriptInput::Text("hi".into()))
            .unwrap();
        assert_eq!(value, ScriptValue::Text("hi".into()));
    }

    #[test]
    fn test_native_error_surfaces_as_eval_error() {
        let err = run("base64_decode(\"%%%\")", ScriptInput::Text(String::new())).unwrap_err();
        assert!(matches!(err, ScriptError::Eval(_)));
    }

    #[test]
    fn test_runaway_script_is_stopped() {
        let evaluator = RhaiEvaluator::with_limits(ScriptLimits {
            max_operations: 1_000,
            ..Default::default()
        });
        let bindings = Bindings::new(ScriptInput::Text(String::new()), "");
        let err = evaluator.evaluate("loop { }", &bindings).unwrap_err();
        assert!(matches!(err, ScriptError::Eval(_)));
    }

    #[test]
    fn test_no_state_between_calls() {
        let evaluator = RhaiEvaluator::new();
        let bindings = Bindings::new(ScriptInput::Text(String::new()), "");
        evaluator.evaluate("let leaked = 5;", &bindings).unwrap();
        assert!(evaluator.evaluate("leaked", &bindings).is_err());
    }
}
