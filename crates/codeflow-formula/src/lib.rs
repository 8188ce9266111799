//! Formula evaluator for the format action.
//!
//! The evaluator is a textual rewriter, not a script engine: placeholders
//! are substituted first, then function calls are reduced innermost-first by
//! fixed-point iteration with a hard iteration cap. It never evaluates host
//! code, so it needs no sandbox; its output is still untrusted string data.
//!
//! Substituted values are stashed in a side table and represented in the
//! working text by private-use-area sentinel tokens, so a property value
//! that happens to contain a function-name substring can never collide with
//! a later reduction.

mod arith;
mod functions;
mod rewriter;

pub use rewriter::{evaluate, FormulaError, FormulaOutput};

/// Formula source length cap.
pub const MAX_FORMULA_LEN: usize = 5_000;
/// Cap applied to each substituted input value.
pub const MAX_INPUT_LEN: usize = 10_000;
/// Fixed-point iteration cap; bounds cost on adversarial inputs.
pub const MAX_ITERATIONS: usize = 50;
/// Well-defined division-by-zero sentinel.
pub const DIV_BY_ZERO: &str = "#DIV/0!";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(formula: &str, props: serde_json::Value) -> FormulaOutput {
        evaluate(formula, &props, &serde_json::Map::new()).unwrap()
    }

    #[test]
    fn concat_and_upper() {
        let out = eval(
            r#"upper(concat({{firstname}}," ",{{lastname}}))"#,
            json!({"firstname": "Sri", "lastname": "K"}),
        );
        assert_eq!(out.result, "SRI K");
    }

    #[test]
    fn round_with_arithmetic() {
        let out = eval("round({{amt}}*1.18,2)", json!({"amt": 10000}));
        assert_eq!(out.result, "11800.00");
        assert_eq!(out.result_number, Some(11800.0));
    }

    #[test]
    fn if_truthiness() {
        for (x, expected) in [
            ("yes", "a"),
            ("false", "b"),
            ("0", "b"),
            ("null", "b"),
            ("undefined", "b"),
            ("", "b"),
        ] {
            let out = eval("if({{x}},a,b)", json!({ "x": x }));
            assert_eq!(out.result, expected, "x = {:?}", x);
        }
    }

    #[test]
    fn division_by_zero_yields_sentinel() {
        let out = eval("{{amt}}/0", json!({"amt": 5}));
        assert_eq!(out.result, DIV_BY_ZERO);
        assert_eq!(out.result_number, None);
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let out = eval("2+3*4", json!({}));
        assert_eq!(out.result, "14");
        let out = eval("10-6/2", json!({}));
        assert_eq!(out.result, "7");
    }

    #[test]
    fn unicode_operators() {
        let out = eval("6×7", json!({}));
        assert_eq!(out.result, "42");
        let out = eval("84÷2", json!({}));
        assert_eq!(out.result, "42");
    }

    #[test]
    fn string_functions() {
        assert_eq!(eval("lower(ABC)", json!({})).result, "abc");
        assert_eq!(eval("trim(  hi  )", json!({})).result, "hi");
        assert_eq!(eval("trimall(a   b  c)", json!({})).result, "a b c");
        assert_eq!(eval("capitalize(hELLO)", json!({})).result, "Hello");
        assert_eq!(eval("length(hello)", json!({})).result, "5");
        assert_eq!(eval("substring(hello,1,3)", json!({})).result, "el");
        assert_eq!(eval("replace(a-b-c,-,+)", json!({})).result, "a+b+c");
        assert_eq!(eval("default(,fallback)", json!({})).result, "fallback");
        assert_eq!(eval("default(real,fallback)", json!({})).result, "real");
    }

    #[test]
    fn math_functions() {
        assert_eq!(eval("floor(3.9)", json!({})).result, "3");
        assert_eq!(eval("ceil(3.1)", json!({})).result, "4");
        assert_eq!(eval("abs(0-5)", json!({})).result, "5");
        assert_eq!(eval("round(3.456,1)", json!({})).result, "3.5");
        assert_eq!(eval("round(3.6)", json!({})).result, "4");
    }

    #[test]
    fn numbered_input_placeholders() {
        let mut inputs = serde_json::Map::new();
        inputs.insert("input1".to_string(), json!("world"));
        let out = evaluate("concat(hello ,[[input1]])", &json!({}), &inputs).unwrap();
        assert_eq!(out.result, "hello world");
    }

    #[test]
    fn missing_placeholder_is_empty() {
        let out = eval("concat(a,{{missing}},b)", json!({}));
        assert_eq!(out.result, "ab");
    }

    #[test]
    fn value_containing_function_name_does_not_collide() {
        // The property value contains "upper(" but must pass through verbatim.
        let out = eval(
            "concat({{evil}}, suffix)",
            json!({"evil": "upper(x)"}),
        );
        assert_eq!(out.result, "upper(x) suffix");
    }

    #[test]
    fn oversize_formula_rejected() {
        let formula = "a".repeat(MAX_FORMULA_LEN + 1);
        let err = evaluate(&formula, &json!({}), &serde_json::Map::new()).unwrap_err();
        assert!(matches!(err, FormulaError::FormulaTooLong { .. }));
    }

    #[test]
    fn oversize_input_rejected() {
        let huge = "x".repeat(MAX_INPUT_LEN + 1);
        let err =
            evaluate("upper({{v}})", &json!({ "v": huge }), &serde_json::Map::new()).unwrap_err();
        assert!(matches!(err, FormulaError::InputTooLong { .. }));
    }

    #[test]
    fn nested_calls_reduce_innermost_first() {
        let out = eval("upper(trim(  concat(a,b)  ))", json!({}));
        assert_eq!(out.result, "AB");
    }

    #[test]
    fn iteration_cap_terminates() {
        // 60 nested calls exceed the cap; evaluation must terminate without
        // panicking and return a string.
        let mut formula = String::from("x");
        for _ in 0..60 {
            formula = format!("upper({})", formula);
        }
        let out = evaluate(&formula, &json!({}), &serde_json::Map::new());
        // Either fully reduced or capped, but always terminates.
        assert!(out.is_ok());
    }

    #[test]
    fn result_number_for_plain_strings_is_none() {
        let out = eval("concat(a,b)", json!({}));
        assert_eq!(out.result_number, None);
    }

    #[test]
    fn numeric_property_arithmetic() {
        let out = eval("{{n}}+{{m}}", json!({"n": 2, "m": 40}));
        assert_eq!(out.result, "42");
        assert_eq!(out.result_number, Some(42.0));
    }
}
