#[cfg(test)]
mod tests {
    use crate::eval::evaluate;
    use crate::expression::*;
    use crate::scope::Scope;
    use crate::validate::ERR_INVALID_EXPRESSION;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::{json, Value};

    fn eval_in(expr: &str, context: Value) -> Value {
        let compiled = compile_expression(expr).unwrap();
        evaluate(&compiled, &Scope::new(context)).unwrap()
    }

    #[test]
    fn test_free_identifiers_become_lookups() {
        let expr = compile_expression("user.name + suffix").unwrap();
        assert_eq!(expr.variables(), vec!["user".to_string(), "suffix".to_string()]);
    }

    #[test]
    fn test_arrow_parameters_and_globals_are_not_lookups() {
        let expr = compile_expression("items.map(x => x * factor).concat(Math.max(a, 1))").unwrap();
        assert_eq!(
            expr.variables(),
            vec!["items".to_string(), "factor".to_string(), "a".to_string()]
        );
    }

    #[test]
    fn test_word_operators() {
        assert_eq!(replace_word_operators("a and b or c gt 1"), "a && b || c > 1");
        assert_eq!(replace_word_operators("x lte y and z gte 2"), "x <= y && z >= 2");
        assert_eq!(replace_word_operators("'rock and roll' or band"), "'rock and roll' || band");
        assert_eq!(replace_word_operators("flags.and or landing"), "flags.and || landing");
    }

    #[rstest]
    #[case("1 + 2 * 3", json!(7))]
    #[case("(1 + 2) * 3", json!(9))]
    #[case("'a' + 1", json!("a1"))]
    #[case("count > 2 ? 'many' : 'few'", json!("many"))]
    #[case("missing || 'fallback'", json!("fallback"))]
    #[case("missing ?? 0", json!(0))]
    #[case("!flag", json!(false))]
    #[case("list.length", json!(3))]
    #[case("list[1]", json!(2))]
    #[case("list.map(x => x * 2)", json!([2, 4, 6]))]
    #[case("list.filter(x => x gt 1).join('-')", json!("2-3"))]
    #[case("'  Hi '.trim().toUpperCase()", json!("HI"))]
    #[case("{a: count, ...extra}", json!({"a": 3, "b": true}))]
    #[case("typeof list", json!("object"))]
    #[case("Math.max(count, 10)", json!(10))]
    #[case("'b' in extra", json!(true))]
    #[case("count == '3'", json!(true))]
    #[case("count === '3'", json!(false))]
    #[case("`n=${count}`", json!("n=3"))]
    #[case("extra?.b", json!(true))]
    #[case("missing?.deep", json!(null))]
    #[case("[...list, 4].length", json!(4))]
    #[case("count gte 3 and !(count lt 3)", json!(true))]
    fn test_evaluate(#[case] expr: &str, #[case] expected: Value) {
        let context = json!({"count": 3, "flag": true, "list": [1, 2, 3], "extra": {"b": true}});
        assert_eq!(eval_in(expr, context), expected);
    }

    #[test]
    fn test_interpolation_keeps_single_value_type() {
        let expr = interpolate("{{ count }}").unwrap();
        assert_eq!(evaluate(&expr, &Scope::new(json!({"count": 4}))).unwrap(), json!(4));

        let expr = interpolate("item-{{ count }}-{{ name }}").unwrap();
        assert_eq!(
            evaluate(&expr, &Scope::new(json!({"count": 4, "name": "x"}))).unwrap(),
            json!("item-4-x")
        );
        assert!(is_interpolated("a{{b}}"));
        assert!(!is_interpolated("plain"));
    }

    #[test]
    fn test_empty_expression_is_null() {
        assert_eq!(eval_in("", json!({})), Value::Null);
    }

    #[rstest]
    #[case("a = 1")]
    #[case("a +")]
    #[case("(a")]
    #[case("a # b")]
    #[case("a++")]
    #[case("a, b")]
    #[case("this.x")]
    #[case("new Foo()")]
    #[case("x => { return x; }")]
    fn test_invalid_expressions(#[case] expr: &str) {
        let err = compile_expression(expr).unwrap_err();
        assert_eq!(err.code, ERR_INVALID_EXPRESSION);
        assert_eq!(err.context.as_deref(), Some(expr));
    }

    #[test]
    fn test_calling_a_context_value_fails_at_render_time() {
        let expr = compile_expression("notAFunction()").unwrap();
        assert!(evaluate(&expr, &Scope::new(json!({}))).is_err());
    }
}
