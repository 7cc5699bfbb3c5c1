//! End-to-end evaluator tests: each starts from a fresh evaluator and
//! drives real JIT execution.

use inkwell::context::Context;
use kalc_drv::{EvalOptions, EvalValue, Evaluator};

fn evaluator(context: &Context) -> Evaluator<'_> {
    Evaluator::new(context).expect("evaluator should initialize")
}

/// Evaluates one snippet and returns the first construct's value.
fn eval_value(e: &mut Evaluator<'_>, source: &str) -> Option<f64> {
    e.eval_expr(source, &EvalOptions::default())
        .unwrap_or_else(|err| panic!("evaluation of {:?} failed: {}", source, err))
}

#[test]
fn test_basic_arithmetic() {
    let context = Context::create();
    let mut e = evaluator(&context);
    assert_eq!(eval_value(&mut e, "3"), Some(3.0));
    assert_eq!(eval_value(&mut e, "3+3*4"), Some(15.0));
}

#[test]
fn test_definitions_yield_null_then_calls_work() {
    let context = Context::create();
    let mut e = evaluator(&context);
    assert_eq!(eval_value(&mut e, "def adder(x y) x+y"), None);
    assert_eq!(eval_value(&mut e, "adder(5, 4) + adder(3, 2)"), Some(14.0));
}

#[test]
fn test_libc_externs() {
    let context = Context::create();
    let mut e = evaluator(&context);
    assert_eq!(eval_value(&mut e, "extern ceil(x)"), None);
    assert_eq!(eval_value(&mut e, "ceil(4.5)"), Some(5.0));
    assert_eq!(eval_value(&mut e, "extern floor(x)"), None);
    assert_eq!(eval_value(&mut e, "def cfadder(x) ceil(x) + floor(x)"), None);
    assert_eq!(eval_value(&mut e, "cfadder(3.14)"), Some(7.0));
}

#[test]
fn test_if_expression_in_arithmetic() {
    let context = Context::create();
    let mut e = evaluator(&context);
    assert_eq!(
        eval_value(&mut e, "def foo(a b) a*if a<b then a+1 else b+1"),
        None
    );
    assert_eq!(eval_value(&mut e, "foo(5,4)"), Some(25.0));
    assert_eq!(eval_value(&mut e, "foo(4,5)"), Some(20.0));
}

#[test]
fn test_user_defined_binary_operator() {
    let context = Context::create();
    let mut e = evaluator(&context);
    assert_eq!(eval_value(&mut e, "def binary% (a b) a-b"), None);
    assert_eq!(eval_value(&mut e, "100 % 5.5"), Some(94.5));
}

#[test]
fn test_user_defined_unary_operators() {
    let context = Context::create();
    let mut e = evaluator(&context);
    assert_eq!(eval_value(&mut e, "def unary!(a) 0-a"), None);
    assert_eq!(eval_value(&mut e, "def unary^(a) a*a"), None);
    assert_eq!(eval_value(&mut e, "!^10"), Some(-100.0));
}

#[test]
fn test_low_precedence_sequencing_operator() {
    let context = Context::create();
    let mut e = evaluator(&context);
    assert_eq!(eval_value(&mut e, "def binary : 1 (x y) y"), None);
    assert_eq!(
        eval_value(
            &mut e,
            "def foo(step) var accum in (for i = 0, i < 10, step in accum = accum + i) : accum"
        ),
        None
    );
    assert_eq!(eval_value(&mut e, "foo(2)"), Some(30.0));
}

#[test]
fn test_for_loop_visits_value_after_final_step() {
    // The step is applied before the back-edge test, so the body runs
    // once more than a naive test-before-step loop: i visits 0..=10.
    let context = Context::create();
    let mut e = evaluator(&context);
    assert_eq!(eval_value(&mut e, "def binary : 1 (x y) y"), None);
    assert_eq!(
        eval_value(
            &mut e,
            "def count() var n in (for i = 0, i < 10, 2 in n = n + 1) : n"
        ),
        None
    );
    assert_eq!(eval_value(&mut e, "count()"), Some(6.0));
}

#[test]
fn test_for_loop_yields_zero() {
    let context = Context::create();
    let mut e = evaluator(&context);
    assert_eq!(
        eval_value(&mut e, "def f() for i = 1, i < 3 in i"),
        None
    );
    assert_eq!(eval_value(&mut e, "f()"), Some(0.0));
}

#[test]
fn test_var_initializer_does_not_see_its_own_name() {
    let context = Context::create();
    let mut e = evaluator(&context);
    // The inner `a`'s initializer reads the parameter `a`.
    assert_eq!(eval_value(&mut e, "def f(a) var a = a*2 in a"), None);
    assert_eq!(eval_value(&mut e, "f(3)"), Some(6.0));
}

#[test]
fn test_uninitialized_var_defaults_to_zero() {
    let context = Context::create();
    let mut e = evaluator(&context);
    assert_eq!(eval_value(&mut e, "def f() var a in a + 1"), None);
    assert_eq!(eval_value(&mut e, "f()"), Some(1.0));
}

#[test]
fn test_chained_assignment_is_right_associative() {
    let context = Context::create();
    let mut e = evaluator(&context);
    assert_eq!(
        eval_value(&mut e, "def f(x) var a, b in (a = b = x + 1) + a * b"),
        None
    );
    // a = b = 4, so the expression is 4 + 16.
    assert_eq!(eval_value(&mut e, "f(3)"), Some(20.0));
}

#[test]
fn test_mutable_loop_accumulation() {
    let context = Context::create();
    let mut e = evaluator(&context);
    assert_eq!(eval_value(&mut e, "def binary : 1 (x y) y"), None);
    assert_eq!(
        eval_value(
            &mut e,
            "def sum(n) var accum in (for i = 1, i < n in accum = accum + i) : accum"
        ),
        None
    );
    // 1 + 2 + ... + 10 (the loop body also runs for i = 10).
    assert_eq!(eval_value(&mut e, "sum(10)"), Some(55.0));
}

#[test]
fn test_putchard_returns_zero() {
    let context = Context::create();
    let mut e = evaluator(&context);
    assert_eq!(eval_value(&mut e, "putchard(88)"), Some(0.0));
}

#[test]
fn test_purity_across_independent_evaluators() {
    let context_a = Context::create();
    let context_b = Context::create();
    let mut a = evaluator(&context_a);
    let mut b = evaluator(&context_b);

    for source in ["3+3*4", "(1+2)*(3+4)", "if 1 < 2 then 10 else 20"] {
        assert_eq!(eval_value(&mut a, source), eval_value(&mut b, source));
    }
}

#[test]
fn test_multiple_constructs_in_one_source() {
    let context = Context::create();
    let mut e = evaluator(&context);
    let results: Vec<_> = e
        .eval("def adder(x y) x+y ; adder(1, 2) ; adder(2, 3)", &EvalOptions::default())
        .collect::<Result<_, _>>()
        .expect("evaluation should succeed");

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].value, None);
    assert_eq!(results[1].value, Some(EvalValue::Double(3.0)));
    assert_eq!(results[2].value, Some(EvalValue::Double(5.0)));
}

#[test]
fn test_parseonly_yields_printed_ast() {
    let context = Context::create();
    let mut e = evaluator(&context);
    let options = EvalOptions {
        parseonly: true,
        ..EvalOptions::default()
    };
    let result = e.eval("1 + 2 * 3", &options).next().unwrap().unwrap();
    assert_eq!(
        result.value,
        Some(EvalValue::Text("(1 + (2 * 3))".to_string()))
    );
    // Nothing was emitted.
    assert!(result.unoptimized_ir.is_none());
    assert!(e.history().is_empty());
}

#[test]
fn test_noexec_yields_unoptimized_ir() {
    let context = Context::create();
    let mut e = evaluator(&context);
    let options = EvalOptions {
        noexec: true,
        ..EvalOptions::default()
    };
    let result = e.eval("1 + 2", &options).next().unwrap().unwrap();
    match result.value {
        Some(EvalValue::Text(ir)) => assert!(ir.contains("define double @_anon_fn_0")),
        other => panic!("expected IR text, got {:?}", other),
    }
}

#[test]
fn test_expression_results_carry_both_ir_stages() {
    let context = Context::create();
    let mut e = evaluator(&context);
    let result = e
        .eval("2 + 2", &EvalOptions::default())
        .next()
        .unwrap()
        .unwrap();
    let unopt = result.unoptimized_ir.expect("unoptimized IR");
    assert!(unopt.contains("_anon_fn_0"));
    let opt = result.optimized_ir.expect("optimized IR");
    assert!(opt.contains("_anon_fn_0"));
    assert_eq!(result.value, Some(EvalValue::Double(4.0)));
}

#[test]
fn test_history_records_declarations_only() {
    let context = Context::create();
    let mut e = evaluator(&context);
    eval_value(&mut e, "def f(x) x+1");
    eval_value(&mut e, "extern sin(x)");
    eval_value(&mut e, "f(1)");
    let names: Vec<_> = e.history().iter().map(|item| item.proto().name.clone()).collect();
    assert_eq!(names, vec!["f".to_string(), "sin".to_string()]);
}

#[test]
fn test_parse_error_does_not_poison_evaluator() {
    let context = Context::create();
    let mut e = evaluator(&context);
    let err = e
        .eval("def (", &EvalOptions::default())
        .next()
        .unwrap()
        .unwrap_err();
    assert!(err.to_string().contains("parse error"));
    // The module was never touched; evaluation continues to work.
    assert_eq!(eval_value(&mut e, "1+1"), Some(2.0));
}

#[test]
fn test_codegen_error_then_reset_recovers() {
    let context = Context::create();
    let mut e = evaluator(&context);
    assert_eq!(eval_value(&mut e, "def ok(x) x+1"), None);

    // A body referencing an unknown name corrupts the module.
    let err = e
        .eval("def bad(x) nope", &EvalOptions::default())
        .next()
        .unwrap()
        .unwrap_err();
    assert!(err.to_string().contains("unknown variable"));

    // Replaying the recorded history rebuilds a working module.
    assert!(e.reset(None));
    assert_eq!(eval_value(&mut e, "ok(2)"), Some(3.0));
}

#[test]
fn test_reset_replays_user_operators() {
    let context = Context::create();
    let mut e = evaluator(&context);
    assert_eq!(eval_value(&mut e, "def binary% 42 (a b) a-b"), None);
    assert_eq!(eval_value(&mut e, "10 % 4"), Some(6.0));

    assert!(e.reset(None));
    // The operator still parses and still resolves after the rebuild.
    assert_eq!(eval_value(&mut e, "10 % 4"), Some(6.0));
}

#[test]
fn test_reset_with_external_history_matches_inline_evaluation() {
    let definition = "def adder(x y) x+y";
    let expression = "adder(40, 2)";

    // Record the definition's AST on one evaluator.
    let context_a = Context::create();
    let mut a = evaluator(&context_a);
    eval_value(&mut a, definition);
    let history = a.history().to_vec();

    // Replay it on a fresh evaluator.
    let context_b = Context::create();
    let mut b = evaluator(&context_b);
    assert!(b.reset(Some(&history)));
    let replayed = eval_value(&mut b, expression);

    // Compare against evaluating both constructs inline.
    let context_c = Context::create();
    let mut c = evaluator(&context_c);
    let inline = c
        .eval(
            &format!("{}\n{}", definition, expression),
            &EvalOptions::default(),
        )
        .last()
        .unwrap()
        .unwrap()
        .value
        .and_then(|v| v.as_double());

    assert_eq!(replayed, Some(42.0));
    assert_eq!(replayed, inline);
}

#[test]
fn test_reset_with_empty_history_clears_definitions() {
    let context = Context::create();
    let mut e = evaluator(&context);
    eval_value(&mut e, "def f(x) x");
    assert!(e.reset(Some(&[])));
    let err = e
        .eval("f(1)", &EvalOptions::default())
        .next()
        .unwrap()
        .unwrap_err();
    assert!(err.to_string().contains("unknown function"));
}

#[test]
fn test_reset_failure_is_atomic() {
    let context = Context::create();
    let mut e = evaluator(&context);
    eval_value(&mut e, "def keep(x) x*2");

    // A history that redefines the same name cannot replay.
    let mut broken = e.history().to_vec();
    broken.push(broken[0].clone());
    assert!(!e.reset(Some(&broken)));

    // The pre-reset module and history are untouched.
    assert_eq!(eval_value(&mut e, "keep(21)"), Some(42.0));
    assert_eq!(e.history().len(), 1);
}

#[test]
fn test_redefinition_is_rejected() {
    let context = Context::create();
    let mut e = evaluator(&context);
    eval_value(&mut e, "def f(x) x");
    let err = e
        .eval("def f(x) x+1", &EvalOptions::default())
        .next()
        .unwrap()
        .unwrap_err();
    assert!(err.to_string().contains("redefinition"));
}

#[test]
fn test_compile_to_object_produces_bytes() {
    let context = Context::create();
    let mut e = evaluator(&context);
    eval_value(&mut e, "def double_it(x) x*2");
    let object = e.compile_to_object(None).expect("object emission");
    assert!(!object.is_empty());
}

#[test]
fn test_anonymous_wrappers_do_not_collide() {
    let context = Context::create();
    let mut e = evaluator(&context);
    // Each expression gets a fresh wrapper name inside one module.
    assert_eq!(eval_value(&mut e, "1"), Some(1.0));
    assert_eq!(eval_value(&mut e, "2"), Some(2.0));
    assert_eq!(eval_value(&mut e, "3"), Some(3.0));
    let ir = e.module_ir();
    assert!(ir.contains("_anon_fn_0"));
    assert!(ir.contains("_anon_fn_1"));
    assert!(ir.contains("_anon_fn_2"));
}

#[test]
fn test_operators_take_effect_for_later_constructs_only() {
    let context = Context::create();
    let mut e = evaluator(&context);

    // Before its prototype is parsed, '%' is not a binary operator: the
    // source splits into `1` and the unary application `%2`, and the
    // latter fails in the emitter.
    {
        let mut stream = e.eval("1 % 2", &EvalOptions::default());
        let first = stream.next().unwrap().unwrap();
        assert_eq!(first.value, Some(EvalValue::Double(1.0)));
        let err = stream.next().unwrap().unwrap_err();
        assert!(err.to_string().contains("unknown unary operator"));
    }

    // The failed wrapper left the module inconsistent; rebuild it.
    assert!(e.reset(None));

    assert_eq!(eval_value(&mut e, "def binary% (a b) a-b"), None);
    assert_eq!(eval_value(&mut e, "7 % 2"), Some(5.0));
}
