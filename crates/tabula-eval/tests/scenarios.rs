//! End-to-end behaviour through the public engine API.
use std::any::Any;
use std::sync::Arc;

use tabula_common::{CustomData, DataType, ErrorCode, Value};
use tabula_eval::token::IdNamer;
use tabula_eval::{
    AsyncOperator, Compiler, Engine, EngineConfig, EquationStack, Evaluator, FunctionOperator, PoolConfig,
    Registry, Token, TokenType, evaluator::StaticContext,
};

fn engine() -> Engine {
    Engine::new(EngineConfig {
        pending_pool: PoolConfig::new("it-pending").with_threads(1),
        listener_pool: PoolConfig::new("it-listener").with_threads(1),
        ..EngineConfig::default()
    })
    .unwrap()
}

#[test]
fn arithmetic_compiles_to_postfix_and_evaluates() {
    let registry = Registry::new();
    let stack = Compiler::standalone(&registry).compile("2 + 3 * 4").into_result().unwrap();
    assert_eq!(stack.render(&IdNamer), "2 3 4 * +");
    let result = Evaluator::new(&registry).evaluate(&stack, &StaticContext::default());
    assert_eq!(result, Token::number(14.0));
}

#[test]
fn column_derivation_tracks_its_input() {
    let e = engine();
    let t = e.create_table(Some("Squares"), 3, 2);
    let input = e.cell(t, 3, 1).unwrap().unwrap();
    let output = e.cell(t, 3, 2).unwrap().unwrap();
    let target = e.column(t, 2).unwrap().unwrap();

    e.set_value(input, 5.0).unwrap();
    e.set_derivation(target, "col 1 * col 1").unwrap();
    assert_eq!(e.value(output).unwrap(), Some(Value::Number(25.0)));

    e.set_value(input, 6.0).unwrap();
    e.recalculate(target).unwrap();
    assert_eq!(e.value(output).unwrap(), Some(Value::Number(36.0)));
}

#[test]
fn underflowing_stack_is_an_error_value() {
    let registry = Registry::new();
    let plus = registry.look_up_token("+").unwrap();
    let stack = EquationStack::postfix(vec![Token::number(1.0), plus]);
    let result = Evaluator::new(&registry).evaluate(&stack, &StaticContext::default());
    assert_eq!(result, Token::Error(ErrorCode::StackUnderflow));
}

#[derive(Debug)]
struct Vector2(f64, f64);

impl CustomData for Vector2 {
    fn type_name(&self) -> &'static str {
        "vec2"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn render(&self) -> String {
        format!("<{}, {}>", self.0, self.1)
    }

    fn eq_data(&self, other: &dyn CustomData) -> bool {
        other
            .as_any()
            .downcast_ref::<Vector2>()
            .is_some_and(|o| o.0 == self.0 && o.1 == self.1)
    }
}

fn vector(v: &Value) -> Option<&Vector2> {
    match v {
        Value::Custom(c) => c.as_any().downcast_ref::<Vector2>(),
        _ => None,
    }
}

#[test]
fn plus_overload_applies_only_to_exact_types() {
    let e = engine();
    let add = FunctionOperator::new(
        "vecadd",
        vec![DataType::Custom("vec2"), DataType::Custom("vec2")],
        DataType::Custom("vec2"),
        |args: &[Value]| match (vector(&args[0]), vector(&args[1])) {
            (Some(a), Some(b)) => Ok(Value::custom(Vector2(a.0 + b.0, a.1 + b.1))),
            _ => Err(ErrorCode::OperandDataTypeMismatch),
        },
    )
    .with_token_type(TokenType::BinaryOp);
    e.registry().overload_operator("+", Arc::new(add)).unwrap();

    let t = e.create_table(None, 3, 3);
    let cell = |r, c| e.cell(t, r, c).unwrap().unwrap();
    e.set_value(cell(1, 1), Value::custom(Vector2(1.0, 2.0))).unwrap();
    e.set_value(cell(1, 2), Value::custom(Vector2(0.5, 0.5))).unwrap();
    e.set_value(cell(2, 1), 1.0).unwrap();
    e.set_value(cell(2, 2), 2.0).unwrap();
    e.set_value(cell(3, 1), Value::custom(Vector2(1.0, 1.0))).unwrap();
    e.set_value(cell(3, 2), 2.0).unwrap();
    e.set_derivation(e.column(t, 3).unwrap().unwrap(), "col 1 + col 2").unwrap();

    assert_eq!(
        e.value(cell(1, 3)).unwrap(),
        Some(Value::custom(Vector2(1.5, 2.5)))
    );
    assert_eq!(e.value(cell(2, 3)).unwrap(), Some(Value::Number(3.0)));
    assert_eq!(
        e.value(cell(3, 3)).unwrap(),
        Some(Value::Error(ErrorCode::OperandDataTypeMismatch))
    );
}

#[test]
fn async_lookup_completes_through_post_result() {
    let e = engine();
    let lookup = AsyncOperator::external("lookup", vec![DataType::Number], DataType::Number);
    e.registry().register_operator(Arc::new(lookup)).unwrap();

    let t = e.create_table(None, 1, 3);
    let key = e.cell(t, 1, 1).unwrap().unwrap();
    let fetched = e.cell(t, 1, 2).unwrap().unwrap();
    let shown = e.cell(t, 1, 3).unwrap().unwrap();
    e.set_value(key, 7.0).unwrap();
    e.set_derivation(e.column(t, 3).unwrap().unwrap(), "col 2 * 2").unwrap();

    let summary = e.set_derivation(e.column(t, 2).unwrap().unwrap(), "lookup(col 1)").unwrap();
    assert_eq!(summary.pending, 1);
    assert_eq!(e.value(fetched).unwrap(), None);

    let tx = e.pending_transaction(fetched).unwrap();
    e.post_result(tx, 42.0).unwrap();
    assert_eq!(e.value(fetched).unwrap(), Some(Value::Number(42.0)));
    assert_eq!(e.value(shown).unwrap(), Some(Value::Number(84.0)));
}
