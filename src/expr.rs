//! Conditional-memory expression evaluation
//!
//! Thin wrapper over `evalexpr`: variables are bound as floats, the
//! math function set the expression contract requires is registered
//! explicitly, and the numeric result is reduced to a boolean by
//! |x| > 1e-10 at the call site.

use crate::error::{EngineError, EngineResult};
use evalexpr::{
    eval_with_context, ContextWithMutableFunctions, ContextWithMutableVariables, EvalexprError,
    Function, HashMapContext, Value,
};
use std::collections::HashMap;

/// Threshold below which a numeric result counts as false
pub const TRUTH_EPSILON: f64 = 1e-10;

pub fn truthy(x: f64) -> bool {
    x.abs() > TRUTH_EPSILON
}

fn numbers(argument: &Value) -> Result<Vec<f64>, EvalexprError> {
    match argument {
        Value::Tuple(values) => values.iter().map(|v| v.as_number()).collect(),
        other => Ok(vec![other.as_number()?]),
    }
}

fn unary(argument: &Value) -> Result<f64, EvalexprError> {
    argument.as_number()
}

fn build_context(variables: &HashMap<String, f64>) -> EngineResult<HashMapContext> {
    let mut context = HashMapContext::new();
    for (name, value) in variables {
        context.set_value(name.clone(), Value::Float(*value))?;
    }
    context.set_function(
        "abs".into(),
        Function::new(|arg| Ok(Value::Float(unary(arg)?.abs()))),
    )?;
    context.set_function(
        "sqrt".into(),
        Function::new(|arg| Ok(Value::Float(unary(arg)?.sqrt()))),
    )?;
    context.set_function(
        "round".into(),
        Function::new(|arg| Ok(Value::Float(unary(arg)?.round()))),
    )?;
    context.set_function(
        "min".into(),
        Function::new(|arg| {
            let values = numbers(arg)?;
            values
                .into_iter()
                .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |a| a.min(v))))
                .map(Value::Float)
                .ok_or_else(|| EvalexprError::CustomMessage("min needs arguments".into()))
        }),
    )?;
    context.set_function(
        "max".into(),
        Function::new(|arg| {
            let values = numbers(arg)?;
            values
                .into_iter()
                .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |a| a.max(v))))
                .map(Value::Float)
                .ok_or_else(|| EvalexprError::CustomMessage("max needs arguments".into()))
        }),
    )?;
    Ok(context)
}

/// Evaluate an expression to a number
///
/// Boolean results map to 1/0 so comparison chains compose with the
/// numeric output path.
pub fn evaluate(expression: &str, variables: &HashMap<String, f64>) -> EngineResult<f64> {
    let context = build_context(variables)?;
    match eval_with_context(expression, &context)? {
        Value::Float(f) => Ok(f),
        Value::Int(i) => Ok(i as f64),
        Value::Boolean(b) => Ok(if b { 1.0 } else { 0.0 }),
        other => Err(EngineError::Expression(format!(
            "expression produced a non-numeric value: {other:?}"
        ))),
    }
}
