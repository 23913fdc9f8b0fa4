//! Expression reduction.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use crate::ast::{
    BinaryOp, ExecInvocation, Expression, GuardPhase, TailModifier, UnaryOp, WhenCondition,
    WhenExpression, WhenSubtype,
};
use crate::effects::Effect;
use crate::env::{ChildScope, Environment, OpDescriptor};
use crate::error::{MlldError, Result};
use crate::exec::execute_body;
use crate::guard::{allow_value, deny_value, retry_value, run_guards};
use crate::interp::{
    InterpolationContext, load_alligator, render_template, resolve_reference,
};
use crate::value::{ScopeKind, StructuredValue, Variable, VariableSource};

/// Computation-boundary view of a value: parsed data when present, raw
/// text otherwise.
pub(crate) fn datum(value: &StructuredValue) -> Value {
    if value.data.is_null() {
        Value::String(value.text.clone())
    } else {
        value.data.clone()
    }
}

/// Reduce an expression to a `StructuredValue`.
pub fn evaluate_expression<'a>(
    expr: &'a Expression,
    env: &'a Arc<Environment>,
) -> BoxFuture<'a, Result<StructuredValue>> {
    Box::pin(async move {
        match expr {
            Expression::Literal(value) => Ok(StructuredValue::json(value.clone())),

            Expression::Template(template) => {
                render_template(template, env, InterpolationContext::Template)
            }

            Expression::VarRef(reference) => resolve_reference(reference, env),

            Expression::Alligator(path) => load_alligator(path, env).await,

            Expression::Invoke(invocation) => invoke_callable(invocation, env).await,

            Expression::Pipeline(pipeline) => {
                super::pipeline_exec::evaluate_pipeline(pipeline, env).await
            }

            Expression::When(when) => evaluate_when(when, env).await,

            Expression::For(for_expr) => {
                super::iteration::evaluate_for_expression(for_expr, env).await
            }

            Expression::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(evaluate_expression(item, env).await?);
                }
                Ok(StructuredValue::array_of(values))
            }

            Expression::Object(pairs) => {
                let mut map = Map::new();
                let mut security = crate::value::SecurityDescriptor::default();
                for (key, value_expr) in pairs {
                    let value = evaluate_expression(value_expr, env).await?;
                    security.merge_from(value.security());
                    let _ = map.insert(key.clone(), datum(&value));
                }
                Ok(StructuredValue::json(Value::Object(map)).with_security(security))
            }

            Expression::Unary { op, expr } => {
                let value = evaluate_expression(expr, env).await?;
                match op {
                    UnaryOp::Not => {
                        Ok(value.rewrap(Value::Bool(!value.is_truthy()), crate::value::ValueKind::Json))
                    }
                }
            }

            Expression::Binary { op, lhs, rhs } => evaluate_binary(*op, lhs, rhs, env).await,

            Expression::Command(template) => {
                crate::exec::check_command_template(template)?;
                let rendered =
                    render_template(template, env, InterpolationContext::ShellCommand)?;
                let mut value = crate::exec::run_command_line(
                    env,
                    &rendered.text,
                    "run",
                    "op:run",
                    crate::ast::WithOptions::default(),
                )
                .await?;
                value.merge_security(rendered.security());
                Ok(value)
            }

            Expression::Retry { hint } => {
                let hint = match hint {
                    Some(expr) => Some(evaluate_expression(expr, env).await?.text),
                    None => None,
                };
                Ok(retry_value(hint))
            }

            Expression::Allow => Ok(allow_value()),

            Expression::Deny { message } => {
                let message = match message {
                    Some(expr) => evaluate_expression(expr, env).await?.text,
                    None => "denied by guard".to_string(),
                };
                Ok(deny_value(message))
            }
        }
    })
}

async fn evaluate_binary(
    op: BinaryOp,
    lhs: &Expression,
    rhs: &Expression,
    env: &Arc<Environment>,
) -> Result<StructuredValue> {
    // && and || short-circuit on truthiness before the right side runs.
    if matches!(op, BinaryOp::And | BinaryOp::Or) {
        let left = evaluate_expression(lhs, env).await?;
        let left_truthy = left.is_truthy();
        let outcome = match op {
            BinaryOp::And if !left_truthy => false,
            BinaryOp::Or if left_truthy => true,
            _ => evaluate_expression(rhs, env).await?.is_truthy(),
        };
        return Ok(StructuredValue::json(Value::Bool(outcome)));
    }

    let left = evaluate_expression(lhs, env).await?;
    let right = evaluate_expression(rhs, env).await?;
    let result = match op {
        BinaryOp::Eq => datum(&left) == datum(&right),
        BinaryOp::Ne => datum(&left) != datum(&right),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(&left, &right).ok_or_else(|| MlldError::TypeMismatch {
                expected: "comparable values".to_string(),
                found: format!("`{}` vs `{}`", left.text, right.text),
                location: None,
            })?;
            match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                BinaryOp::Ge => ordering.is_ge(),
                _ => unreachable!("handled above"),
            }
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    };
    let mut value = StructuredValue::json(Value::Bool(result));
    value.merge_security(left.security());
    value.merge_security(right.security());
    Ok(value)
}

fn compare(left: &StructuredValue, right: &StructuredValue) -> Option<std::cmp::Ordering> {
    let (l, r) = (datum(left), datum(right));
    match (&l, &r) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Evaluate a `when` expression.
///
/// `first` returns the result of the first truthy branch; `all` evaluates
/// every truthy branch for its effects and returns the last result. The
/// wildcard arm always matches.
pub fn evaluate_when<'a>(
    when: &'a WhenExpression,
    env: &'a Arc<Environment>,
) -> BoxFuture<'a, Result<StructuredValue>> {
    Box::pin(async move {
        let mut last = StructuredValue::empty();
        for branch in &when.branches {
            let matched = match &branch.condition {
                WhenCondition::Wildcard => true,
                WhenCondition::Expr(cond) => evaluate_expression(cond, env).await?.is_truthy(),
            };
            if !matched {
                continue;
            }
            let result = evaluate_expression(&branch.result, env).await?;
            match when.subtype {
                WhenSubtype::First => return Ok(result),
                WhenSubtype::All => last = result,
            }
        }
        Ok(last)
    })
}

/// Built-in transformer callables that need no `/exe` definition.
async fn invoke_builtin(
    name: &str,
    args: &[StructuredValue],
    env: &Arc<Environment>,
) -> Option<Result<StructuredValue>> {
    let first = args.first();
    match name {
        "upper" => {
            let input = first?;
            Some(Ok(input.rewrap(
                Value::String(input.text.to_uppercase()),
                crate::value::ValueKind::Text,
            )))
        }
        "json" => {
            let input = first?;
            Some(Ok(input.rewrap(datum(input), crate::value::ValueKind::Json)))
        }
        "exists" => {
            let input = first?;
            Some(Ok(StructuredValue::json(Value::Bool(
                env.get(&input.text).is_some(),
            ))))
        }
        "log" => {
            let input = first?;
            env.emit_effect(Effect::stderr(format!("{}\n", input.text)));
            Some(Ok(input.clone()))
        }
        _ => None,
    }
}

/// Invoke a callable: an `/exe` binding or a built-in transformer.
///
/// Guards for `op:exe` run before the body and again on the output; a
/// trailing `| log` duplicates the result to stderr without consuming it.
pub async fn invoke_callable(
    invocation: &ExecInvocation,
    env: &Arc<Environment>,
) -> Result<StructuredValue> {
    let mut args = Vec::with_capacity(invocation.args.len());
    for arg in &invocation.args {
        args.push(evaluate_expression(arg, env).await?);
    }
    invoke_with_args(invocation, env, args).await
}

/// Invocation entry used by pipeline stages, where the stage input becomes
/// the first argument.
pub(crate) async fn invoke_with_args(
    invocation: &ExecInvocation,
    env: &Arc<Environment>,
    args: Vec<StructuredValue>,
) -> Result<StructuredValue> {
    let name = invocation.target.as_str();

    if env.get(name).is_none() {
        if let Some(result) = invoke_builtin(name, &args, env).await {
            return result;
        }
    }

    let variable = env.get(name).ok_or_else(|| MlldError::VariableNotFound {
        name: name.to_string(),
        location: None,
    })?;
    let def = match (&variable.source_kind, &variable.exe) {
        (VariableSource::Exe, Some(def)) => Arc::clone(def),
        _ => {
            return Err(MlldError::TypeMismatch {
                expected: "a callable (/exe binding)".to_string(),
                found: format!("@{name}"),
                location: None,
            });
        }
    };

    let primary_input = args.first().cloned().unwrap_or_else(StructuredValue::empty);
    let op = OpDescriptor::new("op:exe", name).with_labels(
        primary_input
            .security()
            .labels
            .iter()
            .cloned()
            .collect(),
    );

    run_guards(
        env,
        GuardPhase::Before,
        &op,
        &primary_input,
        invocation.options.skip_guards,
    )
    .await?
    .into_result()?;

    // Bind parameters positionally; missing arguments bind empty.
    let exec_env = env.create_child(ChildScope::ExecCall);
    for (position, param) in def.params.iter().enumerate() {
        let value = args
            .get(position)
            .cloned()
            .unwrap_or_else(StructuredValue::empty);
        exec_env.set(Variable::new(
            param.as_str(),
            value,
            VariableSource::Let,
            ScopeKind::Parameter,
        ))?;
    }

    let output = execute_body(
        &exec_env,
        name,
        "op:exe",
        &def.body,
        &def.params,
        &args,
        invocation.options,
    )
    .await?;

    run_guards(
        env,
        GuardPhase::After,
        &op,
        &output,
        invocation.options.skip_guards,
    )
    .await?
    .into_result()?;

    if invocation.tail == Some(TailModifier::Log) {
        env.emit_effect(Effect::stderr(format!("{}\n", output.text)));
    }

    Ok(output)
}
