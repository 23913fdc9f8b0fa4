//! Glue between `for` forms and the iteration scheduler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::expression::evaluate_expression;
use crate::ast::{Expression, ForExpression, ForOptions, Node};
use crate::env::Environment;
use crate::error::{MlldError, Result};
use crate::iter::{
    IterationBody, IterationItem, ParallelOptions, iteration_items, run_iterations,
};
use crate::value::{ScopeKind, StructuredValue, Variable, VariableSource};

/// Resolve a `parallel(cap?, rate?)` clause against the environment.
///
/// Both fields accept numeric literals or variables; `rate` additionally
/// accepts duration strings (`100ms`, `2s`).
pub async fn resolve_parallel_options(
    options: &ForOptions,
    env: &Arc<Environment>,
) -> Result<ParallelOptions> {
    let Some(spec) = &options.parallel else {
        return Ok(ParallelOptions::default());
    };

    let cap = match &spec.cap {
        None => None,
        Some(expr) => {
            let value = evaluate_expression(expr, env).await?;
            let cap = value.data.as_u64().or_else(|| value.text.parse().ok());
            Some(cap.ok_or_else(|| MlldError::TypeMismatch {
                expected: "a numeric parallelism cap".to_string(),
                found: value.text.clone(),
                location: None,
            })? as usize)
        }
    };

    let rate = match &spec.rate {
        None => None,
        Some(expr) => {
            let value = evaluate_expression(expr, env).await?;
            Some(parse_rate_value(&value)?)
        }
    };

    Ok(ParallelOptions::parallel(cap, rate))
}

/// A rate is a minimum inter-dispatch interval: plain numbers are
/// milliseconds, strings may carry `ms` or `s` suffixes.
pub(crate) fn parse_rate_value(value: &StructuredValue) -> Result<Duration> {
    if let Some(ms) = value.data.as_u64() {
        return Ok(Duration::from_millis(ms));
    }
    let text = value.text.trim();
    let parsed = if let Some(stripped) = text.strip_suffix("ms") {
        stripped.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(stripped) = text.strip_suffix('s') {
        stripped
            .trim()
            .parse::<f64>()
            .ok()
            .map(Duration::from_secs_f64)
    } else {
        text.parse::<u64>().ok().map(Duration::from_millis)
    };
    parsed.ok_or_else(|| MlldError::TypeMismatch {
        expected: "a duration (`250`, `250ms`, `2s`)".to_string(),
        found: value.text.clone(),
        location: None,
    })
}

fn bind_iteration(
    env: &Arc<Environment>,
    binding: &str,
    item: &IterationItem,
    index: usize,
    total: usize,
) -> Result<()> {
    env.set(Variable::new(
        binding,
        item.bound_value(index, total),
        VariableSource::Let,
        ScopeKind::Block,
    ))?;
    if let Some(key) = &item.key {
        env.set(Variable::new(
            format!("{binding}_key"),
            StructuredValue::text(key.clone()),
            VariableSource::Let,
            ScopeKind::Block,
        ))?;
    }
    Ok(())
}

/// Expression form: collects per-iteration results in source order.
struct ExpressionBody<'a> {
    binding: &'a str,
    filter: Option<&'a Expression>,
    body: &'a Expression,
    total: usize,
}

#[async_trait]
impl IterationBody for ExpressionBody<'_> {
    async fn execute(
        &self,
        index: usize,
        item: &IterationItem,
        env: Arc<Environment>,
    ) -> Result<Option<StructuredValue>> {
        bind_iteration(&env, self.binding, item, index, self.total)?;
        if let Some(filter) = self.filter {
            if !evaluate_expression(filter, &env).await?.is_truthy() {
                return Ok(None);
            }
        }
        Ok(Some(evaluate_expression(self.body, &env).await?))
    }
}

/// Directive form: the body runs for its effects, results are discarded.
struct DirectiveBody<'a> {
    binding: &'a str,
    body: &'a [Node],
    total: usize,
}

#[async_trait]
impl IterationBody for DirectiveBody<'_> {
    async fn execute(
        &self,
        index: usize,
        item: &IterationItem,
        env: Arc<Environment>,
    ) -> Result<Option<StructuredValue>> {
        bind_iteration(&env, self.binding, item, index, self.total)?;
        super::directive::evaluate_nodes(self.body, &env).await?;
        Ok(Some(StructuredValue::empty()))
    }
}

/// `for @x in @src => expr` (with optional `when` filter).
pub(crate) async fn evaluate_for_expression(
    for_expr: &ForExpression,
    env: &Arc<Environment>,
) -> Result<StructuredValue> {
    let source = evaluate_expression(&for_expr.source, env).await?;
    let items = iteration_items(&source)?;
    let options = resolve_parallel_options(&for_expr.options, env).await?;

    let body = ExpressionBody {
        binding: &for_expr.binding,
        filter: for_expr.filter.as_deref(),
        body: &for_expr.body,
        total: items.len(),
    };
    let results = run_iterations(env, &items, options, &body).await?;
    Ok(StructuredValue::array_of(results))
}

/// `/for @x in @src [body]`.
pub(crate) async fn evaluate_for_directive(
    binding: &str,
    source: &Expression,
    body: &[Node],
    options: &ForOptions,
    env: &Arc<Environment>,
) -> Result<()> {
    let source = evaluate_expression(source, env).await?;
    let items = iteration_items(&source)?;
    let resolved = resolve_parallel_options(options, env).await?;

    let body = DirectiveBody {
        binding,
        body,
        total: items.len(),
    };
    let _ = run_iterations(env, &items, resolved, &body).await?;
    Ok(())
}
