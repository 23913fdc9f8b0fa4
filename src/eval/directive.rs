//! Directive dispatch.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::debug;

use super::expression::{datum, evaluate_expression, evaluate_when};
use super::iteration::{evaluate_for_directive, parse_rate_value};
use crate::ast::{Directive, Document, Expression, Node, OutputTarget, WithOptions};
use crate::effects::Effect;
use crate::env::{ChildScope, Environment, OpDescriptor};
use crate::error::{MlldError, Result};
use crate::event_bus::RuntimeEvent;
use crate::guard::{GuardHook, PolicyFrame, run_guards};
use crate::interp::{InterpolationContext, render_template};
use crate::parser::ParseMode;
use crate::runtime::ResolvedModule;
use crate::value::{
    ExeDef, ScopeKind, SecurityDescriptor, StructuredValue, Variable, VariableSource,
};

/// Evaluate a whole document against its root environment.
pub async fn evaluate_document(document: &Document, env: &Arc<Environment>) -> Result<()> {
    evaluate_nodes(&document.nodes, env).await
}

/// Evaluate a node sequence in order, committing effects as they occur.
pub fn evaluate_nodes<'a>(
    nodes: &'a [Node],
    env: &'a Arc<Environment>,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        for node in nodes {
            match node {
                Node::Text { content, .. } => {
                    env.emit_effect(Effect::doc(content.clone()));
                }
                Node::CodeFence {
                    language, content, ..
                } => {
                    let fence = match language {
                        Some(lang) => format!("```{lang}\n{content}\n```\n"),
                        None => format!("```\n{content}\n```\n"),
                    };
                    env.emit_effect(Effect::doc(fence));
                }
                Node::Comment { .. } | Node::Frontmatter { .. } => {}
                Node::Directive(directive) => {
                    let _ = evaluate_directive(directive, env).await?;
                }
            }
        }
        Ok(())
    })
}

/// Evaluate one directive, returning its value (empty for pure effects).
pub fn evaluate_directive<'a>(
    directive: &'a Directive,
    env: &'a Arc<Environment>,
) -> BoxFuture<'a, Result<StructuredValue>> {
    Box::pin(async move {
        if env.handles().options.debug {
            let _ = env.handles().emitter.emit(RuntimeEvent::debug(
                format!("debug:directive:{}", directive.kind()),
                directive.location().to_string(),
            ));
        }
        debug!(kind = %directive.kind(), "evaluating directive");

        match directive {
            Directive::Var {
                name,
                labels,
                expr,
                location,
            } => {
                if env.handles().options.strict && env.kind() == ChildScope::Block {
                    return Err(MlldError::Parse {
                        message: format!(
                            "/var @{name} is not allowed inside a conditional block in strict mode"
                        ),
                        location: Some(location.clone()),
                    });
                }
                bind_value(env, name, labels, expr, VariableSource::Var, ScopeKind::Module)
                    .await
            }

            Directive::Let {
                name, labels, expr, ..
            } => bind_value(env, name, labels, expr, VariableSource::Let, ScopeKind::Block).await,

            Directive::Exe {
                name,
                params,
                body,
                location,
            } => {
                let def = ExeDef {
                    name: name.clone(),
                    params: params.clone(),
                    body: body.clone(),
                    location: location.clone(),
                };
                env.set(Variable::callable(def, ScopeKind::Module).at(location.clone()))?;
                Ok(StructuredValue::empty())
            }

            Directive::Path { name, target, .. } => {
                let value = evaluate_expression(target, env).await?;
                let text = value.text.clone();
                let resolved = if text.starts_with("http://") || text.starts_with("https://") {
                    text
                } else {
                    env.resolve_path(&text)?.display().to_string()
                };
                env.set(Variable::new(
                    name,
                    StructuredValue::text(resolved).with_security(value.security().clone()),
                    VariableSource::Path,
                    ScopeKind::Module,
                ))?;
                Ok(StructuredValue::empty())
            }

            Directive::Show { expr, options, .. } => {
                let value = evaluate_expression(expr, env).await?;
                guard_gate(env, "op:show", "show", &value, options).await?;
                crate::guard::enforce_label_flow(env, value.security(), "op:show")?;
                env.emit_effect(
                    Effect::doc(with_newline(&value.text))
                        .with_security(value.security().clone()),
                );
                Ok(value)
            }

            Directive::Run { expr, options, .. } => evaluate_run(expr, options, env).await,

            Directive::Output {
                expr,
                target,
                append,
                ..
            } => evaluate_output(expr, target, *append, env).await,

            Directive::Import { names, source, .. } => {
                evaluate_import(names, source, env).await?;
                Ok(StructuredValue::empty())
            }

            Directive::Export { names, .. } => {
                env.record_export(names);
                Ok(StructuredValue::empty())
            }

            Directive::If { cond, body, .. } => {
                let condition = evaluate_expression(cond, env).await?;
                if condition.is_truthy() {
                    let block = env.create_child(ChildScope::Block);
                    evaluate_nodes(body, &block).await?;
                }
                Ok(StructuredValue::empty())
            }

            Directive::When { expr, .. } => {
                let _ = evaluate_when(expr, env).await?;
                Ok(StructuredValue::empty())
            }

            Directive::For {
                binding,
                source,
                body,
                options,
                ..
            } => {
                evaluate_for_directive(binding, source, body, options, env).await?;
                Ok(StructuredValue::empty())
            }

            Directive::Guard {
                name,
                phase,
                target,
                body,
                location,
            } => {
                env.register_guard(GuardHook {
                    name: name.clone(),
                    phase: *phase,
                    target: target.clone(),
                    body: body.clone(),
                    privileged: false,
                    location: location.clone(),
                });
                Ok(StructuredValue::empty())
            }

            Directive::Policy { name, config, .. } => {
                let value = evaluate_expression(config, env).await?;
                let frame = PolicyFrame::from_value(name.clone(), &datum(&value))?;
                env.push_policy(frame);
                Ok(StructuredValue::empty())
            }

            Directive::Loop {
                iterations,
                delay,
                until,
                body,
                ..
            } => {
                evaluate_loop(iterations, delay, until, body, env).await?;
                Ok(StructuredValue::empty())
            }
        }
    })
}

fn with_newline(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{text}\n")
    }
}

async fn bind_value(
    env: &Arc<Environment>,
    name: &str,
    labels: &[String],
    expr: &Expression,
    source_kind: VariableSource,
    scope_kind: ScopeKind,
) -> Result<StructuredValue> {
    let mut value = evaluate_expression(expr, env).await?;
    // Explicit labels at the definition site merge into the expression's
    // own descriptor.
    let mut explicit = SecurityDescriptor::default();
    for label in labels {
        explicit = explicit.with_label(label.clone());
    }
    value.merge_security(&explicit);
    if env.handles().options.debug_vars {
        let _ = env.handles().emitter.emit(RuntimeEvent::debug(
            "debug:var",
            format!("@{name} bound ({:?}, {:?})", source_kind, value.kind),
        ));
    }
    env.set(Variable::new(name, value.clone(), source_kind, scope_kind))?;
    Ok(value)
}

async fn guard_gate(
    env: &Arc<Environment>,
    op_type: &str,
    op_name: &str,
    input: &StructuredValue,
    options: &WithOptions,
) -> Result<()> {
    let op = OpDescriptor::new(op_type, op_name)
        .with_labels(input.security().labels.iter().cloned().collect());
    run_guards(
        env,
        crate::ast::GuardPhase::Before,
        &op,
        input,
        options.skip_guards,
    )
    .await?
    .into_result()
}

async fn evaluate_run(
    expr: &Expression,
    options: &WithOptions,
    env: &Arc<Environment>,
) -> Result<StructuredValue> {
    let value = match expr {
        Expression::Command(template) => {
            crate::exec::check_command_template(template)?;
            let rendered = render_template(template, env, InterpolationContext::ShellCommand)?;
            let command_input = StructuredValue::text(rendered.text.clone())
                .with_security(rendered.security().clone());
            guard_gate(env, "op:run", "run", &command_input, options).await?;
            let mut value =
                crate::exec::run_command_line(env, &rendered.text, "run", "op:run", *options)
                    .await?;
            value.merge_security(rendered.security());
            value
        }
        other => {
            let value = evaluate_expression(other, env).await?;
            guard_gate(env, "op:run", "run", &value, options).await?;
            value
        }
    };

    if !value.text.is_empty() {
        env.emit_effect(
            Effect::both(with_newline(&value.text)).with_security(value.security().clone()),
        );
    }
    Ok(value)
}

async fn evaluate_output(
    expr: &Expression,
    target: &OutputTarget,
    append: bool,
    env: &Arc<Environment>,
) -> Result<StructuredValue> {
    let value = evaluate_expression(expr, env).await?;
    guard_gate(env, "op:output", "output", &value, &WithOptions::default()).await?;
    crate::guard::enforce_label_flow(env, value.security(), "op:output")?;

    match target {
        OutputTarget::File(path_expr) => {
            let raw = evaluate_expression(path_expr, env).await?;
            let path = env.resolve_path(&raw.text)?;
            let fs = Arc::clone(&env.handles().fs);
            if append {
                fs.append_file(&path, &value.text).await?;
            } else {
                fs.write_file(&path, &value.text).await?;
            }
            env.emit_effect(
                Effect::file_write(path.display().to_string(), value.text.clone())
                    .with_capability("fs:write")
                    .with_security(value.security().clone()),
            );
        }
        OutputTarget::Url(url_expr) => {
            let url = evaluate_expression(url_expr, env).await?;
            return Err(MlldError::Resolver {
                reference: url.text,
                message: "URL output targets are not supported by this runtime".to_string(),
            });
        }
        OutputTarget::Stdout => {
            env.emit_effect(
                Effect::stdout(with_newline(&value.text))
                    .with_security(value.security().clone()),
            );
        }
        OutputTarget::Stderr => {
            env.emit_effect(
                Effect::stderr(with_newline(&value.text))
                    .with_security(value.security().clone()),
            );
        }
    }
    Ok(value)
}

async fn evaluate_import(
    names: &[crate::ast::ImportBinding],
    source: &str,
    env: &Arc<Environment>,
) -> Result<()> {
    let handles = env.handles();
    let canonical = handles.resolver.canonicalize(source);
    let module = handles
        .resolver
        .load(&canonical)
        .await
        .map_err(|message| MlldError::Resolver {
            reference: canonical.clone(),
            message,
        })?;

    let bindings = match module {
        ResolvedModule::Bindings(map) => map,
        ResolvedModule::Source(text) => {
            if !handles.lock.verify_integrity(&canonical, &text) {
                return Err(MlldError::Resolver {
                    reference: canonical.clone(),
                    message: "integrity check failed against the lock file".to_string(),
                });
            }
            let mode = if handles.options.strict {
                ParseMode::Strict
            } else {
                ParseMode::Loose
            };
            let document = handles.parser.parse(&text, mode)?;
            let import_env = env.create_child(ChildScope::Import);
            evaluate_document(&document, &import_env).await?;

            // Without an explicit manifest, every module-scope binding is
            // importable.
            let manifest = import_env.exports();
            let mut map = rustc_hash::FxHashMap::default();
            for binding in names {
                if !manifest.is_empty() && !manifest.contains(&binding.name) {
                    return Err(MlldError::VariableNotFound {
                        name: format!("{}#{}", canonical, binding.name),
                        location: None,
                    });
                }
                if let Some(variable) = import_env.get(&binding.name) {
                    let _ = map.insert(binding.name.clone(), variable.value);
                }
            }
            map
        }
    };

    for binding in names {
        let value = bindings
            .get(&binding.name)
            .cloned()
            .ok_or_else(|| MlldError::VariableNotFound {
                name: format!("{}#{}", canonical, binding.name),
                location: None,
            })?;
        env.set(Variable::new(
            binding.local_name(),
            value,
            VariableSource::Import,
            ScopeKind::Module,
        ))?;
    }
    Ok(())
}

async fn evaluate_loop(
    iterations: &Expression,
    delay: &Expression,
    until: &Expression,
    body: &[Node],
    env: &Arc<Environment>,
) -> Result<()> {
    let count_value = evaluate_expression(iterations, env).await?;
    let count = count_value
        .data
        .as_u64()
        .or_else(|| count_value.text.parse().ok())
        .ok_or_else(|| MlldError::TypeMismatch {
            expected: "a numeric iteration bound".to_string(),
            found: count_value.text.clone(),
            location: None,
        })?;
    let delay_value = evaluate_expression(delay, env).await?;
    let delay = parse_rate_value(&delay_value)?;
    let clock = Arc::clone(&env.handles().clock);

    // The condition pre-checks: a truthy initial condition exits with zero
    // iterations.
    for index in 0..count {
        if env.handles().cancel.is_cancelled() {
            break;
        }
        if evaluate_expression(until, env).await?.is_truthy() {
            break;
        }
        let block = env.create_child(ChildScope::Block);
        evaluate_nodes(body, &block).await?;
        if index + 1 < count {
            clock.sleep(delay).await;
        }
    }
    Ok(())
}
