//! Glue between pipeline expressions and the stage driver.

use std::sync::Arc;

use async_trait::async_trait;

use super::expression::{datum, evaluate_expression, invoke_with_args};
use crate::ast::{ExecInvocation, PipelineExpression, PipelineStage, StageTarget};
use crate::effects::Effect;
use crate::env::Environment;
use crate::error::Result;
use crate::pipeline::{StageExecutor, run_pipeline};
use crate::value::{StructuredValue, ValueKind};

struct PipelineExprExecutor<'a> {
    pipeline: &'a PipelineExpression,
}

#[async_trait]
impl StageExecutor for PipelineExprExecutor<'_> {
    fn total_stages(&self) -> usize {
        self.pipeline.stages.len() + 1
    }

    async fn execute(
        &self,
        stage: usize,
        input: StructuredValue,
        env: Arc<Environment>,
    ) -> Result<StructuredValue> {
        if stage == 0 {
            // The base re-evaluates on retries to stage 0, seeing the same
            // `@ctx` namespace as any other stage.
            return evaluate_expression(&self.pipeline.base, &env).await;
        }
        run_stage(&self.pipeline.stages[stage - 1], input, &env).await
    }
}

async fn run_stage(
    stage: &PipelineStage,
    input: StructuredValue,
    env: &Arc<Environment>,
) -> Result<StructuredValue> {
    match &stage.target {
        StageTarget::Json => Ok(input.rewrap(datum(&input), ValueKind::Json)),
        StageTarget::Log => {
            env.emit_effect(Effect::stderr(format!("{}\n", input.text)));
            Ok(input)
        }
        StageTarget::Exe(name) => {
            let invocation = ExecInvocation::new(name.clone(), stage.args.clone());
            // With no explicit arguments the stage input maps to the first
            // parameter; raw text reaches multi-parameter stages the same
            // way.
            let args = if stage.args.is_empty() {
                vec![input]
            } else {
                let mut evaluated = Vec::with_capacity(stage.args.len());
                for arg in &stage.args {
                    evaluated.push(evaluate_expression(arg, env).await?);
                }
                evaluated
            };
            invoke_with_args(&invocation, env, args).await
        }
    }
}

/// Evaluate `base | @s1 | ... | @sn` through the event-sourced driver.
pub(crate) async fn evaluate_pipeline(
    pipeline: &PipelineExpression,
    env: &Arc<Environment>,
) -> Result<StructuredValue> {
    let executor = PipelineExprExecutor { pipeline };
    run_pipeline(env, &executor).await
}
