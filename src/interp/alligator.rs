//! Alligator (`<path>`) loads: files, globs, and their `.mx` metadata.

use std::path::Path;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::ast::AlligatorPath;
use crate::env::Environment;
use crate::error::{MlldError, PathValidationCode, Result};
use crate::value::{MxMetadata, SecurityDescriptor, StructuredValue, TaintLevel, ValueKind};

/// Rough token estimate used for prompt budgeting (4 chars per token).
fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

fn is_glob(path: &str) -> bool {
    path.contains('*') || path.contains('?') || path.contains('[')
}

fn mx_for(path: &Path, project_root: &Path, content: &str) -> MxMetadata {
    let relative = path
        .strip_prefix(project_root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned();
    MxMetadata {
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned()),
        relative: Some(relative),
        absolute: Some(path.to_string_lossy().into_owned()),
        dirname: path
            .parent()
            .map(|p| p.to_string_lossy().into_owned()),
        tokens: Some(estimate_tokens(content)),
        source: Some(format!("file:{}", path.display())),
        loop_info: None,
    }
}

fn fs_security(path: &Path) -> SecurityDescriptor {
    SecurityDescriptor::default()
        .with_taint(TaintLevel::SrcFs)
        .with_source(format!("file:{}", path.display()))
}

/// Load a `<path>` expression into a structured value.
///
/// Single files yield a `loaded_content` value whose `.mx` namespace
/// carries `filename`, `relative`, `absolute`, `dirname`, `tokens`, and
/// `source`. Globs yield a batch: `data` is an array of per-file entries
/// (`{content, mx}`) that the `for` iterator unpacks back into individual
/// loaded-content values.
pub async fn load_alligator(
    alligator: &AlligatorPath,
    env: &Arc<Environment>,
) -> Result<StructuredValue> {
    let fs = Arc::clone(&env.handles().fs);
    let root = env.handles().project_root.clone();

    if is_glob(&alligator.path) {
        let matches = fs
            .glob(&alligator.path, env.base_dir())
            .await
            .map_err(MlldError::Io)?;
        let mut entries = Vec::new();
        let mut combined = String::new();
        let mut security = SecurityDescriptor::default().with_taint(TaintLevel::SrcFs);
        for path in matches {
            let content = fs.read_file(&path).await.map_err(MlldError::Io)?;
            security.merge_from(&fs_security(&path));
            combined.push_str(&content);
            let mx = mx_for(&path, &root, &content);
            entries.push(json!({
                "content": content,
                "mx": mx.to_value(),
            }));
        }
        let mut batch = StructuredValue::json(Value::Array(entries)).with_security(security);
        batch.kind = ValueKind::LoadedContent;
        batch.text = combined;
        return Ok(batch);
    }

    let path = env.resolve_path(&alligator.path)?;
    if !fs.exists(&path).await {
        return Err(MlldError::PathValidation {
            code: PathValidationCode::FileNotFound,
            path: alligator.path.clone(),
        });
    }
    if fs.is_directory(&path).await {
        return Err(MlldError::PathValidation {
            code: PathValidationCode::NotAFile,
            path: alligator.path.clone(),
        });
    }

    let content = fs.read_file(&path).await.map_err(MlldError::Io)?;
    let mx = mx_for(&path, &root, &content);
    let value = StructuredValue::loaded_content(content, mx).with_security(fs_security(&path));

    match value.project(&alligator.fields) {
        Some(projected) => Ok(projected),
        None => Ok(value),
    }
}

/// Unpack a glob batch into per-file loaded-content values; `None` when the
/// value is not a batch.
pub(crate) fn batch_entries(value: &StructuredValue) -> Option<Vec<StructuredValue>> {
    if value.kind != ValueKind::LoadedContent {
        return None;
    }
    let entries = value.data.as_array()?;
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let content = entry.get("content")?.as_str()?.to_string();
        let mx: MxMetadata = entry
            .get("mx")
            .and_then(|m| serde_json::from_value(m.clone()).ok())
            .unwrap_or_default();
        out.push(
            StructuredValue::loaded_content(content, mx)
                .with_security(value.security().clone()),
        );
    }
    Some(out)
}
