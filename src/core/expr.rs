//! Expression evaluation over structured inputs.
//!
//! Registry entries may carry small pure expressions: `versions_expr`
//! extracts versions from a JSON payload, `version_expr` filters the
//! discovered list, `checksum_expr` digs a digest out of fetched checksum
//! files, and `assets_expr` picks (url, checksum) pairs from an asset
//! list. Expressions are minijinja expressions over named inputs; there
//! is no I/O and no mutation, and evaluation is single-pass over the
//! provided data.

use std::collections::BTreeMap;

use minijinja::{Environment, UndefinedBehavior};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::version::Version;

#[derive(Error, Debug)]
pub enum ExprError {
    #[error("expression '{expr}' failed: {source}")]
    Eval {
        expr: String,
        #[source]
        source: minijinja::Error,
    },

    #[error("expression '{expr}' returned an unexpected shape: {reason}")]
    Shape { expr: String, reason: String },
}

/// One version extracted by a `versions_expr`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredVersion {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
}

fn environment<'a>() -> Environment<'a> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Lenient);
    env
}

/// Evaluate an expression to a raw JSON value.
pub fn eval_to_json<S: Serialize>(expr: &str, ctx: &S) -> Result<serde_json::Value, ExprError> {
    let env = environment();
    let compiled = env
        .compile_expression(expr)
        .map_err(|source| ExprError::Eval {
            expr: expr.to_string(),
            source,
        })?;
    let value = compiled
        .eval(minijinja::Value::from_serialize(ctx))
        .map_err(|source| ExprError::Eval {
            expr: expr.to_string(),
            source,
        })?;
    serde_json::to_value(&value).map_err(|e| ExprError::Shape {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

/// Evaluate an expression expected to produce a string.
pub fn eval_to_string<S: Serialize>(expr: &str, ctx: &S) -> Result<String, ExprError> {
    match eval_to_json(expr, ctx)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(ExprError::Shape {
            expr: expr.to_string(),
            reason: format!("expected a string, got {other}"),
        }),
    }
}

/// `versions_expr`: input `{json, os, arch}`, output a list of
/// `{version, url?, checksum?, asset?}` objects (bare strings are
/// accepted as versions).
pub fn eval_versions_expr(
    expr: &str,
    json: &serde_json::Value,
    os: &str,
    arch: &str,
) -> Result<Vec<DiscoveredVersion>, ExprError> {
    let ctx = serde_json::json!({ "json": json, "os": os, "arch": arch });
    let result = eval_to_json(expr, &ctx)?;

    let items = result.as_array().ok_or_else(|| ExprError::Shape {
        expr: expr.to_string(),
        reason: "expected a list".to_string(),
    })?;

    items
        .iter()
        .map(|item| match item {
            serde_json::Value::String(s) => Ok(DiscoveredVersion {
                version: s.clone(),
                url: None,
                checksum: None,
                asset: None,
            }),
            obj @ serde_json::Value::Object(_) => serde_json::from_value(obj.clone())
                .map_err(|e| ExprError::Shape {
                    expr: expr.to_string(),
                    reason: e.to_string(),
                }),
            other => Err(ExprError::Shape {
                expr: expr.to_string(),
                reason: format!("expected string or object list items, got {other}"),
            }),
        })
        .collect()
}

/// `version_expr`: filter/transform a discovered version list. The
/// expression sees `versions` (list of version objects) and returns
/// either a list of version strings or a list of version objects.
pub fn eval_version_expr(expr: &str, versions: &[Version]) -> Result<Vec<Version>, ExprError> {
    let ctx = serde_json::json!({ "versions": versions });
    let result = eval_to_json(expr, &ctx)?;

    let items = result.as_array().ok_or_else(|| ExprError::Shape {
        expr: expr.to_string(),
        reason: "expected a list".to_string(),
    })?;

    items
        .iter()
        .map(|item| match item {
            serde_json::Value::String(s) => Ok(Version::new(s)),
            obj @ serde_json::Value::Object(_) => serde_json::from_value(obj.clone())
                .map_err(|e| ExprError::Shape {
                    expr: expr.to_string(),
                    reason: e.to_string(),
                }),
            other => Err(ExprError::Shape {
                expr: expr.to_string(),
                reason: format!("expected string or object list items, got {other}"),
            }),
        })
        .collect()
}

/// `checksum_expr`: the expression sees one text variable per fetched
/// checksum file (keyed by its logical name) plus `asset`, `version`,
/// `os`, and `arch`; it returns `"algo:hex"` or bare hex.
pub fn eval_checksum_expr(
    expr: &str,
    files: &BTreeMap<String, String>,
    asset: &str,
    version: &str,
    os: &str,
    arch: &str,
) -> Result<String, ExprError> {
    let mut ctx = serde_json::Map::new();
    for (name, body) in files {
        ctx.insert(name.clone(), serde_json::Value::String(body.clone()));
    }
    ctx.insert("asset".to_string(), serde_json::Value::String(asset.to_string()));
    ctx.insert("version".to_string(), serde_json::Value::String(version.to_string()));
    ctx.insert("os".to_string(), serde_json::Value::String(os.to_string()));
    ctx.insert("arch".to_string(), serde_json::Value::String(arch.to_string()));

    eval_to_string(expr, &serde_json::Value::Object(ctx)).map(|s| s.trim().to_string())
}

/// `assets_expr`: extract `(url, checksum?)` from a JSON asset list. The
/// expression sees `{json, os, arch, version}` and returns either a URL
/// string or an object `{url, checksum?}`.
pub fn eval_assets_expr(
    expr: &str,
    json: &serde_json::Value,
    os: &str,
    arch: &str,
    version: &str,
) -> Result<(String, Option<String>), ExprError> {
    let ctx = serde_json::json!({ "json": json, "os": os, "arch": arch, "version": version });
    match eval_to_json(expr, &ctx)? {
        serde_json::Value::String(url) => Ok((url, None)),
        serde_json::Value::Object(map) => {
            let url = map
                .get("url")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ExprError::Shape {
                    expr: expr.to_string(),
                    reason: "object result missing 'url'".to_string(),
                })?
                .to_string();
            let checksum = map
                .get("checksum")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            Ok((url, checksum))
        }
        other => Err(ExprError::Shape {
            expr: expr.to_string(),
            reason: format!("expected string or object, got {other}"),
        }),
    }
}
