//! Per-type optimization strategies (§4.6 step 2/5): each recommendation
//! type narrows to one specific, narrowly-scoped file transformation.

use crate::domain::models::optimization::{OptimizationRecommendation, ProposedChange, RecommendationType};
use crate::error::{CoordinatorError, CoordinatorResult};

/// One concrete file operation a strategy's plan resolves a
/// [`ProposedChange`] into.
#[derive(Debug, Clone)]
pub enum FileOp {
    /// Exact-string replacement — used by the code and performance
    /// strategies.
    Replace { path: String, find: String, replace: String },
    /// Add/remove entries from a newline-delimited keyword list file.
    KeywordListEdit { path: String, add: Vec<String>, remove: Vec<String> },
    /// Update a single `key: value` line in a config file.
    ConfigKeyUpdate { path: String, key: String, value: String },
}

impl FileOp {
    pub fn target_path(&self) -> &str {
        match self {
            Self::Replace { path, .. } => path,
            Self::KeywordListEdit { path, .. } => path,
            Self::ConfigKeyUpdate { path, .. } => path,
        }
    }
}

/// "Plan only" resolution of a recommendation's proposed changes into
/// concrete file ops, per the recommendation's type.
pub fn plan(recommendation: &OptimizationRecommendation) -> CoordinatorResult<Vec<FileOp>> {
    recommendation
        .proposed_changes
        .iter()
        .map(|change| plan_one(recommendation.recommendation_type, change))
        .collect()
}

fn plan_one(recommendation_type: RecommendationType, change: &ProposedChange) -> CoordinatorResult<FileOp> {
    match recommendation_type {
        RecommendationType::Code | RecommendationType::Performance | RecommendationType::Architectural | RecommendationType::Api => {
            let find = change.find.clone().ok_or_else(|| {
                CoordinatorError::Validation(format!("{}: missing find text for exact-string replacement", change.target_file))
            })?;
            let replace = change.replace.clone().ok_or_else(|| {
                CoordinatorError::Validation(format!("{}: missing replacement text", change.target_file))
            })?;
            Ok(FileOp::Replace { path: change.target_file.clone(), find, replace })
        }
        RecommendationType::Keyword => {
            let op = change.structured_op.as_ref().ok_or_else(|| {
                CoordinatorError::Validation(format!("{}: missing structured keyword op", change.target_file))
            })?;
            let add = op
                .get("add")
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            let remove = op
                .get("remove")
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            Ok(FileOp::KeywordListEdit { path: change.target_file.clone(), add, remove })
        }
        RecommendationType::Config | RecommendationType::Resource => {
            let op = change.structured_op.as_ref().ok_or_else(|| {
                CoordinatorError::Validation(format!("{}: missing structured config op", change.target_file))
            })?;
            let key = op.get("key").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let value = op.get("value").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            Ok(FileOp::ConfigKeyUpdate { path: change.target_file.clone(), key, value })
        }
    }
}

/// Applies one resolved file op to disk (§4.6 step 5, "applying").
pub async fn apply(op: &FileOp) -> CoordinatorResult<()> {
    match op {
        FileOp::Replace { path, find, replace } => {
            let contents = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| CoordinatorError::TransientIo { collaborator: "filesystem".to_string(), source: e.into() })?;
            let updated = contents.replacen(find.as_str(), replace.as_str(), 1);
            tokio::fs::write(path, updated)
                .await
                .map_err(|e| CoordinatorError::TransientIo { collaborator: "filesystem".to_string(), source: e.into() })?;
        }
        FileOp::KeywordListEdit { path, add, remove } => {
            let contents = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| CoordinatorError::TransientIo { collaborator: "filesystem".to_string(), source: e.into() })?;
            let mut lines: Vec<String> = contents.lines().map(str::to_string).filter(|l| !remove.contains(l)).collect();
            for kw in add {
                if !lines.contains(kw) {
                    lines.push(kw.clone());
                }
            }
            tokio::fs::write(path, lines.join("\n") + "\n")
                .await
                .map_err(|e| CoordinatorError::TransientIo { collaborator: "filesystem".to_string(), source: e.into() })?;
        }
        FileOp::ConfigKeyUpdate { path, key, value } => {
            let contents = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| CoordinatorError::TransientIo { collaborator: "filesystem".to_string(), source: e.into() })?;
            let prefix = format!("{key}:");
            let mut found = false;
            let mut lines: Vec<String> = contents
                .lines()
                .map(|line| {
                    if line.trim_start().starts_with(&prefix) {
                        found = true;
                        format!("{key}: {value}")
                    } else {
                        line.to_string()
                    }
                })
                .collect();
            if !found {
                lines.push(format!("{key}: {value}"));
            }
            tokio::fs::write(path, lines.join("\n") + "\n")
                .await
                .map_err(|e| CoordinatorError::TransientIo { collaborator: "filesystem".to_string(), source: e.into() })?;
        }
    }
    Ok(())
}

/// A best-effort syntax check used as the `syntax_check` validation
/// kind for source files: balanced parentheses/braces/brackets. Not a
/// real parser — narrowly scoped to catch the malformed-edit case the
/// workflow exists to roll back from.
pub fn syntax_check(contents: &str) -> bool {
    let mut stack = Vec::new();
    for c in contents.chars() {
        match c {
            '(' | '[' | '{' => stack.push(c),
            ')' => {
                if stack.pop() != Some('(') {
                    return false;
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return false;
                }
            }
            '}' => {
                if stack.pop() != Some('{') {
                    return false;
                }
            }
            _ => {}
        }
    }
    stack.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_check_detects_unbalanced_parens() {
        assert!(syntax_check(r#"print("new")"#));
        assert!(!syntax_check(r#"print("new""#));
    }

    #[test]
    fn plan_requires_find_and_replace_for_code_type() {
        let change = ProposedChange {
            target_file: "f.rs".to_string(),
            description: "d".to_string(),
            find: None,
            replace: Some("x".to_string()),
            structured_op: None,
        };
        let err = plan_one(RecommendationType::Code, &change).unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));
    }
}
