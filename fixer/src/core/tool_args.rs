//! Typed arguments for every declared tool.
//!
//! The engine sends loosely-typed JSON; the registry turns each call into one
//! [`ToolInvocation`] variant before anything touches the filesystem.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Tool-level failure. Always reported back to the engine, never fatal.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        ToolError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListFilesArgs {
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadFileArgs {
    #[serde(default)]
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditFileArgs {
    pub file_path: String,
    pub old_str: String,
    pub new_str: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FindCodePatternsArgs {
    pub pattern: String,
    pub file_filter: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadCodeSnippetArgs {
    pub file_path: String,
    pub line_numbers: Vec<i64>,
}

/// A validated tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocation {
    ListFiles(ListFilesArgs),
    ReadFile(ReadFileArgs),
    EditFile(EditFileArgs),
    FindCodePatterns(FindCodePatternsArgs),
    ReadCodeSnippet(ReadCodeSnippetArgs),
}

impl ToolInvocation {
    pub const LIST_FILES: &'static str = "list_files";
    pub const READ_FILE: &'static str = "read_file";
    pub const EDIT_FILE: &'static str = "edit_file";
    pub const FIND_CODE_PATTERNS: &'static str = "find_code_patterns";
    pub const READ_CODE_SNIPPET: &'static str = "read_code_snippet";

    /// Parse `arguments` for the tool called `name`.
    pub fn parse(name: &str, arguments: &Value) -> Result<Self, ToolError> {
        // Engines send `{}` or `null` for argument-less calls.
        let arguments = match arguments {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        let invocation = match name {
            Self::LIST_FILES => ToolInvocation::ListFiles(decode(name, arguments)?),
            Self::READ_FILE => ToolInvocation::ReadFile(decode(name, arguments)?),
            Self::EDIT_FILE => {
                let args: EditFileArgs = decode(name, arguments)?;
                if args.old_str == args.new_str {
                    return Err(ToolError::Validation(
                        "old_str and new_str must differ".to_string(),
                    ));
                }
                ToolInvocation::EditFile(args)
            }
            Self::FIND_CODE_PATTERNS => {
                let args: FindCodePatternsArgs = decode(name, arguments)?;
                if args.pattern.is_empty() {
                    return Err(ToolError::Validation("pattern must not be empty".to_string()));
                }
                ToolInvocation::FindCodePatterns(args)
            }
            Self::READ_CODE_SNIPPET => ToolInvocation::ReadCodeSnippet(decode(name, arguments)?),
            other => return Err(ToolError::Validation(format!("unknown tool: {other}"))),
        };
        Ok(invocation)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolInvocation::ListFiles(_) => Self::LIST_FILES,
            ToolInvocation::ReadFile(_) => Self::READ_FILE,
            ToolInvocation::EditFile(_) => Self::EDIT_FILE,
            ToolInvocation::FindCodePatterns(_) => Self::FIND_CODE_PATTERNS,
            ToolInvocation::ReadCodeSnippet(_) => Self::READ_CODE_SNIPPET,
        }
    }

    /// True for tools that change the working tree.
    pub fn mutates_workspace(&self) -> bool {
        matches!(self, ToolInvocation::EditFile(_))
    }
}

fn decode<T: for<'de> Deserialize<'de>>(name: &str, arguments: Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments)
        .map_err(|err| ToolError::Validation(format!("{name}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_edit_file() {
        let inv = ToolInvocation::parse(
            "edit_file",
            &json!({"file_path": "a.py", "old_str": "x", "new_str": "y"}),
        )
        .expect("parse");
        assert!(inv.mutates_workspace());
        assert_eq!(inv.name(), "edit_file");
    }

    #[test]
    fn edit_file_rejects_identical_strings() {
        let err = ToolInvocation::parse(
            "edit_file",
            &json!({"file_path": "a.py", "old_str": "x", "new_str": "x"}),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }

    #[test]
    fn list_files_accepts_null_arguments() {
        let inv = ToolInvocation::parse("list_files", &Value::Null).expect("parse");
        assert_eq!(inv, ToolInvocation::ListFiles(ListFilesArgs { path: None }));
    }

    #[test]
    fn unknown_tool_is_validation_error() {
        let err = ToolInvocation::parse("rm_rf", &json!({})).unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
        assert!(err.to_string().contains("unknown tool: rm_rf"));
    }

    #[test]
    fn snippet_requires_integer_lines() {
        let err = ToolInvocation::parse(
            "read_code_snippet",
            &json!({"file_path": "a.py", "line_numbers": ["ten"]}),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }
}
