//! Tool registry: declared schemas, argument validation and the filesystem tools.
//!
//! Every call is validated twice at the boundary: against the JSON Schema the
//! engine was shown, then into a typed [`ToolInvocation`]. Implementations only
//! ever see typed arguments and paths already confined to the workspace root.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use jsonschema::{Draft, Validator};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::core::conversation::{ToolCall, ToolResult};
use crate::core::snippet::render_snippet;
use crate::core::tool_args::{
    EditFileArgs, FindCodePatternsArgs, ListFilesArgs, ReadCodeSnippetArgs, ReadFileArgs,
    ToolError, ToolInvocation,
};
use crate::io::config::ToolsConfig;
use crate::io::process::run_with_timeout;

/// Returned by `find_code_patterns` when the search ran and found nothing.
pub const NO_MATCHES: &str = "No matches found";

const SEARCH_OUTPUT_LIMIT_BYTES: usize = 64 * 1024;

/// Tool declaration as advertised to the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// The full set of tools, in the order they are advertised.
pub fn tool_schemas() -> Vec<ToolSchema> {
    vec![
        ToolSchema {
            name: ToolInvocation::FIND_CODE_PATTERNS,
            description: "Start here. Searches tracked files for a regular expression and \
                returns up to five `path:line:text` matches. Use the line numbers with \
                read_code_snippet.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "pattern": {
                        "type": "string",
                        "description": "Regular expression to search for",
                        "examples": ["def calculate_risk", "class User"]
                    },
                    "file_filter": {
                        "type": "string",
                        "description": "Glob restricting which files are searched",
                        "examples": ["*.py", "src/*.ts"]
                    }
                },
                "required": ["pattern", "file_filter"]
            }),
        },
        ToolSchema {
            name: ToolInvocation::READ_CODE_SNIPPET,
            description: "Reads a few lines around each given line number of a file. \
                Prefer this over read_file once a search has located the code.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string", "description": "Path relative to the repository root"},
                    "line_numbers": {
                        "type": "array",
                        "items": {"type": "integer"},
                        "description": "Line numbers taken from find_code_patterns results"
                    }
                },
                "required": ["file_path", "line_numbers"]
            }),
        },
        ToolSchema {
            name: ToolInvocation::READ_FILE,
            description: "Reads the whole contents of a file. Do not use it on directories, \
                and only when a snippet is not enough.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string", "description": "Path relative to the repository root"}
                },
                "required": ["file_path"]
            }),
        },
        ToolSchema {
            name: ToolInvocation::EDIT_FILE,
            description: "Replaces every occurrence of old_str with new_str in a file. The two \
                strings must differ. To create a new file, pass an empty old_str.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string", "description": "Path relative to the repository root"},
                    "old_str": {"type": "string", "description": "Exact text to replace"},
                    "new_str": {"type": "string", "description": "Replacement text"}
                },
                "required": ["file_path", "old_str", "new_str"]
            }),
        },
        ToolSchema {
            name: ToolInvocation::LIST_FILES,
            description: "Lists files and directories below a path. Directories end with '/'. \
                Defaults to the repository root.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Optional directory relative to the repository root"}
                }
            }),
        },
    ]
}

/// Dispatches engine tool calls against one workspace root.
pub struct ToolRegistry {
    root: PathBuf,
    config: ToolsConfig,
    schemas: Vec<ToolSchema>,
    validators: Vec<(&'static str, Validator)>,
}

impl ToolRegistry {
    pub fn new(root: impl Into<PathBuf>, config: ToolsConfig) -> Result<Self> {
        let schemas = tool_schemas();
        let mut validators = Vec::with_capacity(schemas.len());
        for schema in &schemas {
            let validator = jsonschema::options()
                .with_draft(Draft::Draft202012)
                .build(&schema.input_schema)
                .with_context(|| format!("compile input schema for {}", schema.name))?;
            validators.push((schema.name, validator));
        }
        Ok(Self {
            root: root.into(),
            config,
            schemas,
            validators,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn schemas(&self) -> &[ToolSchema] {
        &self.schemas
    }

    /// Validate a raw call into a typed invocation.
    pub fn parse(&self, name: &str, arguments: &Value) -> Result<ToolInvocation, ToolError> {
        if let Some((_, validator)) = self.validators.iter().find(|(n, _)| *n == name) {
            let instance = if arguments.is_null() {
                json!({})
            } else {
                arguments.clone()
            };
            let messages: Vec<String> = validator
                .iter_errors(&instance)
                .map(|err| err.to_string())
                .collect();
            if !messages.is_empty() {
                return Err(ToolError::Validation(format!(
                    "{name}: {}",
                    messages.join("; ")
                )));
            }
        }
        ToolInvocation::parse(name, arguments)
    }

    /// Run one engine tool call. Never fails: errors become error results.
    #[instrument(skip_all, fields(tool = %call.name, call_id = %call.call_id))]
    pub fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let outcome = self
            .parse(&call.name, &call.arguments)
            .and_then(|invocation| self.execute(&invocation));
        match outcome {
            Ok(text) => {
                debug!(bytes = text.len(), "tool succeeded");
                ToolResult {
                    call_id: call.call_id.clone(),
                    text,
                    is_error: false,
                }
            }
            Err(err) => {
                warn!(error = %err, "tool failed");
                ToolResult {
                    call_id: call.call_id.clone(),
                    text: format!("Error: {err}"),
                    is_error: true,
                }
            }
        }
    }

    pub fn execute(&self, invocation: &ToolInvocation) -> Result<String, ToolError> {
        match invocation {
            ToolInvocation::ListFiles(args) => self.list_files(args),
            ToolInvocation::ReadFile(args) => self.read_file(args),
            ToolInvocation::EditFile(args) => self.edit_file(args),
            ToolInvocation::FindCodePatterns(args) => Ok(self.find_code_patterns(args)),
            ToolInvocation::ReadCodeSnippet(args) => self.read_code_snippet(args),
        }
    }

    fn list_files(&self, args: &ListFilesArgs) -> Result<String, ToolError> {
        let raw = args.path.as_deref().unwrap_or(".");
        let dir = self.resolve(if raw.trim().is_empty() { "." } else { raw })?;
        fs::metadata(&dir).map_err(|err| ToolError::io(raw, err))?;

        let mut entries = Vec::new();
        let walker = WalkDir::new(&dir)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.file_name() != ".git");
        for entry in walker {
            let entry = entry.map_err(|err| {
                let path = err
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| raw.to_string());
                ToolError::io(path, err.into())
            })?;
            let Ok(rel) = entry.path().strip_prefix(&dir) else {
                continue;
            };
            let mut display = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if entry.file_type().is_dir() {
                display.push('/');
            }
            entries.push(display);
        }
        serde_json::to_string(&entries)
            .map_err(|err| ToolError::io(raw, std::io::Error::other(err)))
    }

    fn read_file(&self, args: &ReadFileArgs) -> Result<String, ToolError> {
        if args.file_path.trim().is_empty() {
            return Err(ToolError::Validation("missing file_path parameter".to_string()));
        }
        let path = self.resolve(&args.file_path)?;
        fs::read_to_string(&path).map_err(|err| ToolError::io(&args.file_path, err))
    }

    fn edit_file(&self, args: &EditFileArgs) -> Result<String, ToolError> {
        if args.file_path.trim().is_empty() {
            return Err(ToolError::Validation("missing file_path parameter".to_string()));
        }
        let path = self.resolve(&args.file_path)?;
        let existing = match fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(ToolError::io(&args.file_path, err)),
        };

        match existing {
            None if args.old_str.is_empty() => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).map_err(|err| ToolError::io(&args.file_path, err))?;
                }
                write_file(&path, &args.file_path, &args.new_str)?;
                Ok(format!("OK: created {}", args.file_path))
            }
            None => Err(ToolError::NotFound(format!(
                "file '{}' does not exist",
                args.file_path
            ))),
            Some(content) if args.old_str.is_empty() => {
                if !content.is_empty() {
                    return Err(ToolError::Validation(
                        "old_str may only be empty when creating a file".to_string(),
                    ));
                }
                write_file(&path, &args.file_path, &args.new_str)?;
                Ok(format!("OK: wrote {}", args.file_path))
            }
            Some(content) => {
                let count = content.matches(args.old_str.as_str()).count();
                if count == 0 {
                    return Err(ToolError::NotFound(format!(
                        "'{}' not found in file '{}'",
                        args.old_str, args.file_path
                    )));
                }
                let updated = content.replace(args.old_str.as_str(), &args.new_str);
                write_file(&path, &args.file_path, &updated)?;
                Ok(format!("OK: replaced {count} occurrence(s)"))
            }
        }
    }

    /// Soft-failing search: any problem is reported as text, not as an error.
    fn find_code_patterns(&self, args: &FindCodePatternsArgs) -> String {
        let mut cmd = Command::new("git");
        cmd.args(["grep", "-n", "-I", "--color=never", "-e", &args.pattern, "--"])
            .current_dir(&self.root);
        if !args.file_filter.trim().is_empty() {
            cmd.arg(&args.file_filter);
        }

        let timeout = Duration::from_millis(self.config.search_timeout_ms);
        let output = match run_with_timeout(cmd, timeout, SEARCH_OUTPUT_LIMIT_BYTES) {
            Ok(output) => output,
            Err(err) => return format!("Search failed: {err:#}"),
        };
        if output.timed_out {
            return format!("Search failed: timed out after {}ms", timeout.as_millis());
        }
        match output.code() {
            Some(0) => {}
            Some(1) => return NO_MATCHES.to_string(),
            _ => return format!("Search failed: {}", output.stderr_lossy().trim()),
        }

        let stdout = output.stdout_lossy();
        let lines: Vec<&str> = stdout
            .lines()
            .filter(|line| !line.is_empty())
            .take(self.config.search_max_results)
            .collect();
        if lines.is_empty() {
            return NO_MATCHES.to_string();
        }
        lines.join("\n")
    }

    fn read_code_snippet(&self, args: &ReadCodeSnippetArgs) -> Result<String, ToolError> {
        let path = self.resolve(&args.file_path)?;
        let content =
            fs::read_to_string(&path).map_err(|err| ToolError::io(&args.file_path, err))?;
        let lines: Vec<&str> = content.lines().collect();
        let out = render_snippet(&lines, &args.line_numbers, self.config.snippet_limits());
        if out.is_empty() {
            return Ok(format!(
                "No lines in range (file has {} lines)",
                lines.len()
            ));
        }
        Ok(out.join("\n"))
    }

    /// Map an engine-supplied path onto the workspace, refusing anything outside it.
    fn resolve(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let requested = Path::new(raw.trim());
        let relative = if requested.is_absolute() {
            requested.strip_prefix(&self.root).map_err(|_| {
                ToolError::Validation(format!("path '{raw}' is outside the repository"))
            })?
        } else {
            requested
        };

        let mut normalized = PathBuf::new();
        for component in relative.components() {
            match component {
                Component::CurDir => {}
                Component::Normal(part) => normalized.push(part),
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(ToolError::Validation(format!(
                            "path '{raw}' is outside the repository"
                        )));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(ToolError::Validation(format!(
                        "path '{raw}' is outside the repository"
                    )));
                }
            }
        }
        if normalized
            .components()
            .next()
            .is_some_and(|c| c.as_os_str() == ".git")
        {
            return Err(ToolError::Validation(
                "the .git directory is off limits".to_string(),
            ));
        }

        let full = self.root.join(&normalized);
        self.ensure_no_symlink_escape(&full, raw)?;
        Ok(full)
    }

    fn ensure_no_symlink_escape(&self, full: &Path, raw: &str) -> Result<(), ToolError> {
        let Ok(root) = fs::canonicalize(&self.root) else {
            return Ok(());
        };
        let mut probe = full.to_path_buf();
        while !probe.exists() {
            if !probe.pop() {
                return Ok(());
            }
        }
        let resolved = fs::canonicalize(&probe).map_err(|err| ToolError::io(raw, err))?;
        if !resolved.starts_with(&root) {
            return Err(ToolError::Validation(format!(
                "path '{raw}' resolves outside the repository"
            )));
        }
        Ok(())
    }
}

fn write_file(path: &Path, display: &str, contents: &str) -> Result<(), ToolError> {
    fs::write(path, contents).map_err(|err| ToolError::io(display, err))
}
