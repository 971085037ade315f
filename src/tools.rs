use duct_sh::sh_dangerous;
use rig::completion::ToolDefinition;
use rig::tool::Tool;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

/// Default cap on what a single `bash` call hands back to the model.
pub const DEFAULT_BASH_OUTPUT_LIMIT: usize = 30_000;

#[derive(Debug, thiserror::Error, Serialize, Deserialize)]
pub enum ToolError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Error: {0}")]
    Generic(String),
}

impl From<std::io::Error> for ToolError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
impl From<tokio::task::JoinError> for ToolError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Generic(e.to_string())
    }
}

/// Directories the tools may touch. Relative paths resolve against the first
/// root.
#[derive(Debug, Clone)]
pub struct Workspace {
    roots: Vec<PathBuf>,
}

impl Workspace {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            roots: vec![normalize(&base, Path::new(""))],
        }
    }

    pub fn current() -> Result<Self, ToolError> {
        Ok(Self::new(std::env::current_dir()?))
    }

    /// Also allow access below `root`.
    pub fn allow(mut self, root: impl AsRef<Path>) -> Self {
        let root = normalize(self.base(), root.as_ref());
        if !self.roots.iter().any(|r| root.starts_with(r)) {
            self.roots.push(root);
        }
        self
    }

    pub fn base(&self) -> &Path {
        &self.roots[0]
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        let resolved = normalize(self.base(), Path::new(path));
        if self.roots.iter().any(|r| resolved.starts_with(r)) {
            Ok(resolved)
        } else {
            Err(ToolError::Generic(
                "Access denied: path must be within the analysis workspace".into(),
            ))
        }
    }
}

fn normalize(base: &Path, p: &Path) -> PathBuf {
    let joined = if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    };

    let mut result = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                result.pop();
            }
            Component::CurDir => {}
            c => result.push(c),
        }
    }
    result
}

fn walk_files(base: &Path) -> impl Iterator<Item = ignore::DirEntry> {
    ignore::WalkBuilder::new(base)
        .hidden(false)
        .require_git(false)
        .build()
        .filter_map(|r| r.ok())
        .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
}

fn parameters<T: JsonSchema>() -> serde_json::Value {
    let mut value = serde_json::to_value(schemars::schema_for!(T))
        .unwrap_or_else(|_| serde_json::json!({ "type": "object" }));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

fn truncate_output(s: String, limit: usize) -> String {
    if limit == 0 || s.len() <= limit {
        return s;
    }
    let mut cut = limit;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n... [output truncated, {} bytes omitted]",
        &s[..cut],
        s.len() - cut
    )
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BashArgs {
    /// Shell command to run
    pub cmd: String,
}

/// Runs a shell command in the workspace base directory.
pub struct Bash {
    workspace: Arc<Workspace>,
    output_limit: usize,
}

impl Bash {
    pub fn new(workspace: Arc<Workspace>, output_limit: usize) -> Self {
        Self {
            workspace,
            output_limit,
        }
    }
}

impl Tool for Bash {
    type Args = BashArgs;
    type Output = String;
    type Error = ToolError;

    const NAME: &'static str = "bash";

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Run shell command (use it to execute python/pandas code)".to_string(),
            parameters: parameters::<BashArgs>(),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let dir = self.workspace.base().to_path_buf();
        let cmd = args.cmd;
        let output = tokio::task::spawn_blocking(move || {
            sh_dangerous(&cmd)
                .dir(dir)
                .stderr_to_stdout()
                .unchecked()
                .read()
                .map_err(|e| ToolError::Io(e.to_string()))
        })
        .await??;

        let res = output.trim().to_string();
        Ok(if res.is_empty() {
            "(empty)".into()
        } else {
            truncate_output(res, self.output_limit)
        })
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadFileArgs {
    pub path: String,
    /// Number of lines to skip
    pub offset: u64,
    /// Maximum number of lines, 0 for all
    pub limit: u64,
}

pub struct ReadFile {
    workspace: Arc<Workspace>,
}

impl ReadFile {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

impl Tool for ReadFile {
    type Args = ReadFileArgs;
    type Output = String;
    type Error = ToolError;

    const NAME: &'static str = "read_file";

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Read file with line numbers".to_string(),
            parameters: parameters::<ReadFileArgs>(),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let content = fs::read_to_string(self.workspace.resolve(&args.path)?).await?;
        let lines: Vec<_> = content
            .lines()
            .enumerate()
            .skip(args.offset as usize)
            .take(if args.limit == 0 {
                usize::MAX
            } else {
                args.limit as usize
            })
            .map(|(i, l)| format!("{:4}| {}\n", i + 1, l))
            .collect();
        Ok(lines.concat())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteFileArgs {
    pub path: String,
    pub content: String,
}

pub struct WriteFile {
    workspace: Arc<Workspace>,
}

impl WriteFile {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

impl Tool for WriteFile {
    type Args = WriteFileArgs;
    type Output = String;
    type Error = ToolError;

    const NAME: &'static str = "write_file";

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Write content to file (parent directories are created)".to_string(),
            parameters: parameters::<WriteFileArgs>(),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let path = self.workspace.resolve(&args.path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, args.content).await?;
        Ok("ok".into())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GlobFilesArgs {
    /// Glob pattern, relative to `path`
    pub pat: String,
    pub path: String,
}

pub struct GlobFiles {
    workspace: Arc<Workspace>,
}

impl GlobFiles {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

impl Tool for GlobFiles {
    type Args = GlobFilesArgs;
    type Output = String;
    type Error = ToolError;

    const NAME: &'static str = "glob_files";

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Find files by pattern, sorted by mtime".to_string(),
            parameters: parameters::<GlobFilesArgs>(),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let base = self.workspace.resolve(&args.path)?;
        let matcher = globset::Glob::new(&args.pat)
            .map_err(|e| ToolError::Generic(e.to_string()))?
            .compile_matcher();
        let entries = tokio::task::spawn_blocking(move || {
            walk_files(&base)
                .filter(|e| matcher.is_match(e.path().strip_prefix(&base).unwrap_or(e.path())))
                .map(|e| e.into_path())
                .collect::<Vec<_>>()
        })
        .await?;

        let mut files = Vec::new();
        for e in entries {
            let mtime = fs::metadata(&e).await.and_then(|m| m.modified()).ok();
            files.push((e, mtime));
        }
        files.sort_by_key(|(_, m)| std::cmp::Reverse(*m));
        let res = files
            .iter()
            .map(|(f, _)| f.to_string_lossy())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(if res.is_empty() { "none".into() } else { res })
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GrepTextArgs {
    /// Regular expression
    pub pat: String,
    pub path: String,
}

pub struct GrepText {
    workspace: Arc<Workspace>,
}

impl GrepText {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

impl Tool for GrepText {
    type Args = GrepTextArgs;
    type Output = String;
    type Error = ToolError;

    const NAME: &'static str = "grep_text";

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Search files for regex pattern".to_string(),
            parameters: parameters::<GrepTextArgs>(),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let base = self.workspace.resolve(&args.path)?;
        let re = regex::Regex::new(&args.pat).map_err(|e| ToolError::Generic(e.to_string()))?;
        let hits = tokio::task::spawn_blocking(move || {
            let files: Vec<PathBuf> = if base.is_file() {
                vec![base.clone()]
            } else {
                walk_files(&base).map(|e| e.into_path()).collect()
            };
            files
                .into_iter()
                .filter_map(|p| std::fs::read_to_string(&p).ok().map(|c| (p, c)))
                .flat_map(|(p, c)| {
                    let p_str = p.display().to_string();
                    c.lines()
                        .enumerate()
                        .filter(|(_, l)| re.is_match(l))
                        .map(|(i, l)| format!("{}:{}:{}", p_str, i + 1, l))
                        .collect::<Vec<_>>()
                })
                .take(50)
                .collect::<Vec<_>>()
        })
        .await?;
        Ok(if hits.is_empty() {
            "none".into()
        } else {
            hits.join("\n")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn work() -> Workspace {
        Workspace::new("/work")
    }

    #[test]
    fn test_resolve_normal() {
        assert_eq!(
            work().resolve("file.txt").unwrap(),
            Path::new("/work/file.txt")
        );
        assert_eq!(
            work().resolve("subdir/file.txt").unwrap(),
            Path::new("/work/subdir/file.txt")
        );
        assert_eq!(work().resolve(".").unwrap(), Path::new("/work"));
        assert_eq!(work().resolve("").unwrap(), Path::new("/work"));
    }

    #[test]
    fn test_resolve_escape_parent() {
        assert!(work().resolve("..").is_err());
        assert!(work().resolve("../../etc/passwd").is_err());
        assert!(work().resolve("subdir/../../outside").is_err());
        assert_eq!(
            work().resolve("a/b/../../c").unwrap(),
            Path::new("/work/c")
        );
    }

    #[test]
    fn test_resolve_absolute() {
        assert_eq!(
            work().resolve("/work/file.txt").unwrap(),
            Path::new("/work/file.txt")
        );
        assert!(work().resolve("/etc/passwd").is_err());
        assert!(work().resolve("/").is_err());
        assert!(work().resolve("/workshop/x").is_err());
    }

    #[test]
    fn test_extra_roots() {
        let ws = work().allow("/data/csv").allow("/work/output");
        assert_eq!(ws.roots().len(), 2);
        assert_eq!(
            ws.resolve("/data/csv/sales.csv").unwrap(),
            Path::new("/data/csv/sales.csv")
        );
        assert!(ws.resolve("/data/other.csv").is_err());
        // relative paths still resolve against the base
        assert_eq!(
            ws.resolve("notes.txt").unwrap(),
            Path::new("/work/notes.txt")
        );
    }

    #[test]
    fn test_truncate_output() {
        assert_eq!(truncate_output("abc".into(), 0), "abc");
        assert_eq!(truncate_output("abc".into(), 3), "abc");
        let cut = truncate_output("héllo".into(), 2);
        assert!(cut.starts_with("h\n... [output truncated"));
    }

    #[test]
    fn test_parameters_schema_is_plain_object() {
        let p = parameters::<ReadFileArgs>();
        assert_eq!(p["type"], "object");
        assert!(p.get("$schema").is_none());
        assert!(p["properties"].get("offset").is_some());
    }

    #[tokio::test]
    async fn test_write_then_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Arc::new(Workspace::new(dir.path()));

        let res = WriteFile::new(ws.clone())
            .call(WriteFileArgs {
                path: "output/report.txt".into(),
                content: "line one\nline two\nline three".into(),
            })
            .await
            .unwrap();
        assert_eq!(res, "ok");

        let read = ReadFile::new(ws)
            .call(ReadFileArgs {
                path: "output/report.txt".into(),
                offset: 1,
                limit: 1,
            })
            .await
            .unwrap();
        assert_eq!(read, "   2| line two\n");
    }

    #[tokio::test]
    async fn test_write_outside_workspace_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Arc::new(Workspace::new(dir.path()));
        let err = WriteFile::new(ws)
            .call(WriteFileArgs {
                path: "../escape.txt".into(),
                content: "x".into(),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Access denied"));
    }

    #[tokio::test]
    async fn test_bash_runs_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sales.csv"), "a,b\n1,2\n").unwrap();
        let bash = Bash::new(Arc::new(Workspace::new(dir.path())), 0);

        let out = bash
            .call(BashArgs {
                cmd: "cat sales.csv; echo oops 1>&2; exit 3".into(),
            })
            .await
            .unwrap();
        assert_eq!(out, "a,b\n1,2\noops");

        let empty = bash.call(BashArgs { cmd: "true".into() }).await.unwrap();
        assert_eq!(empty, "(empty)");
    }

    #[tokio::test]
    async fn test_glob_and_grep() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data/sales.csv"), "product,revenue\nWidget,10\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "nothing here").unwrap();
        let ws = Arc::new(Workspace::new(dir.path()));

        let found = GlobFiles::new(ws.clone())
            .call(GlobFilesArgs {
                pat: "**/*.csv".into(),
                path: ".".into(),
            })
            .await
            .unwrap();
        assert!(found.ends_with("data/sales.csv"));
        assert!(!found.contains("notes.txt"));

        let none = GlobFiles::new(ws.clone())
            .call(GlobFilesArgs {
                pat: "*.parquet".into(),
                path: "".into(),
            })
            .await
            .unwrap();
        assert_eq!(none, "none");

        let hits = GrepText::new(ws)
            .call(GrepTextArgs {
                pat: "^Widget".into(),
                path: "data/sales.csv".into(),
            })
            .await
            .unwrap();
        assert!(hits.ends_with("sales.csv:2:Widget,10"));
    }
}
