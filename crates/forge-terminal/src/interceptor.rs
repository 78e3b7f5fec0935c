//! Best-effort sideband scanner for terminal output
//!
//! Each chunk is scanned on its own; anything split across chunk boundaries is
//! simply missed. The raw chunk is always forwarded unchanged by the caller.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use forge_types::{ContextUpdate, DiffPayload, DiffStats, FileAction, FileActivity, ServerMessage};

use super::DEFAULT_MAX_TOKENS;

/// Longest thought forwarded in a context message, in characters
const MAX_THOUGHT_CHARS: usize = 500;

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .expect("valid ANSI regex")
});

static THINKING_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<thinking>(.*?)</thinking>").expect("valid thinking regex"));

static THINKING_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*Thinking:\s*(.+)$").expect("valid thinking line regex"));

static FILE_ACCESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:[●⏺•*>-]\s*)?(Read|Write|Edit|Create|Update|Delete)(?:\(([^)\s]+)\)|:\s+(\S+))",
    )
    .expect("valid file access regex")
});

static DIFF_GIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^diff --git a/(\S+) b/(\S+)").expect("valid diff regex"));

static TOKENS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d[\d,]*(?:\.\d+)?)\s*(k)?\s+tokens\b").expect("valid token regex")
});

static COST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(\d+(?:\.\d+)?)").expect("valid cost regex"));

/// A structured signal recognised in an output chunk
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Thought(String),
    FileAccess(FileActivity),
    Diff(DiffPayload),
    Tokens { tokens: u64, cost: f64 },
}

/// Scan one chunk of raw terminal output
pub fn scan(chunk: &str) -> Vec<Signal> {
    let text = ANSI_ESCAPE.replace_all(chunk, "");
    let text = text.replace('\r', "");
    let mut signals = Vec::new();

    for capture in THINKING_TAG.captures_iter(&text) {
        if let Some(thought) = capture.get(1).map(|m| truncate_thought(m.as_str())) {
            if !thought.is_empty() {
                signals.push(Signal::Thought(thought));
            }
        }
    }

    for line in text.lines() {
        if let Some(capture) = THINKING_LINE.captures(line) {
            signals.push(Signal::Thought(truncate_thought(&capture[1])));
        }

        if let Some(capture) = FILE_ACCESS.captures(line) {
            let path = capture.get(2).or_else(|| capture.get(3));
            if let (Some(action), Some(path)) = (FileAction::from_verb(&capture[1]), path) {
                signals.push(Signal::FileAccess(FileActivity {
                    path: path.as_str().to_string(),
                    action,
                }));
            }
        }

        if let Some(capture) = TOKENS.captures(line) {
            if let Some(tokens) = parse_token_count(&capture[1], capture.get(2).is_some()) {
                let cost = COST
                    .captures(line)
                    .and_then(|c| c[1].parse::<f64>().ok())
                    .unwrap_or(0.0);
                signals.push(Signal::Tokens { tokens, cost });
            }
        }
    }

    signals.extend(scan_diffs(&text).into_iter().map(Signal::Diff));
    signals
}

fn truncate_thought(thought: &str) -> String {
    thought.trim().chars().take(MAX_THOUGHT_CHARS).collect()
}

fn parse_token_count(digits: &str, thousands: bool) -> Option<u64> {
    let value: f64 = digits.replace(',', "").parse().ok()?;
    let value = if thousands { value * 1000.0 } else { value };
    (value.is_finite() && value >= 0.0).then(|| value.round() as u64)
}

struct DiffBuilder {
    file_path: String,
    old_content: String,
    new_content: String,
    changes: DiffStats,
    in_hunk: bool,
}

impl DiffBuilder {
    fn new(file_path: &str) -> Self {
        Self {
            file_path: file_path.to_string(),
            old_content: String::new(),
            new_content: String::new(),
            changes: DiffStats::default(),
            in_hunk: false,
        }
    }

    fn finish(self) -> DiffPayload {
        DiffPayload {
            language: language_for(&self.file_path).to_string(),
            file_path: self.file_path,
            old_content: self.old_content,
            new_content: self.new_content,
            changes: self.changes,
        }
    }
}

/// Pull every diff whose header appears in `text`
fn scan_diffs(text: &str) -> Vec<DiffPayload> {
    let lines: Vec<&str> = text.lines().collect();
    let mut diffs = Vec::new();
    let mut current: Option<DiffBuilder> = None;
    let mut index = 0;

    while index < lines.len() {
        let line = lines[index];
        index += 1;

        if let Some(capture) = DIFF_GIT.captures(line) {
            diffs.extend(current.take().map(DiffBuilder::finish));
            current = Some(DiffBuilder::new(&capture[2]));
            continue;
        }

        // Bare unified header: "--- a/x" immediately followed by "+++ b/x"
        let starts_hunkless = current.as_ref().map_or(true, |d| d.in_hunk);
        if starts_hunkless && line.starts_with("--- ") {
            if let Some(next) = lines.get(index).filter(|l| l.starts_with("+++ ")) {
                diffs.extend(current.take().map(DiffBuilder::finish));
                current = Some(DiffBuilder::new(&header_path(line, next)));
                index += 1;
                continue;
            }
        }

        let Some(diff) = current.as_mut() else {
            continue;
        };

        if !diff.in_hunk {
            if line.starts_with("@@") {
                diff.in_hunk = true;
            } else if line.starts_with("--- ") || line.starts_with("+++ ") {
                if let Some(path) = line.strip_prefix("+++ ").and_then(strip_diff_prefix) {
                    diff.file_path = path.to_string();
                }
            } else if !is_extended_header(line) {
                diffs.extend(current.take().map(DiffBuilder::finish));
            }
            continue;
        }

        if line.starts_with("@@") {
            continue;
        } else if let Some(added) = line.strip_prefix('+') {
            diff.new_content.push_str(added);
            diff.new_content.push('\n');
            diff.changes.additions += 1;
        } else if let Some(removed) = line.strip_prefix('-') {
            diff.old_content.push_str(removed);
            diff.old_content.push('\n');
            diff.changes.deletions += 1;
        } else if let Some(context) = line.strip_prefix(' ') {
            diff.old_content.push_str(context);
            diff.old_content.push('\n');
            diff.new_content.push_str(context);
            diff.new_content.push('\n');
        } else if line.starts_with('\\') {
            // "\ No newline at end of file"
        } else {
            diffs.extend(current.take().map(DiffBuilder::finish));
        }
    }

    diffs.extend(current.map(DiffBuilder::finish));
    diffs
}

fn is_extended_header(line: &str) -> bool {
    const PREFIXES: [&str; 8] = [
        "index ",
        "new file mode",
        "deleted file mode",
        "old mode",
        "new mode",
        "similarity index",
        "rename from",
        "rename to",
    ];
    PREFIXES.iter().any(|p| line.starts_with(p))
}

fn strip_diff_prefix(path: &str) -> Option<&str> {
    let path = path.split('\t').next().unwrap_or(path).trim();
    if path == "/dev/null" {
        return None;
    }
    Some(
        path.strip_prefix("a/")
            .or_else(|| path.strip_prefix("b/"))
            .unwrap_or(path),
    )
}

fn header_path(old_line: &str, new_line: &str) -> String {
    new_line
        .strip_prefix("+++ ")
        .and_then(strip_diff_prefix)
        .or_else(|| old_line.strip_prefix("--- ").and_then(strip_diff_prefix))
        .unwrap_or("unknown")
        .to_string()
}

/// Editor language id for a file path, by extension
pub fn language_for(path: &str) -> &'static str {
    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("rs") => "rust",
        Some("ts") | Some("mts") => "typescript",
        Some("tsx") => "typescriptreact",
        Some("js") | Some("mjs") | Some("cjs") => "javascript",
        Some("jsx") => "javascriptreact",
        Some("py") => "python",
        Some("go") => "go",
        Some("java") => "java",
        Some("rb") => "ruby",
        Some("c") | Some("h") => "c",
        Some("cc") | Some("cpp") | Some("cxx") | Some("hpp") => "cpp",
        Some("cs") => "csharp",
        Some("json") => "json",
        Some("toml") => "toml",
        Some("yaml") | Some("yml") => "yaml",
        Some("md") => "markdown",
        Some("sh") | Some("bash") | Some("zsh") => "shell",
        Some("html") | Some("htm") => "html",
        Some("css") => "css",
        Some("sql") => "sql",
        _ => "plaintext",
    }
}

/// Per-session token bookkeeping that turns signals into sideband messages
#[derive(Debug, Clone)]
pub struct ContextTracker {
    total_tokens: u64,
    max_tokens: u64,
}

impl Default for ContextTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TOKENS)
    }
}

impl ContextTracker {
    pub fn new(max_tokens: u64) -> Self {
        Self {
            total_tokens: 0,
            max_tokens,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    /// Sideband message for a signal
    ///
    /// Token markers report a running count, so the latest one replaces the total.
    pub fn message_for(&mut self, signal: Signal) -> ServerMessage {
        match signal {
            Signal::Thought(thought) => ServerMessage::Context {
                data: ContextUpdate {
                    current_thought: Some(thought),
                    files: None,
                    total_tokens: self.total_tokens,
                    max_tokens: self.max_tokens,
                },
            },
            Signal::FileAccess(file) => ServerMessage::Context {
                data: ContextUpdate {
                    current_thought: None,
                    files: Some(vec![file]),
                    total_tokens: self.total_tokens,
                    max_tokens: self.max_tokens,
                },
            },
            Signal::Diff(diff) => ServerMessage::Diff { data: diff },
            Signal::Tokens { tokens, cost } => {
                self.total_tokens = tokens;
                ServerMessage::Cost { tokens, cost }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_plain_output_has_no_signals() {
        assert!(scan("total 8\r\ndrwxr-xr-x  2 user user 4096 src\r\n$ ").is_empty());
        assert!(scan("").is_empty());
    }

    #[test]
    fn test_thinking_tag() {
        let signals = scan("<thinking>  check the parser first </thinking>\r\n");
        assert_eq!(signals, vec![Signal::Thought("check the parser first".to_string())]);
    }

    #[test]
    fn test_unclosed_thinking_tag_is_ignored() {
        assert!(scan("<thinking>half a thought").is_empty());
    }

    #[test]
    fn test_thinking_line_is_truncated() {
        let long = "x".repeat(MAX_THOUGHT_CHARS + 50);
        let signals = scan(&format!("Thinking: {}\n", long));
        match &signals[..] {
            [Signal::Thought(thought)] => assert_eq!(thought.chars().count(), MAX_THOUGHT_CHARS),
            other => panic!("unexpected signals: {:?}", other),
        }
    }

    #[test]
    fn test_file_access_lines() {
        let signals = scan("\x1b[32m●\x1b[0m Read(src/main.rs)\r\nWrite: docs/notes.md\r\nEdited nothing\r\n");
        assert_eq!(
            signals,
            vec![
                Signal::FileAccess(FileActivity {
                    path: "src/main.rs".to_string(),
                    action: FileAction::Read,
                }),
                Signal::FileAccess(FileActivity {
                    path: "docs/notes.md".to_string(),
                    action: FileAction::Write,
                }),
            ]
        );
    }

    #[test]
    fn test_token_markers() {
        let signals = scan("↓ 1.2k tokens · $0.0042\r\n");
        assert_eq!(signals, vec![Signal::Tokens { tokens: 1200, cost: 0.0042 }]);

        let signals = scan("Total: 12,345 tokens\n");
        assert_eq!(signals, vec![Signal::Tokens { tokens: 12345, cost: 0.0 }]);
    }

    #[test]
    fn test_git_diff() {
        let chunk = "diff --git a/src/lib.rs b/src/lib.rs\n\
                     index 83db48f..bf269f4 100644\n\
                     --- a/src/lib.rs\n\
                     +++ b/src/lib.rs\n\
                     @@ -1,3 +1,3 @@\n \
                     fn main() {\n\
                     -    old();\n\
                     +    new();\n \
                     }\n\
                     $ ";
        let signals = scan(chunk);
        assert_eq!(
            signals,
            vec![Signal::Diff(DiffPayload {
                file_path: "src/lib.rs".to_string(),
                language: "rust".to_string(),
                old_content: "fn main() {\n    old();\n}\n".to_string(),
                new_content: "fn main() {\n    new();\n}\n".to_string(),
                changes: DiffStats { additions: 1, deletions: 1 },
            })]
        );
    }

    #[test]
    fn test_bare_unified_diff_for_new_file() {
        let chunk = "--- /dev/null\n+++ b/app.py\n@@ -0,0 +1 @@\n+print('hi')\n";
        match &scan(chunk)[..] {
            [Signal::Diff(diff)] => {
                assert_eq!(diff.file_path, "app.py");
                assert_eq!(diff.language, "python");
                assert_eq!(diff.changes, DiffStats { additions: 1, deletions: 0 });
                assert_eq!(diff.old_content, "");
            }
            other => panic!("unexpected signals: {:?}", other),
        }
    }

    #[test]
    fn test_diff_header_cut_at_chunk_boundary() {
        // Header arrives without its hunk; still reported, with empty content
        match &scan("diff --git a/x.go b/x.go\n")[..] {
            [Signal::Diff(diff)] => {
                assert_eq!(diff.file_path, "x.go");
                assert_eq!(diff.changes, DiffStats::default());
            }
            other => panic!("unexpected signals: {:?}", other),
        }
        // Partial escape sequences and lone markers never panic
        let _ = scan("\x1b[3");
        let _ = scan("+++ b/");
        let _ = scan("@@ -1 +1 @@\n+x");
    }

    #[test]
    fn test_language_for() {
        assert_eq!(language_for("src/main.rs"), "rust");
        assert_eq!(language_for("web/App.TSX"), "typescriptreact");
        assert_eq!(language_for("Makefile"), "plaintext");
    }

    #[test]
    fn test_tracker_messages() {
        let mut tracker = ContextTracker::new(1000);

        assert_eq!(
            tracker.message_for(Signal::Tokens { tokens: 400, cost: 0.01 }),
            ServerMessage::Cost { tokens: 400, cost: 0.01 }
        );
        assert_eq!(tracker.total_tokens(), 400);

        let msg = tracker.message_for(Signal::Thought("next step".to_string()));
        assert_eq!(
            msg,
            ServerMessage::Context {
                data: ContextUpdate {
                    current_thought: Some("next step".to_string()),
                    files: None,
                    total_tokens: 400,
                    max_tokens: 1000,
                },
            }
        );
    }
}
