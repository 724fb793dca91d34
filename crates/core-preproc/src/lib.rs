//! Verilog preprocessor: streams a source file into the annotated text the
//! lexer consumes.
//!
//! The dispatcher is an ordered list of anchored regexes tried against the
//! head of the remaining input; the first hit wins, and a catch-all run rule
//! guarantees progress. Comments and strings outrank `` ` `` directives so a
//! directive inside either is never interpreted.
//!
//! Output annotations: each file's contents are wrapped in
//! `` `file(path) ``/`` `endfile(path) ``, macro expansions in
//! `` `macro(name) ``/`` `endmacro(name) ``, and whenever emitted length
//! diverges from consumed length a `` `pos(line,byte) `` marker re-anchors
//! the lexer to original-file coordinates before the next emitted text.
//!
//! Pre-existing `/*metav_delete:`/`:metav_delete*/` and
//! `/*metav_generated:*/…/*:metav_generated*/` sentinels are stripped from
//! the stream and scheduled as `Delete` edits over their own bytes, which is
//! what makes reruns of the tool idempotent.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use core_edit::EditOp;
use core_source::{Frame, Pos, SourceRange};
use regex::Regex;
use tracing::{debug, trace};

#[derive(Debug, thiserror::Error)]
pub enum PreprocError {
    #[error("could not find \"{name}\" in include path ({searched})")]
    IncludeNotFound { name: String, searched: String },
    #[error("duplicate `define {name} at {pos}")]
    DuplicateDefine { name: String, pos: Pos },
    #[error("{directive} without matching `ifdef at {pos}")]
    UnbalancedIfdef { directive: &'static str, pos: Pos },
    #[error("unterminated `ifdef at end of {file}")]
    UnterminatedIfdef { file: String },
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    LineComment,
    MetavDeleteOpen,
    MetavDeleteClose,
    MetavGenerated,
    BlockComment,
    StringLit,
    Include,
    Ifdef,
    Ifndef,
    Else,
    Endif,
    Define,
    MacroRef,
    Text,
}

/// Ordered dispatch table. Sentinels outrank plain block comments, comments
/// and strings outrank directives, and the final run rule matches any byte.
static RULES: LazyLock<Vec<(Rule, Regex)>> = LazyLock::new(|| {
    let table: &[(Rule, &str)] = &[
        (Rule::LineComment, r"^//[^\n]*"),
        (Rule::MetavDeleteOpen, r"^/\*metav_delete:"),
        (Rule::MetavDeleteClose, r"^:metav_delete\*/"),
        (
            Rule::MetavGenerated,
            r"(?s)^/\*metav_generated:\*/.*?/\*:metav_generated\*/",
        ),
        (Rule::BlockComment, r"(?s)^/\*.*?\*/"),
        (Rule::StringLit, r#"^"(\\"|[^"])*""#),
        (Rule::Include, "^`include\\s+\"([^\"]+)\""),
        (Rule::Ifdef, r"^`ifdef\s+(\S+)"),
        (Rule::Ifndef, r"^`ifndef\s+(\S+)"),
        (Rule::Else, r"^`else"),
        (Rule::Endif, r"^`endif"),
        (Rule::Define, r"^`define[ \t]+([A-Za-z0-9_]+)[ \t]+"),
        (Rule::MacroRef, r"^`([A-Za-z_0-9]+)"),
        // Any byte, then as long a run as possible that cannot start another
        // rule. `:` is excluded so a delete-close sentinel is not swallowed.
        (Rule::Text, "(?s)^.[^/`\":]*"),
    ];
    table
        .iter()
        .map(|(rule, pat)| (*rule, Regex::new(pat).expect("static pattern")))
        .collect()
});

struct IfdefScope {
    outer_active: bool,
    taken: bool,
}

/// Preprocessor state threaded through every file of one run: include path,
/// macro definitions, and the conditional-compilation scope stack.
pub struct PreprocState {
    include_path: Vec<PathBuf>,
    defines: HashMap<String, String>,
    ifdef_stack: Vec<IfdefScope>,
    active: bool,
}

impl PreprocState {
    pub fn new(include_path: Vec<PathBuf>) -> Self {
        Self {
            include_path,
            defines: HashMap::new(),
            ifdef_stack: Vec::new(),
            active: true,
        }
    }

    pub fn include_path(&self) -> &[PathBuf] {
        &self.include_path
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.defines.contains_key(name)
    }

    fn push_ifdef(&mut self, taken: bool) {
        self.ifdef_stack.push(IfdefScope {
            outer_active: self.active,
            taken,
        });
        let scope = self.ifdef_stack.last().expect("just pushed");
        self.active = scope.outer_active && scope.taken;
    }

    fn flip_else(&mut self, pos: &Frame) -> Result<(), PreprocError> {
        let scope = self
            .ifdef_stack
            .last_mut()
            .ok_or_else(|| PreprocError::UnbalancedIfdef {
                directive: "`else",
                pos: Pos::in_file(pos.clone()),
            })?;
        scope.taken = !scope.taken;
        self.active = scope.outer_active && scope.taken;
        Ok(())
    }

    fn pop_endif(&mut self, pos: &Frame) -> Result<(), PreprocError> {
        let scope = self
            .ifdef_stack
            .pop()
            .ok_or_else(|| PreprocError::UnbalancedIfdef {
                directive: "`endif",
                pos: Pos::in_file(pos.clone()),
            })?;
        self.active = scope.outer_active;
        Ok(())
    }
}

/// Per-file cursor: original-file coordinates plus the sentinel-deletion
/// edits discovered in that file.
struct FileState {
    frame: Frame,
    edits: Vec<EditOp>,
}

impl FileState {
    fn drop_span(&mut self, matched: &str) {
        let start = self.frame.clone();
        let mut end = self.frame.clone();
        end.advance(matched);
        self.edits.push(EditOp::Delete {
            range: SourceRange::new(Pos::in_file(start), Pos::in_file(end)),
        });
    }
}

/// Preprocess the root file of a run. Beyond [`preprocess`], this also
/// rejects an `ifdef scope left open at end of input.
pub fn preprocess_root(
    path: &Path,
    state: &mut PreprocState,
) -> Result<(String, Vec<EditOp>), PreprocError> {
    let result = preprocess(path, state)?;
    if !state.ifdef_stack.is_empty() {
        return Err(PreprocError::UnterminatedIfdef {
            file: path.display().to_string(),
        });
    }
    Ok(result)
}

/// Preprocess one file into annotated text plus the `Delete` edits for any
/// pre-existing sentinels found in it. Included files are spliced in-line
/// (their edits folded into the returned list), each wrapped in its own
/// `` `file ``/`` `endfile `` pair.
pub fn preprocess(
    path: &Path,
    state: &mut PreprocState,
) -> Result<(String, Vec<EditOp>), PreprocError> {
    let name = path.display().to_string();
    debug!(target: "preproc", file = %name, "preprocessing");
    let contents = fs::read_to_string(path).map_err(|source| PreprocError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut file = FileState {
        frame: Frame::file(name.clone()),
        edits: Vec::new(),
    };
    let mut out = format!("`file({name})");
    process(&contents, state, &mut file, &mut out)?;
    let _ = write!(out, "`endfile({name})");
    Ok((out, file.edits))
}

fn process(
    input: &str,
    state: &mut PreprocState,
    file: &mut FileState,
    out: &mut String,
) -> Result<(), PreprocError> {
    let mut rest = input;
    // Net bytes by which emitted text has diverged from consumed text since
    // the last resync; non-zero means the lexer's file coordinates are stale.
    let mut skewed = 0i64;

    while !rest.is_empty() {
        let (rule, regex) = RULES
            .iter()
            .find(|(_, regex)| regex.is_match(rest))
            .expect("catch-all rule matches any non-empty input");
        let caps = regex.captures(rest).expect("just matched");
        let mut consumed = caps.get(0).expect("whole match").as_str();
        trace!(target: "preproc", rule = ?rule, len = consumed.len(), "matched");

        let generated: String = match rule {
            Rule::LineComment | Rule::BlockComment | Rule::StringLit | Rule::Text => {
                if state.active {
                    consumed.to_string()
                } else {
                    String::new()
                }
            }
            Rule::MetavDeleteOpen | Rule::MetavDeleteClose | Rule::MetavGenerated => {
                // Sentinels are stripped even inside inactive regions, so a
                // rerun cleans up everywhere.
                file.drop_span(consumed);
                String::new()
            }
            Rule::Include => {
                if state.active {
                    expand_include(caps.get(1).expect("path group").as_str(), state, file)?
                } else {
                    String::new()
                }
            }
            Rule::Ifdef => {
                let defined = state.is_defined(caps.get(1).expect("name group").as_str());
                state.push_ifdef(defined);
                String::new()
            }
            Rule::Ifndef => {
                let defined = state.is_defined(caps.get(1).expect("name group").as_str());
                state.push_ifdef(!defined);
                String::new()
            }
            Rule::Else => {
                state.flip_else(&file.frame)?;
                String::new()
            }
            Rule::Endif => {
                state.pop_endif(&file.frame)?;
                String::new()
            }
            Rule::Define => {
                // The value runs to end of line or the start of a comment;
                // the terminator itself stays in the input.
                let head = consumed.len();
                let value_len = define_value_len(&rest[head..]);
                consumed = &rest[..head + value_len];
                if state.active {
                    let name = caps.get(1).expect("name group").as_str();
                    let value = &rest[head..head + value_len];
                    if state.defines.contains_key(name) {
                        return Err(PreprocError::DuplicateDefine {
                            name: name.to_string(),
                            pos: Pos::in_file(file.frame.clone()),
                        });
                    }
                    debug!(target: "preproc", name, value, "define");
                    state.defines.insert(name.to_string(), value.to_string());
                }
                String::new()
            }
            Rule::MacroRef => {
                if state.active {
                    expand_macro(caps.get(1).expect("name group").as_str(), state, file)?
                } else {
                    String::new()
                }
            }
        };

        if skewed != 0 && !generated.is_empty() {
            // Re-anchor the lexer before the next text it will see.
            let _ = write!(out, "`pos({},{})", file.frame.line, file.frame.byte);
            skewed = 0;
        }
        out.push_str(&generated);
        skewed += consumed.len() as i64 - generated.len() as i64;
        file.frame.advance(consumed);
        rest = &rest[consumed.len()..];
    }
    Ok(())
}

fn define_value_len(rest: &str) -> usize {
    let bytes = rest.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\n' => break,
            b'/' if matches!(bytes.get(i + 1), Some(b'/') | Some(b'*')) => break,
            _ => i += 1,
        }
    }
    i
}

fn expand_include(
    name: &str,
    state: &mut PreprocState,
    file: &mut FileState,
) -> Result<String, PreprocError> {
    for dir in state.include_path.clone() {
        let candidate = dir.join(name);
        if candidate.is_file() {
            let (text, edits) = preprocess(&candidate, state)?;
            file.edits.extend(edits);
            return Ok(text);
        }
    }
    Err(PreprocError::IncludeNotFound {
        name: name.to_string(),
        searched: state
            .include_path
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

fn expand_macro(
    name: &str,
    state: &mut PreprocState,
    file: &FileState,
) -> Result<String, PreprocError> {
    let Some(body) = state.defines.get(name).cloned() else {
        // Undefined macros expand to nothing.
        return Ok(String::new());
    };
    trace!(target: "preproc", name, "expanding macro");
    // The body gets its own cursor so resync markers inside the expansion
    // refer to expansion-local coordinates; any sentinel edits found inside
    // a macro body have no file bytes to target and are discarded.
    let mut body_file = FileState {
        frame: Frame::file(format!("{}%{}", file.frame.name, name)),
        edits: Vec::new(),
    };
    let mut expansion = String::new();
    process(&body, state, &mut body_file, &mut expansion)?;
    Ok(format!("`macro({name}){expansion}`endmacro({name})"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(input: &str) -> (String, Vec<EditOp>) {
        let mut state = PreprocState::new(vec![]);
        let mut file = FileState {
            frame: Frame::file("t.v"),
            edits: Vec::new(),
        };
        let mut out = String::new();
        process(input, &mut state, &mut file, &mut out).unwrap();
        (out, file.edits)
    }

    #[test]
    fn passthrough_is_byte_identical() {
        let src = "module m;\n  wire x; // keep\nendmodule\n";
        let (out, edits) = run(src);
        assert_eq!(out, src);
        assert!(edits.is_empty());
    }

    #[test]
    fn directives_inside_comments_and_strings_are_inert() {
        let src = "// `define A 1\n/* `include \"x\" */ $display(\"`B\");\n";
        let (out, _) = run(src);
        assert_eq!(out, src);
    }

    #[test]
    fn define_and_expand_wraps_in_macro_anchors() {
        let (out, _) = run("`define W wire x;\n`W\n");
        assert!(out.contains("`macro(W)wire x;`endmacro(W)"), "{out}");
    }

    #[test]
    fn define_value_stops_at_comment() {
        let (out, _) = run("`define V 42 // the answer\n`V\n");
        assert!(out.contains("`macro(V)42 `endmacro(V)"), "{out}");
        assert!(out.contains("// the answer"), "{out}");
    }

    #[test]
    fn duplicate_define_is_fatal() {
        let mut state = PreprocState::new(vec![]);
        let mut file = FileState {
            frame: Frame::file("t.v"),
            edits: Vec::new(),
        };
        let mut out = String::new();
        let err = process(
            "`define A 1\n`define A 2\n",
            &mut state,
            &mut file,
            &mut out,
        )
        .unwrap_err();
        assert!(matches!(err, PreprocError::DuplicateDefine { .. }));
    }

    #[test]
    fn undefined_macro_expands_to_nothing() {
        let (out, _) = run("wire a;\n`NOPE\nwire b;\n");
        assert!(!out.contains("NOPE"), "{out}");
        assert!(out.contains("wire b;"), "{out}");
    }

    #[test]
    fn ifdef_suppresses_and_resyncs() {
        let (out, _) = run("`ifdef FEATURE\nwire hidden;\n`endif\nwire kept;\n");
        assert!(!out.contains("hidden"), "{out}");
        // Skipped bytes must be followed by a resync marker before `wire kept`.
        assert!(out.contains("`pos("), "{out}");
        assert!(out.contains("wire kept;"), "{out}");
    }

    #[test]
    fn ifndef_takes_the_branch_when_undefined() {
        let (out, _) = run("`ifndef FEATURE\nwire kept;\n`endif\n");
        assert!(out.contains("wire kept;"), "{out}");
    }

    #[test]
    fn else_flips_only_the_innermost_scope() {
        let src = "`ifdef OUTER\n`ifdef INNER\na\n`else\nb\n`endif\nc\n`endif\nd\n";
        let (out, _) = run(src);
        // OUTER is undefined: nothing from inside may leak, even though the
        // inner `else arm would be taken were OUTER active.
        for leaked in ["a", "b", "c"] {
            assert!(!out.contains(&format!("\n{leaked}\n")), "{out}");
        }
        assert!(out.contains('d'), "{out}");
    }

    #[test]
    fn spurious_else_and_endif_are_fatal() {
        let mut state = PreprocState::new(vec![]);
        let mut file = FileState {
            frame: Frame::file("t.v"),
            edits: Vec::new(),
        };
        let mut out = String::new();
        let err = process("`else\n", &mut state, &mut file, &mut out).unwrap_err();
        assert!(matches!(err, PreprocError::UnbalancedIfdef { .. }));
    }

    #[test]
    fn delete_sentinels_are_dropped_and_scheduled() {
        let src = "/*metav_delete:wire x;:metav_delete*/\n";
        let (out, edits) = run(src);
        assert_eq!(out, "wire x;\n");
        assert_eq!(edits.len(), 2);
        let spans: Vec<_> = edits
            .iter()
            .map(|op| match op {
                EditOp::Delete { range } => range.editable_span().unwrap(),
                other => panic!("expected Delete, got {other:?}"),
            })
            .collect();
        assert_eq!(spans[0], ("t.v", 0, 15));
        assert_eq!(spans[1], ("t.v", 22, 37));
    }

    #[test]
    fn generated_spans_are_dropped_whole() {
        let src = "a\n/*metav_generated:*/\nwire y;\n/*:metav_generated*/b\n";
        let (out, edits) = run(src);
        assert!(!out.contains("wire y;"), "{out}");
        assert_eq!(edits.len(), 1);
        assert!(out.starts_with("a\n"), "{out}");
        assert!(out.contains('b'), "{out}");
    }

    #[test]
    fn resync_marker_carries_original_coordinates() {
        let src = "`define W wire x;\n`W wire y;\n";
        let (out, _) = run(src);
        // After the zero-length define expansion, the next emitted text must
        // be re-anchored to line 2.
        assert!(out.contains("`pos(2,"), "{out}");
    }
}
