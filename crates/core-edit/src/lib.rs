//! Byte-range edit plan and the rewrite executor that replays it.
//!
//! Every mutation the tool performs is expressed as an operation against a
//! byte range of an *original* file: `Remove` wraps the bytes in delete
//! sentinels (so the next run can restore them), `Delete` drops bytes
//! outright (used to strip a previous run's sentinels), and `Insert` splices
//! generated text. Operations accumulate in an [`EditPlan`] shared by the
//! preprocessor and the AST mutators, and nothing touches the filesystem
//! until [`execute`] streams each original file through its sorted
//! operations into a `<path>.out` sibling.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use core_source::{Pos, SourceRange};
use tracing::{debug, info};

pub mod sentinel {
    //! Bit-exact marker strings embedded in rewritten sources.
    pub const DELETE_OPEN: &str = "/*metav_delete:";
    pub const DELETE_CLOSE: &str = ":metav_delete*/";
    pub const GENERATED_OPEN: &str = "/*metav_generated:*/";
    pub const GENERATED_CLOSE: &str = "/*:metav_generated*/";
}

#[derive(Debug, thiserror::Error)]
pub enum EditError {
    /// Two removal ranges overlap, or an op starts before the stream cursor.
    #[error("overlapping edits in {file}: operation at byte {at} starts before byte {cursor}")]
    OverlappingEdits {
        file: String,
        at: usize,
        cursor: usize,
    },
    /// The range touches a macro expansion or spans files; no original-file
    /// bytes correspond to it.
    #[error("range at {pos} cannot be edited: it does not map to a single original file")]
    UneditableRange { pos: Pos },
    /// A removal range is empty or inverted.
    #[error("empty edit range in {file} at byte {at}")]
    EmptyRange { file: String, at: usize },
    #[error("failed to {action} {}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One operation against an original file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOp {
    /// Wrap the bytes of `range` in delete sentinels, keeping them
    /// recoverable.
    Remove { range: SourceRange },
    /// Drop the bytes of `range` entirely.
    Delete { range: SourceRange },
    /// Splice `text`, framed by generated-code sentinels, at `at`.
    Insert { at: Pos, text: String },
}

impl EditOp {
    fn file(&self) -> &str {
        match self {
            EditOp::Remove { range } | EditOp::Delete { range } => range.start.file_name(),
            EditOp::Insert { at, .. } => at.file_name(),
        }
    }

    fn start_byte(&self) -> usize {
        match self {
            EditOp::Remove { range } | EditOp::Delete { range } => range.start.file_frame().byte,
            EditOp::Insert { at, .. } => at.file_frame().byte,
        }
    }

    /// Removals sort after inserts at the same byte.
    fn is_removal(&self) -> bool {
        !matches!(self, EditOp::Insert { .. })
    }
}

/// Append-only list of [`EditOp`]s in registration order.
///
/// Validation happens at registration: ranges must map onto a single
/// original file ([`SourceRange::editable_span`]) and removals must be
/// non-empty. Ordering is imposed later, by [`execute`].
#[derive(Debug, Default)]
pub struct EditPlan {
    ops: Vec<EditOp>,
}

/// The plan is shared between the preprocessor, every module of a run, and
/// the executor; the pipeline is single-threaded (one driver, no tasks), so
/// `Rc<RefCell<_>>` is the ownership model.
pub type SharedEditPlan = Rc<RefCell<EditPlan>>;

impl EditPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedEditPlan {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn ops(&self) -> &[EditOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    fn removal_span(range: &SourceRange) -> Result<(), EditError> {
        let (file, start, end) = range
            .editable_span()
            .ok_or_else(|| EditError::UneditableRange {
                pos: range.start.clone(),
            })?;
        if start >= end {
            return Err(EditError::EmptyRange {
                file: file.to_string(),
                at: start,
            });
        }
        Ok(())
    }

    pub fn remove(&mut self, range: SourceRange) -> Result<(), EditError> {
        Self::removal_span(&range)?;
        debug!(target: "edit", file = range.start.file_name(), at = range.start.file_frame().byte, "remove");
        self.ops.push(EditOp::Remove { range });
        Ok(())
    }

    pub fn delete(&mut self, range: SourceRange) -> Result<(), EditError> {
        Self::removal_span(&range)?;
        debug!(target: "edit", file = range.start.file_name(), at = range.start.file_frame().byte, "delete");
        self.ops.push(EditOp::Delete { range });
        Ok(())
    }

    pub fn insert(&mut self, at: Pos, text: String) -> Result<(), EditError> {
        if !at.is_editable() {
            return Err(EditError::UneditableRange { pos: at });
        }
        debug!(target: "edit", file = at.file_name(), at = at.file_frame().byte, bytes = text.len(), "insert");
        self.ops.push(EditOp::Insert { at, text });
        Ok(())
    }

    pub fn append(&mut self, ops: impl IntoIterator<Item = EditOp>) {
        self.ops.extend(ops);
    }
}

struct FileRewrite {
    contents: String,
    cursor: usize,
    out: String,
}

/// Replay `plan` against the original files, producing `<path>.out` for each
/// touched file. Returns the written paths. Untouched files are never
/// written; a failing run writes nothing (errors surface before the first
/// output file is created).
pub fn execute(plan: &EditPlan) -> Result<Vec<PathBuf>, EditError> {
    // Stable sort: ties on (file, byte) keep registration order, and inserts
    // land before any removal at the same byte.
    let mut order: Vec<&EditOp> = plan.ops().iter().collect();
    order.sort_by_key(|op| (op.file().to_string(), op.start_byte(), op.is_removal()));

    let mut files: HashMap<String, FileRewrite> = HashMap::new();
    let mut touched: Vec<String> = Vec::new();

    for op in order {
        let name = op.file().to_string();
        if !files.contains_key(&name) {
            let contents = fs::read_to_string(&name).map_err(|source| EditError::Io {
                action: "read",
                path: PathBuf::from(&name),
                source,
            })?;
            files.insert(
                name.clone(),
                FileRewrite {
                    contents,
                    cursor: 0,
                    out: String::new(),
                },
            );
            touched.push(name.clone());
        }
        let file = files.get_mut(&name).expect("inserted above");

        let start = op.start_byte();
        if start < file.cursor {
            return Err(EditError::OverlappingEdits {
                file: name,
                at: start,
                cursor: file.cursor,
            });
        }
        file.out.push_str(&file.contents[file.cursor..start]);
        file.cursor = start;

        match op {
            EditOp::Remove { range } | EditOp::Delete { range } => {
                let (_, _, end) = range.editable_span().expect("validated at registration");
                let skipped = &file.contents[start..end];
                if let EditOp::Remove { .. } = op {
                    file.out.push_str(sentinel::DELETE_OPEN);
                    file.out.push_str(skipped);
                    file.out.push_str(sentinel::DELETE_CLOSE);
                }
                file.cursor = end;
            }
            EditOp::Insert { text, .. } => {
                file.out.push_str(sentinel::GENERATED_OPEN);
                file.out.push('\n');
                file.out.push_str(text);
                file.out.push('\n');
                file.out.push_str(sentinel::GENERATED_CLOSE);
            }
        }
    }

    let mut written = Vec::new();
    for name in touched {
        let file = &files[&name];
        let path = PathBuf::from(format!("{name}.out"));
        let mut out = file.out.clone();
        out.push_str(&file.contents[file.cursor..]);
        fs::write(&path, out).map_err(|source| EditError::Io {
            action: "write",
            path: path.clone(),
            source,
        })?;
        info!(target: "edit", file = %path.display(), "wrote rewritten source");
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_source::Frame;

    fn at(file: &str, byte: usize) -> Pos {
        Pos::in_file(Frame {
            byte,
            ..Frame::file(file)
        })
    }

    fn span(file: &str, start: usize, end: usize) -> SourceRange {
        SourceRange::new(at(file, start), at(file, end))
    }

    #[test]
    fn removal_of_macro_rooted_range_is_rejected() {
        let start = Pos::new(vec![Frame::file("a.v"), Frame::macro_frame("W")]);
        let range = SourceRange::new(start, at("a.v", 4));
        let mut plan = EditPlan::new();
        assert!(matches!(
            plan.remove(range),
            Err(EditError::UneditableRange { .. })
        ));
    }

    #[test]
    fn empty_removal_is_rejected() {
        let mut plan = EditPlan::new();
        assert!(matches!(
            plan.delete(span("a.v", 4, 4)),
            Err(EditError::EmptyRange { .. })
        ));
    }

    #[test]
    fn inserts_sort_before_removals_at_the_same_byte() {
        let mut plan = EditPlan::new();
        plan.delete(span("a.v", 2, 4)).unwrap();
        plan.insert(at("a.v", 2), "x".into()).unwrap();
        let mut order: Vec<&EditOp> = plan.ops().iter().collect();
        order.sort_by_key(|op| (op.file().to_string(), op.start_byte(), op.is_removal()));
        assert!(matches!(order[0], EditOp::Insert { .. }));
        assert!(matches!(order[1], EditOp::Delete { .. }));
    }
}
