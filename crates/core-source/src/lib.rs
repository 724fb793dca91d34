//! Source coordinates shared by every stage of the pipeline.
//!
//! A byte of Verilog text travels through include splicing and macro
//! expansion before the lexer ever sees it, so a flat offset is not enough
//! to say where it came from. A [`Pos`] is a stack of [`Frame`]s: the bottom
//! frame names the file that physically contains the byte, and each frame
//! above it records a macro expansion the byte passed through. Tokens and
//! AST nodes carry a [`SourceRange`] of two such stacks; the rewrite stage
//! only ever accepts ranges that consist of a single file frame, because an
//! edit against a macro expansion has no byte in any real file to land on.

use std::fmt;

/// Where a frame's coordinates point: a real file on disk, or the body of a
/// macro expansion (whose offsets are relative to the expansion text).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    File,
    Macro,
}

/// One level of source context: `(kind, name, byte, line, column)`.
/// `byte` is 0-based; `line` and `column` are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub name: String,
    pub byte: usize,
    pub line: u32,
    pub column: u32,
}

impl Frame {
    /// A file frame positioned at the start of `name`.
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::File,
            name: name.into(),
            byte: 0,
            line: 1,
            column: 1,
        }
    }

    /// A macro frame positioned at the start of `name`'s expansion.
    pub fn macro_frame(name: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Macro,
            name: name.into(),
            byte: 0,
            line: 1,
            column: 1,
        }
    }

    /// Advance past `text`, keeping byte, line, and column in step.
    pub fn advance(&mut self, text: &str) {
        self.byte += text.len();
        let newlines = text.bytes().filter(|&b| b == b'\n').count();
        if newlines > 0 {
            self.line += newlines as u32;
            let tail = text.rfind('\n').map(|i| text.len() - i - 1).unwrap_or(0);
            self.column = tail as u32 + 1;
        } else {
            self.column += text.len() as u32;
        }
    }

    /// The frame `len` bytes further along the same line. Used to derive the
    /// end position of a lexed atom from its start.
    pub fn offset(&self, len: usize) -> Self {
        let mut f = self.clone();
        f.byte += len;
        f.column += len as u32;
        f
    }
}

/// An ordered frame stack identifying one source position.
///
/// `frames[0]` is always a [`FrameKind::File`] frame; any frames after it are
/// macro expansions, innermost last. Construction via [`Pos::new`] enforces
/// the non-empty invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pos {
    frames: Vec<Frame>,
}

impl Pos {
    /// Build a position from a non-empty stack whose bottom is a file frame.
    ///
    /// # Panics
    /// Panics if `frames` is empty or the bottom frame is not a file; both
    /// indicate a lexer book-keeping bug, not a user error.
    pub fn new(frames: Vec<Frame>) -> Self {
        assert!(!frames.is_empty(), "position stack must be non-empty");
        assert_eq!(
            frames[0].kind,
            FrameKind::File,
            "position stack must be rooted in a file frame"
        );
        Self { frames }
    }

    /// A single-file-frame position, the common case.
    pub fn in_file(frame: Frame) -> Self {
        Self::new(vec![frame])
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// The file frame the byte physically lives in.
    pub fn file_frame(&self) -> &Frame {
        &self.frames[0]
    }

    /// The innermost frame: the macro currently expanding, or the file frame
    /// itself when no macro is active.
    pub fn innermost(&self) -> &Frame {
        self.frames.last().expect("non-empty by construction")
    }

    /// True when this position may be the target of an edit: exactly one
    /// frame, and that frame names a file.
    pub fn is_editable(&self) -> bool {
        self.frames.len() == 1 && self.frames[0].kind == FrameKind::File
    }

    pub fn file_name(&self) -> &str {
        &self.frames[0].name
    }

    /// The position `len` bytes past this one, offsetting the innermost
    /// frame only. Outer frames stay put: a macro expansion grows inside its
    /// invocation point.
    pub fn offset(&self, len: usize) -> Self {
        let mut frames = self.frames.clone();
        let last = frames.last_mut().expect("non-empty by construction");
        *last = last.offset(len);
        Self { frames }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = self.file_frame();
        write!(f, "{}:{}:{}", file.name, file.line, file.column)?;
        for frame in &self.frames[1..] {
            write!(f, " in macro {}", frame.name)?;
        }
        Ok(())
    }
}

/// A half-open byte range `[start, end)` on the original sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRange {
    pub start: Pos,
    pub end: Pos,
}

impl SourceRange {
    pub fn new(start: Pos, end: Pos) -> Self {
        Self { start, end }
    }

    /// The `(file, start_byte, end_byte)` span this range covers, provided
    /// both endpoints are editable and agree on the file. Ranges that touch
    /// a macro expansion return `None`: they must never become edits.
    pub fn editable_span(&self) -> Option<(&str, usize, usize)> {
        if !self.start.is_editable() || !self.end.is_editable() {
            return None;
        }
        let (s, e) = (self.start.file_frame(), self.end.file_frame());
        if s.name != e.name {
            return None;
        }
        Some((s.name.as_str(), s.byte, e.byte))
    }
}

impl fmt::Display for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_tracks_lines_and_columns() {
        let mut f = Frame::file("a.v");
        f.advance("module");
        assert_eq!((f.byte, f.line, f.column), (6, 1, 7));
        f.advance(" m;\nendmodule");
        assert_eq!((f.byte, f.line, f.column), (19, 2, 10));
    }

    #[test]
    fn advance_column_resets_after_trailing_newline() {
        let mut f = Frame::file("a.v");
        f.advance("wire x;\n");
        assert_eq!((f.line, f.column), (2, 1));
    }

    #[test]
    fn offset_moves_innermost_frame_only() {
        let pos = Pos::new(vec![
            Frame {
                byte: 40,
                line: 3,
                column: 5,
                ..Frame::file("top.v")
            },
            Frame::macro_frame("W"),
        ]);
        let end = pos.offset(4);
        assert_eq!(end.file_frame().byte, 40);
        assert_eq!(end.innermost().byte, 4);
    }

    #[test]
    fn editable_requires_single_file_frame() {
        let file_only = Pos::in_file(Frame::file("a.v"));
        assert!(file_only.is_editable());
        let in_macro = Pos::new(vec![Frame::file("a.v"), Frame::macro_frame("W")]);
        assert!(!in_macro.is_editable());
    }

    #[test]
    fn editable_span_rejects_cross_file_ranges() {
        let r = SourceRange::new(
            Pos::in_file(Frame::file("a.v")),
            Pos::in_file(Frame::file("b.v")),
        );
        assert_eq!(r.editable_span(), None);
    }

    #[test]
    fn display_appends_macro_frames() {
        let pos = Pos::new(vec![
            Frame {
                line: 3,
                column: 9,
                ..Frame::file("top.v")
            },
            Frame::macro_frame("W"),
        ]);
        assert_eq!(pos.to_string(), "top.v:3:9 in macro W");
    }
}
