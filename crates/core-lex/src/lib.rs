//! Position-annotating lexer for the preprocessor's annotated stream.
//!
//! The stream interleaves ordinary Verilog text with anchor directives
//! (`` `file ``, `` `endfile ``, `` `macro ``, `` `endmacro ``,
//! `` `pos ``). Anchors never become tokens; they mutate a live frame stack
//! so that every token the lexer does emit can snapshot exactly which
//! original file byte (and macro expansion chain) it came from. Anchor text
//! advances no frame; only real lexemes move the coordinates.
//!
//! Besides tokens, the lexer extracts `/*metav … */` blocks as embedded
//! scripts (indent-stripped, attributed to the module being lexed) and
//! resolves comment association: a pending block comment becomes the next
//! identifier's leading comment, and a line comment on the same line as the
//! line's first identifier becomes that identifier's trailing comment.

use std::sync::LazyLock;

use core_source::{Frame, FrameKind, Pos, SourceRange};
use regex::Regex;
use tracing::trace;

pub mod literal;
pub mod token;

pub use literal::{NumberError, VerilogNumber};
pub use token::{Symbol, Token, TokenKind};

static ANCHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^`([a-z_0-9]+)\(([^)]*)\)").expect("static"));
static METAV: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^/\*+\s*metav[\s*]*?\n+(?P<white>[\t ]*)(?P<code>.*?)\s*\*/").expect("static")
});
static LEGACY_GENERATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^/\*metav generated:\*/.*?/\*end metav generated\*/").expect("static")
});
static BLOCK_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^/\*.*?\*/").expect("static"));
static LINE_COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^//[^\n]*").expect("static"));
static STRING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^"(\\"|[^"])*""#).expect("static"));
static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]*'([bB][01_zxZX?]+|[hH][0-9a-fA-F_zxZX?]+|[dD][0-9_]+)|[0-9]+)")
        .expect("static")
});
static IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*").expect("static"));
static ESCAPED_IDENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\\\S+").expect("static"));
static SYS_IDENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\$\w*").expect("static"));

#[derive(Debug, thiserror::Error)]
pub enum LexError {
    #[error("unknown anchor `{name} in annotated stream")]
    UnknownAnchor { name: String },
    #[error("malformed anchor near \"{text}\"")]
    MalformedAnchor { text: String },
    #[error("mismatched `{what}: expected {expected}, found {found}")]
    MismatchedAnchor {
        what: &'static str,
        expected: String,
        found: String,
    },
    #[error("`include inside a macro expansion at {pos}")]
    IncludeInMacro { pos: Pos },
    #[error("lexical content outside any file context")]
    NoFileContext,
    #[error("unterminated comment at {pos}")]
    UnterminatedComment { pos: Pos },
    #[error("unterminated string at {pos}")]
    UnterminatedString { pos: Pos },
    #[error("illegal character '{ch}' at {pos}")]
    IllegalChar { ch: char, pos: Pos },
    #[error("{source} at {pos}")]
    BadNumber {
        pos: Pos,
        #[source]
        source: NumberError,
    },
    #[error("metav script line without the common indent prefix at {pos}")]
    ScriptIndent { pos: Pos },
}

/// An embedded script extracted from a `/*metav … */` block.
#[derive(Debug, Clone)]
pub struct MetavBlock {
    /// The module being lexed when the block appeared, if any.
    pub module: Option<String>,
    /// Script source with the common indent prefix stripped.
    pub source: String,
    /// Start of the comment in the original file.
    pub pos: Pos,
}

#[derive(Debug, Default)]
pub struct LexOutput {
    pub tokens: Vec<Token>,
    pub scripts: Vec<MetavBlock>,
}

/// Tokenize an annotated stream produced by the preprocessor.
pub fn lex(annotated: &str) -> Result<LexOutput, LexError> {
    Lexer::new(annotated).run()
}

struct Lexer<'a> {
    src: &'a str,
    at: usize,
    frames: Vec<Frame>,
    tokens: Vec<Token>,
    scripts: Vec<MetavBlock>,
    /// Index of the first identifier on the current line, the comment
    /// association anchor.
    prev_decl: Option<usize>,
    /// Block comment waiting to become some identifier's leading comment.
    pending_block: Option<String>,
    last_kind: Option<TokenKind>,
    cur_module: Option<String>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            at: 0,
            frames: Vec::new(),
            tokens: Vec::new(),
            scripts: Vec::new(),
            prev_decl: None,
            pending_block: None,
            last_kind: None,
            cur_module: None,
        }
    }

    fn run(mut self) -> Result<LexOutput, LexError> {
        while self.at < self.src.len() {
            let rest = &self.src[self.at..];
            match rest.as_bytes()[0] {
                b'`' => self.anchor(rest)?,
                b'\n' => {
                    let n = rest.bytes().take_while(|&b| b == b'\n').count();
                    self.consume(&rest[..n]);
                    self.prev_decl = None;
                }
                b' ' | b'\t' | b'\r' => {
                    let n = rest
                        .bytes()
                        .take_while(|&b| matches!(b, b' ' | b'\t' | b'\r'))
                        .count();
                    self.consume(&rest[..n]);
                }
                b'/' if rest.starts_with("//") || rest.starts_with("/*") => self.comment(rest)?,
                b'"' => self.string(rest)?,
                b'0'..=b'9' | b'\'' => self.number(rest)?,
                b'$' => self.sys_ident(rest)?,
                b'\\' => self.escaped_ident(rest)?,
                b'A'..=b'Z' | b'a'..=b'z' | b'_' => self.ident(rest)?,
                _ => self.symbol(rest)?,
            }
        }
        Ok(LexOutput {
            tokens: self.tokens,
            scripts: self.scripts,
        })
    }

    /// Snapshot the stack from the innermost file frame upward: the file the
    /// byte physically lives in, plus any macro expansions above it.
    fn snapshot(&self) -> Result<Pos, LexError> {
        let base = self
            .frames
            .iter()
            .rposition(|f| f.kind == FrameKind::File)
            .ok_or(LexError::NoFileContext)?;
        Ok(Pos::new(self.frames[base..].to_vec()))
    }

    fn consume(&mut self, text: &str) {
        if let Some(top) = self.frames.last_mut() {
            top.advance(text);
        }
        self.at += text.len();
    }

    fn current_line(&self) -> u32 {
        self.frames.last().map(|f| f.line).unwrap_or(0)
    }

    fn anchor(&mut self, rest: &str) -> Result<(), LexError> {
        let caps = ANCHOR.captures(rest).ok_or_else(|| LexError::MalformedAnchor {
            text: rest.chars().take(24).collect(),
        })?;
        let name = caps.get(1).expect("group").as_str();
        let value = caps.get(2).expect("group").as_str();
        trace!(target: "lex", anchor = name, value, "anchor");
        match name {
            "file" => {
                if self.frames.last().is_some_and(|f| f.kind == FrameKind::Macro) {
                    return Err(LexError::IncludeInMacro {
                        pos: self.snapshot()?,
                    });
                }
                self.frames.push(Frame::file(value));
            }
            "endfile" => {
                let top = self.frames.pop();
                match top {
                    Some(f) if f.kind == FrameKind::File && f.name == value => {}
                    other => {
                        return Err(LexError::MismatchedAnchor {
                            what: "endfile",
                            expected: value.to_string(),
                            found: other.map(|f| f.name).unwrap_or_default(),
                        });
                    }
                }
            }
            "macro" => self.frames.push(Frame::macro_frame(value)),
            "endmacro" => {
                let top = self.frames.pop();
                match top {
                    Some(f) if f.kind == FrameKind::Macro && f.name == value => {}
                    other => {
                        return Err(LexError::MismatchedAnchor {
                            what: "endmacro",
                            expected: value.to_string(),
                            found: other.map(|f| f.name).unwrap_or_default(),
                        });
                    }
                }
            }
            "pos" => {
                let (line, byte) =
                    value
                        .split_once(',')
                        .ok_or_else(|| LexError::MalformedAnchor {
                            text: caps.get(0).expect("match").as_str().to_string(),
                        })?;
                let (line, byte) = (
                    line.parse().map_err(|_| LexError::MalformedAnchor {
                        text: caps.get(0).expect("match").as_str().to_string(),
                    })?,
                    byte.parse().map_err(|_| LexError::MalformedAnchor {
                        text: caps.get(0).expect("match").as_str().to_string(),
                    })?,
                );
                let top = self.frames.last_mut().ok_or(LexError::NoFileContext)?;
                top.line = line;
                top.byte = byte;
            }
            _ => {
                return Err(LexError::UnknownAnchor {
                    name: name.to_string(),
                });
            }
        }
        // Anchors exist only in the annotated stream: no frame advances.
        self.at += caps.get(0).expect("match").len();
        Ok(())
    }

    fn push_token(&mut self, kind: TokenKind, text: String, raw_len: usize) -> Result<usize, LexError> {
        let start = self.snapshot()?;
        let end = start.offset(raw_len);
        self.tokens.push(Token {
            kind,
            text,
            number: None,
            range: SourceRange::new(start, end),
            block_comment: None,
            line_comment: None,
        });
        self.last_kind = Some(kind);
        Ok(self.tokens.len() - 1)
    }

    fn ident(&mut self, rest: &str) -> Result<(), LexError> {
        let m = IDENT.find(rest).expect("first byte matched");
        let text = m.as_str().to_string();
        let kind = TokenKind::keyword(&text).unwrap_or(TokenKind::Id);
        let was_module_kw = self.last_kind == Some(TokenKind::Module);
        let idx = self.push_token(kind, text.clone(), m.len())?;
        if kind == TokenKind::Id {
            self.tokens[idx].block_comment = self.pending_block.take();
            if self.prev_decl.is_none() {
                self.prev_decl = Some(idx);
            }
            if was_module_kw {
                self.cur_module = Some(text);
            }
        } else if kind == TokenKind::Endmodule {
            self.cur_module = None;
        }
        self.consume(m.as_str());
        Ok(())
    }

    fn escaped_ident(&mut self, rest: &str) -> Result<(), LexError> {
        let m = ESCAPED_IDENT.find(rest).expect("first byte matched");
        // The backslash escapes the name; it is not part of it. Escaped
        // identifiers never map to keywords.
        let name = m.as_str()[1..].to_string();
        let idx = self.push_token(TokenKind::Id, name, m.len())?;
        self.tokens[idx].block_comment = self.pending_block.take();
        if self.prev_decl.is_none() {
            self.prev_decl = Some(idx);
        }
        self.consume(m.as_str());
        Ok(())
    }

    fn sys_ident(&mut self, rest: &str) -> Result<(), LexError> {
        let m = SYS_IDENT.find(rest).expect("first byte matched");
        let idx = self.push_token(TokenKind::SysId, m.as_str().to_string(), m.len())?;
        self.tokens[idx].block_comment = self.pending_block.take();
        self.consume(m.as_str());
        Ok(())
    }

    fn number(&mut self, rest: &str) -> Result<(), LexError> {
        let Some(m) = NUMBER.find(rest) else {
            let ch = rest.chars().next().expect("non-empty");
            return Err(LexError::IllegalChar {
                ch,
                pos: self.snapshot()?,
            });
        };
        let value = VerilogNumber::parse(m.as_str()).map_err(|source| LexError::BadNumber {
            pos: self.snapshot().unwrap_or_else(|_| {
                Pos::in_file(Frame::file("<unknown>"))
            }),
            source,
        })?;
        let idx = self.push_token(TokenKind::Number, m.as_str().to_string(), m.len())?;
        self.tokens[idx].number = Some(value);
        self.consume(m.as_str());
        Ok(())
    }

    fn string(&mut self, rest: &str) -> Result<(), LexError> {
        let Some(m) = STRING.find(rest) else {
            return Err(LexError::UnterminatedString {
                pos: self.snapshot()?,
            });
        };
        self.push_token(TokenKind::Str, m.as_str().to_string(), m.len())?;
        self.consume(m.as_str());
        Ok(())
    }

    fn comment(&mut self, rest: &str) -> Result<(), LexError> {
        if let Some(m) = LINE_COMMENT.find(rest) {
            self.associate(m.as_str());
            self.consume(m.as_str());
            return Ok(());
        }
        if let Some(caps) = METAV.captures(rest) {
            self.metav_script(&caps)?;
            let text = caps.get(0).expect("match").as_str().to_string();
            self.consume(&text);
            return Ok(());
        }
        if let Some(m) = LEGACY_GENERATED.find(rest) {
            // A previous run's insertion in the pre-sentinel marker style;
            // nothing downstream wants it.
            let text = m.as_str().to_string();
            self.consume(&text);
            return Ok(());
        }
        if let Some(m) = BLOCK_COMMENT.find(rest) {
            let text = m.as_str().to_string();
            self.associate(&text);
            self.consume(&text);
            return Ok(());
        }
        Err(LexError::UnterminatedComment {
            pos: self.snapshot()?,
        })
    }

    /// Attach a comment: trailing on the line's first identifier when it sits
    /// on the same line, pending leading comment otherwise.
    fn associate(&mut self, text: &str) {
        if let Some(idx) = self.prev_decl.take() {
            if self.tokens[idx].range.start.innermost().line == self.current_line() {
                self.tokens[idx].line_comment = Some(text.to_string());
            } else {
                self.pending_block = Some(text.to_string());
            }
        } else {
            self.pending_block = Some(text.to_string());
        }
    }

    fn metav_script(&mut self, caps: &regex::Captures<'_>) -> Result<(), LexError> {
        let pos = self.snapshot()?;
        let white = caps.name("white").expect("group").as_str();
        let code = format!("{white}{}", caps.name("code").expect("group").as_str());
        let mut lines = Vec::new();
        for line in code.split('\n') {
            if line.trim().is_empty() {
                lines.push("");
            } else if let Some(stripped) = line.strip_prefix(white) {
                lines.push(stripped);
            } else {
                return Err(LexError::ScriptIndent { pos });
            }
        }
        let source = lines.join("\n");
        trace!(target: "lex", module = self.cur_module.as_deref().unwrap_or("<none>"), bytes = source.len(), "metav script");
        self.scripts.push(MetavBlock {
            module: self.cur_module.clone(),
            source,
            pos,
        });
        Ok(())
    }

    fn symbol(&mut self, rest: &str) -> Result<(), LexError> {
        let sym = [
            ("===", Symbol::CaseEq),
            ("!==", Symbol::CaseNotEq),
            ("==", Symbol::EqEq),
            ("!=", Symbol::NotEq),
            ("<=", Symbol::LtEq),
            (">=", Symbol::GtEq),
            ("<<", Symbol::Shl),
            (">>", Symbol::Shr),
            ("&&", Symbol::AmpAmp),
            ("||", Symbol::PipePipe),
            ("+:", Symbol::PlusColon),
            ("(", Symbol::LParen),
            (")", Symbol::RParen),
            ("[", Symbol::LBracket),
            ("]", Symbol::RBracket),
            ("{", Symbol::LBrace),
            ("}", Symbol::RBrace),
            (";", Symbol::Semi),
            (":", Symbol::Colon),
            (",", Symbol::Comma),
            (".", Symbol::Dot),
            ("#", Symbol::Hash),
            ("@", Symbol::At),
            ("?", Symbol::Question),
            ("=", Symbol::Eq),
            ("+", Symbol::Plus),
            ("-", Symbol::Minus),
            ("*", Symbol::Star),
            ("/", Symbol::Slash),
            ("%", Symbol::Percent),
            ("<", Symbol::Lt),
            (">", Symbol::Gt),
            ("&", Symbol::Amp),
            ("|", Symbol::Pipe),
            ("~", Symbol::Tilde),
            ("!", Symbol::Bang),
            ("^", Symbol::Caret),
        ]
        .iter()
        .find(|(text, _)| rest.starts_with(text));
        let Some((text, sym)) = sym else {
            let ch = rest.chars().next().expect("non-empty");
            return Err(LexError::IllegalChar {
                ch,
                pos: self.snapshot()?,
            });
        };
        self.push_token(TokenKind::Sym(*sym), (*text).to_string(), text.len())?;
        self.consume(text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(body: &str) -> String {
        format!("`file(t.v){body}`endfile(t.v)")
    }

    fn kinds(out: &LexOutput) -> Vec<TokenKind> {
        out.tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn tokens_carry_original_byte_ranges() {
        let src = "module m;\nendmodule\n";
        let out = lex(&wrap(src)).unwrap();
        for tok in &out.tokens {
            let (file, start, end) = tok.range.editable_span().unwrap();
            assert_eq!(file, "t.v");
            assert_eq!(&src[start..end], tok.text, "range must spell the lexeme");
        }
        assert_eq!(
            kinds(&out),
            vec![
                TokenKind::Module,
                TokenKind::Id,
                TokenKind::Sym(Symbol::Semi),
                TokenKind::Endmodule
            ]
        );
    }

    #[test]
    fn escaped_identifier_range_covers_the_backslash() {
        let src = "wire \\foo+bar ;\n";
        let out = lex(&wrap(src)).unwrap();
        let id = &out.tokens[1];
        assert_eq!(id.kind, TokenKind::Id);
        assert_eq!(id.text, "foo+bar");
        let (_, start, end) = id.range.editable_span().unwrap();
        assert_eq!(&src[start..end], "\\foo+bar");
    }

    #[test]
    fn keywords_map_and_symbols_lex_greedily() {
        let out = lex(&wrap("assign q <= a <= b === c;")).unwrap();
        assert_eq!(
            kinds(&out),
            vec![
                TokenKind::Assign,
                TokenKind::Id,
                TokenKind::Sym(Symbol::LtEq),
                TokenKind::Id,
                TokenKind::Sym(Symbol::LtEq),
                TokenKind::Id,
                TokenKind::Sym(Symbol::CaseEq),
                TokenKind::Id,
                TokenKind::Sym(Symbol::Semi),
            ]
        );
    }

    #[test]
    fn number_tokens_carry_parsed_literals() {
        let out = lex(&wrap("8'hFF 42")).unwrap();
        let n = out.tokens[0].number.as_ref().unwrap();
        assert_eq!((n.size, n.value.to_string().as_str()), (8, "255"));
        let n = out.tokens[1].number.as_ref().unwrap();
        assert_eq!((n.size, n.value.to_string().as_str()), (32, "42"));
    }

    #[test]
    fn line_comment_trails_first_identifier_on_the_line() {
        let out = lex(&wrap("wire x; // the x wire\nwire y;\n")).unwrap();
        let x = out.tokens.iter().find(|t| t.text == "x").unwrap();
        assert_eq!(x.line_comment.as_deref(), Some("// the x wire"));
        let y = out.tokens.iter().find(|t| t.text == "y").unwrap();
        assert_eq!(y.line_comment, None);
    }

    #[test]
    fn block_comment_leads_next_identifier() {
        let out = lex(&wrap("/* counter */\nreg c;\n")).unwrap();
        let c = out.tokens.iter().find(|t| t.text == "c").unwrap();
        assert_eq!(c.block_comment.as_deref(), Some("/* counter */"));
    }

    #[test]
    fn pos_anchor_rewrites_file_coordinates() {
        let out = lex("`file(t.v)wire a;`pos(7,100)wire b;`endfile(t.v)").unwrap();
        let b = out.tokens.iter().find(|t| t.text == "b").unwrap();
        let frame = b.range.start.file_frame();
        assert_eq!(frame.line, 7);
        assert_eq!(frame.byte, 105); // 100 + "wire "
    }

    #[test]
    fn macro_anchors_build_two_frame_stacks() {
        let out =
            lex("`file(t.v)`macro(W)wire x;`endmacro(W)`pos(1,2)\nendfile_pad`endfile(t.v)")
                .unwrap();
        let wire = &out.tokens[0];
        let frames = wire.range.start.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].kind, FrameKind::File);
        assert_eq!(frames[1].kind, FrameKind::Macro);
        assert_eq!(frames[1].name, "W");
        assert!(wire.range.editable_span().is_none());
    }

    #[test]
    fn include_file_frames_replace_the_outer_file() {
        let out = lex("`file(top.v)`file(inc.v)module m;`endfile(inc.v)wire w;`endfile(top.v)")
            .unwrap();
        let module = &out.tokens[0];
        assert_eq!(module.range.start.file_name(), "inc.v");
        assert_eq!(module.range.start.frames().len(), 1);
        let w = out.tokens.iter().find(|t| t.text == "w").unwrap();
        assert_eq!(w.range.start.file_name(), "top.v");
    }

    #[test]
    fn metav_block_is_captured_with_module_and_indent_stripped() {
        let src = "module m;\n  /*metav\n    add_wire()\n    done()\n  */\nendmodule\n";
        let out = lex(&wrap(src)).unwrap();
        assert_eq!(out.scripts.len(), 1);
        let script = &out.scripts[0];
        assert_eq!(script.module.as_deref(), Some("m"));
        assert_eq!(script.source, "add_wire()\ndone()");
    }

    #[test]
    fn metav_block_with_bad_indent_is_an_error() {
        let src = "module m;\n  /*metav\n    a()\n b()\n  */\nendmodule\n";
        let err = lex(&wrap(src)).unwrap_err();
        assert!(matches!(err, LexError::ScriptIndent { .. }));
    }

    #[test]
    fn file_anchor_inside_macro_is_rejected() {
        let err = lex("`file(t.v)`macro(W)`file(inc.v)`endfile(inc.v)`endmacro(W)`endfile(t.v)")
            .unwrap_err();
        assert!(matches!(err, LexError::IncludeInMacro { .. }));
    }

    #[test]
    fn mismatched_endfile_is_rejected() {
        let err = lex("`file(a.v)`endfile(b.v)").unwrap_err();
        assert!(matches!(err, LexError::MismatchedAnchor { .. }));
    }
}
