//! Lexing real preprocessor output: include and macro position recovery.

use core_lex::{lex, TokenKind};
use core_preproc::{preprocess_root, PreprocState};
use core_source::FrameKind;
use std::fs;

#[test]
fn include_resolution_recovers_positions_on_both_sides() {
    let dir = tempfile::tempdir().unwrap();
    let top = dir.path().join("top.v");
    let inc = dir.path().join("inc.v");
    fs::write(&top, "// header\n\n`include \"inc.v\"\nwire after;\n").unwrap();
    fs::write(&inc, "module m; endmodule\n").unwrap();

    let mut state = PreprocState::new(vec![dir.path().to_path_buf()]);
    let (annotated, edits) = preprocess_root(&top, &mut state).unwrap();
    assert!(edits.is_empty());
    let out = lex(&annotated).unwrap();

    let module = out
        .tokens
        .iter()
        .find(|t| t.kind == TokenKind::Module)
        .unwrap();
    let frame = module.range.start.file_frame();
    assert!(frame.name.ends_with("inc.v"), "{}", frame.name);
    assert_eq!(frame.line, 1);

    let after = out.tokens.iter().find(|t| t.text == "after").unwrap();
    let frame = after.range.start.file_frame();
    assert!(frame.name.ends_with("top.v"), "{}", frame.name);
    assert_eq!(frame.line, 4);
}

#[test]
fn macro_expansion_tokens_carry_the_invocation_site() {
    let dir = tempfile::tempdir().unwrap();
    let top = dir.path().join("m.v");
    let src = "`define W wire x;\n`W\n";
    fs::write(&top, src).unwrap();

    let mut state = PreprocState::new(vec![]);
    let (annotated, _) = preprocess_root(&top, &mut state).unwrap();
    let out = lex(&annotated).unwrap();

    let wire = out
        .tokens
        .iter()
        .find(|t| t.kind == TokenKind::Wire)
        .unwrap();
    let frames = wire.range.start.frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].kind, FrameKind::File);
    // The invocation site: `W sits at the start of line 2.
    assert_eq!(frames[0].line, 2);
    assert_eq!(frames[0].byte, src.find("`W").unwrap());
    assert_eq!(frames[1].kind, FrameKind::Macro);
    assert_eq!(frames[1].name, "W");
    // No edit may ever target the expansion.
    assert!(wire.range.editable_span().is_none());
}

#[test]
fn sentinels_survive_preprocessing_as_delete_edits_only() {
    let dir = tempfile::tempdir().unwrap();
    let top = dir.path().join("s.v");
    fs::write(
        &top,
        "module m;\n/*metav_delete:wire x;:metav_delete*/\nendmodule\n",
    )
    .unwrap();

    let mut state = PreprocState::new(vec![]);
    let (annotated, edits) = preprocess_root(&top, &mut state).unwrap();
    assert_eq!(edits.len(), 2);
    // The wrapped declaration itself reaches the lexer as live code.
    let out = lex(&annotated).unwrap();
    assert!(out.tokens.iter().any(|t| t.kind == TokenKind::Wire));
}
