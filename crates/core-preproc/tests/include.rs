use core_preproc::{preprocess_root, PreprocError, PreprocState};
use pretty_assertions::assert_eq;
use std::fs;

#[test]
fn nested_includes_are_wrapped_in_file_anchors() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("top.v"), "`include \"mid.vh\"\nwire t;\n").unwrap();
    fs::write(dir.path().join("mid.vh"), "`include \"leaf.vh\"\nwire m;\n").unwrap();
    fs::write(dir.path().join("leaf.vh"), "wire l;\n").unwrap();

    let mut state = PreprocState::new(vec![dir.path().to_path_buf()]);
    let (out, edits) = preprocess_root(&dir.path().join("top.v"), &mut state).unwrap();
    assert!(edits.is_empty());

    let top = dir.path().join("top.v").display().to_string();
    let mid = dir.path().join("mid.vh").display().to_string();
    let leaf = dir.path().join("leaf.vh").display().to_string();
    let expected_order = [
        format!("`file({top})"),
        format!("`file({mid})"),
        format!("`file({leaf})"),
        "wire l;".to_string(),
        format!("`endfile({leaf})"),
        "wire m;".to_string(),
        format!("`endfile({mid})"),
        "wire t;".to_string(),
        format!("`endfile({top})"),
    ];
    let mut cursor = 0;
    for piece in &expected_order {
        let found = out[cursor..]
            .find(piece.as_str())
            .unwrap_or_else(|| panic!("missing {piece} after byte {cursor} in {out}"));
        cursor += found + piece.len();
    }
}

#[test]
fn missing_include_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("top.v"), "`include \"nope.vh\"\n").unwrap();
    let mut state = PreprocState::new(vec![dir.path().to_path_buf()]);
    let err = preprocess_root(&dir.path().join("top.v"), &mut state).unwrap_err();
    assert!(matches!(err, PreprocError::IncludeNotFound { .. }));
}

#[test]
fn unterminated_ifdef_at_end_of_root_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("top.v"), "`ifdef X\nwire w;\n").unwrap();
    let mut state = PreprocState::new(vec![]);
    let err = preprocess_root(&dir.path().join("top.v"), &mut state).unwrap_err();
    assert!(matches!(err, PreprocError::UnterminatedIfdef { .. }));
}

#[test]
fn defines_cross_include_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("top.v"),
        "`include \"defs.vh\"\n`W\n",
    )
    .unwrap();
    fs::write(dir.path().join("defs.vh"), "`define W wire x;\n").unwrap();

    let mut state = PreprocState::new(vec![dir.path().to_path_buf()]);
    let (out, _) = preprocess_root(&dir.path().join("top.v"), &mut state).unwrap();
    assert!(out.contains("`macro(W)wire x;`endmacro(W)"), "{out}");
    assert_eq!(state.is_defined("W"), true);
}
