use core_edit::{execute, EditError, EditPlan};
use core_source::{Frame, Pos, SourceRange};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;

fn pos(file: &Path, byte: usize) -> Pos {
    Pos::in_file(Frame {
        byte,
        ..Frame::file(file.to_str().unwrap())
    })
}

fn span(file: &Path, start: usize, end: usize) -> SourceRange {
    SourceRange::new(pos(file, start), pos(file, end))
}

#[test]
fn delete_strips_sentinel_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.v");
    let input = "module m;\n/*metav_delete:wire x;:metav_delete*/\nendmodule\n";
    fs::write(&path, input).unwrap();

    let open_at = input.find("/*metav_delete:").unwrap();
    let close_at = input.find(":metav_delete*/").unwrap();
    let mut plan = EditPlan::new();
    plan.delete(span(&path, open_at, open_at + 15)).unwrap();
    plan.delete(span(&path, close_at, close_at + 15)).unwrap();

    let written = execute(&plan).unwrap();
    assert_eq!(written.len(), 1);
    let out = fs::read_to_string(&written[0]).unwrap();
    assert_eq!(out, "module m;\nwire x;\nendmodule\n");
}

#[test]
fn remove_wraps_the_original_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.v");
    let input = "module m;\nwire x;\nendmodule\n";
    fs::write(&path, input).unwrap();

    let start = input.find("wire").unwrap();
    let mut plan = EditPlan::new();
    plan.remove(span(&path, start, start + "wire x;".len()))
        .unwrap();

    let written = execute(&plan).unwrap();
    let out = fs::read_to_string(&written[0]).unwrap();
    assert_eq!(
        out,
        "module m;\n/*metav_delete:wire x;:metav_delete*/\nendmodule\n"
    );
}

#[test]
fn insert_frames_payload_with_generated_sentinels() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.v");
    let input = "module m;\nendmodule\n";
    fs::write(&path, input).unwrap();

    let at = input.find("endmodule").unwrap();
    let mut plan = EditPlan::new();
    plan.insert(pos(&path, at), "wire y;".into()).unwrap();

    let written = execute(&plan).unwrap();
    let out = fs::read_to_string(&written[0]).unwrap();
    assert_eq!(
        out,
        "module m;\n/*metav_generated:*/\nwire y;\n/*:metav_generated*/endmodule\n"
    );
}

#[test]
fn same_position_inserts_keep_registration_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.v");
    fs::write(&path, "module m;\nendmodule\n").unwrap();

    let mut plan = EditPlan::new();
    plan.insert(pos(&path, 10), "wire a;".into()).unwrap();
    plan.insert(pos(&path, 10), "wire b;".into()).unwrap();

    let written = execute(&plan).unwrap();
    let out = fs::read_to_string(&written[0]).unwrap();
    let a = out.find("wire a;").unwrap();
    let b = out.find("wire b;").unwrap();
    assert!(a < b, "first-registered insert must land first: {out}");
}

#[test]
fn overlapping_removals_are_rejected_before_any_write() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.v");
    fs::write(&path, "module m;\nwire x;\nendmodule\n").unwrap();

    let mut plan = EditPlan::new();
    plan.delete(span(&path, 10, 17)).unwrap();
    plan.delete(span(&path, 14, 18)).unwrap();

    match execute(&plan) {
        Err(EditError::OverlappingEdits { at, cursor, .. }) => {
            assert_eq!((at, cursor), (14, 17));
        }
        other => panic!("expected OverlappingEdits, got {other:?}"),
    }
    assert!(!dir.path().join("a.v.out").exists());
}

#[test]
fn untouched_files_are_not_written() {
    let plan = EditPlan::new();
    let written = execute(&plan).unwrap();
    assert!(written.is_empty());
}
