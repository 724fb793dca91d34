//! End-to-end runs over real files: process, script mutation, rewrite.

use core_driver::{Driver, DriverError, NoopScriptHost, ScriptApi, ScriptHost};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::{Path, PathBuf};

fn driver_for(dir: &Path) -> Driver {
    Driver::new(vec![dir.to_path_buf()], vec![dir.to_path_buf()])
}

/// Host that appends `wire y;` to every module that carries a script.
struct AddWireHost;

impl ScriptHost for AddWireHost {
    fn name(&self) -> &'static str {
        "add-wire"
    }

    fn run(&mut self, _source: &str, api: &mut ScriptApi<'_>) -> anyhow::Result<()> {
        let mut module = api.module.borrow_mut();
        let y = module.builder().id("y");
        let wire = module.builder().wire(None, vec![y]);
        module.add_item(wire)?;
        Ok(())
    }
}

#[test]
fn empty_module_run_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("m.v"), "module m; endmodule\n").unwrap();

    let mut driver = driver_for(dir.path());
    driver.process("m", &mut NoopScriptHost).unwrap();
    assert!(driver.edit_plan().borrow().is_empty());
    let written = driver.rewrite().unwrap();
    assert!(written.is_empty());
    assert!(!dir.path().join("m.v.out").exists());
}

#[test]
fn existing_delete_sentinel_is_restored() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("m.v"),
        "module m;\n/*metav_delete:wire x;:metav_delete*/\nendmodule\n",
    )
    .unwrap();

    let mut driver = driver_for(dir.path());
    driver.process("m", &mut NoopScriptHost).unwrap();
    let written = driver.rewrite().unwrap();
    assert_eq!(written.len(), 1);
    let out = fs::read_to_string(&written[0]).unwrap();
    assert_eq!(out, "module m;\nwire x;\nendmodule\n");
}

#[test]
fn script_add_item_inserts_before_endmodule() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("m.v"),
        "module m;\n/*metav\n   add_wire()\n*/\nendmodule\n",
    )
    .unwrap();

    let mut driver = driver_for(dir.path());
    driver.process("m", &mut AddWireHost).unwrap();
    let written = driver.rewrite().unwrap();
    let out = fs::read_to_string(&written[0]).unwrap();
    assert!(
        out.ends_with("/*metav_generated:*/\nwire y;\n/*:metav_generated*/endmodule\n"),
        "{out}"
    );
    // The script block itself stays untouched.
    assert!(out.contains("/*metav\n"), "{out}");
}

#[test]
fn rerunning_on_the_output_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("m.v"),
        "module m;\n/*metav\n   add_wire()\n*/\nendmodule\n",
    )
    .unwrap();

    let mut driver = driver_for(dir.path());
    driver.process("m", &mut AddWireHost).unwrap();
    let first = fs::read_to_string(driver.rewrite().unwrap().remove(0)).unwrap();

    // Feed the first output back in as a fresh module file.
    fs::write(dir.path().join("n.v"), first.replace("module m", "module n")).unwrap();
    let mut driver = driver_for(dir.path());
    driver.process("n", &mut AddWireHost).unwrap();
    let second = fs::read_to_string(driver.rewrite().unwrap().remove(0)).unwrap();
    assert_eq!(second, first.replace("module m", "module n"));
}

#[test]
fn instantiated_modules_are_parsed_recursively() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("top.v"),
        "module top;\nwire a, b;\nleaf u0 (.x(a), .y(b));\nendmodule\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("leaf.v"),
        "module leaf (input x, output y);\nassign y = x;\nendmodule\n",
    )
    .unwrap();

    let mut driver = driver_for(dir.path());
    let top = driver.process("top", &mut NoopScriptHost).unwrap();
    assert_eq!(top.borrow().name(), "top");
    assert!(driver.modules().contains_key("leaf"));
}

#[test]
fn scripts_can_resolve_other_modules() {
    struct Probe {
        saw_leaf: bool,
    }
    impl ScriptHost for Probe {
        fn name(&self) -> &'static str {
            "probe"
        }
        fn run(&mut self, _source: &str, api: &mut ScriptApi<'_>) -> anyhow::Result<()> {
            self.saw_leaf = api.get_module("leaf").is_some();
            assert!(api.get_module("phantom").is_none());
            Ok(())
        }
    }

    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("top.v"),
        "module top;\n/*metav\n   probe()\n*/\nleaf u0 ();\nendmodule\n",
    )
    .unwrap();
    fs::write(dir.path().join("leaf.v"), "module leaf;\nendmodule\n").unwrap();

    let mut host = Probe { saw_leaf: false };
    let mut driver = driver_for(dir.path());
    driver.process("top", &mut host).unwrap();
    assert!(host.saw_leaf, "instantiated modules resolve before scripts run");
}

#[test]
fn missing_module_is_a_fatal_lookup_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut driver = driver_for(dir.path());
    match driver.process("ghost", &mut NoopScriptHost) {
        Err(DriverError::ModuleNotFound { name, .. }) => assert_eq!(name, "ghost"),
        other => panic!("expected ModuleNotFound, got {other:?}"),
    }
}

#[test]
fn file_not_declaring_the_module_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("m.v"), "module other;\nendmodule\n").unwrap();
    let mut driver = driver_for(dir.path());
    assert!(matches!(
        driver.process("m", &mut NoopScriptHost),
        Err(DriverError::ModuleNotInFile { .. })
    ));
}

#[test]
fn script_errors_abort_before_any_rewrite() {
    struct FailingHost;
    impl ScriptHost for FailingHost {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn run(&mut self, _source: &str, _api: &mut ScriptApi<'_>) -> anyhow::Result<()> {
            anyhow::bail!("script blew up")
        }
    }

    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("m.v"),
        "module m;\n/*metav\n   boom()\n*/\nendmodule\n",
    )
    .unwrap();

    let mut driver = driver_for(dir.path());
    let err = driver.process("m", &mut FailingHost).unwrap_err();
    assert!(matches!(err, DriverError::Script { .. }));
    assert!(!dir.path().join("m.v.out").exists());
}

#[test]
fn find_module_appends_extension_only_without_dot() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.v"), "module a; endmodule\n").unwrap();
    fs::write(dir.path().join("b.sv"), "module b; endmodule\n").unwrap();
    let driver = Driver::new(vec![dir.path().to_path_buf()], vec![]);
    assert_eq!(
        driver.find_module("a").unwrap(),
        PathBuf::from(dir.path().join("a.v"))
    );
    assert_eq!(
        driver.find_module("b.sv").unwrap(),
        PathBuf::from(dir.path().join("b.sv"))
    );
}

#[test]
fn include_edits_and_script_edits_share_one_plan() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("m.v"),
        "`include \"defs.vh\"\nmodule m;\n/*metav\n   add_wire()\n*/\n/*metav_delete:reg old;:metav_delete*/\nendmodule\n",
    )
    .unwrap();
    fs::write(dir.path().join("defs.vh"), "`define WIDTH 8\n").unwrap();

    let mut driver = driver_for(dir.path());
    driver.process("m", &mut AddWireHost).unwrap();
    // Two sentinel deletions plus one insertion.
    assert_eq!(driver.edit_plan().borrow().len(), 3);
    let out = fs::read_to_string(driver.rewrite().unwrap().remove(0)).unwrap();
    assert!(out.contains("reg old;"), "{out}");
    assert!(!out.contains("metav_delete"), "{out}");
    assert!(out.contains("wire y;"), "{out}");
}
