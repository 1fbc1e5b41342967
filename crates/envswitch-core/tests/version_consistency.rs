//! Every workspace member inherits the workspace version, and the version
//! the binaries report is the one in the root manifest.

use std::path::{Path, PathBuf};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .unwrap()
        .to_path_buf()
}

fn manifest(path: &Path) -> toml::Value {
    let raw = std::fs::read_to_string(path.join("Cargo.toml")).unwrap();
    raw.parse().unwrap()
}

#[test]
fn members_inherit_workspace_version() {
    let root = workspace_root();
    let workspace = manifest(&root);
    let members = workspace["workspace"]["members"].as_array().unwrap();
    assert!(!members.is_empty());

    for member in members {
        let member = member.as_str().unwrap();
        let doc = manifest(&root.join(member));
        let inherits = doc
            .get("package")
            .and_then(|p| p.get("version"))
            .and_then(|v| v.get("workspace"))
            .and_then(toml::Value::as_bool);
        assert_eq!(inherits, Some(true), "{member} must use version.workspace = true");
    }
}

#[test]
fn reported_version_matches_workspace() {
    let workspace = manifest(&workspace_root());
    let version = workspace["workspace"]["package"]["version"].as_str().unwrap();

    assert_eq!(envswitch_core::VERSION, version);
}
