//! Shared helpers for workspace-broker integration tests.
//!
//! These build small real directory trees in temp dirs and drive them either
//! through the library API or through the command-line binary.

use assert_cmd::cargo::cargo_bin_cmd;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use workspace_broker::{WorkspaceConfig, WorkspaceManager};

/// Helper to create a small workspace with files and nested directories
#[allow(unused)]
pub fn create_test_workspace() -> TempDir {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    fs::write(root.join("a.txt"), "hello").unwrap();
    fs::write(root.join("b.txt"), "bee").unwrap();

    fs::create_dir_all(root.join("src/lib")).unwrap();
    fs::write(root.join("src/main.py"), "print('main')\n").unwrap();
    fs::write(root.join("src/lib/util.py"), "def util():\n    pass\n").unwrap();
    fs::write(root.join("src/lib/data.bin"), [0u8, 159, 146, 150, 255]).unwrap();

    fs::create_dir(root.join("docs")).unwrap();
    fs::write(root.join("docs/readme.md"), "# Docs\n").unwrap();

    temp
}

/// Manager over `root` that never prompts
#[allow(unused)]
pub fn manager(root: &Path) -> WorkspaceManager {
    let config = WorkspaceConfig::new(root.to_string_lossy()).require_confirmation(false);
    WorkspaceManager::new(config).unwrap()
}

/// Every entry under `root` with its bytes (directories map to empty)
#[allow(unused)]
pub fn snapshot(root: &Path) -> BTreeMap<PathBuf, Option<Vec<u8>>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Option<Vec<u8>>>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            let relative = path.strip_prefix(root).unwrap().to_path_buf();
            if path.is_dir() {
                out.insert(relative, None);
                walk(root, &path, out);
            } else {
                out.insert(relative, Some(fs::read(&path).unwrap()));
            }
        }
    }

    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

/// Helper to run the binary against `root`, isolated from the user's config
pub fn run_broker(root: &Path, args: &[&str]) -> assert_cmd::assert::Assert {
    let mut cmd = cargo_bin_cmd!("workspace-broker");
    cmd.arg("--root")
        .arg(root)
        .args(args)
        .env("HOME", root.join(".no-home"))
        .env_remove("RUST_LOG")
        .current_dir(root);

    cmd.assert()
}
