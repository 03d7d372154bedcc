use std::path::PathBuf;
use std::sync::OnceLock;

/// Returns the workspace root directory (parent of the crate manifest dir).
fn workspace_root() -> PathBuf {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .map(PathBuf::from)
        .unwrap_or(manifest_dir)
}

/// Ensures the test output directory exists. Safe to call multiple times.
pub fn ensure_test_output_dir() -> PathBuf {
    static DIR: OnceLock<PathBuf> = OnceLock::new();
    DIR.get_or_init(|| {
        let dir = workspace_root().join("test_output");
        std::fs::create_dir_all(&dir).expect("Failed to create test_output directory");
        dir
    })
    .clone()
}

/// Returns the path to a test output file.
pub fn test_output_path(name: &str) -> PathBuf {
    ensure_test_output_dir().join(name)
}

/// Returns a fresh, empty directory under `test_output` for one test.
pub fn test_output_dir(name: &str) -> PathBuf {
    let dir = test_output_path(name);
    if dir.exists() {
        std::fs::remove_dir_all(&dir).expect("Failed to clear test directory");
    }
    std::fs::create_dir_all(&dir).expect("Failed to create test directory");
    dir
}
