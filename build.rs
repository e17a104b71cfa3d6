use std::process::Command;

/// `<パッケージ版>+<git describe>`。git が使えなければパッケージ版のみ
fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
    println!("cargo:rerun-if-changed=.git/refs/tags");

    let package = std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());

    let describe = Command::new("git")
        .args(["describe", "--always", "--dirty", "--tags"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .filter(|s| !s.is_empty());

    let version = match describe {
        Some(rev) => format!("{}+{}", package, rev),
        None => package,
    };

    // clap の --version と起動ログの両方で使う
    println!("cargo:rustc-env=MOTION_BUILD_VERSION={}", version);
}
