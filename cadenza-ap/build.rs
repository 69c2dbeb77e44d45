//! Build script for cadenza-ap
//!
//! Stamps the binary with the commit it was built from, the build time and
//! the cargo profile; `main` prints them in its startup line.

use std::process::Command;

/// Run git, returning trimmed stdout on success
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    Some(text.trim().to_string()).filter(|s| !s.is_empty())
}

fn main() {
    // `-dirty` marks builds with uncommitted changes
    let version = git(&["describe", "--always", "--dirty", "--abbrev=8"])
        .unwrap_or_else(|| "unknown".to_string());

    // Only rerun when the checked-out commit moves, so the timestamp names
    // the build that picked up that commit
    for path in ["HEAD", "index"] {
        if let Some(git_path) = git(&["rev-parse", "--git-path", path]) {
            println!("cargo:rerun-if-changed={}", git_path);
        }
    }
    if let Some(head_ref) = git(&["symbolic-ref", "-q", "HEAD"]) {
        if let Some(ref_path) = git(&["rev-parse", "--git-path", &head_ref]) {
            println!("cargo:rerun-if-changed={}", ref_path);
        }
    }
    println!("cargo:rerun-if-changed=build.rs");

    let built_at = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=CADENZA_GIT_HASH={}", version);
    println!("cargo:rustc-env=CADENZA_BUILD_TIMESTAMP={}", built_at);
    println!("cargo:rustc-env=CADENZA_BUILD_PROFILE={}", profile);
}
