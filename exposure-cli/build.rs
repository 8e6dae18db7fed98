// Build script: inject the exposure version from git tags.
// Falls back to CARGO_PKG_VERSION when git is unavailable.

use std::process::Command;

fn main() {
    let version = git_version().unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

    println!("cargo:rustc-env=EXPOSURE_VERSION={}", version);
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads");
    println!("cargo:rerun-if-changed=.git/refs/tags");
}

fn git_version() -> Option<String> {
    // "v0.3.0", "v0.3.0-5-gabc123", or "abc123-dirty"
    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let described = String::from_utf8(output.stdout).ok()?;
    let described = described.trim();

    if let Some(tag) = described.strip_prefix('v') {
        // Keep only the tag's version, drop commit count and hash
        return Some(tag.split('-').next().unwrap_or(tag).to_string());
    }

    let base = env!("CARGO_PKG_VERSION");
    Some(match described.strip_suffix("-dirty") {
        Some(hash) => format!("{}-{}-dirty", base, hash),
        None => format!("{}-{}", base, described),
    })
}
