use std::process::Command;

/// Build metadata shown by `callkeeper version`.
fn main() {
    let git_hash = command_output("git", &["rev-parse", "--short", "HEAD"]);
    let build_date = command_output("date", &["-u", "+%Y-%m-%d"]);

    println!("cargo:rustc-env=CALLKEEPER_GIT_HASH={git_hash}");
    println!("cargo:rustc-env=CALLKEEPER_BUILD_DATE={build_date}");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");
}

/// Trimmed stdout of a command, or "unknown" when it is unavailable.
fn command_output(program: &str, args: &[&str]) -> String {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
