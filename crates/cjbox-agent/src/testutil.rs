//! Helpers shared by the agent's unit tests.

use std::path::Path;

/// Install an executable shell script at `path`.
pub fn script(path: &Path, body: &str) {
    // written by a child so no test thread holds a writable fd when it is exec'd
    let status = std::process::Command::new("sh")
        .args(["-c", r#"printf '#!/bin/sh\n%s\n' "$1" > "$2" && chmod 755 "$2""#])
        .args(["sh", body])
        .arg(path)
        .status()
        .unwrap();
    assert!(status.success());
}
