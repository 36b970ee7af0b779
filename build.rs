fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=.git/HEAD");

    let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    println!("cargo:rustc-env=BUILD_TIMESTAMP={timestamp}");

    let hash = std::process::Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .filter(|hash| !hash.is_empty());

    // `warden --version` shows the hash only when the build had one
    let info = match &hash {
        Some(hash) => {
            println!("cargo:rustc-env=GIT_HASH={hash}");
            format!("{hash}, built {timestamp}")
        }
        None => format!("built {timestamp}"),
    };
    println!("cargo:rustc-env=WARDEN_BUILD_INFO={info}");
}
