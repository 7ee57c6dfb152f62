use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");

    if let Ok(output) = Command::new("git")
        .args(["describe", "--tags", "--always"])
        .output()
    {
        if output.status.success() {
            if let Ok(version) = String::from_utf8(output.stdout) {
                println!("cargo:rustc-env=PIXBADGE_VERSION_ID=pixbadge {}", version.trim());
            }
        }
    }
}
