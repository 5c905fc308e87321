use std::io;
use std::path::Path;
use std::process::{Command, Output};

const SPV_DIR: &str = "../../../spv";

fn main() -> io::Result<()> {
    // Tell the build script to only run again if we change our source shaders
    println!("cargo:rerun-if-changed=shaders");

    std::fs::create_dir_all(SPV_DIR)?;

    for entry in std::fs::read_dir("shaders")? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let in_path = entry.path();
        let out_path = Path::new(SPV_DIR).join(format!("{}.spv", entry.file_name().to_string_lossy()));
        let stat = Command::new("glslc")
            .arg(&in_path)
            .args(["--target-env=vulkan1.3", "-o"])
            .arg(&out_path)
            .output();

        if !handle_program_result(&in_path, stat) {
            // without a compiler there is nothing else to try
            break;
        }
    }

    Ok(())
}

/// Returns false when glslc could not be started at all.
fn handle_program_result(shader: &Path, result: io::Result<Output>) -> bool {
    match result {
        Ok(output) if output.status.success() => true,
        Ok(output) => {
            eprint!(
                "stderr: {}",
                String::from_utf8(output.stderr)
                    .unwrap_or_else(|_| "Failed to print program stderr".to_string())
            );
            panic!(
                "Shader compilation of {} failed. Status: {}",
                shader.display(),
                output.status
            );
        }
        Err(error) => {
            println!(
                "cargo:warning=glslc unavailable ({error}), using precompiled SPIR-V from {SPV_DIR}"
            );
            false
        }
    }
}
