use anyhow::{anyhow, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

const SPV_SEARCH_PATHS: [&str; 3] = ["", "./spv", "../../../spv"];

const MODEL_SEARCH_PATHS: [&str; 4] = [
    "",
    "./assets",
    "../../../assets",
    "../../assets",
];

/// Returns the first `prefix/name` that is a file. Prefixes are tried as given
/// (relative to the working directory) and then relative to the executable.
pub fn find_file<P: AsRef<Path>>(name: P, search_paths: &[&str]) -> Option<PathBuf> {
    let name = name.as_ref();
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));

    let roots = std::iter::once(None).chain(exe_dir.map(Some));
    for root in roots {
        for pre in search_paths {
            let search = match &root {
                Some(root) => root.join(pre).join(name),
                None => Path::new(pre).join(name),
            };
            if search.is_file() {
                log::debug!("Resolved {} to {}", name.display(), search.display());
                return Some(search);
            }
        }
    }

    None
}

fn not_found(kind: &str, path: &Path) -> anyhow::Error {
    let cwd = Path::new(".")
        .canonicalize()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    anyhow!(
        "Couldn't find {kind} file {}, current path: {cwd}",
        path.display()
    )
}

pub fn load_spv<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let found = find_file(path, &SPV_SEARCH_PATHS).ok_or_else(|| not_found("spv", path))?;

    Ok(fs::read(found)?)
}

pub fn load_model<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    let path = path.as_ref();
    find_file(path, &MODEL_SEARCH_PATHS).ok_or_else(|| not_found("model", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_spv() {
        let bytes = load_spv("./src/lib.rs").unwrap();
        assert!(!bytes.is_empty());
    }

    #[test]
    fn missing_file_is_an_error_naming_it() {
        let err = load_model("scenes/does-not-exist.obj").unwrap_err();
        assert!(err.to_string().contains("does-not-exist.obj"));
    }

    #[test]
    fn search_paths_are_tried_in_order() {
        let found = find_file("Cargo.toml", &["./no-such-dir", "", "./src"]).unwrap();
        assert_eq!(found, Path::new("").join("Cargo.toml"));
    }

    #[test]
    fn directories_do_not_match() {
        assert!(find_file("src", &[""]).is_none());
    }
}
