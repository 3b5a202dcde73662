use std::path::{Path, PathBuf};

/// Suffix added to the input stem when no output name is given.
const OUTPUT_SUFFIX: &str = "upcast";

/// Output file for `input`.
///
/// - no `output`: next to the input, `<stem>.upcast.<extension>`
/// - `output` is a directory (or several inputs share it): `<output>/<stem>.<extension>`
/// - otherwise `output` is the file itself
pub fn output_path(input: &Path, output: Option<&Path>, many: bool, extension: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("output"));

    match output {
        None => input.with_file_name(format!("{}.{}.{}", stem, OUTPUT_SUFFIX, extension)),
        Some(dir) if many || dir.is_dir() => dir.join(format!("{}.{}", stem, extension)),
        Some(file) => file.to_path_buf(),
    }
}

/// File extension for a container name.
pub fn extension_for(format: &str) -> &str {
    match format {
        "matroska" | "mkv" => "mkv",
        "mov" => "mov",
        "avi" => "avi",
        "nut" => "nut",
        "" | "mp4" => "mp4",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path() {
        let input = Path::new("/videos/clip.avi");
        assert_eq!(
            output_path(input, None, false, "mp4"),
            PathBuf::from("/videos/clip.upcast.mp4")
        );
        assert_eq!(
            output_path(input, Some(Path::new("/out")), true, "mkv"),
            PathBuf::from("/out/clip.mkv")
        );
        assert_eq!(
            output_path(input, Some(Path::new("/out/x.mp4")), false, "mp4"),
            PathBuf::from("/out/x.mp4")
        );
    }

    #[test]
    fn test_extension_for() {
        assert_eq!(extension_for("matroska"), "mkv");
        assert_eq!(extension_for(""), "mp4");
        assert_eq!(extension_for("mov"), "mov");
    }
}
