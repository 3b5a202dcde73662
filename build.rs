use std::path::{Path, PathBuf};

fn main() {
    println!("cargo:rerun-if-changed=third_party/ffmpeg/bin");

    let ffmpeg_enabled = std::env::var_os("CARGO_FEATURE_FFMPEG").is_some();
    let windows = std::env::var("CARGO_CFG_TARGET_OS").is_ok_and(|os| os == "windows");
    if !ffmpeg_enabled || !windows {
        return;
    }

    // Copy the FFmpeg DLLs next to the produced binary
    let ffmpeg_bin = PathBuf::from("third_party/ffmpeg/bin");
    let out_dir = PathBuf::from(std::env::var("OUT_DIR").unwrap());
    // OUT_DIR looks like target/<profile>/build/<crate>/out
    let target_dir = out_dir
        .ancestors()
        .nth(3)
        .expect("Cannot resolve target dir");

    if !ffmpeg_bin.exists() {
        println!(
            "cargo:warning=FFmpeg DLLs not found at {}",
            ffmpeg_bin.display()
        );
        return;
    }

    for entry in std::fs::read_dir(&ffmpeg_bin).expect("Cannot read ffmpeg bin dir") {
        let path = entry.unwrap().path();
        if !is_required_ffmpeg_dll(&path) {
            continue;
        }
        let dest = target_dir.join(path.file_name().unwrap());
        if !dest.exists() || file_modified(&path) > file_modified(&dest) {
            std::fs::copy(&path, &dest)
                .unwrap_or_else(|e| panic!("Failed to copy {:?} → {:?}: {}", path, dest, e));
            println!("cargo:warning=Copied {} to output dir", path.display());
        }
    }

    // Where rustc finds the FFmpeg import libraries
    println!("cargo:rustc-link-search=native={}", ffmpeg_bin.display());
}

fn file_modified(path: &Path) -> std::time::SystemTime {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
}

fn is_required_ffmpeg_dll(path: &Path) -> bool {
    const REQUIRED_DLL_PREFIXES: &[&str] = &[
        "avcodec-",
        "avformat-",
        "avutil-",
        "swresample-",
        "swscale-",
    ];

    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };

    let lower = file_name.to_ascii_lowercase();
    lower.ends_with(".dll") && REQUIRED_DLL_PREFIXES.iter().any(|prefix| lower.starts_with(prefix))
}
