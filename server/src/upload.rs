//! File-upload handling for `POST /api/incoming-data`, grounded on
//! `api_handler/incoming_data.c++`. That original streams each DATA
//! frame straight into an open file handle and boosts the stream and
//! connection flow-control windows by 32 MiB as soon as the upload
//! starts; this port buffers the full body in the connection's stream
//! state and writes it once on `END_STREAM` instead, trading a bounded
//! per-upload memory cost for a much simpler connection state machine
//! (see `DESIGN.md`). The flow-control boost itself is still sent
//! (`http2::build_window_update`) since it's cheap and keeps behavior
//! visible to clients that rely on it.

use std::path::{Path, PathBuf};

use crate::accounts::ApiResponse;

fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() || c == '/' || c == '\\' { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim();
    let truncated: String = cleaned.chars().take(255).collect();
    if truncated.is_empty() {
        "upload.bin".to_string()
    } else {
        truncated
    }
}

fn make_unique_path(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return candidate;
    }
    let path = Path::new(filename);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(filename);
    let ext = path.extension().and_then(|s| s.to_str());

    for n in 1..=9999u32 {
        let name = match ext {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        let candidate = dir.join(name);
        if !candidate.exists() {
            return candidate;
        }
    }
    dir.join(filename)
}

pub fn handle_upload(upload_dir: &Path, requested_name: &str, body: &[u8]) -> anyhow::Result<ApiResponse> {
    std::fs::create_dir_all(upload_dir)?;
    let filename = sanitize_filename(requested_name);
    let path = make_unique_path(upload_dir, &filename);
    std::fs::write(&path, body)?;
    log::info!("upload: wrote {} bytes to {}", body.len(), path.display());

    let stored_name = path.file_name().and_then(|n| n.to_str()).unwrap_or(&filename);
    Ok(ApiResponse {
        status: 200,
        body: serde_json::json!({ "ok": true, "filename": stored_name, "bytes": body.len() }).to_string(),
        set_cookie: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_path_components_and_control_chars() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("a\u{0}b"), "a_b");
        assert_eq!(sanitize_filename(""), "upload.bin");
    }

    #[test]
    fn make_unique_path_appends_counter_on_collision() {
        let dir = std::env::temp_dir().join(format!("upload-test-{}-{}", std::process::id(), line!()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.txt"), b"x").unwrap();

        let chosen = make_unique_path(&dir, "a.txt");
        assert_eq!(chosen, dir.join("a_1.txt"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
