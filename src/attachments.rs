use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const FALLBACK_NAME: &str = "unnamed_attachment";

/// Destination for attachment bytes saved with `/save`.
pub trait AttachmentWriter {
    /// Write `bytes` under `dir` using a name derived from `suggested`.
    /// Returns the path actually written.
    fn save(&self, bytes: &[u8], suggested: &str, dir: &Path) -> io::Result<PathBuf>;
}

/// Writes attachments to the local filesystem. Never overwrites: a taken
/// name gets `_1`, `_2`, ... inserted before the extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsAttachmentWriter;

impl AttachmentWriter for FsAttachmentWriter {
    fn save(&self, bytes: &[u8], suggested: &str, dir: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let name = sanitize_filename(suggested);
        let (stem, ext) = split_extension(&name);

        let mut n = 0u32;
        loop {
            let candidate = if n == 0 {
                dir.join(&name)
            } else {
                dir.join(format!("{}_{}{}", stem, n, ext))
            };
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
            {
                Ok(mut file) => {
                    file.write_all(bytes)?;
                    log::info!("saved {} bytes to {}", bytes.len(), candidate.display());
                    return Ok(candidate);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(e),
            }
        }
    }
}

/// Reduce a sender-supplied filename to its final path component.
pub fn sanitize_filename(suggested: &str) -> String {
    let last = suggested
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim();
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        FALLBACK_NAME.to_string()
    } else {
        cleaned
    }
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name, ""),
    }
}
