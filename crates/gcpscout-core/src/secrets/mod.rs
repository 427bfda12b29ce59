//! Secret-scanning inputs. Links here turn resources into `NpInput` blobs for a scanner;
//! `SecretScanLink` is the built-in one.

pub mod inputs;
pub mod scanner;

pub use inputs::{
    AppEngineSecrets, ContainerImageSecrets, FunctionSecrets, InstanceSecrets, ObjectSecrets,
    RunSecrets, SecretLink, SecretSource,
};
pub use scanner::{SecretMatch, SecretScanLink};

/// Extensions never worth scanning: executables, archives, media and office documents.
const BINARY_EXTENSIONS: &[&str] = &[
    ".exe", ".dll", ".so", ".dylib", ".bin", ".jar", ".war", ".ear", ".zip", ".tar", ".gz", ".bz2",
    ".rar", ".7z", ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".tiff", ".webp", ".mp3", ".wav",
    ".mp4", ".avi", ".mov", ".mkv", ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx",
];

/// Object-only additions: disk images.
const IMAGE_EXTENSIONS: &[&str] = &[".iso", ".dmg", ".img"];

/// Source-archive additions: compiled artifacts.
const COMPILED_EXTENSIONS: &[&str] = &[".pyc", ".pyo", ".class", ".o", ".obj"];

fn has_extension(name: &str, extensions: &[&str]) -> bool {
    let lower = name.to_lowercase();
    extensions.iter().any(|ext| lower.ends_with(ext))
}

pub fn skip_object(name: &str) -> bool {
    has_extension(name, BINARY_EXTENSIONS) || has_extension(name, IMAGE_EXTENSIONS)
}

pub fn skip_archive_entry(name: &str) -> bool {
    has_extension(name, BINARY_EXTENSIONS) || has_extension(name, COMPILED_EXTENSIONS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_lists() {
        assert!(skip_object("backups/disk.ISO"));
        assert!(skip_object("photo.jpeg"));
        assert!(!skip_object("config/app.env"));
        assert!(!skip_object("main.pyc"));

        assert!(skip_archive_entry("main.pyc"));
        assert!(skip_archive_entry("lib/Foo.class"));
        assert!(!skip_archive_entry("disk.img"));
        assert!(!skip_archive_entry("index.js"));
    }
}
