// src/engine/enumerate.rs

//! Filesystem enumeration: walking, filtering, and priority assignment.
//!
//! Collection is bounded (file-count cap, cancellation polled every 100
//! files) and synchronous; the engine runs it on the blocking pool.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use log::Level;
use walkdir::WalkDir;

use crate::vigil_log;

use super::task::Priority;

pub const EXECUTABLE_EXTENSIONS: &[&str] = &[
    "exe", "bat", "cmd", "com", "scr", "pif", "app", "deb", "rpm", "dmg", "pkg", "msi", "sh",
    "bash", "zsh", "fish", "py", "pl", "rb", "js", "jar", "bin", "run", "so", "dll",
];

pub const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "rtf", "odt", "ods", "odp", "csv",
    "xml", "html", "htm", "md", "tex", "epub", "mobi",
];

pub const ARCHIVE_EXTENSIONS: &[&str] = &[
    "zip", "rar", "7z", "tar", "gz", "bz2", "xz", "tgz", "tbz2", "cab", "iso", "dmg", "img",
];

pub const MEDIA_EXTENSIONS: &[&str] =
    &["jpg", "jpeg", "png", "gif", "bmp", "svg", "mp3", "mp4", "mkv", "avi", "mov", "flac", "ogg"];

const SYSTEM_DIRS: &[&str] = &["/usr/bin", "/usr/sbin", "/bin", "/sbin", "/usr/lib", "/lib"];

/// Which file kinds a scan considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileKindFilter {
    #[default]
    All,
    Executables,
    Documents,
    Archives,
}

impl FileKindFilter {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "executables" => FileKindFilter::Executables,
            "documents" => FileKindFilter::Documents,
            "archives" => FileKindFilter::Archives,
            _ => FileKindFilter::All,
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        match self {
            FileKindFilter::All => true,
            FileKindFilter::Executables => has_extension_in(path, EXECUTABLE_EXTENSIONS),
            FileKindFilter::Documents => has_extension_in(path, DOCUMENT_EXTENSIONS),
            FileKindFilter::Archives => has_extension_in(path, ARCHIVE_EXTENSIONS),
        }
    }
}

fn has_extension_in(path: &Path, exts: &[&str]) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .map_or(false, |ext| exts.iter().any(|allowed| *allowed == ext))
}

/// True when any path component is a dot-entry.
pub fn is_hidden(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str().to_string_lossy().starts_with('.') && c.as_os_str() != "." && c.as_os_str() != ".."
    })
}

/// Default dispatch priority for a discovered file.
///
/// Executable-like files and system directories scan first; user-facing
/// document locations next; media after that; temp and cache paths last.
pub fn assign_priority(path: &Path) -> Priority {
    let path_str = path.to_string_lossy().to_lowercase();

    if SYSTEM_DIRS.iter().any(|d| path_str.starts_with(d)) {
        return Priority::Critical;
    }
    if has_extension_in(path, EXECUTABLE_EXTENSIONS) {
        return Priority::Critical;
    }
    if path_str.contains("/tmp/") || path_str.contains("/temp/") || path_str.contains("/.cache/") {
        return Priority::Low;
    }
    if path_str.contains("/downloads/") || path_str.contains("/desktop/") || path_str.contains("/documents/")
    {
        return Priority::High;
    }
    if has_extension_in(path, DOCUMENT_EXTENSIONS) {
        return Priority::High;
    }
    if has_extension_in(path, MEDIA_EXTENSIONS) {
        return Priority::Medium;
    }
    Priority::Medium
}

/// Compile glob-style exclusion patterns. Invalid patterns are skipped with a
/// warning rather than failing the scan.
pub fn build_exclusions(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => log::warn!("Ignoring invalid exclusion pattern {:?}: {}", pattern, e),
        }
    }
    builder.build().unwrap_or_else(|e| {
        log::warn!("Exclusion set failed to compile: {}", e);
        GlobSet::empty()
    })
}

/// A pattern excludes a file when it matches the full path or the bare name.
pub fn is_excluded(path: &Path, exclusions: &GlobSet) -> bool {
    if exclusions.is_empty() {
        return false;
    }
    if exclusions.is_match(path) {
        return true;
    }
    path.file_name().map(|name| exclusions.is_match(Path::new(name))).unwrap_or(false)
}

pub struct EnumerateOptions {
    /// Maximum walk depth; files at exactly this depth are included.
    pub depth: Option<usize>,
    pub include_hidden: bool,
    pub filter: FileKindFilter,
    pub exclusions: GlobSet,
    pub max_files: usize,
    pub cancel: Arc<AtomicBool>,
    /// Polled every 500 files; when it reports pressure the remaining
    /// collection is capped instead of growing unbounded.
    pub memory_pressured: Option<Box<dyn Fn() -> bool + Send + Sync>>,
}

/// Walk `root` and collect candidate files in discovery order. Cancellation
/// is polled every 100 files, memory pressure every 500.
pub fn enumerate(root: &Path, opts: &EnumerateOptions) -> Vec<PathBuf> {
    let mut walker = WalkDir::new(root).follow_links(false);
    if let Some(depth) = opts.depth {
        walker = walker.max_depth(depth);
    }

    let mut cap = opts.max_files;
    let mut files = Vec::new();
    for entry in walker.into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();

        if !opts.include_hidden && is_hidden(path.strip_prefix(root).unwrap_or(path)) {
            continue;
        }
        if !opts.filter.matches(path) {
            continue;
        }
        if is_excluded(path, &opts.exclusions) {
            continue;
        }

        if files.len() >= cap {
            log::warn!(
                "Reached file limit ({}) under {:?}; scanning the first {} files only",
                cap,
                root,
                files.len()
            );
            break;
        }
        files.push(path.to_path_buf());

        if files.len() % 100 == 0 && opts.cancel.load(Ordering::Relaxed) {
            vigil_log!(Level::Info, "engine", "Enumeration cancelled after {} files", files.len());
            break;
        }
        if files.len() % 500 == 0 {
            if let Some(pressured) = &opts.memory_pressured {
                if pressured() {
                    cap = cap.min(files.len() + 100);
                    files.shrink_to_fit();
                    log::warn!("Memory pressure during collection; capping at {} files", cap);
                }
            }
        }
    }

    vigil_log!(Level::Debug, "engine", "Enumerated {} file(s) under {:?}", files.len(), root);
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn options() -> EnumerateOptions {
        EnumerateOptions {
            depth: None,
            include_hidden: false,
            filter: FileKindFilter::All,
            exclusions: GlobSet::empty(),
            max_files: 10_000,
            cancel: Arc::new(AtomicBool::new(false)),
            memory_pressured: None,
        }
    }

    #[test]
    fn priorities_by_kind_and_location() {
        assert_eq!(assign_priority(Path::new("/usr/bin/env")), Priority::Critical);
        assert_eq!(assign_priority(Path::new("/home/u/setup.sh")), Priority::Critical);
        assert_eq!(assign_priority(Path::new("/home/u/Downloads/x.pdf")), Priority::High);
        assert_eq!(assign_priority(Path::new("/home/u/notes.txt")), Priority::High);
        assert_eq!(assign_priority(Path::new("/home/u/pic.jpg")), Priority::Medium);
        assert_eq!(assign_priority(Path::new("/tmp/scratch.dat")), Priority::Low);
        assert_eq!(assign_priority(Path::new("/home/u/data.blob")), Priority::Medium);
    }

    #[test]
    fn depth_boundary_is_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("top.txt"));
        touch(&root.join("a/mid.txt"));
        touch(&root.join("a/b/deep.txt"));

        let mut opts = options();
        opts.depth = Some(2);
        let files = enumerate(root, &opts);
        let names: Vec<_> =
            files.iter().map(|p| p.file_name().unwrap().to_string_lossy().to_string()).collect();
        assert!(names.contains(&"top.txt".to_string()));
        assert!(names.contains(&"mid.txt".to_string()));
        assert!(!names.contains(&"deep.txt".to_string()));
    }

    #[test]
    fn hidden_files_skipped_unless_requested() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("seen.txt"));
        touch(&root.join(".hidden/secret.txt"));
        touch(&root.join(".dotfile"));

        let files = enumerate(root, &options());
        assert_eq!(files.len(), 1);

        let mut opts = options();
        opts.include_hidden = true;
        assert_eq!(enumerate(root, &opts).len(), 3);
    }

    #[test]
    fn exclusions_match_name_and_path() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("keep.txt"));
        touch(&root.join("skip.log"));
        touch(&root.join("node_modules/dep.js"));

        let mut opts = options();
        opts.exclusions = build_exclusions(&["*.log".to_string(), "**/node_modules/**".to_string()]);
        let files = enumerate(root, &opts);
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("keep.txt"));
    }

    #[test]
    fn max_files_zero_collects_nothing() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.txt"));
        let mut opts = options();
        opts.max_files = 0;
        assert!(enumerate(dir.path(), &opts).is_empty());
    }

    #[test]
    fn kind_filter_selects_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("run.sh"));
        touch(&root.join("doc.pdf"));
        touch(&root.join("data.tar"));

        let mut opts = options();
        opts.filter = FileKindFilter::Executables;
        assert_eq!(enumerate(root, &opts).len(), 1);
        opts.filter = FileKindFilter::Documents;
        assert_eq!(enumerate(root, &opts).len(), 1);
        opts.filter = FileKindFilter::Archives;
        assert_eq!(enumerate(root, &opts).len(), 1);
    }
}
