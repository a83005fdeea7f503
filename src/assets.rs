//! Static asset resolution inside a tenant root
//!
//! Resolution order: the exact requested file, then the root-relative
//! index fallback chain. The tenant root is the sandbox boundary: request
//! paths are normalized lexically before any I/O, and every candidate is
//! canonicalized (resolving symlinks) and checked for containment. A
//! candidate escaping the root aborts resolution with a miss; callers
//! cannot distinguish a blocked escape from a plain 404.

use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Outcome of probing a single candidate path
enum Probe {
    /// A regular file inside the tenant root
    File(PathBuf),
    /// Candidate does not exist or is not a regular file
    Miss,
    /// Candidate resolved outside the tenant root
    Violation,
}

/// Resolves request paths to on-disk files within a tenant root
pub struct AssetResolver {
    index_files: Vec<String>,
}

impl AssetResolver {
    pub fn new(index_files: Vec<String>) -> Self {
        Self { index_files }
    }

    /// Resolve a request path against a tenant root. `None` covers every
    /// non-servable case: missing file, exhausted fallback chain, missing
    /// root, and containment violations alike.
    pub async fn resolve(&self, tenant_root: &Path, request_path: &str) -> Option<PathBuf> {
        // A root that cannot be canonicalized cannot contain anything
        let canonical_root = tokio::fs::canonicalize(tenant_root).await.ok()?;

        let Some(relative) = normalize_request_path(request_path) else {
            debug!(path = request_path, "Rejected request path at normalization");
            return None;
        };

        match probe(&canonical_root, &canonical_root.join(&relative)).await {
            Probe::File(found) => return Some(found),
            Probe::Violation => {
                warn!(
                    root = %canonical_root.display(),
                    path = request_path,
                    "Candidate resolved outside tenant root"
                );
                return None;
            }
            Probe::Miss => {}
        }

        // Index fallback is root-relative, not request-path-relative
        for index in &self.index_files {
            match probe(&canonical_root, &canonical_root.join(index)).await {
                Probe::File(found) => return Some(found),
                Probe::Violation => {
                    warn!(
                        root = %canonical_root.display(),
                        index,
                        "Index candidate resolved outside tenant root"
                    );
                    return None;
                }
                Probe::Miss => {}
            }
        }

        None
    }
}

/// Canonicalize a candidate and check containment and file-ness.
/// Canonicalization resolves symlinks, so a link pointing out of the root
/// fails the prefix check here rather than being followed.
async fn probe(canonical_root: &Path, candidate: &Path) -> Probe {
    let canonical = match tokio::fs::canonicalize(candidate).await {
        Ok(p) => p,
        Err(_) => return Probe::Miss,
    };

    if !canonical.starts_with(canonical_root) {
        return Probe::Violation;
    }

    match tokio::fs::metadata(&canonical).await {
        Ok(meta) if meta.is_file() => Probe::File(canonical),
        _ => Probe::Miss,
    }
}

/// Lexically normalize a request path into a relative path. Returns `None`
/// for paths that try to climb above the root or embed NUL bytes. The
/// result contains only normal components, so joining it to a root can
/// never name a lexical ancestor.
fn normalize_request_path(request_path: &str) -> Option<PathBuf> {
    if request_path.contains('\0') {
        return None;
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(request_path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(segment) => normalized.push(segment),
            Component::CurDir => {}
            // Any attempt to pop past the root is an escape attempt
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    Some(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn default_resolver() -> AssetResolver {
        AssetResolver::new(vec!["index.html".to_string(), "index.htm".to_string()])
    }

    #[test]
    fn test_normalize_plain_paths() {
        assert_eq!(normalize_request_path("/"), Some(PathBuf::new()));
        assert_eq!(
            normalize_request_path("/a/b.html"),
            Some(PathBuf::from("a/b.html"))
        );
        assert_eq!(
            normalize_request_path("/a//b/./c"),
            Some(PathBuf::from("a/b/c"))
        );
    }

    #[test]
    fn test_normalize_resolves_interior_parent_dirs() {
        assert_eq!(normalize_request_path("/a/../b"), Some(PathBuf::from("b")));
        assert_eq!(
            normalize_request_path("/a/b/../c/../d.txt"),
            Some(PathBuf::from("a/d.txt"))
        );
    }

    #[test]
    fn test_normalize_rejects_escapes() {
        assert_eq!(normalize_request_path("/.."), None);
        assert_eq!(normalize_request_path("/../etc/passwd"), None);
        assert_eq!(normalize_request_path("/a/../../b"), None);
        assert_eq!(normalize_request_path("/a/\0"), None);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn segment() -> impl Strategy<Value = String> {
            prop_oneof![
                Just("..".to_string()),
                Just(".".to_string()),
                Just("".to_string()),
                Just("%2e%2e".to_string()),
                "[a-z]{1,8}",
            ]
        }

        proptest! {
            /// Randomized traversal payloads never normalize into a path
            /// that could name an ancestor of the root.
            #[test]
            fn normalized_paths_have_no_parent_components(
                segments in prop::collection::vec(segment(), 0..12)
            ) {
                let path = format!("/{}", segments.join("/"));
                if let Some(normalized) = normalize_request_path(&path) {
                    prop_assert!(normalized
                        .components()
                        .all(|c| matches!(c, Component::Normal(_))));
                    prop_assert!(normalized.is_relative());
                }
            }
        }
    }

    #[tokio::test]
    async fn test_resolve_exact_file() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("about.html"), "about").unwrap();

        let resolver = default_resolver();
        let found = resolver.resolve(root.path(), "/about.html").await.unwrap();
        assert!(found.ends_with("about.html"));
    }

    #[tokio::test]
    async fn test_resolve_directory_falls_back_to_index() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("index.html"), "<h1>hi</h1>").unwrap();

        let resolver = default_resolver();
        let found = resolver.resolve(root.path(), "/").await.unwrap();
        assert!(found.ends_with("index.html"));
    }

    #[tokio::test]
    async fn test_index_htm_is_second_choice() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("index.htm"), "legacy").unwrap();

        let resolver = default_resolver();
        let found = resolver.resolve(root.path(), "/").await.unwrap();
        assert!(found.ends_with("index.htm"));
    }

    #[tokio::test]
    async fn test_fallback_is_root_relative() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("blog")).unwrap();
        fs::write(root.path().join("blog/index.html"), "blog index").unwrap();
        fs::write(root.path().join("index.html"), "root index").unwrap();

        // A request below a subdirectory still falls back to the root index
        let resolver = default_resolver();
        let found = resolver.resolve(root.path(), "/blog/missing").await.unwrap();
        assert_eq!(found, root.path().canonicalize().unwrap().join("index.html"));
    }

    #[tokio::test]
    async fn test_extension_is_not_inferred() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("report.pdf.html"), "report").unwrap();

        let resolver = default_resolver();
        assert!(resolver.resolve(root.path(), "/report.pdf").await.is_none());
    }

    #[tokio::test]
    async fn test_exhausted_chain_is_none() {
        let root = TempDir::new().unwrap();

        let resolver = default_resolver();
        assert!(resolver.resolve(root.path(), "/missing.txt").await.is_none());
    }

    #[tokio::test]
    async fn test_missing_root_is_none() {
        let resolver = default_resolver();
        assert!(resolver
            .resolve(Path::new("/nonexistent/tenant/root"), "/")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_traversal_never_reads_outside_root() {
        let outer = TempDir::new().unwrap();
        let root = outer.path().join("public_html");
        fs::create_dir(&root).unwrap();
        fs::write(outer.path().join("secret.txt"), "secret").unwrap();
        fs::write(root.join("index.html"), "public").unwrap();

        let resolver = default_resolver();
        assert!(resolver.resolve(&root, "/../secret.txt").await.is_none());
        assert!(resolver
            .resolve(&root, "/a/../../secret.txt")
            .await
            .is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escaping_root_is_rejected() {
        let outer = TempDir::new().unwrap();
        let root = outer.path().join("public_html");
        fs::create_dir(&root).unwrap();
        fs::write(outer.path().join("secret.txt"), "secret").unwrap();
        std::os::unix::fs::symlink(outer.path().join("secret.txt"), root.join("link.txt"))
            .unwrap();

        let resolver = default_resolver();
        assert!(resolver.resolve(&root, "/link.txt").await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_inside_root_is_served() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("real.html"), "real").unwrap();
        std::os::unix::fs::symlink(root.path().join("real.html"), root.path().join("alias.html"))
            .unwrap();

        let resolver = default_resolver();
        let found = resolver.resolve(root.path(), "/alias.html").await.unwrap();
        assert!(found.ends_with("real.html"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_index_escaping_root_is_rejected() {
        let outer = TempDir::new().unwrap();
        let root = outer.path().join("public_html");
        fs::create_dir(&root).unwrap();
        fs::write(outer.path().join("secret.txt"), "secret").unwrap();
        std::os::unix::fs::symlink(outer.path().join("secret.txt"), root.join("index.html"))
            .unwrap();

        let resolver = default_resolver();
        assert!(resolver.resolve(&root, "/").await.is_none());
    }
}
