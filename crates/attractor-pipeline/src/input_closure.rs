//! Input closure materializer: copies the files a run declares (plus
//! whatever they transitively reference) into the working tree and a
//! read-only snapshot root, and records exactly what it did in an
//! [`InputManifest`].

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSetBuilder};
use regex::Regex;

use attractor_types::{InputManifest, Result, SourceTargetEntry};

/// What to materialize: explicit glob includes plus the source roots they're
/// resolved against.
#[derive(Debug, Clone, Default)]
pub struct ClosureConfig {
    pub include: Vec<String>,
    pub default_include: Vec<String>,
    pub source_roots: Vec<PathBuf>,
}

/// Discovers files referenced *from* already-materialized files (e.g.
/// markdown links, quoted paths) so the closure can pull those in too.
pub trait ReferenceScanner: Send + Sync {
    fn scan(&self, content: &str) -> Vec<String>;
}

/// Default scanner: markdown-style links `[text](path)` and double-quoted
/// relative paths that look like a file (contain a `.` in the last segment).
pub struct DefaultReferenceScanner {
    markdown_link: Regex,
    quoted_path: Regex,
}

impl Default for DefaultReferenceScanner {
    fn default() -> Self {
        Self {
            markdown_link: Regex::new(r"\]\(([^)\s]+)\)").unwrap(),
            quoted_path: Regex::new(r#""([\w./-]+\.[\w]+)""#).unwrap(),
        }
    }
}

impl ReferenceScanner for DefaultReferenceScanner {
    fn scan(&self, content: &str) -> Vec<String> {
        let mut found = Vec::new();
        for cap in self.markdown_link.captures_iter(content) {
            found.push(cap[1].to_string());
        }
        for cap in self.quoted_path.captures_iter(content) {
            found.push(cap[1].to_string());
        }
        found
    }
}

/// Materialize `cfg`'s closure into `target_root` (the live working tree)
/// and `snapshot_root` (a read-only copy used for resume/fidelity checks).
/// Discovers transitive references breadth-first via `scanner`, stopping
/// when no new files are found (cycle-safe: each path is visited once).
pub fn materialize(
    cfg: &ClosureConfig,
    target_root: &Path,
    snapshot_root: &Path,
    scanner: &dyn ReferenceScanner,
) -> Result<InputManifest> {
    let mut warnings = Vec::new();
    let mut builder = GlobSetBuilder::new();
    let patterns: Vec<&String> = if cfg.include.is_empty() {
        cfg.default_include.iter().collect()
    } else {
        cfg.include.iter().collect()
    };
    for pattern in &patterns {
        match Glob::new(pattern) {
            Ok(g) => {
                builder.add(g);
            }
            Err(e) => warnings.push(format!("invalid glob '{}': {}", pattern, e)),
        }
    }
    let glob_set = builder.build().map_err(|e| {
        attractor_types::AttractorError::Other(format!("failed to build glob set: {}", e))
    })?;

    let mut resolved_files: Vec<PathBuf> = Vec::new();
    let mut source_target_map: Vec<SourceTargetEntry> = Vec::new();
    let mut discovered_references: Vec<PathBuf> = Vec::new();
    let mut visited: HashSet<PathBuf> = HashSet::new();

    for root in &cfg.source_roots {
        for entry in walk(root) {
            let rel = match entry.strip_prefix(root) {
                Ok(r) => r,
                Err(_) => continue,
            };
            if glob_set.is_match(rel) {
                enqueue_copy(
                    &entry,
                    rel,
                    target_root,
                    snapshot_root,
                    &mut visited,
                    &mut resolved_files,
                    &mut source_target_map,
                )?;
            }
        }
    }

    // Breadth-first reference expansion over whatever got materialized.
    let mut queue: VecDeque<PathBuf> = resolved_files.clone().into();
    while let Some(path) = queue.pop_front() {
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        for reference in scanner.scan(&content) {
            let candidate = path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(&reference);
            let Ok(canonical) = candidate.canonicalize() else {
                continue;
            };
            if visited.contains(&canonical) {
                continue;
            }
            let Some(root) = cfg
                .source_roots
                .iter()
                .find(|r| canonical.starts_with(r))
            else {
                continue;
            };
            let rel = canonical.strip_prefix(root).unwrap().to_path_buf();
            enqueue_copy(
                &canonical,
                &rel,
                target_root,
                snapshot_root,
                &mut visited,
                &mut resolved_files,
                &mut source_target_map,
            )?;
            discovered_references.push(canonical.clone());
            queue.push_back(canonical);
        }
    }

    Ok(InputManifest {
        sources: cfg
            .source_roots
            .iter()
            .map(|p| p.display().to_string())
            .collect(),
        resolved_files,
        source_target_map,
        discovered_references,
        warnings,
        generated_at: chrono::Utc::now(),
    })
}

fn enqueue_copy(
    source: &Path,
    rel: &Path,
    target_root: &Path,
    snapshot_root: &Path,
    visited: &mut HashSet<PathBuf>,
    resolved_files: &mut Vec<PathBuf>,
    source_target_map: &mut Vec<SourceTargetEntry>,
) -> Result<()> {
    if !visited.insert(source.to_path_buf()) {
        return Ok(());
    }
    let target = target_root.join(rel);
    let snapshot = snapshot_root.join(rel);
    copy_preserving_permissions(source, &target)?;
    copy_preserving_permissions(source, &snapshot)?;
    resolved_files.push(source.to_path_buf());
    source_target_map.push(SourceTargetEntry {
        source: source.to_path_buf(),
        target,
    });
    Ok(())
}

fn copy_preserving_permissions(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(source, dest)?;
    #[cfg(unix)]
    {
        let perms = std::fs::metadata(source)?.permissions();
        std::fs::set_permissions(dest, perms)?;
    }
    Ok(())
}

fn walk(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out
}
