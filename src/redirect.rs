use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

const REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const UPSTREAM_URL: &str = "https://github.com/uklans/cache-domains.git";

#[derive(Error, Debug)]
pub enum RedirectError {
    #[error("could not determine user cache directory")]
    NoCacheDir,
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
    #[error("git error: {0}")]
    Git(#[from] git2::Error),
    #[error("malformed cache_domains.json: {0}")]
    Manifest(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct CacheDomainsManifest {
    #[serde(default)]
    cache_domains: Vec<CacheDomainGroup>,
}

#[derive(Debug, Deserialize)]
struct CacheDomainGroup {
    #[serde(default)]
    domain_files: Vec<String>,
    #[serde(default)]
    mixed_content: bool,
}

fn cache_domains_dir() -> Result<PathBuf, RedirectError> {
    let base = dirs::cache_dir().ok_or(RedirectError::NoCacheDir)?;
    let dir = base.join("abs-resolver").join("cache-domains");
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Clones the upstream redirect-catalogue repository on first use, or
/// fetches + fast-forwards an existing working tree. "Already up to date" is
/// not an error.
fn sync_cache_domains_repo(dir: &Path) -> Result<(), RedirectError> {
    if dir.join("cache_domains.json").exists() {
        let repo = git2::Repository::open(dir)?;
        let mut remote = repo.find_remote("origin")?;
        remote.fetch(&["refs/heads/*:refs/remotes/origin/*"], None, None)?;

        let head = repo.head()?;
        let branch = head.shorthand().unwrap_or("main").to_string();
        let fetch_head = repo.find_reference(&format!("refs/remotes/origin/{branch}"))?;
        let fetch_commit = repo.reference_to_annotated_commit(&fetch_head)?;
        let analysis = repo.merge_analysis(&[&fetch_commit])?;
        if analysis.0.is_up_to_date() {
            return Ok(());
        }
        if analysis.0.is_fast_forward() {
            let refname = format!("refs/heads/{branch}");
            let mut reference = repo.find_reference(&refname)?;
            reference.set_target(fetch_commit.id(), "fast-forward")?;
            repo.set_head(&refname)?;
            repo.checkout_head(Some(git2::build::CheckoutBuilder::default().force()))?;
        }
        return Ok(());
    }

    info!("cloning {UPSTREAM_URL} into {}", dir.display());
    git2::Repository::clone(UPSTREAM_URL, dir)?;
    Ok(())
}

fn parse_manifest(dir: &Path) -> Result<CacheDomainsManifest, RedirectError> {
    let bytes = fs::read(dir.join("cache_domains.json"))?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn read_pattern_file(dir: &Path, domain_file: &str) -> Result<Vec<String>, RedirectError> {
    let contents = fs::read_to_string(dir.join(domain_file))?;
    Ok(contents.lines().filter(|l| !l.is_empty()).map(str::to_owned).collect())
}

fn build_flat_list(dir: &Path) -> Result<Vec<String>, RedirectError> {
    let manifest = parse_manifest(dir)?;
    let mut patterns = Vec::new();
    for group in manifest.cache_domains {
        if group.mixed_content {
            continue;
        }
        for domain_file in &group.domain_files {
            patterns.extend(read_pattern_file(dir, domain_file)?);
        }
    }
    Ok(patterns)
}

/// Synchronises and exposes the flat redirect pattern list (component B).
pub struct RedirectListProvider {
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    patterns: Vec<String>,
    last_refresh: Option<Instant>,
}

impl RedirectListProvider {
    pub fn new() -> Self {
        RedirectListProvider { state: RwLock::new(State::default()) }
    }

    #[instrument(skip(self))]
    pub fn get_redirect_list(&self) -> Result<Vec<String>, RedirectError> {
        let needs_refresh = {
            let state = self.state.read().unwrap();
            match state.last_refresh {
                None => true,
                Some(t) => t.elapsed() > REFRESH_INTERVAL,
            }
        };

        if needs_refresh {
            match self.refresh() {
                Ok(patterns) => {
                    let mut state = self.state.write().unwrap();
                    state.patterns = patterns;
                    state.last_refresh = Some(Instant::now());
                }
                Err(e) => {
                    let state = self.state.read().unwrap();
                    if state.last_refresh.is_none() {
                        return Err(e);
                    }
                    warn!("redirect list refresh failed, serving stale list: {e}");
                }
            }
        }

        Ok(self.state.read().unwrap().patterns.clone())
    }

    fn refresh(&self) -> Result<Vec<String>, RedirectError> {
        let dir = cache_domains_dir()?;
        sync_cache_domains_repo(&dir)?;
        build_flat_list(&dir)
    }
}

impl Default for RedirectListProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Given the queried name with any trailing dot removed, does `pattern`
/// match it? Exact patterns compare case-insensitively; wildcard patterns
/// (containing `*`) match as a suffix once every `*` is stripped.
pub fn matches(name_without_trailing_dot: &str, pattern: &str) -> bool {
    if pattern.contains('*') {
        let stripped: String = pattern.chars().filter(|c| *c != '*').collect();
        name_without_trailing_dot.ends_with(stripped.as_str())
    } else {
        name_without_trailing_dot.eq_ignore_ascii_case(pattern)
    }
}

/// First pattern (in manifest order) that matches, if any.
pub fn find_match<'a>(name: &str, patterns: &'a [String]) -> Option<&'a str> {
    let trimmed = name.strip_suffix('.').unwrap_or(name);
    patterns.iter().find(|p| matches(trimmed, p)).map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_case_insensitive() {
        assert!(matches("Example.com", "example.com"));
        assert!(matches("example.com", "EXAMPLE.COM"));
        assert!(!matches("notexample.com", "example.com"));
    }

    #[test]
    fn test_wildcard_suffix_match() {
        assert!(matches("cache11-fra1.steamcontent.com", "*.steamcontent.com"));
        assert!(matches("steamcontent.com", "*.steamcontent.com"));
        assert!(!matches("steamcontent.com.evil.net", "*.steamcontent.com"));
    }

    #[test]
    fn test_find_match_first_wins_in_manifest_order() {
        let patterns = vec!["*.example.com".to_string(), "foo.example.com".to_string()];
        assert_eq!(find_match("foo.example.com", &patterns), Some("*.example.com"));
    }

    #[test]
    fn test_find_match_strips_trailing_dot() {
        let patterns = vec!["example.com".to_string()];
        assert_eq!(find_match("example.com.", &patterns), Some("example.com"));
    }

    #[test]
    fn test_build_flat_list_excludes_mixed_content() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("cache_domains.json"),
            r#"{"cache_domains":[
                {"name":"a","domain_files":["a.txt"]},
                {"name":"b","domain_files":["b.txt"],"mixed_content":true}
            ]}"#,
        )
        .unwrap();
        fs::write(dir.path().join("a.txt"), "foo.cdn.net\n\nbar.cdn.net\n").unwrap();
        fs::write(dir.path().join("b.txt"), "excluded.cdn.net\n").unwrap();

        let patterns = build_flat_list(dir.path()).unwrap();
        assert_eq!(patterns, vec!["foo.cdn.net".to_string(), "bar.cdn.net".to_string()]);
    }
}
