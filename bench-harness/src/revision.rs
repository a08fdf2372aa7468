//! Revision providers.
//!
//! A [`RevisionProvider`] turns a revision identifier (branch, tag or
//! commit) into a [`RevisionDescriptor`] whose source path is a buildable
//! tree. [`GitRevisionProvider`] checks revisions out as detached git
//! worktrees; [`StaticRevisionProvider`] maps identifiers to fixed
//! directories.

use crate::config::RepositoryConfig;
use crate::error::RevisionError;
use crate::store::escape_revision;
use async_trait::async_trait;
use bench_types::RevisionDescriptor;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Resolves revision identifiers to source trees.
#[async_trait]
pub trait RevisionProvider: Send + Sync {
    /// Resolve `identifier`, or fail with [`RevisionError::NotFound`].
    async fn resolve(&self, identifier: &str) -> Result<RevisionDescriptor, RevisionError>;

    /// Every revision this provider knows about.
    async fn list(&self) -> Result<Vec<String>, RevisionError>;
}

// ============================================================================
// StaticRevisionProvider
// ============================================================================

/// Fixed identifier -> directory map.
#[derive(Debug, Clone, Default)]
pub struct StaticRevisionProvider {
    revisions: BTreeMap<String, PathBuf>,
}

impl StaticRevisionProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a revision.
    pub fn with_revision(mut self, identifier: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.revisions.insert(identifier.into(), path.into());
        self
    }
}

impl From<BTreeMap<String, PathBuf>> for StaticRevisionProvider {
    fn from(revisions: BTreeMap<String, PathBuf>) -> Self {
        Self { revisions }
    }
}

#[async_trait]
impl RevisionProvider for StaticRevisionProvider {
    async fn resolve(&self, identifier: &str) -> Result<RevisionDescriptor, RevisionError> {
        self.revisions
            .get(identifier)
            .map(|path| RevisionDescriptor::new(identifier, path.clone()))
            .ok_or_else(|| RevisionError::NotFound {
                identifier: identifier.to_string(),
            })
    }

    async fn list(&self) -> Result<Vec<String>, RevisionError> {
        Ok(self.revisions.keys().cloned().collect())
    }
}

// ============================================================================
// GitRevisionProvider
// ============================================================================

/// Checks revisions out of a git repository as detached worktrees.
///
/// The repository is cloned from `url` on first use if `checkout_dir` does
/// not exist yet. Each revision gets its own worktree directory, so several
/// revisions can be provisioned side by side.
pub struct GitRevisionProvider {
    url: Option<String>,
    checkout_dir: PathBuf,
    worktree_dir: PathBuf,
    // Serializes git operations on the shared checkout.
    lock: Mutex<bool>,
}

impl GitRevisionProvider {
    /// Create a provider from repository configuration.
    pub fn new(config: &RepositoryConfig) -> Self {
        Self {
            url: config.url.clone(),
            checkout_dir: config.checkout_dir.clone(),
            worktree_dir: config.worktree_dir.clone(),
            lock: Mutex::new(false),
        }
    }

    /// Worktree directory for a revision.
    ///
    /// Distinct identifiers always get distinct directories.
    pub fn worktree_path(&self, identifier: &str) -> PathBuf {
        self.worktree_dir.join(escape_revision(identifier))
    }

    async fn ensure_checkout(&self, prepared: &mut bool) -> Result<(), RevisionError> {
        if *prepared {
            return Ok(());
        }

        if !self.checkout_dir.join(".git").exists() {
            let Some(url) = &self.url else {
                return Err(RevisionError::Git {
                    args: "clone".into(),
                    stderr: format!(
                        "{} is not a git checkout and no repository url is configured",
                        self.checkout_dir.display()
                    ),
                });
            };
            info!("Cloning {} into {}", url, self.checkout_dir.display());
            let target = self.checkout_dir.to_string_lossy().into_owned();
            git(None, &["clone", "--quiet", url, &target]).await?;
        } else if self.url.is_some() {
            debug!("Fetching into {}", self.checkout_dir.display());
            git(Some(&self.checkout_dir), &["fetch", "--quiet", "--prune", "origin"]).await?;
        }

        *prepared = true;
        Ok(())
    }

    async fn rev_parse(&self, identifier: &str) -> Result<String, RevisionError> {
        for candidate in [identifier.to_string(), format!("origin/{}", identifier)] {
            let spec = format!("{}^{{commit}}", candidate);
            match git(Some(&self.checkout_dir), &["rev-parse", "--verify", "--quiet", &spec]).await {
                Ok(commit) => return Ok(commit.trim().to_string()),
                Err(RevisionError::Git { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(RevisionError::NotFound {
            identifier: identifier.to_string(),
        })
    }
}

#[async_trait]
impl RevisionProvider for GitRevisionProvider {
    async fn resolve(&self, identifier: &str) -> Result<RevisionDescriptor, RevisionError> {
        let mut prepared = self.lock.lock().await;
        self.ensure_checkout(&mut prepared).await?;

        let commit = self.rev_parse(identifier).await?;
        let path = self.worktree_path(identifier);
        let path_arg = std::path::absolute(&path)?.to_string_lossy().into_owned();

        if path.join(".git").exists() {
            debug!("Refreshing worktree {} at {}", path.display(), commit);
            git(Some(&path), &["checkout", "--quiet", "--detach", "--force", &commit]).await?;
        } else {
            tokio::fs::create_dir_all(&self.worktree_dir).await?;
            info!("Creating worktree for {} ({}) at {}", identifier, commit, path.display());
            git(
                Some(&self.checkout_dir),
                &["worktree", "add", "--force", "--detach", &path_arg, &commit],
            )
            .await?;
        }

        Ok(RevisionDescriptor {
            identifier: identifier.to_string(),
            source_path: path,
            commit: Some(commit),
        })
    }

    async fn list(&self) -> Result<Vec<String>, RevisionError> {
        let mut prepared = self.lock.lock().await;
        self.ensure_checkout(&mut prepared).await?;

        let out = git(Some(&self.checkout_dir), &["branch", "-r", "--format=%(refname:short)"]).await?;
        Ok(parse_remote_branches(&out))
    }
}

/// Branch names from `git branch -r --format=%(refname:short)`.
///
/// Strips the `origin/` prefix and skips the `HEAD` alias.
pub fn parse_remote_branches(output: &str) -> Vec<String> {
    let mut branches: Vec<String> = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.contains("HEAD"))
        .map(|l| l.strip_prefix("origin/").unwrap_or(l).to_string())
        .collect();
    branches.sort();
    branches.dedup();
    branches
}

async fn git(dir: Option<&Path>, args: &[&str]) -> Result<String, RevisionError> {
    let mut cmd = Command::new("git");
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    let output = cmd.args(args).output().await?;

    if !output.status.success() {
        return Err(RevisionError::Git {
            args: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
