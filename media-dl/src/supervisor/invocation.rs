//! Locating a working invocation of the extraction tool.
//!
//! Candidates are probed with `--version` once; the outcome, including the
//! "nothing works" case, is cached for the life of the resolver.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// One way of starting the tool: a program plus leading arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationStrategy {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl InvocationStrategy {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Standalone binary first, then the Python module through common interpreters.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("yt-dlp"),
            Self::new("python3").with_args(["-m", "yt_dlp"]),
            Self::new("python").with_args(["-m", "yt_dlp"]),
        ]
    }
}

impl fmt::Display for InvocationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Cached result of tool resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolStatus {
    Available {
        strategy: InvocationStrategy,
        version: String,
    },
    Unavailable {
        tried: Vec<String>,
    },
}

impl ToolStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, ToolStatus::Available { .. })
    }

    pub fn version(&self) -> Option<&str> {
        match self {
            ToolStatus::Available { version, .. } => Some(version),
            ToolStatus::Unavailable { .. } => None,
        }
    }
}

/// Resolves and caches the tool invocation.
#[derive(Debug)]
pub struct ToolResolver {
    candidates: Vec<InvocationStrategy>,
    probe_timeout: Duration,
    resolved: OnceCell<ToolStatus>,
}

impl ToolResolver {
    pub fn new(candidates: Vec<InvocationStrategy>, probe_timeout: Duration) -> Self {
        Self {
            candidates,
            probe_timeout,
            resolved: OnceCell::new(),
        }
    }

    /// A resolver that skips probing and reports `status`.
    pub fn with_status(status: ToolStatus) -> Self {
        Self {
            candidates: Vec::new(),
            probe_timeout: Duration::ZERO,
            resolved: OnceCell::new_with(Some(status)),
        }
    }

    /// Resolve on first call; later calls return the cached status.
    pub async fn resolve(&self) -> &ToolStatus {
        self.resolved.get_or_init(|| self.probe()).await
    }

    /// The cached status, if resolution already ran.
    pub fn cached(&self) -> Option<&ToolStatus> {
        self.resolved.get()
    }

    async fn probe(&self) -> ToolStatus {
        for candidate in &self.candidates {
            match process_utils::probe_version(
                &candidate.program,
                &candidate.args,
                self.probe_timeout,
            )
            .await
            {
                Ok(Some(version)) => {
                    info!(strategy = %candidate, version = %version, "Extraction tool resolved");
                    return ToolStatus::Available {
                        strategy: candidate.clone(),
                        version,
                    };
                }
                Ok(None) => {
                    debug!(strategy = %candidate, "Candidate started but did not report a version")
                }
                Err(e) => debug!(strategy = %candidate, error = %e, "Candidate not usable"),
            }
        }

        let tried: Vec<String> = self.candidates.iter().map(ToString::to_string).collect();
        warn!(tried = ?tried, "No working extraction tool found");
        ToolStatus::Unavailable { tried }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_display() {
        let strategy = InvocationStrategy::new("python3").with_args(["-m", "yt_dlp"]);
        assert_eq!(strategy.to_string(), "python3 -m yt_dlp");
    }

    #[tokio::test]
    async fn test_preset_status_is_returned_without_probing() {
        let resolver = ToolResolver::with_status(ToolStatus::Unavailable { tried: vec![] });
        assert!(!resolver.resolve().await.is_available());
        assert!(resolver.cached().is_some());
    }

    #[tokio::test]
    async fn test_unavailable_when_no_candidate_works() {
        let resolver = ToolResolver::new(
            vec![InvocationStrategy::new("definitely-not-a-real-binary-xyz")],
            Duration::from_secs(5),
        );
        assert!(resolver.cached().is_none());

        let status = resolver.resolve().await.clone();
        assert_eq!(
            status,
            ToolStatus::Unavailable {
                tried: vec!["definitely-not-a-real-binary-xyz".to_string()]
            }
        );
        assert_eq!(resolver.cached(), Some(&status));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_first_working_candidate_wins() {
        let resolver = ToolResolver::new(
            vec![
                InvocationStrategy::new("definitely-not-a-real-binary-xyz"),
                InvocationStrategy::new("sh").with_args(["-c", "exit 1"]),
                InvocationStrategy::new("sh").with_args(["-c", "echo 2024.08.06"]),
            ],
            Duration::from_secs(5),
        );

        let status = resolver.resolve().await;
        assert_eq!(status.version(), Some("2024.08.06"));
        match status {
            ToolStatus::Available { strategy, .. } => {
                assert_eq!(strategy.args, vec!["-c", "echo 2024.08.06"])
            }
            other => panic!("unexpected status: {other:?}"),
        }
    }
}
