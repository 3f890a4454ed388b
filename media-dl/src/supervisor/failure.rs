//! Classification of how a tool process ended.

use std::fmt;

/// How the process terminated, as far as the OS told us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    Code(i32),
    /// Killed by a signal; no exit code available.
    Signal,
    /// Waiting on the child failed, so its real status is unknown.
    WaitFailed(String),
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        matches!(self, ProcessExit::Code(0))
    }
}

/// Why a job failed, rendered as the user-visible error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    RateLimited,
    VerificationRequired,
    Unavailable,
    ExitCode(i32),
    Signalled,
    Supervision(String),
}

const RATE_LIMIT_MARKERS: &[&str] = &[
    "HTTP Error 429",
    "Too Many Requests",
    "rate-limit",
    "rate limit",
];
const VERIFICATION_MARKERS: &[&str] = &[
    "Sign in to confirm",
    "not a bot",
    "confirm your age",
    "login required",
    "account authentication is required",
];
const UNAVAILABLE_MARKERS: &[&str] = &[
    "Video unavailable",
    "Private video",
    "This video is unavailable",
    "has been removed",
    "HTTP Error 404",
    "not available in your country",
];

impl FailureKind {
    /// Classify a failed exit from the error output it produced.
    ///
    /// Known markers win over the raw exit status; unmatched output falls back
    /// to the exit code.
    pub fn classify(exit: &ProcessExit, stderr: &str) -> Self {
        let haystack = stderr.to_ascii_lowercase();
        let contains_any = |markers: &[&str]| {
            markers
                .iter()
                .any(|m| haystack.contains(&m.to_ascii_lowercase()))
        };

        if contains_any(RATE_LIMIT_MARKERS) {
            FailureKind::RateLimited
        } else if contains_any(VERIFICATION_MARKERS) {
            FailureKind::VerificationRequired
        } else if contains_any(UNAVAILABLE_MARKERS) {
            FailureKind::Unavailable
        } else {
            match exit {
                ProcessExit::Code(code) => FailureKind::ExitCode(*code),
                ProcessExit::Signal => FailureKind::Signalled,
                ProcessExit::WaitFailed(reason) => FailureKind::Supervision(reason.clone()),
            }
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::RateLimited => {
                f.write_str("Rate limited by the source site, try again in a few minutes")
            }
            FailureKind::VerificationRequired => {
                f.write_str("The source requires sign-in or bot verification for this media")
            }
            FailureKind::Unavailable => {
                f.write_str("The requested media is private or no longer available")
            }
            FailureKind::ExitCode(code) => write!(f, "tool exited with code {}", code),
            FailureKind::Signalled => f.write_str("tool was terminated by a signal"),
            FailureKind::Supervision(reason) => {
                write!(f, "lost track of the tool process: {}", reason)
            }
        }
    }
}

/// Keeps the last `limit` bytes of a process's error output.
#[derive(Debug, Clone)]
pub struct StderrTail {
    buf: String,
    limit: usize,
}

impl StderrTail {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: String::new(),
            limit,
        }
    }

    pub fn push_line(&mut self, line: &str) {
        self.buf.push_str(line);
        self.buf.push('\n');

        if self.buf.len() > self.limit {
            let mut cut = self.buf.len() - self.limit;
            while !self.buf.is_char_boundary(cut) {
                cut += 1;
            }
            self.buf.drain(..cut);
        }
    }

    pub fn into_string(self) -> String {
        self.buf
    }
}
