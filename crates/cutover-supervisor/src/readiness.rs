//! Readiness detection on service output
//!
//! The supervisor feeds each complete output line to a matcher and acts on
//! its verdict. Matchers never see partial lines.

use regex::Regex;

/// Verdict for one output line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Terminal failure, with the marker or pattern that matched
    Failed(String),
    Continue,
}

/// Classifies output lines of a starting service
pub trait ReadinessMatcher: Send + Sync {
    fn check(&self, line: &str) -> Readiness;
}

/// Substring markers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerMatcher {
    ready: String,
    failures: Vec<String>,
}

impl MarkerMatcher {
    #[must_use]
    pub fn new(ready: impl Into<String>) -> Self {
        Self {
            ready: ready.into(),
            failures: Vec::new(),
        }
    }

    /// Add a failure marker
    #[must_use]
    pub fn with_failure(mut self, marker: impl Into<String>) -> Self {
        self.failures.push(marker.into());
        self
    }

    #[must_use]
    pub fn with_failures<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failures.extend(markers.into_iter().map(Into::into));
        self
    }
}

impl ReadinessMatcher for MarkerMatcher {
    fn check(&self, line: &str) -> Readiness {
        // A line carrying both is a failure
        if let Some(marker) = self.failures.iter().find(|m| line.contains(m.as_str())) {
            return Readiness::Failed(marker.clone());
        }
        if line.contains(&self.ready) {
            Readiness::Ready
        } else {
            Readiness::Continue
        }
    }
}

/// Regular-expression patterns
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    ready: Regex,
    failures: Vec<Regex>,
}

impl RegexMatcher {
    pub fn new(ready: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            ready: Regex::new(ready)?,
            failures: Vec::new(),
        })
    }

    pub fn with_failure(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.failures.push(Regex::new(pattern)?);
        Ok(self)
    }
}

impl ReadinessMatcher for RegexMatcher {
    fn check(&self, line: &str) -> Readiness {
        if let Some(pattern) = self.failures.iter().find(|p| p.is_match(line)) {
            return Readiness::Failed(pattern.as_str().to_string());
        }
        if self.ready.is_match(line) {
            Readiness::Ready
        } else {
            Readiness::Continue
        }
    }
}
