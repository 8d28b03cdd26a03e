//! Predicate and scheduling errors.

use std::fmt;
use std::sync::Arc;

use nodescale_snapshot::SnapshotError;
use thiserror::Error;

/// Result type alias for predicate evaluation.
pub type PredicateResult<T> = Result<T, PredicateError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateErrorKind {
    /// The pod does not fit. This is the expected negative answer.
    NotSchedulable,
    /// A plugin failed to evaluate.
    Internal,
}

type DebugInfoFn = Arc<dyn Fn() -> String + Send + Sync>;

/// A failed predicate evaluation for one pod.
///
/// `debug_info` renders extra node context (taints, free resources) only
/// when a caller asks for [`PredicateError::verbose_message`].
#[derive(Clone)]
pub struct PredicateError {
    kind: PredicateErrorKind,
    predicate: String,
    reasons: Vec<String>,
    node_name: Option<String>,
    debug_info: Option<DebugInfoFn>,
}

impl PredicateError {
    pub fn not_schedulable(predicate: impl Into<String>, reasons: Vec<String>) -> Self {
        Self {
            kind: PredicateErrorKind::NotSchedulable,
            predicate: predicate.into(),
            reasons,
            node_name: None,
            debug_info: None,
        }
    }

    pub fn internal(predicate: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind: PredicateErrorKind::Internal,
            predicate: predicate.into(),
            reasons: vec![reason.into()],
            node_name: None,
            debug_info: None,
        }
    }

    pub fn with_node(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = Some(node_name.into());
        self
    }

    pub fn with_debug_info(mut self, f: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.debug_info = Some(Arc::new(f));
        self
    }

    pub fn kind(&self) -> PredicateErrorKind {
        self.kind
    }

    pub fn is_internal(&self) -> bool {
        self.kind == PredicateErrorKind::Internal
    }

    pub fn predicate(&self) -> &str {
        &self.predicate
    }

    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }

    pub fn node_name(&self) -> Option<&str> {
        self.node_name.as_deref()
    }

    pub fn message(&self) -> String {
        let what = match self.kind {
            PredicateErrorKind::NotSchedulable => "predicate",
            PredicateErrorKind::Internal => "error running predicate",
        };
        let mut msg = format!("{what} {:?} failed", self.predicate);
        if let Some(node) = &self.node_name {
            msg.push_str(&format!(" on node {node}"));
        }
        if !self.reasons.is_empty() {
            msg.push_str(&format!(": {}", self.reasons.join(", ")));
        }
        msg
    }

    /// `message()` plus the lazily rendered node context.
    pub fn verbose_message(&self) -> String {
        match &self.debug_info {
            Some(f) => format!("{}; {}", self.message(), f()),
            None => self.message(),
        }
    }
}

impl fmt::Debug for PredicateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateError")
            .field("kind", &self.kind)
            .field("predicate", &self.predicate)
            .field("reasons", &self.reasons)
            .field("node_name", &self.node_name)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for PredicateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for PredicateError {}

/// Errors from placing pods into a snapshot.
#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error(transparent)]
    Predicate(#[from] PredicateError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn message_names_predicate_node_and_reasons() {
        let err = PredicateError::not_schedulable(
            "NodeResourcesFit",
            vec!["Insufficient cpu".into(), "Insufficient memory".into()],
        )
        .with_node("n1");
        assert_eq!(
            err.to_string(),
            "predicate \"NodeResourcesFit\" failed on node n1: Insufficient cpu, Insufficient memory"
        );
        assert!(!err.is_internal());
    }

    #[test]
    fn debug_info_is_only_rendered_on_demand() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let err = PredicateError::internal("TaintToleration", "boom").with_debug_info(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            "taints: []".to_string()
        });
        let _ = err.to_string();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(err.verbose_message().ends_with("taints: []"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(err.is_internal());
    }
}
