//! Analysis request descriptors.
//!
//! A descriptor is an immutable pairing of a model-or-detector reference and
//! a completion callback. Descriptors are created once at startup, collected
//! into a `RequestSet`, and never added to or removed afterwards.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use crate::analyze::observation::Observation;

/// Completion callback for one request.
///
/// The engine invokes it at most once per submitted frame, possibly on a
/// different thread than the submission call, with either an observation or
/// the per-request error.
pub type ResultCallback = Arc<dyn Fn(Result<Observation>) + Send + Sync>;

/// What a descriptor asks the engine to run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestKind {
    /// A classification model referenced by name; yields ranked labels.
    Classification { model: String },
    /// The engine's built-in rectangle detector; yields at most one quad.
    RectangleDetection,
    /// A pose model yielding a heatmap of the declared fixed shape.
    PoseHeatmap {
        model: String,
        channels: usize,
        height: usize,
        width: usize,
    },
}

impl RequestKind {
    /// The model reference, when the kind names one.
    pub fn model(&self) -> Option<&str> {
        match self {
            RequestKind::Classification { model } => Some(model),
            RequestKind::PoseHeatmap { model, .. } => Some(model),
            RequestKind::RectangleDetection => None,
        }
    }
}

/// One registered analysis request.
pub struct AnalysisRequest {
    name: String,
    kind: RequestKind,
    callback: ResultCallback,
}

impl AnalysisRequest {
    pub fn new(
        name: impl Into<String>,
        kind: RequestKind,
        callback: impl Fn(Result<Observation>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            callback: Arc::new(callback),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &RequestKind {
        &self.kind
    }

    /// Deliver the outcome to the registered callback.
    ///
    /// Engines call this exactly once per request per submitted frame.
    pub fn complete(&self, outcome: Result<Observation>) {
        (self.callback)(outcome);
    }
}

impl fmt::Debug for AnalysisRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisRequest")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// The ordered, startup-fixed collection of analysis requests.
#[derive(Debug, Default)]
pub struct RequestSet {
    requests: Vec<AnalysisRequest>,
}

impl RequestSet {
    pub fn new(requests: Vec<AnalysisRequest>) -> Self {
        Self { requests }
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnalysisRequest> {
        self.requests.iter()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn complete_invokes_the_registered_callback() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let request = AnalysisRequest::new(
            "test",
            RequestKind::RectangleDetection,
            move |outcome| {
                assert!(outcome.is_err());
                seen.fetch_add(1, Ordering::Relaxed);
            },
        );

        request.complete(Err(anyhow::anyhow!("engine unavailable")));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn request_set_preserves_registration_order() {
        let set = RequestSet::new(vec![
            AnalysisRequest::new(
                "first",
                RequestKind::Classification {
                    model: "resnet50".into(),
                },
                |_| {},
            ),
            AnalysisRequest::new("second", RequestKind::RectangleDetection, |_| {}),
        ]);

        let names: Vec<_> = set.iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn kind_exposes_model_reference() {
        let kind = RequestKind::PoseHeatmap {
            model: "cpm".into(),
            channels: 14,
            height: 96,
            width: 96,
        };
        assert_eq!(kind.model(), Some("cpm"));
        assert_eq!(RequestKind::RectangleDetection.model(), None);
    }
}
