//! The two-step question-answering workflow: retrieve, then generate.
//!
//! Each step is a [`Stage`] that reads the current [`RequestState`] and
//! returns a [`StateUpdate`]; the [`Pipeline`] merges updates in order.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::models::UploadPayload;

#[derive(Debug, Clone, Default)]
pub struct RequestState {
    pub question: String,
    pub uploads: Vec<UploadPayload>,
    pub use_persistent: bool,
    pub context: String,
    pub response: String,
}

impl RequestState {
    pub fn new(question: impl Into<String>, uploads: Vec<UploadPayload>, use_persistent: bool) -> Self {
        Self {
            question: question.into(),
            uploads,
            use_persistent,
            ..Self::default()
        }
    }
}

/// Fields a stage wants to overwrite. `None` leaves the field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub context: Option<String>,
    pub response: Option<String>,
}

impl StateUpdate {
    pub fn apply(self, state: &mut RequestState) {
        if let Some(context) = self.context {
            state.context = context;
        }
        if let Some(response) = self.response {
            state.response = response;
        }
    }
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, state: &RequestState) -> Result<StateUpdate>;
}

pub struct Pipeline {
    retrieve: Arc<dyn Stage>,
    generate: Arc<dyn Stage>,
}

impl Pipeline {
    pub fn new(retrieve: Arc<dyn Stage>, generate: Arc<dyn Stage>) -> Self {
        Self { retrieve, generate }
    }

    pub async fn run(&self, mut state: RequestState) -> Result<RequestState> {
        for stage in [&self.retrieve, &self.generate] {
            tracing::debug!(stage = stage.name(), "running stage");
            let update = stage.run(&state).await?;
            update.apply(&mut state);
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SetContext;

    #[async_trait]
    impl Stage for SetContext {
        fn name(&self) -> &'static str {
            "retrieve"
        }

        async fn run(&self, state: &RequestState) -> Result<StateUpdate> {
            Ok(StateUpdate {
                context: Some(format!("ctx for {}", state.question)),
                response: None,
            })
        }
    }

    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Stage for Echo {
        fn name(&self) -> &'static str {
            "generate"
        }

        async fn run(&self, state: &RequestState) -> Result<StateUpdate> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(StateUpdate {
                context: None,
                response: Some(format!("answer from {}", state.context)),
            })
        }
    }

    struct Fail;

    #[async_trait]
    impl Stage for Fail {
        fn name(&self) -> &'static str {
            "retrieve"
        }

        async fn run(&self, _state: &RequestState) -> Result<StateUpdate> {
            Err(RagError::internal("boom"))
        }
    }

    #[tokio::test]
    async fn stages_run_in_order_and_merge() {
        let pipeline = Pipeline::new(
            Arc::new(SetContext),
            Arc::new(Echo {
                calls: AtomicUsize::new(0),
            }),
        );
        let state = pipeline
            .run(RequestState::new("q", Vec::new(), true))
            .await
            .unwrap();
        assert_eq!(state.context, "ctx for q");
        assert_eq!(state.response, "answer from ctx for q");
    }

    #[tokio::test]
    async fn retrieval_failure_skips_generation() {
        let echo = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let pipeline = Pipeline::new(Arc::new(Fail), echo.clone());
        assert!(pipeline.run(RequestState::default()).await.is_err());
        assert_eq!(echo.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_update_changes_nothing() {
        let mut state = RequestState {
            context: "kept".into(),
            ..RequestState::default()
        };
        StateUpdate::default().apply(&mut state);
        assert_eq!(state.context, "kept");
        assert_eq!(state.response, "");
    }
}
