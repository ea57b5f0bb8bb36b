//! Request handling shared by the HTTP server and the `ask` command.

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::models::UploadPayload;
use crate::pipeline::{Pipeline, RequestState};

/// Message returned when the question is missing or empty.
pub const NO_QUESTION: &str = "No question provided";

/// Body of `POST /response`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AskRequest {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub pdf_files: Vec<UploadPayload>,
    /// Query the persistent corpus. Defaults to "only when nothing was uploaded".
    #[serde(default)]
    pub use_s3: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AskResponse {
    pub status: String,
    pub response: String,
}

pub async fn handle_ask(pipeline: &Pipeline, request: AskRequest) -> Result<AskResponse> {
    let question = match request.question {
        Some(q) if !q.is_empty() => q,
        _ => return Err(RagError::validation(NO_QUESTION)),
    };
    let use_persistent = request.use_s3.unwrap_or(request.pdf_files.is_empty());

    tracing::info!(
        uploads = request.pdf_files.len(),
        use_persistent,
        "answering question"
    );
    let state = pipeline
        .run(RequestState::new(question, request.pdf_files, use_persistent))
        .await?;

    Ok(AskResponse {
        status: "success".to_string(),
        response: state.response,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Stage, StateUpdate};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Records the flags each request reached retrieval with.
    struct Spy {
        seen: Mutex<Vec<(usize, bool)>>,
    }

    #[async_trait]
    impl Stage for Spy {
        fn name(&self) -> &'static str {
            "retrieve"
        }

        async fn run(&self, state: &RequestState) -> Result<StateUpdate> {
            self.seen
                .lock()
                .unwrap()
                .push((state.uploads.len(), state.use_persistent));
            Ok(StateUpdate::default())
        }
    }

    struct Answer;

    #[async_trait]
    impl Stage for Answer {
        fn name(&self) -> &'static str {
            "generate"
        }

        async fn run(&self, _state: &RequestState) -> Result<StateUpdate> {
            Ok(StateUpdate {
                context: None,
                response: Some("ok".into()),
            })
        }
    }

    fn pipeline() -> (Pipeline, Arc<Spy>) {
        let spy = Arc::new(Spy {
            seen: Mutex::new(Vec::new()),
        });
        (Pipeline::new(spy.clone(), Arc::new(Answer)), spy)
    }

    fn pdf() -> UploadPayload {
        UploadPayload {
            name: "a.pdf".into(),
            data: "AA==".into(),
        }
    }

    #[tokio::test]
    async fn missing_question_is_rejected_before_retrieval() {
        let (p, spy) = pipeline();
        for question in [None, Some(String::new())] {
            let err = handle_ask(
                &p,
                AskRequest {
                    question,
                    ..AskRequest::default()
                },
            )
            .await
            .unwrap_err();
            assert_eq!(err.to_string(), NO_QUESTION);
            assert_eq!(err.status(), 400);
        }
        assert!(spy.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn whitespace_question_is_passed_through() {
        let (p, spy) = pipeline();
        let resp = handle_ask(
            &p,
            AskRequest {
                question: Some("   ".into()),
                ..AskRequest::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(resp.response, "ok");
        assert_eq!(*spy.seen.lock().unwrap(), vec![(0, true)]);
    }

    #[tokio::test]
    async fn use_s3_defaults_to_no_uploads() {
        let (p, spy) = pipeline();
        let ask = |pdf_files: Vec<UploadPayload>, use_s3: Option<bool>| AskRequest {
            question: Some("q".into()),
            pdf_files,
            use_s3,
        };

        let resp = handle_ask(&p, ask(Vec::new(), None)).await.unwrap();
        assert_eq!(resp.status, "success");
        assert_eq!(resp.response, "ok");
        handle_ask(&p, ask(vec![pdf()], None)).await.unwrap();
        handle_ask(&p, ask(vec![pdf()], Some(true))).await.unwrap();
        handle_ask(&p, ask(Vec::new(), Some(false))).await.unwrap();

        assert_eq!(
            *spy.seen.lock().unwrap(),
            vec![(0, true), (1, false), (1, true), (0, false)]
        );
    }

    #[test]
    fn request_fields_are_optional() {
        let req: AskRequest = serde_json::from_str(r#"{"question":"hi"}"#).unwrap();
        assert_eq!(req.question.as_deref(), Some("hi"));
        assert!(req.pdf_files.is_empty());
        assert_eq!(req.use_s3, None);
    }
}
