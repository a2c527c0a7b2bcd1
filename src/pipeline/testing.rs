//! Scripted provider doubles for pipeline tests.
//!
//! Each double pops pre-loaded responses in order and records what it was
//! asked, so tests can assert on both sides of the conversation without HTTP.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::ai::{ChatProvider, ChatRequest, EmbeddingProvider, LlmResponse, TokenUsage};
use crate::research::{
    DeepTaskStatus, Encyclopedia, EncyclopediaArticle, QaAnswer, QaApi, SearchApi, SearchHit,
};
use crate::types::{LoomError, Result};

// =============================================================================
// Chat
// =============================================================================

pub(crate) struct ScriptedChat {
    responses: Mutex<VecDeque<Result<String>>>,
    pub requests: Arc<Mutex<Vec<ChatRequest>>>,
    usage: TokenUsage,
    model: String,
}

impl ScriptedChat {
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            requests: Arc::new(Mutex::new(Vec::new())),
            usage: TokenUsage::default(),
            model: "gpt-4o-mini".to_string(),
        }
    }

    pub fn with_script(responses: Vec<Result<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Arc::new(Mutex::new(Vec::new())),
            usage: TokenUsage::default(),
            model: "gpt-4o-mini".to_string(),
        }
    }

    pub fn with_usage(mut self, input_tokens: u32, output_tokens: u32) -> Self {
        self.usage = TokenUsage {
            input_tokens,
            output_tokens,
        };
        self
    }
}

#[async_trait]
impl ChatProvider for ScriptedChat {
    async fn complete(&self, request: &ChatRequest) -> Result<LlmResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LoomError::LlmApi("chat script exhausted".to_string())));
        next.map(|content| LlmResponse {
            usage: self.usage,
            ..LlmResponse::content_only(content)
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// =============================================================================
// Search / Deep Research
// =============================================================================

pub(crate) struct ScriptedSearch {
    pub hits: Vec<SearchHit>,
    pub searches: Arc<Mutex<Vec<String>>>,
    pub started: Arc<Mutex<Vec<String>>>,
    polls: Mutex<VecDeque<Result<DeepTaskStatus>>>,
    task_counter: AtomicUsize,
}

impl ScriptedSearch {
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self {
            hits,
            searches: Arc::new(Mutex::new(Vec::new())),
            started: Arc::new(Mutex::new(Vec::new())),
            polls: Mutex::new(VecDeque::new()),
            task_counter: AtomicUsize::new(0),
        }
    }

    pub fn with_polls(self, polls: Vec<Result<DeepTaskStatus>>) -> Self {
        *self.polls.lock().unwrap() = polls.into_iter().collect();
        self
    }

    pub fn hit(title: &str, text: &str) -> SearchHit {
        SearchHit {
            title: Some(title.to_string()),
            url: format!("https://example.com/{}", title.replace(' ', "-")),
            text: text.to_string(),
            published_date: Some("2025-01-01".to_string()),
            author: Some("reporter".to_string()),
        }
    }
}

#[async_trait]
impl SearchApi for ScriptedSearch {
    async fn search(&self, query: &str, _limit: usize) -> Result<Vec<SearchHit>> {
        self.searches.lock().unwrap().push(query.to_string());
        Ok(self.hits.clone())
    }

    async fn start_research(
        &self,
        instructions: &str,
        _schema: &serde_json::Value,
    ) -> Result<String> {
        self.started.lock().unwrap().push(instructions.to_string());
        let n = self.task_counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("task-{n}"))
    }

    async fn poll_research(&self, _task_id: &str) -> Result<DeepTaskStatus> {
        self.polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(DeepTaskStatus::Running))
    }
}

// =============================================================================
// Encyclopedia
// =============================================================================

pub(crate) struct ScriptedEncyclopedia {
    pub article: Option<EncyclopediaArticle>,
    fail: bool,
    pub lookups: Arc<Mutex<Vec<String>>>,
}

impl ScriptedEncyclopedia {
    pub fn new(article: Option<EncyclopediaArticle>) -> Self {
        Self {
            article,
            fail: false,
            lookups: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every lookup fails, to exercise skip paths
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(None)
        }
    }

    pub fn article(title: &str, extract: &str) -> EncyclopediaArticle {
        EncyclopediaArticle {
            title: title.to_string(),
            extract: extract.to_string(),
            url: format!(
                "https://en.wikipedia.org/wiki/{}",
                title.replace(' ', "_")
            ),
        }
    }
}

#[async_trait]
impl Encyclopedia for ScriptedEncyclopedia {
    async fn lookup(&self, query: &str) -> Result<Option<EncyclopediaArticle>> {
        self.lookups.lock().unwrap().push(query.to_string());
        if self.fail {
            return Err(LoomError::LlmApi("scripted lookup failure".to_string()));
        }
        Ok(self.article.clone())
    }
}

// =============================================================================
// Q&A
// =============================================================================

pub(crate) struct ScriptedQa {
    answers: Mutex<VecDeque<Result<QaAnswer>>>,
    disabled: AtomicBool,
    pub questions: Arc<Mutex<Vec<String>>>,
}

impl ScriptedQa {
    pub fn new(answers: Vec<Result<QaAnswer>>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            disabled: AtomicBool::new(false),
            questions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn answer(content: &str) -> QaAnswer {
        QaAnswer {
            content: content.to_string(),
            citations: vec!["https://example.com/cite".to_string()],
        }
    }
}

#[async_trait]
impl QaApi for ScriptedQa {
    async fn ask(&self, question: &str) -> Result<QaAnswer> {
        self.questions.lock().unwrap().push(question.to_string());
        let next = self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LoomError::CreditsExhausted("script exhausted".to_string())));
        if matches!(next, Err(LoomError::CreditsExhausted(_))) {
            self.disabled.store(true, Ordering::SeqCst);
        }
        next
    }

    fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Embedding
// =============================================================================

pub(crate) struct ScriptedEmbedder {
    pub inputs: Arc<Mutex<Vec<String>>>,
    /// Inputs containing this substring fail, to exercise skip paths
    pub fail_on: Option<String>,
}

impl ScriptedEmbedder {
    pub fn new() -> Self {
        Self {
            inputs: Arc::new(Mutex::new(Vec::new())),
            fail_on: None,
        }
    }

    pub fn failing_on(substring: &str) -> Self {
        Self {
            fail_on: Some(substring.to_string()),
            ..Self::new()
        }
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(marker) = &self.fail_on {
            if text.contains(marker) {
                return Err(LoomError::LlmApi("scripted embed failure".to_string()));
            }
        }
        self.inputs.lock().unwrap().push(text.to_string());
        Ok(vec![0.1; 4])
    }

    fn dimensions(&self) -> usize {
        4
    }
}
