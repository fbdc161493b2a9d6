use anyhow::{Context, Result, anyhow};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::document::Document;
use crate::outline::Outline;
use crate::study::{
    ChatRole, ChatTranscript, ContentError, GenerationMode, GenerationOptions, GuidedStudy, Quiz,
    RevisionSheet, StudyContent, Summary, validate_mind_map,
};

pub const DEFAULT_API_URL: &str = "http://localhost:8080/v1/responses";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const MAX_ATTEMPTS: usize = 4;
const REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generative backend failed: {0:#}")]
    Backend(anyhow::Error),
    #[error("no valid {mode} content after {attempts} attempts: {last_error}")]
    Exhausted {
        mode: GenerationMode,
        attempts: usize,
        last_error: String,
    },
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error("chat message must not be empty")]
    EmptyMessage,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: std::env::var("STUDYMAP_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            api_key: std::env::var("STUDYMAP_API_KEY").ok().filter(|key| !key.is_empty()),
            model: std::env::var("STUDYMAP_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub mime_type: String,
    pub data_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRequest {
    pub prompt: String,
    pub attachment: Option<Attachment>,
}

/// A text-completion service. Returns the raw model output for a prompt.
pub trait GenerativeBackend: Send + Sync {
    fn complete(&self, request: &BackendRequest) -> impl Future<Output = Result<String>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    config: BackendConfig,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn request_body(&self, request: &BackendRequest) -> Value {
        match &request.attachment {
            None => json!({
                "model": self.config.model,
                "input": request.prompt,
            }),
            Some(attachment) => {
                let file_part = if attachment.mime_type.starts_with("image/") {
                    json!({ "type": "input_image", "image_url": attachment.data_url })
                } else {
                    json!({
                        "type": "input_file",
                        "filename": "document.pdf",
                        "file_data": attachment.data_url,
                    })
                };
                json!({
                    "model": self.config.model,
                    "input": [{
                        "role": "user",
                        "content": [
                            { "type": "input_text", "text": request.prompt },
                            file_part,
                        ],
                    }],
                })
            }
        }
    }
}

impl GenerativeBackend for HttpBackend {
    async fn complete(&self, request: &BackendRequest) -> Result<String> {
        let mut http = self
            .client
            .post(&self.config.api_url)
            .json(&self.request_body(request));

        if let Some(key) = &self.config.api_key {
            http = http.header("Authorization", format!("Bearer {}", key));
        }

        let response = http.send().await.context("Failed to send request to LLM")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("LLM API returned {}: {}", status, text));
        }

        let response_json: Value = response
            .json()
            .await
            .context("Failed to parse LLM response JSON")?;
        extract_output_text(&response_json)
    }
}

/// Pulls the generated text out of a responses-style, chat-completions or nested output payload.
pub fn extract_output_text(response: &Value) -> Result<String> {
    if let Some(text) = response.get("output_text").and_then(Value::as_str) {
        return Ok(text.to_string());
    }

    if let Some(choices) = response.get("choices").and_then(Value::as_array) {
        return choices
            .first()
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Could not find content in OpenAI response"));
    }

    response
        .get("output")
        .and_then(Value::as_array)
        .and_then(|output| output.first())
        .and_then(|first| first.get("content"))
        .and_then(Value::as_array)
        .and_then(|content| content.first())
        .and_then(|part| part.get("text"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Unknown response format: {}", response))
}

/// Removes a surrounding markdown code fence, if present.
pub fn strip_code_fences(text: &str) -> &str {
    text.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

pub struct Generator<B> {
    backend: B,
    max_attempts: usize,
}

impl<B: GenerativeBackend> Generator<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            max_attempts: MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn generate(
        &self,
        mode: GenerationMode,
        document: &Document,
        options: &GenerationOptions,
    ) -> Result<StudyContent, GenerationError> {
        options.validate()?;
        tracing::info!(%mode, document = document.kind(), "generating study content");

        let content = match mode {
            GenerationMode::Quiz => StudyContent::Quiz(self.quiz(document, options, None).await?),
            GenerationMode::Summary => StudyContent::Summary(self.summary(document, options).await?),
            GenerationMode::RevisionSheet => {
                let prompt = build_prompt(mode, document, options, None);
                StudyContent::RevisionSheet(
                    self.request_json(mode, prompt, document, RevisionSheet::validate)
                        .await?,
                )
            }
            GenerationMode::MindMap => {
                StudyContent::MindMap(self.mind_map(document, options, None).await?)
            }
            GenerationMode::Chat => StudyContent::Chat(self.open_chat(document, options).await?),
            GenerationMode::GuidedStudy => {
                let summary = self.summary(document, options).await?;
                let mind_map = self.mind_map(document, options, Some(&summary)).await?;
                let quiz = self.quiz(document, options, Some(&summary)).await?;
                StudyContent::GuidedStudy(GuidedStudy {
                    summary,
                    mind_map,
                    quiz,
                })
            }
        };

        Ok(content)
    }

    /// Answers `message` about `document`, appending both turns to `transcript`.
    pub async fn chat(
        &self,
        document: &Document,
        transcript: &mut ChatTranscript,
        message: &str,
    ) -> Result<String, GenerationError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(GenerationError::EmptyMessage);
        }

        let mut prompt = String::from(
            "You are a patient study tutor. Answer the student's latest message using the study material. \
             Reply in plain text, concisely, and say so when the material does not cover the question.\n",
        );
        push_document(&mut prompt, document);
        prompt.push_str("\nConversation so far:\n");
        for turn in &transcript.turns {
            let speaker = match turn.role {
                ChatRole::User => "Student",
                ChatRole::Assistant => "Tutor",
            };
            prompt.push_str(&format!("{}: {}\n", speaker, turn.content));
        }
        prompt.push_str(&format!("Student: {}\nTutor:", message));

        let reply = self.complete_text(GenerationMode::Chat, prompt, document).await?;
        transcript.push(ChatRole::User, message);
        transcript.push(ChatRole::Assistant, reply.clone());
        Ok(reply)
    }

    async fn summary(
        &self,
        document: &Document,
        options: &GenerationOptions,
    ) -> Result<Summary, GenerationError> {
        let prompt = build_prompt(GenerationMode::Summary, document, options, None);
        self.request_json(GenerationMode::Summary, prompt, document, Summary::validate)
            .await
    }

    async fn mind_map(
        &self,
        document: &Document,
        options: &GenerationOptions,
        summary: Option<&Summary>,
    ) -> Result<Outline, GenerationError> {
        let prompt = build_prompt(GenerationMode::MindMap, document, options, summary);
        self.request_json(GenerationMode::MindMap, prompt, document, validate_mind_map)
            .await
    }

    async fn quiz(
        &self,
        document: &Document,
        options: &GenerationOptions,
        summary: Option<&Summary>,
    ) -> Result<Quiz, GenerationError> {
        let prompt = build_prompt(GenerationMode::Quiz, document, options, summary);
        self.request_json(GenerationMode::Quiz, prompt, document, Quiz::validate)
            .await
    }

    async fn open_chat(
        &self,
        document: &Document,
        options: &GenerationOptions,
    ) -> Result<ChatTranscript, GenerationError> {
        let prompt = build_prompt(GenerationMode::Chat, document, options, None);
        let greeting = self.complete_text(GenerationMode::Chat, prompt, document).await?;
        let mut transcript = ChatTranscript::default();
        transcript.push(ChatRole::Assistant, greeting);
        Ok(transcript)
    }

    async fn complete_text(
        &self,
        mode: GenerationMode,
        mut prompt: String,
        document: &Document,
    ) -> Result<String, GenerationError> {
        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            let output = self.call(prompt.clone(), document).await?;
            let text = output.trim();
            if !text.is_empty() {
                return Ok(text.to_string());
            }
            tracing::warn!(attempt, %mode, "backend returned an empty reply");
            last_error = "the reply was empty".to_string();
            prompt.push_str("\n\nYour previous reply was empty. Please answer in plain text.");
        }
        Err(GenerationError::Exhausted {
            mode,
            attempts: self.max_attempts,
            last_error,
        })
    }

    async fn request_json<T, F>(
        &self,
        mode: GenerationMode,
        mut prompt: String,
        document: &Document,
        validate: F,
    ) -> Result<T, GenerationError>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> Result<(), ContentError>,
    {
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                tracing::info!(attempt, max = self.max_attempts, %mode, "retrying generation");
            }

            let output = self.call(prompt.clone(), document).await?;
            let clean_json = strip_code_fences(&output);

            let parsed: T = match serde_json::from_str(clean_json) {
                Ok(parsed) => parsed,
                Err(err) => {
                    tracing::warn!(attempt, %mode, error = %err, "backend returned invalid JSON");
                    prompt.push_str(&format!(
                        "\n\nYour previous response was not valid JSON: {}. Please return ONLY valid JSON.",
                        err
                    ));
                    last_error = err.to_string();
                    continue;
                }
            };

            match validate(&parsed) {
                Ok(()) => return Ok(parsed),
                Err(err) => {
                    tracing::warn!(attempt, %mode, error = %err, "generated content failed validation");
                    prompt.push_str(&format!(
                        "\n\nYour previous response failed validation: {}. Please fix it and return the full JSON again.",
                        err
                    ));
                    last_error = err.to_string();
                }
            }
        }

        Err(GenerationError::Exhausted {
            mode,
            attempts: self.max_attempts,
            last_error,
        })
    }

    async fn call(&self, prompt: String, document: &Document) -> Result<String, GenerationError> {
        let attachment = document
            .attachment()
            .map(|(mime_type, data_url)| Attachment {
                mime_type: mime_type.to_string(),
                data_url,
            });
        let request = BackendRequest { prompt, attachment };
        self.backend
            .complete(&request)
            .await
            .map_err(GenerationError::Backend)
    }
}

fn build_prompt(
    mode: GenerationMode,
    document: &Document,
    options: &GenerationOptions,
    summary: Option<&Summary>,
) -> String {
    let task = match mode {
        GenerationMode::Quiz => format!(
            "You are an experienced educator. Write a multiple-choice quiz with exactly {} {} questions \
             that test understanding of the study material. Every question needs at least two options, \
             exactly one correct answer (answerIndex is zero-based) and a one-sentence explanation.\n\
             Return ONLY a JSON object with this structure:\n\
             {{\"title\": \"...\", \"questions\": [{{\"question\": \"...\", \"options\": [\"...\", \"...\"], \"answerIndex\": 0, \"explanation\": \"...\"}}]}}",
            options.question_count,
            options.difficulty.as_str()
        ),
        GenerationMode::Summary => "You are an experienced educator. Summarize the study material for a student.\n\
             Return ONLY a JSON object with this structure:\n\
             {\"title\": \"...\", \"overview\": \"one or two paragraphs\", \"keyPoints\": [\"...\"]}"
            .to_string(),
        GenerationMode::RevisionSheet => "You are an experienced educator. Build a revision sheet that groups the \
             essential facts of the study material into short sections and lists the key terms.\n\
             Return ONLY a JSON object with this structure:\n\
             {\"title\": \"...\", \"sections\": [{\"heading\": \"...\", \"points\": [\"...\"]}], \"keyTerms\": [{\"term\": \"...\", \"definition\": \"...\"}]}"
            .to_string(),
        GenerationMode::MindMap => "You are an experienced educator. Build a mind map of the study material with one \
             central topic, a handful of main branches and a few short child ideas per branch. \
             Keep every title under eight words. Do not nest deeper than children.\n\
             Return ONLY a JSON object with this structure:\n\
             {\"centralTopic\": \"...\", \"mainNodes\": [{\"title\": \"...\", \"children\": [{\"title\": \"...\"}]}]}"
            .to_string(),
        GenerationMode::Chat => "You are a patient study tutor. Greet the student in two or three sentences, \
             name the main topics of the study material and invite a question. Reply in plain text."
            .to_string(),
        GenerationMode::GuidedStudy => "You are an experienced educator. Summarize the study material.\n\
             Return ONLY a JSON object with this structure:\n\
             {\"title\": \"...\", \"overview\": \"...\", \"keyPoints\": [\"...\"]}"
            .to_string(),
    };

    let mut prompt = task;

    if let Some(instructions) = options.instructions.as_deref().filter(|s| !s.trim().is_empty()) {
        prompt.push_str(&format!("\n\nUser Instructions:\n{}\n", instructions));
    }

    if let Some(summary) = summary {
        prompt.push_str(&format!(
            "\n\nStay consistent with this summary of the material:\n{}\n",
            summary.overview
        ));
    }

    push_document(&mut prompt, document);
    prompt
}

fn push_document(prompt: &mut String, document: &Document) {
    match document.inline_text() {
        Some(text) => prompt.push_str(&format!("\n\nHere is the study material:\n\n{}", text)),
        None => prompt.push_str(&format!(
            "\n\nThe study material is the attached {} document. Read all of it, including any text in images.",
            document.kind()
        )),
    }
}
