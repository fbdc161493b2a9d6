use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::outline::Outline;

pub const DEFAULT_QUESTION_COUNT: u32 = 10;
pub const MAX_QUESTION_COUNT: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationMode {
    Quiz,
    Summary,
    RevisionSheet,
    MindMap,
    Chat,
    GuidedStudy,
}

impl GenerationMode {
    pub const ALL: [GenerationMode; 6] = [
        GenerationMode::Quiz,
        GenerationMode::Summary,
        GenerationMode::RevisionSheet,
        GenerationMode::MindMap,
        GenerationMode::Chat,
        GenerationMode::GuidedStudy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationMode::Quiz => "quiz",
            GenerationMode::Summary => "summary",
            GenerationMode::RevisionSheet => "revision-sheet",
            GenerationMode::MindMap => "mind-map",
            GenerationMode::Chat => "chat",
            GenerationMode::GuidedStudy => "guided-study",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            GenerationMode::Quiz => "Multiple-choice quiz",
            GenerationMode::Summary => "Summary with key points",
            GenerationMode::RevisionSheet => "Revision sheet with key terms",
            GenerationMode::MindMap => "Two-level mind map",
            GenerationMode::Chat => "Chat about the document",
            GenerationMode::GuidedStudy => "Guided study (summary, mind map, quiz)",
        }
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationMode {
    type Err = ContentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GenerationMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| ContentError::UnknownMode(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContentError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("quiz must contain at least one question")]
    NoQuestions,
    #[error("question {index} must offer at least two options")]
    TooFewOptions { index: usize },
    #[error("question {index} has answer index {answer} but only {options} options")]
    AnswerOutOfRange {
        index: usize,
        answer: usize,
        options: usize,
    },
    #[error("question {index} has an empty option")]
    EmptyOption { index: usize },
    #[error("question count must be between 1 and {MAX_QUESTION_COUNT}, got {0}")]
    QuestionCount(u32),
    #[error("expected {expected} content but found {found}")]
    ModeMismatch {
        expected: GenerationMode,
        found: GenerationMode,
    },
    #[error("unknown generation mode '{0}'")]
    UnknownMode(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOptions {
    #[serde(default = "default_question_count")]
    pub question_count: u32,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

fn default_question_count() -> u32 {
    DEFAULT_QUESTION_COUNT
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            question_count: DEFAULT_QUESTION_COUNT,
            difficulty: Difficulty::default(),
            instructions: None,
        }
    }
}

impl GenerationOptions {
    pub fn validate(&self) -> Result<(), ContentError> {
        if !(1..=MAX_QUESTION_COUNT).contains(&self.question_count) {
            return Err(ContentError::QuestionCount(self.question_count));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub answer_index: usize,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiz {
    pub title: String,
    pub questions: Vec<QuizQuestion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizScore {
    pub correct: usize,
    pub total: usize,
}

impl QuizScore {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 * 100.0 / self.total as f64
        }
    }
}

impl Quiz {
    pub fn validate(&self) -> Result<(), ContentError> {
        require("quiz title", &self.title)?;
        if self.questions.is_empty() {
            return Err(ContentError::NoQuestions);
        }
        for (index, question) in self.questions.iter().enumerate() {
            require("question text", &question.question)?;
            if question.options.len() < 2 {
                return Err(ContentError::TooFewOptions { index });
            }
            if question.options.iter().any(|option| option.trim().is_empty()) {
                return Err(ContentError::EmptyOption { index });
            }
            if question.answer_index >= question.options.len() {
                return Err(ContentError::AnswerOutOfRange {
                    index,
                    answer: question.answer_index,
                    options: question.options.len(),
                });
            }
        }
        Ok(())
    }

    /// Scores chosen option indexes against the answer key. Missing answers count as wrong.
    pub fn score(&self, answers: &[Option<usize>]) -> QuizScore {
        let correct = self
            .questions
            .iter()
            .zip(answers.iter().chain(std::iter::repeat(&None)))
            .filter(|(question, answer)| **answer == Some(question.answer_index))
            .count();
        QuizScore {
            correct,
            total: self.questions.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub title: String,
    pub overview: String,
    #[serde(default)]
    pub key_points: Vec<String>,
}

impl Summary {
    pub fn validate(&self) -> Result<(), ContentError> {
        require("summary title", &self.title)?;
        require("summary overview", &self.overview)?;
        if self.key_points.iter().any(|point| point.trim().is_empty()) {
            return Err(ContentError::Empty("key point"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionSection {
    pub heading: String,
    pub points: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyTerm {
    pub term: String,
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionSheet {
    pub title: String,
    pub sections: Vec<RevisionSection>,
    #[serde(default)]
    pub key_terms: Vec<KeyTerm>,
}

impl RevisionSheet {
    pub fn validate(&self) -> Result<(), ContentError> {
        require("revision sheet title", &self.title)?;
        if self.sections.is_empty() {
            return Err(ContentError::Empty("revision sheet sections"));
        }
        for section in &self.sections {
            require("section heading", &section.heading)?;
            if section.points.is_empty() {
                return Err(ContentError::Empty("section points"));
            }
        }
        for term in &self.key_terms {
            require("key term", &term.term)?;
            require("key term definition", &term.definition)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTranscript {
    pub turns: Vec<ChatTurn>,
}

impl ChatTranscript {
    pub fn push(&mut self, role: ChatRole, content: impl Into<String>) {
        self.turns.push(ChatTurn {
            role,
            content: content.into(),
        });
    }

    pub fn validate(&self) -> Result<(), ContentError> {
        if self.turns.iter().any(|turn| turn.content.trim().is_empty()) {
            return Err(ContentError::Empty("chat message"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuidedStudy {
    pub summary: Summary,
    pub mind_map: Outline,
    pub quiz: Quiz,
}

impl GuidedStudy {
    pub fn validate(&self) -> Result<(), ContentError> {
        self.summary.validate()?;
        validate_mind_map(&self.mind_map)?;
        self.quiz.validate()
    }
}

pub fn validate_mind_map(outline: &Outline) -> Result<(), ContentError> {
    require("central topic", &outline.central_topic)?;
    for main in &outline.main_nodes {
        require("main node title", &main.title)?;
        for child in &main.children {
            require("child node title", &child.title)?;
        }
    }
    Ok(())
}

/// Generated material for one study session, tagged by the mode that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "content", rename_all = "kebab-case")]
pub enum StudyContent {
    Quiz(Quiz),
    Summary(Summary),
    RevisionSheet(RevisionSheet),
    MindMap(Outline),
    Chat(ChatTranscript),
    GuidedStudy(GuidedStudy),
}

impl StudyContent {
    pub fn mode(&self) -> GenerationMode {
        match self {
            StudyContent::Quiz(_) => GenerationMode::Quiz,
            StudyContent::Summary(_) => GenerationMode::Summary,
            StudyContent::RevisionSheet(_) => GenerationMode::RevisionSheet,
            StudyContent::MindMap(_) => GenerationMode::MindMap,
            StudyContent::Chat(_) => GenerationMode::Chat,
            StudyContent::GuidedStudy(_) => GenerationMode::GuidedStudy,
        }
    }

    pub fn validate(&self) -> Result<(), ContentError> {
        match self {
            StudyContent::Quiz(quiz) => quiz.validate(),
            StudyContent::Summary(summary) => summary.validate(),
            StudyContent::RevisionSheet(sheet) => sheet.validate(),
            StudyContent::MindMap(outline) => validate_mind_map(outline),
            StudyContent::Chat(transcript) => transcript.validate(),
            StudyContent::GuidedStudy(guided) => guided.validate(),
        }
    }

    /// The mind map carried by this content, if any.
    pub fn mind_map(&self) -> Option<&Outline> {
        match self {
            StudyContent::MindMap(outline) => Some(outline),
            StudyContent::GuidedStudy(guided) => Some(&guided.mind_map),
            _ => None,
        }
    }

    /// Title suggested by the content itself.
    pub fn title(&self) -> Option<&str> {
        match self {
            StudyContent::Quiz(quiz) => Some(&quiz.title),
            StudyContent::Summary(summary) => Some(&summary.title),
            StudyContent::RevisionSheet(sheet) => Some(&sheet.title),
            StudyContent::MindMap(outline) => Some(&outline.central_topic),
            StudyContent::Chat(_) => None,
            StudyContent::GuidedStudy(guided) => Some(&guided.summary.title),
        }
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ContentError> {
    if value.trim().is_empty() {
        Err(ContentError::Empty(field))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outline::{ChildNode, MainNode};

    fn question(answer_index: usize) -> QuizQuestion {
        QuizQuestion {
            question: "What is the powerhouse of the cell?".into(),
            options: vec!["Nucleus".into(), "Mitochondria".into(), "Ribosome".into()],
            answer_index,
            explanation: String::new(),
        }
    }

    fn quiz() -> Quiz {
        Quiz {
            title: "Cells".into(),
            questions: vec![question(1), question(0)],
        }
    }

    #[test]
    fn quiz_validation_checks_answer_range() {
        assert!(quiz().validate().is_ok());

        let mut broken = quiz();
        broken.questions[1].answer_index = 3;
        assert_eq!(
            broken.validate(),
            Err(ContentError::AnswerOutOfRange {
                index: 1,
                answer: 3,
                options: 3
            })
        );

        let mut single = quiz();
        single.questions[0].options.truncate(1);
        single.questions[0].answer_index = 0;
        assert_eq!(single.validate(), Err(ContentError::TooFewOptions { index: 0 }));

        let empty = Quiz {
            title: "Cells".into(),
            questions: Vec::new(),
        };
        assert_eq!(empty.validate(), Err(ContentError::NoQuestions));
    }

    #[test]
    fn quiz_scoring_counts_missing_answers_as_wrong() {
        let score = quiz().score(&[Some(1)]);
        assert_eq!(score, QuizScore { correct: 1, total: 2 });
        assert_eq!(score.percent(), 50.0);

        let perfect = quiz().score(&[Some(1), Some(0)]);
        assert_eq!(perfect.correct, 2);
    }

    #[test]
    fn content_is_tagged_by_mode() {
        let content = StudyContent::MindMap(Outline::new(
            "Cells",
            vec![MainNode::new("Parts", vec![ChildNode::new("Wall")])],
        ));
        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json["mode"], "mind-map");
        assert_eq!(json["content"]["centralTopic"], "Cells");

        let back: StudyContent = serde_json::from_value(json).unwrap();
        assert_eq!(back.mode(), GenerationMode::MindMap);
        assert!(back.mind_map().is_some());
    }

    #[test]
    fn mind_map_requires_titles() {
        let outline = Outline::new("Cells", vec![MainNode::leaf("  ")]);
        assert_eq!(
            validate_mind_map(&outline),
            Err(ContentError::Empty("main node title"))
        );
        assert_eq!(
            validate_mind_map(&Outline::new("", Vec::new())),
            Err(ContentError::Empty("central topic"))
        );
    }

    #[test]
    fn modes_round_trip_through_text() {
        for mode in GenerationMode::ALL {
            assert_eq!(mode.as_str().parse::<GenerationMode>().unwrap(), mode);
            assert_eq!(
                serde_json::to_value(mode).unwrap(),
                serde_json::Value::String(mode.to_string())
            );
        }
        assert!("flashcards".parse::<GenerationMode>().is_err());
    }

    #[test]
    fn options_default_and_bounds() {
        let options: GenerationOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, GenerationOptions::default());
        assert!(options.validate().is_ok());

        let too_many = GenerationOptions {
            question_count: 51,
            ..GenerationOptions::default()
        };
        assert_eq!(too_many.validate(), Err(ContentError::QuestionCount(51)));
    }
}
