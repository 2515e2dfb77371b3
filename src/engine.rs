//! One repository, ready to answer questions
//!
//! The engine owns the repository, the indexer and the language model, and
//! builds a fresh tool set and orchestrator per question from the current
//! index handle. History is passed in and handed back; the engine keeps no
//! conversation state of its own.

use crate::agent::{AgentStatus, Orchestrator, ToolInvocation};
use crate::config::Config;
use crate::error::{CodePalError, Result};
use crate::indexer::{IndexHandle, Indexer};
use crate::llm::{model_from_config, LanguageModel};
use crate::repository::Repository;
use crate::session::{ConversationHistory, Turn};
use crate::tools::{ToolContext, ToolSet};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// What a caller gets back from `ask`
#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub transcript: Vec<ToolInvocation>,
    pub status: AgentStatus,
    pub history: ConversationHistory,
}

/// A search hit detached from the index
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub path: String,
    pub language: String,
    pub start_line: usize,
    pub end_line: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    pub distance: f32,
    pub text: String,
}

pub struct Engine {
    config: Config,
    repo: Repository,
    indexer: Arc<Indexer>,
    model: Arc<dyn LanguageModel>,
}

impl Engine {
    /// Open a repository with the configured embedder, index store and model
    pub fn open(root: &Path, config: Config) -> Result<Self> {
        let repo = Repository::open(root, config.repository.clone())?;
        let indexer = Arc::new(Indexer::from_config(&config)?);
        let model = model_from_config(&config.llm)?;
        info!(
            "Opened {} (model: {}, embedder: {})",
            repo.root().display(),
            model.name(),
            indexer.embedder().model_name()
        );
        Ok(Self::from_parts(config, repo, indexer, model))
    }

    pub fn from_parts(
        config: Config,
        repo: Repository,
        indexer: Arc<Indexer>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            config,
            repo,
            indexer,
            model,
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn indexer(&self) -> &Indexer {
        &self.indexer
    }

    /// Reuse, load or build the index for the repository as it is now
    pub async fn index(&self, force: bool) -> Result<IndexHandle> {
        self.indexer.open_or_build(&self.repo, force).await
    }

    /// Semantic search without the agent loop
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        let handle = self.index(false).await?;
        let vector = self.indexer.embedder().encode_query(query)?;
        let hits = handle.index.search(&vector, k)?;
        Ok(hits
            .into_iter()
            .map(|hit| SearchResult {
                path: hit.chunk.source_path.clone(),
                language: hit.chunk.language.clone(),
                start_line: hit.chunk.start_line,
                end_line: hit.chunk.end_line,
                start_offset: hit.chunk.start_offset,
                end_offset: hit.chunk.end_offset,
                distance: hit.distance,
                text: hit.chunk.text.clone(),
            })
            .collect())
    }

    /// Answer a question; the returned history has the new turn appended
    pub async fn ask(&self, question: &str, mut history: ConversationHistory) -> Result<AskResponse> {
        let question = question.trim();
        if question.is_empty() {
            return Err(CodePalError::Other(anyhow::anyhow!("question is empty")));
        }

        let handle = self.index(false).await?;
        let tools = ToolSet::new(ToolContext {
            repo: self.repo.clone(),
            index: handle.index.clone(),
            embedder: self.indexer.embedder().clone(),
            config: self.config.tools.clone(),
        });
        let orchestrator = Orchestrator::new(
            self.model.clone(),
            tools,
            self.config.agent.clone(),
            &self.config.llm,
        );

        let run = orchestrator.run(question, &history.turns).await;
        history.push(Turn::new(question, run.answer.clone(), run.status));

        Ok(AskResponse {
            answer: run.answer,
            transcript: run.transcript,
            status: run.status,
            history,
        })
    }
}
