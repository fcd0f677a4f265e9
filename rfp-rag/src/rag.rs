//! Question answering: retrieve context, then generate an answer from it.

use std::sync::Arc;

use tracing::info;

use crate::document::RetrievedDocument;
use crate::error::Result;
use crate::generation::Generator;
use crate::retriever::Retriever;

/// Composes a [`Retriever`] and a [`Generator`] into a question-answering
/// service.
#[derive(Clone)]
pub struct RagService {
    retriever: Retriever,
    generator: Arc<dyn Generator>,
}

impl RagService {
    pub fn new(retriever: Retriever, generator: Arc<dyn Generator>) -> Self {
        Self { retriever, generator }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn generator(&self) -> &Arc<dyn Generator> {
        &self.generator
    }

    /// Answer `query` and return the answer along with the documents it was
    /// generated from.
    ///
    /// When `documents` is supplied they are used as-is and no search is
    /// made; otherwise the top `k` (or the retriever's default) are fetched.
    pub async fn answer_query(
        &self,
        query: &str,
        k: Option<usize>,
        documents: Option<Vec<RetrievedDocument>>,
    ) -> Result<(String, Vec<RetrievedDocument>)> {
        let documents = match documents {
            Some(documents) => documents,
            None => self.retriever.search(query, k, None).await?,
        };
        let answer = self.generator.generate(query, &documents).await?;
        info!(generator = self.generator.name(), documents = documents.len(), "answered query");
        Ok((answer, documents))
    }
}
