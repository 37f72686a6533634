use std::{path::PathBuf, pin::Pin, sync::Arc};

use futures::{Stream, StreamExt};

use crate::transform::SizeParseError;

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    /// Zero-based position in the sequence emitted by the source.
    pub seq: u64,
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("failed to connect to database")]
    Connection(#[source] sqlx::Error),
    #[error("usage query failed")]
    Query(#[source] sqlx::Error),
    #[error("invalid used_space for {host}:{dataset}")]
    SizeParse {
        host: String,
        dataset: String,
        #[source]
        source: SizeParseError,
    },
    #[error("failed to write report {}: {message}", path.display())]
    Write { path: PathBuf, message: String },
}

impl PipelineError {
    /// The run stage that produced the error, for operator-facing messages.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connecting to the usage database",
            Self::Query(_) => "querying billable usage",
            Self::SizeParse { .. } => "converting usage records",
            Self::Write { .. } => "writing the report",
        }
    }
}

pub type EnvelopeStream<T> = Pin<Box<dyn Stream<Item = Result<Envelope<T>, PipelineError>> + Send>>;

#[async_trait::async_trait]
pub trait Source<T>: Send + Sync {
    async fn stream(&self) -> EnvelopeStream<T>;
}

#[async_trait::async_trait]
pub trait Transform<I, O>: Send + Sync {
    async fn apply(&self, input: Envelope<I>) -> Result<Envelope<O>, PipelineError>;
}

#[async_trait::async_trait]
pub trait Sink<T>: Send + Sync {
    type Output: Send;

    async fn run<S>(&self, input: S) -> Result<Self::Output, PipelineError>
    where
        S: Stream<Item = Result<Envelope<T>, PipelineError>> + Send + Unpin + 'static;
}

pub struct Pipeline<S, I, O, K> {
    pub source: S,
    pub transform: Arc<dyn Transform<I, O>>,
    pub sink: K,
}

impl<S, I, O, K> Pipeline<S, I, O, K>
where
    I: Send + 'static,
    O: Send + 'static,
    S: Source<I> + Send + Sync + 'static,
    K: Sink<O> + Send + Sync + 'static,
{
    pub async fn run(self) -> Result<K::Output, PipelineError> {
        let input = self.source.stream().await;

        let transform = self.transform.clone();
        let stream: EnvelopeStream<O> = Box::pin(input.then(move |item| {
            let t = transform.clone();
            async move {
                match item {
                    Ok(env) => t.apply(env).await,
                    Err(e) => Err(e),
                }
            }
        }));

        self.sink.run(stream).await
    }
}
