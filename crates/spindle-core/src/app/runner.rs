//! Runner - 呼び出し元に見せる Task API
//!
//! # リクエストの形
//! - `Request::Single(payload)` → `Response::Single(outcome)`
//! - `Request::Batch(name → payload)` → `Response::Batch(name → outcome)`
//!
//! batch の各エントリは独立に確定します。1 つが失敗しても他は止まりません。
//! `stream` は同じ batch を「終わった順」に流します。

use std::collections::BTreeMap;

use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use serde_json::Value;
use tracing::warn;

use super::builder::RunnerBuilder;
use crate::domain::{Outcome, Payload, TaskError};
use crate::pool::{PoolStats, WorkerPool};

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Single(Payload),
    Batch(BTreeMap<String, Payload>),
}

impl Request {
    pub fn batch<I, K, P>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, P)>,
        K: Into<String>,
        P: Into<Payload>,
    {
        Request::Batch(
            entries
                .into_iter()
                .map(|(name, payload)| (name.into(), payload.into()))
                .collect(),
        )
    }
}

impl From<Payload> for Request {
    fn from(payload: Payload) -> Self {
        Request::Single(payload)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Single(Outcome),
    Batch(BTreeMap<String, Outcome>),
}

impl Response {
    pub fn into_single(self) -> Option<Outcome> {
        match self {
            Response::Single(outcome) => Some(outcome),
            Response::Batch(_) => None,
        }
    }

    pub fn into_batch(self) -> Option<BTreeMap<String, Outcome>> {
        match self {
            Response::Batch(outcomes) => Some(outcomes),
            Response::Single(_) => None,
        }
    }
}

pub struct Runner {
    pool: WorkerPool,
}

impl Runner {
    pub fn builder() -> RunnerBuilder {
        RunnerBuilder::new()
    }

    pub(crate) fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }

    /// Runs a request to completion. Never fails as a whole: every task's
    /// failure is reported in its own outcome.
    ///
    /// `options` apply to payloads that carry none.
    pub async fn run(&self, request: Request, options: Option<Value>) -> Response {
        match request {
            Request::Single(payload) => {
                let (_, outcome) = self.submit(None, payload, options.as_ref()).await;
                Response::Single(outcome)
            }
            Request::Batch(batch) => Response::Batch(self.stream(batch, options).collect().await),
        }
    }

    pub async fn run_one(&self, payload: impl Into<Payload>) -> Outcome {
        let (_, outcome) = self.submit(None, payload.into(), None).await;
        outcome
    }

    pub async fn run_batch(&self, batch: BTreeMap<String, Payload>) -> BTreeMap<String, Outcome> {
        self.stream(batch, None).collect().await
    }

    /// Submits every entry now and yields `(name, outcome)` as each one settles.
    pub fn stream(
        &self,
        batch: BTreeMap<String, Payload>,
        options: Option<Value>,
    ) -> impl Stream<Item = (String, Outcome)> + Send + use<> {
        batch
            .into_iter()
            .map(|(name, payload)| self.submit(Some(name), payload, options.as_ref()))
            .collect::<FuturesUnordered<_>>()
    }

    fn submit(
        &self,
        name: Option<String>,
        mut payload: Payload,
        options: Option<&Value>,
    ) -> BoxFuture<'static, (String, Outcome)> {
        if payload.options.is_none() {
            payload.options = options.cloned();
        }

        match self.pool.submit(payload, name.clone()) {
            Ok(handle) => async move {
                let name = handle.name().to_string();
                (name, handle.await)
            }
            .boxed(),
            Err(e) => {
                warn!(error = %e, "task was not submitted");
                future::ready((name.unwrap_or_default(), Err(TaskError::from(e)))).boxed()
            }
        }
    }

    /// Idempotent. Outstanding tasks settle with `TaskError::Terminated`.
    pub fn terminate(&self) {
        self.pool.terminate();
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}
