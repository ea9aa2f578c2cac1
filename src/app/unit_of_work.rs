//! Unit of work: one storage transaction plus one saga, run as a single
//! atomic operation.
//!
//! # Example
//!
//! ```ignore
//! let users = Arc::clone(&self.users);
//! let user = runner
//!     .run("Register", move |uow| {
//!         Box::pin(async move {
//!             let user = User::new(account);
//!             users.create(Some(uow.session()), &user).await?;
//!             Ok(user)
//!         })
//!     })
//!     .await?;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{Instrument, info_span, warn};

use crate::domain::{AppError, SessionFactory, TransactionError, TransactionalSession};

use super::saga::{Saga, Step};

/// Future returned by a unit-of-work callback. Borrows the context for `'c`.
pub type UowFuture<'c, T> = Pin<Box<dyn Future<Output = Result<T, AppError>> + Send + 'c>>;

/// Configuration for the unit-of-work runner
#[derive(Debug, Clone)]
pub struct UnitOfWorkConfig {
    /// Upper bound on the callback. Elapsing counts as a callback failure.
    pub timeout: Duration,
}

impl Default for UnitOfWorkConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Everything a callback needs to take part in the unit of work: the
/// transactional session for repository calls and the saga for
/// compensations.
pub struct UowContext {
    name: String,
    session: Box<dyn TransactionalSession>,
    saga: Saga,
}

impl UowContext {
    pub fn new(name: impl Into<String>, session: Box<dyn TransactionalSession>) -> Self {
        let name = name.into();
        Self {
            saga: Saga::new(name.clone()),
            name,
            session,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Session to pass to repository writes so they join the transaction.
    pub fn session(&mut self) -> &mut dyn TransactionalSession {
        self.session.as_mut()
    }

    pub fn add_step(&mut self, step: Step) {
        self.saga.add_step(step);
    }

    /// Registers an undo action to run if the unit of work fails.
    pub fn add_compensation<F, Fut>(&mut self, name: impl Into<String>, compensate: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        self.saga.add_step(Step::new(name, compensate));
    }

    pub fn compensation_count(&self) -> usize {
        self.saga.len()
    }
}

/// Runs callbacks inside a unit of work.
///
/// Each call opens its own session, so concurrent calls never share
/// transaction or saga state.
#[derive(Clone)]
pub struct TransactionRunner {
    sessions: Arc<dyn SessionFactory>,
    config: UnitOfWorkConfig,
}

impl TransactionRunner {
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionFactory>, config: UnitOfWorkConfig) -> Self {
        Self { sessions, config }
    }

    pub fn sessions(&self) -> &Arc<dyn SessionFactory> {
        &self.sessions
    }

    /// Executes `f` exactly once inside a storage transaction.
    ///
    /// - Start failure: returned as-is, nothing to compensate.
    /// - Callback failure: the transaction is aborted, then the saga. A
    ///   compensation failure is returned as [`AppError::Compensation`],
    ///   otherwise the callback's error.
    /// - Commit failure: transaction and saga are both aborted. If either
    ///   of those fails, [`AppError::Transaction`] names both; otherwise the
    ///   commit error is returned.
    ///
    /// The session is ended on every path once it has been opened.
    ///
    /// The work runs on its own task. Dropping the returned future (a
    /// disconnected client, an outer timeout) does not cancel it: the
    /// unit of work still commits or compensates, and ends its session.
    pub async fn run<T, F>(&self, name: &str, f: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: for<'c> FnOnce(&'c mut UowContext) -> UowFuture<'c, T> + Send + 'static,
    {
        let runner = self.clone();
        let name = name.to_string();
        let span = info_span!("unit_of_work", name = %name);
        let task = tokio::spawn(async move { runner.run_to_completion(&name, f).await }.instrument(span));

        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(AppError::Internal(format!("unit of work task failed: {e}"))),
        }
    }

    async fn run_to_completion<T, F>(&self, name: &str, f: F) -> Result<T, AppError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut UowContext) -> UowFuture<'c, T> + Send,
    {
        let session = self.sessions.open().await?;
        let mut ctx = UowContext::new(name, session);

        let result = self.execute(&mut ctx, f).await;
        ctx.session.end().await;

        match &result {
            Ok(_) => metrics::counter!("uow_commits_total", "name" => name.to_string()).increment(1),
            Err(_) => metrics::counter!("uow_aborts_total", "name" => name.to_string()).increment(1),
        }
        result
    }

    async fn execute<T, F>(&self, ctx: &mut UowContext, f: F) -> Result<T, AppError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut UowContext) -> UowFuture<'c, T> + Send,
    {
        ctx.session.start().await?;

        let timed = tokio::time::timeout(self.config.timeout, f(ctx)).await;
        let outcome = match timed {
            Ok(outcome) => outcome,
            Err(_) => Err(AppError::Timeout(format!(
                "unit of work '{}' exceeded {:?}",
                ctx.name, self.config.timeout
            ))),
        };

        let value = match outcome {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, compensations = ctx.saga.len(), "Unit of work callback failed");
                if let Err(abort_err) = ctx.session.abort().await {
                    warn!(error = %abort_err, "Storage abort after callback failure failed");
                }
                ctx.saga.abort().await?;
                return Err(err);
            }
        };

        if let Err(commit_err) = ctx.session.commit().await {
            warn!(error = %commit_err, "Commit failed, aborting transaction and saga");
            let session = ctx.session.abort().await.err().map(Box::new);
            let saga = ctx.saga.abort().await.err();
            if session.is_some() || saga.is_some() {
                return Err(TransactionError { session, saga }.into());
            }
            return Err(commit_err);
        }

        Ok(value)
    }
}
