//! A scripted, recording [`Executor`] for tests.
//!
//! Every call is recorded as `(sql, params)`. Responses are chosen by the
//! first rule whose needle occurs in the SQL text: one-shot rules are tried
//! first (in the order they were added), then persistent rules. A call no
//! rule matches gets no rows and zero rows affected.

use crate::error::{Error, QueryError, QueryErrorKind};
use crate::executor::Executor;
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
enum Reply {
    Rows(Vec<Row>),
    Fail(String),
}

#[derive(Debug, Clone)]
struct Rule {
    needle: String,
    reply: Reply,
}

#[derive(Debug, Default)]
struct State {
    executed: Vec<(String, Vec<Value>)>,
    once: Vec<Rule>,
    always: Vec<Rule>,
}

impl State {
    fn reply_for(&mut self, sql: &str) -> Option<Reply> {
        if let Some(pos) = self.once.iter().position(|r| sql.contains(&r.needle)) {
            return Some(self.once.remove(pos).reply);
        }
        self.always
            .iter()
            .find(|r| sql.contains(&r.needle))
            .map(|r| r.reply.clone())
    }
}

/// Recording executor with needle-matched canned replies.
#[derive(Debug, Clone, Default)]
pub struct RecordingExecutor {
    state: Arc<Mutex<State>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer every statement containing `needle` with `rows`.
    pub fn on(&self, needle: impl Into<String>, rows: Vec<Row>) -> &Self {
        self.lock().always.push(Rule {
            needle: needle.into(),
            reply: Reply::Rows(rows),
        });
        self
    }

    /// Answer the next statement containing `needle` with `rows`.
    pub fn on_once(&self, needle: impl Into<String>, rows: Vec<Row>) -> &Self {
        self.lock().once.push(Rule {
            needle: needle.into(),
            reply: Reply::Rows(rows),
        });
        self
    }

    /// Answer a `COUNT(*)` statement containing `needle` with `count`.
    pub fn on_count(&self, needle: impl Into<String>, count: i64) -> &Self {
        self.on_once(needle, vec![Row::from_pairs([("count", count)])])
    }

    /// Fail every statement containing `needle` with a database error.
    pub fn fail_on(&self, needle: impl Into<String>, message: impl Into<String>) -> &Self {
        self.lock().always.push(Rule {
            needle: needle.into(),
            reply: Reply::Fail(message.into()),
        });
        self
    }

    /// Every `(sql, params)` pair run so far.
    pub fn executed(&self) -> Vec<(String, Vec<Value>)> {
        self.lock().executed.clone()
    }

    /// SQL text of every statement run so far.
    pub fn statements(&self) -> Vec<String> {
        self.lock().executed.iter().map(|(sql, _)| sql.clone()).collect()
    }

    pub fn call_count(&self) -> usize {
        self.lock().executed.len()
    }

    fn run(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, Error> {
        let mut state = self.lock();
        state.executed.push((sql.to_string(), params.to_vec()));
        match state.reply_for(sql) {
            Some(Reply::Rows(rows)) => Ok(rows),
            Some(Reply::Fail(message)) => Err(Error::Query(
                QueryError::new(QueryErrorKind::Database, message).with_sql(sql),
            )),
            None => Ok(Vec::new()),
        }
    }
}

fn into_outcome<T>(result: Result<T, Error>) -> Outcome<T, Error> {
    match result {
        Ok(v) => Outcome::Ok(v),
        Err(e) => Outcome::Err(e),
    }
}

impl Executor for RecordingExecutor {
    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let result = self.run(sql, params);
        async move { into_outcome(result) }
    }

    fn query_one(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        let result = self.run(sql, params).map(|rows| rows.into_iter().next());
        async move { into_outcome(result) }
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let result = self.run(sql, params).map(|rows| rows.len() as u64);
        async move { into_outcome(result) }
    }
}
