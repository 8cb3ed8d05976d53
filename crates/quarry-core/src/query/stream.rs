//! Pull-based execution streams.
//!
//! An [`ExecutionStream`] is a lazy, single-pass sequence of rows. Nothing
//! is computed until the consumer pulls; combinators wrap a stream into a
//! new one without buffering. Closing a stream releases its upstream
//! resources exactly once, and dropping an open stream closes it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::context::CommandContext;
use super::row::ResultRow;
use crate::error::Result;

/// Producer behind a stream.
pub trait RowSource {
    /// Produce the next row, or `None` when exhausted.
    fn pull(&mut self) -> Result<Option<ResultRow>>;

    /// Release resources. Called at most once.
    fn close(&mut self) {}
}

/// A lazy, single-pass sequence of rows.
pub struct ExecutionStream<'a> {
    source: Box<dyn RowSource + 'a>,
    peeked: Option<ResultRow>,
    closed: bool,
}

impl std::fmt::Debug for ExecutionStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionStream")
            .field("peeked", &self.peeked.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}

impl<'a> ExecutionStream<'a> {
    /// Wrap a row source.
    pub fn new(source: impl RowSource + 'a) -> Self {
        Self {
            source: Box::new(source),
            peeked: None,
            closed: false,
        }
    }

    /// A stream with no rows.
    pub fn empty() -> Self {
        Self::new(EmptySource)
    }

    /// A stream with a single row.
    pub fn once(row: ResultRow) -> Self {
        Self::from_rows(vec![row])
    }

    /// A stream over owned rows.
    pub fn from_rows(rows: Vec<ResultRow>) -> Self {
        Self::from_iterator(rows)
    }

    /// A stream over an iterator of rows.
    pub fn from_iterator<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = ResultRow>,
        I::IntoIter: 'a,
    {
        Self::new(IterSource(rows.into_iter()))
    }

    /// A stream over an iterator of fallible rows.
    pub fn from_results<I>(rows: I) -> Self
    where
        I: Iterator<Item = Result<ResultRow>> + 'a,
    {
        Self::new(ResultIterSource(rows))
    }

    /// A stream driven by a closure.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnMut() -> Result<Option<ResultRow>> + 'a,
    {
        Self::new(FnSource(f))
    }

    /// A stream whose construction is postponed until the first pull.
    ///
    /// Blocking operators use this so that starting a plan stays cheap.
    pub fn deferred<F>(init: F) -> Self
    where
        F: FnOnce() -> Result<ExecutionStream<'a>> + 'a,
    {
        Self::new(DeferredSource {
            init: Some(init),
            inner: None,
        })
    }

    /// Concatenate streams. The next stream is only opened once the
    /// previous one is exhausted and closed.
    pub fn sequence<I>(streams: I) -> Self
    where
        I: Iterator<Item = Result<ExecutionStream<'a>>> + 'a,
    {
        Self::new(SequenceSource {
            streams,
            current: None,
        })
    }

    /// Whether another row is available.
    pub fn has_next(&mut self) -> Result<bool> {
        if self.peeked.is_none() && !self.closed {
            self.peeked = self.source.pull()?;
        }
        Ok(self.peeked.is_some())
    }

    /// Pull the next row.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<ResultRow>> {
        if let Some(row) = self.peeked.take() {
            return Ok(Some(row));
        }
        if self.closed {
            return Ok(None);
        }
        self.source.pull()
    }

    /// Close the stream and its upstream. Idempotent.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.peeked = None;
            self.source.close();
        }
    }

    /// Whether the stream was closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Transform every row.
    pub fn map<F>(self, f: F) -> Self
    where
        F: FnMut(ResultRow) -> Result<ResultRow> + 'a,
    {
        Self::new(MapSource { inner: self, f })
    }

    /// Keep rows matching a predicate.
    pub fn filter<F>(self, f: F) -> Self
    where
        F: FnMut(&ResultRow) -> Result<bool> + 'a,
    {
        Self::new(FilterSource { inner: self, f })
    }

    /// Replace every row with a stream of rows.
    pub fn flat_map<F>(self, f: F) -> Self
    where
        F: FnMut(ResultRow) -> Result<ExecutionStream<'a>> + 'a,
    {
        Self::new(FlatMapSource {
            inner: self,
            f,
            current: None,
        })
    }

    /// Drop the first `n` rows.
    pub fn skip(self, n: usize) -> Self {
        Self::new(SkipSource {
            inner: self,
            remaining: n,
        })
    }

    /// Stop after `n` rows.
    pub fn limit(self, n: usize) -> Self {
        Self::new(LimitSource {
            inner: self,
            remaining: n,
        })
    }

    /// Check the interrupt token and the deadline before every pull.
    ///
    /// An expired deadline with the RETURN policy ends the stream; with the
    /// EXCEPTION policy it fails the pull.
    pub fn interruptible(self, ctx: &'a CommandContext) -> Self {
        Self::new(InterruptSource { inner: self, ctx })
    }

    /// Run a hook after the stream is closed.
    pub fn on_close<F>(self, hook: F) -> Self
    where
        F: FnOnce() + 'a,
    {
        Self::new(OnCloseSource {
            inner: self,
            hook: Some(hook),
        })
    }

    /// Add the time spent in every pull to `cost` (nanoseconds).
    pub fn profiled(self, cost: Arc<AtomicU64>) -> Self {
        Self::new(ProfiledSource { inner: self, cost })
    }

    /// Drain the stream into a vector and close it.
    pub fn collect_rows(mut self) -> Result<Vec<ResultRow>> {
        let mut rows = Vec::new();
        let outcome = loop {
            match self.next() {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => break Ok(rows),
                Err(e) => break Err(e),
            }
        };
        self.close();
        outcome
    }
}

impl Drop for ExecutionStream<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

struct EmptySource;

impl RowSource for EmptySource {
    fn pull(&mut self) -> Result<Option<ResultRow>> {
        Ok(None)
    }
}

struct IterSource<I>(I);

impl<I: Iterator<Item = ResultRow>> RowSource for IterSource<I> {
    fn pull(&mut self) -> Result<Option<ResultRow>> {
        Ok(self.0.next())
    }
}

struct ResultIterSource<I>(I);

impl<I: Iterator<Item = Result<ResultRow>>> RowSource for ResultIterSource<I> {
    fn pull(&mut self) -> Result<Option<ResultRow>> {
        self.0.next().transpose()
    }
}

struct FnSource<F>(F);

impl<F: FnMut() -> Result<Option<ResultRow>>> RowSource for FnSource<F> {
    fn pull(&mut self) -> Result<Option<ResultRow>> {
        (self.0)()
    }
}

struct DeferredSource<'a, F> {
    init: Option<F>,
    inner: Option<ExecutionStream<'a>>,
}

impl<'a, F> RowSource for DeferredSource<'a, F>
where
    F: FnOnce() -> Result<ExecutionStream<'a>>,
{
    fn pull(&mut self) -> Result<Option<ResultRow>> {
        if let Some(init) = self.init.take() {
            self.inner = Some(init()?);
        }
        match self.inner.as_mut() {
            Some(inner) => inner.next(),
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.init = None;
        if let Some(inner) = self.inner.as_mut() {
            inner.close();
        }
    }
}

struct SequenceSource<'a, I> {
    streams: I,
    current: Option<ExecutionStream<'a>>,
}

impl<'a, I> RowSource for SequenceSource<'a, I>
where
    I: Iterator<Item = Result<ExecutionStream<'a>>>,
{
    fn pull(&mut self) -> Result<Option<ResultRow>> {
        loop {
            if let Some(current) = self.current.as_mut() {
                if let Some(row) = current.next()? {
                    return Ok(Some(row));
                }
                current.close();
                self.current = None;
            }
            match self.streams.next() {
                Some(next) => self.current = Some(next?),
                None => return Ok(None),
            }
        }
    }

    fn close(&mut self) {
        if let Some(current) = self.current.as_mut() {
            current.close();
        }
    }
}

struct MapSource<'a, F> {
    inner: ExecutionStream<'a>,
    f: F,
}

impl<F: FnMut(ResultRow) -> Result<ResultRow>> RowSource for MapSource<'_, F> {
    fn pull(&mut self) -> Result<Option<ResultRow>> {
        match self.inner.next()? {
            Some(row) => (self.f)(row).map(Some),
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

struct FilterSource<'a, F> {
    inner: ExecutionStream<'a>,
    f: F,
}

impl<F: FnMut(&ResultRow) -> Result<bool>> RowSource for FilterSource<'_, F> {
    fn pull(&mut self) -> Result<Option<ResultRow>> {
        while let Some(row) = self.inner.next()? {
            if (self.f)(&row)? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

struct FlatMapSource<'a, F> {
    inner: ExecutionStream<'a>,
    f: F,
    current: Option<ExecutionStream<'a>>,
}

impl<'a, F> RowSource for FlatMapSource<'a, F>
where
    F: FnMut(ResultRow) -> Result<ExecutionStream<'a>>,
{
    fn pull(&mut self) -> Result<Option<ResultRow>> {
        loop {
            if let Some(current) = self.current.as_mut() {
                if let Some(row) = current.next()? {
                    return Ok(Some(row));
                }
                current.close();
                self.current = None;
            }
            match self.inner.next()? {
                Some(row) => self.current = Some((self.f)(row)?),
                None => return Ok(None),
            }
        }
    }

    fn close(&mut self) {
        if let Some(current) = self.current.as_mut() {
            current.close();
        }
        self.inner.close();
    }
}

struct SkipSource<'a> {
    inner: ExecutionStream<'a>,
    remaining: usize,
}

impl RowSource for SkipSource<'_> {
    fn pull(&mut self) -> Result<Option<ResultRow>> {
        while self.remaining > 0 {
            if self.inner.next()?.is_none() {
                self.remaining = 0;
                return Ok(None);
            }
            self.remaining -= 1;
        }
        self.inner.next()
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

struct LimitSource<'a> {
    inner: ExecutionStream<'a>,
    remaining: usize,
}

impl RowSource for LimitSource<'_> {
    fn pull(&mut self) -> Result<Option<ResultRow>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        self.inner.next()
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

struct InterruptSource<'a> {
    inner: ExecutionStream<'a>,
    ctx: &'a CommandContext,
}

impl RowSource for InterruptSource<'_> {
    fn pull(&mut self) -> Result<Option<ResultRow>> {
        self.ctx.check_interrupt()?;
        if self.ctx.check_timeout()? {
            return Ok(None);
        }
        self.inner.next()
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

struct OnCloseSource<'a, F> {
    inner: ExecutionStream<'a>,
    hook: Option<F>,
}

impl<F: FnOnce()> RowSource for OnCloseSource<'_, F> {
    fn pull(&mut self) -> Result<Option<ResultRow>> {
        self.inner.next()
    }

    fn close(&mut self) {
        self.inner.close();
        if let Some(hook) = self.hook.take() {
            hook();
        }
    }
}

struct ProfiledSource<'a> {
    inner: ExecutionStream<'a>,
    cost: Arc<AtomicU64>,
}

impl RowSource for ProfiledSource<'_> {
    fn pull(&mut self) -> Result<Option<ResultRow>> {
        let begin = Instant::now();
        let row = self.inner.next();
        self.cost
            .fetch_add(begin.elapsed().as_nanos() as u64, Ordering::Relaxed);
        row
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::error::Error;

    fn numbers(n: i64) -> ExecutionStream<'static> {
        ExecutionStream::from_iterator((0..n).map(|i| ResultRow::new().with_property("n", i)))
    }

    fn values(stream: ExecutionStream<'_>) -> Vec<i64> {
        stream
            .collect_rows()
            .unwrap()
            .iter()
            .map(|r| r.get("n").and_then(|v| v.as_i64()).unwrap())
            .collect()
    }

    #[test]
    fn test_has_next_does_not_consume() {
        let mut stream = numbers(2);
        assert!(stream.has_next().unwrap());
        assert!(stream.has_next().unwrap());
        assert!(stream.next().unwrap().is_some());
        assert!(stream.next().unwrap().is_some());
        assert!(!stream.has_next().unwrap());
    }

    #[test]
    fn test_combinators() {
        let stream = numbers(10)
            .filter(|r| Ok(r.get("n").and_then(|v| v.as_i64()).unwrap() % 2 == 0))
            .skip(1)
            .limit(3);
        assert_eq!(values(stream), vec![2, 4, 6]);
    }

    #[test]
    fn test_flat_map() {
        let stream = numbers(3).flat_map(|row| Ok(ExecutionStream::from_rows(vec![row.clone(), row])));
        assert_eq!(values(stream), vec![0, 0, 1, 1, 2, 2]);
    }

    #[test]
    fn test_sequence_opens_lazily() {
        let opened = Rc::new(Cell::new(0));
        let counter = opened.clone();
        let mut stream = ExecutionStream::sequence((0..3).map(move |_| {
            counter.set(counter.get() + 1);
            Ok(numbers(1))
        }));
        assert_eq!(opened.get(), 0);
        stream.next().unwrap();
        assert_eq!(opened.get(), 1);
        assert_eq!(values(stream).len(), 2);
        assert_eq!(opened.get(), 3);
    }

    #[test]
    fn test_close_runs_hook_once() {
        let closed = Rc::new(Cell::new(0));
        let counter = closed.clone();
        let mut stream = numbers(5).on_close(move || counter.set(counter.get() + 1));
        stream.next().unwrap();
        stream.close();
        stream.close();
        drop(stream);
        assert_eq!(closed.get(), 1);
    }

    #[test]
    fn test_errors_pass_through_profiling() {
        let cost = Arc::new(AtomicU64::new(0));
        let mut stream =
            ExecutionStream::from_fn(|| Err(Error::InvalidInput("boom".into()))).profiled(cost);
        assert!(matches!(stream.next(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_deferred_runs_on_first_pull() {
        let started = Rc::new(Cell::new(false));
        let flag = started.clone();
        let mut stream = ExecutionStream::deferred(move || {
            flag.set(true);
            Ok(numbers(1))
        });
        assert!(!started.get());
        assert!(stream.next().unwrap().is_some());
        assert!(started.get());
    }
}
