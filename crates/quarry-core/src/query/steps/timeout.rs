//! Statement timeout.

use quarry_sql::{Timeout, TimeoutPolicy};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::query::context::CommandContext;
use crate::query::step::{step_common, ExecutionStep, StepBase};
use crate::query::stream::ExecutionStream;

/// Terminal step enforcing a wall-clock budget.
///
/// The deadline starts when the step starts, before anything upstream runs,
/// and is lifted again when the stream closes. Once it passes, RETURN ends
/// the stream with the rows produced so far and EXCEPTION closes the
/// upstream and fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutStep {
    timeout: Timeout,
    #[serde(skip)]
    base: StepBase,
}

impl TimeoutStep {
    /// Enforce `millis` with `policy`.
    pub fn new(millis: u64, policy: TimeoutPolicy) -> Self {
        Self {
            timeout: Timeout { millis, policy },
            base: StepBase::default(),
        }
    }
}

impl ExecutionStep for TimeoutStep {
    step_common!("TimeoutStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        let previous = ctx.set_deadline(self.timeout.millis, self.timeout.policy);
        let mut upstream = match self.base.start_prev(ctx, "TimeoutStep") {
            Ok(upstream) => upstream,
            Err(e) => {
                ctx.restore_deadline(previous);
                return Err(e);
            }
        };
        let mut expired = false;
        let stream = ExecutionStream::from_fn(move || {
            if expired {
                return Ok(None);
            }
            match ctx.check_timeout() {
                Ok(false) => upstream.next(),
                Ok(true) => {
                    debug!("deadline passed, returning partial result");
                    expired = true;
                    upstream.close();
                    Ok(None)
                }
                Err(e) => {
                    expired = true;
                    upstream.close();
                    Err(e)
                }
            }
        });
        Ok(stream.on_close(move || ctx.restore_deadline(previous)))
    }

    fn can_be_cached(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        let policy = match self.timeout.policy {
            TimeoutPolicy::Return => "RETURN",
            TimeoutPolicy::Exception => "EXCEPTION",
        };
        format!("TIMEOUT ({}ms) {policy}", self.timeout.millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::testing::{ctx, map, people_db, plan_over_rows, rows_ctx};
    use quarry_sql::{SelectStatement, Value};
    use std::time::Duration;

    fn rows() -> Vec<Value> {
        (0..3).map(|i| map(&[("n", Value::Int(i))])).collect()
    }

    #[test]
    fn test_generous_timeout_is_transparent() {
        let ctx = rows_ctx(rows());
        let mut plan = plan_over_rows(vec![Box::new(TimeoutStep::new(60_000, TimeoutPolicy::Exception))]);
        assert_eq!(plan.fetch_all(&ctx).unwrap().len(), 3);
    }

    #[test]
    fn test_expired_return_ends_stream() {
        let ctx = rows_ctx(rows());
        let mut plan = plan_over_rows(vec![Box::new(TimeoutStep::new(0, TimeoutPolicy::Return))]);
        assert!(plan.fetch_all(&ctx).unwrap().is_empty());
    }

    #[test]
    fn test_expired_exception_fails() {
        let ctx = rows_ctx(rows());
        let mut plan = plan_over_rows(vec![Box::new(TimeoutStep::new(0, TimeoutPolicy::Exception))]);
        assert!(matches!(
            plan.fetch_all(&ctx),
            Err(Error::Timeout { millis: 0 })
        ));
    }

    #[test]
    fn test_return_keeps_rows_produced_before_deadline() {
        let ctx = rows_ctx(rows());
        let mut plan = plan_over_rows(vec![Box::new(TimeoutStep::new(20, TimeoutPolicy::Return))]);
        let mut stream = plan.start(&ctx).unwrap();
        assert!(stream.next().unwrap().is_some());
        std::thread::sleep(Duration::from_millis(40));
        assert!(stream.next().unwrap().is_none());
    }

    #[test]
    fn test_deadline_does_not_outlive_its_statement() {
        let ctx = ctx(people_db());
        let timed = SelectStatement::from_class("Person").timeout(1, TimeoutPolicy::Return);
        ctx.execute(&timed).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        assert!(ctx.deadline().is_none());
        let untimed = SelectStatement::from_class("Person");
        assert_eq!(ctx.execute(&untimed).unwrap().len(), 6);
    }

    #[test]
    fn test_reset_plan_gets_a_fresh_budget() {
        let ctx = rows_ctx(rows());
        let mut plan = plan_over_rows(vec![Box::new(TimeoutStep::new(20, TimeoutPolicy::Exception))]);
        assert_eq!(plan.fetch_all(&ctx).unwrap().len(), 3);
        std::thread::sleep(Duration::from_millis(40));
        plan.reset();
        assert_eq!(plan.fetch_all(&ctx).unwrap().len(), 3);
    }

    #[test]
    fn test_exception_signals_every_step_before_failing() {
        let ctx = rows_ctx(rows());
        let mut plan = plan_over_rows(vec![Box::new(TimeoutStep::new(0, TimeoutPolicy::Exception))]);
        assert!(plan.fetch_all(&ctx).is_err());
        assert!(plan.steps().iter().all(|step| step.base().is_timed_out()));
        assert!(plan.pretty_print(0, 2).contains("[timed out]"));

        plan.reset();
        assert!(!plan.steps()[0].base().is_timed_out());
    }

    #[test]
    fn test_return_policy_sends_no_signal() {
        let ctx = rows_ctx(rows());
        let mut plan = plan_over_rows(vec![Box::new(TimeoutStep::new(0, TimeoutPolicy::Return))]);
        assert!(plan.fetch_all(&ctx).unwrap().is_empty());
        assert!(!plan.steps()[0].base().is_timed_out());
    }
}
