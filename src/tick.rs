//! Tick protocol
//!
//! A tick asks the page whether any animation callback was due and runs it.
//! The controller sends a [`TickRequest`]; the script side evaluates the
//! scheduler shim's `tick` in every live script context and answers with one
//! [`TickResponse`] whose flag is the OR of the individual results.
//!
//! The scheduler shim ([`SCHEDULER_SHIM`]) replaces `requestAnimationFrame`
//! and `cancelAnimationFrame` so that callbacks only run when ticked.

use crate::{MessageValue, ProcessMessage, Result};

/// Name of the controller → script side message
pub const TICK_REQUEST: &str = "WEBFILTER_TICK_REQUEST";
/// Name of the script side → controller message
pub const TICK_RESPONSE: &str = "WEBFILTER_TICK_RESPONSE";

/// Global under which the shim exposes its scheduler object
pub const SHIM_GLOBAL: &str = "__WEBFILTER__";

/// Installed once in every script context when it is created.
///
/// Ids come from a per-context counter and are never reused. `tick` swaps in
/// a fresh registry before running the snapshot, so callbacks that register
/// again land in the next tick.
pub const SCHEDULER_SHIM: &str = r#"
(function () {
  const scheduler = {
    frames: new Map(),
    lastId: 0,
    tick: function (ts) {
      if (this.frames.size === 0) {
        return false;
      }
      const due = this.frames;
      this.frames = new Map();
      due.forEach(function (callback) {
        callback(ts);
      });
      return true;
    },
  };
  scheduler.tick = scheduler.tick.bind(scheduler);

  globalThis.requestAnimationFrame = function (callback) {
    const id = ++scheduler.lastId;
    scheduler.frames.set(id, callback);
    return id;
  };
  globalThis.cancelAnimationFrame = function (id) {
    scheduler.frames.delete(id);
  };
  globalThis.__WEBFILTER__ = scheduler;
})();
"#;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickRequest {
    pub timestamp_ms: f64,
}

impl TickRequest {
    pub fn to_message(self) -> ProcessMessage {
        ProcessMessage::new(TICK_REQUEST).with_arg(MessageValue::Double(self.timestamp_ms))
    }

    pub fn from_message(message: &ProcessMessage) -> Option<Self> {
        if message.name != TICK_REQUEST {
            return None;
        }
        message
            .double_arg(0)
            .map(|timestamp_ms| Self { timestamp_ms })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickResponse {
    pub has_pending_work: bool,
}

impl TickResponse {
    pub fn to_message(self) -> ProcessMessage {
        ProcessMessage::new(TICK_RESPONSE).with_arg(MessageValue::Bool(self.has_pending_work))
    }

    pub fn from_message(message: &ProcessMessage) -> Option<Self> {
        if message.name != TICK_RESPONSE {
            return None;
        }
        message
            .bool_arg(0)
            .map(|has_pending_work| Self { has_pending_work })
    }
}

/// Script expression running one tick at `timestamp_ms`.
pub fn tick_script(timestamp_ms: f64) -> String {
    format!("globalThis.{}.tick({});", SHIM_GLOBAL, js_number(timestamp_ms))
}

fn js_number(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "Infinity".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        format!("{:?}", v)
    }
}

/// Outcome of evaluating a script
///
/// `value` is the string conversion of the completion value. `is_error`
/// indicates whether the script threw.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptResult {
    pub value: String,
    pub is_error: bool,
}

/// A live script execution context (one per frame document)
pub trait ScriptContext {
    /// Identity used to match release notifications
    fn id(&self) -> u64;

    /// Evaluate `code` in this context. Thrown exceptions are reported through
    /// `ScriptResult::is_error`; `Err` means the context itself is unusable.
    fn eval(&mut self, code: &str) -> Result<ScriptResult>;
}

/// Script-side half of the tick protocol: tracks live contexts and answers
/// tick requests.
pub struct TickHost<C> {
    contexts: Vec<C>,
}

impl<C: ScriptContext> Default for TickHost<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ScriptContext> TickHost<C> {
    pub fn new() -> Self {
        Self {
            contexts: Vec::new(),
        }
    }

    /// A context was created: install the scheduler shim and start tracking it.
    pub fn context_created(&mut self, mut context: C) -> Result<()> {
        let res = context.eval(SCHEDULER_SHIM)?;
        if res.is_error {
            log::warn!("scheduler shim failed in context {}: {}", context.id(), res.value);
        }
        self.contexts.push(context);
        Ok(())
    }

    /// A context was released: stop tracking it.
    pub fn context_released(&mut self, id: u64) {
        self.contexts.retain(|c| c.id() != id);
    }

    /// The browser is gone; every context with it.
    pub fn browser_destroyed(&mut self) {
        self.contexts.clear();
    }

    pub fn contexts_mut(&mut self) -> &mut [C] {
        &mut self.contexts
    }

    /// Run one tick in every context; `true` if any had pending work.
    ///
    /// Every context is ticked even once one reported work.
    pub fn tick(&mut self, timestamp_ms: f64) -> bool {
        let script = tick_script(timestamp_ms);
        let mut any = false;
        for context in &mut self.contexts {
            match context.eval(&script) {
                Ok(res) if !res.is_error => any |= res.value == "true",
                Ok(res) => log::warn!("tick threw in context {}: {}", context.id(), res.value),
                Err(e) => log::warn!("tick failed in context {}: {}", context.id(), e),
            }
        }
        any
    }

    /// Handle an inbound message. Returns the reply for tick requests and
    /// `None` for anything else.
    pub fn on_process_message(&mut self, message: &ProcessMessage) -> Option<ProcessMessage> {
        let request = TickRequest::from_message(message)?;
        let has_pending_work = self.tick(request.timestamp_ms);
        log::debug!(
            "tick at {}ms over {} context(s): pending={}",
            request.timestamp_ms,
            self.contexts.len(),
            has_pending_work
        );
        Some(TickResponse { has_pending_work }.to_message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Context whose tick answers follow a fixed script of results.
    struct FakeContext {
        id: u64,
        answers: Vec<&'static str>,
        evaluated: Vec<String>,
    }

    impl ScriptContext for FakeContext {
        fn id(&self) -> u64 {
            self.id
        }

        fn eval(&mut self, code: &str) -> Result<ScriptResult> {
            self.evaluated.push(code.to_string());
            if code == SCHEDULER_SHIM {
                return Ok(ScriptResult { value: "undefined".into(), is_error: false });
            }
            let value = if self.answers.is_empty() { "false" } else { self.answers.remove(0) };
            Ok(ScriptResult { value: value.into(), is_error: value == "throw" })
        }
    }

    fn fake(id: u64, answers: Vec<&'static str>) -> FakeContext {
        FakeContext { id, answers, evaluated: Vec::new() }
    }

    #[test]
    fn messages_round_trip_names_and_args() {
        let req = TickRequest { timestamp_ms: 16.5 }.to_message();
        assert_eq!(req.name, TICK_REQUEST);
        assert_eq!(TickRequest::from_message(&req), Some(TickRequest { timestamp_ms: 16.5 }));
        assert_eq!(TickResponse::from_message(&req), None);

        let resp = TickResponse { has_pending_work: true }.to_message();
        assert_eq!(TickResponse::from_message(&resp).map(|r| r.has_pending_work), Some(true));
    }

    #[test]
    fn tick_script_formats_timestamps() {
        assert_eq!(tick_script(0.0), "globalThis.__WEBFILTER__.tick(0.0);");
        assert_eq!(tick_script(16.0), "globalThis.__WEBFILTER__.tick(16.0);");
        assert_eq!(tick_script(f64::INFINITY), "globalThis.__WEBFILTER__.tick(Infinity);");
    }

    #[test]
    fn host_ors_results_and_ticks_every_context() {
        let mut host = TickHost::new();
        host.context_created(fake(1, vec!["true", "false"])).unwrap();
        host.context_created(fake(2, vec!["false", "false"])).unwrap();

        let reply = host.on_process_message(&TickRequest { timestamp_ms: 0.0 }.to_message());
        assert_eq!(reply, Some(TickResponse { has_pending_work: true }.to_message()));
        assert!(!host.tick(40.0));

        for ctx in host.contexts_mut() {
            assert_eq!(ctx.evaluated.len(), 3, "shim + two ticks");
            assert_eq!(ctx.evaluated[0], SCHEDULER_SHIM);
        }
    }

    #[test]
    fn throwing_context_counts_as_idle() {
        let mut host = TickHost::new();
        host.context_created(fake(1, vec!["throw"])).unwrap();
        assert!(!host.tick(0.0));
    }

    #[test]
    fn released_and_destroyed_contexts_stop_ticking() {
        let mut host = TickHost::new();
        host.context_created(fake(1, vec!["true"])).unwrap();
        host.context_created(fake(2, vec!["true", "true"])).unwrap();
        host.context_released(1);
        assert_eq!(host.contexts_mut().len(), 1);
        assert!(host.tick(0.0));

        host.browser_destroyed();
        assert!(!host.tick(0.0));
    }

    #[test]
    fn unrelated_messages_are_not_handled() {
        let mut host: TickHost<FakeContext> = TickHost::new();
        assert_eq!(host.on_process_message(&ProcessMessage::new("other")), None);
    }

    #[cfg(feature = "builtin")]
    mod shim {
        use super::super::*;
        use crate::script::BoaContext;
        use crate::SessionSettings;

        fn context() -> BoaContext {
            let mut ctx = BoaContext::new(1, &SessionSettings::default());
            ctx.eval(SCHEDULER_SHIM).unwrap();
            ctx.eval("var calls = [];").unwrap();
            ctx
        }

        fn eval(ctx: &mut BoaContext, code: &str) -> String {
            let res = ctx.eval(code).unwrap();
            assert!(!res.is_error, "{}", res.value);
            res.value
        }

        #[test]
        fn empty_registry_ticks_false() {
            let mut ctx = context();
            assert_eq!(eval(&mut ctx, &tick_script(5.0)), "false");
            assert_eq!(eval(&mut ctx, "__WEBFILTER__.lastId"), "0");
            assert_eq!(eval(&mut ctx, "__WEBFILTER__.frames.size"), "0");
        }

        #[test]
        fn registered_callback_fires_once_with_timestamp() {
            let mut ctx = context();
            eval(&mut ctx, "requestAnimationFrame(function (ts) { calls.push(ts); });");
            assert_eq!(eval(&mut ctx, &tick_script(12.5)), "true");
            assert_eq!(eval(&mut ctx, "calls.join(',')"), "12.5");
            assert_eq!(eval(&mut ctx, &tick_script(29.0)), "false");
            assert_eq!(eval(&mut ctx, "calls.length"), "1");
        }

        #[test]
        fn reregistration_lands_in_next_tick() {
            let mut ctx = context();
            eval(
                &mut ctx,
                "function loop(ts) { calls.push(ts); requestAnimationFrame(loop); }
                 requestAnimationFrame(loop);",
            );
            assert_eq!(eval(&mut ctx, &tick_script(0.0)), "true");
            assert_eq!(eval(&mut ctx, "calls.length"), "1");
            assert_eq!(eval(&mut ctx, &tick_script(40.0)), "true");
            assert_eq!(eval(&mut ctx, "calls.join(',')"), "0,40");
        }

        #[test]
        fn cancelled_callback_never_runs() {
            let mut ctx = context();
            eval(
                &mut ctx,
                "var a = requestAnimationFrame(function () { calls.push('a'); });
                 var b = requestAnimationFrame(function () { calls.push('b'); });
                 cancelAnimationFrame(a);",
            );
            assert_eq!(eval(&mut ctx, "b - a"), "1");
            assert_eq!(eval(&mut ctx, &tick_script(0.0)), "true");
            assert_eq!(eval(&mut ctx, "calls.join(',')"), "b");
        }

        #[test]
        fn cancelling_everything_leaves_nothing_pending() {
            let mut ctx = context();
            eval(&mut ctx, "cancelAnimationFrame(requestAnimationFrame(function () {}));");
            assert_eq!(eval(&mut ctx, &tick_script(0.0)), "false");
        }
    }
}
