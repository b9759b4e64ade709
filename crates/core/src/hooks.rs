//! Lifecycle Hooks (C7, §4.7): a fixed registry of named events with
//! declared arity, not open-ended dispatch. Registering against an unknown
//! event, or firing with the wrong arity, is a programmer error reported
//! distinctly from a callback's own runtime failure (§7).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::HookError;

/// One positional argument passed to a hook callback. Callbacks are
/// generic over which events they subscribe to, so arguments are boxed as a
/// small sum type rather than given per-event concrete signatures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HookArg {
    Worker(String),
    Job(i64),
    Exception(String),
    WorkQueue(String),
    WorkerConfig(String),
}

pub type Callback = Arc<dyn Fn(&[HookArg]) + Send + Sync>;

/// An `around` callback wraps the inner action; it receives the args plus a
/// thunk it must call (zero or more times) to run the next link in the
/// chain (or the inner action, for the innermost `around`).
pub type AroundCallback = Arc<dyn Fn(&[HookArg], &dyn Fn()) + Send + Sync>;

struct EventSlot {
    arity: usize,
    before: Vec<Callback>,
    after: Vec<Callback>,
    around: Vec<AroundCallback>,
}

impl EventSlot {
    fn new(arity: usize) -> Self {
        Self { arity, before: Vec::new(), after: Vec::new(), around: Vec::new() }
    }
}

/// Declared event names and positional arities (§4.7 table).
const EVENT_ARITY: &[(&str, usize)] = &[
    ("error", 3),
    ("exceptional_exit", 2),
    ("execute", 1),
    ("invoke_job", 1),
    ("loop", 1),
    ("perform", 2),
    ("pop", 1),
    ("retry", 3),
    ("work_queue_pop", 2),
    ("check_for_work", 1),
];

pub struct HookRegistry {
    events: HashMap<&'static str, EventSlot>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        let events = EVENT_ARITY
            .iter()
            .map(|(name, arity)| (*name, EventSlot::new(*arity)))
            .collect();
        Self { events }
    }

    pub fn before(&mut self, event: &str, cb: Callback) -> Result<(), HookError> {
        self.slot_mut(event)?.before.push(cb);
        Ok(())
    }

    pub fn after(&mut self, event: &str, cb: Callback) -> Result<(), HookError> {
        self.slot_mut(event)?.after.push(cb);
        Ok(())
    }

    /// Registers an `around` callback. The first one registered ends up
    /// outermost: the chain is composed right-to-left around the inner
    /// action (§4.7).
    pub fn around(&mut self, event: &str, cb: AroundCallback) -> Result<(), HookError> {
        self.slot_mut(event)?.around.push(cb);
        Ok(())
    }

    fn slot_mut(&mut self, event: &str) -> Result<&mut EventSlot, HookError> {
        self.events
            .get_mut(event)
            .ok_or_else(|| HookError::UnknownEvent(event.to_string()))
    }

    fn slot(&self, event: &str) -> Result<&EventSlot, HookError> {
        self.events
            .get(event)
            .ok_or_else(|| HookError::UnknownEvent(event.to_string()))
    }

    /// Fires `event` with `args` around `action`: all `before` callbacks run
    /// in insertion order, then the `around` chain wraps `action` (first
    /// registered outermost), then all `after` callbacks run (§4.7 firing
    /// order).
    pub fn fire(&self, event: &str, args: &[HookArg], action: impl Fn()) -> Result<(), HookError> {
        let slot = self.slot(event)?;
        if args.len() != slot.arity {
            return Err(HookError::ArityMismatch {
                event: event.to_string(),
                expected: slot.arity,
                got: args.len(),
            });
        }

        for cb in &slot.before {
            cb(args);
        }

        run_around_chain(&slot.around, args, &action);

        for cb in &slot.after {
            cb(args);
        }

        Ok(())
    }
}

fn run_around_chain(chain: &[AroundCallback], args: &[HookArg], innermost: &dyn Fn()) {
    match chain.split_first() {
        None => innermost(),
        Some((outermost, rest)) => {
            let next = move || run_around_chain(rest, args, innermost);
            outermost(args, &next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn unknown_event_is_rejected() {
        let mut reg = HookRegistry::new();
        let err = reg.before("not_a_real_event", Arc::new(|_| {})).unwrap_err();
        assert!(matches!(err, HookError::UnknownEvent(e) if e == "not_a_real_event"));
    }

    #[test]
    fn arity_mismatch_is_reported() {
        let reg = HookRegistry::new();
        let err = reg.fire("perform", &[HookArg::Worker("w1".into())], || {}).unwrap_err();
        assert!(matches!(err, HookError::ArityMismatch { expected: 2, got: 1, .. }));
    }

    /// `fire` only validates argument *count*; it's the caller's job to pass
    /// the right `HookArg` variants in the right order. This pins down the
    /// exact positional order a real callback sees, since a correct arity
    /// with swapped/mistyped args would otherwise pass silently (as
    /// `perform`/`error`/`retry`/`exceptional_exit` call sites once did).
    #[test]
    fn callback_receives_args_in_declared_positional_order() {
        let mut reg = HookRegistry::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::<HookArg>::new()));

        let captured = seen.clone();
        reg.before("error", Arc::new(move |args| *captured.lock().unwrap() = args.to_vec())).unwrap();

        reg.fire(
            "error",
            &[
                HookArg::Worker("w1".into()),
                HookArg::Job(42),
                HookArg::Exception("boom".into()),
            ],
            || {},
        )
        .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![HookArg::Worker("w1".into()), HookArg::Job(42), HookArg::Exception("boom".into())]
        );
    }

    #[test]
    fn before_around_after_fire_in_order() {
        let mut reg = HookRegistry::new();
        let trace = Arc::new(std::sync::Mutex::new(Vec::<&'static str>::new()));

        let t1 = trace.clone();
        reg.before("loop", Arc::new(move |_| t1.lock().unwrap().push("before"))).unwrap();

        let t2 = trace.clone();
        reg.around(
            "loop",
            Arc::new(move |_, next| {
                t2.lock().unwrap().push("around-in");
                next();
                t2.lock().unwrap().push("around-out");
            }),
        )
        .unwrap();

        let t3 = trace.clone();
        reg.after("loop", Arc::new(move |_| t3.lock().unwrap().push("after"))).unwrap();

        let counter = AtomicUsize::new(0);
        reg.fire("loop", &[HookArg::Worker("w1".into())], || {
            counter.fetch_add(1, Ordering::SeqCst);
            trace.lock().unwrap().push("action");
        })
        .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(
            *trace.lock().unwrap(),
            vec!["before", "around-in", "action", "around-out", "after"]
        );
    }
}
