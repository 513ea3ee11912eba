//! Step metering and its binding to a thread of control.
//!
//! An [Instrumentation] is created by an [InstrumentationFactory] when an
//! executor starts and is held through a [Binding]. Only one binding may exist
//! per thread at a time; it is attached for the duration of each top-level
//! transaction and detached afterwards.

use crate::error::Fault;
use std::{cell::Cell, marker::PhantomData};
use thiserror::Error;
use tracing::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("out of steps (requested {requested}, remaining {remaining})")]
pub struct OutOfSteps {
    pub requested: u64,
    pub remaining: u64,
}

/// Per-thread resource accounting.
pub trait Instrumentation {
    /// Start accounting against `limit` steps.
    fn reset(&mut self, limit: u64);

    /// Consume `steps`. Once exhausted, every further charge fails until the
    /// next [Instrumentation::reset].
    fn charge(&mut self, steps: u64) -> Result<(), OutOfSteps>;

    fn used(&self) -> u64;

    fn remaining(&self) -> u64;

    fn is_exhausted(&self) -> bool;
}

pub trait InstrumentationFactory: Send + Sync {
    fn create(&self) -> Box<dyn Instrumentation>;

    fn destroy(&self, _instrumentation: Box<dyn Instrumentation>) {}
}

#[derive(Debug, Default)]
pub struct StepMeter {
    limit: u64,
    used: u64,
    exhausted: bool,
}

impl Instrumentation for StepMeter {
    fn reset(&mut self, limit: u64) {
        self.limit = limit;
        self.used = 0;
        self.exhausted = false;
    }

    fn charge(&mut self, steps: u64) -> Result<(), OutOfSteps> {
        let remaining = self.remaining();
        if self.exhausted || steps > remaining {
            self.exhausted = true;
            self.used = self.limit;
            return Err(OutOfSteps {
                requested: steps,
                remaining,
            });
        }
        self.used = self.used.saturating_add(steps);
        Ok(())
    }

    fn used(&self) -> u64 {
        self.used
    }

    fn remaining(&self) -> u64 {
        if self.exhausted {
            return 0;
        }
        self.limit.saturating_sub(self.used)
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StepMeterFactory;

impl InstrumentationFactory for StepMeterFactory {
    fn create(&self) -> Box<dyn Instrumentation> {
        Box::new(StepMeter::default())
    }
}

thread_local! {
    static BOUND: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as bound. Not `Send`: it must be released on the
/// thread that acquired it.
struct ThreadGuard {
    _not_send: PhantomData<*const ()>,
}

impl ThreadGuard {
    fn acquire() -> Result<Self, Fault> {
        if BOUND.with(|bound| bound.replace(true)) {
            return Err(Fault::AlreadyBound);
        }
        Ok(Self {
            _not_send: PhantomData,
        })
    }
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        BOUND.with(|bound| bound.set(false));
    }
}

/// An [Instrumentation] bound to the current thread.
pub struct Binding {
    instrumentation: Box<dyn Instrumentation>,
    attached: bool,
    _guard: ThreadGuard,
}

impl Binding {
    pub fn bind(instrumentation: Box<dyn Instrumentation>) -> Result<Self, Fault> {
        let guard = ThreadGuard::acquire()?;
        trace!("instrumentation bound");
        Ok(Self {
            instrumentation,
            attached: false,
            _guard: guard,
        })
    }

    /// Begin metering a top-level transaction with `limit` steps.
    pub fn attach(&mut self, limit: u64) -> Result<(), Fault> {
        if self.attached {
            return Err(Fault::AlreadyAttached);
        }
        self.instrumentation.reset(limit);
        self.attached = true;
        Ok(())
    }

    /// Finish metering and return the steps used.
    pub fn detach(&mut self) -> Result<u64, Fault> {
        if !self.attached {
            return Err(Fault::NotAttached);
        }
        self.attached = false;
        Ok(self.instrumentation.used())
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn meter(&self) -> &dyn Instrumentation {
        self.instrumentation.as_ref()
    }

    pub fn meter_mut(&mut self) -> &mut dyn Instrumentation {
        self.instrumentation.as_mut()
    }

    /// Release the thread and hand back the instrumentation.
    pub fn unbind(self) -> Box<dyn Instrumentation> {
        trace!("instrumentation unbound");
        self.instrumentation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_is_sticky() {
        let mut meter = StepMeter::default();
        meter.reset(10);
        meter.charge(4).unwrap();
        assert_eq!(meter.remaining(), 6);

        let err = meter.charge(7).unwrap_err();
        assert_eq!(
            err,
            OutOfSteps {
                requested: 7,
                remaining: 6
            }
        );
        assert!(meter.is_exhausted());
        assert_eq!(meter.used(), 10);
        assert!(meter.charge(0).is_err());

        meter.reset(5);
        assert!(!meter.is_exhausted());
        meter.charge(5).unwrap();
    }

    #[test]
    fn second_binding_on_same_thread_is_rejected() {
        let first = Binding::bind(StepMeterFactory.create()).unwrap();
        assert!(matches!(
            Binding::bind(StepMeterFactory.create()),
            Err(Fault::AlreadyBound)
        ));

        drop(first);
        let again = Binding::bind(StepMeterFactory.create()).unwrap();
        drop(again.unbind());
        Binding::bind(StepMeterFactory.create()).unwrap();
    }

    #[test]
    fn bindings_on_other_threads_are_independent() {
        let _binding = Binding::bind(StepMeterFactory.create()).unwrap();
        std::thread::spawn(|| {
            Binding::bind(StepMeterFactory.create()).unwrap();
        })
        .join()
        .unwrap();
    }

    #[test]
    fn attach_is_exclusive() {
        let mut binding = Binding::bind(StepMeterFactory.create()).unwrap();
        binding.attach(100).unwrap();
        assert!(matches!(binding.attach(100), Err(Fault::AlreadyAttached)));
        binding.meter_mut().charge(30).unwrap();
        assert_eq!(binding.detach().unwrap(), 30);
        assert!(matches!(binding.detach(), Err(Fault::NotAttached)));
    }
}
