//! Run, stop and single-step control, shared with debugger threads.
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum State {
    #[default]
    Running,
    Stopped,
    /// Executes one instruction per granted step.
    Stepping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Run,
    Stop,
    /// Enter [`State::Stepping`] without granting a step.
    Pause,
    /// Enter [`State::Stepping`] and grant one step.
    Step,
}

/// What a waiting DSP thread was woken up for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    Step,
    Changed(State),
}

#[derive(Debug, Default)]
struct Inner {
    state: State,
    steps: u32,
}

#[derive(Debug, Default)]
pub struct StepControl {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl StepControl {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> State {
        self.lock().state
    }

    pub fn request(&self, request: Request) {
        let mut inner = self.lock();
        let old = inner.state;

        match request {
            Request::Run => {
                inner.state = State::Running;
                inner.steps = 0;
            }
            Request::Stop => {
                inner.state = State::Stopped;
                inner.steps = 0;
            }
            Request::Pause => inner.state = State::Stepping,
            Request::Step => {
                inner.state = State::Stepping;
                inner.steps += 1;
            }
        }

        if old != inner.state {
            tracing::debug!("{old:?} -> {:?}", inner.state);
        }

        drop(inner);
        self.cond.notify_all();
    }

    /// Blocks while stepping with no step granted.
    pub(crate) fn wait(&self) -> Wake {
        let guard = self.lock();
        let mut inner = self
            .cond
            .wait_while(guard, |inner| {
                inner.state == State::Stepping && inner.steps == 0
            })
            .unwrap_or_else(PoisonError::into_inner);

        if inner.state == State::Stepping {
            inner.steps -= 1;
            Wake::Step
        } else {
            Wake::Changed(inner.state)
        }
    }
}

/// A cloneable handle to the step control of a [`crate::Core`].
#[derive(Debug, Clone, Default)]
pub struct StepHandle(Arc<StepControl>);

impl StepHandle {
    pub fn state(&self) -> State {
        self.0.state()
    }

    pub fn request(&self, request: Request) {
        self.0.request(request);
    }

    pub(crate) fn wait(&self) -> Wake {
        self.0.wait()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[test]
    fn steps_accumulate() {
        let handle = StepHandle::default();
        handle.request(Request::Step);
        handle.request(Request::Step);

        assert_eq!(handle.state(), State::Stepping);
        assert_eq!(handle.wait(), Wake::Step);
        assert_eq!(handle.wait(), Wake::Step);

        handle.request(Request::Run);
        assert_eq!(handle.wait(), Wake::Changed(State::Running));
    }

    #[test]
    fn leaving_stepping_drops_steps() {
        let handle = StepHandle::default();
        handle.request(Request::Step);
        handle.request(Request::Stop);
        handle.request(Request::Pause);

        handle.request(Request::Run);
        assert_eq!(handle.wait(), Wake::Changed(State::Running));
    }

    #[test]
    fn wait_blocks_until_requested() {
        let handle = StepHandle::default();
        handle.request(Request::Pause);

        let remote = handle.clone();
        let thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.request(Request::Step);
        });

        assert_eq!(handle.wait(), Wake::Step);
        thread.join().unwrap();
    }
}
