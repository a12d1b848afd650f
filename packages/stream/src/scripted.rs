//! In-memory capture backend that replays scripted media.
//!
//! Records every open, read, rewind, and release so callers can assert on
//! handle lifecycles (no leaked or doubly open handles per locator).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{CaptureBackend, CaptureHandle, Frame, StreamError};

/// Behavior of one scripted locator.
#[derive(Debug, Clone)]
pub enum Script {
    /// Finite media: yields the frames in order, then end-of-media until
    /// rewound.
    File(Vec<Frame>),
    /// Live stream: every session yields `frames` then fails. After the
    /// first open, the next `refused_reopens` opens fail.
    Live {
        /// Frames produced by each session before it drops.
        frames: Vec<Frame>,
        /// Reopen attempts to refuse before accepting again.
        refused_reopens: u32,
    },
    /// Never opens.
    Unreachable,
}

/// A lifecycle event observed by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A handle was opened.
    Open(String),
    /// An open attempt was refused.
    OpenRefused(String),
    /// A read was attempted.
    Read(String),
    /// A rewind was issued.
    Rewind(String),
    /// A handle was released.
    Release(String),
}

#[derive(Debug, Default)]
struct State {
    scripts: BTreeMap<String, Script>,
    opens: BTreeMap<String, u32>,
    open_handles: BTreeMap<String, u32>,
    max_open_handles: BTreeMap<String, u32>,
    events: Vec<Event>,
}

/// Backend replaying [`Script`]s keyed by locator.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    state: Arc<Mutex<State>>,
}

impl ScriptedBackend {
    /// Creates a backend with no scripted locators. Unknown locators are
    /// treated as [`Script::Unreachable`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a script for `locator`.
    #[must_use]
    pub fn with(self, locator: &str, script: Script) -> Self {
        self.lock().scripts.insert(locator.to_string(), script);
        self
    }

    /// Events observed for one locator.
    #[must_use]
    pub fn events_for(&self, locator: &str) -> Vec<Event> {
        self.lock()
            .events
            .iter()
            .filter(|e| match e {
                Event::Open(l)
                | Event::OpenRefused(l)
                | Event::Read(l)
                | Event::Rewind(l)
                | Event::Release(l) => l == locator,
            })
            .cloned()
            .collect()
    }

    /// Handles currently open on `locator`.
    #[must_use]
    pub fn open_handles(&self, locator: &str) -> u32 {
        self.lock().open_handles.get(locator).copied().unwrap_or(0)
    }

    /// Highest number of simultaneously open handles ever seen on `locator`.
    #[must_use]
    pub fn max_open_handles(&self, locator: &str) -> u32 {
        self.lock().max_open_handles.get(locator).copied().unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("scripted backend mutex poisoned")
    }
}

impl CaptureBackend for ScriptedBackend {
    fn open(&self, locator: &str) -> Result<Box<dyn CaptureHandle>, StreamError> {
        let mut state = self.lock();
        let script = state
            .scripts
            .get(locator)
            .cloned()
            .unwrap_or(Script::Unreachable);

        let prior_opens = state.opens.get(locator).copied().unwrap_or(0);
        let refused = match &script {
            Script::Unreachable => true,
            Script::Live {
                refused_reopens, ..
            } => prior_opens > 0 && prior_opens <= *refused_reopens,
            Script::File(_) => false,
        };
        *state.opens.entry(locator.to_string()).or_default() += 1;

        if refused {
            state.events.push(Event::OpenRefused(locator.to_string()));
            return Err(StreamError::SourceUnavailable {
                locator: locator.to_string(),
                reason: "scripted as unreachable".to_string(),
            });
        }

        state.events.push(Event::Open(locator.to_string()));
        let open = state.open_handles.entry(locator.to_string()).or_default();
        *open += 1;
        let now_open = *open;
        let max = state
            .max_open_handles
            .entry(locator.to_string())
            .or_default();
        *max = (*max).max(now_open);
        drop(state);

        let (frames, live) = match script {
            Script::File(frames) => (frames, false),
            Script::Live { frames, .. } => (frames, true),
            Script::Unreachable => unreachable!("unreachable scripts are refused above"),
        };

        Ok(Box::new(ScriptedHandle {
            locator: locator.to_string(),
            frames,
            cursor: 0,
            live,
            released: false,
            state: Arc::clone(&self.state),
        }))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct ScriptedHandle {
    locator: String,
    frames: Vec<Frame>,
    cursor: usize,
    live: bool,
    released: bool,
    state: Arc<Mutex<State>>,
}

impl ScriptedHandle {
    fn record(&self, event: Event) {
        self.state
            .lock()
            .expect("scripted backend mutex poisoned")
            .events
            .push(event);
    }
}

impl CaptureHandle for ScriptedHandle {
    fn read(&mut self) -> Result<Option<Frame>, StreamError> {
        self.record(Event::Read(self.locator.clone()));

        if self.released {
            return Err(StreamError::ReadFailure {
                message: "read after release".to_string(),
            });
        }

        if let Some(frame) = self.frames.get(self.cursor) {
            self.cursor += 1;
            return Ok(Some(frame.clone()));
        }

        if self.live {
            Err(StreamError::ReadFailure {
                message: "stream dropped".to_string(),
            })
        } else {
            Ok(None)
        }
    }

    fn rewind(&mut self) -> Result<(), StreamError> {
        self.record(Event::Rewind(self.locator.clone()));
        self.cursor = 0;
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let mut state = self.state.lock().expect("scripted backend mutex poisoned");
        state.events.push(Event::Release(self.locator.clone()));
        if let Some(open) = state.open_handles.get_mut(&self.locator) {
            *open = open.saturating_sub(1);
        }
    }
}

impl Drop for ScriptedHandle {
    fn drop(&mut self) {
        self.release();
    }
}
