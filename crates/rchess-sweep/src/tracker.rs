//! Correlated request tracking
//!
//! UCI carries no request ids, so a response is attributed to a search purely by
//! position in the stream: only one search is ever in flight, every line read
//! while it is in flight belongs to it, and its `bestmove` releases the channel.
//!
//! [`Correlation`] is the per-request state machine (`Waiting` → `Resolved`) with
//! a single transition function; [`run_request`] drives it by racing the next
//! engine line against the deadline and the cancellation token.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::cancel::CancelToken;
use crate::channel::{LineEvent, Listener};
use crate::error::{EvalError, EvalResult};
use crate::protocol::{EngineLine, RawScore, UciCommand, parse_line};

/// Which score line of a search is authoritative.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreLine {
    /// The first score line seen wins; later ones are ignored
    #[default]
    First,
    /// Every score line overwrites the previous one (deepest iteration wins)
    Last,
}

/// How a request stopped listening.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// `bestmove` arrived; the channel is released
    BestMove,
    Deadline,
    Cancelled,
    /// The engine's output stream ended
    Closed,
    /// An earlier search's `bestmove` did not arrive in time; nothing was sent
    Busy,
}

/// Everything one search produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchReport {
    pub score: Option<RawScore>,
    pub bestmove: Option<String>,
    pub termination: Termination,
}

impl SearchReport {
    fn unsent(termination: Termination) -> Self {
        Self { score: None, bestmove: None, termination }
    }

    /// The engine still owes this search's `bestmove`.
    pub fn leaves_stale_output(&self) -> bool {
        matches!(self.termination, Termination::Deadline | Termination::Cancelled)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackerEvent {
    Line(EngineLine),
    Deadline,
    Cancelled,
    Closed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackerState {
    Waiting { score: Option<RawScore> },
    Resolved(SearchReport),
}

/// Per-request state machine.
#[derive(Clone, Debug)]
pub struct Correlation {
    policy: ScoreLine,
    state: TrackerState,
}

impl Correlation {
    pub fn new(policy: ScoreLine) -> Self {
        Self { policy, state: TrackerState::Waiting { score: None } }
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    /// Feed one event. Returns the report exactly once, on the transition to
    /// `Resolved`; every event after that is suppressed.
    pub fn apply(&mut self, event: TrackerEvent) -> Option<SearchReport> {
        let TrackerState::Waiting { score } = &mut self.state else {
            return None;
        };
        let (termination, bestmove) = match event {
            TrackerEvent::Line(EngineLine::Score(raw)) => {
                if score.is_none() || self.policy == ScoreLine::Last {
                    *score = Some(raw);
                }
                return None;
            }
            TrackerEvent::Line(EngineLine::BestMove { mv, .. }) => {
                (Termination::BestMove, Some(mv))
            }
            TrackerEvent::Line(_) => return None,
            TrackerEvent::Deadline => (Termination::Deadline, None),
            TrackerEvent::Cancelled => (Termination::Cancelled, None),
            TrackerEvent::Closed => (Termination::Closed, None),
        };
        let report = SearchReport { score: *score, bestmove, termination };
        self.state = TrackerState::Resolved(report.clone());
        Some(report)
    }
}

/// Request-level knobs.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestPolicy {
    pub score_line: ScoreLine,
    /// Send `stop` when the deadline fires (the engine is otherwise left running)
    pub stop_on_timeout: bool,
}

/// Run one request on a borrowed listener: discard output of earlier searches,
/// send `commands`, then correlate until release, deadline or cancellation.
///
/// Only a failure to write to the engine is returned as an error.
pub async fn run_request(
    listener: &mut Listener<'_>,
    commands: &[UciCommand],
    deadline: Instant,
    policy: RequestPolicy,
    cancel: &CancelToken,
) -> EvalResult<SearchReport> {
    // 購読していなかった間に溜まった行は前の探索のもの
    while let Some(event) = listener.try_recv() {
        match event {
            LineEvent::Line(line) => discard_stale(listener, &line),
            LineEvent::Closed => return Ok(SearchReport::unsent(Termination::Closed)),
        }
    }
    while listener.owed_bestmoves() > 0 {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(SearchReport::unsent(Termination::Cancelled)),
            _ = tokio::time::sleep_until(deadline) => {
                warn!("stale bestmove did not arrive before the deadline; search not sent");
                return Ok(SearchReport::unsent(Termination::Busy));
            }
            event = listener.recv() => event,
        };
        match event {
            LineEvent::Line(line) => discard_stale(listener, &line),
            LineEvent::Closed => return Ok(SearchReport::unsent(Termination::Closed)),
        }
    }
    if cancel.is_cancelled() {
        return Ok(SearchReport::unsent(Termination::Cancelled));
    }

    for command in commands {
        listener.send(command)?;
    }

    let mut correlation = Correlation::new(policy.score_line);
    let report = loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => TrackerEvent::Cancelled,
            _ = tokio::time::sleep_until(deadline) => TrackerEvent::Deadline,
            event = listener.recv() => match event {
                LineEvent::Line(line) => {
                    let parsed = parse_line(&line);
                    if parsed == EngineLine::Ignored && line.contains(" score ") {
                        debug!("{}", EvalError::MalformedEngineOutput(line));
                    }
                    TrackerEvent::Line(parsed)
                }
                LineEvent::Closed => TrackerEvent::Closed,
            },
        };
        if let Some(report) = correlation.apply(event) {
            break report;
        }
    };

    if report.leaves_stale_output() {
        listener.owe_bestmove();
        let send_stop = report.termination == Termination::Cancelled || policy.stop_on_timeout;
        if send_stop {
            let _ = listener.send(&UciCommand::Stop);
        }
        if report.termination == Termination::Deadline {
            warn!("search exceeded its deadline; engine left running");
        }
    }
    Ok(report)
}

fn discard_stale(listener: &mut Listener<'_>, line: &str) {
    if matches!(parse_line(line), EngineLine::BestMove { .. }) && listener.owed_bestmoves() > 0 {
        debug!("discarded stale {line:?}");
        listener.settle_bestmove();
    }
}
