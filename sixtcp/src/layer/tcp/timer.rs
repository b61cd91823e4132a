//! Retransmission timeouts.
//!
//! A single sweep visits every socket once per tick. It only reads the control blocks and turns
//! expired timeouts into [`TimerEvent`]s sent to the dispatcher, which re-checks the event
//! against the current state before acting on it.
//!
//! [`TimerEvent`]: enum.TimerEvent.html
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{SendError, Sender};
use std::thread;

use crate::config::Config;
use crate::time::{Duration, Instant};

use super::connection::{Connection, State};
use super::dispatch::{Command, Shared};

/// An expired timeout of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerEvent {
    /// Send the unacknowledged segment again.
    Retry,
    /// Stop trying and close the connection.
    GiveUp,
}

/// Smoothed round trip time and the retransmission timeout derived from it.
///
/// Follows the estimator of RFC 6298 with gains of 1/8 and 1/4, a floor for the timeout and
/// the timer resolution as lower bound of the variance term.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RttEstimator {
    srtt: Option<Duration>,
    rttvar: Duration,
    rto: Duration,
    min_rto: Duration,
    resolution: Duration,
}

impl RttEstimator {
    /// An estimator without samples.
    pub fn new(config: &Config) -> Self {
        RttEstimator {
            srtt: None,
            rttvar: Duration::from_millis(0),
            rto: config.initial_rto,
            min_rto: config.min_rto,
            resolution: config.tick,
        }
    }

    /// The current retransmission timeout.
    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// The smoothed round trip time, once there was a sample.
    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }

    /// Add a round trip measurement.
    pub fn sample(&mut self, rtt: Duration) {
        let srtt = match self.srtt {
            None => {
                self.rttvar = rtt / 2;
                rtt
            },
            Some(srtt) => {
                let srtt = (srtt * 7 + rtt) / 8;
                let delta = if srtt > rtt { srtt - rtt } else { rtt - srtt };
                self.rttvar = (self.rttvar * 3 + delta) / 4;
                srtt
            },
        };
        self.srtt = Some(srtt);
        self.rto = (srtt + (self.rttvar * 4).max(self.resolution)).max(self.min_rto);
    }
}

/// The timeout of a connection that is due at `now`, if any.
pub fn poll(tcb: &Connection, now: Instant, config: &Config) -> Option<TimerEvent> {
    let elapsed = now - tcb.timing.last_packet_time;
    let retries = tcb.timing.retries;
    match tcb.current {
        State::SynSent | State::SynReceived => {
            let timeout = config.syn_timeout + config.syn_backoff * retries;
            if elapsed < timeout {
                None
            } else if retries >= config.syn_retries {
                Some(TimerEvent::GiveUp)
            } else {
                Some(TimerEvent::Retry)
            }
        },
        State::Established | State::CloseWait | State::FinWait1 | State::Closing | State::LastAck
            if tcb.send.unacked != tcb.send.next =>
        {
            match backoff(tcb.timing.rtt.rto(), retries) {
                Some(timeout) if timeout <= config.max_rto => if elapsed >= timeout {
                    Some(TimerEvent::Retry)
                } else {
                    None
                },
                _ => Some(TimerEvent::GiveUp),
            }
        },
        State::FinWait2 if elapsed >= config.max_rto => Some(TimerEvent::GiveUp),
        State::TimeWait if elapsed >= config.time_wait => Some(TimerEvent::GiveUp),
        _ => None,
    }
}

/// `rto * 2^retries`, or `None` on overflow.
fn backoff(rto: Duration, retries: u32) -> Option<Duration> {
    2u32.checked_pow(retries).and_then(|factor| rto.checked_mul(factor))
}

/// Check every socket once.
///
/// Fails only if the dispatcher is gone.
pub fn sweep(shared: &Shared, commands: &Sender<Command>) -> Result<(), SendError<Command>> {
    let now = shared.clock.now();
    for (id, socket) in shared.table.sockets() {
        let event = poll(&socket.tcb.lock(), now, &shared.config);
        if let Some(event) = event {
            net_trace!("timer: {:?} for {} at {}", event, id, now);
            commands.send(Command::Timer(id, event))?;
        }
    }
    Ok(())
}

/// The timer thread.
///
/// Also perturbs the admission counters once per tick.
pub fn run(shared: Arc<Shared>, commands: Sender<Command>, running: Arc<AtomicBool>) {
    while running.load(Ordering::Acquire) {
        thread::sleep(shared.config.tick);
        shared.admission.perturb();
        if sweep(&shared, &commands).is_err() {
            break;
        }
    }
    net_trace!("timer: stopped");
}
