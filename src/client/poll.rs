//! Completion polling.

use std::time::Duration;

use quanta::Instant;

use crate::error::CompletionFailure;
use crate::fabric::{Fabric, Wc};

/// Which completion queue to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queue {
    Send,
    Recv,
}

/// How to wait for a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStrategy {
    /// Busy-poll until a completion or an error shows up.
    Spin,
    /// Busy-poll, but give up after the given time.
    Deadline(Duration),
}

/// Outcome of one poll attempt.
#[derive(Debug)]
pub enum CompletionState {
    /// Nothing yet. Not an error.
    Pending,
    /// A completion with success status.
    Succeeded(Wc),
    /// The poll failed or reaped an unsuccessful completion.
    Failed(CompletionFailure),
}

/// Polls one endpoint's completion queues.
pub struct Poller<'f, F: Fabric> {
    fabric: &'f F,
    strategy: PollStrategy,
}

impl<'f, F: Fabric> Poller<'f, F> {
    /// Number of empty polls after which a spinning poller complains.
    #[cfg(feature = "warned_spin")]
    pub const SPIN_WARN_THRESHOLD: u64 = 1 << 26;

    pub fn new(fabric: &'f F, strategy: PollStrategy) -> Self {
        Self { fabric, strategy }
    }

    /// Poll once, without blocking.
    pub fn try_once(&self, ep: &F::Endpoint, queue: Queue) -> CompletionState {
        let polled = match queue {
            Queue::Send => self.fabric.poll_send_comp(ep),
            Queue::Recv => self.fabric.poll_recv_comp(ep),
        };
        match polled {
            Ok(None) => CompletionState::Pending,
            Ok(Some(wc)) => match wc.ok() {
                Ok(_) => CompletionState::Succeeded(wc),
                Err(status) => CompletionState::Failed(CompletionFailure::Status(status)),
            },
            Err(e) => CompletionState::Failed(CompletionFailure::Poll(e)),
        }
    }

    /// Poll until a completion arrives, an error occurs, or the deadline (if
    /// any) passes.
    pub fn wait(&self, ep: &F::Endpoint, queue: Queue) -> Result<Wc, CompletionFailure> {
        let deadline = match self.strategy {
            PollStrategy::Spin => None,
            PollStrategy::Deadline(d) => Some((Instant::now() + d, d)),
        };

        #[cfg(feature = "warned_spin")]
        let mut spins = 0u64;

        loop {
            match self.try_once(ep, queue) {
                CompletionState::Succeeded(wc) => return Ok(wc),
                CompletionState::Failed(e) => return Err(e),
                CompletionState::Pending => {}
            }

            if let Some((at, d)) = deadline {
                if Instant::now() >= at {
                    return Err(CompletionFailure::TimedOut(d));
                }
            }

            #[cfg(feature = "warned_spin")]
            {
                spins += 1;
                if spins == Self::SPIN_WARN_THRESHOLD {
                    log::warn!(
                        "rdma_client: {} empty polls on the {:?} queue, still spinning",
                        spins,
                        queue
                    );
                }
            }
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::sim::*;
    use crate::fabric::{EpCaps, WcStatus};

    fn connected(fabric: &SimFabric, buf: &mut [u8]) -> (SimAddrInfo, SimEndpoint, SimMr) {
        let info = fabric.resolve("127.0.0.1", "7471").unwrap();
        let (ep, _) = fabric.create_ep(&info, EpCaps::single_shot(160)).unwrap();
        let mr = unsafe { fabric.reg_msgs(&ep, buf.as_mut_ptr(), buf.len()) }.unwrap();
        fabric.post_recv(&ep, 1, &mr).unwrap();
        fabric.connect(&ep).unwrap();
        (info, ep, mr)
    }

    #[test]
    fn test_pending_is_not_terminal() {
        let fabric = SimFabric::new(SimConfig::default().pending_polls(3));
        let mut buf = vec![0u8; 64];
        let (_info, ep, _mr) = connected(&fabric, &mut buf);

        let poller = Poller::new(&fabric, PollStrategy::Spin);
        for _ in 0..3 {
            assert!(matches!(poller.try_once(&ep, Queue::Recv), CompletionState::Pending));
        }
        assert!(matches!(
            poller.try_once(&ep, Queue::Recv),
            CompletionState::Succeeded(wc) if wc.wr_id() == 1
        ));
    }

    #[test]
    fn test_spin_until_success() {
        let fabric = SimFabric::new(SimConfig::default().pending_polls(1000));
        let mut buf = vec![0u8; 64];
        let (_info, ep, _mr) = connected(&fabric, &mut buf);

        let wc = Poller::new(&fabric, PollStrategy::Spin)
            .wait(&ep, Queue::Recv)
            .unwrap();
        assert_eq!(wc.bytes(), 64);
        let polls = fabric
            .calls()
            .iter()
            .filter(|c| **c == Call::PollRecv)
            .count();
        assert_eq!(polls, 1001);
    }

    #[test]
    fn test_error_is_terminal() {
        let fabric = SimFabric::new(SimConfig::default().fail_at(FailPoint::PollRecv));
        let mut buf = vec![0u8; 64];
        let (_info, ep, _mr) = connected(&fabric, &mut buf);

        let err = Poller::new(&fabric, PollStrategy::Spin)
            .wait(&ep, Queue::Recv)
            .unwrap_err();
        assert!(matches!(err, CompletionFailure::Poll(_)));
        assert_eq!(fabric.calls().last(), Some(&Call::PollRecv));
    }

    #[test]
    fn test_bad_status_is_failure() {
        let fabric = SimFabric::new(
            SimConfig::default().fail_at(FailPoint::RecvStatus(WcStatus::RemOpErr)),
        );
        let mut buf = vec![0u8; 64];
        let (_info, ep, _mr) = connected(&fabric, &mut buf);

        let poller = Poller::new(&fabric, PollStrategy::Spin);
        assert!(matches!(
            poller.try_once(&ep, Queue::Recv),
            CompletionState::Failed(CompletionFailure::Status(WcStatus::RemOpErr))
        ));
    }

    #[test]
    fn test_deadline() {
        let fabric = SimFabric::new(SimConfig::default().pending_polls(u64::MAX));
        let mut buf = vec![0u8; 64];
        let (_info, ep, _mr) = connected(&fabric, &mut buf);

        let poller = Poller::new(&fabric, PollStrategy::Deadline(Duration::from_millis(20)));
        let err = poller.wait(&ep, Queue::Recv).unwrap_err();
        assert!(matches!(err, CompletionFailure::TimedOut(d) if d == Duration::from_millis(20)));
    }
}
