//! Generic send/receive probe engine
//!
//! One `run` drives a scan: the receiver runs on a scoped thread pushing
//! filter-accepted replies into a shared queue, the sender runs on the
//! calling thread working through probe batches. A release-ordered `done`
//! flag bounds receiver shutdown to one poll interval. Sender errors are
//! propagated only after the receiver has joined.
//!
//! Multi-round scanners (the T1 fingerprinter, the DHCPv6 locator) return
//! successive batches from [`ScanDriver::batch`]; results collected up to
//! the end of round *k* are handed back to `batch` before round *k+1*
//! starts.

use parking_lot::Mutex;
use sixscan_core::config::Timing;
use sixscan_core::{Error, Result};
use sixscan_network::{ReplyFilter, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Send-loop mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drive {
    /// One interval-spaced batch
    Once,
    /// One interval-spaced batch followed by a `timewait` quiescence
    OnceWait,
    /// Up to `retry` timewait-delimited rounds per batch, until
    /// [`ScanDriver::stop_retry`] says enough
    Retry,
}

/// Scan-specific probing logic plugged into the engine
pub trait ScanDriver {
    type Probe: Send;
    type Reply: Send;

    fn drive(&self) -> Drive {
        Drive::Once
    }

    /// Produce the next probe batch, or `None` when the scan is complete.
    ///
    /// `results` holds every reply accepted so far; multi-round drivers
    /// drain it between rounds.
    fn batch(&mut self, results: &mut Vec<Self::Reply>) -> Result<Option<Vec<Self::Probe>>>;

    /// Receiver-side accept predicate, captured before the scan starts.
    fn filter(&self) -> ReplyFilter<Self::Reply> {
        Arc::new(|_| true)
    }

    /// Whether the retry loop may stop after a quiescence.
    fn stop_retry(&mut self, results: &mut Vec<Self::Reply>) -> bool {
        !results.is_empty()
    }
}

/// Run one scan and return the accepted replies.
pub fn run<T, D>(transport: &T, driver: &mut D, timing: &Timing) -> Result<Vec<D::Reply>>
where
    T: Transport<Probe = D::Probe, Reply = D::Reply> + Sync,
    D: ScanDriver,
{
    let results: Mutex<Vec<D::Reply>> = Mutex::new(Vec::new());
    let done = AtomicBool::new(false);
    let filter = driver.filter();

    let (sent, received) = thread::scope(|s| {
        let receiver = s.spawn(|| transport.recv_loop(&done, &filter, &results));
        let sent = send_loop(transport, driver, timing, &results);
        done.store(true, Ordering::Release);
        let received = receiver
            .join()
            .unwrap_or_else(|_| Err(Error::Network("receiver thread panicked".to_string())));
        (sent, received)
    });
    sent?;
    received?;

    Ok(results.into_inner())
}

fn send_loop<T, D>(
    transport: &T,
    driver: &mut D,
    timing: &Timing,
    results: &Mutex<Vec<D::Reply>>,
) -> Result<()>
where
    T: Transport<Probe = D::Probe, Reply = D::Reply>,
    D: ScanDriver,
{
    loop {
        let batch = {
            let mut queue = results.lock();
            driver.batch(&mut queue)?
        };
        let Some(batch) = batch else {
            return Ok(());
        };

        match driver.drive() {
            Drive::Once => {
                send_spaced(transport, &batch, timing)?;
                return Ok(());
            }
            Drive::OnceWait => {
                send_spaced(transport, &batch, timing)?;
                thread::sleep(timing.timewait);
                return Ok(());
            }
            Drive::Retry => {
                for _ in 0..timing.retry {
                    send_spaced(transport, &batch, timing)?;
                    thread::sleep(timing.timewait);
                    let mut queue = results.lock();
                    if driver.stop_retry(&mut queue) {
                        break;
                    }
                }
            }
        }
    }
}

fn send_spaced<T: Transport>(transport: &T, batch: &[T::Probe], timing: &Timing) -> Result<()> {
    for probe in batch {
        transport.send(probe)?;
        thread::sleep(timing.interval);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Loopback transport: every u32 probe comes straight back as a reply.
    struct EchoTransport {
        sent: Mutex<Vec<u32>>,
        fail_send: bool,
    }

    impl EchoTransport {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail_send: false,
            }
        }
    }

    impl Transport for EchoTransport {
        type Probe = u32;
        type Reply = u32;

        fn send(&self, probe: &u32) -> Result<()> {
            if self.fail_send {
                return Err(Error::Network("send failed".to_string()));
            }
            self.sent.lock().push(*probe);
            Ok(())
        }

        fn recv_loop(
            &self,
            done: &AtomicBool,
            filter: &ReplyFilter<u32>,
            sink: &Mutex<Vec<u32>>,
        ) -> Result<()> {
            let mut delivered = 0;
            while !done.load(Ordering::Acquire) {
                let sent = self.sent.lock().clone();
                for reply in &sent[delivered..] {
                    if filter(reply) {
                        sink.lock().push(*reply);
                    }
                }
                delivered = sent.len();
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        }
    }

    fn timing() -> Timing {
        Timing {
            retry: 2,
            timewait: Duration::from_millis(20),
            interval: Duration::from_millis(1),
        }
    }

    struct OneBatch {
        probes: Vec<u32>,
        sent: bool,
        drive: Drive,
    }

    impl ScanDriver for OneBatch {
        type Probe = u32;
        type Reply = u32;

        fn drive(&self) -> Drive {
            self.drive
        }

        fn batch(&mut self, _results: &mut Vec<u32>) -> Result<Option<Vec<u32>>> {
            if self.sent {
                return Ok(None);
            }
            self.sent = true;
            Ok(Some(self.probes.clone()))
        }
    }

    #[test]
    fn test_stateless_single_batch() {
        let transport = EchoTransport::new();
        let mut driver = OneBatch {
            probes: vec![1, 2, 3],
            sent: false,
            drive: Drive::OnceWait,
        };
        let replies = run(&transport, &mut driver, &timing()).unwrap();
        assert_eq!(replies, vec![1, 2, 3]);
        assert_eq!(*transport.sent.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_retry_stops_on_reply() {
        let transport = EchoTransport::new();
        let mut driver = OneBatch {
            probes: vec![7],
            sent: false,
            drive: Drive::Retry,
        };
        run(&transport, &mut driver, &timing()).unwrap();
        // First round already produced a reply; no second round sent.
        assert_eq!(*transport.sent.lock(), vec![7]);
    }

    #[test]
    fn test_filter_rejects() {
        struct OddOnly(OneBatch);
        impl ScanDriver for OddOnly {
            type Probe = u32;
            type Reply = u32;
            fn batch(&mut self, results: &mut Vec<u32>) -> Result<Option<Vec<u32>>> {
                self.0.batch(results)
            }
            fn filter(&self) -> ReplyFilter<u32> {
                Arc::new(|reply| reply % 2 == 1)
            }
        }
        let transport = EchoTransport::new();
        let mut driver = OddOnly(OneBatch {
            probes: vec![1, 2, 3, 4],
            sent: false,
            drive: Drive::Once,
        });
        let replies = run(&transport, &mut driver, &timing()).unwrap();
        assert_eq!(replies, vec![1, 3]);
    }

    /// Three rounds; each batch derives from the previous round's replies.
    struct Rounds {
        round: usize,
        seen: Vec<Vec<u32>>,
    }

    impl ScanDriver for Rounds {
        type Probe = u32;
        type Reply = u32;

        fn drive(&self) -> Drive {
            Drive::Retry
        }

        fn batch(&mut self, results: &mut Vec<u32>) -> Result<Option<Vec<u32>>> {
            if self.round > 0 {
                self.seen.push(std::mem::take(results));
            }
            if self.round == 3 {
                return Ok(None);
            }
            self.round += 1;
            Ok(Some(vec![self.round as u32 * 10]))
        }
    }

    #[test]
    fn test_multi_round_sees_prior_results() {
        let transport = EchoTransport::new();
        let mut driver = Rounds {
            round: 0,
            seen: Vec::new(),
        };
        run(&transport, &mut driver, &timing()).unwrap();
        assert_eq!(driver.seen, vec![vec![10], vec![20], vec![30]]);
    }

    #[test]
    fn test_send_error_propagates_after_join() {
        let transport = EchoTransport {
            sent: Mutex::new(Vec::new()),
            fail_send: true,
        };
        let mut driver = OneBatch {
            probes: vec![1],
            sent: false,
            drive: Drive::Once,
        };
        let err = run(&transport, &mut driver, &timing()).unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }
}
