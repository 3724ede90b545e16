//! Threshold/timeout read semantics.
//!
//! Two knobs drive every read: the receive threshold `T` (bytes) and the
//! receive timeout `R`. A disabled knob counts as zero.
//!
//! | T  | R  | Regime           | Behavior                                                    |
//! |----|----|------------------|-------------------------------------------------------------|
//! | 0  | 0  | `Poll`           | Return immediately with whatever is queued, possibly 0.      |
//! | 0  | >0 | `Timed`          | Block up to R overall; return on the first data, or 0.       |
//! | >0 | >0 | `InterCharacter` | Return at T bytes or R after the last byte; never 0.         |
//! | >0 | 0  | `Counted`        | Block until T bytes have arrived, with no time bound.        |
//!
//! The wait target is `min(T, buffer.len())`: a buffer smaller than the
//! threshold is satisfied as soon as it is full.
//!
//! Blocking waits are cut into slices of at most [`CANCEL_SLICE`] so a
//! concurrent close is noticed promptly; a cancelled read returns what it has,
//! which is `Ok(0)` (end of stream) when nothing arrived.

use super::error::PortError;
use std::time::{Duration, Instant};

/// Longest single wait on the device before re-checking for cancellation.
pub const CANCEL_SLICE: Duration = Duration::from_millis(100);

/// Where the engine pulls bytes from.
pub trait ByteSource {
    /// Read what is available, waiting at most `wait` for the first byte.
    fn read_within(&mut self, buffer: &mut [u8], wait: Duration) -> Result<usize, PortError>;

    /// True once the owner of the source has been closed.
    fn is_cancelled(&self) -> bool;
}

/// The four read regimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadRegime {
    Poll,
    Timed(Duration),
    InterCharacter { threshold: usize, gap: Duration },
    Counted(usize),
}

/// The threshold and timeout knobs of one port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadPolicy {
    pub threshold: Option<usize>,
    pub timeout: Option<Duration>,
}

impl ReadPolicy {
    pub fn new(threshold: Option<usize>, timeout: Option<Duration>) -> Self {
        Self { threshold, timeout }
    }

    pub fn regime(&self) -> ReadRegime {
        let threshold = self.threshold.unwrap_or(0);
        let timeout = self.timeout.unwrap_or(Duration::ZERO);
        match (threshold, timeout.is_zero()) {
            (0, true) => ReadRegime::Poll,
            (0, false) => ReadRegime::Timed(timeout),
            (t, false) => ReadRegime::InterCharacter {
                threshold: t,
                gap: timeout,
            },
            (t, true) => ReadRegime::Counted(t),
        }
    }

    /// Fill `buffer` from `source` according to the regime.
    pub fn read<S>(&self, source: &mut S, buffer: &mut [u8]) -> Result<usize, PortError>
    where
        S: ByteSource + ?Sized,
    {
        if buffer.is_empty() {
            return Ok(0);
        }

        match self.regime() {
            ReadRegime::Poll => source.read_within(buffer, Duration::ZERO),
            ReadRegime::Timed(timeout) => read_timed(source, buffer, timeout),
            ReadRegime::Counted(threshold) => read_counted(source, buffer, threshold),
            ReadRegime::InterCharacter { threshold, gap } => {
                read_intercharacter(source, buffer, threshold, gap)
            }
        }
    }
}

fn read_timed<S>(source: &mut S, buffer: &mut [u8], timeout: Duration) -> Result<usize, PortError>
where
    S: ByteSource + ?Sized,
{
    // Too far out to represent means no deadline at all.
    let deadline = Instant::now().checked_add(timeout);
    loop {
        if source.is_cancelled() {
            return Ok(0);
        }
        let remaining = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => CANCEL_SLICE,
        };
        let n = source.read_within(buffer, remaining.min(CANCEL_SLICE))?;
        if n > 0 || deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Ok(n);
        }
    }
}

fn read_counted<S>(source: &mut S, buffer: &mut [u8], threshold: usize) -> Result<usize, PortError>
where
    S: ByteSource + ?Sized,
{
    let target = threshold.min(buffer.len());
    let mut total = 0;
    while total < target {
        if source.is_cancelled() {
            break;
        }
        total += source.read_within(&mut buffer[total..], CANCEL_SLICE)?;
    }
    Ok(total)
}

fn read_intercharacter<S>(
    source: &mut S,
    buffer: &mut [u8],
    threshold: usize,
    gap: Duration,
) -> Result<usize, PortError>
where
    S: ByteSource + ?Sized,
{
    let target = threshold.min(buffer.len());

    // The intercharacter timer only starts once the first byte is in.
    let mut total = 0;
    while total == 0 {
        if source.is_cancelled() {
            return Ok(0);
        }
        total = source.read_within(buffer, CANCEL_SLICE)?;
    }

    let mut last_byte = Instant::now();
    while total < target && !source.is_cancelled() {
        let idle = last_byte.elapsed();
        if idle >= gap {
            break;
        }
        let n = source.read_within(&mut buffer[total..], (gap - idle).min(CANCEL_SLICE))?;
        if n > 0 {
            total += n;
            last_byte = Instant::now();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    /// Scripted source: each read pops the next chunk, sleeping on empty slots.
    struct Script {
        chunks: VecDeque<Option<Vec<u8>>>,
        waits: Vec<Duration>,
        cancel_after: Option<usize>,
    }

    impl Script {
        fn new(chunks: Vec<Option<&[u8]>>) -> Self {
            Self {
                chunks: chunks.into_iter().map(|c| c.map(<[u8]>::to_vec)).collect(),
                waits: Vec::new(),
                cancel_after: None,
            }
        }
    }

    impl ByteSource for Script {
        fn read_within(&mut self, buffer: &mut [u8], wait: Duration) -> Result<usize, PortError> {
            self.waits.push(wait);
            match self.chunks.pop_front() {
                Some(Some(chunk)) => {
                    let n = chunk.len().min(buffer.len());
                    buffer[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.chunks.push_front(Some(chunk[n..].to_vec()));
                    }
                    Ok(n)
                }
                _ => {
                    std::thread::sleep(wait);
                    Ok(0)
                }
            }
        }

        fn is_cancelled(&self) -> bool {
            self.cancel_after.is_some_and(|n| self.waits.len() >= n)
        }
    }

    #[test]
    fn test_regime_table() {
        let ms = Duration::from_millis;
        assert_eq!(ReadPolicy::new(None, None).regime(), ReadRegime::Poll);
        assert_eq!(ReadPolicy::new(Some(0), Some(ms(0))).regime(), ReadRegime::Poll);
        assert_eq!(
            ReadPolicy::new(None, Some(ms(250))).regime(),
            ReadRegime::Timed(ms(250))
        );
        assert_eq!(
            ReadPolicy::new(Some(4), Some(ms(250))).regime(),
            ReadRegime::InterCharacter {
                threshold: 4,
                gap: ms(250)
            }
        );
        assert_eq!(ReadPolicy::new(Some(4), None).regime(), ReadRegime::Counted(4));
    }

    #[test]
    fn test_poll_does_not_wait() {
        let mut source = Script::new(vec![]);
        let mut buffer = [0u8; 8];
        let n = ReadPolicy::new(None, None)
            .read(&mut source, &mut buffer)
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(source.waits, vec![Duration::ZERO]);
    }

    #[test]
    fn test_timed_returns_first_data() {
        let mut source = Script::new(vec![None, Some(b"ab"), Some(b"cd")]);
        let mut buffer = [0u8; 8];
        let n = ReadPolicy::new(None, Some(Duration::from_secs(5)))
            .read(&mut source, &mut buffer)
            .unwrap();
        assert_eq!(&buffer[..n], b"ab");
        assert!(source.waits.iter().all(|w| *w <= CANCEL_SLICE));
    }

    #[test]
    fn test_timed_expires_with_zero_after_full_timeout() {
        let mut source = Script::new(vec![]);
        let timeout = Duration::from_millis(250);
        let start = Instant::now();
        let n = ReadPolicy::new(None, Some(timeout))
            .read(&mut source, &mut [0u8; 8])
            .unwrap();
        assert_eq!(n, 0);
        assert!(start.elapsed() >= timeout);
    }

    #[test]
    fn test_counted_accumulates_to_threshold() {
        let mut source = Script::new(vec![Some(b"a"), None, Some(b"bc"), Some(b"def")]);
        let mut buffer = [0u8; 16];
        let n = ReadPolicy::new(Some(3), None)
            .read(&mut source, &mut buffer)
            .unwrap();
        assert_eq!(&buffer[..n], b"abc");
    }

    #[test]
    fn test_counted_with_small_buffer_stops_when_full() {
        let mut source = Script::new(vec![Some(b"abcdef")]);
        let mut buffer = [0u8; 2];
        let n = ReadPolicy::new(Some(10), None)
            .read(&mut source, &mut buffer)
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buffer, b"ab");
    }

    #[test]
    fn test_counted_returns_end_of_stream_on_cancel() {
        let mut source = Script::new(vec![]);
        source.cancel_after = Some(3);
        let n = ReadPolicy::new(Some(4), None)
            .read(&mut source, &mut [0u8; 8])
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_intercharacter_waits_for_first_byte_then_gap() {
        let gap = Duration::from_millis(40);
        // Several idle slices before the first byte must not end the read.
        let mut source = Script::new(vec![None, None, None, Some(b"x"), Some(b"y"), None]);
        let mut buffer = [0u8; 8];
        let n = ReadPolicy::new(Some(5), Some(gap))
            .read(&mut source, &mut buffer)
            .unwrap();
        assert_eq!(&buffer[..n], b"xy");
    }

    #[test]
    fn test_intercharacter_satisfied_by_threshold() {
        let mut source = Script::new(vec![Some(b"abcd"), Some(b"efgh")]);
        let mut buffer = [0u8; 16];
        let n = ReadPolicy::new(Some(3), Some(Duration::from_secs(10)))
            .read(&mut source, &mut buffer)
            .unwrap();
        assert_eq!(&buffer[..n], b"abcd");
    }

    #[test]
    fn test_empty_buffer_never_touches_source() {
        let mut source = Script::new(vec![Some(b"abc")]);
        let n = ReadPolicy::new(Some(3), None)
            .read(&mut source, &mut [])
            .unwrap();
        assert_eq!(n, 0);
        assert!(source.waits.is_empty());
    }

    proptest! {
        #[test]
        fn prop_regime_matches_table(t in 0usize..64, r in 0u64..5_000) {
            let policy = ReadPolicy::new(Some(t), Some(Duration::from_millis(r)));
            let regime = policy.regime();
            match (t, r) {
                (0, 0) => prop_assert_eq!(regime, ReadRegime::Poll),
                (0, _) => prop_assert!(matches!(regime, ReadRegime::Timed(_))),
                (_, 0) => prop_assert_eq!(regime, ReadRegime::Counted(t)),
                _ => prop_assert!(matches!(regime, ReadRegime::InterCharacter { .. }), "expected InterCharacter, got {:?}", regime),
            }
        }

        #[test]
        fn prop_counted_with_queued_data_returns_at_least_target(
            data in proptest::collection::vec(any::<u8>(), 1..64),
            threshold in 1usize..64,
            len in 1usize..64,
        ) {
            let mut source = Script::new(vec![Some(&data[..])]);
            let mut buffer = vec![0u8; len];
            let target = threshold.min(len);
            prop_assume!(data.len() >= target);

            let n = ReadPolicy::new(Some(threshold), None).read(&mut source, &mut buffer).unwrap();
            prop_assert!(n >= target);
            prop_assert_eq!(&buffer[..n], &data[..n]);
        }
    }
}
