use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use quarry_core::messages::SourceInfo;
use quarry_core::protocol::ResponseFrame;
use tokio::time::Instant;

/// A chunk type that can absorb the chunk that followed it.
pub trait Coalesce {
    fn merge(&mut self, next: Self);
}

/// One `response` frame's payload, as queued for the parser.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResponseChunk {
    pub text: String,
    pub sources: BTreeMap<String, SourceInfo>,
    pub thread_id: Option<String>,
}

impl From<ResponseFrame> for ResponseChunk {
    fn from(frame: ResponseFrame) -> Self {
        Self {
            text: frame.response,
            sources: frame.sources.unwrap_or_default(),
            thread_id: frame.thread_id.filter(|t| !t.is_empty()),
        }
    }
}

impl Coalesce for ResponseChunk {
    fn merge(&mut self, next: Self) {
        self.text.push_str(&next.text);
        self.sources.extend(next.sources);
        if let Some(thread_id) = next.thread_id.filter(|t| !t.is_empty()) {
            self.thread_id = Some(thread_id);
        }
    }
}

/// Batches chunks so that at most one update is applied per frame interval.
///
/// The first chunk after an idle period is due immediately. Chunks arriving
/// within `interval` of the last flush wait for the next tick and are merged,
/// in arrival order, into a single update. Nothing is dropped.
#[derive(Debug)]
pub struct Coalescer<T> {
    pending: VecDeque<T>,
    interval: Duration,
    last_flush: Option<Instant>,
    due: Option<Instant>,
}

impl<T: Coalesce> Coalescer<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            pending: VecDeque::new(),
            interval,
            last_flush: None,
            due: None,
        }
    }

    pub fn push(&mut self, chunk: T) {
        self.pending.push_back(chunk);
        if self.due.is_none() {
            let now = Instant::now();
            let next_tick = self.last_flush.map_or(now, |last| last + self.interval);
            self.due = Some(next_tick.max(now));
        }
    }

    /// When the pending chunks should be applied, if any are queued.
    pub fn deadline(&self) -> Option<Instant> {
        self.due
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Merge and return pending chunks if their tick has arrived, together
    /// with how many chunks went into the update.
    pub fn take_due(&mut self, now: Instant) -> Option<(T, usize)> {
        match self.due {
            Some(due) if due <= now => self.drain(now),
            _ => None,
        }
    }

    /// Merge and return everything pending regardless of the tick.
    pub fn flush(&mut self) -> Option<(T, usize)> {
        self.drain(Instant::now())
    }

    fn drain(&mut self, now: Instant) -> Option<(T, usize)> {
        self.due = None;
        let count = self.pending.len();
        let mut merged = self.pending.pop_front()?;
        while let Some(next) = self.pending.pop_front() {
            merged.merge(next);
        }
        self.last_flush = Some(now);
        Some((merged, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str) -> ResponseChunk {
        ResponseChunk {
            text: text.into(),
            ..Default::default()
        }
    }

    #[test]
    fn merge_concatenates_and_keeps_latest_thread_id() {
        let mut a = ResponseChunk {
            text: "Hel".into(),
            sources: BTreeMap::from([("a.pdf".into(), SourceInfo::default())]),
            thread_id: Some("t-1".into()),
        };
        a.merge(ResponseChunk {
            text: "lo".into(),
            sources: BTreeMap::from([("b.pdf".into(), SourceInfo::default())]),
            thread_id: Some("t-2".into()),
        });
        a.merge(ResponseChunk {
            text: "!".into(),
            sources: BTreeMap::new(),
            thread_id: Some(String::new()),
        });
        assert_eq!(a.text, "Hello!");
        assert_eq!(a.sources.len(), 2);
        assert_eq!(a.thread_id.as_deref(), Some("t-2"));
    }

    #[test]
    fn empty_thread_id_from_frame_is_dropped() {
        let chunk = ResponseChunk::from(ResponseFrame {
            response: "x".into(),
            sources: None,
            thread_id: Some(String::new()),
        });
        assert_eq!(chunk.thread_id, None);
    }

    #[tokio::test(start_paused = true)]
    async fn first_chunk_is_due_immediately() {
        let mut c = Coalescer::new(Duration::from_millis(16));
        assert!(c.deadline().is_none());
        c.push(chunk("a"));
        let now = Instant::now();
        assert_eq!(c.deadline(), Some(now));
        let (merged, n) = c.take_due(now).unwrap();
        assert_eq!((merged.text.as_str(), n), ("a", 1));
        assert!(c.deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn burst_within_a_tick_is_one_update() {
        let mut c = Coalescer::new(Duration::from_millis(16));
        c.push(chunk("a"));
        let _ = c.take_due(Instant::now()).unwrap();

        for t in ["b", "c", "d"] {
            c.push(chunk(t));
        }
        let start = Instant::now();
        assert_eq!(c.deadline(), Some(start + Duration::from_millis(16)));
        assert!(c.take_due(start).is_none());

        tokio::time::advance(Duration::from_millis(16)).await;
        let (merged, n) = c.take_due(Instant::now()).unwrap();
        assert_eq!(merged.text, "bcd");
        assert_eq!(n, 3);
        assert_eq!(c.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_ignores_the_tick() {
        let mut c = Coalescer::new(Duration::from_millis(16));
        c.push(chunk("a"));
        let _ = c.take_due(Instant::now());
        c.push(chunk("b"));
        c.push(chunk("c"));
        let (merged, n) = c.flush().unwrap();
        assert_eq!((merged.text.as_str(), n), ("bc", 2));
        assert!(c.flush().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn update_rate_is_bounded() {
        let interval = Duration::from_millis(16);
        let mut c = Coalescer::new(interval);
        let mut applied = Vec::new();
        let mut text = String::new();

        // 100 chunks, one per millisecond, polled every millisecond.
        for i in 0..100 {
            c.push(chunk(&i.to_string()));
            if let Some((merged, _)) = c.take_due(Instant::now()) {
                applied.push(Instant::now());
                text.push_str(&merged.text);
            }
            tokio::time::advance(Duration::from_millis(1)).await;
        }
        if let Some((merged, _)) = c.flush() {
            text.push_str(&merged.text);
        }

        let expected: String = (0..100).map(|i: i32| i.to_string()).collect();
        assert_eq!(text, expected);
        assert!(applied.len() <= 100 / 16 + 1, "too many updates: {}", applied.len());
        for w in applied.windows(2) {
            assert!(w[1] - w[0] >= interval);
        }
    }
}
