use std::sync::{Mutex, MutexGuard, PoisonError};

/// Unbounded, ordered buffer of output lines shared between the stream
/// readers of a job and a single polling consumer.
#[derive(Debug, Default)]
pub struct LogSink {
    lines: Mutex<Vec<String>>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking producer must not wedge the consumer, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a line to the tail of the buffer
    pub fn push(&self, line: impl Into<String>) {
        self.lock().push(line.into());
    }

    /// Take every buffered line, leaving the buffer empty.
    ///
    /// The swap happens under the lock, so a concurrent `push` lands either in
    /// this snapshot or the next one, never both.
    pub fn drain_all(&self) -> Vec<String> {
        std::mem::take(&mut *self.lock())
    }

    /// Discard all buffered lines
    pub fn reset(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn drain_returns_lines_in_push_order() {
        let sink = LogSink::new();
        sink.push("one");
        sink.push(String::from("two"));
        sink.push("three");

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.drain_all(), vec!["one", "two", "three"]);
        assert!(sink.is_empty());
    }

    #[test]
    fn second_drain_is_empty() {
        let sink = LogSink::new();
        sink.push("only");

        assert_eq!(sink.drain_all(), vec!["only"]);
        assert!(sink.drain_all().is_empty());
    }

    #[test]
    fn reset_discards_lines() {
        let sink = LogSink::new();
        sink.push("stale");
        sink.reset();

        assert!(sink.drain_all().is_empty());

        sink.push("fresh");
        assert_eq!(sink.drain_all(), vec!["fresh"]);
    }

    #[test]
    fn concurrent_producers_lose_and_duplicate_nothing() {
        const PRODUCERS: usize = 4;
        const LINES: usize = 500;

        let sink = Arc::new(LogSink::new());
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    for i in 0..LINES {
                        sink.push(format!("{p}:{i}"));
                    }
                })
            })
            .collect();

        let mut collected = Vec::new();
        while producers.iter().any(|h| !h.is_finished()) {
            collected.extend(sink.drain_all());
        }
        for producer in producers {
            producer.join().unwrap();
        }
        collected.extend(sink.drain_all());

        assert_eq!(collected.len(), PRODUCERS * LINES);
        let unique: HashSet<_> = collected.iter().collect();
        assert_eq!(unique.len(), collected.len());

        // Each producer's lines keep their relative order across snapshots
        for p in 0..PRODUCERS {
            let prefix = format!("{p}:");
            let seq: Vec<usize> = collected
                .iter()
                .filter_map(|l| l.strip_prefix(&prefix))
                .map(|n| n.parse().unwrap())
                .collect();
            assert_eq!(seq, (0..LINES).collect::<Vec<_>>());
        }
    }
}
