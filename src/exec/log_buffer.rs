// src/exec/log_buffer.rs

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::exec::sink::LogSink;

#[derive(Debug)]
struct BufferState {
    lines: Vec<String>,
    last_flush: Instant,
}

/// Synchronized buffer between the output reader and the log sink.
///
/// Lines are flushed in append order once `rows` lines are buffered or more
/// than `interval` has passed since the previous flush, whichever comes
/// first. Sink failures are logged and the batch is dropped.
#[derive(Debug)]
pub struct LogBuffer {
    state: Mutex<BufferState>,
    rows: usize,
    interval: Duration,
    sink: Arc<dyn LogSink>,
}

impl LogBuffer {
    pub fn new(sink: Arc<dyn LogSink>, rows: usize, interval: Duration) -> Self {
        Self {
            state: Mutex::new(BufferState {
                lines: Vec::new(),
                last_flush: Instant::now(),
            }),
            rows: rows.max(1),
            interval,
            sink,
        }
    }

    fn state(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn append(&self, line: String) {
        let mut state = self.state();
        state.lines.push(line);
        if state.lines.len() >= self.rows || state.last_flush.elapsed() > self.interval {
            self.flush_locked(&mut state);
        }
    }

    /// Send everything buffered to the sink.
    pub fn flush(&self) {
        let mut state = self.state();
        self.flush_locked(&mut state);
    }

    pub fn buffered(&self) -> usize {
        self.state().lines.len()
    }

    fn flush_locked(&self, state: &mut BufferState) {
        state.last_flush = Instant::now();
        if state.lines.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut state.lines);
        if let Err(e) = self.sink.handle(&batch) {
            warn!(lines = batch.len(), error = %e, "log sink rejected batch");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Result;

    #[derive(Debug, Default)]
    struct Collect(Mutex<Vec<Vec<String>>>);

    impl LogSink for Collect {
        fn handle(&self, lines: &[String]) -> Result<()> {
            self.0.lock().unwrap().push(lines.to_vec());
            Ok(())
        }
    }

    #[test]
    fn flushes_by_row_count() {
        let sink = Arc::new(Collect::default());
        let buffer = LogBuffer::new(sink.clone(), 2, Duration::from_secs(3600));
        for i in 0..5 {
            buffer.append(format!("l{i}"));
        }
        assert_eq!(buffer.buffered(), 1);
        buffer.flush();

        let batches = sink.0.lock().unwrap().clone();
        assert_eq!(
            batches,
            vec![vec!["l0", "l1"], vec!["l2", "l3"], vec!["l4"]]
        );
    }

    #[test]
    fn flushes_by_elapsed_time() {
        let sink = Arc::new(Collect::default());
        let buffer = LogBuffer::new(sink.clone(), 100, Duration::ZERO);
        std::thread::sleep(Duration::from_millis(2));
        buffer.append("late".into());
        assert_eq!(buffer.buffered(), 0);
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }
}
