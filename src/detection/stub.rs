//! Scripted detector for exercising the runner without the network.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{DetectionResponse, Detector, DetectorError};
use crate::models::DetectionRecord;

type Scripted = Result<Vec<DetectionRecord>, DetectorError>;

/// Answers from, in order of precedence: a per-image table keyed by the exact
/// image bytes, a FIFO queue, then a fallback (empty detections by default).
pub struct StubDetector {
    by_image: HashMap<Vec<u8>, Scripted>,
    queue: Mutex<VecDeque<Scripted>>,
    fallback: Scripted,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StubDetector {
    pub fn new() -> Self {
        Self {
            by_image: HashMap::new(),
            queue: Mutex::new(VecDeque::new()),
            fallback: Ok(Vec::new()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answer with these records unless something more specific matches
    pub fn returning(records: Vec<DetectionRecord>) -> Self {
        Self::new().with_fallback(Ok(records))
    }

    pub fn with_fallback(mut self, result: Scripted) -> Self {
        self.fallback = result;
        self
    }

    /// Answer for one specific image
    pub fn on_image(mut self, image: impl Into<Vec<u8>>, result: Scripted) -> Self {
        self.by_image.insert(image.into(), result);
        self
    }

    /// Queue an answer for the next call that has no per-image entry
    pub fn then(self, result: Scripted) -> Self {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(result);
        }
        self
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_answer(&self, image: &[u8]) -> Scripted {
        if let Some(answer) = self.by_image.get(image) {
            return answer.clone();
        }
        let queued = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        queued.unwrap_or_else(|| self.fallback.clone())
    }
}

impl Default for StubDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &str {
        "stub"
    }

    async fn detect(&self, image: &[u8]) -> Result<DetectionResponse, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let started = tokio::time::Instant::now();

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let records = self.next_answer(image)?;
        Ok(DetectionResponse {
            records,
            latency: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NormalizedBox;

    fn person() -> DetectionRecord {
        DetectionRecord::new("Person", 0.9, NormalizedBox::new(0.1, 0.1, 0.2, 0.2))
    }

    #[tokio::test]
    async fn precedence_is_image_then_queue_then_fallback() {
        let stub = StubDetector::returning(vec![])
            .on_image(b"special".to_vec(), Ok(vec![person(), person()]))
            .then(Err(DetectorError::Quota("slow down".into())));

        assert_eq!(stub.detect(b"special").await.unwrap().records.len(), 2);
        assert!(matches!(stub.detect(b"other").await, Err(DetectorError::Quota(_))));
        assert!(stub.detect(b"other").await.unwrap().records.is_empty());
        assert_eq!(stub.calls(), 3);
    }
}
