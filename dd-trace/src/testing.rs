//! In-memory test doubles, grounded on
//! `opentelemetry_sdk::testing::trace::InMemorySpanExporter`: a
//! `Collector` that stores every chunk it receives instead of sending it
//! anywhere, so tests can assert on what a tracer produced.

use std::sync::Mutex;

use crate::collector::Collector;
use crate::span_data::SpanData;

#[derive(Default)]
pub struct InMemoryCollector {
    chunks: Mutex<Vec<Vec<SpanData>>>,
}

impl InMemoryCollector {
    pub fn new() -> Self {
        InMemoryCollector::default()
    }

    pub fn chunks(&self) -> Vec<Vec<SpanData>> {
        self.chunks.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.chunks.lock().unwrap().clear();
    }
}

impl Collector for InMemoryCollector {
    fn send(&self, chunk: Vec<SpanData>) {
        self.chunks.lock().unwrap().push(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_every_chunk_sent() {
        let collector = InMemoryCollector::new();
        collector.send(vec![SpanData::new_for_test("svc", "op", "res")]);
        assert_eq!(collector.chunks().len(), 1);
    }
}
