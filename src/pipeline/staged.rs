// Staged execution - detection on a worker thread, extraction on the caller
//
// The detection stage runs inside a scoped thread and pushes one result per
// chunk into a bounded rtrb SPSC ring buffer; the calling thread pops them
// in order and runs extraction. The queue is FIFO, so the output is
// identical to sequential execution.
//
// Backpressure: a full queue makes the worker sleep briefly and retry. A
// dropped consumer (fatal error downstream) makes the worker stop.

use rtrb::{PopError, PushError, RingBuffer};
use std::thread;
use std::time::Duration;

use super::stages::{DetectedChunk, DetectionStage};
use crate::error::DetectionError;
use crate::source::{ChunkPlan, ChunkSource};

/// Poll interval while the queue is full or empty
const QUEUE_POLL: Duration = Duration::from_millis(1);

/// Run `stage` over `plan` on a worker thread, feeding `consume` in chunk order
///
/// # Arguments
/// * `source` - Raw data source, moved to the worker for the duration of the call
/// * `stage` - Detection stage with its pending-tail state
/// * `plan` - Chunks to process
/// * `queue_depth` - Ring buffer capacity in chunks
/// * `consume` - Called on the calling thread for every chunk result; an error stops the run
pub fn run_staged<S, F>(
    source: &mut S,
    mut stage: DetectionStage,
    plan: ChunkPlan,
    queue_depth: usize,
    mut consume: F,
) -> Result<(), DetectionError>
where
    S: ChunkSource + Send + ?Sized,
    F: FnMut(Result<DetectedChunk, DetectionError>) -> Result<(), DetectionError>,
{
    let (mut producer, mut consumer) =
        RingBuffer::<Result<DetectedChunk, DetectionError>>::new(queue_depth.max(1));

    thread::scope(|scope| {
        let worker = scope.spawn(move || {
            for bounds in plan {
                let mut item = stage.process(&mut *source, &bounds);
                let fatal = matches!(&item, Err(err) if !err.is_recoverable());

                loop {
                    match producer.push(item) {
                        Ok(()) => break,
                        Err(PushError::Full(rejected)) => {
                            if producer.is_abandoned() {
                                tracing::debug!("[Pipeline] Consumer gone, stopping detection worker");
                                return;
                            }
                            item = rejected;
                            thread::sleep(QUEUE_POLL);
                        }
                    }
                }

                if fatal {
                    return;
                }
            }
        });

        let result = loop {
            match consumer.pop() {
                Ok(item) => {
                    if let Err(err) = consume(item) {
                        break Err(err);
                    }
                }
                Err(PopError::Empty) => {
                    if consumer.is_abandoned() {
                        // producer finished; drain anything pushed before it left
                        match consumer.pop() {
                            Ok(item) => {
                                if let Err(err) = consume(item) {
                                    break Err(err);
                                }
                            }
                            Err(PopError::Empty) => break Ok(()),
                        }
                    } else {
                        thread::sleep(QUEUE_POLL);
                    }
                }
            }
        };

        // let a blocked worker see the abandoned queue before joining
        drop(consumer);
        match worker.join() {
            Ok(()) => result,
            Err(_) => Err(DetectionError::Source {
                reason: "detection worker panicked".to_string(),
            }),
        }
    })
}
