//! CaptureLoop - Live-Local Acquisition Driver
//!
//! ## Responsibilities
//!
//! - Acquire a local frame source (hardware permission may be refused)
//! - Sample at a fixed cadence and push frames through encode -> annotate
//! - Backpressure: a shared busy flag bounds in-flight cycles to one;
//!   ticks that arrive while a cycle is outstanding are skipped entirely
//! - Survive individual tick failures; only stop() ends the loop

pub mod stub;

use crate::annotation_client::ProcessingBackend;
use crate::error::Result;
use crate::frame_codec::{self, DisplayFrame, RawFrame};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A live local frame source (webcam or equivalent)
#[async_trait]
pub trait FrameSource: Send + Sync + std::fmt::Debug {
    /// Sample the current frame. A source that is not ready yet may
    /// report zero dimensions; the codec handles the fallback.
    async fn sample(&self) -> Result<RawFrame>;

    /// Release the underlying device. Must be safe to call twice.
    fn release(&self);
}

/// Acquires frame sources, requesting hardware permission as needed
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    /// Acquire the capture device. Fails with `Error::AcquisitionDenied`
    /// when permission is refused.
    async fn acquire(&self) -> Result<Arc<dyn FrameSource>>;
}

/// Delivery callback for annotated frames. Awaited per frame so that
/// delivery order matches arrival order within one camera's loop.
pub type FrameCallback = Arc<dyn Fn(DisplayFrame) -> BoxFuture<'static, ()> + Send + Sync>;

/// Clears the busy flag when the cycle ends, including by panic; a wedged
/// flag would starve every subsequent tick
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle to a running capture loop
pub struct CaptureHandle {
    camera_id: String,
    stopped: Arc<AtomicBool>,
    task: JoinHandle<()>,
    source: Arc<dyn FrameSource>,
}

impl CaptureHandle {
    /// Stop the loop and release the capture source. Idempotent; the
    /// device is released synchronously from the caller's perspective.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.task.abort();
        self.source.release();
        tracing::info!(camera_id = %self.camera_id, "Capture loop stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn the fixed-interval sampling loop for one camera.
///
/// Each tick checks the shared busy flag: if the previous
/// capture/encode/send cycle has not completed, the tick is skipped with
/// no queueing and no overlap. A failed cycle (network or decode) is discarded
/// and the loop continues.
pub fn spawn(
    camera_id: String,
    source: Arc<dyn FrameSource>,
    interval: Duration,
    jpeg_quality: u8,
    backend: Arc<dyn ProcessingBackend>,
    on_frame: FrameCallback,
) -> CaptureHandle {
    let stopped = Arc::new(AtomicBool::new(false));
    let busy = Arc::new(AtomicBool::new(false));

    let loop_stopped = stopped.clone();
    let loop_source = source.clone();
    let loop_camera_id = camera_id.clone();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if loop_stopped.load(Ordering::SeqCst) {
                break;
            }

            // Busy gate: shed the tick if a cycle is still in flight
            if busy.swap(true, Ordering::SeqCst) {
                tracing::trace!(camera_id = %loop_camera_id, "Tick skipped - cycle in flight");
                continue;
            }

            let cycle_busy = busy.clone();
            let cycle_source = loop_source.clone();
            let cycle_backend = backend.clone();
            let cycle_on_frame = on_frame.clone();
            let cycle_camera_id = loop_camera_id.clone();

            // The cycle runs detached so slow annotation never stalls the
            // ticker; the busy flag is what bounds concurrency.
            tokio::spawn(async move {
                let _busy = BusyGuard(cycle_busy);
                if let Err(e) = run_cycle(
                    &cycle_camera_id,
                    cycle_source.as_ref(),
                    jpeg_quality,
                    cycle_backend.as_ref(),
                    &cycle_on_frame,
                )
                .await
                {
                    tracing::debug!(
                        camera_id = %cycle_camera_id,
                        error = %e,
                        "Capture cycle discarded"
                    );
                }
            });
        }
    });

    tracing::info!(
        camera_id = %camera_id,
        interval_ms = interval.as_millis() as u64,
        "Capture loop started"
    );

    CaptureHandle {
        camera_id,
        stopped,
        task,
        source,
    }
}

/// One sample -> encode -> annotate -> deliver cycle
async fn run_cycle(
    camera_id: &str,
    source: &dyn FrameSource,
    jpeg_quality: u8,
    backend: &dyn ProcessingBackend,
    on_frame: &FrameCallback,
) -> Result<()> {
    let raw = source.sample().await?;
    let jpeg = frame_codec::encode(&raw, jpeg_quality)?;
    let annotated = backend.annotate_frame(camera_id, jpeg).await?;
    let frame = frame_codec::decode_annotated(annotated)?;
    on_frame(frame).await;
    Ok(())
}
