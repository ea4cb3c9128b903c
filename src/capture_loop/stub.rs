//! Stub frame source - synthetic frames for deployments without a real
//! capture device and for tests.

use super::{CaptureProvider, FrameSource};
use crate::error::{Error, Result};
use crate::frame_codec::{RawFrame, DEFAULT_HEIGHT, DEFAULT_WIDTH};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Generates a moving gradient test pattern
#[derive(Debug)]
pub struct StubFrameSource {
    width: u32,
    height: u32,
    released: AtomicBool,
    frame_counter: AtomicU64,
}

impl StubFrameSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            released: AtomicBool::new(false),
            frame_counter: AtomicU64::new(0),
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSource for StubFrameSource {
    async fn sample(&self) -> Result<RawFrame> {
        if self.is_released() {
            return Err(Error::Internal("Capture source released".to_string()));
        }

        let n = self.frame_counter.fetch_add(1, Ordering::SeqCst);
        let mut pixels = Vec::with_capacity((self.width * self.height * 3) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                pixels.push(((x + n as u32) % 256) as u8);
                pixels.push((y % 256) as u8);
                pixels.push(((x + y) % 256) as u8);
            }
        }

        Ok(RawFrame {
            width: self.width,
            height: self.height,
            pixels,
        })
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Provider handing out stub sources; can be configured to refuse, which
/// models a denied hardware permission request.
pub struct StubCaptureProvider {
    deny: bool,
}

impl StubCaptureProvider {
    pub fn new() -> Self {
        Self { deny: false }
    }

    pub fn denying() -> Self {
        Self { deny: true }
    }
}

impl Default for StubCaptureProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureProvider for StubCaptureProvider {
    async fn acquire(&self) -> Result<Arc<dyn FrameSource>> {
        if self.deny {
            return Err(Error::AcquisitionDenied(
                "Camera permission refused".to_string(),
            ));
        }
        Ok(Arc::new(StubFrameSource::new(DEFAULT_WIDTH, DEFAULT_HEIGHT)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_source_sample_and_release() {
        let source = StubFrameSource::new(8, 8);
        let frame = source.sample().await.unwrap();
        assert_eq!(frame.pixels.len(), 8 * 8 * 3);

        source.release();
        assert!(source.sample().await.is_err());
    }

    #[tokio::test]
    async fn test_denying_provider() {
        let provider = StubCaptureProvider::denying();
        let err = provider.acquire().await.unwrap_err();
        assert!(matches!(err, Error::AcquisitionDenied(_)));
    }
}
