//! Spectrum frames from the audio thread to the editor
//!
//! A fixed pool of frames cycles between two queues. The publisher takes a
//! free frame, fills it and pushes it to the ready queue; the receiver reads
//! ready frames and returns them to the free queue. When the editor falls
//! behind and the pool runs dry, new spectra are dropped and counted.

use crossbeam::queue::ArrayQueue;
use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Magnitude spectrum of one analyzer channel
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumFrame {
    pub channel: usize,
    pub magnitudes: Vec<f32>,
}

struct Shared {
    free: ArrayQueue<SpectrumFrame>,
    ready: ArrayQueue<SpectrumFrame>,
    dropped: CachePadded<AtomicU64>,
}

/// Audio-side end of the feed
pub struct SpectrumPublisher {
    shared: Arc<Shared>,
}

/// Editor-side end of the feed
pub struct SpectrumReceiver {
    shared: Arc<Shared>,
}

/// Create a feed of `pool_size` frames holding `num_bins` magnitudes each
pub fn spectrum_channel(num_bins: usize, pool_size: usize) -> (SpectrumPublisher, SpectrumReceiver) {
    let pool_size = pool_size.max(1);
    let shared = Arc::new(Shared {
        free: ArrayQueue::new(pool_size),
        ready: ArrayQueue::new(pool_size),
        dropped: CachePadded::new(AtomicU64::new(0)),
    });

    for _ in 0..pool_size {
        let _ = shared.free.push(SpectrumFrame {
            channel: 0,
            magnitudes: vec![0.0; num_bins],
        });
    }

    (
        SpectrumPublisher {
            shared: Arc::clone(&shared),
        },
        SpectrumReceiver { shared },
    )
}

impl SpectrumPublisher {
    /// Copy a spectrum into a pooled frame
    ///
    /// Returns `false` when no frame was free and the spectrum was dropped.
    pub fn publish(&self, channel: usize, magnitudes: &[f32]) -> bool {
        let Some(mut frame) = self.shared.free.pop() else {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        frame.channel = channel;
        let len = frame.magnitudes.len().min(magnitudes.len());
        frame.magnitudes[..len].copy_from_slice(&magnitudes[..len]);
        frame.magnitudes[len..].fill(0.0);

        // Both queues hold the whole pool, so this push cannot fail
        let _ = self.shared.ready.push(frame);
        true
    }
}

impl SpectrumReceiver {
    /// Visit every ready frame in publication order and recycle it
    ///
    /// Returns the number of frames visited.
    pub fn drain<F>(&self, mut visit: F) -> usize
    where
        F: FnMut(&SpectrumFrame),
    {
        let mut count = 0;
        while let Some(frame) = self.shared.ready.pop() {
            visit(&frame);
            let _ = self.shared.free.push(frame);
            count += 1;
        }
        count
    }

    /// Frames waiting to be drained
    pub fn pending(&self) -> usize {
        self.shared.ready.len()
    }

    /// Spectra dropped because the pool was exhausted
    pub fn dropped_frames(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}
