use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::frame::SampleFrame;
use super::source::FrameSource;
use crate::protocol::decoder::DecoderStats;

/// Frames buffered between ingestion and rendering before the reader blocks.
const CHANNEL_DEPTH: usize = 32;
/// How long `stop` waits for a source blocked in a read before detaching it.
const RELEASE_TIMEOUT: Duration = Duration::from_millis(500);

/// What an ingestion thread reports once its source is released.
#[derive(Clone, Debug, Default)]
pub struct SessionSummary {
    pub source: String,
    pub frames: u64,
    pub samples: u64,
    pub decoder: Option<DecoderStats>,
}

/// One active source running on its own ingestion thread.
///
/// The only thing shared with the render side is the frame channel. Dropping
/// or stopping the session signals the thread, closes the channel and joins,
/// which drops (and so closes) the source.
///
/// A plain device read cannot be interrupted. If the thread is still inside
/// `next_frames` after [`RELEASE_TIMEOUT`], it is detached: it exits (and
/// releases the source) on its next return, or with the process.
pub struct Session {
    name: String,
    stop: Arc<AtomicBool>,
    frames: Receiver<SampleFrame>,
    /// Disconnects when the ingestion thread exits.
    released: Receiver<()>,
    handle: Option<JoinHandle<Result<SessionSummary>>>,
}

impl Session {
    pub fn start(mut source: Box<dyn FrameSource>) -> Result<Self> {
        let name = source.name().to_string();
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = bounded::<SampleFrame>(CHANNEL_DEPTH);
        let (release_guard, released) = bounded::<()>(0);

        let thread_stop = stop.clone();
        let handle = std::thread::Builder::new()
            .name(format!("ingest:{name}"))
            .spawn(move || {
                let _release_guard = release_guard;
                let mut summary = SessionSummary {
                    source: source.name().to_string(),
                    ..Default::default()
                };
                let mut batch = Vec::new();

                'ingest: while !thread_stop.load(Ordering::Relaxed) {
                    let more = source.next_frames(&mut batch)?;
                    for frame in batch.drain(..) {
                        summary.frames += 1;
                        summary.samples += frame.len() as u64;
                        if tx.send(frame).is_err() {
                            break 'ingest;
                        }
                    }
                    if !more {
                        log::info!("{}: end of stream", summary.source);
                        break;
                    }
                }

                summary.decoder = source.decoder_stats();
                Ok(summary)
            })
            .context("Failed to spawn ingestion thread")?;

        log::info!("session started: {}", name);
        Ok(Self {
            name,
            stop,
            frames: rx,
            released,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Frames in arrival order. Disconnects when the source ends.
    pub fn frames(&self) -> &Receiver<SampleFrame> {
        &self.frames
    }

    /// Stops pulling, releases the source and returns its summary.
    pub fn stop(mut self) -> Result<SessionSummary> {
        self.shutdown()
            .unwrap_or_else(|| Err(anyhow!("session {} already stopped", self.name)))
    }

    fn shutdown(&mut self) -> Option<Result<SessionSummary>> {
        self.stop.store(true, Ordering::Relaxed);
        // Closing the receiver unblocks a sender waiting on a full channel.
        // The replacement is already disconnected.
        let (_, closed) = bounded(0);
        drop(std::mem::replace(&mut self.frames, closed));
        let handle = self.handle.take()?;
        if let Err(RecvTimeoutError::Timeout) = self.released.recv_timeout(RELEASE_TIMEOUT) {
            log::warn!("session {}: source is blocked in a read, detaching", self.name);
            drop(handle);
            return Some(Err(anyhow!(
                "source {} did not return within {:?}; ingestion thread detached",
                self.name,
                RELEASE_TIMEOUT
            )));
        }
        let result = match handle.join() {
            Ok(result) => result,
            Err(_) => Err(anyhow!("ingestion thread for {} panicked", self.name)),
        };
        log::info!("session stopped: {}", self.name);
        Some(result)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(Err(err)) = self.shutdown() {
            log::warn!("session {} ended with error: {:#}", self.name, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Counting {
        remaining: Option<u32>,
        produced: u32,
    }

    impl FrameSource for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn next_frames(&mut self, out: &mut Vec<SampleFrame>) -> Result<bool> {
            if let Some(remaining) = self.remaining.as_mut() {
                if *remaining == 0 {
                    return Ok(false);
                }
                *remaining -= 1;
            } else {
                std::thread::sleep(Duration::from_millis(1));
            }
            self.produced += 1;
            out.push(SampleFrame::new(vec![self.produced as i16; 4], 8000));
            Ok(true)
        }
    }

    /// Stands in for a device read that never sees data.
    struct Stalled {
        gate: Receiver<()>,
    }

    impl FrameSource for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        fn next_frames(&mut self, _out: &mut Vec<SampleFrame>) -> Result<bool> {
            let _ = self.gate.recv();
            Ok(false)
        }
    }

    struct Failing;

    impl FrameSource for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn next_frames(&mut self, _out: &mut Vec<SampleFrame>) -> Result<bool> {
            Err(anyhow!("device unplugged"))
        }
    }

    #[test]
    fn delivers_every_frame_in_order() {
        let session = Session::start(Box::new(Counting {
            remaining: Some(100),
            produced: 0,
        }))
        .unwrap();

        let firsts: Vec<i16> = session.frames().iter().map(|f| f.samples[0]).collect();
        assert_eq!(firsts, (1..=100).collect::<Vec<i16>>());

        let summary = session.stop().unwrap();
        assert_eq!(summary.frames, 100);
        assert_eq!(summary.samples, 400);
        assert!(summary.decoder.is_none());
    }

    #[test]
    fn stop_tears_down_endless_source() {
        let session = Session::start(Box::new(Counting {
            remaining: None,
            produced: 0,
        }))
        .unwrap();
        assert_eq!(session.name(), "counting");
        let first = session.frames().recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.samples[0], 1);

        let summary = session.stop().unwrap();
        assert!(summary.frames >= 1);
    }

    #[test]
    fn stop_detaches_source_blocked_in_read() {
        let (open, gate) = bounded::<()>(0);
        let session = Session::start(Box::new(Stalled { gate })).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let started = std::time::Instant::now();
        let err = session.stop().unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(err.to_string().contains("detached"));

        // Unblocks the detached thread so it can exit.
        drop(open);
    }

    #[test]
    fn source_errors_surface_on_stop() {
        let session = Session::start(Box::new(Failing)).unwrap();
        assert!(session.frames().recv().is_err());
        let err = session.stop().unwrap_err();
        assert!(err.to_string().contains("device unplugged"));
    }

    #[test]
    fn switching_sources_is_stop_then_start() {
        let first = Session::start(Box::new(Counting {
            remaining: None,
            produced: 0,
        }))
        .unwrap();
        first.frames().recv().unwrap();
        first.stop().unwrap();

        let second = Session::start(Box::new(Counting {
            remaining: Some(2),
            produced: 0,
        }))
        .unwrap();
        assert_eq!(second.frames().iter().count(), 2);
    }
}
