use std::{collections::VecDeque, sync::Arc, thread};

use crossbeam_channel::{Receiver, Sender};

use crate::{
    config::WindowConfig,
    matcher::GestureMatcher,
    types::{Frame, MatchResult, Sequence},
};

/// Sliding window over a live frame stream that decides when to attempt a match.
pub struct FrameWindow {
    config: WindowConfig,
    min_frames: usize,
    frames: VecDeque<Frame>,
    since_attempt: usize,
}

impl FrameWindow {
    pub fn new(config: WindowConfig, min_frames: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(config.max_frames),
            config,
            min_frames,
            since_attempt: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.since_attempt = 0;
    }

    /// Adds a frame and returns the window contents when a match attempt is due.
    ///
    /// Low-confidence and malformed frames are dropped. A time gap, a step back in time or
    /// a handedness change starts the window over.
    pub fn push(&mut self, frame: Frame) -> Option<Sequence> {
        if frame.confidence < self.config.min_confidence {
            return None;
        }
        if let Err(err) = frame.validate(self.frames.len()) {
            log::warn!("dropping frame from stream: {err}");
            return None;
        }

        if let Some(last) = self.frames.back() {
            let gap = frame.timestamp - last.timestamp;
            if gap > self.config.max_gap || gap < 0.0 || frame.handedness != last.handedness {
                log::debug!("frame stream discontinuity after {} frames, restarting window", self.frames.len());
                self.clear();
            }
        }

        self.frames.push_back(frame);
        while self.frames.len() > self.config.max_frames {
            self.frames.pop_front();
        }
        self.since_attempt += 1;

        if self.frames.len() >= self.min_frames && self.since_attempt >= self.config.stride {
            self.since_attempt = 0;
            return Some(Sequence::new(self.frames.iter().cloned().collect()));
        }
        None
    }
}

fn run_worker_loop(
    matcher: Arc<GestureMatcher>,
    frame_rx: Receiver<Frame>,
    result_tx: Sender<MatchResult>,
    mut window: FrameWindow,
) {
    while let Ok(frame) = frame_rx.recv() {
        let Some(sequence) = window.push(frame) else {
            continue;
        };
        match matcher.match_sequence(&sequence) {
            Ok(result) if result.is_match() => {
                log::info!("stream matched {}", result.display_text());
                window.clear();
                let _ = result_tx.try_send(result);
            }
            Ok(_) => {}
            Err(err) => {
                log::warn!("stream match failed: {err}");
            }
        }
    }
}

/// Matches a live frame stream on a background thread. Only matches are sent; the thread
/// exits when the frame channel closes.
pub fn start_match_worker(
    matcher: Arc<GestureMatcher>,
    frame_rx: Receiver<Frame>,
    result_tx: Sender<MatchResult>,
    config: WindowConfig,
) -> thread::JoinHandle<()> {
    log::info!(
        "starting match worker: window {} frames, stride {}",
        config.max_frames,
        config.stride
    );
    let window = FrameWindow::new(config, matcher.config().min_frames);
    thread::spawn(move || run_worker_loop(matcher, frame_rx, result_tx, window))
}
