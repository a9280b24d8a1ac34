// src/commands/progress.rs
//! Activity animation while the package manager runs
//!
//! A bar bounces between two walls and grows by one cell each time it hits
//! the right wall, up to 20 cells:
//!
//! ```text
//! Progress: |--->               |
//! ```

use indicatif::{ProgressBar, ProgressStyle};
use legendary::host::{CommandOutput, CommandRunner, Invocation};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const MAX_LENGTH: usize = 20;
const TICK: Duration = Duration::from_millis(100);
const WALL: char = '|';

/// Animation state, advanced once per tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BounceAnimation {
    direction: i32,
    position: i32,
    length: usize,
}

impl Default for BounceAnimation {
    fn default() -> Self {
        Self {
            direction: 1,
            position: 0,
            length: 1,
        }
    }
}

impl BounceAnimation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render the current state, walls included
    pub fn frame(&self) -> String {
        let mut bar = String::with_capacity(MAX_LENGTH + 2);
        bar.push(WALL);
        for i in 0..MAX_LENGTH {
            let c = if i >= self.length {
                ' '
            } else if i as i32 == self.position {
                if self.direction > 0 { '>' } else { '<' }
            } else {
                '-'
            };
            bar.push(c);
        }
        bar.push(WALL);
        bar
    }

    /// Move one cell; turn around at either end, growing at the right end
    pub fn advance(&mut self) {
        self.position += self.direction;
        let right_end = self.length as i32 - 1;
        if self.position >= right_end || self.position <= 0 {
            self.direction = -self.direction;
            if self.position >= right_end && self.length < MAX_LENGTH {
                self.length += 1;
            }
        }
    }
}

/// Runs the animation on its own thread until dropped
pub struct ActivityIndicator {
    bar: ProgressBar,
    stop: Arc<AtomicBool>,
    ticker: Option<JoinHandle<()>>,
}

impl ActivityIndicator {
    pub fn start() -> Self {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{prefix:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(style);
        bar.set_prefix("Progress:");

        let stop = Arc::new(AtomicBool::new(false));
        let ticker = {
            let bar = bar.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut animation = BounceAnimation::new();
                while !stop.load(Ordering::Relaxed) {
                    bar.set_message(animation.frame());
                    animation.advance();
                    thread::sleep(TICK);
                }
            })
        };

        Self {
            bar,
            stop,
            ticker: Some(ticker),
        }
    }
}

impl Drop for ActivityIndicator {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.join();
        }
        self.bar.finish_and_clear();
    }
}

/// Shows the animation for as long as each chrooted command runs
pub struct AnimatedRunner {
    inner: Arc<dyn CommandRunner>,
}

impl AnimatedRunner {
    pub fn new(inner: Arc<dyn CommandRunner>) -> Self {
        Self { inner }
    }
}

impl CommandRunner for AnimatedRunner {
    fn run_chrooted(&self, root: &Path, invocation: &Invocation) -> legendary::Result<CommandOutput> {
        let _indicator = ActivityIndicator::start();
        self.inner.run_chrooted(root, invocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_frames() {
        let mut anim = BounceAnimation::new();
        assert_eq!(anim.frame(), format!("|>{}|", " ".repeat(19)));

        anim.advance();
        assert_eq!(anim.frame(), format!("|-<{}|", " ".repeat(18)));

        anim.advance();
        assert_eq!(anim.frame(), format!("|>-{}|", " ".repeat(18)));
    }

    #[test]
    fn test_frame_width_is_constant() {
        let mut anim = BounceAnimation::new();
        for _ in 0..1000 {
            assert_eq!(anim.frame().chars().count(), MAX_LENGTH + 2);
            anim.advance();
        }
    }

    #[test]
    fn test_length_caps_at_max() {
        let mut anim = BounceAnimation::new();
        for _ in 0..2000 {
            anim.advance();
        }
        assert_eq!(anim.length, MAX_LENGTH);
        assert!(anim.position >= 0 && anim.position < MAX_LENGTH as i32);
    }

    #[test]
    fn test_indicator_stops_on_drop() {
        let indicator = ActivityIndicator::start();
        thread::sleep(Duration::from_millis(20));
        drop(indicator);
    }
}
