//! Terminal status screen and the `q` key reader.
//!
//! The screen thread only reads the published snapshot; the key reader only
//! sets the quit flag. Neither touches the bus.

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use balancer_core::StatusBoard;

const POLL: Duration = Duration::from_millis(50);

/// Whether a line typed on stdin asks to quit.
pub fn is_quit_command(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "q" | "quit")
}

pub struct Display {
    stop: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl Display {
    pub fn spawn(board: StatusBoard, quit: Arc<AtomicBool>, refresh: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = stop.clone();
        let quit_screen = quit.clone();
        let join_handle = std::thread::spawn(move || {
            let mut last_cycle = None;
            while !stop_clone.load(Ordering::Relaxed) && !quit_screen.load(Ordering::Relaxed) {
                let snap = board.latest();
                if last_cycle != Some(snap.cycle) {
                    last_cycle = Some(snap.cycle);
                    let mut out = std::io::stdout().lock();
                    let _ = write!(out, "\x1b[2J\x1b[H{}", balancer_ui::render(&snap));
                    let _ = out.flush();
                }
                let mut waited = Duration::ZERO;
                while waited < refresh && !stop_clone.load(Ordering::Relaxed) {
                    std::thread::sleep(POLL);
                    waited += POLL;
                }
            }
            tracing::trace!("display thread exiting cleanly");
        });

        // Blocks on stdin, so it is detached rather than joined.
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(l) if is_quit_command(&l) => {
                        tracing::info!("quit requested from keyboard");
                        quit.store(true, Ordering::Relaxed);
                        break;
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        });

        Self {
            stop,
            join_handle: Some(join_handle),
        }
    }
}

impl Drop for Display {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("display thread joined successfully"),
                Err(e) => tracing::warn!(?e, "display thread panicked during shutdown"),
            }
        }
    }
}
