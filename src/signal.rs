//! Cooperative termination.
//!
//! The loop polls a `TerminationSignal` once per cycle. `ShutdownFlag` is the
//! shared implementation; it can be tripped by Ctrl-C, by the interactive
//! quit key, or by anything else holding a clone.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};

/// Polled termination condition.
pub trait TerminationSignal {
    fn should_terminate(&self) -> bool;
}

/// Shared stop flag. Clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag {
    stop: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Trip the flag on SIGINT, SIGTERM or SIGHUP. Can only be installed once
    /// per process.
    pub fn install_ctrlc(&self) -> Result<()> {
        let flag = self.clone();
        ctrlc::set_handler(move || {
            log::info!("interrupt received, stopping after the current cycle");
            flag.trigger();
        })
        .context("error setting Ctrl-C handler")
    }

    /// Trip the flag when a line equal to `quit_key` (case-insensitive) is
    /// read from stdin. Closing stdin leaves the flag clear.
    pub fn spawn_quit_key_listener(&self, quit_key: char) -> Result<()> {
        let flag = self.clone();
        std::thread::Builder::new()
            .name("quit-key".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                watch_for_quit(stdin.lock(), quit_key, &flag);
            })
            .context("spawn quit-key listener")?;
        Ok(())
    }
}

impl TerminationSignal for ShutdownFlag {
    fn should_terminate(&self) -> bool {
        self.is_set()
    }
}

fn watch_for_quit<R: BufRead>(reader: R, quit_key: char, flag: &ShutdownFlag) {
    for line in reader.lines() {
        let Ok(line) = line else {
            break;
        };
        let mut chars = line.trim().chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if c.eq_ignore_ascii_case(&quit_key) {
                log::info!("quit key pressed");
                flag.trigger();
                return;
            }
        }
    }
    // Stdin closed: a detached process keeps running until signalled.
    log::debug!("stdin closed, quit key disabled");
}
