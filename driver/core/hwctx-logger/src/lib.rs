//! # Ring Logger
//!
//! A [`log::Log`] sink that keeps the most recent formatted lines in memory,
//! the driver's message buffer. Lines read `"[LEVEL] target: message"`; once
//! the ring is full the oldest line is dropped and counted.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use hwctx_sync::SpinLock;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

pub struct RingLogger {
    max_level: LevelFilter,
    capacity: usize,
    lines: SpinLock<VecDeque<String>>,
    evicted: AtomicUsize,
}

impl RingLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter, capacity: usize) -> Self {
        Self {
            max_level,
            capacity,
            lines: SpinLock::new(VecDeque::new()),
            evicted: AtomicUsize::new(0),
        }
    }

    /// Install as the global logger. Call once during attach; the logger
    /// lives for the rest of the program.
    ///
    /// # Errors
    /// [`SetLoggerError`] if a logger is already installed.
    pub fn init(self) -> Result<&'static Self, SetLoggerError> {
        let logger: &'static Self = Box::leak(Box::new(self));
        log::set_logger(logger)?;
        log::set_max_level(logger.max_level);
        Ok(logger)
    }

    /// Remove and return every buffered line, oldest first.
    pub fn drain(&self) -> Vec<String> {
        self.lines.with_lock(|lines| lines.drain(..).collect())
    }

    /// Copy of the buffered lines, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.with_lock(|lines| lines.iter().cloned().collect())
    }

    /// Lines dropped because the ring was full.
    #[must_use]
    pub fn evicted(&self) -> usize {
        self.evicted.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.with_lock(|lines| lines.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, line: String) {
        let dropped = self.lines.with_lock(|lines| {
            lines.push_back(line);
            let mut dropped = 0;
            while lines.len() > self.capacity {
                lines.pop_front();
                dropped += 1;
            }
            dropped
        });
        if dropped > 0 {
            self.evicted.fetch_add(dropped, Ordering::Relaxed);
        }
    }
}

impl Log for RingLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.push(format!(
            "[{}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        ));
    }

    fn flush(&self) {}
}
