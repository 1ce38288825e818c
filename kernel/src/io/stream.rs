// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The byte stream abstraction shared by consoles and ports.
//!
//! A stream is whatever can move bytes: a serial port, a terminal,
//! a loopback buffer. Reads are non-blocking (a stream with
//! nothing to offer returns a zero-length read); the blocking
//! behaviour is layered on top by [`wait_char`], which polls with a
//! timeout and yields between polls.

use crate::multitasking::scheduler;
use crate::status::{Error, Result};
use crate::time::{self, Ticks};

/// A byte transport.
///
/// Implementations use interior mutability; streams are shared
/// between producers and consumers, often across interrupts.
///
pub trait Stream: Send + Sync {
    /// Reads available bytes into `buf`, returning how many were
    /// read. `Ok(0)` means nothing is available right now.
    ///
    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Writes bytes from `buf`, returning how many were accepted.
    ///
    fn write(&self, buf: &[u8]) -> Result<usize>;

    /// Pushes any buffered output towards the device. Optional.
    ///
    fn flush(&self) {}
}

/// Writes one byte to the stream.
///
pub fn put_char(stream: &dyn Stream, byte: u8) -> Result<()> {
    let written = stream.write(core::slice::from_ref(&byte))?;
    if written == 0 {
        return Err(Error::Io);
    }

    Ok(())
}

/// Writes a string to the stream, returning how many bytes were
/// accepted.
///
pub fn put_str(stream: &dyn Stream, text: &str) -> Result<usize> {
    stream.write(text.as_bytes())
}

/// Blocks until the stream yields a byte, or `timeout` ticks have
/// elapsed since the call.
///
/// A `timeout` of 0 waits forever. Expiry is reported as
/// [`Error::Eof`], the distinguished end-of-stream marker; callers
/// decide what to make of it.
///
pub fn wait_char(stream: &dyn Stream, timeout: Ticks) -> Result<u8> {
    let started = time::current_ticks();
    loop {
        let mut byte = 0u8;
        if stream.read(core::slice::from_mut(&mut byte))? > 0 {
            return Ok(byte);
        }

        if timeout != 0 && time::current_ticks().wrapping_sub(started) >= timeout {
            return Err(Error::Eof);
        }

        // Give the CPU away while we wait.
        if scheduler::ready() {
            scheduler::switch();
        } else {
            core::hint::spin_loop();
        }
    }
}

/// Blocks until the stream yields a byte.
///
pub fn get_char(stream: &dyn Stream) -> Result<u8> {
    wait_char(stream, 0)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Stream;
    use crate::status::Result;
    use crate::utils::queue::Queue;
    use alloc::vec::Vec;
    use spin::Mutex;

    /// A loopback stream: writes land in a log, reads drain a
    /// queue the test fills in advance (or from another thread).
    ///
    pub struct LoopbackStream {
        pub incoming: Mutex<Queue<u8>>,
        pub written: Mutex<Vec<u8>>,
    }

    impl LoopbackStream {
        pub fn new(capacity: usize) -> Self {
            LoopbackStream {
                incoming: Mutex::new(Queue::new(capacity)),
                written: Mutex::new(Vec::new()),
            }
        }

        pub fn push_input(&self, bytes: &[u8]) {
            let mut incoming = self.incoming.lock();
            for &byte in bytes {
                incoming.enqueue(byte).expect("test queue overflow");
            }
        }

        pub fn take_written(&self) -> Vec<u8> {
            core::mem::take(&mut *self.written.lock())
        }
    }

    impl Stream for LoopbackStream {
        fn read(&self, buf: &mut [u8]) -> Result<usize> {
            let mut incoming = self.incoming.lock();
            let mut count = 0;
            for slot in buf.iter_mut() {
                match incoming.dequeue() {
                    Some(byte) => {
                        *slot = byte;
                        count += 1;
                    }
                    None => break,
                }
            }
            Ok(count)
        }

        fn write(&self, buf: &[u8]) -> Result<usize> {
            self.written.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use self::testing::LoopbackStream;
    use super::*;
    use core::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn read_write_helpers() {
        let loopback = LoopbackStream::new(16);
        put_char(&loopback, b'a').unwrap();
        assert_eq!(put_str(&loopback, "bc").unwrap(), 2);
        assert_eq!(loopback.take_written(), b"abc");

        loopback.push_input(b"xy");
        assert_eq!(get_char(&loopback).unwrap(), b'x');
        assert_eq!(wait_char(&loopback, 5).unwrap(), b'y');
    }

    #[test]
    fn wait_char_times_out_with_eof() {
        let loopback = LoopbackStream::new(4);

        // Drive the clock from another thread until the wait has
        // had the chance to expire.
        let stop = Arc::new(AtomicBool::new(false));
        let ticking = stop.clone();
        let ticker = std::thread::spawn(move || {
            while !ticking.load(Ordering::Relaxed) {
                crate::time::tick();
                std::thread::yield_now();
            }
        });

        let result = wait_char(&loopback, 3);
        stop.store(true, Ordering::Relaxed);
        ticker.join().unwrap();
        assert_eq!(result, Err(Error::Eof));
    }
}
