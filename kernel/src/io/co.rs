// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The kernel console layer.
//!
//! Output fans out to up to two streams: the primary console (also
//! the source of input) and an output-only debug console, typically
//! a serial port. Either may be absent; console output before a
//! console is installed is simply dropped, so the `print!` family
//! is safe from the first instruction.
//!
//! Output runs with interrupts disabled so lines from interrupt
//! handlers and threads do not shear.

use crate::arch::interrupts::without_interrupts;
use crate::io::stream::{self, Stream};
use crate::status::{Error, Result};
use alloc::sync::Arc;
use core::fmt;

static PRIMARY: spin::Mutex<Option<Arc<dyn Stream>>> = spin::Mutex::new(None);

// The debug console is output only.
static DEBUG: spin::Mutex<Option<Arc<dyn Stream>>> = spin::Mutex::new(None);

/// Installs (or, with `None`, removes) the primary console.
///
pub fn set_primary(console: Option<Arc<dyn Stream>>) {
    without_interrupts(|| *PRIMARY.lock() = console);
}

/// Installs (or, with `None`, removes) the debug console.
///
pub fn set_debug(console: Option<Arc<dyn Stream>>) {
    without_interrupts(|| *DEBUG.lock() = console);
}

// Snapshots the installed consoles so output does not hold the
// slot locks across stream writes.
//
fn consoles() -> (Option<Arc<dyn Stream>>, Option<Arc<dyn Stream>>) {
    (PRIMARY.lock().clone(), DEBUG.lock().clone())
}

fn for_each_console<F>(write: F)
where
    F: Fn(&dyn Stream),
{
    without_interrupts(|| {
        let (primary, debug) = consoles();
        if let Some(ref console) = primary {
            write(console.as_ref());
            console.flush();
        }
        if let Some(ref console) = debug {
            let duplicate = primary
                .as_ref()
                .map_or(false, |other| Arc::ptr_eq(other, console));
            if !duplicate {
                write(console.as_ref());
                console.flush();
            }
        }
    })
}

/// Writes one character to the consoles.
///
pub fn put_char(byte: u8) {
    for_each_console(|console| {
        let _ = stream::put_char(console, byte);
    });
}

/// Writes a string to the consoles.
///
pub fn put_str(text: &str) {
    for_each_console(|console| {
        let _ = stream::put_str(console, text);
    });
}

/// Writes formatted text to the consoles. This is the sink of the
/// `print!` and `println!` macros.
///
pub fn write_fmt(args: fmt::Arguments<'_>) {
    struct ConsoleWriter<'stream>(&'stream dyn Stream);

    impl fmt::Write for ConsoleWriter<'_> {
        fn write_str(&mut self, text: &str) -> fmt::Result {
            // Console output is best-effort; a failing console
            // must not take the kernel down with it.
            let _ = stream::put_str(self.0, text);
            Ok(())
        }
    }

    for_each_console(|console| {
        let _ = fmt::Write::write_fmt(&mut ConsoleWriter(console), args);
    });
}

/// Reads one character from the primary console, blocking until
/// one arrives. Carriage returns are normalised to newlines.
///
/// Fails with [`Error::NoDev`] if no primary console is installed.
///
pub fn get_char() -> Result<u8> {
    let primary = without_interrupts(|| PRIMARY.lock().clone());
    let console = match primary {
        Some(console) => console,
        None => {
            put_str("co: waiting for character, but there's no console to wait for\n");
            return Err(Error::NoDev);
        }
    };

    let byte = stream::get_char(console.as_ref())?;
    Ok(if byte == b'\r' { b'\n' } else { byte })
}
