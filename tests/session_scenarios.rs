//! End-to-end wire scenarios, driven through a scripted `Transport`
//! rather than a real socket — the in-memory equivalent of a concrete
//! client/server exchange. Byte-exact output is covered by the
//! `src/session/slot.rs` unit tests; these check the open/closed
//! outcome each scenario promises.

use std::collections::VecDeque;
use std::io;
use std::os::fd::RawFd;

use calcd::session::{Next, Phase, Slot, Transport};

struct ScriptedTransport {
    inbound: VecDeque<u8>,
}

impl ScriptedTransport {
    fn new(script: &[u8]) -> ScriptedTransport {
        ScriptedTransport {
            inbound: script.iter().copied().collect(),
        }
    }
}

impl Transport for ScriptedTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.inbound.is_empty() {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        let mut n = 0;
        while n < buf.len() {
            match self.inbound.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn as_raw_fd(&self) -> RawFd {
        -1
    }
}

/// Drives a freshly bound slot through one full readable→writable cycle
/// and reports the phase it lands in.
fn run_one_cycle(script: &[u8]) -> Phase {
    let mut slot: Slot<ScriptedTransport> = Slot::new(0);
    slot.bind(ScriptedTransport::new(script));

    loop {
        match slot.handle_readable().unwrap() {
            Next::AwaitWritable => break,
            Next::AwaitReadable => continue,
            Next::Close => return slot.phase(),
        }
    }
    loop {
        match slot.handle_writable().unwrap() {
            Next::Close | Next::AwaitReadable => break,
            Next::AwaitWritable => continue,
        }
    }
    slot.phase()
}

#[test]
fn scenario_1_simple_addition_stays_open() {
    assert_eq!(run_one_cycle(b"1 + 2\n"), Phase::Receiving);
}

#[test]
fn scenario_2_second_expression_also_stays_open() {
    assert_eq!(run_one_cycle(b"3 + 4\n"), Phase::Receiving);
}

#[test]
fn scenario_3_unbalanced_paren_closes() {
    assert_eq!(run_one_cycle(b"(1 + 2\n"), Phase::Accepting);
}

#[test]
fn scenario_4_division_by_zero_closes() {
    assert_eq!(run_one_cycle(b"5/(3/7)\n"), Phase::Accepting);
}

#[test]
fn scenario_5_chained_expressions_stay_open() {
    let script = b"(2 + 3) * 7 / 11\n(109 - 53) * 17 / 19\n103/((67 - 43) / 7)\n";
    assert_eq!(run_one_cycle(script), Phase::Receiving);
}

#[test]
fn scenario_6_negative_literals_stay_open() {
    assert_eq!(run_one_cycle(b"-123 + -456\n"), Phase::Receiving);
}

#[test]
fn scenario_7_overflowing_literal_closes() {
    assert_eq!(run_one_cycle(b"1 + 2147483648\n"), Phase::Accepting);
}
