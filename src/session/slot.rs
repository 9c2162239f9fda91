use std::io;
use std::os::fd::RawFd;

use log::{debug, trace, warn};

use crate::eval::{Evaluator, Outcome, V};
use crate::session::transport::Transport;

/// Shared receive/send scratch area.
pub const BUF: usize = 8192;

/// A slot's lifecycle phase, driven by I/O completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Accepting,
    Receiving,
    Sending,
}

/// What the reactor should do with a slot's registration after a call
/// into it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    AwaitReadable,
    AwaitWritable,
    Close,
}

/// A reusable per-connection container: socket + buffer + evaluator +
/// phase. Slots are created once at server startup and live for the
/// server's lifetime; the transport inside is transient.
pub struct Slot<T: Transport> {
    pub index: i32,
    transport: Option<T>,
    buffer: [u8; BUF],
    out: Vec<u8>,
    out_pos: usize,
    error_flag: bool,
    evaluator: Evaluator,
    phase: Phase,
}

impl<T: Transport> Slot<T> {
    pub fn new(index: i32) -> Slot<T> {
        Slot {
            index,
            transport: None,
            buffer: [0; BUF],
            out: Vec::new(),
            out_pos: 0,
            error_flag: false,
            evaluator: Evaluator::new(),
            phase: Phase::Accepting,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn as_raw_fd(&self) -> Option<RawFd> {
        self.transport.as_ref().map(Transport::as_raw_fd)
    }

    /// `Accepting -- async_accept OK --> Receiving`.
    pub fn bind(&mut self, transport: T) {
        debug_assert_eq!(self.phase, Phase::Accepting);
        self.transport = Some(transport);
        self.phase = Phase::Receiving;
        debug!("slot {}: Accepting -> Receiving", self.index);
    }

    /// `Receiving -- ... -->` per the transition table; drains readable
    /// data until `WouldBlock`, feeding each chunk to the evaluator.
    pub fn handle_readable(&mut self) -> io::Result<Next> {
        debug_assert_eq!(self.phase, Phase::Receiving);
        loop {
            let transport = self
                .transport
                .as_mut()
                .expect("handle_readable called without a bound transport");
            match transport.read(&mut self.buffer) {
                Ok(0) => {
                    trace!("slot {}: peer closed on read", self.index);
                    self.reset_and_close();
                    return Ok(Next::Close);
                }
                Ok(n) => {
                    trace!("slot {}: read {n} bytes", self.index);
                    let (outcome, value) = self.evaluator.feed(&self.buffer[..n]);
                    if let Some(next) = self.apply_outcome(outcome, value) {
                        return Ok(next);
                    }
                    // Incomplete: edge-triggered readiness requires draining
                    // until WouldBlock, so keep reading in this same call.
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Next::AwaitReadable)
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("slot {}: read error: {e}", self.index);
                    self.reset_and_close();
                    return Ok(Next::Close);
                }
            }
        }
    }

    /// `Sending -- ... -->` per the transition table; drains the pending
    /// output buffer, then either closes (error flag), returns to
    /// `Receiving` (evaluator drained), or stages and sends the next
    /// already-parsed result (long-expression continuation, §4.C).
    pub fn handle_writable(&mut self) -> io::Result<Next> {
        debug_assert_eq!(self.phase, Phase::Sending);
        loop {
            while self.out_pos < self.out.len() {
                let transport = self
                    .transport
                    .as_mut()
                    .expect("handle_writable called without a bound transport");
                match transport.write(&self.out[self.out_pos..]) {
                    Ok(0) => {
                        trace!("slot {}: peer closed on write", self.index);
                        self.reset_and_close();
                        return Ok(Next::Close);
                    }
                    Ok(n) => self.out_pos += n,
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                        return Ok(Next::AwaitWritable)
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!("slot {}: write error: {e}", self.index);
                        self.reset_and_close();
                        return Ok(Next::Close);
                    }
                }
            }

            if self.error_flag {
                self.reset_and_close();
                return Ok(Next::Close);
            }
            if self.evaluator.is_empty() {
                self.phase = Phase::Receiving;
                return Ok(Next::AwaitReadable);
            }

            let (outcome, value) = self.evaluator.feed(&[]);
            match outcome {
                Outcome::Incomplete => {
                    self.phase = Phase::Receiving;
                    return Ok(Next::AwaitReadable);
                }
                Outcome::Success => self.stage_success(value),
                Outcome::DivisionByZero => {
                    self.stage_error(b"Division by zero\n");
                    self.error_flag = true;
                }
                Outcome::InvalidExpression => {
                    self.stage_error(b"Invalid expression\n");
                    self.error_flag = true;
                }
            }
            // Loop back and write what was just staged.
        }
    }

    fn apply_outcome(&mut self, outcome: Outcome, value: V) -> Option<Next> {
        match outcome {
            Outcome::Incomplete => None,
            Outcome::Success => {
                trace!("slot {}: expression evaluated successfully", self.index);
                self.stage_success(value);
                self.phase = Phase::Sending;
                Some(Next::AwaitWritable)
            }
            Outcome::DivisionByZero => {
                debug!("slot {}: division by zero, closing after send", self.index);
                self.stage_error(b"Division by zero\n");
                self.error_flag = true;
                self.phase = Phase::Sending;
                Some(Next::AwaitWritable)
            }
            Outcome::InvalidExpression => {
                debug!("slot {}: invalid expression, closing after send", self.index);
                self.stage_error(b"Invalid expression\n");
                self.error_flag = true;
                self.phase = Phase::Sending;
                Some(Next::AwaitWritable)
            }
        }
    }

    fn stage_success(&mut self, value: V) {
        self.out.clear();
        self.out.extend_from_slice(value.to_string().as_bytes());
        self.out.push(b'\n');
        self.out_pos = 0;
    }

    fn stage_error(&mut self, text: &'static [u8]) {
        self.out.clear();
        self.out.extend_from_slice(text);
        self.out_pos = 0;
    }

    fn reset_and_close(&mut self) {
        debug!("slot {}: {:?} -> Accepting", self.index, self.phase);
        if let Some(mut transport) = self.transport.take() {
            let _ = transport.shutdown();
        }
        self.evaluator.clear();
        self.out.clear();
        self.out_pos = 0;
        self.error_flag = false;
        self.phase = Phase::Accepting;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted in-memory transport for exercising the slot FSM without a
    /// real socket.
    struct ScriptedTransport {
        inbound: VecDeque<u8>,
        outbound: Vec<u8>,
        closed: bool,
    }

    impl ScriptedTransport {
        fn new(script: &[u8]) -> ScriptedTransport {
            ScriptedTransport {
                inbound: script.iter().copied().collect(),
                outbound: Vec::new(),
                closed: false,
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
            self.outbound.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn shutdown(&mut self) -> io::Result<()> {
            self.closed = true;
            Ok(())
        }

        fn as_raw_fd(&self) -> RawFd {
            -1
        }
    }

    #[test]
    fn successful_expression_keeps_connection_open() {
        let mut slot: Slot<ScriptedTransport> = Slot::new(0);
        slot.bind(ScriptedTransport::new(b"1 + 2\n"));

        assert_eq!(slot.handle_readable().unwrap(), Next::AwaitWritable);
        assert_eq!(slot.phase(), Phase::Sending);

        assert_eq!(slot.handle_writable().unwrap(), Next::AwaitReadable);
        assert_eq!(slot.phase(), Phase::Receiving);
        assert_eq!(slot.out, b"3\n");
    }

    #[test]
    fn parse_error_closes_after_send() {
        let mut slot: Slot<ScriptedTransport> = Slot::new(0);
        slot.bind(ScriptedTransport::new(b"(1 + 2\n"));

        assert_eq!(slot.handle_readable().unwrap(), Next::AwaitWritable);
        assert_eq!(slot.handle_writable().unwrap(), Next::Close);
        assert_eq!(slot.phase(), Phase::Accepting);
    }

    #[test]
    fn division_by_zero_closes_after_send() {
        let mut slot: Slot<ScriptedTransport> = Slot::new(0);
        slot.bind(ScriptedTransport::new(b"5/(3/7)\n"));

        assert_eq!(slot.handle_readable().unwrap(), Next::AwaitWritable);
        assert_eq!(slot.handle_writable().unwrap(), Next::Close);
    }

    #[test]
    fn long_expression_continuation_drains_all_results() {
        let mut slot: Slot<ScriptedTransport> = Slot::new(0);
        slot.bind(ScriptedTransport::new(b"1+2\n3+4\n"));

        assert_eq!(slot.handle_readable().unwrap(), Next::AwaitWritable);
        // First write drains "3\n", stages "7\n", keeps writing, then the
        // evaluator is empty so the slot returns to Receiving.
        assert_eq!(slot.handle_writable().unwrap(), Next::AwaitReadable);
        assert_eq!(slot.phase(), Phase::Receiving);
    }
}
