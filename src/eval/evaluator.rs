//! The streaming Shunting-Yard evaluator.
//!
//! A resumable state machine: each `feed` call may see only part of an
//! expression, so every phase that might run out of input before
//! reaching a decision stashes what it has consumed so far into
//! `remainder` and returns [`Outcome::Incomplete`], to be continued on
//! the next call.

use std::mem;

use crate::eval::tokenizer::{base_priority, is_digit, is_skip, op_kind, OpKind};

/// Expression value type. 32-bit signed, matching the reference
/// implementation's chosen width.
pub type V = i32;

/// `level` advances by this much per `(` and retreats by it per `)`.
/// Folded into operator priority so that anything inside parentheses
/// strictly outranks anything outside, without an explicit paren token
/// on the operator stack.
const ORDER: i32 = 2;

/// Result of a `feed` call. `V` is only meaningful when `Outcome::Success`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Incomplete,
    DivisionByZero,
    InvalidExpression,
}

/// Which of the five parser phases consumes the next byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    LevelUpAndSkip,
    GetNumber,
    LevelDownAndSkip,
    CheckEndOfExpression,
    ProcessOperator,
}

/// A resumable infix-expression evaluator over a stream of byte chunks.
#[derive(Debug)]
pub struct Evaluator {
    step: Step,
    level: i32,
    operands: Vec<V>,
    operators: Vec<(i32, OpKind)>,
    remainder: Vec<u8>,
}

impl Default for Evaluator {
    fn default() -> Evaluator {
        Evaluator::new()
    }
}

impl Evaluator {
    pub fn new() -> Evaluator {
        Evaluator {
            step: Step::LevelUpAndSkip,
            level: 0,
            operands: Vec::new(),
            operators: Vec::new(),
            remainder: Vec::new(),
        }
    }

    /// True iff the evaluator is in its freshly-constructed idle state:
    /// no partial expression, no pending operators or operands, and no
    /// bytes of an unfinished lexeme carried over.
    pub fn is_empty(&self) -> bool {
        self.step == Step::LevelUpAndSkip
            && self.level == 0
            && self.operands.is_empty()
            && self.operators.is_empty()
            && self.remainder.is_empty()
    }

    /// Reset to the freshly-constructed idle state, discarding any
    /// partial expression.
    pub fn clear(&mut self) {
        self.step = Step::LevelUpAndSkip;
        self.level = 0;
        self.operands.clear();
        self.operators.clear();
        self.remainder.clear();
    }

    /// Feed the next chunk of bytes. Call again with an empty slice to
    /// keep draining any further expressions already buffered in
    /// `remainder` from a previous call.
    pub fn feed(&mut self, bytes: &[u8]) -> (Outcome, V) {
        if bytes == b"\n" && self.is_empty() {
            return (Outcome::Success, 0);
        }

        let mut buf = mem::take(&mut self.remainder);
        buf.extend_from_slice(bytes);
        let len = buf.len();
        let mut pos = 0usize;

        loop {
            match self.step {
                Step::LevelUpAndSkip => {
                    while pos < len {
                        match buf[pos] {
                            b'(' => {
                                self.level += ORDER;
                                pos += 1;
                            }
                            b if is_skip(b) => pos += 1,
                            _ => break,
                        }
                    }
                    if pos == len {
                        return (Outcome::Incomplete, 0);
                    }
                    self.step = Step::GetNumber;
                }
                Step::GetNumber => {
                    let start = pos;
                    if pos < len && buf[pos] == b'-' {
                        pos += 1;
                    }
                    let digits_start = pos;
                    while pos < len && is_digit(buf[pos]) {
                        pos += 1;
                    }
                    if pos == len {
                        self.remainder = buf[start..].to_vec();
                        return (Outcome::Incomplete, 0);
                    }
                    if pos == digits_start {
                        return self.fail(Outcome::InvalidExpression);
                    }
                    let lexeme = std::str::from_utf8(&buf[start..pos])
                        .expect("lexeme is ASCII digits and an optional '-'");
                    match lexeme.parse::<V>() {
                        Ok(value) => self.operands.push(value),
                        Err(_) => return self.fail(Outcome::InvalidExpression),
                    }
                    self.step = Step::LevelDownAndSkip;
                }
                Step::LevelDownAndSkip => {
                    while pos < len {
                        match buf[pos] {
                            b')' => {
                                if self.level == 0 {
                                    return self.fail(Outcome::InvalidExpression);
                                }
                                self.level -= ORDER;
                                pos += 1;
                            }
                            b if is_skip(b) => pos += 1,
                            _ => break,
                        }
                    }
                    if pos == len {
                        return (Outcome::Incomplete, 0);
                    }
                    self.step = Step::CheckEndOfExpression;
                }
                Step::CheckEndOfExpression => {
                    if buf[pos] == b'\n' {
                        pos += 1;
                        if self.level != 0 {
                            return self.fail(Outcome::InvalidExpression);
                        }
                        while let Some((_, op)) = self.operators.pop() {
                            let r = self.operands.pop().expect("operand underflow");
                            let l = self.operands.pop().expect("operand underflow");
                            match fold(op, l, r) {
                                Ok(value) => self.operands.push(value),
                                Err(outcome) => return self.fail(outcome),
                            }
                        }
                        let result = self.operands.pop().expect("operand underflow");
                        self.step = Step::LevelUpAndSkip;
                        self.remainder = buf[pos..].to_vec();
                        return (Outcome::Success, result);
                    }
                    self.step = Step::ProcessOperator;
                }
                Step::ProcessOperator => {
                    while pos < len && is_skip(buf[pos]) {
                        pos += 1;
                    }
                    if pos == len {
                        return (Outcome::Incomplete, 0);
                    }
                    let op = op_kind(buf[pos]);
                    if op == OpKind::None {
                        return self.fail(Outcome::InvalidExpression);
                    }
                    pos += 1;
                    let priority = base_priority(op) + self.level;
                    while let Some(&(top_priority, _)) = self.operators.last() {
                        if top_priority < priority {
                            break;
                        }
                        let (_, top_op) = self.operators.pop().expect("checked non-empty above");
                        let r = self.operands.pop().expect("operand underflow");
                        let l = self.operands.pop().expect("operand underflow");
                        match fold(top_op, l, r) {
                            Ok(value) => self.operands.push(value),
                            Err(outcome) => return self.fail(outcome),
                        }
                    }
                    self.operators.push((priority, op));
                    self.step = Step::LevelUpAndSkip;
                }
            }
        }
    }

    fn fail(&mut self, outcome: Outcome) -> (Outcome, V) {
        self.clear();
        (outcome, 0)
    }
}

/// Apply `op` to `left` and `right`, matching native wrapping behavior
/// for overflow.
fn fold(op: OpKind, left: V, right: V) -> Result<V, Outcome> {
    match op {
        OpKind::Plus => Ok(left.wrapping_add(right)),
        OpKind::Minus => Ok(left.wrapping_sub(right)),
        OpKind::Mul => Ok(left.wrapping_mul(right)),
        OpKind::Div => {
            if right == 0 {
                Err(Outcome::DivisionByZero)
            } else {
                Ok(left.wrapping_div(right))
            }
        }
        OpKind::None => unreachable!("OpKind::None never pushed onto the operator stack"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_once(input: &str) -> (Outcome, V) {
        let mut e = Evaluator::new();
        e.feed(input.as_bytes())
    }

    #[test]
    fn simple_addition() {
        assert_eq!(eval_once("1 + 2\n"), (Outcome::Success, 3));
    }

    #[test]
    fn precedence_without_parens() {
        assert_eq!(eval_once("1 + 2 * 3\n"), (Outcome::Success, 7));
    }

    #[test]
    fn precedence_with_parens() {
        assert_eq!(eval_once("(1 + 2) * 3\n"), (Outcome::Success, 9));
    }

    #[test]
    fn unterminated_paren_is_invalid() {
        let mut e = Evaluator::new();
        assert_eq!(e.feed(b"(1 + 2\n"), (Outcome::InvalidExpression, 0));
        assert!(e.is_empty());
    }

    #[test]
    fn division_by_zero() {
        let mut e = Evaluator::new();
        assert_eq!(e.feed(b"5/(3/7)\n"), (Outcome::DivisionByZero, 0));
        assert!(e.is_empty());
    }

    #[test]
    fn negative_literals() {
        assert_eq!(eval_once("-123 + -456\n"), (Outcome::Success, -579));
    }

    #[test]
    fn out_of_range_literal_is_invalid() {
        let mut e = Evaluator::new();
        assert_eq!(e.feed(b"1 + 2147483648\n"), (Outcome::InvalidExpression, 0));
        assert!(e.is_empty());
    }

    #[test]
    fn min_value_parses() {
        assert_eq!(eval_once("-2147483648 + 0\n"), (Outcome::Success, i32::MIN));
    }

    #[test]
    fn empty_newline_is_idempotent_success() {
        let mut e = Evaluator::new();
        assert_eq!(e.feed(b"\n"), (Outcome::Success, 0));
        assert!(e.is_empty());
    }

    #[test]
    fn byte_by_byte_feed_matches_single_call() {
        let expr = b"(2 + 3) * 7 / 11\n";
        let mut whole = Evaluator::new();
        let expected = whole.feed(expr);

        let mut chunked = Evaluator::new();
        let mut last = (Outcome::Incomplete, 0);
        for b in expr {
            last = chunked.feed(&[*b]);
        }
        assert_eq!(last, expected);
    }

    #[test]
    fn drains_multiple_expressions_from_one_feed() {
        let mut e = Evaluator::new();
        assert_eq!(e.feed(b"1+2\n3+4\n"), (Outcome::Success, 3));
        assert!(!e.is_empty());
        assert_eq!(e.feed(b""), (Outcome::Success, 7));
        assert!(e.is_empty());
    }

    #[test]
    fn chained_scenario_five() {
        let mut e = Evaluator::new();
        let input = b"(2 + 3) * 7 / 11\n(109 - 53) * 17 / 19\n103/((67 - 43) / 7)\n";
        let mut results = Vec::new();
        let (outcome, value) = e.feed(input);
        assert_eq!(outcome, Outcome::Success);
        results.push(value);
        loop {
            let (outcome, value) = e.feed(b"");
            if outcome == Outcome::Incomplete {
                break;
            }
            assert_eq!(outcome, Outcome::Success);
            results.push(value);
        }
        assert_eq!(results, vec![3, 50, 34]);
        assert!(e.is_empty());
    }
}
