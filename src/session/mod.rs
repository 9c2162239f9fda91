//! Component C: the session slot.

mod slot;
mod transport;

pub use slot::{Next, Phase, Slot, BUF};
pub use transport::Transport;
