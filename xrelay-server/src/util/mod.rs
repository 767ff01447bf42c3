//! Process-level helpers for the relay binary.

mod sig_down;

pub use sig_down::SigDown;
