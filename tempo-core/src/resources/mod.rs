//! Memory and I/O resources that can be attached to a board: RAM, the core-local interruptor, and
//! an example accelerator for the offload channel.

pub mod accelerator;
pub mod clint;
pub mod ram;
