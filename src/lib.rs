//! Bridge from notebook-style command cells to a running sbt server.
//!
//! A [`kernel::Kernel`] accepts cells, a [`client::CommandSession`] sends each
//! command over the server's socket and turns the streamed event records into
//! leveled [`presenter::Presentation`]s plus a final [`client::Verdict`].

pub mod client;
pub mod config;
pub mod error;
pub mod interrupt;
pub mod kernel;
pub mod line_source;
pub mod presenter;
pub mod protocol;
