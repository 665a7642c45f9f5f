//! Call-recording provider integration.
//!
//! Read-only: lists calls and email activity, fetches call details and
//! transcripts. All outbound traffic for one `GongClient` shares a single
//! pacing gate.

pub mod client;
pub mod pacing;
pub mod transport;
mod wire;

pub use client::{CallFilter, CallPage, GongClient, MAX_IDS_PER_REQUEST, PAGE_SIZE};
pub use transport::{GongTransport, HttpTransport};
