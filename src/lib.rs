#![no_std]

//! A streaming decoder and encoder for Garmin's Flexible and Interoperable
//! Data Transfer protocol.
//!
//! Freehub exposes the protocol's framing layer directly: a caller-owned
//! [`decode::DecodeSession`] consumes document bytes in chunks of any size
//! and yields one decoded message at a time, [`lookup::lookup_message`]
//! seeks to a record in a complete document without materializing a decode,
//! and (with Cargo feature `std`) an [`encode::EncodeSession`] writes the
//! same framing back out. Interpreting message and field numbers against a
//! profile is left to the caller.
//!
//! Decoding is allocation-free: sessions hold fixed-capacity tables and a
//! single reused message buffer, sized by the capacity constants in
//! [`definition`].
//!
//! ## Cargo Features
//!
//! The following crate feature flags are available:
//!
//! - `std`: enable the writer-based encoder and owned message copies
//!   (default).

pub mod base;
pub mod check;
pub mod decode;
pub mod definition;
#[cfg(feature = "std")]
pub mod encode;
pub mod header;
pub mod lookup;
