//! Tuner socket plumbing
//!
//! - `frame`: length-prefixed tagged frames and output/error payload helpers
//! - `client`: TCP connect, handshake, timed receive and drain

pub mod client;
pub mod frame;

pub use client::{
    connect, drain, handshake, recv_frame, send_frame, FrameReader, Handshake, TunerReader,
    TunerWriter,
};
pub use frame::{
    encode_frame, is_error, output_payload, output_value, tag, Frame, DEFAULT_MAX_FRAME_BYTES,
};
