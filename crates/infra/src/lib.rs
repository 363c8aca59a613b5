//! Real-time plumbing between the audio thread and the editor
//!
//! The core crate knows nothing about threads. This crate splits an EQ into an
//! audio-side [`realtime::EqProcessor`] and an editor-side
//! [`realtime::EqController`] that talk through lock-free queues.

pub mod realtime;
