//! Audio capture, frames, ring buffer, and the interaction state cell.

pub mod capture;
pub mod frame;
pub mod ring_buffer;
pub mod state;

pub use capture::{list_devices, CaptureSource, CaptureSpec, CpalCapture};
pub use frame::{f32_to_pcm16le, pcm16le_to_f32, AudioFrame};
pub use state::{InteractionState, StateCell};
