//! Interrupt (barge-in) detection: the one-shot signal, the hysteresis
//! counter, and the capture-and-score worker that drives them.

pub mod detector;
pub mod hysteresis;
pub mod signal;

pub use detector::InterruptDetector;
pub use hysteresis::ActivationCounter;
pub use signal::InterruptSignal;
