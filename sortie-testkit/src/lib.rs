//! Test support for sortie.
//!
//! Fakes for the launcher's injectable seams plus scheduler output fixtures,
//! so launchers can be driven end to end without PBS or Grid Engine.

pub mod clock;
pub mod fixtures;
pub mod runner;

pub use clock::RecordingClock;
pub use runner::FakeCommandRunner;
