//! Keel Metrics - Common utilities for performance tracking
//!
//! Provides zero-cost abstractions for metrics collection that completely
//! vanish in production builds via feature flags.
//!
//! # Feature Flags
//!
//! - `metrics` - Enable metrics collection (default: disabled)
//!
//! # Usage
//!
//! ```ignore
//! use keel_metrics::{Counter, FrameTimer};
//!
//! let mut counters = Counter::new();
//! counters.increment("registry.migrations", 1);
//!
//! let mut timer = FrameTimer::new(60); // Track last 60 frames
//! timer.begin();
//! // ... do work ...
//! timer.end();
//! println!("FPS: {:.1}", timer.fps());
//! ```
//!
//! In production builds (without `metrics` feature), all instrumentation
//! is compiled out to zero overhead.

#[cfg(feature = "metrics")]
mod frame_timer;
#[cfg(feature = "metrics")]
mod ring_buffer;
#[cfg(feature = "metrics")]
mod counter;

#[cfg(feature = "metrics")]
pub use frame_timer::FrameTimer;
#[cfg(feature = "metrics")]
pub use ring_buffer::RingBuffer;
#[cfg(feature = "metrics")]
pub use counter::Counter;

// ============================================================================
// Macros for conditional compilation
// ============================================================================

/// Execute code only when metrics are enabled
#[macro_export]
macro_rules! metrics {
    ($($tt:tt)*) => {
        #[cfg(feature = "metrics")]
        {
            $($tt)*
        }
    };
}

// ============================================================================
// No-op stubs when metrics disabled
// ============================================================================

#[cfg(not(feature = "metrics"))]
pub struct FrameTimer;

#[cfg(not(feature = "metrics"))]
impl FrameTimer {
    pub fn new(_window: usize) -> Self { Self }
    pub fn begin(&mut self) {}
    pub fn end(&mut self) {}
    pub fn frames(&self) -> u64 { 0 }
    pub fn fps(&self) -> f64 { 0.0 }
    pub fn frame_time_ms(&self) -> f64 { 0.0 }
    pub fn frame_time_range_ms(&self) -> (f64, f64) { (0.0, 0.0) }
}

#[cfg(not(feature = "metrics"))]
pub struct RingBuffer<T>(std::marker::PhantomData<T>);

#[cfg(not(feature = "metrics"))]
impl<T> RingBuffer<T> {
    pub fn new(_capacity: usize) -> Self { Self(std::marker::PhantomData) }
    pub fn push(&mut self, _value: T) {}
    pub fn average(&self) -> T where T: Default { T::default() }
}

#[cfg(not(feature = "metrics"))]
pub struct Counter;

#[cfg(not(feature = "metrics"))]
impl Counter {
    pub fn new() -> Self { Self }
    pub fn increment(&mut self, _name: &'static str, _value: usize) {}
    pub fn set(&mut self, _name: &'static str, _value: usize) {}
    pub fn get(&self, _name: &str) -> usize { 0 }
    pub fn reset(&mut self, _name: &'static str) {}
    pub fn reset_all(&mut self) {}
    pub fn snapshot(&self) -> Vec<(&'static str, usize)> { Vec::new() }
}

#[cfg(not(feature = "metrics"))]
impl Default for Counter {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    #[cfg(feature = "metrics")]
    #[test]
    fn counter_tracks_named_events() {
        let mut counters = super::Counter::new();
        counters.increment("pool.cold_alloc", 1);
        counters.increment("pool.cold_alloc", 2);
        assert_eq!(counters.get("pool.cold_alloc"), 3);
        assert_eq!(counters.get("never_touched"), 0);
    }
}
