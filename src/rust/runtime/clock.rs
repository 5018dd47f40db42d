// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::std::time::{
    Duration,
    Instant,
};

//==============================================================================
// Structures
//==============================================================================

/// Monotonic time source for the event loop. All deadlines in the scheduler
/// are expressed in integer milliseconds since the loop was constructed.
pub struct LoopClock {
    /// Time origin, sampled at loop construction.
    start: Instant,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Loop Clocks
impl LoopClock {
    /// Creates a clock whose origin is now.
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    /// Returns the number of milliseconds elapsed since the loop started.
    pub fn time(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Converts a delay into an absolute deadline in loop time.
    pub fn deadline(&self, delay: Duration) -> u64 {
        self.time() + delay.as_millis() as u64
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl Default for LoopClock {
    fn default() -> Self {
        Self::new()
    }
}
