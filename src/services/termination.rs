//! Pagination termination policies.
//!
//! After every scroll batch the scrape engine asks its policy whether the
//! board may still have unseen pins.

use crate::models::TerminationStrategy;

/// What the engine knows after a scroll batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchProgress {
    /// 1-based number of the batch just processed
    pub batch: usize,

    /// Latest original URL extracted in the previous batch
    pub previous_latest: Option<String>,

    /// Latest original URL extracted in this batch
    pub current_latest: Option<String>,

    /// Distinct pictures collected so far
    pub collected: usize,

    /// Pin count advertised by the board page, if it was read
    pub expected: Option<usize>,
}

impl BatchProgress {
    /// Whether this batch ended on the same picture as the previous one.
    pub fn converged(&self) -> bool {
        self.batch > 1 && self.previous_latest == self.current_latest
    }
}

/// Decides whether pagination continues.
pub trait TerminationPolicy: Send + Sync {
    fn has_more_content(&self, progress: &BatchProgress) -> bool;

    /// Whether the engine should read the board's pin counter.
    fn needs_pin_count(&self) -> bool {
        false
    }
}

/// Stops once two consecutive batches end on the same picture.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvergencePolicy;

impl TerminationPolicy for ConvergencePolicy {
    fn has_more_content(&self, progress: &BatchProgress) -> bool {
        !progress.converged()
    }
}

/// Stops once as many pictures were collected as the board advertises.
///
/// Falls back to convergence so a wrong or missing counter cannot keep the
/// engine scrolling forever.
#[derive(Debug, Clone, Copy, Default)]
pub struct PinCountPolicy;

impl TerminationPolicy for PinCountPolicy {
    fn has_more_content(&self, progress: &BatchProgress) -> bool {
        let reached = progress
            .expected
            .is_some_and(|expected| expected > 0 && progress.collected >= expected);
        !reached && !progress.converged()
    }

    fn needs_pin_count(&self) -> bool {
        true
    }
}

/// Policy for the configured strategy.
pub fn policy_for(strategy: TerminationStrategy) -> Box<dyn TerminationPolicy> {
    match strategy {
        TerminationStrategy::Convergence => Box::new(ConvergencePolicy),
        TerminationStrategy::PinCount => Box::new(PinCountPolicy),
    }
}
