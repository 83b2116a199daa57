//! Rebuild policy for the charge-assignment interpolation cache

use crate::mesh::{AssignmentBuilder, Differentiation};

/// Decides when the charge-assignment interpolation table has to be
/// (re)built. The table itself lives in the collaborator implementing
/// [`AssignmentBuilder`]; this policy only tracks the configuration
/// epoch the current table was built for, and whether the
/// differentiation strategy additionally needs the derivative variant.
pub struct CafPolicy {
    epoch: Option<(usize, usize, bool)>,
}

impl CafPolicy {
    pub fn new() -> CafPolicy {
        CafPolicy { epoch: None }
    }

    pub fn needs_rebuild(&self, cao: usize, n_interpol: usize, derivative: bool) -> bool {
        self.epoch != Some((cao, n_interpol, derivative))
    }

    /// Triggers a rebuild through the collaborator if the assignment
    /// order, the sampling resolution or the derivative requirement
    /// changed since the last build.
    pub fn apply(&mut self, cao: usize, n_interpol: usize, diff: Differentiation, builder: &mut impl AssignmentBuilder) {
        let derivative = diff == Differentiation::Analytic;
        if self.needs_rebuild(cao, n_interpol, derivative) {
            log::debug!(
                "interpolating charge assignment function (cao = {}, {} points, derivative: {})",
                cao, n_interpol, derivative
            );
            builder.rebuild(cao, n_interpol, derivative);
            self.epoch = Some((cao, n_interpol, derivative));
        }
    }
}
