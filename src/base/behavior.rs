use std::sync::Arc;

/// Clocked behavior shared by every hardware block in the grid.
pub trait ModuleBehaviors {
    /// Advance one clock edge.
    fn tick_one(&mut self);
    /// Return to the post-reset state. Configuration is kept.
    fn reset(&mut self);
}

/// A block carrying configuration that is installed once and never mutated.
pub trait Parameterizable {
    type ConfigType;

    fn conf(&self) -> &Self::ConfigType;
    fn init_conf(&mut self, conf: Arc<Self::ConfigType>);
}
