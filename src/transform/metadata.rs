use std::collections::HashSet;

/// Metadata collected during transformation
/// This is populated by analysis plugins and used by the generator
#[derive(Debug, Clone, Default)]
pub struct TransformMetadata {
    /// Names of mixins invoked with a static name.
    pub mixins_called: HashSet<String>,
    /// Some invocation computes its mixin name at render time.
    pub dynamic_mixins: bool,
}

impl TransformMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the definition of `name` must be emitted.
    pub fn keeps_mixin(&self, name: &str) -> bool {
        self.dynamic_mixins || self.mixins_called.contains(name)
    }
}
