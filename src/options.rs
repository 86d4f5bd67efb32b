use std::fmt;
use std::sync::Arc;

use crate::slice::AttributeTranslator;

/// Configuration for a [`Builder`](crate::Builder).
///
/// All flags default to `false` and no attribute translator is configured.
#[derive(Clone, Default)]
pub struct BuilderOptions {
    /// Prefer the compact (unindexed) form for arrays.
    pub build_unindexed_arrays: bool,

    /// Prefer the compact (unindexed) form for objects.
    pub build_unindexed_objects: bool,

    /// Raise on duplicate attribute names while building the object hash
    /// table.
    pub check_attribute_uniqueness: bool,

    /// Reject External values at encode time.
    pub disallow_externals: bool,

    /// Consumed by the JSON dumper only; carried here for interface
    /// compatibility.
    pub pretty_print: bool,

    /// Resolves translated integer keys to their textual attribute names.
    pub attribute_translator: Option<Arc<dyn AttributeTranslator + Send + Sync>>,
}

impl BuilderOptions {
    /// Create options with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefer the compact form for arrays.
    pub fn build_unindexed_arrays(mut self, enabled: bool) -> Self {
        self.build_unindexed_arrays = enabled;
        self
    }

    /// Prefer the compact form for objects.
    pub fn build_unindexed_objects(mut self, enabled: bool) -> Self {
        self.build_unindexed_objects = enabled;
        self
    }

    /// Raise on duplicate attribute names.
    pub fn check_attribute_uniqueness(mut self, enabled: bool) -> Self {
        self.check_attribute_uniqueness = enabled;
        self
    }

    /// Reject External values.
    pub fn disallow_externals(mut self, enabled: bool) -> Self {
        self.disallow_externals = enabled;
        self
    }

    /// Set the attribute translator for integer keys.
    pub fn attribute_translator(
        mut self,
        translator: Arc<dyn AttributeTranslator + Send + Sync>,
    ) -> Self {
        self.attribute_translator = Some(translator);
        self
    }

    pub(crate) fn translator(&self) -> Option<&dyn AttributeTranslator> {
        self.attribute_translator
            .as_deref()
            .map(|t| t as &dyn AttributeTranslator)
    }
}

impl fmt::Debug for BuilderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuilderOptions")
            .field("build_unindexed_arrays", &self.build_unindexed_arrays)
            .field("build_unindexed_objects", &self.build_unindexed_objects)
            .field("check_attribute_uniqueness", &self.check_attribute_uniqueness)
            .field("disallow_externals", &self.disallow_externals)
            .field("pretty_print", &self.pretty_print)
            .field(
                "attribute_translator",
                &self.attribute_translator.as_ref().map(|_| ".."),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = BuilderOptions::default();
        assert!(!options.build_unindexed_arrays);
        assert!(!options.build_unindexed_objects);
        assert!(!options.check_attribute_uniqueness);
        assert!(!options.disallow_externals);
        assert!(options.attribute_translator.is_none());
    }

    #[test]
    fn test_options_builder() {
        let options = BuilderOptions::new()
            .build_unindexed_arrays(true)
            .check_attribute_uniqueness(true);
        assert!(options.build_unindexed_arrays);
        assert!(!options.build_unindexed_objects);
        assert!(options.check_attribute_uniqueness);
    }
}
