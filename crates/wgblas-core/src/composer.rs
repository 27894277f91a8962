//! Extensions over naga-oil’s Composer.

use naga_oil::compose::{
    ComposableModuleDefinition, ComposableModuleDescriptor, Composer, ComposerError,
};

/// An extension trait for the naga-oil `Composer`.
pub trait ComposerExt {
    /// Adds a composable module to `self` only if no module with the same import path exists.
    ///
    /// `naga-oil` stops resolving some symbols if the same module is added twice. Returns
    /// `Ok(None)` and leaves `self` unchanged when the module was already added.
    fn add_composable_module_once(
        &mut self,
        desc: ComposableModuleDescriptor<'_>,
    ) -> Result<Option<&ComposableModuleDefinition>, ComposerError>;
}

/// The import path declared by a `#define_import_path` directive of `source`, if any.
pub fn import_path(source: &str) -> Option<&str> {
    source.lines().find_map(|line| {
        line.trim()
            .strip_prefix("#define_import_path")
            .map(str::trim)
            .filter(|path| !path.is_empty())
    })
}

impl ComposerExt for Composer {
    fn add_composable_module_once(
        &mut self,
        desc: ComposableModuleDescriptor<'_>,
    ) -> Result<Option<&ComposableModuleDefinition>, ComposerError> {
        if let Some(path) = import_path(desc.source) {
            if self.contains_module(path) {
                return Ok(None);
            }
        }

        self.add_composable_module(desc).map(Some)
    }
}
