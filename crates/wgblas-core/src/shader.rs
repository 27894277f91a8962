//! Reusable composable shader modules.

use crate::composer::ComposerExt;
use naga_oil::compose::{ComposableModuleDescriptor, Composer, ComposerError};

/// A composable WGSL module.
pub trait Shader {
    /// Path of the shader’s `.wgsl` file, used in composition error messages.
    const FILE_PATH: &'static str;

    /// This shader’s sources.
    fn src() -> &'static str;

    /// Adds the module definition of `Self` and its dependencies to `composer`.
    fn compose(composer: &mut Composer) -> Result<(), ComposerError> {
        composer.add_composable_module_once(ComposableModuleDescriptor {
            source: Self::src(),
            file_path: Self::FILE_PATH,
            ..Default::default()
        })?;
        Ok(())
    }

    /// A composer filled with the module definition of `Self` and its dependencies.
    fn composer() -> Result<Composer, ComposerError> {
        let mut composer = Composer::default();
        Self::compose(&mut composer)?;
        Ok(composer)
    }
}

/// The `wgblas::view` module: strided operand indexing.
pub struct ViewIndexing;

impl Shader for ViewIndexing {
    const FILE_PATH: &'static str = "view.wgsl";

    fn src() -> &'static str {
        include_str!("view.wgsl")
    }
}

/// The `wgblas::reduce_ops` module: identities, source maps and combinations of reductions.
pub struct ReduceOps;

impl Shader for ReduceOps {
    const FILE_PATH: &'static str = "reduce_ops.wgsl";

    fn src() -> &'static str {
        include_str!("reduce_ops.wgsl")
    }
}
