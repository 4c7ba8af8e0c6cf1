//! Module loader for realms. Refuses everything.
//!
//! Document code has no module system: static imports never survive the
//! transformer and dynamic `import()` must not reach the filesystem or
//! network. Every specifier is rejected at resolution time.

use deno_core::{
    anyhow::{anyhow, Error},
    ModuleLoadResponse, ModuleLoader, ModuleSpecifier, RequestedModuleType, ResolutionKind,
};

/// A module loader that rejects every import.
pub struct DenyAllLoader;

impl ModuleLoader for DenyAllLoader {
    fn resolve(
        &self,
        specifier: &str,
        _referrer: &str,
        _kind: ResolutionKind,
    ) -> Result<ModuleSpecifier, Error> {
        tracing::debug!(specifier = %specifier, "module import rejected");
        Err(anyhow!(
            "Cannot import '{}': module loading is not available in this sandbox",
            specifier
        ))
    }

    fn load(
        &self,
        module_specifier: &ModuleSpecifier,
        _maybe_referrer: Option<&ModuleSpecifier>,
        _is_dyn_import: bool,
        _requested_module_type: RequestedModuleType,
    ) -> ModuleLoadResponse {
        ModuleLoadResponse::Sync(Err(anyhow!(
            "Cannot load '{}': module loading is not available in this sandbox",
            module_specifier
        )))
    }
}
