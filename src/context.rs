//! Process-level interop context.
//!
//! All registries live here and are passed where needed; nothing in the
//! crate reaches for a global. One context per process is the expected
//! shape, but nothing prevents several isolated ones.

use std::sync::Arc;

use crate::descriptor::BuiltinTag;
use crate::dispatch::{CallDescriptor, DescriptorCache, DispatchError, Dispatcher};
use crate::platform::{CallConvention, DispatchStrategy, Platform};
use crate::upcall::UpcallRegistry;

#[derive(Debug)]
pub struct FfiContext {
    platform: Platform,
    strategy: DispatchStrategy,
    descriptors: DescriptorCache,
    dispatcher: Dispatcher,
    upcalls: UpcallRegistry,
}

impl FfiContext {
    /// Probe the host and assemble the registries.
    #[must_use]
    pub fn new() -> Self {
        Self::with_strategy(DispatchStrategy::probe())
    }

    /// Force a dispatch strategy; used to pin the CIF path in tests and
    /// on hosts where the probe would be wrong for embedding reasons.
    #[must_use]
    pub fn with_strategy(strategy: DispatchStrategy) -> Self {
        Self {
            platform: Platform::host(),
            strategy,
            descriptors: DescriptorCache::new(),
            dispatcher: Dispatcher::new(strategy),
            upcalls: UpcallRegistry::new(),
        }
    }

    #[must_use]
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    #[must_use]
    pub fn strategy(&self) -> DispatchStrategy {
        self.strategy
    }

    /// Intern a call shape.
    pub fn descriptor(
        &self,
        ret: BuiltinTag,
        params: &[BuiltinTag],
        convention: CallConvention,
    ) -> Result<Arc<CallDescriptor>, DispatchError> {
        self.descriptors.intern(ret, params, convention)
    }

    #[must_use]
    pub fn descriptors(&self) -> &DescriptorCache {
        &self.descriptors
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub fn upcalls(&self) -> &UpcallRegistry {
        &self.upcalls
    }

    /// Tear down the upcall registry. Native code must not call any stub
    /// address after this returns.
    pub fn shutdown(&self) {
        self.upcalls.shutdown();
    }
}

impl Default for FfiContext {
    fn default() -> Self {
        Self::new()
    }
}
