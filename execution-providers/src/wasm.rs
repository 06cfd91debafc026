//! WASM Execution Provider
//!
//! WebAssembly CPU kernels for browser environments.

use common::ModelFormat;

use crate::constants::*;
use crate::{
    impl_provider_base, BackendCapabilities, BackendType, DeviceClass, ExecutionProvider,
    ProviderConfig, Result,
};

#[derive(Debug, Clone)]
pub struct WASMExecutionProvider {
    config: ProviderConfig,
}

impl_provider_base!(WASMExecutionProvider, "WASMExecutionProvider", BackendType::Wasm);

impl WASMExecutionProvider {
    /// Set number of worker threads (requires cross-origin isolation)
    pub fn with_threads(mut self, threads: u32) -> Self {
        self.config.set(WASM_NUM_THREADS, threads);
        self
    }

    pub fn with_simd(mut self, enable: bool) -> Self {
        self.config.set(WASM_SIMD, enable);
        self
    }

    /// Run inference in a web worker proxy
    pub fn with_proxy(mut self, enable: bool) -> Self {
        self.config.set(WASM_PROXY, enable);
        self
    }
}

impl ExecutionProvider for WASMExecutionProvider {
    fn name(&self) -> &'static str {
        self.get_name()
    }

    fn backend_type(&self) -> BackendType {
        self.get_backend_type()
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn supported_by_platform(&self) -> bool {
        cfg!(target_arch = "wasm32")
    }

    fn is_available(&self) -> Result<bool> {
        #[cfg(target_arch = "wasm32")]
        {
            Ok(true) // Always available in WASM
        }

        #[cfg(not(target_arch = "wasm32"))]
        Ok(false)
    }

    fn capabilities(&self) -> BackendCapabilities {
        let threads = self.config.get_as::<usize>(WASM_NUM_THREADS).unwrap_or(1);

        BackendCapabilities::new(self.backend_type(), DeviceClass::Cpu)
            .with_formats([ModelFormat::Onnx])
            .with_max_threads(threads)
    }
}
