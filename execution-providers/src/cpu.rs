//! CPU Execution Provider
//!
//! Native fallback provider. Always available outside the browser.

use common::ModelFormat;

use crate::constants::*;
use crate::{
    impl_provider_base, BackendCapabilities, BackendType, DeviceClass, ExecutionProvider,
    ProviderConfig, Result,
};

#[derive(Debug, Clone)]
pub struct CPUExecutionProvider {
    config: ProviderConfig,
}

impl_provider_base!(CPUExecutionProvider, "CPUExecutionProvider", BackendType::Cpu);

impl CPUExecutionProvider {
    pub fn with_arena_extend_strategy(mut self, strategy: i32) -> Self {
        self.config.set(ARENA_EXTEND_STRATEGY, strategy);
        self
    }

    pub fn with_enable_cpu_mem_arena(mut self, enable: bool) -> Self {
        self.config.set(ENABLE_CPU_MEM_ARENA, enable);
        self
    }

    pub fn with_intra_op_threads(mut self, threads: usize) -> Self {
        self.config.set(INTRA_OP_NUM_THREADS, threads);
        self
    }
}

impl ExecutionProvider for CPUExecutionProvider {
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
        !cfg!(target_arch = "wasm32")
    }

    fn is_available(&self) -> Result<bool> {
        Ok(self.supported_by_platform())
    }

    fn capabilities(&self) -> BackendCapabilities {
        let threads = self
            .config
            .get_as::<usize>(INTRA_OP_NUM_THREADS)
            .unwrap_or_else(num_cpus::get);

        BackendCapabilities::new(self.backend_type(), DeviceClass::Cpu)
            .with_formats([ModelFormat::Onnx, ModelFormat::Gguf, ModelFormat::SafeTensors])
            .with_max_threads(threads)
    }
}
