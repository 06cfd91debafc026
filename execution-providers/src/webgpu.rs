//! WebGPU Execution Provider
//!
//! WebGPU for GPU acceleration in browsers and native applications.

use common::{ModelFormat, Quantization};

use crate::constants::*;
use crate::{
    impl_provider_base, BackendCapabilities, BackendType, DeviceClass, ExecutionProvider,
    ProviderConfig, Result,
};

#[derive(Debug, Clone)]
pub struct WebGPUExecutionProvider {
    config: ProviderConfig,
}

impl_provider_base!(
    WebGPUExecutionProvider,
    "WebGpuExecutionProvider",
    BackendType::WebGpu
);

impl WebGPUExecutionProvider {
    /// Set preferred layout (NCHW or NHWC)
    pub fn with_preferred_layout(mut self, layout: &str) -> Self {
        self.config.set(WEBGPU_PREFERRED_LAYOUT, layout);
        self
    }

    /// Enable graph capture
    pub fn with_enable_graph_capture(mut self, enable: bool) -> Self {
        self.config.set(WEBGPU_ENABLE_GRAPH_CAPTURE, enable);
        self
    }

    /// Set device ID
    pub fn with_device_id(mut self, id: i32) -> Self {
        self.config.set(WEBGPU_DEVICE_ID, id);
        self
    }

    /// Set validation mode (disabled, wgpuOnly, basic, full)
    pub fn with_validation_mode(mut self, mode: &str) -> Self {
        self.config.set(WEBGPU_VALIDATION_MODE, mode);
        self
    }
}

impl ExecutionProvider for WebGPUExecutionProvider {
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
        cfg!(any(target_os = "windows", target_os = "linux", target_arch = "wasm32"))
    }

    fn is_available(&self) -> Result<bool> {
        // WebGPU availability depends on browser/driver support
        Ok(self.supported_by_platform())
    }

    fn capabilities(&self) -> BackendCapabilities {
        // int8 kernels are CPU-only; shaders cover float and 4-bit weights
        BackendCapabilities::new(self.backend_type(), DeviceClass::Gpu)
            .with_formats([ModelFormat::Onnx])
            .with_quantizations([
                Quantization::Fp32,
                Quantization::Fp16,
                Quantization::Q4,
                Quantization::Q4f16,
            ])
    }
}
