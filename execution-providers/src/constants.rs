//! Provider option keys, spelled the way the underlying runtimes expect them.

// Shared
pub const INTRA_OP_NUM_THREADS: &str = "intra_op_num_threads";

// CPU Execution Provider
pub const ARENA_EXTEND_STRATEGY: &str = "arena_extend_strategy";
pub const ENABLE_CPU_MEM_ARENA: &str = "enable_cpu_mem_arena";

// WASM Execution Provider
pub const WASM_NUM_THREADS: &str = "numThreads";
pub const WASM_SIMD: &str = "simd";
pub const WASM_PROXY: &str = "proxy";

// WebGPU Execution Provider
pub const WEBGPU_PREFERRED_LAYOUT: &str = "ep.webgpuexecutionprovider.preferredLayout";
pub const WEBGPU_ENABLE_GRAPH_CAPTURE: &str = "ep.webgpuexecutionprovider.enableGraphCapture";
pub const WEBGPU_DEVICE_ID: &str = "ep.webgpuexecutionprovider.deviceId";
pub const WEBGPU_VALIDATION_MODE: &str = "ep.webgpuexecutionprovider.validationMode";

// WebNN Execution Provider
pub const DEVICE_TYPE_WEBNN: &str = "deviceType";
pub const POWER_PREFERENCE: &str = "powerPreference";
pub const NUM_THREADS: &str = "numThreads";
