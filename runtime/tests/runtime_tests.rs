//! Integration tests for the runtime manager and model cache.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{ModelFormat, Quantization};
use tabagent_execution_providers::{BackendType, ProviderError};
use tabagent_runtime::testing::{onnx_source, MockBackend};
use tabagent_runtime::{
    BackendError, BackendLoadOptions, Fingerprint, LoadOptions, LocalModelSource, ModelArtifact,
    ModelRef, ModelSource, ReleaseOutcome, RuntimeConfig, RuntimeError, RuntimeManager,
    StaticModelSource,
};
use tabagent_tensor::Tensor;

const MODEL: &str = "Xenova/distilbert-base-uncased-finetuned-sst-2-english";

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn runtime_with(backends: Vec<Arc<MockBackend>>, config: RuntimeConfig) -> RuntimeManager {
    init_logger();
    let mut builder = RuntimeManager::builder()
        .with_config(config)
        .with_source(Arc::new(onnx_source(MODEL)));
    for backend in backends {
        builder = builder.with_backend(backend);
    }
    builder.build().expect("valid runtime")
}

fn cpu_fingerprint(quantization: Quantization) -> Fingerprint {
    Fingerprint::new(
        &ModelRef::new(MODEL),
        BackendType::Cpu,
        quantization,
        &BackendLoadOptions::default(),
    )
}

#[tokio::test]
async fn test_concurrent_loads_share_one_handle() {
    let cpu = Arc::new(MockBackend::new(BackendType::Cpu).with_load_delay(Duration::from_millis(50)));
    let runtime = runtime_with(vec![cpu.clone()], RuntimeConfig::default());
    let model = ModelRef::new(MODEL);

    let (a, b) = tokio::join!(
        runtime.load_model(&model, None, LoadOptions::default()),
        runtime.load_model(&model, None, LoadOptions::default()),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(cpu.load_count(), 1);
    assert_eq!(runtime.ref_count(a.fingerprint()), Some(2));

    let stats = runtime.cache_stats();
    assert_eq!(stats.loads_started, 1);
    assert_eq!(stats.joins, 1);
    assert_eq!(stats.references, 2);
}

#[tokio::test]
async fn test_cache_hit_does_not_reload() {
    let cpu = Arc::new(MockBackend::new(BackendType::Cpu));
    let runtime = runtime_with(vec![cpu.clone()], RuntimeConfig::default());
    let model = ModelRef::new(MODEL);

    let first = runtime.load_model(&model, None, LoadOptions::default()).await.unwrap();
    let second = runtime.load_model(&model, None, LoadOptions::default()).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cpu.load_count(), 1);
    assert_eq!(runtime.cache_stats().hits, 1);
}

#[tokio::test]
async fn test_quantization_variants_are_distinct() {
    let cpu = Arc::new(MockBackend::new(BackendType::Cpu));
    let runtime = runtime_with(vec![cpu.clone()], RuntimeConfig::default());
    let model = ModelRef::new(MODEL);

    let fp32 = runtime
        .load_model(&model, None, LoadOptions::new().with_quantization(Quantization::Fp32))
        .await
        .unwrap();
    let q8 = runtime
        .load_model(&model, None, LoadOptions::new().with_quantization(Quantization::Q8))
        .await
        .unwrap();

    assert!(!Arc::ptr_eq(&fp32, &q8));
    assert_ne!(fp32.fingerprint(), q8.fingerprint());
    assert_eq!(fp32.fingerprint(), &cpu_fingerprint(Quantization::Fp32));
    assert_eq!(q8.metadata().quantization, Quantization::Q8);
    assert_eq!(cpu.load_count(), 2);
}

#[tokio::test]
async fn test_failed_load_is_not_cached() {
    let cpu = Arc::new(MockBackend::new(BackendType::Cpu));
    let runtime = runtime_with(vec![cpu.clone()], RuntimeConfig::default());
    let model = ModelRef::new(MODEL);

    cpu.fail_next_loads(1);
    let err = runtime
        .load_model(&model, None, LoadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::ModelLoad {
            backend: BackendType::Cpu,
            ..
        }
    ));
    assert_eq!(runtime.cache_stats().entries, 0);

    let handle = runtime.load_model(&model, None, LoadOptions::default()).await.unwrap();
    assert!(handle.is_loaded());
    assert_eq!(cpu.load_count(), 2);
}

#[tokio::test]
async fn test_release_keeps_handle_until_last_holder() {
    let logits = Tensor::from_vec(vec![-1.5f32, 2.0], vec![1, 2]).unwrap();
    let cpu = Arc::new(MockBackend::new(BackendType::Cpu).with_outputs(vec![logits.clone()]));
    let runtime = runtime_with(vec![cpu.clone()], RuntimeConfig::default());
    let model = ModelRef::new(MODEL);

    let a = runtime.load_model(&model, None, LoadOptions::default()).await.unwrap();
    let b = runtime.load_model(&model, None, LoadOptions::default()).await.unwrap();

    assert_eq!(runtime.release_model(&a), ReleaseOutcome::StillShared(1));
    assert!(b.is_loaded());
    let outputs = runtime.infer(&b, vec![], None).await.unwrap();
    assert_eq!(outputs, vec![logits]);

    assert_eq!(runtime.release_model(&b), ReleaseOutcome::Released);
    assert!(!b.is_loaded());
    assert_eq!(cpu.live_sessions(), 0);
    assert_eq!(runtime.release_model(&b), ReleaseOutcome::NotCached);
}

#[tokio::test]
async fn test_eviction_disposes_handle() {
    let cpu = Arc::new(MockBackend::new(BackendType::Cpu));
    let runtime = runtime_with(vec![cpu.clone()], RuntimeConfig::default());
    let model = ModelRef::new(MODEL);

    let handle = runtime.load_model(&model, None, LoadOptions::default()).await.unwrap();
    let _other = runtime.load_model(&model, None, LoadOptions::default()).await.unwrap();

    assert!(runtime.evict(handle.fingerprint()));
    assert!(!handle.is_loaded());
    assert!(runtime.ref_count(handle.fingerprint()).is_none());

    let err = runtime.infer(&handle, vec![], None).await.unwrap_err();
    assert!(matches!(err, RuntimeError::HandleDisposed { .. }));
    assert!(!runtime.evict(handle.fingerprint()));

    let reloaded = runtime.load_model(&model, None, LoadOptions::default()).await.unwrap();
    assert!(!Arc::ptr_eq(&handle, &reloaded));
    assert_eq!(cpu.load_count(), 2);
}

#[tokio::test]
async fn test_eviction_during_load() {
    let cpu = Arc::new(MockBackend::new(BackendType::Cpu).with_load_delay(Duration::from_millis(100)));
    let runtime = runtime_with(vec![cpu.clone()], RuntimeConfig::default());
    let model = ModelRef::new(MODEL);
    let fingerprint = cpu_fingerprint(Quantization::Fp32);

    let (loaded, evicted) = tokio::join!(
        runtime.load_model(&model, None, LoadOptions::default()),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            runtime.evict(&fingerprint)
        },
    );

    assert!(evicted);
    assert!(matches!(loaded, Err(RuntimeError::ModelLoad { .. })));
    assert_eq!(cpu.live_sessions(), 0);
    assert!(runtime.cache_stats().entries == 0);
}

#[tokio::test]
async fn test_detection_failure_is_skipped() {
    let webgpu = Arc::new(
        MockBackend::new(BackendType::WebGpu)
            .failing_detection(ProviderError::NotAvailable("webgpu".to_string())),
    );
    let cpu = Arc::new(MockBackend::new(BackendType::Cpu));
    let runtime = runtime_with(vec![webgpu.clone(), cpu.clone()], RuntimeConfig::default());

    let detected = runtime.detect_capabilities().await;
    assert_eq!(detected.len(), 1);
    assert_eq!(detected[0].backend, BackendType::Cpu);

    let handle = runtime
        .load_model(&ModelRef::new(MODEL), None, LoadOptions::default())
        .await
        .unwrap();
    assert_eq!(handle.backend(), BackendType::Cpu);
    assert_eq!(webgpu.load_count(), 0);
}

#[tokio::test]
async fn test_slow_detection_times_out() {
    let webgpu = Arc::new(MockBackend::new(BackendType::WebGpu).with_detect_delay(Duration::from_secs(5)));
    let cpu = Arc::new(MockBackend::new(BackendType::Cpu));
    let config = RuntimeConfig {
        detection_timeout_ms: 50,
        ..Default::default()
    };
    let runtime = runtime_with(vec![webgpu, cpu], config);

    let backend = runtime.select_backend(None, ModelFormat::Onnx).await.unwrap();
    assert_eq!(backend, BackendType::Cpu);
}

#[tokio::test]
async fn test_gpu_is_preferred_when_capable() {
    let webgpu = Arc::new(MockBackend::new(BackendType::WebGpu).with_quantizations([Quantization::Fp16]));
    let cpu = Arc::new(MockBackend::new(BackendType::Cpu));
    let runtime = runtime_with(vec![webgpu, cpu], RuntimeConfig::default());
    let model = ModelRef::new(MODEL);

    let fp16 = runtime
        .load_model(&model, None, LoadOptions::new().with_quantization(Quantization::Fp16))
        .await
        .unwrap();
    assert_eq!(fp16.backend(), BackendType::WebGpu);

    // WebGPU does not advertise q8
    let q8 = runtime
        .load_model(&model, None, LoadOptions::new().with_quantization(Quantization::Q8))
        .await
        .unwrap();
    assert_eq!(q8.backend(), BackendType::Cpu);
}

#[tokio::test]
async fn test_requested_backend_failure_without_fallback() {
    let webgpu = Arc::new(MockBackend::new(BackendType::WebGpu).always_failing());
    let cpu = Arc::new(MockBackend::new(BackendType::Cpu));
    let runtime = runtime_with(vec![webgpu.clone(), cpu.clone()], RuntimeConfig::default());
    let model = ModelRef::new(MODEL);

    let err = runtime
        .load_model(&model, Some(BackendType::WebGpu), LoadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::ModelLoad {
            backend: BackendType::WebGpu,
            ..
        }
    ));
    assert_eq!(cpu.load_count(), 0);

    let handle = runtime
        .load_model(&model, Some(BackendType::WebGpu), LoadOptions::new().with_fallback(true))
        .await
        .unwrap();
    assert_eq!(handle.backend(), BackendType::Cpu);
    assert_eq!(webgpu.load_count(), 2);
    assert_eq!(cpu.load_count(), 1);
}

#[tokio::test]
async fn test_default_config_reports_load_failure() {
    let webgpu = Arc::new(MockBackend::new(BackendType::WebGpu).always_failing());
    let cpu = Arc::new(MockBackend::new(BackendType::Cpu));
    let runtime = runtime_with(vec![webgpu.clone(), cpu.clone()], RuntimeConfig::default());
    let model = ModelRef::new(MODEL);

    let err = runtime
        .load_model(&model, None, LoadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::ModelLoad {
            backend: BackendType::WebGpu,
            ..
        }
    ));
    assert_eq!(webgpu.load_count(), 1);
    assert_eq!(cpu.load_count(), 0);
    assert_eq!(runtime.cache_stats().entries, 0);

    let handle = runtime
        .load_model(&model, None, LoadOptions::new().with_fallback(true))
        .await
        .unwrap();
    assert_eq!(handle.backend(), BackendType::Cpu);
    assert_eq!(cpu.load_count(), 1);
}

/// Delegates to a static source and counts how often it is asked.
struct CountingSource {
    inner: StaticModelSource,
    resolves: AtomicUsize,
}

#[async_trait]
impl ModelSource for CountingSource {
    async fn resolve(&self, model: &ModelRef, quantization: Quantization) -> tabagent_runtime::Result<ModelArtifact> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        self.inner.resolve(model, quantization).await
    }
}

#[tokio::test]
async fn test_cache_hit_skips_source() {
    init_logger();
    let source = Arc::new(CountingSource {
        inner: onnx_source(MODEL),
        resolves: AtomicUsize::new(0),
    });
    let cpu = Arc::new(MockBackend::new(BackendType::Cpu));
    let runtime = RuntimeManager::builder()
        .with_source(source.clone())
        .with_backend(cpu.clone())
        .build()
        .unwrap();
    let model = ModelRef::new(MODEL);

    let first = runtime.load_model(&model, None, LoadOptions::default()).await.unwrap();
    let second = runtime.load_model(&model, None, LoadOptions::default()).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cpu.load_count(), 1);
    assert_eq!(source.resolves.load(Ordering::SeqCst), 1);
    assert_eq!(runtime.ref_count(first.fingerprint()), Some(2));

    // A different variant is a miss and goes back to the source
    let q8 = runtime
        .load_model(&model, None, LoadOptions::new().with_quantization(Quantization::Q8))
        .await
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &q8));
    assert_eq!(source.resolves.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cache_hit_follows_selection() {
    let webgpu = Arc::new(MockBackend::new(BackendType::WebGpu));
    let cpu = Arc::new(MockBackend::new(BackendType::Cpu));
    let runtime = runtime_with(vec![webgpu.clone(), cpu.clone()], RuntimeConfig::default());
    let model = ModelRef::new(MODEL);

    let pinned = runtime
        .load_model(&model, Some(BackendType::Cpu), LoadOptions::default())
        .await
        .unwrap();
    assert_eq!(pinned.backend(), BackendType::Cpu);

    // The Cpu entry is not what an unpinned load would pick
    let preferred = runtime.load_model(&model, None, LoadOptions::default()).await.unwrap();
    assert_eq!(preferred.backend(), BackendType::WebGpu);
    assert_eq!(runtime.ref_count(pinned.fingerprint()), Some(1));
    assert_eq!(webgpu.load_count(), 1);
}

#[tokio::test]
async fn test_undetected_requested_backend_without_fallback() {
    let cpu = Arc::new(MockBackend::new(BackendType::Cpu));
    let runtime = runtime_with(vec![cpu.clone()], RuntimeConfig::default());

    let err = runtime
        .load_model(&ModelRef::new(MODEL), Some(BackendType::WebNN), LoadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::NoBackendAvailable(_)));
    assert_eq!(cpu.load_count(), 0);
}

#[tokio::test]
async fn test_unknown_model_is_a_source_error() {
    let runtime = runtime_with(vec![Arc::new(MockBackend::new(BackendType::Cpu))], RuntimeConfig::default());
    let err = runtime
        .load_model(&ModelRef::new("nobody/nothing"), None, LoadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Source { .. }));
}

#[tokio::test]
async fn test_load_timeout_abandons_load() {
    let cpu = Arc::new(MockBackend::new(BackendType::Cpu).with_load_delay(Duration::from_millis(300)));
    let runtime = runtime_with(vec![cpu.clone()], RuntimeConfig::default());
    let model = ModelRef::new(MODEL);

    let err = runtime
        .load_model(&model, None, LoadOptions::new().with_timeout(Duration::from_millis(20)))
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Timeout { after_ms: 20, .. }));
    assert_eq!(runtime.cache_stats().entries, 0);
}

#[tokio::test]
async fn test_cancelled_waiter_does_not_leak_reference() {
    let cpu = Arc::new(MockBackend::new(BackendType::Cpu).with_load_delay(Duration::from_millis(100)));
    let runtime = runtime_with(vec![cpu.clone()], RuntimeConfig::default());
    let model = ModelRef::new(MODEL);

    let (impatient, patient) = tokio::join!(
        runtime.load_model(&model, None, LoadOptions::new().with_timeout(Duration::from_millis(20))),
        runtime.load_model(&model, None, LoadOptions::default()),
    );

    assert!(impatient.is_err());
    let handle = patient.unwrap();
    assert_eq!(runtime.ref_count(handle.fingerprint()), Some(1));
    assert_eq!(cpu.load_count(), 1);
    assert_eq!(runtime.release_model(&handle), ReleaseOutcome::Released);
}

#[tokio::test]
async fn test_infer_timeout_cancels_session() {
    let cpu = Arc::new(MockBackend::new(BackendType::Cpu).with_infer_delay(Duration::from_millis(300)));
    let runtime = runtime_with(vec![cpu.clone()], RuntimeConfig::default());
    let handle = runtime
        .load_model(&ModelRef::new(MODEL), None, LoadOptions::default())
        .await
        .unwrap();

    let err = runtime
        .infer(&handle, vec![], Some(Duration::from_millis(20)))
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Timeout { .. }));
    assert_eq!(cpu.cancel_count(), 1);
}

#[tokio::test]
async fn test_backend_errors_carry_context() {
    let cpu = Arc::new(
        MockBackend::new(BackendType::Cpu)
            .with_responder(|_| Err(BackendError::Execution("kernel exploded".to_string()))),
    );
    let runtime = runtime_with(vec![cpu], RuntimeConfig::default());
    let handle = runtime
        .load_model(&ModelRef::new(MODEL), None, LoadOptions::default())
        .await
        .unwrap();

    match runtime.infer(&handle, vec![], None).await {
        Err(RuntimeError::Inference { model, backend, reason }) => {
            assert_eq!(model, MODEL);
            assert_eq!(backend, BackendType::Cpu);
            assert!(reason.contains("kernel exploded"));
        }
        other => panic!("expected inference error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_shutdown_disposes_everything() {
    let cpu = Arc::new(MockBackend::new(BackendType::Cpu));
    let runtime = runtime_with(vec![cpu.clone()], RuntimeConfig::default());
    let model = ModelRef::new(MODEL);

    let a = runtime.load_model(&model, None, LoadOptions::default()).await.unwrap();
    let b = runtime
        .load_model(&model, None, LoadOptions::new().with_quantization(Quantization::Q4f16))
        .await
        .unwrap();

    runtime.shutdown();
    assert!(!a.is_loaded());
    assert!(!b.is_loaded());
    assert_eq!(runtime.cache_stats().entries, 0);
    assert_eq!(cpu.live_sessions(), 0);
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = RuntimeConfig {
        detection_timeout_ms: 0,
        ..Default::default()
    };
    let err = RuntimeManager::builder().with_config(config).build().err();
    assert!(matches!(err, Some(RuntimeError::Config(_))));
}

#[tokio::test]
async fn test_local_source_layout() {
    let dir = tempfile::tempdir().unwrap();
    let model_dir = dir.path().join("Xenova").join("bert");
    std::fs::create_dir_all(model_dir.join("onnx")).unwrap();
    std::fs::write(model_dir.join("onnx").join("model_q4f16.onnx"), vec![0u8; 64]).unwrap();
    std::fs::write(model_dir.join("model.gguf"), vec![0u8; 16]).unwrap();
    std::fs::write(
        model_dir.join("metadata.json"),
        r#"{"name": "bert", "version": "1.0", "inputs": [{"name": "input_ids"}]}"#,
    )
    .unwrap();

    let source = LocalModelSource::new(dir.path());
    let model = ModelRef::new("Xenova/bert");

    let q4 = source.resolve(&model, Quantization::Q4f16).await.unwrap();
    assert_eq!(q4.metadata.format, ModelFormat::Onnx);
    assert_eq!(q4.metadata.quantization, Quantization::Q4f16);
    assert_eq!(q4.metadata.size_bytes, 64);
    assert_eq!(q4.metadata.version.as_deref(), Some("1.0"));
    assert_eq!(q4.metadata.input_names(), vec!["input_ids"]);

    let fp32 = source.resolve(&model, Quantization::Fp32).await.unwrap();
    assert_eq!(fp32.metadata.format, ModelFormat::Gguf);
    assert_eq!(fp32.metadata.size_bytes, 16);

    let err = source.resolve(&model, Quantization::Q8).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Source { .. }));
}

#[tokio::test]
async fn test_runtime_defaults_to_local_source() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let model_dir = dir.path().join("local-model");
    std::fs::create_dir_all(&model_dir).unwrap();
    std::fs::write(model_dir.join("model_fp16.onnx"), vec![1u8; 8]).unwrap();

    let cpu = Arc::new(MockBackend::new(BackendType::Cpu));
    let config = RuntimeConfig {
        model_root: dir.path().to_path_buf(),
        default_quantization: Quantization::Fp16,
        ..Default::default()
    };
    let runtime = RuntimeManager::builder()
        .with_config(config)
        .with_backend(cpu.clone())
        .build()
        .unwrap();

    let handle = runtime
        .load_model(&ModelRef::new("local-model"), None, LoadOptions::default())
        .await
        .unwrap();
    assert_eq!(handle.metadata().size_bytes, 8);
    assert_eq!(handle.fingerprint().quantization, Quantization::Fp16);
}
