//! Pipeline lifecycle: load, preprocess, infer, postprocess, dispose.

use parking_lot::RwLock;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tabagent_runtime::{ModelHandle, RuntimeManager};
use tabagent_tensor::{Tensor, TensorError};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, Result};
use crate::options::RunOptions;
use crate::task::{BatchPolicy, Task};
use crate::types::PipelineType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Uninitialized,
    Loading,
    Ready,
    Running,
    Disposed,
}

/// Counts a run as in flight for as long as it lives
struct RunGuard<'a> {
    in_flight: &'a AtomicUsize,
    drained: &'a Notify,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}

/// A task bound to a runtime.
///
/// `run` may be called concurrently; the first calls share one model load
/// and the pipeline holds a single cache reference until `dispose`.
pub struct Pipeline<T: Task> {
    task: T,
    runtime: Arc<RuntimeManager>,
    handle: RwLock<Option<Arc<ModelHandle>>>,
    load_lock: Mutex<()>,
    loading: AtomicBool,
    disposed: AtomicBool,
    in_flight: AtomicUsize,
    drained: Notify,
    cancel: CancellationToken,
    dispose_grace: Duration,
}

impl<T: Task> Pipeline<T> {
    pub fn new(task: T, runtime: Arc<RuntimeManager>) -> Self {
        let dispose_grace = runtime.config().dispose_grace();
        Self {
            task,
            runtime,
            handle: RwLock::new(None),
            load_lock: Mutex::new(()),
            loading: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            cancel: CancellationToken::new(),
            dispose_grace,
        }
    }

    /// How long `dispose` waits for in-flight runs before reclaiming
    pub fn with_dispose_grace(mut self, grace: Duration) -> Self {
        self.dispose_grace = grace;
        self
    }

    pub fn task(&self) -> &T {
        &self.task
    }

    pub fn pipeline_type(&self) -> PipelineType {
        self.task.pipeline_type()
    }

    /// Model handle, once loaded
    pub fn handle(&self) -> Option<Arc<ModelHandle>> {
        self.handle.read().clone()
    }

    fn loaded_handle(&self) -> Option<Arc<ModelHandle>> {
        self.handle().filter(|handle| handle.is_loaded())
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> PipelineState {
        if self.is_disposed() {
            PipelineState::Disposed
        } else if self.in_flight.load(Ordering::SeqCst) > 0 {
            PipelineState::Running
        } else if self.loading.load(Ordering::SeqCst) {
            PipelineState::Loading
        } else if self.loaded_handle().is_some() {
            PipelineState::Ready
        } else {
            PipelineState::Uninitialized
        }
    }

    fn disposed_error(&self) -> PipelineError {
        PipelineError::Disposed(self.pipeline_type())
    }

    /// Load the model unless already loaded. A failed load leaves the
    /// pipeline uninitialized so the next call retries.
    async fn ensure_loaded(&self) -> Result<Arc<ModelHandle>> {
        if self.is_disposed() {
            return Err(self.disposed_error());
        }
        if let Some(handle) = self.loaded_handle() {
            return Ok(handle);
        }

        let _guard = self.load_lock.lock().await;
        if self.is_disposed() {
            return Err(self.disposed_error());
        }
        if let Some(handle) = self.loaded_handle() {
            return Ok(handle);
        }
        // Evicted or shut down underneath us; the cache already dropped our
        // reference, so there is nothing to release.
        if let Some(stale) = self.handle.write().take() {
            log::info!(
                "{} pipeline reloading {}: {} was disposed",
                self.pipeline_type(),
                self.task.model_ref(),
                stale.fingerprint()
            );
        }

        self.loading.store(true, Ordering::SeqCst);
        let loaded = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.disposed_error()),
            result = self.runtime.load_model(
                self.task.model_ref(),
                self.task.backend(),
                self.task.load_options(),
            ) => result.map_err(PipelineError::load),
        };
        self.loading.store(false, Ordering::SeqCst);

        let handle = loaded?;
        log::info!(
            "{} pipeline ready: {} on {}",
            self.pipeline_type(),
            self.task.model_ref(),
            handle.backend()
        );
        *self.handle.write() = Some(Arc::clone(&handle));
        Ok(handle)
    }

    fn begin_run(&self) -> Result<RunGuard<'_>> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = RunGuard {
            in_flight: &self.in_flight,
            drained: &self.drained,
        };
        if self.is_disposed() {
            return Err(self.disposed_error());
        }
        Ok(guard)
    }

    /// Abort `work` with `Disposed` as soon as the pipeline is disposed
    async fn until_disposed<F, R>(&self, work: F) -> Result<R>
    where
        F: Future<Output = Result<R>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.disposed_error()),
            result = work => result,
        }
    }

    async fn run_one(
        &self,
        handle: &ModelHandle,
        input: &T::Input,
        options: &RunOptions,
        timeout: Option<Duration>,
    ) -> Result<T::Output> {
        let inputs = self.task.preprocess(input)?;
        let outputs = self
            .runtime
            .infer(handle, inputs, timeout)
            .await
            .map_err(PipelineError::inference)?;
        self.task.postprocess(outputs, options)
    }

    /// Run the task on one input
    pub async fn run(&self, input: &T::Input, options: &RunOptions) -> Result<T::Output> {
        let timeout = options.timeout()?;
        let handle = self.ensure_loaded().await?;
        let _run = self.begin_run()?;
        self.until_disposed(self.run_one(&handle, input, options, timeout))
            .await
    }

    /// Run the task on each input, results in input order.
    ///
    /// A failure while processing one input is reported in that input's slot.
    /// Load failures and disposal fail the whole call.
    pub async fn run_batch(
        &self,
        inputs: &[T::Input],
        options: &RunOptions,
    ) -> Result<Vec<Result<T::Output>>> {
        let timeout = options.timeout()?;
        let handle = self.ensure_loaded().await?;
        let _run = self.begin_run()?;

        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        if self.task.batch_policy() == BatchPolicy::Stacked && inputs.len() > 1 {
            let stacked = self
                .until_disposed(self.run_stacked(&handle, inputs, options, timeout))
                .await?;
            if let Some(results) = stacked {
                return Ok(results);
            }
            log::debug!(
                "{} batch of {} is not stackable, running sequentially",
                self.pipeline_type(),
                inputs.len()
            );
        }

        let mut results = Vec::with_capacity(inputs.len());
        for input in inputs {
            let result = self
                .until_disposed(self.run_one(&handle, input, options, timeout))
                .await;
            if let Err(PipelineError::Disposed(_)) = result {
                return Err(self.disposed_error());
            }
            results.push(result);
        }
        Ok(results)
    }

    /// One inference call for the whole batch. `None` when the inputs cannot
    /// be stacked.
    async fn run_stacked(
        &self,
        handle: &ModelHandle,
        inputs: &[T::Input],
        options: &RunOptions,
        timeout: Option<Duration>,
    ) -> Result<Option<Vec<Result<T::Output>>>> {
        let mut per_item = Vec::with_capacity(inputs.len());
        for input in inputs {
            match self.task.preprocess(input) {
                Ok(tensors) => per_item.push(tensors),
                Err(_) => return Ok(None),
            }
        }
        let Some(batched) = stack_batch(&per_item)? else {
            return Ok(None);
        };

        let batch_size = inputs.len();
        let outputs = match self.runtime.infer(handle, batched, timeout).await {
            Ok(outputs) => outputs,
            Err(e) => {
                return Ok(Some(failed_batch(PipelineError::inference(e), batch_size)));
            }
        };

        let rows = match split_batch(outputs, batch_size) {
            Ok(rows) => rows,
            Err(error) => return Ok(Some(failed_batch(error, batch_size))),
        };
        Ok(Some(
            rows.into_iter()
                .map(|row| self.task.postprocess(row, options))
                .collect(),
        ))
    }

    /// Cancel in-flight runs, wait up to the grace period for them to finish,
    /// then release the model reference. Calling it again is a no-op.
    pub async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        log::info!("Disposing {} pipeline for {}", self.pipeline_type(), self.task.model_ref());
        self.cancel.cancel();

        if self.in_flight.load(Ordering::SeqCst) > 0 {
            if let Some(handle) = self.handle() {
                self.runtime.cancel(&handle);
            }
            let drained = async {
                loop {
                    let notified = self.drained.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();
                    if self.in_flight.load(Ordering::SeqCst) == 0 {
                        break;
                    }
                    notified.await;
                }
            };
            if tokio::time::timeout(self.dispose_grace, drained).await.is_err() {
                log::warn!(
                    "{} runs still in flight after {:?}, releasing model anyway",
                    self.in_flight.load(Ordering::SeqCst),
                    self.dispose_grace
                );
            }
        }

        let _guard = self.load_lock.lock().await;
        let handle = self.handle.write().take();
        if let Some(handle) = handle {
            let outcome = self.runtime.release_model(&handle);
            log::debug!("Pipeline released {}: {:?}", handle.fingerprint(), outcome);
        }
        Ok(())
    }
}

impl<T: Task> Drop for Pipeline<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            self.runtime.release_model(&handle);
        }
    }
}

fn failed_batch<O>(error: PipelineError, batch_size: usize) -> Vec<Result<O>> {
    (0..batch_size).map(|_| Err(error.clone())).collect()
}

/// Concatenate per-item inputs along their leading batch axis of 1
fn stack_batch(per_item: &[Vec<Tensor>]) -> Result<Option<Vec<Tensor>>> {
    let Some(first) = per_item.first() else {
        return Ok(None);
    };

    let stackable = per_item.iter().all(|tensors| {
        tensors.len() == first.len()
            && tensors.iter().zip(first).all(|(t, f)| {
                t.shape() == f.shape() && t.dtype() == f.dtype() && t.shape().first() == Some(&1)
            })
    });
    if !stackable {
        return Ok(None);
    }

    let batch_size = per_item.len();
    let mut batched = Vec::with_capacity(first.len());
    for position in 0..first.len() {
        let column: Vec<Tensor> = per_item.iter().map(|tensors| tensors[position].clone()).collect();
        let stacked = Tensor::stack(&column)?;
        // [n, 1, rest..] -> [n, rest..]
        let mut shape = vec![batch_size];
        shape.extend_from_slice(&first[position].shape()[1..]);
        batched.push(stacked.reshape(shape).map_err(TensorError::from)?);
    }
    Ok(Some(batched))
}

/// Split batched outputs back into per-item outputs with a leading axis of 1
fn split_batch(outputs: Vec<Tensor>, batch_size: usize) -> Result<Vec<Vec<Tensor>>> {
    let mut rows: Vec<Vec<Tensor>> = (0..batch_size).map(|_| Vec::with_capacity(outputs.len())).collect();

    for output in outputs {
        if output.shape().first() != Some(&batch_size) {
            return Err(PipelineError::InvalidInput(format!(
                "batched output has shape {:?}, expected leading dimension {}",
                output.shape(),
                batch_size
            )));
        }
        for (row, item) in rows.iter_mut().zip(output.unstack().map_err(TensorError::from)?) {
            let mut shape = vec![1];
            shape.extend_from_slice(item.shape());
            row.push(item.reshape(shape).map_err(TensorError::from)?);
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: Vec<i64>) -> Tensor {
        let len = values.len();
        Tensor::from_vec(values, vec![1, len]).unwrap()
    }

    #[test]
    fn test_stack_batch_merges_leading_axis() {
        let per_item = vec![vec![ids(vec![1, 2, 3])], vec![ids(vec![4, 5, 6])]];
        let batched = stack_batch(&per_item).unwrap().unwrap();
        assert_eq!(batched[0].shape(), &[2, 3]);
        assert_eq!(batched[0].get_as::<i64>(&[1, 0]).unwrap(), 4);
    }

    #[test]
    fn test_stack_batch_rejects_ragged_inputs() {
        let per_item = vec![vec![ids(vec![1, 2, 3])], vec![ids(vec![4, 5])]];
        assert!(stack_batch(&per_item).unwrap().is_none());
    }

    #[test]
    fn test_split_batch_restores_item_axis() {
        let logits = Tensor::from_vec(vec![0.1f32, 0.9, 0.8, 0.2], vec![2, 2]).unwrap();
        let rows = split_batch(vec![logits], 2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0].shape(), &[1, 2]);
        assert_eq!(rows[1][0].to_vec::<f32>().unwrap(), vec![0.8, 0.2]);

        let wrong = Tensor::from_vec(vec![0.0f32; 3], vec![3]).unwrap();
        assert!(split_batch(vec![wrong], 2).is_err());
    }
}
