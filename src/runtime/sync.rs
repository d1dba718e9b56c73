//! Scoped stream synchronization

use super::{Runtime, RuntimeClient};
use crate::tensor::Tensor;

/// Auto-synchronizing scope over a client
///
/// Buffers handed to [`retain`](Self::retain) stay alive until the scope
/// ends. Dropping the scope synchronizes the client first and only then
/// releases the retained buffers, so no buffer is freed while a launch
/// that reads or writes it may still be in flight.
pub struct AutoSynchronize<'a, R: Runtime> {
    client: &'a R::Client,
    retained: Vec<Tensor<R>>,
}

impl<'a, R: Runtime> AutoSynchronize<'a, R> {
    /// Open a scope on `client`
    pub fn new(client: &'a R::Client) -> Self {
        Self {
            client,
            retained: Vec::new(),
        }
    }

    /// The client this scope synchronizes
    pub fn client(&self) -> &'a R::Client {
        self.client
    }

    /// Keep `tensor` alive until the scope ends
    pub fn retain(&mut self, tensor: &Tensor<R>) {
        self.retained.push(tensor.clone());
    }

    /// Number of retained buffers
    pub fn retained(&self) -> usize {
        self.retained.len()
    }

    /// Synchronize now and release the retained buffers
    pub fn finish(mut self) -> crate::error::Result<()> {
        let result = self.client.synchronize();
        self.retained.clear();
        result
    }
}

impl<R: Runtime> Drop for AutoSynchronize<'_, R> {
    fn drop(&mut self) {
        if self.retained.is_empty() {
            return;
        }
        if let Err(e) = self.client.synchronize() {
            log::warn!("{}: synchronize before release failed: {}", R::name(), e);
        }
        self.retained.clear();
    }
}
