// Copyright 2024 Basalt Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Device buffer capability. GPU memory is owned by the driver's buffer
//! provider; the engine only sees opaque handles with at least 8-byte
//! alignment.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Where a buffer (or a compiled kernel) lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryLevel {
    Cpu,
    Gpu,
}

/// Opaque handle to a device allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceBuffer {
    pub handle: u64,
    pub len: usize,
    pub device_id: i32,
}

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("out of memory allocating {bytes} bytes on device {device_id}")]
    OutOfMemory { bytes: usize, device_id: i32 },

    #[error("unknown buffer handle {0}")]
    UnknownHandle(u64),
}

pub type Result<T, E = BufferError> = std::result::Result<T, E>;

pub trait BufferProvider: Send + Sync {
    fn alloc(&self, bytes: usize, device_id: i32) -> Result<DeviceBuffer>;

    fn free(&self, buf: DeviceBuffer);

    fn copy_to_device(&self, dst: &DeviceBuffer, src: &[u8]) -> Result<()>;

    fn copy_from_device(&self, dst: &mut [u8], src: &DeviceBuffer) -> Result<()>;
}

pub type BufferProviderRef = Arc<dyn BufferProvider>;

/// Releases the held buffer on scope exit unless it has been transferred
/// into a long-lived owner with [`DeviceGuard::into_inner`].
pub struct DeviceGuard<'a> {
    provider: &'a dyn BufferProvider,
    buf: Option<DeviceBuffer>,
}

impl<'a> DeviceGuard<'a> {
    pub fn alloc(provider: &'a dyn BufferProvider, bytes: usize, device_id: i32) -> Result<Self> {
        let buf = provider.alloc(bytes, device_id)?;
        Ok(DeviceGuard {
            provider,
            buf: Some(buf),
        })
    }

    pub fn buffer(&self) -> &DeviceBuffer {
        self.buf.as_ref().expect("guard already consumed")
    }

    /// Transfers ownership out of the guard; the buffer will no longer be
    /// freed on drop.
    pub fn into_inner(mut self) -> DeviceBuffer {
        self.buf.take().expect("guard already consumed")
    }
}

impl Drop for DeviceGuard<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.provider.free(buf);
        }
    }
}

/// Host-memory provider emulating a device, used by tests and by the CPU
/// fallback path.
#[derive(Default)]
pub struct HostBufferProvider {
    inner: Mutex<HostBufferInner>,
}

#[derive(Default)]
struct HostBufferInner {
    buffers: HashMap<u64, Vec<u8>>,
    next_handle: u64,
}

impl HostBufferProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live allocations; used by leak assertions in tests.
    pub fn live_buffers(&self) -> usize {
        self.inner.lock().buffers.len()
    }
}

impl BufferProvider for HostBufferProvider {
    fn alloc(&self, bytes: usize, device_id: i32) -> Result<DeviceBuffer> {
        let mut inner = self.inner.lock();
        inner.next_handle += 1;
        let handle = inner.next_handle;
        inner.buffers.insert(handle, vec![0u8; bytes]);
        Ok(DeviceBuffer {
            handle,
            len: bytes,
            device_id,
        })
    }

    fn free(&self, buf: DeviceBuffer) {
        self.inner.lock().buffers.remove(&buf.handle);
    }

    fn copy_to_device(&self, dst: &DeviceBuffer, src: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        let target = inner
            .buffers
            .get_mut(&dst.handle)
            .ok_or(BufferError::UnknownHandle(dst.handle))?;
        target[..src.len()].copy_from_slice(src);
        Ok(())
    }

    fn copy_from_device(&self, dst: &mut [u8], src: &DeviceBuffer) -> Result<()> {
        let inner = self.inner.lock();
        let source = inner
            .buffers
            .get(&src.handle)
            .ok_or(BufferError::UnknownHandle(src.handle))?;
        dst.copy_from_slice(&source[..dst.len()]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_releases_on_drop() {
        let provider = HostBufferProvider::new();
        {
            let _guard = DeviceGuard::alloc(&provider, 128, 0).unwrap();
            assert_eq!(provider.live_buffers(), 1);
        }
        assert_eq!(provider.live_buffers(), 0);
    }

    #[test]
    fn into_inner_transfers_ownership() {
        let provider = HostBufferProvider::new();
        let buf = {
            let guard = DeviceGuard::alloc(&provider, 128, 0).unwrap();
            guard.into_inner()
        };
        assert_eq!(provider.live_buffers(), 1);
        provider.free(buf);
        assert_eq!(provider.live_buffers(), 0);
    }
}
