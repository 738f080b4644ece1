//! CPU reference implementation of the [`crate::Backend`] contract:
//! plain `Vec<u8>` buffers, immediate (non-deferred) command
//! execution, and a fence that is always already caught up. Enough to
//! drive `pmesh-pipeline` and exercise its tests without a graphics
//! device.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::{Backend, BackendError, Buffer, BufferKind, CommandList, Fence, Kernel, Texture, TextureDesc};

struct BufferSlot {
    kind: BufferKind,
    data: Vec<u8>,
}

#[derive(Default)]
struct Inner {
    buffers: Mutex<Vec<Option<BufferSlot>>>,
    textures: Mutex<Vec<Option<TextureDesc>>>,
    dispatch_count: AtomicU64,
    draw_count: AtomicU64,
}

/// A single-process reference [`crate::Backend`]. Buffers are plain
/// byte vectors guarded by a mutex; command lists execute each op the
/// moment it is recorded rather than deferring to a `close`/submit
/// step, since there is no device queue to batch work for.
#[derive(Clone, Default)]
pub struct CpuBackend {
    inner: Arc<Inner>,
}

impl CpuBackend {
    /// A fresh backend with no allocated resources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total dispatches (direct + indirect) issued by any command list
    /// this backend has executed. Exposed for pipeline tests that
    /// assert on pass counts rather than buffer contents.
    pub fn dispatch_count(&self) -> u64 {
        self.inner.dispatch_count.load(Ordering::Relaxed)
    }

    /// Total procedural draws issued.
    pub fn draw_count(&self) -> u64 {
        self.inner.draw_count.load(Ordering::Relaxed)
    }
}

impl Backend for CpuBackend {
    type CommandList = CpuCommandList;
    type Fence = CpuFence;

    fn create_buffer(
        &self,
        kind: BufferKind,
        element_size: usize,
        length: usize,
    ) -> Result<Buffer, BackendError> {
        let mut buffers = self.inner.buffers.lock().unwrap();
        let id = buffers.len() as u32;
        buffers.push(Some(BufferSlot {
            kind,
            data: vec![0u8; element_size * length],
        }));
        Ok(Buffer(id))
    }

    fn destroy_buffer(&self, buffer: Buffer) -> Result<(), BackendError> {
        let mut buffers = self.inner.buffers.lock().unwrap();
        let slot = buffers
            .get_mut(buffer.0 as usize)
            .ok_or(unknown("buffer", buffer.0))?;
        *slot = None;
        Ok(())
    }

    fn write_upload_range(&self, buffer: Buffer, offset: u64, bytes: &[u8]) -> Result<(), BackendError> {
        let mut buffers = self.inner.buffers.lock().unwrap();
        let slot = buffers
            .get_mut(buffer.0 as usize)
            .and_then(|s| s.as_mut())
            .ok_or(unknown("buffer", buffer.0))?;
        if slot.kind != BufferKind::Upload {
            return Err(BackendError::Device(format!(
                "{} is not an Upload buffer",
                buffer
            )));
        }
        let offset = offset as usize;
        let end = offset + bytes.len();
        if end > slot.data.len() {
            return Err(BackendError::OutOfBounds {
                offset: offset as u64,
                len: bytes.len() as u64,
                size: slot.data.len() as u64,
            });
        }
        slot.data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    fn read_readback(&self, buffer: Buffer) -> Result<Vec<u8>, BackendError> {
        let buffers = self.inner.buffers.lock().unwrap();
        let slot = buffers
            .get(buffer.0 as usize)
            .and_then(|s| s.as_ref())
            .ok_or(unknown("buffer", buffer.0))?;
        if slot.kind != BufferKind::Readback {
            return Err(BackendError::Device(format!(
                "{} is not a Readback buffer",
                buffer
            )));
        }
        Ok(slot.data.clone())
    }

    fn create_texture(&self, desc: TextureDesc) -> Result<Texture, BackendError> {
        let mut textures = self.inner.textures.lock().unwrap();
        let id = textures.len() as u32;
        textures.push(Some(desc));
        Ok(Texture(id))
    }

    fn destroy_texture(&self, texture: Texture) -> Result<(), BackendError> {
        let mut textures = self.inner.textures.lock().unwrap();
        let slot = textures
            .get_mut(texture.0 as usize)
            .ok_or(unknown("texture", texture.0))?;
        *slot = None;
        Ok(())
    }

    fn create_command_list(&self) -> Result<Self::CommandList, BackendError> {
        Ok(CpuCommandList {
            inner: self.inner.clone(),
            recording: false,
        })
    }

    fn create_fence(&self) -> Result<Self::Fence, BackendError> {
        Ok(CpuFence {
            value: Arc::new(AtomicU64::new(0)),
        })
    }
}

fn unknown(kind: &'static str, id: u32) -> BackendError {
    BackendError::UnknownHandle { kind, id }
}

/// The CPU reference [`crate::CommandList`]: executes each recorded op
/// immediately against the backend's shared buffer store.
pub struct CpuCommandList {
    inner: Arc<Inner>,
    recording: bool,
}

impl CpuCommandList {
    fn require_recording(&self) -> Result<(), BackendError> {
        if self.recording {
            Ok(())
        } else {
            Err(BackendError::Device(
                "command list is not between reset() and close()".into(),
            ))
        }
    }

    fn with_buffer<R>(
        &self,
        handle: Buffer,
        f: impl FnOnce(&mut BufferSlot) -> Result<R, BackendError>,
    ) -> Result<R, BackendError> {
        let mut buffers = self.inner.buffers.lock().unwrap();
        let slot = buffers
            .get_mut(handle.0 as usize)
            .and_then(|s| s.as_mut())
            .ok_or(unknown("buffer", handle.0))?;
        f(slot)
    }
}

impl CommandList for CpuCommandList {
    fn reset(&mut self) -> Result<(), BackendError> {
        self.recording = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), BackendError> {
        self.require_recording()?;
        self.recording = false;
        Ok(())
    }

    fn copy_buffer(&mut self, src: Buffer, dst: Buffer) -> Result<(), BackendError> {
        self.require_recording()?;
        let data = self.with_buffer(src, |s| Ok(s.data.clone()))?;
        self.with_buffer(dst, |s| {
            if s.data.len() != data.len() {
                return Err(BackendError::OutOfBounds {
                    offset: 0,
                    len: data.len() as u64,
                    size: s.data.len() as u64,
                });
            }
            s.data.copy_from_slice(&data);
            Ok(())
        })
    }

    fn copy_range(
        &mut self,
        src: Buffer,
        src_offset: u64,
        dst: Buffer,
        dst_offset: u64,
        n: u64,
    ) -> Result<(), BackendError> {
        self.require_recording()?;
        let (so, len) = (src_offset as usize, n as usize);
        let chunk = self.with_buffer(src, |s| {
            let end = so + len;
            if end > s.data.len() {
                return Err(BackendError::OutOfBounds {
                    offset: src_offset,
                    len: n,
                    size: s.data.len() as u64,
                });
            }
            Ok(s.data[so..end].to_vec())
        })?;
        let dof = dst_offset as usize;
        self.with_buffer(dst, |s| {
            let end = dof + chunk.len();
            if end > s.data.len() {
                return Err(BackendError::OutOfBounds {
                    offset: dst_offset,
                    len: chunk.len() as u64,
                    size: s.data.len() as u64,
                });
            }
            s.data[dof..end].copy_from_slice(&chunk);
            Ok(())
        })
    }

    fn uav_barrier(&mut self, _buffer: Buffer) -> Result<(), BackendError> {
        // Single-threaded and immediate: every write is already
        // visible to the next op, so this only enforces recording state.
        self.require_recording()
    }

    fn clear(&mut self, buffer: Buffer) -> Result<(), BackendError> {
        self.require_recording()?;
        self.with_buffer(buffer, |s| {
            s.data.iter_mut().for_each(|b| *b = 0);
            Ok(())
        })
    }

    fn dispatch(&mut self, _kernel: Kernel, _gx: u32, _gy: u32, _gz: u32) -> Result<(), BackendError> {
        self.require_recording()?;
        self.inner.dispatch_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn dispatch_indirect(&mut self, _kernel: Kernel, buf: Buffer, offset: u64) -> Result<(), BackendError> {
        self.require_recording()?;
        self.with_buffer(buf, |s| bounds_check(s, offset, 4))?;
        self.inner.dispatch_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn draw_procedural_indirect(
        &mut self,
        _pipeline: Kernel,
        buf: Buffer,
        offset: u64,
    ) -> Result<(), BackendError> {
        self.require_recording()?;
        self.with_buffer(buf, |s| bounds_check(s, offset, 4))?;
        self.inner.draw_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn bounds_check(slot: &BufferSlot, offset: u64, len: u64) -> Result<(), BackendError> {
    let end = offset + len;
    if end > slot.data.len() as u64 {
        return Err(BackendError::OutOfBounds {
            offset,
            len,
            size: slot.data.len() as u64,
        });
    }
    Ok(())
}

/// The CPU reference [`crate::Fence`]: signalling is synchronous, so
/// `wait_completed` only needs to compare against the last stored value.
pub struct CpuFence {
    value: Arc<AtomicU64>,
}

impl Fence for CpuFence {
    fn signal(&self, v: u64) -> Result<(), BackendError> {
        self.value.store(v, Ordering::Release);
        Ok(())
    }

    fn wait_completed(&self, v: u64) -> Result<(), BackendError> {
        if self.value.load(Ordering::Acquire) >= v {
            Ok(())
        } else {
            Err(BackendError::Device(format!("fence never reached {v}")))
        }
    }

    fn value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_then_readback_round_trips_bytes() {
        let backend = CpuBackend::new();
        let up = backend.create_buffer(BufferKind::Upload, 1, 4).unwrap();
        backend.write_upload_range(up, 0, &[1, 2, 3, 4]).unwrap();

        let back = backend.create_buffer(BufferKind::Readback, 1, 4).unwrap();
        let mut cmds = backend.create_command_list().unwrap();
        cmds.reset().unwrap();
        cmds.copy_buffer(up, back).unwrap();
        cmds.close().unwrap();

        assert_eq!(backend.read_readback(back).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn write_upload_accepts_a_typed_slice() {
        let backend = CpuBackend::new();
        let up = backend.create_buffer(BufferKind::Upload, 4, 3).unwrap();
        backend.write_upload(up, 0, &[1u32, 2, 3]).unwrap();
    }

    #[test]
    fn write_upload_range_rejects_non_upload_buffer() {
        let backend = CpuBackend::new();
        let default_buf = backend.create_buffer(BufferKind::Default, 1, 4).unwrap();
        assert!(backend.write_upload_range(default_buf, 0, &[0]).is_err());
    }

    #[test]
    fn ops_before_reset_are_rejected() {
        let backend = CpuBackend::new();
        let buf = backend.create_buffer(BufferKind::Default, 1, 4).unwrap();
        let mut cmds = backend.create_command_list().unwrap();
        assert!(cmds.clear(buf).is_err());
    }

    #[test]
    fn dispatch_and_draw_counts_accumulate() {
        let backend = CpuBackend::new();
        let args = backend.create_buffer(BufferKind::Default, 4, 4).unwrap();
        let mut cmds = backend.create_command_list().unwrap();
        cmds.reset().unwrap();
        cmds.dispatch(Kernel(0), 1, 1, 1).unwrap();
        cmds.dispatch_indirect(Kernel(1), args, 0).unwrap();
        cmds.draw_procedural_indirect(Kernel(2), args, 0).unwrap();
        cmds.close().unwrap();

        assert_eq!(backend.dispatch_count(), 2);
        assert_eq!(backend.draw_count(), 1);
    }

    #[test]
    fn fence_wait_fails_until_signaled() {
        let backend = CpuBackend::new();
        let fence = backend.create_fence().unwrap();
        assert!(fence.wait_completed(1).is_err());
        fence.signal(1).unwrap();
        fence.wait_completed(1).unwrap();
        assert_eq!(fence.value(), 1);
    }
}
