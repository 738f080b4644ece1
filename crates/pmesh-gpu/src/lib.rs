#![warn(missing_docs)]

//! The named interface `pmesh-pipeline` dispatches against (SPEC_FULL.md
//! §6.2), and a `cpu`-feature reference implementation of it.
//!
//! The actual GPU resource layer — device/queue setup, shader
//! compilation, descriptor binding — is out of scope for this crate;
//! a real backend is a separate, external collaborator that satisfies
//! [`Backend`]/[`CommandList`]/[`Fence`]. `pmesh-pipeline` is generic
//! over `B: Backend` and never references a concrete backend.

use std::fmt;

use thiserror::Error;

/// Failure modes any backend implementation can surface. Per
/// SPEC_FULL.md §7, a `BackendError` is fatal: the core does not
/// recover from one, it bubbles to the host.
#[derive(Debug, Error)]
pub enum BackendError {
    /// A handle (buffer, texture, command list, fence) was not
    /// recognized by this backend instance.
    #[error("unknown {kind} handle {id}")]
    UnknownHandle {
        /// The kind of resource the handle names.
        kind: &'static str,
        /// The offending handle's raw id.
        id: u32,
    },

    /// A read/write range fell outside the addressed buffer.
    #[error("range [{offset}, {offset}+{len}) is out of bounds for a buffer of size {size}")]
    OutOfBounds {
        /// Requested byte offset.
        offset: u64,
        /// Requested byte length.
        len: u64,
        /// The buffer's actual size in bytes.
        size: u64,
    },

    /// A real GPU API call failed; carries a human-readable message
    /// since backends are not required to share an error type.
    #[error("backend error: {0}")]
    Device(String),
}

/// What a buffer is used for; determines memory placement on a real
/// backend (upload/readback staging vs. device-local default).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Device-local, read/write from compute kernels only.
    Default,
    /// CPU-writable staging buffer, copied into a `Default` buffer.
    Upload,
    /// CPU-readable staging buffer, copied from a `Default` buffer.
    Readback,
    /// Ray-tracing acceleration structure storage.
    Rtas,
}

/// Opaque handle to a backend-owned buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Buffer(pub u32);

/// Opaque handle to a backend-owned texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Texture(pub u32);

/// Opaque handle to a backend-owned command list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandListHandle(pub u32);

/// A compute kernel or graphics pipeline identifier. The concrete
/// mapping from id to shader/pipeline object is a backend concern;
/// `pmesh-pipeline` only ever dispatches by a stable numeric id per
/// pass (reset, classify, split, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Kernel(pub u32);

/// Texture creation parameters. Unused by the CPU reference backend
/// beyond bookkeeping; a real backend maps this to its native
/// resource descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
}

impl fmt::Display for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

/// The resource and submission surface the mesh update pipeline
/// requires from a backend (SPEC_FULL.md §6.2).
pub trait Backend {
    /// Concrete command list type returned by [`Backend::create_command_list`].
    type CommandList: CommandList;
    /// Concrete fence type returned by [`Backend::create_fence`].
    type Fence: Fence;

    /// Allocate a buffer of `length` elements of `element_size` bytes.
    fn create_buffer(
        &self,
        kind: BufferKind,
        element_size: usize,
        length: usize,
    ) -> Result<Buffer, BackendError>;

    /// Release a buffer. Using the handle afterwards is a logic error.
    fn destroy_buffer(&self, buffer: Buffer) -> Result<(), BackendError>;

    /// Write `bytes` into an `Upload` buffer at `offset`.
    fn write_upload_range(&self, buffer: Buffer, offset: u64, bytes: &[u8]) -> Result<(), BackendError>;

    /// Read back the full contents of a `Readback` buffer.
    fn read_readback(&self, buffer: Buffer) -> Result<Vec<u8>, BackendError>;

    /// Allocate a texture.
    fn create_texture(&self, desc: TextureDesc) -> Result<Texture, BackendError>;

    /// Release a texture.
    fn destroy_texture(&self, texture: Texture) -> Result<(), BackendError>;

    /// Open a new command list for recording.
    fn create_command_list(&self) -> Result<Self::CommandList, BackendError>;

    /// Create a fence, initially signaled at value `0`.
    fn create_fence(&self) -> Result<Self::Fence, BackendError>;

    /// Convenience over [`Backend::write_upload_range`]: reinterpret a
    /// typed slice as bytes before uploading it, the way every
    /// producer of CBT words, heap ids, or uniform blocks wants to.
    fn write_upload<T: bytemuck::Pod>(
        &self,
        buffer: Buffer,
        offset: u64,
        items: &[T],
    ) -> Result<(), BackendError> {
        self.write_upload_range(buffer, offset, bytemuck::cast_slice(items))
    }
}

/// A recorded sequence of GPU operations (SPEC_FULL.md §6.2).
pub trait CommandList {
    /// Begin recording, discarding any prior contents.
    fn reset(&mut self) -> Result<(), BackendError>;

    /// End recording; no further ops may be appended until the next
    /// [`CommandList::reset`].
    fn close(&mut self) -> Result<(), BackendError>;

    /// Copy the entirety of `src` into `dst`.
    fn copy_buffer(&mut self, src: Buffer, dst: Buffer) -> Result<(), BackendError>;

    /// Copy `n` bytes from `src` at `src_offset` to `dst` at `dst_offset`.
    fn copy_range(
        &mut self,
        src: Buffer,
        src_offset: u64,
        dst: Buffer,
        dst_offset: u64,
        n: u64,
    ) -> Result<(), BackendError>;

    /// Insert a UAV barrier: all prior writes to `buffer` in this
    /// command list must complete before any subsequent reads.
    fn uav_barrier(&mut self, buffer: Buffer) -> Result<(), BackendError>;

    /// Zero-fill a buffer.
    fn clear(&mut self, buffer: Buffer) -> Result<(), BackendError>;

    /// Dispatch `kernel` over an explicit `(gx, gy, gz)` group count.
    fn dispatch(&mut self, kernel: Kernel, gx: u32, gy: u32, gz: u32) -> Result<(), BackendError>;

    /// Dispatch `kernel` with its group count read from `buf` at `offset`.
    fn dispatch_indirect(&mut self, kernel: Kernel, buf: Buffer, offset: u64) -> Result<(), BackendError>;

    /// Issue a procedural (vertex-shader-generated) draw with its
    /// vertex/instance count read from `buf` at `offset`.
    fn draw_procedural_indirect(&mut self, pipeline: Kernel, buf: Buffer, offset: u64) -> Result<(), BackendError>;
}

/// A GPU/host synchronization point (SPEC_FULL.md §6.2).
pub trait Fence {
    /// Record that the submission in flight should set this fence to `v`
    /// once complete.
    fn signal(&self, v: u64) -> Result<(), BackendError>;

    /// Block until the fence reaches at least `v`.
    fn wait_completed(&self, v: u64) -> Result<(), BackendError>;

    /// The fence's last-completed value.
    fn value(&self) -> u64;
}

#[cfg(feature = "cpu")]
pub mod cpu;

#[cfg(feature = "cpu")]
pub use cpu::{CpuBackend, CpuCommandList, CpuFence};
