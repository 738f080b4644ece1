#![warn(missing_docs)]

//! pmesh — GPU-driven adaptive subdivision engine for planetary-scale
//! surfaces.
//!
//! A Catmull-Clark control cage is loaded once, then refined frame to
//! frame by a concurrent binary tree (`pmesh-cbt`) over a bisector
//! graph (`pmesh-bisector`), evaluated into world-space triangle
//! corners through cached longest-edge-bisection matrices
//! (`pmesh-leb`), and orchestrated by [`MeshUpdatePipeline`] against
//! any [`Backend`] implementation — a real GPU device, or the `rayon`-
//! backed [`CpuBackend`] reference used by tests and the `pmesh-cli`
//! host application.
//!
//! # Example
//!
//! ```rust,no_run
//! use pmesh::{load_cage, CbtCapacity, CpuBackend, GlobalUniforms, MeshUpdatePipeline, UpdateUniforms};
//!
//! let cage = load_cage("planet.ccm")?;
//! let backend = CpuBackend::new();
//! let mut pipeline = MeshUpdatePipeline::new(&cage, backend, CbtCapacity::K128, 24)?;
//!
//! let screen_size = (1920, 1080);
//! let global = GlobalUniforms::stationary(screen_size);
//! let update = UpdateUniforms {
//!     view_projection: global.view_projection,
//!     triangle_size_px: 8.0,
//!     max_depth: 24,
//! };
//! let stats = pipeline.run_frame(&global, &update, false)?;
//! println!("active triangles: {}", stats.active_count);
//! # Ok::<(), pmesh::Error>(())
//! ```

use thiserror::Error;

pub use pmesh_bisector::{BisectorRecord, BisectorState, Graph, GraphError};
pub use pmesh_cage::{load_cage, load_cage_bytes, save_cage, Cage, CageCounts, LoadError};
pub use pmesh_cbt::{Cbt, CbtCapacity, CbtError};
pub use pmesh_gpu::{Backend, BackendError, CommandList, CpuBackend, Fence, Kernel};
pub use pmesh_leb::{Evaluator, LebMatrixCache};
pub use pmesh_pipeline::{
    root_base_triangles, split_heap_id, FrameStats, GeometryUniforms, GlobalUniforms,
    MeshUpdatePipeline, PipelineError, UpdateUniforms, VertexRecord,
};

/// Aggregated error type spanning every fallible boundary re-exported
/// above, for callers that want a single `Result` alias rather than
/// matching on each crate's own error enum.
#[derive(Debug, Error)]
pub enum Error {
    /// Cage loading or saving failed.
    #[error(transparent)]
    Cage(#[from] LoadError),
    /// The CBT was constructed with an invalid capacity.
    #[error(transparent)]
    Cbt(#[from] CbtError),
    /// The bisector graph failed construction or an invariant check.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// The backend or pipeline failed mid-frame.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}
