//! Scene description consumed by the renderer.
//!
//! - [`SceneGraph`]: arena of nodes with cached world transforms
//! - [`MeshAsset`] / [`GeoSurface`]: uploaded geometry split into material ranges
//! - [`MaterialInstance`]: pipeline plus material descriptor set
//! - [`RenderObject`] / [`DrawContext`]: the per-frame draw list
//! - [`Bounds`] and [`is_visible`]: box bounds and a clip-space visibility test

pub mod bounds;
pub mod graph;
pub mod material;
pub mod mesh;
pub mod render_object;
pub mod transform;

pub use bounds::Bounds;
pub use graph::{Node, NodeId, NodeKind, SceneGraph};
pub use material::{MaterialConstants, MaterialInstance, MaterialPass, MaterialPipeline};
pub use mesh::{GeoSurface, MeshAsset, MeshBuffers};
pub use render_object::{DrawContext, RenderObject, SceneData, is_visible};
pub use transform::Transform;
