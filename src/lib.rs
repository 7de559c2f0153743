//! A spatial scene database: triangle meshes placed into a 3D/2.5D world as
//! instances, a surface-area-heuristic BVH over those instances, frustum/
//! hull queries, and Plücker-accelerated ray picking.
//!
//! See [`world::World`] for the entry point.

pub mod aabb;
pub mod arena;
pub mod bvh;
pub mod error;
pub mod hull;
pub mod instance;
pub mod mesh;
pub mod ply;
pub mod raycast;
pub mod snapshot;
pub mod world;

pub use aabb::Aabb;
pub use bvh::SceneConfig;
pub use error::{Error, Result};
pub use instance::{Instance, InstanceFlags, InstanceId};
pub use mesh::{Mesh, MeshId, Segment, Triangle, Vertex};
pub use raycast::HitRecord;
pub use world::World;
