pub mod manuscript;
pub mod scene;

pub use manuscript::Manuscript;
pub use scene::Scene;
