//! Finite element problem definition and orchestration for frame and shell
//! structures: build a model, mesh shell parts with gmsh, run static steps,
//! and store the results.

pub mod error;
pub mod input;
pub mod mesher;
pub mod model;
pub mod problem;
pub mod results;
pub mod solver;
pub mod units;
pub mod viewer;

pub use error::SideriteError;
