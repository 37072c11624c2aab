pub mod coordinate_mapper;
pub mod geometry_utils;
pub mod pipeline;
pub mod router;
pub mod sensor;
pub mod settings;
pub mod systems;
pub mod tuio;

pub type Point2D = (f64, f64);
