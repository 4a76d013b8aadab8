pub mod ckan;
pub mod error;
pub mod grid;
mod http;
pub mod model;
pub mod normalize;
pub mod overpass;
pub mod proximity;
pub mod stats;
