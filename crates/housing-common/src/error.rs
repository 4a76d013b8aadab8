//! Error types shared by the dashboard crates.
//!
//! Each data-layer concern owns its own error enum next to the code that raises it.
//! `CommonError` gathers them so binaries can wrap a single type via `#[from]`.

use crate::ckan::CkanError;
use crate::grid::GridError;
use crate::overpass::OverpassError;
use crate::proximity::ScoreError;

#[derive(Debug, thiserror::Error)]
pub enum CommonError {
    #[error("ckan error: {0}")]
    Ckan(#[from] CkanError),

    #[error("overpass error: {0}")]
    Overpass(#[from] OverpassError),

    #[error("grid error: {0}")]
    Grid(#[from] GridError),

    #[error("scoring error: {0}")]
    Score(#[from] ScoreError),
}
