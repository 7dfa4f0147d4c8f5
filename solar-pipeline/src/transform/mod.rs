//! Per-building annotation stages of the city pipeline.
//!
//! Each stage is a pure function plus a [`Transform`](crate::pipeline::Transform)
//! wrapper that applies it to a [`CityBuilding`](crate::spatial::CityBuilding).

pub mod roof_area;
pub mod solar_potential;

pub use roof_area::{roof_area_sqm, RoofAreaMeasurement};
pub use solar_potential::{
    estimate_solar_potential, plane_of_array, PanelAssumptions, PlaneOfArray, SolarEstimate,
    SolarPotentialAnnotation,
};
