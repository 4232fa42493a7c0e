//! DiscBurner - optical disc burning and erasing
//!
//! The library drives recorders through the collaborator traits in
//! [`device`], builds and writes images in [`burning`], and keeps the data
//! model and job taxonomy in [`core`].

pub mod burning;
pub mod core;
pub mod device;
pub mod logging;
