//! Testing utilities and mock implementations for pipeline tests.
//!
//! This module provides a mock raster engine and an in-memory layer
//! registry, allowing full pipeline runs without GDAL or SAGA installed.
//!
//! # Example
//!
//! ```rust,ignore
//! use strecha_core::testing::{fixtures, MemoryRegistry, MockRasterEngine};
//!
//! let engine = MockRasterEngine::new();
//! let registry = MemoryRegistry::new();
//!
//! // Configure mock responses
//! engine.set_median(Some(287.25)).await;
//!
//! let runner = PipelineRunner::new(&config, engine.clone())?
//!     .with_registry(Arc::new(registry.clone()));
//! ```

mod memory_registry;
mod mock_engine;

pub use memory_registry::MemoryRegistry;
pub use mock_engine::{MockRasterEngine, Operation, RecordedOperation};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::io;
    use std::path::Path;

    use crate::pipeline::RunInputs;

    /// Band count of the fixture orthophoto (R, G, B, alpha).
    pub const ORTHOPHOTO_BANDS: usize = 4;

    /// Band count of the fixture thermal raster.
    pub const THERMAL_BANDS: usize = 3;

    /// Write a raster the mock engine can read.
    pub async fn write_raster(path: &Path, bands: usize) -> io::Result<()> {
        tokio::fs::write(
            path,
            format!("kind=raster\nbands={}\ntype=Byte\nsource=fixture\n", bands),
        )
        .await
    }

    /// Write a boundary drawing with the given number of closed polylines.
    pub async fn write_boundary(path: &Path, features: u64) -> io::Result<()> {
        tokio::fs::write(
            path,
            format!("kind=vector\nfeatures={}\nsource=fixture\n", features),
        )
        .await
    }

    /// Create all four run inputs in `dir`.
    pub async fn run_inputs(dir: &Path) -> io::Result<RunInputs> {
        let boundary = dir.join("obvod.dxf");
        let dem = dir.join("dem.tif");
        let orthophoto = dir.join("ortofoto.tif");
        let thermal = dir.join("tir.tif");

        write_boundary(&boundary, 1).await?;
        write_raster(&dem, 1).await?;
        write_raster(&orthophoto, ORTHOPHOTO_BANDS).await?;
        write_raster(&thermal, THERMAL_BANDS).await?;

        Ok(RunInputs::new(boundary, dem)
            .with_orthophoto(orthophoto)
            .with_thermal(thermal))
    }
}
