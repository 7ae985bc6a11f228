use anyhow::{bail, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use crate::{lattice::{Grid, LatticeCell, D2Q9}, Float};

/// Writes lattice snapshots as legacy VTK structured grids.
pub struct VTKWriter {
    grid: Grid,
    collection_entries: Vec<(u64, f64, String)>, // (frame, time, filename)
}

impl VTKWriter {
    pub fn new(grid: Grid) -> Self {
        Self {
            grid,
            collection_entries: Vec::new(),
        }
    }

    pub fn write(&mut self, filename: &str, lattice: &[LatticeCell], frame: u64, time: Float) -> Result<()> {
        let nx = self.grid.width as usize;
        let ny = self.grid.height as usize;
        if lattice.len() != nx * ny {
            bail!("lattice has {} cells, grid expects {}", lattice.len(), nx * ny);
        }

        let mut file = BufWriter::new(File::create(filename)?);

        // Track this file for the collection
        self.collection_entries.push((frame, time as f64, filename.to_string()));

        // Write VTK header for structured grid
        writeln!(file, "# vtk DataFile Version 3.0")?;
        writeln!(file, "LBM Solution - Frame {} Time {:.3}", frame, time)?;
        writeln!(file, "ASCII")?;
        writeln!(file, "DATASET STRUCTURED_GRID")?;
        writeln!(file, "DIMENSIONS {} {} 1", nx, ny)?;

        // Write points
        writeln!(file, "POINTS {} float", nx * ny)?;
        for j in 0..ny {
            for i in 0..nx {
                writeln!(file, "{} {} 0", i, j)?;
            }
        }

        // Write point data
        writeln!(file, "POINT_DATA {}", nx * ny)?;

        // Density
        writeln!(file, "SCALARS Density float")?;
        writeln!(file, "LOOKUP_TABLE default")?;
        for cell in lattice {
            writeln!(file, "{:.6}", cell.rho)?;
        }

        // Velocity
        writeln!(file, "VECTORS Velocity float")?;
        for cell in lattice {
            writeln!(file, "{:.6} {:.6} 0.0", cell.velocity[0], cell.velocity[1])?;
        }

        // Velocity magnitude
        writeln!(file, "SCALARS VelocityMagnitude float")?;
        writeln!(file, "LOOKUP_TABLE default")?;
        for cell in lattice {
            let vel_mag = (cell.velocity[0].powi(2) + cell.velocity[1].powi(2)).sqrt();
            writeln!(file, "{:.6}", vel_mag)?;
        }

        // Pressure (from density)
        writeln!(file, "SCALARS Pressure float")?;
        writeln!(file, "LOOKUP_TABLE default")?;
        for cell in lattice {
            writeln!(file, "{:.6}", (cell.rho - 1.0) * D2Q9::CS2)?;
        }

        // Vorticity
        writeln!(file, "SCALARS Vorticity float")?;
        writeln!(file, "LOOKUP_TABLE default")?;
        for value in vorticity(self.grid, lattice) {
            writeln!(file, "{:.6}", value)?;
        }

        file.flush()?;
        Ok(())
    }

    /// Write a ParaView collection file that groups all VTK files with time information
    pub fn write_collection(&self, collection_filename: &str) -> Result<()> {
        let mut file = BufWriter::new(File::create(collection_filename)?);

        writeln!(file, "<?xml version=\"1.0\"?>")?;
        writeln!(file, "<VTKFile type=\"Collection\" version=\"0.1\">")?;
        writeln!(file, "  <Collection>")?;

        for (_frame, time, filename) in &self.collection_entries {
            // Extract just the filename (not the full path) for the collection
            let basename = std::path::Path::new(filename)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(filename);
            writeln!(file, "    <DataSet timestep=\"{:.6}\" part=\"0\" file=\"{}\"/>",
                     time, basename)?;
        }

        writeln!(file, "  </Collection>")?;
        writeln!(file, "</VTKFile>")?;

        file.flush()?;
        Ok(())
    }

    /// Get the number of files written so far
    pub fn get_file_count(&self) -> usize {
        self.collection_entries.len()
    }
}

/// z-component of the curl, central differences with periodic wrap.
pub fn vorticity(grid: Grid, lattice: &[LatticeCell]) -> Vec<Float> {
    let nx = grid.width;
    let ny = grid.height;
    let mut vorticity = vec![0.0; lattice.len()];

    for j in 0..ny {
        for i in 0..nx {
            let xp = lattice[grid.index((i + 1) % nx, j)].velocity;
            let xm = lattice[grid.index((i + nx - 1) % nx, j)].velocity;
            let yp = lattice[grid.index(i, (j + 1) % ny)].velocity;
            let ym = lattice[grid.index(i, (j + ny - 1) % ny)].velocity;

            // dv/dx - du/dy
            let dvdx = (xp[1] - xm[1]) / 2.0;
            let dudy = (yp[0] - ym[0]) / 2.0;
            vorticity[grid.index(i, j)] = dvdx - dudy;
        }
    }

    vorticity
}
