use std::io::Write;

use crate::{
    error::{Error, Result},
    stats::arithmetic_mean,
};

/// Column store of named voxel-wise images produced by a meta-analysis.
///
/// All columns share the `voxels` row labels (active voxel indices).
#[derive(Debug, Clone)]
pub struct MetaImages {
    voxels: Vec<u32>,
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl MetaImages {
    pub fn new(voxels: Vec<u32>) -> Self {
        Self {
            voxels,
            names: Vec::new(),
            columns: Vec::new(),
        }
    }

    /// Append a column; `values` must be voxel-aligned.
    pub(crate) fn push_image(&mut self, name: impl Into<String>, values: Vec<f64>) {
        debug_assert_eq!(values.len(), self.voxels.len());
        self.names.push(name.into());
        self.columns.push(values);
    }

    pub fn voxels(&self) -> &[u32] {
        &self.voxels
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn image(&self, name: &str) -> Option<&[f64]> {
        self.names
            .iter()
            .position(|candidate| candidate == name)
            .map(|index| self.columns[index].as_slice())
    }

    /// Write the images as CSV, one row per voxel, one column per image.
    ///
    /// `image_names` restricts and orders the columns; `None` writes all.
    pub fn write_csv<W: Write>(&self, writer: W, image_names: Option<&[String]>) -> Result<()> {
        let selected: Vec<usize> = match image_names {
            Some(names) => names
                .iter()
                .map(|name| {
                    self.names
                        .iter()
                        .position(|candidate| candidate == name)
                        .ok_or_else(|| Error::UnknownImage(name.clone()))
                })
                .collect::<Result<_>>()?,
            None => (0..self.names.len()).collect(),
        };

        let mut csv = csv::Writer::from_writer(writer);
        let mut header = vec!["voxel".to_string()];
        header.extend(selected.iter().map(|&index| self.names[index].clone()));
        csv.write_record(&header)?;
        for (row, voxel) in self.voxels.iter().enumerate() {
            let mut record = vec![voxel.to_string()];
            record.extend(selected.iter().map(|&index| self.columns[index][row].to_string()));
            csv.write_record(&record)?;
        }
        csv.flush()?;
        Ok(())
    }

    /// Voxel-wise arithmetic mean across identically shaped stacks.
    pub fn mean_of(stacks: &[MetaImages]) -> Option<MetaImages> {
        let first = stacks.first()?;
        let mut mean = MetaImages::new(first.voxels.clone());
        for (index, name) in first.names.iter().enumerate() {
            let column = (0..first.voxels.len())
                .map(|row| {
                    let samples: Vec<f64> =
                        stacks.iter().map(|stack| stack.columns[index][row]).collect();
                    arithmetic_mean(&samples)
                })
                .collect();
            mean.push_image(name.clone(), column);
        }
        Some(mean)
    }
}
