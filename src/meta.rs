use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use flate2::{write::GzEncoder, Compression};
use tracing::info;

use crate::{
    correction::Correction,
    dataset::{Dataset, StudySet},
    error::{Error, Result},
    images::MetaImages,
    stats,
};

/// Statistical knobs for a meta-analysis run.
#[derive(Debug, Clone)]
pub struct MetaParams {
    /// Uniform prior on term presence, used for the posterior map and as
    /// the null rate of the uniformity test.
    pub prior: f64,
    /// Threshold applied to corrected p-values.
    pub fdr: f64,
    pub correction: Correction,
}

impl Default for MetaParams {
    fn default() -> Self {
        Self {
            prior: 0.5,
            fdr: 0.01,
            correction: Correction::Fdr,
        }
    }
}

/// Voxel-wise meta-analysis of a study selection against the rest of the
/// study universe.
#[derive(Debug, Clone)]
pub struct MetaAnalysis {
    pub label: String,
    pub num_studies: usize,
    pub images: MetaImages,
}

impl MetaAnalysis {
    /// Run the analysis of `selection` within `universe` (the whole
    /// dataset when `None`).
    ///
    /// Produces probability maps (`pA`, `pAgF`, `pFgA`), z-maps for the
    /// uniformity test (selection rate against the prior) and the
    /// association test (selection vs. non-selection rates), and
    /// FDR-thresholded copies of both z-maps.
    pub fn run(
        dataset: &Dataset,
        selection: &StudySet,
        universe: Option<&StudySet>,
        label: &str,
        params: &MetaParams,
    ) -> Result<Self> {
        let all_ids = dataset.study_ids();
        let universe: StudySet = match universe {
            Some(ids) => ids.intersection(&all_ids).copied().collect(),
            None => all_ids,
        };
        let selected: StudySet = selection.intersection(&universe).copied().collect();
        let n1 = selected.len();
        if n1 == 0 {
            return Err(Error::EmptyStudySet);
        }
        let n0 = universe.len() - n1;

        let active = dataset.images().active_voxels();
        let mut dense = vec![usize::MAX; dataset.images().voxel_count()];
        for (index, &voxel) in active.iter().enumerate() {
            dense[voxel as usize] = index;
        }

        // activation counts inside and outside the selection
        let mut x1 = vec![0usize; active.len()];
        let mut x0 = vec![0usize; active.len()];
        for row in dataset.images().rows() {
            let counts = if selected.contains(&row.study) {
                &mut x1
            } else if universe.contains(&row.study) {
                &mut x0
            } else {
                continue;
            };
            for &voxel in &row.voxels {
                let index = dense[voxel as usize];
                if index != usize::MAX {
                    counts[index] += 1;
                }
            }
        }

        let n = (n1 + n0) as f64;
        let mut p_a = Vec::with_capacity(active.len());
        let mut p_a_g_f = Vec::with_capacity(active.len());
        let mut p_f_g_a = Vec::with_capacity(active.len());
        let mut uniformity_z = Vec::with_capacity(active.len());
        let mut association_z = Vec::with_capacity(active.len());
        let mut uniformity_p = Vec::with_capacity(active.len());
        let mut association_p = Vec::with_capacity(active.len());
        for voxel in 0..active.len() {
            let (a1, a0) = (x1[voxel], x0[voxel]);
            if a1 + a0 == 0 {
                // voxel never reported active anywhere in the universe
                p_a.push(0.0);
                p_a_g_f.push(0.0);
                p_f_g_a.push(0.0);
                uniformity_z.push(0.0);
                association_z.push(0.0);
                uniformity_p.push(1.0);
                association_p.push(1.0);
                continue;
            }
            let rate_selected = a1 as f64 / n1 as f64;
            let rate_other = if n0 > 0 { a0 as f64 / n0 as f64 } else { 0.0 };
            p_a.push((a1 + a0) as f64 / n);
            p_a_g_f.push(rate_selected);
            let denominator =
                rate_selected * params.prior + rate_other * (1.0 - params.prior);
            p_f_g_a.push(if denominator > 0.0 {
                rate_selected * params.prior / denominator
            } else {
                0.0
            });
            let uz = stats::one_proportion_z(a1, n1, params.prior);
            let az = stats::two_proportion_z(a1, n1, a0, n0);
            uniformity_p.push(stats::two_tailed_p(uz));
            association_p.push(stats::two_tailed_p(az));
            uniformity_z.push(uz);
            association_z.push(az);
        }

        let uniformity_mask = params.correction.significant(&uniformity_p, params.fdr);
        let association_mask = params.correction.significant(&association_p, params.fdr);
        let threshold = |z: &[f64], mask: &[bool]| -> Vec<f64> {
            z.iter()
                .zip(mask)
                .map(|(value, keep)| if *keep { *value } else { 0.0 })
                .collect()
        };
        let uniformity_thresholded = threshold(&uniformity_z, &uniformity_mask);
        let association_thresholded = threshold(&association_z, &association_mask);

        let mut images = MetaImages::new(active);
        images.push_image("pA", p_a);
        images.push_image("pAgF", p_a_g_f);
        images.push_image("pFgA", p_f_g_a);
        images.push_image("pAgF_z", uniformity_z);
        images.push_image("pFgA_z", association_z);
        images.push_image(format!("pAgF_z_FDR_{}", params.fdr), uniformity_thresholded);
        images.push_image(format!("pFgA_z_FDR_{}", params.fdr), association_thresholded);

        info!(label, num_studies = n1, "meta-analysis complete");
        Ok(Self {
            label: label.to_string(),
            num_studies: n1,
            images,
        })
    }

    pub fn csv_filename(&self) -> String {
        format!("{}_output.csv", self.label)
    }

    /// Write the voxel table as `{label}_output.csv` under `outdir`.
    pub fn write_csv(&self, outdir: &Path, image_names: Option<&[String]>) -> Result<PathBuf> {
        fs::create_dir_all(outdir)?;
        let path = outdir.join(self.csv_filename());
        let writer = BufWriter::new(File::create(&path)?);
        self.images.write_csv(writer, image_names)?;
        info!(path = %path.display(), "voxel table written");
        Ok(path)
    }

    /// Write each image as a gzipped CSV `{label}_{image}.csv.gz`.
    pub fn save_images(&self, outdir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(outdir)?;
        let mut paths = Vec::new();
        for name in self.images.names().to_vec() {
            let path = outdir.join(format!("{}_{}.csv.gz", self.label, name));
            let file = BufWriter::new(File::create(&path)?);
            let mut writer = GzEncoder::new(file, Compression::default());
            self.images
                .write_csv(&mut writer, Some(std::slice::from_ref(&name)))?;
            writer.finish()?.flush()?;
            paths.push(path);
        }
        info!(label = self.label.as_str(), images = paths.len(), "images saved");
        Ok(paths)
    }
}
