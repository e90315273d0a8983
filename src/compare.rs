use std::path::{Path, PathBuf};

use derive_new::new;
use rand::{seq::IteratorRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::{
    dataset::{Dataset, StudyId, StudySet},
    error::{Error, Result},
    images::MetaImages,
    meta::{MetaAnalysis, MetaParams},
    utils::sanitize_label,
};

/// Configuration for a subsampled pairwise comparison.
#[derive(Debug, Clone)]
pub struct CompareConfig {
    /// Number of subsampling rounds to average over.
    pub num_iterations: usize,
    pub seed: u64,
    /// Drop studies matched by both expressions before sampling.
    pub exclude_overlap: bool,
    pub params: MetaParams,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            num_iterations: 500,
            seed: 0,
            exclude_overlap: true,
            params: MetaParams::default(),
        }
    }
}

/// One equal-size draw from both study sets.
#[derive(new)]
struct SubsampleRound {
    round: usize,
    left: Vec<StudyId>,
    right: Vec<StudyId>,
}

/// Averaged meta-analyses of two expressions against each other.
#[derive(Debug, Clone)]
pub struct Comparison {
    pub left: MetaAnalysis,
    pub right: MetaAnalysis,
    pub rounds: usize,
}

impl Comparison {
    /// Write both voxel tables under `outdir`.
    pub fn write_csv(&self, outdir: &Path) -> Result<(PathBuf, PathBuf)> {
        let left = self.left.write_csv(outdir, None)?;
        let right = self.right.write_csv(outdir, None)?;
        Ok((left, right))
    }
}

/// Compare two expressions by repeated equal-size subsampling.
///
/// Each round draws `min(|left|, |right|)` studies from each side with a
/// round-specific ChaCha8 stream and meta-analyzes each sample against
/// the pooled draw; the resulting image stacks are averaged over rounds.
/// Deterministic for a fixed seed.
pub fn compare_expressions(
    dataset: &Dataset,
    left_expr: &str,
    right_expr: &str,
    config: &CompareConfig,
) -> Result<Comparison> {
    if config.num_iterations == 0 {
        return Err(Error::InvalidSetting {
            field: "num_iterations",
            message: "must be greater than 0".to_string(),
        });
    }
    let mut left_set = dataset.get_studies(left_expr)?;
    let mut right_set = dataset.get_studies(right_expr)?;
    if config.exclude_overlap {
        let overlap: StudySet = left_set.intersection(&right_set).copied().collect();
        left_set.retain(|id| !overlap.contains(id));
        right_set.retain(|id| !overlap.contains(id));
    }
    if left_set.is_empty() || right_set.is_empty() {
        return Err(Error::EmptyStudySet);
    }
    let size = left_set.len().min(right_set.len());
    info!(
        left = left_expr,
        right = right_expr,
        size,
        rounds = config.num_iterations,
        "comparing expressions"
    );

    let draws: Vec<SubsampleRound> = (0..config.num_iterations)
        .map(|round| {
            let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(round as u64));
            let left = left_set.iter().copied().choose_multiple(&mut rng, size);
            let right = right_set.iter().copied().choose_multiple(&mut rng, size);
            SubsampleRound::new(round, left, right)
        })
        .collect();

    let stacks: Vec<(MetaImages, MetaImages)> = draws
        .into_par_iter()
        .map(|draw| {
            debug!(round = draw.round, "comparison round");
            let left: StudySet = draw.left.iter().copied().collect();
            let right: StudySet = draw.right.iter().copied().collect();
            let universe: StudySet = left.union(&right).copied().collect();
            let left_meta =
                MetaAnalysis::run(dataset, &left, Some(&universe), "left", &config.params)?;
            let right_meta =
                MetaAnalysis::run(dataset, &right, Some(&universe), "right", &config.params)?;
            Ok((left_meta.images, right_meta.images))
        })
        .collect::<Result<_>>()?;

    let (left_stacks, right_stacks): (Vec<_>, Vec<_>) = stacks.into_iter().unzip();
    let left_mean = MetaImages::mean_of(&left_stacks).ok_or(Error::EmptyStudySet)?;
    let right_mean = MetaImages::mean_of(&right_stacks).ok_or(Error::EmptyStudySet)?;

    let left_label = format!(
        "{}_gt_{}",
        sanitize_label(left_expr),
        sanitize_label(right_expr)
    );
    let right_label = format!(
        "{}_gt_{}",
        sanitize_label(right_expr),
        sanitize_label(left_expr)
    );
    Ok(Comparison {
        left: MetaAnalysis {
            label: left_label,
            num_studies: size,
            images: left_mean,
        },
        right: MetaAnalysis {
            label: right_label,
            num_studies: size,
            images: right_mean,
        },
        rounds: config.num_iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::toy_dataset;

    fn config(seed: u64) -> CompareConfig {
        CompareConfig {
            num_iterations: 10,
            seed,
            ..CompareConfig::default()
        }
    }

    #[test]
    fn test_overlap_is_excluded() {
        let dataset = toy_dataset();
        // "emotion*" spans studies 1-6, "pain" spans 6-10; study 6 overlaps
        let comparison =
            compare_expressions(&dataset, "emotion*", "pain", &config(7)).unwrap();
        // four studies remain on the smaller side after exclusion
        assert_eq!(comparison.left.num_studies, 4);
        assert_eq!(comparison.rounds, 10);
        assert_eq!(comparison.left.label, "emotion_gt_pain");
        assert_eq!(comparison.right.label, "pain_gt_emotion");
    }

    #[test]
    fn test_deterministic_for_fixed_seed() {
        let dataset = toy_dataset();
        let first = compare_expressions(&dataset, "emotion", "pain", &config(42)).unwrap();
        let second = compare_expressions(&dataset, "emotion", "pain", &config(42)).unwrap();
        for name in first.left.images.names() {
            assert_eq!(
                first.left.images.image(name).unwrap(),
                second.left.images.image(name).unwrap()
            );
        }
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let dataset = toy_dataset();
        let config = CompareConfig {
            num_iterations: 0,
            ..CompareConfig::default()
        };
        assert!(matches!(
            compare_expressions(&dataset, "emotion", "pain", &config),
            Err(Error::InvalidSetting { .. })
        ));
    }

    #[test]
    fn test_identical_sides_empty_after_exclusion() {
        let dataset = toy_dataset();
        assert!(matches!(
            compare_expressions(&dataset, "pain", "pain", &config(1)),
            Err(Error::EmptyStudySet)
        ));
    }

    #[test]
    fn test_write_csv_outputs_both_sides() {
        let dataset = toy_dataset();
        let dir = tempfile::tempdir().unwrap();
        let comparison =
            compare_expressions(&dataset, "emotion", "pain", &config(3)).unwrap();
        let (left, right) = comparison.write_csv(dir.path()).unwrap();
        assert!(left.ends_with("emotion_gt_pain_output.csv"));
        assert!(right.ends_with("pain_gt_emotion_output.csv"));
        assert!(left.is_file() && right.is_file());
    }
}
