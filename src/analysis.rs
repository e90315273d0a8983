use std::path::PathBuf;

use bon::Builder;
use itertools::Itertools;
use rayon::prelude::*;
use tracing::info;

use crate::{
    correction::Correction,
    dataset::{Dataset, StudyId, StudySet},
    error::{Error, Result},
    meta::{MetaAnalysis, MetaParams},
    utils::sanitize_label,
};

/// What to analyze and where the outputs go.
///
/// Either `expression` or `study_ids` has to be given; when both are,
/// the resolved studies are combined and analyzed together.
#[derive(Debug, Clone, Builder)]
pub struct AnalysisOptions {
    #[builder(into)]
    pub expression: Option<String>,
    #[builder(default)]
    pub study_ids: Vec<StudyId>,
    #[builder(default = 0.5)]
    pub prior: f64,
    #[builder(default = 0.01)]
    pub fdr: f64,
    #[builder(default)]
    pub correction: Correction,
    /// Images to include in the CSV; all of them when `None`.
    pub image_names: Option<Vec<String>>,
    #[builder(default = true)]
    pub save_csv: bool,
    #[builder(default = false)]
    pub save_images: bool,
    #[builder(default = PathBuf::from("."))]
    pub output_dir: PathBuf,
}

impl AnalysisOptions {
    fn params(&self) -> MetaParams {
        MetaParams {
            prior: self.prior,
            fdr: self.fdr,
            correction: self.correction,
        }
    }
}

/// Meta-analyze a single expression and/or explicit study list, writing
/// the requested output files.
pub fn analyze_expression(dataset: &Dataset, options: &AnalysisOptions) -> Result<MetaAnalysis> {
    let expression = options.expression.as_deref().unwrap_or("").trim();
    if expression.is_empty() && options.study_ids.is_empty() {
        return Err(Error::NothingToAnalyze);
    }

    let mut studies = if expression.is_empty() {
        StudySet::new()
    } else {
        dataset.get_studies(expression)?
    };
    studies.extend(options.study_ids.iter().copied());
    if studies.is_empty() {
        return Err(Error::EmptyStudySet);
    }

    let label = if expression.is_empty() {
        "study_ids".to_string()
    } else {
        sanitize_label(expression)
    };
    info!(expression, studies = studies.len(), "analyzing expression");
    let meta = MetaAnalysis::run(dataset, &studies, None, &label, &options.params())?;
    if options.save_csv {
        meta.write_csv(&options.output_dir, options.image_names.as_deref())?;
    }
    if options.save_images {
        meta.save_images(&options.output_dir)?;
    }
    Ok(meta)
}

/// Meta-analyze every vocabulary term (skipping digit-leading ones) plus
/// any extra expressions, in parallel, with no file output.
pub fn analyze_all_terms(
    dataset: &Dataset,
    extra_exprs: &[String],
    params: &MetaParams,
) -> Result<Vec<MetaAnalysis>> {
    let expressions: Vec<String> = dataset
        .feature_names()
        .into_iter()
        .filter(|term| !term.starts_with(|ch: char| ch.is_ascii_digit()))
        .chain(extra_exprs.iter().cloned())
        .unique()
        .collect();
    info!(expressions = expressions.len(), "analyzing all terms");
    expressions
        .par_iter()
        .map(|expression| {
            let studies = dataset.get_studies(expression)?;
            MetaAnalysis::run(dataset, &studies, None, &sanitize_label(expression), params)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::toy_dataset;

    #[test]
    fn test_nothing_specified_is_an_error() {
        let dataset = toy_dataset();
        let options = AnalysisOptions::builder().save_csv(false).build();
        assert!(matches!(
            analyze_expression(&dataset, &options),
            Err(Error::NothingToAnalyze)
        ));
    }

    #[test]
    fn test_expression_and_ids_are_combined() {
        let dataset = toy_dataset();
        let options = AnalysisOptions::builder()
            .expression("emotion")
            .study_ids(vec![7])
            .save_csv(false)
            .build();
        let meta = analyze_expression(&dataset, &options).unwrap();
        assert_eq!(meta.num_studies, 6);
        assert_eq!(meta.label, "emotion");
    }

    #[test]
    fn test_csv_written_to_output_dir() {
        let dataset = toy_dataset();
        let dir = tempfile::tempdir().unwrap();
        let options = AnalysisOptions::builder()
            .expression("emotion & emotional faces")
            .output_dir(dir.path().to_path_buf())
            .build();
        analyze_expression(&dataset, &options).unwrap();
        let expected = dir
            .path()
            .join("emotion_and_emotional_faces_output.csv");
        assert!(expected.is_file());
    }

    #[test]
    fn test_image_subset_and_gz_images() {
        let dataset = toy_dataset();
        let dir = tempfile::tempdir().unwrap();
        let options = AnalysisOptions::builder()
            .expression("pain")
            .image_names(vec!["pA".to_string(), "pFgA_z".to_string()])
            .save_images(true)
            .output_dir(dir.path().to_path_buf())
            .build();
        analyze_expression(&dataset, &options).unwrap();
        assert!(dir.path().join("pain_output.csv").is_file());
        assert!(dir.path().join("pain_pA.csv.gz").is_file());
        assert!(dir.path().join("pain_pFgA_z.csv.gz").is_file());
    }

    #[test]
    fn test_unknown_image_name_fails() {
        let dataset = toy_dataset();
        let dir = tempfile::tempdir().unwrap();
        let options = AnalysisOptions::builder()
            .expression("pain")
            .image_names(vec!["missing".to_string()])
            .output_dir(dir.path().to_path_buf())
            .build();
        assert!(matches!(
            analyze_expression(&dataset, &options),
            Err(Error::UnknownImage(_))
        ));
    }

    #[test]
    fn test_analyze_all_terms_deduplicates() {
        let dataset = toy_dataset();
        let extra = vec!["emotion & pain".to_string(), "pain".to_string()];
        let metas = analyze_all_terms(&dataset, &extra, &MetaParams::default());
        // "emotion & pain" selects no studies
        assert!(matches!(metas, Err(Error::EmptyStudySet)));

        let extra = vec!["emotion | pain".to_string(), "pain".to_string()];
        let metas = analyze_all_terms(&dataset, &extra, &MetaParams::default()).unwrap();
        // three vocabulary terms plus one non-duplicate extra expression
        assert_eq!(metas.len(), 4);
    }
}
