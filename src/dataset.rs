use std::{
    collections::{BTreeMap, BTreeSet},
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use derive_new::new;
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    error::{Error, Result},
    expression,
};

pub type StudyId = u32;
pub type StudySet = BTreeSet<StudyId>;

/// Loading below which a study does not count as expressing a term.
pub const DEFAULT_LOADING_THRESHOLD: f64 = 0.001;

/// Sparse activation row: the voxels a single study reports as active.
#[derive(Debug, Clone, Serialize, Deserialize, new)]
pub struct StudyActivation {
    pub study: StudyId,
    pub voxels: Vec<u32>,
}

/// Per-study activation maps over a fixed voxel space, with an optional
/// region-of-interest mask restricting the active voxel universe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageTable {
    voxel_count: usize,
    rows: Vec<StudyActivation>,
    #[serde(skip)]
    mask: Option<Vec<u32>>,
}

impl ImageTable {
    pub fn new(voxel_count: usize) -> Self {
        Self {
            voxel_count,
            rows: Vec::new(),
            mask: None,
        }
    }

    pub fn insert(&mut self, study: StudyId, mut voxels: Vec<u32>) -> Result<()> {
        for &voxel in &voxels {
            if voxel as usize >= self.voxel_count {
                return Err(Error::VoxelOutOfRange {
                    index: voxel,
                    voxel_count: self.voxel_count,
                });
            }
        }
        voxels.sort_unstable();
        voxels.dedup();
        match self.rows.binary_search_by_key(&study, |row| row.study) {
            Ok(position) => self.rows[position] = StudyActivation::new(study, voxels),
            Err(position) => self.rows.insert(position, StudyActivation::new(study, voxels)),
        }
        Ok(())
    }

    pub fn voxel_count(&self) -> usize {
        self.voxel_count
    }

    pub fn ids(&self) -> StudySet {
        self.rows.iter().map(|row| row.study).collect()
    }

    pub fn activation(&self, study: StudyId) -> Option<&[u32]> {
        self.rows
            .binary_search_by_key(&study, |row| row.study)
            .ok()
            .map(|position| self.rows[position].voxels.as_slice())
    }

    pub fn rows(&self) -> &[StudyActivation] {
        &self.rows
    }

    /// Voxels currently under consideration: the mask if one is set,
    /// otherwise the full space.
    pub fn active_voxels(&self) -> Vec<u32> {
        match &self.mask {
            Some(mask) => mask.clone(),
            None => (0..self.voxel_count as u32).collect(),
        }
    }

    pub fn set_mask(&mut self, mut voxels: Vec<u32>) -> Result<()> {
        voxels.sort_unstable();
        voxels.dedup();
        if voxels.is_empty() {
            return Err(Error::EmptyMask);
        }
        for &voxel in &voxels {
            if voxel as usize >= self.voxel_count {
                return Err(Error::VoxelOutOfRange {
                    index: voxel,
                    voxel_count: self.voxel_count,
                });
            }
        }
        self.mask = Some(voxels);
        Ok(())
    }

    pub fn clear_mask(&mut self) {
        self.mask = None;
    }

    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }
}

/// Term vocabulary: per-term sparse loadings over studies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureTable {
    threshold: f64,
    columns: BTreeMap<String, Vec<(StudyId, f64)>>,
}

impl FeatureTable {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            columns: BTreeMap::new(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn insert_term(&mut self, term: impl Into<String>, loadings: Vec<(StudyId, f64)>) {
        self.columns.insert(term.into(), loadings);
    }

    pub fn terms(&self) -> impl Iterator<Item = &String> {
        self.columns.keys()
    }

    pub fn contains(&self, term: &str) -> bool {
        self.columns.contains_key(term)
    }

    /// Studies whose loading for `term` clears the threshold.
    pub fn studies_above_threshold(&self, term: &str) -> Option<StudySet> {
        self.columns.get(term).map(|loadings| {
            loadings
                .iter()
                .filter(|(_, loading)| *loading > self.threshold)
                .map(|(study, _)| *study)
                .collect()
        })
    }
}

/// A study database: activation images plus the term vocabulary, extended
/// with session-lifetime custom terms mapping a name to a study set.
///
/// Custom terms are create-once and are not persisted in the archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    images: ImageTable,
    features: FeatureTable,
    #[serde(skip)]
    custom_terms: BTreeMap<String, StudySet>,
}

impl Dataset {
    pub fn new(images: ImageTable, features: FeatureTable) -> Self {
        Self {
            images,
            features,
            custom_terms: BTreeMap::new(),
        }
    }

    pub fn images(&self) -> &ImageTable {
        &self.images
    }

    pub fn study_ids(&self) -> StudySet {
        self.images.ids()
    }

    pub fn num_studies(&self) -> usize {
        self.images.rows().len()
    }

    /// Vocabulary terms followed by custom terms.
    pub fn feature_names(&self) -> Vec<String> {
        self.features
            .terms()
            .chain(self.custom_terms.keys())
            .cloned()
            .collect()
    }

    fn known_terms(&self) -> BTreeSet<String> {
        self.feature_names().into_iter().collect()
    }

    pub fn custom_terms(&self) -> &BTreeMap<String, StudySet> {
        &self.custom_terms
    }

    /// Surface-validate an expression against the current vocabulary.
    pub fn validate_expression(&self, expression: &str) -> Result<()> {
        expression::validate_expression(expression, &self.known_terms())
    }

    /// Resolve a single term: custom terms take precedence, `*` expands
    /// over the vocabulary, anything else must be a known feature.
    pub(crate) fn resolve_term(&self, term: &str) -> Result<StudySet> {
        if let Some(studies) = self.custom_terms.get(term) {
            return Ok(studies.clone());
        }
        if term.contains('*') {
            let matcher = expression::wildcard_matcher(term);
            let mut matched = false;
            let mut studies = StudySet::new();
            for name in self.feature_names() {
                if matcher.is_match(&name) {
                    matched = true;
                    studies.extend(self.resolve_term(&name)?);
                }
            }
            if !matched {
                return Err(Error::EmptyWildcard(term.to_string()));
            }
            return Ok(studies);
        }
        self.features
            .studies_above_threshold(term)
            .ok_or_else(|| Error::UnknownTerm(term.to_string()))
    }

    /// Resolve a term or expression to a study set.
    ///
    /// Custom terms and plain features short-circuit; anything else goes
    /// through the expression parser.
    pub fn get_studies(&self, query: &str) -> Result<StudySet> {
        let query = query.trim();
        if let Some(studies) = self.custom_terms.get(query) {
            return Ok(studies.clone());
        }
        if self.features.contains(query) {
            return self.resolve_term(query);
        }
        expression::Expr::parse(query)?.evaluate(self)
    }

    /// Record a custom term as the subset of `study_ids` present in the
    /// database; returns that subset.
    pub fn add_custom_term_by_ids(&mut self, new_term: &str, study_ids: &[StudyId]) -> Result<StudySet> {
        if self.known_terms().contains(new_term) {
            return Err(Error::DuplicateTerm(new_term.to_string()));
        }
        let known = self.study_ids();
        let valid: StudySet = study_ids
            .iter()
            .filter(|id| known.contains(id))
            .copied()
            .collect();
        if valid.is_empty() {
            return Err(Error::NoValidStudyIds);
        }
        debug!(term = new_term, studies = valid.len(), "custom term added");
        self.custom_terms.insert(new_term.to_string(), valid.clone());
        Ok(valid)
    }

    /// Record a custom term from the studies an expression resolves to.
    pub fn add_custom_term_by_expression(&mut self, new_term: &str, expression: &str) -> Result<StudySet> {
        if self.known_terms().contains(new_term) {
            return Err(Error::DuplicateTerm(new_term.to_string()));
        }
        let studies = self.get_studies(expression)?;
        let ids: Vec<StudyId> = studies.iter().copied().collect();
        self.add_custom_term_by_ids(new_term, &ids)
    }

    /// Restrict analysis to an explicit voxel set.
    pub fn apply_mask(&mut self, voxels: Vec<u32>) -> Result<()> {
        self.images.set_mask(voxels)
    }

    /// Restrict analysis to the voxels listed in a region-of-interest file.
    pub fn apply_mask_file(&mut self, path: &Path) -> Result<()> {
        let voxels = read_roi_file(path)?;
        self.images.set_mask(voxels)?;
        info!(path = %path.display(), "region of interest applied");
        Ok(())
    }

    pub fn clear_mask(&mut self) {
        self.images.clear_mask();
    }

    /// Load a dataset from a gzipped JSON archive. Custom terms always
    /// start empty on a fresh load.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let reader = GzDecoder::new(BufReader::new(file));
        let dataset: Dataset = serde_json::from_reader(reader)?;
        info!(
            path = %path.display(),
            studies = dataset.num_studies(),
            terms = dataset.features.columns.len(),
            "dataset loaded"
        );
        Ok(dataset)
    }

    /// Save the dataset as a gzipped JSON archive.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer(&mut writer, self)?;
        writer.finish()?.flush()?;
        info!(path = %path.display(), "dataset saved");
        Ok(())
    }
}

/// Parse a region-of-interest file: one voxel index per line, `#` comments.
fn read_roi_file(path: &Path) -> Result<Vec<u32>> {
    let file = File::open(path)?;
    let mut voxels = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let entry = line.trim();
        if entry.is_empty() || entry.starts_with('#') {
            continue;
        }
        let voxel = entry.parse::<u32>().map_err(|_| Error::InvalidRoi {
            path: path.to_path_buf(),
            message: format!("line {}: not a voxel index: {entry:?}", lineno + 1),
        })?;
        voxels.push(voxel);
    }
    if voxels.is_empty() {
        return Err(Error::InvalidRoi {
            path: path.to_path_buf(),
            message: "no voxel indices found".to_string(),
        });
    }
    Ok(voxels)
}

#[cfg(test)]
pub(crate) fn toy_dataset() -> Dataset {
    // Ten studies over eight voxels. Studies 1-5 load on "emotion" and
    // activate the low voxels; 6-10 load on "pain" and activate the high
    // voxels. Studies 4-6 also load on "emotional faces".
    let mut images = ImageTable::new(8);
    for study in 1..=5 {
        images.insert(study, vec![0, 1, 2]).unwrap();
    }
    for study in 6..=10 {
        images.insert(study, vec![5, 6, 7]).unwrap();
    }
    let mut features = FeatureTable::new(DEFAULT_LOADING_THRESHOLD);
    features.insert_term("emotion", (1..=5).map(|id| (id, 0.05)).collect());
    features.insert_term("pain", (6..=10).map(|id| (id, 0.05)).collect());
    features.insert_term(
        "emotional faces",
        (4..=6).map(|id| (id, 0.05)).collect(),
    );
    Dataset::new(images, features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_feature_threshold_filters_low_loadings() {
        let mut features = FeatureTable::new(0.01);
        features.insert_term("emotion", vec![(1, 0.5), (2, 0.001)]);
        let studies = features.studies_above_threshold("emotion").unwrap();
        assert_eq!(studies, StudySet::from([1]));
    }

    #[test]
    fn test_image_table_rejects_out_of_range_voxel() {
        let mut images = ImageTable::new(4);
        assert!(matches!(
            images.insert(1, vec![4]),
            Err(Error::VoxelOutOfRange { index: 4, .. })
        ));
    }

    #[test]
    fn test_get_studies_by_term_and_expression() {
        let dataset = toy_dataset();
        assert_eq!(dataset.get_studies("emotion").unwrap(), (1..=5).collect());
        assert_eq!(
            dataset.get_studies("emotion & emotional faces").unwrap(),
            StudySet::from([4, 5])
        );
        assert_eq!(
            dataset.get_studies("emotion &~ emotional faces").unwrap(),
            StudySet::from([1, 2, 3])
        );
    }

    #[test]
    fn test_wildcard_resolution() {
        let dataset = toy_dataset();
        // "emotion*" covers both "emotion" and "emotional faces"
        assert_eq!(dataset.get_studies("emotion*").unwrap(), (1..=6).collect());
        assert!(matches!(
            dataset.get_studies("anxiety*"),
            Err(Error::EmptyWildcard(_))
        ));
    }

    #[test]
    fn test_validate_expression_uses_current_vocabulary() {
        let mut dataset = toy_dataset();
        assert!(dataset.validate_expression("emotion & pain").is_ok());
        assert!(matches!(
            dataset.validate_expression("emotion & my term"),
            Err(Error::UnknownTerm(_))
        ));
        dataset.add_custom_term_by_ids("my term", &[1, 2]).unwrap();
        assert!(dataset.validate_expression("emotion & my term").is_ok());
    }

    #[test]
    fn test_add_custom_term_rejects_existing_name() {
        let mut dataset = toy_dataset();
        assert!(matches!(
            dataset.add_custom_term_by_ids("emotion", &[1, 2]),
            Err(Error::DuplicateTerm(_))
        ));
    }

    #[test]
    fn test_add_custom_term_rejects_unknown_ids() {
        let mut dataset = toy_dataset();
        assert!(matches!(
            dataset.add_custom_term_by_ids("my term", &[99, 100]),
            Err(Error::NoValidStudyIds)
        ));
    }

    #[test]
    fn test_add_custom_term_intersects_and_resolves() {
        let mut dataset = toy_dataset();
        let valid = dataset.add_custom_term_by_ids("my term", &[1, 2, 99]).unwrap();
        assert_eq!(valid, StudySet::from([1, 2]));
        assert_eq!(dataset.get_studies("my term").unwrap(), StudySet::from([1, 2]));
        assert!(dataset.feature_names().contains(&"my term".to_string()));
        // custom terms compose with vocabulary terms in expressions
        assert_eq!(
            dataset.get_studies("my term | pain").unwrap(),
            StudySet::from([1, 2, 6, 7, 8, 9, 10])
        );
    }

    #[test]
    fn test_add_custom_term_by_expression() {
        let mut dataset = toy_dataset();
        let studies = dataset
            .add_custom_term_by_expression("affect", "emotion* &~ pain")
            .unwrap();
        assert_eq!(studies, (1..=5).collect());
        // a second registration under the same name must fail
        assert!(matches!(
            dataset.add_custom_term_by_expression("affect", "pain"),
            Err(Error::DuplicateTerm(_))
        ));
    }

    #[test]
    fn test_roi_file_round_trip() {
        let mut dataset = toy_dataset();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# low voxels\n0\n1\n2").unwrap();
        dataset.apply_mask_file(file.path()).unwrap();
        assert!(dataset.images().is_masked());
        assert_eq!(dataset.images().active_voxels(), vec![0, 1, 2]);
        dataset.clear_mask();
        assert_eq!(dataset.images().active_voxels().len(), 8);
    }

    #[test]
    fn test_roi_file_rejects_garbage_and_out_of_range() {
        let mut dataset = toy_dataset();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "voxel zero").unwrap();
        assert!(matches!(
            dataset.apply_mask_file(file.path()),
            Err(Error::InvalidRoi { .. })
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "800").unwrap();
        assert!(matches!(
            dataset.apply_mask_file(file.path()),
            Err(Error::VoxelOutOfRange { .. })
        ));
    }

    #[test]
    fn test_archive_round_trip_resets_custom_terms() {
        let mut dataset = toy_dataset();
        dataset.add_custom_term_by_ids("my term", &[1, 2]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("database.json.gz");
        dataset.save(&path).unwrap();

        let loaded = Dataset::load(&path).unwrap();
        assert_eq!(loaded.num_studies(), dataset.num_studies());
        assert_eq!(
            loaded.get_studies("emotion").unwrap(),
            dataset.get_studies("emotion").unwrap()
        );
        assert!(loaded.custom_terms().is_empty());
    }
}
