use adjustp::{adjust, Procedure};

/// Multiple-comparison correction applied to voxel-wise p-values.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum Correction {
    Identity,
    #[default]
    Fdr,
    Bonferroni,
}

impl Correction {
    pub fn adjust(&self, pvalues: &[f64]) -> Vec<f64> {
        match self {
            Correction::Identity => pvalues.to_vec(),
            Correction::Fdr => adjust(pvalues, Procedure::BenjaminiHochberg),
            Correction::Bonferroni => adjust(pvalues, Procedure::Bonferroni),
        }
    }

    /// Significance mask at threshold `q` over the adjusted p-values.
    pub fn significant(&self, pvalues: &[f64], q: f64) -> Vec<bool> {
        self.adjust(pvalues).iter().map(|p| *p < q).collect()
    }
}
