//! Disease label catalog for the ODIR fundus classifier
//!
//! The catalog is the join key between the classifier's output vector and
//! human-readable results: position `i` of the probability vector always
//! refers to `LabelCatalog` entry `i`. The table is versioned with the model
//! artifact; redeploying a retrained model with a different label set
//! requires redeploying this table in the same release.

use once_cell::sync::Lazy;
use serde::Serialize;

/// Number of disease labels in the ODIR deployment
pub const ODIR_LABEL_COUNT: usize = 37;

/// Coarse screening category attached to each disease label.
///
/// Codes follow the ODIR dataset convention (N/D/G/C/A/H/M/O).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Normal,
    DiabeticRetinopathy,
    Glaucoma,
    Cataract,
    MacularDegeneration,
    Hypertension,
    Myopia,
    Other,
}

impl Category {
    /// Single-letter ODIR category code
    #[must_use]
    pub fn code(&self) -> char {
        match self {
            Category::Normal => 'N',
            Category::DiabeticRetinopathy => 'D',
            Category::Glaucoma => 'G',
            Category::Cataract => 'C',
            Category::MacularDegeneration => 'A',
            Category::Hypertension => 'H',
            Category::Myopia => 'M',
            Category::Other => 'O',
        }
    }
}

/// A single catalog entry: output-vector position, canonical disease name,
/// and an optional screening category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Label {
    /// Ordinal position in the classifier's output vector
    pub index: usize,
    /// Canonical disease name
    pub name: String,
    /// Screening category, if the label maps to one
    pub category: Option<Category>,
}

use Category::*;

/// The 37 ODIR disease labels, in the classifier's output order.
/// Must never be permuted independently of the model artifact.
const ODIR_LABELS: &[(&str, Option<Category>)] = &[
    ("branch retinal vein occlusion", Some(Other)),
    ("cataract", Some(Cataract)),
    ("central retinal vein occlusion", Some(Other)),
    ("chorioretinal atrophy", Some(Other)),
    ("diabetic retinopathy", Some(DiabeticRetinopathy)),
    ("drusen", Some(Other)),
    ("dry age-related macular degeneration", Some(MacularDegeneration)),
    ("epiretinal membrane", Some(Other)),
    ("epiretinal membrane over the macula", Some(Other)),
    ("glaucoma", Some(Glaucoma)),
    ("hypertensive retinopathy", Some(Hypertension)),
    ("laser spot", Some(Other)),
    ("lens dust", None),
    ("macular epiretinal membrane", Some(Other)),
    ("maculopathy", Some(Other)),
    ("mild nonproliferative retinopathy", Some(DiabeticRetinopathy)),
    ("moderate non proliferative retinopathy", Some(DiabeticRetinopathy)),
    ("myelinated nerve fibers", Some(Other)),
    ("myopia retinopathy", Some(Myopia)),
    ("normal fundus", Some(Normal)),
    ("optic disc edema", Some(Other)),
    ("pathological myopia", Some(Myopia)),
    ("peripapillary atrophy", Some(Other)),
    ("post laser photocoagulation", Some(Other)),
    ("post retinal laser surgery", Some(Other)),
    ("proliferative diabetic retinopathy", Some(DiabeticRetinopathy)),
    ("refractive media opacity", Some(Other)),
    ("retinal pigmentation", Some(Other)),
    ("retinitis pigmentosa", Some(Other)),
    ("severe nonproliferative retinopathy", Some(DiabeticRetinopathy)),
    ("severe proliferative diabetic retinopathy", Some(DiabeticRetinopathy)),
    ("spotted membranous change", Some(Other)),
    ("suspected glaucoma", Some(Glaucoma)),
    ("tessellated fundus", Some(Other)),
    ("vitreous degeneration", Some(Other)),
    ("wet age-related macular degeneration", Some(MacularDegeneration)),
    ("white vessel", Some(Other)),
];

static GLOBAL_CATALOG: Lazy<LabelCatalog> = Lazy::new(LabelCatalog::odir);

/// Ordered, immutable list of disease labels.
#[derive(Debug, Clone)]
pub struct LabelCatalog {
    labels: Vec<Label>,
}

impl LabelCatalog {
    /// Build a catalog from (name, category) pairs in output-vector order.
    #[must_use]
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Option<Category>)>,
        S: Into<String>,
    {
        let labels = entries
            .into_iter()
            .enumerate()
            .map(|(index, (name, category))| Label {
                index,
                name: name.into(),
                category,
            })
            .collect();
        Self { labels }
    }

    /// The ODIR 37-label catalog shipped with the deployed model.
    #[must_use]
    pub fn odir() -> Self {
        Self::new(ODIR_LABELS.iter().map(|&(name, cat)| (name, cat)))
    }

    /// Process-wide read-only catalog, initialized on first use.
    #[must_use]
    pub fn global() -> &'static LabelCatalog {
        &GLOBAL_CATALOG
    }

    /// Number of labels (must equal the classifier's output length)
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Label at an output-vector position
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Label> {
        self.labels.get(index)
    }

    /// Iterate labels in output-vector order
    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter()
    }
}
