//! Seeded synthetic parcels for the `demo` command and end-to-end tests.
//!
//! Each crop class gets a fixed centre in feature space; parcels are drawn
//! around it with Gaussian noise and clipped to `[0, 1]`, like prepared
//! reflectance features. Class frequencies are deliberately skewed so the
//! balancing strategies have something to do.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{ClassTable, Parcel};
use crate::error::{CoreError, Result};
use crate::timeseries::FeatureTable;

/// `(crop code, class name, relative frequency)`.
pub const DEMO_CLASSES: [(&str, &str, f64); 6] = [
    ("201", "MAIS", 0.40),
    ("311", "WINTER_WHEAT", 0.25),
    ("60", "GRASSLAND", 0.15),
    ("901", "POTATO", 0.08),
    ("0", "UNKNOWN", 0.07),
    ("9999", "IGNORE_NEW_CROP", 0.05),
];

#[derive(Debug, Clone)]
pub struct SyntheticSpec {
    pub parcels: usize,
    pub n_features: usize,
    /// Std dev of the per-feature noise around the class centre.
    pub noise: f64,
    /// Share of parcels generated with fewer pixels than `min_nb_pixels`.
    pub small_parcel_share: f64,
    pub min_nb_pixels: u32,
    pub seed: u64,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            parcels: 2_000,
            n_features: 8,
            noise: 0.08,
            small_parcel_share: 0.03,
            min_nb_pixels: 20,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticData {
    pub parcels: Vec<Parcel>,
    pub class_table: ClassTable,
}

pub fn generate_parcels(spec: &SyntheticSpec, ignore_for_train: &[String]) -> Result<SyntheticData> {
    if spec.parcels == 0 || spec.n_features == 0 {
        return Err(CoreError::InvalidConfig(
            "synthetic data needs at least one parcel and one feature".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&spec.small_parcel_share) {
        return Err(CoreError::InvalidConfig(format!(
            "small parcel share {} must be in [0, 1]",
            spec.small_parcel_share
        )));
    }
    if !(spec.noise.is_finite() && spec.noise >= 0.0) {
        return Err(CoreError::InvalidConfig(format!(
            "noise {} must be finite and >= 0",
            spec.noise
        )));
    }
    let noise = Normal::new(0.0, spec.noise)
        .map_err(|e| CoreError::InvalidConfig(format!("noise distribution error: {e}")))?;

    let class_table = ClassTable::from_codes(DEMO_CLASSES.iter().map(|(code, name, _)| (*code, *name)), ignore_for_train);

    let mut rng = StdRng::seed_from_u64(synthetic_seed(spec));
    let centres: Vec<Vec<f64>> = DEMO_CLASSES
        .iter()
        .map(|_| (0..spec.n_features).map(|_| rng.gen_range(0.15..0.85)).collect())
        .collect();
    let total_weight: f64 = DEMO_CLASSES.iter().map(|(_, _, w)| w).sum();

    let mut parcels = Vec::with_capacity(spec.parcels);
    for i in 0..spec.parcels {
        let class_idx = pick_class(rng.gen_range(0.0..total_weight));
        let (code, _, _) = DEMO_CLASSES[class_idx];
        let Some(class) = class_table.lookup(code) else {
            return Err(CoreError::InvalidConfig(format!("crop code {code} missing from class table")));
        };

        let features: Vec<f64> = centres[class_idx]
            .iter()
            .map(|c| (c + noise.sample(&mut rng)).clamp(0.0, 1.0))
            .collect();
        let pixel_count = if rng.gen_bool(spec.small_parcel_share) {
            rng.gen_range(0..spec.min_nb_pixels.max(1))
        } else {
            rng.gen_range(spec.min_nb_pixels..=spec.min_nb_pixels.saturating_add(399))
        };
        let id = format!("PRC-{:06}", i + 1);
        let verified_crop = (i % 25 == 0).then(|| code.to_string());

        parcels.push(Parcel {
            geometry_ref: Some(format!("parcels/{id}")),
            id,
            declared_crop: code.to_string(),
            verified_crop,
            class: class.clone(),
            pixel_count,
            features,
        });
    }

    Ok(SyntheticData { parcels, class_table })
}

/// Parcel features as a feature table (`demo_f0`, `demo_f1`, ...).
///
/// Parcels of the same run share a feature count; shorter rows are padded
/// with missing values.
pub fn feature_table(parcels: &[Parcel]) -> FeatureTable {
    let width = parcels.iter().map(|p| p.features.len()).max().unwrap_or(0);
    let mut table = FeatureTable::with_columns((0..width).map(|i| format!("demo_f{i}")).collect());
    for parcel in parcels {
        table.push_row(parcel.id.clone(), parcel.features.iter().copied().map(Some).collect());
    }
    table
}

fn pick_class(draw: f64) -> usize {
    let mut acc = 0.0;
    for (idx, (_, _, weight)) in DEMO_CLASSES.iter().enumerate() {
        acc += weight;
        if draw < acc {
            return idx;
        }
    }
    DEMO_CLASSES.len() - 1
}

fn synthetic_seed(spec: &SyntheticSpec) -> u64 {
    let mut hasher = DefaultHasher::new();
    spec.parcels.hash(&mut hasher);
    spec.n_features.hash(&mut hasher);
    spec.noise.to_bits().hash(&mut hasher);
    spec.seed.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ClassRole;

    fn ignore() -> Vec<String> {
        vec!["UNKNOWN".to_string()]
    }

    #[test]
    fn generation_is_deterministic_per_seed() {
        let spec = SyntheticSpec {
            parcels: 300,
            ..SyntheticSpec::default()
        };
        let a = generate_parcels(&spec, &ignore()).unwrap();
        let b = generate_parcels(&spec, &ignore()).unwrap();
        let ids_a: Vec<(&str, &str, &[f64])> = a
            .parcels
            .iter()
            .map(|p| (p.id.as_str(), p.class.name.as_str(), p.features.as_slice()))
            .collect();
        let ids_b: Vec<(&str, &str, &[f64])> = b
            .parcels
            .iter()
            .map(|p| (p.id.as_str(), p.class.name.as_str(), p.features.as_slice()))
            .collect();
        assert_eq!(ids_a, ids_b);

        let other = generate_parcels(&SyntheticSpec { seed: 7, ..spec }, &ignore()).unwrap();
        assert_ne!(a.parcels[0].features, other.parcels[0].features);
    }

    #[test]
    fn parcels_carry_roles_and_bounded_features() {
        let data = generate_parcels(&SyntheticSpec::default(), &ignore()).unwrap();
        assert_eq!(data.parcels.len(), 2_000);
        assert_eq!(data.class_table.len(), DEMO_CLASSES.len());
        assert!(data.parcels.iter().all(|p| p.features.len() == 8));
        assert!(data.parcels.iter().flat_map(|p| &p.features).all(|v| (0.0..=1.0).contains(v)));

        let roles: Vec<ClassRole> = data.parcels.iter().map(|p| p.class.role).collect();
        assert!(roles.contains(&ClassRole::IgnoredAlways));
        assert!(roles.contains(&ClassRole::IgnoredForTrainOnly));
        assert!(data.parcels.iter().any(|p| p.too_few_pixels(20)));
        assert!(data.parcels.iter().any(|p| p.verified_crop.is_some()));
    }

    #[test]
    fn feature_table_keeps_parcel_order() {
        let spec = SyntheticSpec {
            parcels: 10,
            n_features: 3,
            ..SyntheticSpec::default()
        };
        let data = generate_parcels(&spec, &ignore()).unwrap();
        let table = feature_table(&data.parcels);
        assert_eq!(table.columns(), ["demo_f0", "demo_f1", "demo_f2"]);
        assert_eq!(table.len(), 10);
        assert_eq!(table.parcel_ids()[0], "PRC-000001");
        let row = table.row("PRC-000002").unwrap();
        assert_eq!(row[1], Some(data.parcels[1].features[1]));
    }

    #[test]
    fn invalid_specs_are_rejected() {
        let spec = SyntheticSpec {
            parcels: 0,
            ..SyntheticSpec::default()
        };
        assert!(generate_parcels(&spec, &ignore()).is_err());
        for noise in [-1.0, f64::NAN, f64::INFINITY] {
            let spec = SyntheticSpec {
                noise,
                ..SyntheticSpec::default()
            };
            assert!(matches!(generate_parcels(&spec, &ignore()), Err(CoreError::InvalidConfig(_))));
        }
    }

    #[test]
    fn large_pixel_minimum_does_not_overflow() {
        let spec = SyntheticSpec {
            parcels: 50,
            small_parcel_share: 0.0,
            min_nb_pixels: u32::MAX - 10,
            ..SyntheticSpec::default()
        };
        let data = generate_parcels(&spec, &ignore()).unwrap();
        assert!(data.parcels.iter().all(|p| p.pixel_count >= u32::MAX - 10));
    }
}
