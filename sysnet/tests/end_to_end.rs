use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal, Poisson};
use sysnet::{
    catalog::{Catalog, Sample},
    config::SysnetConfig,
    ensemble::WeightConvention,
    pipeline::Pipeline,
};

const NUM_SAMPLES: usize = 1000;
const SLOPE: f64 = 0.3;
const MEAN_COUNT: f64 = 200.0;

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let cov: f64 = a.iter().zip(b).map(|(x, y)| (x - mean_a) * (y - mean_b)).sum();
    let var_a: f64 = a.iter().map(|x| (x - mean_a).powi(2)).sum();
    let var_b: f64 = b.iter().map(|y| (y - mean_b).powi(2)).sum();

    cov / (var_a * var_b).sqrt()
}

/// One informative template with a linear response and three templates of pure noise.
fn synthetic_catalog() -> (Catalog, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(2020);
    let noise = Normal::new(0.0, 1.0).unwrap();

    let mut samples = Vec::with_capacity(NUM_SAMPLES);
    let mut responses = Vec::with_capacity(NUM_SAMPLES);

    for id in 0..NUM_SAMPLES as u64 {
        let informative: f64 = rng.random_range(-1.0..1.0);
        let weight: f64 = rng.random_range(0.8..1.0);
        let response = 1.0 + SLOPE * informative;

        let count = Poisson::new(MEAN_COUNT * weight * response)
            .unwrap()
            .sample(&mut rng);

        let mut features = vec![informative as f32];
        features.extend((0..3).map(|_| noise.sample(&mut rng) as f32));

        samples.push(Sample {
            id,
            features,
            count: count as f32,
            weight: weight as f32,
        });
        responses.push(response);
    }

    (Catalog::new(samples).unwrap(), responses)
}

fn config() -> SysnetConfig {
    SysnetConfig {
        cost_function: "mse".to_string(),
        optimizer: "adamw".to_string(),
        base_lr: 1e-3,
        max_lr: 3e-2,
        cycle_length_steps: 60,
        num_partitions: 5,
        num_seeds_per_partition: 2,
        train_valid_ratio: 0.75,
        batch_size: 64,
        max_epochs: 50,
        patience: 10,
        hidden_layers: vec![20],
        l1_alpha: 1e-4,
        normalization_convention: WeightConvention::Inverse,
        seed: 7,
        ..Default::default()
    }
}

#[test]
fn recovers_the_injected_response() {
    let (catalog, responses) = synthetic_catalog();
    let pipeline = Pipeline::new(config()).unwrap();

    let (output, map) = pipeline.run_and_ensemble(&catalog).unwrap();

    assert_eq!(output.reports.len(), 10);
    assert!(output.failures.is_empty());
    assert!(output.reports.iter().all(|r| r.epochs_run <= 50));
    assert_eq!(map.weights.len(), NUM_SAMPLES);
    assert!(map.weights.iter().all(|w| w.num_predictions == 2));

    let ideal: Vec<f64> = responses.iter().map(|r| 1.0 / r).collect();
    let weights: Vec<f64> = map.weights.iter().map(|w| w.weight as f64).collect();
    let recovered: Vec<f64> = map.weights.iter().map(|w| w.response as f64).collect();

    let r_weight = pearson(&weights, &ideal);
    let r_response = pearson(&recovered, &responses);

    assert!(r_weight > 0.8, "weight correlation {r_weight}");
    assert!(r_response > 0.8, "response correlation {r_response}");
    assert!((map.mean_weight() - 1.0).abs() < 0.01);
}

#[test]
fn poisson_cost_recovers_the_injected_response() {
    let (catalog, responses) = synthetic_catalog();
    let pipeline = Pipeline::new(SysnetConfig {
        cost_function: "poisson".to_string(),
        num_seeds_per_partition: 1,
        ..config()
    })
    .unwrap();

    let (_, map) = pipeline.run_and_ensemble(&catalog).unwrap();
    let recovered: Vec<f64> = map.weights.iter().map(|w| w.response as f64).collect();

    assert!(pearson(&recovered, &responses) > 0.8);
    assert!(map.weights.iter().all(|w| w.response > 0.0));
    assert!((map.mean_weight() - 1.0).abs() < 0.01);
}
