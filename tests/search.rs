use std::fs;

use architecture_search::{
    config::TrainingConfig,
    data::{record_paths, write_records},
    example::ImageRecord,
    search::{architecture_search, select_best, Evaluator, NetworkEvaluator},
    Activation,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Four commands, each with its own bright quadrant in a 4x4 grayscale
/// frame.
fn frames(rng: &mut StdRng, n: usize) -> Vec<ImageRecord> {
    (0..n)
        .map(|i| {
            let label = i % 4;
            let pixels = (0..16)
                .map(|p| {
                    let (row, col) = (p / 4, p % 4);
                    let quadrant = (row / 2) * 2 + col / 2;
                    let base: u8 = if quadrant == label { 200 } else { 20 };
                    base + rng.random_range(0..40u8)
                })
                .collect();
            ImageRecord {
                height: 4,
                width: 4,
                depth: 1,
                label,
                pixels,
            }
        })
        .collect()
}

fn setup(dir: &std::path::Path) -> TrainingConfig {
    let mut rng = StdRng::seed_from_u64(21);
    let paths = record_paths(dir, "pure");
    write_records(&paths[0], &frames(&mut rng, 120)).unwrap();
    write_records(&paths[1], &frames(&mut rng, 40)).unwrap();
    write_records(&paths[2], &frames(&mut rng, 40)).unwrap();

    TrainingConfig {
        learning_rate: 0.5,
        batch_size: 10,
        epochs: 40,
        checkpoint_dir: dir.join("checkpoints").display().to_string(),
        max_layer_width: 24,
        ..Default::default()
    }
}

#[test]
fn a_trial_trains_scores_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let base = setup(dir.path());
    let config = base.with_architecture(vec![16], vec![Activation::Tanh]);

    let mut evaluator = NetworkEvaluator::new(
        record_paths(dir.path(), "pure"),
        StdRng::seed_from_u64(2),
        false,
    );
    let evaluation = evaluator.evaluate(&config).unwrap();

    assert!(evaluation.valid_accuracy > 0.9, "{evaluation:?}");
    assert_eq!(evaluation.per_category.len(), 4);
    assert!(evaluation.per_category.iter().all(|acc| (0.0..=1.0).contains(acc)));
    assert!(!dir.path().join("checkpoints").exists());
}

#[test]
fn full_search_writes_the_report() {
    let dir = tempfile::tempdir().unwrap();
    let base = TrainingConfig {
        epochs: 3,
        ..setup(dir.path())
    };
    let output = dir.path().join("architecture.txt");
    fs::write(&output, "stale\n".repeat(100)).unwrap();

    let mut evaluator = NetworkEvaluator::new(
        record_paths(dir.path(), "pure"),
        StdRng::seed_from_u64(4),
        false,
    );
    let report =
        architecture_search(&mut evaluator, &mut StdRng::seed_from_u64(8), &base, 3, 3).unwrap();
    report.write(&output).unwrap();

    assert_eq!(report.trials.len(), 3);
    assert!(report
        .trials
        .iter()
        .all(|t| (1..=2).contains(&t.architecture.len())));
    assert!(!dir.path().join("checkpoints").exists());

    let text = fs::read_to_string(&output).unwrap();
    assert!(!text.contains("stale"));
    let (lines, paragraph) = text.split_once("\n\n").unwrap();
    assert_eq!(lines.lines().count(), 3);

    let best = select_best(&report.trials).unwrap();
    assert!(report
        .trials
        .iter()
        .all(|t| t.valid_accuracy <= best.valid_accuracy));
    assert!(paragraph.contains(&format!("the best one is {:?}", best.architecture)));
    assert!(paragraph.contains("epochs: 3"));
}

#[test]
fn missing_records_abort_the_search() {
    let dir = tempfile::tempdir().unwrap();
    let mut evaluator = NetworkEvaluator::new(
        record_paths(dir.path(), "green"),
        StdRng::seed_from_u64(4),
        false,
    );
    let err = architecture_search(
        &mut evaluator,
        &mut StdRng::seed_from_u64(8),
        &TrainingConfig::default(),
        2,
        4,
    )
    .unwrap_err();

    assert!(format!("{err:#}").contains("green_train.tfrecords"));
}
