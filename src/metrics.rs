//! Classification metrics over predicted and true labels.

/// Names of the four driving commands, indexed by label.
pub const COMMANDS: [&str; 4] = ["up", "left", "right", "down"];

pub fn command_name(label: usize) -> &'static str {
    COMMANDS.get(label).copied().unwrap_or("unknown")
}

/// Fraction of predictions equal to their label; 0 for empty input.
pub fn accuracy(predictions: &[usize], labels: &[usize]) -> f32 {
    if labels.is_empty() {
        return 0.0;
    }
    let correct = std::iter::zip(predictions, labels)
        .filter(|(p, l)| p == l)
        .count();

    correct as f32 / labels.len() as f32
}

/// Accuracy restricted to the examples of each category. A category with
/// no examples reports 0.
pub fn accuracy_per_category(predictions: &[usize], labels: &[usize], categories: usize) -> Vec<f32> {
    let mut correct = vec![0usize; categories];
    let mut total = vec![0usize; categories];

    for (&prediction, &label) in std::iter::zip(predictions, labels) {
        if label >= categories {
            continue;
        }
        total[label] += 1;
        if prediction == label {
            correct[label] += 1;
        }
    }

    std::iter::zip(correct, total)
        .map(|(c, t)| if t == 0 { 0.0 } else { c as f32 / t as f32 })
        .collect()
}
