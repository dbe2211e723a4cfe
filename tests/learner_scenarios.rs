//! End-to-end scenarios for the serial tree learner.

use leafwise::{ConfigBuilder, Dataset, ForcedSplit, SerialTreeLearner, Tree};
use ndarray::Array2;

/// Build a dataset from feature columns, returning the row vectors as well
/// for prediction checks.
fn dataset_from_columns(columns: &[Vec<f64>], categorical: &[usize]) -> (Dataset, Vec<Vec<f64>>) {
    let num_data = columns[0].len();
    let num_features = columns.len();
    let mut flat = Vec::with_capacity(num_data * num_features);
    for row in 0..num_data {
        for column in columns {
            flat.push(column[row]);
        }
    }
    let rows: Vec<Vec<f64>> = (0..num_data)
        .map(|row| columns.iter().map(|c| c[row]).collect())
        .collect();
    let features = Array2::from_shape_vec((num_data, num_features), flat).unwrap();
    (
        Dataset::from_matrix(features.view(), categorical, 255).unwrap(),
        rows,
    )
}

fn tree_fingerprint(tree: &Tree) -> String {
    serde_json::to_string(tree).unwrap()
}

#[test]
fn scenario_a_single_numerical_split() {
    let (dataset, _rows) = dataset_from_columns(
        &[vec![1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0]],
        &[],
    );
    let config = ConfigBuilder::new()
        .num_leaves(2)
        .min_data_in_leaf(1)
        .min_sum_hessian_in_leaf(0.0)
        .build()
        .unwrap();
    let mut learner = SerialTreeLearner::new(config, &dataset, true).unwrap();
    let gradients = vec![-1.0f32, -1.0, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0];
    let hessians = vec![1.0f32; 8];
    let tree = learner.train(&gradients, &hessians, None).unwrap();

    assert_eq!(tree.num_leaves(), 2);
    assert!((tree.split_gain(0) as f64 - 8.0).abs() < 1e-6);
    assert!((tree.predict(&[1.0]) + 1.0).abs() < 1e-9);
    assert!((tree.predict(&[2.0]) - 1.0).abs() < 1e-9);
    assert_eq!(tree.leaf_count(0), 4);
    assert_eq!(tree.leaf_count(1), 4);
}

#[test]
fn scenario_b_min_data_gating_returns_root_tree() {
    let (dataset, _rows) = dataset_from_columns(
        &[vec![1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0]],
        &[],
    );
    let config = ConfigBuilder::new()
        .num_leaves(2)
        .min_data_in_leaf(5)
        .build()
        .unwrap();
    let mut learner = SerialTreeLearner::new(config, &dataset, true).unwrap();
    let gradients = vec![-1.0f32, -1.0, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0];
    let hessians = vec![1.0f32; 8];
    let tree = learner.train(&gradients, &hessians, None).unwrap();

    assert_eq!(tree.num_leaves(), 1);
    // Root output is the optimal value of the root sums: 0 / 8.
    assert!(tree.leaf_output(0).abs() < 1e-12);
}

#[test]
fn scenario_c_tie_break_prefers_smaller_feature_index() {
    // Both features carry the identical split.
    let column = vec![1.0, 1.0, 2.0, 2.0];
    let (dataset, _rows) = dataset_from_columns(&[column.clone(), column], &[]);
    let config = ConfigBuilder::new()
        .num_leaves(2)
        .min_data_in_leaf(1)
        .min_sum_hessian_in_leaf(0.0)
        .build()
        .unwrap();
    let mut learner = SerialTreeLearner::new(config, &dataset, true).unwrap();
    let gradients = vec![-1.0f32, -1.0, 1.0, 1.0];
    let hessians = vec![1.0f32; 4];
    let tree = learner.train(&gradients, &hessians, None).unwrap();

    assert_eq!(tree.num_leaves(), 2);
    assert_eq!(tree.split_feature(0), 0);
}

/// Deterministic pseudo-random stream for test data.
fn wave(i: usize, k: usize) -> f64 {
    (((i * 2654435761 + k * 40503) >> 7) % 1000) as f64 / 1000.0
}

fn larger_fixture() -> (Dataset, Vec<Vec<f64>>, Vec<f32>, Vec<f32>) {
    let n = 256;
    let columns: Vec<Vec<f64>> = (0..3)
        .map(|k| (0..n).map(|i| (wave(i, k) * 16.0).floor()).collect())
        .collect();
    let gradients: Vec<f32> = (0..n)
        .map(|i| (columns[0][i] / 8.0 - 1.0 + wave(i, 7) * 0.25) as f32)
        .collect();
    let hessians: Vec<f32> = vec![1.0; n];
    let (dataset, rows) = dataset_from_columns(&columns, &[]);
    (dataset, rows, gradients, hessians)
}

#[test]
fn scenario_d_subtract_trick_matches_from_scratch_growth() {
    let (dataset, _rows, gradients, hessians) = larger_fixture();

    // Unbounded pool keeps every parent resident: the subtract trick runs
    // on every split. A two-slot pool forces scratch rebuilds whenever an
    // older leaf is revisited. Both must grow the same tree.
    let roomy = ConfigBuilder::new()
        .num_leaves(6)
        .min_data_in_leaf(4)
        .build()
        .unwrap();
    let cramped = ConfigBuilder::new()
        .num_leaves(6)
        .min_data_in_leaf(4)
        .histogram_pool_size(1e-6)
        .build()
        .unwrap();

    let mut learner_roomy = SerialTreeLearner::new(roomy, &dataset, true).unwrap();
    let mut learner_cramped = SerialTreeLearner::new(cramped, &dataset, true).unwrap();
    let tree_roomy = learner_roomy.train(&gradients, &hessians, None).unwrap();
    let tree_cramped = learner_cramped.train(&gradients, &hessians, None).unwrap();

    assert_eq!(tree_roomy.num_leaves(), tree_cramped.num_leaves());
    for node in 0..tree_roomy.num_leaves() - 1 {
        assert_eq!(tree_roomy.split_feature(node), tree_cramped.split_feature(node));
    }
    for leaf in 0..tree_roomy.num_leaves() {
        assert_eq!(tree_roomy.leaf_count(leaf), tree_cramped.leaf_count(leaf));
        assert!((tree_roomy.leaf_output(leaf) - tree_cramped.leaf_output(leaf)).abs() < 1e-9);
    }
}

#[test]
fn scenario_e_forced_split_aborts_on_negative_gain() {
    let f0 = vec![1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0];
    let f1 = vec![1.0, 2.0, 1.0, 2.0, 1.0, 1.0, 2.0, 2.0];
    let (dataset, _rows) = dataset_from_columns(&[f0, f1], &[]);
    let config = ConfigBuilder::new()
        .num_leaves(4)
        .min_data_in_leaf(1)
        .min_sum_hessian_in_leaf(0.0)
        .min_split_gain(0.1)
        .build()
        .unwrap();
    let mut learner = SerialTreeLearner::new(config, &dataset, true).unwrap();
    // The left child after the root split is pure, so the forced child
    // split cannot clear the minimum gain.
    let gradients = vec![-1.0f32, -1.0, -1.0, -1.0, 1.0, 1.0, 3.0, 3.0];
    let hessians = vec![1.0f32; 8];
    let template = ForcedSplit::from_json(
        r#"{"feature": 0, "threshold": 1.5,
            "left": {"feature": 1, "threshold": 1.5}}"#,
    )
    .unwrap();
    let tree = learner.train(&gradients, &hessians, Some(&template)).unwrap();

    // Root forced split applied, template aborted, free growth split the
    // right child on feature 1.
    assert_eq!(tree.num_leaves(), 3);
    assert_eq!(tree.split_feature(0), 0);
    assert_eq!(tree.split_feature(1), 1);
    assert!((tree.predict(&[1.0, 1.0]) + 1.0).abs() < 1e-9);
    assert!((tree.predict(&[2.0, 1.0]) - 1.0).abs() < 1e-9);
    assert!((tree.predict(&[2.0, 2.0]) - 3.0).abs() < 1e-9);
}

#[test]
fn forced_split_template_fully_applied_when_gains_allow() {
    let f0 = vec![1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0];
    let f1 = vec![1.0, 1.0, 2.0, 2.0, 1.0, 1.0, 2.0, 2.0];
    let (dataset, _rows) = dataset_from_columns(&[f0, f1], &[]);
    let config = ConfigBuilder::new()
        .num_leaves(4)
        .min_data_in_leaf(1)
        .min_sum_hessian_in_leaf(0.0)
        .build()
        .unwrap();
    let mut learner = SerialTreeLearner::new(config, &dataset, true).unwrap();
    let gradients = vec![-2.0f32, -2.0, -1.0, -1.0, 1.0, 1.0, 2.0, 2.0];
    let hessians = vec![1.0f32; 8];
    let template = ForcedSplit::from_json(
        r#"{"feature": 0, "threshold": 1.5,
            "left": {"feature": 1, "threshold": 1.5},
            "right": {"feature": 1, "threshold": 1.5}}"#,
    )
    .unwrap();
    let tree = learner.train(&gradients, &hessians, Some(&template)).unwrap();

    assert_eq!(tree.num_leaves(), 4);
    assert_eq!(tree.split_feature(0), 0);
    assert!((tree.predict(&[1.0, 1.0]) + 2.0).abs() < 1e-9);
    assert!((tree.predict(&[1.0, 2.0]) + 1.0).abs() < 1e-9);
    assert!((tree.predict(&[2.0, 1.0]) - 1.0).abs() < 1e-9);
    assert!((tree.predict(&[2.0, 2.0]) - 2.0).abs() < 1e-9);
}

#[test]
fn scenario_f_monotone_constraint_redirects_split() {
    // Feature 0 is monotone increasing but its only split would produce a
    // decreasing step; feature 1 carries the same information without a
    // constraint.
    let f0 = vec![1.0, 1.0, 2.0, 2.0];
    let f1 = vec![5.0, 5.0, 9.0, 9.0];
    let (dataset, _rows) = dataset_from_columns(&[f0, f1], &[]);
    let config = ConfigBuilder::new()
        .num_leaves(2)
        .min_data_in_leaf(1)
        .min_sum_hessian_in_leaf(0.0)
        .monotone_constraints(vec![1, 0])
        .build()
        .unwrap();
    let mut learner = SerialTreeLearner::new(config, &dataset, true).unwrap();
    let gradients = vec![1.0f32, 1.0, -1.0, -1.0];
    let hessians = vec![1.0f32; 4];
    let tree = learner.train(&gradients, &hessians, None).unwrap();

    assert_eq!(tree.num_leaves(), 2);
    assert_eq!(tree.split_feature(0), 1);
}

#[test]
fn monotone_constraint_blocks_growth_when_no_alternative() {
    let f0 = vec![1.0, 1.0, 2.0, 2.0];
    let (dataset, _rows) = dataset_from_columns(&[f0], &[]);
    let config = ConfigBuilder::new()
        .num_leaves(4)
        .min_data_in_leaf(1)
        .min_sum_hessian_in_leaf(0.0)
        .monotone_constraints(vec![1])
        .build()
        .unwrap();
    let mut learner = SerialTreeLearner::new(config, &dataset, true).unwrap();
    let gradients = vec![1.0f32, 1.0, -1.0, -1.0];
    let hessians = vec![1.0f32; 4];
    let tree = learner.train(&gradients, &hessians, None).unwrap();
    assert_eq!(tree.num_leaves(), 1);
}

#[test]
fn determinism_identical_runs_produce_identical_trees() {
    let (dataset, _rows, gradients, hessians) = larger_fixture();
    let config = ConfigBuilder::new()
        .num_leaves(8)
        .min_data_in_leaf(4)
        .feature_fraction(0.8)
        .feature_fraction_bynode(0.7)
        .feature_fraction_seed(11)
        .build()
        .unwrap();

    let mut first = SerialTreeLearner::new(config.clone(), &dataset, true).unwrap();
    let mut second = SerialTreeLearner::new(config, &dataset, true).unwrap();
    let tree_a = first.train(&gradients, &hessians, None).unwrap();
    let tree_b = second.train(&gradients, &hessians, None).unwrap();
    assert_eq!(tree_fingerprint(&tree_a), tree_fingerprint(&tree_b));
}

#[test]
fn constant_hessian_path_matches_general_path() {
    let (dataset, _rows, gradients, hessians) = larger_fixture();
    let config = ConfigBuilder::new()
        .num_leaves(6)
        .min_data_in_leaf(4)
        .build()
        .unwrap();
    let mut constant = SerialTreeLearner::new(config.clone(), &dataset, true).unwrap();
    let mut general = SerialTreeLearner::new(config, &dataset, false).unwrap();
    let tree_a = constant.train(&gradients, &hessians, None).unwrap();
    let tree_b = general.train(&gradients, &hessians, None).unwrap();
    assert_eq!(tree_fingerprint(&tree_a), tree_fingerprint(&tree_b));
}

#[test]
fn partition_counts_match_prediction_routing() {
    let (dataset, rows, gradients, hessians) = larger_fixture();
    let config = ConfigBuilder::new()
        .num_leaves(8)
        .min_data_in_leaf(4)
        .build()
        .unwrap();
    let mut learner = SerialTreeLearner::new(config, &dataset, true).unwrap();
    let tree = learner.train(&gradients, &hessians, None).unwrap();
    assert!(tree.num_leaves() > 1);

    let mut routed = vec![0i32; tree.num_leaves()];
    for row in &rows {
        routed[tree.predict_leaf_index(row)] += 1;
    }
    let mut total = 0;
    for leaf in 0..tree.num_leaves() {
        assert_eq!(routed[leaf], tree.leaf_count(leaf));
        total += routed[leaf];
    }
    assert_eq!(total, dataset.num_data());
}

#[test]
fn refit_with_zero_decay_reproduces_leaf_outputs() {
    let (dataset, _rows, gradients, hessians) = larger_fixture();
    let config = ConfigBuilder::new()
        .num_leaves(6)
        .min_data_in_leaf(4)
        .refit_decay_rate(0.0)
        .build()
        .unwrap();
    let mut learner = SerialTreeLearner::new(config, &dataset, true).unwrap();
    let tree = learner.train(&gradients, &hessians, None).unwrap();
    let refitted = learner.fit_by_existing_tree(&tree, &gradients, &hessians).unwrap();
    for leaf in 0..tree.num_leaves() {
        assert!((tree.leaf_output(leaf) - refitted.leaf_output(leaf)).abs() < 1e-6);
    }
}

#[test]
fn refit_with_full_decay_keeps_old_outputs() {
    let (dataset, _rows, gradients, hessians) = larger_fixture();
    let config = ConfigBuilder::new()
        .num_leaves(6)
        .min_data_in_leaf(4)
        .refit_decay_rate(1.0)
        .build()
        .unwrap();
    let mut learner = SerialTreeLearner::new(config, &dataset, true).unwrap();
    let tree = learner.train(&gradients, &hessians, None).unwrap();
    // Fresh gradients would move the outputs, but full decay pins them.
    let other_gradients: Vec<f32> = gradients.iter().map(|g| g * -2.0).collect();
    let refitted = learner
        .fit_by_existing_tree(&tree, &other_gradients, &hessians)
        .unwrap();
    for leaf in 0..tree.num_leaves() {
        assert!((tree.leaf_output(leaf) - refitted.leaf_output(leaf)).abs() < 1e-12);
    }
}

#[test]
fn tiny_feature_fraction_keeps_growth_possible() {
    let (dataset, _rows, gradients, hessians) = larger_fixture();
    let config = ConfigBuilder::new()
        .num_leaves(4)
        .min_data_in_leaf(4)
        .feature_fraction(1e-6)
        .build()
        .unwrap();
    let mut learner = SerialTreeLearner::new(config, &dataset, true).unwrap();
    let tree = learner.train(&gradients, &hessians, None).unwrap();
    assert!(tree.num_leaves() > 1);
}

#[test]
fn max_depth_limits_growth() {
    let (dataset, _rows, gradients, hessians) = larger_fixture();
    let config = ConfigBuilder::new()
        .num_leaves(32)
        .min_data_in_leaf(1)
        .max_depth(2)
        .build()
        .unwrap();
    let mut learner = SerialTreeLearner::new(config, &dataset, true).unwrap();
    let tree = learner.train(&gradients, &hessians, None).unwrap();
    assert!(tree.num_leaves() <= 4);
    for leaf in 0..tree.num_leaves() {
        assert!(tree.leaf_depth(leaf) <= 2);
    }
}

#[test]
fn categorical_feature_splits_by_subset() {
    // Category 7 carries the negative gradients.
    let f0 = vec![7.0, 7.0, 7.0, 3.0, 3.0, 11.0, 11.0, 11.0];
    let (dataset, _rows) = dataset_from_columns(&[f0], &[0]);
    let config = ConfigBuilder::new()
        .num_leaves(2)
        .min_data_in_leaf(1)
        .min_sum_hessian_in_leaf(0.0)
        .build()
        .unwrap();
    let mut learner = SerialTreeLearner::new(config, &dataset, true).unwrap();
    let gradients = vec![-1.0f32, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0, 1.0];
    let hessians = vec![1.0f32; 8];
    let tree = learner.train(&gradients, &hessians, None).unwrap();

    assert_eq!(tree.num_leaves(), 2);
    let leaf_of_seven = tree.predict_leaf_index(&[7.0]);
    assert_ne!(leaf_of_seven, tree.predict_leaf_index(&[3.0]));
    assert_eq!(tree.predict_leaf_index(&[3.0]), tree.predict_leaf_index(&[11.0]));
    assert!(tree.predict(&[7.0]) < tree.predict(&[3.0]));
}

#[test]
fn missing_values_follow_learned_default_direction() {
    let f0 = vec![
        1.0,
        1.0,
        1.0,
        2.0,
        2.0,
        2.0,
        f64::NAN,
        f64::NAN,
    ];
    let (dataset, _rows) = dataset_from_columns(&[f0], &[]);
    let config = ConfigBuilder::new()
        .num_leaves(2)
        .min_data_in_leaf(1)
        .min_sum_hessian_in_leaf(0.0)
        .build()
        .unwrap();
    let mut learner = SerialTreeLearner::new(config, &dataset, true).unwrap();
    // Missing rows share the sign of the high bin, so the better split
    // routes them right.
    let gradients = vec![-1.0f32, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0, 1.0];
    let hessians = vec![1.0f32; 8];
    let tree = learner.train(&gradients, &hessians, None).unwrap();

    assert_eq!(tree.num_leaves(), 2);
    assert_eq!(
        tree.predict_leaf_index(&[f64::NAN]),
        tree.predict_leaf_index(&[2.0])
    );
    let routed_low = tree.predict_leaf_index(&[1.0]);
    assert_eq!(tree.leaf_count(routed_low), 3);
}

#[test]
fn cost_penalty_discourages_second_feature() {
    // Feature 1 is slightly better unpenalized, but carries a heavy
    // first-use cost; the learner settles for feature 0.
    let f0 = vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0, 2.0];
    let f1 = vec![1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0];
    let (dataset, _rows) = dataset_from_columns(&[f0, f1], &[]);
    let config = ConfigBuilder::new()
        .num_leaves(2)
        .min_data_in_leaf(1)
        .min_sum_hessian_in_leaf(0.0)
        .cegb_penalty_feature_coupled(vec![0.0, 100.0])
        .build()
        .unwrap();
    let mut learner = SerialTreeLearner::new(config, &dataset, true).unwrap();
    let gradients = vec![-1.0f32, -1.0, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0];
    let hessians = vec![1.0f32; 8];
    let tree = learner.train(&gradients, &hessians, None).unwrap();

    assert_eq!(tree.num_leaves(), 2);
    assert_eq!(tree.split_feature(0), 0);
}

#[test]
fn reset_config_changes_take_effect() -> anyhow::Result<()> {
    let (dataset, _rows, gradients, hessians) = larger_fixture();
    let config = ConfigBuilder::new()
        .num_leaves(8)
        .min_data_in_leaf(4)
        .build()?;
    let mut learner = SerialTreeLearner::new(config, &dataset, true)?;
    let wide = learner.train(&gradients, &hessians, None)?;
    assert!(wide.num_leaves() > 2);

    let narrow_config = ConfigBuilder::new()
        .num_leaves(2)
        .min_data_in_leaf(4)
        .build()?;
    learner.reset_config(narrow_config)?;
    let narrow = learner.train(&gradients, &hessians, None)?;
    assert_eq!(narrow.num_leaves(), 2);
    Ok(())
}
