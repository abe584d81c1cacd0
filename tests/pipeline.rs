use std::fs;
use std::path::Path;

use lineage_fitness::app::pipeline::{run_fit, run_simulate};
use lineage_fitness::data::generate_dataset;
use lineage_fitness::domain::{FailurePolicy, FitConfig, PriorKind, SimulateConfig};
use lineage_fitness::error::FitError;
use lineage_fitness::fit::{estimate_map, reconstruct, EstimatorOptions, FitnessModel, FitnessPrior};
use lineage_fitness::io::{read_collected_fitness, read_summary_json, RunLayout};

const FITNESS: [f64; 4] = [0.0, 0.04, -0.02, 0.01];

fn simulate_config(depth: f64, replicates: usize, seed: u64) -> SimulateConfig {
    SimulateConfig {
        ids: vec!["ref".into(), "a".into(), "b".into(), "c".into()],
        f0: vec![0.7, 0.1, 0.1, 0.1],
        fitness: FITNESS.to_vec(),
        times: vec![0.0, 7.0, 14.0, 21.0, 28.0],
        depth,
        replicates,
        seed,
    }
}

fn fit_config(input: &Path, output: &Path) -> FitConfig {
    FitConfig {
        input_dir: input.to_path_buf(),
        output_dir: output.to_path_buf(),
        output: "LTEE".into(),
        population: "pop1".into(),
        environment: "gluL".into(),
        replicates: 3,
        s_ref: 0.0,
        prior: PriorKind::Flat,
        prior_values: None,
        groups: Vec::new(),
        other_label: "else".into(),
        reconstruct: true,
        max_days: 5,
        gens_per_day: 7.0,
        failure_policy: FailurePolicy::Abort,
        estimator: EstimatorOptions::default(),
    }
}

fn simulate_inputs(dir: &Path) {
    run_simulate(&simulate_config(2e4, 3, 3), dir, "LTEE_pop1_gluL").unwrap();
}

#[test]
fn simulated_run_recovers_fitness_and_writes_every_output() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    simulate_inputs(&input);

    let config = fit_config(&input, &output);
    let run = run_fit(&config).unwrap();
    assert_eq!(run.batch.fits.len(), 3);
    assert!(run.batch.gaps.is_empty());

    let layout = RunLayout::from_config(&config);
    let collected = read_collected_fitness(&layout.collected()).unwrap();
    assert_eq!(collected.ids, vec!["ref", "a", "b", "c"]);
    assert_eq!(collected.replicate_labels, vec!["s_1", "s_2", "s_3"]);
    assert_eq!(collected.stats[0].mean, 0.0);
    assert_eq!(collected.stats[0].sd, 0.0);
    for (stats, truth) in collected.stats.iter().zip(FITNESS).skip(1) {
        assert!((stats.mean - truth).abs() < 0.01, "{} vs {truth}", stats.mean);
    }

    let map = fs::read_to_string(layout.map_estimate(2)).unwrap();
    let mut lines = map.lines();
    assert_eq!(lines.next(), Some("BC,s"));
    assert_eq!(lines.next(), Some("ref,0.0000000000"));
    assert_eq!(lines.count(), 3);

    let recon = fs::read_to_string(layout.reconstructed(1)).unwrap();
    assert_eq!(recon.lines().next(), Some("BC,0,7,14,21,28,35"));

    let summary = read_summary_json(&layout.summary()).unwrap();
    assert_eq!(summary.replicates.len(), 3);
    assert_eq!(summary.lineages.len(), 4);
}

#[test]
fn grouping_pools_the_remaining_lineages() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    simulate_inputs(&input);

    let mut config = fit_config(&input, &output);
    config.groups = vec!["ref".into(), "a".into()];
    config.reconstruct = false;
    let run = run_fit(&config).unwrap();
    assert_eq!(run.table.ids().collect::<Vec<_>>(), vec!["ref", "a", "else"]);

    let layout = RunLayout::from_config(&config);
    let condensed = fs::read_to_string(layout.condensed(1)).unwrap();
    assert!(condensed.starts_with("BC,0,7,14,21,28\n"));
    assert!(condensed.lines().nth(3).unwrap().starts_with("else,"));
    assert!(!layout.reconstructed(1).exists());
}

#[test]
fn failure_policy_controls_partial_results() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("in");
    simulate_inputs(&input);
    // Replicate 2 loses every read at the second time point.
    fs::write(
        input.join("LTEE_pop1_gluL_2.csv"),
        "BC,0,7,14,21,28\nref,700,0,650,600,560\na,100,0,130,170,210\nb,100,0,80,70,60\nc,100,0,105,110,115\n",
    )
    .unwrap();

    let abort_out = tmp.path().join("abort");
    let err = run_fit(&fit_config(&input, &abort_out)).unwrap_err();
    match &err {
        FitError::Replicate { replicate, .. } => assert_eq!(*replicate, 2),
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(err.exit_code(), 3);
    assert!(!abort_out.exists());

    let skip_out = tmp.path().join("skip");
    let mut config = fit_config(&input, &skip_out);
    config.failure_policy = FailurePolicy::Skip;
    let layout = RunLayout::from_config(&config);
    fs::create_dir_all(&skip_out).unwrap();
    fs::write(layout.map_estimate(2), "BC,s\nref,0.0\n").unwrap();

    let run = run_fit(&config).unwrap();
    assert_eq!(run.batch.gaps.len(), 1);
    assert_eq!(run.batch.gaps[0].replicate, 2);
    assert!(!layout.map_estimate(2).exists());
    assert!(layout.map_estimate(1).exists());
    let leftovers: Vec<_> = fs::read_dir(&skip_out)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "tmp"))
        .collect();
    assert!(leftovers.is_empty());

    let collected = read_collected_fitness(&RunLayout::from_config(&config).collected()).unwrap();
    assert!(collected.values.iter().all(|row| row[1].is_none()));
    assert!(collected.values.iter().all(|row| row[0].is_some() && row[2].is_some()));
}

#[test]
fn fixed_values_prior_is_read_from_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("in");
    simulate_inputs(&input);
    let prior_path = tmp.path().join("prior.csv");

    let mut config = fit_config(&input, &tmp.path().join("out"));
    config.prior = PriorKind::FixedValues;
    config.prior_values = Some(prior_path.clone());

    fs::write(&prior_path, "BC,mean,sd\na,0.04,0.05\nb,-0.02,0.05\nc,0.01,0.05\n").unwrap();
    let run = run_fit(&config).unwrap();
    assert_eq!(run.batch.fits.len(), 3);

    fs::write(&prior_path, "BC,mean,sd\na,0.04,0.05\n").unwrap();
    let err = run_fit(&config).unwrap_err();
    assert!(matches!(err, FitError::Replicate { ref source, .. } if matches!(**source, FitError::InvalidPrior(_))));

    config.prior = PriorKind::Flat;
    assert!(matches!(run_fit(&config), Err(FitError::InvalidPrior(_))));
}

#[test]
fn missing_inputs_are_io_errors() {
    let tmp = tempfile::tempdir().unwrap();
    let err = run_fit(&fit_config(tmp.path(), &tmp.path().join("out"))).unwrap_err();
    assert!(matches!(err, FitError::Io { .. }));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn reconstruction_error_shrinks_with_depth() {
    let mean_error = |depth: f64| {
        let mut total = 0.0;
        for seed in 0..3 {
            let data = generate_dataset(&simulate_config(depth, 1, seed)).unwrap();
            let model = FitnessModel::new(data.table.clone(), 0.0, FitnessPrior::Flat).unwrap();
            let estimate = estimate_map(&model, &EstimatorOptions::default()).unwrap();
            let recon = reconstruct(&model, &estimate, 0, None).unwrap();
            let worst = recon
                .predicted
                .iter()
                .zip(&data.frequencies)
                .flat_map(|(p, q)| p.iter().zip(q).map(|(a, b)| (a - b).abs()))
                .fold(0.0, f64::max);
            total += worst;
        }
        total / 3.0
    };

    let coarse = mean_error(1e3);
    let fine = mean_error(1e6);
    assert!(fine < coarse, "fine {fine} vs coarse {coarse}");
    assert!(fine < 1e-3, "fine-depth error {fine}");
}
