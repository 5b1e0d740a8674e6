use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tombstone_ctc::ctc::{
    compute_denominators, compute_objective, generate_transition_model, random_nnet_output,
    CtcHmm, DenominatorComputation, DenseMatrix, GeneratorConfig, TrainingOptions,
};

fn trigram_config() -> GeneratorConfig {
    GeneratorConfig {
        min_phones: 6,
        max_phones: 6,
        max_left_context: 2,
        max_context_groups: 4,
    }
}

fn bench_forward_backward(c: &mut Criterion) {
    let mut group = c.benchmark_group("forward_backward");
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let model = generate_transition_model(&mut rng, &trigram_config()).unwrap();
    let weights = model.compute_weights();
    let hmm = CtcHmm::new(&model).unwrap();

    for &(num_sequences, num_time_steps) in &[(1, 200), (8, 200), (32, 100)] {
        let rows = num_sequences * num_time_steps;
        let mut exp_nnet_output: Array2<f64> =
            random_nnet_output(&mut rng, rows, model.num_output_indexes());
        exp_nnet_output.apply_exp();
        let denominators = compute_denominators(&exp_nnet_output, &weights).unwrap();

        group.bench_with_input(
            BenchmarkId::new("sequences_x_frames", format!("{}x{}", num_sequences, num_time_steps)),
            &num_sequences,
            |b, &n| {
                b.iter(|| {
                    let mut computation = DenominatorComputation::new(
                        &model,
                        &weights,
                        &hmm,
                        &exp_nnet_output,
                        &denominators,
                        n,
                    )
                    .unwrap();
                    let logprob = computation.forward().unwrap();
                    let mut nnet_output_deriv =
                        Array2::<f64>::allocate(rows, model.num_output_indexes());
                    let mut denominators_deriv =
                        Array2::<f64>::allocate(rows, model.num_history_states());
                    computation
                        .backward(&mut nnet_output_deriv, &mut denominators_deriv)
                        .unwrap();
                    black_box(logprob)
                })
            },
        );
    }

    group.finish();
}

fn bench_objective(c: &mut Criterion) {
    let mut group = c.benchmark_group("objective");
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let model = generate_transition_model(&mut rng, &trigram_config()).unwrap();
    let weights = model.compute_weights();
    let hmm = CtcHmm::new(&model).unwrap();
    let nnet_output: Array2<f64> = random_nnet_output(&mut rng, 16 * 150, model.num_output_indexes());
    let opts = TrainingOptions::default();

    group.bench_function("16x150", |b| {
        b.iter(|| compute_objective(&model, &weights, &hmm, black_box(&nnet_output), 16, &opts))
    });

    group.finish();
}

criterion_group!(benches, bench_forward_backward, bench_objective);
criterion_main!(benches);
