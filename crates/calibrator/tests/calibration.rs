use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use quantcal_calibrator::{
    executor::CalibrationExecutor, CalibrationError, CalibrationMethod, CalibrationOptions,
    Calibrator, Diagnostic, ExecutionMode, FunctionLibrary, RepresentativeDataset,
    RepresentativeDatasetOrMapping, Sample,
};
use quantcal_core::{
    bundle::{load_bundle, save_bundle, BundleSaveError, BundleWriter},
    dim::Dimension,
    model::Model,
    node::Node,
    op::{CustomAggregator, DumpTensor, Op},
    signature::{SignatureDef, TensorSpec},
    tensor::{Tensor, TensorElemType, TypedShape},
    transform::dump_tensor::QUANTIZED_TENSOR_DATA,
};
use quantcal_session::SessionError;
use quantcal_session_interpreter::{InterpreterSessionBuilder, InterpreterSessionLoader};
use rustc_hash::FxHashMap;

const SERVING: &str = "serving_default";

/// x -> agg_a -> relu -> y, and c (constant) -> agg_b -> side, reachable only from "aux".
fn model() -> Model {
    let mut m = Model::default();
    let x = m.graph.values.new_val_named("x");
    let a_out = m.graph.values.new_val_named("a_out");
    let y = m.graph.values.new_val_named("y");
    let c = m.graph.values.new_val_named("c");
    let side = m.graph.values.new_val_named("side");
    let dumped = m.graph.values.new_val_named("dumped");

    m.graph
        .inits
        .insert(c, Tensor::new(vec![2].into(), vec![-1.5f32, 0.25]));
    m.graph.add_node(
        Node::new(Op::CustomAggregator(CustomAggregator::default()))
            .with_name("agg_a")
            .with_in(x)
            .with_out(a_out),
    );
    m.graph
        .add_node(Node::new(Op::ReLU).with_name("relu").with_in(a_out).with_out(y));
    m.graph.add_node(
        Node::new(Op::CustomAggregator(CustomAggregator::default()))
            .with_name("agg_b")
            .with_in(c)
            .with_out(side),
    );
    m.graph.add_node(
        Node::new(Op::DumpTensor(DumpTensor {
            file_name: "unquantized_tensor_data.pb".into(),
            log_dir_path: "/tmp/quantcal/relu".into(),
            func_name: "composite_relu_fn_1".into(),
            node_name: "relu".into(),
            ..Default::default()
        }))
        .with_name("dump")
        .with_in(y)
        .with_out(dumped),
    );

    let row = TypedShape::new(
        vec![Dimension::Dynamic("batch".into()), Dimension::Fixed(2)],
        TensorElemType::F32,
    );
    m.graph.inputs.push(x);
    m.graph.outputs.push(y);
    m.signatures.insert(
        SERVING.into(),
        SignatureDef::default()
            .with_input("x", TensorSpec::new("x", row.clone()))
            .with_output("y", TensorSpec::new("y", row)),
    );
    m.signatures.insert(
        "aux".into(),
        SignatureDef::default().with_output(
            "side",
            TensorSpec::new("side", TypedShape::fixed(&[2], TensorElemType::F32)),
        ),
    );
    m.tags.insert("serve".into());
    m
}

fn calibrator() -> Calibrator<InterpreterSessionLoader> {
    Calibrator::new(InterpreterSessionLoader::new())
}

/// Assigns ids and saves the result as the bundle calibration executes.
fn prepare(dir: &Path) -> (Model, PathBuf) {
    let _ = env_logger::builder().is_test(true).try_init();
    let m = calibrator()
        .assign_ids_to_custom_aggregator_ops(&model())
        .unwrap();
    let path = dir.join("instrumented");
    save_bundle(&path, &m, dir, &m.tags, &m.signatures).unwrap();
    (m, path)
}

fn rows(rows: &[&[f32]]) -> RepresentativeDataset<'static> {
    RepresentativeDataset::from_samples(
        rows.iter()
            .map(|r| {
                let mut s = Sample::default();
                s.insert("x".into(), Tensor::new(vec![1, r.len()].into(), r.to_vec()));
                s
            })
            .collect::<Vec<_>>(),
    )
}

fn aggregator(m: &Model, name: &str) -> CustomAggregator {
    let id = m.graph.node_by_name(name).unwrap();
    m.graph.nodes[id].op.as_aggregator().unwrap().clone()
}

fn serving() -> Vec<String> {
    vec![SERVING.to_string()]
}

#[test]
fn calibrates_reachable_aggregators() {
    let dir = tempfile::tempdir().unwrap();
    let (m, path) = prepare(dir.path());

    let calibrated = calibrator()
        .run_calibration(
            &path,
            &serving(),
            &m.tags,
            &m,
            &CalibrationOptions::default(),
            false,
            rows(&[&[1.0, 5.0], &[-2.0, 3.0], &[0.0, 0.0]]).into(),
        )
        .unwrap();

    let a = aggregator(&calibrated.model, "agg_a");
    assert_eq!((a.min, a.max), (Some(-2.0), Some(5.0)));
    let b = aggregator(&calibrated.model, "agg_b");
    assert_eq!((b.min, b.max), (None, None));
    assert_eq!(
        calibrated.diagnostics,
        vec![Diagnostic::MissingStatistics {
            id: b.id,
            node_name: "agg_b".into()
        }]
    );

    // The input model is never touched.
    assert_eq!(aggregator(&m, "agg_a").min, None);
}

#[test]
fn graph_mode_matches_per_example_mode() {
    let dir = tempfile::tempdir().unwrap();
    let (m, path) = prepare(dir.path());
    let data: &[&[f32]] = &[&[1.0, 5.0], &[-2.0, 3.0], &[0.0, 0.0], &[0.5, -0.5], &[4.0, 4.5]];

    let run = |force_graph_mode, batch_size| {
        calibrator()
            .run_calibration(
                &path,
                &serving(),
                &m.tags,
                &m,
                &CalibrationOptions::default().with_batch_size(batch_size),
                force_graph_mode,
                rows(data).into(),
            )
            .unwrap()
    };
    let per_example = aggregator(&run(false, 1).model, "agg_a");
    let graph = aggregator(&run(true, 2).model, "agg_a");
    assert_eq!(per_example, graph);
    assert_eq!((graph.min, graph.max), (Some(-2.0), Some(5.0)));
}

#[test]
fn dataset_per_signature() {
    let dir = tempfile::tempdir().unwrap();
    let (m, path) = prepare(dir.path());

    let mut mapping = FxHashMap::default();
    mapping.insert(SERVING.to_string(), rows(&[&[3.0, -1.0]]));
    mapping.insert(
        "aux".to_string(),
        RepresentativeDataset::from_samples(vec![Sample::default()]),
    );
    let calibrated = calibrator()
        .run_calibration(
            &path,
            &[SERVING.to_string(), "aux".to_string()],
            &m.tags,
            &m,
            &CalibrationOptions::default(),
            false,
            RepresentativeDatasetOrMapping::Mapping(mapping),
        )
        .unwrap();

    assert!(calibrated.diagnostics.is_empty());
    let a = aggregator(&calibrated.model, "agg_a");
    assert_eq!((a.min, a.max), (Some(-1.0), Some(3.0)));
    let b = aggregator(&calibrated.model, "agg_b");
    assert_eq!((b.min, b.max), (Some(-1.5), Some(0.25)));
}

#[test]
fn empty_dataset_leaves_model_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let (m, path) = prepare(dir.path());

    let calibrated = calibrator()
        .run_calibration(
            &path,
            &serving(),
            &m.tags,
            &m,
            &CalibrationOptions::default(),
            true,
            RepresentativeDataset::empty().into(),
        )
        .unwrap();

    for name in ["agg_a", "agg_b"] {
        assert_eq!(aggregator(&calibrated.model, name), aggregator(&m, name));
    }
    assert_eq!(calibrated.diagnostics.len(), 2);
}

#[test]
fn failing_batch_aborts_calibration() {
    let dir = tempfile::tempdir().unwrap();
    let (m, path) = prepare(dir.path());

    let err = calibrator()
        .run_calibration(
            &path,
            &serving(),
            &m.tags,
            &m,
            &CalibrationOptions::default(),
            false,
            rows(&[&[1.0, 5.0], &[1.0, 2.0, 3.0]]).into(),
        )
        .unwrap_err();

    assert!(matches!(
        err,
        CalibrationError::Execution(SessionError::Shape { .. })
    ));
    assert!(!err.is_precondition_violation());
    assert_eq!(aggregator(&m, "agg_a").min, None);
}

#[test]
fn preconditions() {
    let dir = tempfile::tempdir().unwrap();
    let (m, path) = prepare(dir.path());
    let options = CalibrationOptions::default();
    let calibrate = |keys: &[String], model: &Model, options: &CalibrationOptions| {
        calibrator()
            .run_calibration(
                &path,
                keys,
                &m.tags,
                model,
                options,
                false,
                rows(&[&[1.0, 1.0]]).into(),
            )
            .unwrap_err()
    };

    assert!(matches!(
        calibrate(&[], &m, &options),
        CalibrationError::NoSignatureKeys
    ));
    assert!(matches!(
        calibrate(&["train".to_string()], &m, &options),
        CalibrationError::UnknownSignature(_)
    ));
    assert!(matches!(
        calibrate(&serving(), &model(), &options),
        CalibrationError::MissingAggregatorId(name) if name == "agg_a"
    ));
    assert!(calibrate(&serving(), &m, &options.clone().with_batch_size(0))
        .is_precondition_violation());
    assert!(matches!(
        calibrate(
            &serving(),
            &m,
            &CalibrationOptions::new(CalibrationMethod::HistogramPercentile)
                .with_num_bins(1 << 20),
        ),
        CalibrationError::InvalidOptions(_)
    ));
}

#[test]
fn unreachable_aggregator_without_id_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (mut m, path) = prepare(dir.path());
    let agg_b = m.graph.node_by_name("agg_b").unwrap();
    m.graph.nodes[agg_b].op.as_aggregator_mut().unwrap().id.clear();

    let err = calibrator()
        .run_calibration(
            &path,
            &serving(),
            &m.tags,
            &m,
            &CalibrationOptions::default(),
            false,
            rows(&[&[1.0, 2.0]]).into(),
        )
        .unwrap_err();
    assert!(err.is_precondition_violation());
    assert!(matches!(err, CalibrationError::MissingAggregatorId(name) if name == "agg_b"));
}

#[test]
fn repeated_signature_keys_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (m, path) = prepare(dir.path());
    let mut mapping = FxHashMap::default();
    mapping.insert(SERVING.to_string(), rows(&[&[1.0, 2.0]]));

    let err = calibrator()
        .run_calibration(
            &path,
            &[SERVING.to_string(), SERVING.to_string()],
            &m.tags,
            &m,
            &CalibrationOptions::default(),
            false,
            RepresentativeDatasetOrMapping::Mapping(mapping),
        )
        .unwrap_err();
    assert!(err.is_precondition_violation());
    assert!(matches!(err, CalibrationError::DuplicateSignatureKey(key) if key == SERVING));
}

#[test]
fn parallel_matches_sequential() {
    let m = calibrator()
        .assign_ids_to_custom_aggregator_ops(&model())
        .unwrap();
    let session = InterpreterSessionBuilder::new(m.clone()).build();

    Tensor::seed_rng_from_u64(17);
    let samples = (0..40)
        .map(|_| {
            let mut s = Sample::default();
            s.insert("x".into(), Tensor::rand_range(vec![1, 2].into(), -8.0, 8.0));
            s
        })
        .collect::<Vec<_>>();

    let options = CalibrationOptions::new(CalibrationMethod::HistogramPercentile)
        .with_num_bins(128)
        .with_batch_size(4);
    let exec = CalibrationExecutor::new(&m, &session, &options);
    let seq = exec
        .run(
            SERVING,
            RepresentativeDataset::from_samples(samples.clone()),
            ExecutionMode::Graph,
        )
        .unwrap();
    let par = exec
        .run_parallel(
            SERVING,
            RepresentativeDataset::from_samples(samples),
            ExecutionMode::Graph,
        )
        .unwrap();

    let id = aggregator(&m, "agg_a").id;
    assert_eq!(seq.get(&id), par.get(&id));
    assert_eq!(seq.finalize(&id).unwrap(), par.finalize(&id).unwrap());
}

#[test]
fn dump_toggles() {
    let lib = calibrator();
    let m = model();
    let enabled = lib.enable_dump_tensor(&m);
    let redirected = lib.change_dump_tensor_file_name(&enabled);
    let dump = |m: &Model| {
        let id = m.graph.node_by_name("dump").unwrap();
        match &m.graph.nodes[id].op {
            Op::DumpTensor(d) => d.clone(),
            _ => unreachable!(),
        }
    };

    assert!(!dump(&m).enabled);
    assert!(dump(&enabled).enabled);
    assert_eq!(dump(&redirected).file_name, QUANTIZED_TENSOR_DATA);
    assert_eq!(
        dump(&lib.enable_dump_tensor(&lib.change_dump_tensor_file_name(&m))),
        dump(&redirected)
    );
}

#[test]
fn export_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (m, path) = prepare(dir.path());
    let lib = calibrator();
    let calibrated = lib
        .run_calibration(
            &path,
            &serving(),
            &m.tags,
            &m,
            &CalibrationOptions::default(),
            false,
            rows(&[&[-0.5, 2.0]]).into(),
        )
        .unwrap()
        .model;

    let dst = dir.path().join("exported");
    lib.save_exported_model(&dst, &calibrated, dir.path(), &m.tags, &m.signatures)
        .unwrap();

    let loaded = load_bundle(&dst).unwrap();
    assert_eq!(loaded.tags, m.tags);
    let a = aggregator(&loaded, "agg_a");
    assert_eq!((a.min, a.max), (Some(-0.5), Some(2.0)));
    assert_eq!(a.id, aggregator(&m, "agg_a").id);

    // A second export into the now populated destination fails and leaves it as it was.
    let err = lib
        .save_exported_model(&dst, &m, dir.path(), &m.tags, &m.signatures)
        .unwrap_err();
    assert!(matches!(
        err,
        CalibrationError::Export(BundleSaveError::DestinationExists(_))
    ));
    assert_eq!(aggregator(&load_bundle(&dst).unwrap(), "agg_a").max, Some(2.0));
}

struct FailingWriter;

impl BundleWriter for FailingWriter {
    fn write(
        &self,
        _dst: &Path,
        _model: &Model,
        _src: &Path,
        _tags: &BTreeSet<String>,
        _signatures: &BTreeMap<String, SignatureDef>,
    ) -> Result<(), BundleSaveError> {
        Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only").into())
    }
}

#[test]
fn export_failures_propagate() {
    let lib = calibrator().with_writer(FailingWriter);
    let m = lib.assign_ids_to_custom_aggregator_ops(&model()).unwrap();
    let err = lib
        .save_exported_model(Path::new("out"), &m, Path::new("."), &m.tags, &m.signatures)
        .unwrap_err();
    assert!(matches!(err, CalibrationError::Export(BundleSaveError::Io(_))));

    // Aggregators without ids never reach the writer.
    let err = lib
        .save_exported_model(Path::new("out"), &model(), Path::new("."), &m.tags, &m.signatures)
        .unwrap_err();
    assert!(matches!(err, CalibrationError::MissingAggregatorId(_)));
}
