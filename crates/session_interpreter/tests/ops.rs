use std::collections::BTreeSet;

use prost::Message;
use quantcal_core::{
    bundle::{proto::TensorProto, save_bundle},
    dim::Dimension,
    model::Model,
    node::Node,
    op::{CustomAggregator, DumpTensor, Op, Softmax},
    signature::{SignatureDef, TensorSpec},
    tensor::{Tensor, TensorElemType, TypedShape},
};
use quantcal_session::{Feeds, Session, SessionError, SessionLoader};
use quantcal_session_interpreter::{InterpreterSessionBuilder, InterpreterSessionLoader};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

/// x[batch, 2] -> agg -> matmul(w) -> add(b) -> relu -> softmax(axis=1) -> y
fn mlp(dump_dir: Option<&std::path::Path>) -> Model {
    let mut m = Model::default();
    let x = m.graph.values.new_val_named("x");
    let w = m.graph.values.new_val_named("w");
    let b = m.graph.values.new_val_named("b");
    let agg_out = m.graph.values.new_val_named("agg_out");
    let mm = m.graph.values.new_val_named("mm");
    let biased = m.graph.values.new_val_named("biased");
    let relu = m.graph.values.new_val_named("relu");
    let y = m.graph.values.new_val_named("y");

    m.graph
        .inits
        .insert(w, Tensor::new(vec![2, 2].into(), vec![1.0f32, -1.0, 2.0, 0.5]));
    m.graph
        .inits
        .insert(b, Tensor::new(vec![2].into(), vec![0.5f32, -0.5]));

    m.graph.add_node(
        Node::new(Op::CustomAggregator(CustomAggregator {
            id: "agg".into(),
            ..Default::default()
        }))
        .with_name("agg")
        .with_in(x)
        .with_out(agg_out),
    );
    m.graph
        .add_node(Node::new(Op::MatMul).with_name("matmul").with_ins(vec![agg_out, w]).with_out(mm));
    m.graph
        .add_node(Node::new(Op::Add).with_name("add").with_ins(vec![mm, b]).with_out(biased));
    m.graph
        .add_node(Node::new(Op::ReLU).with_name("relu").with_in(biased).with_out(relu));
    m.graph.add_node(
        Node::new(Op::Softmax(Softmax { axis: 1 }))
            .with_name("softmax")
            .with_in(relu)
            .with_out(y),
    );
    if let Some(dir) = dump_dir {
        let dumped = m.graph.values.new_val_named("dumped");
        m.graph.add_node(
            Node::new(Op::DumpTensor(DumpTensor {
                enabled: true,
                file_name: "unquantized_tensor_data.pb".into(),
                log_dir_path: dir.display().to_string(),
                func_name: "composite_matmul_fn_1".into(),
                node_name: "matmul".into(),
            }))
            .with_name("dump")
            .with_in(mm)
            .with_out(dumped),
        );
    }

    m.graph.inputs.push(x);
    m.graph.outputs.push(y);
    m.signatures.insert(
        "serving_default".into(),
        SignatureDef::default()
            .with_input(
                "x",
                TensorSpec::new(
                    "x",
                    TypedShape::new(
                        vec![Dimension::Dynamic("batch".into()), Dimension::Fixed(2)],
                        TensorElemType::F32,
                    ),
                ),
            )
            .with_output(
                "y",
                TensorSpec::new(
                    "y",
                    TypedShape::new(
                        vec![Dimension::Dynamic("batch".into()), Dimension::Fixed(2)],
                        TensorElemType::F32,
                    ),
                ),
            ),
    );
    m.tags.insert("serve".into());
    m
}

fn feeds(x: Vec<f32>) -> Feeds {
    let rows = x.len() / 2;
    let mut feeds = Feeds::default();
    feeds.insert("x".into(), Tensor::new(vec![rows, 2].into(), x));
    feeds
}

#[test]
fn forward() {
    let _ = env_logger::builder().is_test(true).try_init();

    let sess = InterpreterSessionBuilder::new(mlp(None))
        .with_profiling_enabled(true)
        .build();
    let out = sess
        .run("serving_default", &feeds(vec![1.0, 2.0, -1.0, 0.0]), &["mm", "relu", "y"])
        .unwrap();

    // [1, 2] x w = [5, 0], [-1, 0] x w = [-1, 1]
    assert!(out[0].allclose(&[5.0f32, 0.0, -1.0, 1.0]));
    assert!(out[1].allclose(&[5.5f32, 0.0, 0.0, 0.5]));
    let e = (-5.5f32).exp();
    let e2 = (-0.5f32).exp();
    assert!(out[2].allclose(&[1. / (1. + e), e / (1. + e), e2 / (1. + e2), 1. / (1. + e2)]));
}

#[test]
fn fetching_an_aggregator_input_skips_the_rest() {
    let sess = InterpreterSessionBuilder::new(mlp(None)).build();
    let out = sess
        .run("serving_default", &feeds(vec![3.0, -4.0]), &["x", "agg_out"])
        .unwrap();
    assert!(out[0].allclose(&[3.0f32, -4.0]));
    assert_eq!(out[0], out[1]);
}

#[test]
fn shape_mismatch() {
    let sess = InterpreterSessionBuilder::new(mlp(None)).build();
    let mut f = Feeds::default();
    f.insert("x".into(), Tensor::zeros::<f32>(vec![1, 3].into()));
    assert!(matches!(
        sess.run("serving_default", &f, &["y"]),
        Err(SessionError::Shape { .. })
    ));

    let mut f = Feeds::default();
    f.insert("x".into(), Tensor::zeros::<i64>(vec![1, 2].into()));
    assert!(matches!(
        sess.run("serving_default", &f, &["y"]),
        Err(SessionError::Shape { .. })
    ));
}

#[test]
fn unknown_signature_and_inputs() {
    let sess = InterpreterSessionBuilder::new(mlp(None)).build();
    assert!(matches!(
        sess.run("train", &feeds(vec![0.0, 0.0]), &["y"]),
        Err(SessionError::UnknownSignature(_))
    ));

    let mut f = feeds(vec![0.0, 0.0]);
    f.insert("z".into(), Tensor::zeros::<f32>(vec![1].into()));
    assert!(matches!(
        sess.run("serving_default", &f, &["y"]),
        Err(SessionError::UnknownInput { .. })
    ));
    assert!(matches!(
        sess.run("serving_default", &Feeds::default(), &["y"]),
        Err(SessionError::MissingInput(_))
    ));
    assert!(matches!(
        sess.run("serving_default", &feeds(vec![0.0, 0.0]), &["nope"]),
        Err(SessionError::UnknownValue(_))
    ));
}

#[test]
fn enabled_dump_writes_tensor() {
    let dir = tempfile::tempdir().unwrap();
    let sess = InterpreterSessionBuilder::new(mlp(Some(dir.path()))).build();
    sess.run("serving_default", &feeds(vec![1.0, 2.0]), &["dumped"])
        .unwrap();

    let buf = std::fs::read(dir.path().join("unquantized_tensor_data.pb")).unwrap();
    let proto = TensorProto::decode(buf.as_slice()).unwrap();
    assert_eq!(proto.name, "matmul");
    assert!(proto.to_tensor().unwrap().allclose(&[5.0f32, 0.0]));
}

#[test]
fn loader_checks_tags() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model");
    let m = mlp(None);
    save_bundle(&path, &m, dir.path(), &m.tags, &m.signatures).unwrap();

    let loader = InterpreterSessionLoader::new();
    let sess = loader.load(&path, &m.tags).unwrap();
    let out = sess
        .run("serving_default", &feeds(vec![1.0, 2.0]), &["mm"])
        .unwrap();
    assert!(out[0].allclose(&[5.0f32, 0.0]));

    let tags = BTreeSet::from(["train".to_string()]);
    assert!(matches!(
        loader.load(&path, &tags),
        Err(SessionError::TagsMismatch { .. })
    ));
}

#[test]
fn concurrent_runs() {
    let sess = InterpreterSessionBuilder::new(mlp(None)).build();
    (0..32).into_par_iter().for_each(|i| {
        let v = i as f32;
        let out = sess
            .run("serving_default", &feeds(vec![v, 0.0]), &["mm"])
            .unwrap();
        assert!(out[0].allclose(&[v, -v]));
    });
}
