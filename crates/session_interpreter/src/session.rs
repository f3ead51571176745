use std::{
    cell::RefCell,
    time::{Duration, Instant},
};

use quantcal_core::{
    model::Model,
    node::NodeId,
    op::Op,
    tensor::Tensor,
    value::ValueId,
};
use quantcal_session::{Feeds, Session, SessionError};
use rustc_hash::FxHashMap;
use thread_local::ThreadLocal;

use super::{dump::dump_tensor, elemwise, matmul::matmul, softmax::softmax};

pub struct InterpreterSession {
    pub(super) model: Model,
    pub(super) sorted_nodes: Vec<NodeId>,
    pub(super) enable_profiling: bool,
    pub(super) values: ThreadLocal<RefCell<FxHashMap<ValueId, Tensor>>>,
}

impl InterpreterSession {
    fn bind_inputs(
        &self,
        signature_key: &str,
        feeds: &Feeds,
        values: &mut FxHashMap<ValueId, Tensor>,
    ) -> Result<(), SessionError> {
        let sig = self
            .model
            .signatures
            .get(signature_key)
            .ok_or_else(|| SessionError::UnknownSignature(signature_key.to_string()))?;

        if let Some(key) = feeds.keys().find(|key| !sig.inputs.contains_key(*key)) {
            return Err(SessionError::UnknownInput {
                signature: signature_key.to_string(),
                key: key.clone(),
            });
        }

        for (key, spec) in &sig.inputs {
            let tensor = feeds
                .get(key)
                .ok_or_else(|| SessionError::MissingInput(key.clone()))?;
            if !spec.shape.accepts(tensor) {
                return Err(SessionError::Shape {
                    key: key.clone(),
                    expected: spec.shape.clone(),
                    actual_ty: tensor.elem_ty(),
                    actual_dims: tensor.dims().clone(),
                });
            }
            let id = self
                .model
                .graph
                .values
                .get(&spec.name)
                .ok_or_else(|| SessionError::UnknownValue(spec.name.clone()))?;
            values.insert(id, tensor.clone());
        }

        Ok(())
    }

    fn run_node(
        &self,
        profile: &mut FxHashMap<&'static str, Duration>,
        values: &mut FxHashMap<ValueId, Tensor>,
        node_id: NodeId,
    ) -> Result<(), SessionError> {
        let graph = &self.model.graph;
        let node = &graph.nodes[node_id];
        let inputs = node
            .inputs
            .iter()
            .map(|id| {
                values
                    .get(id)
                    .or_else(|| graph.inits.get(id))
                    .ok_or_else(|| SessionError::NotComputed(graph.values.name(*id).to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let arity = match &node.op {
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::MatMul => 2,
            _ => 1,
        };
        if inputs.len() != arity || node.outputs.len() != 1 {
            return Err(SessionError::Message(
                format!(
                    "{} '{}' expects {arity} input(s) and 1 output",
                    node.op.name(),
                    node.display_name(node_id)
                )
                .into(),
            ));
        }

        let start = Instant::now();
        let output = match &node.op {
            Op::Identity | Op::CustomAggregator(_) => inputs[0].clone(),
            Op::DumpTensor(dump) => {
                if dump.enabled {
                    dump_tensor(dump, inputs[0])?;
                }
                inputs[0].clone()
            }
            Op::Add | Op::Sub | Op::Mul | Op::Div => {
                elemwise::binary(&node.op, inputs[0], inputs[1])?
            }
            Op::ReLU | Op::ReLU6 | Op::Sigmoid | Op::Tanh => elemwise::unary(&node.op, inputs[0])?,
            Op::MatMul => matmul(inputs[0], inputs[1])?,
            Op::Softmax(s) => softmax(s, inputs[0])?,
        };
        *profile.entry(node.op.name()).or_default() += start.elapsed();

        values.insert(node.outputs[0], output);
        Ok(())
    }
}

impl Session for InterpreterSession {
    fn run(
        &self,
        signature_key: &str,
        feeds: &Feeds,
        fetches: &[&str],
    ) -> Result<Vec<Tensor>, SessionError> {
        let start = Instant::now();
        let graph = &self.model.graph;

        let values = &mut *self
            .values
            .get_or(|| RefCell::new(FxHashMap::default()))
            .borrow_mut();
        values.clear();

        self.bind_inputs(signature_key, feeds, values)?;

        let fetch_ids = fetches
            .iter()
            .map(|&name| {
                graph
                    .values
                    .get(name)
                    .ok_or_else(|| SessionError::UnknownValue(name.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Only the nodes the fetched values depend on are executed.
        let needed = self.model.reachable_nodes(&fetch_ids);
        let mut profile = FxHashMap::default();
        for &node_id in &self.sorted_nodes {
            if needed.contains(&node_id) {
                self.run_node(&mut profile, values, node_id)?;
            }
        }

        if self.enable_profiling {
            log::info!(
                "Kernel execution time: {:#?}",
                profile.values().sum::<Duration>()
            );
            log::info!("Total execution time: {:#?}", start.elapsed());
            log::info!("Profile: {:#?}", profile);
        }

        fetch_ids
            .iter()
            .zip(fetches)
            .map(|(id, &name)| {
                values
                    .get(id)
                    .or_else(|| graph.inits.get(id))
                    .cloned()
                    .ok_or_else(|| SessionError::NotComputed(name.to_string()))
            })
            .collect()
    }
}
